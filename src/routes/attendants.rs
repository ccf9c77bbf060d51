use std::collections::{BTreeMap, HashMap};

use axum::extract::{Path, State};
use chrono::NaiveDateTime;
use diesel::dsl::count_star;
use diesel::pg::Pg;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::password::hash_password;
use crate::auth::AuthenticatedUser;
use crate::domain::FormOfService;
use crate::error::{AppError, AppResult};
use crate::models::{Attendant, NewAttendant, NewEventAttendant, User};
use crate::response::{ApiJson, ApiQuery, ApiResponse, PageRequest};
use crate::schema::{attendants, event_attendants, events, users};
use crate::state::AppState;
use crate::utils::json::{
    bool_field, nullable_field, optional_text_change, required_text_change, NullableValue,
};
use crate::validation::{
    is_valid_email, is_valid_pin, normalize_email, pin_from_phone, trimmed_or_none, FieldErrors,
};

#[derive(Debug, Default, Deserialize)]
pub struct ListAttendantsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub congregation: Option<String>,
    pub forms_of_service: Option<String>,
    pub is_active: Option<bool>,
    pub has_user: Option<bool>,
    pub event_id: Option<Uuid>,
    #[serde(default)]
    pub include_stats: bool,
}

#[derive(Deserialize)]
pub struct CreateAttendantRequest {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub congregation: String,
    #[serde(default)]
    pub forms_of_service: Vec<String>,
    pub is_active: Option<bool>,
    pub notes: Option<String>,
    pub user_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct ImportAttendantRow {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub email: String,
    pub phone: Option<String>,
    #[serde(default)]
    pub congregation: String,
    #[serde(default)]
    pub forms_of_service: String,
    pub is_active: Option<bool>,
    pub notes: Option<String>,
}

#[derive(Deserialize)]
pub struct ImportAttendantsRequest {
    pub attendants: Vec<ImportAttendantRow>,
    pub event_id: Option<Uuid>,
}

#[derive(Deserialize)]
pub struct SetPinRequest {
    pub pin: Option<String>,
    #[serde(default)]
    pub auto_generate: bool,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = attendants)]
struct UpdateAttendantChangeset<'a> {
    first_name: Option<&'a str>,
    last_name: Option<&'a str>,
    email: Option<String>,
    phone: Option<Option<&'a str>>,
    congregation: Option<&'a str>,
    forms_of_service: Option<Vec<String>>,
    is_active: Option<bool>,
    notes: Option<Option<&'a str>>,
    user_id: Option<Option<Uuid>>,
}

#[derive(Serialize)]
pub struct LinkedUser {
    pub id: Uuid,
    pub email: String,
    pub role: String,
    pub is_active: bool,
}

#[derive(Serialize)]
pub struct AttendantResponse {
    pub id: Uuid,
    pub user_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub congregation: String,
    pub forms_of_service: Vec<String>,
    pub is_active: bool,
    pub notes: Option<String>,
    pub has_pin: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user: Option<LinkedUser>,
}

impl AttendantResponse {
    pub fn new(attendant: Attendant, user: Option<User>) -> Self {
        Self {
            id: attendant.id,
            user_id: attendant.user_id,
            first_name: attendant.first_name,
            last_name: attendant.last_name,
            email: attendant.email,
            phone: attendant.phone,
            congregation: attendant.congregation,
            forms_of_service: attendant.forms_of_service,
            is_active: attendant.is_active,
            notes: attendant.notes,
            has_pin: attendant.pin_hash.is_some(),
            created_at: attendant.created_at,
            updated_at: attendant.updated_at,
            user: user.map(|user| LinkedUser {
                id: user.id,
                email: user.email,
                role: user.role,
                is_active: user.is_active,
            }),
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct AttendantStats {
    pub total: i64,
    pub active: i64,
    pub inactive: i64,
    pub by_congregation: BTreeMap<String, i64>,
    pub by_forms_of_service: BTreeMap<&'static str, i64>,
    pub with_users: i64,
    pub without_users: i64,
}

#[derive(Serialize)]
pub struct AttendantListResponse {
    pub attendants: Vec<AttendantResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<AttendantStats>,
}

#[derive(Serialize)]
pub struct ImportRowError {
    pub row: usize,
    pub email: String,
    pub error: String,
}

#[derive(Default, Serialize)]
pub struct ImportSummary {
    pub created: usize,
    pub updated: usize,
    pub errors: Vec<ImportRowError>,
}

#[derive(Serialize)]
pub struct PinResponse {
    pub attendant_id: Uuid,
    pub pin: String,
}

fn filtered_attendants(params: &ListAttendantsQuery) -> attendants::BoxedQuery<'static, Pg> {
    let mut query = attendants::table.into_boxed();

    if let Some(search) = trimmed_or_none(params.search.clone()) {
        let pattern = format!("%{search}%");
        query = query.filter(
            attendants::first_name
                .ilike(pattern.clone())
                .or(attendants::last_name.ilike(pattern.clone()))
                .or(attendants::email.ilike(pattern.clone()))
                .or(attendants::congregation.ilike(pattern)),
        );
    }
    if let Some(congregation) = trimmed_or_none(params.congregation.clone()) {
        query = query.filter(attendants::congregation.ilike(format!("%{congregation}%")));
    }
    if let Some(raw) = params.forms_of_service.as_deref() {
        let forms: Vec<String> = FormOfService::parse_list(raw)
            .into_iter()
            .map(|form| form.as_str().to_string())
            .collect();
        if !forms.is_empty() {
            query = query.filter(attendants::forms_of_service.contains(forms));
        }
    }
    if let Some(active) = params.is_active {
        query = query.filter(attendants::is_active.eq(active));
    }
    match params.has_user {
        Some(true) => query = query.filter(attendants::user_id.is_not_null()),
        Some(false) => query = query.filter(attendants::user_id.is_null()),
        None => {}
    }
    if let Some(event_id) = params.event_id {
        let roster = event_attendants::table
            .filter(event_attendants::event_id.eq(event_id))
            .filter(event_attendants::is_active.eq(true))
            .select(event_attendants::attendant_id);
        query = query.filter(attendants::id.eq_any(roster));
    }

    query
}

fn attendant_stats(conn: &mut PgConnection) -> QueryResult<AttendantStats> {
    let mut stats = AttendantStats {
        total: attendants::table.count().get_result(conn)?,
        active: attendants::table
            .filter(attendants::is_active.eq(true))
            .count()
            .get_result(conn)?,
        with_users: attendants::table
            .filter(attendants::user_id.is_not_null())
            .count()
            .get_result(conn)?,
        ..AttendantStats::default()
    };
    stats.inactive = stats.total - stats.active;
    stats.without_users = stats.total - stats.with_users;

    let congregations: Vec<(String, i64)> = attendants::table
        .group_by(attendants::congregation)
        .select((attendants::congregation, count_star()))
        .load(conn)?;
    stats.by_congregation = congregations.into_iter().collect();

    stats.by_forms_of_service = FormOfService::ALL
        .iter()
        .map(|form| (form.as_str(), 0))
        .collect();
    let forms: Vec<Vec<String>> = attendants::table
        .select(attendants::forms_of_service)
        .load(conn)?;
    for form in forms.iter().flatten() {
        if let Ok(form) = form.parse::<FormOfService>() {
            *stats.by_forms_of_service.entry(form.as_str()).or_default() += 1;
        }
    }

    Ok(stats)
}

fn load_attendant(conn: &mut PgConnection, id: Uuid) -> AppResult<(Attendant, Option<User>)> {
    attendants::table
        .left_join(users::table)
        .filter(attendants::id.eq(id))
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_entity("attendant"))
}

fn email_taken(conn: &mut PgConnection, email: &str, except: Option<Uuid>) -> QueryResult<bool> {
    let mut query = attendants::table
        .filter(attendants::email.eq(email.to_string()))
        .select(count_star())
        .into_boxed();
    if let Some(id) = except {
        query = query.filter(attendants::id.ne(id));
    }
    Ok(query.first::<i64>(conn)? > 0)
}

fn user_exists(conn: &mut PgConnection, user_id: Uuid) -> QueryResult<bool> {
    let count: i64 = users::table
        .filter(users::id.eq(user_id))
        .select(count_star())
        .first(conn)?;
    Ok(count > 0)
}

fn parse_forms_strict(raw: &[String], errors: &mut FieldErrors) -> Vec<String> {
    let mut forms = Vec::new();
    for value in raw {
        match value.trim().parse::<FormOfService>() {
            Ok(form) => {
                if !forms.iter().any(|f: &String| f == form.as_str()) {
                    forms.push(form.as_str().to_string());
                }
            }
            Err(message) => errors.push("forms_of_service", message),
        }
    }
    forms
}

pub async fn list_attendants(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiQuery(params): ApiQuery<ListAttendantsQuery>,
) -> AppResult<ApiResponse<AttendantListResponse>> {
    user.require_attendant_manager()?;
    let mut conn = state.db()?;

    let page = PageRequest::new(params.page, params.limit, 10);
    let total: i64 = filtered_attendants(&params).count().get_result(&mut conn)?;
    let rows: Vec<Attendant> = filtered_attendants(&params)
        .order((attendants::last_name.asc(), attendants::first_name.asc()))
        .limit(page.limit)
        .offset(page.offset())
        .load(&mut conn)?;

    let user_ids: Vec<Uuid> = rows.iter().filter_map(|a| a.user_id).collect();
    let mut linked: HashMap<Uuid, User> = users::table
        .filter(users::id.eq_any(&user_ids))
        .load::<User>(&mut conn)?
        .into_iter()
        .map(|u| (u.id, u))
        .collect();

    let stats = if params.include_stats {
        Some(attendant_stats(&mut conn)?)
    } else {
        None
    };

    let attendants = rows
        .into_iter()
        .map(|attendant| {
            let user = attendant.user_id.and_then(|id| linked.remove(&id));
            AttendantResponse::new(attendant, user)
        })
        .collect();
    Ok(ApiResponse::ok(AttendantListResponse { attendants, stats })
        .with_pagination(page.paginate(total)))
}

pub async fn create_attendant(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiJson(payload): ApiJson<CreateAttendantRequest>,
) -> AppResult<ApiResponse<AttendantResponse>> {
    user.require_attendant_manager()?;

    let mut errors = FieldErrors::new();
    errors.require("first_name", &payload.first_name);
    errors.require("last_name", &payload.last_name);
    errors.require("congregation", &payload.congregation);
    if !is_valid_email(&payload.email) {
        errors.push("email", "valid email is required");
    }
    let forms = parse_forms_strict(&payload.forms_of_service, &mut errors);
    errors.into_result()?;

    let mut conn = state.db()?;
    let email = normalize_email(&payload.email);
    if email_taken(&mut conn, &email, None)? {
        return Err(AppError::bad_request(
            "attendant with this email already exists",
        ));
    }
    if let Some(user_id) = payload.user_id {
        if !user_exists(&mut conn, user_id)? {
            return Err(AppError::bad_request("user not found"));
        }
    }

    let new_attendant = NewAttendant {
        id: Uuid::new_v4(),
        user_id: payload.user_id,
        first_name: payload.first_name.trim().to_string(),
        last_name: payload.last_name.trim().to_string(),
        email,
        phone: trimmed_or_none(payload.phone),
        congregation: payload.congregation.trim().to_string(),
        forms_of_service: forms,
        is_active: payload.is_active.unwrap_or(true),
        notes: trimmed_or_none(payload.notes),
    };
    let attendant: Attendant = diesel::insert_into(attendants::table)
        .values(&new_attendant)
        .get_result(&mut conn)?;

    info!(attendant_id = %attendant.id, created_by = %user.user_id, "attendant created");
    let (attendant, linked) = load_attendant(&mut conn, attendant.id)?;
    Ok(ApiResponse::created(AttendantResponse::new(attendant, linked))
        .with_message("Attendant created successfully"))
}

pub async fn get_attendant(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(attendant_id): Path<Uuid>,
) -> AppResult<ApiResponse<AttendantResponse>> {
    user.require_attendant_manager()?;
    let mut conn = state.db()?;
    let (attendant, linked) = load_attendant(&mut conn, attendant_id)?;
    Ok(ApiResponse::ok(AttendantResponse::new(attendant, linked)))
}

pub async fn update_attendant(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(attendant_id): Path<Uuid>,
    ApiJson(body): ApiJson<Value>,
) -> AppResult<ApiResponse<AttendantResponse>> {
    user.require_attendant_manager()?;
    let mut conn = state.db()?;
    let (existing, _) = load_attendant(&mut conn, attendant_id)?;

    let mut errors = FieldErrors::new();
    let mut changes = UpdateAttendantChangeset::default();

    let first_name = nullable_field(&body, "first_name", &mut errors);
    changes.first_name = required_text_change(&first_name, "first_name", &mut errors);
    let last_name = nullable_field(&body, "last_name", &mut errors);
    changes.last_name = required_text_change(&last_name, "last_name", &mut errors);
    let congregation = nullable_field(&body, "congregation", &mut errors);
    changes.congregation = required_text_change(&congregation, "congregation", &mut errors);
    let phone = nullable_field(&body, "phone", &mut errors);
    changes.phone = optional_text_change(&phone);
    let notes = nullable_field(&body, "notes", &mut errors);
    changes.notes = optional_text_change(&notes);
    changes.is_active = bool_field(&body, "is_active", &mut errors);

    let email = nullable_field(&body, "email", &mut errors);
    if let Some(email) = required_text_change(&email, "email", &mut errors) {
        if is_valid_email(email) {
            changes.email = Some(normalize_email(email));
        } else {
            errors.push("email", "valid email is required");
        }
    }

    match body.get("forms_of_service") {
        None | Some(Value::Null) => {}
        Some(Value::Array(values)) => {
            let raw: Vec<String> = values
                .iter()
                .map(|v| v.as_str().unwrap_or_default().to_string())
                .collect();
            changes.forms_of_service = Some(parse_forms_strict(&raw, &mut errors));
        }
        Some(other) => errors.push(
            "forms_of_service",
            format!("expected an array of strings, got {other}"),
        ),
    }

    match nullable_field(&body, "user_id", &mut errors) {
        NullableValue::Omitted => {}
        NullableValue::Null => changes.user_id = Some(None),
        NullableValue::String(raw) if raw.trim().is_empty() => changes.user_id = Some(None),
        NullableValue::String(raw) => match raw.trim().parse::<Uuid>() {
            Ok(id) => changes.user_id = Some(Some(id)),
            Err(_) => errors.push("user_id", "user_id must be a UUID"),
        },
    }
    errors.into_result()?;

    if let Some(email) = changes.email.as_deref() {
        if email != existing.email && email_taken(&mut conn, email, Some(attendant_id))? {
            return Err(AppError::bad_request("email already exists"));
        }
    }
    if let Some(Some(user_id)) = changes.user_id {
        if !user_exists(&mut conn, user_id)? {
            return Err(AppError::bad_request("user not found"));
        }
    }

    let untouched = changes.first_name.is_none()
        && changes.last_name.is_none()
        && changes.email.is_none()
        && changes.phone.is_none()
        && changes.congregation.is_none()
        && changes.forms_of_service.is_none()
        && changes.is_active.is_none()
        && changes.notes.is_none()
        && changes.user_id.is_none();
    if !untouched {
        diesel::update(attendants::table.find(attendant_id))
            .set(&changes)
            .execute(&mut conn)?;
        info!(attendant_id = %attendant_id, updated_by = %user.user_id, "attendant updated");
    }

    let (attendant, linked) = load_attendant(&mut conn, attendant_id)?;
    Ok(ApiResponse::ok(AttendantResponse::new(attendant, linked))
        .with_message("Attendant updated successfully"))
}

pub async fn delete_attendant(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(attendant_id): Path<Uuid>,
) -> AppResult<ApiResponse<Value>> {
    user.require_attendant_manager()?;
    let mut conn = state.db()?;
    let deleted = diesel::delete(attendants::table.find(attendant_id)).execute(&mut conn)?;
    if deleted == 0 {
        return Err(AppError::not_found_entity("attendant"));
    }
    info!(attendant_id = %attendant_id, deleted_by = %user.user_id, "attendant deleted");
    Ok(ApiResponse::ok(serde_json::json!({ "id": attendant_id }))
        .with_message("Attendant deleted successfully"))
}

fn import_row(
    conn: &mut PgConnection,
    row: &ImportAttendantRow,
    event_id: Option<Uuid>,
) -> AppResult<bool> {
    let mut errors = Vec::new();
    for (field, value) in [
        ("first_name", &row.first_name),
        ("last_name", &row.last_name),
        ("congregation", &row.congregation),
    ] {
        if value.trim().is_empty() {
            errors.push(format!("{field} is required"));
        }
    }
    if !is_valid_email(&row.email) {
        errors.push("valid email is required".to_string());
    }
    if !errors.is_empty() {
        return Err(AppError::bad_request(errors.join(", ")));
    }

    let email = normalize_email(&row.email);
    let forms: Vec<String> = FormOfService::parse_list(&row.forms_of_service)
        .into_iter()
        .map(|form| form.as_str().to_string())
        .collect();
    let phone = trimmed_or_none(row.phone.clone());
    let notes = trimmed_or_none(row.notes.clone());

    let existing: Option<Uuid> = attendants::table
        .filter(attendants::email.eq(email.as_str()))
        .select(attendants::id)
        .first(conn)
        .optional()?;

    let (attendant_id, created) = match existing {
        Some(id) => {
            // Columns the row leaves out keep their stored values.
            let changes = UpdateAttendantChangeset {
                first_name: Some(row.first_name.trim()),
                last_name: Some(row.last_name.trim()),
                phone: phone.as_deref().map(Some),
                congregation: Some(row.congregation.trim()),
                forms_of_service: (!row.forms_of_service.trim().is_empty()).then_some(forms),
                is_active: row.is_active,
                notes: notes.as_deref().map(Some),
                ..Default::default()
            };
            diesel::update(attendants::table.find(id))
                .set(&changes)
                .execute(conn)?;
            (id, false)
        }
        None => {
            let new_attendant = NewAttendant {
                id: Uuid::new_v4(),
                user_id: None,
                first_name: row.first_name.trim().to_string(),
                last_name: row.last_name.trim().to_string(),
                email,
                phone,
                congregation: row.congregation.trim().to_string(),
                forms_of_service: forms,
                is_active: row.is_active.unwrap_or(true),
                notes,
            };
            diesel::insert_into(attendants::table)
                .values(&new_attendant)
                .execute(conn)?;
            (new_attendant.id, true)
        }
    };

    if let Some(event_id) = event_id {
        diesel::insert_into(event_attendants::table)
            .values(&NewEventAttendant {
                id: Uuid::new_v4(),
                event_id,
                attendant_id,
                is_active: true,
            })
            .on_conflict((event_attendants::event_id, event_attendants::attendant_id))
            .do_update()
            .set(event_attendants::is_active.eq(true))
            .execute(conn)?;
    }

    Ok(created)
}

pub async fn import_attendants(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiJson(payload): ApiJson<ImportAttendantsRequest>,
) -> AppResult<ApiResponse<ImportSummary>> {
    user.require_attendant_manager()?;

    if let Some(event_id) = payload.event_id {
        let mut conn = state.db()?;
        let found: i64 = events::table
            .filter(events::id.eq(event_id))
            .select(count_star())
            .first(&mut conn)?;
        if found == 0 {
            return Err(AppError::not_found_entity("event"));
        }
    }

    let mut summary = ImportSummary::default();
    for (index, row) in payload.attendants.iter().enumerate() {
        match state.transaction(|conn| import_row(conn, row, payload.event_id)) {
            Ok(true) => summary.created += 1,
            Ok(false) => summary.updated += 1,
            Err(err) => {
                warn!(
                    row = index + 1,
                    email = %row.email,
                    error = %err.message(),
                    "attendant import row failed"
                );
                summary.errors.push(ImportRowError {
                    row: index + 1,
                    email: row.email.clone(),
                    error: err.message().to_string(),
                });
            }
        }
    }

    info!(
        created = summary.created,
        updated = summary.updated,
        failed = summary.errors.len(),
        event_id = ?payload.event_id,
        "attendants imported"
    );
    Ok(ApiResponse::ok(summary).with_message("Import finished"))
}

pub async fn set_pin(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(attendant_id): Path<Uuid>,
    ApiJson(payload): ApiJson<SetPinRequest>,
) -> AppResult<ApiResponse<PinResponse>> {
    user.require_admin()?;
    let mut conn = state.db()?;
    let (attendant, _) = load_attendant(&mut conn, attendant_id)?;

    let pin = if payload.auto_generate {
        let phone = attendant.phone.as_deref().ok_or_else(|| {
            AppError::bad_request("cannot auto-generate PIN: no phone number on file")
        })?;
        pin_from_phone(phone)
            .ok_or_else(|| AppError::bad_request("phone number must have at least 4 digits"))?
    } else {
        payload.pin.unwrap_or_default().trim().to_string()
    };
    if !is_valid_pin(&pin) {
        return Err(AppError::invalid_field("pin", "PIN must be exactly 4 digits"));
    }

    let pin_hash = hash_password(&pin)?;
    diesel::update(attendants::table.find(attendant_id))
        .set(attendants::pin_hash.eq(Some(pin_hash)))
        .execute(&mut conn)?;

    info!(
        attendant_id = %attendant_id,
        auto_generated = payload.auto_generate,
        "attendant PIN set"
    );
    Ok(ApiResponse::ok(PinResponse { attendant_id, pin }).with_message("PIN set successfully"))
}
