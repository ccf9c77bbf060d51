use std::collections::{BTreeSet, HashMap};

use axum::extract::{Path, State};
use chrono::NaiveDateTime;
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::access;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{Assignment, NewPosition, Position, PositionOversight, Shift};
use crate::response::{ApiJson, ApiQuery, ApiResponse, PageRequest};
use crate::routes::assignments::{assignment_views, AssignmentResponse};
use crate::routes::events::ShiftResponse;
use crate::routes::oversight::{oversight_view, OversightResponse};
use crate::scheduling::shifts::{append_shifts, lock_position, shifts_for_position};
use crate::scheduling::templates::{
    mixing_violation, template_shifts, CustomShiftInput, ShiftTemplate,
};
use crate::schema::{
    attendants, position_assignments, position_oversight, position_shifts, positions,
};
use crate::state::AppState;
use crate::utils::json::{
    bool_field, nullable_field, optional_text_change, required_text_change, NullableValue,
};
use crate::validation::{trimmed_or_none, FieldErrors};

pub const MIN_POSITION_NUMBER: i32 = 1;
pub const MAX_POSITION_NUMBER: i32 = 1000;
pub const MAX_BULK_POSITIONS: i32 = 100;

#[derive(Debug, Default, Deserialize)]
pub struct ListPositionsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub area: Option<String>,
    #[serde(default)]
    pub include_shifts: bool,
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Deserialize)]
pub struct CreatePositionRequest {
    pub position_number: i32,
    pub name: String,
    pub description: Option<String>,
    pub area: Option<String>,
    pub sequence: Option<i32>,
}

#[derive(Deserialize)]
pub struct BulkCreatePositionsRequest {
    pub start_number: i32,
    pub end_number: i32,
    pub name_prefix: String,
    pub area: Option<String>,
    pub template: Option<String>,
    #[serde(default)]
    pub custom_shifts: Vec<CustomShiftInput>,
}

#[derive(Deserialize)]
pub struct ApplyTemplateRequest {
    pub position_ids: Vec<Uuid>,
    pub template: String,
    #[serde(default)]
    pub custom_shifts: Vec<CustomShiftInput>,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeletePositionQuery {
    #[serde(default)]
    pub hard_delete: bool,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = positions)]
struct UpdatePositionChangeset<'a> {
    position_number: Option<i32>,
    name: Option<&'a str>,
    description: Option<Option<&'a str>>,
    area: Option<Option<&'a str>>,
    sequence: Option<i32>,
    is_active: Option<bool>,
}

#[derive(Serialize)]
pub struct PositionResponse {
    pub id: Uuid,
    pub event_id: Uuid,
    pub position_number: i32,
    pub name: String,
    pub description: Option<String>,
    pub area: Option<String>,
    pub sequence: i32,
    pub is_active: bool,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub assignment_count: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub shifts: Option<Vec<ShiftResponse>>,
}

impl PositionResponse {
    fn new(position: Position, assignment_count: i64, shifts: Option<Vec<ShiftResponse>>) -> Self {
        Self {
            id: position.id,
            event_id: position.event_id,
            position_number: position.position_number,
            name: position.name,
            description: position.description,
            area: position.area,
            sequence: position.sequence,
            is_active: position.is_active,
            created_at: position.created_at,
            updated_at: position.updated_at,
            assignment_count,
            shifts,
        }
    }
}

#[derive(Serialize)]
pub struct PositionListResponse {
    pub positions: Vec<PositionResponse>,
    pub areas: Vec<String>,
}

#[derive(Serialize)]
pub struct PositionDetailResponse {
    #[serde(flatten)]
    pub position: PositionResponse,
    pub assignments: Vec<AssignmentResponse>,
    pub oversight: Option<OversightResponse>,
}

#[derive(Serialize)]
pub struct BulkCreateResponse {
    pub created: usize,
    pub shifts_created: usize,
    pub positions: Vec<PositionResponse>,
}

#[derive(Serialize)]
pub struct TemplateResult {
    pub position_id: Uuid,
    pub position_name: String,
    pub shifts_created: usize,
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub shifts: Vec<ShiftResponse>,
}

#[derive(Serialize)]
pub struct ApplyTemplateResponse {
    pub total_shifts_created: usize,
    pub results: Vec<TemplateResult>,
}

/// Loads a position of the given event, 404 otherwise.
pub(crate) fn find_position(
    conn: &mut PgConnection,
    event_id: Uuid,
    position_id: Uuid,
) -> AppResult<Position> {
    positions::table
        .filter(positions::id.eq(position_id))
        .filter(positions::event_id.eq(event_id))
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_entity("position"))
}

fn assignment_counts(
    conn: &mut PgConnection,
    position_ids: &[Uuid],
) -> QueryResult<HashMap<Uuid, i64>> {
    let rows: Vec<(Uuid, i64)> = position_assignments::table
        .filter(position_assignments::position_id.eq_any(position_ids))
        .group_by(position_assignments::position_id)
        .select((position_assignments::position_id, count_star()))
        .load(conn)?;
    Ok(rows.into_iter().collect())
}

fn check_position_number(number: i32, field: &str, errors: &mut FieldErrors) {
    if !(MIN_POSITION_NUMBER..=MAX_POSITION_NUMBER).contains(&number) {
        errors.push(
            field,
            format!("{field} must be between {MIN_POSITION_NUMBER} and {MAX_POSITION_NUMBER}"),
        );
    }
}

pub async fn list_positions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(event_id): Path<Uuid>,
    ApiQuery(params): ApiQuery<ListPositionsQuery>,
) -> AppResult<ApiResponse<PositionListResponse>> {
    let mut conn = state.db()?;
    access::load_event(&mut conn, &user, event_id)?;

    let page = PageRequest::new(params.page, params.limit, 100);
    let area = trimmed_or_none(params.area);

    let base = || {
        let mut query = positions::table
            .filter(positions::event_id.eq(event_id))
            .into_boxed();
        if !params.include_inactive {
            query = query.filter(positions::is_active.eq(true));
        }
        if let Some(area) = area.clone() {
            query = query.filter(positions::area.eq(area));
        }
        query
    };

    let total: i64 = base().count().get_result(&mut conn)?;
    let rows: Vec<Position> = base()
        .order((positions::sequence.asc(), positions::position_number.asc()))
        .limit(page.limit)
        .offset(page.offset())
        .load(&mut conn)?;

    let areas: Vec<Option<String>> = positions::table
        .filter(positions::event_id.eq(event_id))
        .filter(positions::area.is_not_null())
        .select(positions::area)
        .distinct()
        .load(&mut conn)?;
    let areas: Vec<String> = areas
        .into_iter()
        .flatten()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect();

    let ids: Vec<Uuid> = rows.iter().map(|p| p.id).collect();
    let counts = assignment_counts(&mut conn, &ids)?;
    let mut shifts_by_position: HashMap<Uuid, Vec<ShiftResponse>> = HashMap::new();
    if params.include_shifts {
        let shift_rows: Vec<Shift> = position_shifts::table
            .filter(position_shifts::position_id.eq_any(&ids))
            .order(position_shifts::sequence.asc())
            .load(&mut conn)?;
        for shift in shift_rows {
            shifts_by_position
                .entry(shift.position_id)
                .or_default()
                .push(shift.into());
        }
    }

    let positions = rows
        .into_iter()
        .map(|position| {
            let count = counts.get(&position.id).copied().unwrap_or(0);
            let shifts = params
                .include_shifts
                .then(|| shifts_by_position.remove(&position.id).unwrap_or_default());
            PositionResponse::new(position, count, shifts)
        })
        .collect();

    Ok(ApiResponse::ok(PositionListResponse { positions, areas })
        .with_pagination(page.paginate(total)))
}

pub async fn create_position(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(event_id): Path<Uuid>,
    ApiJson(payload): ApiJson<CreatePositionRequest>,
) -> AppResult<ApiResponse<PositionResponse>> {
    let mut conn = state.db()?;
    let (_, access) = access::load_event(&mut conn, &user, event_id)?;
    access.ensure(access.can_manage_event(), "create positions")?;

    let mut errors = FieldErrors::new();
    errors.require("name", &payload.name);
    check_position_number(payload.position_number, "position_number", &mut errors);
    errors.into_result()?;

    let taken: i64 = positions::table
        .filter(positions::event_id.eq(event_id))
        .filter(positions::position_number.eq(payload.position_number))
        .select(count_star())
        .first(&mut conn)?;
    if taken > 0 {
        return Err(AppError::bad_request(format!(
            "position number {} already exists in this event",
            payload.position_number
        )));
    }

    let new_position = NewPosition {
        id: Uuid::new_v4(),
        event_id,
        position_number: payload.position_number,
        name: payload.name.trim().to_string(),
        description: trimmed_or_none(payload.description),
        area: trimmed_or_none(payload.area),
        sequence: payload.sequence.unwrap_or(payload.position_number),
    };
    let position: Position = diesel::insert_into(positions::table)
        .values(&new_position)
        .get_result(&mut conn)?;

    info!(
        event_id = %event_id,
        position_id = %position.id,
        number = position.position_number,
        "position created"
    );
    Ok(ApiResponse::created(PositionResponse::new(position, 0, Some(Vec::new())))
        .with_message("Position created successfully"))
}

pub async fn bulk_create_positions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(event_id): Path<Uuid>,
    ApiJson(payload): ApiJson<BulkCreatePositionsRequest>,
) -> AppResult<ApiResponse<BulkCreateResponse>> {
    {
        let mut conn = state.db()?;
        let (_, access) = access::load_event(&mut conn, &user, event_id)?;
        access.ensure(access.can_manage_event(), "create positions")?;
    }

    let mut errors = FieldErrors::new();
    errors.require("name_prefix", &payload.name_prefix);
    check_position_number(payload.start_number, "start_number", &mut errors);
    check_position_number(payload.end_number, "end_number", &mut errors);
    if payload.end_number < payload.start_number {
        errors.push("end_number", "end_number must not be below start_number");
    } else if i64::from(payload.end_number) - i64::from(payload.start_number) + 1
        > i64::from(MAX_BULK_POSITIONS)
    {
        errors.push(
            "end_number",
            format!("at most {MAX_BULK_POSITIONS} positions can be created at once"),
        );
    }
    let template = match payload.template.as_deref() {
        None => None,
        Some(raw) => match raw.parse::<ShiftTemplate>() {
            Ok(template) => Some(template),
            Err(message) => {
                errors.push("template", message);
                None
            }
        },
    };
    errors.into_result()?;

    let shift_specs = match template {
        Some(template) => template_shifts(template, &payload.custom_shifts)
            .map_err(AppError::from)?,
        None => Vec::new(),
    };

    let prefix = payload.name_prefix.trim().to_string();
    let area = trimmed_or_none(payload.area);
    let (start, end) = (payload.start_number, payload.end_number);

    let (created, shifts_created) = state.transaction(|conn| {
        let existing: Vec<i32> = positions::table
            .filter(positions::event_id.eq(event_id))
            .filter(positions::position_number.between(start, end))
            .select(positions::position_number)
            .order(positions::position_number.asc())
            .load(conn)?;
        if !existing.is_empty() {
            let numbers: Vec<String> = existing.iter().map(i32::to_string).collect();
            return Err(AppError::bad_request(format!(
                "positions already exist for numbers: {}",
                numbers.join(", ")
            )));
        }

        let rows: Vec<NewPosition> = (start..=end)
            .map(|number| NewPosition {
                id: Uuid::new_v4(),
                event_id,
                position_number: number,
                name: format!("{prefix} {number}"),
                description: None,
                area: area.clone(),
                sequence: number,
            })
            .collect();
        let created: Vec<Position> = diesel::insert_into(positions::table)
            .values(&rows)
            .get_results(conn)?;

        let mut shifts_created = HashMap::new();
        for position in &created {
            let shifts = append_shifts(conn, position.id, 0, shift_specs.clone())?;
            shifts_created.insert(position.id, shifts);
        }
        Ok((created, shifts_created))
    })?;

    let total_shifts: usize = shifts_created.values().map(Vec::len).sum();
    info!(
        event_id = %event_id,
        positions = created.len(),
        shifts = total_shifts,
        "positions bulk created"
    );

    let mut shifts_created = shifts_created;
    let positions: Vec<PositionResponse> = created
        .into_iter()
        .map(|position| {
            let shifts = shifts_created
                .remove(&position.id)
                .unwrap_or_default()
                .into_iter()
                .map(ShiftResponse::from)
                .collect();
            PositionResponse::new(position, 0, Some(shifts))
        })
        .collect();

    Ok(ApiResponse::created(BulkCreateResponse {
        created: positions.len(),
        shifts_created: total_shifts,
        positions,
    })
    .with_message(format!("Created {} positions", end - start + 1)))
}

pub async fn apply_template(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(event_id): Path<Uuid>,
    ApiJson(payload): ApiJson<ApplyTemplateRequest>,
) -> AppResult<ApiResponse<ApplyTemplateResponse>> {
    let mut errors = FieldErrors::new();
    if payload.position_ids.is_empty() {
        errors.push("position_ids", "at least one position is required");
    }
    let template = match payload.template.parse::<ShiftTemplate>() {
        Ok(template) => Some(template),
        Err(message) => {
            errors.push("template", message);
            None
        }
    };
    errors.into_result()?;
    let template = template.ok_or_else(|| AppError::bad_request("invalid template"))?;
    let specs = template_shifts(template, &payload.custom_shifts).map_err(AppError::from)?;
    let creating_all_day = specs.iter().any(|s| s.is_all_day);

    let mut conn = state.db()?;
    let (_, access) = access::load_event(&mut conn, &user, event_id)?;
    let targets: Vec<Position> = positions::table
        .filter(positions::event_id.eq(event_id))
        .filter(positions::id.eq_any(&payload.position_ids))
        .order(positions::position_number.asc())
        .load(&mut conn)?;
    let requested: BTreeSet<Uuid> = payload.position_ids.iter().copied().collect();
    if targets.len() != requested.len() {
        return Err(AppError::not_found_entity("one or more positions"));
    }
    for position in &targets {
        access.ensure(
            access.can_manage_position(position),
            &format!("manage position {}", position.position_number),
        )?;
    }
    drop(conn);

    let results = state.transaction(|conn| {
        let mut results = Vec::with_capacity(targets.len());
        for position in &targets {
            lock_position(conn, position.id)?;
            let existing = shifts_for_position(conn, position.id)?;
            if let Some(reason) = mixing_violation(&existing, creating_all_day) {
                results.push(TemplateResult {
                    position_id: position.id,
                    position_name: position.name.clone(),
                    shifts_created: 0,
                    skipped: true,
                    reason: Some(reason.to_string()),
                    shifts: Vec::new(),
                });
                continue;
            }
            let created = append_shifts(conn, position.id, existing.len(), specs.clone())?;
            results.push(TemplateResult {
                position_id: position.id,
                position_name: position.name.clone(),
                shifts_created: created.len(),
                skipped: false,
                reason: None,
                shifts: created.into_iter().map(ShiftResponse::from).collect(),
            });
        }
        Ok(results)
    })?;

    let total_shifts_created = results.iter().map(|r| r.shifts_created).sum();
    info!(
        event_id = %event_id,
        template = %payload.template,
        positions = results.len(),
        shifts = total_shifts_created,
        "shift template applied"
    );
    Ok(ApiResponse::ok(ApplyTemplateResponse {
        total_shifts_created,
        results,
    })
    .with_message(format!("Created {total_shifts_created} shifts")))
}

pub async fn get_position(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((event_id, position_id)): Path<(Uuid, Uuid)>,
) -> AppResult<ApiResponse<PositionDetailResponse>> {
    let mut conn = state.db()?;
    access::load_event(&mut conn, &user, event_id)?;
    let position = find_position(&mut conn, event_id, position_id)?;

    let shifts: Vec<ShiftResponse> = shifts_for_position(&mut conn, position_id)?
        .into_iter()
        .map(ShiftResponse::from)
        .collect();
    let assignment_rows: Vec<Assignment> = position_assignments::table
        .filter(position_assignments::position_id.eq(position_id))
        .order(position_assignments::assigned_at.asc())
        .load(&mut conn)?;
    let assignments = assignment_views(&mut conn, assignment_rows)?;
    let oversight: Option<PositionOversight> = position_oversight::table
        .filter(position_oversight::position_id.eq(position_id))
        .first(&mut conn)
        .optional()?;
    let oversight = oversight
        .map(|row| oversight_view(&mut conn, row))
        .transpose()?;

    let count = assignments.len() as i64;
    Ok(ApiResponse::ok(PositionDetailResponse {
        position: PositionResponse::new(position, count, Some(shifts)),
        assignments,
        oversight,
    }))
}

pub async fn update_position(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((event_id, position_id)): Path<(Uuid, Uuid)>,
    ApiJson(body): ApiJson<Value>,
) -> AppResult<ApiResponse<PositionResponse>> {
    let mut conn = state.db()?;
    let (_, access) = access::load_event(&mut conn, &user, event_id)?;
    let existing = find_position(&mut conn, event_id, position_id)?;
    access.ensure(access.can_manage_position(&existing), "update this position")?;

    let mut errors = FieldErrors::new();
    let mut changes = UpdatePositionChangeset::default();

    let name = nullable_field(&body, "name", &mut errors);
    changes.name = required_text_change(&name, "name", &mut errors);
    let description = nullable_field(&body, "description", &mut errors);
    changes.description = optional_text_change(&description);
    let area = nullable_field(&body, "area", &mut errors);
    changes.area = optional_text_change(&area);
    changes.is_active = bool_field(&body, "is_active", &mut errors);
    changes.position_number = integer_field(&body, "position_number", &mut errors);
    changes.sequence = integer_field(&body, "sequence", &mut errors);
    if let Some(number) = changes.position_number {
        check_position_number(number, "position_number", &mut errors);
    }
    errors.into_result()?;

    if let Some(number) = changes.position_number.filter(|n| *n != existing.position_number) {
        let taken: i64 = positions::table
            .filter(positions::event_id.eq(event_id))
            .filter(positions::position_number.eq(number))
            .filter(positions::id.ne(position_id))
            .select(count_star())
            .first(&mut conn)?;
        if taken > 0 {
            return Err(AppError::bad_request(format!(
                "position number {number} already exists in this event"
            )));
        }
    }

    let untouched = changes.position_number.is_none()
        && changes.name.is_none()
        && changes.description.is_none()
        && changes.area.is_none()
        && changes.sequence.is_none()
        && changes.is_active.is_none();
    let position = if untouched {
        existing
    } else {
        diesel::update(positions::table.find(position_id))
            .set(&changes)
            .get_result::<Position>(&mut conn)?
    };

    let count = assignment_counts(&mut conn, &[position_id])?
        .get(&position_id)
        .copied()
        .unwrap_or(0);
    let shifts = shifts_for_position(&mut conn, position_id)?
        .into_iter()
        .map(ShiftResponse::from)
        .collect();
    info!(event_id = %event_id, position_id = %position_id, "position updated");
    Ok(ApiResponse::ok(PositionResponse::new(position, count, Some(shifts)))
        .with_message("Position updated successfully"))
}

fn integer_field(body: &Value, field: &str, errors: &mut FieldErrors) -> Option<i32> {
    match nullable_field(body, field, errors) {
        NullableValue::Omitted => None,
        NullableValue::Null => {
            errors.push(field, format!("{field} cannot be null"));
            None
        }
        NullableValue::String(raw) => match raw.trim().parse::<i32>() {
            Ok(value) => Some(value),
            Err(_) => {
                errors.push(field, format!("{field} must be an integer"));
                None
            }
        },
    }
}

pub async fn delete_position(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((event_id, position_id)): Path<(Uuid, Uuid)>,
    ApiQuery(params): ApiQuery<DeletePositionQuery>,
) -> AppResult<ApiResponse<Value>> {
    let mut conn = state.db()?;
    let (_, access) = access::load_event(&mut conn, &user, event_id)?;
    let position = find_position(&mut conn, event_id, position_id)?;

    if params.hard_delete {
        user.require_admin()?;
        let shift_count: i64 = position_shifts::table
            .filter(position_shifts::position_id.eq(position_id))
            .select(count_star())
            .first(&mut conn)?;
        let assignment_count: i64 = position_assignments::table
            .filter(position_assignments::position_id.eq(position_id))
            .select(count_star())
            .first(&mut conn)?;
        if shift_count > 0 || assignment_count > 0 {
            return Err(AppError::bad_request(format!(
                "cannot permanently delete a position with {shift_count} shifts and \
                 {assignment_count} assignments"
            )));
        }
        diesel::delete(positions::table.find(position_id)).execute(&mut conn)?;
        info!(event_id = %event_id, position_id = %position_id, "position permanently deleted");
        return Ok(ApiResponse::ok(serde_json::json!({ "id": position_id, "hard_deleted": true }))
            .with_message("Position permanently deleted"));
    }

    access.ensure(access.can_manage_position(&position), "delete this position")?;
    let active_assignments: i64 = position_assignments::table
        .inner_join(attendants::table.on(attendants::id.eq(position_assignments::attendant_id)))
        .filter(position_assignments::position_id.eq(position_id))
        .filter(attendants::is_active.eq(true))
        .select(count_star())
        .first(&mut conn)?;
    if active_assignments > 0 {
        return Err(AppError::bad_request(format!(
            "cannot deactivate a position with {active_assignments} active assignments"
        )));
    }

    diesel::update(positions::table.find(position_id))
        .set(positions::is_active.eq(false))
        .execute(&mut conn)?;
    info!(event_id = %event_id, position_id = %position_id, "position deactivated");
    Ok(ApiResponse::ok(serde_json::json!({ "id": position_id, "hard_deleted": false }))
        .with_message("Position deactivated"))
}
