use std::collections::HashMap;

use axum::extract::{Path, State};
use chrono::NaiveDateTime;
use diesel::dsl::count_star;
use diesel::pg::Pg;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::access::{self, EventAccess};
use crate::auth::AuthenticatedUser;
use crate::domain::{EventStatus, PermissionRole};
use crate::error::{AppError, AppResult};
use crate::models::{Event, NewEvent, NewEventPermission, Position, Shift};
use crate::response::{ApiJson, ApiQuery, ApiResponse, PageRequest};
use crate::schema::{
    event_attendants, event_permissions, events, position_assignments, position_shifts, positions,
};
use crate::state::AppState;
use crate::utils::json::{
    nullable_field, optional_text_change, required_text_change, NullableValue,
};
use crate::validation::{parse_datetime, trimmed_or_none, FieldErrors};

#[derive(Debug, Default, Deserialize)]
pub struct ListEventsQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub status: Option<String>,
    pub start_date: Option<String>,
    pub end_date: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateEventRequest {
    pub name: String,
    pub description: Option<String>,
    pub event_type: Option<String>,
    pub start_date: String,
    pub end_date: String,
    pub location: Option<String>,
    pub status: Option<String>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = events)]
struct UpdateEventChangeset<'a> {
    name: Option<&'a str>,
    description: Option<Option<&'a str>>,
    event_type: Option<Option<&'a str>>,
    location: Option<Option<&'a str>>,
    start_date: Option<NaiveDateTime>,
    end_date: Option<NaiveDateTime>,
    status: Option<&'a str>,
}

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct EventCounts {
    pub positions: i64,
    pub attendants: i64,
    pub assignments: i64,
}

#[derive(Serialize)]
pub struct EventResponse {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub event_type: Option<String>,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub location: Option<String>,
    pub status: String,
    pub created_by: Option<Uuid>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
    pub counts: EventCounts,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub access_role: Option<PermissionRole>,
}

impl EventResponse {
    pub fn new(event: Event, counts: EventCounts, access: Option<&EventAccess>) -> Self {
        Self {
            id: event.id,
            name: event.name,
            description: event.description,
            event_type: event.event_type,
            start_date: event.start_date,
            end_date: event.end_date,
            location: event.location,
            status: event.status,
            created_by: event.created_by,
            created_at: event.created_at,
            updated_at: event.updated_at,
            counts,
            access_role: access.map(|a| a.role),
        }
    }
}

#[derive(Serialize)]
pub struct PositionWithShifts {
    pub id: Uuid,
    pub position_number: i32,
    pub name: String,
    pub area: Option<String>,
    pub sequence: i32,
    pub is_active: bool,
    pub shifts: Vec<ShiftResponse>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ShiftResponse {
    pub id: Uuid,
    pub position_id: Uuid,
    pub name: String,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub is_all_day: bool,
    pub sequence: i32,
}

impl From<Shift> for ShiftResponse {
    fn from(shift: Shift) -> Self {
        Self {
            id: shift.id,
            position_id: shift.position_id,
            name: shift.name,
            start_time: shift.start_time.map(|t| t.format("%H:%M").to_string()),
            end_time: shift.end_time.map(|t| t.format("%H:%M").to_string()),
            is_all_day: shift.is_all_day,
            sequence: shift.sequence,
        }
    }
}

#[derive(Serialize)]
pub struct EventDetailResponse {
    #[serde(flatten)]
    pub event: EventResponse,
    pub positions: Vec<PositionWithShifts>,
}

fn filtered_events(
    user: &AuthenticatedUser,
    search: Option<&str>,
    status: Option<&str>,
    starts_after: Option<NaiveDateTime>,
    ends_before: Option<NaiveDateTime>,
) -> events::BoxedQuery<'static, Pg> {
    let mut query = events::table.into_boxed();

    if !user.is_admin() {
        let visible = event_permissions::table
            .filter(event_permissions::user_id.eq(user.user_id))
            .select(event_permissions::event_id);
        query = query.filter(events::id.eq_any(visible));
    }

    if let Some(search) = search {
        let pattern = format!("%{search}%");
        query = query.filter(
            events::name
                .ilike(pattern.clone())
                .or(events::location.assume_not_null().ilike(pattern)),
        );
    }
    if let Some(status) = status {
        query = query.filter(events::status.eq(status.to_string()));
    }
    if let Some(start) = starts_after {
        query = query.filter(events::start_date.ge(start));
    }
    if let Some(end) = ends_before {
        query = query.filter(events::end_date.le(end));
    }

    query
}

pub(crate) fn event_counts(
    conn: &mut PgConnection,
    event_ids: &[Uuid],
) -> QueryResult<HashMap<Uuid, EventCounts>> {
    let mut counts: HashMap<Uuid, EventCounts> = event_ids
        .iter()
        .map(|id| (*id, EventCounts::default()))
        .collect();

    let position_rows: Vec<(Uuid, i64)> = positions::table
        .filter(positions::event_id.eq_any(event_ids))
        .filter(positions::is_active.eq(true))
        .group_by(positions::event_id)
        .select((positions::event_id, count_star()))
        .load(conn)?;
    for (event_id, total) in position_rows {
        counts.entry(event_id).or_default().positions = total;
    }

    let attendant_rows: Vec<(Uuid, i64)> = event_attendants::table
        .filter(event_attendants::event_id.eq_any(event_ids))
        .filter(event_attendants::is_active.eq(true))
        .group_by(event_attendants::event_id)
        .select((event_attendants::event_id, count_star()))
        .load(conn)?;
    for (event_id, total) in attendant_rows {
        counts.entry(event_id).or_default().attendants = total;
    }

    let assignment_rows: Vec<(Uuid, i64)> = position_assignments::table
        .inner_join(positions::table)
        .filter(positions::event_id.eq_any(event_ids))
        .group_by(positions::event_id)
        .select((positions::event_id, count_star()))
        .load(conn)?;
    for (event_id, total) in assignment_rows {
        counts.entry(event_id).or_default().assignments = total;
    }

    Ok(counts)
}

pub async fn list_events(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiQuery(params): ApiQuery<ListEventsQuery>,
) -> AppResult<ApiResponse<Vec<EventResponse>>> {
    let page = PageRequest::new(params.page, params.limit, 10);
    let search = trimmed_or_none(params.search);
    let status = trimmed_or_none(params.status);

    let mut errors = FieldErrors::new();
    if let Some(status) = status.as_deref() {
        if let Err(message) = status.parse::<EventStatus>() {
            errors.push("status", message);
        }
    }
    let starts_after = parse_optional_date(params.start_date.as_deref(), "start_date", &mut errors);
    let ends_before = parse_optional_date(params.end_date.as_deref(), "end_date", &mut errors);
    errors.into_result()?;

    let mut conn = state.db()?;
    let total: i64 = filtered_events(
        &user,
        search.as_deref(),
        status.as_deref(),
        starts_after,
        ends_before,
    )
    .count()
    .get_result(&mut conn)?;

    let rows: Vec<Event> = filtered_events(
        &user,
        search.as_deref(),
        status.as_deref(),
        starts_after,
        ends_before,
    )
    .order(events::start_date.desc())
    .limit(page.limit)
    .offset(page.offset())
    .load(&mut conn)?;

    let ids: Vec<Uuid> = rows.iter().map(|event| event.id).collect();
    let counts = event_counts(&mut conn, &ids)?;

    let data = rows
        .into_iter()
        .map(|event| {
            let event_counts = counts.get(&event.id).copied().unwrap_or_default();
            EventResponse::new(event, event_counts, None)
        })
        .collect();

    Ok(ApiResponse::ok(data).with_pagination(page.paginate(total)))
}

fn parse_optional_date(
    raw: Option<&str>,
    field: &str,
    errors: &mut FieldErrors,
) -> Option<NaiveDateTime> {
    let raw = raw.map(str::trim).filter(|value| !value.is_empty())?;
    let parsed = parse_datetime(raw);
    if parsed.is_none() {
        errors.push(field, format!("{field} must be a date (YYYY-MM-DD or RFC 3339)"));
    }
    parsed
}

pub async fn create_event(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiJson(payload): ApiJson<CreateEventRequest>,
) -> AppResult<ApiResponse<EventResponse>> {
    let can_create = user
        .user_role()
        .map(|role| role.can_create_events())
        .unwrap_or(false);
    if !can_create {
        return Err(AppError::forbidden("insufficient permissions to create events"));
    }

    let mut errors = FieldErrors::new();
    errors.require("name", &payload.name);
    let start = parse_datetime(&payload.start_date);
    if start.is_none() {
        errors.push("start_date", "start_date must be a valid date");
    }
    let end = parse_datetime(&payload.end_date);
    if end.is_none() {
        errors.push("end_date", "end_date must be a valid date");
    }
    if let (Some(start), Some(end)) = (start, end) {
        if end <= start {
            errors.push("end_date", "end date must be after start date");
        }
    }
    let status = match payload.status.as_deref().map(str::trim) {
        None | Some("") => EventStatus::Upcoming,
        Some(raw) => match raw.parse::<EventStatus>() {
            Ok(status) => status,
            Err(message) => {
                errors.push("status", message);
                EventStatus::Upcoming
            }
        },
    };
    errors.into_result()?;
    let (Some(start_date), Some(end_date)) = (start, end) else {
        return Err(AppError::bad_request("invalid date range"));
    };

    let new_event = NewEvent {
        id: Uuid::new_v4(),
        name: payload.name.trim().to_string(),
        description: trimmed_or_none(payload.description),
        event_type: trimmed_or_none(payload.event_type),
        start_date,
        end_date,
        location: trimmed_or_none(payload.location),
        status: status.as_str().to_string(),
        created_by: Some(user.user_id),
    };
    let owner = NewEventPermission {
        id: Uuid::new_v4(),
        event_id: new_event.id,
        user_id: user.user_id,
        role: PermissionRole::Owner.as_str().to_string(),
        scope_type: None,
        scope_ids: Vec::new(),
    };

    let event: Event = state.transaction(|conn| {
        let event = diesel::insert_into(events::table)
            .values(&new_event)
            .get_result::<Event>(conn)?;
        diesel::insert_into(event_permissions::table)
            .values(&owner)
            .execute(conn)?;
        Ok(event)
    })?;

    info!(event_id = %event.id, created_by = %user.user_id, "event created");
    Ok(
        ApiResponse::created(EventResponse::new(
            event,
            EventCounts::default(),
            Some(&EventAccess::owner()),
        ))
        .with_message("Event created successfully"),
    )
}

pub async fn get_event(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(event_id): Path<Uuid>,
) -> AppResult<ApiResponse<EventDetailResponse>> {
    let mut conn = state.db()?;
    let (event, access) = access::load_event(&mut conn, &user, event_id)?;

    let position_rows: Vec<Position> = positions::table
        .filter(positions::event_id.eq(event_id))
        .filter(positions::is_active.eq(true))
        .order((positions::sequence.asc(), positions::position_number.asc()))
        .load(&mut conn)?;
    let position_ids: Vec<Uuid> = position_rows.iter().map(|p| p.id).collect();
    let shift_rows: Vec<Shift> = position_shifts::table
        .filter(position_shifts::position_id.eq_any(&position_ids))
        .order(position_shifts::sequence.asc())
        .load(&mut conn)?;

    let mut shifts_by_position: HashMap<Uuid, Vec<ShiftResponse>> = HashMap::new();
    for shift in shift_rows {
        shifts_by_position
            .entry(shift.position_id)
            .or_default()
            .push(shift.into());
    }

    let counts = event_counts(&mut conn, &[event_id])?
        .remove(&event_id)
        .unwrap_or_default();

    let positions = position_rows
        .into_iter()
        .map(|position| PositionWithShifts {
            shifts: shifts_by_position.remove(&position.id).unwrap_or_default(),
            id: position.id,
            position_number: position.position_number,
            name: position.name,
            area: position.area,
            sequence: position.sequence,
            is_active: position.is_active,
        })
        .collect();

    Ok(ApiResponse::ok(EventDetailResponse {
        event: EventResponse::new(event, counts, Some(&access)),
        positions,
    }))
}

pub async fn update_event(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(event_id): Path<Uuid>,
    ApiJson(body): ApiJson<Value>,
) -> AppResult<ApiResponse<EventResponse>> {
    let mut conn = state.db()?;
    let (existing, access) = access::load_event(&mut conn, &user, event_id)?;
    access.ensure(access.can_manage_event(), "update this event")?;

    let mut errors = FieldErrors::new();
    let mut changes = UpdateEventChangeset::default();

    let name = nullable_field(&body, "name", &mut errors);
    changes.name = required_text_change(&name, "name", &mut errors);

    let description = nullable_field(&body, "description", &mut errors);
    changes.description = optional_text_change(&description);
    let event_type = nullable_field(&body, "event_type", &mut errors);
    changes.event_type = optional_text_change(&event_type);
    let location = nullable_field(&body, "location", &mut errors);
    changes.location = optional_text_change(&location);

    let status = nullable_field(&body, "status", &mut errors);
    match &status {
        NullableValue::Omitted => {}
        NullableValue::Null => errors.push("status", "status cannot be null"),
        NullableValue::String(value) => match value.parse::<EventStatus>() {
            Ok(parsed) => changes.status = Some(parsed.as_str()),
            Err(message) => errors.push("status", message),
        },
    }

    changes.start_date = date_change(&body, "start_date", &mut errors);
    changes.end_date = date_change(&body, "end_date", &mut errors);

    let start = changes.start_date.unwrap_or(existing.start_date);
    let end = changes.end_date.unwrap_or(existing.end_date);
    if (changes.start_date.is_some() || changes.end_date.is_some()) && end <= start {
        errors.push("end_date", "end date must be after start date");
    }
    errors.into_result()?;

    let untouched = changes.name.is_none()
        && changes.description.is_none()
        && changes.event_type.is_none()
        && changes.location.is_none()
        && changes.start_date.is_none()
        && changes.end_date.is_none()
        && changes.status.is_none();

    let event = if untouched {
        existing
    } else {
        diesel::update(events::table.find(event_id))
            .set(&changes)
            .get_result::<Event>(&mut conn)?
    };

    let counts = event_counts(&mut conn, &[event_id])?
        .remove(&event_id)
        .unwrap_or_default();
    info!(event_id = %event_id, user_id = %user.user_id, "event updated");
    Ok(ApiResponse::ok(EventResponse::new(event, counts, Some(&access)))
        .with_message("Event updated successfully"))
}

fn date_change(body: &Value, field: &str, errors: &mut FieldErrors) -> Option<NaiveDateTime> {
    match nullable_field(body, field, errors) {
        NullableValue::Omitted => None,
        NullableValue::Null => {
            errors.push(field, format!("{field} cannot be null"));
            None
        }
        NullableValue::String(raw) => {
            let parsed = parse_datetime(&raw);
            if parsed.is_none() {
                errors.push(field, format!("{field} must be a valid date"));
            }
            parsed
        }
    }
}

pub async fn delete_event(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(event_id): Path<Uuid>,
) -> AppResult<ApiResponse<Value>> {
    let mut conn = state.db()?;
    let (event, access) = access::load_event(&mut conn, &user, event_id)?;
    access.ensure(access.can_delete_event(), "delete this event")?;

    let counts = event_counts(&mut conn, &[event_id])?
        .remove(&event_id)
        .unwrap_or_default();
    let inactive_positions: i64 = positions::table
        .filter(positions::event_id.eq(event_id))
        .filter(positions::is_active.eq(false))
        .select(count_star())
        .first(&mut conn)?;
    let associations: i64 = event_attendants::table
        .filter(event_attendants::event_id.eq(event_id))
        .select(count_star())
        .first(&mut conn)?;

    let positions_total = counts.positions + inactive_positions;
    if positions_total > 0 || associations > 0 || counts.assignments > 0 {
        return Err(AppError::bad_request(format!(
            "cannot delete event with existing data: {positions_total} positions, \
             {associations} attendant associations, {} assignments",
            counts.assignments
        )));
    }

    diesel::delete(events::table.find(event_id)).execute(&mut conn)?;
    info!(event_id = %event_id, name = %event.name, "event deleted");

    Ok(ApiResponse::ok(serde_json::json!({ "id": event_id }))
        .with_message("Event deleted successfully"))
}
