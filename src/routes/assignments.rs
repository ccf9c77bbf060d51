use std::collections::{BTreeSet, HashMap};

use axum::extract::{Path, State};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::access;
use crate::auth::AuthenticatedUser;
use crate::domain::AssignmentRole;
use crate::error::{AppError, AppResult};
use crate::models::{
    Assignment, Attendant, NewAssignment, NewEventAttendant, Position, PositionOversight, Shift,
};
use crate::response::{ApiJson, ApiQuery, ApiResponse};
use crate::routes::events::ShiftResponse;
use crate::routes::positions::find_position;
use crate::scheduling::conflicts::{detect_conflict, AssignmentConflict, HeldShift};
use crate::scheduling::shifts::ensure_default_shift;
use crate::schema::{
    attendants, event_attendants, position_assignments, position_oversight, position_shifts,
    positions,
};
use crate::state::AppState;
use crate::utils::json::{nullable_field, optional_text_change};
use crate::validation::{trimmed_or_none, FieldErrors};

const SHIFT_ROLE_CONSTRAINT: &str = "position_assignments_shift_role_key";

#[derive(Debug, Default, Deserialize)]
pub struct ListAssignmentsQuery {
    pub position_id: Option<Uuid>,
    pub shift_id: Option<Uuid>,
    pub attendant_id: Option<Uuid>,
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct CreateAssignmentRequest {
    pub attendant_id: Uuid,
    pub position_id: Uuid,
    pub shift_id: Option<Uuid>,
    pub role: Option<String>,
    pub notes: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct AttendantSummary {
    pub id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub phone: Option<String>,
    pub congregation: String,
}

impl From<&Attendant> for AttendantSummary {
    fn from(attendant: &Attendant) -> Self {
        Self {
            id: attendant.id,
            first_name: attendant.first_name.clone(),
            last_name: attendant.last_name.clone(),
            email: attendant.email.clone(),
            phone: attendant.phone.clone(),
            congregation: attendant.congregation.clone(),
        }
    }
}

#[derive(Serialize)]
pub struct AssignmentResponse {
    pub id: Uuid,
    pub position_id: Uuid,
    pub position_number: Option<i32>,
    pub position_name: Option<String>,
    pub shift_id: Uuid,
    pub shift: Option<ShiftResponse>,
    pub attendant_id: Uuid,
    pub attendant: Option<AttendantSummary>,
    pub role: String,
    pub notes: Option<String>,
    pub overseer: Option<AttendantSummary>,
    pub keyman: Option<AttendantSummary>,
    pub assigned_by: Option<Uuid>,
    pub assigned_at: NaiveDateTime,
}

#[derive(Serialize)]
pub struct ClearedAssignments {
    pub removed: usize,
}

/// Loads attendants by id, keyed for lookups.
pub(crate) fn attendants_by_id(
    conn: &mut PgConnection,
    ids: &BTreeSet<Uuid>,
) -> QueryResult<HashMap<Uuid, Attendant>> {
    if ids.is_empty() {
        return Ok(HashMap::new());
    }
    let ids: Vec<Uuid> = ids.iter().copied().collect();
    let rows: Vec<Attendant> = attendants::table
        .filter(attendants::id.eq_any(&ids))
        .load(conn)?;
    Ok(rows.into_iter().map(|a| (a.id, a)).collect())
}

/// Expands assignment rows with their position, shift and people.
pub(crate) fn assignment_views(
    conn: &mut PgConnection,
    rows: Vec<Assignment>,
) -> QueryResult<Vec<AssignmentResponse>> {
    if rows.is_empty() {
        return Ok(Vec::new());
    }

    let mut people = BTreeSet::new();
    for row in &rows {
        people.insert(row.attendant_id);
        people.extend(row.overseer_id);
        people.extend(row.keyman_id);
    }
    let people = attendants_by_id(conn, &people)?;

    let shift_ids: Vec<Uuid> = rows.iter().map(|r| r.shift_id).collect();
    let shifts: HashMap<Uuid, Shift> = position_shifts::table
        .filter(position_shifts::id.eq_any(&shift_ids))
        .load::<Shift>(conn)?
        .into_iter()
        .map(|s| (s.id, s))
        .collect();

    let position_ids: Vec<Uuid> = rows.iter().map(|r| r.position_id).collect();
    let positions: HashMap<Uuid, Position> = positions::table
        .filter(positions::id.eq_any(&position_ids))
        .load::<Position>(conn)?
        .into_iter()
        .map(|p| (p.id, p))
        .collect();

    let summary = |id: Option<Uuid>| id.and_then(|id| people.get(&id)).map(AttendantSummary::from);

    Ok(rows
        .into_iter()
        .map(|row| {
            let position = positions.get(&row.position_id);
            AssignmentResponse {
                id: row.id,
                position_id: row.position_id,
                position_number: position.map(|p| p.position_number),
                position_name: position.map(|p| p.name.clone()),
                shift_id: row.shift_id,
                shift: shifts.get(&row.shift_id).cloned().map(ShiftResponse::from),
                attendant_id: row.attendant_id,
                attendant: summary(Some(row.attendant_id)),
                role: row.role,
                notes: row.notes,
                overseer: summary(row.overseer_id),
                keyman: summary(row.keyman_id),
                assigned_by: row.assigned_by,
                assigned_at: row.assigned_at,
            }
        })
        .collect())
}

fn find_assignment(
    conn: &mut PgConnection,
    event_id: Uuid,
    assignment_id: Uuid,
) -> AppResult<(Assignment, Position)> {
    position_assignments::table
        .inner_join(positions::table)
        .filter(position_assignments::id.eq(assignment_id))
        .filter(positions::event_id.eq(event_id))
        .select((position_assignments::all_columns, positions::all_columns))
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_entity("assignment"))
}

/// Maps a unique violation raced past the conflict checks to its 409.
fn insert_conflict(error: DieselError, role: AssignmentRole) -> AppError {
    match error {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, info) => {
            if info.constraint_name() == Some(SHIFT_ROLE_CONSTRAINT) {
                AssignmentConflict::RoleOccupied { role }.into()
            } else {
                AssignmentConflict::DuplicateShift.into()
            }
        }
        other => other.into(),
    }
}

pub async fn list_assignments(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(event_id): Path<Uuid>,
    ApiQuery(params): ApiQuery<ListAssignmentsQuery>,
) -> AppResult<ApiResponse<Vec<AssignmentResponse>>> {
    let role = match trimmed_or_none(params.role) {
        None => None,
        Some(raw) => Some(
            raw.parse::<AssignmentRole>()
                .map_err(|message| AppError::invalid_field("role", message))?,
        ),
    };

    let mut conn = state.db()?;
    access::load_event(&mut conn, &user, event_id)?;

    let mut query = position_assignments::table
        .inner_join(positions::table)
        .filter(positions::event_id.eq(event_id))
        .select(position_assignments::all_columns)
        .into_boxed();
    if let Some(position_id) = params.position_id {
        query = query.filter(position_assignments::position_id.eq(position_id));
    }
    if let Some(shift_id) = params.shift_id {
        query = query.filter(position_assignments::shift_id.eq(shift_id));
    }
    if let Some(attendant_id) = params.attendant_id {
        query = query.filter(position_assignments::attendant_id.eq(attendant_id));
    }
    if let Some(role) = role {
        query = query.filter(position_assignments::role.eq(role.as_str()));
    }

    let rows: Vec<Assignment> = query
        .order((
            positions::sequence.asc(),
            positions::position_number.asc(),
            position_assignments::assigned_at.asc(),
        ))
        .load(&mut conn)?;

    Ok(ApiResponse::ok(assignment_views(&mut conn, rows)?))
}

pub async fn create_assignment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(event_id): Path<Uuid>,
    ApiJson(payload): ApiJson<CreateAssignmentRequest>,
) -> AppResult<ApiResponse<AssignmentResponse>> {
    let role = match payload.role.as_deref().map(str::trim) {
        None | Some("") => AssignmentRole::Attendant,
        Some(raw) => raw
            .parse::<AssignmentRole>()
            .map_err(|message| AppError::invalid_field("role", message))?,
    };

    {
        let mut conn = state.db()?;
        let (_, access) = access::load_event(&mut conn, &user, event_id)?;
        let position = find_position(&mut conn, event_id, payload.position_id)?;
        access.ensure(access.can_manage_position(&position), "assign attendants to this position")?;
        if !position.is_active {
            return Err(AppError::bad_request("position is inactive"));
        }

        let attendant: Attendant = attendants::table
            .find(payload.attendant_id)
            .first(&mut conn)
            .optional()?
            .ok_or_else(|| AppError::not_found_entity("attendant"))?;
        if !attendant.is_active {
            return Err(AppError::bad_request("attendant is inactive"));
        }
    }

    let position_id = payload.position_id;
    let attendant_id = payload.attendant_id;
    let notes = trimmed_or_none(payload.notes);
    let assigned_by = user.user_id;

    let assignment = state.transaction(|conn| {
        let shift: Shift = match payload.shift_id {
            Some(shift_id) => position_shifts::table
                .filter(position_shifts::id.eq(shift_id))
                .filter(position_shifts::position_id.eq(position_id))
                .first(conn)
                .optional()?
                .ok_or_else(|| AppError::not_found_entity("shift"))?,
            None => ensure_default_shift(conn, position_id)?.ok_or_else(|| {
                AppError::bad_request("shift_id is required for positions with timed shifts")
            })?,
        };

        let held_rows: Vec<(Shift, String)> = position_assignments::table
            .inner_join(position_shifts::table)
            .inner_join(positions::table)
            .filter(position_assignments::attendant_id.eq(attendant_id))
            .filter(positions::event_id.eq(event_id))
            .select((position_shifts::all_columns, positions::name))
            .load(conn)?;
        let held: Vec<HeldShift<'_>> = held_rows
            .iter()
            .map(|(shift, position_name)| HeldShift {
                shift,
                position_name,
            })
            .collect();

        let filled_roles: Vec<AssignmentRole> = position_assignments::table
            .filter(position_assignments::shift_id.eq(shift.id))
            .select(position_assignments::role)
            .load::<String>(conn)?
            .iter()
            .filter_map(|role| role.parse().ok())
            .collect();

        detect_conflict(&shift, role, &held, &filled_roles)?;

        let oversight: Option<PositionOversight> = position_oversight::table
            .filter(position_oversight::position_id.eq(position_id))
            .first(conn)
            .optional()?;

        let new_assignment = NewAssignment {
            id: Uuid::new_v4(),
            position_id,
            shift_id: shift.id,
            attendant_id,
            role: role.as_str().to_string(),
            notes: notes.clone(),
            overseer_id: oversight.as_ref().and_then(|o| o.overseer_id),
            keyman_id: oversight.as_ref().and_then(|o| o.keyman_id),
            assigned_by: Some(assigned_by),
        };
        let assignment: Assignment = diesel::insert_into(position_assignments::table)
            .values(&new_assignment)
            .get_result(conn)
            .map_err(|err| insert_conflict(err, role))?;

        diesel::insert_into(event_attendants::table)
            .values(&NewEventAttendant {
                id: Uuid::new_v4(),
                event_id,
                attendant_id,
                is_active: true,
            })
            .on_conflict((event_attendants::event_id, event_attendants::attendant_id))
            .do_nothing()
            .execute(conn)?;

        Ok(assignment)
    })?;

    info!(
        event_id = %event_id,
        position_id = %position_id,
        shift_id = %assignment.shift_id,
        attendant_id = %attendant_id,
        role = %role,
        "assignment created"
    );

    let mut conn = state.db()?;
    let view = assignment_views(&mut conn, vec![assignment])?
        .pop()
        .ok_or_else(|| AppError::internal(anyhow::anyhow!("assignment view missing")))?;
    Ok(ApiResponse::created(view).with_message("Assignment created successfully"))
}

pub async fn update_assignment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((event_id, assignment_id)): Path<(Uuid, Uuid)>,
    ApiJson(body): ApiJson<Value>,
) -> AppResult<ApiResponse<AssignmentResponse>> {
    let mut conn = state.db()?;
    let (_, access) = access::load_event(&mut conn, &user, event_id)?;
    let (assignment, position) = find_assignment(&mut conn, event_id, assignment_id)?;

    let attendant_user_id: Option<Uuid> = attendants::table
        .find(assignment.attendant_id)
        .select(attendants::user_id)
        .first(&mut conn)
        .optional()?
        .flatten();
    access.ensure(
        access.can_edit_assignment(&position, attendant_user_id, user.user_id),
        "edit this assignment",
    )?;

    let mut errors = FieldErrors::new();
    let notes = nullable_field(&body, "notes", &mut errors);
    errors.into_result()?;

    let assignment = match optional_text_change(&notes) {
        None => assignment,
        Some(notes) => diesel::update(position_assignments::table.find(assignment_id))
            .set(position_assignments::notes.eq(notes))
            .get_result::<Assignment>(&mut conn)?,
    };

    info!(event_id = %event_id, assignment_id = %assignment_id, "assignment updated");
    let view = assignment_views(&mut conn, vec![assignment])?
        .pop()
        .ok_or_else(|| AppError::internal(anyhow::anyhow!("assignment view missing")))?;
    Ok(ApiResponse::ok(view).with_message("Assignment updated successfully"))
}

pub async fn delete_assignment(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((event_id, assignment_id)): Path<(Uuid, Uuid)>,
) -> AppResult<ApiResponse<Value>> {
    let mut conn = state.db()?;
    let (_, access) = access::load_event(&mut conn, &user, event_id)?;
    let (assignment, position) = find_assignment(&mut conn, event_id, assignment_id)?;
    access.ensure(access.can_manage_position(&position), "remove this assignment")?;

    diesel::delete(position_assignments::table.find(assignment.id)).execute(&mut conn)?;

    info!(
        event_id = %event_id,
        assignment_id = %assignment_id,
        attendant_id = %assignment.attendant_id,
        "assignment deleted"
    );
    Ok(ApiResponse::ok(serde_json::json!({ "id": assignment_id }))
        .with_message("Assignment removed"))
}

pub async fn clear_assignments(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(event_id): Path<Uuid>,
) -> AppResult<ApiResponse<ClearedAssignments>> {
    {
        let mut conn = state.db()?;
        let (_, access) = access::load_event(&mut conn, &user, event_id)?;
        access.ensure(access.can_manage_event(), "clear assignments")?;
    }

    let removed = state.transaction(|conn| {
        let event_positions = positions::table
            .filter(positions::event_id.eq(event_id))
            .select(positions::id);
        let removed = diesel::delete(
            position_assignments::table
                .filter(position_assignments::position_id.eq_any(event_positions)),
        )
        .execute(conn)?;
        Ok(removed)
    })?;

    info!(event_id = %event_id, removed, "assignments cleared");
    Ok(ApiResponse::ok(ClearedAssignments { removed })
        .with_message(format!("Removed {removed} assignments")))
}
