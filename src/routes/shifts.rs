use axum::extract::{Path, State};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::access;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::Shift;
use crate::response::{ApiJson, ApiResponse};
use crate::routes::events::ShiftResponse;
use crate::routes::positions::find_position;
use crate::scheduling::shifts::{append_shifts, lock_position, shifts_for_position};
use crate::scheduling::templates::{mixing_violation, shift_spec_from_input};
use crate::schema::{position_assignments, position_shifts};
use crate::state::AppState;
use crate::validation::FieldErrors;

#[derive(Deserialize)]
pub struct CreateShiftRequest {
    #[serde(default)]
    pub is_all_day: bool,
    pub start_time: Option<String>,
    pub end_time: Option<String>,
    pub name: Option<String>,
}

#[derive(Serialize)]
pub struct DeletedShiftResponse {
    pub shift_id: Uuid,
    pub assignments_removed: usize,
}

pub async fn create_shift(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((event_id, position_id)): Path<(Uuid, Uuid)>,
    ApiJson(payload): ApiJson<CreateShiftRequest>,
) -> AppResult<ApiResponse<ShiftResponse>> {
    let mut errors = FieldErrors::new();
    let spec = shift_spec_from_input(
        "start_time",
        payload.name.as_deref(),
        payload.is_all_day,
        payload.start_time.as_deref(),
        payload.end_time.as_deref(),
        &mut errors,
    );
    errors.into_result()?;
    let spec = spec.ok_or_else(|| AppError::bad_request("invalid shift"))?;

    {
        let mut conn = state.db()?;
        let (_, access) = access::load_event(&mut conn, &user, event_id)?;
        let position = find_position(&mut conn, event_id, position_id)?;
        access.ensure(access.can_manage_position(&position), "manage shifts of this position")?;
    }

    let shift = state.transaction(|conn| {
        lock_position(conn, position_id)?;
        let existing = shifts_for_position(conn, position_id)?;
        if let Some(reason) = mixing_violation(&existing, spec.is_all_day) {
            return Err(AppError::bad_request(reason));
        }
        let mut created = append_shifts(conn, position_id, existing.len(), vec![spec])?;
        created
            .pop()
            .ok_or_else(|| AppError::internal(anyhow::anyhow!("shift insert returned no row")))
    })?;

    info!(
        event_id = %event_id,
        position_id = %position_id,
        shift_id = %shift.id,
        all_day = shift.is_all_day,
        "shift created"
    );
    Ok(ApiResponse::created(ShiftResponse::from(shift)).with_message("Shift created successfully"))
}

pub async fn delete_shift(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((event_id, position_id, shift_id)): Path<(Uuid, Uuid, Uuid)>,
) -> AppResult<ApiResponse<DeletedShiftResponse>> {
    {
        let mut conn = state.db()?;
        let (_, access) = access::load_event(&mut conn, &user, event_id)?;
        let position = find_position(&mut conn, event_id, position_id)?;
        access.ensure(access.can_manage_position(&position), "manage shifts of this position")?;
    }

    let assignments_removed = state.transaction(|conn| {
        let shift: Shift = position_shifts::table
            .filter(position_shifts::id.eq(shift_id))
            .filter(position_shifts::position_id.eq(position_id))
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found_entity("shift"))?;

        let removed = diesel::delete(
            position_assignments::table.filter(position_assignments::shift_id.eq(shift.id)),
        )
        .execute(conn)?;
        diesel::delete(position_shifts::table.find(shift.id)).execute(conn)?;
        Ok(removed)
    })?;

    info!(
        event_id = %event_id,
        position_id = %position_id,
        shift_id = %shift_id,
        assignments_removed,
        "shift deleted"
    );
    Ok(ApiResponse::ok(DeletedShiftResponse {
        shift_id,
        assignments_removed,
    })
    .with_message(format!(
        "Shift deleted along with {assignments_removed} assignments"
    )))
}
