use std::collections::BTreeSet;

use axum::extract::{Path, State};
use chrono::NaiveDateTime;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::access;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{NewPositionOversight, PositionOversight};
use crate::response::{ApiJson, ApiResponse};
use crate::routes::assignments::{attendants_by_id, AttendantSummary};
use crate::routes::positions::find_position;
use crate::schema::{position_assignments, position_oversight};
use crate::state::AppState;
use crate::validation::FieldErrors;

#[derive(Deserialize)]
pub struct SetOversightRequest {
    pub overseer_id: Option<Uuid>,
    pub keyman_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct OversightResponse {
    pub id: Uuid,
    pub position_id: Uuid,
    pub overseer: Option<AttendantSummary>,
    pub keyman: Option<AttendantSummary>,
    pub assigned_by: Option<Uuid>,
    pub updated_at: NaiveDateTime,
}

pub(crate) fn oversight_view(
    conn: &mut PgConnection,
    row: PositionOversight,
) -> QueryResult<OversightResponse> {
    let ids: BTreeSet<Uuid> = row.overseer_id.into_iter().chain(row.keyman_id).collect();
    let people = attendants_by_id(conn, &ids)?;
    let summary = |id: Option<Uuid>| id.and_then(|id| people.get(&id)).map(AttendantSummary::from);
    Ok(OversightResponse {
        id: row.id,
        position_id: row.position_id,
        overseer: summary(row.overseer_id),
        keyman: summary(row.keyman_id),
        assigned_by: row.assigned_by,
        updated_at: row.updated_at,
    })
}

/// Rewrites the overseer and keyman back-references on every assignment of
/// the position.
fn propagate_oversight(
    conn: &mut PgConnection,
    position_id: Uuid,
    overseer_id: Option<Uuid>,
    keyman_id: Option<Uuid>,
) -> QueryResult<usize> {
    diesel::update(
        position_assignments::table.filter(position_assignments::position_id.eq(position_id)),
    )
    .set((
        position_assignments::overseer_id.eq(overseer_id),
        position_assignments::keyman_id.eq(keyman_id),
    ))
    .execute(conn)
}

pub async fn get_oversight(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((event_id, position_id)): Path<(Uuid, Uuid)>,
) -> AppResult<ApiResponse<Option<OversightResponse>>> {
    let mut conn = state.db()?;
    access::load_event(&mut conn, &user, event_id)?;
    find_position(&mut conn, event_id, position_id)?;

    let row: Option<PositionOversight> = position_oversight::table
        .filter(position_oversight::position_id.eq(position_id))
        .first(&mut conn)
        .optional()?;
    let view = row.map(|row| oversight_view(&mut conn, row)).transpose()?;
    Ok(ApiResponse::ok(view))
}

pub async fn set_oversight(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((event_id, position_id)): Path<(Uuid, Uuid)>,
    ApiJson(payload): ApiJson<SetOversightRequest>,
) -> AppResult<ApiResponse<OversightResponse>> {
    let mut conn = state.db()?;
    let (_, access) = access::load_event(&mut conn, &user, event_id)?;
    let position = find_position(&mut conn, event_id, position_id)?;
    access.ensure(access.can_manage_position(&position), "set oversight for this position")?;

    let mut errors = FieldErrors::new();
    if payload.overseer_id.is_none() && payload.keyman_id.is_none() {
        errors.push("overseer_id", "an overseer or a keyman is required");
    }
    let requested: BTreeSet<Uuid> = payload
        .overseer_id
        .into_iter()
        .chain(payload.keyman_id)
        .collect();
    let found = attendants_by_id(&mut conn, &requested)?;
    for (field, id) in [("overseer_id", payload.overseer_id), ("keyman_id", payload.keyman_id)] {
        if let Some(id) = id {
            if !found.contains_key(&id) {
                errors.push(field, format!("attendant {id} does not exist"));
            }
        }
    }
    errors.into_result()?;
    drop(conn);

    let overseer_id = payload.overseer_id;
    let keyman_id = payload.keyman_id;
    let assigned_by = user.user_id;
    let (row, updated) = state.transaction(|conn| {
        let row: PositionOversight = diesel::insert_into(position_oversight::table)
            .values(&NewPositionOversight {
                id: Uuid::new_v4(),
                event_id,
                position_id,
                overseer_id,
                keyman_id,
                assigned_by: Some(assigned_by),
            })
            .on_conflict(position_oversight::position_id)
            .do_update()
            .set((
                position_oversight::overseer_id.eq(overseer_id),
                position_oversight::keyman_id.eq(keyman_id),
                position_oversight::assigned_by.eq(Some(assigned_by)),
            ))
            .get_result(conn)?;
        let updated = propagate_oversight(conn, position_id, overseer_id, keyman_id)?;
        Ok((row, updated))
    })?;

    info!(
        event_id = %event_id,
        position_id = %position_id,
        assignments_updated = updated,
        "position oversight set"
    );
    let mut conn = state.db()?;
    Ok(ApiResponse::ok(oversight_view(&mut conn, row)?).with_message("Oversight updated"))
}

pub async fn clear_oversight(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((event_id, position_id)): Path<(Uuid, Uuid)>,
) -> AppResult<ApiResponse<serde_json::Value>> {
    {
        let mut conn = state.db()?;
        let (_, access) = access::load_event(&mut conn, &user, event_id)?;
        let position = find_position(&mut conn, event_id, position_id)?;
        access.ensure(access.can_manage_position(&position), "clear oversight for this position")?;
    }

    let updated = state.transaction(|conn| {
        let removed = diesel::delete(
            position_oversight::table.filter(position_oversight::position_id.eq(position_id)),
        )
        .execute(conn)?;
        if removed == 0 {
            return Err(AppError::not_found_entity("oversight"));
        }
        Ok(propagate_oversight(conn, position_id, None, None)?)
    })?;

    info!(
        event_id = %event_id,
        position_id = %position_id,
        assignments_updated = updated,
        "position oversight cleared"
    );
    Ok(ApiResponse::ok(serde_json::json!({ "position_id": position_id }))
        .with_message("Oversight removed"))
}
