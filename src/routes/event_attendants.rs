use std::collections::HashMap;

use axum::extract::{Path, State};
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::access;
use crate::auth::AuthenticatedUser;
use crate::error::{AppError, AppResult};
use crate::models::{Attendant, EventAttendant, NewEventAttendant};
use crate::response::{ApiJson, ApiQuery, ApiResponse, PageRequest};
use crate::routes::attendants::AttendantResponse;
use crate::schema::{attendants, event_attendants, position_assignments, positions};
use crate::state::AppState;
use crate::validation::FieldErrors;

#[derive(Debug, Default, Deserialize)]
pub struct RosterQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    #[serde(default)]
    pub include_inactive: bool,
}

#[derive(Deserialize)]
pub struct AddToRosterRequest {
    #[serde(default)]
    pub attendant_ids: Vec<Uuid>,
    pub attendant_id: Option<Uuid>,
}

#[derive(Serialize)]
pub struct RosterEntry {
    pub association_id: Uuid,
    pub is_active: bool,
    pub assignment_count: i64,
    pub attendant: AttendantResponse,
}

#[derive(Serialize)]
pub struct RosterChange {
    pub added: usize,
    pub attendant_ids: Vec<Uuid>,
}

pub async fn list_roster(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(event_id): Path<Uuid>,
    ApiQuery(params): ApiQuery<RosterQuery>,
) -> AppResult<ApiResponse<Vec<RosterEntry>>> {
    let mut conn = state.db()?;
    access::load_event(&mut conn, &user, event_id)?;

    let page = PageRequest::new(params.page, params.limit, 50);
    let base = || {
        let mut query = event_attendants::table
            .inner_join(attendants::table)
            .filter(event_attendants::event_id.eq(event_id))
            .into_boxed();
        if !params.include_inactive {
            query = query.filter(event_attendants::is_active.eq(true));
        }
        query
    };

    let total: i64 = base().count().get_result(&mut conn)?;
    let rows: Vec<(EventAttendant, Attendant)> = base()
        .order((attendants::last_name.asc(), attendants::first_name.asc()))
        .limit(page.limit)
        .offset(page.offset())
        .load(&mut conn)?;

    let ids: Vec<Uuid> = rows.iter().map(|(_, a)| a.id).collect();
    let counts: HashMap<Uuid, i64> = position_assignments::table
        .inner_join(positions::table)
        .filter(positions::event_id.eq(event_id))
        .filter(position_assignments::attendant_id.eq_any(&ids))
        .group_by(position_assignments::attendant_id)
        .select((position_assignments::attendant_id, count_star()))
        .load::<(Uuid, i64)>(&mut conn)?
        .into_iter()
        .collect();

    let entries = rows
        .into_iter()
        .map(|(association, attendant)| RosterEntry {
            association_id: association.id,
            is_active: association.is_active,
            assignment_count: counts.get(&attendant.id).copied().unwrap_or(0),
            attendant: AttendantResponse::new(attendant, None),
        })
        .collect();
    Ok(ApiResponse::ok(entries).with_pagination(page.paginate(total)))
}

pub async fn add_to_roster(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(event_id): Path<Uuid>,
    ApiJson(payload): ApiJson<AddToRosterRequest>,
) -> AppResult<ApiResponse<RosterChange>> {
    let mut requested = payload.attendant_ids;
    requested.extend(payload.attendant_id);
    requested.sort();
    requested.dedup();
    if requested.is_empty() {
        let mut errors = FieldErrors::new();
        errors.push("attendant_ids", "at least one attendant is required");
        errors.into_result()?;
    }

    {
        let mut conn = state.db()?;
        let (_, access) = access::load_event(&mut conn, &user, event_id)?;
        access.ensure(access.can_manage_attendants(), "manage the event roster")?;
    }

    let attendant_ids = state.transaction(|conn| {
        let found: Vec<Uuid> = attendants::table
            .filter(attendants::id.eq_any(&requested))
            .select(attendants::id)
            .load(conn)?;
        if found.len() != requested.len() {
            return Err(AppError::not_found_entity("one or more attendants"));
        }

        let rows: Vec<NewEventAttendant> = requested
            .iter()
            .map(|attendant_id| NewEventAttendant {
                id: Uuid::new_v4(),
                event_id,
                attendant_id: *attendant_id,
                is_active: true,
            })
            .collect();
        diesel::insert_into(event_attendants::table)
            .values(&rows)
            .on_conflict((event_attendants::event_id, event_attendants::attendant_id))
            .do_update()
            .set(event_attendants::is_active.eq(true))
            .execute(conn)?;
        Ok(requested)
    })?;

    info!(event_id = %event_id, added = attendant_ids.len(), "attendants added to roster");
    Ok(ApiResponse::created(RosterChange {
        added: attendant_ids.len(),
        attendant_ids,
    })
    .with_message("Attendants added to event"))
}

pub async fn remove_from_roster(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((event_id, attendant_id)): Path<(Uuid, Uuid)>,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let mut conn = state.db()?;
    let (_, access) = access::load_event(&mut conn, &user, event_id)?;
    access.ensure(access.can_manage_attendants(), "manage the event roster")?;

    let updated = diesel::update(
        event_attendants::table
            .filter(event_attendants::event_id.eq(event_id))
            .filter(event_attendants::attendant_id.eq(attendant_id)),
    )
    .set(event_attendants::is_active.eq(false))
    .execute(&mut conn)?;
    if updated == 0 {
        return Err(AppError::not_found_entity("event attendant"));
    }

    info!(event_id = %event_id, attendant_id = %attendant_id, "attendant removed from roster");
    Ok(ApiResponse::ok(serde_json::json!({ "attendant_id": attendant_id }))
        .with_message("Attendant removed from event"))
}
