use std::collections::BTreeSet;

use axum::extract::State;
use chrono::NaiveDateTime;
use diesel::dsl::count_star;
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::auth::password::verify_password;
use crate::auth::AttendantSession;
use crate::domain::EventStatus;
use crate::error::{AppError, AppResult};
use crate::models::{Assignment, Attendant, Event};
use crate::response::{ApiJson, ApiQuery, ApiResponse};
use crate::routes::assignments::{assignment_views, AssignmentResponse, AttendantSummary};
use crate::routes::documents::{active_documents, DocumentResponse};
use crate::schema::{attendants, event_attendants, events, position_assignments, positions};
use crate::state::AppState;
use crate::validation::{is_valid_pin, FieldErrors};

const ACTIVE_EVENT_STATUSES: [EventStatus; 2] = [EventStatus::Upcoming, EventStatus::Current];

#[derive(Deserialize)]
pub struct AttendantLoginRequest {
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    #[serde(default)]
    pub congregation: String,
    #[serde(default)]
    pub pin: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct DashboardQuery {
    pub event_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PortalEvent {
    pub id: Uuid,
    pub name: String,
    pub event_type: Option<String>,
    pub location: Option<String>,
    pub start_date: NaiveDateTime,
    pub end_date: NaiveDateTime,
    pub status: String,
}

impl From<Event> for PortalEvent {
    fn from(event: Event) -> Self {
        Self {
            id: event.id,
            name: event.name,
            event_type: event.event_type,
            location: event.location,
            start_date: event.start_date,
            end_date: event.end_date,
            status: event.status,
        }
    }
}

#[derive(Serialize)]
pub struct AttendantLoginResponse {
    pub token: String,
    pub token_type: &'static str,
    pub expires_in: i64,
    pub attendant: AttendantSummary,
    pub events: Vec<PortalEvent>,
    pub needs_event_selection: bool,
    pub default_event: Option<PortalEvent>,
}

#[derive(Serialize)]
pub struct OversightContact {
    pub position_id: Uuid,
    pub position_name: Option<String>,
    pub role: &'static str,
    pub contact: AttendantSummary,
}

#[derive(Serialize)]
pub struct DashboardResponse {
    pub attendant: AttendantSummary,
    pub event: PortalEvent,
    pub assignments: Vec<AssignmentResponse>,
    pub oversight_contacts: Vec<OversightContact>,
    pub documents: Vec<DocumentResponse>,
}

/// Escapes LIKE wildcards so `ilike` acts as a case-insensitive equality.
fn exact_ilike(value: &str) -> String {
    value
        .trim()
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

fn active_events_for(conn: &mut PgConnection, attendant_id: Uuid) -> QueryResult<Vec<Event>> {
    let statuses: Vec<&str> = ACTIVE_EVENT_STATUSES.iter().map(|s| s.as_str()).collect();
    event_attendants::table
        .inner_join(events::table)
        .filter(event_attendants::attendant_id.eq(attendant_id))
        .filter(event_attendants::is_active.eq(true))
        .filter(events::status.eq_any(statuses))
        .order(events::start_date.asc())
        .select(events::all_columns)
        .load(conn)
}

pub async fn attendant_login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<AttendantLoginRequest>,
) -> AppResult<ApiResponse<AttendantLoginResponse>> {
    let mut errors = FieldErrors::new();
    errors.require("first_name", &payload.first_name);
    errors.require("last_name", &payload.last_name);
    errors.require("congregation", &payload.congregation);
    if !is_valid_pin(payload.pin.trim()) {
        errors.push("pin", "PIN must be exactly 4 digits");
    }
    errors.into_result()?;

    let mut conn = state.db()?;
    let candidates: Vec<Attendant> = attendants::table
        .filter(attendants::first_name.ilike(exact_ilike(&payload.first_name)))
        .filter(attendants::last_name.ilike(exact_ilike(&payload.last_name)))
        .filter(attendants::congregation.ilike(exact_ilike(&payload.congregation)))
        .filter(attendants::is_active.eq(true))
        .load(&mut conn)?;

    let pin = payload.pin.trim();
    let mut matched = None;
    for candidate in candidates {
        let Some(hash) = candidate.pin_hash.as_deref() else {
            continue;
        };
        if verify_password(pin, hash)? {
            matched = Some(candidate);
            break;
        }
    }
    let Some(attendant) = matched else {
        warn!(
            first_name = %payload.first_name.trim(),
            last_name = %payload.last_name.trim(),
            "attendant login failed"
        );
        return Err(AppError::unauthorized());
    };

    let events: Vec<PortalEvent> = active_events_for(&mut conn, attendant.id)?
        .into_iter()
        .map(PortalEvent::from)
        .collect();
    if events.is_empty() {
        return Err(AppError::not_found_entity("active event for this attendant"));
    }

    let token = state
        .jwt
        .generate_attendant_token(attendant.id, &attendant.full_name())?;
    info!(attendant_id = %attendant.id, events = events.len(), "attendant signed in");

    let default_event = (events.len() == 1).then(|| events[0].clone());
    Ok(ApiResponse::ok(AttendantLoginResponse {
        token,
        token_type: "Bearer",
        expires_in: state.jwt.attendant_expiry_seconds(),
        attendant: AttendantSummary::from(&attendant),
        needs_event_selection: events.len() > 1,
        default_event,
        events,
    })
    .with_message(format!("Welcome, {}!", attendant.first_name)))
}

pub async fn attendant_dashboard(
    State(state): State<AppState>,
    session: AttendantSession,
    ApiQuery(params): ApiQuery<DashboardQuery>,
) -> AppResult<ApiResponse<DashboardResponse>> {
    let mut conn = state.db()?;
    let attendant: Attendant = attendants::table
        .find(session.attendant_id)
        .first(&mut conn)
        .optional()?
        .filter(|a: &Attendant| a.is_active)
        .ok_or_else(AppError::unauthorized)?;

    let event: Event = match params.event_id {
        Some(event_id) => {
            let on_roster: i64 = event_attendants::table
                .filter(event_attendants::event_id.eq(event_id))
                .filter(event_attendants::attendant_id.eq(attendant.id))
                .filter(event_attendants::is_active.eq(true))
                .select(count_star())
                .first(&mut conn)?;
            if on_roster == 0 {
                return Err(AppError::forbidden("not registered for this event"));
            }
            events::table
                .find(event_id)
                .first(&mut conn)
                .optional()?
                .ok_or_else(|| AppError::not_found_entity("event"))?
        }
        None => {
            let mut active = active_events_for(&mut conn, attendant.id)?;
            if active.len() != 1 {
                return Err(AppError::invalid_field(
                    "event_id",
                    "event_id is required when more than one event is active",
                ));
            }
            active.remove(0)
        }
    };

    let rows: Vec<Assignment> = position_assignments::table
        .inner_join(positions::table)
        .filter(positions::event_id.eq(event.id))
        .filter(position_assignments::attendant_id.eq(attendant.id))
        .select(position_assignments::all_columns)
        .order((positions::position_number.asc(), position_assignments::assigned_at.asc()))
        .load(&mut conn)?;
    let assignments = assignment_views(&mut conn, rows)?;

    let mut seen = BTreeSet::new();
    let mut oversight_contacts = Vec::new();
    for assignment in &assignments {
        for (role, person) in [
            ("Position Overseer", assignment.overseer.as_ref()),
            ("Position Keyman", assignment.keyman.as_ref()),
        ] {
            if let Some(person) = person {
                if seen.insert((assignment.position_id, person.id, role)) {
                    oversight_contacts.push(OversightContact {
                        position_id: assignment.position_id,
                        position_name: assignment.position_name.clone(),
                        role,
                        contact: person.clone(),
                    });
                }
            }
        }
    }

    let documents = active_documents(&mut conn, event.id)?
        .into_iter()
        .map(DocumentResponse::from)
        .collect();

    Ok(ApiResponse::ok(DashboardResponse {
        attendant: AttendantSummary::from(&attendant),
        event: PortalEvent::from(event),
        assignments,
        oversight_contacts,
        documents,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ilike_patterns_escape_wildcards() {
        assert_eq!(exact_ilike(" Mary "), "Mary");
        assert_eq!(exact_ilike("50%_off"), "50\\%\\_off");
        assert_eq!(exact_ilike("a\\b"), "a\\\\b");
    }
}
