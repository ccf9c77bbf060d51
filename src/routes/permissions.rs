use axum::extract::{Path, State};
use chrono::NaiveDateTime;
use diesel::dsl::count_star;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use tracing::info;
use uuid::Uuid;

use crate::access;
use crate::auth::AuthenticatedUser;
use crate::domain::{PermissionRole, ScopeType};
use crate::error::{AppError, AppResult};
use crate::models::{EventPermission, NewEventPermission, User};
use crate::response::{ApiJson, ApiResponse};
use crate::schema::{event_permissions, users};
use crate::state::AppState;
use crate::validation::FieldErrors;

const DUPLICATE_PERMISSION: &str = "user already has a permission on this event";

#[derive(Deserialize)]
pub struct GrantPermissionRequest {
    pub user_id: Uuid,
    pub role: String,
    pub scope_type: Option<String>,
    #[serde(default)]
    pub scope_ids: Vec<String>,
}

#[derive(Serialize)]
pub struct PermissionResponse {
    pub id: Uuid,
    pub event_id: Uuid,
    pub user_id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
    pub scope_type: Option<String>,
    pub scope_ids: Vec<String>,
    pub created_at: NaiveDateTime,
}

impl PermissionResponse {
    fn new(permission: EventPermission, user: User) -> Self {
        Self {
            id: permission.id,
            event_id: permission.event_id,
            user_id: permission.user_id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            role: permission.role,
            scope_type: permission.scope_type,
            scope_ids: permission.scope_ids,
            created_at: permission.created_at,
        }
    }
}

fn duplicate_grant(error: DieselError) -> AppError {
    match error {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            AppError::bad_request(DUPLICATE_PERMISSION)
        }
        other => other.into(),
    }
}

pub async fn list_permissions(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(event_id): Path<Uuid>,
) -> AppResult<ApiResponse<Vec<PermissionResponse>>> {
    let mut conn = state.db()?;
    let (_, access) = access::load_event(&mut conn, &user, event_id)?;
    access.ensure(access.can_manage_event(), "view event permissions")?;

    let rows: Vec<(EventPermission, User)> = event_permissions::table
        .inner_join(users::table)
        .filter(event_permissions::event_id.eq(event_id))
        .order((users::last_name.asc(), users::first_name.asc()))
        .load(&mut conn)?;

    Ok(ApiResponse::ok(
        rows.into_iter()
            .map(|(permission, user)| PermissionResponse::new(permission, user))
            .collect(),
    ))
}

pub async fn grant_permission(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(event_id): Path<Uuid>,
    ApiJson(payload): ApiJson<GrantPermissionRequest>,
) -> AppResult<ApiResponse<PermissionResponse>> {
    let mut conn = state.db()?;
    let (_, access) = access::load_event(&mut conn, &user, event_id)?;
    access.ensure(access.can_manage_permissions(), "manage event permissions")?;

    let mut errors = FieldErrors::new();
    let role = match payload.role.parse::<PermissionRole>() {
        Ok(role) => Some(role),
        Err(message) => {
            errors.push("role", message);
            None
        }
    };
    let scope_type = match payload.scope_type.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match raw.parse::<ScopeType>() {
            Ok(scope) => Some(scope),
            Err(message) => {
                errors.push("scope_type", message);
                None
            }
        },
    };
    let scope_ids: Vec<String> = payload
        .scope_ids
        .iter()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    if scope_type.is_some() && scope_ids.is_empty() {
        errors.push("scope_ids", "a scoped permission needs at least one scope id");
    }
    if scope_type == Some(ScopeType::StationRange) {
        for scope in &scope_ids {
            if access::parse_station_range(scope).is_none() {
                errors.push("scope_ids", format!("{scope} is not a position number range"));
            }
        }
    }
    errors.into_result()?;
    let role = role.ok_or_else(|| AppError::bad_request("invalid role"))?;

    let target: User = users::table
        .find(payload.user_id)
        .first(&mut conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_entity("user"))?;

    let existing: i64 = event_permissions::table
        .filter(event_permissions::event_id.eq(event_id))
        .filter(event_permissions::user_id.eq(target.id))
        .select(count_star())
        .first(&mut conn)?;
    if existing > 0 {
        return Err(AppError::bad_request(DUPLICATE_PERMISSION));
    }

    let new_permission = NewEventPermission {
        id: Uuid::new_v4(),
        event_id,
        user_id: target.id,
        role: role.as_str().to_string(),
        scope_type: scope_type.map(|s| s.as_str().to_string()),
        scope_ids,
    };
    let permission: EventPermission = diesel::insert_into(event_permissions::table)
        .values(&new_permission)
        .get_result(&mut conn)
        .map_err(duplicate_grant)?;

    info!(event_id = %event_id, user_id = %target.id, role = %role, "event permission granted");
    Ok(ApiResponse::created(PermissionResponse::new(permission, target)))
}

pub async fn revoke_permission(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path((event_id, user_id)): Path<(Uuid, Uuid)>,
) -> AppResult<ApiResponse<serde_json::Value>> {
    let (_, access) = {
        let mut conn = state.db()?;
        access::load_event(&mut conn, &user, event_id)?
    };
    access.ensure(access.can_manage_permissions(), "manage event permissions")?;

    state.transaction(|conn| {
        let permission: EventPermission = event_permissions::table
            .filter(event_permissions::event_id.eq(event_id))
            .filter(event_permissions::user_id.eq(user_id))
            .first(conn)
            .optional()?
            .ok_or_else(|| AppError::not_found_entity("permission"))?;

        if permission.role == PermissionRole::Owner.as_str() {
            let owners: i64 = event_permissions::table
                .filter(event_permissions::event_id.eq(event_id))
                .filter(event_permissions::role.eq(PermissionRole::Owner.as_str()))
                .select(count_star())
                .first(conn)?;
            if owners <= 1 {
                return Err(AppError::bad_request(
                    "cannot remove the last owner of an event",
                ));
            }
        }

        diesel::delete(event_permissions::table.find(permission.id)).execute(conn)?;
        Ok(())
    })?;

    info!(event_id = %event_id, user_id = %user_id, "event permission revoked");
    Ok(ApiResponse::ok(serde_json::json!({ "user_id": user_id }))
        .with_message("Permission removed"))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;

    #[test]
    fn racing_duplicate_grant_is_a_bad_request() {
        let error = duplicate_grant(DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new(String::from("event_permissions_event_user_key")),
        ));
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error.message(), DUPLICATE_PERMISSION);

        let error = duplicate_grant(DieselError::NotFound);
        assert_eq!(error.status(), StatusCode::NOT_FOUND);
    }
}
