use axum::extract::{Path, State};
use chrono::NaiveDateTime;
use diesel::dsl::count_star;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::info;
use uuid::Uuid;

use crate::auth::password::hash_password;
use crate::auth::AuthenticatedUser;
use crate::domain::UserRole;
use crate::error::{AppError, AppResult};
use crate::models::{NewUser, User};
use crate::response::{ApiJson, ApiQuery, ApiResponse, PageRequest};
use crate::schema::{attendants, refresh_tokens, users};
use crate::state::AppState;
use crate::utils::json::{
    bool_field, nullable_field, optional_text_change, required_text_change,
};
use crate::validation::{is_valid_email, normalize_email, trimmed_or_none, FieldErrors};

pub const MIN_PASSWORD_LENGTH: usize = 8;

const DUPLICATE_EMAIL: &str = "a user with this email already exists";

#[derive(Debug, Default, Deserialize)]
pub struct ListUsersQuery {
    pub page: Option<i64>,
    pub limit: Option<i64>,
    pub search: Option<String>,
    pub role: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize)]
pub struct CreateUserRequest {
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: String,
    pub password: Option<String>,
    pub is_active: Option<bool>,
}

#[derive(Deserialize)]
pub struct BulkUserData {
    pub role: Option<String>,
}

#[derive(Deserialize)]
pub struct BulkUserRequest {
    pub action: String,
    #[serde(default)]
    pub user_ids: Vec<Uuid>,
    pub data: Option<BulkUserData>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = users)]
struct UpdateUserChangeset<'a> {
    email: Option<String>,
    first_name: Option<&'a str>,
    last_name: Option<&'a str>,
    phone: Option<Option<&'a str>>,
    role: Option<&'static str>,
    is_active: Option<bool>,
    password_hash: Option<Option<String>>,
}

#[derive(Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub phone: Option<String>,
    pub role: String,
    pub is_active: bool,
    pub has_password: bool,
    pub last_login: Option<NaiveDateTime>,
    pub created_at: NaiveDateTime,
    pub updated_at: NaiveDateTime,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            id: user.id,
            email: user.email,
            first_name: user.first_name,
            last_name: user.last_name,
            phone: user.phone,
            role: user.role,
            is_active: user.is_active,
            has_password: user.password_hash.is_some(),
            last_login: user.last_login,
            created_at: user.created_at,
            updated_at: user.updated_at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BulkAction {
    Activate,
    Deactivate,
    ChangeRole(UserRole),
    Delete,
}

impl BulkAction {
    fn name(&self) -> &'static str {
        match self {
            BulkAction::Activate => "activate",
            BulkAction::Deactivate => "deactivate",
            BulkAction::ChangeRole(_) => "change_role",
            BulkAction::Delete => "delete",
        }
    }
}

#[derive(Serialize)]
pub struct BulkFailure {
    pub user_id: Uuid,
    pub error: String,
}

#[derive(Serialize)]
pub struct BulkUserResponse {
    pub action: &'static str,
    pub successful: Vec<UserResponse>,
    pub failed: Vec<BulkFailure>,
}

fn parse_role(raw: &str, errors: &mut FieldErrors) -> Option<UserRole> {
    match raw.trim().parse::<UserRole>() {
        Ok(role) => Some(role),
        Err(message) => {
            errors.push("role", message);
            None
        }
    }
}

fn check_password(password: &str, errors: &mut FieldErrors) {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        errors.push(
            "password",
            format!("password must be at least {MIN_PASSWORD_LENGTH} characters"),
        );
    }
}

fn filtered_users(
    params: &ListUsersQuery,
    role: Option<UserRole>,
) -> users::BoxedQuery<'static, Pg> {
    let mut query = users::table.into_boxed();
    if let Some(search) = trimmed_or_none(params.search.clone()) {
        let pattern = format!("%{search}%");
        query = query.filter(
            users::email
                .ilike(pattern.clone())
                .or(users::first_name.ilike(pattern.clone()))
                .or(users::last_name.ilike(pattern)),
        );
    }
    if let Some(role) = role {
        query = query.filter(users::role.eq(role.as_str()));
    }
    if let Some(active) = params.is_active {
        query = query.filter(users::is_active.eq(active));
    }
    query
}

/// A racing insert or rename can still hit `users.email`'s unique index.
fn email_conflict(error: DieselError) -> AppError {
    match error {
        DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
            AppError::bad_request(DUPLICATE_EMAIL)
        }
        other => other.into(),
    }
}

fn find_user(conn: &mut PgConnection, user_id: Uuid) -> AppResult<User> {
    users::table
        .find(user_id)
        .first(conn)
        .optional()?
        .ok_or_else(|| AppError::not_found_entity("user"))
}

fn linked_attendants(conn: &mut PgConnection, user_id: Uuid) -> QueryResult<i64> {
    attendants::table
        .filter(attendants::user_id.eq(user_id))
        .select(count_star())
        .first(conn)
}

/// Deactivates a user and revokes their refresh tokens. Users linked to
/// attendant records are kept active.
fn deactivate_for_delete(conn: &mut PgConnection, user_id: Uuid) -> AppResult<User> {
    let linked = linked_attendants(conn, user_id)?;
    if linked > 0 {
        return Err(AppError::bad_request(format!(
            "user is linked to {linked} attendant record(s); unlink them first"
        )));
    }
    let user = diesel::update(users::table.find(user_id))
        .set(users::is_active.eq(false))
        .get_result::<User>(conn)?;
    revoke_sessions(conn, user_id)?;
    Ok(user)
}

fn revoke_sessions(conn: &mut PgConnection, user_id: Uuid) -> QueryResult<usize> {
    diesel::update(
        refresh_tokens::table
            .filter(refresh_tokens::user_id.eq(user_id))
            .filter(refresh_tokens::revoked_at.is_null()),
    )
    .set(refresh_tokens::revoked_at.eq(Some(chrono::Utc::now().naive_utc())))
    .execute(conn)
}

pub async fn list_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiQuery(params): ApiQuery<ListUsersQuery>,
) -> AppResult<ApiResponse<Vec<UserResponse>>> {
    user.require_admin()?;
    let role = match trimmed_or_none(params.role.clone()) {
        Some(raw) => Some(
            raw.parse::<UserRole>()
                .map_err(|message| AppError::invalid_field("role", message))?,
        ),
        None => None,
    };

    let mut conn = state.db()?;
    let page = PageRequest::new(params.page, params.limit, 20);
    let total: i64 = filtered_users(&params, role).count().get_result(&mut conn)?;
    let rows: Vec<User> = filtered_users(&params, role)
        .order((users::last_name.asc(), users::first_name.asc()))
        .limit(page.limit)
        .offset(page.offset())
        .load(&mut conn)?;

    Ok(
        ApiResponse::ok(rows.into_iter().map(UserResponse::from).collect())
            .with_pagination(page.paginate(total)),
    )
}

pub async fn create_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiJson(payload): ApiJson<CreateUserRequest>,
) -> AppResult<ApiResponse<UserResponse>> {
    user.require_admin()?;

    let mut errors = FieldErrors::new();
    errors.require("first_name", &payload.first_name);
    errors.require("last_name", &payload.last_name);
    if !is_valid_email(&payload.email) {
        errors.push("email", "valid email is required");
    }
    let role = parse_role(&payload.role, &mut errors);
    let password = payload.password.as_deref().filter(|p| !p.is_empty());
    if let Some(password) = password {
        check_password(password, &mut errors);
    }
    errors.into_result()?;
    let role = role.ok_or_else(|| AppError::bad_request("invalid role"))?;

    let email = normalize_email(&payload.email);
    let mut conn = state.db()?;
    let taken: i64 = users::table
        .filter(users::email.eq(&email))
        .select(count_star())
        .first(&mut conn)?;
    if taken > 0 {
        return Err(AppError::bad_request(DUPLICATE_EMAIL));
    }

    let new_user = NewUser {
        id: Uuid::new_v4(),
        email,
        first_name: payload.first_name.trim().to_string(),
        last_name: payload.last_name.trim().to_string(),
        phone: trimmed_or_none(payload.phone),
        role: role.as_str().to_string(),
        password_hash: password.map(hash_password).transpose()?,
        is_active: payload.is_active.unwrap_or(true),
    };
    let created: User = diesel::insert_into(users::table)
        .values(&new_user)
        .get_result(&mut conn)
        .map_err(email_conflict)?;

    info!(user_id = %created.id, role = %role, created_by = %user.user_id, "user created");
    Ok(ApiResponse::created(UserResponse::from(created)).with_message("User created successfully"))
}

pub async fn get_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<ApiResponse<UserResponse>> {
    user.require_admin()?;
    let mut conn = state.db()?;
    Ok(ApiResponse::ok(find_user(&mut conn, user_id)?.into()))
}

pub async fn update_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
    ApiJson(body): ApiJson<Value>,
) -> AppResult<ApiResponse<UserResponse>> {
    user.require_admin()?;
    let mut conn = state.db()?;
    let existing = find_user(&mut conn, user_id)?;

    let mut errors = FieldErrors::new();
    let mut changes = UpdateUserChangeset::default();

    let first_name = nullable_field(&body, "first_name", &mut errors);
    changes.first_name = required_text_change(&first_name, "first_name", &mut errors);
    let last_name = nullable_field(&body, "last_name", &mut errors);
    changes.last_name = required_text_change(&last_name, "last_name", &mut errors);
    let phone = nullable_field(&body, "phone", &mut errors);
    changes.phone = optional_text_change(&phone);
    changes.is_active = bool_field(&body, "is_active", &mut errors);

    let email = nullable_field(&body, "email", &mut errors);
    if let Some(email) = required_text_change(&email, "email", &mut errors) {
        if is_valid_email(email) {
            changes.email = Some(normalize_email(email));
        } else {
            errors.push("email", "valid email is required");
        }
    }
    let role = nullable_field(&body, "role", &mut errors);
    if let Some(raw) = required_text_change(&role, "role", &mut errors) {
        changes.role = parse_role(raw, &mut errors).map(|role| role.as_str());
    }
    let password = nullable_field(&body, "password", &mut errors);
    let new_password = required_text_change(&password, "password", &mut errors);
    if let Some(password) = new_password {
        check_password(password, &mut errors);
    }
    errors.into_result()?;

    if user_id == user.user_id {
        if changes.is_active == Some(false) {
            return Err(AppError::bad_request("you cannot deactivate your own account"));
        }
        if changes.role.is_some_and(|role| role != UserRole::Admin.as_str()) {
            return Err(AppError::bad_request("you cannot remove your own admin role"));
        }
    }
    if let Some(email) = changes.email.as_deref() {
        if email != existing.email {
            let taken: i64 = users::table
                .filter(users::email.eq(email))
                .filter(users::id.ne(user_id))
                .select(count_star())
                .first(&mut conn)?;
            if taken > 0 {
                return Err(AppError::bad_request(DUPLICATE_EMAIL));
            }
        }
    }
    if let Some(password) = new_password {
        changes.password_hash = Some(Some(hash_password(password)?));
    }

    let untouched = changes.email.is_none()
        && changes.first_name.is_none()
        && changes.last_name.is_none()
        && changes.phone.is_none()
        && changes.role.is_none()
        && changes.is_active.is_none()
        && changes.password_hash.is_none();
    let updated = if untouched {
        existing
    } else {
        let updated = diesel::update(users::table.find(user_id))
            .set(&changes)
            .get_result::<User>(&mut conn)
            .map_err(email_conflict)?;
        if changes.is_active == Some(false) || changes.password_hash.is_some() {
            revoke_sessions(&mut conn, user_id)?;
        }
        info!(user_id = %user_id, updated_by = %user.user_id, "user updated");
        updated
    };

    Ok(ApiResponse::ok(UserResponse::from(updated)).with_message("User updated successfully"))
}

pub async fn delete_user(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    Path(user_id): Path<Uuid>,
) -> AppResult<ApiResponse<UserResponse>> {
    user.require_admin()?;
    if user_id == user.user_id {
        return Err(AppError::bad_request("you cannot delete your own account"));
    }

    let deactivated = state.transaction(|conn| {
        find_user(conn, user_id)?;
        deactivate_for_delete(conn, user_id)
    })?;

    info!(user_id = %user_id, deleted_by = %user.user_id, "user deactivated");
    Ok(ApiResponse::ok(UserResponse::from(deactivated)).with_message("User deactivated"))
}

pub async fn bulk_users(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    ApiJson(payload): ApiJson<BulkUserRequest>,
) -> AppResult<ApiResponse<BulkUserResponse>> {
    user.require_admin()?;

    let mut errors = FieldErrors::new();
    if payload.user_ids.is_empty() {
        errors.push("user_ids", "at least one user id is required");
    }
    let action = match payload.action.trim() {
        "activate" => Some(BulkAction::Activate),
        "deactivate" => Some(BulkAction::Deactivate),
        "delete" => Some(BulkAction::Delete),
        "change_role" => match payload.data.as_ref().and_then(|d| d.role.as_deref()) {
            Some(raw) => parse_role(raw, &mut errors).map(BulkAction::ChangeRole),
            None => {
                errors.push("data.role", "role is required for change_role");
                None
            }
        },
        other => {
            errors.push(
                "action",
                format!(
                    "invalid action: {other} \
                     (expected activate, deactivate, change_role or delete)"
                ),
            );
            None
        }
    };
    errors.into_result()?;
    let action = action.ok_or_else(|| AppError::bad_request("invalid action"))?;

    let mut successful = Vec::new();
    let mut failed = Vec::new();
    for user_id in payload.user_ids {
        let self_target = user_id == user.user_id && action != BulkAction::Activate;
        let outcome = if self_target {
            Err(AppError::bad_request("cannot apply this action to your own account"))
        } else {
            state.transaction(|conn| {
                find_user(conn, user_id)?;
                let updated = match action {
                    BulkAction::Activate => diesel::update(users::table.find(user_id))
                        .set(users::is_active.eq(true))
                        .get_result::<User>(conn)?,
                    BulkAction::Deactivate => {
                        let updated = diesel::update(users::table.find(user_id))
                            .set(users::is_active.eq(false))
                            .get_result::<User>(conn)?;
                        revoke_sessions(conn, user_id)?;
                        updated
                    }
                    BulkAction::ChangeRole(role) => diesel::update(users::table.find(user_id))
                        .set(users::role.eq(role.as_str()))
                        .get_result::<User>(conn)?,
                    BulkAction::Delete => deactivate_for_delete(conn, user_id)?,
                };
                Ok(updated)
            })
        };

        match outcome {
            Ok(updated) => successful.push(UserResponse::from(updated)),
            Err(err) => failed.push(BulkFailure {
                user_id,
                error: err.message().to_string(),
            }),
        }
    }

    info!(
        action = action.name(),
        successful = successful.len(),
        failed = failed.len(),
        performed_by = %user.user_id,
        "bulk user action"
    );
    let message = format!(
        "Bulk {} completed. {} successful, {} failed.",
        action.name(),
        successful.len(),
        failed.len()
    );
    Ok(ApiResponse::ok(BulkUserResponse {
        action: action.name(),
        successful,
        failed,
    })
    .with_message(message))
}

#[cfg(test)]
mod tests {
    use axum::http::StatusCode;

    use super::*;

    #[test]
    fn racing_duplicate_email_is_a_bad_request() {
        let error = email_conflict(DieselError::DatabaseError(
            DatabaseErrorKind::UniqueViolation,
            Box::new(String::from("users_email_key")),
        ));
        assert_eq!(error.status(), StatusCode::BAD_REQUEST);
        assert_eq!(error.message(), DUPLICATE_EMAIL);
    }
}
