use axum::{
    extract::State,
    http::{header::SET_COOKIE, HeaderMap, HeaderValue},
};
use axum_extra::{headers::Cookie, typed_header::TypedHeader};
use chrono::{Duration as ChronoDuration, Utc};
use diesel::prelude::*;
use rand::{rngs::OsRng, RngCore};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    auth::{password, AuthenticatedUser},
    error::{AppError, AppResult},
    models::{NewRefreshToken, RefreshToken, User},
    response::{ApiJson, ApiResponse},
    schema::{refresh_tokens, users::dsl},
    state::AppState,
    validation::normalize_email,
};

use crate::schema::refresh_tokens::dsl as refresh_dsl;

const REFRESH_COOKIE_NAME: &str = "refresh_token";

#[derive(Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize)]
pub struct SessionUser {
    pub id: Uuid,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub role: String,
}

#[derive(Serialize)]
pub struct LoginResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_in: i64,
    pub user: SessionUser,
}

impl LoginResponse {
    fn new(state: &AppState, access_token: String, user: User) -> Self {
        Self {
            access_token,
            token_type: "Bearer".to_string(),
            expires_in: state.jwt.expiry_seconds(),
            user: SessionUser {
                id: user.id,
                email: user.email,
                first_name: user.first_name,
                last_name: user.last_name,
                role: user.role,
            },
        }
    }
}

/// Inserts a fresh refresh token for `user_id` and returns its cookie.
fn issue_refresh_cookie(
    state: &AppState,
    conn: &mut PgConnection,
    user_id: Uuid,
) -> AppResult<HeaderValue> {
    let now = Utc::now();
    let refresh_value = generate_refresh_token();
    let refresh_expires_at = now + ChronoDuration::days(state.config.refresh_token_expiry_days);

    let new_refresh = NewRefreshToken {
        id: Uuid::new_v4(),
        user_id,
        token_hash: hash_refresh_token(&refresh_value),
        issued_at: now.naive_utc(),
        expires_at: refresh_expires_at.naive_utc(),
    };
    diesel::insert_into(refresh_tokens::table)
        .values(&new_refresh)
        .execute(conn)?;

    build_refresh_cookie(state, &refresh_value, refresh_expires_at)
}

pub async fn login(
    State(state): State<AppState>,
    ApiJson(payload): ApiJson<LoginRequest>,
) -> AppResult<(HeaderMap, ApiResponse<LoginResponse>)> {
    let mut conn = state.db()?;
    let email = normalize_email(&payload.email);

    let user: User = dsl::users
        .filter(dsl::email.eq(&email))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;

    if !user.is_active {
        warn!(user_id = %user.id, "login rejected for inactive user");
        return Err(AppError::unauthorized());
    }
    let Some(password_hash) = user.password_hash.as_deref() else {
        warn!(user_id = %user.id, "login rejected for user without password");
        return Err(AppError::unauthorized());
    };
    let valid = password::verify_password(&payload.password, password_hash)
        .map_err(|_| AppError::unauthorized())?;
    if !valid {
        return Err(AppError::unauthorized());
    }

    let access_token = state.jwt.generate_token(user.id, &user.email, &user.role)?;
    let cookie = issue_refresh_cookie(&state, &mut conn, user.id)?;

    diesel::update(dsl::users.find(user.id))
        .set(dsl::last_login.eq(Some(Utc::now().naive_utc())))
        .execute(&mut conn)?;

    info!(user_id = %user.id, role = %user.role, "user signed in");
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);
    Ok((
        headers,
        ApiResponse::ok(LoginResponse::new(&state, access_token, user))
            .with_message("Login successful"),
    ))
}

pub async fn refresh(
    State(state): State<AppState>,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, ApiResponse<LoginResponse>)> {
    let cookies = jar.ok_or_else(AppError::unauthorized)?;
    let refresh_value = cookies
        .get(REFRESH_COOKIE_NAME)
        .ok_or_else(AppError::unauthorized)?;

    let hashed = hash_refresh_token(refresh_value);
    let mut conn = state.db()?;
    let now_naive = Utc::now().naive_utc();

    let token: RefreshToken = refresh_dsl::refresh_tokens
        .filter(refresh_dsl::token_hash.eq(&hashed))
        .filter(refresh_dsl::revoked_at.is_null())
        .filter(refresh_dsl::expires_at.gt(now_naive))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::unauthorized)?;

    // A concurrent refresh with the same cookie loses the race here.
    let revoked = diesel::update(
        refresh_dsl::refresh_tokens
            .filter(refresh_dsl::id.eq(token.id))
            .filter(refresh_dsl::revoked_at.is_null()),
    )
    .set(refresh_dsl::revoked_at.eq(now_naive))
    .execute(&mut conn)?;
    if revoked == 0 {
        return Err(AppError::unauthorized());
    }

    let user: User = dsl::users.find(token.user_id).first(&mut conn)?;
    if !user.is_active {
        return Err(AppError::unauthorized());
    }

    let access_token = state.jwt.generate_token(user.id, &user.email, &user.role)?;
    let cookie = issue_refresh_cookie(&state, &mut conn, user.id)?;

    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, cookie);
    Ok((
        headers,
        ApiResponse::ok(LoginResponse::new(&state, access_token, user)),
    ))
}

pub async fn logout(
    State(state): State<AppState>,
    user: AuthenticatedUser,
    jar: Option<TypedHeader<Cookie>>,
) -> AppResult<(HeaderMap, ApiResponse<serde_json::Value>)> {
    let mut conn = state.db()?;
    let now = Utc::now().naive_utc();
    let mut rows_affected = 0;

    if let Some(value) = jar.as_ref().and_then(|cookies| cookies.get(REFRESH_COOKIE_NAME)) {
        rows_affected = diesel::update(
            refresh_dsl::refresh_tokens
                .filter(refresh_dsl::token_hash.eq(hash_refresh_token(value)))
                .filter(refresh_dsl::user_id.eq(user.user_id))
                .filter(refresh_dsl::revoked_at.is_null()),
        )
        .set(refresh_dsl::revoked_at.eq(now))
        .execute(&mut conn)?;
    }

    if rows_affected == 0 {
        diesel::update(
            refresh_dsl::refresh_tokens
                .filter(refresh_dsl::user_id.eq(user.user_id))
                .filter(refresh_dsl::revoked_at.is_null()),
        )
        .set(refresh_dsl::revoked_at.eq(now))
        .execute(&mut conn)?;
    }

    info!(user_id = %user.user_id, "user signed out");
    let mut headers = HeaderMap::new();
    headers.insert(SET_COOKIE, build_clear_refresh_cookie(&state)?);
    Ok((
        headers,
        ApiResponse::ok(serde_json::json!({})).with_message("Logged out"),
    ))
}

pub async fn me(user: AuthenticatedUser) -> ApiResponse<AuthenticatedUser> {
    ApiResponse::ok(user)
}

fn hash_refresh_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_refresh_token() -> String {
    let mut bytes = [0u8; 32];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

fn cookie_header(state: &AppState, mut parts: Vec<String>) -> AppResult<HeaderValue> {
    parts.push("Path=/".into());
    parts.push("HttpOnly".into());
    parts.push("SameSite=Strict".into());
    if state.config.refresh_cookie_secure {
        parts.push("Secure".into());
    }
    if let Some(domain) = &state.config.refresh_cookie_domain {
        parts.push(format!("Domain={domain}"));
    }
    HeaderValue::from_str(&parts.join("; ")).map_err(AppError::internal)
}

fn build_refresh_cookie(
    state: &AppState,
    token: &str,
    expires_at: chrono::DateTime<Utc>,
) -> AppResult<HeaderValue> {
    let max_age = ChronoDuration::days(state.config.refresh_token_expiry_days).num_seconds();
    cookie_header(
        state,
        vec![
            format!("{REFRESH_COOKIE_NAME}={token}"),
            format!("Max-Age={max_age}"),
            format!("Expires={}", expires_at.to_rfc2822()),
        ],
    )
}

fn build_clear_refresh_cookie(state: &AppState) -> AppResult<HeaderValue> {
    cookie_header(
        state,
        vec![
            format!("{REFRESH_COOKIE_NAME}="),
            "Max-Age=0".into(),
            "Expires=Thu, 01 Jan 1970 00:00:00 GMT".into(),
        ],
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refresh_tokens_are_hashed_hex() {
        let token = generate_refresh_token();
        assert_eq!(token.len(), 64);
        let hashed = hash_refresh_token(&token);
        assert_eq!(hashed.len(), 64);
        assert_ne!(hashed, token);
        assert_eq!(hashed, hash_refresh_token(&token));
    }
}
