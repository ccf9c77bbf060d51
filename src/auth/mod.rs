pub mod jwt;
pub mod password;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::headers::{authorization::Bearer, Authorization};
use axum_extra::TypedHeader;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{domain::UserRole, error::AppError, state::AppState};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthenticatedUser {
    pub user_id: Uuid,
    pub email: String,
    pub role: String,
}

impl AuthenticatedUser {
    pub fn user_role(&self) -> Option<UserRole> {
        self.role.parse().ok()
    }

    pub fn is_admin(&self) -> bool {
        self.user_role() == Some(UserRole::Admin)
    }

    pub fn require_admin(&self) -> Result<(), AppError> {
        if self.is_admin() {
            Ok(())
        } else {
            Err(AppError::forbidden("admin access required"))
        }
    }

    /// The attendant directory is open to admins and overseers.
    pub fn require_attendant_manager(&self) -> Result<(), AppError> {
        match self.user_role() {
            Some(role) if role.can_manage_attendants() => Ok(()),
            _ => Err(AppError::forbidden("insufficient permissions")),
        }
    }
}

async fn bearer_token(parts: &mut Parts, state: &AppState) -> Result<String, AppError> {
    let TypedHeader(Authorization(bearer)) =
        TypedHeader::<Authorization<Bearer>>::from_request_parts(parts, state)
            .await
            .map_err(|_| AppError::unauthorized())?;
    Ok(bearer.token().to_owned())
}

#[async_trait]
impl FromRequestParts<AppState> for AuthenticatedUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts, state).await?;
        let claims = state
            .jwt
            .verify_token(&token)
            .map_err(|_| AppError::unauthorized())?;

        Ok(AuthenticatedUser {
            user_id: claims.sub,
            email: claims.email,
            role: claims.role,
        })
    }
}

/// An attendant signed in through the PIN portal.
#[derive(Debug, Clone, Serialize)]
pub struct AttendantSession {
    pub attendant_id: Uuid,
    pub name: String,
}

#[async_trait]
impl FromRequestParts<AppState> for AttendantSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts, state).await?;
        let claims = state
            .jwt
            .verify_attendant_token(&token)
            .map_err(|_| AppError::unauthorized())?;

        Ok(AttendantSession {
            attendant_id: claims.sub,
            name: claims.name,
        })
    }
}

/// Either kind of principal; used where staff and attendants share a resource.
#[derive(Debug, Clone)]
pub enum Viewer {
    User(AuthenticatedUser),
    Attendant(AttendantSession),
}

#[async_trait]
impl FromRequestParts<AppState> for Viewer {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts, state).await?;
        if let Ok(claims) = state.jwt.verify_token(&token) {
            return Ok(Viewer::User(AuthenticatedUser {
                user_id: claims.sub,
                email: claims.email,
                role: claims.role,
            }));
        }
        let claims = state
            .jwt
            .verify_attendant_token(&token)
            .map_err(|_| AppError::unauthorized())?;
        Ok(Viewer::Attendant(AttendantSession {
            attendant_id: claims.sub,
            name: claims.name,
        }))
    }
}
