use axum::{extract::FromRequestParts, http::request::Parts};

use crate::account::UserService;
use crate::entity::user;
use crate::error::AppError;
use crate::state::AppState;
use crate::utils::jwt;

/// Authenticated user extracted from the `Authorization: Bearer <token>` header.
///
/// Add this as a handler parameter to require authentication. Group
/// permissions are checked by the services the handler calls.
pub struct AuthUser {
    pub user: user::Model,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &AppState) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get("Authorization")
            .and_then(|v| v.to_str().ok())
            .ok_or(AppError::TokenMissing)?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or(AppError::TokenInvalid)?;

        let claims =
            jwt::verify(&state.config.auth.jwt_secret, token).map_err(|_| AppError::TokenInvalid)?;

        let user = UserService::new(&state.db)
            .find_by_id(claims.uid)
            .await?
            .filter(|user| claims.matches(user))
            .ok_or(AppError::TokenInvalid)?;

        Ok(AuthUser { user })
    }
}
