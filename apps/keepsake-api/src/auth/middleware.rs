//! Bearer access-token extraction for HTTP routes.

use axum::extract::FromRequestParts;
use axum::http::header::AUTHORIZATION;
use axum::http::request::Parts;
use axum::response::{IntoResponse, Response};

use crate::auth::tokens::Identity;
use crate::error::ApiError;
use crate::models::user::User;
use crate::AppState;

/// Authenticated user extracted from the `Authorization: Bearer <jwt>` header.
#[derive(Debug, Clone)]
pub struct AuthUser(pub User);

/// Rejection returned when the bearer token is missing or invalid.
pub struct AuthError(ApiError);

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        self.0.into_response()
    }
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AuthError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let header = parts
            .headers
            .get(AUTHORIZATION)
            .and_then(|v| v.to_str().ok())
            .ok_or_else(|| AuthError(ApiError::unauthorized("Missing Authorization header")))?;

        let token = header.strip_prefix("Bearer ").ok_or_else(|| {
            AuthError(ApiError::unauthorized("Invalid Authorization header format"))
        })?;

        match state
            .tokens
            .authenticate(state.users.as_ref(), Some(token))
            .await
            .map_err(AuthError)?
        {
            Identity::User(user) => Ok(AuthUser(user)),
            Identity::Anonymous => Err(AuthError(ApiError::unauthorized(
                "Invalid or expired token",
            ))),
        }
    }
}
