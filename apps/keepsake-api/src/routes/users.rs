//! User routes: own profile and the other user's presence.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use utoipa::ToSchema;

use crate::auth::middleware::AuthUser;
use crate::error::{ApiError, ApiErrorBody};
use crate::models::user::{User, UserId};
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/users/me", get(me))
        .route("/users/presence", get(presence))
}

// ---------------------------------------------------------------------------
// GET /api/v1/users/me
// ---------------------------------------------------------------------------

#[utoipa::path(
    get,
    path = "/api/v1/users/me",
    tag = "Users",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Authenticated user", body = User),
        (status = 401, description = "Missing or invalid token", body = ApiErrorBody),
    ),
)]
pub async fn me(AuthUser(user): AuthUser) -> Json<User> {
    Json(user)
}

// ---------------------------------------------------------------------------
// GET /api/v1/users/presence
// ---------------------------------------------------------------------------

#[derive(Debug, Serialize, ToSchema)]
pub struct PresenceResponse {
    pub is_online: bool,
    pub name: String,
    pub user_id: UserId,
}

/// Presence of the other user: the lowest-id user that is not the caller.
#[utoipa::path(
    get,
    path = "/api/v1/users/presence",
    tag = "Users",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Presence of the other user", body = PresenceResponse),
        (status = 401, description = "Missing or invalid token", body = ApiErrorBody),
        (status = 404, description = "No other user exists", body = ApiErrorBody),
    ),
)]
pub async fn presence(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
) -> Result<Json<PresenceResponse>, ApiError> {
    let other = state
        .users
        .first_other(user.id)
        .await?
        .ok_or_else(|| ApiError::not_found("No other user found"))?;

    Ok(Json(PresenceResponse {
        is_online: state.presence.is_online(other.id).await,
        name: other.display_name(),
        user_id: other.id,
    }))
}
