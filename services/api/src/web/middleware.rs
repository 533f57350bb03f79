//! services/api/src/web/middleware.rs
//!
//! Authentication middleware for protecting routes.

use axum::{
    extract::{Request, State},
    http::{header, HeaderMap},
    middleware::Next,
    response::Response,
};
use revision_tracker_core::ports::PortError;
use std::sync::Arc;
use tracing::debug;

use crate::error::ApiError;
use crate::web::state::AppState;

/// Pulls the login token from `Authorization: Bearer <token>`, falling back to
/// the `session` cookie set at login.
pub fn auth_token(headers: &HeaderMap) -> Option<String> {
    let bearer = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());
    if bearer.is_some() {
        return bearer;
    }

    headers
        .get(header::COOKIE)
        .and_then(|v| v.to_str().ok())
        .and_then(|cookies| {
            cookies.split(';').find_map(|c| {
                let c = c.trim();
                c.strip_prefix("session=").map(|t| t.to_string())
            })
        })
        .filter(|t| !t.is_empty())
}

/// Middleware that resolves the login token to the admin `Identity`.
///
/// If valid, inserts the identity into request extensions for handlers to use.
/// If invalid or missing, returns 401 Unauthorized.
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut req: Request,
    next: Next,
) -> Result<Response, ApiError> {
    // 1. Extract the token
    let token = auth_token(req.headers()).ok_or(PortError::Unauthorized)?;

    // 2. Validate it against live sessions
    let identity = state.db.validate_auth_session(&token).await.map_err(|e| {
        debug!("Rejected auth token: {}", e);
        match e {
            PortError::Storage(_) => e,
            _ => PortError::Unauthorized,
        }
    })?;

    // 3. Hand the identity to the handler
    req.extensions_mut().insert(identity);
    Ok(next.run(req).await)
}
