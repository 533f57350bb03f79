//! services/api/src/web/auth.rs
//!
//! Authentication endpoints for admin login, logout and the current identity.

use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use axum::{
    body::Bytes,
    extract::State,
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Extension, Json,
};
use chrono::{Duration, Utc};
use revision_tracker_core::domain::Identity;
use revision_tracker_core::ports::PortError;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::middleware::auth_token;
use crate::web::rest::parse_body;
use crate::web::state::AppState;

//=========================================================================================
// Request/Response Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[derive(Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub token: String,
    pub admin_id: Uuid,
    pub name: String,
    pub email: String,
}

//=========================================================================================
// Password Hashing
//=========================================================================================

/// Hashes a password into a PHC string for storage.
pub fn hash_password(password: &str) -> Result<String, ApiError> {
    let salt = SaltString::generate(&mut OsRng);
    Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map(|h| h.to_string())
        .map_err(|e| ApiError::Internal(format!("Failed to hash password: {}", e)))
}

fn verify_password(password: &str, stored_hash: &str) -> Result<bool, ApiError> {
    let parsed_hash = PasswordHash::new(stored_hash).map_err(|e| {
        error!("Failed to parse password hash: {:?}", e);
        ApiError::Internal("Authentication error".to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed_hash)
        .is_ok())
}

//=========================================================================================
// Handlers
//=========================================================================================

/// POST /api/auth/login - Exchange admin credentials for a token
#[utoipa::path(
    post,
    path = "/api/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials")
    )
)]
pub async fn login_handler(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: LoginRequest = parse_body(&body)?;
    let email = req.email.trim();

    // 1. Find the admin; an unknown email looks the same as a bad password
    let admin = match state.db.get_admin_by_email(email).await {
        Ok(admin) => admin,
        Err(PortError::NotFound(_)) => return Err(PortError::Unauthorized.into()),
        Err(e) => return Err(e.into()),
    };

    // 2. Verify the password
    if !verify_password(&req.password, &admin.password_hash)? {
        return Err(PortError::Unauthorized.into());
    }

    // 3. Create the session
    let token = Uuid::new_v4().to_string();
    let ttl = Duration::hours(state.config.session_ttl_hours);
    state
        .db
        .create_auth_session(&token, admin.id, Utc::now() + ttl)
        .await?;
    info!(admin = %admin.email, "Admin logged in");

    // 4. Return the token, also as a cookie for browser clients
    let cookie = format!(
        "session={}; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age={}",
        token,
        ttl.num_seconds()
    );
    let response = LoginResponse {
        success: true,
        token,
        admin_id: admin.id,
        name: admin.name,
        email: admin.email,
    };
    Ok((StatusCode::OK, [(header::SET_COOKIE, cookie)], Json(response)))
}

/// POST /api/auth/logout - Revoke the current token
#[utoipa::path(
    post,
    path = "/api/auth/logout",
    responses(
        (status = 200, description = "Logout successful"),
        (status = 401, description = "No active session")
    )
)]
pub async fn logout_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let token = auth_token(&headers).ok_or(PortError::Unauthorized)?;
    state.db.delete_auth_session(&token).await?;
    info!(admin = %identity.email, "Admin logged out");

    let cookie = "session=; HttpOnly; Secure; SameSite=Lax; Path=/; Max-Age=0";
    Ok((
        StatusCode::OK,
        [(header::SET_COOKIE, cookie.to_string())],
        Json(json!({ "success": true, "message": "Logged out" })),
    ))
}

/// GET /api/auth/me - The admin behind the current token
#[utoipa::path(
    get,
    path = "/api/auth/me",
    responses(
        (status = 200, description = "Current admin"),
        (status = 401, description = "No active session")
    )
)]
pub async fn me_handler(Extension(identity): Extension<Identity>) -> impl IntoResponse {
    Json(json!({ "success": true, "admin": identity }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hashed_password_verifies() {
        let hash = hash_password("visitor@123").unwrap();
        assert!(verify_password("visitor@123", &hash).unwrap());
        assert!(!verify_password("wrong", &hash).unwrap());
    }
}
