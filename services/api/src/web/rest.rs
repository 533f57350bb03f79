//! services/api/src/web/rest.rs
//!
//! Shared helpers for the REST handlers and the master definition for the
//! OpenAPI specification.

use serde::de::DeserializeOwned;
use utoipa::OpenApi;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::{auth, groups, students};

//=========================================================================================
// OpenAPI Master Definition
//=========================================================================================

#[derive(OpenApi)]
#[openapi(
    paths(
        auth::login_handler,
        auth::logout_handler,
        auth::me_handler,
        students::create_student_handler,
        students::list_students_handler,
        students::update_student_handler,
        students::delete_student_handler,
        students::student_history_handler,
        groups::create_group_handler,
        groups::list_groups_handler,
        groups::get_group_handler,
        groups::delete_group_handler,
        groups::start_lesson_handler,
        groups::record_attendance_handler,
        groups::finalize_lesson_handler,
    ),
    components(
        schemas(
            auth::LoginRequest,
            auth::LoginResponse,
            students::CreateStudentRequest,
            students::UpdateStudentRequest,
            groups::CreateGroupRequest,
            groups::StartLessonRequest,
            groups::FinalizeLessonRequest,
        )
    ),
    tags(
        (name = "Revision Tracker API", description = "Students, study groups, lesson attendance and revision history.")
    )
)]
pub struct ApiDoc;

//=========================================================================================
// Request Parsing
//=========================================================================================

/// Deserializes a raw JSON body, reporting syntax and shape errors as a 400.
///
/// Handlers take the body as bytes and parse it here so that malformed input
/// gets the same error envelope as every other failure.
pub fn parse_body<T: DeserializeOwned>(body: &[u8]) -> Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::BadRequest(e.to_string()))
}

/// Parses an identifier taken from the request path.
pub fn parse_id(kind: &str, raw: &str) -> Result<Uuid, ApiError> {
    Uuid::parse_str(raw).map_err(|_| ApiError::BadRequest(format!("Invalid {} id", kind)))
}
