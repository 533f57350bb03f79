//! services/api/src/web/students.rs
//!
//! Handlers for `/api/students`.

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use revision_tracker_core::domain::{Identity, StudentUpdate};
use revision_tracker_core::views::StudentHistoryView;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;

use crate::error::ApiError;
use crate::web::rest::{parse_body, parse_id};
use crate::web::state::AppState;

#[derive(Deserialize, ToSchema)]
pub struct CreateStudentRequest {
    pub name: String,
    #[serde(default)]
    pub notes: Option<String>,
}

/// Only the name and notes are editable; history is append-only.
#[derive(Deserialize, ToSchema)]
pub struct UpdateStudentRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[utoipa::path(
    post,
    path = "/api/students",
    request_body = CreateStudentRequest,
    responses(
        (status = 201, description = "Student created"),
        (status = 400, description = "Missing name"),
        (status = 401, description = "Not logged in")
    )
)]
pub async fn create_student_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: CreateStudentRequest = parse_body(&body)?;
    let student = state
        .db
        .create_student(&req.name, req.notes.as_deref().unwrap_or(""))
        .await?;
    info!(student_id = %student.id, admin = %identity.email, "Student created");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "student": student })),
    ))
}

#[utoipa::path(
    get,
    path = "/api/students",
    responses((status = 200, description = "All students with their history"))
)]
pub async fn list_students_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let students = state.db.list_students().await?;
    Ok(Json(json!({
        "success": true,
        "message": "Students fetched successfully",
        "students": students,
    })))
}

#[utoipa::path(
    put,
    path = "/api/students/{id}",
    request_body = UpdateStudentRequest,
    params(("id" = String, Path, description = "Student id (UUID)")),
    responses(
        (status = 200, description = "Student updated"),
        (status = 404, description = "Student not found")
    )
)]
pub async fn update_student_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let student_id = parse_id("student", &id)?;
    let req: UpdateStudentRequest = parse_body(&body)?;
    let student = state
        .db
        .update_student(
            student_id,
            StudentUpdate {
                name: req.name,
                notes: req.notes,
            },
        )
        .await?;
    info!(%student_id, admin = %identity.email, "Student updated");
    Ok(Json(json!({
        "success": true,
        "message": "Updated successfully",
        "student": student,
    })))
}

#[utoipa::path(
    delete,
    path = "/api/students/{id}",
    params(("id" = String, Path, description = "Student id (UUID)")),
    responses(
        (status = 200, description = "Student deleted"),
        (status = 404, description = "Student not found")
    )
)]
pub async fn delete_student_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let student_id = parse_id("student", &id)?;
    state.db.delete_student(student_id).await?;
    info!(%student_id, admin = %identity.email, "Student deleted");
    Ok(Json(json!({ "success": true, "message": "Student deleted successfully" })))
}

/// The student's own history plus every lesson they were on the sheet for.
#[utoipa::path(
    get,
    path = "/api/students/{id}/history",
    params(("id" = String, Path, description = "Student id (UUID)")),
    responses(
        (status = 200, description = "History and lesson attendance, most recent lesson first"),
        (status = 400, description = "Invalid student id"),
        (status = 404, description = "Student not found")
    )
)]
pub async fn student_history_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let student_id = parse_id("student", &id)?;
    let student = state.db.get_student(student_id).await?;

    let mut group_ids: Vec<_> = student.history.iter().map(|h| h.group_id).collect();
    group_ids.sort_unstable();
    group_ids.dedup();
    let titles = state.db.get_group_titles(&group_ids).await?;
    let lessons = state.db.get_student_lessons(student_id).await?;

    Ok(Json(json!({
        "success": true,
        "student": StudentHistoryView::populate(student, &titles),
        "lessons": lessons,
    })))
}
