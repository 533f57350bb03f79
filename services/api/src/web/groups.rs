//! services/api/src/web/groups.rs
//!
//! Handlers for `/api/groups`: group CRUD plus the lesson lifecycle
//! (start, per-student attendance, finalization).

use axum::{
    body::Bytes,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    Extension, Json,
};
use chrono::{DateTime, NaiveDate, Utc};
use revision_tracker_core::domain::{Identity, NewGroup};
use revision_tracker_core::finalize::{finalize_lesson, AttendanceSubmission};
use revision_tracker_core::lessons::{record_attendance, start_lesson, AttendancePatch};
use revision_tracker_core::views::{populate_groups, GroupView};
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tracing::info;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::error::ApiError;
use crate::web::rest::{parse_body, parse_id};
use crate::web::state::AppState;

//=========================================================================================
// Request Types
//=========================================================================================

#[derive(Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct CreateGroupRequest {
    pub title: String,
    #[serde(default)]
    pub day: Option<String>,
    #[serde(default)]
    pub time: Option<String>,
    #[serde(default)]
    pub student_ids: Vec<Uuid>,
    #[serde(default)]
    pub notes: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct StartLessonRequest {
    /// RFC 3339 timestamp or a plain `YYYY-MM-DD` date; defaults to now.
    #[serde(default)]
    pub date: Option<String>,
}

#[derive(Deserialize, ToSchema)]
pub struct FinalizeLessonRequest {
    /// `{studentId, attended, notes, revision}` per student.
    #[serde(default)]
    #[schema(value_type = Vec<Object>)]
    pub attendance: Vec<AttendanceSubmission>,
}

fn parse_lesson_date(raw: &str) -> Result<DateTime<Utc>, ApiError> {
    let raw = raw.trim();
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .ok_or_else(|| ApiError::BadRequest(format!("Invalid lesson date '{}'", raw)))
}

//=========================================================================================
// Group Handlers
//=========================================================================================

#[utoipa::path(
    post,
    path = "/api/groups",
    request_body = CreateGroupRequest,
    responses(
        (status = 201, description = "Group created"),
        (status = 400, description = "Missing title or unknown student")
    )
)]
pub async fn create_group_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let req: CreateGroupRequest = parse_body(&body)?;
    let group = state
        .db
        .create_group(NewGroup {
            title: req.title,
            student_ids: req.student_ids,
            notes: req.notes.unwrap_or_default(),
            day: req.day.unwrap_or_default(),
            time: req.time.unwrap_or_default(),
        })
        .await?;
    info!(group_id = %group.id, admin = %identity.email, "Group created");
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "group": group })),
    ))
}

#[utoipa::path(
    get,
    path = "/api/groups",
    responses((status = 200, description = "All groups with members populated"))
)]
pub async fn list_groups_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, ApiError> {
    let groups = state.db.list_groups().await?;
    let groups = populate_groups(state.db.as_ref(), groups).await?;
    Ok(Json(json!({ "success": true, "groups": groups })))
}

async fn group_view(state: &AppState, group_id: Uuid) -> Result<GroupView, ApiError> {
    let group = state.db.get_group(group_id).await?;
    let mut views = populate_groups(state.db.as_ref(), vec![group]).await?;
    views
        .pop()
        .ok_or_else(|| ApiError::Internal("populated group went missing".to_string()))
}

#[utoipa::path(
    get,
    path = "/api/groups/{id}",
    params(("id" = String, Path, description = "Group id (UUID)")),
    responses(
        (status = 200, description = "The group with members and lesson attendees populated"),
        (status = 404, description = "Group not found")
    )
)]
pub async fn get_group_handler(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let group_id = parse_id("group", &id)?;
    let group = group_view(&state, group_id).await?;
    Ok(Json(json!({ "success": true, "group": group })))
}

#[utoipa::path(
    delete,
    path = "/api/groups/{id}",
    params(("id" = String, Path, description = "Group id (UUID)")),
    responses(
        (status = 200, description = "Group deleted"),
        (status = 404, description = "Group not found")
    )
)]
pub async fn delete_group_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let group_id = parse_id("group", &id)?;
    state.db.delete_group(group_id).await?;
    info!(%group_id, admin = %identity.email, "Group deleted");
    Ok(Json(json!({ "success": true, "message": "Group deleted" })))
}

//=========================================================================================
// Lesson Handlers
//=========================================================================================

#[utoipa::path(
    post,
    path = "/api/groups/{group_id}/lessons",
    request_body = StartLessonRequest,
    params(("group_id" = String, Path, description = "Group id (UUID)")),
    responses(
        (status = 201, description = "Lesson started with the current members"),
        (status = 404, description = "Group not found")
    )
)]
pub async fn start_lesson_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path(group_id): Path<String>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let group_id = parse_id("group", &group_id)?;
    // The body is optional for this route.
    let req: StartLessonRequest = if body.iter().all(u8::is_ascii_whitespace) {
        StartLessonRequest { date: None }
    } else {
        parse_body(&body)?
    };
    let date = req.date.as_deref().map(parse_lesson_date).transpose()?;

    let lesson = start_lesson(state.db.as_ref(), &identity, group_id, date).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "success": true, "lesson": lesson })),
    ))
}

#[utoipa::path(
    put,
    path = "/api/groups/{group_id}/lessons/{lesson_id}/students/{student_id}",
    request_body = serde_json::Value,
    params(
        ("group_id" = String, Path, description = "Group id (UUID)"),
        ("lesson_id" = String, Path, description = "Lesson id (UUID)"),
        ("student_id" = String, Path, description = "Student id (UUID)")
    ),
    responses(
        (status = 200, description = "Attendance entry updated"),
        (status = 404, description = "Group, lesson, or student not in this lesson")
    )
)]
pub async fn record_attendance_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((group_id, lesson_id, student_id)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let group_id = parse_id("group", &group_id)?;
    let lesson_id = parse_id("lesson", &lesson_id)?;
    let student_id = parse_id("student", &student_id)?;
    let patch: AttendancePatch = parse_body(&body)?;

    let entry = record_attendance(
        state.db.as_ref(),
        &identity,
        group_id,
        lesson_id,
        student_id,
        &patch,
    )
    .await?;
    Ok(Json(json!({ "success": true, "studentEntry": entry })))
}

/// Finalize a lesson: save attendance and append history for attended students.
#[utoipa::path(
    post,
    path = "/api/groups/{group_id}/lessons/{lesson_id}/end",
    request_body = FinalizeLessonRequest,
    params(
        ("group_id" = String, Path, description = "Group id (UUID)"),
        ("lesson_id" = String, Path, description = "Lesson id (UUID)")
    ),
    responses(
        (status = 200, description = "Lesson finalized; returns the populated group"),
        (status = 400, description = "Malformed ids or attendance"),
        (status = 404, description = "Group or lesson not found"),
        (status = 503, description = "Storage failure; nothing was saved, retry the request")
    )
)]
pub async fn finalize_lesson_handler(
    State(state): State<Arc<AppState>>,
    Extension(identity): Extension<Identity>,
    Path((group_id, lesson_id)): Path<(String, String)>,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    let group_id = parse_id("group", &group_id)?;
    let lesson_id = parse_id("lesson", &lesson_id)?;
    let req: FinalizeLessonRequest = parse_body(&body)?;

    let finalized = finalize_lesson(
        state.db.as_ref(),
        &identity,
        group_id,
        lesson_id,
        &req.attendance,
    )
    .await?;

    let group = group_view(&state, group_id).await?;
    Ok(Json(json!({
        "success": true,
        "message": "Lesson finalized",
        "historyAppended": finalized.history_appended,
        "group": group,
    })))
}
