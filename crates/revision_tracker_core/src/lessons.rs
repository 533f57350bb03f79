//! crates/revision_tracker_core/src/lessons.rs
//!
//! Starting a lesson and editing its attendance sheet while it is in progress.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Identity, Lesson, StudentAttendance};
use crate::ports::{DatabaseService, PortError, PortResult, Transaction};
use crate::revision::{coerce_text, is_truthy, normalize_revision};

/// Starts a lesson for the group, snapshotting its current membership.
pub async fn start_lesson(
    db: &dyn DatabaseService,
    identity: &Identity,
    group_id: Uuid,
    date: Option<DateTime<Utc>>,
) -> PortResult<Lesson> {
    let mut tx = db.begin().await?;

    let started = async {
        let group = tx.load_group(group_id).await?;
        let lesson = Lesson::start(date.unwrap_or_else(Utc::now), &group.students);
        tx.insert_lesson(group_id, &lesson).await?;
        Ok::<_, PortError>(lesson)
    }
    .await;

    let lesson = finish(tx, started).await?;
    info!(%group_id, lesson_id = %lesson.id, admin = %identity.email, students = lesson.students.len(), "Lesson started");
    Ok(lesson)
}

/// Changes to a single attendance entry during a lesson.
///
/// `attended` and `notes` are only applied when present; the revision is
/// always replaced, so omitting it clears the entry's revision.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendancePatch {
    #[serde(default)]
    pub attended: Option<Value>,
    #[serde(default)]
    pub notes: Option<Value>,
    #[serde(default, alias = "nextRevision")]
    pub revision: Value,
}

/// Updates one student's entry of an in-progress lesson. No history is written.
pub async fn record_attendance(
    db: &dyn DatabaseService,
    identity: &Identity,
    group_id: Uuid,
    lesson_id: Uuid,
    student_id: Uuid,
    patch: &AttendancePatch,
) -> PortResult<StudentAttendance> {
    let mut tx = db.begin().await?;

    let updated = async {
        let mut group = tx.load_group(group_id).await?;
        let lesson = group
            .lesson_mut(lesson_id)
            .ok_or_else(|| PortError::NotFound(format!("Lesson {} not found", lesson_id)))?;
        let entry = lesson.entry_mut(student_id).ok_or_else(|| {
            PortError::NotFound(format!("Student {} is not in this lesson", student_id))
        })?;

        if let Some(attended) = &patch.attended {
            entry.attended = is_truthy(attended);
        }
        if let Some(notes) = &patch.notes {
            entry.notes = coerce_text(notes);
        }
        entry.revision = normalize_revision(&patch.revision);

        let entry = entry.clone();
        let lesson = lesson.clone();
        tx.save_lesson(group_id, &lesson).await?;
        Ok::<_, PortError>(entry)
    }
    .await;

    let entry = finish(tx, updated).await?;
    info!(%group_id, %lesson_id, %student_id, admin = %identity.email, "Attendance recorded");
    Ok(entry)
}

/// Commits on success and rolls back on failure, returning the original error.
async fn finish<T>(tx: Box<dyn Transaction>, outcome: PortResult<T>) -> PortResult<T> {
    match outcome {
        Ok(value) => {
            tx.commit().await?;
            Ok(value)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!("Rollback failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}
