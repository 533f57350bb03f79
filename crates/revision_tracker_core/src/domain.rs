//! crates/revision_tracker_core/src/domain.rs
//!
//! Defines the core data structures for the application.
//! Owned child records (lessons, attendance, history) live inside their parent
//! and are addressed by a generated id within the parent's ordered sequence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ports::{PortError, PortResult};

/// Trims a required text field, rejecting it when nothing is left.
pub fn required_text(field: &str, value: &str) -> PortResult<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(PortError::Validation(format!("{} is required", field)));
    }
    Ok(trimmed.to_string())
}

/// A surah/ayah range assigned for revision.
///
/// Either fully populated or absent altogether: the normalizer never builds a
/// range with an empty surah or a missing bound.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RevisionRange {
    pub surah: String,
    pub from_ayah: i64,
    pub to_ayah: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub count: Option<i64>,
}

/// One student's row in a lesson's attendance sheet.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentAttendance {
    pub student_id: Uuid,
    pub attended: bool,
    pub notes: String,
    pub revision: Option<RevisionRange>,
}

impl StudentAttendance {
    pub fn absent(student_id: Uuid) -> Self {
        Self {
            student_id,
            attended: false,
            notes: String::new(),
            revision: None,
        }
    }
}

/// A single session of a group, with the attendance snapshot taken when it started.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lesson {
    pub id: Uuid,
    pub date: DateTime<Utc>,
    pub students: Vec<StudentAttendance>,
}

impl Lesson {
    /// Starts a lesson with one unattended entry per current member.
    /// Duplicate member ids collapse into a single entry.
    pub fn start(date: DateTime<Utc>, members: &[Uuid]) -> Self {
        let mut students: Vec<StudentAttendance> = Vec::with_capacity(members.len());
        for member in members {
            if !students.iter().any(|s| s.student_id == *member) {
                students.push(StudentAttendance::absent(*member));
            }
        }
        Self {
            id: Uuid::new_v4(),
            date,
            students,
        }
    }

    pub fn entry_mut(&mut self, student_id: Uuid) -> Option<&mut StudentAttendance> {
        self.students.iter_mut().find(|s| s.student_id == student_id)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Group {
    pub id: Uuid,
    pub title: String,
    pub students: Vec<Uuid>,
    pub lessons: Vec<Lesson>,
    pub notes: String,
    pub day: String,
    pub time: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Group {
    pub fn lesson(&self, lesson_id: Uuid) -> Option<&Lesson> {
        self.lessons.iter().find(|l| l.id == lesson_id)
    }

    pub fn lesson_mut(&mut self, lesson_id: Uuid) -> Option<&mut Lesson> {
        self.lessons.iter_mut().find(|l| l.id == lesson_id)
    }
}

/// Fields accepted when creating a group.
#[derive(Debug, Clone, Default)]
pub struct NewGroup {
    pub title: String,
    pub student_ids: Vec<Uuid>,
    pub notes: String,
    pub day: String,
    pub time: String,
}

/// A permanent record of an attended, finalized lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntry {
    pub id: Uuid,
    pub group_id: Uuid,
    pub date: DateTime<Utc>,
    pub revised: bool,
    pub notes: String,
    pub revision: Option<RevisionRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Student {
    pub id: Uuid,
    pub name: String,
    pub notes: String,
    pub history: Vec<HistoryEntry>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Student {
    pub fn lessons_count(&self) -> usize {
        self.history.len()
    }
}

/// The shallow view of a student used when populating group membership.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentSummary {
    pub id: Uuid,
    pub name: String,
    pub notes: String,
}

impl From<&Student> for StudentSummary {
    fn from(student: &Student) -> Self {
        Self {
            id: student.id,
            name: student.name.clone(),
            notes: student.notes.clone(),
        }
    }
}

/// Partial update of a student's editable fields. History is append-only and
/// cannot be touched through this path.
#[derive(Debug, Clone, Default)]
pub struct StudentUpdate {
    pub name: Option<String>,
    pub notes: Option<String>,
}

/// One row of a student's lesson view: how they fared in a lesson of some group.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentLessonRecord {
    pub group_id: Uuid,
    pub group_title: String,
    pub lesson_id: Uuid,
    pub lesson_date: DateTime<Utc>,
    pub attended: bool,
    pub notes: String,
    pub revision: Option<RevisionRange>,
}

// Only used internally for login - contains sensitive data
#[derive(Debug, Clone)]
pub struct AdminCredentials {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub password_hash: String,
}

/// The resolved admin behind a request. Core operations take it explicitly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub admin_id: Uuid,
    pub name: String,
    pub email: String,
}
