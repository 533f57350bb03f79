//! crates/revision_tracker_core/src/views.rs
//!
//! Read models that replace bare references with the referenced record's
//! name or title. A reference to a deleted record is kept with a `None` payload.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::{Group, HistoryEntry, RevisionRange, Student, StudentSummary};
use crate::ports::{DatabaseService, PortResult};

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceView {
    pub student_id: Uuid,
    pub student: Option<StudentSummary>,
    pub attended: bool,
    pub notes: String,
    pub revision: Option<RevisionRange>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LessonView {
    pub id: Uuid,
    pub date: DateTime<Utc>,
    pub students: Vec<AttendanceView>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GroupView {
    pub id: Uuid,
    pub title: String,
    pub students: Vec<StudentSummary>,
    pub lessons: Vec<LessonView>,
    pub notes: String,
    pub day: String,
    pub time: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GroupView {
    /// Builds the view from a group and the summaries of the students it references.
    /// Members that no longer exist are dropped from the member list.
    pub fn populate(group: Group, students: &HashMap<Uuid, StudentSummary>) -> Self {
        let members = group
            .students
            .iter()
            .filter_map(|id| students.get(id).cloned())
            .collect();
        let lessons = group
            .lessons
            .into_iter()
            .map(|lesson| LessonView {
                id: lesson.id,
                date: lesson.date,
                students: lesson
                    .students
                    .into_iter()
                    .map(|entry| AttendanceView {
                        student: students.get(&entry.student_id).cloned(),
                        student_id: entry.student_id,
                        attended: entry.attended,
                        notes: entry.notes,
                        revision: entry.revision,
                    })
                    .collect(),
            })
            .collect();

        Self {
            id: group.id,
            title: group.title,
            students: members,
            lessons,
            notes: group.notes,
            day: group.day,
            time: group.time,
            created_at: group.created_at,
            updated_at: group.updated_at,
        }
    }
}

/// Every student id a group refers to, members and lesson attendees alike.
pub fn referenced_students(groups: &[Group]) -> Vec<Uuid> {
    let mut ids: Vec<Uuid> = groups
        .iter()
        .flat_map(|g| {
            g.students
                .iter()
                .copied()
                .chain(g.lessons.iter().flat_map(|l| l.students.iter().map(|s| s.student_id)))
        })
        .collect();
    ids.sort_unstable();
    ids.dedup();
    ids
}

/// Loads the summaries for everything the groups reference and builds their views.
pub async fn populate_groups(
    db: &dyn DatabaseService,
    groups: Vec<Group>,
) -> PortResult<Vec<GroupView>> {
    let summaries = db.get_student_summaries(&referenced_students(&groups)).await?;
    Ok(groups
        .into_iter()
        .map(|g| GroupView::populate(g, &summaries))
        .collect())
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HistoryEntryView {
    pub id: Uuid,
    pub group_id: Uuid,
    pub group_title: Option<String>,
    pub date: DateTime<Utc>,
    pub revised: bool,
    pub notes: String,
    pub revision: Option<RevisionRange>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentHistoryView {
    pub id: Uuid,
    pub name: String,
    pub notes: String,
    pub lessons_count: usize,
    pub history: Vec<HistoryEntryView>,
    pub created_at: DateTime<Utc>,
}

impl StudentHistoryView {
    pub fn populate(student: Student, titles: &HashMap<Uuid, String>) -> Self {
        let lessons_count = student.lessons_count();
        let history = student
            .history
            .into_iter()
            .map(|entry: HistoryEntry| HistoryEntryView {
                group_title: titles.get(&entry.group_id).cloned(),
                id: entry.id,
                group_id: entry.group_id,
                date: entry.date,
                revised: entry.revised,
                notes: entry.notes,
                revision: entry.revision,
            })
            .collect();

        Self {
            id: student.id,
            name: student.name,
            notes: student.notes,
            lessons_count,
            history,
            created_at: student.created_at,
        }
    }
}
