//! crates/revision_tracker_core/src/ports.rs
//!
//! Defines the storage contracts (traits) for the application's core logic.
//! These traits form the boundary of the hexagonal architecture, allowing the core
//! to be independent of the concrete database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use uuid::Uuid;

use crate::domain::{
    AdminCredentials, Group, HistoryEntry, Identity, Lesson, NewGroup, Student,
    StudentLessonRecord, StudentSummary, StudentUpdate,
};

//=========================================================================================
// Generic Port Error and Result Types
//=========================================================================================

/// The error type for all port operations.
/// This abstracts away the specific errors from the storage backend.
#[derive(Debug, thiserror::Error)]
pub enum PortError {
    #[error("Invalid input: {0}")]
    Validation(String),
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Conflict: {0}")]
    Conflict(String),
    #[error("Storage failure: {0}")]
    Storage(String),
    #[error("Unauthorized")]
    Unauthorized,
}

impl PortError {
    /// Storage failures are transient; every other class needs a different request.
    pub fn is_retryable(&self) -> bool {
        matches!(self, PortError::Storage(_))
    }
}

/// A convenience type alias for `Result<T, PortError>`.
pub type PortResult<T> = Result<T, PortError>;

//=========================================================================================
// Storage Ports (Traits)
//=========================================================================================

#[async_trait]
pub trait DatabaseService: Send + Sync {
    // --- Transactions ---
    /// Opens a unit of work spanning the group and student stores.
    async fn begin(&self) -> PortResult<Box<dyn Transaction>>;

    // --- Admins & Auth ---
    async fn create_admin(&self, name: &str, email: &str, password_hash: &str)
        -> PortResult<Identity>;

    async fn get_admin_by_email(&self, email: &str) -> PortResult<AdminCredentials>;

    async fn create_auth_session(
        &self,
        token: &str,
        admin_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()>;

    /// Resolves a live session token to the admin behind it.
    async fn validate_auth_session(&self, token: &str) -> PortResult<Identity>;

    async fn delete_auth_session(&self, token: &str) -> PortResult<()>;

    // --- Students ---
    async fn create_student(&self, name: &str, notes: &str) -> PortResult<Student>;

    async fn list_students(&self) -> PortResult<Vec<Student>>;

    async fn get_student(&self, student_id: Uuid) -> PortResult<Student>;

    async fn update_student(&self, student_id: Uuid, update: StudentUpdate)
        -> PortResult<Student>;

    async fn delete_student(&self, student_id: Uuid) -> PortResult<()>;

    /// Shallow summaries for the given ids; unknown ids are simply absent.
    async fn get_student_summaries(
        &self,
        student_ids: &[Uuid],
    ) -> PortResult<HashMap<Uuid, StudentSummary>>;

    /// Every lesson attendance entry for the student across all groups,
    /// most recent lesson first.
    async fn get_student_lessons(&self, student_id: Uuid)
        -> PortResult<Vec<StudentLessonRecord>>;

    // --- Groups ---
    async fn create_group(&self, group: NewGroup) -> PortResult<Group>;

    async fn list_groups(&self) -> PortResult<Vec<Group>>;

    async fn get_group(&self, group_id: Uuid) -> PortResult<Group>;

    async fn delete_group(&self, group_id: Uuid) -> PortResult<()>;

    /// Titles for the given group ids; unknown ids are simply absent.
    async fn get_group_titles(&self, group_ids: &[Uuid]) -> PortResult<HashMap<Uuid, String>>;
}

/// A transaction-scoped handle over both stores.
///
/// Nothing written through the handle is visible to other readers until
/// `commit` succeeds. Dropping the handle without committing discards the work,
/// but callers are expected to `rollback` explicitly on failure.
#[async_trait]
pub trait Transaction: Send {
    /// Loads the group and holds it against concurrent writers until the
    /// transaction ends.
    async fn load_group(&mut self, group_id: Uuid) -> PortResult<Group>;

    /// Appends a newly started lesson to the group's lesson sequence.
    async fn insert_lesson(&mut self, group_id: Uuid, lesson: &Lesson) -> PortResult<()>;

    /// Persists the lesson's date and attendance entries back onto the group.
    async fn save_lesson(&mut self, group_id: Uuid, lesson: &Lesson) -> PortResult<()>;

    /// Holds the given students against concurrent writers until the
    /// transaction ends. Locks are taken in a fixed order so that two
    /// transactions touching the same students cannot wait on each other.
    /// Unknown ids are ignored.
    async fn lock_students(&mut self, student_ids: &[Uuid]) -> PortResult<()>;

    /// Appends to a student's history. Returns `false` when the student does not exist.
    async fn append_history(&mut self, student_id: Uuid, entry: &HistoryEntry)
        -> PortResult<bool>;

    async fn commit(self: Box<Self>) -> PortResult<()>;

    async fn rollback(self: Box<Self>) -> PortResult<()>;
}
