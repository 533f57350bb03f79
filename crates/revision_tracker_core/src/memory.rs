//! crates/revision_tracker_core/src/memory.rs
//!
//! An in-memory implementation of the storage ports.
//!
//! A transaction holds the store's lock for its whole lifetime and works on a
//! private copy of the state, which replaces the shared state only on commit.
//! Readers therefore see either none or all of a transaction's writes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::domain::{
    required_text, AdminCredentials, Group, HistoryEntry, Identity, Lesson, NewGroup, Student,
    StudentLessonRecord, StudentSummary, StudentUpdate,
};
use crate::ports::{DatabaseService, PortError, PortResult, Transaction};

#[derive(Debug, Clone, Default)]
struct MemoryState {
    admins: Vec<AdminCredentials>,
    auth_sessions: HashMap<String, (Uuid, DateTime<Utc>)>,
    students: Vec<Student>,
    groups: Vec<Group>,
}

impl MemoryState {
    fn group_mut(&mut self, group_id: Uuid) -> PortResult<&mut Group> {
        self.groups
            .iter_mut()
            .find(|g| g.id == group_id)
            .ok_or_else(|| PortError::NotFound(format!("Group {} not found", group_id)))
    }

    fn student(&self, student_id: Uuid) -> PortResult<&Student> {
        self.students
            .iter()
            .find(|s| s.id == student_id)
            .ok_or_else(|| PortError::NotFound(format!("Student {} not found", student_id)))
    }
}

/// A process-local store, cheap to clone; clones share the same data.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

//=========================================================================================
// `Transaction` Implementation
//=========================================================================================

pub struct MemoryTransaction {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

#[async_trait]
impl Transaction for MemoryTransaction {
    async fn load_group(&mut self, group_id: Uuid) -> PortResult<Group> {
        self.working.group_mut(group_id).map(|g| g.clone())
    }

    async fn insert_lesson(&mut self, group_id: Uuid, lesson: &Lesson) -> PortResult<()> {
        let group = self.working.group_mut(group_id)?;
        group.lessons.push(lesson.clone());
        group.updated_at = Utc::now();
        Ok(())
    }

    async fn save_lesson(&mut self, group_id: Uuid, lesson: &Lesson) -> PortResult<()> {
        let group = self.working.group_mut(group_id)?;
        let stored = group
            .lesson_mut(lesson.id)
            .ok_or_else(|| PortError::NotFound(format!("Lesson {} not found", lesson.id)))?;
        *stored = lesson.clone();
        group.updated_at = Utc::now();
        Ok(())
    }

    async fn lock_students(&mut self, _student_ids: &[Uuid]) -> PortResult<()> {
        // The store lock is already held for the whole transaction.
        Ok(())
    }

    async fn append_history(
        &mut self,
        student_id: Uuid,
        entry: &HistoryEntry,
    ) -> PortResult<bool> {
        match self.working.students.iter_mut().find(|s| s.id == student_id) {
            Some(student) => {
                student.history.push(entry.clone());
                student.updated_at = Utc::now();
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn commit(self: Box<Self>) -> PortResult<()> {
        let MemoryTransaction { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> PortResult<()> {
        Ok(())
    }
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for MemoryStore {
    async fn begin(&self) -> PortResult<Box<dyn Transaction>> {
        let guard = self.state.clone().lock_owned().await;
        let working = (*guard).clone();
        Ok(Box::new(MemoryTransaction { guard, working }))
    }

    async fn create_admin(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> PortResult<Identity> {
        let mut state = self.state.lock().await;
        if state.admins.iter().any(|a| a.email == email) {
            return Err(PortError::Conflict(format!("Admin {} already exists", email)));
        }
        let admin = AdminCredentials {
            id: Uuid::new_v4(),
            name: required_text("name", name)?,
            email: required_text("email", email)?,
            password_hash: password_hash.to_string(),
        };
        let identity = Identity {
            admin_id: admin.id,
            name: admin.name.clone(),
            email: admin.email.clone(),
        };
        state.admins.push(admin);
        Ok(identity)
    }

    async fn get_admin_by_email(&self, email: &str) -> PortResult<AdminCredentials> {
        let state = self.state.lock().await;
        state
            .admins
            .iter()
            .find(|a| a.email == email)
            .cloned()
            .ok_or_else(|| PortError::NotFound(format!("Admin {} not found", email)))
    }

    async fn create_auth_session(
        &self,
        token: &str,
        admin_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        let mut state = self.state.lock().await;
        state
            .auth_sessions
            .insert(token.to_string(), (admin_id, expires_at));
        Ok(())
    }

    async fn validate_auth_session(&self, token: &str) -> PortResult<Identity> {
        let state = self.state.lock().await;
        let (admin_id, expires_at) = state
            .auth_sessions
            .get(token)
            .copied()
            .ok_or(PortError::Unauthorized)?;
        if expires_at <= Utc::now() {
            return Err(PortError::Unauthorized);
        }
        state
            .admins
            .iter()
            .find(|a| a.id == admin_id)
            .map(|a| Identity {
                admin_id: a.id,
                name: a.name.clone(),
                email: a.email.clone(),
            })
            .ok_or(PortError::Unauthorized)
    }

    async fn delete_auth_session(&self, token: &str) -> PortResult<()> {
        self.state.lock().await.auth_sessions.remove(token);
        Ok(())
    }

    async fn create_student(&self, name: &str, notes: &str) -> PortResult<Student> {
        let now = Utc::now();
        let student = Student {
            id: Uuid::new_v4(),
            name: required_text("name", name)?,
            notes: notes.to_string(),
            history: Vec::new(),
            created_at: now,
            updated_at: now,
        };
        self.state.lock().await.students.push(student.clone());
        Ok(student)
    }

    async fn list_students(&self) -> PortResult<Vec<Student>> {
        Ok(self.state.lock().await.students.clone())
    }

    async fn get_student(&self, student_id: Uuid) -> PortResult<Student> {
        let state = self.state.lock().await;
        state.student(student_id).cloned()
    }

    async fn update_student(
        &self,
        student_id: Uuid,
        update: StudentUpdate,
    ) -> PortResult<Student> {
        let name = update
            .name
            .as_deref()
            .map(|n| required_text("name", n))
            .transpose()?;
        let mut state = self.state.lock().await;
        let student = state
            .students
            .iter_mut()
            .find(|s| s.id == student_id)
            .ok_or_else(|| PortError::NotFound(format!("Student {} not found", student_id)))?;
        if let Some(name) = name {
            student.name = name;
        }
        if let Some(notes) = update.notes {
            student.notes = notes;
        }
        student.updated_at = Utc::now();
        Ok(student.clone())
    }

    async fn delete_student(&self, student_id: Uuid) -> PortResult<()> {
        let mut state = self.state.lock().await;
        let before = state.students.len();
        state.students.retain(|s| s.id != student_id);
        if state.students.len() == before {
            return Err(PortError::NotFound(format!("Student {} not found", student_id)));
        }
        for group in state.groups.iter_mut() {
            group.students.retain(|id| *id != student_id);
        }
        Ok(())
    }

    async fn get_student_summaries(
        &self,
        student_ids: &[Uuid],
    ) -> PortResult<HashMap<Uuid, StudentSummary>> {
        let state = self.state.lock().await;
        Ok(state
            .students
            .iter()
            .filter(|s| student_ids.contains(&s.id))
            .map(|s| (s.id, StudentSummary::from(s)))
            .collect())
    }

    async fn get_student_lessons(
        &self,
        student_id: Uuid,
    ) -> PortResult<Vec<StudentLessonRecord>> {
        let state = self.state.lock().await;
        let mut records: Vec<StudentLessonRecord> = state
            .groups
            .iter()
            .flat_map(|group| {
                group.lessons.iter().flat_map(move |lesson| {
                    lesson
                        .students
                        .iter()
                        .filter(move |entry| entry.student_id == student_id)
                        .map(move |entry| StudentLessonRecord {
                            group_id: group.id,
                            group_title: group.title.clone(),
                            lesson_id: lesson.id,
                            lesson_date: lesson.date,
                            attended: entry.attended,
                            notes: entry.notes.clone(),
                            revision: entry.revision.clone(),
                        })
                })
            })
            .collect();
        records.sort_by(|a, b| b.lesson_date.cmp(&a.lesson_date));
        Ok(records)
    }

    async fn create_group(&self, group: NewGroup) -> PortResult<Group> {
        let title = required_text("title", &group.title)?;
        let mut state = self.state.lock().await;

        let mut members: Vec<Uuid> = Vec::with_capacity(group.student_ids.len());
        for id in group.student_ids {
            if state.student(id).is_err() {
                return Err(PortError::Validation(format!("Unknown student {}", id)));
            }
            if !members.contains(&id) {
                members.push(id);
            }
        }

        let now = Utc::now();
        let created = Group {
            id: Uuid::new_v4(),
            title,
            students: members,
            lessons: Vec::new(),
            notes: group.notes,
            day: group.day,
            time: group.time,
            created_at: now,
            updated_at: now,
        };
        state.groups.push(created.clone());
        Ok(created)
    }

    async fn list_groups(&self) -> PortResult<Vec<Group>> {
        Ok(self.state.lock().await.groups.clone())
    }

    async fn get_group(&self, group_id: Uuid) -> PortResult<Group> {
        let mut state = self.state.lock().await;
        state.group_mut(group_id).map(|g| g.clone())
    }

    async fn delete_group(&self, group_id: Uuid) -> PortResult<()> {
        let mut state = self.state.lock().await;
        let before = state.groups.len();
        state.groups.retain(|g| g.id != group_id);
        if state.groups.len() == before {
            return Err(PortError::NotFound(format!("Group {} not found", group_id)));
        }
        Ok(())
    }

    async fn get_group_titles(&self, group_ids: &[Uuid]) -> PortResult<HashMap<Uuid, String>> {
        let state = self.state.lock().await;
        Ok(state
            .groups
            .iter()
            .filter(|g| group_ids.contains(&g.id))
            .map(|g| (g.id, g.title.clone()))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn uncommitted_transaction_is_invisible_and_discarded() {
        let db = MemoryStore::new();
        let student = db.create_student("Amina", "").await.unwrap();
        let group = db
            .create_group(NewGroup {
                title: "G".to_string(),
                student_ids: vec![student.id],
                ..Default::default()
            })
            .await
            .unwrap();

        let mut tx = db.begin().await.unwrap();
        let lesson = Lesson::start(Utc::now(), &[student.id]);
        tx.insert_lesson(group.id, &lesson).await.unwrap();
        tx.rollback().await.unwrap();
        assert!(db.get_group(group.id).await.unwrap().lessons.is_empty());

        let mut tx = db.begin().await.unwrap();
        tx.insert_lesson(group.id, &lesson).await.unwrap();
        drop(tx);
        assert!(db.get_group(group.id).await.unwrap().lessons.is_empty());
    }

    #[tokio::test]
    async fn transactions_serialize_and_readers_wait() {
        let db = MemoryStore::new();
        let group = db
            .create_group(NewGroup {
                title: "G".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let mut tx = db.begin().await.unwrap();
        tx.insert_lesson(group.id, &Lesson::start(Utc::now(), &[]))
            .await
            .unwrap();

        let reader = {
            let db = db.clone();
            tokio::spawn(async move { db.get_group(group.id).await.unwrap().lessons.len() })
        };
        tokio::task::yield_now().await;
        tx.commit().await.unwrap();
        assert_eq!(reader.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn group_creation_rejects_unknown_members_and_blank_titles() {
        let db = MemoryStore::new();
        let err = db
            .create_group(NewGroup {
                title: "G".to_string(),
                student_ids: vec![Uuid::new_v4()],
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Validation(_)));

        let err = db
            .create_group(NewGroup {
                title: "   ".to_string(),
                ..Default::default()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::Validation(_)));
    }

    #[tokio::test]
    async fn expired_sessions_are_rejected() {
        let db = MemoryStore::new();
        let admin = db.create_admin("Admin", "a@example.com", "hash").await.unwrap();
        db.create_auth_session("live", admin.admin_id, Utc::now() + Duration::hours(1))
            .await
            .unwrap();
        db.create_auth_session("stale", admin.admin_id, Utc::now() - Duration::hours(1))
            .await
            .unwrap();

        assert_eq!(db.validate_auth_session("live").await.unwrap(), admin);
        assert!(matches!(
            db.validate_auth_session("stale").await,
            Err(PortError::Unauthorized)
        ));
        db.delete_auth_session("live").await.unwrap();
        assert!(db.validate_auth_session("live").await.is_err());

        let dup = db.create_admin("Other", "a@example.com", "hash").await;
        assert!(matches!(dup, Err(PortError::Conflict(_))));
    }
}
