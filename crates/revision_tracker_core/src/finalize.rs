//! crates/revision_tracker_core/src/finalize.rs
//!
//! Finalizing a lesson: the attendance sheet is overwritten with the submitted
//! values and every attended student gets a history entry, all inside one
//! transaction. Either everything is committed or nothing is.

use serde::Deserialize;
use serde_json::Value;
use std::collections::HashMap;
use tracing::{info, warn};
use uuid::Uuid;

use crate::domain::{Group, HistoryEntry, Identity, Lesson};
use crate::ports::{DatabaseService, PortError, PortResult, Transaction};
use crate::revision::{coerce_text, is_truthy, normalize_revision};

/// One student's final attendance as submitted by the client.
///
/// Only `studentId` is typed strictly; the other fields arrive loosely typed
/// and are coerced when applied.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceSubmission {
    pub student_id: Uuid,
    #[serde(default)]
    pub attended: Value,
    #[serde(default)]
    pub notes: Value,
    #[serde(default, alias = "nextRevision")]
    pub revision: Value,
}

impl AttendanceSubmission {
    pub fn attended(&self) -> bool {
        is_truthy(&self.attended)
    }

    pub fn notes(&self) -> String {
        coerce_text(&self.notes)
    }
}

/// The committed outcome of a finalization.
#[derive(Debug, Clone)]
pub struct FinalizedLesson {
    pub group: Group,
    pub lesson: Lesson,
    pub history_appended: usize,
}

/// Finalizes `lesson_id` of `group_id` with the given submissions.
///
/// Fails with `NotFound` when the group or lesson is missing and with
/// `Storage` when the store fails; in both cases the transaction is rolled
/// back and no attendance or history change is persisted.
pub async fn finalize_lesson(
    db: &dyn DatabaseService,
    identity: &Identity,
    group_id: Uuid,
    lesson_id: Uuid,
    submissions: &[AttendanceSubmission],
) -> PortResult<FinalizedLesson> {
    let mut tx = db.begin().await?;

    match apply(tx.as_mut(), group_id, lesson_id, submissions).await {
        Ok(finalized) => {
            tx.commit().await?;
            info!(
                %group_id,
                %lesson_id,
                admin = %identity.email,
                history_appended = finalized.history_appended,
                "Lesson finalized"
            );
            Ok(finalized)
        }
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                warn!(%group_id, %lesson_id, "Rollback after failed finalization also failed: {}", rollback_err);
            }
            warn!(%group_id, %lesson_id, admin = %identity.email, "Lesson finalization aborted: {}", e);
            Err(e)
        }
    }
}

async fn apply(
    tx: &mut dyn Transaction,
    group_id: Uuid,
    lesson_id: Uuid,
    submissions: &[AttendanceSubmission],
) -> PortResult<FinalizedLesson> {
    let mut group = tx.load_group(group_id).await?;

    // Later duplicates replace earlier ones.
    let by_student: HashMap<Uuid, &AttendanceSubmission> =
        submissions.iter().map(|s| (s.student_id, s)).collect();

    let lesson = {
        let lesson = group
            .lesson_mut(lesson_id)
            .ok_or_else(|| PortError::NotFound(format!("Lesson {} not found", lesson_id)))?;

        for entry in lesson.students.iter_mut() {
            if let Some(submission) = by_student.get(&entry.student_id) {
                entry.attended = submission.attended();
                entry.notes = submission.notes();
                entry.revision = normalize_revision(&submission.revision);
            }
        }
        lesson.clone()
    };

    tx.save_lesson(group_id, &lesson).await?;

    let mut attended: Vec<Uuid> = submissions
        .iter()
        .filter(|s| s.attended())
        .map(|s| s.student_id)
        .collect();
    attended.sort_unstable();
    attended.dedup();
    tx.lock_students(&attended).await?;

    let mut history_appended = 0;
    for submission in submissions.iter().filter(|s| s.attended()) {
        let entry = HistoryEntry {
            id: Uuid::new_v4(),
            group_id,
            date: lesson.date,
            revised: true,
            notes: submission.notes(),
            revision: normalize_revision(&submission.revision),
        };
        if tx.append_history(submission.student_id, &entry).await? {
            history_appended += 1;
        } else {
            warn!(
                %group_id,
                %lesson_id,
                student_id = %submission.student_id,
                "Attended student does not exist; no history written"
            );
        }
    }

    Ok(FinalizedLesson {
        group,
        lesson,
        history_appended,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{NewGroup, RevisionRange, Student};
    use crate::memory::MemoryStore;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::{Arc, Mutex};

    fn admin() -> Identity {
        Identity {
            admin_id: Uuid::new_v4(),
            name: "Admin".to_string(),
            email: "admin@example.com".to_string(),
        }
    }

    fn submission(student_id: Uuid, body: Value) -> AttendanceSubmission {
        let mut body = body;
        body["studentId"] = json!(student_id);
        serde_json::from_value(body).expect("valid submission")
    }

    struct Fixture {
        db: MemoryStore,
        group: Group,
        lesson_id: Uuid,
        amina: Student,
        bilal: Student,
    }

    async fn fixture() -> Fixture {
        let db = MemoryStore::new();
        let amina = db.create_student("Amina", "").await.unwrap();
        let bilal = db.create_student("Bilal", "").await.unwrap();
        let group = db
            .create_group(NewGroup {
                title: "Evening circle".to_string(),
                student_ids: vec![amina.id, bilal.id],
                ..Default::default()
            })
            .await
            .unwrap();
        let lesson = crate::lessons::start_lesson(&db, &admin(), group.id, None)
            .await
            .unwrap();
        let group = db.get_group(group.id).await.unwrap();
        Fixture {
            db,
            group,
            lesson_id: lesson.id,
            amina,
            bilal,
        }
    }

    #[tokio::test]
    async fn one_attended_one_absent() {
        let f = fixture().await;
        let submissions = vec![
            submission(f.amina.id, json!({"attended": true, "notes": "fluent", "revision": "سورة يس 1-10"})),
            submission(f.bilal.id, json!({"attended": false, "notes": "sick"})),
        ];

        let result = finalize_lesson(&f.db, &admin(), f.group.id, f.lesson_id, &submissions)
            .await
            .unwrap();
        assert_eq!(result.history_appended, 1);

        let group = f.db.get_group(f.group.id).await.unwrap();
        let lesson = group.lesson(f.lesson_id).unwrap();
        assert_eq!(lesson.students.len(), 2);
        assert!(lesson.students[0].attended);
        assert_eq!(lesson.students[0].notes, "fluent");
        assert_eq!(
            lesson.students[0].revision,
            Some(RevisionRange {
                surah: "يس".to_string(),
                from_ayah: 1,
                to_ayah: 10,
                count: Some(10),
            })
        );
        assert!(!lesson.students[1].attended);
        assert_eq!(lesson.students[1].notes, "sick");

        let amina = f.db.get_student(f.amina.id).await.unwrap();
        let bilal = f.db.get_student(f.bilal.id).await.unwrap();
        assert_eq!(amina.history.len(), 1);
        assert!(bilal.history.is_empty());

        let entry = &amina.history[0];
        assert_eq!(entry.group_id, f.group.id);
        assert_eq!(entry.date, lesson.date);
        assert!(entry.revised);
        assert_eq!(entry.notes, "fluent");
        assert_eq!(entry.revision, lesson.students[0].revision);
    }

    #[tokio::test]
    async fn unknown_lesson_writes_nothing() {
        let f = fixture().await;
        let submissions = vec![submission(f.amina.id, json!({"attended": true}))];

        let err = finalize_lesson(&f.db, &admin(), f.group.id, Uuid::new_v4(), &submissions)
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
        assert!(!err.is_retryable());

        let amina = f.db.get_student(f.amina.id).await.unwrap();
        assert!(amina.history.is_empty());
        assert_eq!(f.db.get_group(f.group.id).await.unwrap(), f.group);
    }

    #[tokio::test]
    async fn unknown_group_is_not_found() {
        let f = fixture().await;
        let err = finalize_lesson(&f.db, &admin(), Uuid::new_v4(), f.lesson_id, &[])
            .await
            .unwrap_err();
        assert!(matches!(err, PortError::NotFound(_)));
    }

    #[tokio::test]
    async fn refinalizing_overwrites_attendance_and_appends_history() {
        let f = fixture().await;
        let first = vec![submission(f.amina.id, json!({"attended": true, "notes": "first"}))];
        let second = vec![
            submission(f.amina.id, json!({"attended": true, "notes": "second"})),
            submission(f.bilal.id, json!({"attended": 1})),
        ];

        finalize_lesson(&f.db, &admin(), f.group.id, f.lesson_id, &first)
            .await
            .unwrap();
        finalize_lesson(&f.db, &admin(), f.group.id, f.lesson_id, &second)
            .await
            .unwrap();

        let group = f.db.get_group(f.group.id).await.unwrap();
        let lesson = group.lesson(f.lesson_id).unwrap();
        assert_eq!(lesson.students.len(), 2);
        assert_eq!(lesson.students[0].notes, "second");
        assert!(lesson.students[1].attended);
        assert_eq!(lesson.students[1].notes, "");

        let amina = f.db.get_student(f.amina.id).await.unwrap();
        let notes: Vec<&str> = amina.history.iter().map(|h| h.notes.as_str()).collect();
        assert_eq!(notes, vec!["first", "second"]);
        assert_eq!(f.db.get_student(f.bilal.id).await.unwrap().history.len(), 1);
    }

    #[tokio::test]
    async fn entries_without_submission_are_untouched() {
        let f = fixture().await;
        finalize_lesson(
            &f.db,
            &admin(),
            f.group.id,
            f.lesson_id,
            &[submission(f.bilal.id, json!({"attended": true, "notes": "kept"}))],
        )
        .await
        .unwrap();
        finalize_lesson(
            &f.db,
            &admin(),
            f.group.id,
            f.lesson_id,
            &[submission(f.amina.id, json!({"attended": "yes"}))],
        )
        .await
        .unwrap();

        let group = f.db.get_group(f.group.id).await.unwrap();
        let lesson = group.lesson(f.lesson_id).unwrap();
        assert!(lesson.students[0].attended);
        assert!(lesson.students[1].attended);
        assert_eq!(lesson.students[1].notes, "kept");
    }

    #[tokio::test]
    async fn duplicate_submissions_last_one_wins_for_attendance() {
        let f = fixture().await;
        let submissions = vec![
            submission(f.amina.id, json!({"attended": true, "notes": "early"})),
            submission(f.amina.id, json!({"attended": false, "notes": "late"})),
        ];
        finalize_lesson(&f.db, &admin(), f.group.id, f.lesson_id, &submissions)
            .await
            .unwrap();

        let group = f.db.get_group(f.group.id).await.unwrap();
        let entry = &group.lesson(f.lesson_id).unwrap().students[0];
        assert!(!entry.attended);
        assert_eq!(entry.notes, "late");
        // History follows each attended submission as sent.
        assert_eq!(f.db.get_student(f.amina.id).await.unwrap().history.len(), 1);
    }

    #[tokio::test]
    async fn missing_student_is_skipped_without_aborting() {
        let f = fixture().await;
        let ghost = Uuid::new_v4();
        let submissions = vec![
            submission(ghost, json!({"attended": true})),
            submission(f.amina.id, json!({"attended": true})),
        ];
        let result = finalize_lesson(&f.db, &admin(), f.group.id, f.lesson_id, &submissions)
            .await
            .unwrap();
        assert_eq!(result.history_appended, 1);
        let group = f.db.get_group(f.group.id).await.unwrap();
        assert_eq!(group.lesson(f.lesson_id).unwrap().students.len(), 2);
    }

    #[tokio::test]
    async fn concurrent_finalizations_both_land() {
        let f = fixture().await;
        let runs: Vec<_> = ["one", "two", "three"]
            .iter()
            .map(|notes| {
                let db = f.db.clone();
                let submissions =
                    vec![submission(f.amina.id, json!({"attended": true, "notes": notes}))];
                let (group_id, lesson_id) = (f.group.id, f.lesson_id);
                async move {
                    finalize_lesson(&db, &admin(), group_id, lesson_id, &submissions).await
                }
            })
            .collect();

        for result in futures::future::join_all(runs).await {
            result.unwrap();
        }
        let amina = f.db.get_student(f.amina.id).await.unwrap();
        assert_eq!(amina.history.len(), 3);
    }

    type CallLog = Arc<Mutex<Vec<(&'static str, Vec<Uuid>)>>>;

    /// Delegates to the in-memory transaction, records the student-level calls,
    /// and fails once its append budget is spent.
    struct FailingTransaction {
        inner: Box<dyn Transaction>,
        appends_left: usize,
        calls: CallLog,
    }

    impl FailingTransaction {
        fn new(inner: Box<dyn Transaction>, appends_left: usize) -> (Self, CallLog) {
            let calls = CallLog::default();
            let tx = Self {
                inner,
                appends_left,
                calls: calls.clone(),
            };
            (tx, calls)
        }
    }

    #[async_trait]
    impl Transaction for FailingTransaction {
        async fn load_group(&mut self, group_id: Uuid) -> PortResult<Group> {
            self.inner.load_group(group_id).await
        }

        async fn insert_lesson(&mut self, group_id: Uuid, lesson: &Lesson) -> PortResult<()> {
            self.inner.insert_lesson(group_id, lesson).await
        }

        async fn save_lesson(&mut self, group_id: Uuid, lesson: &Lesson) -> PortResult<()> {
            self.inner.save_lesson(group_id, lesson).await
        }

        async fn lock_students(&mut self, student_ids: &[Uuid]) -> PortResult<()> {
            self.calls.lock().unwrap().push(("lock", student_ids.to_vec()));
            self.inner.lock_students(student_ids).await
        }

        async fn append_history(
            &mut self,
            student_id: Uuid,
            entry: &HistoryEntry,
        ) -> PortResult<bool> {
            if self.appends_left == 0 {
                return Err(PortError::Storage("connection reset".to_string()));
            }
            self.appends_left -= 1;
            self.calls.lock().unwrap().push(("append", vec![student_id]));
            self.inner.append_history(student_id, entry).await
        }

        async fn commit(self: Box<Self>) -> PortResult<()> {
            self.inner.commit().await
        }

        async fn rollback(self: Box<Self>) -> PortResult<()> {
            self.inner.rollback().await
        }
    }

    #[tokio::test]
    async fn storage_failure_mid_fan_out_rolls_everything_back() {
        let f = fixture().await;
        let (tx, _) = FailingTransaction::new(f.db.begin().await.unwrap(), 1);

        let submissions = vec![
            submission(f.amina.id, json!({"attended": true, "notes": "a"})),
            submission(f.bilal.id, json!({"attended": true, "notes": "b"})),
        ];
        let mut tx: Box<dyn Transaction> = Box::new(tx);
        let err = apply(tx.as_mut(), f.group.id, f.lesson_id, &submissions)
            .await
            .unwrap_err();
        assert!(err.is_retryable());
        tx.rollback().await.unwrap();

        assert_eq!(f.db.get_group(f.group.id).await.unwrap(), f.group);
        assert!(f.db.get_student(f.amina.id).await.unwrap().history.is_empty());
        assert!(f.db.get_student(f.bilal.id).await.unwrap().history.is_empty());
    }

    #[tokio::test]
    async fn attended_students_are_locked_in_id_order_before_any_append() {
        let f = fixture().await;
        let (tx, calls) = FailingTransaction::new(f.db.begin().await.unwrap(), usize::MAX);
        let submissions = vec![
            submission(f.bilal.id, json!({"attended": true})),
            submission(f.amina.id, json!({"attended": true})),
            submission(f.bilal.id, json!({"attended": true})),
        ];

        let mut tx: Box<dyn Transaction> = Box::new(tx);
        apply(tx.as_mut(), f.group.id, f.lesson_id, &submissions)
            .await
            .unwrap();
        tx.commit().await.unwrap();

        let mut ordered = vec![f.amina.id, f.bilal.id];
        ordered.sort_unstable();
        let calls = calls.lock().unwrap().clone();
        assert_eq!(
            calls,
            vec![
                ("lock", ordered),
                ("append", vec![f.bilal.id]),
                ("append", vec![f.amina.id]),
                ("append", vec![f.bilal.id]),
            ]
        );
    }
}
