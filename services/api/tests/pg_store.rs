//! Tests for the PostgreSQL adapter. Each test gets a fresh database with the
//! migrations applied; they need `DATABASE_URL` pointing at a server the test
//! user can create databases on.

use api_lib::adapters::DbAdapter;
use revision_tracker_core::{
    domain::{Identity, NewGroup, RevisionRange, Student},
    finalize::{finalize_lesson, AttendanceSubmission},
    lessons::start_lesson,
    ports::{DatabaseService, PortError},
};
use serde_json::{json, Value};
use sqlx::PgPool;
use uuid::Uuid;

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
    serde_json::from_value(body).unwrap()
}

struct Circle {
    db: DbAdapter,
    group_id: Uuid,
    lesson_id: Uuid,
    amina: Student,
    bilal: Student,
}

async fn circle(pool: PgPool) -> Circle {
    let db = DbAdapter::new(pool);
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
    let lesson = start_lesson(&db, &admin(), group.id, None).await.unwrap();
    Circle {
        db,
        group_id: group.id,
        lesson_id: lesson.id,
        amina,
        bilal,
    }
}

async fn attendance_rows(pool: &PgPool, lesson_id: Uuid) -> i64 {
    sqlx::query_scalar("SELECT COUNT(*) FROM lesson_attendance WHERE lesson_id = $1")
        .bind(lesson_id)
        .fetch_one(pool)
        .await
        .unwrap()
}

#[sqlx::test(migrator = "api_lib::adapters::db::MIGRATOR")]
async fn finalize_writes_attendance_and_history(pool: PgPool) {
    let c = circle(pool).await;
    let submissions = vec![
        submission(c.amina.id, json!({"attended": true, "notes": "fluent", "revision": "سورة يس 1-10"})),
        submission(c.bilal.id, json!({"attended": false, "notes": "sick"})),
    ];

    let result = finalize_lesson(&c.db, &admin(), c.group_id, c.lesson_id, &submissions)
        .await
        .unwrap();
    assert_eq!(result.history_appended, 1);

    let group = c.db.get_group(c.group_id).await.unwrap();
    let lesson = group.lesson(c.lesson_id).unwrap();
    assert_eq!(lesson.students.len(), 2);
    let yasin = Some(RevisionRange {
        surah: "يس".to_string(),
        from_ayah: 1,
        to_ayah: 10,
        count: Some(10),
    });
    assert!(lesson.students[0].attended);
    assert_eq!(lesson.students[0].revision, yasin);
    assert_eq!(lesson.students[1].notes, "sick");

    let amina = c.db.get_student(c.amina.id).await.unwrap();
    assert_eq!(amina.history.len(), 1);
    assert_eq!(amina.history[0].group_id, c.group_id);
    assert_eq!(amina.history[0].date, lesson.date);
    assert_eq!(amina.history[0].revision, yasin);
    assert!(c.db.get_student(c.bilal.id).await.unwrap().history.is_empty());

    let records = c.db.get_student_lessons(c.amina.id).await.unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].group_title, "Evening circle");
    assert!(records[0].attended);
}

#[sqlx::test(migrator = "api_lib::adapters::db::MIGRATOR")]
async fn failed_history_write_rolls_back_attendance(pool: PgPool) {
    let c = circle(pool.clone()).await;
    let outsider = c.db.create_student("Outsider", "").await.unwrap();

    // Postgres refuses NUL bytes in text, so the second history insert fails
    // after the attendance sheet and the first history entry were written.
    let submissions = vec![
        submission(c.amina.id, json!({"attended": true, "notes": "fine"})),
        submission(outsider.id, json!({"attended": true, "notes": "bad\u{0}notes"})),
    ];
    let err = finalize_lesson(&c.db, &admin(), c.group_id, c.lesson_id, &submissions)
        .await
        .unwrap_err();
    assert!(matches!(err, PortError::Storage(_)));
    assert!(err.is_retryable());

    let group = c.db.get_group(c.group_id).await.unwrap();
    let entry = &group.lesson(c.lesson_id).unwrap().students[0];
    assert_eq!(entry.student_id, c.amina.id);
    assert!(!entry.attended);
    assert_eq!(entry.notes, "");
    assert!(c.db.get_student(c.amina.id).await.unwrap().history.is_empty());
    assert!(c.db.get_student(outsider.id).await.unwrap().history.is_empty());
    assert_eq!(attendance_rows(&pool, c.lesson_id).await, 2);
}

#[sqlx::test(migrator = "api_lib::adapters::db::MIGRATOR")]
async fn refinalizing_keeps_one_attendance_row_per_student(pool: PgPool) {
    let c = circle(pool.clone()).await;
    let first = vec![submission(c.amina.id, json!({"attended": true, "notes": "first"}))];
    let second = vec![
        submission(c.amina.id, json!({"attended": true, "notes": "second"})),
        submission(c.bilal.id, json!({"attended": true, "revision": {"surah": "الملك", "from": 1, "to": 5}})),
    ];

    finalize_lesson(&c.db, &admin(), c.group_id, c.lesson_id, &first)
        .await
        .unwrap();
    finalize_lesson(&c.db, &admin(), c.group_id, c.lesson_id, &second)
        .await
        .unwrap();

    assert_eq!(attendance_rows(&pool, c.lesson_id).await, 2);
    let group = c.db.get_group(c.group_id).await.unwrap();
    let lesson = group.lesson(c.lesson_id).unwrap();
    assert_eq!(lesson.students[0].notes, "second");
    assert_eq!(
        lesson.students[1].revision.as_ref().map(|r| r.count),
        Some(Some(5))
    );

    let amina = c.db.get_student(c.amina.id).await.unwrap();
    let notes: Vec<&str> = amina.history.iter().map(|h| h.notes.as_str()).collect();
    assert_eq!(notes, vec!["first", "second"]);
}

#[sqlx::test(migrator = "api_lib::adapters::db::MIGRATOR")]
async fn concurrent_finalizations_sharing_students_both_commit(pool: PgPool) {
    let c = circle(pool).await;
    let other = c
        .db
        .create_group(NewGroup {
            title: "Morning circle".to_string(),
            student_ids: vec![c.bilal.id, c.amina.id],
            ..Default::default()
        })
        .await
        .unwrap();
    let other_lesson = start_lesson(&c.db, &admin(), other.id, None).await.unwrap();

    let forward = vec![
        submission(c.amina.id, json!({"attended": true})),
        submission(c.bilal.id, json!({"attended": true})),
    ];
    let backward = vec![
        submission(c.bilal.id, json!({"attended": true})),
        submission(c.amina.id, json!({"attended": true})),
    ];
    let same_lesson = vec![submission(c.amina.id, json!({"attended": true}))];

    let admin = admin();
    let (a, b, d) = tokio::join!(
        finalize_lesson(&c.db, &admin, c.group_id, c.lesson_id, &forward),
        finalize_lesson(&c.db, &admin, other.id, other_lesson.id, &backward),
        finalize_lesson(&c.db, &admin, c.group_id, c.lesson_id, &same_lesson),
    );
    a.unwrap();
    b.unwrap();
    d.unwrap();

    assert_eq!(c.db.get_student(c.amina.id).await.unwrap().history.len(), 3);
    assert_eq!(c.db.get_student(c.bilal.id).await.unwrap().history.len(), 2);
}

#[sqlx::test(migrator = "api_lib::adapters::db::MIGRATOR")]
async fn deletes_leave_dangling_references(pool: PgPool) {
    let c = circle(pool.clone()).await;
    finalize_lesson(
        &c.db,
        &admin(),
        c.group_id,
        c.lesson_id,
        &[submission(c.bilal.id, json!({"attended": true}))],
    )
    .await
    .unwrap();

    c.db.delete_student(c.amina.id).await.unwrap();
    assert!(matches!(
        c.db.delete_student(c.amina.id).await,
        Err(PortError::NotFound(_))
    ));
    let group = c.db.get_group(c.group_id).await.unwrap();
    assert_eq!(group.students, vec![c.bilal.id]);
    assert_eq!(attendance_rows(&pool, c.lesson_id).await, 2);
    assert!(group
        .lesson(c.lesson_id)
        .unwrap()
        .students
        .iter()
        .any(|s| s.student_id == c.amina.id));

    c.db.delete_group(c.group_id).await.unwrap();
    let bilal = c.db.get_student(c.bilal.id).await.unwrap();
    assert_eq!(bilal.history.len(), 1);
    assert_eq!(bilal.history[0].group_id, c.group_id);
    assert!(c.db.get_group_titles(&[c.group_id]).await.unwrap().is_empty());
}

#[sqlx::test(migrator = "api_lib::adapters::db::MIGRATOR")]
async fn sessions_and_duplicate_admins(pool: PgPool) {
    let db = DbAdapter::new(pool);
    let admin = db.create_admin("Admin", "a@example.com", "hash").await.unwrap();
    assert!(matches!(
        db.create_admin("Other", "a@example.com", "hash").await,
        Err(PortError::Conflict(_))
    ));

    let later = chrono::Utc::now() + chrono::Duration::hours(1);
    db.create_auth_session("live", admin.admin_id, later).await.unwrap();
    assert_eq!(db.validate_auth_session("live").await.unwrap(), admin);
    db.delete_auth_session("live").await.unwrap();
    assert!(matches!(
        db.validate_auth_session("live").await,
        Err(PortError::Unauthorized)
    ));
}
