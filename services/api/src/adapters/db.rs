//! services/api/src/adapters/db.rs
//!
//! This module contains the database adapter, which is the concrete implementation
//! of the storage ports from the `core` crate. It handles all interactions
//! with the PostgreSQL database using `sqlx`.
//!
//! Queries are checked at runtime so the crate builds without a live database.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use revision_tracker_core::domain::{
    required_text, AdminCredentials, Group, HistoryEntry, Identity, Lesson, NewGroup,
    RevisionRange, Student, StudentAttendance, StudentLessonRecord, StudentSummary,
    StudentUpdate,
};
use revision_tracker_core::ports::{DatabaseService, PortError, PortResult, Transaction};
use sqlx::types::Json;
use sqlx::{FromRow, PgConnection, PgPool, Postgres};
use std::collections::HashMap;
use uuid::Uuid;

pub static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("./migrations");

//=========================================================================================
// The Main Adapter Struct
//=========================================================================================

/// A database adapter that implements the `DatabaseService` port.
#[derive(Clone)]
pub struct DbAdapter {
    pool: PgPool,
}

impl DbAdapter {
    /// Creates a new `DbAdapter`.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// A helper function to run database migrations at startup.
    pub async fn run_migrations(&self) -> Result<(), sqlx::migrate::MigrateError> {
        MIGRATOR.run(&self.pool).await
    }
}

fn storage(e: sqlx::Error) -> PortError {
    PortError::Storage(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .and_then(|d| d.code())
        .map_or(false, |code| code == "23505")
}

//=========================================================================================
// "Impure" Database Record Structs
//=========================================================================================

#[derive(FromRow)]
struct AdminRecord {
    id: Uuid,
    name: String,
    email: String,
    password_hash: String,
}
impl AdminRecord {
    fn to_domain(self) -> AdminCredentials {
        AdminCredentials {
            id: self.id,
            name: self.name,
            email: self.email,
            password_hash: self.password_hash,
        }
    }
}

#[derive(FromRow)]
struct IdentityRecord {
    id: Uuid,
    name: String,
    email: String,
}
impl IdentityRecord {
    fn to_domain(self) -> Identity {
        Identity {
            admin_id: self.id,
            name: self.name,
            email: self.email,
        }
    }
}

#[derive(FromRow)]
struct StudentRecord {
    id: Uuid,
    name: String,
    notes: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}
impl StudentRecord {
    fn to_domain(self, history: Vec<HistoryEntry>) -> Student {
        Student {
            id: self.id,
            name: self.name,
            notes: self.notes,
            history,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

#[derive(FromRow)]
struct HistoryRecord {
    id: Uuid,
    student_id: Uuid,
    group_id: Uuid,
    date: DateTime<Utc>,
    revised: bool,
    notes: String,
    revision: Option<Json<RevisionRange>>,
}
impl HistoryRecord {
    fn to_domain(self) -> HistoryEntry {
        HistoryEntry {
            id: self.id,
            group_id: self.group_id,
            date: self.date,
            revised: self.revised,
            notes: self.notes,
            revision: self.revision.map(|r| r.0),
        }
    }
}

#[derive(FromRow)]
struct GroupRecord {
    id: Uuid,
    title: String,
    notes: String,
    meeting_day: String,
    meeting_time: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct MemberRecord {
    group_id: Uuid,
    student_id: Uuid,
}

#[derive(FromRow)]
struct LessonRecord {
    id: Uuid,
    group_id: Uuid,
    date: DateTime<Utc>,
}

#[derive(FromRow)]
struct AttendanceRecord {
    lesson_id: Uuid,
    student_id: Uuid,
    attended: bool,
    notes: String,
    revision: Option<Json<RevisionRange>>,
}
impl AttendanceRecord {
    fn to_domain(self) -> StudentAttendance {
        StudentAttendance {
            student_id: self.student_id,
            attended: self.attended,
            notes: self.notes,
            revision: self.revision.map(|r| r.0),
        }
    }
}

#[derive(FromRow)]
struct StudentLessonRow {
    group_id: Uuid,
    group_title: String,
    lesson_id: Uuid,
    lesson_date: DateTime<Utc>,
    attended: bool,
    notes: String,
    revision: Option<Json<RevisionRange>>,
}
impl StudentLessonRow {
    fn to_domain(self) -> StudentLessonRecord {
        StudentLessonRecord {
            group_id: self.group_id,
            group_title: self.group_title,
            lesson_id: self.lesson_id,
            lesson_date: self.lesson_date,
            attended: self.attended,
            notes: self.notes,
            revision: self.revision.map(|r| r.0),
        }
    }
}

//=========================================================================================
// Aggregate Loading
//=========================================================================================

const GROUP_COLUMNS: &str =
    "id, title, notes, meeting_day, meeting_time, created_at, updated_at";
const STUDENT_COLUMNS: &str = "id, name, notes, created_at, updated_at";

/// Attaches members, lessons and attendance to the group rows, preserving row order.
async fn assemble_groups(
    conn: &mut PgConnection,
    records: Vec<GroupRecord>,
) -> PortResult<Vec<Group>> {
    let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();

    let members = sqlx::query_as::<_, MemberRecord>(
        "SELECT group_id, student_id FROM group_members WHERE group_id = ANY($1) ORDER BY seq",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(storage)?;

    let lessons = sqlx::query_as::<_, LessonRecord>(
        "SELECT id, group_id, date FROM lessons WHERE group_id = ANY($1) ORDER BY seq",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(storage)?;

    let lesson_ids: Vec<Uuid> = lessons.iter().map(|l| l.id).collect();
    let attendance = sqlx::query_as::<_, AttendanceRecord>(
        "SELECT lesson_id, student_id, attended, notes, revision FROM lesson_attendance \
         WHERE lesson_id = ANY($1) ORDER BY seq",
    )
    .bind(&lesson_ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(storage)?;

    let mut members_by_group: HashMap<Uuid, Vec<Uuid>> = HashMap::new();
    for m in members {
        members_by_group.entry(m.group_id).or_default().push(m.student_id);
    }
    let mut attendance_by_lesson: HashMap<Uuid, Vec<StudentAttendance>> = HashMap::new();
    for a in attendance {
        attendance_by_lesson
            .entry(a.lesson_id)
            .or_default()
            .push(a.to_domain());
    }
    let mut lessons_by_group: HashMap<Uuid, Vec<Lesson>> = HashMap::new();
    for l in lessons {
        lessons_by_group.entry(l.group_id).or_default().push(Lesson {
            id: l.id,
            date: l.date,
            students: attendance_by_lesson.remove(&l.id).unwrap_or_default(),
        });
    }

    Ok(records
        .into_iter()
        .map(|r| Group {
            students: members_by_group.remove(&r.id).unwrap_or_default(),
            lessons: lessons_by_group.remove(&r.id).unwrap_or_default(),
            id: r.id,
            title: r.title,
            notes: r.notes,
            day: r.meeting_day,
            time: r.meeting_time,
            created_at: r.created_at,
            updated_at: r.updated_at,
        })
        .collect())
}

async fn fetch_group(conn: &mut PgConnection, group_id: Uuid, for_update: bool) -> PortResult<Group> {
    let sql = format!(
        "SELECT {} FROM groups WHERE id = $1{}",
        GROUP_COLUMNS,
        if for_update { " FOR UPDATE" } else { "" }
    );
    let record = sqlx::query_as::<_, GroupRecord>(&sql)
        .bind(group_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage)?
        .ok_or_else(|| PortError::NotFound(format!("Group {} not found", group_id)))?;

    let mut groups = assemble_groups(conn, vec![record]).await?;
    groups
        .pop()
        .ok_or_else(|| PortError::NotFound(format!("Group {} not found", group_id)))
}

/// Attaches each student's history, oldest entry first.
async fn assemble_students(
    conn: &mut PgConnection,
    records: Vec<StudentRecord>,
) -> PortResult<Vec<Student>> {
    let ids: Vec<Uuid> = records.iter().map(|r| r.id).collect();
    let history = sqlx::query_as::<_, HistoryRecord>(
        "SELECT id, student_id, group_id, date, revised, notes, revision FROM history_entries \
         WHERE student_id = ANY($1) ORDER BY seq",
    )
    .bind(&ids)
    .fetch_all(&mut *conn)
    .await
    .map_err(storage)?;

    let mut by_student: HashMap<Uuid, Vec<HistoryEntry>> = HashMap::new();
    for h in history {
        by_student.entry(h.student_id).or_default().push(h.to_domain());
    }
    Ok(records
        .into_iter()
        .map(|r| {
            let history = by_student.remove(&r.id).unwrap_or_default();
            r.to_domain(history)
        })
        .collect())
}

async fn fetch_student(conn: &mut PgConnection, student_id: Uuid) -> PortResult<Student> {
    let sql = format!("SELECT {} FROM students WHERE id = $1", STUDENT_COLUMNS);
    let record = sqlx::query_as::<_, StudentRecord>(&sql)
        .bind(student_id)
        .fetch_optional(&mut *conn)
        .await
        .map_err(storage)?
        .ok_or_else(|| PortError::NotFound(format!("Student {} not found", student_id)))?;
    let mut students = assemble_students(conn, vec![record]).await?;
    students
        .pop()
        .ok_or_else(|| PortError::NotFound(format!("Student {} not found", student_id)))
}

//=========================================================================================
// `Transaction` Implementation
//=========================================================================================

/// A unit of work on one pooled connection; the group row is locked on load.
pub struct PgTransaction {
    tx: sqlx::Transaction<'static, Postgres>,
}

#[async_trait]
impl Transaction for PgTransaction {
    async fn load_group(&mut self, group_id: Uuid) -> PortResult<Group> {
        fetch_group(&mut self.tx, group_id, true).await
    }

    async fn insert_lesson(&mut self, group_id: Uuid, lesson: &Lesson) -> PortResult<()> {
        sqlx::query("INSERT INTO lessons (id, group_id, date) VALUES ($1, $2, $3)")
            .bind(lesson.id)
            .bind(group_id)
            .bind(lesson.date)
            .execute(&mut *self.tx)
            .await
            .map_err(storage)?;

        for entry in &lesson.students {
            sqlx::query(
                "INSERT INTO lesson_attendance (lesson_id, student_id, attended, notes, revision) \
                 VALUES ($1, $2, $3, $4, $5)",
            )
            .bind(lesson.id)
            .bind(entry.student_id)
            .bind(entry.attended)
            .bind(&entry.notes)
            .bind(entry.revision.as_ref().map(Json))
            .execute(&mut *self.tx)
            .await
            .map_err(storage)?;
        }

        touch_group(&mut self.tx, group_id).await
    }

    async fn save_lesson(&mut self, group_id: Uuid, lesson: &Lesson) -> PortResult<()> {
        let updated = sqlx::query("UPDATE lessons SET date = $3 WHERE id = $1 AND group_id = $2")
            .bind(lesson.id)
            .bind(group_id)
            .bind(lesson.date)
            .execute(&mut *self.tx)
            .await
            .map_err(storage)?;
        if updated.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Lesson {} not found", lesson.id)));
        }

        for entry in &lesson.students {
            sqlx::query(
                "INSERT INTO lesson_attendance (lesson_id, student_id, attended, notes, revision) \
                 VALUES ($1, $2, $3, $4, $5) \
                 ON CONFLICT (lesson_id, student_id) DO UPDATE \
                 SET attended = EXCLUDED.attended, notes = EXCLUDED.notes, revision = EXCLUDED.revision",
            )
            .bind(lesson.id)
            .bind(entry.student_id)
            .bind(entry.attended)
            .bind(&entry.notes)
            .bind(entry.revision.as_ref().map(Json))
            .execute(&mut *self.tx)
            .await
            .map_err(storage)?;
        }

        touch_group(&mut self.tx, group_id).await
    }

    async fn lock_students(&mut self, student_ids: &[Uuid]) -> PortResult<()> {
        sqlx::query("SELECT id FROM students WHERE id = ANY($1) ORDER BY id FOR UPDATE")
            .bind(student_ids)
            .execute(&mut *self.tx)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn append_history(
        &mut self,
        student_id: Uuid,
        entry: &HistoryEntry,
    ) -> PortResult<bool> {
        let exists: Option<Uuid> =
            sqlx::query_scalar("SELECT id FROM students WHERE id = $1")
                .bind(student_id)
                .fetch_optional(&mut *self.tx)
                .await
                .map_err(storage)?;
        if exists.is_none() {
            return Ok(false);
        }

        sqlx::query(
            "INSERT INTO history_entries (id, student_id, group_id, date, revised, notes, revision) \
             VALUES ($1, $2, $3, $4, $5, $6, $7)",
        )
        .bind(entry.id)
        .bind(student_id)
        .bind(entry.group_id)
        .bind(entry.date)
        .bind(entry.revised)
        .bind(&entry.notes)
        .bind(entry.revision.as_ref().map(Json))
        .execute(&mut *self.tx)
        .await
        .map_err(storage)?;

        sqlx::query("UPDATE students SET updated_at = now() WHERE id = $1")
            .bind(student_id)
            .execute(&mut *self.tx)
            .await
            .map_err(storage)?;
        Ok(true)
    }

    async fn commit(self: Box<Self>) -> PortResult<()> {
        self.tx.commit().await.map_err(storage)
    }

    async fn rollback(self: Box<Self>) -> PortResult<()> {
        self.tx.rollback().await.map_err(storage)
    }
}

async fn touch_group(conn: &mut PgConnection, group_id: Uuid) -> PortResult<()> {
    sqlx::query("UPDATE groups SET updated_at = now() WHERE id = $1")
        .bind(group_id)
        .execute(conn)
        .await
        .map_err(storage)?;
    Ok(())
}

//=========================================================================================
// `DatabaseService` Trait Implementation
//=========================================================================================

#[async_trait]
impl DatabaseService for DbAdapter {
    async fn begin(&self) -> PortResult<Box<dyn Transaction>> {
        let tx = self.pool.begin().await.map_err(storage)?;
        Ok(Box::new(PgTransaction { tx }))
    }

    // --- Admins & Auth ---

    async fn create_admin(
        &self,
        name: &str,
        email: &str,
        password_hash: &str,
    ) -> PortResult<Identity> {
        let record = sqlx::query_as::<_, IdentityRecord>(
            "INSERT INTO admins (id, name, email, password_hash) VALUES ($1, $2, $3, $4) \
             RETURNING id, name, email",
        )
        .bind(Uuid::new_v4())
        .bind(required_text("name", name)?)
        .bind(required_text("email", email)?)
        .bind(password_hash)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                PortError::Conflict(format!("Admin {} already exists", email))
            } else {
                storage(e)
            }
        })?;
        Ok(record.to_domain())
    }

    async fn get_admin_by_email(&self, email: &str) -> PortResult<AdminCredentials> {
        let record = sqlx::query_as::<_, AdminRecord>(
            "SELECT id, name, email, password_hash FROM admins WHERE email = $1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?
        .ok_or_else(|| PortError::NotFound(format!("Admin {} not found", email)))?;
        Ok(record.to_domain())
    }

    async fn create_auth_session(
        &self,
        token: &str,
        admin_id: Uuid,
        expires_at: DateTime<Utc>,
    ) -> PortResult<()> {
        sqlx::query("INSERT INTO auth_sessions (id, admin_id, expires_at) VALUES ($1, $2, $3)")
            .bind(token)
            .bind(admin_id)
            .bind(expires_at)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    async fn validate_auth_session(&self, token: &str) -> PortResult<Identity> {
        let record = sqlx::query_as::<_, IdentityRecord>(
            "SELECT a.id, a.name, a.email FROM auth_sessions s \
             JOIN admins a ON a.id = s.admin_id \
             WHERE s.id = $1 AND s.expires_at > now()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await
        .map_err(storage)?
        .ok_or(PortError::Unauthorized)?;
        Ok(record.to_domain())
    }

    async fn delete_auth_session(&self, token: &str) -> PortResult<()> {
        sqlx::query("DELETE FROM auth_sessions WHERE id = $1")
            .bind(token)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        Ok(())
    }

    // --- Students ---

    async fn create_student(&self, name: &str, notes: &str) -> PortResult<Student> {
        let sql = format!(
            "INSERT INTO students (id, name, notes) VALUES ($1, $2, $3) RETURNING {}",
            STUDENT_COLUMNS
        );
        let record = sqlx::query_as::<_, StudentRecord>(&sql)
            .bind(Uuid::new_v4())
            .bind(required_text("name", name)?)
            .bind(notes)
            .fetch_one(&self.pool)
            .await
            .map_err(storage)?;
        Ok(record.to_domain(Vec::new()))
    }

    async fn list_students(&self) -> PortResult<Vec<Student>> {
        let mut conn = self.pool.acquire().await.map_err(storage)?;
        let sql = format!("SELECT {} FROM students ORDER BY created_at, id", STUDENT_COLUMNS);
        let records = sqlx::query_as::<_, StudentRecord>(&sql)
            .fetch_all(&mut *conn)
            .await
            .map_err(storage)?;
        assemble_students(&mut conn, records).await
    }

    async fn get_student(&self, student_id: Uuid) -> PortResult<Student> {
        let mut conn = self.pool.acquire().await.map_err(storage)?;
        fetch_student(&mut conn, student_id).await
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

        let mut conn = self.pool.acquire().await.map_err(storage)?;
        let updated = sqlx::query(
            "UPDATE students SET name = COALESCE($2, name), notes = COALESCE($3, notes), \
             updated_at = now() WHERE id = $1",
        )
        .bind(student_id)
        .bind(name)
        .bind(update.notes)
        .execute(&mut *conn)
        .await
        .map_err(storage)?;
        if updated.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Student {} not found", student_id)));
        }
        fetch_student(&mut conn, student_id).await
    }

    async fn delete_student(&self, student_id: Uuid) -> PortResult<()> {
        let deleted = sqlx::query("DELETE FROM students WHERE id = $1")
            .bind(student_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        if deleted.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Student {} not found", student_id)));
        }
        Ok(())
    }

    async fn get_student_summaries(
        &self,
        student_ids: &[Uuid],
    ) -> PortResult<HashMap<Uuid, StudentSummary>> {
        let records = sqlx::query_as::<_, (Uuid, String, String)>(
            "SELECT id, name, notes FROM students WHERE id = ANY($1)",
        )
        .bind(student_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        Ok(records
            .into_iter()
            .map(|(id, name, notes)| (id, StudentSummary { id, name, notes }))
            .collect())
    }

    async fn get_student_lessons(
        &self,
        student_id: Uuid,
    ) -> PortResult<Vec<StudentLessonRecord>> {
        let rows = sqlx::query_as::<_, StudentLessonRow>(
            "SELECT g.id AS group_id, g.title AS group_title, l.id AS lesson_id, \
             l.date AS lesson_date, a.attended, a.notes, a.revision \
             FROM lesson_attendance a \
             JOIN lessons l ON l.id = a.lesson_id \
             JOIN groups g ON g.id = l.group_id \
             WHERE a.student_id = $1 \
             ORDER BY l.date DESC",
        )
        .bind(student_id)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        Ok(rows.into_iter().map(|r| r.to_domain()).collect())
    }

    // --- Groups ---

    async fn create_group(&self, group: NewGroup) -> PortResult<Group> {
        let title = required_text("title", &group.title)?;
        let mut members: Vec<Uuid> = Vec::with_capacity(group.student_ids.len());
        for id in group.student_ids {
            if !members.contains(&id) {
                members.push(id);
            }
        }

        let mut tx = self.pool.begin().await.map_err(storage)?;

        let known: Vec<Uuid> = sqlx::query_scalar("SELECT id FROM students WHERE id = ANY($1)")
            .bind(&members)
            .fetch_all(&mut *tx)
            .await
            .map_err(storage)?;
        if let Some(unknown) = members.iter().find(|id| !known.contains(id)) {
            return Err(PortError::Validation(format!("Unknown student {}", unknown)));
        }

        let group_id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO groups (id, title, notes, meeting_day, meeting_time) \
             VALUES ($1, $2, $3, $4, $5)",
        )
        .bind(group_id)
        .bind(&title)
        .bind(&group.notes)
        .bind(&group.day)
        .bind(&group.time)
        .execute(&mut *tx)
        .await
        .map_err(storage)?;

        for student_id in &members {
            sqlx::query("INSERT INTO group_members (group_id, student_id) VALUES ($1, $2)")
                .bind(group_id)
                .bind(student_id)
                .execute(&mut *tx)
                .await
                .map_err(storage)?;
        }

        let created = fetch_group(&mut tx, group_id, false).await?;
        tx.commit().await.map_err(storage)?;
        Ok(created)
    }

    async fn list_groups(&self) -> PortResult<Vec<Group>> {
        let mut conn = self.pool.acquire().await.map_err(storage)?;
        let sql = format!("SELECT {} FROM groups ORDER BY created_at, id", GROUP_COLUMNS);
        let records = sqlx::query_as::<_, GroupRecord>(&sql)
            .fetch_all(&mut *conn)
            .await
            .map_err(storage)?;
        assemble_groups(&mut conn, records).await
    }

    async fn get_group(&self, group_id: Uuid) -> PortResult<Group> {
        let mut conn = self.pool.acquire().await.map_err(storage)?;
        fetch_group(&mut conn, group_id, false).await
    }

    async fn delete_group(&self, group_id: Uuid) -> PortResult<()> {
        let deleted = sqlx::query("DELETE FROM groups WHERE id = $1")
            .bind(group_id)
            .execute(&self.pool)
            .await
            .map_err(storage)?;
        if deleted.rows_affected() == 0 {
            return Err(PortError::NotFound(format!("Group {} not found", group_id)));
        }
        Ok(())
    }

    async fn get_group_titles(&self, group_ids: &[Uuid]) -> PortResult<HashMap<Uuid, String>> {
        let rows = sqlx::query_as::<_, (Uuid, String)>(
            "SELECT id, title FROM groups WHERE id = ANY($1)",
        )
        .bind(group_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(storage)?;
        Ok(rows.into_iter().collect())
    }
}
