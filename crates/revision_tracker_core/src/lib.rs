pub mod domain;
pub mod finalize;
pub mod lessons;
pub mod memory;
pub mod ports;
pub mod revision;
pub mod views;

pub use domain::{
    AdminCredentials, Group, HistoryEntry, Identity, Lesson, NewGroup, RevisionRange, Student,
    StudentAttendance, StudentLessonRecord, StudentSummary, StudentUpdate,
};
pub use finalize::{finalize_lesson, AttendanceSubmission, FinalizedLesson};
pub use lessons::{record_attendance, start_lesson, AttendancePatch};
pub use memory::MemoryStore;
pub use ports::{DatabaseService, PortError, PortResult, Transaction};
pub use revision::normalize_revision;
pub use views::{GroupView, StudentHistoryView};
