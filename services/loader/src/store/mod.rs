//! Record store abstraction.
//!
//! A [`Store`] hands out one [`Session`] per file. A session is a single
//! transaction: every lookup and upsert for the file goes through it and
//! nothing is visible to others until [`Store::commit`]. Dropping or
//! rolling back a session leaves the store untouched.
//!
//! Lookups live on [`Catalog`] and never mutate. They are unscoped: tenant
//! filtering is the job of [`crate::tenant`], so validation and ingestion
//! share one definition of visibility.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::StoreResult;
use crate::ingest::Counts;
use crate::model::{
    AcademicResult, Course, CourseRef, Degree, Enrollment, EnrollmentRef, EntityKind,
    ImportRecord, ImportStatus, Institute, InstituteRef, Institution, InstitutionRef, LogEntry,
    OwnedRef, Program, ProgramRef, Student, StudentRef, Teacher, TeacherRef, Upsert,
};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// Read side of a session. Keys are natural keys.
#[async_trait]
pub trait Catalog: Send {
    async fn institution(&mut self, code: &str) -> StoreResult<Option<InstitutionRef>>;

    async fn institute(
        &mut self,
        institution_id: Uuid,
        acronym: &str,
    ) -> StoreResult<Option<InstituteRef>>;

    async fn program(&mut self, program_id: &str) -> StoreResult<Option<ProgramRef>>;

    async fn teacher(&mut self, teacher_id: &str) -> StoreResult<Option<TeacherRef>>;

    async fn course(&mut self, course_id: &str) -> StoreResult<Option<CourseRef>>;

    async fn student(&mut self, student_id: &str) -> StoreResult<Option<StudentRef>>;

    async fn enrollment(&mut self, enrollment_id: &str) -> StoreResult<Option<EnrollmentRef>>;

    /// All enrollments of a student at one institute, ordered by
    /// enrollment id.
    async fn enrollments_of(
        &mut self,
        student_id: &str,
        institute_id: Uuid,
    ) -> StoreResult<Vec<EnrollmentRef>>;

    /// Id of the active enrollment for the tuple, if any.
    async fn active_enrollment(
        &mut self,
        student_id: &str,
        program_id: &str,
        academic_year: &str,
    ) -> StoreResult<Option<String>>;

    async fn result(&mut self, result_id: &str) -> StoreResult<Option<OwnedRef>>;

    async fn degree(&mut self, degree_id: &str) -> StoreResult<Option<OwnedRef>>;

    /// Degree id already attached to an enrollment, if any.
    async fn degree_for_enrollment(&mut self, enrollment_id: &str) -> StoreResult<Option<String>>;
}

/// Write side of a session: create-or-update keyed on natural key.
#[async_trait]
pub trait Session: Catalog {
    async fn upsert_institution(&mut self, record: &Institution) -> StoreResult<Upsert>;
    async fn upsert_institute(&mut self, record: &Institute) -> StoreResult<Upsert>;
    async fn upsert_program(&mut self, record: &Program) -> StoreResult<Upsert>;
    async fn upsert_teacher(&mut self, record: &Teacher) -> StoreResult<Upsert>;
    async fn upsert_course(&mut self, record: &Course) -> StoreResult<Upsert>;
    async fn upsert_student(&mut self, record: &Student) -> StoreResult<Upsert>;
    async fn upsert_enrollment(&mut self, record: &Enrollment) -> StoreResult<Upsert>;
    async fn upsert_result(&mut self, record: &AcademicResult) -> StoreResult<Upsert>;
    async fn upsert_degree(&mut self, record: &Degree) -> StoreResult<Upsert>;
}

#[async_trait]
pub trait Store: Send + Sync {
    type Session: Session + 'static;

    /// Open the transaction for one file. Sessions for the same entity
    /// kind are serialized.
    async fn begin(&self, kind: EntityKind) -> StoreResult<Self::Session>;

    async fn commit(&self, session: Self::Session) -> StoreResult<()>;

    async fn rollback(&self, session: Self::Session) -> StoreResult<()>;

    /// Non-transactional lookup used to build a tenant context.
    async fn find_institution(&self, code: &str) -> StoreResult<Option<InstitutionRef>>;

    // === Audit trail ===
    async fn open_import(&self, record: &ImportRecord) -> StoreResult<()>;

    async fn close_import(
        &self,
        import_id: Uuid,
        status: ImportStatus,
        counts: Option<Counts>,
    ) -> StoreResult<()>;

    async fn append_log(&self, import_id: Uuid, entry: &LogEntry) -> StoreResult<()>;
}
