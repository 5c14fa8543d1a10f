//! Postgres store on sqlx.
//!
//! One session is one transaction. `begin` takes a transaction-scoped
//! advisory lock keyed on the entity kind, so two files of the same kind
//! never interleave; the lock is released on commit or rollback.

use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Postgres, Transaction};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::ingest::Counts;
use crate::model::{
    AcademicResult, Course, CourseRef, Degree, Enrollment, EnrollmentRef, EntityKind,
    ImportRecord, ImportStatus, Institute, InstituteRef, Institution, InstitutionRef, LogEntry,
    OwnedRef, Program, ProgramRef, Student, StudentRef, Teacher, TeacherRef, Upsert,
};
use crate::store::{Catalog, Session, Store};

pub const SCHEMA: &str = include_str!("../../sql/schema.sql");

const ENROLLMENT_REF: &str = r#"
    SELECT e.enrollment_id, e.student_id, e.program_id, e.institute_id,
           i.institution_id, e.academic_year
    FROM enrollments e
    JOIN institutes i ON i.institute_id = e.institute_id
"#;

#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(db_url: &str, max_connections: u32) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(db_url)
            .await?;
        Ok(Self { pool })
    }

    /// Create missing tables and indexes.
    pub async fn ensure_schema(&self) -> StoreResult<()> {
        sqlx::raw_sql(SCHEMA).execute(&self.pool).await?;
        Ok(())
    }
}

pub struct PgSession {
    tx: Transaction<'static, Postgres>,
}

impl PgSession {
    async fn exists(&mut self, sql: &'static str, key: &str) -> StoreResult<bool> {
        let row: Option<(i32,)> = sqlx::query_as(sql)
            .bind(key)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row.is_some())
    }
}

fn upsert_outcome(existed: bool) -> Upsert {
    if existed {
        Upsert::Updated
    } else {
        Upsert::Created
    }
}

/// Unique and foreign-key violations become conflicts; anything else
/// stays a database error.
fn write_error(e: sqlx::Error) -> StoreError {
    match &e {
        sqlx::Error::Database(db) if db.is_unique_violation() || db.is_foreign_key_violation() => {
            StoreError::Conflict(db.message().to_string())
        }
        _ => StoreError::Database(e),
    }
}

#[async_trait]
impl Store for PgStore {
    type Session = PgSession;

    async fn begin(&self, kind: EntityKind) -> StoreResult<PgSession> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(format!("loader:{}", kind))
            .execute(&mut *tx)
            .await?;
        Ok(PgSession { tx })
    }

    async fn commit(&self, session: PgSession) -> StoreResult<()> {
        session.tx.commit().await?;
        Ok(())
    }

    async fn rollback(&self, session: PgSession) -> StoreResult<()> {
        session.tx.rollback().await?;
        Ok(())
    }

    async fn find_institution(&self, code: &str) -> StoreResult<Option<InstitutionRef>> {
        let row = sqlx::query_as::<_, InstitutionRef>(
            "SELECT institution_id, code FROM institutions WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn open_import(&self, record: &ImportRecord) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO imports
            (import_id, file_name, content_hash, entity_kind, status, uploaded_by, institution_id, uploaded_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.import_id)
        .bind(&record.file_name)
        .bind(&record.content_hash)
        .bind(record.kind.as_str())
        .bind(ImportStatus::Pending.as_str())
        .bind(&record.uploaded_by)
        .bind(record.institution_id)
        .bind(record.uploaded_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn close_import(
        &self,
        import_id: Uuid,
        status: ImportStatus,
        counts: Option<Counts>,
    ) -> StoreResult<()> {
        sqlx::query(
            r#"
            UPDATE imports
            SET status = $2, finished_at = now(),
                created_count = $3, updated_count = $4, skipped_count = $5
            WHERE import_id = $1
            "#,
        )
        .bind(import_id)
        .bind(status.as_str())
        .bind(counts.map(|c| c.created as i64))
        .bind(counts.map(|c| c.updated as i64))
        .bind(counts.map(|c| c.skipped as i64))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn append_log(&self, import_id: Uuid, entry: &LogEntry) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO import_logs (import_id, message, is_error, created_at) VALUES ($1, $2, $3, $4)",
        )
        .bind(import_id)
        .bind(&entry.message)
        .bind(entry.is_error)
        .bind(entry.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl Catalog for PgSession {
    async fn institution(&mut self, code: &str) -> StoreResult<Option<InstitutionRef>> {
        let row = sqlx::query_as::<_, InstitutionRef>(
            "SELECT institution_id, code FROM institutions WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn institute(
        &mut self,
        institution_id: Uuid,
        acronym: &str,
    ) -> StoreResult<Option<InstituteRef>> {
        let row = sqlx::query_as::<_, InstituteRef>(
            "SELECT institute_id, institution_id, acronym FROM institutes WHERE institution_id = $1 AND acronym = $2",
        )
        .bind(institution_id)
        .bind(acronym)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn program(&mut self, program_id: &str) -> StoreResult<Option<ProgramRef>> {
        let row = sqlx::query_as::<_, ProgramRef>(
            r#"
            SELECT p.program_id, p.institute_id, i.institution_id
            FROM programs p
            JOIN institutes i ON i.institute_id = p.institute_id
            WHERE p.program_id = $1
            "#,
        )
        .bind(program_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn teacher(&mut self, teacher_id: &str) -> StoreResult<Option<TeacherRef>> {
        let row = sqlx::query_as::<_, TeacherRef>(
            r#"
            SELECT t.teacher_id, t.institute_id, i.institution_id
            FROM teachers t
            JOIN institutes i ON i.institute_id = t.institute_id
            WHERE t.teacher_id = $1
            "#,
        )
        .bind(teacher_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn course(&mut self, course_id: &str) -> StoreResult<Option<CourseRef>> {
        let row = sqlx::query_as::<_, CourseRef>(
            r#"
            SELECT c.course_id, c.program_id, i.institution_id
            FROM courses c
            JOIN programs p ON p.program_id = c.program_id
            JOIN institutes i ON i.institute_id = p.institute_id
            WHERE c.course_id = $1
            "#,
        )
        .bind(course_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn student(&mut self, student_id: &str) -> StoreResult<Option<StudentRef>> {
        let row = sqlx::query_as::<_, StudentRef>(
            "SELECT student_id, institution_id FROM students WHERE student_id = $1",
        )
        .bind(student_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn enrollment(&mut self, enrollment_id: &str) -> StoreResult<Option<EnrollmentRef>> {
        let sql = format!("{} WHERE e.enrollment_id = $1", ENROLLMENT_REF);
        let row = sqlx::query_as::<_, EnrollmentRef>(&sql)
            .bind(enrollment_id)
            .fetch_optional(&mut *self.tx)
            .await?;
        Ok(row)
    }

    async fn enrollments_of(
        &mut self,
        student_id: &str,
        institute_id: Uuid,
    ) -> StoreResult<Vec<EnrollmentRef>> {
        let sql = format!(
            "{} WHERE e.student_id = $1 AND e.institute_id = $2 ORDER BY e.enrollment_id",
            ENROLLMENT_REF
        );
        let rows = sqlx::query_as::<_, EnrollmentRef>(&sql)
            .bind(student_id)
            .bind(institute_id)
            .fetch_all(&mut *self.tx)
            .await?;
        Ok(rows)
    }

    async fn active_enrollment(
        &mut self,
        student_id: &str,
        program_id: &str,
        academic_year: &str,
    ) -> StoreResult<Option<String>> {
        let row: Option<(String,)> = sqlx::query_as(
            r#"
            SELECT enrollment_id FROM enrollments
            WHERE student_id = $1 AND program_id = $2 AND academic_year = $3
              AND status = 'active'
            LIMIT 1
            "#,
        )
        .bind(student_id)
        .bind(program_id)
        .bind(academic_year)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row.map(|r| r.0))
    }

    async fn result(&mut self, result_id: &str) -> StoreResult<Option<OwnedRef>> {
        let row = sqlx::query_as::<_, OwnedRef>(
            r#"
            SELECT r.result_id AS key, r.enrollment_id, i.institution_id
            FROM results r
            JOIN enrollments e ON e.enrollment_id = r.enrollment_id
            JOIN institutes i ON i.institute_id = e.institute_id
            WHERE r.result_id = $1
            "#,
        )
        .bind(result_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn degree(&mut self, degree_id: &str) -> StoreResult<Option<OwnedRef>> {
        let row = sqlx::query_as::<_, OwnedRef>(
            r#"
            SELECT d.degree_id AS key, d.enrollment_id, i.institution_id
            FROM degrees d
            JOIN enrollments e ON e.enrollment_id = d.enrollment_id
            JOIN institutes i ON i.institute_id = e.institute_id
            WHERE d.degree_id = $1
            "#,
        )
        .bind(degree_id)
        .fetch_optional(&mut *self.tx)
        .await?;
        Ok(row)
    }

    async fn degree_for_enrollment(&mut self, enrollment_id: &str) -> StoreResult<Option<String>> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT degree_id FROM degrees WHERE enrollment_id = $1")
                .bind(enrollment_id)
                .fetch_optional(&mut *self.tx)
                .await?;
        Ok(row.map(|r| r.0))
    }
}

#[async_trait]
impl Session for PgSession {
    async fn upsert_institution(&mut self, record: &Institution) -> StoreResult<Upsert> {
        let existed = self
            .exists("SELECT 1 FROM institutions WHERE code = $1", &record.code)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO institutions (institution_id, code, name, kind, city)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (code) DO UPDATE
            SET name = EXCLUDED.name, kind = EXCLUDED.kind, city = EXCLUDED.city,
                updated_at = now()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(&record.code)
        .bind(&record.name)
        .bind(&record.kind)
        .bind(&record.city)
        .execute(&mut *self.tx)
        .await
        .map_err(write_error)?;
        Ok(upsert_outcome(existed))
    }

    async fn upsert_institute(&mut self, record: &Institute) -> StoreResult<Upsert> {
        let existing: Option<(i32,)> = sqlx::query_as(
            "SELECT 1 FROM institutes WHERE institution_id = $1 AND acronym = $2",
        )
        .bind(record.institution_id)
        .bind(&record.acronym)
        .fetch_optional(&mut *self.tx)
        .await?;
        sqlx::query(
            r#"
            INSERT INTO institutes (institute_id, institution_id, acronym, name)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (institution_id, acronym) DO UPDATE
            SET name = EXCLUDED.name, updated_at = now()
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(record.institution_id)
        .bind(&record.acronym)
        .bind(&record.name)
        .execute(&mut *self.tx)
        .await
        .map_err(write_error)?;
        Ok(upsert_outcome(existing.is_some()))
    }

    async fn upsert_program(&mut self, record: &Program) -> StoreResult<Upsert> {
        let existed = self
            .exists("SELECT 1 FROM programs WHERE program_id = $1", &record.program_id)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO programs (program_id, institute_id, name, domain, level)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (program_id) DO UPDATE
            SET institute_id = EXCLUDED.institute_id, name = EXCLUDED.name,
                domain = EXCLUDED.domain, level = EXCLUDED.level, updated_at = now()
            "#,
        )
        .bind(&record.program_id)
        .bind(record.institute_id)
        .bind(&record.name)
        .bind(&record.domain)
        .bind(&record.level)
        .execute(&mut *self.tx)
        .await
        .map_err(write_error)?;
        Ok(upsert_outcome(existed))
    }

    async fn upsert_teacher(&mut self, record: &Teacher) -> StoreResult<Upsert> {
        let existed = self
            .exists("SELECT 1 FROM teachers WHERE teacher_id = $1", &record.teacher_id)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO teachers (teacher_id, institute_id, first_name, last_name, grade, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (teacher_id) DO UPDATE
            SET institute_id = EXCLUDED.institute_id, first_name = EXCLUDED.first_name,
                last_name = EXCLUDED.last_name, grade = EXCLUDED.grade,
                status = EXCLUDED.status, updated_at = now()
            "#,
        )
        .bind(&record.teacher_id)
        .bind(record.institute_id)
        .bind(&record.first_name)
        .bind(&record.last_name)
        .bind(record.grade.as_str())
        .bind(record.status.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(write_error)?;
        Ok(upsert_outcome(existed))
    }

    async fn upsert_course(&mut self, record: &Course) -> StoreResult<Upsert> {
        let existed = self
            .exists("SELECT 1 FROM courses WHERE course_id = $1", &record.course_id)
            .await?;
        let credits = i32::try_from(record.credits)
            .map_err(|_| StoreError::Conflict(format!("credits {} out of range", record.credits)))?;
        sqlx::query(
            r#"
            INSERT INTO courses (course_id, program_id, teacher_id, code, name, credits, semester)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (course_id) DO UPDATE
            SET program_id = EXCLUDED.program_id, teacher_id = EXCLUDED.teacher_id,
                code = EXCLUDED.code, name = EXCLUDED.name, credits = EXCLUDED.credits,
                semester = EXCLUDED.semester, updated_at = now()
            "#,
        )
        .bind(&record.course_id)
        .bind(&record.program_id)
        .bind(&record.teacher_id)
        .bind(&record.code)
        .bind(&record.name)
        .bind(credits)
        .bind(&record.semester)
        .execute(&mut *self.tx)
        .await
        .map_err(write_error)?;
        Ok(upsert_outcome(existed))
    }

    /// An existing owner is never replaced.
    async fn upsert_student(&mut self, record: &Student) -> StoreResult<Upsert> {
        let existed = self
            .exists("SELECT 1 FROM students WHERE student_id = $1", &record.student_id)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO students (student_id, institution_id, first_name, last_name, gender, birth_date)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (student_id) DO UPDATE
            SET institution_id = COALESCE(students.institution_id, EXCLUDED.institution_id),
                first_name = EXCLUDED.first_name, last_name = EXCLUDED.last_name,
                gender = EXCLUDED.gender, birth_date = EXCLUDED.birth_date,
                updated_at = now()
            "#,
        )
        .bind(&record.student_id)
        .bind(record.institution_id)
        .bind(&record.first_name)
        .bind(&record.last_name)
        .bind(record.gender.as_str())
        .bind(record.birth_date)
        .execute(&mut *self.tx)
        .await
        .map_err(write_error)?;
        Ok(upsert_outcome(existed))
    }

    async fn upsert_enrollment(&mut self, record: &Enrollment) -> StoreResult<Upsert> {
        let existed = self
            .exists(
                "SELECT 1 FROM enrollments WHERE enrollment_id = $1",
                &record.enrollment_id,
            )
            .await?;
        sqlx::query(
            r#"
            INSERT INTO enrollments
            (enrollment_id, student_id, program_id, institute_id, academic_year, status)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (enrollment_id) DO UPDATE
            SET student_id = EXCLUDED.student_id, program_id = EXCLUDED.program_id,
                institute_id = EXCLUDED.institute_id, academic_year = EXCLUDED.academic_year,
                status = EXCLUDED.status, updated_at = now()
            "#,
        )
        .bind(&record.enrollment_id)
        .bind(&record.student_id)
        .bind(&record.program_id)
        .bind(record.institute_id)
        .bind(&record.academic_year)
        .bind(record.status.as_str())
        .execute(&mut *self.tx)
        .await
        .map_err(write_error)?;
        Ok(upsert_outcome(existed))
    }

    async fn upsert_result(&mut self, record: &AcademicResult) -> StoreResult<Upsert> {
        let existed = self
            .exists("SELECT 1 FROM results WHERE result_id = $1", &record.result_id)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO results (result_id, enrollment_id, course_id, academic_year, session, note)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (result_id) DO UPDATE
            SET enrollment_id = EXCLUDED.enrollment_id, course_id = EXCLUDED.course_id,
                academic_year = EXCLUDED.academic_year, session = EXCLUDED.session,
                note = EXCLUDED.note, updated_at = now()
            "#,
        )
        .bind(&record.result_id)
        .bind(&record.enrollment_id)
        .bind(&record.course_id)
        .bind(&record.academic_year)
        .bind(record.session.as_str())
        .bind(record.note)
        .execute(&mut *self.tx)
        .await
        .map_err(write_error)?;
        Ok(upsert_outcome(existed))
    }

    async fn upsert_degree(&mut self, record: &Degree) -> StoreResult<Upsert> {
        let existed = self
            .exists("SELECT 1 FROM degrees WHERE degree_id = $1", &record.degree_id)
            .await?;
        sqlx::query(
            r#"
            INSERT INTO degrees (degree_id, enrollment_id, date_awarded, degree_type, name)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (degree_id) DO UPDATE
            SET enrollment_id = EXCLUDED.enrollment_id, date_awarded = EXCLUDED.date_awarded,
                degree_type = EXCLUDED.degree_type, name = EXCLUDED.name, updated_at = now()
            "#,
        )
        .bind(&record.degree_id)
        .bind(&record.enrollment_id)
        .bind(record.date_awarded)
        .bind(record.degree_type.as_str())
        .bind(&record.name)
        .execute(&mut *self.tx)
        .await
        .map_err(write_error)?;
        Ok(upsert_outcome(existed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_carries_uniqueness_invariants() {
        assert!(SCHEMA.contains("UNIQUE (institution_id, acronym)"));
        assert!(SCHEMA.contains("enrollments_one_active"));
        assert!(SCHEMA.contains("WHERE status = 'active'"));
        assert!(SCHEMA.contains("enrollment_id   TEXT NOT NULL UNIQUE"));
    }

    #[test]
    fn test_upsert_outcome() {
        assert_eq!(upsert_outcome(true), Upsert::Updated);
        assert_eq!(upsert_outcome(false), Upsert::Created);
    }
}
