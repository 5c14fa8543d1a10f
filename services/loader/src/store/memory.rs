//! In-memory store.
//!
//! A session clones the tables under an exclusive lock and works on the
//! copy; commit swaps the copy in, rollback drops it. Sessions are fully
//! serialized, which is stricter than the per-kind locking of Postgres.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};
use uuid::Uuid;

use crate::error::{StoreError, StoreResult};
use crate::ingest::Counts;
use crate::model::{
    AcademicResult, Course, CourseRef, Degree, Enrollment, EnrollmentRef, EnrollmentStatus,
    EntityKind, ImportRecord, ImportStatus, Institute, InstituteRef, Institution,
    InstitutionRef, LogEntry, OwnedRef, Program, ProgramRef, Student, StudentRef, Teacher,
    TeacherRef, Upsert,
};
use crate::store::{Catalog, Session, Store};

#[derive(Debug, Clone, Default)]
pub struct Tables {
    /// code -> (id, record)
    pub institutions: BTreeMap<String, (Uuid, Institution)>,
    /// (institution id, acronym) -> (id, record)
    pub institutes: BTreeMap<(Uuid, String), (Uuid, Institute)>,
    pub programs: BTreeMap<String, Program>,
    pub teachers: BTreeMap<String, Teacher>,
    pub courses: BTreeMap<String, Course>,
    pub students: BTreeMap<String, Student>,
    pub enrollments: BTreeMap<String, Enrollment>,
    pub results: BTreeMap<String, AcademicResult>,
    pub degrees: BTreeMap<String, Degree>,
}

impl Tables {
    fn institution_of_institute(&self, institute_id: Uuid) -> Option<Uuid> {
        self.institutes
            .values()
            .find(|(id, _)| *id == institute_id)
            .map(|(_, institute)| institute.institution_id)
    }

    fn program_ref(&self, program_id: &str) -> Option<ProgramRef> {
        let program = self.programs.get(program_id)?;
        Some(ProgramRef {
            program_id: program.program_id.clone(),
            institute_id: program.institute_id,
            institution_id: self.institution_of_institute(program.institute_id)?,
        })
    }

    fn enrollment_ref(&self, enrollment: &Enrollment) -> Option<EnrollmentRef> {
        Some(EnrollmentRef {
            enrollment_id: enrollment.enrollment_id.clone(),
            student_id: enrollment.student_id.clone(),
            program_id: enrollment.program_id.clone(),
            institute_id: enrollment.institute_id,
            institution_id: self.institution_of_institute(enrollment.institute_id)?,
            academic_year: enrollment.academic_year.clone(),
        })
    }

    fn enrollment_owner(&self, enrollment_id: &str) -> Option<Uuid> {
        let enrollment = self.enrollments.get(enrollment_id)?;
        self.institution_of_institute(enrollment.institute_id)
    }

    fn ensure_institute(&self, institute_id: Uuid) -> StoreResult<()> {
        self.institution_of_institute(institute_id)
            .map(|_| ())
            .ok_or_else(|| dangling("institute", institute_id.to_string()))
    }
}

fn dangling(kind: &'static str, key: impl Into<String>) -> StoreError {
    StoreError::Dangling {
        kind,
        key: key.into(),
    }
}

fn put<V>(map: &mut BTreeMap<String, V>, key: &str, value: V) -> Upsert {
    match map.insert(key.to_string(), value) {
        Some(_) => Upsert::Updated,
        None => Upsert::Created,
    }
}

/// Audit trail of one processed file.
#[derive(Debug, Clone, PartialEq)]
pub struct AuditedImport {
    pub record: ImportRecord,
    pub status: ImportStatus,
    pub counts: Option<Counts>,
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    audit: Arc<std::sync::Mutex<Vec<AuditedImport>>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy of the committed state.
    pub async fn snapshot(&self) -> Tables {
        self.tables.lock().await.clone()
    }

    pub fn imports(&self) -> Vec<AuditedImport> {
        self.audit_log().clone()
    }

    fn audit_log(&self) -> std::sync::MutexGuard<'_, Vec<AuditedImport>> {
        self.audit.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

pub struct MemorySession {
    guard: OwnedMutexGuard<Tables>,
    working: Tables,
}

#[async_trait]
impl Store for MemoryStore {
    type Session = MemorySession;

    async fn begin(&self, kind: EntityKind) -> StoreResult<MemorySession> {
        let guard = Arc::clone(&self.tables).lock_owned().await;
        tracing::trace!(%kind, "memory session opened");
        let working = guard.clone();
        Ok(MemorySession { guard, working })
    }

    async fn commit(&self, session: MemorySession) -> StoreResult<()> {
        let MemorySession { mut guard, working } = session;
        *guard = working;
        Ok(())
    }

    async fn rollback(&self, session: MemorySession) -> StoreResult<()> {
        drop(session);
        Ok(())
    }

    async fn find_institution(&self, code: &str) -> StoreResult<Option<InstitutionRef>> {
        let tables = self.tables.lock().await;
        Ok(tables.institutions.get(code).map(|(id, institution)| InstitutionRef {
            institution_id: *id,
            code: institution.code.clone(),
        }))
    }

    async fn open_import(&self, record: &ImportRecord) -> StoreResult<()> {
        self.audit_log().push(AuditedImport {
            record: record.clone(),
            status: ImportStatus::Pending,
            counts: None,
            logs: Vec::new(),
        });
        Ok(())
    }

    async fn close_import(
        &self,
        import_id: Uuid,
        status: ImportStatus,
        counts: Option<Counts>,
    ) -> StoreResult<()> {
        let mut audit = self.audit_log();
        let import = audit
            .iter_mut()
            .find(|i| i.record.import_id == import_id)
            .ok_or_else(|| dangling("import", import_id.to_string()))?;
        import.status = status;
        import.counts = counts;
        Ok(())
    }

    async fn append_log(&self, import_id: Uuid, entry: &LogEntry) -> StoreResult<()> {
        let mut audit = self.audit_log();
        let import = audit
            .iter_mut()
            .find(|i| i.record.import_id == import_id)
            .ok_or_else(|| dangling("import", import_id.to_string()))?;
        import.logs.push(entry.clone());
        Ok(())
    }
}

#[async_trait]
impl Catalog for MemorySession {
    async fn institution(&mut self, code: &str) -> StoreResult<Option<InstitutionRef>> {
        Ok(self
            .working
            .institutions
            .get(code)
            .map(|(id, institution)| InstitutionRef {
                institution_id: *id,
                code: institution.code.clone(),
            }))
    }

    async fn institute(
        &mut self,
        institution_id: Uuid,
        acronym: &str,
    ) -> StoreResult<Option<InstituteRef>> {
        Ok(self
            .working
            .institutes
            .get(&(institution_id, acronym.to_string()))
            .map(|(id, institute)| InstituteRef {
                institute_id: *id,
                institution_id: institute.institution_id,
                acronym: institute.acronym.clone(),
            }))
    }

    async fn program(&mut self, program_id: &str) -> StoreResult<Option<ProgramRef>> {
        Ok(self.working.program_ref(program_id))
    }

    async fn teacher(&mut self, teacher_id: &str) -> StoreResult<Option<TeacherRef>> {
        let tables = &self.working;
        Ok(tables.teachers.get(teacher_id).and_then(|teacher| {
            Some(TeacherRef {
                teacher_id: teacher.teacher_id.clone(),
                institute_id: teacher.institute_id,
                institution_id: tables.institution_of_institute(teacher.institute_id)?,
            })
        }))
    }

    async fn course(&mut self, course_id: &str) -> StoreResult<Option<CourseRef>> {
        let tables = &self.working;
        Ok(tables.courses.get(course_id).and_then(|course| {
            Some(CourseRef {
                course_id: course.course_id.clone(),
                program_id: course.program_id.clone(),
                institution_id: tables.program_ref(&course.program_id)?.institution_id,
            })
        }))
    }

    async fn student(&mut self, student_id: &str) -> StoreResult<Option<StudentRef>> {
        Ok(self.working.students.get(student_id).map(|student| StudentRef {
            student_id: student.student_id.clone(),
            institution_id: student.institution_id,
        }))
    }

    async fn enrollment(&mut self, enrollment_id: &str) -> StoreResult<Option<EnrollmentRef>> {
        let tables = &self.working;
        Ok(tables
            .enrollments
            .get(enrollment_id)
            .and_then(|e| tables.enrollment_ref(e)))
    }

    async fn enrollments_of(
        &mut self,
        student_id: &str,
        institute_id: Uuid,
    ) -> StoreResult<Vec<EnrollmentRef>> {
        let tables = &self.working;
        Ok(tables
            .enrollments
            .values()
            .filter(|e| e.student_id == student_id && e.institute_id == institute_id)
            .filter_map(|e| tables.enrollment_ref(e))
            .collect())
    }

    async fn active_enrollment(
        &mut self,
        student_id: &str,
        program_id: &str,
        academic_year: &str,
    ) -> StoreResult<Option<String>> {
        Ok(self
            .working
            .enrollments
            .values()
            .find(|e| {
                e.status == EnrollmentStatus::Active
                    && e.student_id == student_id
                    && e.program_id == program_id
                    && e.academic_year == academic_year
            })
            .map(|e| e.enrollment_id.clone()))
    }

    async fn result(&mut self, result_id: &str) -> StoreResult<Option<OwnedRef>> {
        let tables = &self.working;
        Ok(tables.results.get(result_id).and_then(|r| {
            Some(OwnedRef {
                key: r.result_id.clone(),
                enrollment_id: r.enrollment_id.clone(),
                institution_id: tables.enrollment_owner(&r.enrollment_id)?,
            })
        }))
    }

    async fn degree(&mut self, degree_id: &str) -> StoreResult<Option<OwnedRef>> {
        let tables = &self.working;
        Ok(tables.degrees.get(degree_id).and_then(|d| {
            Some(OwnedRef {
                key: d.degree_id.clone(),
                enrollment_id: d.enrollment_id.clone(),
                institution_id: tables.enrollment_owner(&d.enrollment_id)?,
            })
        }))
    }

    async fn degree_for_enrollment(&mut self, enrollment_id: &str) -> StoreResult<Option<String>> {
        Ok(self
            .working
            .degrees
            .values()
            .find(|d| d.enrollment_id == enrollment_id)
            .map(|d| d.degree_id.clone()))
    }
}

#[async_trait]
impl Session for MemorySession {
    async fn upsert_institution(&mut self, record: &Institution) -> StoreResult<Upsert> {
        let institutions = &mut self.working.institutions;
        match institutions.get_mut(&record.code) {
            Some((_, existing)) => {
                *existing = record.clone();
                Ok(Upsert::Updated)
            }
            None => {
                institutions.insert(record.code.clone(), (Uuid::new_v4(), record.clone()));
                Ok(Upsert::Created)
            }
        }
    }

    async fn upsert_institute(&mut self, record: &Institute) -> StoreResult<Upsert> {
        if !self
            .working
            .institutions
            .values()
            .any(|(id, _)| *id == record.institution_id)
        {
            return Err(dangling("institution", record.institution_id.to_string()));
        }
        let key = (record.institution_id, record.acronym.clone());
        match self.working.institutes.get_mut(&key) {
            Some((_, existing)) => {
                *existing = record.clone();
                Ok(Upsert::Updated)
            }
            None => {
                self.working
                    .institutes
                    .insert(key, (Uuid::new_v4(), record.clone()));
                Ok(Upsert::Created)
            }
        }
    }

    async fn upsert_program(&mut self, record: &Program) -> StoreResult<Upsert> {
        self.working.ensure_institute(record.institute_id)?;
        Ok(put(&mut self.working.programs, &record.program_id, record.clone()))
    }

    async fn upsert_teacher(&mut self, record: &Teacher) -> StoreResult<Upsert> {
        self.working.ensure_institute(record.institute_id)?;
        Ok(put(&mut self.working.teachers, &record.teacher_id, record.clone()))
    }

    async fn upsert_course(&mut self, record: &Course) -> StoreResult<Upsert> {
        if !self.working.programs.contains_key(&record.program_id) {
            return Err(dangling("program", &record.program_id));
        }
        if let Some(teacher_id) = &record.teacher_id {
            if !self.working.teachers.contains_key(teacher_id) {
                return Err(dangling("teacher", teacher_id));
            }
        }
        Ok(put(&mut self.working.courses, &record.course_id, record.clone()))
    }

    async fn upsert_student(&mut self, record: &Student) -> StoreResult<Upsert> {
        let mut record = record.clone();
        // First owner wins.
        if let Some(existing) = self.working.students.get(&record.student_id) {
            record.institution_id = existing.institution_id.or(record.institution_id);
        }
        let key = record.student_id.clone();
        Ok(put(&mut self.working.students, &key, record))
    }

    async fn upsert_enrollment(&mut self, record: &Enrollment) -> StoreResult<Upsert> {
        let tables = &self.working;
        if !tables.students.contains_key(&record.student_id) {
            return Err(dangling("student", &record.student_id));
        }
        if !tables.programs.contains_key(&record.program_id) {
            return Err(dangling("program", &record.program_id));
        }
        tables.ensure_institute(record.institute_id)?;
        if record.status == EnrollmentStatus::Active {
            let clash = tables.enrollments.values().find(|e| {
                e.enrollment_id != record.enrollment_id
                    && e.status == EnrollmentStatus::Active
                    && e.student_id == record.student_id
                    && e.program_id == record.program_id
                    && e.academic_year == record.academic_year
            });
            if let Some(other) = clash {
                return Err(StoreError::Conflict(format!(
                    "enrollment '{}' is already active for student '{}' in program '{}' for {}",
                    other.enrollment_id, record.student_id, record.program_id, record.academic_year
                )));
            }
        }
        Ok(put(
            &mut self.working.enrollments,
            &record.enrollment_id,
            record.clone(),
        ))
    }

    async fn upsert_result(&mut self, record: &AcademicResult) -> StoreResult<Upsert> {
        if !self.working.enrollments.contains_key(&record.enrollment_id) {
            return Err(dangling("enrollment", &record.enrollment_id));
        }
        if !self.working.courses.contains_key(&record.course_id) {
            return Err(dangling("course", &record.course_id));
        }
        Ok(put(&mut self.working.results, &record.result_id, record.clone()))
    }

    async fn upsert_degree(&mut self, record: &Degree) -> StoreResult<Upsert> {
        if !self.working.enrollments.contains_key(&record.enrollment_id) {
            return Err(dangling("enrollment", &record.enrollment_id));
        }
        let clash = self
            .working
            .degrees
            .values()
            .find(|d| d.enrollment_id == record.enrollment_id && d.degree_id != record.degree_id);
        if let Some(other) = clash {
            return Err(StoreError::Conflict(format!(
                "enrollment '{}' already has degree '{}'",
                record.enrollment_id, other.degree_id
            )));
        }
        Ok(put(&mut self.working.degrees, &record.degree_id, record.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn institution(code: &str) -> Institution {
        Institution {
            code: code.into(),
            name: format!("University {}", code),
            kind: String::new(),
            city: String::new(),
        }
    }

    #[tokio::test]
    async fn test_rollback_discards_writes() {
        let store = MemoryStore::new();
        let mut session = store.begin(EntityKind::Institutions).await.unwrap();
        session.upsert_institution(&institution("UA")).await.unwrap();
        store.rollback(session).await.unwrap();
        assert!(store.find_institution("UA").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_commit_publishes_writes() {
        let store = MemoryStore::new();
        let mut session = store.begin(EntityKind::Institutions).await.unwrap();
        assert_eq!(
            session.upsert_institution(&institution("UA")).await.unwrap(),
            Upsert::Created
        );
        assert_eq!(
            session.upsert_institution(&institution("UA")).await.unwrap(),
            Upsert::Updated
        );
        store.commit(session).await.unwrap();
        assert!(store.find_institution("UA").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_program_requires_existing_institute() {
        let store = MemoryStore::new();
        let mut session = store.begin(EntityKind::Programs).await.unwrap();
        let err = session
            .upsert_program(&Program {
                program_id: "P1".into(),
                institute_id: Uuid::new_v4(),
                name: "Informatique".into(),
                domain: "Sciences".into(),
                level: "Licence".into(),
            })
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Dangling { kind: "institute", .. }));
    }

    #[tokio::test]
    async fn test_student_keeps_first_owner() {
        let store = MemoryStore::new();
        let first = Uuid::new_v4();
        let mut session = store.begin(EntityKind::Students).await.unwrap();
        let mut student = Student {
            student_id: "S1".into(),
            institution_id: Some(first),
            first_name: "Amina".into(),
            last_name: "Diallo".into(),
            gender: crate::model::Gender::F,
            birth_date: None,
        };
        session.upsert_student(&student).await.unwrap();
        student.institution_id = Some(Uuid::new_v4());
        session.upsert_student(&student).await.unwrap();
        let owner = session.student("S1").await.unwrap().unwrap().institution_id;
        assert_eq!(owner, Some(first));
    }
}
