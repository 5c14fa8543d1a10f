use async_trait::async_trait;
use serde::Deserialize;

use super::{
    check_academic_year, expected, in_use, normalize_year, require, unknown_institute,
    valid_academic_year, Entity, Resolved,
};
use crate::error::StoreResult;
use crate::model::{Enrollment, EnrollmentStatus, EntityKind, Upsert};
use crate::schema::Column;
use crate::store::Session;
use crate::tenant::{self, TenantContext};

#[derive(Debug, Clone, Deserialize)]
pub struct EnrollmentRow {
    pub enrollment_id: String,
    pub student_id: String,
    pub program_id: String,
    pub institute_acronym: String,
    pub academic_year: String,
    pub status: String,
}

pub struct Enrollments;

/// A blank status means the enrollment is active.
fn status(raw: &str) -> Option<EnrollmentStatus> {
    if raw.trim().is_empty() {
        Some(EnrollmentStatus::Active)
    } else {
        EnrollmentStatus::parse(raw)
    }
}

#[async_trait]
impl Entity for Enrollments {
    type Row = EnrollmentRow;
    type Record = Enrollment;

    const KIND: EntityKind = EntityKind::Enrollments;
    const COLUMNS: &'static [Column] = &[
        Column::required("enrollment_id"),
        Column::required("student_id"),
        Column::required("program_id"),
        Column::required("institute_acronym"),
        Column::required("academic_year"),
        Column::required("status"),
    ];

    fn natural_key(row: &EnrollmentRow) -> &str {
        &row.enrollment_id
    }

    fn check(row: &EnrollmentRow) -> Vec<String> {
        let mut errors = Vec::new();
        require(&mut errors, "enrollment_id", &row.enrollment_id);
        require(&mut errors, "student_id", &row.student_id);
        require(&mut errors, "program_id", &row.program_id);
        require(&mut errors, "institute_acronym", &row.institute_acronym);
        check_academic_year(&mut errors, &row.academic_year);
        if status(&row.status).is_none() {
            errors.push(format!(
                "Invalid status '{}' (expected {}).",
                row.status.trim(),
                expected(EnrollmentStatus::VALUES)
            ));
        }
        errors
    }

    async fn resolve(
        row: &EnrollmentRow,
        tenant: &TenantContext,
        session: &mut dyn Session,
    ) -> StoreResult<Resolved<Enrollment>> {
        let mut resolved = Resolved::default();
        let enrollment_id = row.enrollment_id.trim();
        let academic_year = normalize_year(&row.academic_year);

        let student = tenant::student(session, tenant, &row.student_id).await?;
        let student = resolved.found(&row.student_id, student, || {
            format!("Student '{}' not found.", row.student_id.trim())
        });
        let program = tenant::program(session, tenant, &row.program_id).await?;
        let program = resolved.found(&row.program_id, program, || {
            format!("Program '{}' does not exist.", row.program_id.trim())
        });
        let institute = tenant::institute(session, tenant, &row.institute_acronym).await?;
        let institute = resolved.found(&row.institute_acronym, institute, || {
            unknown_institute(&row.institute_acronym)
        });

        if let Some(existing) = session.enrollment(enrollment_id).await? {
            if !tenant.owns(existing.institution_id) {
                resolved.reject(in_use("enrollment_id", enrollment_id));
            }
        }

        let status = status(&row.status);
        if let (Some(EnrollmentStatus::Active), Some(student), Some(program)) =
            (status, &student, &program)
        {
            if valid_academic_year(&academic_year) {
                let active = session
                    .active_enrollment(&student.student_id, &program.program_id, &academic_year)
                    .await?;
                if let Some(other) = active.filter(|other| other != enrollment_id) {
                    let message = format!(
                        "Student '{}' already has an active enrollment ('{}') in program '{}' for {}.",
                        student.student_id, other, program.program_id, academic_year
                    );
                    resolved.held_by(other, message);
                }
            }
        }

        let record = match (student, program, institute, status) {
            (Some(student), Some(program), Some(institute), Some(status))
                if !enrollment_id.is_empty() && valid_academic_year(&academic_year) =>
            {
                Some(Enrollment {
                    enrollment_id: enrollment_id.to_string(),
                    student_id: student.student_id,
                    program_id: program.program_id,
                    institute_id: institute.institute_id,
                    academic_year,
                    status,
                })
            }
            _ => None,
        };
        Ok(resolved.with_record(record))
    }

    fn exclusive_key(record: &Enrollment) -> Option<String> {
        (record.status == EnrollmentStatus::Active).then(|| {
            format!(
                "Active enrollment of student '{}' in program '{}' for {}",
                record.student_id, record.program_id, record.academic_year
            )
        })
    }

    async fn upsert(record: &Enrollment, session: &mut dyn Session) -> StoreResult<Upsert> {
        session.upsert_enrollment(record).await
    }
}
