use async_trait::async_trait;
use serde::Deserialize;

use super::{expected, in_use, optional, parse_date, require, unknown_institute, Entity, Resolved};
use crate::error::StoreResult;
use crate::model::{Degree, DegreeType, EntityKind, Upsert};
use crate::schema::Column;
use crate::store::Session;
use crate::tenant::{self, TenantContext};

#[derive(Debug, Clone, Deserialize)]
pub struct DegreeRow {
    pub degree_id: String,
    pub student_id: String,
    pub institute_acronym: String,
    #[serde(alias = "date_awarded (yyyy-mm-dd)")]
    pub date_awarded: String,
    pub degree_type: String,
    pub name: String,
}

pub struct Degrees;

#[async_trait]
impl Entity for Degrees {
    type Row = DegreeRow;
    type Record = Degree;

    const KIND: EntityKind = EntityKind::Degrees;
    const COLUMNS: &'static [Column] = &[
        Column::required("degree_id"),
        Column::required("student_id"),
        Column::required("institute_acronym"),
        Column::required("date_awarded").aka(&["date_awarded (yyyy-mm-dd)"]),
        Column::required("degree_type"),
        Column::required("name"),
    ];

    fn natural_key(row: &DegreeRow) -> &str {
        &row.degree_id
    }

    fn check(row: &DegreeRow) -> Vec<String> {
        let mut errors = Vec::new();
        require(&mut errors, "degree_id", &row.degree_id);
        require(&mut errors, "student_id", &row.student_id);
        require(&mut errors, "institute_acronym", &row.institute_acronym);
        require(&mut errors, "name", &row.name);
        let date = row.date_awarded.trim();
        if date.is_empty() {
            errors.push("Missing date_awarded".into());
        } else if parse_date(date).is_none() {
            errors.push(format!(
                "Invalid date_awarded '{}' (expected YYYY-MM-DD).",
                date
            ));
        }
        if DegreeType::parse(&row.degree_type).is_none() {
            errors.push(format!(
                "Invalid degree_type '{}' (expected {}).",
                row.degree_type.trim(),
                expected(DegreeType::VALUES)
            ));
        }
        errors
    }

    /// Degrees carry no year; the student's latest enrollment at the
    /// institute is the one awarded. A student without one is skipped at
    /// ingestion.
    async fn resolve(
        row: &DegreeRow,
        tenant: &TenantContext,
        session: &mut dyn Session,
    ) -> StoreResult<Resolved<Degree>> {
        let mut resolved = Resolved::default();
        let degree_id = row.degree_id.trim();

        let institute = tenant::institute(session, tenant, &row.institute_acronym).await?;
        let institute = resolved.found(&row.institute_acronym, institute, || {
            unknown_institute(&row.institute_acronym)
        });

        let student = tenant::student(session, tenant, &row.student_id).await?;
        let student = resolved.found(&row.student_id, student, || {
            format!("Student '{}' not found.", row.student_id.trim())
        });

        let enrollment = match (&institute, &student) {
            (Some(institute), Some(student)) => {
                let found =
                    tenant::enrollment_for(session, tenant, &student.student_id, institute, None)
                        .await?;
                resolved.defer(&row.student_id, found, || {
                    format!(
                        "No enrollment found for student '{}' at institute '{}'.",
                        student.student_id, institute.acronym
                    )
                })
            }
            _ => None,
        };

        if let Some(existing) = session.degree(degree_id).await? {
            if !tenant.owns(existing.institution_id) {
                resolved.reject(in_use("degree_id", degree_id));
            }
        }

        if let Some(enrollment) = &enrollment {
            let awarded = session.degree_for_enrollment(&enrollment.enrollment_id).await?;
            if let Some(other) = awarded.filter(|other| other != degree_id) {
                let message = format!(
                    "Enrollment '{}' already has degree '{}'.",
                    enrollment.enrollment_id, other
                );
                resolved.held_by(other, message);
            }
        }

        let record = enrollment.and_then(|enrollment| {
            Some(Degree {
                degree_id: optional(degree_id)?,
                enrollment_id: enrollment.enrollment_id,
                date_awarded: parse_date(&row.date_awarded)?,
                degree_type: DegreeType::parse(&row.degree_type)?,
                name: optional(&row.name)?,
            })
        });
        Ok(resolved.with_record(record))
    }

    fn exclusive_key(record: &Degree) -> Option<String> {
        Some(format!("Degree for enrollment '{}'", record.enrollment_id))
    }

    async fn upsert(record: &Degree, session: &mut dyn Session) -> StoreResult<Upsert> {
        session.upsert_degree(record).await
    }
}
