use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use super::{expected, in_use, optional, require, unknown_institute, Entity, Resolved};
use crate::error::StoreResult;
use crate::model::{EntityKind, Teacher, TeacherGrade, TeacherStatus, Upsert};
use crate::schema::Column;
use crate::store::Session;
use crate::tenant::{self, TenantContext};

#[derive(Debug, Clone, Deserialize)]
pub struct TeacherRow {
    pub teacher_id: String,
    pub first_name: String,
    pub last_name: String,
    pub grade: String,
    pub status: String,
    pub institute_acronym: String,
}

pub struct Teachers;

fn record(row: &TeacherRow, institute_id: Uuid) -> Option<Teacher> {
    Some(Teacher {
        teacher_id: optional(&row.teacher_id)?,
        institute_id,
        first_name: optional(&row.first_name)?,
        last_name: optional(&row.last_name)?,
        grade: TeacherGrade::parse(&row.grade)?,
        status: TeacherStatus::parse(&row.status)?,
    })
}

#[async_trait]
impl Entity for Teachers {
    type Row = TeacherRow;
    type Record = Teacher;

    const KIND: EntityKind = EntityKind::Teachers;
    const COLUMNS: &'static [Column] = &[
        Column::required("teacher_id"),
        Column::required("first_name"),
        Column::required("last_name"),
        Column::required("grade"),
        Column::required("status"),
        Column::required("institute_acronym"),
    ];

    fn natural_key(row: &TeacherRow) -> &str {
        &row.teacher_id
    }

    fn check(row: &TeacherRow) -> Vec<String> {
        let mut errors = Vec::new();
        require(&mut errors, "teacher_id", &row.teacher_id);
        require(&mut errors, "first_name", &row.first_name);
        require(&mut errors, "last_name", &row.last_name);
        require(&mut errors, "institute_acronym", &row.institute_acronym);
        if TeacherGrade::parse(&row.grade).is_none() {
            errors.push(format!(
                "Invalid grade '{}' (expected {}).",
                row.grade.trim(),
                expected(TeacherGrade::VALUES)
            ));
        }
        if TeacherStatus::parse(&row.status).is_none() {
            errors.push(format!(
                "Invalid status '{}' (expected {}).",
                row.status.trim(),
                expected(TeacherStatus::VALUES)
            ));
        }
        errors
    }

    async fn resolve(
        row: &TeacherRow,
        tenant: &TenantContext,
        session: &mut dyn Session,
    ) -> StoreResult<Resolved<Teacher>> {
        let mut resolved = Resolved::default();

        let institute = tenant::institute(session, tenant, &row.institute_acronym).await?;
        let institute = resolved.found(&row.institute_acronym, institute, || {
            unknown_institute(&row.institute_acronym)
        });

        if let Some(existing) = session.teacher(row.teacher_id.trim()).await? {
            if !tenant.owns(existing.institution_id) {
                resolved.reject(in_use("teacher_id", &row.teacher_id));
            }
        }

        let record = institute.and_then(|i| record(row, i.institute_id));
        Ok(resolved.with_record(record))
    }

    async fn upsert(record: &Teacher, session: &mut dyn Session) -> StoreResult<Upsert> {
        session.upsert_teacher(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::fixtures::{ingest_csv, messages, seeded, validate_csv};
    use crate::ingest::ReferencePolicy;

    const HEADER: &str = "teacher_id,first_name,last_name,grade,status,institute_acronym\n";

    #[tokio::test]
    async fn test_grade_spellings_normalized() {
        let seeded = seeded().await;
        let file = format!(
            "{}T-A2,Fatou,Fall,Maître de Conférences,Vacataire,FST\n",
            HEADER
        );
        let counts = ingest_csv::<Teachers>(&seeded.store, &seeded.tenant_a(), &file, ReferencePolicy::Strict)
            .await
            .unwrap();
        assert_eq!(counts.created, 1);
        let tables = seeded.store.snapshot().await;
        assert_eq!(tables.teachers["T-A2"].grade, TeacherGrade::MaitreDeConferences);
        assert_eq!(tables.teachers["T-A2"].status, TeacherStatus::Vacataire);
    }

    #[tokio::test]
    async fn test_domain_violations_reported() {
        let seeded = seeded().await;
        let file = format!("{}T-A3,Ibrahima,Ba,lecturer,intern,FST\n", HEADER);
        let errors = validate_csv::<Teachers>(&seeded.store, &seeded.tenant_a(), &file).await;
        assert_eq!(
            messages(&errors),
            vec![
                "Row 2: Invalid grade 'lecturer' (expected assistant, maitre_assistant, maitre_de_conferences, professeur, docteur, autre).",
                "Row 2: Invalid status 'intern' (expected permanent, vacataire, contractuel).",
            ]
        );
    }

    #[tokio::test]
    async fn test_teacher_of_other_tenant_rejected() {
        let seeded = seeded().await;
        let file = format!("{}T-A1,Moussa,Ndiaye,professeur,permanent,FST\n", HEADER);
        let errors = validate_csv::<Teachers>(&seeded.store, &seeded.tenant_b(), &file).await;
        assert_eq!(
            messages(&errors),
            vec!["Row 2: teacher_id 'T-A1' is already in use."]
        );
    }
}
