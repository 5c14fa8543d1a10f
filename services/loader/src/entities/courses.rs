use async_trait::async_trait;
use serde::Deserialize;

use super::{in_use, optional, require, Entity, Resolved};
use crate::error::StoreResult;
use crate::model::{Course, EntityKind, Upsert};
use crate::schema::Column;
use crate::store::Session;
use crate::tenant::{self, TenantContext};

#[derive(Debug, Clone, Deserialize)]
pub struct CourseRow {
    pub course_id: String,
    pub code: String,
    pub name: String,
    pub credits: String,
    pub program_id: String,
    #[serde(default)]
    pub semester: String,
    #[serde(default, alias = "teacher_id (optional)")]
    pub teacher_id: String,
}

pub struct Courses;

/// Credits are a non-negative integer; spreadsheets may render `3.0`.
fn parse_credits(raw: &str) -> Option<u32> {
    let raw = raw.trim();
    raw.parse::<u32>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|f| f.fract() == 0.0 && *f >= 0.0 && *f <= f64::from(u32::MAX))
            .map(|f| f as u32)
    })
}

#[async_trait]
impl Entity for Courses {
    type Row = CourseRow;
    type Record = Course;

    const KIND: EntityKind = EntityKind::Courses;
    const COLUMNS: &'static [Column] = &[
        Column::required("course_id"),
        Column::required("code"),
        Column::required("name"),
        Column::required("credits"),
        Column::required("program_id"),
        Column::optional("semester"),
        Column::optional("teacher_id").aka(&["teacher_id (optional)"]),
    ];

    fn natural_key(row: &CourseRow) -> &str {
        &row.course_id
    }

    fn check(row: &CourseRow) -> Vec<String> {
        let mut errors = Vec::new();
        require(&mut errors, "course_id", &row.course_id);
        require(&mut errors, "code", &row.code);
        require(&mut errors, "name", &row.name);
        require(&mut errors, "program_id", &row.program_id);
        if row.credits.trim().is_empty() {
            errors.push("Missing credits".into());
        } else if parse_credits(&row.credits).is_none() {
            errors.push(format!(
                "Invalid credits '{}' (must be a non-negative integer).",
                row.credits.trim()
            ));
        }
        errors
    }

    async fn resolve(
        row: &CourseRow,
        tenant: &TenantContext,
        session: &mut dyn Session,
    ) -> StoreResult<Resolved<Course>> {
        let mut resolved = Resolved::default();

        let program = tenant::program(session, tenant, &row.program_id).await?;
        let program = resolved.found(&row.program_id, program, || {
            format!("Program '{}' does not exist.", row.program_id.trim())
        });

        // Optional, but a teacher that is named must resolve.
        let teacher_id = optional(&row.teacher_id);
        if let Some(id) = &teacher_id {
            let teacher = tenant::teacher(session, tenant, id).await?;
            resolved.found(id, teacher, || format!("Teacher '{}' not found.", id));
        }

        if let Some(existing) = session.course(row.course_id.trim()).await? {
            if !tenant.owns(existing.institution_id) {
                resolved.reject(in_use("course_id", &row.course_id));
            }
        }

        let record = program.and_then(|program| {
            Some(Course {
                course_id: optional(&row.course_id)?,
                program_id: program.program_id,
                teacher_id,
                code: optional(&row.code)?,
                name: optional(&row.name)?,
                credits: parse_credits(&row.credits)?,
                semester: row.semester.trim().to_string(),
            })
        });
        Ok(resolved.with_record(record))
    }

    async fn upsert(record: &Course, session: &mut dyn Session) -> StoreResult<Upsert> {
        session.upsert_course(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::fixtures::{ingest_csv, messages, seeded, validate_csv};
    use crate::ingest::{Counts, ReferencePolicy};

    const HEADER: &str = "course_id,code,name,credits,program_id,semester,teacher_id (optional)\n";

    #[test]
    fn test_parse_credits() {
        assert_eq!(parse_credits("6"), Some(6));
        assert_eq!(parse_credits("3.0"), Some(3));
        assert_eq!(parse_credits("0"), Some(0));
        assert_eq!(parse_credits("-1"), None);
        assert_eq!(parse_credits("2.5"), None);
        assert_eq!(parse_credits("six"), None);
    }

    #[tokio::test]
    async fn test_course_without_teacher() {
        let seeded = seeded().await;
        let file = format!("{}C-A2,INF102,Bases de données,4,P-A1,S2,\n", HEADER);
        let counts = ingest_csv::<Courses>(&seeded.store, &seeded.tenant_a(), &file, ReferencePolicy::Strict)
            .await
            .unwrap();
        assert_eq!(counts, Counts { created: 1, updated: 0, skipped: 0 });
        let tables = seeded.store.snapshot().await;
        assert_eq!(tables.courses["C-A2"].teacher_id, None);
        assert_eq!(tables.courses["C-A2"].semester, "S2");
    }

    #[tokio::test]
    async fn test_references_are_tenant_scoped() {
        let seeded = seeded().await;
        let file = format!(
            "{}C-A3,INF103,Réseaux,3,P-B1,S1,\nC-A4,INF104,Systèmes,3,P-A1,S1,T-B1\n",
            HEADER
        );
        let errors = validate_csv::<Courses>(&seeded.store, &seeded.tenant_a(), &file).await;
        assert_eq!(
            messages(&errors),
            vec![
                "Row 2: Program 'P-B1' does not exist.",
                "Row 3: Teacher 'T-B1' not found.",
            ]
        );
    }

    #[tokio::test]
    async fn test_negative_credits_rejected() {
        let seeded = seeded().await;
        let file = format!("{}C-A5,INF105,Compilation,-2,P-A1,S1,T-A1\n", HEADER);
        let errors = validate_csv::<Courses>(&seeded.store, &seeded.tenant_a(), &file).await;
        assert_eq!(
            messages(&errors),
            vec!["Row 2: Invalid credits '-2' (must be a non-negative integer)."]
        );
    }

    #[tokio::test]
    async fn test_vanished_teacher_skipped() {
        let seeded = seeded().await;
        let file = format!("{}C-A6,INF106,Logique,3,P-A1,S1,T-GONE\n", HEADER);
        let counts = ingest_csv::<Courses>(&seeded.store, &seeded.tenant_a(), &file, ReferencePolicy::SkipOnMiss)
            .await
            .unwrap();
        assert_eq!(counts, Counts { created: 0, updated: 0, skipped: 1 });
    }
}
