use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use super::{in_use, optional, parse_date, require, Entity, Resolved};
use crate::error::StoreResult;
use crate::model::{EntityKind, Gender, Student, Upsert};
use crate::schema::Column;
use crate::store::Session;
use crate::tenant::TenantContext;

#[derive(Debug, Clone, Deserialize)]
pub struct StudentRow {
    pub student_id: String,
    pub first_name: String,
    pub last_name: String,
    #[serde(alias = "gender (m/f)")]
    pub gender: String,
    #[serde(alias = "birthdate", alias = "birthdate (yyyy-mm-dd)")]
    pub birth_date: String,
}

/// Students are keyed globally by `student_id`. The first institution to
/// load a student owns it; unowned legacy students are shared.
pub struct Students;

fn record(row: &StudentRow, institution_id: Option<Uuid>) -> Option<Student> {
    let birth_date = match optional(&row.birth_date) {
        Some(raw) => Some(parse_date(&raw)?),
        None => None,
    };
    Some(Student {
        student_id: optional(&row.student_id)?,
        institution_id,
        first_name: optional(&row.first_name)?,
        last_name: optional(&row.last_name)?,
        gender: Gender::parse(&row.gender)?,
        birth_date,
    })
}

#[async_trait]
impl Entity for Students {
    type Row = StudentRow;
    type Record = Student;

    const KIND: EntityKind = EntityKind::Students;
    const COLUMNS: &'static [Column] = &[
        Column::required("student_id"),
        Column::required("first_name"),
        Column::required("last_name"),
        Column::required("gender").aka(&["gender (m/f)"]),
        Column::required("birth_date").aka(&["birthdate", "birthdate (yyyy-mm-dd)"]),
    ];

    fn natural_key(row: &StudentRow) -> &str {
        &row.student_id
    }

    fn check(row: &StudentRow) -> Vec<String> {
        let mut errors = Vec::new();
        require(&mut errors, "student_id", &row.student_id);
        require(&mut errors, "first_name", &row.first_name);
        require(&mut errors, "last_name", &row.last_name);
        if Gender::parse(&row.gender).is_none() {
            errors.push(format!("Invalid gender '{}' (expected M/F)", row.gender.trim()));
        }
        let birth_date = row.birth_date.trim();
        if !birth_date.is_empty() && parse_date(birth_date).is_none() {
            errors.push(format!(
                "Invalid birth_date '{}' (expected YYYY-MM-DD).",
                birth_date
            ));
        }
        errors
    }

    async fn resolve(
        row: &StudentRow,
        tenant: &TenantContext,
        session: &mut dyn Session,
    ) -> StoreResult<Resolved<Student>> {
        let mut resolved = Resolved::default();

        if let Some(existing) = session.student(row.student_id.trim()).await? {
            if !tenant.sees_student(&existing) {
                resolved.reject(in_use("student_id", &row.student_id));
            }
        }

        Ok(resolved.with_record(record(row, tenant.institution_id())))
    }

    async fn upsert(record: &Student, session: &mut dyn Session) -> StoreResult<Upsert> {
        session.upsert_student(record).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;

    use super::*;
    use crate::entities::fixtures::{ingest_csv, messages, seeded, validate_csv};
    use crate::ingest::{Counts, ReferencePolicy};

    const HEADER: &str = "student_id,first_name,last_name,Gender (M/F),Birthdate (YYYY-MM-DD)\n";

    #[tokio::test]
    async fn test_duplicate_id_in_file_later_row_wins() {
        let seeded = seeded().await;
        let file = format!(
            "{}S10,Khady,Diop,F,2002-01-15\nS10,Khadija,Diop,F,2002-01-16\n",
            HEADER
        );
        let counts = ingest_csv::<Students>(&seeded.store, &seeded.tenant_a(), &file, ReferencePolicy::Strict)
            .await
            .unwrap();
        assert_eq!(counts, Counts { created: 1, updated: 1, skipped: 0 });
        let tables = seeded.store.snapshot().await;
        let student = &tables.students["S10"];
        assert_eq!(student.first_name, "Khadija");
        assert_eq!(student.birth_date, NaiveDate::from_ymd_opt(2002, 1, 16));
        assert_eq!(student.institution_id, Some(seeded.univ_a.institution_id));
    }

    #[tokio::test]
    async fn test_gender_domain() {
        let seeded = seeded().await;
        let file = format!("{}S11,Ousmane,Sarr,X,\nS12,Aliou,Cissé,m,\n", HEADER);
        let errors = validate_csv::<Students>(&seeded.store, &seeded.tenant_a(), &file).await;
        assert_eq!(messages(&errors), vec!["Row 2: Invalid gender 'X' (expected M/F)"]);
    }

    #[tokio::test]
    async fn test_birth_date_optional_but_checked() {
        let seeded = seeded().await;
        let file = format!("{}S13,Binta,Kane,F,\nS14,Mame,Gaye,F,31/02/2001\n", HEADER);
        let errors = validate_csv::<Students>(&seeded.store, &seeded.tenant_a(), &file).await;
        assert_eq!(
            messages(&errors),
            vec!["Row 3: Invalid birth_date '31/02/2001' (expected YYYY-MM-DD)."]
        );
    }

    #[tokio::test]
    async fn test_student_owned_elsewhere_rejected() {
        let seeded = seeded().await;
        let file = format!("{}S-B,Awa,Sow,F,2001-04-03\n", HEADER);
        let errors = validate_csv::<Students>(&seeded.store, &seeded.tenant_a(), &file).await;
        assert_eq!(
            messages(&errors),
            vec!["Row 2: student_id 'S-B' is already in use."]
        );
    }

    #[tokio::test]
    async fn test_unowned_student_claimed_on_update() {
        let seeded = seeded().await;
        let file = format!("{}S2,Awa,Sow-Ba,F,2001-04-03\n", HEADER);
        let counts = ingest_csv::<Students>(&seeded.store, &seeded.tenant_b(), &file, ReferencePolicy::Strict)
            .await
            .unwrap();
        assert_eq!(counts.updated, 1);
        let tables = seeded.store.snapshot().await;
        assert_eq!(tables.students["S2"].last_name, "Sow-Ba");
        assert_eq!(tables.students["S2"].institution_id, Some(seeded.univ_b.institution_id));
    }
}
