use async_trait::async_trait;
use serde::Deserialize;

use super::{
    check_academic_year, expected, in_use, normalize_year, optional, require, unknown_institute,
    valid_academic_year, Entity, Resolved,
};
use crate::error::StoreResult;
use crate::model::{AcademicResult, EntityKind, Session as ExamSession, Upsert};
use crate::schema::Column;
use crate::store::Session;
use crate::tenant::{self, TenantContext};

pub const NOTE_MIN: f64 = 0.0;
pub const NOTE_MAX: f64 = 20.0;

#[derive(Debug, Clone, Deserialize)]
pub struct ResultRow {
    pub result_id: String,
    pub student_id: String,
    pub course_id: String,
    pub institute_acronym: String,
    pub academic_year: String,
    pub session: String,
    pub note: String,
}

pub struct Results;

#[derive(Debug, PartialEq)]
enum Note {
    Valid(f64),
    OutOfRange,
    NotNumeric,
}

/// French exports write `12,5`; both separators are accepted.
fn parse_note(raw: &str) -> Note {
    match raw.trim().replace(',', ".").parse::<f64>() {
        Ok(note) if note.is_finite() && (NOTE_MIN..=NOTE_MAX).contains(&note) => Note::Valid(note),
        Ok(note) if note.is_finite() => Note::OutOfRange,
        _ => Note::NotNumeric,
    }
}

#[async_trait]
impl Entity for Results {
    type Row = ResultRow;
    type Record = AcademicResult;

    const KIND: EntityKind = EntityKind::Results;
    const COLUMNS: &'static [Column] = &[
        Column::required("result_id"),
        Column::required("student_id"),
        Column::required("course_id"),
        Column::required("institute_acronym"),
        Column::required("academic_year"),
        Column::required("session"),
        Column::required("note"),
    ];

    fn natural_key(row: &ResultRow) -> &str {
        &row.result_id
    }

    fn check(row: &ResultRow) -> Vec<String> {
        let mut errors = Vec::new();
        require(&mut errors, "result_id", &row.result_id);
        require(&mut errors, "student_id", &row.student_id);
        require(&mut errors, "course_id", &row.course_id);
        require(&mut errors, "institute_acronym", &row.institute_acronym);
        check_academic_year(&mut errors, &row.academic_year);
        if ExamSession::parse(&row.session).is_none() {
            errors.push(format!(
                "Invalid session '{}' (expected {}).",
                row.session.trim(),
                expected(ExamSession::VALUES)
            ));
        }
        let note = row.note.trim();
        if note.is_empty() {
            errors.push("Missing note".into());
        } else {
            match parse_note(note) {
                Note::Valid(_) => {}
                Note::OutOfRange => errors.push(format!(
                    "Invalid note '{}' (should be between 0 and 20).",
                    note
                )),
                Note::NotNumeric => errors.push(format!(
                    "Invalid note value '{}' (must be numeric).",
                    note
                )),
            }
        }
        errors
    }

    /// The result attaches to the student's enrollment at the institute
    /// for the row's academic year (or the latest one). A student without
    /// one is skipped at ingestion, not rejected here.
    async fn resolve(
        row: &ResultRow,
        tenant: &TenantContext,
        session: &mut dyn Session,
    ) -> StoreResult<Resolved<AcademicResult>> {
        let mut resolved = Resolved::default();
        let academic_year = normalize_year(&row.academic_year);

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
                let found = tenant::enrollment_for(
                    session,
                    tenant,
                    &student.student_id,
                    institute,
                    Some(academic_year.as_str()),
                )
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

        let course = tenant::course(session, tenant, &row.course_id).await?;
        let course = resolved.found(&row.course_id, course, || {
            format!("Course '{}' not found.", row.course_id.trim())
        });

        if let Some(existing) = session.result(row.result_id.trim()).await? {
            if !tenant.owns(existing.institution_id) {
                resolved.reject(in_use("result_id", &row.result_id));
            }
        }

        let record = match (enrollment, course, parse_note(&row.note)) {
            (Some(enrollment), Some(course), Note::Valid(note))
                if valid_academic_year(&academic_year) =>
            {
                optional(&row.result_id)
                    .zip(ExamSession::parse(&row.session))
                    .map(|(result_id, exam)| AcademicResult {
                        result_id,
                        enrollment_id: enrollment.enrollment_id,
                        course_id: course.course_id,
                        academic_year,
                        session: exam,
                        note,
                    })
            }
            _ => None,
        };
        Ok(resolved.with_record(record))
    }

    async fn upsert(record: &AcademicResult, session: &mut dyn Session) -> StoreResult<Upsert> {
        session.upsert_result(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::fixtures::{ingest_csv, messages, seeded, validate_csv};
    use crate::ingest::{Counts, ReferencePolicy};

    const HEADER: &str =
        "result_id,student_id,course_id,institute_acronym,academic_year,session,note\n";

    #[test]
    fn test_parse_note() {
        assert_eq!(parse_note("12.5"), Note::Valid(12.5));
        assert_eq!(parse_note("12,5"), Note::Valid(12.5));
        assert_eq!(parse_note("0"), Note::Valid(0.0));
        assert_eq!(parse_note("20"), Note::Valid(20.0));
        assert_eq!(parse_note("21"), Note::OutOfRange);
        assert_eq!(parse_note("-0.5"), Note::OutOfRange);
        assert_eq!(parse_note("abc"), Note::NotNumeric);
        assert_eq!(parse_note("NaN"), Note::NotNumeric);
    }

    #[tokio::test]
    async fn test_note_out_of_range_rejected() {
        let seeded = seeded().await;
        let file = format!("{}R1,S1,C-A1,FST,2023-2024,normal,21\n", HEADER);
        let errors = validate_csv::<Results>(&seeded.store, &seeded.tenant_a(), &file).await;
        assert_eq!(
            messages(&errors),
            vec!["Row 2: Invalid note '21' (should be between 0 and 20)."]
        );
    }

    #[tokio::test]
    async fn test_result_attached_to_enrollment() {
        let seeded = seeded().await;
        let file = format!(
            "{}R1,S1,C-A1,FST,2023-2024,normal,14\nR2,S1,C-A1,FST,2023-2024,Rattrapage,\"9,5\"\n",
            HEADER
        );
        let counts = ingest_csv::<Results>(&seeded.store, &seeded.tenant_a(), &file, ReferencePolicy::Strict)
            .await
            .unwrap();
        assert_eq!(counts, Counts { created: 2, updated: 0, skipped: 0 });
        let tables = seeded.store.snapshot().await;
        assert_eq!(tables.results["R1"].enrollment_id, "E1");
        assert_eq!(tables.results["R2"].session, ExamSession::MakeUp);
        assert_eq!(tables.results["R2"].note, 9.5);
    }

    #[tokio::test]
    async fn test_student_without_enrollment_skipped() {
        let seeded = seeded().await;
        let file = format!(
            "{}R3,S2,C-A1,FST,2023-2024,normal,12\nR4,S1,C-A1,FSE,2023-2024,normal,12\n",
            HEADER
        );
        let errors = validate_csv::<Results>(&seeded.store, &seeded.tenant_a(), &file).await;
        assert!(errors.is_empty(), "{:?}", errors);

        let counts = ingest_csv::<Results>(&seeded.store, &seeded.tenant_a(), &file, ReferencePolicy::SkipOnMiss)
            .await
            .unwrap();
        assert_eq!(counts, Counts { created: 0, updated: 0, skipped: 2 });
        assert!(seeded.store.snapshot().await.results.is_empty());
    }

    #[tokio::test]
    async fn test_missing_enrollment_aborts_when_strict() {
        let seeded = seeded().await;
        let file = format!("{}R3,S2,C-A1,FST,2023-2024,normal,12\n", HEADER);
        let err = ingest_csv::<Results>(&seeded.store, &seeded.tenant_a(), &file, ReferencePolicy::Strict)
            .await
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "row 2: No enrollment found for student 'S2' at institute 'FST'."
        );
    }

    #[tokio::test]
    async fn test_unknown_student_rejected() {
        let seeded = seeded().await;
        let file = format!("{}R7,S-NONE,C-A1,FST,2023-2024,normal,12\n", HEADER);
        let errors = validate_csv::<Results>(&seeded.store, &seeded.tenant_a(), &file).await;
        assert_eq!(messages(&errors), vec!["Row 2: Student 'S-NONE' not found."]);
    }

    #[tokio::test]
    async fn test_other_tenant_sees_nothing() {
        let seeded = seeded().await;
        let file = format!("{}R5,S1,C-A1,FST,2023-2024,normal,12\n", HEADER);
        let errors = validate_csv::<Results>(&seeded.store, &seeded.tenant_b(), &file).await;
        assert_eq!(
            messages(&errors),
            vec![
                "Row 2: Student 'S1' not found.",
                "Row 2: Course 'C-A1' not found.",
            ]
        );
    }

    #[tokio::test]
    async fn test_non_numeric_note_and_bad_session() {
        let seeded = seeded().await;
        let file = format!("{}R6,S1,C-A1,FST,2023-2024,summer,abs\n", HEADER);
        let errors = validate_csv::<Results>(&seeded.store, &seeded.tenant_a(), &file).await;
        assert_eq!(
            messages(&errors),
            vec![
                "Row 2: Invalid session 'summer' (expected normal, make_up).",
                "Row 2: Invalid note value 'abs' (must be numeric).",
            ]
        );
    }
}
