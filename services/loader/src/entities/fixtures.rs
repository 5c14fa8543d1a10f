//! Seeded stores and CSV helpers for entity tests.
//!
//! Two institutions share an institute acronym so isolation can be
//! observed: UNIV-A and UNIV-B both have "FST"; only UNIV-A has "FSE".

use chrono::NaiveDate;
use serde::de::DeserializeOwned;

use crate::entities::{self, Entity};
use crate::error::{LoadError, RowError};
use crate::ingest::{Counts, ReferencePolicy};
use crate::model::{
    Course, Enrollment, EnrollmentStatus, EntityKind, Gender, InstituteRef, Institution,
    InstitutionRef, Program, Student, Teacher, TeacherGrade, TeacherStatus,
};
use crate::store::{Catalog, MemoryStore, Session, Store};
use crate::table::{Numbered, Table};
use crate::tenant::TenantContext;

pub(crate) struct Seeded {
    pub store: MemoryStore,
    pub univ_a: InstitutionRef,
    pub univ_b: InstitutionRef,
}

impl Seeded {
    pub fn tenant_a(&self) -> TenantContext {
        TenantContext::for_institution(self.univ_a.clone(), "registrar-a")
    }

    pub fn tenant_b(&self) -> TenantContext {
        TenantContext::for_institution(self.univ_b.clone(), "registrar-b")
    }

    pub fn platform(&self) -> TenantContext {
        TenantContext::platform("admin")
    }
}

fn institution(code: &str) -> Institution {
    Institution {
        code: code.into(),
        name: format!("Université {}", code),
        kind: "public".into(),
        city: "Dakar".into(),
    }
}

async fn add_institute<S: Session>(
    session: &mut S,
    owner: &InstitutionRef,
    acronym: &str,
) -> InstituteRef {
    session
        .upsert_institute(&crate::model::Institute {
            institution_id: owner.institution_id,
            acronym: acronym.into(),
            name: format!("Institute {}", acronym),
        })
        .await
        .unwrap();
    session
        .institute(owner.institution_id, acronym)
        .await
        .unwrap()
        .unwrap()
}

/// UNIV-A: FST, FSE, program P-A1, teacher T-A1, course C-A1, student S1
/// (owned) with active enrollment E1 for 2023-2024.
/// UNIV-B: FST, program P-B1, teacher T-B1, student S-B (owned).
/// S2 has no owner.
pub(crate) async fn seeded() -> Seeded {
    let store = MemoryStore::new();
    let mut session = store.begin(EntityKind::Institutions).await.unwrap();

    for code in ["UNIV-A", "UNIV-B"] {
        session.upsert_institution(&institution(code)).await.unwrap();
    }
    let univ_a = session.institution("UNIV-A").await.unwrap().unwrap();
    let univ_b = session.institution("UNIV-B").await.unwrap().unwrap();

    let fst_a = add_institute(&mut session, &univ_a, "FST").await;
    add_institute(&mut session, &univ_a, "FSE").await;
    let fst_b = add_institute(&mut session, &univ_b, "FST").await;

    for (program_id, institute) in [("P-A1", &fst_a), ("P-B1", &fst_b)] {
        session
            .upsert_program(&Program {
                program_id: program_id.into(),
                institute_id: institute.institute_id,
                name: "Informatique".into(),
                domain: "Sciences".into(),
                level: "Licence".into(),
            })
            .await
            .unwrap();
    }

    for (teacher_id, institute) in [("T-A1", &fst_a), ("T-B1", &fst_b)] {
        session
            .upsert_teacher(&Teacher {
                teacher_id: teacher_id.into(),
                institute_id: institute.institute_id,
                first_name: "Moussa".into(),
                last_name: "Ndiaye".into(),
                grade: TeacherGrade::Professeur,
                status: TeacherStatus::Permanent,
            })
            .await
            .unwrap();
    }

    session
        .upsert_course(&Course {
            course_id: "C-A1".into(),
            program_id: "P-A1".into(),
            teacher_id: Some("T-A1".into()),
            code: "INF101".into(),
            name: "Algorithmique".into(),
            credits: 6,
            semester: "S1".into(),
        })
        .await
        .unwrap();

    for (student_id, owner) in [
        ("S1", Some(univ_a.institution_id)),
        ("S2", None),
        ("S-B", Some(univ_b.institution_id)),
    ] {
        session
            .upsert_student(&Student {
                student_id: student_id.into(),
                institution_id: owner,
                first_name: "Awa".into(),
                last_name: "Sow".into(),
                gender: Gender::F,
                birth_date: NaiveDate::from_ymd_opt(2001, 4, 3),
            })
            .await
            .unwrap();
    }

    session
        .upsert_enrollment(&Enrollment {
            enrollment_id: "E1".into(),
            student_id: "S1".into(),
            program_id: "P-A1".into(),
            institute_id: fst_a.institute_id,
            academic_year: "2023-2024".into(),
            status: EnrollmentStatus::Active,
        })
        .await
        .unwrap();

    store.commit(session).await.unwrap();

    Seeded {
        store,
        univ_a,
        univ_b,
    }
}

pub(crate) fn rows<T: DeserializeOwned>(csv: &str) -> Vec<Numbered<T>> {
    let table = Table::from_csv_bytes(csv.as_bytes()).unwrap();
    let (rows, errors) = table.typed();
    assert!(errors.is_empty(), "fixture rows failed to decode: {:?}", errors);
    rows
}

/// Validate inside a session that is rolled back.
pub(crate) async fn validate_csv<E: Entity>(
    store: &MemoryStore,
    tenant: &TenantContext,
    csv: &str,
) -> Vec<RowError> {
    let rows = rows::<E::Row>(csv);
    let mut session = store.begin(E::KIND).await.unwrap();
    let errors = entities::validate::<E>(&rows, tenant, &mut session)
        .await
        .unwrap();
    store.rollback(session).await.unwrap();
    errors
}

/// Ingest and commit on success.
pub(crate) async fn ingest_csv<E: Entity>(
    store: &MemoryStore,
    tenant: &TenantContext,
    csv: &str,
    policy: ReferencePolicy,
) -> Result<Counts, LoadError> {
    let rows = rows::<E::Row>(csv);
    let mut session = store.begin(E::KIND).await.unwrap();
    match entities::ingest::<E>(&rows, tenant, &mut session, policy).await {
        Ok(counts) => {
            store.commit(session).await.unwrap();
            Ok(counts)
        }
        Err(e) => {
            store.rollback(session).await.unwrap();
            Err(e)
        }
    }
}

pub(crate) fn messages(errors: &[RowError]) -> Vec<String> {
    errors.iter().map(ToString::to_string).collect()
}
