//! Tenant context and tenant-scoped resolution.
//!
//! Every lookup takes the caller's context explicitly. A record owned by
//! another institution resolves exactly like a record that does not exist.

use uuid::Uuid;

use crate::error::StoreResult;
use crate::model::{
    CourseRef, EnrollmentRef, InstituteRef, InstitutionRef, ProgramRef, StudentRef, TeacherRef,
};
use crate::store::{Catalog, Store};

/// Who is loading the file and on behalf of which institution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TenantContext {
    institution: Option<InstitutionRef>,
    uploaded_by: String,
}

impl TenantContext {
    pub fn for_institution(institution: InstitutionRef, uploaded_by: impl Into<String>) -> Self {
        TenantContext {
            institution: Some(institution),
            uploaded_by: uploaded_by.into(),
        }
    }

    /// Caller without an institution. Only institution files can be
    /// loaded meaningfully; every scoped lookup comes back empty.
    pub fn platform(uploaded_by: impl Into<String>) -> Self {
        TenantContext {
            institution: None,
            uploaded_by: uploaded_by.into(),
        }
    }

    /// Build a context from an institution code, `None` if the code is unknown.
    pub async fn resolve<S: Store>(
        store: &S,
        code: &str,
        uploaded_by: impl Into<String>,
    ) -> StoreResult<Option<Self>> {
        Ok(store
            .find_institution(code.trim())
            .await?
            .map(|institution| TenantContext::for_institution(institution, uploaded_by)))
    }

    pub fn institution(&self) -> Option<&InstitutionRef> {
        self.institution.as_ref()
    }

    pub fn institution_id(&self) -> Option<Uuid> {
        self.institution.as_ref().map(|i| i.institution_id)
    }

    pub fn uploaded_by(&self) -> &str {
        &self.uploaded_by
    }

    /// True when `owner` is the caller's institution.
    pub fn owns(&self, owner: Uuid) -> bool {
        self.institution_id() == Some(owner)
    }

    /// Students may be unowned; those are visible to everyone.
    pub fn sees_student(&self, student: &StudentRef) -> bool {
        student.institution_id.map_or(true, |owner| self.owns(owner))
    }
}

pub async fn institute<C: Catalog + ?Sized>(
    catalog: &mut C,
    tenant: &TenantContext,
    acronym: &str,
) -> StoreResult<Option<InstituteRef>> {
    let Some(institution_id) = tenant.institution_id() else {
        return Ok(None);
    };
    catalog.institute(institution_id, acronym.trim()).await
}

pub async fn program<C: Catalog + ?Sized>(
    catalog: &mut C,
    tenant: &TenantContext,
    program_id: &str,
) -> StoreResult<Option<ProgramRef>> {
    Ok(catalog
        .program(program_id.trim())
        .await?
        .filter(|p| tenant.owns(p.institution_id)))
}

pub async fn teacher<C: Catalog + ?Sized>(
    catalog: &mut C,
    tenant: &TenantContext,
    teacher_id: &str,
) -> StoreResult<Option<TeacherRef>> {
    Ok(catalog
        .teacher(teacher_id.trim())
        .await?
        .filter(|t| tenant.owns(t.institution_id)))
}

pub async fn course<C: Catalog + ?Sized>(
    catalog: &mut C,
    tenant: &TenantContext,
    course_id: &str,
) -> StoreResult<Option<CourseRef>> {
    Ok(catalog
        .course(course_id.trim())
        .await?
        .filter(|c| tenant.owns(c.institution_id)))
}

pub async fn student<C: Catalog + ?Sized>(
    catalog: &mut C,
    tenant: &TenantContext,
    student_id: &str,
) -> StoreResult<Option<StudentRef>> {
    Ok(catalog
        .student(student_id.trim())
        .await?
        .filter(|s| tenant.sees_student(s)))
}

/// The enrollment a result or degree row attaches to: the student's
/// enrollment at the institute for `academic_year` if there is one,
/// otherwise the most recent year.
pub async fn enrollment_for<C: Catalog + ?Sized>(
    catalog: &mut C,
    tenant: &TenantContext,
    student_id: &str,
    institute: &InstituteRef,
    academic_year: Option<&str>,
) -> StoreResult<Option<EnrollmentRef>> {
    if !tenant.owns(institute.institution_id) {
        return Ok(None);
    }
    let candidates = catalog
        .enrollments_of(student_id.trim(), institute.institute_id)
        .await?;
    Ok(pick_enrollment(candidates, academic_year))
}

fn pick_enrollment(
    mut candidates: Vec<EnrollmentRef>,
    academic_year: Option<&str>,
) -> Option<EnrollmentRef> {
    // Stable order: newest year first, then enrollment id.
    candidates.sort_by(|a, b| {
        b.academic_year
            .cmp(&a.academic_year)
            .then_with(|| a.enrollment_id.cmp(&b.enrollment_id))
    });
    let year = academic_year.map(str::trim).filter(|y| !y.is_empty());
    if let Some(year) = year {
        if let Some(pos) = candidates.iter().position(|e| e.academic_year == year) {
            return Some(candidates.swap_remove(pos));
        }
    }
    candidates.into_iter().next()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn enrollment(id: &str, year: &str) -> EnrollmentRef {
        EnrollmentRef {
            enrollment_id: id.into(),
            student_id: "S1".into(),
            program_id: "P1".into(),
            institute_id: Uuid::nil(),
            institution_id: Uuid::nil(),
            academic_year: year.into(),
        }
    }

    #[test]
    fn test_pick_enrollment_prefers_matching_year() {
        let picked = pick_enrollment(
            vec![enrollment("E2", "2023-2024"), enrollment("E1", "2022-2023")],
            Some("2022-2023"),
        );
        assert_eq!(picked.unwrap().enrollment_id, "E1");
    }

    #[test]
    fn test_pick_enrollment_falls_back_to_latest() {
        let picked = pick_enrollment(
            vec![enrollment("E1", "2022-2023"), enrollment("E2", "2023-2024")],
            Some("2019-2020"),
        );
        assert_eq!(picked.unwrap().enrollment_id, "E2");
    }

    #[test]
    fn test_pick_enrollment_tie_broken_by_id() {
        let picked = pick_enrollment(
            vec![enrollment("E9", "2023-2024"), enrollment("E3", "2023-2024")],
            None,
        );
        assert_eq!(picked.unwrap().enrollment_id, "E3");
    }

    #[test]
    fn test_platform_context_owns_nothing() {
        let tenant = TenantContext::platform("admin");
        assert!(!tenant.owns(Uuid::nil()));
        assert!(tenant.sees_student(&StudentRef {
            student_id: "S1".into(),
            institution_id: None,
        }));
        assert!(!tenant.sees_student(&StudentRef {
            student_id: "S1".into(),
            institution_id: Some(Uuid::nil()),
        }));
    }
}
