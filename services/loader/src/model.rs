//! Domain model: entity kinds, enumerated domains, stored records and
//! the lightweight references returned by catalog lookups.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use uuid::Uuid;

/// Entity types accepted by the loader, declared in dependency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Institutions,
    Institutes,
    Programs,
    Teachers,
    Courses,
    Students,
    Enrollments,
    Results,
    Degrees,
}

impl EntityKind {
    /// Ingestion order callers must respect across files.
    pub const DEPENDENCY_ORDER: [EntityKind; 9] = [
        EntityKind::Institutions,
        EntityKind::Institutes,
        EntityKind::Programs,
        EntityKind::Teachers,
        EntityKind::Courses,
        EntityKind::Students,
        EntityKind::Enrollments,
        EntityKind::Results,
        EntityKind::Degrees,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            EntityKind::Institutions => "institutions",
            EntityKind::Institutes => "institutes",
            EntityKind::Programs => "programs",
            EntityKind::Teachers => "teachers",
            EntityKind::Courses => "courses",
            EntityKind::Students => "students",
            EntityKind::Enrollments => "enrollments",
            EntityKind::Results => "results",
            EntityKind::Degrees => "degrees",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EntityKind {
    type Err = String;

    /// Accepts plural or singular names, case-insensitively.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_lowercase();
        Self::DEPENDENCY_ORDER
            .into_iter()
            .find(|kind| {
                let name = kind.as_str();
                wanted == name || wanted == name.trim_end_matches('s')
            })
            .ok_or_else(|| format!("unknown entity type '{}'", s.trim()))
    }
}

/// Lower-cases and maps spaces and dashes to underscores so that
/// "Maitre Assistant" and "maitre-assistant" compare equal.
fn normalize_token(raw: &str) -> String {
    raw.trim()
        .to_lowercase()
        .split(|c: char| c.is_whitespace() || c == '-')
        .filter(|part| !part.is_empty())
        .collect::<Vec<_>>()
        .join("_")
}

/// Declares a closed set of textual values with aliases.
macro_rules! domain_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $($variant:ident => $text:literal $(| $alias:literal)*),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        pub enum $name {
            $($variant),+
        }

        impl $name {
            pub const VALUES: &'static [&'static str] = &[$($text),+];

            pub fn as_str(self) -> &'static str {
                match self {
                    $(Self::$variant => $text),+
                }
            }

            pub fn parse(raw: &str) -> Option<Self> {
                match normalize_token(raw).as_str() {
                    $($text $(| $alias)* => Some(Self::$variant),)+
                    _ => None,
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

domain_enum! {
    TeacherGrade {
        Assistant => "assistant",
        MaitreAssistant => "maitre_assistant" | "maître_assistant",
        MaitreDeConferences => "maitre_de_conferences" | "maître_de_conférences",
        Professeur => "professeur" | "professeur_titulaire",
        Docteur => "docteur",
        Autre => "autre",
    }
}

domain_enum! {
    TeacherStatus {
        Permanent => "permanent",
        Vacataire => "vacataire",
        Contractuel => "contractuel",
    }
}

domain_enum! {
    EnrollmentStatus {
        Active => "active",
        Abandoned => "abandoned",
        Graduated => "graduated",
    }
}

domain_enum! {
    /// Exam session. `rattrapage` is the make-up session.
    Session {
        Normal => "normal",
        MakeUp => "make_up" | "makeup" | "rattrapage",
    }
}

domain_enum! {
    DegreeType {
        LicenceFondamentale => "licence_fondamentale",
        LicencePro => "licence_pro",
        Bachelor => "bachelor",
        MasterRecherche => "master_recherche",
        MasterPro => "master_pro",
        Phd => "phd",
        Bts => "bts",
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Gender {
    M,
    F,
}

impl Gender {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_uppercase().as_str() {
            "M" => Some(Gender::M),
            "F" => Some(Gender::F),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Gender::M => "M",
            Gender::F => "F",
        }
    }
}

// =============================================================================
// Records written by ingestion
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct Institution {
    pub code: String,
    pub name: String,
    pub kind: String,
    pub city: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Institute {
    pub institution_id: Uuid,
    pub acronym: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Program {
    pub program_id: String,
    pub institute_id: Uuid,
    pub name: String,
    pub domain: String,
    pub level: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Teacher {
    pub teacher_id: String,
    pub institute_id: Uuid,
    pub first_name: String,
    pub last_name: String,
    pub grade: TeacherGrade,
    pub status: TeacherStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Course {
    pub course_id: String,
    pub program_id: String,
    pub teacher_id: Option<String>,
    pub code: String,
    pub name: String,
    pub credits: u32,
    pub semester: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Student {
    pub student_id: String,
    pub institution_id: Option<Uuid>,
    pub first_name: String,
    pub last_name: String,
    pub gender: Gender,
    pub birth_date: Option<NaiveDate>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Enrollment {
    pub enrollment_id: String,
    pub student_id: String,
    pub program_id: String,
    pub institute_id: Uuid,
    pub academic_year: String,
    pub status: EnrollmentStatus,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AcademicResult {
    pub result_id: String,
    pub enrollment_id: String,
    pub course_id: String,
    pub academic_year: String,
    pub session: Session,
    pub note: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Degree {
    pub degree_id: String,
    pub enrollment_id: String,
    pub date_awarded: NaiveDate,
    pub degree_type: DegreeType,
    pub name: String,
}

// =============================================================================
// Catalog references (lookups return these, never full rows)
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct InstitutionRef {
    pub institution_id: Uuid,
    pub code: String,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct InstituteRef {
    pub institute_id: Uuid,
    pub institution_id: Uuid,
    pub acronym: String,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct ProgramRef {
    pub program_id: String,
    pub institute_id: Uuid,
    pub institution_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct TeacherRef {
    pub teacher_id: String,
    pub institute_id: Uuid,
    pub institution_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct CourseRef {
    pub course_id: String,
    pub program_id: String,
    pub institution_id: Uuid,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct StudentRef {
    pub student_id: String,
    pub institution_id: Option<Uuid>,
}

#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct EnrollmentRef {
    pub enrollment_id: String,
    pub student_id: String,
    pub program_id: String,
    pub institute_id: Uuid,
    pub institution_id: Uuid,
    pub academic_year: String,
}

/// Owner of an already stored result or degree, keyed by its own id.
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct OwnedRef {
    pub key: String,
    pub enrollment_id: String,
    pub institution_id: Uuid,
}

/// Whether an upsert created a new record or overwrote an existing one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    Created,
    Updated,
}

// =============================================================================
// Audit trail
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImportStatus {
    Pending,
    Validated,
    Error,
}

impl ImportStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ImportStatus::Pending => "pending",
            ImportStatus::Validated => "validated",
            ImportStatus::Error => "error",
        }
    }
}

/// One processed file as seen by the surrounding application.
#[derive(Debug, Clone, PartialEq)]
pub struct ImportRecord {
    pub import_id: Uuid,
    pub file_name: String,
    pub content_hash: String,
    pub kind: EntityKind,
    pub uploaded_by: String,
    pub institution_id: Option<Uuid>,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LogEntry {
    pub message: String,
    pub is_error: bool,
    pub created_at: DateTime<Utc>,
}

impl LogEntry {
    pub fn info(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: false,
            created_at: Utc::now(),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            is_error: true,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_parse_plural_and_singular() {
        assert_eq!("students".parse::<EntityKind>().unwrap(), EntityKind::Students);
        assert_eq!("Student".parse::<EntityKind>().unwrap(), EntityKind::Students);
        assert_eq!(" degrees ".parse::<EntityKind>().unwrap(), EntityKind::Degrees);
        assert!("grades".parse::<EntityKind>().is_err());
    }

    #[test]
    fn test_dependency_order_is_sorted() {
        let mut sorted = EntityKind::DEPENDENCY_ORDER;
        sorted.sort();
        assert_eq!(sorted, EntityKind::DEPENDENCY_ORDER);
    }

    #[test]
    fn test_domain_parse_normalizes_case_and_separators() {
        assert_eq!(TeacherGrade::parse("Maitre Assistant"), Some(TeacherGrade::MaitreAssistant));
        assert_eq!(TeacherGrade::parse("maître-de-conférences"), Some(TeacherGrade::MaitreDeConferences));
        assert_eq!(TeacherStatus::parse(" PERMANENT "), Some(TeacherStatus::Permanent));
        assert_eq!(TeacherStatus::parse("intern"), None);
    }

    #[test]
    fn test_session_aliases() {
        assert_eq!(Session::parse("normal"), Some(Session::Normal));
        assert_eq!(Session::parse("make-up"), Some(Session::MakeUp));
        assert_eq!(Session::parse("Rattrapage"), Some(Session::MakeUp));
        assert_eq!(Session::parse("summer"), None);
        assert_eq!(Session::MakeUp.as_str(), "make_up");
    }

    #[test]
    fn test_gender_only_m_or_f() {
        assert_eq!(Gender::parse("m"), Some(Gender::M));
        assert_eq!(Gender::parse(" F "), Some(Gender::F));
        assert_eq!(Gender::parse("X"), None);
        assert_eq!(Gender::parse(""), None);
    }

    #[test]
    fn test_degree_type_values() {
        assert_eq!(DegreeType::VALUES.len(), 7);
        assert_eq!(DegreeType::parse("Master Pro"), Some(DegreeType::MasterPro));
        assert_eq!(DegreeType::parse("diploma"), None);
    }
}
