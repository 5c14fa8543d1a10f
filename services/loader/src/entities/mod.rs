//! Per-entity row schemas, validation and ingestion.
//!
//! Each entity type implements [`Entity`]: a typed row, its columns, the
//! field checks, and one `resolve` step that turns a row into a storable
//! record by looking up its references through [`crate::tenant`]. Both
//! [`validate`] and [`ingest`] call the same `resolve`, so the two phases
//! agree on what a row refers to.

pub mod courses;
pub mod degrees;
pub mod enrollments;
pub mod institutes;
pub mod institutions;
pub mod programs;
pub mod results;
pub mod students;
pub mod teachers;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{NaiveDate, NaiveDateTime};
use serde::de::DeserializeOwned;

use crate::error::{LoadError, RowError, StoreResult};
use crate::ingest::{Counts, Disposition, ReferencePolicy};
use crate::model::{EntityKind, Upsert};
use crate::schema::Column;
use crate::store::Session;
use crate::table::Numbered;
use crate::tenant::TenantContext;

pub use courses::Courses;
pub use degrees::Degrees;
pub use enrollments::Enrollments;
pub use institutes::Institutes;
pub use institutions::Institutions;
pub use programs::Programs;
pub use results::Results;
pub use students::Students;
pub use teachers::Teachers;

/// Outcome of resolving one row against the store.
///
/// `record` is only set when every field parsed and every reference
/// resolved. `missing` holds references that did not resolve (validation
/// errors, soft failures at ingestion time); `deferred` holds misses that
/// only ingestion reports; `rejected` holds conflicts that no policy may
/// skip over.
#[derive(Debug)]
pub struct Resolved<R> {
    pub record: Option<R>,
    pub missing: Vec<String>,
    pub deferred: Vec<String>,
    pub rejected: Vec<String>,
    pub held: Option<Held>,
}

/// The row's exclusive key is already held in the store by another
/// natural key.
#[derive(Debug, Clone, PartialEq)]
pub struct Held {
    pub holder: String,
    pub message: String,
}

impl<R> Default for Resolved<R> {
    fn default() -> Self {
        Resolved {
            record: None,
            missing: Vec::new(),
            deferred: Vec::new(),
            rejected: Vec::new(),
            held: None,
        }
    }
}

impl<R> Resolved<R> {
    /// Keep a lookup result, noting a miss unless the key was blank
    /// (blank keys are reported by the field checks).
    pub fn found<T>(&mut self, key: &str, found: Option<T>, miss: impl FnOnce() -> String) -> Option<T> {
        if found.is_none() && !key.trim().is_empty() {
            self.missing.push(miss());
        }
        found
    }

    /// Like [`Resolved::found`], for lookups that may legitimately fail
    /// until ingestion: the row is skipped there, never rejected here.
    pub fn defer<T>(&mut self, key: &str, found: Option<T>, miss: impl FnOnce() -> String) -> Option<T> {
        if found.is_none() && !key.trim().is_empty() {
            self.deferred.push(miss());
        }
        found
    }

    pub fn reject(&mut self, message: impl Into<String>) {
        self.rejected.push(message.into());
    }

    pub fn held_by(&mut self, holder: impl Into<String>, message: impl Into<String>) {
        self.held = Some(Held {
            holder: holder.into(),
            message: message.into(),
        });
    }

    pub fn with_record(mut self, record: Option<R>) -> Self {
        if self.missing.is_empty() && self.deferred.is_empty() && self.rejected.is_empty() {
            self.record = record;
        }
        self
    }
}

#[async_trait]
pub trait Entity: Send + Sync + 'static {
    type Row: DeserializeOwned + Send + Sync;
    type Record: Send + Sync;

    const KIND: EntityKind;
    const COLUMNS: &'static [Column];

    /// Natural key of the row, as written in the file.
    fn natural_key(row: &Self::Row) -> &str;

    /// Presence and domain checks; no store access.
    fn check(row: &Self::Row) -> Vec<String>;

    /// Look up references and build the record.
    async fn resolve(
        row: &Self::Row,
        tenant: &TenantContext,
        session: &mut dyn Session,
    ) -> StoreResult<Resolved<Self::Record>>;

    /// Key that at most one natural key may claim within a file.
    fn exclusive_key(_record: &Self::Record) -> Option<String> {
        None
    }

    async fn upsert(record: &Self::Record, session: &mut dyn Session) -> StoreResult<Upsert>;
}

/// Claims on exclusive keys made by the rows of one file, replayed in
/// file order.
#[derive(Debug, Default)]
struct Claims {
    /// exclusive key -> (line, natural key) of the row holding it
    holders: HashMap<String, (usize, String)>,
    /// natural key -> exclusive key its latest row declares
    declared: HashMap<String, Option<String>>,
}

impl Claims {
    /// Record that `natural_key` now declares `key`, releasing whatever it
    /// declared on an earlier row. Returns the conflicting message, if any.
    fn declare(&mut self, line: usize, natural_key: &str, key: Option<String>) -> Option<String> {
        if let Some(Some(previous)) = self.declared.get(natural_key) {
            if Some(previous) != key.as_ref()
                && self
                    .holders
                    .get(previous)
                    .is_some_and(|(_, owner)| owner == natural_key)
            {
                self.holders.remove(previous);
            }
        }
        self.declared.insert(natural_key.to_string(), key.clone());

        let key = key?;
        match self.holders.get(&key) {
            Some((held_on, owner)) if owner != natural_key => Some(format!(
                "{} is already claimed by '{}' on row {}.",
                key, owner, held_on
            )),
            Some(_) => None,
            None => {
                self.holders.insert(key, (line, natural_key.to_string()));
                None
            }
        }
    }

    /// A store holder counts only until a row of the file re-declares it.
    /// Re-declared with another key it has let go; with the same key the
    /// file-level claim reports the clash instead.
    fn stands(&self, held: &Held) -> bool {
        !self.declared.contains_key(&held.holder)
    }
}

/// Check every row and collect every violation; never stops early.
pub async fn validate<E: Entity>(
    rows: &[Numbered<E::Row>],
    tenant: &TenantContext,
    session: &mut dyn Session,
) -> StoreResult<Vec<RowError>> {
    let mut errors = Vec::new();
    let mut claims = Claims::default();

    for row in rows {
        let mut messages = E::check(&row.value);
        let Resolved {
            record,
            missing,
            deferred,
            rejected,
            held,
        } = E::resolve(&row.value, tenant, session).await?;
        messages.extend(missing);
        messages.extend(rejected);

        match record {
            Some(record) => match held.filter(|held| claims.stands(held)) {
                Some(held) => messages.push(held.message),
                None => {
                    let natural_key = E::natural_key(&row.value).trim();
                    let key = E::exclusive_key(&record);
                    messages.extend(claims.declare(row.line, natural_key, key));
                }
            },
            None => {
                messages.extend(held.map(|held| held.message));
                if messages.is_empty() && deferred.is_empty() {
                    messages.push("Row could not be interpreted.".into());
                }
            }
        }

        errors.extend(messages.into_iter().map(|m| RowError::at(row.line, m)));
    }

    Ok(errors)
}

/// Upsert every row in file order. Rows whose references no longer
/// resolve are skipped or abort the file, depending on `policy`.
pub async fn ingest<E: Entity>(
    rows: &[Numbered<E::Row>],
    tenant: &TenantContext,
    session: &mut dyn Session,
    policy: ReferencePolicy,
) -> Result<Counts, LoadError> {
    let mut counts = Counts::default();
    for row in rows {
        let disposition = ingest_row::<E>(row, tenant, session, policy).await?;
        counts = counts.tally(disposition);
    }
    tracing::info!(kind = %E::KIND, %counts, "ingestion finished");
    Ok(counts)
}

async fn ingest_row<E: Entity>(
    row: &Numbered<E::Row>,
    tenant: &TenantContext,
    session: &mut dyn Session,
    policy: ReferencePolicy,
) -> Result<Disposition, LoadError> {
    let resolved = E::resolve(&row.value, tenant, session).await?;

    let conflict = resolved
        .rejected
        .into_iter()
        .chain(resolved.held.map(|held| held.message))
        .next();
    if let Some(message) = conflict {
        return Err(LoadError::Rejected {
            row: row.line,
            message,
        });
    }

    if let Some(record) = resolved.record {
        let upsert = E::upsert(&record, session).await?;
        return Ok(upsert.into());
    }

    let mut missing = resolved.missing;
    missing.extend(resolved.deferred);
    if missing.is_empty() {
        return Err(LoadError::Rejected {
            row: row.line,
            message: "row could not be interpreted".into(),
        });
    }

    let message = missing.join(" ");
    match policy {
        ReferencePolicy::SkipOnMiss => {
            tracing::debug!(
                kind = %E::KIND,
                row = row.line,
                key = E::natural_key(&row.value),
                reason = %message,
                "row skipped"
            );
            Ok(Disposition::Skipped)
        }
        ReferencePolicy::Strict => Err(LoadError::UnresolvedReference {
            row: row.line,
            message,
        }),
    }
}

// =============================================================================
// Field helpers shared by the entity modules
// =============================================================================

/// Push "Missing <field>" when `value` is blank.
pub(crate) fn require(errors: &mut Vec<String>, field: &str, value: &str) {
    if value.trim().is_empty() {
        errors.push(format!("Missing {}", field));
    }
}

pub(crate) fn expected(values: &[&str]) -> String {
    values.join(", ")
}

/// Accepts `YYYY-MM-DD`, `YYYY-MM-DD HH:MM:SS`, ISO timestamps and
/// `DD/MM/YYYY`.
pub(crate) fn parse_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(ts) = NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S") {
        return Some(ts.date());
    }
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%d/%m/%Y") {
        return Some(date);
    }
    match raw.get(..10) {
        Some(prefix) if raw[10..].starts_with(['T', ' ']) => {
            NaiveDate::parse_from_str(prefix, "%Y-%m-%d").ok()
        }
        _ => None,
    }
}

/// `YYYY`, or two consecutive years joined by `-` or `/`.
pub(crate) fn valid_academic_year(raw: &str) -> bool {
    let raw = raw.trim();
    let year = |s: &str| s.len() == 4 && s.chars().all(|c| c.is_ascii_digit());
    match raw.split_once(['-', '/']) {
        None => year(raw),
        Some((a, b)) if year(a) && year(b) => {
            matches!((a.parse::<u32>(), b.parse::<u32>()), (Ok(a), Ok(b)) if b == a + 1)
        }
        Some(_) => false,
    }
}

pub(crate) fn check_academic_year(errors: &mut Vec<String>, raw: &str) {
    if raw.trim().is_empty() {
        errors.push("Missing academic_year".into());
    } else if !valid_academic_year(raw) {
        errors.push(format!(
            "Invalid academic_year '{}' (expected YYYY-YYYY).",
            raw.trim()
        ));
    }
}

/// Canonical spelling: `2023/2024` is stored as `2023-2024`.
pub(crate) fn normalize_year(raw: &str) -> String {
    raw.trim().replace('/', "-")
}

pub(crate) fn optional(raw: &str) -> Option<String> {
    let raw = raw.trim();
    (!raw.is_empty()).then(|| raw.to_string())
}

/// Rejection for a natural key that belongs to another institution.
pub(crate) fn in_use(field: &str, key: &str) -> String {
    format!("{} '{}' is already in use.", field, key.trim())
}

pub(crate) fn unknown_institute(acronym: &str) -> String {
    format!(
        "Unknown institute acronym '{}' for your institution.",
        acronym.trim()
    )
}

#[cfg(test)]
pub(crate) mod fixtures;
