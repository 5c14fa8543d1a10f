//! File-level pipeline: read, structural check, validate, ingest, audit.
//!
//! Validation and ingestion of one file share a single store session.
//! Ingestion only starts when validation found nothing; the session is
//! committed only when ingestion finished and this is not a dry run.

use std::path::Path;

use chrono::Utc;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::Instrument;
use uuid::Uuid;

use crate::entities::{
    self, Courses, Degrees, Enrollments, Entity, Institutes, Institutions, Programs, Results,
    Students, Teachers,
};
use crate::error::{LoadError, RowError, StoreError};
use crate::ingest::{Counts, Policies, ReferencePolicy};
use crate::model::{EntityKind, ImportRecord, ImportStatus, LogEntry};
use crate::schema::check_columns;
use crate::store::{Session, Store};
use crate::table::{self, Numbered, Table};
use crate::tenant::TenantContext;

/// Errors shown before "...and N more."
pub const SUMMARY_ERROR_LIMIT: usize = 5;

/// Result of processing one file.
#[derive(Debug, Clone, Serialize)]
pub struct Outcome {
    pub import_id: Uuid,
    pub kind: EntityKind,
    pub file_name: String,
    pub status: ImportStatus,
    pub errors: Vec<RowError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub counts: Option<Counts>,
    pub dry_run: bool,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        self.status == ImportStatus::Validated
    }

    /// Human-readable report with the error list truncated.
    pub fn summary(&self) -> String {
        if let Some(counts) = self.counts.filter(|_| self.is_success()) {
            let verb = if self.dry_run { "Dry run of" } else { "Imported" };
            return format!(
                "{} {} {}: {}.",
                verb,
                counts.total(),
                self.kind,
                counts
            );
        }

        let mut lines = vec![format!(
            "{} rejected with {} error(s):",
            self.file_name,
            self.errors.len()
        )];
        lines.extend(
            self.errors
                .iter()
                .take(SUMMARY_ERROR_LIMIT)
                .map(ToString::to_string),
        );
        if self.errors.len() > SUMMARY_ERROR_LIMIT {
            lines.push(format!(
                "...and {} more.",
                self.errors.len() - SUMMARY_ERROR_LIMIT
            ));
        }
        lines.join("\n")
    }
}

enum Run {
    Invalid(Vec<RowError>),
    Ingested(Counts),
}

pub struct Orchestrator<S: Store> {
    store: S,
    policies: Policies,
    dry_run: bool,
}

impl<S: Store> Orchestrator<S> {
    pub fn new(store: S) -> Self {
        Self {
            store,
            policies: Policies::default(),
            dry_run: false,
        }
    }

    #[must_use]
    pub fn with_policies(mut self, policies: Policies) -> Self {
        self.policies = policies;
        self
    }

    /// Validate and ingest, then roll back. No audit record is written.
    #[must_use]
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Process one file of `kind` on behalf of `tenant`.
    ///
    /// File, validation and ingestion failures end up in the outcome with
    /// status `error`; only a failure to write the audit trail is returned
    /// as `Err`.
    pub async fn process(
        &self,
        kind: EntityKind,
        path: &Path,
        tenant: &TenantContext,
    ) -> Result<Outcome, StoreError> {
        let bytes = tokio::fs::read(path).await;
        let record = ImportRecord {
            import_id: Uuid::new_v4(),
            file_name: table::file_name(path),
            content_hash: bytes.as_deref().map(content_hash).unwrap_or_default(),
            kind,
            uploaded_by: tenant.uploaded_by().to_string(),
            institution_id: tenant.institution_id(),
            uploaded_at: Utc::now(),
        };
        if !self.dry_run {
            self.store.open_import(&record).await?;
        }

        let span = tracing::info_span!(
            "import",
            import_id = %record.import_id,
            %kind,
            file = %record.file_name,
        );
        let result = self
            .execute(kind, path, bytes, tenant)
            .instrument(span)
            .await;

        let (status, errors, counts) = match result {
            Ok(Run::Ingested(counts)) => (ImportStatus::Validated, Vec::new(), Some(counts)),
            Ok(Run::Invalid(errors)) => {
                tracing::warn!(
                    import_id = %record.import_id,
                    errors = errors.len(),
                    "validation failed"
                );
                (ImportStatus::Error, errors, None)
            }
            Err(e) => {
                tracing::error!(import_id = %record.import_id, error = %e, "import aborted");
                (ImportStatus::Error, vec![row_error(&e)], None)
            }
        };

        let outcome = Outcome {
            import_id: record.import_id,
            kind,
            file_name: record.file_name,
            status,
            errors,
            counts,
            dry_run: self.dry_run,
        };

        if !self.dry_run {
            self.record_outcome(&outcome).await?;
        }
        Ok(outcome)
    }

    async fn record_outcome(&self, outcome: &Outcome) -> Result<(), StoreError> {
        let entries: Vec<LogEntry> = if outcome.is_success() {
            vec![LogEntry::info(outcome.summary())]
        } else {
            outcome
                .errors
                .iter()
                .map(|e| LogEntry::error(e.to_string()))
                .collect()
        };
        for entry in &entries {
            self.store.append_log(outcome.import_id, entry).await?;
        }
        self.store
            .close_import(outcome.import_id, outcome.status, outcome.counts)
            .await
    }

    async fn execute(
        &self,
        kind: EntityKind,
        path: &Path,
        bytes: std::io::Result<Vec<u8>>,
        tenant: &TenantContext,
    ) -> Result<Run, LoadError> {
        let bytes = bytes.map_err(|source| LoadError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        if requires_institution(kind) && tenant.institution().is_none() {
            return Err(LoadError::InstitutionRequired { kind });
        }

        let table = Table::parse(path, &bytes)?;
        tracing::info!(rows = table.len(), "file read");

        match kind {
            EntityKind::Institutions => self.run::<Institutions>(&table, tenant).await,
            EntityKind::Institutes => self.run::<Institutes>(&table, tenant).await,
            EntityKind::Programs => self.run::<Programs>(&table, tenant).await,
            EntityKind::Teachers => self.run::<Teachers>(&table, tenant).await,
            EntityKind::Courses => self.run::<Courses>(&table, tenant).await,
            EntityKind::Students => self.run::<Students>(&table, tenant).await,
            EntityKind::Enrollments => self.run::<Enrollments>(&table, tenant).await,
            EntityKind::Results => self.run::<Results>(&table, tenant).await,
            EntityKind::Degrees => self.run::<Degrees>(&table, tenant).await,
        }
    }

    async fn run<E: Entity>(&self, table: &Table, tenant: &TenantContext) -> Result<Run, LoadError> {
        check_columns(table.headers(), E::COLUMNS)?;
        let (rows, decode_errors) = table.typed::<E::Row>();

        let mut session = self.store.begin(E::KIND).await?;
        let policy = self.policies.for_kind(E::KIND);
        let result = phases::<E>(&rows, decode_errors, tenant, &mut session, policy).await;

        match result {
            Ok(Run::Ingested(counts)) if !self.dry_run => {
                self.store.commit(session).await?;
                Ok(Run::Ingested(counts))
            }
            other => {
                if let Err(e) = self.store.rollback(session).await {
                    tracing::warn!(error = %e, "rollback failed");
                }
                other
            }
        }
    }
}

async fn phases<E: Entity>(
    rows: &[Numbered<E::Row>],
    mut errors: Vec<RowError>,
    tenant: &TenantContext,
    session: &mut dyn Session,
    policy: ReferencePolicy,
) -> Result<Run, LoadError> {
    errors.extend(entities::validate::<E>(rows, tenant, session).await?);
    if !errors.is_empty() {
        errors.sort_by_key(|e| e.row);
        return Ok(Run::Invalid(errors));
    }
    tracing::debug!(rows = rows.len(), "validation passed");
    let counts = entities::ingest::<E>(rows, tenant, session, policy).await?;
    Ok(Run::Ingested(counts))
}

/// Institutions and students may be loaded without an institution;
/// everything else is owned by one.
fn requires_institution(kind: EntityKind) -> bool {
    !matches!(kind, EntityKind::Institutions | EntityKind::Students)
}

fn row_error(e: &LoadError) -> RowError {
    match e {
        LoadError::UnresolvedReference { row, message } | LoadError::Rejected { row, message } => {
            RowError::at(*row, message.clone())
        }
        other => RowError::file(other.to_string()),
    }
}

pub fn content_hash(bytes: &[u8]) -> String {
    format!("sha256:{:x}", Sha256::digest(bytes))
}
