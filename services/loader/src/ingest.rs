//! Ingestion counters and the per-entity reference policy.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::model::{EntityKind, Upsert};

/// What happened to one row during ingestion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    Created,
    Updated,
    Skipped,
}

impl From<Upsert> for Disposition {
    fn from(upsert: Upsert) -> Self {
        match upsert {
            Upsert::Created => Disposition::Created,
            Upsert::Updated => Disposition::Updated,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct Counts {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

impl Counts {
    /// Fold one row's disposition into the running totals.
    #[must_use]
    pub fn tally(self, disposition: Disposition) -> Counts {
        match disposition {
            Disposition::Created => Counts {
                created: self.created + 1,
                ..self
            },
            Disposition::Updated => Counts {
                updated: self.updated + 1,
                ..self
            },
            Disposition::Skipped => Counts {
                skipped: self.skipped + 1,
                ..self
            },
        }
    }

    pub fn total(&self) -> usize {
        self.created + self.updated + self.skipped
    }
}

impl FromIterator<Disposition> for Counts {
    fn from_iter<I: IntoIterator<Item = Disposition>>(iter: I) -> Self {
        iter.into_iter().fold(Counts::default(), Counts::tally)
    }
}

impl std::fmt::Display for Counts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} created, {} updated, {} skipped",
            self.created, self.updated, self.skipped
        )
    }
}

/// How ingestion treats a reference that no longer resolves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum ReferencePolicy {
    /// Count the row as skipped and keep going.
    #[default]
    SkipOnMiss,
    /// Abort the whole file.
    Strict,
}

/// Reference policy per entity kind. Unlisted kinds skip on miss.
#[derive(Debug, Clone, Default)]
pub struct Policies {
    overrides: BTreeMap<EntityKind, ReferencePolicy>,
}

impl Policies {
    pub fn strict(kinds: impl IntoIterator<Item = EntityKind>) -> Self {
        Policies {
            overrides: kinds
                .into_iter()
                .map(|kind| (kind, ReferencePolicy::Strict))
                .collect(),
        }
    }

    pub fn for_kind(&self, kind: EntityKind) -> ReferencePolicy {
        self.overrides.get(&kind).copied().unwrap_or_default()
    }
}
