//! Environment configuration (`.env` is loaded by the binary).

use anyhow::{Context, Result};

use crate::ingest::Policies;
use crate::logging::LogFormat;
use crate::model::EntityKind;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

#[derive(Debug, Clone)]
pub struct Config {
    pub db_url: String,
    pub max_connections: u32,
    /// Entity kinds whose ingestion aborts on an unresolved reference.
    pub strict_references: Vec<EntityKind>,
    pub log_format: LogFormat,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    pub fn from_vars(var: impl Fn(&str) -> Option<String>) -> Result<Self> {
        Ok(Self {
            db_url: var("DB_URL").context("DB_URL env var missing")?,
            max_connections: var("LOADER_MAX_CONNECTIONS")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or(DEFAULT_MAX_CONNECTIONS),
            strict_references: parse_kinds(&var("LOADER_STRICT_REFERENCES").unwrap_or_default())
                .context("Invalid LOADER_STRICT_REFERENCES")?,
            log_format: match var("LOADER_LOG_FORMAT") {
                Some(raw) => raw.parse().map_err(anyhow::Error::msg)?,
                None => LogFormat::default(),
            },
        })
    }

    /// Configured strict kinds plus any given on the command line.
    pub fn policies(&self, extra: impl IntoIterator<Item = EntityKind>) -> Policies {
        Policies::strict(self.strict_references.iter().copied().chain(extra))
    }
}

fn parse_kinds(raw: &str) -> Result<Vec<EntityKind>> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| s.parse::<EntityKind>().map_err(anyhow::Error::msg))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;
    use crate::ingest::ReferencePolicy;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_vars(vars(&[("DB_URL", "postgres://localhost/records")])).unwrap();
        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert!(config.strict_references.is_empty());
        assert_eq!(config.log_format, LogFormat::Pretty);
    }

    #[test]
    fn test_db_url_required() {
        let err = Config::from_vars(vars(&[])).unwrap_err();
        assert_eq!(err.to_string(), "DB_URL env var missing");
    }

    #[test]
    fn test_strict_kinds_and_cli_extras() {
        let config = Config::from_vars(vars(&[
            ("DB_URL", "postgres://localhost/records"),
            ("LOADER_STRICT_REFERENCES", "results, degree"),
            ("LOADER_MAX_CONNECTIONS", "12"),
            ("LOADER_LOG_FORMAT", "json"),
        ]))
        .unwrap();
        assert_eq!(config.max_connections, 12);
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(
            config.strict_references,
            vec![EntityKind::Results, EntityKind::Degrees]
        );
        let policies = config.policies([EntityKind::Courses]);
        assert_eq!(policies.for_kind(EntityKind::Degrees), ReferencePolicy::Strict);
        assert_eq!(policies.for_kind(EntityKind::Courses), ReferencePolicy::Strict);
        assert_eq!(policies.for_kind(EntityKind::Students), ReferencePolicy::SkipOnMiss);
    }

    #[test]
    fn test_unknown_strict_kind_rejected() {
        let err = Config::from_vars(vars(&[
            ("DB_URL", "postgres://localhost/records"),
            ("LOADER_STRICT_REFERENCES", "grades"),
        ]))
        .unwrap_err();
        assert!(format!("{:#}", err).contains("unknown entity type 'grades'"));
    }
}
