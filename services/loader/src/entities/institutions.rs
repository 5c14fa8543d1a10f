use async_trait::async_trait;
use serde::Deserialize;

use super::{optional, require, Entity, Resolved};
use crate::error::StoreResult;
use crate::model::{EntityKind, Institution, Upsert};
use crate::schema::Column;
use crate::store::Session;
use crate::tenant::TenantContext;

#[derive(Debug, Clone, Deserialize)]
pub struct InstitutionRow {
    #[serde(alias = "acronym")]
    pub code: String,
    pub name: String,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub city: String,
}

pub struct Institutions;

fn record(row: &InstitutionRow) -> Option<Institution> {
    Some(Institution {
        code: optional(&row.code)?,
        name: optional(&row.name)?,
        kind: row.kind.trim().to_string(),
        city: row.city.trim().to_string(),
    })
}

#[async_trait]
impl Entity for Institutions {
    type Row = InstitutionRow;
    type Record = Institution;

    const KIND: EntityKind = EntityKind::Institutions;
    const COLUMNS: &'static [Column] = &[
        Column::required("code").aka(&["acronym"]),
        Column::required("name"),
        Column::optional("type"),
        Column::optional("city"),
    ];

    fn natural_key(row: &InstitutionRow) -> &str {
        &row.code
    }

    fn check(row: &InstitutionRow) -> Vec<String> {
        let mut errors = Vec::new();
        require(&mut errors, "code", &row.code);
        require(&mut errors, "name", &row.name);
        errors
    }

    /// The platform scope may write any institution; a tenant only its own.
    async fn resolve(
        row: &InstitutionRow,
        tenant: &TenantContext,
        _session: &mut dyn Session,
    ) -> StoreResult<Resolved<Institution>> {
        let mut resolved = Resolved::default();
        let code = row.code.trim();
        if let Some(own) = tenant.institution() {
            if !code.is_empty() && own.code != code {
                resolved.reject(format!(
                    "Institution '{}' is not your institution.",
                    code
                ));
            }
        }
        Ok(resolved.with_record(record(row)))
    }

    async fn upsert(record: &Institution, session: &mut dyn Session) -> StoreResult<Upsert> {
        session.upsert_institution(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::fixtures::{ingest_csv, messages, seeded, validate_csv};
    use crate::ingest::{Counts, ReferencePolicy};
    use crate::store::Store;

    const FILE: &str = "Code,Name,Type,City\nUNIV-C,Université C,private,Thiès\n";

    #[tokio::test]
    async fn test_platform_creates_institution() {
        let seeded = seeded().await;
        let tenant = seeded.platform();
        assert!(validate_csv::<Institutions>(&seeded.store, &tenant, FILE)
            .await
            .is_empty());
        let counts = ingest_csv::<Institutions>(&seeded.store, &tenant, FILE, ReferencePolicy::Strict)
            .await
            .unwrap();
        assert_eq!(counts, Counts { created: 1, updated: 0, skipped: 0 });
        assert!(seeded.store.find_institution("UNIV-C").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_acronym_alias_accepted() {
        let seeded = seeded().await;
        let file = "acronym,name\nUNIV-A,Université A (renamed)\n";
        let counts = ingest_csv::<Institutions>(
            &seeded.store,
            &seeded.tenant_a(),
            file,
            ReferencePolicy::SkipOnMiss,
        )
        .await
        .unwrap();
        assert_eq!(counts.updated, 1);
        let tables = seeded.store.snapshot().await;
        assert_eq!(tables.institutions["UNIV-A"].1.name, "Université A (renamed)");
    }

    #[tokio::test]
    async fn test_tenant_cannot_touch_other_institution() {
        let seeded = seeded().await;
        let file = "code,name\nUNIV-B,Hijacked\n";
        let errors = validate_csv::<Institutions>(&seeded.store, &seeded.tenant_a(), file).await;
        assert_eq!(
            messages(&errors),
            vec!["Row 2: Institution 'UNIV-B' is not your institution."]
        );
    }

    #[tokio::test]
    async fn test_missing_name_reported() {
        let seeded = seeded().await;
        let file = "code,name\nUNIV-D,\n";
        let errors = validate_csv::<Institutions>(&seeded.store, &seeded.platform(), file).await;
        assert_eq!(messages(&errors), vec!["Row 2: Missing name"]);
    }
}
