use async_trait::async_trait;
use serde::Deserialize;

use super::{optional, require, Entity, Resolved};
use crate::error::StoreResult;
use crate::model::{EntityKind, Institute, Upsert};
use crate::schema::Column;
use crate::store::Session;
use crate::tenant::TenantContext;

#[derive(Debug, Clone, Deserialize)]
pub struct InstituteRow {
    pub acronym: String,
    pub name: String,
}

/// Institutes always belong to the caller's institution.
pub struct Institutes;

#[async_trait]
impl Entity for Institutes {
    type Row = InstituteRow;
    type Record = Institute;

    const KIND: EntityKind = EntityKind::Institutes;
    const COLUMNS: &'static [Column] = &[Column::required("acronym"), Column::required("name")];

    fn natural_key(row: &InstituteRow) -> &str {
        &row.acronym
    }

    fn check(row: &InstituteRow) -> Vec<String> {
        let mut errors = Vec::new();
        require(&mut errors, "acronym", &row.acronym);
        require(&mut errors, "name", &row.name);
        errors
    }

    async fn resolve(
        row: &InstituteRow,
        tenant: &TenantContext,
        _session: &mut dyn Session,
    ) -> StoreResult<Resolved<Institute>> {
        let mut resolved = Resolved::default();
        let Some(institution_id) = tenant.institution_id() else {
            resolved.reject("Institutes can only be loaded for an institution.");
            return Ok(resolved);
        };
        let record = optional(&row.acronym).zip(optional(&row.name)).map(|(acronym, name)| {
            Institute {
                institution_id,
                acronym,
                name,
            }
        });
        Ok(resolved.with_record(record))
    }

    async fn upsert(record: &Institute, session: &mut dyn Session) -> StoreResult<Upsert> {
        session.upsert_institute(record).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::fixtures::{ingest_csv, messages, seeded, validate_csv};
    use crate::ingest::{Counts, ReferencePolicy};
    use crate::store::{Catalog, Store};

    #[tokio::test]
    async fn test_same_acronym_in_two_institutions() {
        let seeded = seeded().await;
        let file = "acronym,name\nFSE,Faculté des Sciences de l'Education\n";
        // UNIV-A already has FSE; UNIV-B does not.
        let a = ingest_csv::<Institutes>(&seeded.store, &seeded.tenant_a(), file, ReferencePolicy::Strict)
            .await
            .unwrap();
        let b = ingest_csv::<Institutes>(&seeded.store, &seeded.tenant_b(), file, ReferencePolicy::Strict)
            .await
            .unwrap();
        assert_eq!(a, Counts { created: 0, updated: 1, skipped: 0 });
        assert_eq!(b, Counts { created: 1, updated: 0, skipped: 0 });
        assert_eq!(seeded.store.snapshot().await.institutes.len(), 4);
    }

    #[tokio::test]
    async fn test_platform_scope_rejected() {
        let seeded = seeded().await;
        let file = "acronym,name\nFLSH,Lettres\n";
        let errors = validate_csv::<Institutes>(&seeded.store, &seeded.platform(), file).await;
        assert_eq!(
            messages(&errors),
            vec!["Row 2: Institutes can only be loaded for an institution."]
        );
    }

    #[tokio::test]
    async fn test_created_institute_is_scoped() {
        let seeded = seeded().await;
        let file = "acronym,name\nFLSH,Lettres\n";
        ingest_csv::<Institutes>(&seeded.store, &seeded.tenant_b(), file, ReferencePolicy::Strict)
            .await
            .unwrap();
        let mut session = seeded.store.begin(EntityKind::Institutes).await.unwrap();
        assert!(session
            .institute(seeded.univ_b.institution_id, "FLSH")
            .await
            .unwrap()
            .is_some());
        assert!(session
            .institute(seeded.univ_a.institution_id, "FLSH")
            .await
            .unwrap()
            .is_none());
    }
}
