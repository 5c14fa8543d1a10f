use async_trait::async_trait;
use serde::Deserialize;
use uuid::Uuid;

use super::{in_use, optional, require, unknown_institute, Entity, Resolved};
use crate::error::StoreResult;
use crate::model::{EntityKind, Program, Upsert};
use crate::schema::Column;
use crate::store::Session;
use crate::tenant::{self, TenantContext};

#[derive(Debug, Clone, Deserialize)]
pub struct ProgramRow {
    pub program_id: String,
    pub name: String,
    pub domain: String,
    pub level: String,
    pub institute_acronym: String,
}

pub struct Programs;

fn record(row: &ProgramRow, institute_id: Uuid) -> Option<Program> {
    Some(Program {
        program_id: optional(&row.program_id)?,
        institute_id,
        name: optional(&row.name)?,
        domain: optional(&row.domain)?,
        level: optional(&row.level)?,
    })
}

#[async_trait]
impl Entity for Programs {
    type Row = ProgramRow;
    type Record = Program;

    const KIND: EntityKind = EntityKind::Programs;
    const COLUMNS: &'static [Column] = &[
        Column::required("program_id"),
        Column::required("name"),
        Column::required("domain"),
        Column::required("level"),
        Column::required("institute_acronym"),
    ];

    fn natural_key(row: &ProgramRow) -> &str {
        &row.program_id
    }

    fn check(row: &ProgramRow) -> Vec<String> {
        let mut errors = Vec::new();
        require(&mut errors, "program_id", &row.program_id);
        require(&mut errors, "name", &row.name);
        require(&mut errors, "domain", &row.domain);
        require(&mut errors, "level", &row.level);
        require(&mut errors, "institute_acronym", &row.institute_acronym);
        errors
    }

    async fn resolve(
        row: &ProgramRow,
        tenant: &TenantContext,
        session: &mut dyn Session,
    ) -> StoreResult<Resolved<Program>> {
        let mut resolved = Resolved::default();

        let institute = tenant::institute(session, tenant, &row.institute_acronym).await?;
        let institute = resolved.found(&row.institute_acronym, institute, || {
            unknown_institute(&row.institute_acronym)
        });

        if let Some(existing) = session.program(row.program_id.trim()).await? {
            if !tenant.owns(existing.institution_id) {
                resolved.reject(in_use("program_id", &row.program_id));
            }
        }

        let record = institute.and_then(|i| record(row, i.institute_id));
        Ok(resolved.with_record(record))
    }

    async fn upsert(record: &Program, session: &mut dyn Session) -> StoreResult<Upsert> {
        session.upsert_program(record).await
    }
}
