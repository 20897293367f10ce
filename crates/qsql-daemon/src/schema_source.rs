//! The schema-catalog default for a deployment with no live catalog adapter
//! wired in (spec C9: Oracle data dictionary / Doris MCP schema tool /
//! Postgres `information_schema`, none of which this workspace implements
//! concretely — see `qsql-router`'s own `DatabaseRouter::unavailable` for
//! the same "not configured for this deployment" shape on the execute side).

use async_trait::async_trait;
use qsql_schema::SchemaSource;
use qsql_schemas::{DatabaseType, SchemaSnapshot};

pub struct UnconfiguredSchemaSource;

#[async_trait]
impl SchemaSource for UnconfiguredSchemaSource {
    async fn fetch_schema(
        &self,
        backend: DatabaseType,
        _tables: &[String],
    ) -> Result<SchemaSnapshot, String> {
        Err(format!("{backend} schema catalog is not configured for this deployment"))
    }
}
