//! `SchemaSource` fakes: a fixed two-column schema for any requested table,
//! and one that always errors (backend unreachable).

use async_trait::async_trait;
use qsql_schema::SchemaSource;
use qsql_schemas::{ColumnMapping, DatabaseType, SchemaSnapshot};

/// Returns the same two-column shape (`REGION`, `AMOUNT`) for every table
/// it's asked about, uppercased the way Oracle's data dictionary would
/// return them.
pub struct FixedSchemaSource;

#[async_trait]
impl SchemaSource for FixedSchemaSource {
    async fn fetch_schema(
        &self,
        _backend: DatabaseType,
        tables: &[String],
    ) -> Result<SchemaSnapshot, String> {
        let mut snapshot = SchemaSnapshot::default();
        for table in tables {
            snapshot.tables.insert(
                table.to_uppercase(),
                vec![
                    ColumnMapping { name: "REGION".to_string(), data_type: "varchar2".to_string(), nullable: false },
                    ColumnMapping { name: "AMOUNT".to_string(), data_type: "number".to_string(), nullable: false },
                ],
            );
        }
        Ok(snapshot)
    }
}

/// Fails every lookup, for exercising the `retrieve_context` error path.
pub struct UnreachableSchemaSource;

#[async_trait]
impl SchemaSource for UnreachableSchemaSource {
    async fn fetch_schema(
        &self,
        _backend: DatabaseType,
        _tables: &[String],
    ) -> Result<SchemaSnapshot, String> {
        Err("schema catalog unreachable".to_string())
    }
}
