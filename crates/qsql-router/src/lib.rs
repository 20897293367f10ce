//! qsql-router — database router (spec C15 / §4.15).
//!
//! Grounded on `original_source/backend/app/core/postgres_client.py`
//! (`execute_query`'s read-only transaction + statement-timeout sequence)
//! and `original_source/backend/app/core/doris_client.py`
//! (`execute_sql`'s `data`/`metadata.columns` normalization, including the
//! "columns is always a list of strings" guard when a column name is
//! missing). Oracle dispatch reuses C4's pool and `PooledClient::execute_sql`
//! directly, since that pool already owns the long-lived SQLcl session.

use std::time::Duration;

use qsql_errors::{Backend, BackendError, normalize};
use qsql_pool::Pool;
use qsql_schemas::{DatabaseType, ExecutionResult, NormalizedError, SchemaSnapshot};
use tracing::{info, warn};

/// A Doris MCP tool call. `call_tool` returns the already-JSON-decoded
/// payload from the tool's `content` text block (spec §6: MCP responses
/// carry a `content` block whose text is JSON-decoded); this crate only
/// normalizes the decoded shape, it doesn't speak MCP/JSON-RPC itself.
#[async_trait::async_trait]
pub trait DorisMcpClient: Send + Sync {
    async fn call_tool(
        &self,
        tool_name: &str,
        arguments: serde_json::Value,
    ) -> Result<serde_json::Value, String>;
}

/// A PostgreSQL adapter. Enforcing `SET TRANSACTION READ ONLY` and the
/// statement timeout is this trait's contract, not the router's — the
/// router only supplies the timeout and trusts the adapter to apply it the
/// way `postgres_client.py`'s `get_connection`/`execute_query` do.
#[async_trait::async_trait]
pub trait PostgresAdapter: Send + Sync {
    async fn execute_read_only(
        &self,
        sql: &str,
        statement_timeout: Duration,
    ) -> Result<ExecutionResult, String>;
}

pub struct RouterConfig {
    pub oracle_acquire_timeout: Duration,
    pub postgres_statement_timeout: Duration,
    pub doris_exec_tool: String,
    pub doris_max_rows: u32,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            oracle_acquire_timeout: Duration::from_secs(5),
            postgres_statement_timeout: Duration::from_secs(30),
            doris_exec_tool: "exec_query".to_string(),
            doris_max_rows: 1000,
        }
    }
}

/// Dispatches a validated, sandboxed query to its backend and returns a
/// uniform result envelope, spec §4.15. Any backend not configured for
/// this deployment (e.g. no Doris MCP client wired up) reports
/// `ErrorCategory::ConnectionError` rather than panicking.
pub struct DatabaseRouter {
    oracle: Option<std::sync::Arc<Pool>>,
    doris: Option<std::sync::Arc<dyn DorisMcpClient>>,
    postgres: Option<std::sync::Arc<dyn PostgresAdapter>>,
    config: RouterConfig,
}

impl DatabaseRouter {
    pub fn new(
        oracle: Option<std::sync::Arc<Pool>>,
        doris: Option<std::sync::Arc<dyn DorisMcpClient>>,
        postgres: Option<std::sync::Arc<dyn PostgresAdapter>>,
        config: RouterConfig,
    ) -> Self {
        Self {
            oracle,
            doris,
            postgres,
            config,
        }
    }

    fn unavailable(backend: Backend, database_type: DatabaseType) -> NormalizedError {
        normalize(
            &BackendError {
                backend,
                code: None,
                message: format!("{database_type} backend is not configured for this deployment"),
            },
            None,
        )
    }

    /// spec §4.15 `execute(database_type, sql, connection_name, user_id,
    /// request_id)`. `connection_name` identifies the logical connection
    /// profile for audit/tracing (the original's SQLcl pool is a single
    /// process pool per deployment, not one pool per named connection, so
    /// it does not change which pool is used — only what gets logged).
    pub async fn execute(
        &self,
        database_type: DatabaseType,
        sql: &str,
        connection_name: &str,
        user_id: &str,
        request_id: &str,
        schema: Option<&SchemaSnapshot>,
    ) -> Result<ExecutionResult, NormalizedError> {
        info!(
            %database_type,
            connection_name,
            user_id,
            request_id,
            "dispatching query to backend"
        );
        match database_type {
            DatabaseType::Oracle => self.execute_oracle(sql, schema).await,
            DatabaseType::Doris => self.execute_doris(sql, schema).await,
            DatabaseType::Postgres => self.execute_postgres(sql, schema).await,
        }
    }

    async fn execute_oracle(
        &self,
        sql: &str,
        schema: Option<&SchemaSnapshot>,
    ) -> Result<ExecutionResult, NormalizedError> {
        let Some(pool) = &self.oracle else {
            return Err(Self::unavailable(Backend::Oracle, DatabaseType::Oracle));
        };

        let lease = pool
            .acquire(self.config.oracle_acquire_timeout)
            .await
            .map_err(|e| {
                normalize(
                    &BackendError {
                        backend: Backend::Oracle,
                        code: None,
                        message: e.to_string(),
                    },
                    schema,
                )
            })?;

        match lease.client().execute_sql(sql).await {
            Ok(result) => Ok(result),
            Err(message) => {
                let code = extract_ora_code(&message);
                Err(normalize(
                    &BackendError {
                        backend: Backend::Oracle,
                        code,
                        message,
                    },
                    schema,
                ))
            }
        }
    }

    async fn execute_doris(
        &self,
        sql: &str,
        schema: Option<&SchemaSnapshot>,
    ) -> Result<ExecutionResult, NormalizedError> {
        let Some(client) = &self.doris else {
            return Err(Self::unavailable(Backend::Doris, DatabaseType::Doris));
        };

        let arguments = serde_json::json!({
            "sql": sql,
            "max_rows": self.config.doris_max_rows,
            "timeout": 60,
        });

        let payload = client
            .call_tool(&self.config.doris_exec_tool, arguments)
            .await
            .map_err(|e| {
                normalize(
                    &BackendError {
                        backend: Backend::Doris,
                        code: None,
                        message: e,
                    },
                    schema,
                )
            })?;

        normalize_doris_result(&payload).map_err(|message| {
            normalize(
                &BackendError {
                    backend: Backend::Doris,
                    code: None,
                    message,
                },
                schema,
            )
        })
    }

    async fn execute_postgres(
        &self,
        sql: &str,
        schema: Option<&SchemaSnapshot>,
    ) -> Result<ExecutionResult, NormalizedError> {
        let Some(adapter) = &self.postgres else {
            return Err(Self::unavailable(Backend::Postgres, DatabaseType::Postgres));
        };

        adapter
            .execute_read_only(sql, self.config.postgres_statement_timeout)
            .await
            .map_err(|message| {
                let code = extract_sqlstate(&message);
                normalize(
                    &BackendError {
                        backend: Backend::Postgres,
                        code,
                        message,
                    },
                    schema,
                )
            })
    }
}

fn extract_ora_code(message: &str) -> Option<String> {
    let re = regex::Regex::new(r"ORA-\d{5}").ok()?;
    re.find(message).map(|m| m.as_str().to_string())
}

fn extract_sqlstate(message: &str) -> Option<String> {
    let re = regex::Regex::new(r"\b[0-9A-Z]{5}\b").ok()?;
    re.find(message).map(|m| m.as_str().to_string())
}

/// Normalizes a Doris MCP `exec_query` payload into the uniform result
/// envelope, spec §4.15's "`columns` is always a list of strings (bare
/// strings if column names absent)" contract. Grounded on
/// `doris_client.py`'s `execute_sql`.
fn normalize_doris_result(payload: &serde_json::Value) -> Result<ExecutionResult, String> {
    if payload.get("status").and_then(|s| s.as_str()) == Some("error") {
        let message = payload
            .get("error")
            .or_else(|| payload.get("message"))
            .and_then(|v| v.as_str())
            .unwrap_or("Doris query failed")
            .to_string();
        return Err(message);
    }

    let inner = payload
        .get("result")
        .filter(|v| v.is_object())
        .unwrap_or(payload);

    let data = inner.get("data").and_then(|d| d.as_array());
    let row_count_hint = inner.get("row_count").and_then(|v| v.as_u64());
    let execution_time = inner.get("execution_time").and_then(|v| v.as_f64());
    let columns_meta = inner
        .get("metadata")
        .and_then(|m| m.get("columns"))
        .and_then(|c| c.as_array())
        .cloned()
        .unwrap_or_default();

    let mut column_names = Vec::with_capacity(columns_meta.len());
    for col in &columns_meta {
        let name = if col.is_object() {
            col.get("name")
                .or_else(|| col.get("column_name"))
                .and_then(|v| v.as_str())
                .map(|s| s.to_string())
                .unwrap_or_default()
        } else {
            col.as_str().map(|s| s.to_string()).unwrap_or_default()
        };
        column_names.push(name);
    }

    let mut rows = Vec::new();
    if let Some(data) = data {
        for row in data {
            if let Some(obj) = row.as_object() {
                if column_names.is_empty() {
                    warn!("Doris row is an object but no column metadata was present");
                }
                rows.push(
                    column_names
                        .iter()
                        .map(|name| obj.get(name).cloned().unwrap_or(serde_json::Value::Null))
                        .collect(),
                );
            } else {
                rows.push(vec![row.clone()]);
            }
        }
    }

    let row_count = row_count_hint.map(|v| v as usize).unwrap_or(rows.len());
    let execution_time_ms = execution_time.map(|s| (s * 1000.0) as u64).unwrap_or(0);

    Ok(ExecutionResult {
        columns: column_names,
        rows,
        row_count,
        execution_time_ms,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_doris_object_rows_against_column_metadata() {
        let payload = serde_json::json!({
            "status": "success",
            "result": {
                "data": [{"ID": 1, "NAME": "a"}, {"ID": 2, "NAME": "b"}],
                "row_count": 2,
                "execution_time": 0.125,
                "metadata": {"columns": [{"name": "ID"}, {"name": "NAME"}]},
            }
        });
        let result = normalize_doris_result(&payload).unwrap();
        assert_eq!(result.columns, vec!["ID".to_string(), "NAME".to_string()]);
        assert_eq!(result.row_count, 2);
        assert_eq!(result.execution_time_ms, 125);
        assert_eq!(result.rows[0][0], serde_json::json!(1));
    }

    #[test]
    fn normalizes_doris_bare_list_rows_without_column_metadata() {
        let payload = serde_json::json!({
            "status": "success",
            "result": {
                "data": [1, 2, 3],
                "metadata": {},
            }
        });
        let result = normalize_doris_result(&payload).unwrap();
        assert!(result.columns.is_empty());
        assert_eq!(result.rows.len(), 3);
    }

    #[test]
    fn doris_error_status_is_propagated() {
        let payload = serde_json::json!({"status": "error", "error": "table not found"});
        let err = normalize_doris_result(&payload).unwrap_err();
        assert!(err.contains("table not found"));
    }

    #[test]
    fn extracts_ora_code_from_message() {
        assert_eq!(
            extract_ora_code("ORA-00942: table or view does not exist"),
            Some("ORA-00942".to_string())
        );
        assert_eq!(extract_ora_code("connection refused"), None);
    }
}
