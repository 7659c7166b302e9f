//! MCP tools for SQL Server diagnostics.
//!
//! - `get_table_schema`: columns of one table
//! - `get_table_names`: base tables in a schema
//! - `get_table_row_counts`: row counts per table
//! - `get_missing_indexes`: missing-index suggestions ranked by improvement score
//! - `get_index_usage_stats`: seeks, scans, lookups and updates per index
//! - `get_top_expensive_queries`: the ten slowest cached statements
//! - `get_table_io_stats`: index usage joined with index type
//! - `get_top_waits`: wait statistics without idle waits
//! - `run_safe_diagnostic`: arbitrary SQL in an always-rolled-back transaction
//!
//! Every tool opens its own connection to the requested database. Failures are
//! returned as tool errors so the caller sees the server message.

mod inputs;

pub use inputs::*;

use crate::error::ServerError;
use crate::server::DiagnosticsServer;
use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{CallToolResult, Content};
use rmcp::service::{RequestContext, RoleServer};
use rmcp::{tool, tool_router, ErrorData};
use serde::Serialize;
use tracing::{debug, warn};

pub(crate) fn create_tool_router() -> ToolRouter<DiagnosticsServer> {
    DiagnosticsServer::tool_router()
}

#[tool_router]
impl DiagnosticsServer {
    #[tool(description = "Get the columns of a table: name, data type and nullability.")]
    async fn get_table_schema(
        &self,
        Parameters(input): Parameters<TableSchemaInput>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        debug!(
            "get_table_schema: {}.{}.{}",
            input.db, input.db_schema, input.table
        );
        let result = match require_db(&input.db) {
            Ok(db) => {
                self.diagnostics
                    .table_schema(db, &input.db_schema, &input.table, &context.ct)
                    .await
            }
            Err(e) => Err(e),
        };
        respond("get_table_schema", result)
    }

    #[tool(description = "List the base tables in a schema (default dbo).")]
    async fn get_table_names(
        &self,
        Parameters(input): Parameters<TableNamesInput>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        debug!("get_table_names: {}.{}", input.db, input.db_schema);
        let result = match require_db(&input.db) {
            Ok(db) => {
                self.diagnostics
                    .table_names(db, &input.db_schema, &context.ct)
                    .await
            }
            Err(e) => Err(e),
        };
        respond("get_table_names", result)
    }

    #[tool(description = "Row counts for every user table, largest first.")]
    async fn get_table_row_counts(
        &self,
        Parameters(input): Parameters<DatabaseInput>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let result = match require_db(&input.db) {
            Ok(db) => self.diagnostics.table_row_counts(db, &context.ct).await,
            Err(e) => Err(e),
        };
        respond("get_table_row_counts", result)
    }

    #[tool(
        description = "Missing-index suggestions for the database, ranked by estimated improvement (avg cost x impact x (seeks + scans))."
    )]
    async fn get_missing_indexes(
        &self,
        Parameters(input): Parameters<DatabaseInput>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let result = match require_db(&input.db) {
            Ok(db) => self.diagnostics.missing_indexes(db, &context.ct).await,
            Err(e) => Err(e),
        };
        respond("get_missing_indexes", result)
    }

    #[tool(description = "Seeks, scans, lookups and updates for every index on user tables.")]
    async fn get_index_usage_stats(
        &self,
        Parameters(input): Parameters<DatabaseInput>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let result = match require_db(&input.db) {
            Ok(db) => self.diagnostics.index_usage_stats(db, &context.ct).await,
            Err(e) => Err(e),
        };
        respond("get_index_usage_stats", result)
    }

    #[tool(
        description = "The 10 cached statements with the highest average elapsed time per execution."
    )]
    async fn get_top_expensive_queries(
        &self,
        Parameters(input): Parameters<DatabaseInput>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let result = match require_db(&input.db) {
            Ok(db) => self.diagnostics.top_expensive_queries(db, &context.ct).await,
            Err(e) => Err(e),
        };
        respond("get_top_expensive_queries", result)
    }

    #[tool(description = "Per-index I/O activity in the database, with index type.")]
    async fn get_table_io_stats(
        &self,
        Parameters(input): Parameters<DatabaseInput>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let result = match require_db(&input.db) {
            Ok(db) => self.diagnostics.table_io_stats(db, &context.ct).await,
            Err(e) => Err(e),
        };
        respond("get_table_io_stats", result)
    }

    #[tool(
        description = "Server wait statistics ordered by total wait time, excluding idle and background waits."
    )]
    async fn get_top_waits(
        &self,
        Parameters(input): Parameters<DatabaseInput>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let result = match require_db(&input.db) {
            Ok(db) => self.diagnostics.top_waits(db, &context.ct).await,
            Err(e) => Err(e),
        };
        respond("get_top_waits", result)
    }

    #[tool(
        description = "Run SQL inside a transaction that is always rolled back, so nothing persists. SELECT/WITH statements also report session cpu_time and logical_reads. Returns a one-element list of {cpu_time, logical_reads, rows}. COMMIT, ROLLBACK and BEGIN/SAVE TRANSACTION are rejected, and a statement that ends the wrapping transaction through dynamic SQL is reported as an error."
    )]
    async fn run_safe_diagnostic(
        &self,
        Parameters(input): Parameters<SafeDiagnosticInput>,
        context: RequestContext<RoleServer>,
    ) -> Result<CallToolResult, ErrorData> {
        let result = match require_db(&input.db) {
            Ok(db) => {
                self.diagnostics
                    .run_safe_diagnostic(db, &input.sql, &context.ct)
                    .await
            }
            Err(e) => Err(e),
        };
        respond("run_safe_diagnostic", result)
    }
}

fn require_db(db: &str) -> Result<&str, ServerError> {
    let db = db.trim();
    if db.is_empty() {
        Err(ServerError::invalid_input("db must name a database"))
    } else {
        Ok(db)
    }
}

/// Turn an operation result into a tool result.
///
/// Domain failures become tool errors (`isError: true`) carrying the message
/// and a suggestion; only serialization problems are protocol errors.
fn respond<T: Serialize>(
    tool: &str,
    result: Result<T, ServerError>,
) -> Result<CallToolResult, ErrorData> {
    match result {
        Ok(value) => Ok(CallToolResult::success(vec![Content::json(value)?])),
        Err(e) => {
            warn!("{} failed: {}", tool, e);
            Ok(CallToolResult::error(vec![Content::text(
                e.to_user_message(),
            )]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::{ResultRow, SafeExecutionResult};

    #[test]
    fn test_require_db() {
        assert_eq!(require_db(" Sales ").unwrap(), "Sales");
        let err = require_db("   ").unwrap_err();
        assert!(matches!(err, ServerError::InvalidInput(_)));
        assert_eq!(err.sql_error_code(), None);
    }

    #[test]
    fn test_respond_success_is_json() {
        let rows = vec![ResultRow::new().with("wait_type", "CXPACKET")];
        let result = respond("get_top_waits", Ok(rows)).unwrap();

        assert_eq!(result.is_error, Some(false));
        let text = &result.content[0].as_text().unwrap().text;
        let json: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(json, serde_json::json!([{"wait_type": "CXPACKET"}]));
    }

    #[test]
    fn test_safe_diagnostic_wire_shape_is_list() {
        let result = SafeExecutionResult {
            cpu_time: Some(1),
            logical_reads: Some(2),
            rows: vec![ResultRow::new().with("a", 1)],
        };
        let result = respond("run_safe_diagnostic", Ok(vec![result])).unwrap();

        let text = &result.content[0].as_text().unwrap().text;
        let json: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(
            json,
            serde_json::json!([{"cpu_time": 1, "logical_reads": 2, "rows": [{"a": 1}]}])
        );
    }

    #[test]
    fn test_respond_error_is_tool_error() {
        let err = ServerError::Query {
            message: "The user does not have permission to perform this action.".to_string(),
            sql_error_code: Some(297),
        };
        let result = respond::<Vec<ResultRow>>("get_top_waits", Err(err)).unwrap();

        assert_eq!(result.is_error, Some(true));
        let text = &result.content[0].as_text().unwrap().text;
        assert!(text.contains("does not have permission"));
        assert!(text.contains("VIEW SERVER STATE"));
    }
}
