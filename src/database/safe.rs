//! Always-rollback execution of caller-supplied SQL.
//!
//! The statement runs inside an explicit transaction that is rolled back no
//! matter how the statement ends, so writes are observable to the statement
//! itself and never persist.

use crate::database::connection::DiagnosticConnection;
use crate::database::diagnostics::bounded;
use crate::database::query::{truncate_for_log, ResultRow};
use crate::error::ServerError;
use crate::security::{find_transaction_control, StatementKind};
use serde::Serialize;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub const BEGIN_SQL: &str = "BEGIN TRANSACTION";
pub const OPENED_TRANSACTION_SQL: &str =
    "SELECT transaction_id AS opened_transaction_id FROM sys.dm_tran_current_transaction";
pub const TRANSACTION_STATE_SQL: &str =
    "SELECT @@TRANCOUNT AS tran_count, transaction_id FROM sys.dm_tran_current_transaction";
pub const STATISTICS_ON_SQL: &str = "SET STATISTICS IO ON; SET STATISTICS TIME ON;";
pub const SESSION_STATS_SQL: &str =
    "SELECT cpu_time, logical_reads FROM sys.dm_exec_sessions WHERE session_id = @@SPID";
pub const ROLLBACK_SQL: &str = "IF @@TRANCOUNT > 0 ROLLBACK TRANSACTION";

const TRANSACTION_ENDED: &str =
    "the statement ended the wrapping transaction and its changes may have persisted";

/// Outcome of a safe diagnostic run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SafeExecutionResult {
    /// Session CPU time in milliseconds, when the server reported it.
    pub cpu_time: Option<i64>,
    /// Session logical reads, when the server reported them.
    pub logical_reads: Option<i64>,
    /// First result set of the statement.
    pub rows: Vec<ResultRow>,
}

/// Execute `sql` on an open connection and roll everything back.
///
/// The statement itself is bounded by `budget` and `ct`. The rollback is
/// attempted afterwards in every case, bounded by `budget` alone. A rollback
/// failure after a successful statement fails the call; after a failed
/// statement it is logged and the statement's error is returned.
pub async fn execute_safely<C: DiagnosticConnection>(
    conn: &mut C,
    sql: &str,
    budget: Duration,
    ct: &CancellationToken,
) -> Result<SafeExecutionResult, ServerError> {
    check_statement(sql)?;

    let kind = StatementKind::classify(sql);
    info!(
        "Running safe diagnostic ({}): {}",
        kind,
        truncate_for_log(sql, 200)
    );

    let staged = bounded(budget, ct, run_staged(conn, sql, kind)).await;

    let rollback = match tokio::time::timeout(budget, conn.batch(ROLLBACK_SQL)).await {
        Ok(result) => result.map(|_| ()),
        Err(_) => Err(ServerError::timeout(budget.as_secs())),
    };

    match (staged, rollback) {
        (Ok(result), Ok(())) => Ok(result),
        (Ok(_), Err(e)) => Err(ServerError::Execution {
            message: format!("Rollback failed: {}", e),
            sql_error_code: e.sql_error_code(),
        }),
        (Err(e), rollback) => {
            if let Err(rollback_err) = rollback {
                // the server discards an open transaction when the session ends
                warn!("Rollback after failed diagnostic also failed: {}", rollback_err);
            }
            Err(e)
        }
    }
}

fn check_statement(sql: &str) -> Result<(), ServerError> {
    if sql.trim().is_empty() {
        return Err(ServerError::execution("SQL statement is empty"));
    }
    if let Some(keyword) = find_transaction_control(sql) {
        return Err(ServerError::execution(format!(
            "{} is not allowed: the statement already runs in a transaction that is always rolled back",
            keyword
        )));
    }
    Ok(())
}

async fn run_staged<C: DiagnosticConnection>(
    conn: &mut C,
    sql: &str,
    kind: StatementKind,
) -> Result<SafeExecutionResult, ServerError> {
    conn.batch(BEGIN_SQL)
        .await
        .map_err(ServerError::into_execution)?;

    let opened = conn
        .batch(OPENED_TRANSACTION_SQL)
        .await
        .map_err(ServerError::into_execution)?
        .first()
        .and_then(|r| r.get("opened_transaction_id"))
        .and_then(|v| v.as_i64());

    if kind.collects_statistics() {
        conn.batch(STATISTICS_ON_SQL)
            .await
            .map_err(ServerError::into_execution)?;
    }

    let rows = match conn.batch(sql).await {
        Ok(rows) => rows,
        Err(e) => {
            // EXEC('COMMIT') commits first, then fails with 266
            let ended = transaction_ended(conn, opened).await.unwrap_or(false);
            return Err(match e.into_execution() {
                ServerError::Execution {
                    message,
                    sql_error_code,
                } if ended => ServerError::Execution {
                    message: format!("{}; {}", message, TRANSACTION_ENDED),
                    sql_error_code,
                },
                e => e,
            });
        }
    };

    if transaction_ended(conn, opened).await? {
        return Err(ServerError::execution(TRANSACTION_ENDED));
    }

    let stats = conn
        .batch(SESSION_STATS_SQL)
        .await
        .map_err(ServerError::into_execution)?;
    let session = stats.first();

    Ok(SafeExecutionResult {
        cpu_time: session.and_then(|r| r.get("cpu_time")).and_then(|v| v.as_i64()),
        logical_reads: session
            .and_then(|r| r.get("logical_reads"))
            .and_then(|v| v.as_i64()),
        rows,
    })
}

/// Whether the statement ended the transaction it was wrapped in.
///
/// Dynamic SQL such as `EXEC('COM' + 'MIT')` gets past the keyword guard.
/// Afterwards either no transaction is open or a different one is.
async fn transaction_ended<C: DiagnosticConnection>(
    conn: &mut C,
    opened: Option<i64>,
) -> Result<bool, ServerError> {
    let state = conn
        .batch(TRANSACTION_STATE_SQL)
        .await
        .map_err(ServerError::into_execution)?;
    let state = state.first();
    let tran_count = state.and_then(|r| r.get("tran_count")).and_then(|v| v.as_i64());
    let current = state
        .and_then(|r| r.get("transaction_id"))
        .and_then(|v| v.as_i64());

    let ended = tran_count == Some(0)
        || matches!((opened, current), (Some(opened), Some(current)) if opened != current);
    if ended {
        warn!(
            "Diagnostic ended its wrapping transaction (tran_count: {:?}, opened: {:?}, current: {:?})",
            tran_count, opened, current
        );
    }
    Ok(ended)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::connection::Connector;
    use crate::database::testing::RecordingConnector;
    use tokio_test::{assert_err, assert_ok};

    const BUDGET: Duration = Duration::from_secs(5);

    fn session_stats() -> Vec<ResultRow> {
        vec![ResultRow::new()
            .with("cpu_time", 12)
            .with("logical_reads", 340i64)]
    }

    async fn run(connector: &RecordingConnector, sql: &str) -> Result<SafeExecutionResult, ServerError> {
        let mut conn = connector.open("Sales").await.unwrap();
        let result = execute_safely(&mut conn, sql, BUDGET, &CancellationToken::new()).await;
        conn.close().await.unwrap();
        result
    }

    #[tokio::test]
    async fn test_select_collects_statistics() {
        let connector = RecordingConnector::new()
            .returning("dm_exec_sessions", session_stats())
            .returning(
                "FROM orders",
                vec![ResultRow::new().with("id", 1).with("status", "open")],
            );

        let result = assert_ok!(run(&connector, "SELECT id, status FROM orders").await);

        assert_eq!(result.cpu_time, Some(12));
        assert_eq!(result.logical_reads, Some(340));
        assert_eq!(result.rows.len(), 1);

        let journal = connector.journal();
        assert_eq!(
            journal.statements,
            vec![
                BEGIN_SQL,
                OPENED_TRANSACTION_SQL,
                STATISTICS_ON_SQL,
                "SELECT id, status FROM orders",
                TRANSACTION_STATE_SQL,
                SESSION_STATS_SQL,
                ROLLBACK_SQL,
            ]
        );
    }

    #[tokio::test]
    async fn test_write_skips_statistics_but_rolls_back() {
        let connector = RecordingConnector::new();

        assert_ok!(run(&connector, "DELETE FROM t").await);

        let journal = connector.journal();
        assert!(!journal.saw("SET STATISTICS"));
        assert!(!journal.saw("COMMIT"));
        let payload = journal.position("DELETE FROM t").unwrap();
        let rollback = journal.position(ROLLBACK_SQL).unwrap();
        assert!(journal.position(BEGIN_SQL).unwrap() < payload);
        assert!(payload < rollback);
        assert_eq!(rollback, journal.statements.len() - 1);
    }

    #[tokio::test]
    async fn test_missing_session_stats_are_null() {
        let connector = RecordingConnector::new();

        let result = assert_ok!(run(&connector, "with x as (select 1 as a) select * from x").await);

        assert_eq!(result.cpu_time, None);
        assert_eq!(result.logical_reads, None);
        assert!(result.rows.is_empty());
        assert!(connector.journal().saw("SET STATISTICS"));
    }

    #[tokio::test]
    async fn test_failure_is_reported_and_rolled_back() {
        let connector =
            RecordingConnector::new().failing("missing_table", 208, "Invalid object name 'missing_table'.");

        let err = assert_err!(run(&connector, "UPDATE missing_table SET x = 1").await);

        assert!(matches!(err, ServerError::Execution { .. }));
        assert_eq!(err.sql_error_code(), Some(208));
        assert!(err.to_string().contains("Invalid object name"));

        let journal = connector.journal();
        assert!(journal.position("missing_table").unwrap() < journal.position(ROLLBACK_SQL).unwrap());
        assert!(!journal.saw("dm_exec_sessions"));
        assert_eq!(journal.closed, 1);
    }

    #[tokio::test]
    async fn test_rollback_failure_fails_successful_run() {
        let connector = RecordingConnector::new().failing("ROLLBACK TRANSACTION", 3903, "no corresponding BEGIN");

        let err = assert_err!(run(&connector, "SELECT 1").await);

        assert!(matches!(err, ServerError::Execution { .. }));
        assert!(err.to_string().contains("Rollback failed"));
    }

    #[tokio::test]
    async fn test_rollback_failure_keeps_primary_error() {
        let connector = RecordingConnector::new()
            .failing("ROLLBACK TRANSACTION", 3903, "no corresponding BEGIN")
            .failing("FROM t", 547, "conflicted with the FOREIGN KEY constraint");

        let err = assert_err!(run(&connector, "DELETE FROM t").await);

        assert_eq!(err.sql_error_code(), Some(547));
    }

    #[tokio::test]
    async fn test_transaction_control_is_rejected_before_execution() {
        for sql in ["DELETE FROM t; COMMIT", "BEGIN TRAN UPDATE t SET x = 1", "ROLLBACK"] {
            let connector = RecordingConnector::new();

            let err = assert_err!(run(&connector, sql).await);

            assert!(matches!(err, ServerError::Execution { .. }));
            assert!(connector.journal().statements.is_empty(), "{sql} reached the server");
        }
    }

    #[tokio::test]
    async fn test_dynamic_commit_is_detected() {
        let connector = RecordingConnector::new()
            .returning(
                "opened_transaction_id",
                vec![ResultRow::new().with("opened_transaction_id", 7001i64)],
            )
            .returning(
                "AS tran_count",
                vec![ResultRow::new()
                    .with("tran_count", 0)
                    .with("transaction_id", 7002i64)],
            );
        let sql = "DELETE FROM t; EXEC('COM' + 'MIT')";

        let err = assert_err!(run(&connector, sql).await);

        assert!(matches!(err, ServerError::Execution { .. }));
        assert!(err.to_string().contains("may have persisted"));

        let journal = connector.journal();
        assert!(journal.position(sql).unwrap() < journal.position(TRANSACTION_STATE_SQL).unwrap());
        assert!(!journal.saw("dm_exec_sessions"));
        assert_eq!(journal.position(ROLLBACK_SQL), Some(journal.statements.len() - 1));
    }

    #[tokio::test]
    async fn test_commit_then_error_is_reported_as_ended() {
        let connector = RecordingConnector::new()
            .returning(
                "AS tran_count",
                vec![ResultRow::new()
                    .with("tran_count", 0)
                    .with("transaction_id", 7002i64)],
            )
            .failing(
                "EXEC(",
                266,
                "Transaction count after EXECUTE indicates a mismatching number of BEGIN and COMMIT statements.",
            );

        let err = assert_err!(run(&connector, "DELETE FROM t; EXEC('COM' + 'MIT')").await);

        assert_eq!(err.sql_error_code(), Some(266));
        assert!(err.to_string().contains("may have persisted"));
        assert!(connector.journal().saw(ROLLBACK_SQL));
    }

    #[tokio::test]
    async fn test_replaced_transaction_is_detected() {
        let connector = RecordingConnector::new()
            .returning(
                "opened_transaction_id",
                vec![ResultRow::new().with("opened_transaction_id", 7001i64)],
            )
            .returning(
                "AS tran_count",
                vec![ResultRow::new()
                    .with("tran_count", 1)
                    .with("transaction_id", 7002i64)],
            );

        let err = assert_err!(run(&connector, "EXEC('COMM' + 'IT; BEG' + 'IN TRAN')").await);

        assert!(err.to_string().contains("wrapping transaction"));
    }

    #[tokio::test]
    async fn test_nested_transaction_is_still_wrapped() {
        let connector = RecordingConnector::new()
            .returning(
                "opened_transaction_id",
                vec![ResultRow::new().with("opened_transaction_id", 7001i64)],
            )
            .returning(
                "AS tran_count",
                vec![ResultRow::new()
                    .with("tran_count", 2)
                    .with("transaction_id", 7001i64)],
            );

        assert_ok!(run(&connector, "EXEC('BEGIN ' + 'TRAN')").await);
    }

    #[tokio::test]
    async fn test_empty_statement_is_rejected() {
        let connector = RecordingConnector::new();

        let err = assert_err!(run(&connector, "  \n ").await);

        assert!(err.to_string().contains("empty"));
        assert!(connector.journal().statements.is_empty());
    }

    #[tokio::test]
    async fn test_timeout_still_rolls_back() {
        let connector = RecordingConnector::new().stalling("WAITFOR", Duration::from_secs(10));
        let mut conn = connector.open("Sales").await.unwrap();

        let err = execute_safely(
            &mut conn,
            "WAITFOR DELAY '00:01:00'",
            Duration::from_millis(20),
            &CancellationToken::new(),
        )
        .await
        .unwrap_err();

        assert!(matches!(err, ServerError::Timeout { .. }));
        assert!(connector.journal().saw(ROLLBACK_SQL));
    }

    #[tokio::test]
    async fn test_cancellation_still_rolls_back() {
        let connector = RecordingConnector::new();
        let ct = CancellationToken::new();
        ct.cancel();
        let mut conn = connector.open("Sales").await.unwrap();

        let err = execute_safely(&mut conn, "SELECT 1", BUDGET, &ct)
            .await
            .unwrap_err();

        assert!(matches!(err, ServerError::Cancelled));
        assert!(connector.journal().saw(ROLLBACK_SQL));
    }

    #[test]
    fn test_result_serialization() {
        let result = SafeExecutionResult {
            cpu_time: Some(4),
            logical_reads: None,
            rows: vec![ResultRow::new().with("name", "orders")],
        };

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "cpu_time": 4,
                "logical_reads": null,
                "rows": [{"name": "orders"}]
            })
        );
    }
}
