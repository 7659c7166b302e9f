//! The fixed diagnostic query set.
//!
//! Each operation opens a connection for the requested database, runs one
//! read-only statement, shapes the rows and closes the connection before
//! returning, on success and on failure alike.

use crate::constants::{EXCLUDED_WAIT_TYPES, TOP_EXPENSIVE_QUERY_LIMIT};
use crate::database::connection::{Connector, DiagnosticConnection};
use crate::database::query::ResultRow;
use crate::database::safe::{execute_safely, SafeExecutionResult};
use crate::database::types::SqlValue;
use crate::error::ServerError;
use once_cell::sync::Lazy;
use std::cmp::Ordering;
use std::future::Future;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

// =========================================================================
// Statements
// =========================================================================

pub const TABLE_SCHEMA_SQL: &str = "\
SELECT COLUMN_NAME, DATA_TYPE, IS_NULLABLE
FROM INFORMATION_SCHEMA.COLUMNS
WHERE TABLE_SCHEMA = @P1 AND TABLE_NAME = @P2";

pub const TABLE_NAMES_SQL: &str = "\
SELECT TABLE_NAME
FROM INFORMATION_SCHEMA.TABLES
WHERE TABLE_TYPE = 'BASE TABLE' AND TABLE_SCHEMA = @P1";

pub const TABLE_ROW_COUNTS_SQL: &str = "\
SELECT
    SCHEMA_NAME(t.schema_id) AS schema_name,
    t.name AS table_name,
    SUM(p.rows) AS row_count
FROM sys.tables AS t
JOIN sys.partitions AS p ON t.object_id = p.object_id
WHERE p.index_id IN (0, 1)
GROUP BY SCHEMA_NAME(t.schema_id), t.name
ORDER BY row_count DESC";

pub const MISSING_INDEXES_SQL: &str = "\
SELECT
    DB_NAME(mid.database_id) AS database_name,
    OBJECT_NAME(mid.object_id, mid.database_id) AS table_name,
    migs.avg_total_user_cost * migs.avg_user_impact * (migs.user_seeks + migs.user_scans) AS improvement_score,
    mid.equality_columns,
    mid.inequality_columns,
    mid.included_columns
FROM sys.dm_db_missing_index_group_stats AS migs
JOIN sys.dm_db_missing_index_groups AS mig ON mig.index_group_handle = migs.group_handle
JOIN sys.dm_db_missing_index_details AS mid ON mig.index_handle = mid.index_handle
WHERE mid.database_id = DB_ID()
ORDER BY improvement_score DESC";

pub const INDEX_USAGE_STATS_SQL: &str = "\
SELECT
    OBJECT_NAME(i.object_id) AS table_name,
    i.name AS index_name,
    s.user_seeks,
    s.user_scans,
    s.user_lookups,
    s.user_updates
FROM sys.indexes AS i
LEFT JOIN sys.dm_db_index_usage_stats AS s
    ON i.object_id = s.object_id AND i.index_id = s.index_id
WHERE OBJECTPROPERTY(i.object_id, 'IsUserTable') = 1";

pub const TOP_EXPENSIVE_QUERIES_SQL: &str = "\
SELECT TOP (10)
    qs.total_elapsed_time / qs.execution_count AS avg_time,
    qs.execution_count,
    qs.total_logical_reads,
    SUBSTRING(st.text, qs.statement_start_offset / 2 + 1,
        (CASE
            WHEN qs.statement_end_offset = -1 THEN LEN(CONVERT(NVARCHAR(MAX), st.text)) * 2
            ELSE qs.statement_end_offset
        END - qs.statement_start_offset) / 2 + 1) AS query_text
FROM sys.dm_exec_query_stats AS qs
CROSS APPLY sys.dm_exec_sql_text(qs.sql_handle) AS st
ORDER BY avg_time DESC";

pub const TABLE_IO_STATS_SQL: &str = "\
SELECT
    OBJECT_NAME(s.object_id) AS table_name,
    i.name AS index_name,
    i.type_desc AS index_type,
    s.user_seeks,
    s.user_scans,
    s.user_lookups,
    s.user_updates
FROM sys.dm_db_index_usage_stats AS s
JOIN sys.indexes AS i ON i.object_id = s.object_id AND i.index_id = s.index_id
WHERE s.database_id = DB_ID()";

/// Wait statistics minus the idle wait types in [`EXCLUDED_WAIT_TYPES`].
pub static TOP_WAITS_SQL: Lazy<String> = Lazy::new(|| {
    let excluded = EXCLUDED_WAIT_TYPES
        .iter()
        .map(|w| format!("'{}'", w))
        .collect::<Vec<_>>()
        .join(", ");

    format!(
        "\
SELECT
    wait_type,
    wait_time_ms / 1000.0 AS wait_time_sec,
    100.0 * wait_time_ms / NULLIF(SUM(wait_time_ms) OVER (), 0) AS pct,
    signal_wait_time_ms / 1000.0 AS signal_wait_sec
FROM sys.dm_os_wait_stats
WHERE wait_type NOT IN ({})
ORDER BY wait_time_ms DESC",
        excluded
    )
});

// =========================================================================
// Fetch + shape
// =========================================================================

pub async fn fetch_table_schema<C: DiagnosticConnection>(
    conn: &mut C,
    schema: &str,
    table: &str,
) -> Result<Vec<ResultRow>, ServerError> {
    conn.query(TABLE_SCHEMA_SQL, &[schema, table]).await
}

pub async fn fetch_table_names<C: DiagnosticConnection>(
    conn: &mut C,
    schema: &str,
) -> Result<Vec<String>, ServerError> {
    let rows = conn.query(TABLE_NAMES_SQL, &[schema]).await?;
    Ok(first_column_strings(rows))
}

pub async fn fetch_table_row_counts<C: DiagnosticConnection>(
    conn: &mut C,
) -> Result<Vec<ResultRow>, ServerError> {
    conn.query(TABLE_ROW_COUNTS_SQL, &[]).await
}

pub async fn fetch_missing_indexes<C: DiagnosticConnection>(
    conn: &mut C,
) -> Result<Vec<ResultRow>, ServerError> {
    conn.query(MISSING_INDEXES_SQL, &[]).await
}

pub async fn fetch_index_usage_stats<C: DiagnosticConnection>(
    conn: &mut C,
) -> Result<Vec<ResultRow>, ServerError> {
    conn.query(INDEX_USAGE_STATS_SQL, &[]).await
}

pub async fn fetch_top_expensive_queries<C: DiagnosticConnection>(
    conn: &mut C,
) -> Result<Vec<ResultRow>, ServerError> {
    let rows = conn.query(TOP_EXPENSIVE_QUERIES_SQL, &[]).await?;
    Ok(shape_expensive_queries(rows))
}

pub async fn fetch_table_io_stats<C: DiagnosticConnection>(
    conn: &mut C,
) -> Result<Vec<ResultRow>, ServerError> {
    conn.query(TABLE_IO_STATS_SQL, &[]).await
}

pub async fn fetch_top_waits<C: DiagnosticConnection>(
    conn: &mut C,
) -> Result<Vec<ResultRow>, ServerError> {
    let rows = conn.query(&TOP_WAITS_SQL, &[]).await?;
    Ok(shape_top_waits(rows))
}

/// Text values of the first column. Rows whose first value is not text are skipped.
pub fn first_column_strings(rows: Vec<ResultRow>) -> Vec<String> {
    rows.into_iter()
        .filter_map(|row| match row.into_first_value() {
            Some(SqlValue::String(name)) => Some(name),
            _ => None,
        })
        .collect()
}

/// Order by `avg_time` descending and keep at most the top ten.
pub fn shape_expensive_queries(mut rows: Vec<ResultRow>) -> Vec<ResultRow> {
    let avg_time = |row: &ResultRow| row.get("avg_time").and_then(SqlValue::as_f64);
    rows.sort_by(|a, b| {
        avg_time(b)
            .partial_cmp(&avg_time(a))
            .unwrap_or(Ordering::Equal)
    });
    rows.truncate(TOP_EXPENSIVE_QUERY_LIMIT);
    rows
}

/// Drop any row whose `wait_type` is on the exclusion list.
pub fn shape_top_waits(rows: Vec<ResultRow>) -> Vec<ResultRow> {
    rows.into_iter()
        .filter(|row| {
            !row.get("wait_type")
                .and_then(SqlValue::as_str)
                .is_some_and(|w| EXCLUDED_WAIT_TYPES.contains(&w))
        })
        .collect()
}

// =========================================================================
// Connection-scoped service
// =========================================================================

/// Runs diagnostics, one fresh connection per call.
#[derive(Debug, Clone)]
pub struct Diagnostics<C> {
    connector: C,
    query_timeout: Duration,
}

impl<C: Connector> Diagnostics<C> {
    pub fn new(connector: C, query_timeout: Duration) -> Self {
        Self {
            connector,
            query_timeout,
        }
    }

    pub fn connector(&self) -> &C {
        &self.connector
    }

    pub fn query_timeout(&self) -> Duration {
        self.query_timeout
    }

    pub async fn table_schema(
        &self,
        db: &str,
        schema: &str,
        table: &str,
        ct: &CancellationToken,
    ) -> Result<Vec<ResultRow>, ServerError> {
        let mut conn = self.connector.open(db).await?;
        let result = self
            .bounded(ct, fetch_table_schema(&mut conn, schema, table))
            .await;
        release(conn, result).await
    }

    pub async fn table_names(
        &self,
        db: &str,
        schema: &str,
        ct: &CancellationToken,
    ) -> Result<Vec<String>, ServerError> {
        let mut conn = self.connector.open(db).await?;
        let result = self.bounded(ct, fetch_table_names(&mut conn, schema)).await;
        release(conn, result).await
    }

    pub async fn table_row_counts(
        &self,
        db: &str,
        ct: &CancellationToken,
    ) -> Result<Vec<ResultRow>, ServerError> {
        let mut conn = self.connector.open(db).await?;
        let result = self.bounded(ct, fetch_table_row_counts(&mut conn)).await;
        release(conn, result).await
    }

    pub async fn missing_indexes(
        &self,
        db: &str,
        ct: &CancellationToken,
    ) -> Result<Vec<ResultRow>, ServerError> {
        let mut conn = self.connector.open(db).await?;
        let result = self.bounded(ct, fetch_missing_indexes(&mut conn)).await;
        release(conn, result).await
    }

    pub async fn index_usage_stats(
        &self,
        db: &str,
        ct: &CancellationToken,
    ) -> Result<Vec<ResultRow>, ServerError> {
        let mut conn = self.connector.open(db).await?;
        let result = self.bounded(ct, fetch_index_usage_stats(&mut conn)).await;
        release(conn, result).await
    }

    pub async fn top_expensive_queries(
        &self,
        db: &str,
        ct: &CancellationToken,
    ) -> Result<Vec<ResultRow>, ServerError> {
        let mut conn = self.connector.open(db).await?;
        let result = self
            .bounded(ct, fetch_top_expensive_queries(&mut conn))
            .await;
        release(conn, result).await
    }

    pub async fn table_io_stats(
        &self,
        db: &str,
        ct: &CancellationToken,
    ) -> Result<Vec<ResultRow>, ServerError> {
        let mut conn = self.connector.open(db).await?;
        let result = self.bounded(ct, fetch_table_io_stats(&mut conn)).await;
        release(conn, result).await
    }

    pub async fn top_waits(
        &self,
        db: &str,
        ct: &CancellationToken,
    ) -> Result<Vec<ResultRow>, ServerError> {
        let mut conn = self.connector.open(db).await?;
        let result = self.bounded(ct, fetch_top_waits(&mut conn)).await;
        release(conn, result).await
    }

    /// Run caller-supplied SQL in a transaction that is always rolled back.
    ///
    /// The outcome is a list holding the single execution result, so every
    /// operation answers with the same list shape.
    pub async fn run_safe_diagnostic(
        &self,
        db: &str,
        sql: &str,
        ct: &CancellationToken,
    ) -> Result<Vec<SafeExecutionResult>, ServerError> {
        let mut conn = self.connector.open(db).await?;
        let result = execute_safely(&mut conn, sql, self.query_timeout, ct).await;
        release(conn, result).await.map(|result| vec![result])
    }

    async fn bounded<T>(
        &self,
        ct: &CancellationToken,
        work: impl Future<Output = Result<T, ServerError>>,
    ) -> Result<T, ServerError> {
        let start = Instant::now();
        let result = bounded(self.query_timeout, ct, work).await;
        debug!("Diagnostic finished in {} ms", start.elapsed().as_millis());
        result
    }
}

/// Run `work` under a time budget, giving up early if `ct` is cancelled.
pub async fn bounded<T>(
    budget: Duration,
    ct: &CancellationToken,
    work: impl Future<Output = Result<T, ServerError>>,
) -> Result<T, ServerError> {
    tokio::select! {
        biased;
        _ = ct.cancelled() => Err(ServerError::Cancelled),
        outcome = tokio::time::timeout(budget, work) => {
            outcome.unwrap_or_else(|_| Err(ServerError::timeout(budget.as_secs())))
        }
    }
}

/// Close the connection and hand back the operation's result.
///
/// A close failure is logged; it never replaces the result, which is already complete.
async fn release<C: DiagnosticConnection, T>(
    conn: C,
    result: Result<T, ServerError>,
) -> Result<T, ServerError> {
    if let Err(e) = conn.close().await {
        warn!("Failed to close diagnostic connection: {}", e);
    }
    result
}
