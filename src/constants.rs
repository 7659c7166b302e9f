//! Centralized constants for the diagnostics server.
//!
//! Defaults, limits and fixed lists used throughout the codebase.

use std::time::Duration;

// =============================================================================
// Settings Defaults
// =============================================================================

/// Default environment name.
pub const DEFAULT_ENVIRONMENT: &str = "dev";

/// Environment name that runs a single diagnostic and exits.
pub const POC_ENVIRONMENT: &str = "poc";

/// Default application version reported when none is configured.
pub const DEFAULT_APP_VERSION: &str = "0.0.0";

/// Default HTTP bind host.
pub const DEFAULT_APP_HOST: &str = "localhost";

/// Default HTTP bind port.
pub const DEFAULT_APP_PORT: u16 = 4200;

/// Default log level for this crate.
pub const DEFAULT_LOG_LEVEL: &str = "info";

/// Default SQL Server host.
pub const DEFAULT_DB_HOST: &str = "localhost";

/// Default SQL Server port.
pub const DEFAULT_DB_PORT: u16 = 1433;

/// Default SQL login.
pub const DEFAULT_DB_USER: &str = "sa";

/// Default schema for schema-scoped tools.
pub const DEFAULT_SCHEMA: &str = "dbo";

// =============================================================================
// Timeout Constants
// =============================================================================

/// Default connection timeout in seconds.
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 15;

/// Default query timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECS: u64 = 30;

/// Grace period for HTTP connections to drain after a shutdown signal.
pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

// =============================================================================
// Transport Paths
// =============================================================================

/// Streamable HTTP endpoint when `APP_PATH` is empty.
pub const DEFAULT_STREAMABLE_HTTP_PATH: &str = "/mcp";

/// SSE stream endpoint when `APP_PATH` is empty.
pub const DEFAULT_SSE_PATH: &str = "/sse";

/// SSE message endpoint when `APP_MESSAGE_PATH` is empty.
pub const DEFAULT_SSE_MESSAGE_PATH: &str = "/messages/";

/// Liveness route for HTTP transports.
pub const HEALTH_PATH: &str = "/health";

// =============================================================================
// Diagnostics
// =============================================================================

/// Replacement for secrets in any output.
pub const PASSWORD_MASK: &str = "******";

/// Maximum rows returned by the expensive query lookup.
pub const TOP_EXPENSIVE_QUERY_LIMIT: usize = 10;

/// Statement run by the `poc` environment.
pub const POC_DIAGNOSTIC_SQL: &str =
    "SELECT TOP (10) name, type_desc, create_date FROM sys.objects ORDER BY create_date DESC";

/// Idle and background wait types excluded from the wait statistics.
pub const EXCLUDED_WAIT_TYPES: &[&str] = &[
    "CLR_SEMAPHORE",
    "LAZYWRITER_SLEEP",
    "RESOURCE_QUEUE",
    "SLEEP_TASK",
    "SLEEP_SYSTEMTASK",
    "SQLTRACE_BUFFER_FLUSH",
    "WAITFOR",
    "LOGMGR_QUEUE",
    "CHECKPOINT_QUEUE",
    "REQUEST_FOR_DEADLOCK_SEARCH",
    "XE_TIMER_EVENT",
    "BROKER_TO_FLUSH",
    "BROKER_TASK_STOP",
    "CLR_MANUAL_EVENT",
    "CLR_AUTO_EVENT",
    "DISPATCHER_QUEUE_SEMAPHORE",
    "FT_IFTS_SCHEDULER_IDLE_WAIT",
    "XE_DISPATCHER_WAIT",
    "XE_DISPATCHER_JOIN",
    "WAIT_XACT_OWN_TRANSACTION",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_excluded_wait_types_are_unique() {
        let mut sorted = EXCLUDED_WAIT_TYPES.to_vec();
        sorted.sort_unstable();
        sorted.dedup();
        assert_eq!(sorted.len(), EXCLUDED_WAIT_TYPES.len());
    }

    #[test]
    fn test_poc_statement_is_read_only() {
        assert!(POC_DIAGNOSTIC_SQL.starts_with("SELECT"));
    }
}
