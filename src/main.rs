//! SQL Server diagnostics MCP server entry point.
//!
//! Loads `.env` and settings from the environment, then either runs the single `poc`
//! diagnostic and prints its JSON to stdout, or serves MCP on the configured
//! transport until the client leaves or SIGINT/SIGTERM arrives.

use anyhow::{Context, Result};
use mssql_diagnostics_mcp::config::load_env_file;
use mssql_diagnostics_mcp::constants::POC_DIAGNOSTIC_SQL;
use mssql_diagnostics_mcp::shutdown::{install_signal_handlers, new_shutdown_controller};
use mssql_diagnostics_mcp::{transport, DiagnosticsServer, Settings};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let env_file = load_env_file(None).context("Failed to load .env")?;
    let settings = Arc::new(Settings::from_env().context("Failed to load settings")?);

    init_logging(&settings.app.log_level);

    if let Some(path) = env_file {
        info!("Loaded environment from {}", path.display());
    }

    info!(
        "{} v{} starting (environment: {}, transport: {})",
        env!("CARGO_PKG_NAME"),
        env!("CARGO_PKG_VERSION"),
        settings.environment,
        settings.transport.kind
    );

    let server = DiagnosticsServer::new(settings.clone());

    if settings.is_poc() {
        return run_poc(&server, &settings).await;
    }

    let shutdown = new_shutdown_controller();
    install_signal_handlers(shutdown.clone());

    transport::serve(server, &settings, shutdown).await?;

    info!("Server shutdown complete");
    Ok(())
}

/// Run one safe diagnostic against `DB_NAME` and print the result.
async fn run_poc(server: &DiagnosticsServer, settings: &Settings) -> Result<()> {
    info!("Running proof-of-concept diagnostic against '{}'", settings.database.name);

    let result = server
        .diagnostics()
        .run_safe_diagnostic(
            &settings.database.name,
            POC_DIAGNOSTIC_SQL,
            &CancellationToken::new(),
        )
        .await?;

    println!("{}", serde_json::to_string_pretty(&result)?);
    Ok(())
}

/// Initialize tracing subscriber with stderr output.
///
/// Logs MUST go to stderr because stdout is used for JSON-RPC communication.
fn init_logging(level: &str) {
    let filter = std::env::var("RUST_LOG")
        .map(EnvFilter::new)
        .unwrap_or_else(|_| EnvFilter::new(format!("warn,mssql_diagnostics_mcp={}", level)));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .init();
}
