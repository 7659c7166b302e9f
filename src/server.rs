//! MCP server struct definition and initialization.

use crate::config::Settings;
use crate::database::{Diagnostics, TiberiusConnector};
use rmcp::handler::server::router::tool::ToolRouter;
use std::sync::Arc;

/// The diagnostics MCP server.
///
/// Cloned per session by the HTTP transports; everything inside is shared
/// and read-only, so clones are cheap.
#[derive(Clone)]
pub struct DiagnosticsServer {
    /// Settings loaded once at startup.
    pub(crate) settings: Arc<Settings>,

    /// Diagnostic query set over per-call tiberius connections.
    pub(crate) diagnostics: Arc<Diagnostics<TiberiusConnector>>,

    /// Tool router for dispatching tool calls.
    pub(crate) tool_router: ToolRouter<Self>,
}

impl DiagnosticsServer {
    /// Create a server for the given settings.
    ///
    /// No connection is made here; each tool call opens its own.
    pub fn new(settings: Arc<Settings>) -> Self {
        let connector = TiberiusConnector::new(Arc::new(settings.database.clone()));
        let diagnostics = Arc::new(Diagnostics::new(
            connector,
            settings.database.query_timeout,
        ));

        Self {
            settings,
            diagnostics,
            tool_router: crate::tools::create_tool_router(),
        }
    }

    /// Get a reference to the settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Get a reference to the diagnostic query set.
    pub fn diagnostics(&self) -> &Diagnostics<TiberiusConnector> {
        &self.diagnostics
    }

    /// Name reported to clients, `APP_NAME` or the package name.
    pub fn server_name(&self) -> String {
        non_empty_or(&self.settings.app.name, env!("CARGO_PKG_NAME"))
    }

    /// Version reported to clients, `APP_VERSION` or the package version.
    pub fn server_version(&self) -> String {
        non_empty_or(&self.settings.app.version, env!("CARGO_PKG_VERSION"))
    }

    /// Instructions reported to clients, if configured.
    pub fn instructions(&self) -> Option<String> {
        let instructions = self.settings.app.instructions.trim();
        (!instructions.is_empty()).then(|| instructions.to_string())
    }
}

fn non_empty_or(value: &str, fallback: &str) -> String {
    if value.trim().is_empty() {
        fallback.to_string()
    } else {
        value.to_string()
    }
}
