//! Transport layer for the MCP server.
//!
//! Supports three transports, selected by `APP_TRANSPORT`:
//! - `stdio`: standard input/output (default, for CLI clients)
//! - `streamable-http`: MCP streamable HTTP at `APP_PATH` (default `/mcp`)
//! - `sse`: legacy server-sent events at `APP_PATH` (default `/sse`) with
//!   messages posted to `APP_MESSAGE_PATH` (default `/messages/`)
//!
//! Both HTTP transports also answer `GET /health`.

use crate::config::{Settings, TransportConfig};
use crate::constants::{
    DEFAULT_SSE_MESSAGE_PATH, DEFAULT_SSE_PATH, DEFAULT_STREAMABLE_HTTP_PATH, HEALTH_PATH,
};
use crate::server::DiagnosticsServer;
use crate::shutdown::SharedShutdownController;
use anyhow::{anyhow, Context};
use axum::{routing::get, Json, Router};
use rmcp::transport::sse_server::{SseServer, SseServerConfig};
use rmcp::transport::streamable_http_server::{
    session::local::LocalSessionManager, SessionId, SessionManager, StreamableHttpService,
};
use rmcp::ServiceExt;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Available transport types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Standard input/output transport (default).
    Stdio,

    /// MCP streamable HTTP transport.
    StreamableHttp,

    /// Server-sent events transport.
    Sse,
}

/// Error returned when parsing a transport type fails.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseTransportTypeError(String);

impl std::fmt::Display for ParseTransportTypeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "unsupported transport '{}' (expected stdio, streamable-http or sse)",
            self.0
        )
    }
}

impl std::error::Error for ParseTransportTypeError {}

impl std::str::FromStr for TransportKind {
    type Err = ParseTransportTypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "stdio" => Ok(TransportKind::Stdio),
            "streamable-http" => Ok(TransportKind::StreamableHttp),
            "sse" => Ok(TransportKind::Sse),
            _ => Err(ParseTransportTypeError(s.to_string())),
        }
    }
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Stdio => write!(f, "stdio"),
            TransportKind::StreamableHttp => write!(f, "streamable-http"),
            TransportKind::Sse => write!(f, "sse"),
        }
    }
}

/// Endpoint for the streamable HTTP transport.
pub fn streamable_http_path(config: &TransportConfig) -> String {
    normalize_path(&config.path, DEFAULT_STREAMABLE_HTTP_PATH)
}

/// Stream and message endpoints for the SSE transport.
pub fn sse_paths(config: &TransportConfig) -> (String, String) {
    (
        normalize_path(&config.path, DEFAULT_SSE_PATH),
        normalize_path(&config.message_path, DEFAULT_SSE_MESSAGE_PATH),
    )
}

fn normalize_path(configured: &str, default: &str) -> String {
    let path = configured.trim();
    if path.is_empty() {
        default.to_string()
    } else if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{}", path)
    }
}

/// Health check handler.
async fn health_handler() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Serve `server` on the configured transport until the client leaves or shutdown is requested.
pub async fn serve(
    server: DiagnosticsServer,
    settings: &Settings,
    shutdown: SharedShutdownController,
) -> anyhow::Result<()> {
    match settings.transport.kind {
        TransportKind::Stdio => serve_stdio(server, shutdown).await,
        TransportKind::StreamableHttp => {
            serve_streamable_http(server, &settings.transport, shutdown).await
        }
        TransportKind::Sse => serve_sse(server, &settings.transport, shutdown).await,
    }
}

async fn serve_stdio(
    server: DiagnosticsServer,
    shutdown: SharedShutdownController,
) -> anyhow::Result<()> {
    info!("Starting MCP server with stdio transport");

    let running = server
        .serve(rmcp::transport::stdio())
        .await
        .context("Failed to initialize stdio session")?;

    let mut signal = shutdown.signal();
    tokio::select! {
        quit = running.waiting() => {
            let reason = quit.context("stdio session task failed")?;
            info!("stdio session ended: {:?}", reason);
        }
        _ = signal.recv() => {
            info!("stdio transport received shutdown signal");
        }
    }

    Ok(())
}

async fn serve_streamable_http(
    server: DiagnosticsServer,
    config: &TransportConfig,
    shutdown: SharedShutdownController,
) -> anyhow::Result<()> {
    let path = streamable_http_path(config);
    let addr = resolve_bind_addr(&config.host, config.port).await?;

    let sessions = Arc::new(LocalSessionManager::default());
    let service = StreamableHttpService::new(
        move || Ok(server.clone()),
        sessions.clone(),
        Default::default(),
    );
    tokio::spawn(close_sessions_on_shutdown(sessions, shutdown.token()));

    // nest_service rejects "/", so the root endpoint becomes the fallback
    let router = if path == "/" {
        Router::new()
            .route(HEALTH_PATH, get(health_handler))
            .fallback_service(service)
    } else {
        Router::new()
            .route(HEALTH_PATH, get(health_handler))
            .nest_service(&path, service)
    };

    info!("MCP endpoint: http://{}{}", addr, path);
    serve_router(router, addr, shutdown).await
}

/// Close every open streamable HTTP session once `token` is cancelled.
///
/// The streamable HTTP service config takes no cancellation token, unlike
/// the SSE server, so its sessions are ended here.
async fn close_sessions_on_shutdown(sessions: Arc<LocalSessionManager>, token: CancellationToken) {
    token.cancelled().await;

    let ids: Vec<SessionId> = sessions.sessions.read().await.keys().cloned().collect();
    info!("Closing {} MCP session(s)", ids.len());
    for id in ids {
        if let Err(e) = sessions.close_session(&id).await {
            warn!("Failed to close MCP session {}: {}", id, e);
        }
    }
}

async fn serve_sse(
    server: DiagnosticsServer,
    config: &TransportConfig,
    shutdown: SharedShutdownController,
) -> anyhow::Result<()> {
    let (sse_path, post_path) = sse_paths(config);
    let addr = resolve_bind_addr(&config.host, config.port).await?;

    let (sse_server, sse_router) = SseServer::new(SseServerConfig {
        bind: addr,
        sse_path: sse_path.clone(),
        post_path: post_path.clone(),
        ct: shutdown.token(),
        sse_keep_alive: None,
    });
    let _service_ct = sse_server.with_service(move || server.clone());

    let router = sse_router.route(HEALTH_PATH, get(health_handler));

    info!("SSE endpoint: http://{}{}", addr, sse_path);
    info!("Message endpoint: http://{}{}", addr, post_path);
    serve_router(router, addr, shutdown).await
}

async fn resolve_bind_addr(host: &str, port: u16) -> anyhow::Result<SocketAddr> {
    tokio::net::lookup_host((host, port))
        .await
        .with_context(|| format!("Failed to resolve {}:{}", host, port))?
        .next()
        .ok_or_else(|| anyhow!("No address found for {}:{}", host, port))
}

/// Bind `addr` and serve `router` with request tracing until shutdown.
///
/// Streaming connections can keep a graceful shutdown open forever, so once
/// shutdown starts they get the controller's drain timeout and are then dropped.
async fn serve_router(
    router: Router,
    addr: SocketAddr,
    shutdown: SharedShutdownController,
) -> anyhow::Result<()> {
    let app = router.layer(TraceLayer::new_for_http());

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind to {}", addr))?;

    info!("HTTP server listening on http://{}", addr);
    info!("Health endpoint: http://{}{}", addr, HEALTH_PATH);

    let mut graceful = shutdown.signal();
    let mut drain = shutdown.signal();
    let drain_timeout = shutdown.drain_timeout();

    let server = axum::serve(listener, app).with_graceful_shutdown(async move {
        graceful.recv().await;
        info!("HTTP server received shutdown signal");
    });

    tokio::select! {
        result = server => {
            result.context("HTTP server error")?;
            info!("HTTP server stopped");
        }
        _ = async move {
            drain.recv().await;
            tokio::time::sleep(drain_timeout).await;
        } => {
            warn!(
                "Drain timeout of {}s exceeded, closing remaining connections",
                drain_timeout.as_secs()
            );
        }
    }

    Ok(())
}
