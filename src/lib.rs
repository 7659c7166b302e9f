//! # SQL Server Diagnostics MCP Server
//!
//! A Model Context Protocol (MCP) server exposing read-only SQL Server diagnostics.
//!
//! This crate provides:
//! - **Tools**: schema introspection, row counts, missing-index hints, index usage,
//!   expensive queries, I/O and wait statistics, and ad-hoc SQL that is always rolled back
//! - **Resources**: the effective configuration with the password masked
//! - **Transports**: stdio, streamable HTTP and SSE, with `/health` on HTTP
//!
//! ## Architecture
//!
//! Settings are loaded once and shared read-only. Every tool call opens its own
//! connection to the requested database, runs one statement and closes the
//! connection before answering. There is no pool and no other shared state.

pub mod config;
pub mod constants;
pub mod database;
pub mod error;
pub mod handlers;
pub mod resources;
pub mod security;
pub mod server;
pub mod shutdown;
pub mod tools;
pub mod transport;

pub use config::Settings;
pub use error::ServerError;
pub use server::DiagnosticsServer;
