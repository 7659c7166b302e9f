//! Configuration management for the diagnostics server.
//!
//! Configuration is loaded from environment variables following the 12-factor app pattern.
//! A `.env` file in the working directory is read first; variables already set win.
//! The resulting [`Settings`] is built once in `main` and shared read-only.

use crate::constants::{
    DEFAULT_APP_HOST, DEFAULT_APP_PORT, DEFAULT_APP_VERSION, DEFAULT_CONNECT_TIMEOUT_SECS,
    DEFAULT_DB_HOST, DEFAULT_DB_PORT, DEFAULT_DB_USER, DEFAULT_ENVIRONMENT, DEFAULT_LOG_LEVEL,
    DEFAULT_QUERY_TIMEOUT_SECS, PASSWORD_MASK, POC_ENVIRONMENT,
};
use crate::error::ServerError;
use crate::transport::TransportKind;
use serde::{Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Load a `.env` file into the process environment.
///
/// With no path, `.env` is searched for from the working directory upwards.
/// Variables that are already set are not overridden. A missing file is not
/// an error; a malformed one is.
pub fn load_env_file(path: Option<&Path>) -> Result<Option<PathBuf>, ServerError> {
    let loaded = match path {
        Some(path) => dotenvy::from_path(path).map(|()| path.to_path_buf()),
        None => dotenvy::dotenv(),
    };

    match loaded {
        Ok(path) => Ok(Some(path)),
        Err(e) if e.not_found() => Ok(None),
        Err(e) => Err(ServerError::config(format!("Failed to read .env file: {}", e))),
    }
}

/// Server settings loaded from environment variables.
#[derive(Debug, Clone, Serialize)]
pub struct Settings {
    /// Deployment environment (`dev`, `prod`, `poc`, ...)
    pub environment: String,

    /// Application identity
    pub app: AppConfig,

    /// Transport selection and HTTP binding
    pub transport: TransportConfig,

    /// Database connection configuration
    pub database: DatabaseConfig,
}

/// Application identity reported to MCP clients.
#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    pub name: String,
    pub version: String,
    pub instructions: String,
    pub log_level: String,
}

/// Transport configuration.
#[derive(Debug, Clone, Serialize)]
pub struct TransportConfig {
    /// Transport to serve on
    pub kind: TransportKind,

    /// Host to bind to (HTTP transports)
    pub host: String,

    /// Port to listen on (HTTP transports)
    pub port: u16,

    /// MCP endpoint path; empty selects the transport default
    pub path: String,

    /// SSE message endpoint path; empty selects the default
    pub message_path: String,
}

/// Database connection configuration.
#[derive(Debug, Clone, Serialize)]
pub struct DatabaseConfig {
    /// SQL Server hostname or IP address
    pub host: String,

    /// SQL Server port (default: 1433)
    pub port: u16,

    /// Default database, used by the `poc` run
    pub name: String,

    /// SQL login
    pub username: String,

    /// SQL password, masked in every rendering
    pub password: Password,

    /// Enable TLS encryption
    pub encrypt: bool,

    /// Trust server certificate (for self-signed certs)
    pub trust_server_certificate: bool,

    /// TCP connect plus login budget
    #[serde(serialize_with = "serialize_secs")]
    pub connect_timeout: Duration,

    /// Budget for a single diagnostic operation
    #[serde(serialize_with = "serialize_secs")]
    pub query_timeout: Duration,
}

/// A password that never prints or serializes its value.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct Password(String);

impl Password {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// The clear-text value, for handing to the driver only.
    pub fn expose(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(PASSWORD_MASK)
    }
}

impl Serialize for Password {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(PASSWORD_MASK)
    }
}

fn serialize_secs<S: Serializer>(d: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_u64(d.as_secs())
}

/// Flat, redacted snapshot of the settings, keyed by the environment variable names.
#[derive(Debug, Clone, Serialize)]
pub struct RedactedSettings {
    pub is_env: String,
    pub app_name: String,
    pub app_instructions: String,
    pub app_version: String,
    pub app_host: String,
    pub app_port: u16,
    pub app_log_level: String,
    pub app_transport: String,
    pub app_path: String,
    pub app_message_path: String,
    pub db_host: String,
    pub db_port: u16,
    pub db_name: String,
    pub db_uid: String,
    pub db_pwd: &'static str,
    pub trust_server_certificate: bool,
    pub encrypt: bool,
    pub connect_timeout_secs: u64,
    pub query_timeout_secs: u64,
}

impl Settings {
    /// Load settings from the process environment.
    ///
    /// # Environment Variables
    ///
    /// - `IS_ENV`: environment name (default: dev; `poc` runs one diagnostic and exits)
    /// - `APP_NAME`, `APP_VERSION`, `APP_INSTRUCTIONS`: server identity
    /// - `APP_TRANSPORT`: stdio, streamable-http or sse (default: stdio)
    /// - `APP_HOST`, `APP_PORT`: HTTP bind address (default: localhost:4200)
    /// - `APP_PATH`, `APP_MESSAGE_PATH`: HTTP endpoint paths
    /// - `APP_LOG_LEVEL`: log level (default: info)
    /// - `DB_HOST`, `DB_PORT`, `DB_NAME`: SQL Server target (default: localhost:1433)
    /// - `DB_UID`, `DB_PWD`: SQL authentication (default user: sa)
    /// - `ENCRYPT`: enable TLS (default: no)
    /// - `TRUST_SERVER_CERTIFICATE`: trust self-signed certificates (default: yes)
    /// - `CONNECT_TIMEOUT_SECS`: connect budget (default: 15)
    /// - `QUERY_TIMEOUT_SECS`: per-operation budget (default: 30)
    pub fn from_env() -> Result<Self, ServerError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    ///
    /// Fails with a configuration error for an unsupported transport or an
    /// unparsable port, before anything is bound.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServerError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let text = |key: &str, default: &str| lookup(key).unwrap_or_else(|| default.to_string());

        let kind = text("APP_TRANSPORT", "stdio")
            .parse::<TransportKind>()
            .map_err(|e| ServerError::config(e.to_string()))?;

        let app_port = parse_number(&lookup, "APP_PORT", DEFAULT_APP_PORT)?;
        let db_port = parse_number(&lookup, "DB_PORT", DEFAULT_DB_PORT)?;
        let connect_timeout_secs =
            parse_number(&lookup, "CONNECT_TIMEOUT_SECS", DEFAULT_CONNECT_TIMEOUT_SECS)?;
        let query_timeout_secs =
            parse_number(&lookup, "QUERY_TIMEOUT_SECS", DEFAULT_QUERY_TIMEOUT_SECS)?;

        let encrypt = parse_flag(&lookup, "ENCRYPT", false)?;
        let trust_server_certificate = parse_flag(&lookup, "TRUST_SERVER_CERTIFICATE", true)?;

        Ok(Settings {
            environment: text("IS_ENV", DEFAULT_ENVIRONMENT),
            app: AppConfig {
                name: text("APP_NAME", ""),
                version: text("APP_VERSION", DEFAULT_APP_VERSION),
                instructions: text("APP_INSTRUCTIONS", ""),
                log_level: text("APP_LOG_LEVEL", DEFAULT_LOG_LEVEL),
            },
            transport: TransportConfig {
                kind,
                host: text("APP_HOST", DEFAULT_APP_HOST),
                port: app_port,
                path: text("APP_PATH", ""),
                message_path: text("APP_MESSAGE_PATH", ""),
            },
            database: DatabaseConfig {
                host: text("DB_HOST", DEFAULT_DB_HOST),
                port: db_port,
                name: text("DB_NAME", ""),
                username: text("DB_UID", DEFAULT_DB_USER),
                password: Password::new(text("DB_PWD", "")),
                encrypt,
                trust_server_certificate,
                connect_timeout: Duration::from_secs(connect_timeout_secs),
                query_timeout: Duration::from_secs(query_timeout_secs),
            },
        })
    }

    /// Whether this process should run the single proof-of-concept diagnostic.
    pub fn is_poc(&self) -> bool {
        self.environment.eq_ignore_ascii_case(POC_ENVIRONMENT)
    }

    /// Snapshot for introspection with the password masked.
    pub fn redacted(&self) -> RedactedSettings {
        RedactedSettings {
            is_env: self.environment.clone(),
            app_name: self.app.name.clone(),
            app_instructions: self.app.instructions.clone(),
            app_version: self.app.version.clone(),
            app_host: self.transport.host.clone(),
            app_port: self.transport.port,
            app_log_level: self.app.log_level.clone(),
            app_transport: self.transport.kind.to_string(),
            app_path: self.transport.path.clone(),
            app_message_path: self.transport.message_path.clone(),
            db_host: self.database.host.clone(),
            db_port: self.database.port,
            db_name: self.database.name.clone(),
            db_uid: self.database.username.clone(),
            db_pwd: PASSWORD_MASK,
            trust_server_certificate: self.database.trust_server_certificate,
            encrypt: self.database.encrypt,
            connect_timeout_secs: self.database.connect_timeout.as_secs(),
            query_timeout_secs: self.database.query_timeout.as_secs(),
        }
    }
}

fn parse_number<F, T>(lookup: &F, key: &str, default: T) -> Result<T, ServerError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) if raw.trim().is_empty() => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ServerError::config(format!("{} must be a number, got '{}'", key, raw))),
    }
}

/// Accepts the ODBC-style `yes`/`no` values as well as `true`/`false`/`1`/`0`.
fn parse_flag<F>(lookup: &F, key: &str, default: bool) -> Result<bool, ServerError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };

    match raw.trim().to_lowercase().as_str() {
        "" => Ok(default),
        "yes" | "true" | "1" | "on" | "mandatory" => Ok(true),
        "no" | "false" | "0" | "off" | "optional" => Ok(false),
        _ => Err(ServerError::config(format!(
            "{} must be yes or no, got '{}'",
            key, raw
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn temp_env_file(name: &str, contents: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!("{}-{}.env", name, std::process::id()));
        std::fs::write(&path, contents).unwrap();
        path
    }

    #[test]
    fn test_env_file_supplies_unset_variables() {
        let path = temp_env_file(
            "diag-settings",
            "DIAG_TEST_ENV_FILE_NAME=from-file\nDIAG_TEST_ENV_FILE_KEPT=from-file\n",
        );
        std::env::set_var("DIAG_TEST_ENV_FILE_KEPT", "from-process");

        let loaded = load_env_file(Some(&path)).unwrap();

        assert_eq!(loaded.as_deref(), Some(path.as_path()));
        assert_eq!(std::env::var("DIAG_TEST_ENV_FILE_NAME").unwrap(), "from-file");
        assert_eq!(std::env::var("DIAG_TEST_ENV_FILE_KEPT").unwrap(), "from-process");
        std::fs::remove_file(path).unwrap();
    }

    #[test]
    fn test_missing_env_file_is_not_an_error() {
        let path = std::env::temp_dir().join("diag-settings-does-not-exist.env");

        assert_eq!(load_env_file(Some(&path)).unwrap(), None);
    }

    #[test]
    fn test_malformed_env_file_is_config_error() {
        let path = temp_env_file("diag-settings-bad", "DIAG_TEST_BAD='unterminated\n");

        let err = load_env_file(Some(&path)).unwrap_err();

        assert!(matches!(err, ServerError::Config(_)));
        std::fs::remove_file(path).unwrap();
    }

    fn settings_from(vars: &[(&str, &str)]) -> Result<Settings, ServerError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let settings = settings_from(&[]).unwrap();
        assert_eq!(settings.environment, "dev");
        assert_eq!(settings.transport.kind, TransportKind::Stdio);
        assert_eq!(settings.transport.host, "localhost");
        assert_eq!(settings.transport.port, 4200);
        assert_eq!(settings.database.port, 1433);
        assert_eq!(settings.database.username, "sa");
        assert!(!settings.database.encrypt);
        assert!(settings.database.trust_server_certificate);
        assert_eq!(settings.database.query_timeout, Duration::from_secs(30));
        assert!(!settings.is_poc());
    }

    #[test]
    fn test_transport_values() {
        let settings = settings_from(&[("APP_TRANSPORT", "streamable-http")]).unwrap();
        assert_eq!(settings.transport.kind, TransportKind::StreamableHttp);

        let settings = settings_from(&[("APP_TRANSPORT", "sse")]).unwrap();
        assert_eq!(settings.transport.kind, TransportKind::Sse);
    }

    #[test]
    fn test_unsupported_transport_is_config_error() {
        let err = settings_from(&[("APP_TRANSPORT", "websocket")]).unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
        assert!(err.to_string().contains("websocket"));
    }

    #[test]
    fn test_bad_port_is_config_error() {
        let err = settings_from(&[("APP_PORT", "http")]).unwrap_err();
        assert!(matches!(err, ServerError::Config(_)));
    }

    #[test]
    fn test_flags_accept_odbc_style_values() {
        let settings =
            settings_from(&[("ENCRYPT", "Yes"), ("TRUST_SERVER_CERTIFICATE", "no")]).unwrap();
        assert!(settings.database.encrypt);
        assert!(!settings.database.trust_server_certificate);

        assert!(settings_from(&[("ENCRYPT", "maybe")]).is_err());
    }

    #[test]
    fn test_poc_environment() {
        let settings = settings_from(&[("IS_ENV", "POC")]).unwrap();
        assert!(settings.is_poc());
    }

    #[test]
    fn test_redacted_never_contains_password() {
        let settings = settings_from(&[("DB_PWD", "s3cr3t!Pass"), ("DB_NAME", "Sales")]).unwrap();

        let redacted = serde_json::to_string(&settings.redacted()).unwrap();
        assert!(!redacted.contains("s3cr3t!Pass"));
        assert!(redacted.contains("\"db_pwd\":\"******\""));
        assert!(redacted.contains("\"db_name\":\"Sales\""));

        let full = serde_json::to_string(&settings).unwrap();
        assert!(!full.contains("s3cr3t!Pass"));

        let debug = format!("{:?}", settings);
        assert!(!debug.contains("s3cr3t!Pass"));

        assert_eq!(settings.database.password.expose(), "s3cr3t!Pass");
    }
}
