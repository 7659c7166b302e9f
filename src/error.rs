//! Error types for the diagnostics server.
//!
//! Every failure surfaces as a [`ServerError`]. Server-side SQL errors keep their
//! error number so callers can tell a permission problem from a syntax error.

use rmcp::ErrorData;
use thiserror::Error;

/// Domain-specific errors for the diagnostics server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Invalid or unsupported configuration. Fatal at startup.
    #[error("Configuration error: {0}")]
    Config(String),

    /// The database connection could not be established.
    #[error("Connection error: {message}")]
    Connection {
        message: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// A fixed diagnostic query failed.
    #[error("Query error: {message}")]
    Query {
        message: String,
        sql_error_code: Option<u32>,
    },

    /// A safe diagnostic statement failed. The transaction was rolled back.
    #[error("Execution error: {message}")]
    Execution {
        message: String,
        sql_error_code: Option<u32>,
    },

    /// A tool argument was rejected before anything ran.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The operation exceeded its time budget.
    #[error("Timeout: operation exceeded {timeout_seconds} seconds")]
    Timeout { timeout_seconds: u64 },

    /// The caller cancelled the request.
    #[error("Operation cancelled by the client")]
    Cancelled,

    /// Resource not found
    #[error("Resource not found: {0}")]
    ResourceNotFound(String),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ServerError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::Connection {
            message: msg.into(),
            source: None,
        }
    }

    /// Create a connection error with a source.
    pub fn connection_with_source(
        msg: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Connection {
            message: msg.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a query error without a server error number.
    pub fn query(msg: impl Into<String>) -> Self {
        Self::Query {
            message: msg.into(),
            sql_error_code: None,
        }
    }

    /// Create an execution error without a server error number.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::Execution {
            message: msg.into(),
            sql_error_code: None,
        }
    }

    /// Create an invalid input error.
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    /// Create a timeout error.
    pub fn timeout(seconds: u64) -> Self {
        Self::Timeout {
            timeout_seconds: seconds,
        }
    }

    /// Create a resource not found error.
    pub fn resource_not_found(uri: impl Into<String>) -> Self {
        Self::ResourceNotFound(uri.into())
    }

    /// Create an internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    /// Wrap a driver error raised by a fixed diagnostic query.
    pub fn from_query_failure(e: tiberius::error::Error) -> Self {
        match split_driver_error(e) {
            DriverFailure::Server { message, code } => Self::Query {
                message,
                sql_error_code: Some(code),
            },
            DriverFailure::Transport(message) => Self::connection(message),
            DriverFailure::Other(message) => Self::query(message),
        }
    }

    /// Re-tag a query failure as an execution failure.
    ///
    /// The connection layer reports statement failures as [`ServerError::Query`];
    /// the safe executor reports them as [`ServerError::Execution`].
    pub fn into_execution(self) -> Self {
        match self {
            Self::Query {
                message,
                sql_error_code,
            } => Self::Execution {
                message,
                sql_error_code,
            },
            other => other,
        }
    }

    /// The SQL Server error number, if the failure came from the server.
    pub fn sql_error_code(&self) -> Option<u32> {
        match self {
            Self::Query { sql_error_code, .. } | Self::Execution { sql_error_code, .. } => {
                *sql_error_code
            }
            _ => None,
        }
    }

    /// Get a user-friendly suggestion for how to fix this error.
    pub fn suggestion(&self) -> Option<&'static str> {
        match self {
            Self::Config(_) => Some("Check your environment variables and .env settings"),
            Self::Connection { .. } => {
                Some("Check DB_HOST, DB_PORT, credentials and the ENCRYPT/TRUST_SERVER_CERTIFICATE flags")
            }
            Self::Timeout { .. } => Some("Try a narrower query or raise QUERY_TIMEOUT_SECS"),
            _ => match self.sql_error_code() {
                Some(18456) => Some("Verify DB_UID and DB_PWD"),
                Some(4060) => Some("Check the database name and ensure it exists"),
                Some(208) => Some("Check the object name and schema"),
                Some(229) | Some(230) | Some(297) | Some(300) => {
                    Some("The login needs VIEW SERVER STATE / VIEW DATABASE STATE for DMV access")
                }
                Some(102) => Some("Check the statement syntax"),
                _ => None,
            },
        }
    }

    /// Render the error with its suggestion, as shown to tool callers.
    pub fn to_user_message(&self) -> String {
        match self.suggestion() {
            Some(hint) => format!("{}\nSuggestion: {}", self, hint),
            None => self.to_string(),
        }
    }
}

/// Driver errors reduced to what the taxonomy cares about.
enum DriverFailure {
    Server { message: String, code: u32 },
    Transport(String),
    Other(String),
}

fn split_driver_error(e: tiberius::error::Error) -> DriverFailure {
    use tiberius::error::Error;

    match e {
        Error::Server(token) => DriverFailure::Server {
            message: token.message().to_string(),
            code: token.code(),
        },
        Error::Io { .. } | Error::Tls(_) | Error::Routing { .. } => {
            DriverFailure::Transport(e.to_string())
        }
        other => DriverFailure::Other(other.to_string()),
    }
}

/// Convert ServerError to rmcp's ErrorData for protocol responses.
///
/// Tool failures are reported as tool error results instead; this conversion is for
/// resource reads and other protocol-level paths.
impl From<ServerError> for ErrorData {
    fn from(e: ServerError) -> Self {
        match e {
            ServerError::ResourceNotFound(uri) => {
                ErrorData::resource_not_found(format!("Resource not found: {}", uri), None)
            }
            ServerError::Config(msg) => ErrorData::invalid_request(msg, None),
            ServerError::InvalidInput(msg) => ErrorData::invalid_params(msg, None),
            other => ErrorData::internal_error(other.to_user_message(), None),
        }
    }
}
