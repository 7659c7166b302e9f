//! Per-call SQL Server connections.
//!
//! There is no pool: every diagnostic opens its own connection through a
//! [`Connector`] and closes it before returning.

use crate::config::DatabaseConfig;
use crate::database::query::{rows_from_tiberius, truncate_for_log, ResultRow};
use crate::error::ServerError;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tiberius::{AuthMethod, Client, Config, EncryptionLevel, Query};
use tokio::net::TcpStream;
use tokio_util::compat::{Compat, TokioAsyncWriteCompatExt};
use tracing::{debug, info};

/// Type alias for a raw tiberius connection.
pub type RawConnection = Client<Compat<TcpStream>>;

/// An open connection bound to one database.
///
/// Statement failures are reported as [`ServerError::Query`].
pub trait DiagnosticConnection: Send {
    /// Run a parametrized statement (`@P1`, `@P2`, ...) and return its first result set.
    fn query(
        &mut self,
        sql: &str,
        params: &[&str],
    ) -> impl Future<Output = Result<Vec<ResultRow>, ServerError>> + Send;

    /// Run a raw batch verbatim and return its first result set.
    fn batch(
        &mut self,
        sql: &str,
    ) -> impl Future<Output = Result<Vec<ResultRow>, ServerError>> + Send;

    /// Close the connection.
    fn close(self) -> impl Future<Output = Result<(), ServerError>> + Send;
}

/// Opens connections for a database name.
pub trait Connector: Send + Sync {
    type Connection: DiagnosticConnection;

    fn open(
        &self,
        database: &str,
    ) -> impl Future<Output = Result<Self::Connection, ServerError>> + Send;
}

/// Where a connection goes, rendered without the password.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionTarget {
    pub host: String,
    pub port: u16,
    pub database: String,
    pub username: String,
    pub encrypt: bool,
    pub trust_server_certificate: bool,
}

impl ConnectionTarget {
    pub fn new(config: &DatabaseConfig, database: &str) -> Self {
        Self {
            host: config.host.clone(),
            port: config.port,
            database: database.to_string(),
            username: config.username.clone(),
            encrypt: config.encrypt,
            trust_server_certificate: config.trust_server_certificate,
        }
    }
}

impl fmt::Display for ConnectionTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let encode =
            |s: &str| url::form_urlencoded::byte_serialize(s.as_bytes()).collect::<String>();
        write!(
            f,
            "mssql://{}:{}@{},{}/{}?Encrypt={}&TrustServerCertificate={}",
            encode(&self.username),
            crate::constants::PASSWORD_MASK,
            self.host,
            self.port,
            encode(&self.database),
            yes_no(self.encrypt),
            yes_no(self.trust_server_certificate),
        )
    }
}

fn yes_no(flag: bool) -> &'static str {
    if flag {
        "yes"
    } else {
        "no"
    }
}

/// Create a tiberius Config for one database.
pub fn create_config(db_config: &DatabaseConfig, database: &str) -> Config {
    let mut config = Config::new();

    config.host(&db_config.host);
    config.port(db_config.port);

    if !database.is_empty() {
        config.database(database);
    }

    if db_config.encrypt {
        config.encryption(EncryptionLevel::Required);
    } else {
        config.encryption(EncryptionLevel::Off);
    }

    if db_config.trust_server_certificate {
        config.trust_cert();
    }

    config.application_name(env!("CARGO_PKG_NAME"));
    config.authentication(AuthMethod::sql_server(
        &db_config.username,
        db_config.password.expose(),
    ));

    config
}

/// Opens tiberius connections over TCP.
#[derive(Debug, Clone)]
pub struct TiberiusConnector {
    config: Arc<DatabaseConfig>,
}

impl TiberiusConnector {
    pub fn new(config: Arc<DatabaseConfig>) -> Self {
        Self { config }
    }

    async fn connect(&self, database: &str) -> Result<RawConnection, ServerError> {
        let target = ConnectionTarget::new(&self.config, database);
        info!("Connection string: {}", target);

        let address = format!("{}:{}", self.config.host, self.config.port);
        let tcp = TcpStream::connect(&address).await.map_err(|e| {
            ServerError::connection_with_source(format!("Failed to connect to {}", address), e)
        })?;

        tcp.set_nodelay(true)
            .map_err(|e| ServerError::connection_with_source("Failed to set TCP_NODELAY", e))?;

        let client = Client::connect(create_config(&self.config, database), tcp.compat_write())
            .await
            .map_err(|e| ServerError::connection_with_source("Failed to connect to SQL Server", e))?;

        debug!("Connection established to {}", target);
        Ok(client)
    }
}

impl Connector for TiberiusConnector {
    type Connection = TiberiusConnection;

    async fn open(&self, database: &str) -> Result<TiberiusConnection, ServerError> {
        let budget = self.config.connect_timeout;
        let client = tokio::time::timeout(budget, self.connect(database))
            .await
            .map_err(|_| {
                ServerError::connection(format!(
                    "Connection attempt timed out after {} seconds",
                    budget.as_secs()
                ))
            })??;
        Ok(TiberiusConnection { client })
    }
}

/// A live tiberius connection.
pub struct TiberiusConnection {
    client: RawConnection,
}

impl DiagnosticConnection for TiberiusConnection {
    async fn query(&mut self, sql: &str, params: &[&str]) -> Result<Vec<ResultRow>, ServerError> {
        debug!("Executing query: {}", truncate_for_log(sql, 200));

        let mut query = Query::new(sql);
        for param in params {
            query.bind(param.to_string());
        }

        let rows = query
            .query(&mut self.client)
            .await
            .map_err(ServerError::from_query_failure)?
            .into_first_result()
            .await
            .map_err(ServerError::from_query_failure)?;

        Ok(rows_from_tiberius(&rows))
    }

    async fn batch(&mut self, sql: &str) -> Result<Vec<ResultRow>, ServerError> {
        debug!("Executing batch: {}", truncate_for_log(sql, 200));

        // simple_query sends the text as-is instead of wrapping it in sp_executesql
        let rows = self
            .client
            .simple_query(sql)
            .await
            .map_err(ServerError::from_query_failure)?
            .into_first_result()
            .await
            .map_err(ServerError::from_query_failure)?;

        Ok(rows_from_tiberius(&rows))
    }

    async fn close(self) -> Result<(), ServerError> {
        self.client
            .close()
            .await
            .map_err(|e| ServerError::connection_with_source("Failed to close connection", e))
    }
}
