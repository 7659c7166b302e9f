//! Database connectivity and the diagnostic query set.

mod connection;
pub mod diagnostics;
mod query;
pub mod safe;
pub mod types;

#[cfg(test)]
pub(crate) mod testing;

pub use connection::{
    create_config, ConnectionTarget, Connector, DiagnosticConnection, RawConnection,
    TiberiusConnection, TiberiusConnector,
};
pub use diagnostics::Diagnostics;
pub use query::{truncate_for_log, ResultRow};
pub use safe::SafeExecutionResult;
pub use types::{SqlValue, TypeMapper};
