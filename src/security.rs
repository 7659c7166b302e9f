//! Statement inspection for caller-supplied SQL.

pub mod statement;

pub use statement::{find_transaction_control, StatementKind};
