//! Statement classification for the safe diagnostic executor.
//!
//! This is a leading-keyword sniffer, not a SQL parser.

use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;

/// Kind of a SQL statement, decided by its first keyword.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatementKind {
    Select,
    Show,
    Explain,
    With,
    Insert,
    Update,
    Delete,
    Merge,
    Create,
    Alter,
    Drop,
    Truncate,
    Exec,
    Set,
    Declare,
    Other,
}

impl StatementKind {
    /// Classify a statement by its leading keyword, ignoring case and leading whitespace.
    pub fn classify(sql: &str) -> Self {
        let Some(keyword) = LEADING_KEYWORD.captures(sql).and_then(|c| c.get(1)) else {
            return StatementKind::Other;
        };

        match keyword.as_str().to_ascii_uppercase().as_str() {
            "SELECT" => StatementKind::Select,
            "SHOW" => StatementKind::Show,
            "EXPLAIN" => StatementKind::Explain,
            "WITH" => StatementKind::With,
            "INSERT" => StatementKind::Insert,
            "UPDATE" => StatementKind::Update,
            "DELETE" => StatementKind::Delete,
            "MERGE" => StatementKind::Merge,
            "CREATE" => StatementKind::Create,
            "ALTER" => StatementKind::Alter,
            "DROP" => StatementKind::Drop,
            "TRUNCATE" => StatementKind::Truncate,
            "EXEC" | "EXECUTE" => StatementKind::Exec,
            "SET" => StatementKind::Set,
            "DECLARE" => StatementKind::Declare,
            _ => StatementKind::Other,
        }
    }

    /// Whether session statistics are collected around this kind of statement.
    pub fn collects_statistics(&self) -> bool {
        matches!(
            self,
            StatementKind::Select
                | StatementKind::Show
                | StatementKind::Explain
                | StatementKind::With
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            StatementKind::Select => "SELECT",
            StatementKind::Show => "SHOW",
            StatementKind::Explain => "EXPLAIN",
            StatementKind::With => "WITH",
            StatementKind::Insert => "INSERT",
            StatementKind::Update => "UPDATE",
            StatementKind::Delete => "DELETE",
            StatementKind::Merge => "MERGE",
            StatementKind::Create => "CREATE",
            StatementKind::Alter => "ALTER",
            StatementKind::Drop => "DROP",
            StatementKind::Truncate => "TRUNCATE",
            StatementKind::Exec => "EXEC",
            StatementKind::Set => "SET",
            StatementKind::Declare => "DECLARE",
            StatementKind::Other => "OTHER",
        }
    }
}

impl fmt::Display for StatementKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

static LEADING_KEYWORD: Lazy<Regex> = Lazy::new(|| compile(r"^\s*([A-Za-z]+)\b"));

/// Statements that would end or escape the wrapping transaction.
static TRANSACTION_CONTROL: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (compile(r"(?i)\bCOMMIT\b"), "COMMIT"),
        (compile(r"(?i)\bROLLBACK\b"), "ROLLBACK"),
        (
            compile(r"(?i)\bBEGIN\s+(DISTRIBUTED\s+)?TRAN(SACTION)?\b"),
            "BEGIN TRANSACTION",
        ),
        (compile(r"(?i)\bSAVE\s+TRAN(SACTION)?\b"), "SAVE TRANSACTION"),
    ]
});

// Patterns are constants covered by the tests below.
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern)
        .unwrap_or_else(|e| panic!("Internal error: invalid regex pattern '{}': {}", pattern, e))
}

/// Find a transaction-control keyword in the statement, if any.
///
/// String literals and comments are not stripped, so a literal containing
/// `COMMIT` is rejected too.
pub fn find_transaction_control(sql: &str) -> Option<&'static str> {
    TRANSACTION_CONTROL
        .iter()
        .find(|(pattern, _)| pattern.is_match(sql))
        .map(|(_, name)| *name)
}
