//! In-memory connector that records every statement, for unit tests.

use crate::database::connection::{Connector, DiagnosticConnection};
use crate::database::query::ResultRow;
use crate::error::ServerError;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone)]
enum Reply {
    Rows(Vec<ResultRow>),
    Fail { message: String, code: u32 },
    Stall(Duration),
}

/// Everything the fake server saw.
#[derive(Debug, Default)]
pub struct Journal {
    pub opened: usize,
    pub closed: usize,
    pub databases: Vec<String>,
    pub statements: Vec<String>,
    pub params: Vec<Vec<String>>,
}

impl Journal {
    /// Index of the first statement containing `needle`.
    pub fn position(&self, needle: &str) -> Option<usize> {
        self.statements.iter().position(|s| s.contains(needle))
    }

    pub fn saw(&self, needle: &str) -> bool {
        self.position(needle).is_some()
    }
}

/// Scripted connector. Replies are matched by substring, first rule wins.
#[derive(Clone, Default)]
pub struct RecordingConnector {
    journal: Arc<Mutex<Journal>>,
    rules: Arc<Vec<(String, Reply)>>,
    refuse: bool,
}

impl RecordingConnector {
    pub fn new() -> Self {
        Self::default()
    }

    fn push_rule(mut self, needle: &str, reply: Reply) -> Self {
        let mut rules = (*self.rules).clone();
        rules.push((needle.to_string(), reply));
        self.rules = Arc::new(rules);
        self
    }

    /// Statements containing `needle` return `rows`.
    pub fn returning(self, needle: &str, rows: Vec<ResultRow>) -> Self {
        self.push_rule(needle, Reply::Rows(rows))
    }

    /// Statements containing `needle` fail with a server error.
    pub fn failing(self, needle: &str, code: u32, message: &str) -> Self {
        self.push_rule(
            needle,
            Reply::Fail {
                message: message.to_string(),
                code,
            },
        )
    }

    /// Statements containing `needle` sleep before returning no rows.
    pub fn stalling(self, needle: &str, delay: Duration) -> Self {
        self.push_rule(needle, Reply::Stall(delay))
    }

    /// Every open attempt fails.
    pub fn refusing(mut self) -> Self {
        self.refuse = true;
        self
    }

    pub fn journal(&self) -> std::sync::MutexGuard<'_, Journal> {
        self.journal.lock().unwrap()
    }

    fn reply_for(&self, sql: &str) -> Option<Reply> {
        self.rules
            .iter()
            .find(|(needle, _)| sql.contains(needle.as_str()))
            .map(|(_, reply)| reply.clone())
    }
}

impl Connector for RecordingConnector {
    type Connection = RecordingConnection;

    async fn open(&self, database: &str) -> Result<RecordingConnection, ServerError> {
        if self.refuse {
            return Err(ServerError::connection("Login failed: host unreachable"));
        }
        {
            let mut journal = self.journal();
            journal.opened += 1;
            journal.databases.push(database.to_string());
        }
        Ok(RecordingConnection {
            connector: self.clone(),
        })
    }
}

pub struct RecordingConnection {
    connector: RecordingConnector,
}

impl RecordingConnection {
    async fn run(&mut self, sql: &str, params: &[&str]) -> Result<Vec<ResultRow>, ServerError> {
        {
            let mut journal = self.connector.journal();
            journal.statements.push(sql.to_string());
            journal
                .params
                .push(params.iter().map(|p| p.to_string()).collect());
        }

        match self.connector.reply_for(sql) {
            None => Ok(Vec::new()),
            Some(Reply::Rows(rows)) => Ok(rows),
            Some(Reply::Fail { message, code }) => Err(ServerError::Query {
                message,
                sql_error_code: Some(code),
            }),
            Some(Reply::Stall(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(Vec::new())
            }
        }
    }
}

impl DiagnosticConnection for RecordingConnection {
    async fn query(&mut self, sql: &str, params: &[&str]) -> Result<Vec<ResultRow>, ServerError> {
        self.run(sql, params).await
    }

    async fn batch(&mut self, sql: &str) -> Result<Vec<ResultRow>, ServerError> {
        self.run(sql, &[]).await
    }

    async fn close(self) -> Result<(), ServerError> {
        self.connector.journal().closed += 1;
        Ok(())
    }
}
