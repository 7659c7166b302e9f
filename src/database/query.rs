//! Result rows and their extraction from driver result sets.

use crate::database::types::{SqlValue, TypeMapper};
use serde::ser::SerializeMap;
use serde::{Serialize, Serializer};
use tiberius::Row;

/// A single row of query results.
///
/// Columns keep the order of the result set, and the row serializes as a JSON
/// object in that order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResultRow {
    columns: Vec<(String, SqlValue)>,
}

impl ResultRow {
    /// Create a new result row.
    pub fn new() -> Self {
        Self::default()
    }

    /// Get a value by column name.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Insert a value. A repeated column name replaces the earlier value in place.
    pub fn insert(&mut self, column: impl Into<String>, value: SqlValue) {
        let column = column.into();
        match self.columns.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.columns.push((column, value)),
        }
    }

    /// Builder-style insert.
    pub fn with(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.insert(column, value.into());
        self
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.columns.len()
    }

    #[cfg(test)]
    fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    /// Take the value of the first column, consuming the row.
    pub fn into_first_value(self) -> Option<SqlValue> {
        self.columns.into_iter().next().map(|(_, value)| value)
    }

    /// Convert a driver row, keeping column order.
    pub fn from_tiberius(row: &Row) -> Self {
        let columns = row
            .columns()
            .iter()
            .enumerate()
            .map(|(idx, col)| (col.name().to_string(), TypeMapper::extract_column(row, idx)))
            .collect();
        Self { columns }
    }
}

impl Serialize for ResultRow {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Convert a driver result set into rows.
pub fn rows_from_tiberius(rows: &[Row]) -> Vec<ResultRow> {
    rows.iter().map(ResultRow::from_tiberius).collect()
}

/// Truncate a string for logging purposes.
pub fn truncate_for_log(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}
