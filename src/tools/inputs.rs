//! Tool input types with JSON Schema generation.

use crate::constants::DEFAULT_SCHEMA;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

fn default_schema() -> String {
    DEFAULT_SCHEMA.to_string()
}

/// Input for tools that only need a target database.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct DatabaseInput {
    /// Database to run the diagnostic against.
    pub db: String,
}

/// Input for the `get_table_schema` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TableSchemaInput {
    /// Database containing the table.
    pub db: String,

    /// Table name, without schema.
    pub table: String,

    /// Schema name (default: dbo).
    #[serde(default = "default_schema")]
    pub db_schema: String,
}

/// Input for the `get_table_names` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct TableNamesInput {
    /// Database to list tables from.
    pub db: String,

    /// Schema name (default: dbo).
    #[serde(default = "default_schema")]
    pub db_schema: String,
}

/// Input for the `run_safe_diagnostic` tool.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct SafeDiagnosticInput {
    /// Database to run the statement against.
    pub db: String,

    /// SQL to run. It executes inside a transaction that is always rolled back.
    pub sql: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_schema_defaults_to_dbo() {
        let input: TableSchemaInput =
            serde_json::from_value(json!({"db": "Sales", "table": "Orders"})).unwrap();
        assert_eq!(input.db_schema, "dbo");

        let input: TableNamesInput = serde_json::from_value(json!({"db": "Sales"})).unwrap();
        assert_eq!(input.db_schema, "dbo");
    }

    #[test]
    fn test_explicit_schema() {
        let input: TableNamesInput =
            serde_json::from_value(json!({"db": "Sales", "db_schema": "audit"})).unwrap();
        assert_eq!(input.db_schema, "audit");
    }

    #[test]
    fn test_required_fields() {
        assert!(serde_json::from_value::<DatabaseInput>(json!({})).is_err());
        assert!(serde_json::from_value::<SafeDiagnosticInput>(json!({"db": "Sales"})).is_err());
        assert!(serde_json::from_value::<TableSchemaInput>(json!({"db": "Sales"})).is_err());
    }
}
