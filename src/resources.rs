//! MCP resources.
//!
//! One static resource is exposed:
//!
//! - `data://config` - the effective settings with the password masked

use crate::config::Settings;
use crate::error::ServerError;
use rmcp::model::{AnnotateAble, RawResource, ReadResourceResult, Resource, ResourceContents};

/// URI of the redacted configuration resource.
pub const CONFIG_RESOURCE_URI: &str = "data://config";

/// Build the list of available resources.
pub fn build_resource_list() -> Vec<Resource> {
    vec![create_resource(
        CONFIG_RESOURCE_URI,
        "Configuration",
        "Effective server settings with the database password masked",
        "application/json",
    )]
}

/// Read a resource by URI.
pub fn read_resource(settings: &Settings, uri: &str) -> Result<ReadResourceResult, ServerError> {
    let content = match uri {
        CONFIG_RESOURCE_URI => read_config(settings)?,
        _ => return Err(ServerError::resource_not_found(uri)),
    };

    Ok(ReadResourceResult {
        contents: vec![ResourceContents::text(content, uri.to_string())],
    })
}

fn read_config(settings: &Settings) -> Result<String, ServerError> {
    serde_json::to_string_pretty(&settings.redacted())
        .map_err(|e| ServerError::internal(format!("Failed to serialize settings: {}", e)))
}

fn create_resource(uri: &str, name: &str, description: &str, mime_type: &str) -> Resource {
    let mut resource = RawResource::new(uri, name);
    resource.description = Some(description.to_string());
    resource.mime_type = Some(mime_type.to_string());
    resource.no_annotation()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> Settings {
        Settings::from_lookup(|key| match key {
            "DB_PWD" => Some("Tr0ub4dor&3".to_string()),
            "DB_NAME" => Some("Sales".to_string()),
            "APP_TRANSPORT" => Some("sse".to_string()),
            _ => None,
        })
        .unwrap()
    }

    fn text_of(result: &ReadResourceResult) -> &str {
        match &result.contents[0] {
            ResourceContents::TextResourceContents { text, .. } => text,
            other => panic!("expected text contents, got {:?}", other),
        }
    }

    #[test]
    fn test_resource_list() {
        let resources = build_resource_list();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].uri, CONFIG_RESOURCE_URI);
    }

    #[test]
    fn test_config_resource_is_redacted() {
        let result = read_resource(&settings(), CONFIG_RESOURCE_URI).unwrap();
        let text = text_of(&result);

        assert!(!text.contains("Tr0ub4dor&3"));

        let json: serde_json::Value = serde_json::from_str(text).unwrap();
        assert_eq!(json["db_pwd"], "******");
        assert_eq!(json["db_name"], "Sales");
        assert_eq!(json["app_transport"], "sse");
    }

    #[test]
    fn test_unknown_resource() {
        let err = read_resource(&settings(), "data://secrets").unwrap_err();
        assert!(matches!(err, ServerError::ResourceNotFound(_)));
    }
}
