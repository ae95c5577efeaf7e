//! Plugin protocol types
//!
//! User plugins are executables that communicate via JSON messages over
//! stdin/stdout. Each plugin must support the `--manifest` flag to declare
//! its entrypoints and the pipeline shape each one accepts.

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::domain::PipelineKind;

/// Plugin manifest declaring entrypoints
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    /// Plugin name (informational)
    pub name: String,

    /// Plugin version
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<String>,

    /// Human-readable description
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    /// Entrypoint name to the pipeline shape it accepts
    pub entrypoints: BTreeMap<String, PipelineKind>,
}

/// One invocation sent to a plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginRequest {
    /// Entrypoint to run
    pub entrypoint: String,

    /// Pipeline shape of this call
    pub target: PipelineKind,

    /// Project root or matched file
    pub path: PathBuf,

    /// Already-computed properties of the bound context
    #[serde(default)]
    pub properties: serde_json::Map<String, serde_json::Value>,
}

/// A response from a plugin
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginResponse {
    /// Whether the invocation succeeded
    pub success: bool,

    /// Error message (if failure)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    /// Properties to store on the bound context
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: BTreeMap<String, serde_json::Value>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manifest_parses_entrypoint_shapes() {
        let json = r#"{"name": "render", "entrypoints": {"main": "file", "setup": "project"}}"#;
        let manifest: PluginManifest = serde_json::from_str(json).unwrap();

        assert_eq!(manifest.entrypoints["main"], PipelineKind::File);
        assert_eq!(manifest.entrypoints["setup"], PipelineKind::Project);
        assert!(manifest.version.is_none());
    }

    #[test]
    fn manifest_rejects_unknown_shape() {
        let json = r#"{"name": "render", "entrypoints": {"main": "folder"}}"#;
        assert!(serde_json::from_str::<PluginManifest>(json).is_err());
    }

    #[test]
    fn request_serialization() {
        let request = PluginRequest {
            entrypoint: "main".to_string(),
            target: PipelineKind::File,
            path: PathBuf::from("/tmp/a.html"),
            properties: serde_json::Map::new(),
        };
        let json = serde_json::to_string(&request).unwrap();

        assert!(json.contains(r#""target":"file""#));
        assert!(json.contains("/tmp/a.html"));
    }

    #[test]
    fn response_defaults() {
        let response: PluginResponse = serde_json::from_str(r#"{"success": true}"#).unwrap();
        assert!(response.success);
        assert!(response.error.is_none());
        assert!(response.properties.is_empty());
    }

    #[test]
    fn response_error() {
        let response: PluginResponse =
            serde_json::from_str(r#"{"success": false, "error": "Something went wrong"}"#).unwrap();

        assert!(!response.success);
        assert_eq!(response.error, Some("Something went wrong".to_string()));
    }

    #[test]
    fn response_properties() {
        let response: PluginResponse =
            serde_json::from_str(r#"{"success": true, "properties": {"words": 12, "lang": "en"}}"#).unwrap();

        assert_eq!(response.properties["words"], serde_json::json!(12));
        assert_eq!(response.properties["lang"], serde_json::json!("en"));
    }
}
