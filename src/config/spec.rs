//! Configuration document types.
//!
//! These structs map to a `terragraph.yaml` document. Every attribute map
//! is kept as raw JSON-shaped data; `${...}` interpolations inside it are
//! resolved only while walking the graph.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;

/// The root of a configuration document, also used for module bodies.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct Document {
    /// Input variables by name.
    #[serde(default)]
    pub variables: BTreeMap<String, VariableConfig>,
    /// Provider configurations.
    #[serde(default)]
    pub providers: Vec<ProviderConfig>,
    /// Managed resources.
    #[serde(default)]
    pub resources: Vec<ResourceConfig>,
    /// Data sources.
    #[serde(default)]
    pub data: Vec<DataConfig>,
    /// Outputs by name.
    #[serde(default)]
    pub outputs: BTreeMap<String, OutputConfig>,
    /// Child module calls.
    #[serde(default)]
    pub modules: Vec<ModuleConfig>,
}

/// An input variable declaration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct VariableConfig {
    /// Value used when the caller supplies none.
    #[serde(default)]
    pub default: Option<Value>,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
}

/// A provider configuration block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Provider type, e.g. `null`.
    #[serde(rename = "type")]
    pub provider_type: String,
    /// Alias for a second instance of the same type.
    #[serde(default)]
    pub alias: Option<String>,
    /// Provider settings.
    #[serde(default)]
    pub config: Map<String, Value>,
}

/// A managed resource block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ResourceConfig {
    /// Resource type, e.g. `null_resource`.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Local name, unique per type within a module.
    pub name: String,
    /// Desired attributes.
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Explicit dependencies by module-relative stable name.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Provider key override, e.g. `null.west`.
    #[serde(default)]
    pub provider: Option<String>,
}

/// A data source block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct DataConfig {
    /// Data source type.
    #[serde(rename = "type")]
    pub data_type: String,
    /// Local name.
    pub name: String,
    /// Query arguments.
    #[serde(default)]
    pub config: Map<String, Value>,
    /// Explicit dependencies by module-relative stable name.
    #[serde(default)]
    pub depends_on: Vec<String>,
    /// Provider key override.
    #[serde(default)]
    pub provider: Option<String>,
}

/// An output declaration.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// The exported value.
    pub value: Value,
    /// Human-readable description.
    #[serde(default)]
    pub description: Option<String>,
}

/// A child module call.
///
/// The body is either inline or loaded from `source`, a path relative to
/// the file that declares the call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(deny_unknown_fields)]
pub struct ModuleConfig {
    /// Call name; scopes every node of the body under `module.<name>`.
    pub name: String,
    /// Path of a file holding the module body.
    #[serde(default)]
    pub source: Option<PathBuf>,
    /// Inline module body.
    #[serde(default)]
    pub body: Option<Box<Document>>,
    /// Values for the module's variables.
    #[serde(default)]
    pub inputs: Map<String, Value>,
}

impl Document {
    /// Returns true if the document declares nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.variables.is_empty()
            && self.providers.is_empty()
            && self.resources.is_empty()
            && self.data.is_empty()
            && self.outputs.is_empty()
            && self.modules.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_deserialize_document() {
        let yaml = r#"
variables:
  region:
    default: eu-west
providers:
  - type: "null"
    alias: west
resources:
  - type: null_resource
    name: web
    provider: null.west
    depends_on: [null_resource.db]
    config:
      triggers:
        region: "${var.region}"
outputs:
  web:
    value: "${null_resource.web.id}"
modules:
  - name: net
    inputs:
      cidr: 10.0.0.0/16
    body:
      variables:
        cidr: {}
"#;
        let doc: Document = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(doc.variables["region"].default, Some(json!("eu-west")));
        assert_eq!(doc.providers[0].alias.as_deref(), Some("west"));
        assert_eq!(doc.resources[0].config["triggers"], json!({"region": "${var.region}"}));
        assert_eq!(doc.resources[0].depends_on, vec!["null_resource.db"]);
        assert_eq!(doc.modules[0].inputs["cidr"], json!("10.0.0.0/16"));
        assert!(doc.modules[0].body.as_ref().unwrap().variables.contains_key("cidr"));
        assert!(!doc.is_empty());
    }

    #[test]
    fn test_unknown_fields_are_rejected() {
        let yaml = "resources:\n  - type: null_resource\n    name: a\n    count: 2\n";
        assert!(serde_yaml::from_str::<Document>(yaml).is_err());
    }

    #[test]
    fn test_empty_document() {
        let doc: Document = serde_yaml::from_str("{}").unwrap();
        assert!(doc.is_empty());
    }
}
