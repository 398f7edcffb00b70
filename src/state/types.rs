//! Persisted state types.
//!
//! These types record what was last applied for each managed resource and
//! are the observed side of every diff.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::graph::ModulePath;
use crate::provider::Attributes;

/// Current version of the state format.
pub const STATE_VERSION: &str = "1";

/// The recorded state of one managed resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceState {
    /// Remote identifier.
    pub id: String,
    /// Resource type, e.g. `aws_instance`.
    pub resource_type: String,
    /// Stable name of the provider node that manages the resource.
    pub provider: String,
    /// Module the resource was declared in.
    #[serde(default)]
    pub module_path: ModulePath,
    /// Observed attributes after the last apply.
    #[serde(default)]
    pub attributes: Attributes,
    /// Last observed remote status.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    /// Hash of the desired attributes that were applied.
    pub config_hash: String,
    /// Managed resources this one depended on when it was applied.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dependencies: Vec<String>,
    /// When the record was last written.
    pub updated_at: DateTime<Utc>,
}

/// The complete state document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateFile {
    /// State format version.
    pub version: String,
    /// Incremented on every write.
    pub serial: u64,
    /// Resource records keyed by stable node name.
    #[serde(default)]
    pub resources: BTreeMap<String, ResourceState>,
    /// When the document was last written.
    pub last_updated: DateTime<Utc>,
}

impl ResourceState {
    /// Creates a record stamped with the current time.
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        resource_type: impl Into<String>,
        provider: impl Into<String>,
        module_path: ModulePath,
        attributes: Attributes,
    ) -> Self {
        Self {
            id: id.into(),
            resource_type: resource_type.into(),
            provider: provider.into(),
            module_path,
            attributes,
            status: None,
            config_hash: String::new(),
            dependencies: Vec::new(),
            updated_at: Utc::now(),
        }
    }

    /// Sets the observed status.
    #[must_use]
    pub fn with_status(mut self, status: Option<String>) -> Self {
        self.status = status;
        self
    }

    /// Sets the configuration hash.
    #[must_use]
    pub fn with_config_hash(mut self, hash: impl Into<String>) -> Self {
        self.config_hash = hash.into();
        self
    }

    /// Sets the recorded resource dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, dependencies: Vec<String>) -> Self {
        self.dependencies = dependencies;
        self
    }

    /// Returns the provider key (`aws`, `aws.west`) from the provider node name.
    #[must_use]
    pub fn provider_key(&self) -> &str {
        self.provider
            .rsplit_once("provider.")
            .map_or(self.provider.as_str(), |(_, key)| key)
    }
}

impl StateFile {
    /// Creates an empty state document.
    #[must_use]
    pub fn new() -> Self {
        Self {
            version: STATE_VERSION.to_string(),
            serial: 0,
            resources: BTreeMap::new(),
            last_updated: Utc::now(),
        }
    }

    /// Bumps the serial and timestamp before a write.
    pub fn touch(&mut self) {
        self.serial += 1;
        self.last_updated = Utc::now();
    }
}

impl Default for StateFile {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_provider_key_from_node_name() {
        let state = ResourceState::new(
            "i-1",
            "aws_instance",
            "module.net.provider.aws.west",
            ModulePath::new(["net"]),
            Attributes::new(),
        );
        assert_eq!(state.provider_key(), "aws.west");

        let state = ResourceState::new(
            "i-1",
            "null_resource",
            "provider.null",
            ModulePath::root(),
            Attributes::new(),
        );
        assert_eq!(state.provider_key(), "null");
    }

    #[test]
    fn test_state_file_touch_bumps_serial() {
        let mut file = StateFile::new();
        file.touch();
        file.touch();
        assert_eq!(file.serial, 2);
    }

    #[test]
    fn test_resource_state_json_shape() {
        let mut attributes = Attributes::new();
        attributes.insert(String::from("ami"), json!("ami-123"));
        let state = ResourceState::new(
            "i-1",
            "aws_instance",
            "provider.aws",
            ModulePath::root(),
            attributes,
        )
        .with_config_hash("abc");

        let value = serde_json::to_value(&state).unwrap();
        assert_eq!(value["module_path"], json!([]));
        assert_eq!(value["attributes"]["ami"], json!("ami-123"));
        assert!(value.get("status").is_none());
    }
}
