//! Configuration hashing for change detection.
//!
//! This module provides deterministic hashing of node sets and attribute
//! maps. Plans record the hash of the configuration they were computed
//! from, and state records the hash of the attributes that were applied.

use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::graph::Node;
use crate::provider::Attributes;

/// Hasher for computing configuration hashes.
#[derive(Debug, Default, Clone, Copy)]
pub struct ConfigHasher;

impl ConfigHasher {
    /// Creates a new configuration hasher.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }

    /// Computes a hash of a whole node set.
    ///
    /// The hash does not depend on the order of `nodes`.
    #[must_use]
    pub fn hash_nodes(&self, nodes: &[Node]) -> String {
        let mut sorted: Vec<&Node> = nodes.iter().collect();
        sorted.sort_by(|a, b| a.name().cmp(b.name()));

        let mut hasher = Sha256::new();
        for node in sorted {
            hasher.update(node.name().as_bytes());
            hasher.update([0u8]);
            hasher.update(node.kind().to_string().as_bytes());
            hasher.update([0u8]);
            hasher.update(Self::canonical(node.raw_config()).as_bytes());
            hasher.update([0u8]);
            for dep in node.explicit_depends_on() {
                hasher.update(dep.as_bytes());
                hasher.update([1u8]);
            }
            if let Some(provider) = node.provider_ref() {
                hasher.update(provider.as_bytes());
            }
            hasher.update([0xffu8]);
        }

        hex::encode(hasher.finalize())
    }

    /// Computes a hash of an attribute map.
    #[must_use]
    pub fn hash_attributes(&self, attributes: &Attributes) -> String {
        let mut hasher = Sha256::new();
        for (key, value) in attributes {
            hasher.update(key.as_bytes());
            hasher.update([0u8]);
            hasher.update(Self::canonical(value).as_bytes());
            hasher.update([0xffu8]);
        }
        hex::encode(hasher.finalize())
    }

    /// Returns the short form of a hash for display.
    #[must_use]
    pub fn short_hash(hash: &str) -> &str {
        hash.get(..12).unwrap_or(hash)
    }

    /// Serializes a value with object keys in sorted order.
    fn canonical(value: &Value) -> String {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::ModulePath;
    use serde_json::json;

    fn nodes() -> Vec<Node> {
        vec![
            Node::provider("null", None, ModulePath::root(), json!({})),
            Node::resource("null_resource", "a", ModulePath::root(), json!({"x": 1, "y": [1, 2]})),
        ]
    }

    #[test]
    fn test_hash_is_deterministic_and_order_independent() {
        let hasher = ConfigHasher::new();
        let forward = nodes();
        let mut reversed = nodes();
        reversed.reverse();

        let hash = hasher.hash_nodes(&forward);
        assert_eq!(hash.len(), 64);
        assert_eq!(hash, hasher.hash_nodes(&reversed));
    }

    #[test]
    fn test_hash_changes_with_config() {
        let hasher = ConfigHasher::new();
        let mut changed = nodes();
        let config = json!({"x": 2, "y": [1, 2]});
        changed[1] = Node::resource("null_resource", "a", ModulePath::root(), config);
        assert_ne!(hasher.hash_nodes(&nodes()), hasher.hash_nodes(&changed));

        let mut with_dep = nodes();
        with_dep[1] = with_dep[1].clone().with_depends_on(["provider.null"]);
        assert_ne!(hasher.hash_nodes(&nodes()), hasher.hash_nodes(&with_dep));
    }

    #[test]
    fn test_attribute_hash_ignores_insertion_order() {
        let hasher = ConfigHasher::new();
        let a: Attributes = serde_json::from_value(json!({"a": 1, "b": {"d": 1, "c": 2}})).unwrap();
        let b: Attributes = serde_json::from_value(json!({"b": {"c": 2, "d": 1}, "a": 1})).unwrap();
        assert_eq!(hasher.hash_attributes(&a), hasher.hash_attributes(&b));
        assert_eq!(ConfigHasher::short_hash(&hasher.hash_attributes(&a)).len(), 12);
    }
}
