//! Typed graph vertices.
//!
//! Every declaration in the configuration becomes one [`Node`]. Nodes are
//! created once when the configuration is loaded and never change for the
//! lifetime of the graph built from them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeSet;
use std::fmt;

/// Variant of a graph node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A managed remote resource.
    Resource,
    /// A read-only data source.
    DataSource,
    /// A provider configuration.
    Provider,
    /// An input variable.
    Variable,
    /// A module output.
    Output,
    /// A call into a child module.
    ModuleCall,
}

/// Ordered module-call names from the root module.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ModulePath(Vec<String>);

/// Opaque, unresolved expression tree of a node.
pub type RawConfig = Value;

/// A vertex in the configuration dependency graph.
#[derive(Debug, Clone, PartialEq)]
pub struct Node {
    kind: NodeKind,
    name: String,
    type_name: Option<String>,
    local_name: String,
    module_path: ModulePath,
    raw_config: RawConfig,
    explicit_depends_on: BTreeSet<String>,
    provider_ref: Option<String>,
    orphaned: bool,
}

impl ModulePath {
    /// The root module.
    #[must_use]
    pub const fn root() -> Self {
        Self(Vec::new())
    }

    /// Creates a path from module-call names.
    #[must_use]
    pub fn new<I, S>(segments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(segments.into_iter().map(Into::into).collect())
    }

    /// Returns true for the root module.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the module-call names.
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Returns the path of a child module.
    #[must_use]
    pub fn child(&self, name: &str) -> Self {
        let mut segments = self.0.clone();
        segments.push(name.to_string());
        Self(segments)
    }

    /// Returns the parent path, or `None` for the root.
    #[must_use]
    pub fn parent(&self) -> Option<Self> {
        if self.0.is_empty() {
            return None;
        }
        Some(Self(self.0[..self.0.len() - 1].to_vec()))
    }

    /// Returns this path followed by every ancestor up to the root.
    #[must_use]
    pub fn scopes(&self) -> Vec<Self> {
        (0..=self.0.len())
            .rev()
            .map(|len| Self(self.0[..len].to_vec()))
            .collect()
    }

    /// Returns the stable-name prefix, e.g. `module.net.module.vpc.`.
    #[must_use]
    pub fn prefix(&self) -> String {
        self.0.iter().fold(String::new(), |mut acc, segment| {
            acc.push_str("module.");
            acc.push_str(segment);
            acc.push('.');
            acc
        })
    }

    /// Qualifies a module-relative name with this path.
    #[must_use]
    pub fn qualify(&self, relative: &str) -> String {
        format!("{}{relative}", self.prefix())
    }
}

impl fmt::Display for ModulePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            write!(f, "root")
        } else {
            write!(f, "root.{}", self.0.join("."))
        }
    }
}

impl Node {
    fn build(
        kind: NodeKind,
        relative: String,
        type_name: Option<String>,
        local_name: &str,
        module_path: ModulePath,
        raw_config: RawConfig,
    ) -> Self {
        Self {
            kind,
            name: module_path.qualify(&relative),
            type_name,
            local_name: local_name.to_string(),
            module_path,
            raw_config,
            explicit_depends_on: BTreeSet::new(),
            provider_ref: None,
            orphaned: false,
        }
    }

    /// Creates a managed resource; its provider defaults to the type prefix.
    #[must_use]
    pub fn resource(
        resource_type: &str,
        name: &str,
        module_path: ModulePath,
        raw_config: RawConfig,
    ) -> Self {
        let mut node = Self::build(
            NodeKind::Resource,
            format!("{resource_type}.{name}"),
            Some(resource_type.to_string()),
            name,
            module_path,
            raw_config,
        );
        node.provider_ref = Some(default_provider(resource_type));
        node
    }

    /// Creates a data source; its provider defaults to the type prefix.
    #[must_use]
    pub fn data_source(
        data_type: &str,
        name: &str,
        module_path: ModulePath,
        raw_config: RawConfig,
    ) -> Self {
        let mut node = Self::build(
            NodeKind::DataSource,
            format!("data.{data_type}.{name}"),
            Some(data_type.to_string()),
            name,
            module_path,
            raw_config,
        );
        node.provider_ref = Some(default_provider(data_type));
        node
    }

    /// Creates a provider configuration, optionally aliased.
    #[must_use]
    pub fn provider(
        provider_type: &str,
        alias: Option<&str>,
        module_path: ModulePath,
        raw_config: RawConfig,
    ) -> Self {
        let key = provider_key(provider_type, alias);
        Self::build(
            NodeKind::Provider,
            format!("provider.{key}"),
            Some(provider_type.to_string()),
            &key,
            module_path,
            raw_config,
        )
    }

    /// Creates an input variable.
    #[must_use]
    pub fn variable(name: &str, module_path: ModulePath, raw_config: RawConfig) -> Self {
        Self::build(NodeKind::Variable, format!("var.{name}"), None, name, module_path, raw_config)
    }

    /// Creates a module output.
    #[must_use]
    pub fn output(name: &str, module_path: ModulePath, raw_config: RawConfig) -> Self {
        Self::build(NodeKind::Output, format!("output.{name}"), None, name, module_path, raw_config)
    }

    /// Creates a call into a child module.
    #[must_use]
    pub fn module_call(name: &str, module_path: ModulePath, raw_config: RawConfig) -> Self {
        Self::build(
            NodeKind::ModuleCall,
            format!("module.{name}"),
            None,
            name,
            module_path,
            raw_config,
        )
    }

    /// Adds explicit dependencies, given as stable node names.
    #[must_use]
    pub fn with_depends_on<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.explicit_depends_on.extend(names.into_iter().map(Into::into));
        self
    }

    /// Overrides the provider key (`aws`, `aws.west`).
    #[must_use]
    pub fn with_provider(mut self, provider_ref: impl Into<String>) -> Self {
        if matches!(self.kind, NodeKind::Resource | NodeKind::DataSource) {
            self.provider_ref = Some(provider_ref.into());
        }
        self
    }

    /// Marks a resource as present in state but absent from configuration.
    #[must_use]
    pub fn into_orphan(mut self) -> Self {
        if self.kind == NodeKind::Resource {
            self.orphaned = true;
            self.raw_config = Value::Null;
        }
        self
    }

    /// Returns the node variant.
    #[must_use]
    pub const fn kind(&self) -> NodeKind {
        self.kind
    }

    /// Returns the stable, module-qualified name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the resource, data or provider type.
    #[must_use]
    pub fn type_name(&self) -> Option<&str> {
        self.type_name.as_deref()
    }

    /// Returns the name local to the module.
    #[must_use]
    pub fn local_name(&self) -> &str {
        &self.local_name
    }

    /// Returns the module path.
    #[must_use]
    pub const fn module_path(&self) -> &ModulePath {
        &self.module_path
    }

    /// Returns the unresolved configuration.
    #[must_use]
    pub const fn raw_config(&self) -> &RawConfig {
        &self.raw_config
    }

    /// Returns the dependencies declared by the author.
    #[must_use]
    pub const fn explicit_depends_on(&self) -> &BTreeSet<String> {
        &self.explicit_depends_on
    }

    /// Returns the provider key for resources and data sources.
    #[must_use]
    pub fn provider_ref(&self) -> Option<&str> {
        self.provider_ref.as_deref()
    }

    /// Returns true for orphaned resources.
    #[must_use]
    pub const fn is_orphan(&self) -> bool {
        self.orphaned
    }
}

impl fmt::Display for NodeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Resource => "resource",
            Self::DataSource => "data source",
            Self::Provider => "provider",
            Self::Variable => "variable",
            Self::Output => "output",
            Self::ModuleCall => "module",
        };
        write!(f, "{s}")
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.kind)
    }
}

/// Returns the provider key implied by a resource type (`aws_instance` -> `aws`).
#[must_use]
pub fn default_provider(resource_type: &str) -> String {
    resource_type
        .split_once('_')
        .map_or(resource_type, |(prefix, _)| prefix)
        .to_string()
}

/// Builds a provider key from a type and optional alias.
#[must_use]
pub fn provider_key(provider_type: &str, alias: Option<&str>) -> String {
    alias.map_or_else(|| provider_type.to_string(), |a| format!("{provider_type}.{a}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stable_names_include_module_path() {
        let path = ModulePath::new(["network", "vpc"]);
        let node = Node::resource("aws_subnet", "main", path.clone(), json!({}));
        assert_eq!(node.name(), "module.network.module.vpc.aws_subnet.main");

        let data = Node::data_source("aws_ami", "ubuntu", ModulePath::root(), json!({}));
        assert_eq!(data.name(), "data.aws_ami.ubuntu");

        let provider = Node::provider("aws", Some("west"), path, json!({}));
        assert_eq!(provider.name(), "module.network.module.vpc.provider.aws.west");
    }

    #[test]
    fn test_same_local_name_in_different_modules() {
        let a = Node::variable("region", ModulePath::root(), json!({}));
        let b = Node::variable("region", ModulePath::new(["child"]), json!({}));
        assert_ne!(a.name(), b.name());
        assert_eq!(a.local_name(), b.local_name());
    }

    #[test]
    fn test_default_provider() {
        assert_eq!(default_provider("aws_instance"), "aws");
        assert_eq!(default_provider("null_resource"), "null");
        assert_eq!(default_provider("standalone"), "standalone");

        let node = Node::resource("aws_instance", "web", ModulePath::root(), json!({}));
        assert_eq!(node.provider_ref(), Some("aws"));
        let node = node.with_provider("aws.west");
        assert_eq!(node.provider_ref(), Some("aws.west"));
    }

    #[test]
    fn test_scopes_walk_up_to_root() {
        let path = ModulePath::new(["a", "b"]);
        let scopes: Vec<String> = path.scopes().iter().map(ModulePath::prefix).collect();
        assert_eq!(scopes, vec!["module.a.module.b.", "module.a.", ""]);
        assert_eq!(path.parent(), Some(ModulePath::new(["a"])));
        assert_eq!(ModulePath::root().parent(), None);
    }

    #[test]
    fn test_orphan_only_applies_to_resources() {
        let res = Node::resource("aws_instance", "old", ModulePath::root(), json!({"ami": "x"}))
            .into_orphan();
        assert!(res.is_orphan());
        assert_eq!(res.raw_config(), &Value::Null);

        let var = Node::variable("x", ModulePath::root(), json!({})).into_orphan();
        assert!(!var.is_orphan());
    }
}
