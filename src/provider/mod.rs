//! Provider capability and registry.
//!
//! A provider knows how to create, update, delete and observe the remote
//! objects of the resource types it manages. The orchestrator never talks
//! to a remote service directly; it goes through a [`Provider`] looked up
//! in a [`ProviderSet`].

mod null;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use crate::error::{ProviderError, Result};
use crate::graph::Node;
use crate::planner::{Action, ChangeSet, DiffEngine};
use crate::poller::WaitSpec;
use crate::state::ResourceState;

pub use null::NullProvider;

/// Attribute map of a resource, data source or provider configuration.
pub type Attributes = BTreeMap<String, Value>;

/// How a provider waits for a resource type to settle after a mutation.
pub type ConvergenceSpec = WaitSpec;

/// What a provider observed about a remote object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    /// Remote identifier.
    pub id: String,
    /// Observed attributes.
    pub attributes: Attributes,
    /// Remote status, for types with asynchronous convergence.
    pub status: Option<String>,
}

impl Observation {
    /// Creates an observation without a status.
    #[must_use]
    pub fn new(id: impl Into<String>, attributes: Attributes) -> Self {
        Self {
            id: id.into(),
            attributes,
            status: None,
        }
    }

    /// Sets the remote status.
    #[must_use]
    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

/// Capability interface of an infrastructure provider.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Returns the provider type name, e.g. `aws`.
    fn name(&self) -> &str;

    /// Configures the provider with resolved provider-node attributes.
    async fn configure(&self, config: &Attributes) -> Result<()>;

    /// Attribute keys of `resource_type` that cannot change in place.
    fn force_new(&self, _resource_type: &str) -> Vec<String> {
        Vec::new()
    }

    /// Computes the change set between desired attributes and recorded state.
    fn diff(
        &self,
        node: &str,
        resource_type: &str,
        desired: Option<&Attributes>,
        prior: Option<&ResourceState>,
    ) -> ChangeSet {
        DiffEngine::new()
            .with_force_new(self.force_new(resource_type))
            .diff(node, resource_type, desired, prior)
    }

    /// Performs the mutation described by `changeset`.
    ///
    /// Returns the observation of the resulting object, or `None` after a
    /// deletion.
    async fn apply(&self, changeset: &ChangeSet) -> Result<Option<Observation>>;

    /// Observes an existing object.
    ///
    /// Returns [`ProviderError::NotFound`] if the object does not exist.
    async fn refresh(&self, resource_type: &str, id: &str) -> Result<Observation>;

    /// Reads a data source.
    async fn read(&self, data_type: &str, config: &Attributes) -> Result<Attributes>;

    /// Returns how to wait for `resource_type` after `action`, if the remote
    /// service converges asynchronously.
    fn convergence(&self, _resource_type: &str, _action: Action) -> Option<ConvergenceSpec> {
        None
    }
}

/// Provider implementations available to a planning cycle.
///
/// Lookup tries the provider node's stable name first (for per-alias
/// instances), then its provider type.
#[derive(Clone, Default)]
pub struct ProviderSet {
    providers: HashMap<String, Arc<dyn Provider>>,
}

impl ProviderSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a set with the built-in providers registered.
    #[must_use]
    pub fn with_builtins() -> Self {
        Self::new().with("null", Arc::new(NullProvider::new()))
    }

    /// Registers a provider under a provider type or provider node name.
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, provider: Arc<dyn Provider>) -> Self {
        self.register(key, provider);
        self
    }

    /// Registers a provider under a provider type or provider node name.
    pub fn register(&mut self, key: impl Into<String>, provider: Arc<dyn Provider>) {
        self.providers.insert(key.into(), provider);
    }

    /// Looks up the implementation for a provider node.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::NotRegistered`] if nothing is registered for
    /// the node's name or type.
    pub fn for_node(&self, provider_node: &Node) -> Result<Arc<dyn Provider>> {
        self.providers
            .get(provider_node.name())
            .or_else(|| provider_node.type_name().and_then(|t| self.providers.get(t)))
            .cloned()
            .ok_or_else(|| {
                ProviderError::NotRegistered {
                    provider: provider_node.name().to_string(),
                }
                .into()
            })
    }

    /// Returns the registered keys, sorted.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.providers.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }
}

impl std::fmt::Debug for ProviderSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderSet").field("providers", &self.keys()).finish()
    }
}
