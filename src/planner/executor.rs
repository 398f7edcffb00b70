//! Per-node plan and apply logic.
//!
//! [`NodeExecutor`] is the visitor the orchestrator hands to the graph
//! walker. Every node kind publishes a value that later nodes interpolate:
//! variables their supplied value, providers and data sources their
//! configuration or read result, resources their observed attributes.
//!
//! Managed resources go through
//! `Unvisited -> Diffed -> {NoOp | Applying -> Converging -> Done} | Failed`.
//! State is written once per resource, after convergence.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConfigHasher;
use crate::error::{ApplyError, ConfigError, ConvergenceError, Result, TerragraphError};
use crate::graph::{Graph, Node, NodeKind, Visitor};
use crate::provider::{Attributes, Observation, Provider, ProviderSet};
use crate::state::{ResourceState, StateStore};

use super::diff::{Action, ChangeSet, UNKNOWN};
use super::plan::{Phase, PlanEntry};
use super::resolve::{Published, contains_unknown, resolve};

/// Whether a walk only plans or also applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Diff only; no mutation, no state writes.
    Plan,
    /// Diff, mutate, converge and commit.
    Apply,
}

/// Visitor that plans or applies one node at a time.
pub struct NodeExecutor {
    mode: Mode,
    graph: Arc<Graph>,
    providers: ProviderSet,
    state: Arc<dyn StateStore>,
    variables: HashMap<String, Value>,
    hasher: ConfigHasher,
    values: RwLock<HashMap<String, Published>>,
    entries: Mutex<HashMap<String, PlanEntry>>,
}

impl NodeExecutor {
    /// Creates an executor for one cycle over `graph`.
    ///
    /// `variables` holds root-module variable values by local name.
    #[must_use]
    pub fn new(
        mode: Mode,
        graph: Arc<Graph>,
        providers: ProviderSet,
        state: Arc<dyn StateStore>,
        variables: HashMap<String, Value>,
    ) -> Self {
        Self {
            mode,
            graph,
            providers,
            state,
            variables,
            hasher: ConfigHasher::new(),
            values: RwLock::new(HashMap::new()),
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Returns the resource entries recorded so far, in topological order.
    #[must_use]
    pub fn entries(&self) -> Vec<PlanEntry> {
        let Ok(entries) = self.entries.lock() else {
            return Vec::new();
        };
        self.graph
            .topological_order()
            .into_iter()
            .filter_map(|node| entries.get(node.name()).cloned())
            .collect()
    }

    /// Returns the value published by a node.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<Value> {
        self.values
            .read()
            .ok()
            .and_then(|values| values.get(name).map(|p| p.value.clone()))
    }

    /// Returns the values of root-module outputs by local name.
    #[must_use]
    pub fn outputs(&self) -> BTreeMap<String, Value> {
        self.graph
            .nodes()
            .iter()
            .filter(|n| n.kind() == NodeKind::Output && n.module_path().is_root())
            .filter_map(|n| self.value(n.name()).map(|v| (n.local_name().to_string(), v)))
            .collect()
    }

    fn publish(&self, name: &str, published: Published) -> Result<()> {
        self.values
            .write()
            .map_err(|_| TerragraphError::internal("value table lock poisoned"))?
            .insert(name.to_string(), published);
        Ok(())
    }

    fn resolve(&self, node: &Node) -> Result<Value> {
        let values = self
            .values
            .read()
            .map_err(|_| TerragraphError::internal("value table lock poisoned"))?;
        resolve(node, &self.graph, &values)
    }

    fn record(&self, node: &Node, changeset: &ChangeSet, phase: Phase) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.insert(
                node.name().to_string(),
                PlanEntry {
                    node: node.name().to_string(),
                    kind: node.kind(),
                    resource_type: node.type_name().map(String::from),
                    action: changeset.action,
                    changes: changeset.changes.clone(),
                    phase,
                },
            );
        }
    }

    fn set_phase(&self, name: &str, phase: Phase) {
        if let Ok(mut entries) = self.entries.lock()
            && let Some(entry) = entries.get_mut(name)
        {
            debug!("{name}: {} -> {phase}", entry.phase);
            entry.phase = phase;
        }
    }

    /// Managed resources `node` transitively waits for.
    fn resource_ancestors(&self, node: &Node) -> Vec<String> {
        self.graph
            .ancestors(node.name())
            .into_iter()
            .filter(|name| {
                self.graph
                    .node(name)
                    .is_some_and(|n| n.kind() == NodeKind::Resource && !n.is_orphan())
            })
            .collect()
    }

    fn provider_for(&self, node: &Node) -> Result<(&Node, Arc<dyn Provider>)> {
        let provider_node = self.graph.provider_of(node.name()).ok_or_else(|| {
            TerragraphError::internal(format!("{} has no resolved provider", node.name()))
        })?;
        Ok((provider_node, self.providers.for_node(provider_node)?))
    }

    fn variable(&self, node: &Node) -> Result<()> {
        let supplied = match node.module_path().parent() {
            None => self.variables.get(node.local_name()).cloned(),
            Some(parent) => {
                let call = node
                    .module_path()
                    .segments()
                    .last()
                    .map(|m| parent.qualify(&format!("module.{m}")))
                    .unwrap_or_default();
                self.value(&call)
                    .and_then(|inputs| inputs.get(node.local_name()).cloned())
            }
        };

        let value = supplied
            .or_else(|| node.raw_config().get("default").cloned())
            .ok_or_else(|| ConfigError::MissingVariable {
                name: node.name().to_string(),
            })?;

        self.publish(node.name(), Published::known(value))
    }

    fn output(&self, node: &Node) -> Result<()> {
        let resolved = self.resolve(node)?;
        let value = resolved.get("value").cloned().unwrap_or(Value::Null);
        self.publish(node.name(), Published::known(value))
    }

    fn module_call(&self, node: &Node) -> Result<()> {
        let inputs = self.resolve(node)?;
        self.publish(node.name(), Published::known(inputs))
    }

    async fn provider(&self, node: &Node) -> Result<()> {
        let config = attributes_of(node, self.resolve(node)?)?;
        let provider = self.providers.for_node(node)?;

        debug!("Configuring {} ({})", node.name(), provider.name());
        provider.configure(&config).await?;
        self.publish(node.name(), Published::known(Value::Object(config.into_iter().collect())))
    }

    async fn data_source(&self, node: &Node) -> Result<()> {
        let config = attributes_of(node, self.resolve(node)?)?;
        let data_type = node.type_name().unwrap_or_default();

        if config.values().any(contains_unknown) {
            debug!("{} depends on values known after apply, deferring read", node.name());
            return self.publish(node.name(), Published::partial(to_object(config)));
        }

        let (_, provider) = self.provider_for(node)?;
        let attributes = provider.read(data_type, &config).await?;
        self.publish(node.name(), Published::known(to_object(attributes)))
    }

    async fn resource(&self, node: &Node, cancel: &CancellationToken) -> Result<()> {
        let resource_type = node.type_name().unwrap_or_default();
        let desired = if node.is_orphan() {
            None
        } else {
            Some(attributes_of(node, self.resolve(node)?)?)
        };
        let prior = self.state.load(node.name()).await?;
        let (provider_node, provider) = self.provider_for(node)?;

        let changeset = provider.diff(node.name(), resource_type, desired.as_ref(), prior.as_ref());
        self.record(node, &changeset, Phase::Diffed);

        if changeset.is_noop() {
            debug!("{}: no changes", node.name());
            self.set_phase(node.name(), Phase::NoOp);
            let observed = prior.map(|p| to_object(p.attributes)).unwrap_or(Value::Null);
            return self.publish(node.name(), Published::known(observed));
        }

        if self.mode == Mode::Plan {
            info!("{}: {} planned", node.name(), changeset.action);
            return self.publish(node.name(), planned_value(&changeset));
        }

        let action = changeset.action;
        info!("{}: {action}", node.name());
        match self
            .converge(node, provider_node, provider.as_ref(), &changeset, cancel)
            .await
        {
            Ok(()) => {
                self.set_phase(node.name(), Phase::Done);
                info!("{}: {action} complete", node.name());
                Ok(())
            }
            Err(e) => {
                self.set_phase(node.name(), Phase::Failed);
                warn!("{}: {action} failed: {e}", node.name());
                Err(ApplyError::new(node.name(), action, e).into())
            }
        }
    }

    async fn converge(
        &self,
        node: &Node,
        provider_node: &Node,
        provider: &dyn Provider,
        changeset: &ChangeSet,
        cancel: &CancellationToken,
    ) -> Result<()> {
        if cancel.is_cancelled() {
            return Err(ConvergenceError::Canceled { last_status: None }.into());
        }

        let observation = match changeset.action {
            Action::NoOp => return Ok(()),
            Action::Delete => {
                self.delete(node, provider, changeset, cancel).await?;
                None
            }
            Action::Create | Action::Update => {
                Some(self.mutate(node, provider, changeset, cancel).await?)
            }
            Action::Replace => {
                self.delete(node, provider, &changeset.deletion(), cancel).await?;
                match self.mutate(node, provider, &changeset.creation(), cancel).await {
                    Ok(observation) => Some(observation),
                    Err(e) => {
                        // The old object is gone; its record must go with it.
                        self.state.remove(node.name()).await?;
                        return Err(e);
                    }
                }
            }
        };

        match observation {
            None => {
                self.state.remove(node.name()).await?;
                self.publish(node.name(), Published::known(Value::Null))
            }
            Some(observation) => {
                let record = ResourceState::new(
                    observation.id,
                    changeset.resource_type.clone(),
                    provider_node.name(),
                    node.module_path().clone(),
                    observation.attributes,
                )
                .with_status(observation.status)
                .with_config_hash(self.hasher.hash_attributes(&changeset.desired))
                .with_dependencies(self.resource_ancestors(node));

                self.state.save(node.name(), &record).await?;
                self.publish(node.name(), Published::known(to_object(record.attributes)))
            }
        }
    }

    async fn delete(
        &self,
        node: &Node,
        provider: &dyn Provider,
        changeset: &ChangeSet,
        cancel: &CancellationToken,
    ) -> Result<()> {
        self.set_phase(node.name(), Phase::Applying);
        provider.apply(changeset).await?;

        let resource_type = changeset.resource_type.as_str();
        let spec = provider.convergence(resource_type, Action::Delete);
        if let (Some(spec), Some(id)) = (spec, &changeset.id) {
            self.set_phase(node.name(), Phase::Converging);
            let id = id.as_str();
            spec.for_deletion()
                .with_cancellation(cancel.clone())
                .wait(|| async move { status_of(provider, resource_type, id).await })
                .await?;
        }
        Ok(())
    }

    async fn mutate(
        &self,
        node: &Node,
        provider: &dyn Provider,
        changeset: &ChangeSet,
        cancel: &CancellationToken,
    ) -> Result<Observation> {
        self.set_phase(node.name(), Phase::Applying);
        let observation = provider.apply(changeset).await?.ok_or_else(|| {
            TerragraphError::internal(format!(
                "provider {} returned no object for {} of {}",
                provider.name(),
                changeset.action,
                node.name()
            ))
        })?;

        let resource_type = changeset.resource_type.as_str();
        let Some(spec) = provider.convergence(resource_type, changeset.action) else {
            return Ok(observation);
        };

        self.set_phase(node.name(), Phase::Converging);
        let id = observation.id.as_str();
        let status = spec
            .with_cancellation(cancel.clone())
            .wait(|| async move { status_of(provider, resource_type, id).await })
            .await?;
        debug!("{} converged to '{status}'", node.name());

        // Attributes populated during convergence are only visible now.
        provider.refresh(resource_type, id).await
    }
}

#[async_trait]
impl Visitor for NodeExecutor {
    async fn visit(&self, node: &Node, cancel: &CancellationToken) -> Result<()> {
        let (action, result) = match node.kind() {
            NodeKind::Resource => ("plan", self.resource(node, cancel).await),
            NodeKind::Variable => ("evaluate", self.variable(node)),
            NodeKind::Output => ("evaluate", self.output(node)),
            NodeKind::ModuleCall => ("evaluate", self.module_call(node)),
            NodeKind::Provider => ("configure", self.provider(node).await),
            NodeKind::DataSource => ("read", self.data_source(node).await),
        };

        result.map_err(|e| match e {
            TerragraphError::Apply(_) => e,
            other => ApplyError::new(node.name(), action, other).into(),
        })
    }
}

impl std::fmt::Debug for NodeExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeExecutor")
            .field("mode", &self.mode)
            .field("nodes", &self.graph.len())
            .field("providers", &self.providers)
            .field("state", &self.state.backend_type())
            .finish_non_exhaustive()
    }
}

async fn status_of(provider: &dyn Provider, resource_type: &str, id: &str) -> Result<String> {
    let observation = provider.refresh(resource_type, id).await?;
    Ok(observation.status.unwrap_or_default())
}

/// Converts a resolved configuration into an attribute map.
fn attributes_of(node: &Node, resolved: Value) -> Result<Attributes> {
    match resolved {
        Value::Null => Ok(Attributes::new()),
        Value::Object(map) => Ok(map.into_iter().collect()),
        other => Err(ConfigError::validation(
            format!("configuration of {} must be a map, got {other}", node.name()),
            node.name(),
        )
        .into()),
    }
}

fn to_object(attributes: Attributes) -> Value {
    Value::Object(attributes.into_iter().collect())
}

/// What dependents of a planned change see during a plan.
fn planned_value(changeset: &ChangeSet) -> Published {
    let mut attributes = match changeset.action {
        Action::Update => changeset.prior.clone().unwrap_or_default(),
        _ => Attributes::new(),
    };
    attributes.extend(changeset.desired.clone());
    if changeset.action != Action::Update {
        attributes.insert(String::from("id"), Value::String(UNKNOWN.to_string()));
    }
    Published::partial(to_object(attributes))
}
