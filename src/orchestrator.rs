//! Plan/apply orchestration.
//!
//! One cycle loads nothing but what it is given: the configured node set,
//! the provider implementations and the state store. It adds orphaned
//! resources from state, builds and validates the graph, and walks it with
//! a [`NodeExecutor`] in plan or apply mode.

use serde_json::Value;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::ConfigHasher;
use crate::error::{Result, WalkError};
use crate::graph::{Graph, Node, WalkOptions, walk};
use crate::planner::{ActionCounts, Mode, NodeExecutor, Plan, PlanEntry};
use crate::provider::ProviderSet;
use crate::state::StateStore;

/// Drives plan and apply cycles.
pub struct Orchestrator {
    providers: ProviderSet,
    state: Arc<dyn StateStore>,
    options: WalkOptions,
    variables: HashMap<String, Value>,
    cancel: CancellationToken,
    hasher: ConfigHasher,
}

/// Outcome of an apply cycle.
#[derive(Debug)]
pub struct ApplyReport {
    /// Hash of the applied configuration.
    pub config_hash: String,
    /// Every visited resource with its action and final phase.
    pub entries: Vec<PlanEntry>,
    /// Root-module outputs that could be evaluated.
    pub outputs: BTreeMap<String, Value>,
    /// Composite error if any node failed or the cycle was canceled.
    pub error: Option<WalkError>,
}

impl ApplyReport {
    /// Returns per-action counts of the visited resources.
    #[must_use]
    pub fn counts(&self) -> ActionCounts {
        ActionCounts::from_entries(&self.entries)
    }

    /// Returns true if every node completed.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// Converts a failed report into its composite error.
    ///
    /// # Errors
    ///
    /// Returns the walk error if the apply did not complete.
    pub fn into_result(self) -> Result<Self> {
        match self.error {
            Some(error) => Err(error.into()),
            None => Ok(Self { error: None, ..self }),
        }
    }
}

impl Orchestrator {
    /// Creates an orchestrator over a provider set and a state store.
    #[must_use]
    pub fn new(providers: ProviderSet, state: Arc<dyn StateStore>) -> Self {
        Self {
            providers,
            state,
            options: WalkOptions::default(),
            variables: HashMap::new(),
            cancel: CancellationToken::new(),
            hasher: ConfigHasher::new(),
        }
    }

    /// Sets the maximum number of concurrent node visits.
    #[must_use]
    pub const fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.options.parallelism = parallelism;
        self
    }

    /// Stops starting new nodes after the first failure.
    #[must_use]
    pub const fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.options.fail_fast = fail_fast;
        self
    }

    /// Sets root-module variable values by local name.
    #[must_use]
    pub fn with_variables(mut self, variables: HashMap<String, Value>) -> Self {
        self.variables = variables;
        self
    }

    /// Sets the token that cancels running cycles.
    #[must_use]
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Builds the graph for a cycle, including orphaned resources.
    ///
    /// # Errors
    ///
    /// Returns a state error if state cannot be listed, or a structural or
    /// configuration error if the graph is invalid.
    pub async fn graph(&self, nodes: Vec<Node>) -> Result<Graph> {
        let nodes = self.with_orphans(nodes).await?;
        Graph::build(nodes)
    }

    /// Computes a plan without mutating anything.
    ///
    /// # Errors
    ///
    /// Returns structural errors before any provider call, and the
    /// composite walk error if any node could not be planned.
    pub async fn plan(&self, nodes: Vec<Node>) -> Result<Plan> {
        let config_hash = self.hasher.hash_nodes(&nodes);
        let graph = Arc::new(self.graph(nodes).await?);
        info!("Planning {} nodes", graph.len());

        let executor = Arc::new(self.executor(Mode::Plan, &graph));
        walk(Arc::clone(&graph), Arc::clone(&executor), &self.options, &self.cancel).await?;

        let plan = Plan::new(config_hash, executor.entries());
        info!("Plan {}: {}", plan.id, plan.counts());
        Ok(plan)
    }

    /// Plans and applies every change.
    ///
    /// Node failures do not abort the cycle; they are collected in the
    /// report's composite error while independent nodes continue.
    ///
    /// # Errors
    ///
    /// Returns structural errors before any provider call.
    pub async fn apply(&self, nodes: Vec<Node>) -> Result<ApplyReport> {
        let config_hash = self.hasher.hash_nodes(&nodes);
        let graph = Arc::new(self.graph(nodes).await?);
        info!("Applying {} nodes", graph.len());

        let executor = Arc::new(self.executor(Mode::Apply, &graph));
        let error = walk(Arc::clone(&graph), Arc::clone(&executor), &self.options, &self.cancel)
            .await
            .err();

        let report = ApplyReport {
            config_hash,
            entries: executor.entries(),
            outputs: executor.outputs(),
            error,
        };

        match &report.error {
            None => info!("Apply complete: {}", report.counts()),
            Some(e) if e.is_canceled() => warn!("Apply canceled"),
            Some(e) => warn!("Apply finished with errors: {} failed nodes", e.failed_nodes().len()),
        }
        Ok(report)
    }

    fn executor(&self, mode: Mode, graph: &Arc<Graph>) -> NodeExecutor {
        NodeExecutor::new(
            mode,
            Arc::clone(graph),
            self.providers.clone(),
            Arc::clone(&self.state),
            self.variables.clone(),
        )
    }

    /// Adds a node for every resource in state that is no longer configured.
    ///
    /// Orphans are destroyed in reverse of their recorded dependency order:
    /// an orphan another orphan depended on waits for that dependent's delete.
    async fn with_orphans(&self, mut nodes: Vec<Node>) -> Result<Vec<Node>> {
        let configured: HashSet<String> = nodes.iter().map(|n| n.name().to_string()).collect();
        let mut orphans: Vec<(Node, Vec<String>)> = Vec::new();

        for name in self.state.list().await? {
            if configured.contains(&name) {
                continue;
            }
            let Some(record) = self.state.load(&name).await? else {
                continue;
            };

            let local = name
                .strip_prefix(&record.module_path.prefix())
                .and_then(|rest| rest.strip_prefix(&format!("{}.", record.resource_type)))
                .map(String::from);
            let Some(local) = local else {
                warn!("Ignoring state record with unexpected name: {name}");
                continue;
            };

            debug!("Found orphaned resource: {name}");
            let module_path = record.module_path.clone();
            let node = Node::resource(&record.resource_type, &local, module_path, Value::Null)
                .with_provider(record.provider_key())
                .into_orphan();
            orphans.push((node, record.dependencies));
        }

        let names: HashSet<String> = orphans.iter().map(|(n, _)| n.name().to_string()).collect();
        let mut waits: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (node, recorded) in &orphans {
            for dependency in recorded.iter().filter(|d| names.contains(*d)) {
                if waits_for(&waits, node.name(), dependency) {
                    let name = node.name();
                    warn!(
                        "Ignoring recorded dependency {name} -> {dependency}: it would form a cycle"
                    );
                    continue;
                }
                waits.entry(dependency.clone()).or_default().push(node.name().to_string());
            }
        }

        nodes.extend(orphans.into_iter().map(|(node, _)| {
            let after = waits.remove(node.name()).unwrap_or_default();
            node.with_depends_on(after)
        }));
        Ok(nodes)
    }
}

/// Returns true if `from` already waits, directly or transitively, for `to`.
fn waits_for(waits: &BTreeMap<String, Vec<String>>, from: &str, to: &str) -> bool {
    let mut stack = vec![from];
    let mut seen = HashSet::new();
    while let Some(current) = stack.pop() {
        if current == to {
            return true;
        }
        if seen.insert(current) {
            stack.extend(waits.get(current).into_iter().flatten().map(String::as_str));
        }
    }
    false
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("providers", &self.providers)
            .field("state", &self.state.backend_type())
            .field("options", &self.options)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{StructuralError, TerragraphError};
    use crate::graph::ModulePath;
    use crate::planner::{Action, Phase};
    use crate::provider::testing::FakeProvider;
    use crate::provider::{Attributes, Provider};
    use crate::state::{MemoryStateStore, ResourceState};
    use serde_json::json;
    use std::time::Duration;

    fn null_config(trigger: &str) -> Vec<Node> {
        vec![
            Node::provider("null", None, ModulePath::root(), json!({})),
            Node::resource(
                "null_resource",
                "first",
                ModulePath::root(),
                json!({"triggers": {"v": trigger}}),
            ),
            Node::resource(
                "null_resource",
                "second",
                ModulePath::root(),
                json!({"after": "${null_resource.first.id}"}),
            ),
            Node::output(
                "second",
                ModulePath::root(),
                json!({"value": "${null_resource.second.id}"}),
            ),
        ]
    }

    fn orchestrator(state: &Arc<MemoryStateStore>) -> Orchestrator {
        Orchestrator::new(ProviderSet::with_builtins(), Arc::clone(state) as Arc<dyn StateStore>)
    }

    #[tokio::test]
    async fn test_plan_apply_plan_cycle() {
        let state = Arc::new(MemoryStateStore::new());
        let orch = orchestrator(&state);

        let plan = orch.plan(null_config("1")).await.unwrap();
        assert_eq!(plan.counts().create, 2);
        assert_eq!(plan.config_hash.len(), 64);
        assert_eq!(state.write_count(), 0);

        let report = orch.apply(null_config("1")).await.unwrap().into_result().unwrap();
        assert_eq!(report.counts().create, 2);
        assert!(report.entries.iter().all(|e| e.phase == Phase::Done));
        let second = state.load("null_resource.second").await.unwrap().unwrap();
        assert_eq!(report.outputs["second"], json!(second.id));

        let plan = orch.plan(null_config("1")).await.unwrap();
        assert!(plan.is_empty(), "second plan should be empty: {plan}");
    }

    #[tokio::test]
    async fn test_trigger_change_replaces_and_propagates() {
        let state = Arc::new(MemoryStateStore::new());
        let orch = orchestrator(&state);
        orch.apply(null_config("1")).await.unwrap().into_result().unwrap();

        let plan = orch.plan(null_config("2")).await.unwrap();
        assert_eq!(plan.entry("null_resource.first").unwrap().action, Action::Replace);
        // The dependent's input is unknown until the replacement exists.
        assert_eq!(plan.entry("null_resource.second").unwrap().action, Action::Update);
    }

    #[tokio::test]
    async fn test_orphans_from_state_are_deleted() {
        let mut attributes = Attributes::new();
        attributes.insert(String::from("id"), json!("old-1"));
        let record = ResourceState::new(
            "old-1",
            "null_resource",
            "provider.null",
            ModulePath::root(),
            attributes,
        );
        let state = Arc::new(MemoryStateStore::with_resources([(
            String::from("null_resource.old"),
            record,
        )]));
        let orch = orchestrator(&state);

        let plan = orch.plan(null_config("1")).await.unwrap();
        assert_eq!(plan.entry("null_resource.old").unwrap().action, Action::Delete);

        let report = orch.apply(null_config("1")).await.unwrap();
        assert!(report.is_success());
        assert_eq!(report.counts().delete, 1);
        assert!(state.load("null_resource.old").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_orphan_in_removed_module() {
        let record = ResourceState::new(
            "old-1",
            "null_resource",
            "provider.null",
            ModulePath::new(["gone"]),
            Attributes::new(),
        );
        let state = Arc::new(MemoryStateStore::with_resources([(
            String::from("module.gone.null_resource.x"),
            record,
        )]));

        let graph = orchestrator(&state).graph(null_config("1")).await.unwrap();
        let orphan = graph.node("module.gone.null_resource.x").unwrap();
        assert!(orphan.is_orphan());
        assert_eq!(graph.provider_of(orphan.name()).unwrap().name(), "provider.null");
    }

    #[tokio::test]
    async fn test_orphans_are_destroyed_dependents_first() {
        let provider = Arc::new(FakeProvider::new());
        let state = Arc::new(MemoryStateStore::new());
        let orch = Orchestrator::new(
            ProviderSet::new().with("fake", Arc::clone(&provider) as Arc<dyn Provider>),
            Arc::clone(&state) as Arc<dyn StateStore>,
        )
        .with_parallelism(1);

        let fake = || Node::provider("fake", None, ModulePath::root(), json!({}));
        let nodes = vec![
            fake(),
            Node::resource("fake_net", "main", ModulePath::root(), json!({})),
            Node::resource(
                "fake_server",
                "web",
                ModulePath::root(),
                json!({"subnet": "${fake_net.main.id}"}),
            ),
            Node::resource(
                "fake_zone",
                "dns",
                ModulePath::root(),
                json!({"target": "${fake_server.web.id}"}),
            ),
        ];
        orch.apply(nodes).await.unwrap().into_result().unwrap();

        let dns = state.load("fake_zone.dns").await.unwrap().unwrap();
        assert_eq!(dns.dependencies, vec!["fake_net.main", "fake_server.web"]);

        let graph = orch.graph(vec![fake()]).await.unwrap();
        let waits: Vec<&str> =
            graph.dependencies("fake_net.main").into_iter().map(Node::name).collect();
        assert!(waits.contains(&"fake_server.web"));
        assert!(waits.contains(&"fake_zone.dns"));

        orch.apply(vec![fake()]).await.unwrap().into_result().unwrap();
        let deletes: Vec<String> = provider
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("apply delete"))
            .collect();
        assert_eq!(
            deletes,
            vec![
                "apply delete fake_zone.dns",
                "apply delete fake_server.web",
                "apply delete fake_net.main"
            ]
        );
        assert_eq!(state.write_count(), 6);
    }

    #[test]
    fn test_recorded_dependency_cycle_is_detected() {
        let waits = BTreeMap::from([
            (String::from("a"), vec![String::from("b")]),
            (String::from("b"), vec![String::from("c")]),
        ]);
        assert!(waits_for(&waits, "a", "c"));
        assert!(!waits_for(&waits, "c", "a"));
    }

    #[tokio::test]
    async fn test_structural_error_aborts_before_provider_calls() {
        let provider = Arc::new(FakeProvider::new());
        let state = Arc::new(MemoryStateStore::new());
        let orch = Orchestrator::new(
            ProviderSet::new().with("fake", Arc::clone(&provider) as Arc<dyn Provider>),
            Arc::clone(&state) as Arc<dyn StateStore>,
        );

        let nodes = vec![
            Node::provider("fake", None, ModulePath::root(), json!({})),
            Node::resource("fake_a", "x", ModulePath::root(), json!({"b": "${fake_b.y.id}"})),
            Node::resource("fake_b", "y", ModulePath::root(), json!({"a": "${fake_a.x.id}"})),
        ];

        let err = orch.apply(nodes).await.unwrap_err();
        assert!(matches!(err, TerragraphError::Structural(StructuralError::Cycle { .. })));
        assert!(provider.calls().is_empty());
        assert!(provider.configured.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_independent_work() {
        let provider = Arc::new(FakeProvider::new());
        provider.fail_on("fake_a.bad");
        let state = Arc::new(MemoryStateStore::new());
        let orch = Orchestrator::new(
            ProviderSet::new().with("fake", Arc::clone(&provider) as Arc<dyn Provider>),
            Arc::clone(&state) as Arc<dyn StateStore>,
        )
        .with_parallelism(1);

        let nodes = vec![
            Node::provider("fake", None, ModulePath::root(), json!({})),
            Node::resource("fake_a", "bad", ModulePath::root(), json!({})),
            Node::resource("fake_a", "child", ModulePath::root(), json!({"p": "${fake_a.bad.id}"})),
            Node::resource("fake_a", "good", ModulePath::root(), json!({})),
        ];

        let report = orch.apply(nodes.clone()).await.unwrap();
        let error = report.error.as_ref().unwrap();
        assert_eq!(error.failed_nodes(), vec!["fake_a.bad"]);
        assert_eq!(error.skipped_nodes(), vec!["fake_a.child"]);
        assert!(state.load("fake_a.good").await.unwrap().is_some());
        assert!(report.into_result().is_err());

        let provider = Arc::new(FakeProvider::new());
        provider.fail_on("fake_a.bad");
        let orch = Orchestrator::new(
            ProviderSet::new().with("fake", Arc::clone(&provider) as Arc<dyn Provider>),
            Arc::new(MemoryStateStore::new()) as Arc<dyn StateStore>,
        )
        .with_parallelism(1)
        .with_fail_fast(true);

        let report = orch.apply(nodes).await.unwrap();
        let error = report.error.unwrap();
        assert!(error.failures().iter().any(|f| f.node == "fake_a.good"));
        assert!(!provider.calls().iter().any(|c| c.ends_with("fake_a.good")));
    }

    #[tokio::test]
    async fn test_cancellation_interrupts_convergence() {
        let provider = Arc::new(FakeProvider::new().converging("fake_slow", usize::MAX));
        let cancel = CancellationToken::new();
        let state = Arc::new(MemoryStateStore::new());
        let orch = Orchestrator::new(
            ProviderSet::new().with("fake", Arc::clone(&provider) as Arc<dyn Provider>),
            Arc::clone(&state) as Arc<dyn StateStore>,
        )
        .with_cancellation(cancel.clone());

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(30)).await;
            trigger.cancel();
        });

        let nodes = vec![
            Node::provider("fake", None, ModulePath::root(), json!({})),
            Node::resource("fake_slow", "s", ModulePath::root(), json!({})),
        ];
        let report = orch.apply(nodes).await.unwrap();
        let error = report.error.unwrap();
        assert!(error.is_canceled());
        assert_eq!(state.write_count(), 0);
    }
}
