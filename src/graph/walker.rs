//! Concurrent, dependency-ordered graph walker.
//!
//! The walker runs a [`Visitor`] against every node exactly once. A node is
//! scheduled only after all of its dependencies completed successfully, and
//! at most `parallelism` visits run at the same time on spawned tokio tasks.
//!
//! All scheduling bookkeeping (remaining dependency counts, the ready set and
//! per-node outcomes) lives in the single coordinator loop of [`walk`], which
//! is fed by task completions. Visits never touch it, so no lock is held
//! while a visit waits on a remote service.

use async_trait::async_trait;
use futures::FutureExt;
use std::collections::{BTreeSet, HashMap};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{FailureReason, NodeFailure, Result, TerragraphError, WalkError};

use super::builder::Graph;
use super::node::Node;

/// Default number of concurrent visits.
pub const DEFAULT_PARALLELISM: usize = 10;

/// Per-node callback executed by the walker.
#[async_trait]
pub trait Visitor: Send + Sync + 'static {
    /// Visits one node. `cancel` fires when the walk is canceled; long
    /// running visits should return promptly once it does.
    async fn visit(&self, node: &Node, cancel: &CancellationToken) -> Result<()>;
}

/// Options controlling a walk.
#[derive(Debug, Clone)]
pub struct WalkOptions {
    /// Maximum number of concurrently executing visits.
    pub parallelism: usize,
    /// Stop starting new visits after the first failure.
    pub fail_fast: bool,
}

/// Successful outcome of a walk.
#[derive(Debug, Clone, Default)]
pub struct WalkReport {
    /// Nodes in the order their visits completed.
    pub completed: Vec<String>,
}

#[derive(Debug)]
enum Outcome {
    Pending,
    Running,
    Done,
    Failed,
    Skipped(usize),
}

impl Default for WalkOptions {
    fn default() -> Self {
        Self {
            parallelism: DEFAULT_PARALLELISM,
            fail_fast: false,
        }
    }
}

impl WalkOptions {
    /// Creates options with the given parallelism.
    #[must_use]
    pub const fn new(parallelism: usize) -> Self {
        Self {
            parallelism,
            fail_fast: false,
        }
    }

    /// Sets fail-fast mode.
    #[must_use]
    pub const fn with_fail_fast(mut self, fail_fast: bool) -> Self {
        self.fail_fast = fail_fast;
        self
    }
}

/// Walks `graph`, visiting every node in dependency order.
///
/// # Errors
///
/// Returns [`WalkError::Failed`] listing every failed, skipped and
/// never-started node if any visit fails, or [`WalkError::Canceled`] if
/// `cancel` fired before the walk finished.
pub async fn walk<V: Visitor>(
    graph: Arc<Graph>,
    visitor: Arc<V>,
    options: &WalkOptions,
    cancel: &CancellationToken,
) -> std::result::Result<WalkReport, WalkError> {
    let parallelism = options.parallelism.max(1);
    let total = graph.len();
    info!("Walking {total} nodes (parallelism {parallelism})");

    let visit_token = cancel.child_token();
    let mut remaining: Vec<usize> = (0..total).map(|i| graph.dependency_indices(i).len()).collect();
    let mut ready: BTreeSet<usize> = (0..total).filter(|&i| remaining[i] == 0).collect();
    let mut outcomes: Vec<Outcome> = (0..total).map(|_| Outcome::Pending).collect();
    let mut errors: Vec<Option<TerragraphError>> = (0..total).map(|_| None).collect();
    let mut report = WalkReport::default();
    let mut tasks: JoinSet<(usize, Result<()>)> = JoinSet::new();
    let mut running: HashMap<Id, usize> = HashMap::new();
    let mut stopped = false;
    let mut canceled = false;

    loop {
        if cancel.is_cancelled() && !canceled {
            warn!("Walk canceled, no new nodes will start");
            canceled = true;
            stopped = true;
        }

        while !stopped && tasks.len() < parallelism {
            let Some(i) = ready.pop_first() else { break };
            outcomes[i] = Outcome::Running;
            debug!("Starting visit: {}", graph.nodes()[i].name());
            let id = spawn_visit(
                &mut tasks,
                Arc::clone(&graph),
                Arc::clone(&visitor),
                i,
                visit_token.clone(),
            );
            running.insert(id, i);
        }

        if tasks.is_empty() {
            break;
        }

        let joined = tokio::select! {
            biased;
            () = cancel.cancelled(), if !canceled => continue,
            joined = tasks.join_next_with_id() => joined,
        };

        let Some(joined) = joined else { break };
        let (i, result) = match joined {
            Ok((id, pair)) => {
                running.remove(&id);
                pair
            }
            Err(e) => match abnormal_exit(&mut running, &e) {
                Some(pair) => pair,
                None => {
                    error!("Untracked visit task ended abnormally: {e}");
                    continue;
                }
            },
        };

        let name = graph.nodes()[i].name();
        match result {
            Ok(()) => {
                debug!("Completed visit: {name}");
                outcomes[i] = Outcome::Done;
                report.completed.push(name.to_string());
                for &d in graph.dependent_indices(i) {
                    remaining[d] -= 1;
                    if remaining[d] == 0 && matches!(outcomes[d], Outcome::Pending) {
                        ready.insert(d);
                    }
                }
            }
            Err(err) => {
                warn!("Visit failed: {name}: {err}");
                outcomes[i] = Outcome::Failed;
                errors[i] = Some(err);
                for d in graph.descendant_indices(i) {
                    if matches!(outcomes[d], Outcome::Pending) {
                        outcomes[d] = Outcome::Skipped(i);
                        ready.remove(&d);
                    }
                }
                if options.fail_fast && !stopped {
                    warn!("Fail-fast: no new nodes will start");
                    stopped = true;
                }
            }
        }
    }

    visit_token.cancel();
    collect(&graph, outcomes, errors, report, canceled)
}

fn spawn_visit<V: Visitor>(
    tasks: &mut JoinSet<(usize, Result<()>)>,
    graph: Arc<Graph>,
    visitor: Arc<V>,
    i: usize,
    token: CancellationToken,
) -> Id {
    let handle = tasks.spawn(async move {
        let node = &graph.nodes()[i];
        let result = AssertUnwindSafe(visitor.visit(node, &token))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| {
                let message = panic
                    .downcast_ref::<&str>()
                    .map(ToString::to_string)
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| String::from("unknown panic"));
                Err(TerragraphError::internal(format!("visit panicked: {message}")))
            });
        (i, result)
    });
    handle.id()
}

/// Maps a task that was aborted or escaped `catch_unwind` back to its node,
/// turning the join error into that node's failure.
fn abnormal_exit(running: &mut HashMap<Id, usize>, err: &JoinError) -> Option<(usize, Result<()>)> {
    let i = running.remove(&err.id())?;
    Some((
        i,
        Err(TerragraphError::internal(format!("visit task ended abnormally: {err}"))),
    ))
}

fn collect(
    graph: &Graph,
    outcomes: Vec<Outcome>,
    mut errors: Vec<Option<TerragraphError>>,
    report: WalkReport,
    canceled: bool,
) -> std::result::Result<WalkReport, WalkError> {
    let mut failures = Vec::new();

    for (i, outcome) in outcomes.into_iter().enumerate() {
        let node = graph.nodes()[i].name().to_string();
        let reason = match outcome {
            Outcome::Done => continue,
            Outcome::Failed => match errors[i].take() {
                Some(err) => FailureReason::Error(err),
                None => FailureReason::NotStarted,
            },
            Outcome::Skipped(ancestor) => FailureReason::SkippedAncestor {
                ancestor: graph.nodes()[ancestor].name().to_string(),
            },
            Outcome::Pending | Outcome::Running => FailureReason::NotStarted,
        };
        failures.push(NodeFailure { node, reason });
    }

    if canceled {
        info!("Walk canceled after {} completed nodes", report.completed.len());
        return Err(WalkError::Canceled { failures });
    }
    if failures.is_empty() {
        info!("Walk completed: {} nodes", report.completed.len());
        return Ok(report);
    }
    Err(WalkError::Failed { failures })
}
