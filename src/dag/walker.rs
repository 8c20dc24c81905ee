use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use futures::future::BoxFuture;
use petgraph::graph::NodeIndex;
use tokio::sync::{mpsc, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::builder::ChangeGraph;
use crate::error::EngineError;

/// Status of a node during a walk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeStatus {
    Pending,
    Running,
    Succeeded,
    Failed(String),
    /// Not dispatched because an upstream node failed; holds that node's id.
    Blocked(String),
}

/// Result of one node.
#[derive(Debug)]
pub struct NodeResult {
    pub node_index: NodeIndex,
    pub id: String,
    pub status: NodeStatus,
    pub error: Option<EngineError>,
}

enum WalkerMessage {
    NodeCompleted(NodeResult),
}

/// Work to run for one node.
pub type NodeExecutor =
    Box<dyn Fn(NodeIndex, String) -> BoxFuture<'static, Result<(), EngineError>> + Send + Sync>;

/// Called for each node that is not dispatched because of a failure upstream;
/// receives the blocked id and the failed upstream id.
pub type BlockedHandler = Box<dyn Fn(String, String) -> BoxFuture<'static, ()> + Send + Sync>;

/// Event-driven walker: a node is spawned as soon as all of its dependencies
/// have succeeded, with at most `max_parallelism` running at once.
pub struct DagWalker {
    max_parallelism: usize,
}

impl DagWalker {
    pub fn new(max_parallelism: usize) -> Self {
        Self {
            max_parallelism: max_parallelism.max(1),
        }
    }

    /// Walk the graph. Returns one result per node, or fewer if `cancel`
    /// fires first. Running nodes are cancelled if this future is dropped.
    pub async fn walk(
        &self,
        graph: &ChangeGraph,
        executor: Arc<NodeExecutor>,
        on_blocked: BlockedHandler,
        cancel: CancellationToken,
    ) -> Vec<NodeResult> {
        let node_count = graph.node_count();
        if node_count == 0 {
            return Vec::new();
        }

        let cancel = cancel.child_token();
        let _cancel_on_drop = cancel.clone().drop_guard();

        let semaphore = Arc::new(Semaphore::new(self.max_parallelism));
        let statuses: Arc<DashMap<NodeIndex, NodeStatus>> = Arc::new(DashMap::new());
        let start_times: Arc<DashMap<NodeIndex, Instant>> = Arc::new(DashMap::new());
        let (tx, mut rx) = mpsc::channel::<WalkerMessage>(node_count);

        let mut in_degree: HashMap<NodeIndex, usize> = HashMap::new();
        let mut dependents: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();
        let mut dependencies: HashMap<NodeIndex, Vec<NodeIndex>> = HashMap::new();

        for idx in graph.node_indices() {
            in_degree.insert(idx, 0);
            dependents.insert(idx, Vec::new());
            dependencies.insert(idx, Vec::new());
            statuses.insert(idx, NodeStatus::Pending);
        }

        for edge in graph.edge_indices() {
            if let Some((from, to)) = graph.edge_endpoints(edge) {
                *in_degree.entry(to).or_insert(0) += 1;
                dependents.entry(from).or_default().push(to);
                dependencies.entry(to).or_default().push(from);
            }
        }

        // Node indices follow step order, so dispatch keeps that order too.
        let mut ready: Vec<NodeIndex> = in_degree
            .iter()
            .filter(|(_, &deg)| deg == 0)
            .map(|(&idx, _)| idx)
            .collect();
        ready.sort();

        for &idx in &ready {
            spawn_node(idx, graph, &executor, &semaphore, &statuses, &start_times, &tx, &cancel);
        }

        let mut completed_count = 0;
        let mut results: Vec<NodeResult> = Vec::with_capacity(node_count);

        while completed_count < node_count {
            let msg = tokio::select! {
                msg = rx.recv() => msg,
                _ = cancel.cancelled() => {
                    debug!(completed = completed_count, total = node_count, "Walk cancelled");
                    break;
                }
            };
            let Some(WalkerMessage::NodeCompleted(result)) = msg else {
                break;
            };

            let node_idx = result.node_index;
            let succeeded = result.status == NodeStatus::Succeeded;
            let elapsed_ms = start_times
                .remove(&node_idx)
                .map(|(_, t)| t.elapsed().as_millis())
                .unwrap_or(0);

            statuses.insert(node_idx, result.status.clone());
            completed_count += 1;

            debug!(
                id = %result.id,
                status = ?result.status,
                elapsed_ms = elapsed_ms as u64,
                progress = format!("{}/{}", completed_count, node_count),
                "Node completed"
            );

            if succeeded {
                if let Some(deps) = dependents.get(&node_idx) {
                    for &dependent_idx in deps {
                        let all_deps_met = dependencies
                            .get(&dependent_idx)
                            .map(|dep_list| {
                                dep_list.iter().all(|dep_idx| {
                                    statuses
                                        .get(dep_idx)
                                        .map(|s| *s == NodeStatus::Succeeded)
                                        .unwrap_or(false)
                                })
                            })
                            .unwrap_or(true);

                        if all_deps_met {
                            spawn_node(
                                dependent_idx,
                                graph,
                                &executor,
                                &semaphore,
                                &statuses,
                                &start_times,
                                &tx,
                                &cancel,
                            );
                        }
                    }
                }
            } else {
                let mut blocked = collect_transitive_dependents(node_idx, &dependents);
                blocked.sort();
                for blocked_idx in blocked {
                    let still_pending = statuses
                        .get(&blocked_idx)
                        .map(|s| *s == NodeStatus::Pending)
                        .unwrap_or(false);
                    if !still_pending {
                        continue;
                    }
                    let blocked_id = graph[blocked_idx].clone();
                    let status = NodeStatus::Blocked(result.id.clone());
                    statuses.insert(blocked_idx, status.clone());
                    completed_count += 1;

                    on_blocked(blocked_id.clone(), result.id.clone()).await;

                    results.push(NodeResult {
                        node_index: blocked_idx,
                        id: blocked_id,
                        status,
                        error: None,
                    });
                }
            }

            results.push(result);
        }

        results
    }
}

/// Spawn execution of a single node.
#[allow(clippy::too_many_arguments)]
fn spawn_node(
    idx: NodeIndex,
    graph: &ChangeGraph,
    executor: &Arc<NodeExecutor>,
    semaphore: &Arc<Semaphore>,
    statuses: &Arc<DashMap<NodeIndex, NodeStatus>>,
    start_times: &Arc<DashMap<NodeIndex, Instant>>,
    tx: &mpsc::Sender<WalkerMessage>,
    cancel: &CancellationToken,
) {
    let id = graph[idx].clone();
    let executor = Arc::clone(executor);
    let semaphore = Arc::clone(semaphore);
    let tx = tx.clone();
    let cancel = cancel.clone();

    statuses.insert(idx, NodeStatus::Running);
    start_times.insert(idx, Instant::now());

    tokio::spawn(async move {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => Err(EngineError::Interrupted),
            outcome = async {
                match semaphore.acquire().await {
                    Ok(_permit) => executor(idx, id.clone()).await,
                    Err(e) => Err(EngineError::execution(id.clone(), e.into())),
                }
            } => outcome,
        };

        let node_result = match outcome {
            Ok(()) => NodeResult {
                node_index: idx,
                id,
                status: NodeStatus::Succeeded,
                error: None,
            },
            Err(e) => NodeResult {
                node_index: idx,
                id,
                status: NodeStatus::Failed(e.to_string()),
                error: Some(e),
            },
        };

        let _ = tx.send(WalkerMessage::NodeCompleted(node_result)).await;
    });
}

/// Collect all transitive dependents of a node.
fn collect_transitive_dependents(
    start: NodeIndex,
    dependents: &HashMap<NodeIndex, Vec<NodeIndex>>,
) -> Vec<NodeIndex> {
    let mut visited = HashSet::new();
    let mut stack = vec![start];

    while let Some(node) = stack.pop() {
        if let Some(deps) = dependents.get(&node) {
            for &dep in deps {
                if visited.insert(dep) {
                    stack.push(dep);
                }
            }
        }
    }

    visited.into_iter().collect()
}
