use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use anyhow::anyhow;
use dashmap::DashMap;
use petgraph::graph::NodeIndex;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::message::Message;
use crate::config::EngineSettings;
use crate::dag::walker::{BlockedHandler, DagWalker, NodeExecutor, NodeStatus};
use crate::dag::build_change_dag;
use crate::error::EngineError;
use crate::graph::{GraphHandle, ResourceStatus};
use crate::models::{Resource, Spec, State};
use crate::planner::{ActionType, ChangeOrder, ChangeStep};
use crate::runtime::{ApplyRequest, DeleteRequest, RuntimeRegistry};

/// What an apply pass produced: the state to record and the aggregate error,
/// if any resource failed.
#[derive(Debug)]
pub struct ApplyOutcome {
    pub state: State,
    pub error: Option<EngineError>,
}

/// Per-resource results of a pass: `Some(live)` for applied resources,
/// `None` for deleted ones. Shared so a caller can still read what landed
/// after abandoning the pass.
pub type LiveResults = Arc<DashMap<String, Option<Resource>>>;

enum StepOutcome {
    Skipped,
    Applied(Resource),
    Deleted,
}

/// Runs a `ChangeOrder` against the registered runtimes in dependency order.
pub struct Executor {
    registry: Arc<RuntimeRegistry>,
    parallelism: usize,
    dry_run: bool,
    stack: String,
    live: LiveResults,
}

impl Executor {
    pub fn new(registry: &RuntimeRegistry, settings: &EngineSettings, stack: &str) -> Self {
        Self {
            registry: Arc::new(registry.clone()),
            parallelism: settings.workers(),
            dry_run: settings.dry_run,
            stack: stack.to_string(),
            live: LiveResults::default(),
        }
    }

    /// Record results into `live` instead of a private map.
    pub fn with_live_results(mut self, live: LiveResults) -> Self {
        self.live = live;
        self
    }

    /// Handle to the results recorded so far.
    pub fn live_results(&self) -> LiveResults {
        Arc::clone(&self.live)
    }

    /// Execute every step of `order`, streaming a pending and then a terminal
    /// message per resource into `messages`. The channel closes when this
    /// returns and the last sender is dropped.
    pub async fn apply(
        &self,
        order: &ChangeOrder,
        spec: &Spec,
        prior: &State,
        graph: &GraphHandle,
        messages: mpsc::Sender<Message>,
        cancel: CancellationToken,
    ) -> ApplyOutcome {
        if self.dry_run {
            for step in order.steps() {
                let _ = messages.send(Message::pending(&step.id)).await;
                let _ = messages.send(Message::success(&step.id)).await;
            }
            info!(steps = order.len(), "Dry run complete");
            return ApplyOutcome {
                state: prior.clone(),
                error: None,
            };
        }

        let (dag, node_map) = match build_change_dag(order) {
            Ok(built) => built,
            Err(e) => {
                return ApplyOutcome {
                    state: prior.clone(),
                    error: Some(e),
                }
            }
        };

        let steps: Arc<BTreeMap<String, ChangeStep>> = Arc::new(order.change_steps.clone());
        let live = self.live_results();

        let executor: NodeExecutor = {
            let registry = Arc::clone(&self.registry);
            let stack = self.stack.clone();
            let steps = Arc::clone(&steps);
            let live = Arc::clone(&live);
            let graph = graph.clone();
            let messages = messages.clone();

            Box::new(move |_idx: NodeIndex, id: String| {
                let registry = Arc::clone(&registry);
                let stack = stack.clone();
                let step = steps.get(&id).cloned();
                let live = Arc::clone(&live);
                let graph = graph.clone();
                let messages = messages.clone();

                Box::pin(async move {
                    let _ = messages.send(Message::pending(&id)).await;

                    let outcome = match step {
                        Some(step) => run_step(&registry, &stack, &step).await,
                        None => Err(anyhow!("no change step recorded")),
                    };

                    match outcome {
                        Ok(StepOutcome::Skipped) => {
                            debug!(id = %id, "Resource unchanged");
                            let _ = messages.send(Message::skip(&id)).await;
                            Ok(())
                        }
                        Ok(StepOutcome::Applied(resource)) => {
                            graph.record_applied(&resource).await;
                            live.insert(id.clone(), Some(resource));
                            info!(id = %id, "Resource applied");
                            let _ = messages.send(Message::success(&id)).await;
                            Ok(())
                        }
                        Ok(StepOutcome::Deleted) => {
                            graph.remove(&id).await;
                            live.insert(id.clone(), None);
                            info!(id = %id, "Resource deleted");
                            let _ = messages.send(Message::success(&id)).await;
                            Ok(())
                        }
                        Err(source) => {
                            graph.set_status(&id, ResourceStatus::ApplyFail).await;
                            let err = EngineError::execution(id.clone(), source);
                            warn!(id = %id, error = %err, "Resource failed");
                            let _ = messages.send(Message::failed(&id, err.to_string())).await;
                            Err(err)
                        }
                    }
                })
            })
        };

        let on_blocked: BlockedHandler = {
            let graph = graph.clone();
            let messages = messages.clone();
            Box::new(move |id: String, upstream: String| {
                let graph = graph.clone();
                let messages = messages.clone();
                Box::pin(async move {
                    graph.set_status(&id, ResourceStatus::ApplyFail).await;
                    let _ = messages.send(Message::pending(&id)).await;
                    let _ = messages
                        .send(Message::failed(&id, blocked_reason(&upstream)))
                        .await;
                })
            })
        };
        drop(messages);

        let walker = DagWalker::new(self.parallelism);
        let mut results = walker
            .walk(&dag, Arc::new(executor), on_blocked, cancel.clone())
            .await;
        results.sort_by_key(|r| node_map.get(&r.id).copied());

        let mut errors = Vec::new();
        for result in results {
            match result.status {
                NodeStatus::Failed(_) => {
                    if let Some(err) = result.error {
                        errors.push(err);
                    }
                }
                NodeStatus::Blocked(upstream) => {
                    errors.push(EngineError::execution(
                        result.id,
                        anyhow!(blocked_reason(&upstream)),
                    ));
                }
                _ => {}
            }
        }

        let state = settled_state(spec, prior, &self.live);

        let error = if cancel.is_cancelled() {
            Some(EngineError::Interrupted)
        } else if errors.is_empty() {
            None
        } else {
            Some(EngineError::AggregateExecution(errors))
        };

        ApplyOutcome { state, error }
    }
}

fn blocked_reason(upstream: &str) -> String {
    format!("upstream dependency '{}' failed", upstream)
}

async fn run_step(
    registry: &RuntimeRegistry,
    stack: &str,
    step: &ChangeStep,
) -> anyhow::Result<StepOutcome> {
    match step.action {
        ActionType::UnChanged => Ok(StepOutcome::Skipped),
        ActionType::Undefined => Err(anyhow!("undefined action for resource")),
        ActionType::Create | ActionType::Update => {
            let planned = step
                .to
                .clone()
                .ok_or_else(|| anyhow!("{} step has no desired resource", step.action))?;
            let runtime = registry.require(planned.resource_type)?;
            let response = runtime
                .apply(ApplyRequest {
                    prior: step.from.clone(),
                    planned,
                    stack: stack.to_string(),
                })
                .await?;
            Ok(StepOutcome::Applied(response.resource))
        }
        ActionType::Delete => {
            let resource = step
                .from
                .clone()
                .ok_or_else(|| anyhow!("delete step has no recorded resource"))?;
            let runtime = registry.require(resource.resource_type)?;
            runtime
                .delete(DeleteRequest {
                    resource,
                    stack: stack.to_string(),
                })
                .await?;
            Ok(StepOutcome::Deleted)
        }
    }
}

/// State implied by the results recorded so far, complete or not.
pub fn settled_state(spec: &Spec, prior: &State, live: &LiveResults) -> State {
    let live: HashMap<String, Option<Resource>> = live
        .iter()
        .map(|e| (e.key().clone(), e.value().clone()))
        .collect();
    next_state(spec, prior, &live)
}

/// Recorded state after an apply pass: desired resources in spec order
/// (live copy if applied, prior copy otherwise), then recorded resources
/// whose delete did not go through.
fn next_state(spec: &Spec, prior: &State, live: &HashMap<String, Option<Resource>>) -> State {
    let mut resources = Vec::new();
    for desired in &spec.resources {
        match live.get(&desired.id) {
            Some(Some(applied)) => resources.push(applied.clone()),
            Some(None) => {}
            None => {
                if let Some(recorded) = prior.get(&desired.id) {
                    resources.push(recorded.clone());
                }
            }
        }
    }
    for recorded in &prior.resources {
        if spec.get(&recorded.id).is_none() && !live.contains_key(&recorded.id) {
            resources.push(recorded.clone());
        }
    }
    State::new(resources)
}
