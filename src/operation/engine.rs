use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::cancel::{run_cleanup, PortForwarder};
use crate::config::{EngineSettings, Scope};
use crate::error::{EngineError, Result};
use crate::executor::{
    settled_state, ApplyOutcome, Executor, LiveResults, ProgressReporter, ReportSummary,
};
use crate::graph::{Graph, GraphHandle};
use crate::models::{Spec, State};
use crate::output::formatter;
use crate::planner::{ChangeOrder, Previewer};
use crate::release::{Phase, Release, ReleaseHandle};
use crate::runtime::RuntimeRegistry;
use crate::storage::{next_revision, GraphStore, ReleaseStore};
use crate::watch::Watcher;

const MESSAGE_BUFFER: usize = 64;

/// Result of an apply or destroy.
#[derive(Debug, Clone, Default)]
pub struct ApplyReport {
    /// Release revision; `None` for dry runs and no-op operations.
    pub revision: Option<u64>,
    pub order: ChangeOrder,
    pub summary: ReportSummary,
    pub state: State,
}

/// Top-level orchestrator: preview, apply, destroy.
pub struct Engine {
    registry: RuntimeRegistry,
    releases: Arc<dyn ReleaseStore>,
    graphs: Arc<dyn GraphStore>,
    settings: EngineSettings,
    port_forwarder: Option<Arc<dyn PortForwarder>>,
}

impl Engine {
    pub fn new(
        registry: RuntimeRegistry,
        releases: Arc<dyn ReleaseStore>,
        graphs: Arc<dyn GraphStore>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            registry,
            releases,
            graphs,
            settings,
            port_forwarder: None,
        }
    }

    pub fn with_port_forwarder(mut self, forwarder: Arc<dyn PortForwarder>) -> Self {
        self.port_forwarder = Some(forwarder);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    fn previewer(&self) -> Previewer<'_> {
        Previewer::new(&self.registry, &self.settings.ignore_fields)
    }

    /// State recorded by the latest release of `scope`.
    ///
    /// Fails if that release never reached a terminal phase, since another
    /// operation may still be running against the same stack.
    pub async fn prior_state(&self, scope: &Scope) -> Result<State> {
        let latest = self
            .releases
            .get_latest(scope)
            .await
            .map_err(|e| EngineError::storage(format!("loading latest release of {}", scope), e))?;
        match latest {
            None => Ok(State::default()),
            Some(release) if !release.phase.is_terminal() => Err(EngineError::Validation(format!(
                "release {} of {} is still {}; unlock it if no operation is running",
                release.revision, scope, release.phase
            ))),
            Some(release) => Ok(release.state),
        }
    }

    /// Compute the change order for `spec` against the recorded state.
    pub async fn preview(&self, spec: &Spec, scope: &Scope) -> Result<ChangeOrder> {
        let prior = self.prior_state(scope).await?;
        self.previewer().preview(spec, &prior, scope).await
    }

    /// Apply `spec` to `scope`. Cancelling `cancel` interrupts the run.
    pub async fn apply(
        &self,
        scope: &Scope,
        spec: &Spec,
        cancel: CancellationToken,
    ) -> Result<ApplyReport> {
        if spec.is_empty() {
            info!(scope = %scope, "Spec has no resources; nothing to apply");
            return Ok(ApplyReport::default());
        }
        let deadline = self.deadline();
        let prior = self.prior_state(scope).await?;

        if self.settings.dry_run {
            let order = self.previewer().preview(spec, &prior, scope).await?;
            return self
                .dry_run(order, spec, &prior, scope, &cancel, deadline)
                .await;
        }

        let handle = self.create_release(scope, spec.clone(), prior.clone()).await?;
        let guard = InterruptGuard::spawn(handle.clone(), cancel.clone());

        let outcome = self
            .run_apply(&handle, scope, spec, &prior, &cancel, deadline)
            .await;
        let result = match handle.finalize(outcome).await {
            Ok(report) if self.settings.port_forward => {
                self.port_forward(report, &guard, &cancel).await
            }
            other => other,
        };

        guard.finish(self.settings.cleanup_grace()).await;
        result
    }

    /// Delete every recorded resource of `scope`.
    pub async fn destroy(&self, scope: &Scope, cancel: CancellationToken) -> Result<ApplyReport> {
        let deadline = self.deadline();
        let prior = self.prior_state(scope).await?;
        if prior.is_empty() {
            info!(scope = %scope, "No recorded resources; nothing to destroy");
            return Ok(ApplyReport::default());
        }

        let order = self.previewer().preview_destroy(&prior, scope).await?;
        let desired = Spec::default();
        if self.settings.dry_run {
            return self
                .dry_run(order, &desired, &prior, scope, &cancel, deadline)
                .await;
        }

        let handle = self.create_release(scope, desired.clone(), prior.clone()).await?;
        let guard = InterruptGuard::spawn(handle.clone(), cancel.clone());

        let outcome = self
            .run_destroy(&handle, scope, order, &prior, &cancel, deadline)
            .await;
        let result = handle.finalize(outcome).await;

        guard.finish(self.settings.cleanup_grace()).await;
        result
    }

    /// Force a release stuck in a non-terminal phase to `Failed`. Returns the
    /// revision that was unlocked, if any.
    pub async fn unlock(&self, scope: &Scope) -> Result<Option<u64>> {
        let latest = self
            .releases
            .get_latest(scope)
            .await
            .map_err(|e| EngineError::storage(format!("loading latest release of {}", scope), e))?;
        let Some(release) = latest.filter(|r| !r.phase.is_terminal()) else {
            return Ok(None);
        };
        let revision = release.revision;
        let handle = ReleaseHandle::attach(release, Arc::clone(&self.releases));
        handle.transition(Phase::Failed).await?;
        info!(scope = %scope, revision, "Release unlocked");
        Ok(Some(revision))
    }

    fn deadline(&self) -> Option<(Instant, Duration)> {
        self.settings
            .timeout()
            .map(|limit| (Instant::now() + limit, limit))
    }

    async fn create_release(&self, scope: &Scope, spec: Spec, prior: State) -> Result<ReleaseHandle> {
        let revision = next_revision(self.releases.as_ref(), scope)
            .await
            .map_err(|e| EngineError::storage(format!("computing next revision of {}", scope), e))?;
        ReleaseHandle::create(
            Release::new(scope, revision, spec, prior),
            Arc::clone(&self.releases),
        )
        .await
    }

    async fn run_apply(
        &self,
        handle: &ReleaseHandle,
        scope: &Scope,
        spec: &Spec,
        prior: &State,
        cancel: &CancellationToken,
        deadline: Option<(Instant, Duration)>,
    ) -> Result<ApplyReport> {
        let revision = Some(handle.snapshot().await.revision);

        handle.transition(Phase::Previewing).await?;
        let order = self.previewer().preview(spec, prior, scope).await?;
        if !self.settings.quiet {
            formatter::print_preview(&order, &self.settings.ignore_fields, false);
        }
        if !order.has_changes() {
            let summary = ReportSummary {
                skipped: order.len(),
                ..ReportSummary::default()
            };
            if !self.settings.quiet {
                formatter::print_apply_summary(&summary);
            }
            return Ok(ApplyReport {
                revision,
                order,
                summary,
                state: prior.clone(),
            });
        }

        handle.transition(Phase::Applying).await?;
        let mut graph = self.load_graph(scope).await?;
        graph.merge_spec(spec);
        let graph = GraphHandle::new(graph);

        let (state, summary) = self
            .execute_and_persist(handle, &order, spec, prior, scope, &graph, cancel, deadline)
            .await?;

        if self.settings.watch {
            let watcher = Watcher::new(&self.registry, &self.settings);
            let watched = until_deadline(watcher.watch(&order, &graph, cancel.clone()), cancel, deadline)
                .await
                .and_then(|r| r);
            let saved = self.save_graph(&graph).await;
            match (watched, saved) {
                (Err(watch_err), Err(store_err)) => return Err(watch_err.join(store_err)),
                (Err(watch_err), Ok(())) => return Err(watch_err),
                (Ok(()), Err(store_err)) => return Err(store_err),
                (Ok(()), Ok(())) => {}
            }
        }

        Ok(ApplyReport {
            revision,
            order,
            summary,
            state,
        })
    }

    async fn run_destroy(
        &self,
        handle: &ReleaseHandle,
        scope: &Scope,
        order: ChangeOrder,
        prior: &State,
        cancel: &CancellationToken,
        deadline: Option<(Instant, Duration)>,
    ) -> Result<ApplyReport> {
        let revision = Some(handle.snapshot().await.revision);

        handle.transition(Phase::Destroying).await?;
        if !self.settings.quiet {
            formatter::print_preview(&order, &self.settings.ignore_fields, false);
        }

        let mut graph = self.load_graph(scope).await?;
        graph.merge_spec(&Spec::new(prior.resources.clone()));
        let graph = GraphHandle::new(graph);

        let desired = Spec::default();
        let (state, summary) = self
            .execute_and_persist(handle, &order, &desired, prior, scope, &graph, cancel, deadline)
            .await?;

        Ok(ApplyReport {
            revision,
            order,
            summary,
            state,
        })
    }

    /// Run the executor, record the resulting state on the release and
    /// persist the graph. Per-resource failures are returned after both are
    /// recorded.
    #[allow(clippy::too_many_arguments)]
    async fn execute_and_persist(
        &self,
        handle: &ReleaseHandle,
        order: &ChangeOrder,
        spec: &Spec,
        prior: &State,
        scope: &Scope,
        graph: &GraphHandle,
        cancel: &CancellationToken,
        deadline: Option<(Instant, Duration)>,
    ) -> Result<(State, ReportSummary)> {
        let live = LiveResults::default();
        let (outcome, summary) = self
            .execute(order, spec, prior, scope, graph, &live, cancel, deadline)
            .await;

        let outcome = match outcome {
            Ok(outcome) => outcome,
            Err(e) => {
                // Keep what already landed so the next run starts from it.
                let partial = settled_state(spec, prior, &live);
                if let Err(store_err) = handle.record_state(partial).await {
                    warn!(error = %store_err, "Failed to persist partial state after aborted run");
                }
                if let Err(store_err) = self.save_graph(graph).await {
                    warn!(error = %store_err, "Failed to persist graph after aborted run");
                }
                return Err(e);
            }
        };

        handle.set_state(outcome.state.clone()).await;
        let saved = self.save_graph(graph).await;
        match (outcome.error, saved) {
            (Some(exec_err), Err(store_err)) => Err(exec_err.join(store_err)),
            (Some(exec_err), Ok(())) => Err(exec_err),
            (None, Err(store_err)) => Err(store_err),
            (None, Ok(())) => Ok((outcome.state, summary)),
        }
    }

    /// Stream the executor through a reporter task, bounded by the interrupt
    /// token and the global deadline. Results land in `live` as they happen.
    /// In dry-run mode the graph is left untouched.
    #[allow(clippy::too_many_arguments)]
    async fn execute(
        &self,
        order: &ChangeOrder,
        spec: &Spec,
        prior: &State,
        scope: &Scope,
        graph: &GraphHandle,
        live: &LiveResults,
        cancel: &CancellationToken,
        deadline: Option<(Instant, Duration)>,
    ) -> (Result<ApplyOutcome>, ReportSummary) {
        let dry_run = self.settings.dry_run;
        let (tx, rx) = mpsc::channel(MESSAGE_BUFFER);
        let reporter = ProgressReporter::new(
            order.clone(),
            (!dry_run).then(|| graph.clone()),
            self.settings.quiet,
        )
        .spawn(rx);

        let executor = Executor::new(&self.registry, &self.settings, &scope.stack)
            .with_live_results(Arc::clone(live));
        let run = executor.apply(order, spec, prior, graph, tx, cancel.clone());
        let outcome = until_deadline(run, cancel, deadline).await;

        let summary = match tokio::time::timeout(self.settings.cleanup_grace(), reporter).await {
            Ok(Ok(summary)) => summary,
            Ok(Err(e)) => {
                warn!(error = %e, "Progress reporter task failed");
                ReportSummary::default()
            }
            Err(_) => {
                warn!("Progress reporter did not drain within the grace period");
                ReportSummary::default()
            }
        };
        if !self.settings.quiet {
            formatter::print_apply_summary(&summary);
        }
        (outcome, summary)
    }

    async fn dry_run(
        &self,
        order: ChangeOrder,
        spec: &Spec,
        prior: &State,
        scope: &Scope,
        cancel: &CancellationToken,
        deadline: Option<(Instant, Duration)>,
    ) -> Result<ApplyReport> {
        if !self.settings.quiet {
            formatter::print_preview(&order, &self.settings.ignore_fields, false);
        }
        let graph = GraphHandle::new(Graph::new(scope));
        let (outcome, summary) = self
            .execute(&order, spec, prior, scope, &graph, &LiveResults::default(), cancel, deadline)
            .await;
        let outcome = outcome?;
        if let Some(err) = outcome.error {
            return Err(err);
        }
        Ok(ApplyReport {
            revision: None,
            order,
            summary,
            state: outcome.state,
        })
    }

    async fn port_forward(
        &self,
        report: ApplyReport,
        guard: &InterruptGuard,
        cancel: &CancellationToken,
    ) -> Result<ApplyReport> {
        let Some(forwarder) = &self.port_forwarder else {
            warn!("Port forwarding requested but no forwarder is configured");
            return Ok(report);
        };

        guard.port_forward_active.store(true, Ordering::SeqCst);
        info!("Forwarding ports; interrupt to stop");
        let forwarded = forwarder.forward(&report.order, cancel.clone()).await;
        run_cleanup("port-forward", self.settings.cleanup_grace(), forwarder.stop()).await;
        guard.port_forward_active.store(false, Ordering::SeqCst);

        forwarded.map_err(|e| EngineError::execution("port-forward", e))?;
        Ok(report)
    }

    async fn load_graph(&self, scope: &Scope) -> Result<Graph> {
        let exists = self
            .graphs
            .check_existence(scope)
            .await
            .map_err(|e| EngineError::storage(format!("checking graph of {}", scope), e))?;
        if !exists {
            debug!(scope = %scope, "No stored graph; starting empty");
            return Ok(Graph::new(scope));
        }
        let stored = self
            .graphs
            .get(scope)
            .await
            .map_err(|e| EngineError::storage(format!("loading graph of {}", scope), e))?;
        match stored {
            Some(graph) => {
                graph.validate()?;
                Ok(graph)
            }
            None => Ok(Graph::new(scope)),
        }
    }

    async fn save_graph(&self, graph: &GraphHandle) -> Result<()> {
        let snapshot = graph.snapshot().await;
        let scope = Scope::new(&snapshot.project, &snapshot.stack, &snapshot.workspace);
        let context = format!("saving graph of {}", scope);
        let exists = self
            .graphs
            .check_existence(&scope)
            .await
            .map_err(|e| EngineError::storage(context.clone(), e))?;
        let saved = if exists {
            self.graphs.update(&snapshot).await
        } else {
            self.graphs.create(&snapshot).await
        };
        saved.map_err(|e| EngineError::storage(context, e))
    }
}

/// Resolve `fut` unless the operation is interrupted or the deadline passes.
async fn until_deadline<F: Future>(
    fut: F,
    cancel: &CancellationToken,
    deadline: Option<(Instant, Duration)>,
) -> Result<F::Output> {
    let expired = async {
        match deadline {
            Some((at, _)) => tokio::time::sleep_until(at).await,
            None => std::future::pending::<()>().await,
        }
    };
    tokio::select! {
        output = fut => Ok(output),
        _ = cancel.cancelled() => Err(EngineError::Interrupted),
        _ = expired => Err(EngineError::timeout(
            "operation",
            deadline.map(|(_, limit)| limit).unwrap_or_default(),
        )),
    }
}

/// Marks the release failed when the operation is interrupted, unless the
/// interrupt only stops an active port-forward.
struct InterruptGuard {
    done: CancellationToken,
    port_forward_active: Arc<AtomicBool>,
    task: JoinHandle<()>,
}

impl InterruptGuard {
    fn spawn(handle: ReleaseHandle, cancel: CancellationToken) -> Self {
        let done = CancellationToken::new();
        let port_forward_active = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn({
            let done = done.clone();
            let active = Arc::clone(&port_forward_active);
            async move {
                tokio::select! {
                    _ = done.cancelled() => {}
                    _ = cancel.cancelled() => {
                        if active.load(Ordering::SeqCst) {
                            info!("Interrupted during port-forward; stopping");
                        } else if handle.fail_on_interrupt().await {
                            warn!("Operation interrupted; release marked failed");
                        }
                    }
                }
            }
        });
        Self {
            done,
            port_forward_active,
            task,
        }
    }

    async fn finish(self, grace: Duration) {
        self.done.cancel();
        let task = self.task;
        run_cleanup("interrupt handler", grace, async move {
            task.await.map_err(anyhow::Error::from)
        })
        .await;
    }
}
