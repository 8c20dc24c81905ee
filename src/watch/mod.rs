//! Post-apply reconciliation.
//!
//! Each applied resource gets its own reducer task that drains the runtime's
//! event streams into a [`WatchTable`] until every row is ready, the
//! per-resource deadline passes, or the operation is cancelled.

pub mod expression;
pub mod health;
pub mod table;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::anyhow;
use futures::StreamExt;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamMap;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::EngineSettings;
use crate::error::{EngineError, Result};
use crate::graph::{GraphHandle, ResourceStatus};
use crate::models::{kubernetes_object_id, parse_terraform_id, Resource, ResourceType};
use crate::output::formatter;
use crate::planner::{ActionType, ChangeOrder};
use crate::runtime::{
    KubeEventType, RuntimeRegistry, SequentialWatchers, TerraformWatcher, TfEvent, WatchRequest,
};

pub use expression::HealthExpression;
pub use health::{default_health, Health};
pub use table::{WatchRow, WatchTable};

/// Live watch tables keyed by resource id.
pub type WatchBoard = Arc<Mutex<BTreeMap<String, WatchTable>>>;

/// Drives reconciliation for every changed resource of an apply.
pub struct Watcher {
    registry: Arc<RuntimeRegistry>,
    timeout: Duration,
    quiet: bool,
    board: WatchBoard,
}

impl Watcher {
    pub fn new(registry: &RuntimeRegistry, settings: &EngineSettings) -> Self {
        Self {
            registry: Arc::new(registry.clone()),
            timeout: settings.watch_timeout(),
            quiet: settings.quiet,
            board: WatchBoard::default(),
        }
    }

    /// Tables created so far, including those of failed resources.
    pub fn board(&self) -> WatchBoard {
        Arc::clone(&self.board)
    }

    /// Watch every step of `order` that changed something.
    ///
    /// A resource that exceeds the watch timeout fails on its own; any other
    /// error cancels the remaining watches.
    pub async fn watch(
        &self,
        order: &ChangeOrder,
        graph: &GraphHandle,
        cancel: CancellationToken,
    ) -> Result<()> {
        let cancel = cancel.child_token();
        let mut tasks = JoinSet::new();

        for step in order.steps() {
            if matches!(step.action, ActionType::UnChanged | ActionType::Undefined) {
                continue;
            }
            let Some(resource) = step.resource().cloned() else {
                continue;
            };
            let ctx = WatchContext {
                registry: Arc::clone(&self.registry),
                graph: graph.clone(),
                board: Arc::clone(&self.board),
                cancel: cancel.clone(),
                quiet: self.quiet,
            };
            let timeout = self.timeout;
            tasks.spawn(async move {
                let id = resource.id.clone();
                let outcome = match tokio::time::timeout(timeout, ctx.watch_resource(resource)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(EngineError::timeout(format!("watching resource '{}'", id), timeout)),
                };
                if let Err(e) = &outcome {
                    if e.is_timeout() {
                        warn!(id = %id, "Watch timed out; other resources continue");
                    } else if !e.is_interrupted() {
                        warn!(id = %id, error = %e, "Watch failed; cancelling remaining watches");
                        ctx.cancel.cancel();
                    }
                }
                outcome
            });
        }

        let mut errors = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(Ok(())) => {}
                Ok(Err(e)) => errors.push(e),
                Err(e) => errors.push(EngineError::execution("watch", anyhow!(e))),
            }
        }

        if errors.iter().any(|e| !e.is_interrupted()) {
            errors.retain(|e| !e.is_interrupted());
        } else if !errors.is_empty() {
            return Err(EngineError::Interrupted);
        }
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(EngineError::Joined(errors)),
        }
    }
}

struct WatchContext {
    registry: Arc<RuntimeRegistry>,
    graph: GraphHandle,
    board: WatchBoard,
    cancel: CancellationToken,
    quiet: bool,
}

impl WatchContext {
    async fn watch_resource(&self, resource: Resource) -> Result<()> {
        let id = resource.id.clone();
        let Some(runtime) = self.registry.get(resource.resource_type) else {
            debug!(id = %id, "No runtime registered; nothing to watch");
            return Ok(());
        };

        // Fallback status until the watch proves the resource healthy.
        let previous = self
            .graph
            .replace_status(&id, ResourceStatus::ReconcileFail)
            .await;

        let response = runtime
            .watch(WatchRequest {
                resource: resource.clone(),
            })
            .await
            .map_err(|e| EngineError::execution(id.clone(), e.context("opening watch")))?;

        if response.is_empty() {
            if let Some(previous) = previous {
                self.graph.set_status(&id, previous).await;
            }
            info!(id = %id, "Resource has no watchable representation; skipping reconciliation");
            return Ok(());
        }

        let table = match (resource.resource_type, response.kubernetes, response.terraform) {
            (ResourceType::Kubernetes, Some(watchers), _) => {
                self.reduce_kubernetes(&resource, watchers).await?
            }
            (ResourceType::Terraform, _, Some(watcher)) => self.reduce_terraform(&id, watcher).await?,
            (_, Some(watchers), _) => self.reduce_kubernetes(&resource, watchers).await?,
            (_, _, Some(watcher)) => self.reduce_terraform(&id, watcher).await?,
            (_, None, None) => return Ok(()),
        };

        self.graph.set_status(&id, ResourceStatus::Reconciled).await;
        info!(id = %id, rows = table.len(), "Resource reconciled");
        if !self.quiet {
            formatter::print_watch_table(&id, &table);
        }
        Ok(())
    }

    async fn publish(&self, id: &str, table: &WatchTable) {
        self.board.lock().await.insert(id.to_string(), table.clone());
    }

    async fn reduce_kubernetes(
        &self,
        resource: &Resource,
        watchers: SequentialWatchers,
    ) -> Result<WatchTable> {
        let id = resource.id.as_str();
        let policy = resource
            .health_policy()
            .map(HealthExpression::parse)
            .transpose()?;

        let mut table = WatchTable::from_object_ids(&watchers.ids);
        self.publish(id, &table).await;

        let mut streams = StreamMap::new();
        for (idx, receiver) in watchers.watchers.into_iter().enumerate() {
            streams.insert(idx, ReceiverStream::new(receiver));
        }

        while !table.all_completed() {
            let next = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(EngineError::Interrupted),
                next = streams.next() => next,
            };
            let Some((idx, event)) = next else {
                return Err(EngineError::execution(
                    id,
                    anyhow!("watch streams closed before the resource became ready"),
                ));
            };

            // One stream per object: the stream index names the row.
            let Some(key) = watchers
                .ids
                .get(idx)
                .cloned()
                .or_else(|| kubernetes_object_id(&event.object))
            else {
                continue;
            };
            let Some(current) = table.get(&key).cloned() else {
                debug!(id = %id, object = %key, "Event for an object outside the watch set ignored");
                continue;
            };

            let kind = event
                .object
                .get("kind")
                .and_then(|k| k.as_str())
                .unwrap_or(current.kind.as_str())
                .to_string();
            let name = event
                .object
                .pointer("/metadata/name")
                .and_then(|n| n.as_str())
                .unwrap_or(current.name.as_str())
                .to_string();

            let (ready, detail) = match event.event_type {
                KubeEventType::Bookmark => continue,
                KubeEventType::Error => {
                    let reason = event
                        .object
                        .get("message")
                        .and_then(|m| m.as_str())
                        .unwrap_or("watch stream reported an error");
                    return Err(EngineError::execution(id, anyhow!(reason.to_string())));
                }
                KubeEventType::Deleted => (true, "Deleted".to_string()),
                KubeEventType::Added | KubeEventType::Modified => match &policy {
                    Some(policy) if policy.evaluate(&event.object) => {
                        (true, format!("Health policy satisfied: {}", policy))
                    }
                    Some(policy) => (false, format!("Waiting for: {}", policy)),
                    None => {
                        let health = default_health(&event.object);
                        (health.ready, health.detail)
                    }
                },
            };

            table.update(
                &key,
                WatchRow {
                    event_type: event.event_type.to_string(),
                    kind,
                    name,
                    detail,
                    ready,
                },
            );
            self.publish(id, &table).await;
        }
        Ok(table)
    }

    async fn reduce_terraform(&self, id: &str, mut watcher: TerraformWatcher) -> Result<WatchTable> {
        let tf = parse_terraform_id(id)?;

        let mut table = WatchTable::default();
        table.insert(id, WatchRow::waiting(tf.resource_type, tf.resource_name));
        self.publish(id, &table).await;

        loop {
            let event = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => return Err(EngineError::Interrupted),
                event = watcher.events.recv() => event,
            };
            let Some(event) = event else {
                return Err(EngineError::execution(
                    id,
                    anyhow!("terraform watch closed before the resource settled"),
                ));
            };

            let mut row = WatchRow::waiting(tf.resource_type, tf.resource_name);
            row.event_type = event.label().to_string();
            match event {
                TfEvent::Applying => {
                    row.detail = "Applying".to_string();
                    table.update(id, row);
                    self.publish(id, &table).await;
                }
                TfEvent::Succeeded => {
                    row.detail = "Apply succeeded".to_string();
                    row.ready = true;
                    table.update(id, row);
                    self.publish(id, &table).await;
                    return Ok(table);
                }
                TfEvent::Failed(reason) => {
                    row.detail = reason.clone();
                    table.update(id, row);
                    self.publish(id, &table).await;
                    return Err(EngineError::execution(id, anyhow!(reason)));
                }
            }
        }
    }
}
