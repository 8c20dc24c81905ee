use std::collections::HashMap;
use std::time::Duration;

use colored::Colorize;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::message::{Message, OpResult};
use crate::graph::{GraphHandle, ResourceStatus};
use crate::planner::{ActionType, ChangeOrder};

/// Tallies gathered while draining the progress channel.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReportSummary {
    pub created: usize,
    pub updated: usize,
    pub deleted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

impl ReportSummary {
    pub fn changed(&self) -> usize {
        self.created + self.updated + self.deleted
    }
}

/// Drains executor messages into spinners and counters.
pub struct ProgressReporter {
    order: ChangeOrder,
    /// Absent on dry runs, where the graph must not change.
    graph: Option<GraphHandle>,
    quiet: bool,
}

impl ProgressReporter {
    pub fn new(order: ChangeOrder, graph: Option<GraphHandle>, quiet: bool) -> Self {
        Self {
            order,
            graph,
            quiet,
        }
    }

    pub fn spawn(self, rx: mpsc::Receiver<Message>) -> JoinHandle<ReportSummary> {
        tokio::spawn(self.run(rx))
    }

    /// Consume messages until every sender is dropped.
    pub async fn run(self, mut rx: mpsc::Receiver<Message>) -> ReportSummary {
        let multi = if self.quiet {
            MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
        } else {
            MultiProgress::new()
        };

        let total_changes = self.order.summary().changes();
        let overall = multi.add(ProgressBar::new(total_changes as u64));
        overall.set_style(
            ProgressStyle::default_bar()
                .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_bar())
                .progress_chars("=>-"),
        );
        overall.set_message("applying");

        let spinner_style = ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {prefix:.bold.dim} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());

        let step_total = self.order.len();
        let mut step_counter = 0usize;
        let mut bars: HashMap<String, ProgressBar> = HashMap::new();
        let mut summary = ReportSummary::default();

        while let Some(msg) = rx.recv().await {
            let Some(step) = self.order.get(&msg.resource_id) else {
                warn!(id = %msg.resource_id, "Progress message for unknown resource ignored");
                continue;
            };
            debug!(id = %msg.resource_id, result = %msg.op_result, "Progress message");

            if msg.op_result == OpResult::Pending {
                step_counter += 1;
                let bar = multi.add(ProgressBar::new_spinner());
                bar.set_style(spinner_style.clone());
                bar.set_prefix(format!("[{}/{}]", step_counter, step_total));
                bar.set_message(format!("{} {}", progress_verb(step.action), step.id));
                bar.enable_steady_tick(Duration::from_millis(100));
                bars.insert(step.id.clone(), bar);
                continue;
            }

            let bar = bars
                .remove(&step.id)
                .unwrap_or_else(|| multi.add(ProgressBar::hidden()));

            match msg.op_result {
                OpResult::Pending => {}
                OpResult::Skip => {
                    summary.skipped += 1;
                    bar.finish_with_message(format!("{} {}", step.id, "unchanged".dimmed()));
                }
                OpResult::Failed => {
                    summary.failed += 1;
                    let reason = msg.op_err.as_deref().unwrap_or("unknown error");
                    summary
                        .errors
                        .push(format!("{} {}: {}", "✗".red(), step.id.bold(), reason));
                    if let Some(graph) = &self.graph {
                        graph.set_status(&step.id, ResourceStatus::ApplyFail).await;
                    }
                    bar.finish_with_message(format!("{} {}", step.id, "failed".red().bold()));
                }
                OpResult::Success => {
                    if step.action.is_change() {
                        overall.inc(1);
                        match step.action {
                            ActionType::Create => summary.created += 1,
                            ActionType::Update => summary.updated += 1,
                            ActionType::Delete => summary.deleted += 1,
                            _ => {}
                        }
                    }
                    bar.finish_with_message(format!(
                        "{} {}",
                        step.id,
                        done_verb(step.action).green()
                    ));
                }
            }
        }

        for (_, bar) in bars.drain() {
            bar.abandon();
        }
        overall.finish_and_clear();
        summary
    }
}

fn progress_verb(action: ActionType) -> &'static str {
    match action {
        ActionType::Create => "Creating",
        ActionType::Update => "Updating",
        ActionType::Delete => "Deleting",
        ActionType::UnChanged => "Checking",
        ActionType::Undefined => "Processing",
    }
}

fn done_verb(action: ActionType) -> &'static str {
    match action {
        ActionType::Create => "created",
        ActionType::Update => "updated",
        ActionType::Delete => "deleted",
        ActionType::UnChanged => "unchanged",
        ActionType::Undefined => "done",
    }
}
