use colored::Colorize;

use crate::executor::ReportSummary;
use crate::graph::{Graph, ResourceStatus};
use crate::planner::{ActionType, ChangeOrder, ChangeStep};
use crate::release::{Phase, Release};
use crate::watch::WatchTable;

/// Print a success message.
pub fn print_success(msg: &str) {
    println!("{} {}", "✓".green().bold(), msg.green());
}

/// Print an error message.
pub fn print_error(msg: &str) {
    eprintln!("{} {}", "✗".red().bold(), msg.red());
}

fn action_marker(action: ActionType) -> colored::ColoredString {
    match action {
        ActionType::Create => "+".green().bold(),
        ActionType::Update => "~".yellow().bold(),
        ActionType::Delete => "-".red().bold(),
        ActionType::UnChanged => " ".normal(),
        ActionType::Undefined => "?".magenta().bold(),
    }
}

fn action_phrase(action: ActionType) -> &'static str {
    match action {
        ActionType::Create => "will be created",
        ActionType::Update => "will be updated",
        ActionType::Delete => "will be deleted",
        ActionType::UnChanged => "is unchanged",
        ActionType::Undefined => "has no known action",
    }
}

/// Print the change order as a table, optionally with per-step diffs.
pub fn print_preview(order: &ChangeOrder, ignore_fields: &[String], detail: bool) {
    println!();
    if !order.has_changes() {
        println!("{}", "No changes. Infrastructure is up-to-date.".green());
        return;
    }

    println!("{}", "Changes".bold().cyan());
    println!("{}", "─".repeat(80));
    println!("  {:<3} {:<58} {}", "", "ID".bold(), "ACTION".bold());
    println!("{}", "─".repeat(80));
    for step in order.steps() {
        println!(
            "  {:<3} {:<58} {}",
            action_marker(step.action),
            step.id,
            step.action
        );
    }
    println!();

    if detail {
        for step in order.steps().filter(|s| s.action.is_change()) {
            print_step_detail(step, ignore_fields);
        }
    }

    println!("{}", order.summary());
    println!();
}

fn print_step_detail(step: &ChangeStep, ignore_fields: &[String]) {
    println!(
        "  {} {} {}",
        "#".dimmed(),
        step.id.bold(),
        action_phrase(step.action).dimmed()
    );
    for line in step.diff(ignore_fields).lines() {
        let colored_line = if line.starts_with("+++") || line.starts_with("---") {
            line.bold().to_string()
        } else if line.starts_with('+') {
            line.green().to_string()
        } else if line.starts_with('-') {
            line.red().to_string()
        } else if line.starts_with("@@") {
            line.cyan().to_string()
        } else {
            line.to_string()
        };
        println!("    {}", colored_line);
    }
    println!();
}

/// "Apply complete! Resources: X created, Y updated, Z deleted."
pub fn apply_summary_line(summary: &ReportSummary) -> String {
    format!(
        "Apply complete! Resources: {} created, {} updated, {} deleted.",
        summary.created, summary.updated, summary.deleted
    )
}

/// Print collected failures followed by the summary line.
pub fn print_apply_summary(summary: &ReportSummary) {
    println!();
    for error in &summary.errors {
        println!("  {}", error);
    }
    if !summary.errors.is_empty() {
        println!();
    }
    let line = apply_summary_line(summary);
    if summary.failed == 0 {
        println!("{}", line.green().bold());
    } else {
        println!("{}", line.yellow().bold());
    }
}

/// Print the final watch table of one resource.
pub fn print_watch_table(id: &str, table: &WatchTable) {
    println!();
    println!("{} {}", "Watching".bold().cyan(), id.bold());
    println!("{}", "─".repeat(80));
    println!(
        "  {:<10} {:<22} {:<25} {}",
        "EVENT".bold(),
        "KIND".bold(),
        "NAME".bold(),
        "DETAIL".bold()
    );
    for (_, row) in table.rows() {
        let detail = if row.ready {
            row.detail.green().to_string()
        } else {
            row.detail.yellow().to_string()
        };
        println!(
            "  {:<10} {:<22} {:<25} {}",
            row.event_type, row.kind, row.name, detail
        );
    }
    println!("{}", "─".repeat(80));
}

fn phase_colored(phase: Phase) -> String {
    match phase {
        Phase::Succeeded => phase.to_string().green().to_string(),
        Phase::Failed => phase.to_string().red().to_string(),
        Phase::Unset => phase.to_string().dimmed().to_string(),
        _ => phase.to_string().blue().to_string(),
    }
}

/// Print a release record.
pub fn print_release(release: &Release) {
    println!();
    println!(
        "{} {}",
        "Release:".bold().cyan(),
        format!("{} #{}", release.scope(), release.revision).bold()
    );
    println!("{}", "─".repeat(60));
    println!("  {:<12} {}", "ID:".bold(), release.id);
    println!("  {:<12} {}", "Phase:".bold(), phase_colored(release.phase));
    println!("  {:<12} {}", "Created:".bold(), release.create_time.to_rfc3339());
    println!("  {:<12} {}", "Modified:".bold(), release.modified_time.to_rfc3339());
    println!(
        "  {:<12} {} desired, {} recorded",
        "Resources:".bold(),
        release.spec.resources.len(),
        release.state.resources.len()
    );
    println!("{}", "─".repeat(60));
    println!();
}

fn status_colored(status: ResourceStatus) -> String {
    match status {
        ResourceStatus::ApplySucceed | ResourceStatus::Reconciled => {
            status.to_string().green().to_string()
        }
        ResourceStatus::ApplyFail | ResourceStatus::ReconcileFail => {
            status.to_string().red().to_string()
        }
        ResourceStatus::Pending => status.to_string().blue().to_string(),
    }
}

/// Print the resource graph, one line per node.
pub fn print_graph(graph: &Graph) {
    if graph.is_empty() {
        println!("{}", "No resources in graph.".dimmed());
        return;
    }

    println!();
    println!("{}", "Resources".bold().cyan());
    println!("{}", "─".repeat(100));
    println!(
        "  {:<50} {:<12} {:<15} {}",
        "ID".bold(),
        "CATEGORY".bold(),
        "STATUS".bold(),
        "CLOUD ID".bold()
    );
    println!("{}", "─".repeat(100));
    for node in graph.iter() {
        let category = graph
            .category(&node.id)
            .map(|c| format!("{:?}", c))
            .unwrap_or_default();
        println!(
            "  {:<50} {:<12} {:<15} {}",
            node.id,
            category,
            status_colored(node.status),
            node.cloud_resource_id.dimmed()
        );
    }
    println!();
    println!("  {} resource(s) total.", graph.len());
    println!();
}
