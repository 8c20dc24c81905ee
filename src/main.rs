use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Reset SIGPIPE to default behavior so piping (e.g. `strata graph | less`) exits cleanly
/// instead of panicking on broken pipe.
#[cfg(unix)]
fn reset_sigpipe() {
    unsafe {
        libc::signal(libc::SIGPIPE, libc::SIG_DFL);
    }
}

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use strata::config::{loader, EngineSettings, Scope};
use strata::operation::{spawn_signal_listener, ApplyReport, Engine};
use strata::output::formatter;
use strata::runtime::RuntimeRegistry;
use strata::storage::{GraphStore, ReleaseStore, SqliteStorage};

/// strata - infrastructure apply engine
#[derive(Parser)]
#[command(name = "strata", version, about, long_about = None)]
struct Cli {
    /// Engine settings file (YAML or JSON)
    #[arg(short, long)]
    settings: Option<PathBuf>,

    /// Release and graph database
    #[arg(long, default_value = ".strata/strata.db")]
    db: PathBuf,

    /// Project name
    #[arg(long, default_value = "default")]
    project: String,

    /// Stack name
    #[arg(long, default_value = "default")]
    stack: String,

    /// Workspace name
    #[arg(short, long, default_value = "default")]
    workspace: String,

    /// Maximum parallelism for resource operations (overrides settings)
    #[arg(short, long)]
    parallelism: Option<usize>,

    /// Hide progress spinners and tables
    #[arg(short, long)]
    quiet: bool,

    /// Enable verbose logging
    #[arg(short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the change order for a spec against the recorded state
    Preview {
        /// Spec file (YAML or JSON)
        spec: PathBuf,

        /// Show attribute diffs for changed resources
        #[arg(long)]
        detail: bool,

        /// Output format: table, json
        #[arg(short, long, default_value = "table")]
        output: String,
    },

    /// Apply a spec in dependency order
    Apply {
        /// Spec file (YAML or JSON)
        spec: PathBuf,

        /// Report changes without calling any runtime
        #[arg(long)]
        dry_run: bool,

        /// Skip reconciliation after apply
        #[arg(long)]
        no_watch: bool,

        /// Global deadline in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Delete every recorded resource in reverse dependency order
    Destroy {
        /// Report deletions without calling any runtime
        #[arg(long)]
        dry_run: bool,

        /// Global deadline in seconds
        #[arg(long)]
        timeout: Option<u64>,
    },

    /// Inspect or repair releases
    Release {
        #[command(subcommand)]
        command: ReleaseCommands,
    },

    /// Inspect the resource graph
    Graph {
        #[command(subcommand)]
        command: GraphCommands,
    },
}

#[derive(Subcommand)]
enum ReleaseCommands {
    /// Show a release (latest by default)
    Show {
        /// Release revision
        #[arg(short, long)]
        revision: Option<u64>,

        /// Print the full release as JSON
        #[arg(long)]
        json: bool,
    },
    /// Mark a release left in a running phase as failed
    Unlock,
}

#[derive(Subcommand)]
enum GraphCommands {
    /// Show the stored graph
    Show {
        /// Print the graph as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    #[cfg(unix)]
    reset_sigpipe();

    let cli = Cli::parse();

    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("warn")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Preview {
            ref spec,
            detail,
            ref output,
        } => cmd_preview(&cli, spec, detail, output).await,
        Commands::Apply {
            ref spec,
            dry_run,
            no_watch,
            timeout,
        } => cmd_apply(&cli, spec, dry_run, no_watch, timeout).await,
        Commands::Destroy { dry_run, timeout } => cmd_destroy(&cli, dry_run, timeout).await,
        Commands::Release { ref command } => cmd_release(&cli, command).await,
        Commands::Graph { ref command } => cmd_graph(&cli, command).await,
    }
}

// ─── Helpers ─────────────────────────────────────────────────────────────────

fn scope(cli: &Cli) -> Scope {
    Scope::new(&cli.project, &cli.stack, &cli.workspace)
}

fn settings(cli: &Cli) -> Result<EngineSettings> {
    let mut settings = loader::load_settings(cli.settings.as_deref())?;
    if let Some(parallelism) = cli.parallelism {
        settings.parallelism = parallelism;
    }
    if cli.quiet {
        settings.quiet = true;
    }
    Ok(settings)
}

fn open_store(cli: &Cli) -> Result<Arc<SqliteStorage>> {
    Ok(Arc::new(SqliteStorage::open(&cli.db)?))
}

/// The binary ships no runtime adapters; resources are previewed against the
/// recorded state and applied only in dry-run mode unless an embedding
/// program registers adapters.
fn engine(settings: EngineSettings, store: Arc<SqliteStorage>) -> Engine {
    let releases: Arc<dyn ReleaseStore> = store.clone();
    let graphs: Arc<dyn GraphStore> = store;
    Engine::new(RuntimeRegistry::new(), releases, graphs, settings)
}

fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    spawn_signal_listener(token.clone());
    token
}

fn report_outcome(report: &ApplyReport, verb: &str) {
    match report.revision {
        Some(revision) => formatter::print_success(&format!("{} recorded as revision {}", verb, revision)),
        None if report.order.is_empty() => println!("{}", "Nothing to do.".dimmed()),
        None => println!("{}", format!("{} (dry run): nothing was recorded.", verb).dimmed()),
    }
}

// ─── Commands ────────────────────────────────────────────────────────────────

async fn cmd_preview(cli: &Cli, spec_path: &Path, detail: bool, output: &str) -> Result<()> {
    let settings = settings(cli)?;
    let spec = loader::load_spec(spec_path)?;
    let ignore_fields = settings.ignore_fields.clone();
    let engine = engine(settings, open_store(cli)?);

    let order = engine.preview(&spec, &scope(cli)).await?;
    match output {
        "json" => println!("{}", serde_json::to_string_pretty(&order)?),
        "table" => formatter::print_preview(&order, &ignore_fields, detail),
        other => bail!("Unknown output format '{}'. Use: table, json", other),
    }
    Ok(())
}

async fn cmd_apply(
    cli: &Cli,
    spec_path: &Path,
    dry_run: bool,
    no_watch: bool,
    timeout: Option<u64>,
) -> Result<()> {
    let mut settings = settings(cli)?;
    settings.dry_run |= dry_run;
    if no_watch {
        settings.watch = false;
    }
    if timeout.is_some() {
        settings.timeout_secs = timeout;
    }
    let spec = loader::load_spec(spec_path)?;
    let engine = engine(settings, open_store(cli)?);

    let report = engine
        .apply(&scope(cli), &spec, interrupt_token())
        .await
        .context("Apply failed")?;
    report_outcome(&report, "Apply");
    Ok(())
}

async fn cmd_destroy(cli: &Cli, dry_run: bool, timeout: Option<u64>) -> Result<()> {
    let mut settings = settings(cli)?;
    settings.dry_run |= dry_run;
    if timeout.is_some() {
        settings.timeout_secs = timeout;
    }
    let engine = engine(settings, open_store(cli)?);

    let report = engine
        .destroy(&scope(cli), interrupt_token())
        .await
        .context("Destroy failed")?;
    report_outcome(&report, "Destroy");
    Ok(())
}

async fn cmd_release(cli: &Cli, command: &ReleaseCommands) -> Result<()> {
    let store = open_store(cli)?;
    let scope = scope(cli);

    match command {
        ReleaseCommands::Show { revision, json } => {
            let release = match revision {
                Some(revision) => ReleaseStore::get(store.as_ref(), &scope, *revision).await?,
                None => store.get_latest(&scope).await?,
            };
            let Some(release) = release else {
                println!("{}", format!("No release found for {}.", scope).dimmed());
                return Ok(());
            };
            if *json {
                println!("{}", serde_json::to_string_pretty(&release)?);
            } else {
                formatter::print_release(&release);
            }
        }
        ReleaseCommands::Unlock => {
            let engine = engine(settings(cli)?, store);
            match engine.unlock(&scope).await? {
                Some(revision) => {
                    formatter::print_success(&format!("Release {} of {} marked failed", revision, scope))
                }
                None => println!("{}", "No running release to unlock.".dimmed()),
            }
        }
    }
    Ok(())
}

async fn cmd_graph(cli: &Cli, command: &GraphCommands) -> Result<()> {
    let store = open_store(cli)?;
    let scope = scope(cli);

    match command {
        GraphCommands::Show { json } => {
            let Some(graph) = GraphStore::get(store.as_ref(), &scope).await? else {
                println!("{}", format!("No graph stored for {}.", scope).dimmed());
                return Ok(());
            };
            if *json {
                println!("{}", serde_json::to_string_pretty(&graph)?);
            } else {
                formatter::print_graph(&graph);
            }
        }
    }
    Ok(())
}
