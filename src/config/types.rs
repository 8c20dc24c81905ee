use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Settings controlling preview, apply and watch behavior.
///
/// Loaded from a YAML file; every field has a default so an empty file (or
/// no file at all) yields a usable configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineSettings {
    /// Maximum number of resources applied concurrently.
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
    /// Global deadline for one apply/destroy, in seconds. `None` means no deadline.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
    /// Watch applied resources until they are reconciled.
    #[serde(default = "default_watch")]
    pub watch: bool,
    /// Per-resource watch deadline, in seconds.
    #[serde(default = "default_watch_timeout_secs")]
    pub watch_timeout_secs: u64,
    /// Grace period for exit cleanup (e.g. tearing down a port-forward), in seconds.
    #[serde(default = "default_cleanup_grace_secs")]
    pub cleanup_grace_secs: u64,
    /// Report every change as successful without calling any runtime.
    #[serde(default)]
    pub dry_run: bool,
    /// Hide spinners and tables; tracing output is unaffected.
    #[serde(default)]
    pub quiet: bool,
    /// Dotted attribute paths ignored when comparing desired and recorded resources.
    #[serde(default)]
    pub ignore_fields: Vec<String>,
    /// Start a port-forward after a successful apply.
    #[serde(default)]
    pub port_forward: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            parallelism: default_parallelism(),
            timeout_secs: None,
            watch: default_watch(),
            watch_timeout_secs: default_watch_timeout_secs(),
            cleanup_grace_secs: default_cleanup_grace_secs(),
            dry_run: false,
            quiet: false,
            ignore_fields: vec![],
            port_forward: false,
        }
    }
}

impl EngineSettings {
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    pub fn watch_timeout(&self) -> Duration {
        Duration::from_secs(self.watch_timeout_secs)
    }

    pub fn cleanup_grace(&self) -> Duration {
        Duration::from_secs(self.cleanup_grace_secs)
    }

    /// Parallelism clamped to at least one worker.
    pub fn workers(&self) -> usize {
        self.parallelism.max(1)
    }
}

fn default_parallelism() -> usize {
    10
}

fn default_watch() -> bool {
    true
}

fn default_watch_timeout_secs() -> u64 {
    60 * 60
}

fn default_cleanup_grace_secs() -> u64 {
    5
}

/// Identifies the release/graph records an operation reads and writes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Scope {
    pub project: String,
    pub stack: String,
    pub workspace: String,
}

impl Scope {
    pub fn new(project: &str, stack: &str, workspace: &str) -> Self {
        Self {
            project: project.to_string(),
            stack: stack.to_string(),
            workspace: workspace.to_string(),
        }
    }
}

impl std::fmt::Display for Scope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}@{}", self.project, self.stack, self.workspace)
    }
}
