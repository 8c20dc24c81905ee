pub mod lifecycle;

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::Scope;
use crate::models::{Spec, State};

pub use lifecycle::ReleaseHandle;

/// Lifecycle phase of a release.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Unset,
    Previewing,
    Applying,
    Destroying,
    Succeeded,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed)
    }

    /// Allowed moves: `Unset → Previewing → Applying → Succeeded|Failed`,
    /// `Unset → Destroying → Succeeded|Failed`, `Previewing → Succeeded` when
    /// there is nothing to apply, and any non-terminal phase to `Failed`.
    pub fn can_transition_to(self, next: Phase) -> bool {
        use Phase::*;
        match (self, next) {
            (Succeeded | Failed, _) => false,
            (_, Failed) => true,
            (Unset, Previewing) | (Unset, Destroying) => true,
            (Previewing, Applying) | (Previewing, Succeeded) => true,
            (Applying, Succeeded) | (Destroying, Succeeded) => true,
            _ => false,
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Phase::Unset => "unset",
            Phase::Previewing => "previewing",
            Phase::Applying => "applying",
            Phase::Destroying => "destroying",
            Phase::Succeeded => "succeeded",
            Phase::Failed => "failed",
        };
        write!(f, "{}", s)
    }
}

/// One apply or destroy attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    pub id: String,
    pub project: String,
    pub stack: String,
    pub workspace: String,
    pub revision: u64,
    pub spec: Spec,
    pub state: State,
    pub phase: Phase,
    pub create_time: DateTime<Utc>,
    pub modified_time: DateTime<Utc>,
}

impl Release {
    pub fn new(scope: &Scope, revision: u64, spec: Spec, state: State) -> Self {
        let now = Utc::now();
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            project: scope.project.clone(),
            stack: scope.stack.clone(),
            workspace: scope.workspace.clone(),
            revision,
            spec,
            state,
            phase: Phase::Unset,
            create_time: now,
            modified_time: now,
        }
    }

    pub fn scope(&self) -> Scope {
        Scope::new(&self.project, &self.stack, &self.workspace)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_path_is_monotonic() {
        assert!(Phase::Unset.can_transition_to(Phase::Previewing));
        assert!(Phase::Previewing.can_transition_to(Phase::Applying));
        assert!(Phase::Applying.can_transition_to(Phase::Succeeded));
        assert!(!Phase::Applying.can_transition_to(Phase::Previewing));
        assert!(!Phase::Unset.can_transition_to(Phase::Applying));
    }

    #[test]
    fn terminal_phases_are_final() {
        for next in [Phase::Previewing, Phase::Applying, Phase::Succeeded, Phase::Failed] {
            assert!(!Phase::Succeeded.can_transition_to(next));
            assert!(!Phase::Failed.can_transition_to(next));
        }
    }

    #[test]
    fn destroy_path_skips_preview() {
        assert!(Phase::Unset.can_transition_to(Phase::Destroying));
        assert!(Phase::Destroying.can_transition_to(Phase::Succeeded));
        assert!(!Phase::Destroying.can_transition_to(Phase::Applying));
    }
}
