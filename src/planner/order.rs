use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use super::diff;
use crate::models::Resource;

/// What the executor will do with a resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ActionType {
    Create,
    Update,
    Delete,
    UnChanged,
    Undefined,
}

impl ActionType {
    pub fn is_change(self) -> bool {
        matches!(self, ActionType::Create | ActionType::Update | ActionType::Delete)
    }
}

impl fmt::Display for ActionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ActionType::Create => "Create",
            ActionType::Update => "Update",
            ActionType::Delete => "Delete",
            ActionType::UnChanged => "UnChanged",
            ActionType::Undefined => "Undefined",
        };
        write!(f, "{}", s)
    }
}

/// A planned change to one resource.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeStep {
    pub id: String,
    pub action: ActionType,
    /// Recorded resource, absent for creates.
    pub from: Option<Resource>,
    /// Desired resource, absent for deletes.
    pub to: Option<Resource>,
}

impl ChangeStep {
    pub fn new(
        id: impl Into<String>,
        action: ActionType,
        from: Option<Resource>,
        to: Option<Resource>,
    ) -> Self {
        Self {
            id: id.into(),
            action,
            from,
            to,
        }
    }

    /// The resource to act on: desired if present, otherwise recorded.
    pub fn resource(&self) -> Option<&Resource> {
        self.to.as_ref().or(self.from.as_ref())
    }

    /// Unified diff between the recorded and desired resource, with
    /// `ignore_fields` masked out of both sides. Empty when they match.
    pub fn diff(&self, ignore_fields: &[String]) -> String {
        diff::unified_diff(self.from.as_ref(), self.to.as_ref(), ignore_fields)
    }
}

/// The ordered set of changes produced by preview.
///
/// `step_keys` is the execution order; `change_steps` holds exactly one step
/// per key.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeOrder {
    pub step_keys: Vec<String>,
    pub change_steps: BTreeMap<String, ChangeStep>,
}

impl ChangeOrder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a step. Returns false and leaves the order untouched if a step
    /// with the same id is already present.
    pub fn push(&mut self, step: ChangeStep) -> bool {
        if self.change_steps.contains_key(&step.id) {
            return false;
        }
        self.step_keys.push(step.id.clone());
        self.change_steps.insert(step.id.clone(), step);
        true
    }

    pub fn get(&self, id: &str) -> Option<&ChangeStep> {
        self.change_steps.get(id)
    }

    pub fn len(&self) -> usize {
        self.step_keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.step_keys.is_empty()
    }

    /// Steps in execution order.
    pub fn steps(&self) -> impl Iterator<Item = &ChangeStep> {
        self.step_keys
            .iter()
            .filter_map(|key| self.change_steps.get(key))
    }

    pub fn has_changes(&self) -> bool {
        self.steps().any(|s| s.action.is_change())
    }

    pub fn summary(&self) -> ChangeSummary {
        let mut summary = ChangeSummary::default();
        for step in self.steps() {
            match step.action {
                ActionType::Create => summary.create += 1,
                ActionType::Update => summary.update += 1,
                ActionType::Delete => summary.delete += 1,
                ActionType::UnChanged => summary.unchanged += 1,
                ActionType::Undefined => summary.undefined += 1,
            }
        }
        summary
    }
}

/// Per-action step counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ChangeSummary {
    pub create: usize,
    pub update: usize,
    pub delete: usize,
    pub unchanged: usize,
    pub undefined: usize,
}

impl ChangeSummary {
    pub fn changes(&self) -> usize {
        self.create + self.update + self.delete
    }
}

impl fmt::Display for ChangeSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Plan: {} to create, {} to update, {} to delete, {} unchanged.",
            self.create, self.update, self.delete, self.unchanged
        )
    }
}
