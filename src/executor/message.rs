use std::fmt;

/// Outcome carried by a progress message. `Pending` marks the start of work
/// on a resource; the others are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpResult {
    Pending,
    Success,
    Skip,
    Failed,
}

impl OpResult {
    pub fn is_terminal(self) -> bool {
        !matches!(self, OpResult::Pending)
    }
}

impl fmt::Display for OpResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OpResult::Pending => "",
            OpResult::Success => "Success",
            OpResult::Skip => "Skip",
            OpResult::Failed => "Failed",
        };
        write!(f, "{}", s)
    }
}

/// A per-resource progress event sent from the executor to the reporter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub resource_id: String,
    pub op_result: OpResult,
    pub op_err: Option<String>,
}

impl Message {
    fn new(resource_id: &str, op_result: OpResult) -> Self {
        Self {
            resource_id: resource_id.to_string(),
            op_result,
            op_err: None,
        }
    }

    pub fn pending(resource_id: &str) -> Self {
        Self::new(resource_id, OpResult::Pending)
    }

    pub fn success(resource_id: &str) -> Self {
        Self::new(resource_id, OpResult::Success)
    }

    pub fn skip(resource_id: &str) -> Self {
        Self::new(resource_id, OpResult::Skip)
    }

    pub fn failed(resource_id: &str, err: impl Into<String>) -> Self {
        Self {
            op_err: Some(err.into()),
            ..Self::new(resource_id, OpResult::Failed)
        }
    }
}
