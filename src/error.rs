use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Result alias used by the engine's public operations.
pub type Result<T, E = EngineError> = std::result::Result<T, E>;

/// Errors surfaced by preview, apply, destroy and watch operations.
#[derive(Debug, Error)]
pub enum EngineError {
    /// Missing or invalid input: empty spec, unresolved secret references,
    /// malformed resource ids.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Change computation or dependency resolution failed.
    #[error("planning failed: {message}")]
    Planning {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// A single resource's runtime call failed.
    #[error("resource '{id}' failed: {source:#}")]
    Execution {
        id: String,
        #[source]
        source: anyhow::Error,
    },

    /// Every execution error collected during one apply pass.
    #[error("{} resource(s) failed: {}", .0.len(), JoinDisplay(.0))]
    AggregateExecution(Vec<EngineError>),

    #[error("{what} timed out after {}", humanize(.after))]
    Timeout { what: String, after: Duration },

    #[error("operation interrupted")]
    Interrupted,

    /// Release or graph persistence failed.
    #[error("storage error while {context}: {source:#}")]
    Storage {
        context: String,
        #[source]
        source: anyhow::Error,
    },

    /// A loaded graph failed structural validation.
    #[error("graph is inconsistent at '{id}': {reason}")]
    GraphConsistency { id: String, reason: String },

    /// An operative error joined with a later one (typically a storage
    /// failure while finalizing the release), so neither cause is lost.
    #[error("{}", JoinDisplay(.0))]
    Joined(Vec<EngineError>),
}

impl EngineError {
    pub fn planning(message: impl Into<String>) -> Self {
        EngineError::Planning {
            message: message.into(),
            source: None,
        }
    }

    pub fn planning_with(message: impl Into<String>, source: anyhow::Error) -> Self {
        EngineError::Planning {
            message: message.into(),
            source: Some(source),
        }
    }

    pub fn execution(id: impl Into<String>, source: anyhow::Error) -> Self {
        EngineError::Execution {
            id: id.into(),
            source,
        }
    }

    pub fn storage(context: impl Into<String>, source: anyhow::Error) -> Self {
        EngineError::Storage {
            context: context.into(),
            source,
        }
    }

    pub fn timeout(what: impl Into<String>, after: Duration) -> Self {
        EngineError::Timeout {
            what: what.into(),
            after,
        }
    }

    /// Join `self` with `other`, flattening nested joins.
    pub fn join(self, other: EngineError) -> EngineError {
        let mut errors = match self {
            EngineError::Joined(errors) => errors,
            e => vec![e],
        };
        match other {
            EngineError::Joined(more) => errors.extend(more),
            e => errors.push(e),
        }
        EngineError::Joined(errors)
    }

    /// Join an optional prior error with a new one.
    pub fn join_opt(prior: Option<EngineError>, other: EngineError) -> EngineError {
        match prior {
            Some(prior) => prior.join(other),
            None => other,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Timeout { .. })
    }

    pub fn is_interrupted(&self) -> bool {
        matches!(self, EngineError::Interrupted)
    }

    /// Whether this error, or any error joined into it, matches `pred`.
    pub fn any(&self, pred: &dyn Fn(&EngineError) -> bool) -> bool {
        match self {
            EngineError::Joined(errors) | EngineError::AggregateExecution(errors) => {
                pred(self) || errors.iter().any(|e| e.any(pred))
            }
            e => pred(e),
        }
    }
}

struct JoinDisplay<'a>(&'a [EngineError]);

impl fmt::Display for JoinDisplay<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{}", err)?;
        }
        Ok(())
    }
}

fn humanize(d: &Duration) -> String {
    let secs = d.as_secs();
    if secs == 0 {
        format!("{}ms", d.as_millis())
    } else if secs < 60 {
        format!("{}s", secs)
    } else if secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}m{}s", secs / 60, secs % 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn join_flattens_nested_errors() {
        let a = EngineError::Interrupted;
        let b = EngineError::Validation("x".into());
        let c = EngineError::timeout("apply", Duration::from_secs(90));
        let joined = a.join(b).join(c);
        match &joined {
            EngineError::Joined(errors) => assert_eq!(errors.len(), 3),
            other => panic!("unexpected {other:?}"),
        }
        assert!(joined.any(&|e| e.is_timeout()));
        assert_eq!(
            joined.to_string(),
            "operation interrupted; validation failed: x; apply timed out after 1m30s"
        );
    }

    #[test]
    fn aggregate_lists_each_failure() {
        let err = EngineError::AggregateExecution(vec![
            EngineError::execution("a", anyhow::anyhow!("boom")),
            EngineError::execution("b", anyhow::anyhow!("bang")),
        ]);
        let text = err.to_string();
        assert!(text.starts_with("2 resource(s) failed"));
        assert!(text.contains("resource 'a' failed: boom"));
        assert!(text.contains("resource 'b' failed: bang"));
    }
}
