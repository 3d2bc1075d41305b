use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::core::ids::NodeId;

/// Machine-readable classification of engine faults
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// A task was configured without any action
    MissingAction,
    /// A task names an action that cannot be invoked
    InvalidAction,
    /// A chain's stage configuration is not a well-formed sequence
    InvalidStageList,
    /// A chain saw a stage completion from something other than its head
    StageIntegrityViolation,
    /// A task's action did not complete before its timeout
    TaskTimedOut,
}

impl ErrorKind {
    /// Stable error code, kept for compatibility with existing consumers
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingAction => "EUNDEFINEDACTION",
            Self::InvalidAction => "EINVALIDACTION",
            Self::InvalidStageList => "EINVALIDSTAGES",
            Self::StageIntegrityViolation => "EINVALIDPARALLELIZEDTASKS",
            Self::TaskTimedOut => "ETASKTIMEOUTED",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Configuration and integrity faults raised by the engine itself.
///
/// These travel on the `error` channel of a node. Runtime action failures are
/// not engine errors; see [`ActionError`].
#[derive(Debug, Clone, Error)]
pub enum EngineError {
    #[error("Task {node_id}: action is undefined")]
    MissingAction { node_id: NodeId },

    #[error("Task {node_id}: action '{action}' is not a registered action")]
    InvalidAction { node_id: NodeId, action: String },

    #[error("Chain {node_id}: {reason}")]
    InvalidStageList { node_id: NodeId, reason: String },

    #[error("Chain {node_id}: stage {completed} completed but {expected} was running (a task MUST complete only once)")]
    StageIntegrityViolation {
        node_id: NodeId,
        expected: String,
        completed: NodeId,
    },

    #[error("Configuration error: {message}")]
    Config { message: String },
}

impl EngineError {
    pub fn missing_action(node_id: &NodeId) -> Self {
        Self::MissingAction {
            node_id: node_id.clone(),
        }
    }

    pub fn invalid_action(node_id: &NodeId, action: impl Into<String>) -> Self {
        Self::InvalidAction {
            node_id: node_id.clone(),
            action: action.into(),
        }
    }

    pub fn invalid_stage_list(node_id: &NodeId, reason: impl Into<String>) -> Self {
        Self::InvalidStageList {
            node_id: node_id.clone(),
            reason: reason.into(),
        }
    }

    /// `expected` is the running stage, `None` once the chain has no stage left
    pub fn stage_integrity_violation(node_id: &NodeId, expected: Option<&NodeId>, completed: &NodeId) -> Self {
        Self::StageIntegrityViolation {
            node_id: node_id.clone(),
            expected: expected.map_or_else(|| "no stage".to_string(), NodeId::to_string),
            completed: completed.clone(),
        }
    }

    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Error kind, if this fault belongs to the engine taxonomy
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::MissingAction { .. } => Some(ErrorKind::MissingAction),
            Self::InvalidAction { .. } => Some(ErrorKind::InvalidAction),
            Self::InvalidStageList { .. } => Some(ErrorKind::InvalidStageList),
            Self::StageIntegrityViolation { .. } => Some(ErrorKind::StageIntegrityViolation),
            Self::Config { .. } => None,
        }
    }

    /// Node the fault was observed on
    pub fn node_id(&self) -> Option<&NodeId> {
        match self {
            Self::MissingAction { node_id }
            | Self::InvalidAction { node_id, .. }
            | Self::InvalidStageList { node_id, .. }
            | Self::StageIntegrityViolation { node_id, .. } => Some(node_id),
            Self::Config { .. } => None,
        }
    }

    /// Integrity breaches indicate an engine or double-completion bug and
    /// are always reported, whatever the verbosity.
    pub fn is_integrity_violation(&self) -> bool {
        matches!(self, Self::StageIntegrityViolation { .. })
    }
}

impl From<serde_yaml::Error> for EngineError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::config(err.to_string())
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::config(err.to_string())
    }
}

/// Failure reported by an action, or synthesized by the task timeout
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ActionError {
    #[error("{message}")]
    Failed {
        message: String,
        code: Option<String>,
    },

    #[error("Task timed out after {timeout_ms}ms")]
    TimedOut { timeout_ms: u64 },
}

impl ActionError {
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            code: None,
        }
    }

    pub fn with_code(message: impl Into<String>, code: impl Into<String>) -> Self {
        Self::Failed {
            message: message.into(),
            code: Some(code.into()),
        }
    }

    pub fn timed_out(timeout_ms: u64) -> Self {
        Self::TimedOut { timeout_ms }
    }

    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            Self::TimedOut { .. } => Some(ErrorKind::TaskTimedOut),
            Self::Failed { .. } => None,
        }
    }

    /// Error code: the kind's code for engine-generated errors, otherwise
    /// whatever the action supplied
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::TimedOut { .. } => Some(ErrorKind::TaskTimedOut.code()),
            Self::Failed { code, .. } => code.as_deref(),
        }
    }
}

impl From<anyhow::Error> for ActionError {
    fn from(err: anyhow::Error) -> Self {
        Self::failed(err.to_string())
    }
}

/// Result type alias for convenience
pub type Result<T> = std::result::Result<T, EngineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        let id = NodeId::from("0.s0.t1");
        assert_eq!(
            EngineError::missing_action(&id).kind(),
            Some(ErrorKind::MissingAction)
        );
        assert_eq!(
            EngineError::invalid_action(&id, "ping").kind(),
            Some(ErrorKind::InvalidAction)
        );
        assert_eq!(EngineError::config("bad yaml").kind(), None);
        assert_eq!(
            EngineError::invalid_action(&id, "ping").node_id(),
            Some(&id)
        );
    }

    #[test]
    fn test_action_error_codes() {
        let err = ActionError::timed_out(10);
        assert_eq!(err.kind(), Some(ErrorKind::TaskTimedOut));
        assert_eq!(err.code(), Some("ETASKTIMEOUTED"));
        assert_eq!(err.to_string(), "Task timed out after 10ms");

        let err = ActionError::with_code("connection refused", "ECONNREFUSED");
        assert_eq!(err.kind(), None);
        assert_eq!(err.code(), Some("ECONNREFUSED"));
    }

    #[test]
    fn test_integrity_violation_message() {
        let err = EngineError::StageIntegrityViolation {
            node_id: NodeId::from("3"),
            expected: "3.s0".to_string(),
            completed: NodeId::from("3.s1"),
        };
        assert!(err.is_integrity_violation());
        assert_eq!(err.kind().map(|k| k.code()), Some("EINVALIDPARALLELIZEDTASKS"));
        assert!(err.to_string().contains("3.s1"));
    }
}
