//! Error types for Nixmate.
//!
//! Variants follow the user-facing taxonomy: input-rejected, build-failed,
//! validation-failed, execution-failed, timeout, cancelled.

use crate::types::{EntityKind, IntentKind};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why the command builder produced no command
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    #[error("{intent} needs a {} but none was given", .entity.as_str())]
    MissingEntity {
        intent: IntentKind,
        entity: EntityKind,
    },

    #[error("there is no previous request to repeat")]
    NothingToRepeat,

    #[error("{0} requests cannot be turned into a command")]
    Unsupported(IntentKind),
}

#[derive(Error, Debug)]
pub enum NixmateError {
    #[error("Input rejected: {reason}")]
    InputRejected { reason: String },

    #[error("Could not build a command: {0}")]
    BuildFailed(#[from] BuildError),

    #[error("Blocked by safety validator: {reason}")]
    ValidationFailed {
        reason: String,
        suggestion: Option<String>,
    },

    #[error("Command failed with exit code {exit_code:?}: {message}")]
    ExecutionFailed {
        exit_code: Option<i32>,
        message: String,
    },

    #[error("Command timed out after {budget_ms}ms")]
    Timeout { progressing: bool, budget_ms: u64 },

    #[error("Cancelled")]
    Cancelled,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Serialisable error tag carried by responses
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InputRejected,
    BuildFailed,
    ValidationFailed,
    ExecutionFailed,
    Timeout,
    Cancelled,
    Internal,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::InputRejected => "input_rejected",
            ErrorKind::BuildFailed => "build_failed",
            ErrorKind::ValidationFailed => "validation_failed",
            ErrorKind::ExecutionFailed => "execution_failed",
            ErrorKind::Timeout => "timeout",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Internal => "internal",
        }
    }

    /// Only failed or timed-out executions attempt a rollback
    pub fn attempts_rollback(&self) -> bool {
        matches!(self, ErrorKind::ExecutionFailed | ErrorKind::Timeout)
    }
}

impl NixmateError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NixmateError::InputRejected { .. } => ErrorKind::InputRejected,
            NixmateError::BuildFailed(_) => ErrorKind::BuildFailed,
            NixmateError::ValidationFailed { .. } => ErrorKind::ValidationFailed,
            NixmateError::ExecutionFailed { .. } => ErrorKind::ExecutionFailed,
            NixmateError::Timeout { .. } => ErrorKind::Timeout,
            NixmateError::Cancelled => ErrorKind::Cancelled,
            NixmateError::Config(_)
            | NixmateError::Io(_)
            | NixmateError::Json(_)
            | NixmateError::Toml(_) => ErrorKind::Internal,
        }
    }

    /// Message shown to the user. Never contains raw process output.
    pub fn user_message(&self) -> String {
        match self {
            NixmateError::InputRejected { .. } => {
                "I can't act on that request because it contains characters that could run \
                 other commands. Please describe what you want in plain words."
                    .to_string()
            }
            NixmateError::BuildFailed(BuildError::MissingEntity { entity, .. }) => {
                format!("I need to know which {} you mean.", entity.as_str())
            }
            NixmateError::BuildFailed(BuildError::NothingToRepeat) => {
                "There is nothing to repeat yet.".to_string()
            }
            NixmateError::BuildFailed(BuildError::Unsupported(_)) => {
                "I didn't understand that. Try something like \"install firefox\" or \
                 \"restart nginx\"."
                    .to_string()
            }
            NixmateError::ValidationFailed { reason, suggestion } => match suggestion {
                Some(s) => format!("That command was blocked for safety: {}. {}", reason, s),
                None => format!("That command was blocked for safety: {}.", reason),
            },
            NixmateError::ExecutionFailed { .. } => {
                "The command did not finish successfully.".to_string()
            }
            NixmateError::Timeout { progressing: true, .. } => {
                "The command was still making progress but ran out of time.".to_string()
            }
            NixmateError::Timeout { progressing: false, .. } => {
                "The command stopped making progress and was stopped.".to_string()
            }
            NixmateError::Cancelled => "Cancelled.".to_string(),
            NixmateError::Config(_)
            | NixmateError::Io(_)
            | NixmateError::Json(_)
            | NixmateError::Toml(_) => "Something went wrong inside nixmate.".to_string(),
        }
    }
}
