//! Execution Engine - spawns, bounds, monitors and rolls back a command
//!
//! One OS process per command, supervised by a single monitor loop:
//! `starting -> running -> {completed | failed | timed_out | cancelled}`.
//! The safety validator runs immediately before every spawn, rollbacks
//! included.

mod explain;
mod runner;

pub use explain::explain;
pub use runner::{terminate_pid, Executor};

use crate::config::ExecutionConfig;
use crate::error::{ErrorKind, NixmateError};
use crate::progress::{ProgressEvent, ProgressSnapshot};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Time allowed for a process to exit after SIGTERM before SIGKILL
pub const TERM_GRACE: Duration = Duration::from_secs(2);

/// Budget for a compensating command
pub const ROLLBACK_BUDGET: Duration = Duration::from_secs(5 * 60);

// ============================================================================
// State
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    Starting,
    Running,
    Completed,
    Failed,
    TimedOut,
    Cancelled,
}

impl ExecutionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Starting => "starting",
            ExecutionState::Running => "running",
            ExecutionState::Completed => "completed",
            ExecutionState::Failed => "failed",
            ExecutionState::TimedOut => "timed_out",
            ExecutionState::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ExecutionState::Starting | ExecutionState::Running)
    }
}

/// What happened when the compensating command ran
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RollbackOutcome {
    pub command_text: String,
    pub description: String,
    pub success: bool,
    /// Output of the rollback, or why it did not run
    pub output: String,
}

/// Result of one execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub execution_id: String,
    pub command_text: String,
    /// Wrapper used for elevation (sudo/doas), if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub elevated_with: Option<String>,
    pub state: ExecutionState,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    pub output: String,
    pub stderr: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    /// Short internal reason, never shown to users outside debug mode
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timeout_ms: u64,
    pub progress: ProgressSnapshot,
    pub rollback_performed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackOutcome>,
    #[serde(default)]
    pub dry_run: bool,
}

impl ExecutionResult {
    /// Taxonomy error for a failed result
    pub fn to_error(&self) -> Option<NixmateError> {
        match self.state {
            ExecutionState::Failed => Some(NixmateError::ExecutionFailed {
                exit_code: self.exit_code,
                message: self.error.clone().unwrap_or_default(),
            }),
            ExecutionState::TimedOut => Some(NixmateError::Timeout {
                progressing: self.progress.progress_lines > 0 && !self.progress.stuck,
                budget_ms: self.timeout_ms,
            }),
            ExecutionState::Cancelled => Some(NixmateError::Cancelled),
            _ => None,
        }
    }

    /// stdout followed by stderr, for debug consumers
    pub fn raw_output(&self) -> String {
        match (self.output.is_empty(), self.stderr.is_empty()) {
            (_, true) => self.output.clone(),
            (true, false) => self.stderr.clone(),
            (false, false) => format!("{}\n{}", self.output.trim_end(), self.stderr),
        }
    }
}

// ============================================================================
// Limits and options
// ============================================================================

/// Timers and buffer bounds for one execution
#[derive(Debug, Clone)]
pub struct ExecutionLimits {
    /// Hard ceiling from the timeout estimator
    pub budget: Duration,
    /// No recognised progress for this long flags the process as stuck
    pub inactivity: Duration,
    /// The ceiling is extended only if progress was seen this recently
    pub grace: Duration,
    /// Added to the ceiling per extension
    pub extension: Duration,
    pub max_buffer_bytes: usize,
    pub kill_when_stuck: bool,
    /// Monitor wake-up interval
    pub tick: Duration,
    pub term_grace: Duration,
    pub rollback_budget: Duration,
}

impl ExecutionLimits {
    /// Limits for a budget: inactivity is the configured window or a quarter
    /// of the budget, whichever is smaller.
    pub fn new(budget: Duration, config: &ExecutionConfig) -> Self {
        let configured = Duration::from_secs(config.inactivity_timeout_secs.max(1));
        let grace = Duration::from_secs(config.progress_grace_secs.max(1));
        Self {
            budget,
            inactivity: configured.min(budget / 4),
            grace,
            extension: grace,
            max_buffer_bytes: config.max_buffer_bytes.max(1),
            kill_when_stuck: config.kill_when_stuck,
            tick: Duration::from_millis(500),
            term_grace: TERM_GRACE,
            rollback_budget: ROLLBACK_BUDGET,
        }
    }
}

/// Cancellation requested by the caller
#[derive(Debug, Clone)]
pub struct CancelHandle(watch::Sender<bool>);

impl CancelHandle {
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

/// Receiving side of a `CancelHandle`
#[derive(Debug, Clone)]
pub struct CancelSignal(watch::Receiver<bool>);

impl CancelSignal {
    pub fn is_cancelled(&self) -> bool {
        *self.0.borrow()
    }

    /// Resolves once cancellation is requested; never if the handle is gone
    pub async fn cancelled(&mut self) {
        loop {
            if *self.0.borrow() {
                return;
            }
            if self.0.changed().await.is_err() {
                std::future::pending::<()>().await;
            }
        }
    }
}

pub fn cancel_pair() -> (CancelHandle, CancelSignal) {
    let (tx, rx) = watch::channel(false);
    (CancelHandle(tx), CancelSignal(rx))
}

/// Per-call options
#[derive(Debug, Default)]
pub struct RunOptions {
    pub dry_run: bool,
    pub progress: Option<mpsc::Sender<ProgressEvent>>,
    pub cancel: Option<CancelSignal>,
}

impl RunOptions {
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_progress(mut self, tx: mpsc::Sender<ProgressEvent>) -> Self {
        self.progress = Some(tx);
        self
    }

    pub fn with_cancel(mut self, cancel: CancelSignal) -> Self {
        self.cancel = Some(cancel);
        self
    }
}
