//! Audit Log - JSONL security trail
//!
//! Records input rejections, safety blocks, executions and rollbacks.
//! Writing is best-effort: a failed write is logged and the pipeline moves on.
//!
//! Storage: ~/.local/state/nixmate/audit.jsonl

use crate::exec::{ExecutionResult, RollbackOutcome};
use crate::safety::SafetyVerdict;
use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use tracing::warn;
use uuid::Uuid;

/// Maximum audit log size before rotation (10 MiB)
pub const MAX_AUDIT_LOG_SIZE: u64 = 10 * 1024 * 1024;

/// Longest request text kept per entry
const MAX_SUMMARY_LEN: usize = 500;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEntryType {
    /// Text refused by the recognizer pre-check
    InputRejected,
    /// Command refused by the safety validator
    ActionBlocked,
    Execution,
    Rollback,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditResult {
    Success,
    Failure,
    Blocked,
    TimedOut,
    Cancelled,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub entry_type: AuditEntryType,
    pub result: AuditResult,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    /// Sanitised user text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    /// Validator rule that fired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
}

impl AuditEntry {
    pub fn new(entry_type: AuditEntryType, result: AuditResult) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            entry_type,
            result,
            session_id: None,
            execution_id: None,
            request_summary: None,
            command: None,
            rule: None,
            details: None,
            user: std::env::var("USER").ok(),
        }
    }

    pub fn with_session(mut self, session_id: &str) -> Self {
        self.session_id = Some(session_id.to_string());
        self
    }

    pub fn with_execution(mut self, execution_id: &str) -> Self {
        self.execution_id = Some(execution_id.to_string());
        self
    }

    /// Set request summary (sanitized)
    pub fn with_request(mut self, request: &str) -> Self {
        self.request_summary = Some(sanitize_for_audit(request));
        self
    }

    pub fn with_command(mut self, command: impl Into<String>) -> Self {
        self.command = Some(command.into());
        self
    }

    pub fn with_rule(mut self, rule: &str) -> Self {
        self.rule = Some(rule.to_string());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Append-only audit log at one path
#[derive(Debug)]
pub struct AuditLog {
    path: PathBuf,
    // Serialises rotate + append within this process
    write_lock: Mutex<()>,
}

impl AuditLog {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append an entry. Errors are logged, never returned.
    pub fn record(&self, entry: &AuditEntry) {
        if let Err(e) = self.append(entry) {
            warn!("Audit write to {} failed: {}", self.path.display(), e);
        }
    }

    fn append(&self, entry: &AuditEntry) -> std::io::Result<()> {
        let _guard = self
            .write_lock
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        self.rotate_if_needed()?;

        let json = serde_json::to_string(entry)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(0o600))?;
        }

        writeln!(file, "{}", json)?;
        Ok(())
    }

    /// Move a full log aside as audit_<timestamp>.jsonl
    fn rotate_if_needed(&self) -> std::io::Result<()> {
        let metadata = match fs::metadata(&self.path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };
        if metadata.len() < MAX_AUDIT_LOG_SIZE {
            return Ok(());
        }

        let timestamp = Utc::now().format("%Y%m%d_%H%M%S%.3f");
        let archive = self
            .path
            .with_file_name(format!("audit_{}.jsonl", timestamp));
        fs::rename(&self.path, archive)
    }

    /// Most recent entries, newest first
    pub fn recent(&self, limit: usize) -> Vec<AuditEntry> {
        let content = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(_) => return Vec::new(),
        };

        content
            .lines()
            .rev()
            .take(limit)
            .filter_map(|line| serde_json::from_str(line).ok())
            .collect()
    }

    // ------------------------------------------------------------------------
    // Typed helpers
    // ------------------------------------------------------------------------

    pub fn input_rejected(&self, session_id: &str, text: &str, reason: &str) {
        let entry = AuditEntry::new(AuditEntryType::InputRejected, AuditResult::Blocked)
            .with_session(session_id)
            .with_request(text)
            .with_details(serde_json::json!({ "reason": reason }));
        self.record(&entry);
    }

    pub fn action_blocked(&self, session_id: &str, command: &str, verdict: &SafetyVerdict) {
        let mut entry = AuditEntry::new(AuditEntryType::ActionBlocked, AuditResult::Blocked)
            .with_session(session_id)
            .with_command(command)
            .with_details(serde_json::json!({
                "reason": verdict.reason,
                "suggestion": verdict.suggestion,
            }));
        if let Some(rule) = &verdict.rule {
            entry = entry.with_rule(rule);
        }
        self.record(&entry);
    }

    pub fn execution(&self, session_id: &str, result: &ExecutionResult) {
        let outcome = match result.state {
            crate::exec::ExecutionState::Completed => AuditResult::Success,
            crate::exec::ExecutionState::TimedOut => AuditResult::TimedOut,
            crate::exec::ExecutionState::Cancelled => AuditResult::Cancelled,
            _ => AuditResult::Failure,
        };
        let entry = AuditEntry::new(AuditEntryType::Execution, outcome)
            .with_session(session_id)
            .with_execution(&result.execution_id)
            .with_command(result.command_text.clone())
            .with_details(serde_json::json!({
                "exit_code": result.exit_code,
                "duration_ms": result.duration_ms,
                "timeout_ms": result.timeout_ms,
                "elevated_with": result.elevated_with,
                "dry_run": result.dry_run,
                "error": result.error,
            }));
        self.record(&entry);

        if let Some(rollback) = &result.rollback {
            self.rollback(session_id, &result.execution_id, rollback, result.rollback_performed);
        }
    }

    pub fn rollback(&self, session_id: &str, execution_id: &str, outcome: &RollbackOutcome, performed: bool) {
        let result = match (performed, outcome.success) {
            (false, _) => AuditResult::Blocked,
            (true, true) => AuditResult::Success,
            (true, false) => AuditResult::Failure,
        };
        let entry = AuditEntry::new(AuditEntryType::Rollback, result)
            .with_session(session_id)
            .with_execution(execution_id)
            .with_command(outcome.command_text.clone());
        self.record(&entry);
    }
}

static SECRET_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"(?i)(password|passwd|pwd)\s*[=:]\s*\S+", "[REDACTED_PASSWORD]"),
        (r"(?i)(api[_-]?key|apikey)\s*[=:]\s*\S+", "[REDACTED_API_KEY]"),
        (r"(?i)(secret|token)\s*[=:]\s*\S+", "[REDACTED_SECRET]"),
        (r"(?i)(bearer)\s+\S+", "Bearer [REDACTED]"),
    ]
    .iter()
    .filter_map(|(p, r)| Regex::new(p).ok().map(|re| (re, *r)))
    .collect()
});

/// Sanitize text for audit logging (remove potential secrets)
pub fn sanitize_for_audit(text: &str) -> String {
    let mut sanitized = text.to_string();
    for (re, replacement) in SECRET_PATTERNS.iter() {
        sanitized = re.replace_all(&sanitized, *replacement).to_string();
    }

    if sanitized.chars().count() > MAX_SUMMARY_LEN {
        let cut: String = sanitized.chars().take(MAX_SUMMARY_LEN).collect();
        sanitized = format!("{}... [truncated]", cut);
    }
    sanitized
}
