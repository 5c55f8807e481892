//! Request pipeline: text -> Intent -> Command -> validated execution.
//!
//! `Assistant` owns the stateless stages plus the session store and drives
//! one turn at a time. Transport, authentication and persistence belong to
//! the caller; the only outputs are `Outcome` values and progress events.

use crate::ambiguity::{mark_ambiguous, AmbiguityResolver, ClarificationAnswer, ClarificationRequest};
use crate::audit::AuditLog;
use crate::cache::RecognitionCache;
use crate::catalog::EntityCatalog;
use crate::command::{Command, CommandBuilder};
use crate::config::NixmateConfig;
use crate::context::{ContextResolver, SessionStore};
use crate::error::{BuildError, ErrorKind, NixmateError};
use crate::exec::{self, CancelSignal, ExecutionLimits, ExecutionResult, Executor};
use crate::intent::IntentRecognizer;
use crate::progress::ProgressEvent;
use crate::safety::{SafetyValidator, SafetyVerdict};
use crate::system::SystemSnapshot;
use crate::timeout::{self, TimeoutOptions, TimeoutPlan};
use crate::types::{Intent, IntentKind, AUTO_ACT_THRESHOLD, CONFIRM_THRESHOLD};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Session used when the caller supplies none
pub const DEFAULT_SESSION: &str = "default";

// ============================================================================
// Request / response values
// ============================================================================

/// One turn of user input
#[derive(Debug, Clone)]
pub struct Request {
    pub text: String,
    pub session_id: String,
    pub dry_run: bool,
    /// Skip the confirmation step for medium-confidence or elevated commands
    pub auto_confirm: bool,
    pub snapshot: SystemSnapshot,
    pub progress: Option<mpsc::Sender<ProgressEvent>>,
    pub cancel: Option<CancelSignal>,
}

impl Request {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            session_id: DEFAULT_SESSION.to_string(),
            dry_run: false,
            auto_confirm: false,
            snapshot: SystemSnapshot::default(),
            progress: None,
            cancel: None,
        }
    }

    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = session_id.into();
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_auto_confirm(mut self, auto_confirm: bool) -> Self {
        self.auto_confirm = auto_confirm;
        self
    }

    pub fn with_snapshot(mut self, snapshot: SystemSnapshot) -> Self {
        self.snapshot = snapshot;
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

    /// Execution-side options of this request, for a later `run_intent`
    pub fn options(&self) -> TurnOptions {
        TurnOptions {
            dry_run: self.dry_run,
            snapshot: self.snapshot.clone(),
            progress: self.progress.clone(),
            cancel: self.cancel.clone(),
        }
    }
}

/// How a confirmed intent is executed
#[derive(Debug, Clone, Default)]
pub struct TurnOptions {
    pub dry_run: bool,
    pub snapshot: SystemSnapshot,
    pub progress: Option<mpsc::Sender<ProgressEvent>>,
    pub cancel: Option<CancelSignal>,
}

/// Error part of a response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseError {
    pub kind: ErrorKind,
    pub message: String,
    /// Underlying error text, debug mode only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
}

/// Result of one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    pub success: bool,
    pub natural_language_response: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub executed_command_text: Option<String>,
    /// stdout + stderr, debug mode only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub raw_output: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ResponseError>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_id: Option<String>,
    pub duration_ms: u64,
    pub rollback_performed: bool,
    #[serde(default)]
    pub dry_run: bool,
}

impl Response {
    /// A reply that ran nothing
    pub fn message(success: bool, text: impl Into<String>) -> Self {
        Self {
            success,
            natural_language_response: text.into(),
            executed_command_text: None,
            raw_output: None,
            error: None,
            execution_id: None,
            duration_ms: 0,
            rollback_performed: false,
            dry_run: false,
        }
    }

    pub fn from_error(err: &NixmateError, debug: bool) -> Self {
        let mut response = Self::message(false, err.user_message());
        response.error = Some(ResponseError {
            kind: err.kind(),
            message: err.user_message(),
            detail: debug.then(|| err.to_string()),
        });
        response
    }

    fn from_execution(command: &Command, result: &ExecutionResult, debug: bool) -> Self {
        let error = result.to_error().map(|e| ResponseError {
            kind: e.kind(),
            message: e.user_message(),
            detail: if debug { result.error.clone() } else { None },
        });
        Self {
            success: result.success,
            natural_language_response: exec::explain(command, result),
            executed_command_text: Some(result.command_text.clone()),
            raw_output: debug.then(|| result.raw_output()),
            error,
            execution_id: Some(result.execution_id.clone()),
            duration_ms: result.duration_ms,
            rollback_performed: result.rollback_performed,
            dry_run: result.dry_run,
        }
    }
}

/// Why a command needs the user's go-ahead
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConfirmReason {
    LowConfidence,
    Elevation,
}

/// A command waiting for a yes/no
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfirmationRequest {
    pub intent: Intent,
    pub command_text: String,
    pub description: String,
    pub requires_elevation: bool,
    pub confidence: f32,
    pub reason: ConfirmReason,
    pub timeout_ms: u64,
}

impl ConfirmationRequest {
    pub fn question(&self) -> String {
        match self.reason {
            ConfirmReason::LowConfidence => format!(
                "I think you want to {}. Run `{}`?",
                lower_first(&self.description),
                self.command_text
            ),
            ConfirmReason::Elevation => format!(
                "This needs administrator rights: `{}`. Continue?",
                self.command_text
            ),
        }
    }
}

/// What one turn produced
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "payload", rename_all = "snake_case")]
pub enum Outcome {
    /// Dangerous or unparseable input; nothing was built or run
    Rejected(Response),
    /// Several readings are plausible; the next turn picks one
    Clarify(ClarificationRequest),
    /// Call `run_intent` with the carried intent once the user agrees
    Confirm(ConfirmationRequest),
    Completed(Response),
}

impl Outcome {
    pub fn response(&self) -> Option<&Response> {
        match self {
            Outcome::Rejected(r) | Outcome::Completed(r) => Some(r),
            Outcome::Clarify(_) | Outcome::Confirm(_) => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Outcome::Rejected(_) => "rejected",
            Outcome::Clarify(_) => "clarify",
            Outcome::Confirm(_) => "confirm",
            Outcome::Completed(_) => "completed",
        }
    }
}

// ============================================================================
// Assistant
// ============================================================================

pub struct Assistant {
    config: NixmateConfig,
    recognizer: IntentRecognizer,
    cache: RecognitionCache,
    resolver: ContextResolver,
    ambiguity: AmbiguityResolver,
    builder: CommandBuilder,
    executor: Executor,
    audit: Option<AuditLog>,
    sessions: SessionStore,
}

impl Assistant {
    /// Built-in catalog and the default safety policy
    pub fn new(config: NixmateConfig) -> Self {
        Self::with_validator(config, SafetyValidator::new())
    }

    pub fn with_validator(config: NixmateConfig, validator: SafetyValidator) -> Self {
        let cache = if config.cache.enabled {
            RecognitionCache::new(config.cache.capacity, Duration::from_secs(config.cache.ttl_secs))
        } else {
            RecognitionCache::disabled()
        };
        let audit = if config.audit.enabled {
            config.audit.resolved_path().map(AuditLog::new)
        } else {
            None
        };
        let executor = Executor::new(Arc::new(validator))
            .with_elevation(config.execution.elevation)
            .with_phase_table(config.progress.phase_percent.clone());

        Self {
            recognizer: IntentRecognizer::new(Arc::new(EntityCatalog::builtin())),
            cache,
            resolver: ContextResolver::new(),
            ambiguity: AmbiguityResolver::new(),
            builder: CommandBuilder::new(),
            executor,
            audit,
            sessions: SessionStore::new(),
            config,
        }
    }

    /// Replace (or set) the audit destination
    pub fn with_audit_log(mut self, audit: AuditLog) -> Self {
        self.audit = Some(audit);
        self
    }

    pub fn without_audit(mut self) -> Self {
        self.audit = None;
        self
    }

    pub fn config(&self) -> &NixmateConfig {
        &self.config
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn validator(&self) -> &SafetyValidator {
        self.executor.validator()
    }

    fn debug(&self) -> bool {
        self.config.dev.is_debug_enabled()
    }

    /// Context-free recognition through the cache
    pub fn recognize(&self, text: &str) -> Intent {
        self.cache
            .get_or_insert_with(text, || self.recognizer.recognize(text))
    }

    /// Drop cached recognitions
    pub fn invalidate_cache(&self) {
        self.cache.invalidate_all();
    }

    /// Command and timeout plan for a single request, without context or
    /// execution
    pub fn plan(
        &self,
        text: &str,
        snapshot: &SystemSnapshot,
        dry_run: bool,
    ) -> Result<(Command, TimeoutPlan), NixmateError> {
        let intent = self.recognize(text);
        if let Some(reason) = &intent.rejection {
            return Err(NixmateError::InputRejected {
                reason: reason.clone(),
            });
        }
        let command = self.builder.build(&intent)?;
        let plan = self.estimate(&command, snapshot, dry_run);
        Ok((command, plan))
    }

    fn estimate(&self, command: &Command, snapshot: &SystemSnapshot, dry_run: bool) -> TimeoutPlan {
        let options = TimeoutOptions::new(&self.config.preferences).with_dry_run(dry_run);
        timeout::estimate(command, options, snapshot)
    }

    /// Clear one session's context
    pub async fn reset(&self, session_id: &str) {
        self.sessions.reset(session_id, Utc::now()).await;
    }

    /// Process one turn
    pub async fn handle(&self, request: Request) -> Outcome {
        let now = Utc::now();
        let session = self.sessions.get_or_create(&request.session_id, now);
        let mut ctx = session.lock().await;

        // Step 1: an answer to a pending clarification
        let mut chosen = None;
        if let Some(pending) = ctx.pending_clarification.take() {
            match pending.resolve_answer(&request.text) {
                ClarificationAnswer::Selected(intent) => {
                    debug!("Clarification answered: {}", intent.action.describe());
                    chosen = Some(intent);
                }
                ClarificationAnswer::Cancelled => {
                    ctx.record_result(true, "clarification cancelled", now);
                    return Outcome::Completed(Response::message(true, "Okay, never mind."));
                }
                ClarificationAnswer::NotAnAnswer => {
                    debug!("Pending clarification dropped by a new request");
                }
            }
        }

        let intent = match chosen {
            // The user picked this reading explicitly
            Some(mut intent) => {
                intent.confidence = intent.confidence.max(AUTO_ACT_THRESHOLD);
                intent.ambiguous = false;
                intent.alternatives.clear();
                intent
            }
            None => {
                // Step 2: recognise (security pre-check runs inside)
                let recognized = self.recognize(&request.text);
                if let Some(reason) = &recognized.rejection {
                    warn!("Input rejected for session {}: {}", request.session_id, reason);
                    if let Some(audit) = &self.audit {
                        audit.input_rejected(&request.session_id, &request.text, reason);
                    }
                    let err = NixmateError::InputRejected {
                        reason: reason.clone(),
                    };
                    return Outcome::Rejected(Response::from_error(&err, self.debug()));
                }

                // Step 3: context
                let resolved = self.resolver.resolve(&recognized, &ctx, now);

                // Step 4: ambiguity
                if let Some(clarification) = self.ambiguity.check(&resolved) {
                    info!("Asking for clarification: {}", clarification.reason.as_str());
                    ctx.record_turn(&request.text, &mark_ambiguous(&resolved, &clarification), now);
                    ctx.pending_clarification = Some(clarification.clone());
                    return Outcome::Clarify(clarification);
                }
                resolved
            }
        };

        ctx.record_turn(&request.text, &intent, now);

        if intent.kind() == IntentKind::Unknown || intent.confidence < CONFIRM_THRESHOLD {
            debug!("Declining {:?} at confidence {:.2}", request.text, intent.confidence);
            let err = NixmateError::BuildFailed(BuildError::Unsupported(intent.kind()));
            let mut response = Response::from_error(&err, self.debug());
            if let Some(question) = &intent.clarification {
                response.natural_language_response = question.clone();
            }
            return Outcome::Completed(response);
        }

        // Step 5: build
        let command = match self.builder.build(&intent) {
            Ok(command) => command,
            Err(e) => {
                debug!("No command for {}: {}", intent.action.describe(), e);
                let mut response = Response::from_error(&NixmateError::BuildFailed(e), self.debug());
                if let Some(question) = &intent.clarification {
                    response.natural_language_response = question.clone();
                }
                return Outcome::Completed(response);
            }
        };

        // Step 6: confirmation
        if !request.auto_confirm && !request.dry_run {
            let reason = if intent.confidence < AUTO_ACT_THRESHOLD {
                Some(ConfirmReason::LowConfidence)
            } else if command.requires_elevation {
                Some(ConfirmReason::Elevation)
            } else {
                None
            };
            if let Some(reason) = reason {
                let plan = self.estimate(&command, &request.snapshot, false);
                return Outcome::Confirm(ConfirmationRequest {
                    command_text: command.text(),
                    description: command.description.clone(),
                    requires_elevation: command.requires_elevation,
                    confidence: intent.confidence,
                    reason,
                    timeout_ms: plan.final_ms,
                    intent,
                });
            }
        }

        // Step 7: execute; the session stays locked for the whole turn
        let response = self
            .execute(&request.session_id, &command, request.options())
            .await;
        ctx.record_result(response.success, summary(&response), Utc::now());
        Outcome::Completed(response)
    }

    /// Execute an intent the user has confirmed
    pub async fn run_intent(&self, session_id: &str, intent: &Intent, options: TurnOptions) -> Response {
        let command = match self.builder.build(intent) {
            Ok(command) => command,
            Err(e) => return Response::from_error(&NixmateError::BuildFailed(e), self.debug()),
        };

        let session = self.sessions.get_or_create(session_id, Utc::now());
        let mut ctx = session.lock().await;
        let response = self.execute(session_id, &command, options).await;
        ctx.record_result(response.success, summary(&response), Utc::now());
        response
    }

    async fn execute(&self, session_id: &str, command: &Command, options: TurnOptions) -> Response {
        let dry_run = options.dry_run || self.config.execution.dry_run;
        let plan = self.estimate(command, &options.snapshot, dry_run);
        let limits = ExecutionLimits::new(plan.budget(), &self.config.execution);
        info!(
            "Executing {} (budget {}ms, base {}ms)",
            command.text(),
            plan.final_ms,
            plan.base_ms
        );

        let mut run = exec::RunOptions::default().dry_run(dry_run);
        if let Some(tx) = options.progress {
            run = run.with_progress(tx);
        }
        if let Some(cancel) = options.cancel {
            run = run.with_cancel(cancel);
        }

        match self.executor.execute(command, &limits, run).await {
            Ok(result) => {
                if let Some(audit) = &self.audit {
                    audit.execution(session_id, &result);
                }
                Response::from_execution(command, &result, self.debug())
            }
            Err(err) => {
                if let NixmateError::ValidationFailed { reason, suggestion } = &err {
                    if let Some(audit) = &self.audit {
                        let verdict =
                            SafetyVerdict::block("safety_validator", reason.clone(), suggestion.clone());
                        audit.action_blocked(session_id, &command.text(), &verdict);
                    }
                }
                Response::from_error(&err, self.debug())
            }
        }
    }
}

fn summary(response: &Response) -> String {
    match &response.executed_command_text {
        Some(cmd) if response.success => format!("ran {}", cmd),
        Some(cmd) => format!("failed {}", cmd),
        None => response.natural_language_response.clone(),
    }
}

fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
