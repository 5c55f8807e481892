//! Conversation Context - multi-turn state for pronouns and ellipsis
//!
//! Each session keeps a bounded history (at most 10 turns, 30-minute TTL)
//! plus the last package and service it mentioned. The resolver uses that
//! state to fill "it"/"that", to replay "again", and to borrow a recently
//! mentioned target when the new request leaves one out. It never invents a
//! value the session did not mention.

use crate::ambiguity::ClarificationRequest;
use crate::types::{Entity, EntityKind, Intent, IntentAction, IntentKind};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use tracing::debug;

/// Turns kept per session
pub const MAX_TURNS: usize = 10;

/// Session lifetime without activity
pub const SESSION_TTL_SECS: i64 = 30 * 60;

/// How recent a mention must be to fill a missing target without a pronoun
pub const MENTION_WINDOW_SECS: i64 = 2 * 60;

/// Confidence of an entity filled in from context
const CONTEXT_ENTITY_CONFIDENCE: f32 = 0.9;

/// One handled request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Turn {
    pub text: String,
    pub intent_type: IntentKind,
    pub at: DateTime<Utc>,
}

/// A name the user referred to, and when
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Mention {
    pub value: String,
    pub at: DateTime<Utc>,
}

/// Short summary of the last execution
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnResult {
    pub success: bool,
    pub summary: String,
    pub at: DateTime<Utc>,
}

/// Per-session state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub session_id: String,
    pub turns: VecDeque<Turn>,
    pub last_package: Option<Mention>,
    pub last_service: Option<Mention>,
    pub last_intent_type: Option<IntentKind>,
    /// Last intent that reached the command builder, for "again"
    pub last_resolved: Option<Intent>,
    pub last_result: Option<TurnResult>,
    pub current_topic: Option<String>,
    pub pending_clarification: Option<ClarificationRequest>,
    pub last_active: DateTime<Utc>,
}

impl ConversationContext {
    pub fn new(session_id: impl Into<String>, now: DateTime<Utc>) -> Self {
        Self {
            session_id: session_id.into(),
            turns: VecDeque::new(),
            last_package: None,
            last_service: None,
            last_intent_type: None,
            last_resolved: None,
            last_result: None,
            current_topic: None,
            pending_clarification: None,
            last_active: now,
        }
    }

    /// No activity within the session TTL
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now - self.last_active > Duration::seconds(SESSION_TTL_SECS)
    }

    /// Record a resolved turn and the names it mentioned
    pub fn record_turn(&mut self, text: &str, intent: &Intent, now: DateTime<Utc>) {
        self.prune(now);
        self.turns.push_back(Turn {
            text: text.to_string(),
            intent_type: intent.kind(),
            at: now,
        });
        while self.turns.len() > MAX_TURNS {
            self.turns.pop_front();
        }
        self.last_active = now;
        self.last_intent_type = Some(intent.kind());

        // Only a settled target counts as a mention, never an open candidate
        if intent.package_candidates().is_empty() {
            if let Some(package) = intent.entities_of(EntityKind::Package).next() {
                self.last_package = Some(Mention {
                    value: package.value.clone(),
                    at: now,
                });
            }
        }
        if let Some(service) = intent.entities_of(EntityKind::Service).next() {
            self.last_service = Some(Mention {
                value: service.value.clone(),
                at: now,
            });
        }

        if !matches!(intent.kind(), IntentKind::Unknown | IntentKind::Repeat)
            && intent.action.missing_entity().is_none()
        {
            self.last_resolved = Some(intent.clone());
            self.current_topic = Some(intent.action.describe());
        }
    }

    /// Record how the last execution went
    pub fn record_result(&mut self, success: bool, summary: impl Into<String>, now: DateTime<Utc>) {
        self.last_result = Some(TurnResult {
            success,
            summary: summary.into(),
            at: now,
        });
        self.last_active = now;
    }

    /// Drop turns and mentions older than the TTL
    pub fn prune(&mut self, now: DateTime<Utc>) {
        let ttl = Duration::seconds(SESSION_TTL_SECS);
        if self.is_expired(now) {
            let id = std::mem::take(&mut self.session_id);
            *self = Self::new(id, now);
            return;
        }
        while self.turns.front().map_or(false, |t| now - t.at > ttl) {
            self.turns.pop_front();
        }
        if self.last_package.as_ref().map_or(false, |m| now - m.at > ttl) {
            self.last_package = None;
        }
        if self.last_service.as_ref().map_or(false, |m| now - m.at > ttl) {
            self.last_service = None;
        }
    }

    /// Clear everything except the session id
    pub fn reset(&mut self, now: DateTime<Utc>) {
        let id = std::mem::take(&mut self.session_id);
        *self = Self::new(id, now);
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Deterministic pronoun/ellipsis resolution against one session's context
#[derive(Debug, Clone, Copy)]
pub struct ContextResolver {
    mention_window: Duration,
}

impl Default for ContextResolver {
    fn default() -> Self {
        Self {
            mention_window: Duration::seconds(MENTION_WINDOW_SECS),
        }
    }
}

impl ContextResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// A new intent with context substitutions applied, or an unchanged
    /// copy when nothing applies
    pub fn resolve(&self, intent: &Intent, ctx: &ConversationContext, now: DateTime<Utc>) -> Intent {
        if intent.is_rejected() {
            return intent.clone();
        }

        if intent.action == IntentAction::Repeat {
            return match &ctx.last_resolved {
                Some(previous) => {
                    debug!("Replaying previous intent: {}", previous.action.describe());
                    let mut replay = previous.clone();
                    replay.original_text = intent.original_text.clone();
                    replay.alternatives.clear();
                    replay.context_resolved = true;
                    replay
                }
                None => intent.clone(),
            };
        }

        let Some(missing) = intent.action.missing_entity() else {
            return intent.clone();
        };
        // Open candidates go to the ambiguity resolver, not to context
        if !intent.package_candidates().is_empty() {
            return intent.clone();
        }

        let mention = match missing {
            EntityKind::Package => self.pick(intent, ctx.last_package.as_ref(), now),
            EntityKind::Service => self.pick(intent, ctx.last_service.as_ref(), now),
            _ => None,
        };
        let Some(mention) = mention else {
            return intent.clone();
        };
        let Some(action) = intent.action.with_entity(missing, &mention.value) else {
            return intent.clone();
        };

        debug!(
            "Resolved {} from context: {}",
            missing.as_str(),
            mention.value
        );
        let mut resolved = intent.with_action(action);
        resolved.entities.push(Entity::new(
            missing,
            mention.value.clone(),
            CONTEXT_ENTITY_CONFIDENCE,
        ));
        resolved.context_resolved = true;
        resolved
    }

    /// A pronoun may use any live mention; plain ellipsis only a recent one
    fn pick<'a>(
        &self,
        intent: &Intent,
        mention: Option<&'a Mention>,
        now: DateTime<Utc>,
    ) -> Option<&'a Mention> {
        let mention = mention?;
        if intent.refers_back || now - mention.at <= self.mention_window {
            Some(mention)
        } else {
            None
        }
    }
}

// ============================================================================
// Session store
// ============================================================================

/// Shared handle to one session's context
pub type SessionHandle = Arc<tokio::sync::Mutex<ConversationContext>>;

/// All live sessions. Each context is only locked by its own session's
/// request handling.
#[derive(Debug, Default)]
pub struct SessionStore {
    sessions: Mutex<HashMap<String, SessionHandle>>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Existing session or a fresh one; expired idle sessions are dropped
    pub fn get_or_create(&self, session_id: &str, now: DateTime<Utc>) -> SessionHandle {
        let mut sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());

        // A locked session is in use and therefore not idle
        sessions.retain(|id, handle| {
            id == session_id
                || handle
                    .try_lock()
                    .map(|ctx| !ctx.is_expired(now))
                    .unwrap_or(true)
        });

        sessions
            .entry(session_id.to_string())
            .or_insert_with(|| {
                debug!("New session {}", session_id);
                Arc::new(tokio::sync::Mutex::new(ConversationContext::new(
                    session_id, now,
                )))
            })
            .clone()
    }

    /// Clear one session's state
    pub async fn reset(&self, session_id: &str, now: DateTime<Utc>) {
        let handle = {
            let sessions = self.sessions.lock().unwrap_or_else(|e| e.into_inner());
            sessions.get(session_id).cloned()
        };
        if let Some(handle) = handle {
            handle.lock().await.reset(now);
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
