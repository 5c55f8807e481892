//! Ambiguity Resolver
//!
//! Detects requests with more than one plausible reading and turns them into
//! a numbered menu instead of guessing. Every option carries a fully-formed
//! candidate intent, so a numeric or label answer resolves without parsing
//! the answer text again.
//!
//! Triggers:
//! - a generic phrase resolved to several catalog packages ("a browser")
//! - the two best readings differ in category with comparable confidence

use crate::types::{EntityKind, Intent, IntentKind};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved key for the escape option
pub const KEY_CANCEL: u8 = 0;

/// Highest numbered option offered
pub const MAX_OPTIONS: usize = 8;

/// Two readings closer than this are "comparable"
pub const COMPARABLE_MARGIN: f32 = 0.15;

/// Readings at or below this never appear in a menu
pub const OPTION_FLOOR: f32 = 0.3;

/// Why a clarification was raised
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AmbiguityReason {
    /// A generic phrase named several packages
    MultiplePackages,
    /// The two best readings are different kinds of request
    CompetingIntents,
}

impl AmbiguityReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            AmbiguityReason::MultiplePackages => "several packages match",
            AmbiguityReason::CompetingIntents => "the request could mean different things",
        }
    }
}

/// One numbered menu entry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationOption {
    /// 1-8; 0 is reserved for cancel
    pub key: u8,
    pub label: String,
    /// Intent to run if this option is picked
    pub intent: Intent,
}

/// Question plus labelled options
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClarificationRequest {
    pub id: String,
    pub question: String,
    pub options: Vec<ClarificationOption>,
    pub reason: AmbiguityReason,
}

/// How an answer to a pending clarification was read
#[derive(Debug, Clone, PartialEq)]
pub enum ClarificationAnswer {
    /// An option was picked; its intent is returned as-is
    Selected(Intent),
    /// "0" or "cancel"
    Cancelled,
    /// The text is not an answer; treat it as a new request
    NotAnAnswer,
}

impl ClarificationRequest {
    fn new(question: impl Into<String>, reason: AmbiguityReason) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            question: question.into(),
            options: Vec::new(),
            reason,
        }
    }

    fn add_option(&mut self, label: impl Into<String>, intent: Intent) {
        if self.options.len() >= MAX_OPTIONS {
            return;
        }
        let key = self.options.len() as u8 + 1;
        self.options.push(ClarificationOption {
            key,
            label: label.into(),
            intent,
        });
    }

    pub fn get_option(&self, key: u8) -> Option<&ClarificationOption> {
        self.options.iter().find(|o| o.key == key)
    }

    /// Read a reply: option number, option label, or cancel
    pub fn resolve_answer(&self, reply: &str) -> ClarificationAnswer {
        let reply = reply.trim().to_lowercase();
        let reply = reply.trim_end_matches(['.', '!']);

        if reply == "0" || matches!(reply, "cancel" | "never mind" | "nevermind" | "none") {
            return ClarificationAnswer::Cancelled;
        }

        if let Ok(key) = reply.parse::<u8>() {
            return match self.get_option(key) {
                Some(option) => ClarificationAnswer::Selected(option.intent.clone()),
                None => ClarificationAnswer::NotAnAnswer,
            };
        }

        let by_label = self.options.iter().find(|o| {
            let label = o.label.to_lowercase();
            label == reply
                || o.intent
                    .entities
                    .iter()
                    .any(|e| e.value.to_lowercase() == reply)
        });
        match by_label {
            Some(option) => ClarificationAnswer::Selected(option.intent.clone()),
            None => ClarificationAnswer::NotAnAnswer,
        }
    }

    /// Numbered menu for terminals
    pub fn format_menu(&self) -> String {
        let mut lines = vec![self.question.clone()];
        for option in &self.options {
            lines.push(format!("  [{}] {}", option.key, option.label));
        }
        lines.push(format!("  [{}] Cancel", KEY_CANCEL));
        lines.join("\n")
    }
}

/// Stateless detector
#[derive(Debug, Clone, Copy, Default)]
pub struct AmbiguityResolver;

impl AmbiguityResolver {
    pub fn new() -> Self {
        Self
    }

    /// A clarification for this intent, or `None` when it is unambiguous
    pub fn check(&self, intent: &Intent) -> Option<ClarificationRequest> {
        if intent.is_rejected() {
            return None;
        }
        self.package_candidates(intent)
            .or_else(|| self.competing_intents(intent))
    }

    fn package_candidates(&self, intent: &Intent) -> Option<ClarificationRequest> {
        let candidates = intent.package_candidates();
        if candidates.len() < 2 {
            return None;
        }

        let question = intent
            .clarification
            .clone()
            .unwrap_or_else(|| "Which package did you mean?".to_string());
        let mut request = ClarificationRequest::new(question, AmbiguityReason::MultiplePackages);

        for candidate in candidates {
            let Some(action) = intent.action.with_entity(EntityKind::Package, &candidate.value)
            else {
                continue;
            };
            let mut resolved = intent.with_action(action);
            resolved.entities = vec![candidate.clone()];
            resolved.entities[0].confidence = 1.0;
            resolved.alternatives.clear();
            resolved.clarification = None;
            resolved.ambiguous = false;
            let label = resolved.action.describe();
            request.add_option(label, resolved);
        }

        (request.options.len() >= 2).then_some(request)
    }

    fn competing_intents(&self, intent: &Intent) -> Option<ClarificationRequest> {
        // Best reading: the primary itself, or for `unknown` its best alternative
        let mut readings: Vec<&Intent> = Vec::new();
        if intent.kind() != IntentKind::Unknown {
            readings.push(intent);
        }
        readings.extend(
            intent
                .alternatives
                .iter()
                .filter(|a| a.kind() != IntentKind::Unknown && a.confidence > OPTION_FLOOR),
        );
        readings.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));

        let first = *readings.first()?;
        let second = readings.iter().find(|r| r.kind() != first.kind())?;
        if first.confidence <= OPTION_FLOOR
            || (first.confidence - second.confidence).abs() > COMPARABLE_MARGIN
        {
            return None;
        }

        let mut request = ClarificationRequest::new(
            "I'm not sure what you meant. Did you want to:",
            AmbiguityReason::CompetingIntents,
        );
        let mut seen = Vec::new();
        for reading in readings {
            if seen.contains(&reading.kind()) || reading.confidence <= OPTION_FLOOR {
                continue;
            }
            seen.push(reading.kind());
            let mut option = reading.clone();
            option.alternatives.clear();
            option.ambiguous = false;
            option.original_text = intent.original_text.clone();
            request.add_option(option.action.describe(), option);
        }
        (request.options.len() >= 2).then_some(request)
    }
}

/// Copy of the intent flagged ambiguous, with the question attached
pub fn mark_ambiguous(intent: &Intent, request: &ClarificationRequest) -> Intent {
    let mut marked = intent.clone();
    marked.ambiguous = true;
    marked.clarification = Some(request.question.clone());
    marked
}
