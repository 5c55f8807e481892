//! Bag-of-words keyword scoring.
//!
//! Used when no rule matches. Each category owns a weighted keyword set;
//! a category's confidence is its share of the total score damped by the
//! absolute score, capped below the rule confidence.

use super::{package_extraction, Extraction};
use crate::catalog::EntityCatalog;
use crate::types::{
    Entity, EntityKind, Intent, IntentAction, IntentKind, MaintenanceTask, QueryScope,
    ServiceAction, UpdateTarget,
};

/// Highest confidence the keyword fallback may report
pub const MAX_STATISTICAL_CONFIDENCE: f32 = 0.85;

/// Damping constant: a lone weak keyword never reaches the confirm band
const DAMPING: f32 = 0.5;

const KEYWORDS: &[(IntentKind, &[(&str, f32)])] = &[
    (
        IntentKind::Install,
        &[
            ("install", 3.0),
            ("add", 1.0),
            ("get", 1.0),
            ("download", 1.5),
            ("want", 0.5),
            ("need", 0.5),
            ("setup", 1.0),
        ],
    ),
    (
        IntentKind::Remove,
        &[
            ("remove", 3.0),
            ("uninstall", 3.0),
            ("delete", 2.0),
            ("erase", 2.0),
            ("purge", 2.0),
        ],
    ),
    (
        IntentKind::Update,
        &[
            ("update", 3.0),
            ("upgrade", 3.0),
            ("latest", 1.0),
            ("channel", 1.5),
            ("channels", 1.5),
            ("refresh", 1.0),
            ("rebuild", 2.0),
        ],
    ),
    (
        IntentKind::Query,
        &[
            ("search", 3.0),
            ("find", 2.0),
            ("look", 1.0),
            ("installed", 2.0),
            ("available", 1.0),
            ("version", 1.0),
            ("info", 1.0),
            ("information", 1.0),
            ("which", 0.5),
            ("about", 0.5),
        ],
    ),
    (
        IntentKind::Service,
        &[
            ("start", 2.0),
            ("stop", 2.0),
            ("restart", 3.0),
            ("reload", 2.0),
            ("enable", 1.5),
            ("disable", 1.5),
            ("service", 2.0),
            ("services", 2.0),
            ("daemon", 2.0),
            ("running", 1.5),
            ("status", 2.0),
        ],
    ),
    (
        IntentKind::Maintenance,
        &[
            ("garbage", 3.0),
            ("collect", 2.0),
            ("cleanup", 2.0),
            ("clean", 2.0),
            ("optimise", 3.0),
            ("optimize", 3.0),
            ("generations", 3.0),
            ("generation", 2.0),
            ("rollback", 2.0),
            ("space", 1.0),
            ("free", 1.0),
            ("store", 1.0),
        ],
    ),
    (
        IntentKind::Logs,
        &[
            ("logs", 3.0),
            ("log", 3.0),
            ("journal", 3.0),
            ("errors", 2.0),
            ("error", 1.5),
            ("messages", 1.0),
            ("show", 0.5),
        ],
    ),
    (
        IntentKind::Troubleshoot,
        &[
            ("fix", 3.0),
            ("broken", 3.0),
            ("working", 2.0),
            ("problem", 2.0),
            ("issue", 2.0),
            ("wrong", 2.0),
            ("slow", 1.5),
            ("crash", 2.0),
            ("crashing", 2.0),
            ("troubleshoot", 3.0),
            ("diagnose", 3.0),
            ("help", 1.0),
        ],
    ),
    (
        IntentKind::Config,
        &[
            ("configure", 3.0),
            ("configuration", 2.0),
            ("config", 2.0),
            ("setting", 2.0),
            ("settings", 2.0),
            ("option", 2.0),
            ("enabled", 1.0),
        ],
    ),
];

/// Score of one category for a text
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CategoryScore {
    pub kind: IntentKind,
    pub score: f32,
    pub confidence: f32,
}

/// Score every category; result is sorted by descending confidence and
/// contains only categories with a positive score
pub fn score(text: &str) -> Vec<CategoryScore> {
    let words: Vec<&str> = text.split_whitespace().collect();
    let mut raw: Vec<(IntentKind, f32)> = KEYWORDS
        .iter()
        .map(|(kind, keywords)| {
            let score = keywords
                .iter()
                .filter(|(kw, _)| words.contains(kw))
                .map(|(_, w)| *w)
                .sum::<f32>();
            (*kind, score)
        })
        .filter(|(_, score)| *score > 0.0)
        .collect();

    let total: f32 = raw.iter().map(|(_, s)| *s).sum();
    if total <= 0.0 {
        return Vec::new();
    }

    raw.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    raw.into_iter()
        .map(|(kind, score)| {
            let share = score / total;
            let strength = score / (score + DAMPING);
            CategoryScore {
                kind,
                score,
                confidence: (share * strength).min(MAX_STATISTICAL_CONFIDENCE),
            }
        })
        .collect()
}

/// Candidate intents from keyword scoring, best first
pub fn classify(text: &str, original: &str, catalog: &EntityCatalog) -> Vec<Intent> {
    score(text)
        .into_iter()
        .map(|s| {
            let extraction = best_effort_extraction(s.kind, text, catalog);
            let mut intent = Intent::new(extraction.action, s.confidence, original)
                .with_entities(extraction.entities);
            intent.clarification = extraction.clarification;
            intent
        })
        .collect()
}

/// Fill in whatever entities can be spotted without a pattern
fn best_effort_extraction(kind: IntentKind, text: &str, catalog: &EntityCatalog) -> Extraction {
    let words: Vec<&str> = text.split_whitespace().collect();
    let known_package = words.iter().find(|w| catalog.is_known_package(w)).copied();
    let known_service = words
        .iter()
        .find_map(|w| catalog.resolve_service(w).exact().map(str::to_string));

    match kind {
        IntentKind::Install => match known_package {
            Some(p) => package_extraction(p, catalog, |package| IntentAction::Install { package }),
            None => Extraction::new(IntentAction::Install { package: None }),
        },
        IntentKind::Remove => match known_package {
            Some(p) => package_extraction(p, catalog, |package| IntentAction::Remove { package }),
            None => Extraction::new(IntentAction::Remove { package: None }),
        },
        IntentKind::Update => {
            let target = if words.iter().any(|w| w.starts_with("channel")) {
                UpdateTarget::Channels
            } else {
                UpdateTarget::System
            };
            Extraction::new(IntentAction::Update { target })
        }
        IntentKind::Query => {
            let scope = if words.contains(&"installed") {
                if known_package.is_some() {
                    QueryScope::InstalledCheck
                } else {
                    QueryScope::Installed
                }
            } else {
                QueryScope::Search
            };
            match known_package {
                Some(p) => {
                    package_extraction(p, catalog, |package| IntentAction::Query { package, scope })
                }
                None => Extraction::new(IntentAction::Query {
                    package: None,
                    scope,
                }),
            }
        }
        IntentKind::Service => {
            let action = words
                .iter()
                .find_map(|w| ServiceAction::parse(w))
                .unwrap_or(ServiceAction::Status);
            let mut extraction = Extraction::new(IntentAction::Service {
                action,
                service: known_service.clone(),
            });
            if let Some(unit) = known_service {
                extraction = extraction.with_entity(Entity::service(unit));
            }
            extraction
        }
        IntentKind::Maintenance => {
            // Deleting needs an explicit cleanup word; anything vaguer only looks
            let task = if words.contains(&"generations") {
                MaintenanceTask::ListGenerations
            } else if words.iter().any(|w| w.starts_with("optimi")) {
                MaintenanceTask::Optimise
            } else if words
                .iter()
                .any(|w| matches!(*w, "garbage" | "collect" | "clean" | "cleanup"))
            {
                MaintenanceTask::GarbageCollect
            } else {
                MaintenanceTask::ListGenerations
            };
            Extraction::new(IntentAction::Maintenance { task })
        }
        IntentKind::Logs => {
            let errors_only = words.iter().any(|w| w.starts_with("error"));
            let mut extraction = Extraction::new(IntentAction::Logs {
                service: known_service.clone(),
                errors_only,
            });
            if let Some(unit) = known_service {
                extraction = extraction.with_entity(Entity::service(unit));
            }
            extraction
        }
        IntentKind::Troubleshoot => {
            let problem = catalog.problem_category(text);
            let mut extraction = Extraction::new(IntentAction::Troubleshoot { problem });
            if let Some(p) = problem {
                extraction = extraction.with_entity(Entity::new(EntityKind::Problem, p.as_str(), 1.0));
            }
            extraction
        }
        IntentKind::Config => {
            let setting = words
                .iter()
                .find_map(|w| catalog.resolve_setting(w))
                .map(str::to_string);
            let mut extraction = Extraction::new(IntentAction::Config {
                setting: setting.clone(),
            });
            if let Some(s) = setting {
                extraction = extraction.with_entity(Entity::new(EntityKind::Setting, s, 1.0));
            }
            extraction
        }
        IntentKind::Repeat => Extraction::new(IntentAction::Repeat),
        IntentKind::Unknown => Extraction::new(IntentAction::Unknown),
    }
}
