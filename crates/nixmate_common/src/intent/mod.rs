//! Intent Recognition
//!
//! Hybrid classifier: an unconditional security pre-check, typo
//! correction, an ordered rule table and a keyword-scoring fallback.
//!
//! Confidence bands:
//! - >= 0.9: act without asking
//! - 0.5 .. 0.9: may ask for confirmation
//! - < 0.5: clarify or decline

mod recognizer;
pub mod rules;
pub mod statistical;

pub use recognizer::{security_check, IntentRecognizer};

use crate::catalog::{is_pronoun, EntityCatalog, Resolution};
use crate::types::{Entity, EntityKind, IntentAction};

/// What one rule (or the keyword fallback) pulled out of the text
#[derive(Debug, Clone, PartialEq)]
pub struct Extraction {
    pub action: IntentAction,
    pub entities: Vec<Entity>,
    pub refers_back: bool,
    pub clarification: Option<String>,
}

impl Extraction {
    pub fn new(action: IntentAction) -> Self {
        Self {
            action,
            entities: Vec::new(),
            refers_back: false,
            clarification: None,
        }
    }

    pub fn with_entity(mut self, entity: Entity) -> Self {
        self.entities.push(entity);
        self
    }
}

/// Confidence given to values that passed through the catalog unresolved
pub(crate) const PASS_THROUGH_CONFIDENCE: f32 = 0.7;

/// Build a package-targeting extraction from a free-text phrase.
///
/// Pronouns leave the slot empty and set `refers_back`; generic phrases
/// leave it empty and attach every candidate plus a question.
pub(crate) fn package_extraction(
    phrase: &str,
    catalog: &EntityCatalog,
    make: impl Fn(Option<String>) -> IntentAction,
) -> Extraction {
    if is_pronoun(phrase) {
        let mut extraction = Extraction::new(make(None));
        extraction.refers_back = true;
        return extraction;
    }

    match catalog.resolve_package(phrase) {
        Resolution::Exact(name) => {
            let mut extraction =
                Extraction::new(make(Some(name.clone()))).with_entity(Entity::package(&name));
            if let Some(unit) = catalog.service_for_package(&name) {
                extraction = extraction.with_entity(Entity::service(unit));
            }
            extraction
        }
        Resolution::Unresolved(name) if name.is_empty() => Extraction::new(make(None)),
        Resolution::Unresolved(name) => {
            let mut extraction = Extraction::new(make(Some(name.clone()))).with_entity(
                Entity::new(EntityKind::Package, &name, PASS_THROUGH_CONFIDENCE),
            );
            if let Some(unit) = catalog.service_for_package(&name) {
                extraction = extraction.with_entity(Entity::service(unit));
            }
            extraction
        }
        Resolution::Candidates { phrase, options } => {
            let share = 1.0 / options.len().max(1) as f32;
            let mut extraction = Extraction::new(make(None));
            for option in &options {
                extraction = extraction.with_entity(Entity::new(EntityKind::Package, option, share));
            }
            extraction.clarification = Some(format!("Which {} would you like?", phrase));
            extraction
        }
    }
}

/// Build a service-targeting extraction from a free-text phrase
pub(crate) fn service_extraction(
    phrase: &str,
    catalog: &EntityCatalog,
    make: impl Fn(Option<String>) -> IntentAction,
) -> Extraction {
    if is_pronoun(phrase) {
        let mut extraction = Extraction::new(make(None));
        extraction.refers_back = true;
        return extraction;
    }

    match catalog.resolve_service(phrase) {
        Resolution::Exact(unit) => {
            Extraction::new(make(Some(unit.clone()))).with_entity(Entity::service(&unit))
        }
        Resolution::Unresolved(unit) if unit.is_empty() => Extraction::new(make(None)),
        Resolution::Unresolved(unit) => Extraction::new(make(Some(unit.clone()))).with_entity(
            Entity::new(EntityKind::Service, &unit, PASS_THROUGH_CONFIDENCE),
        ),
        Resolution::Candidates { .. } => Extraction::new(make(None)),
    }
}
