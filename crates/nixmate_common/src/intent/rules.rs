//! Ordered rule table.
//!
//! Each rule pairs an anchored pattern with an extractor. Rules are tried in
//! table order against corrected text; the first rule whose pattern matches
//! and whose extractor accepts the captures wins with `RULE_CONFIDENCE`.

use super::{package_extraction, service_extraction, Extraction, PASS_THROUGH_CONFIDENCE};
use crate::catalog::{is_pronoun, EntityCatalog};
use crate::types::{
    Entity, EntityKind, IntentAction, IntentKind, MaintenanceTask, ProblemCategory, QueryScope,
    ServiceAction, UpdateTarget,
};
use once_cell::sync::Lazy;
use regex::{Captures, Regex};

type Extractor = fn(&Captures<'_>, &EntityCatalog) -> Option<Extraction>;

/// One (pattern, extractor) entry
pub struct Rule {
    pub kind: IntentKind,
    pub name: &'static str,
    pattern: Regex,
    extract: Extractor,
}

impl Rule {
    fn new(kind: IntentKind, name: &'static str, pattern: &str, extract: Extractor) -> Self {
        Self {
            kind,
            name,
            // Patterns are compile-time literals covered by the tests below
            pattern: Regex::new(pattern).unwrap_or_else(|e| panic!("rule {}: {}", name, e)),
            extract,
        }
    }

    /// Apply this rule to corrected text
    pub fn apply(&self, text: &str, catalog: &EntityCatalog) -> Option<Extraction> {
        let caps = self.pattern.captures(text)?;
        (self.extract)(&caps, catalog)
    }
}

const POLITE: &str = r"^(?:please )?(?:(?:can|could|would) you )?(?:please )?";
const TAIL: &str = r"(?: for me)?(?: please| now| thanks)?$";
const VIEW: &str = r"(?:(?:show|view|display|get|check|see|read|print)(?: me)? )?(?:the |any )?";

/// The rule table, in priority order
pub static RULES: Lazy<Vec<Rule>> = Lazy::new(|| {
    vec![
        // Repeat
        Rule::new(
            IntentKind::Repeat,
            "repeat",
            &format!(
                r"{}(?:do (?:it|that|this) again|again|retry|try (?:it |that )?again|repeat(?: that| it| the last (?:one|command))?|one more time|same (?:thing )?again){}",
                POLITE, TAIL
            ),
            |_, _| Some(Extraction::new(IntentAction::Repeat)),
        ),
        // Update
        Rule::new(
            IntentKind::Update,
            "update_channels",
            &format!(r"{}(?:update|refresh|upgrade)(?: the| my| all)? (?:nix )?channels?{}", POLITE, TAIL),
            |_, _| Some(update(UpdateTarget::Channels)),
        ),
        Rule::new(
            IntentKind::Update,
            "update_user_packages",
            &format!(
                r"{}(?:update|upgrade)(?: all)?(?: of)?(?: my| the)?(?: user| installed)? (?:packages|software|programs|apps){}",
                POLITE, TAIL
            ),
            |_, _| Some(update(UpdateTarget::UserPackages)),
        ),
        Rule::new(
            IntentKind::Update,
            "update_system",
            &format!(
                r"{}(?:update|upgrade|rebuild)(?:(?: the| my)? (?:system|nixos|everything|computer|machine|os))?{}",
                POLITE, TAIL
            ),
            |_, _| Some(update(UpdateTarget::System)),
        ),
        // Maintenance
        Rule::new(
            IntentKind::Maintenance,
            "delete_older_than",
            &format!(
                r"{}(?:delete|remove|clean(?: ?up)?|cleanup|garbage collect)(?: all)?(?: the)?(?: old)?(?: generations| stuff| packages)? older than (\d+) days?{}",
                POLITE, TAIL
            ),
            |caps, _| {
                let days = caps.get(1)?.as_str().parse().ok()?;
                Some(maintenance(MaintenanceTask::DeleteOlderThan { days }))
            },
        ),
        Rule::new(
            IntentKind::Maintenance,
            "garbage_collect",
            &format!(
                r"{}(?:run )?(?:(?:a |the )?garbage collect(?:ion)?|collect garbage|gc|cleanup(?: the| my)?(?: nix)?(?: store| system| disk)?|clean(?: the| my)?(?: nix)? (?:store|system)|(?:delete|remove|clean ?up|cleanup)(?: all)?(?: the| my)? old generations|free up(?: some)?(?: disk)? space){}",
                POLITE, TAIL
            ),
            |_, _| Some(maintenance(MaintenanceTask::GarbageCollect)),
        ),
        Rule::new(
            IntentKind::Maintenance,
            "optimise_store",
            &format!(
                r"{}(?:optimi[sz]e|deduplicate|dedupe)(?: the| my)?(?: nix)?(?: store)?{}",
                POLITE, TAIL
            ),
            |_, _| Some(maintenance(MaintenanceTask::Optimise)),
        ),
        Rule::new(
            IntentKind::Maintenance,
            "list_generations",
            &format!(
                r"{}(?:list|show)(?: me)?(?: all)?(?: the| my)?(?: system)? generations{}",
                POLITE, TAIL
            ),
            |_, _| Some(maintenance(MaintenanceTask::ListGenerations)),
        ),
        Rule::new(
            IntentKind::Maintenance,
            "rollback_generation",
            &format!(
                r"{}(?:rollback|roll back|undo|revert)(?: the| my)?(?: last| previous)?(?: system)?(?: update| upgrade| generation| change| rebuild)?(?: to the previous generation)?{}",
                POLITE, TAIL
            ),
            |_, _| Some(maintenance(MaintenanceTask::RollbackGeneration)),
        ),
        // Logs
        Rule::new(
            IntentKind::Logs,
            "error_logs",
            &format!(
                r"^{}(?:recent |latest |system |boot )?(?:error logs?|errors)(?: (?:since|from) (?:boot|today))?{}",
                VIEW, TAIL
            ),
            |_, _| {
                Some(Extraction::new(IntentAction::Logs {
                    service: None,
                    errors_only: true,
                }))
            },
        ),
        Rule::new(
            IntentKind::Logs,
            "service_logs_for",
            &format!(
                r"^{}(?:recent |latest )?(?:logs?|journal) (?:for|of|from) (.+?)(?: service| daemon)?{}",
                VIEW, TAIL
            ),
            extract_logs,
        ),
        Rule::new(
            IntentKind::Logs,
            "service_logs",
            &format!(
                r"^{}([a-z0-9][a-z0-9._+@-]*)(?: service| daemon)? (?:logs?|journal){}",
                VIEW, TAIL
            ),
            extract_logs,
        ),
        // Troubleshoot
        Rule::new(
            IntentKind::Troubleshoot,
            "troubleshoot_verb",
            &format!(
                r"{}(?:fix|troubleshoot|diagnose|debug|repair)(?: the| my)? (.+?)(?: problems?| issues?)?{}",
                POLITE, TAIL
            ),
            extract_problem,
        ),
        Rule::new(
            IntentKind::Troubleshoot,
            "troubleshoot_symptom",
            r"^(?:why (?:is|does|do|are) )?(?:the |my )?(.+?) (?:is |are |does |do )?(?:not working|not work|broken|so slow|slow|full|down|dead|keeps? (?:dropping|crashing|disconnecting|failing)|stopped working)$",
            extract_problem,
        ),
        Rule::new(
            IntentKind::Troubleshoot,
            "troubleshoot_problem_with",
            r"^(?:i (?:have|am having|got) |there is |there are )?(?:a |an |some )?(?:problems?|issues?|trouble) with (?:the |my )?(.+?)$",
            extract_problem,
        ),
        Rule::new(
            IntentKind::Troubleshoot,
            "troubleshoot_whats_wrong",
            r"^what is (?:wrong|going on|up) with (?:the |my )?(.+?)$",
            extract_problem,
        ),
        // Config
        Rule::new(
            IntentKind::Config,
            "config_explicit",
            &format!(
                r"^{}(?:current )?(?:value of )?(.+?) (?:setting|option|config|configuration){}",
                VIEW, TAIL
            ),
            |caps, catalog| Some(extract_setting(caps.get(1)?.as_str(), catalog, true)),
        ),
        Rule::new(
            IntentKind::Config,
            "config_option_path",
            &format!(
                r"^{}(?:option|setting) ([a-z][a-z0-9_-]*(?:\.[a-z0-9_-]+)+){}",
                VIEW, TAIL
            ),
            |caps, catalog| Some(extract_setting(caps.get(1)?.as_str(), catalog, true)),
        ),
        Rule::new(
            IntentKind::Config,
            "config_verb",
            &format!(r"{}(?:configure|set up|setup)(?: the| my)? (.+?){}", POLITE, TAIL),
            |caps, catalog| {
                let phrase = caps.get(1)?.as_str();
                catalog.resolve_setting(phrase)?;
                Some(extract_setting(phrase, catalog, false))
            },
        ),
        // Service
        Rule::new(
            IntentKind::Service,
            "service_list",
            &format!(
                r"{}(?:(?:list|show)(?: me)?(?: all)?(?: the| my)?(?: running| active| enabled| loaded)? (?:services|daemons|units)|(?:what|which) services are (?:running|active|enabled)){}",
                POLITE, TAIL
            ),
            |_, _| {
                Some(Extraction::new(IntentAction::Service {
                    action: ServiceAction::List,
                    service: None,
                }))
            },
        ),
        Rule::new(
            IntentKind::Service,
            "service_is_running",
            r"^(?:is|are) (?:the )?(.+?)(?: service| daemon)? (?:running|active|up|started|alive)(?: right now| now)?$",
            |caps, catalog| {
                let phrase = caps.get(1)?.as_str();
                Some(service_extraction(phrase, catalog, |service| {
                    IntentAction::Service {
                        action: ServiceAction::Status,
                        service,
                    }
                }))
            },
        ),
        Rule::new(
            IntentKind::Service,
            "service_action",
            &format!(
                r"{}(start|stop|restart|reload|enable|disable|turn on|turn off|switch on|switch off|launch|bounce|reboot|kill|status of|check on|check|status)(?: up)?(?: the)? (.+?)( service| daemon| server| unit)?{}",
                POLITE, TAIL
            ),
            extract_service_action,
        ),
        // Remove
        Rule::new(
            IntentKind::Remove,
            "remove",
            &format!(
                r"{}(?:i (?:want|need) to |i would like to )?(?:uninstall|remove|delete|erase|purge)(?: the)? (.+?)(?: package| from (?:my |the )?(?:system|computer|profile))?{}",
                POLITE, TAIL
            ),
            |caps, catalog| {
                let phrase = caps.get(1)?.as_str();
                Some(package_extraction(phrase, catalog, |package| {
                    IntentAction::Remove { package }
                }))
            },
        ),
        // Install
        Rule::new(
            IntentKind::Install,
            "install",
            &format!(
                r"{}(?:i (?:want|need) to |i would like to |let us )?(?:install|add|get|download|setup|set up)(?: me)?(?: the| a| an)? (.+?)(?: package| on (?:my |this )?(?:system|computer|machine))?{}",
                POLITE, TAIL
            ),
            |caps, catalog| {
                let phrase = caps.get(1)?.as_str();
                Some(package_extraction(phrase, catalog, |package| {
                    IntentAction::Install { package }
                }))
            },
        ),
        Rule::new(
            IntentKind::Install,
            "install_want",
            r"^(?:i (?:want|need)|give me|i would like)(?: the| a| an)? (.+?)(?: please)?$",
            |caps, catalog| {
                let phrase = caps.get(1)?.as_str();
                // Only catalogued names: "i need help" is not an install
                if !catalog.is_known_package(phrase)
                    && catalog.resolve_package(phrase).single().is_some()
                {
                    return None;
                }
                Some(package_extraction(phrase, catalog, |package| {
                    IntentAction::Install { package }
                }))
            },
        ),
        // Query
        Rule::new(
            IntentKind::Query,
            "query_installed",
            &format!(
                r"{}(?:(?:list|show)(?: me)?(?: all)?(?: my| the)? installed(?: packages| software| programs| apps)?|what(?: packages| software)? (?:is|are|do i have|have i got) installed|(?:what|which) packages (?:are|do i have) installed){}",
                POLITE, TAIL
            ),
            |_, _| {
                Some(Extraction::new(IntentAction::Query {
                    package: None,
                    scope: QueryScope::Installed,
                }))
            },
        ),
        Rule::new(
            IntentKind::Query,
            "query_installed_check",
            r"^(?:is|are|do i have) (.+?) (?:already )?installed(?: on (?:my |this )?(?:system|computer|machine))?$",
            |caps, catalog| {
                let phrase = caps.get(1)?.as_str();
                Some(package_extraction(phrase, catalog, |package| {
                    IntentAction::Query {
                        package,
                        scope: QueryScope::InstalledCheck,
                    }
                }))
            },
        ),
        Rule::new(
            IntentKind::Query,
            "query_search",
            &format!(
                r"{}(?:search|find|look up|look for|is there|do you have|are there)(?: for)?(?: a| an| the| any)?(?: package)?(?: called| named| for)? (.+?){}",
                POLITE, TAIL
            ),
            extract_search,
        ),
        Rule::new(
            IntentKind::Query,
            "query_about",
            &format!(
                r"{}(?:what is|what are|tell me about|describe|info(?:rmation)? (?:on|about|for)|show (?:me )?info(?:rmation)? (?:on|about|for))(?: the)? (.+?){}",
                POLITE, TAIL
            ),
            extract_search,
        ),
    ]
});

/// First rule that matches, with its name
pub fn match_rules(text: &str, catalog: &EntityCatalog) -> Option<(&'static Rule, Extraction)> {
    let rules: &'static [Rule] = RULES.as_slice();
    rules
        .iter()
        .find_map(|rule| rule.apply(text, catalog).map(|extraction| (rule, extraction)))
}

// ============================================================================
// Extractors
// ============================================================================

fn update(target: UpdateTarget) -> Extraction {
    Extraction::new(IntentAction::Update { target })
}

fn maintenance(task: MaintenanceTask) -> Extraction {
    Extraction::new(IntentAction::Maintenance { task })
}

fn extract_logs(caps: &Captures<'_>, catalog: &EntityCatalog) -> Option<Extraction> {
    let phrase = caps.get(1)?.as_str();
    if matches!(phrase, "system" | "recent" | "latest" | "all" | "boot" | "kernel") {
        return Some(Extraction::new(IntentAction::Logs {
            service: None,
            errors_only: false,
        }));
    }
    Some(service_extraction(phrase, catalog, |service| IntentAction::Logs {
        service,
        errors_only: false,
    }))
}

fn extract_problem(caps: &Captures<'_>, catalog: &EntityCatalog) -> Option<Extraction> {
    let phrase = caps.get(1)?.as_str();
    if is_pronoun(phrase) {
        let mut extraction = Extraction::new(IntentAction::Troubleshoot { problem: None });
        extraction.refers_back = true;
        return Some(extraction);
    }

    if let Some(category) = catalog.problem_category(phrase) {
        return Some(
            Extraction::new(IntentAction::Troubleshoot {
                problem: Some(category),
            })
            .with_entity(Entity::new(EntityKind::Problem, category.as_str(), 1.0)),
        );
    }

    // "nginx is broken": a failing unit is a services problem
    let unit = catalog.resolve_service(phrase);
    if let Some(unit) = unit.exact() {
        return Some(
            Extraction::new(IntentAction::Troubleshoot {
                problem: Some(ProblemCategory::Services),
            })
            .with_entity(Entity::new(
                EntityKind::Problem,
                ProblemCategory::Services.as_str(),
                1.0,
            ))
            .with_entity(Entity::service(unit)),
        );
    }

    Some(Extraction::new(IntentAction::Troubleshoot { problem: None }))
}

fn extract_setting(phrase: &str, catalog: &EntityCatalog, explicit: bool) -> Extraction {
    if let Some(option) = catalog.resolve_setting(phrase) {
        return Extraction::new(IntentAction::Config {
            setting: Some(option.to_string()),
        })
        .with_entity(Entity::new(EntityKind::Setting, option, 1.0));
    }

    // An option path typed out in full passes through
    let looks_like_path = phrase.contains('.') && !phrase.contains(' ');
    if explicit && looks_like_path {
        return Extraction::new(IntentAction::Config {
            setting: Some(phrase.to_string()),
        })
        .with_entity(Entity::new(
            EntityKind::Setting,
            phrase,
            PASS_THROUGH_CONFIDENCE,
        ));
    }

    Extraction::new(IntentAction::Config { setting: None })
}

fn extract_service_action(caps: &Captures<'_>, catalog: &EntityCatalog) -> Option<Extraction> {
    let action = ServiceAction::parse(caps.get(1)?.as_str())?;
    let mut phrase = caps.get(2)?.as_str().to_string();

    // "web server" names a unit; "nginx server" names nginx
    if let Some(suffix) = caps.get(3) {
        let full = format!("{}{}", phrase, suffix.as_str());
        if catalog.resolve_service(&full).exact().is_some() {
            phrase = full;
        }
    }
    let phrase = phrase.as_str();

    // "check"/"status" only read a unit the catalog knows; "check disk space"
    // belongs elsewhere
    if !action.is_mutating() && !is_pronoun(phrase) && catalog.resolve_service(phrase).exact().is_none()
    {
        return None;
    }

    let mut extraction = service_extraction(phrase, catalog, |service| IntentAction::Service {
        action,
        service,
    });
    extraction
        .entities
        .push(Entity::new(EntityKind::Action, action.as_str(), 1.0));
    Some(extraction)
}

fn extract_search(caps: &Captures<'_>, catalog: &EntityCatalog) -> Option<Extraction> {
    let phrase = caps.get(1)?.as_str();
    let mut extraction = package_extraction(phrase, catalog, |package| IntentAction::Query {
        package,
        scope: QueryScope::Search,
    });

    // A search over a generic phrase searches for the phrase itself
    if extraction.clarification.is_some() {
        let term = phrase.trim().to_string();
        extraction = Extraction::new(IntentAction::Query {
            package: Some(term.clone()),
            scope: QueryScope::Search,
        })
        .with_entity(Entity::new(EntityKind::Package, term, PASS_THROUGH_CONFIDENCE));
    }
    Some(extraction)
}
