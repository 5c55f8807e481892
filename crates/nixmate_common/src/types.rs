//! Core data types shared by every pipeline stage.
//!
//! An `Intent` is never mutated once a stage hands it on: resolution and
//! clarification always produce a new value.

use serde::{Deserialize, Serialize};

/// Confidence assigned to a full rule match
pub const RULE_CONFIDENCE: f32 = 0.95;

/// At or above this the pipeline acts without asking
pub const AUTO_ACT_THRESHOLD: f32 = 0.9;

/// Below this the pipeline clarifies or declines
pub const CONFIRM_THRESHOLD: f32 = 0.5;

// ============================================================================
// Entities
// ============================================================================

/// Kind of value extracted from user text
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntityKind {
    Package,
    Service,
    Setting,
    Path,
    Problem,
    Action,
}

impl EntityKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EntityKind::Package => "package",
            EntityKind::Service => "service",
            EntityKind::Setting => "setting",
            EntityKind::Path => "path",
            EntityKind::Problem => "problem",
            EntityKind::Action => "action",
        }
    }
}

/// A typed value extracted from text, resolved through the catalog
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub kind: EntityKind,
    pub value: String,
    pub confidence: f32,
}

impl Entity {
    pub fn new(kind: EntityKind, value: impl Into<String>, confidence: f32) -> Self {
        Self {
            kind,
            value: value.into(),
            confidence,
        }
    }

    pub fn package(value: impl Into<String>) -> Self {
        Self::new(EntityKind::Package, value, 1.0)
    }

    pub fn service(value: impl Into<String>) -> Self {
        Self::new(EntityKind::Service, value, 1.0)
    }
}

// ============================================================================
// Intent categories
// ============================================================================

/// Discriminant of an intent, used for scoring and comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IntentKind {
    Install,
    Remove,
    Update,
    Query,
    Service,
    Maintenance,
    Logs,
    Troubleshoot,
    Config,
    Repeat,
    Unknown,
}

impl IntentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            IntentKind::Install => "install",
            IntentKind::Remove => "remove",
            IntentKind::Update => "update",
            IntentKind::Query => "query",
            IntentKind::Service => "service",
            IntentKind::Maintenance => "maintenance",
            IntentKind::Logs => "logs",
            IntentKind::Troubleshoot => "troubleshoot",
            IntentKind::Config => "config",
            IntentKind::Repeat => "repeat",
            IntentKind::Unknown => "unknown",
        }
    }
}

impl std::fmt::Display for IntentKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// systemd unit action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceAction {
    Start,
    Stop,
    Restart,
    Reload,
    Enable,
    Disable,
    Status,
    List,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Start => "start",
            ServiceAction::Stop => "stop",
            ServiceAction::Restart => "restart",
            ServiceAction::Reload => "reload",
            ServiceAction::Enable => "enable",
            ServiceAction::Disable => "disable",
            ServiceAction::Status => "status",
            ServiceAction::List => "list-units",
        }
    }

    /// Parse a verb (or verb phrase) used in requests
    pub fn parse(word: &str) -> Option<Self> {
        match word {
            "start" | "turn on" | "switch on" | "launch" | "run" => Some(ServiceAction::Start),
            "stop" | "turn off" | "switch off" | "kill" => Some(ServiceAction::Stop),
            "restart" | "reboot" | "bounce" => Some(ServiceAction::Restart),
            "reload" => Some(ServiceAction::Reload),
            "enable" => Some(ServiceAction::Enable),
            "disable" => Some(ServiceAction::Disable),
            "status" | "status of" | "check" | "check on" => Some(ServiceAction::Status),
            "list" => Some(ServiceAction::List),
            _ => None,
        }
    }

    /// Mutating actions change system state and need elevation
    pub fn is_mutating(&self) -> bool {
        !matches!(self, ServiceAction::Status | ServiceAction::List)
    }

    /// The action that undoes this one, if any
    pub fn inverse(&self) -> Option<Self> {
        match self {
            ServiceAction::Start => Some(ServiceAction::Stop),
            ServiceAction::Stop => Some(ServiceAction::Start),
            ServiceAction::Enable => Some(ServiceAction::Disable),
            ServiceAction::Disable => Some(ServiceAction::Enable),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateTarget {
    /// Rebuild the system against upgraded channels
    System,
    /// Refresh channel metadata only
    Channels,
    /// Upgrade packages in the user profile
    UserPackages,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryScope {
    /// Search available packages
    Search,
    /// List installed packages
    Installed,
    /// Is a given package installed
    InstalledCheck,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "task", rename_all = "snake_case")]
pub enum MaintenanceTask {
    GarbageCollect,
    DeleteOlderThan { days: u32 },
    Optimise,
    ListGenerations,
    RollbackGeneration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProblemCategory {
    Network,
    Audio,
    Disk,
    Memory,
    Boot,
    Services,
}

impl ProblemCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProblemCategory::Network => "network",
            ProblemCategory::Audio => "audio",
            ProblemCategory::Disk => "disk",
            ProblemCategory::Memory => "memory",
            ProblemCategory::Boot => "boot",
            ProblemCategory::Services => "services",
        }
    }
}

/// What the user asked for, with a fixed field set per category.
///
/// Optional fields hold required entities that may still be missing after
/// recognition; the command builder refuses to guess them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IntentAction {
    Install {
        package: Option<String>,
    },
    Remove {
        package: Option<String>,
    },
    Update {
        target: UpdateTarget,
    },
    Query {
        package: Option<String>,
        scope: QueryScope,
    },
    Service {
        action: ServiceAction,
        service: Option<String>,
    },
    Maintenance {
        task: MaintenanceTask,
    },
    Logs {
        service: Option<String>,
        errors_only: bool,
    },
    Troubleshoot {
        problem: Option<ProblemCategory>,
    },
    Config {
        setting: Option<String>,
    },
    Repeat,
    Unknown,
}

impl IntentAction {
    pub fn kind(&self) -> IntentKind {
        match self {
            IntentAction::Install { .. } => IntentKind::Install,
            IntentAction::Remove { .. } => IntentKind::Remove,
            IntentAction::Update { .. } => IntentKind::Update,
            IntentAction::Query { .. } => IntentKind::Query,
            IntentAction::Service { .. } => IntentKind::Service,
            IntentAction::Maintenance { .. } => IntentKind::Maintenance,
            IntentAction::Logs { .. } => IntentKind::Logs,
            IntentAction::Troubleshoot { .. } => IntentKind::Troubleshoot,
            IntentAction::Config { .. } => IntentKind::Config,
            IntentAction::Repeat => IntentKind::Repeat,
            IntentAction::Unknown => IntentKind::Unknown,
        }
    }

    /// The entity kind this action still lacks, if it requires one
    pub fn missing_entity(&self) -> Option<EntityKind> {
        match self {
            IntentAction::Install { package: None } | IntentAction::Remove { package: None } => {
                Some(EntityKind::Package)
            }
            IntentAction::Query {
                package: None,
                scope: QueryScope::Search | QueryScope::InstalledCheck,
            } => Some(EntityKind::Package),
            IntentAction::Service {
                action,
                service: None,
            } if *action != ServiceAction::List => Some(EntityKind::Service),
            IntentAction::Troubleshoot { problem: None } => Some(EntityKind::Problem),
            IntentAction::Config { setting: None } => Some(EntityKind::Setting),
            _ => None,
        }
    }

    /// Copy of this action with the missing entity filled in.
    ///
    /// Returns `None` when the action has no slot of that kind.
    pub fn with_entity(&self, kind: EntityKind, value: &str) -> Option<Self> {
        let value = Some(value.to_string());
        match (self, kind) {
            (IntentAction::Install { .. }, EntityKind::Package) => {
                Some(IntentAction::Install { package: value })
            }
            (IntentAction::Remove { .. }, EntityKind::Package) => {
                Some(IntentAction::Remove { package: value })
            }
            (IntentAction::Query { scope, .. }, EntityKind::Package) => Some(IntentAction::Query {
                package: value,
                scope: *scope,
            }),
            (IntentAction::Service { action, .. }, EntityKind::Service) => {
                Some(IntentAction::Service {
                    action: *action,
                    service: value,
                })
            }
            (IntentAction::Logs { errors_only, .. }, EntityKind::Service) => {
                Some(IntentAction::Logs {
                    service: value,
                    errors_only: *errors_only,
                })
            }
            (IntentAction::Config { .. }, EntityKind::Setting) => {
                Some(IntentAction::Config { setting: value })
            }
            _ => None,
        }
    }

    /// Short human label, used in clarification menus and confirmations
    pub fn describe(&self) -> String {
        fn or_what(v: &Option<String>) -> &str {
            v.as_deref().unwrap_or("(unspecified)")
        }
        match self {
            IntentAction::Install { package } => format!("Install {}", or_what(package)),
            IntentAction::Remove { package } => format!("Remove {}", or_what(package)),
            IntentAction::Update { target } => match target {
                UpdateTarget::System => "Update the system".to_string(),
                UpdateTarget::Channels => "Update channels".to_string(),
                UpdateTarget::UserPackages => "Upgrade your installed packages".to_string(),
            },
            IntentAction::Query { package, scope } => match scope {
                QueryScope::Search => format!("Search for {}", or_what(package)),
                QueryScope::Installed => "List installed packages".to_string(),
                QueryScope::InstalledCheck => format!("Check whether {} is installed", or_what(package)),
            },
            IntentAction::Service { action, service } => match action {
                ServiceAction::List => "List services".to_string(),
                ServiceAction::Status => format!("Show status of {}", or_what(service)),
                other => {
                    let verb = other.as_str();
                    let mut chars = verb.chars();
                    let capitalised = match chars.next() {
                        Some(c) => c.to_uppercase().chain(chars).collect::<String>(),
                        None => String::new(),
                    };
                    format!("{} {}", capitalised, or_what(service))
                }
            },
            IntentAction::Maintenance { task } => match task {
                MaintenanceTask::GarbageCollect => "Collect garbage and delete old generations".to_string(),
                MaintenanceTask::DeleteOlderThan { days } => {
                    format!("Delete generations older than {} days", days)
                }
                MaintenanceTask::Optimise => "Optimise the Nix store".to_string(),
                MaintenanceTask::ListGenerations => "List generations".to_string(),
                MaintenanceTask::RollbackGeneration => "Roll back to the previous generation".to_string(),
            },
            IntentAction::Logs {
                service,
                errors_only,
            } => match (service, errors_only) {
                (Some(s), _) => format!("Show logs for {}", s),
                (None, true) => "Show recent errors".to_string(),
                (None, false) => "Show recent system logs".to_string(),
            },
            IntentAction::Troubleshoot { problem } => match problem {
                Some(p) => format!("Diagnose {} problems", p.as_str()),
                None => "Diagnose a problem".to_string(),
            },
            IntentAction::Config { setting } => format!("Show setting {}", or_what(setting)),
            IntentAction::Repeat => "Repeat the previous request".to_string(),
            IntentAction::Unknown => "Unrecognised request".to_string(),
        }
    }
}

// ============================================================================
// Intent
// ============================================================================

/// Structured interpretation of user text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub action: IntentAction,
    pub confidence: f32,
    pub entities: Vec<Entity>,
    pub original_text: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub alternatives: Vec<Intent>,
    #[serde(default)]
    pub ambiguous: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub clarification: Option<String>,
    /// Text used a pronoun ("it", "that") in place of the target
    #[serde(default)]
    pub refers_back: bool,
    /// A context substitution produced this value
    #[serde(default)]
    pub context_resolved: bool,
    /// Set when the security pre-check refused the text
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rejection: Option<String>,
}

impl Intent {
    pub fn new(action: IntentAction, confidence: f32, original_text: impl Into<String>) -> Self {
        Self {
            action,
            confidence,
            entities: Vec::new(),
            original_text: original_text.into(),
            alternatives: Vec::new(),
            ambiguous: false,
            clarification: None,
            refers_back: false,
            context_resolved: false,
            rejection: None,
        }
    }

    /// Unrecognised text
    pub fn unknown(original_text: impl Into<String>, confidence: f32) -> Self {
        Self::new(IntentAction::Unknown, confidence, original_text)
    }

    /// Text refused by the security pre-check: confidence is always zero
    pub fn rejected(original_text: impl Into<String>, reason: impl Into<String>) -> Self {
        let mut intent = Self::unknown(original_text, 0.0);
        intent.rejection = Some(reason.into());
        intent
    }

    pub fn kind(&self) -> IntentKind {
        self.action.kind()
    }

    pub fn is_rejected(&self) -> bool {
        self.rejection.is_some()
    }

    pub fn with_entities(mut self, entities: Vec<Entity>) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_alternatives(mut self, alternatives: Vec<Intent>) -> Self {
        self.alternatives = alternatives;
        self
    }

    /// Entities of one kind, in extraction order
    pub fn entities_of(&self, kind: EntityKind) -> impl Iterator<Item = &Entity> {
        self.entities.iter().filter(move |e| e.kind == kind)
    }

    /// Package candidates left open by a generic phrase
    pub fn package_candidates(&self) -> Vec<&Entity> {
        if matches!(self.action.missing_entity(), Some(EntityKind::Package)) {
            self.entities_of(EntityKind::Package).collect()
        } else {
            Vec::new()
        }
    }

    /// Copy with a new action, keeping provenance
    pub fn with_action(&self, action: IntentAction) -> Self {
        let mut next = self.clone();
        next.action = action;
        next
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_entity_for_service_list() {
        let list = IntentAction::Service {
            action: ServiceAction::List,
            service: None,
        };
        assert_eq!(list.missing_entity(), None);

        let start = IntentAction::Service {
            action: ServiceAction::Start,
            service: None,
        };
        assert_eq!(start.missing_entity(), Some(EntityKind::Service));
    }

    #[test]
    fn test_with_entity_fills_slot() {
        let install = IntentAction::Install { package: None };
        let filled = install.with_entity(EntityKind::Package, "firefox").unwrap();
        assert_eq!(
            filled,
            IntentAction::Install {
                package: Some("firefox".to_string())
            }
        );
        assert!(install.with_entity(EntityKind::Service, "nginx").is_none());
    }

    #[test]
    fn test_rejected_intent_has_zero_confidence() {
        let intent = Intent::rejected("install x; rm -rf /", "shell command separator");
        assert_eq!(intent.kind(), IntentKind::Unknown);
        assert_eq!(intent.confidence, 0.0);
        assert!(intent.is_rejected());
    }

    #[test]
    fn test_service_inverse() {
        assert_eq!(ServiceAction::Start.inverse(), Some(ServiceAction::Stop));
        assert_eq!(ServiceAction::Enable.inverse(), Some(ServiceAction::Disable));
        assert_eq!(ServiceAction::Restart.inverse(), None);
        assert!(!ServiceAction::Status.is_mutating());
    }

    #[test]
    fn test_describe_service_action() {
        let action = IntentAction::Service {
            action: ServiceAction::Restart,
            service: Some("nginx".to_string()),
        };
        assert_eq!(action.describe(), "Restart nginx");
    }

    #[test]
    fn test_intent_serializes_tagged_action() {
        let intent = Intent::new(
            IntentAction::Install {
                package: Some("firefox".to_string()),
            },
            RULE_CONFIDENCE,
            "install firefox",
        );
        let json = serde_json::to_value(&intent).unwrap();
        assert_eq!(json["action"]["type"], "install");
        assert_eq!(json["action"]["package"], "firefox");
    }
}
