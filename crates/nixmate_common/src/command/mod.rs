//! Commands - concrete program + argument vector ready for execution
//!
//! A `Command` is built fresh per intent and never mutated afterwards. It is
//! never a shell string: program and argv are passed to the OS separately.

mod builder;
mod rollback;

pub use builder::CommandBuilder;
pub use rollback::{profile_generation, rollback_for};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// What a command does, for timeout estimation and reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Install,
    Remove,
    UpdateSystem,
    UpdateChannels,
    UpgradeUserPackages,
    Search,
    ListInstalled,
    InstalledCheck,
    ServiceControl,
    ServiceStatus,
    ServiceList,
    GarbageCollect,
    Optimise,
    ListGenerations,
    RollbackGeneration,
    Logs,
    Diagnose,
    ShowOption,
    /// A compensating command run after a failure
    Rollback,
    /// Anything built outside the intent pipeline
    Other,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Install => "install",
            OperationKind::Remove => "remove",
            OperationKind::UpdateSystem => "update_system",
            OperationKind::UpdateChannels => "update_channels",
            OperationKind::UpgradeUserPackages => "upgrade_user_packages",
            OperationKind::Search => "search",
            OperationKind::ListInstalled => "list_installed",
            OperationKind::InstalledCheck => "installed_check",
            OperationKind::ServiceControl => "service_control",
            OperationKind::ServiceStatus => "service_status",
            OperationKind::ServiceList => "service_list",
            OperationKind::GarbageCollect => "garbage_collect",
            OperationKind::Optimise => "optimise",
            OperationKind::ListGenerations => "list_generations",
            OperationKind::RollbackGeneration => "rollback_generation",
            OperationKind::Logs => "logs",
            OperationKind::Diagnose => "diagnose",
            OperationKind::ShowOption => "show_option",
            OperationKind::Rollback => "rollback",
            OperationKind::Other => "other",
        }
    }

    /// Changes system or profile state
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            OperationKind::Install
                | OperationKind::Remove
                | OperationKind::UpdateSystem
                | OperationKind::UpdateChannels
                | OperationKind::UpgradeUserPackages
                | OperationKind::ServiceControl
                | OperationKind::GarbageCollect
                | OperationKind::Optimise
                | OperationKind::RollbackGeneration
                | OperationKind::Rollback
        )
    }
}

/// Compensating command recorded alongside a mutating one
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollbackCommand {
    pub program: String,
    pub argv: Vec<String>,
    pub requires_elevation: bool,
    pub description: String,
    /// Profile link that must point at a new generation after the failed
    /// run for the undo to apply. Without it the undo always applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub profile: Option<PathBuf>,
}

impl RollbackCommand {
    pub fn new(program: &str, argv: &[&str], description: impl Into<String>) -> Self {
        Self {
            program: program.to_string(),
            argv: argv.iter().map(|a| a.to_string()).collect(),
            requires_elevation: false,
            description: description.into(),
            profile: None,
        }
    }

    pub fn elevated(mut self) -> Self {
        self.requires_elevation = true;
        self
    }

    /// Apply only if the run switched `profile` to another generation
    pub fn when_profile_moves(mut self, profile: impl AsRef<Path>) -> Self {
        self.profile = Some(profile.as_ref().to_path_buf());
        self
    }

    /// Executable form. A rollback is never rolled back itself.
    pub fn to_command(&self) -> Command {
        Command {
            program: self.program.clone(),
            argv: self.argv.clone(),
            requires_elevation: self.requires_elevation,
            description: self.description.clone(),
            operation: OperationKind::Rollback,
            target: None,
            rollback: None,
        }
    }

    pub fn text(&self) -> String {
        render(&self.program, &self.argv)
    }
}

/// Program + argv + metadata
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Command {
    pub program: String,
    pub argv: Vec<String>,
    pub requires_elevation: bool,
    /// Human description ("Install firefox")
    pub description: String,
    pub operation: OperationKind,
    /// Package or unit the command acts on
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rollback: Option<RollbackCommand>,
}

impl Command {
    pub fn new(
        program: impl Into<String>,
        argv: Vec<String>,
        description: impl Into<String>,
        operation: OperationKind,
    ) -> Self {
        Self {
            program: program.into(),
            argv,
            requires_elevation: false,
            description: description.into(),
            operation,
            target: None,
            rollback: None,
        }
    }

    /// Same as `new`, from string slices
    pub fn of(program: &str, argv: &[&str], description: impl Into<String>, operation: OperationKind) -> Self {
        Self::new(
            program,
            argv.iter().map(|a| a.to_string()).collect(),
            description,
            operation,
        )
    }

    pub fn elevated(mut self) -> Self {
        self.requires_elevation = true;
        self
    }

    pub fn with_target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn with_rollback(mut self, rollback: Option<RollbackCommand>) -> Self {
        self.rollback = rollback;
        self
    }

    /// Display form, e.g. `nix-env -iA nixpkgs.firefox`
    pub fn text(&self) -> String {
        render(&self.program, &self.argv)
    }
}

impl std::fmt::Display for Command {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text())
    }
}

fn render(program: &str, argv: &[String]) -> String {
    let mut parts = Vec::with_capacity(argv.len() + 1);
    parts.push(program.to_string());
    parts.extend(argv.iter().cloned());
    parts.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_rendering() {
        let cmd = Command::of("nix-env", &["-iA", "nixpkgs.firefox"], "Install firefox", OperationKind::Install);
        assert_eq!(cmd.text(), "nix-env -iA nixpkgs.firefox");
        assert_eq!(cmd.to_string(), cmd.text());
    }

    #[test]
    fn test_rollback_to_command_has_no_rollback() {
        let rb = RollbackCommand::new("nix-env", &["-e", "firefox"], "Remove firefox").elevated();
        let cmd = rb.to_command();
        assert_eq!(cmd.operation, OperationKind::Rollback);
        assert!(cmd.rollback.is_none());
        assert!(cmd.requires_elevation);
    }
}
