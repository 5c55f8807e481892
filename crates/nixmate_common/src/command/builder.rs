//! Command Builder - pure per-category mapping from Intent to Command
//!
//! Fails closed: an intent that still lacks a required entity produces a
//! `BuildError`, never a guessed command.

use super::{rollback_for, Command, OperationKind};
use crate::error::BuildError;
use crate::types::{
    EntityKind, Intent, IntentAction, IntentKind, MaintenanceTask, ProblemCategory, QueryScope,
    ServiceAction, UpdateTarget,
};

/// Stateless builder
#[derive(Debug, Clone, Copy, Default)]
pub struct CommandBuilder;

impl CommandBuilder {
    pub fn new() -> Self {
        Self
    }

    pub fn build(&self, intent: &Intent) -> Result<Command, BuildError> {
        if let Some(entity) = intent.action.missing_entity() {
            return Err(BuildError::MissingEntity {
                intent: intent.kind(),
                entity,
            });
        }

        let description = intent.action.describe();
        let command = match &intent.action {
            IntentAction::Install { package } => {
                let package = required(package, intent)?;
                let attr = format!("nixpkgs.{}", package);
                Command::of("nix-env", &["-iA", attr.as_str()], description, OperationKind::Install)
                    .with_target(package)
            }
            IntentAction::Remove { package } => {
                let package = required(package, intent)?;
                Command::of("nix-env", &["-e", package], description, OperationKind::Remove)
                    .with_target(package)
            }
            IntentAction::Update { target } => build_update(*target, description),
            IntentAction::Query { package, scope } => match scope {
                QueryScope::Search => {
                    let package = required(package, intent)?;
                    Command::of("nix-env", &["-qaP", package], description, OperationKind::Search)
                        .with_target(package)
                }
                QueryScope::Installed => {
                    Command::of("nix-env", &["-q"], description, OperationKind::ListInstalled)
                }
                // `nix-env -q <name>` exits 1 when nothing matches, so list
                // the profile and look for the name in the output instead
                QueryScope::InstalledCheck => {
                    let package = required(package, intent)?;
                    Command::of("nix-env", &["-q", "--installed"], description, OperationKind::InstalledCheck)
                        .with_target(package)
                }
            },
            IntentAction::Service { action, service } => {
                build_service(*action, service.as_deref(), intent, description)?
            }
            IntentAction::Maintenance { task } => build_maintenance(*task, description),
            IntentAction::Logs {
                service,
                errors_only,
            } => match (service, errors_only) {
                (Some(unit), _) => Command::of(
                    "journalctl",
                    &["-u", unit.as_str(), "-n", "50", "--no-pager"],
                    description,
                    OperationKind::Logs,
                )
                .with_target(unit),
                (None, true) => Command::of(
                    "journalctl",
                    &["-p", "err", "-b", "--no-pager"],
                    description,
                    OperationKind::Logs,
                ),
                (None, false) => Command::of(
                    "journalctl",
                    &["-n", "50", "--no-pager"],
                    description,
                    OperationKind::Logs,
                ),
            },
            IntentAction::Troubleshoot { problem } => {
                let problem = problem.ok_or(BuildError::MissingEntity {
                    intent: IntentKind::Troubleshoot,
                    entity: EntityKind::Problem,
                })?;
                build_diagnosis(problem, description)
            }
            IntentAction::Config { setting } => {
                let setting = required(setting, intent)?;
                Command::of("nixos-option", &[setting], description, OperationKind::ShowOption)
                    .with_target(setting)
            }
            IntentAction::Repeat => return Err(BuildError::NothingToRepeat),
            IntentAction::Unknown => return Err(BuildError::Unsupported(IntentKind::Unknown)),
        };

        Ok(command)
    }
}

fn required<'a>(value: &'a Option<String>, intent: &Intent) -> Result<&'a str, BuildError> {
    match value.as_deref() {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(BuildError::MissingEntity {
            intent: intent.kind(),
            entity: intent
                .action
                .missing_entity()
                .unwrap_or(EntityKind::Package),
        }),
    }
}

fn build_update(target: UpdateTarget, description: String) -> Command {
    match target {
        UpdateTarget::System => Command::of(
            "nixos-rebuild",
            &["switch", "--upgrade"],
            description,
            OperationKind::UpdateSystem,
        )
        .elevated()
        .with_rollback(rollback_for(OperationKind::UpdateSystem, None, None)),
        UpdateTarget::Channels => Command::of(
            "nix-channel",
            &["--update"],
            description,
            OperationKind::UpdateChannels,
        )
        .elevated()
        .with_rollback(rollback_for(OperationKind::UpdateChannels, None, None)),
        UpdateTarget::UserPackages => Command::of(
            "nix-env",
            &["-u"],
            description,
            OperationKind::UpgradeUserPackages,
        )
        .with_rollback(rollback_for(OperationKind::UpgradeUserPackages, None, None)),
    }
}

fn build_service(
    action: ServiceAction,
    service: Option<&str>,
    intent: &Intent,
    description: String,
) -> Result<Command, BuildError> {
    if action == ServiceAction::List {
        return Ok(Command::of(
            "systemctl",
            &["list-units", "--type=service", "--no-pager"],
            description,
            OperationKind::ServiceList,
        ));
    }

    let unit = match service {
        Some(u) if !u.trim().is_empty() => u,
        _ => {
            return Err(BuildError::MissingEntity {
                intent: intent.kind(),
                entity: EntityKind::Service,
            })
        }
    };

    if action == ServiceAction::Status {
        return Ok(Command::of(
            "systemctl",
            &["status", unit, "--no-pager"],
            description,
            OperationKind::ServiceStatus,
        )
        .with_target(unit));
    }

    Ok(Command::of(
        "systemctl",
        &[action.as_str(), unit],
        description,
        OperationKind::ServiceControl,
    )
    .elevated()
    .with_target(unit)
    .with_rollback(rollback_for(
        OperationKind::ServiceControl,
        Some(unit),
        Some(action),
    )))
}

fn build_maintenance(task: MaintenanceTask, description: String) -> Command {
    match task {
        MaintenanceTask::GarbageCollect => Command::of(
            "nix-collect-garbage",
            &["-d"],
            description,
            OperationKind::GarbageCollect,
        )
        .elevated(),
        MaintenanceTask::DeleteOlderThan { days } => {
            let age = format!("{}d", days);
            Command::of(
                "nix-collect-garbage",
                &["--delete-older-than", age.as_str()],
                description,
                OperationKind::GarbageCollect,
            )
            .elevated()
        }
        MaintenanceTask::Optimise => Command::of(
            "nix-store",
            &["--optimise"],
            description,
            OperationKind::Optimise,
        )
        .elevated(),
        MaintenanceTask::ListGenerations => Command::of(
            "nix-env",
            &["--list-generations"],
            description,
            OperationKind::ListGenerations,
        ),
        MaintenanceTask::RollbackGeneration => Command::of(
            "nixos-rebuild",
            &["switch", "--rollback"],
            description,
            OperationKind::RollbackGeneration,
        )
        .elevated(),
    }
}

fn build_diagnosis(problem: ProblemCategory, description: String) -> Command {
    let argv: &[&str] = match problem {
        ProblemCategory::Network => &["addr", "show"],
        ProblemCategory::Audio => &["info"],
        ProblemCategory::Disk => &["-h"],
        ProblemCategory::Memory => &["-h"],
        ProblemCategory::Boot => &["-b", "-p", "err", "--no-pager"],
        ProblemCategory::Services => &["list-units", "--failed", "--no-pager"],
    };
    let program = match problem {
        ProblemCategory::Network => "ip",
        ProblemCategory::Audio => "pactl",
        ProblemCategory::Disk => "df",
        ProblemCategory::Memory => "free",
        ProblemCategory::Boot => "journalctl",
        ProblemCategory::Services => "systemctl",
    };
    Command::of(program, argv, description, OperationKind::Diagnose).with_target(problem.as_str())
}
