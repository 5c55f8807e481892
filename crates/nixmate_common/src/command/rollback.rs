//! Rollback generation - the undo for a mutating operation, when one exists

use super::{OperationKind, RollbackCommand};
use crate::types::ServiceAction;
use std::path::{Path, PathBuf};

pub const SYSTEM_PROFILE: &str = "/nix/var/nix/profiles/system";
pub const ROOT_CHANNELS_PROFILE: &str = "/nix/var/nix/profiles/per-user/root/channels";

/// Link to the invoking user's profile: ~/.nix-profile
fn user_profile() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("/"))
        .join(".nix-profile")
}

/// Generation a profile link currently resolves to, if it exists
pub fn profile_generation(profile: &Path) -> Option<PathBuf> {
    std::fs::canonicalize(profile).ok()
}

/// Undo for an operation on a target.
///
/// Returns `None` when the operation cannot be safely reversed. `nix-env -iA`
/// and `nix-env -e` are atomic: a failed run leaves the profile untouched,
/// so they get no undo. Generation switches are undone only when the failed
/// run actually moved the profile.
pub fn rollback_for(
    operation: OperationKind,
    target: Option<&str>,
    service_action: Option<ServiceAction>,
) -> Option<RollbackCommand> {
    match operation {
        OperationKind::UpdateSystem => Some(
            RollbackCommand::new(
                "nixos-rebuild",
                &["switch", "--rollback"],
                "Switch back to the previous system generation",
            )
            .elevated()
            .when_profile_moves(SYSTEM_PROFILE),
        ),
        OperationKind::UpdateChannels => Some(
            RollbackCommand::new("nix-channel", &["--rollback"], "Restore the previous channels")
                .elevated()
                .when_profile_moves(ROOT_CHANNELS_PROFILE),
        ),
        OperationKind::UpgradeUserPackages => Some(
            RollbackCommand::new(
                "nix-env",
                &["--rollback"],
                "Switch back to the previous profile generation",
            )
            .when_profile_moves(user_profile()),
        ),
        OperationKind::ServiceControl => {
            let unit = target?;
            let inverse = service_action?.inverse()?;
            let verb = inverse.as_str();
            let mut description = String::with_capacity(verb.len() + unit.len() + 1);
            description.push_str(&verb[..1].to_uppercase());
            description.push_str(&verb[1..]);
            description.push(' ');
            description.push_str(unit);
            Some(RollbackCommand::new("systemctl", &[verb, unit], description).elevated())
        }
        // Deleting garbage or generations, optimising and switching
        // generations have no compensating command
        _ => None,
    }
}
