//! Natural-language explanation of an execution outcome
//!
//! Built from the command description, the final state and the progress
//! snapshot. Raw stderr never appears here.

use super::{ExecutionResult, ExecutionState};
use crate::command::{Command, OperationKind};
use crate::progress::Phase;

pub fn explain(command: &Command, result: &ExecutionResult) -> String {
    let mut text = if result.dry_run {
        format!("Dry run: I would run `{}` to {}.", command.text(), lower_first(&command.description))
    } else {
        match result.state {
            ExecutionState::Completed => completed(command, result),
            ExecutionState::Failed => failed(command, result),
            ExecutionState::TimedOut => timed_out(command, result),
            ExecutionState::Cancelled => format!("{} was cancelled.", command.description),
            ExecutionState::Starting | ExecutionState::Running => {
                format!("{} is still running.", command.description)
            }
        }
    };

    if let Some(rollback) = &result.rollback {
        text.push(' ');
        if rollback.success {
            text.push_str(&format!(
                "I undid the change ({}).",
                lower_first(&rollback.description)
            ));
        } else if result.rollback_performed {
            text.push_str(&format!(
                "I tried to undo the change with `{}` but that failed too; you may need to fix this by hand.",
                rollback.command_text
            ));
        } else {
            text.push_str(&format!(
                "The undo step `{}` was not run; you may need to fix this by hand.",
                rollback.command_text
            ));
        }
    }

    text
}

fn completed(command: &Command, result: &ExecutionResult) -> String {
    let target = command.target.as_deref().unwrap_or("it");
    let mut text = match command.operation {
        OperationKind::Install => format!("{} is now installed.", target),
        OperationKind::Remove => format!("{} has been removed.", target),
        OperationKind::UpdateSystem => "The system is up to date.".to_string(),
        OperationKind::UpdateChannels => "Channels are up to date.".to_string(),
        OperationKind::UpgradeUserPackages => "Your packages are up to date.".to_string(),
        OperationKind::Search => {
            let hits = result.output.lines().filter(|l| !l.trim().is_empty()).count();
            match hits {
                0 => format!("I found no packages matching {}.", target),
                1 => format!("I found 1 package matching {}.", target),
                n => format!("I found {} packages matching {}.", n, target),
            }
        }
        OperationKind::InstalledCheck => match installed_version(&result.output, target) {
            Some(name) => format!("{} is installed ({}).", target, name),
            None => format!("{} is not installed.", target),
        },
        OperationKind::ListInstalled => {
            let count = result.output.lines().filter(|l| !l.trim().is_empty()).count();
            format!("You have {} packages installed.", count)
        }
        OperationKind::ServiceControl => format!("Done: {}.", lower_first(&command.description)),
        OperationKind::GarbageCollect => match freed(result) {
            Some(amount) => format!("Garbage collection finished and freed {}.", amount),
            None => "Garbage collection finished.".to_string(),
        },
        _ => format!("{}: done.", command.description),
    };

    if result.progress.stuck {
        text.push_str(" It went quiet for a while but finished.");
    }
    text
}

fn failed(command: &Command, result: &ExecutionResult) -> String {
    match result.exit_code {
        Some(code) => format!(
            "{} did not succeed (exit code {}).",
            command.description, code
        ),
        None => format!("{} did not succeed.", command.description),
    }
}

fn timed_out(command: &Command, result: &ExecutionResult) -> String {
    let snap = &result.progress;
    let seconds = result.timeout_ms / 1000;
    if snap.progress_lines > 0 && !snap.stuck {
        let stage = match (snap.phase, snap.percent) {
            (Phase::Starting, _) => String::new(),
            (phase, Some(pct)) => format!(" while {} ({}%)", phase, pct),
            (phase, None) => format!(" while {}", phase),
        };
        format!(
            "{} was still making progress{} but ran past its {}s limit and was stopped. \
             Patient mode or a larger timeout multiplier gives it more time.",
            command.description, stage, seconds
        )
    } else {
        format!(
            "{} stopped making progress and was stopped after {}s.",
            command.description, seconds
        )
    }
}

/// Line of a `nix-env -q` listing naming `package`: the bare name, or the
/// name followed by `-<version>`
fn installed_version<'a>(listing: &'a str, package: &str) -> Option<&'a str> {
    listing.lines().map(str::trim).find(|line| match line.strip_prefix(package) {
        Some("") => true,
        Some(rest) => rest
            .strip_prefix('-')
            .and_then(|v| v.chars().next())
            .map(|c| c.is_ascii_digit())
            .unwrap_or(false),
        None => false,
    })
}

/// "5.6 GiB" from a garbage collector summary line
fn freed(result: &ExecutionResult) -> Option<String> {
    result
        .output
        .lines()
        .chain(result.stderr.lines())
        .find_map(|line| {
            let (_, rest) = line.split_once("deleted, ")?;
            rest.strip_suffix(" freed").map(str::to_string)
        })
}

fn lower_first(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) => c.to_lowercase().chain(chars).collect(),
        None => String::new(),
    }
}
