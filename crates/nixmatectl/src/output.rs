//! Output formatting - plain ASCII terminal output
//!
//! `format_*` functions build uncoloured text; `print_*` add colour.

use nixmate_common::ambiguity::ClarificationRequest;
use nixmate_common::command::Command;
use nixmate_common::pipeline::{ConfirmationRequest, Response};
use nixmate_common::safety::SafetyVerdict;
use nixmate_common::timeout::{BaseSource, TimeoutPlan};
use owo_colors::OwoColorize;

pub const THIN_SEPARATOR: &str = "------------------------------------------------------------";

/// "450ms", "12.3s", "4m 05s", "1h 30m"
pub fn format_duration_ms(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else if ms < 60_000 {
        format!("{:.1}s", ms as f64 / 1000.0)
    } else if ms < 3_600_000 {
        format!("{}m {:02}s", ms / 60_000, (ms % 60_000) / 1000)
    } else {
        format!("{}h {:02}m", ms / 3_600_000, (ms % 3_600_000) / 60_000)
    }
}

/// Display a response to the user
pub fn print_response(response: &Response) {
    println!();
    if response.success {
        println!("{}", response.natural_language_response);
    } else {
        println!("{}", response.natural_language_response.bright_red());
    }

    if let Some(cmd) = &response.executed_command_text {
        let marker = if response.dry_run { "[DRY RUN]" } else { "[RAN]" };
        println!(
            "{} {} {}",
            marker.dimmed(),
            cmd.cyan(),
            format!("({})", format_duration_ms(response.duration_ms)).dimmed()
        );
    }
    if response.rollback_performed {
        println!("{}", "[ROLLBACK] the change was undone".yellow());
    }

    if let Some(raw) = response.raw_output.as_deref().filter(|r| !r.trim().is_empty()) {
        println!();
        println!("{}", THIN_SEPARATOR.dimmed());
        println!("{}", "[RAW OUTPUT]".dimmed());
        println!("{}", raw.trim_end());
        println!("{}", THIN_SEPARATOR.dimmed());
    }
    if let Some(detail) = response.error.as_ref().and_then(|e| e.detail.as_deref()) {
        println!("{} {}", "[DEBUG]".dimmed(), detail.dimmed());
    }
    println!();
}

/// Display an error
pub fn print_error(message: &str) {
    eprintln!();
    eprintln!("[ERROR] {}", message.red());
    eprintln!();
}

pub fn print_clarification(request: &ClarificationRequest) {
    println!();
    let mut lines = request.format_menu().lines().map(str::to_string).collect::<Vec<_>>();
    if !lines.is_empty() {
        let question = lines.remove(0);
        println!("{}", question.bold());
    }
    for line in lines {
        println!("  {}", line);
    }
}

/// Confirmation prompt text
pub fn format_confirmation(request: &ConfirmationRequest) -> String {
    format!(
        "{} (time limit {})",
        request.question(),
        format_duration_ms(request.timeout_ms)
    )
}

pub fn format_verdict(program: &str, args: &[String], verdict: &SafetyVerdict) -> Vec<String> {
    let mut line = program.to_string();
    for arg in args {
        line.push(' ');
        line.push_str(arg);
    }

    let mut out = Vec::new();
    if verdict.is_safe {
        out.push(format!("[ALLOWED] {}", line));
    } else {
        out.push(format!("[BLOCKED] {}", line));
        if let Some(reason) = &verdict.reason {
            out.push(format!("  Reason:     {}", reason));
        }
        if let Some(suggestion) = &verdict.suggestion {
            out.push(format!("  Suggestion: {}", suggestion));
        }
        if let Some(rule) = &verdict.rule {
            out.push(format!("  Rule:       {}", rule));
        }
    }
    out
}

pub fn print_verdict(program: &str, args: &[String], verdict: &SafetyVerdict) {
    let lines = format_verdict(program, args, verdict);
    for (i, line) in lines.iter().enumerate() {
        if i > 0 {
            println!("{}", line);
        } else if verdict.is_safe {
            println!("{}", line.bright_green());
        } else {
            println!("{}", line.bright_red());
        }
    }
}

pub fn format_plan(command: &Command, plan: &TimeoutPlan) -> Vec<String> {
    let base = match (plan.base_source, plan.size_bucket) {
        (BaseSource::CustomTimeout, _) => "custom timeout".to_string(),
        (BaseSource::PackageSize, Some(bucket)) => format!("package size: {}", bucket.as_str()),
        (BaseSource::PackageSize, None) => "package size".to_string(),
        (BaseSource::Operation, _) => format!("operation: {}", command.operation.as_str()),
    };

    let mut out = vec![
        format!("Command:   {}", command.text()),
        format!("Base:      {} ({})", format_duration_ms(plan.base_ms), base),
    ];
    if plan.modifiers.is_empty() {
        out.push("Modifiers: none".to_string());
    } else {
        out.push("Modifiers:".to_string());
        for m in &plan.modifiers {
            out.push(format!("  x{:<5} {}", format!("{:.2}", m.factor), m.kind.as_str()));
        }
    }
    let mut last = format!("Limit:     {}", format_duration_ms(plan.final_ms));
    if plan.dry_run_capped {
        last.push_str(" (dry run cap)");
    }
    out.push(last);
    out
}

pub fn print_plan(command: &Command, plan: &TimeoutPlan) {
    println!();
    for line in format_plan(command, plan) {
        println!("{}", line);
    }
    println!();
}

#[cfg(test)]
mod tests {
    use super::*;
    use nixmate_common::command::OperationKind;
    use nixmate_common::timeout::{Modifier, ModifierKind};

    #[test]
    fn test_duration_formats() {
        assert_eq!(format_duration_ms(450), "450ms");
        assert_eq!(format_duration_ms(12_300), "12.3s");
        assert_eq!(format_duration_ms(245_000), "4m 05s");
        assert_eq!(format_duration_ms(5_400_000), "1h 30m");
    }

    #[test]
    fn test_blocked_verdict_lists_reason() {
        let verdict = SafetyVerdict::block(
            "program_not_allowed",
            "'curl' is not an allowed program",
            Some("Describe what you want in plain words.".to_string()),
        );
        let lines = format_verdict("curl", &["example.com".to_string()], &verdict);
        assert_eq!(lines[0], "[BLOCKED] curl example.com");
        assert!(lines[1].contains("not an allowed program"));
        assert!(lines[2].contains("plain words"));
        assert!(lines[3].ends_with("program_not_allowed"));
    }

    #[test]
    fn test_plan_lines() {
        let command = Command::of("nix-collect-garbage", &["-d"], "Collect garbage", OperationKind::GarbageCollect);
        let plan = TimeoutPlan {
            base_ms: 600_000,
            base_source: BaseSource::Operation,
            size_bucket: None,
            modifiers: vec![Modifier {
                kind: ModifierKind::PatientMode,
                factor: 2.0,
            }],
            final_ms: 1_200_000,
            dry_run_capped: false,
        };
        let lines = format_plan(&command, &plan);
        assert_eq!(lines[0], "Command:   nix-collect-garbage -d");
        assert!(lines[1].starts_with("Base:      10m 00s"));
        assert!(lines.iter().any(|l| l.contains("patient mode")));
        assert_eq!(lines.last().map(String::as_str), Some("Limit:     20m 00s"));
    }
}
