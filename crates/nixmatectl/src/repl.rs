//! REPL - Conversational interface for Nixmate
//!
//! One session per REPL, so "it" and "again" refer to earlier turns.

use crate::commands::{self, Prompt, TurnSettings};
use anyhow::Result;
use nixmate_common::config::NixmateConfig;
use nixmate_common::pipeline::Assistant;
use owo_colors::OwoColorize;

const PROMPT: &str = "nixmate> ";

/// Built-in REPL words, checked before the assistant sees the line
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplCommand {
    Exit,
    Reset,
    Help,
}

impl ReplCommand {
    pub fn parse(line: &str) -> Option<Self> {
        match line.trim().to_lowercase().as_str() {
            "exit" | "quit" | "bye" => Some(Self::Exit),
            "reset" | "/reset" => Some(Self::Reset),
            "help" | "?" => Some(Self::Help),
            _ => None,
        }
    }
}

fn print_help() {
    println!();
    println!("Say what you want in plain words, for example:");
    println!("  install firefox");
    println!("  is nginx running?");
    println!("  restart it");
    println!("  clean up old generations");
    println!();
    println!("  reset   forget this conversation");
    println!("  exit    leave");
    println!();
}

/// Start the conversational REPL on the terminal
pub async fn start_repl(config: NixmateConfig, dry_run: bool, auto_confirm: bool) -> Result<()> {
    let assistant = Assistant::new(config);
    let settings = TurnSettings {
        session_id: uuid::Uuid::new_v4().to_string(),
        dry_run,
        auto_confirm,
        json: false,
    };

    println!("{}", "Nixmate - type 'help' for examples, 'exit' to leave".bold());
    if dry_run {
        println!("{}", "[DRY RUN] nothing will be executed".dimmed());
    }

    let mut prompt = commands::stdin_prompt();
    run_repl_loop(&assistant, &settings, prompt.as_mut()).await
}

/// Read-handle loop until `exit` or end of input
pub async fn run_repl_loop(
    assistant: &Assistant,
    settings: &TurnSettings,
    prompt: &mut dyn Prompt,
) -> Result<()> {
    loop {
        let input = match prompt.read_answer(PROMPT)? {
            Some(line) => line,
            None => break,
        };
        if input.is_empty() {
            continue;
        }

        match ReplCommand::parse(&input) {
            Some(ReplCommand::Exit) => {
                println!("Goodbye.");
                break;
            }
            Some(ReplCommand::Reset) => {
                assistant.reset(&settings.session_id).await;
                println!("Conversation cleared.");
            }
            Some(ReplCommand::Help) => print_help(),
            None => {
                // A failed turn does not end the session
                commands::run_turn(assistant, &input, settings, prompt).await?;
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commands::LinePrompt;
    use nixmate_common::config::ExecutionConfig;
    use std::io::Cursor;

    #[test]
    fn test_builtin_words() {
        assert_eq!(ReplCommand::parse(" Quit "), Some(ReplCommand::Exit));
        assert_eq!(ReplCommand::parse("reset"), Some(ReplCommand::Reset));
        assert_eq!(ReplCommand::parse("?"), Some(ReplCommand::Help));
        assert_eq!(ReplCommand::parse("restart it"), None);
    }

    #[tokio::test]
    async fn test_context_carries_across_turns() {
        let config = NixmateConfig {
            execution: ExecutionConfig {
                dry_run: true,
                ..Default::default()
            },
            ..Default::default()
        };
        let assistant = Assistant::new(config).without_audit();
        let settings = TurnSettings {
            session_id: "repl-test".to_string(),
            dry_run: true,
            ..Default::default()
        };
        let mut prompt = LinePrompt::new(Cursor::new(b"what is nginx\nstart it\nexit\n".to_vec()));

        run_repl_loop(&assistant, &settings, &mut prompt).await.unwrap();

        let session = assistant.sessions().get_or_create("repl-test", chrono::Utc::now());
        let ctx = session.lock().await;
        assert_eq!(ctx.turns.len(), 2);
        assert!(ctx.last_resolved.as_ref().map(|i| i.context_resolved).unwrap_or(false));
    }
}
