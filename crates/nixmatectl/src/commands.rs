//! Command handlers for nixmatectl subcommands
//!
//! Each handler returns `Ok(true)` when the turn succeeded and `Ok(false)`
//! when it ran but failed; main maps `false` to a non-zero exit.

use crate::output;
use crate::progress_display;
use anyhow::{bail, Context, Result};
use nixmate_common::config::NixmateConfig;
use nixmate_common::pipeline::{Assistant, Outcome, Request, DEFAULT_SESSION};
use nixmate_common::safety::SafetyValidator;
use nixmate_common::system::SystemSnapshot;
use std::io::{self, BufRead, Write};
use std::path::Path;
use tokio::sync::mpsc;
use tracing::debug;

/// Progress events buffered between the executor and the display
const PROGRESS_CHANNEL_SIZE: usize = 64;

// ============================================================================
// Configuration
// ============================================================================

/// Explicit file if given, otherwise the user/system/default chain
pub fn load_config(path: Option<&Path>, debug: bool) -> Result<NixmateConfig> {
    let mut config = match path {
        Some(path) => NixmateConfig::load_from(path)
            .with_context(|| format!("Failed to load {}", path.display()))?,
        None => NixmateConfig::load()?,
    };
    if debug {
        config.dev.debug = true;
    }
    Ok(config)
}

pub fn config_show(config: &NixmateConfig) -> Result<bool> {
    let text = toml::to_string_pretty(config).context("Failed to serialize configuration")?;
    print!("{}", text);
    Ok(true)
}

pub fn config_path(explicit: Option<&Path>) -> Result<bool> {
    let mark = |p: &Path| if p.exists() { "present" } else { "not present" };

    if let Some(path) = explicit {
        println!("Active:  {} [{}]", path.display(), mark(path));
        return Ok(true);
    }
    let user = NixmateConfig::user_config_path()?;
    let system = NixmateConfig::system_config_path();
    println!("User:    {} [{}]", user.display(), mark(&user));
    println!("System:  {} [{}]", system.display(), mark(&system));
    Ok(true)
}

pub fn config_init(explicit: Option<&Path>, force: bool) -> Result<bool> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => NixmateConfig::user_config_path()?,
    };
    if path.exists() && !force {
        bail!("{} already exists (use --force to overwrite)", path.display());
    }
    NixmateConfig::default().save_to(&path)?;
    println!("Wrote {}", path.display());
    Ok(true)
}

// ============================================================================
// Prompts
// ============================================================================

/// Source of answers to clarification and confirmation prompts
pub trait Prompt {
    /// One line of input, `None` at end of input
    fn read_answer(&mut self, question: &str) -> io::Result<Option<String>>;

    fn confirm(&mut self, question: &str) -> io::Result<bool> {
        let answer = self.read_answer(&format!("{} [y/N]: ", question))?;
        Ok(matches!(
            answer.as_deref().map(|a| a.trim().to_lowercase()).as_deref(),
            Some("y") | Some("yes")
        ))
    }
}

/// Prompts on stdout, answers from any line reader
pub struct LinePrompt<R> {
    reader: R,
}

impl<R: BufRead> LinePrompt<R> {
    pub fn new(reader: R) -> Self {
        Self { reader }
    }
}

impl<R: BufRead> Prompt for LinePrompt<R> {
    fn read_answer(&mut self, question: &str) -> io::Result<Option<String>> {
        print!("{}", question);
        io::stdout().flush()?;

        let mut line = String::new();
        if self.reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        Ok(Some(line.trim().to_string()))
    }
}

/// Prompts through the controlling terminal
pub struct TermPrompt {
    term: console::Term,
}

impl TermPrompt {
    pub fn new() -> Self {
        Self {
            term: console::Term::stdout(),
        }
    }
}

impl Default for TermPrompt {
    fn default() -> Self {
        Self::new()
    }
}

impl Prompt for TermPrompt {
    fn read_answer(&mut self, question: &str) -> io::Result<Option<String>> {
        self.term.write_str(question)?;
        self.term.flush()?;
        match self.term.read_line() {
            Ok(line) => Ok(Some(line.trim().to_string())),
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => Ok(None),
            Err(e) => Err(e),
        }
    }
}

/// Prompt for stdin: the terminal when interactive, plain lines otherwise
pub fn stdin_prompt() -> Box<dyn Prompt> {
    if console::user_attended() {
        Box::new(TermPrompt::new())
    } else {
        Box::new(LinePrompt::new(io::BufReader::new(io::stdin())))
    }
}

// ============================================================================
// Turns
// ============================================================================

/// How a turn is driven and shown
#[derive(Debug, Clone)]
pub struct TurnSettings {
    pub session_id: String,
    pub dry_run: bool,
    pub auto_confirm: bool,
    /// Print the outcome as JSON and never prompt
    pub json: bool,
}

impl Default for TurnSettings {
    fn default() -> Self {
        Self {
            session_id: DEFAULT_SESSION.to_string(),
            dry_run: false,
            auto_confirm: false,
            json: false,
        }
    }
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Run one turn to completion, answering clarifications and confirmations
/// through `prompt`
pub async fn run_turn(
    assistant: &Assistant,
    text: &str,
    settings: &TurnSettings,
    prompt: &mut dyn Prompt,
) -> Result<bool> {
    let snapshot = SystemSnapshot::capture();
    let (tx, rx) = mpsc::channel(PROGRESS_CHANNEL_SIZE);
    let display = progress_display::spawn(rx, settings.json);

    let request_for = |text: &str| {
        Request::new(text)
            .with_session(settings.session_id.as_str())
            .with_dry_run(settings.dry_run)
            .with_auto_confirm(settings.auto_confirm)
            .with_snapshot(snapshot.clone())
            .with_progress(tx.clone())
    };

    let mut outcome = assistant.handle(request_for(text)).await;
    let result = loop {
        debug!("Turn outcome: {}", outcome.as_str());
        if settings.json {
            print_json(&outcome)?;
            break Ok(outcome.response().map(|r| r.success).unwrap_or(false));
        }

        match outcome {
            Outcome::Rejected(response) | Outcome::Completed(response) => {
                output::print_response(&response);
                break Ok(response.success);
            }
            Outcome::Clarify(request) => {
                output::print_clarification(&request);
                match prompt.read_answer("> ")? {
                    Some(answer) if !answer.is_empty() => {
                        outcome = assistant.handle(request_for(&answer)).await;
                    }
                    _ => {
                        println!("Okay, never mind.");
                        break Ok(true);
                    }
                }
            }
            Outcome::Confirm(request) => {
                if !prompt.confirm(&output::format_confirmation(&request))? {
                    println!("Cancelled.");
                    break Ok(true);
                }
                let options = request_for(text).options();
                let response = assistant
                    .run_intent(&settings.session_id, &request.intent, options)
                    .await;
                output::print_response(&response);
                break Ok(response.success);
            }
        }
    };

    drop(tx);
    let _ = display.await;
    result
}

// ============================================================================
// Subcommands
// ============================================================================

pub async fn ask(config: NixmateConfig, text: &str, settings: TurnSettings) -> Result<bool> {
    let assistant = Assistant::new(config);
    let mut prompt = stdin_prompt();
    run_turn(&assistant, text, &settings, prompt.as_mut()).await
}

pub fn check(program: &str, args: &[String], json: bool) -> Result<bool> {
    let verdict = SafetyValidator::new().validate(program, args);
    if json {
        print_json(&verdict)?;
    } else {
        output::print_verdict(program, args, &verdict);
    }
    Ok(verdict.is_safe)
}

pub fn estimate(config: NixmateConfig, text: &str, dry_run: bool, json: bool) -> Result<bool> {
    let assistant = Assistant::new(config).without_audit();
    let snapshot = SystemSnapshot::capture();

    match assistant.plan(text, &snapshot, dry_run) {
        Ok((command, plan)) => {
            if json {
                print_json(&serde_json::json!({ "command": command, "plan": plan }))?;
            } else {
                output::print_plan(&command, &plan);
            }
            Ok(true)
        }
        Err(e) => {
            if json {
                print_json(&serde_json::json!({
                    "error": { "kind": e.kind(), "message": e.user_message() }
                }))?;
            } else {
                output::print_error(&e.user_message());
            }
            Ok(false)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nixmate_common::config::ExecutionConfig;
    use std::io::Cursor;
    use tempfile::TempDir;

    fn assistant() -> Assistant {
        let config = NixmateConfig {
            execution: ExecutionConfig {
                dry_run: true,
                ..Default::default()
            },
            ..Default::default()
        };
        Assistant::new(config).without_audit()
    }

    fn prompt(input: &str) -> LinePrompt<Cursor<Vec<u8>>> {
        LinePrompt::new(Cursor::new(input.as_bytes().to_vec()))
    }

    #[test]
    fn test_confirm_answers() {
        assert!(prompt("y\n").confirm("Go?").unwrap());
        assert!(prompt("YES\n").confirm("Go?").unwrap());
        assert!(!prompt("n\n").confirm("Go?").unwrap());
        assert!(!prompt("").confirm("Go?").unwrap());
    }

    #[tokio::test]
    async fn test_declined_confirmation_runs_nothing() {
        let assistant = assistant();
        let settings = TurnSettings::default();
        let ok = run_turn(&assistant, "restart nginx", &settings, &mut prompt("n\n"))
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn test_confirmed_turn_runs() {
        let assistant = assistant();
        let settings = TurnSettings::default();
        let ok = run_turn(&assistant, "restart nginx", &settings, &mut prompt("y\n"))
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn test_clarification_answered_from_prompt() {
        let assistant = assistant();
        let settings = TurnSettings {
            dry_run: true,
            ..Default::default()
        };
        let ok = run_turn(&assistant, "install a browser", &settings, &mut prompt("1\n"))
            .await
            .unwrap();
        assert!(ok);
    }

    #[tokio::test]
    async fn test_rejected_input_fails_turn() {
        let assistant = assistant();
        let ok = run_turn(
            &assistant,
            "install firefox; rm -rf /",
            &TurnSettings::default(),
            &mut prompt(""),
        )
        .await
        .unwrap();
        assert!(!ok);
    }

    #[test]
    fn test_check_verdicts() {
        assert!(check("nix-env", &["-iA".to_string(), "nixpkgs.vim".to_string()], true).unwrap());
        assert!(!check("rm", &["-rf".to_string(), "/".to_string()], true).unwrap());
    }

    #[test]
    fn test_config_init_refuses_overwrite() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        assert!(config_init(Some(&path), false).unwrap());
        assert!(config_init(Some(&path), false).is_err());
        assert!(config_init(Some(&path), true).unwrap());

        let loaded = load_config(Some(&path), true).unwrap();
        assert!(loaded.dev.debug);
    }
}
