//! CLI - Command-line argument parsing
//!
//! Defines the CLI structure using clap.
//! Keeps argument parsing separate from execution logic.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Nixmate CLI
#[derive(Parser, Debug)]
#[command(name = "nixmatectl")]
#[command(about = "Nixmate - plain-language system administration for NixOS", long_about = None)]
#[command(version)]
#[command(disable_help_subcommand = true)]
pub struct Cli {
    /// Configuration file (overrides the user and system files)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Show raw command output and debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run one request, e.g. `nixmatectl ask install firefox`
    Ask {
        /// The request in plain words
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,

        /// Conversation to continue
        #[arg(long)]
        session: Option<String>,

        /// Show what would run without running it
        #[arg(long)]
        dry_run: bool,

        /// Do not ask for confirmation
        #[arg(long, short = 'y')]
        yes: bool,

        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// Interactive conversation; context carries across turns
    Repl {
        /// Show what would run without running it
        #[arg(long)]
        dry_run: bool,

        /// Do not ask for confirmation
        #[arg(long, short = 'y')]
        yes: bool,
    },

    /// Ask the safety validator about a command line
    Check {
        program: String,

        #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
        args: Vec<String>,

        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// Show the time budget the request would get
    Estimate {
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,

        /// Estimate as a dry run
        #[arg(long)]
        dry_run: bool,

        /// Output JSON only
        #[arg(long)]
        json: bool,
    },

    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        action: ConfigCommands,
    },
}

/// Config subcommands
#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Print the effective configuration as TOML
    Show,
    /// Print where the configuration is read from and written to
    Path,
    /// Write a default configuration file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Joined free-text words of `ask` and `estimate`
pub fn join_text(words: &[String]) -> String {
    words.join(" ")
}
