//! Nixmate Control - plain-language system administration for NixOS

use anyhow::Result;
use clap::Parser;
use nixmate_common::logging;
use nixmate_common::pipeline::DEFAULT_SESSION;
use nixmatectl::cli::{join_text, Cli, Commands, ConfigCommands};
use nixmatectl::commands::{self, TurnSettings};
use nixmatectl::{output, repl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(true) => {}
        Ok(false) => std::process::exit(1),
        Err(e) => {
            output::print_error(&format!("{:#}", e));
            std::process::exit(1);
        }
    }
}

async fn run(cli: Cli) -> Result<bool> {
    let config_path = cli.config.as_deref();

    // `check` and `config` work without a readable configuration
    match &cli.command {
        Commands::Check {
            program,
            args,
            json,
        } => {
            logging::init_tracing(cli.debug);
            return commands::check(program, args, *json);
        }
        Commands::Config { action } => {
            logging::init_tracing(cli.debug);
            return match action {
                ConfigCommands::Show => {
                    let config = commands::load_config(config_path, cli.debug)?;
                    commands::config_show(&config)
                }
                ConfigCommands::Path => commands::config_path(config_path),
                ConfigCommands::Init { force } => commands::config_init(config_path, *force),
            };
        }
        _ => {}
    }

    let config = commands::load_config(config_path, cli.debug)?;
    logging::init_tracing(config.dev.is_debug_enabled());
    config.validate()?;

    match cli.command {
        Commands::Ask {
            text,
            session,
            dry_run,
            yes,
            json,
        } => {
            let settings = TurnSettings {
                session_id: session.unwrap_or_else(|| DEFAULT_SESSION.to_string()),
                dry_run,
                auto_confirm: yes,
                json,
            };
            commands::ask(config, &join_text(&text), settings).await
        }
        Commands::Repl { dry_run, yes } => {
            repl::start_repl(config, dry_run, yes).await?;
            Ok(true)
        }
        Commands::Estimate {
            text,
            dry_run,
            json,
        } => commands::estimate(config, &join_text(&text), dry_run, json),
        Commands::Check { .. } | Commands::Config { .. } => Ok(true),
    }
}
