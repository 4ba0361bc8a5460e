//! Deckhand CLI - mirror Notion tasks into a local store and serve live stats.

use clap::Parser;
use deckhand::cli::{Cli, Commands, ConfigCommands};
use deckhand::commands::{self, Output};
use deckhand::logging;
use std::process;

fn main() {
    let cli = Cli::parse();
    let human = cli.human_readable;

    match run(cli) {
        Ok(true) => {}
        Ok(false) => process::exit(1),
        Err(e) => {
            if human {
                eprintln!("Error: {}", e);
            } else {
                eprintln!("{}", serde_json::json!({ "error": e.to_string() }));
            }
            process::exit(1);
        }
    }
}

/// Returns `Ok(false)` when the command ran but reported failure.
fn run(cli: Cli) -> Result<bool, deckhand::Error> {
    // Held until exit so buffered file logs are flushed
    let _log_guard = logging::init(cli.log_format, cli.log_file.as_deref())?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| deckhand::Error::Other(format!("Failed to create runtime: {}", e)))?;

    runtime.block_on(run_command(cli))
}

async fn run_command(cli: Cli) -> Result<bool, deckhand::Error> {
    let human = cli.human_readable;
    let (settings, config_file) =
        commands::load_settings(cli.config_path.as_deref(), &cli.overrides())?;

    match cli.command {
        Commands::Serve { .. } => {
            commands::serve(&settings).await?;
        }
        Commands::Sync => {
            let outcome = commands::sync(&settings).await?;
            output(&outcome, human);
            return Ok(outcome.is_success());
        }
        Commands::Stats => {
            let result = commands::stats(&settings).await?;
            output(&result, human);
        }
        Commands::Tasks => {
            let result = commands::tasks(&settings).await?;
            output(&result, human);
        }
        Commands::Sessions => {
            let result = commands::sessions(&settings).await?;
            output(&result, human);
        }
        Commands::Session {
            key,
            status,
            model,
            tokens,
        } => {
            let result = commands::session(&settings, &key, status, model, tokens).await?;
            output(&result, human);
        }
        Commands::Activity { limit } => {
            let result = commands::activity(&settings, limit).await?;
            output(&result, human);
        }
        Commands::Log {
            action,
            actor,
            details,
        } => {
            let result = commands::log(&settings, &action, actor, details.as_deref()).await?;
            output(&result, human);
        }
        Commands::Config { command } => match command {
            ConfigCommands::Show => {
                let result = commands::config_show(&settings, config_file);
                output(&result, human);
            }
        },
    }

    Ok(true)
}

/// Print output in JSON or human-readable format.
fn output<T: Output>(result: &T, human: bool) {
    if human {
        println!("{}", result.to_human());
    } else {
        println!("{}", result.to_json());
    }
}
