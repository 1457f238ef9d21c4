mod commands;

use std::fs::{self, OpenOptions};
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use aura_config::AuraConfig;
use clap::{Parser, Subcommand};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(name = "aura")]
#[command(version, about = "Talk to a running Aura backend", long_about = None)]
struct Cli {
    /// Backend endpoint (`host:port` or `unix:/path`), overriding the config file
    #[arg(long, global = true, value_name = "ENDPOINT")]
    endpoint: Option<String>,

    /// Config file to use instead of ~/.aura/config.toml
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Write logs to ~/.aura/logs/aura.log instead of stderr
    #[arg(long, global = true)]
    log_file: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Connect and run the health check
    Ping,

    /// Show backend service and module status
    Status,

    /// Analyze files and print their annotations
    Analyze {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Send a prompt to the backend's language model
    Chat {
        #[arg(required = true, trailing_var_arg = true)]
        prompt: Vec<String>,
    },

    /// Generate a commit message for the staged changes and commit
    Commit {
        /// Stage every change first
        #[arg(long)]
        all: bool,

        /// Print the message without committing
        #[arg(long)]
        dry_run: bool,
    },
}

fn init_tracing(to_file: bool) {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info"))
        .unwrap_or_else(|_| EnvFilter::new("warn"));

    if to_file {
        let (log_file, init_warnings) = open_log_file();
        if let Some((log_path, file)) = log_file {
            tracing_subscriber::registry()
                .with(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
                .with(env_filter)
                .init();

            tracing::info!(path = %log_path.display(), "Logging initialized");
            for warning in init_warnings {
                tracing::warn!("{warning}");
            }
            return;
        }
        for warning in init_warnings {
            eprintln!("{warning}");
        }
    }

    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(env_filter)
        .init();
}

fn open_log_file() -> (Option<(PathBuf, fs::File)>, Vec<String>) {
    let mut warnings = Vec::new();

    for candidate in log_file_candidates() {
        if let Some(parent) = candidate.parent()
            && let Err(e) = fs::create_dir_all(parent)
        {
            warnings.push(format!(
                "Failed to create log dir {}: {e}",
                parent.display()
            ));
            continue;
        }

        match OpenOptions::new().create(true).append(true).open(&candidate) {
            Ok(file) => return (Some((candidate, file)), warnings),
            Err(e) => {
                warnings.push(format!(
                    "Failed to open log file {}: {e}",
                    candidate.display()
                ));
            }
        }
    }

    (None, warnings)
}

fn log_file_candidates() -> Vec<PathBuf> {
    let mut candidates = Vec::new();
    if let Some(dir) = aura_config::aura_dir() {
        candidates.push(dir.join("logs").join("aura.log"));
    }
    candidates.push(PathBuf::from(".aura").join("logs").join("aura.log"));
    candidates
}

fn load_config(cli: &Cli) -> Result<AuraConfig> {
    let mut config = match &cli.config {
        Some(path) => AuraConfig::load_from(path)?,
        None => AuraConfig::load()?.unwrap_or_default(),
    };
    if let Some(endpoint) = &cli.endpoint {
        config.connection.endpoint = aura_config::expand_env_vars(endpoint);
        config
            .connection
            .endpoint()
            .with_context(|| format!("invalid --endpoint {endpoint}"))?;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.log_file);

    let config = load_config(&cli)?;
    match cli.command {
        Command::Ping => commands::ping(&config).await,
        Command::Status => commands::status(&config).await,
        Command::Analyze { files } => commands::analyze(&config, files).await,
        Command::Chat { prompt } => commands::chat(&config, &prompt.join(" ")).await,
        Command::Commit { all, dry_run } => commands::commit(&config, all, dry_run).await,
    }
}

#[cfg(test)]
mod tests {
    use clap::CommandFactory;

    use super::*;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn global_flags_parse_after_subcommand() {
        let cli = Cli::try_parse_from([
            "aura",
            "commit",
            "--all",
            "--dry-run",
            "--endpoint",
            "unix:/tmp/aura.sock",
        ])
        .unwrap();
        assert_eq!(cli.endpoint.as_deref(), Some("unix:/tmp/aura.sock"));
        assert!(matches!(
            cli.command,
            Command::Commit {
                all: true,
                dry_run: true
            }
        ));
    }

    #[test]
    fn chat_joins_words() {
        let cli = Cli::try_parse_from(["aura", "chat", "explain", "this", "error"]).unwrap();
        let Command::Chat { prompt } = cli.command else {
            panic!("expected chat");
        };
        assert_eq!(prompt.join(" "), "explain this error");
    }

    #[test]
    fn analyze_requires_files() {
        assert!(Cli::try_parse_from(["aura", "analyze"]).is_err());
    }
}
