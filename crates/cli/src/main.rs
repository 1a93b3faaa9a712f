//! CLI entrypoint and subcommand orchestration.

mod config;
mod repl;
#[cfg(test)]
mod test_support;

use std::sync::Arc;

use clap::{Parser, Subcommand};
use client::{BroadcastHub, ChatBackend, CredentialSource, HttpBackend, StaticToken, TokenFile};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::repl::{Repl, SessionFactory};

/// Top-level command-line arguments for the parley client.
#[derive(Parser)]
#[command(name = "parley")]
#[command(about = "Multi-model chat client", version = "0.1.0")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long, default_value = "warn")]
    log_level: String,

    /// Enable debug logging to ~/.parley/logs/debug.log
    #[arg(long, default_value_t = false)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

/// CLI subcommands available in the application.
#[derive(Subcommand)]
enum Commands {
    /// Interactive chat REPL (default when no subcommand is given)
    Chat {
        /// Model to select on start; defaults to config, then the first listed model
        #[arg(short, long)]
        model: Option<String>,

        /// Number of client instances sharing one broadcast hub
        #[arg(long, default_value_t = 1)]
        tabs: usize,
    },

    /// List models with their availability
    Models,

    /// Store the bearer token used for the chat server
    Login {
        /// Opaque bearer token
        #[arg(long)]
        token: String,
    },

    /// Remove the stored bearer token
    Logout,
}

impl Commands {
    fn label(&self) -> &'static str {
        match self {
            Commands::Chat { .. } => "chat",
            Commands::Models => "models",
            Commands::Login { .. } => "login",
            Commands::Logout => "logout",
        }
    }
}

#[tokio::main]
/// Program entrypoint.
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let command = cli.command.unwrap_or(Commands::Chat {
        model: None,
        tabs: 1,
    });

    // WorkerGuard must outlive main() so buffered file writes are flushed on exit.
    let _file_guard = init_tracing(&cli.log_level, cli.debug);
    if cli.debug {
        info!(command = command.label(), "parley session started");
    }

    let config = Config::load(cli.config.as_deref())?;

    let result = match command {
        Commands::Chat { model, tabs } => cmd_chat(&config, model, tabs).await,
        Commands::Models => cmd_models(&config).await,
        Commands::Login { token } => cmd_login(&config, &token),
        Commands::Logout => cmd_logout(&config),
    };
    if let Err(e) = &result {
        error!("Command failed: {e:#}");
    }
    result
}

/// Console logs go to stderr; `--debug` adds a daily-rotated debug file.
fn init_tracing(
    log_level: &str,
    debug: bool,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let console_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let console = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_filter(console_filter);

    if !debug {
        tracing_subscriber::registry().with(console).init();
        return None;
    }

    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    let log_dir = std::path::PathBuf::from(home).join(".parley").join("logs");
    std::fs::create_dir_all(&log_dir).ok();
    let appender = tracing_appender::rolling::daily(&log_dir, "debug.log");
    let (writer, guard) = tracing_appender::non_blocking(appender);
    let file = fmt::layer()
        .with_writer(writer)
        .with_target(true)
        .with_ansi(false)
        .with_filter(EnvFilter::new(
            "debug,hyper_util=info,rustls=info,reqwest=info,tungstenite=info",
        ));
    tracing_subscriber::registry()
        .with(console)
        .with(file)
        .init();
    Some(guard)
}

fn credential_source(config: &Config) -> Arc<dyn CredentialSource> {
    match &config.auth.token_override {
        Some(token) => Arc::new(StaticToken::new(token.clone())),
        None => Arc::new(TokenFile::new(config.auth.token_file())),
    }
}

async fn cmd_chat(config: &Config, model: Option<String>, tabs: usize) -> anyhow::Result<()> {
    let credential = credential_source(config);
    let backend: Arc<dyn ChatBackend> =
        Arc::new(HttpBackend::new(config.base_url()?, credential.clone()));
    let factory = SessionFactory {
        backend: backend.clone(),
        credential,
        hub: BroadcastHub::new(config.client.bus_capacity),
        ws_url: config.ws_url()?,
    };

    let model = match model.or_else(|| config.default_model().map(str::to_string)) {
        Some(model) => proto::ModelName::new(model),
        None => backend
            .models()
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("server lists no models"))?,
    };

    let mut repl = Repl::start(factory, model, tabs.max(1)).await;
    repl.run().await?;
    Ok(())
}

async fn cmd_models(config: &Config) -> anyhow::Result<()> {
    let backend = HttpBackend::new(config.base_url()?, credential_source(config));
    let models = backend.models().await?;
    let availability = backend.availability().await.unwrap_or_else(|e| {
        eprintln!("availability unknown: {e}");
        Default::default()
    });
    for model in models {
        let status = match availability.get(&model) {
            Some(true) => "available",
            Some(false) => "unavailable",
            None => "unknown",
        };
        println!("{model:<24} {status}");
    }
    Ok(())
}

fn cmd_login(config: &Config, token: &str) -> anyhow::Result<()> {
    if token.trim().is_empty() {
        anyhow::bail!("token must not be empty");
    }
    let file = TokenFile::new(config.auth.token_file());
    file.save(token)?;
    println!("Token saved to {}", file.path().display());
    Ok(())
}

fn cmd_logout(config: &Config) -> anyhow::Result<()> {
    let file = TokenFile::new(config.auth.token_file());
    if file.clear()? {
        println!("Token removed from {}", file.path().display());
    } else {
        println!("No stored token at {}", file.path().display());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_subcommand_parses_to_default_chat() {
        let cli = Cli::try_parse_from(["parley"]).expect("parse");
        assert!(cli.command.is_none());
        assert_eq!(cli.log_level, "warn");
        assert!(!cli.debug);
    }

    #[test]
    fn chat_accepts_model_and_tabs() {
        let cli = Cli::try_parse_from(["parley", "chat", "--model", "groq", "--tabs", "2"])
            .expect("parse");
        match cli.command {
            Some(Commands::Chat { model, tabs }) => {
                assert_eq!(model.as_deref(), Some("groq"));
                assert_eq!(tabs, 2);
            }
            _ => panic!("expected chat command"),
        }
    }

    #[test]
    fn login_requires_token_flag() {
        assert!(Cli::try_parse_from(["parley", "login"]).is_err());
        let cli = Cli::try_parse_from(["parley", "login", "--token", "abc"]).expect("parse");
        assert!(matches!(cli.command, Some(Commands::Login { token }) if token == "abc"));
    }

    #[test]
    fn env_token_override_wins_over_file() {
        let mut config = Config::default();
        config.auth.token_path = "/nonexistent/parley/token".to_string();
        assert_eq!(credential_source(&config).bearer_token(), None);

        config.auth.token_override = Some("env-token".to_string());
        assert_eq!(
            credential_source(&config).bearer_token().as_deref(),
            Some("env-token")
        );
    }

    #[test]
    fn login_then_logout_round_trips_token_file() {
        let tmp = tempfile::tempdir().expect("tempdir");
        let mut config = Config::default();
        config.auth.token_path = tmp.path().join("token").to_string_lossy().to_string();

        cmd_login(&config, "secret").expect("login");
        assert_eq!(
            TokenFile::new(config.auth.token_file()).load().as_deref(),
            Some("secret")
        );
        cmd_logout(&config).expect("logout");
        assert_eq!(TokenFile::new(config.auth.token_file()).load(), None);
        assert!(cmd_login(&config, "  ").is_err());
    }
}
