//! Command-line interface for foreman.
//!
//! Provides commands for chatting with the supervisor, inspecting session
//! history, listing workers, showing configuration, and serving HTTP.

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use crate::config::{self, ResolvedConfig};
use crate::core::{Orchestrator, SessionError, Termination};
use crate::domain::{Role, Turn};
use crate::server::{self, AppState};

/// Exit code when the iteration cap forced the answer
pub const EXIT_ITERATION_CAP: i32 = 2;

/// foreman - Supervisor/worker orchestration for deployment chat
#[derive(Parser, Debug)]
#[command(name = "foreman")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Use an echoing decision function instead of the model endpoint
    #[arg(long, global = true, env = "FOREMAN_OFFLINE")]
    pub offline: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Send a message to a session and print the answer
    Chat {
        /// Session ID
        #[arg(short, long)]
        session: String,

        /// Extra context as key=value (repeatable)
        #[arg(short, long = "context", value_parser = parse_key_value)]
        context: Vec<(String, String)>,

        /// Message text
        message: String,
    },

    /// Show a session's history
    History {
        /// Session ID
        session: String,

        /// Show only the latest N turns
        #[arg(short, long)]
        limit: Option<usize>,
    },

    /// List sessions with history
    Sessions,

    /// List configured workers and their actions
    Workers,

    /// Show resolved configuration (debug)
    Config,

    /// Start the HTTP server
    Serve {
        /// Address to bind to (defaults to server.address)
        #[arg(short, long)]
        address: Option<String>,
    },
}

fn parse_key_value(raw: &str) -> Result<(String, String), String> {
    let (key, value) = raw
        .split_once('=')
        .ok_or_else(|| format!("expected key=value, got '{}'", raw))?;
    let key = key.trim();
    if key.is_empty() {
        return Err(format!("empty key in '{}'", raw));
    }
    Ok((key.to_string(), value.trim().to_string()))
}

impl Cli {
    /// Execute the CLI command
    pub async fn execute(self) -> Result<()> {
        let cfg = config::config()?;

        match self.command {
            Commands::Chat {
                session,
                context,
                message,
            } => chat(cfg, self.offline, &session, context, &message).await,
            Commands::History { session, limit } => show_history(cfg, &session, limit).await,
            Commands::Sessions => list_sessions(cfg).await,
            Commands::Workers => list_workers(cfg),
            Commands::Config => show_config(cfg),
            Commands::Serve { address } => serve(cfg, self.offline, address).await,
        }
    }
}

async fn chat(
    cfg: &ResolvedConfig,
    offline: bool,
    session_id: &str,
    context: Vec<(String, String)>,
    message: &str,
) -> Result<()> {
    let orchestrator = Orchestrator::from_config(cfg, offline).await?;
    let context: BTreeMap<String, String> = context.into_iter().collect();

    match orchestrator.handle(session_id, message, &context).await {
        Ok(reply) => {
            println!("{}", reply.response_text);
            if reply.termination != Termination::Answered {
                eprintln!(
                    "\n[Session {} stopped after {} cycles: {:?}]",
                    session_id, reply.iterations, reply.termination
                );
                std::process::exit(EXIT_ITERATION_CAP);
            }
            Ok(())
        }
        Err(SessionError::InvalidRequest(reason)) => anyhow::bail!("Invalid request: {}", reason),
        Err(e) => {
            println!("{}", e.response_text());
            eprintln!("\n[Session {} failed: {:#}]", session_id, anyhow::Error::new(e));
            std::process::exit(1);
        }
    }
}

async fn open_store(cfg: &ResolvedConfig) -> Result<Orchestrator> {
    // Offline: listing history never calls a model
    Orchestrator::from_config(cfg, true)
        .await
        .context("Failed to open history")
}

async fn show_history(cfg: &ResolvedConfig, session_id: &str, limit: Option<usize>) -> Result<()> {
    let orchestrator = open_store(cfg).await?;
    let turns = orchestrator.history(session_id, limit).await?;

    if turns.is_empty() {
        println!("No history for session {}", session_id);
        return Ok(());
    }

    for turn in &turns {
        print_turn(turn);
    }
    Ok(())
}

fn print_turn(turn: &Turn) {
    let label = match (turn.role, turn.action_name.as_deref()) {
        (Role::User, _) => "user".to_string(),
        (Role::Actor, Some(names)) => format!("actor -> {}", names),
        (Role::Actor, None) => "actor".to_string(),
        (Role::ActionResult, name) => {
            let status = turn.status.map(|s| s.as_str()).unwrap_or("?");
            format!("{} [{}]", name.unwrap_or("action"), status)
        }
    };
    println!(
        "{} {:<28} {}",
        turn.timestamp.format("%Y-%m-%d %H:%M:%S"),
        label,
        turn.content
    );
}

async fn list_sessions(cfg: &ResolvedConfig) -> Result<()> {
    let orchestrator = open_store(cfg).await?;
    let sessions = orchestrator.sessions().await?;

    if sessions.is_empty() {
        println!("No sessions found");
        return Ok(());
    }

    println!("{:<40} {:>6}", "SESSION", "TURNS");
    println!("{}", "-".repeat(47));
    for session_id in &sessions {
        let turns = orchestrator.history(session_id, None).await?;
        println!("{:<40} {:>6}", session_id, turns.len());
    }
    Ok(())
}

fn list_workers(cfg: &ResolvedConfig) -> Result<()> {
    for worker in cfg.workers() {
        println!("{}", worker.name);
        if worker.actions.is_empty() {
            println!("  (no actions)");
        }
        for action in &worker.actions {
            println!("  - {}", action.name);
        }
    }
    Ok(())
}

fn show_config(cfg: &ResolvedConfig) -> Result<()> {
    let settings = &cfg.settings;

    println!("foreman configuration");
    println!();
    println!(
        "Config file: {}",
        cfg.config_file
            .as_ref()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "(none - using defaults)".to_string())
    );
    println!();
    println!("Paths:");
    println!("  Home:     {}", cfg.home.display());
    println!("  Sessions: {}", cfg.sessions_dir().display());
    println!("  Database: {}", cfg.database_path().display());
    println!();
    println!("History:");
    println!("  Backend:        {:?}", settings.history.backend);
    println!("  Window:         {} turns", settings.history.window);
    println!("  Response limit: {} turns", settings.history.response_limit);
    println!();
    println!("Safety limits:");
    println!("  Max iterations: {}", settings.safety.max_iterations);
    println!("  Action timeout: {}s", settings.safety.action_timeout_seconds);
    println!("  Run timeout:    {}s", settings.safety.run_timeout_seconds);
    println!();
    println!("Model:");
    println!("  Endpoint: {}", settings.model.base_url);
    println!("  Model:    {}", settings.model.model);
    println!("  API key:  ${}", settings.model.api_key_env);
    println!();
    println!("Dispatch: {}", if settings.dispatch.parallel { "parallel" } else { "sequential" });
    println!(
        "Workers:  {}",
        cfg.workers()
            .iter()
            .map(|w| w.name.as_str())
            .collect::<Vec<_>>()
            .join(", ")
    );

    Ok(())
}

async fn serve(cfg: &ResolvedConfig, offline: bool, address: Option<String>) -> Result<()> {
    let orchestrator = Orchestrator::from_config(cfg, offline).await?;
    let address = address.unwrap_or_else(|| cfg.settings.server.address.clone());

    let state = Arc::new(AppState {
        orchestrator: Arc::new(orchestrator),
        response_limit: cfg.settings.history.response_limit,
    });
    server::serve(state, &address).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_key_value() {
        assert_eq!(
            parse_key_value("repo_url=https://x/y.git").unwrap(),
            ("repo_url".to_string(), "https://x/y.git".to_string())
        );
        assert_eq!(
            parse_key_value("expr=a=b").unwrap(),
            ("expr".to_string(), "a=b".to_string())
        );
        assert!(parse_key_value("novalue").is_err());
        assert!(parse_key_value("=x").is_err());
    }

    #[test]
    fn test_chat_arguments() {
        let cli = Cli::try_parse_from([
            "foreman",
            "--offline",
            "chat",
            "--session",
            "s1",
            "-c",
            "repo_url=https://x/y.git",
            "deploy it",
        ])
        .unwrap();

        assert!(cli.offline);
        match cli.command {
            Commands::Chat {
                session,
                context,
                message,
            } => {
                assert_eq!(session, "s1");
                assert_eq!(context, vec![("repo_url".to_string(), "https://x/y.git".to_string())]);
                assert_eq!(message, "deploy it");
            }
            other => panic!("unexpected command {:?}", other),
        }
    }
}
