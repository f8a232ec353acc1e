//! foreman - Supervisor/worker orchestration for conversational deployments
//!
//! A supervisor decides, turn by turn, whether to answer the user or to
//! delegate a task to one of several workers (analysis, Docker, Kubernetes,
//! Terraform). Each worker runs its own decide/act loop against a registry
//! of terminal actions.
//!
//! # Architecture
//!
//! The system is built around an append-only session history:
//! - Every user message, action batch, action result and answer is a Turn
//! - A transcript is rebuilt from history on every request
//! - Action results are recorded, in request order, before the next decision
//!
//! # Modules
//!
//! - `adapters`: Decision functions (chat completions, scripted) and action backends
//! - `core`: Turn loop, dispatcher, registry, worker router, history stores
//! - `domain`: Data structures (Turn, Decision, Transcript)
//! - `server`: HTTP API
//! - `cli`: Command-line interface
//!
//! # Usage
//!
//! ```bash
//! # Ask the supervisor
//! foreman chat --session demo -c repo_url=https://github.com/acme/app "deploy this repo"
//!
//! # Inspect what happened
//! foreman history demo
//!
//! # Serve the HTTP API
//! foreman serve --address 0.0.0.0:8000
//! ```

pub mod adapters;
pub mod cli;
pub mod config;
pub mod core;
pub mod domain;
pub mod server;

// Re-export main types at crate root for convenience
pub use adapters::{DecisionFunction, ScriptedDecision};
pub use core::{Orchestrator, SessionError, SessionReply, Termination};
pub use domain::{ActionRequest, ActionResult, Decision, Role, Transcript, Turn};
