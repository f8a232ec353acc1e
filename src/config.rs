//! Configuration for foreman.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (FOREMAN_HOME, FOREMAN_CONFIG)
//! 2. Config file (.foreman/config.yaml)
//! 3. Defaults (~/.foreman, built-in worker roster)
//!
//! Config file discovery:
//! - FOREMAN_CONFIG names the file explicitly
//! - Otherwise the current directory and its parents are searched for .foreman/config.yaml
//! - `paths.home` is relative to the .foreman/ directory holding the file

pub mod roster;

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::{RetryPolicy, SafetyLimits};

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<Result<ResolvedConfig, String>> = OnceLock::new();

/// Config file schema (matches YAML structure)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub version: Option<String>,
    pub paths: PathsConfig,
    pub history: HistoryConfig,
    pub safety: SafetyLimits,
    pub dispatch: DispatchConfig,
    pub model: ModelConfig,
    pub supervisor: SupervisorConfig,
    /// Empty means the built-in deployment roster
    pub workers: Vec<WorkerConfig>,
    pub server: ServerConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PathsConfig {
    /// State directory (relative to the .foreman/ directory)
    pub home: Option<String>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HistoryBackend {
    #[default]
    Jsonl,
    Sqlite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    pub backend: HistoryBackend,

    /// Prior turns fed to the supervisor with each new message
    pub window: usize,

    /// Turns returned to HTTP clients with each reply
    pub response_limit: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backend: HistoryBackend::Jsonl,
            window: 10,
            response_limit: 20,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// Run the actions of one batch concurrently
    pub parallel: bool,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self { parallel: true }
    }
}

/// OpenAI-compatible chat completions endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelConfig {
    pub base_url: String,
    pub model: String,

    /// Name of the environment variable holding the API key
    pub api_key_env: String,
    pub temperature: f32,
    pub timeout_seconds: u64,
    pub retry_policy: RetryPolicy,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            model: "gpt-4o-mini".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            temperature: 0.8,
            timeout_seconds: 120,
            retry_policy: RetryPolicy::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    pub system_prompt: String,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            system_prompt: roster::SUPERVISOR_PROMPT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConfig {
    pub name: String,
    pub description: String,
    #[serde(default)]
    pub system_prompt: Option<String>,
    #[serde(default)]
    pub actions: Vec<ActionConfig>,
}

/// A terminal action a worker may request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionConfig {
    pub name: String,
    pub description: String,

    /// JSON schema of the argument object
    #[serde(default = "empty_parameters")]
    pub parameters: Value,

    #[serde(flatten)]
    pub kind: ActionKindConfig,
}

fn empty_parameters() -> Value {
    serde_json::json!({"type": "object", "properties": {}, "required": []})
}

/// How an action is carried out
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ActionKindConfig {
    /// Render `{field}` placeholders from the arguments
    Simulated { template: String },

    /// Run a program with the arguments as JSON on stdin
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
    },

    /// POST the arguments as JSON
    Webhook {
        url: String,
        #[serde(default)]
        token_env: Option<String>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8000".to_string(),
        }
    }
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to foreman home (session state)
    pub home: PathBuf,
    /// Path to config file (if found)
    pub config_file: Option<PathBuf>,
    pub settings: Settings,
}

impl ResolvedConfig {
    /// Configuration rooted at `home` with every setting at its default
    pub fn with_home(home: impl Into<PathBuf>) -> Self {
        Self {
            home: home.into(),
            config_file: None,
            settings: Settings::default(),
        }
    }

    /// $FOREMAN_HOME/sessions (JSONL backend)
    pub fn sessions_dir(&self) -> PathBuf {
        self.home.join("sessions")
    }

    /// $FOREMAN_HOME/history.db (SQLite backend)
    pub fn database_path(&self) -> PathBuf {
        self.home.join("history.db")
    }

    /// Configured workers, or the built-in roster when none are configured
    pub fn workers(&self) -> Vec<WorkerConfig> {
        if self.settings.workers.is_empty() {
            roster::builtin_workers()
        } else {
            self.settings.workers.clone()
        }
    }
}

/// Find config file by searching current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".foreman").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse a config file
pub fn load_settings(path: &Path) -> Result<Settings> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    parse_settings(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Parse YAML settings content
pub fn parse_settings(content: &str) -> Result<Settings> {
    let settings: Settings = serde_yaml::from_str(content)?;
    validate(&settings)?;
    Ok(settings)
}

fn validate(settings: &Settings) -> Result<()> {
    if settings.safety.max_iterations == 0 {
        anyhow::bail!("safety.max_iterations must be at least 1");
    }
    if settings.history.window == 0 {
        anyhow::bail!("history.window must be at least 1");
    }

    let mut names: Vec<&str> = settings.workers.iter().map(|w| w.name.as_str()).collect();
    names.sort_unstable();
    if let Some(dup) = names.windows(2).find(|pair| pair[0] == pair[1]) {
        anyhow::bail!("Worker '{}' is configured more than once", dup[0]);
    }
    if let Some(empty) = settings.workers.iter().find(|w| w.name.trim().is_empty()) {
        anyhow::bail!("Worker names cannot be empty (description: '{}')", empty.description);
    }

    Ok(())
}

/// Resolve a path that may be relative to the config file's parent
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let config_file = match std::env::var("FOREMAN_CONFIG") {
        Ok(explicit) => Some(PathBuf::from(explicit)),
        Err(_) => find_config_file(),
    };

    let settings = match config_file {
        Some(ref path) => load_settings(path)?,
        None => Settings::default(),
    };

    let home = if let Ok(env_home) = std::env::var("FOREMAN_HOME") {
        PathBuf::from(env_home)
    } else if let (Some(config_path), Some(home_path)) = (&config_file, &settings.paths.home) {
        let foreman_dir = config_path.parent().unwrap_or(Path::new("."));
        resolve_path(foreman_dir, home_path)
    } else {
        dirs::home_dir()
            .context("Failed to determine home directory")?
            .join(".foreman")
    };

    Ok(ResolvedConfig {
        home,
        config_file,
        settings,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| format!("{:#}", e)));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::default();
        assert_eq!(settings.history.backend, HistoryBackend::Jsonl);
        assert_eq!(settings.history.window, 10);
        assert_eq!(settings.history.response_limit, 20);
        assert_eq!(settings.safety.max_iterations, 25);
        assert!(settings.dispatch.parallel);
        assert_eq!(settings.server.address, "127.0.0.1:8000");
        assert!(settings.supervisor.system_prompt.starts_with("You are a supervisor agent"));
    }

    #[test]
    fn test_config_file_parsing() {
        let temp = TempDir::new().unwrap();
        let foreman_dir = temp.path().join(".foreman");
        std::fs::create_dir_all(&foreman_dir).unwrap();

        let config_path = foreman_dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        writeln!(
            file,
            r#"
version: "1.0"
paths:
  home: ./state
history:
  backend: sqlite
  window: 6
safety:
  max_iterations: 8
dispatch:
  parallel: false
workers:
  - name: builder
    description: Builds things
    actions:
      - name: make
        description: Run make
        kind: command
        program: make
        args: ["-s"]
      - name: notify
        description: Ping the deploy hook
        kind: webhook
        url: http://localhost:9000/hook
        token_env: HOOK_TOKEN
"#
        )
        .unwrap();

        let settings = load_settings(&config_path).unwrap();
        assert_eq!(settings.paths.home.as_deref(), Some("./state"));
        assert_eq!(settings.history.backend, HistoryBackend::Sqlite);
        assert_eq!(settings.history.window, 6);
        assert_eq!(settings.history.response_limit, 20);
        assert_eq!(settings.safety.max_iterations, 8);
        assert_eq!(settings.safety.action_timeout_seconds, 300);
        assert!(!settings.dispatch.parallel);

        let worker = &settings.workers[0];
        assert_eq!(worker.name, "builder");
        assert_eq!(
            worker.actions[0].kind,
            ActionKindConfig::Command {
                program: "make".to_string(),
                args: vec!["-s".to_string()],
            }
        );
        assert_eq!(
            worker.actions[1].kind,
            ActionKindConfig::Webhook {
                url: "http://localhost:9000/hook".to_string(),
                token_env: Some("HOOK_TOKEN".to_string()),
            }
        );
        assert_eq!(worker.actions[0].parameters["type"], "object");
    }

    #[test]
    fn test_duplicate_workers_rejected() {
        let yaml = r#"
workers:
  - name: docker
    description: one
  - name: docker
    description: two
"#;
        let err = parse_settings(yaml).unwrap_err();
        assert!(err.to_string().contains("docker"));
    }

    #[test]
    fn test_zero_iterations_rejected() {
        assert!(parse_settings("safety:\n  max_iterations: 0\n").is_err());
    }

    #[test]
    fn test_builtin_roster_used_when_unconfigured() {
        let config = ResolvedConfig::with_home("/tmp/foreman");
        let names: Vec<String> = config.workers().into_iter().map(|w| w.name).collect();
        assert_eq!(names, vec!["analysis", "docker", "kubernetes", "terraform"]);
        assert_eq!(config.sessions_dir(), PathBuf::from("/tmp/foreman/sessions"));
        assert_eq!(config.database_path(), PathBuf::from("/tmp/foreman/history.db"));
    }

    #[test]
    fn test_resolve_relative_path() {
        let base = PathBuf::from("/home/user/project/.foreman");

        assert_eq!(
            resolve_path(&base, "/absolute/path"),
            PathBuf::from("/absolute/path")
        );
        assert_eq!(
            resolve_path(&base, "../state"),
            PathBuf::from("/home/user/project/.foreman/../state")
        );
    }
}
