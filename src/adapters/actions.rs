//! Terminal action backends built from configuration.
//!
//! - [`SimulatedAction`]: renders a text template from the arguments
//! - [`CommandAction`]: runs a subprocess with the arguments as JSON on stdin
//! - [`WebhookAction`]: POSTs the arguments as JSON to an HTTP endpoint

use std::process::Stdio;
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde_json::Value;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::config::{ActionConfig, ActionKindConfig};
use crate::core::Action;

/// Build the capability described by an action config
pub fn build_action(config: &ActionConfig) -> Result<Arc<dyn Action>> {
    let action: Arc<dyn Action> = match &config.kind {
        ActionKindConfig::Simulated { template } => Arc::new(SimulatedAction::new(
            &config.name,
            &config.description,
            config.parameters.clone(),
            template,
        )),
        ActionKindConfig::Command { program, args } => Arc::new(CommandAction::new(
            &config.name,
            &config.description,
            config.parameters.clone(),
            program,
            args.clone(),
        )),
        ActionKindConfig::Webhook { url, token_env } => {
            let token = match token_env {
                Some(var) => Some(std::env::var(var).with_context(|| {
                    format!("{} environment variable required by action '{}'", var, config.name)
                })?),
                None => None,
            };
            Arc::new(WebhookAction::new(
                &config.name,
                &config.description,
                config.parameters.clone(),
                url,
                token,
            ))
        }
    };
    Ok(action)
}

/// Renders `{field}` placeholders from the argument object.
///
/// A placeholder missing from the arguments falls back to the `default`
/// declared for that property in the parameter schema.
pub struct SimulatedAction {
    name: String,
    description: String,
    parameters: Value,
    template: String,
}

impl SimulatedAction {
    pub fn new(name: &str, description: &str, parameters: Value, template: &str) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
            template: template.to_string(),
        }
    }

    fn lookup(&self, arguments: &Value, field: &str) -> Option<String> {
        let value = arguments
            .get(field)
            .or_else(|| self.parameters.pointer(&format!("/properties/{}/default", field)))?;
        match value {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        }
    }

    pub fn render(&self, arguments: &Value) -> Result<String> {
        let mut rendered = String::with_capacity(self.template.len());
        let mut rest = self.template.as_str();

        while let Some(start) = rest.find('{') {
            rendered.push_str(&rest[..start]);
            let after = &rest[start + 1..];
            let end = after
                .find('}')
                .ok_or_else(|| anyhow!("unterminated placeholder in template for '{}'", self.name))?;
            let field = &after[..end];
            let value = self
                .lookup(arguments, field)
                .ok_or_else(|| anyhow!("missing argument '{}'", field))?;
            rendered.push_str(&value);
            rest = &after[end + 1..];
        }
        rendered.push_str(rest);

        Ok(rendered)
    }
}

#[async_trait]
impl Action for SimulatedAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, arguments: Value) -> Result<String> {
        self.render(&arguments)
    }
}

/// Runs a program, writing the arguments JSON to stdin and returning stdout.
///
/// The dispatcher's timeout drops the future; `kill_on_drop` reaps the child.
pub struct CommandAction {
    name: String,
    description: String,
    parameters: Value,
    program: String,
    args: Vec<String>,
}

impl CommandAction {
    pub fn new(
        name: &str,
        description: &str,
        parameters: Value,
        program: &str,
        args: Vec<String>,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
            program: program.to_string(),
            args,
        }
    }
}

#[async_trait]
impl Action for CommandAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, arguments: Value) -> Result<String> {
        let input = serde_json::to_vec(&arguments).context("Failed to encode arguments")?;

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("Failed to spawn '{}' for action '{}'", self.program, self.name))?;

        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(&input)
                .await
                .with_context(|| format!("Failed to write to '{}' stdin", self.program))?;
        }

        let output = child
            .wait_with_output()
            .await
            .with_context(|| format!("Failed to wait for '{}'", self.program))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            let exit_code = output.status.code().unwrap_or(-1);
            anyhow::bail!(
                "'{}' failed with exit code {}: {}",
                self.program,
                exit_code,
                stderr.trim()
            );
        }

        let stdout = String::from_utf8(output.stdout)
            .with_context(|| format!("'{}' output is not valid UTF-8", self.program))?;
        Ok(stdout.trim_end().to_string())
    }
}

/// POSTs the arguments JSON, optionally with a bearer token
pub struct WebhookAction {
    name: String,
    description: String,
    parameters: Value,
    url: String,
    token: Option<String>,
    client: reqwest::Client,
}

impl WebhookAction {
    pub fn new(
        name: &str,
        description: &str,
        parameters: Value,
        url: &str,
        token: Option<String>,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            parameters,
            url: url.to_string(),
            token,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl Action for WebhookAction {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn parameters(&self) -> Value {
        self.parameters.clone()
    }

    async fn execute(&self, arguments: Value) -> Result<String> {
        let mut request = self
            .client
            .post(&self.url)
            .header("Content-Type", "application/json")
            .json(&arguments);
        if let Some(token) = &self.token {
            request = request.header("Authorization", format!("Bearer {}", token));
        }

        let response = request
            .send()
            .await
            .with_context(|| format!("Failed to reach webhook for action '{}'", self.name))?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        if !status.is_success() {
            anyhow::bail!("Webhook error ({}): {}", status, text.trim());
        }

        Ok(text)
    }
}
