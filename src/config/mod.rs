//! Service configuration.
//!
//! Settings come from an optional YAML file and are then overridden by
//! environment variables.  Every field has a default so the service
//! runs with nothing but `ANTHROPIC_API_KEY` set.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::llm::anthropic::{DEFAULT_ENDPOINT, DEFAULT_MAX_TOKENS, DEFAULT_MODEL};
use crate::tools::create_file::{DEFAULT_CHUNK_DELAY, DEFAULT_CHUNK_SIZE};

/// Top-level configuration loaded from `filegate.yaml`.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub anthropic: AnthropicConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Origins allowed to open the session socket; `*` allows any.
    #[serde(default = "default_allowed_origins")]
    pub allowed_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            port: default_port(),
            allowed_origins: default_allowed_origins(),
        }
    }
}

fn default_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    4000
}

fn default_allowed_origins() -> Vec<String> {
    vec!["*".to_string()]
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct AnthropicConfig {
    /// API key: plain text or an env-var reference like `$ANTHROPIC_API_KEY`.
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,
}

impl Default for AnthropicConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            model: default_model(),
            endpoint: default_endpoint(),
            max_tokens: default_max_tokens(),
        }
    }
}

fn default_model() -> String {
    DEFAULT_MODEL.to_string()
}

fn default_endpoint() -> String {
    DEFAULT_ENDPOINT.to_string()
}

fn default_max_tokens() -> u32 {
    DEFAULT_MAX_TOKENS
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
pub struct WorkspaceConfig {
    /// Directory `create_file` writes into.  Relative paths are kept
    /// relative so reported file paths read `workspace/<file>`.
    #[serde(default = "default_workspace_dir")]
    pub dir: PathBuf,
    /// Bytes per written slice.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Pause between slices, in milliseconds.
    #[serde(default = "default_chunk_delay_ms")]
    pub chunk_delay_ms: u64,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self {
            dir: default_workspace_dir(),
            chunk_size: default_chunk_size(),
            chunk_delay_ms: default_chunk_delay_ms(),
        }
    }
}

impl WorkspaceConfig {
    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}

fn default_workspace_dir() -> PathBuf {
    PathBuf::from("workspace")
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}

fn default_chunk_delay_ms() -> u64 {
    DEFAULT_CHUNK_DELAY.as_millis() as u64
}

impl Config {
    /// Read the YAML file at `path` (if any), apply environment
    /// overrides and validate.
    pub async fn load(path: Option<&Path>) -> anyhow::Result<Config> {
        let mut config = match path {
            Some(path) => {
                let contents = tokio::fs::read_to_string(path)
                    .await
                    .with_context(|| format!("failed to read config file: {}", path.display()))?;
                Self::from_yaml(&contents)?
            }
            None => Config::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        config.validate()?;

        tracing::debug!(
            port = config.server.port,
            model = %config.anthropic.model,
            workspace = %config.workspace.dir.display(),
            "configuration loaded"
        );
        Ok(config)
    }

    pub fn from_yaml(contents: &str) -> anyhow::Result<Config> {
        serde_yaml_ng::from_str(contents).context("failed to parse config YAML")
    }

    /// Apply environment overrides.  `lookup` is `std::env::var` in
    /// production; tests pass a closure over a fixed map.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<()> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(port) = get("PORT") {
            self.server.port = port
                .trim()
                .parse()
                .with_context(|| format!("PORT is not a valid port: {port}"))?;
        }
        if let Some(bind) = get("FILEGATE_BIND") {
            self.server.bind = bind;
        }
        if let Some(origins) = get("WS_ALLOWED_ORIGINS") {
            self.server.allowed_origins = origins
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }
        if let Some(key) = get("ANTHROPIC_API_KEY") {
            self.anthropic.api_key = Some(key);
        }
        if let Some(model) = get("ANTHROPIC_MODEL") {
            self.anthropic.model = model;
        }
        if let Some(url) = get("ANTHROPIC_API_URL") {
            self.anthropic.endpoint = url;
        }
        if let Some(dir) = get("WORKSPACE_DIR") {
            self.workspace.dir = PathBuf::from(dir);
        }

        if let Some(key) = self.anthropic.api_key.take() {
            self.anthropic.api_key = resolve_key(&key, &lookup);
        }
        Ok(())
    }

    /// Validate semantic constraints that serde cannot enforce.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.server.allowed_origins.is_empty() {
            anyhow::bail!("config: server.allowed_origins must not be empty");
        }
        if self.workspace.chunk_size == 0 {
            anyhow::bail!("config: workspace.chunk_size must be greater than zero");
        }
        if self.anthropic.max_tokens == 0 {
            anyhow::bail!("config: anthropic.max_tokens must be greater than zero");
        }
        if self.workspace.dir.as_os_str().is_empty() {
            anyhow::bail!("config: workspace.dir must not be empty");
        }
        Ok(())
    }

    /// The resolved API key, or an error naming how to provide one.
    pub fn api_key(&self) -> anyhow::Result<&str> {
        self.anthropic
            .api_key
            .as_deref()
            .filter(|k| !k.is_empty())
            .context("missing Anthropic API key: set ANTHROPIC_API_KEY or anthropic.api_key")
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.bind, self.server.port)
    }
}

/// Resolve an API key value; a leading `$` names an environment variable.
fn resolve_key(raw: &str, lookup: &impl Fn(&str) -> Option<String>) -> Option<String> {
    let resolved = match raw.strip_prefix('$') {
        Some(var) => lookup(var)?,
        None => raw.to_string(),
    };
    (!resolved.is_empty()).then_some(resolved)
}
