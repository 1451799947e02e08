use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Well-known name shared by the vector store and the assistant.
///
/// Changing it orphans resources created under the previous name.
pub const DEFAULT_RESOURCE_NAME: &str = "Vault Assistant";

pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub vault: VaultConfig,
    #[serde(default)]
    pub openai: OpenAiConfig,
    #[serde(default)]
    pub assistant: AssistantConfig,
    #[serde(default)]
    pub sync: SyncConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct VaultConfig {
    pub root: PathBuf,
    #[serde(default = "default_include_globs")]
    pub include_globs: Vec<String>,
    #[serde(default)]
    pub exclude_globs: Vec<String>,
    #[serde(default)]
    pub follow_symlinks: bool,
}

fn default_include_globs() -> Vec<String> {
    vec!["**/*.md".to_string()]
}

#[derive(Debug, Deserialize, Clone)]
pub struct OpenAiConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

impl Default for OpenAiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            page_size: default_page_size(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_timeout_secs() -> u64 {
    60
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    1000
}
fn default_page_size() -> u32 {
    100
}

#[derive(Debug, Deserialize, Clone)]
pub struct AssistantConfig {
    #[serde(default = "default_resource_name")]
    pub vector_store_name: String,
    #[serde(default = "default_resource_name")]
    pub name: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default)]
    pub instructions: Option<String>,
}

impl Default for AssistantConfig {
    fn default() -> Self {
        Self {
            vector_store_name: default_resource_name(),
            name: default_resource_name(),
            model: default_model(),
            instructions: None,
        }
    }
}

fn default_resource_name() -> String {
    DEFAULT_RESOURCE_NAME.to_string()
}
fn default_model() -> String {
    "gpt-4o".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct SyncConfig {
    #[serde(default = "default_flush_interval_ms")]
    pub flush_interval_ms: u64,
    #[serde(default)]
    pub requeue_failed_batches: bool,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            flush_interval_ms: default_flush_interval_ms(),
            requeue_failed_batches: false,
        }
    }
}

fn default_flush_interval_ms() -> u64 {
    DEFAULT_FLUSH_INTERVAL.as_millis() as u64
}

impl SyncConfig {
    pub fn flush_interval(&self) -> Duration {
        Duration::from_millis(self.flush_interval_ms)
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    parse_config(&content)
}

pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;

    if config.vault.include_globs.is_empty() {
        anyhow::bail!("vault.include_globs must not be empty");
    }

    if config.openai.base_url.trim().is_empty() {
        anyhow::bail!("openai.base_url must not be empty");
    }

    if !(1..=100).contains(&config.openai.page_size) {
        anyhow::bail!("openai.page_size must be in [1, 100]");
    }

    if config.assistant.vector_store_name.is_empty() || config.assistant.name.is_empty() {
        anyhow::bail!("assistant.vector_store_name and assistant.name must not be empty");
    }

    if config.sync.flush_interval_ms == 0 {
        anyhow::bail!("sync.flush_interval_ms must be > 0");
    }

    Ok(config)
}
