use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub storage: StorageConfig,
    pub db: DbConfig,
    pub channel: ChannelConfig,
    #[serde(default)]
    pub enrichment: EnrichmentConfig,
    pub publish: PublishConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StorageConfig {
    /// Root of the local content store. Created on `init` if missing.
    pub root: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChannelConfig {
    /// The single authorized sender identity. Items from any other sender
    /// are rejected before any processing.
    pub allowed_sender_id: i64,
    /// Inline marker that triggers publishing when present in a message.
    #[serde(default = "default_publish_marker")]
    pub publish_marker: String,
}

fn default_publish_marker() -> String {
    "#github".to_string()
}

#[derive(Debug, Deserialize, Clone)]
pub struct EnrichmentConfig {
    /// `disabled` or `openai`.
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// Upper bound on tags accepted from the reasoning service.
    #[serde(default = "default_max_tags")]
    pub max_tags: usize,
    /// Text sent for analysis is truncated to this many characters.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            max_tags: default_max_tags(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_max_retries() -> u32 {
    3
}
fn default_max_tags() -> usize {
    5
}
fn default_max_input_chars() -> usize {
    3000
}

#[derive(Debug, Deserialize, Clone)]
pub struct PublishConfig {
    /// Remote repository identifier, `owner/name`.
    pub repo: String,
    #[serde(default = "default_branch")]
    pub branch: String,
    /// Base URL of the repository API. Overridable for tests.
    #[serde(default = "default_api_base")]
    pub api_base: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_publish_retries")]
    pub max_retries: u32,
}

fn default_branch() -> String {
    "main".to_string()
}
fn default_api_base() -> String {
    "https://api.github.com".to_string()
}
fn default_publish_retries() -> u32 {
    3
}

impl EnrichmentConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    if config.channel.allowed_sender_id == 0 {
        anyhow::bail!("channel.allowed_sender_id must be set to a real sender identity");
    }

    if config.channel.publish_marker.trim().is_empty() {
        anyhow::bail!("channel.publish_marker must not be empty");
    }

    match config.enrichment.provider.as_str() {
        "disabled" | "openai" => {}
        other => anyhow::bail!(
            "Unknown enrichment provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    if config.enrichment.is_enabled() && config.enrichment.model.is_none() {
        anyhow::bail!(
            "enrichment.model must be specified when provider is '{}'",
            config.enrichment.provider
        );
    }

    if config.enrichment.max_input_chars == 0 {
        anyhow::bail!("enrichment.max_input_chars must be > 0");
    }

    let repo = config.publish.repo.trim();
    if repo.is_empty() || !repo.contains('/') {
        anyhow::bail!("publish.repo must be of the form 'owner/name'");
    }

    Ok(config)
}
