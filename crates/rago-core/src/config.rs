//! Configuration surface

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::Result;

/// Top-level configuration covering every knob the engine exposes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub stores: StoreConfig,
    #[serde(default)]
    pub chunker: ChunkerConfig,
    #[serde(default)]
    pub rrf: RrfConfig,
    #[serde(default)]
    pub ingest: IngestConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub conversations: ConversationConfig,
    #[serde(default)]
    pub workflow: WorkflowEngineConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            stores: StoreConfig::default(),
            chunker: ChunkerConfig::default(),
            rrf: RrfConfig::default(),
            ingest: IngestConfig::default(),
            tools: ToolsConfig::default(),
            conversations: ConversationConfig::default(),
            workflow: WorkflowEngineConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,
    #[serde(default = "default_keyword_index_path")]
    pub keyword_index_path: PathBuf,
    #[serde(default = "default_max_conns")]
    pub max_conns: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default = "default_threshold")]
    pub threshold: f64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            keyword_index_path: default_keyword_index_path(),
            max_conns: default_max_conns(),
            batch_size: default_batch_size(),
            top_k: default_top_k(),
            threshold: default_threshold(),
        }
    }
}

fn default_db_path() -> PathBuf {
    base_data_dir().join("rag.db")
}

fn default_keyword_index_path() -> PathBuf {
    base_data_dir().join("keyword.bleve")
}

fn default_max_conns() -> usize {
    4
}

fn default_batch_size() -> usize {
    32
}

fn default_top_k() -> usize {
    10
}

fn default_threshold() -> f64 {
    0.0
}

/// Base data directory, default `~/.rago/`.
pub fn base_data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".rago")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkerConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_overlap")]
    pub overlap: usize,
    #[serde(default = "default_method")]
    pub method: String,
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            chunk_size: default_chunk_size(),
            overlap: default_overlap(),
            method: default_method(),
        }
    }
}

fn default_chunk_size() -> usize {
    500
}
fn default_overlap() -> usize {
    50
}
fn default_method() -> String {
    "sentence".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RrfConfig {
    #[serde(default = "default_rrf_k")]
    pub k: f64,
    #[serde(default = "default_relevance_threshold")]
    pub relevance_threshold: f64,
}

impl Default for RrfConfig {
    fn default() -> Self {
        Self {
            k: default_rrf_k(),
            relevance_threshold: default_relevance_threshold(),
        }
    }
}

fn default_rrf_k() -> f64 {
    10.0
}
fn default_relevance_threshold() -> f64 {
    0.0
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct IngestConfig {
    #[serde(default)]
    pub metadata_extraction: MetadataExtractionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataExtractionConfig {
    #[serde(default)]
    pub enable: bool,
}

impl Default for MetadataExtractionConfig {
    fn default() -> Self {
        Self { enable: false }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_max_concurrent_calls")]
    pub max_concurrent_calls: usize,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub enabled_tools: Vec<String>,
    #[serde(default = "default_security_level")]
    pub security_level: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            enabled: default_true(),
            max_concurrent_calls: default_max_concurrent_calls(),
            call_timeout_secs: default_call_timeout_secs(),
            rate_limit: RateLimitConfig::default(),
            enabled_tools: Vec::new(),
            security_level: default_security_level(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_max_concurrent_calls() -> usize {
    5
}
fn default_call_timeout_secs() -> u64 {
    30
}
fn default_security_level() -> String {
    "standard".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_calls_per_minute")]
    pub calls_per_minute: u32,
    #[serde(default = "default_calls_per_hour")]
    pub calls_per_hour: u32,
    #[serde(default = "default_burst_size")]
    pub burst_size: u32,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            calls_per_minute: default_calls_per_minute(),
            calls_per_hour: default_calls_per_hour(),
            burst_size: default_burst_size(),
        }
    }
}

fn default_calls_per_minute() -> u32 {
    60
}
fn default_calls_per_hour() -> u32 {
    1000
}
fn default_burst_size() -> u32 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationConfig {
    #[serde(default = "default_max_tool_calls")]
    pub max_tool_calls: usize,
    #[serde(default = "default_max_rounds")]
    pub max_rounds: usize,
    #[serde(default = "default_conversation_ttl_secs")]
    pub conversation_ttl_secs: u64,
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            max_tool_calls: default_max_tool_calls(),
            max_rounds: default_max_rounds(),
            conversation_ttl_secs: default_conversation_ttl_secs(),
        }
    }
}

fn default_max_tool_calls() -> usize {
    10
}
fn default_max_rounds() -> usize {
    5
}
fn default_conversation_ttl_secs() -> u64 {
    30 * 60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEngineConfig {
    #[serde(default = "default_max_concurrent_workflows")]
    pub max_concurrent_workflows: usize,
    #[serde(default = "default_max_concurrent_steps")]
    pub max_concurrent_steps: usize,
    #[serde(default = "default_step_timeout_secs")]
    pub default_timeout_secs: u64,
    #[serde(default = "default_true")]
    pub enable_parallelism: bool,
    #[serde(default)]
    pub retry_policy: RetryPolicyConfig,
}

impl Default for WorkflowEngineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_workflows: default_max_concurrent_workflows(),
            max_concurrent_steps: default_max_concurrent_steps(),
            default_timeout_secs: default_step_timeout_secs(),
            enable_parallelism: default_true(),
            retry_policy: RetryPolicyConfig::default(),
        }
    }
}

fn default_max_concurrent_workflows() -> usize {
    4
}
fn default_max_concurrent_steps() -> usize {
    8
}
fn default_step_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
}

impl Default for RetryPolicyConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            retry_delay_ms: default_retry_delay_ms(),
            backoff_factor: default_backoff_factor(),
        }
    }
}

fn default_max_retries() -> u32 {
    3
}
fn default_retry_delay_ms() -> u64 {
    200
}
fn default_backoff_factor() -> f64 {
    2.0
}

impl Config {
    /// Load config from default path, falling back to defaults when absent.
    pub fn load() -> Result<Self> {
        let path = Self::default_path();
        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = serde_yaml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Config::default())
        }
    }

    /// Save config to the default path.
    pub fn save(&self) -> Result<()> {
        let path = Self::default_path();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Default config path: `~/.rago/config.yml`.
    pub fn default_path() -> PathBuf {
        base_data_dir().join("config.yml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_roundtrips_through_yaml() {
        let config = Config::default();
        let yaml = serde_yaml::to_string(&config).unwrap();
        let restored: Config = serde_yaml::from_str(&yaml).unwrap();
        assert_eq!(restored.chunker.chunk_size, config.chunker.chunk_size);
        assert_eq!(restored.rrf.k, config.rrf.k);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let yaml = "chunker:\n  chunk_size: 200\n";
        let config: Config = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.chunker.chunk_size, 200);
        assert_eq!(config.chunker.overlap, default_overlap());
        assert_eq!(config.tools.max_concurrent_calls, default_max_concurrent_calls());
    }
}
