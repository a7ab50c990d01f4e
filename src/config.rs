use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::stream::AccumulationPolicy;

/// Main configuration structure loaded from chefboost.toml and environment variables
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub system: SystemConfig,
    pub retrieval: RetrievalConfig,
    pub stream: StreamConfig,
    /// Runtime configuration loaded from environment variables
    #[serde(skip)]
    pub runtime: RuntimeConfig,
}

/// System-level configuration for embeddings, database and the language model
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SystemConfig {
    pub embedding_model: String,
    pub embedding_dimensions: usize,
    pub embedding_cache_size: usize,
    pub llm_base_url: String,
    pub llm_model: String,
    pub llm_temperature: f32,
    pub database_url: String,
    pub database_ns: String,
    pub database_db: String,
}

/// Retrieval configuration shared by all strategies
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetrievalConfig {
    pub recipes_table: String,
    pub books_table: String,
    pub top_k: usize,
    pub max_paraphrases: usize,
    /// Overall cap on fused multi-query results; `None` keeps the full union
    #[serde(default)]
    pub multi_query_cap: Option<usize>,
}

/// Streaming endpoint configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    pub heartbeat_interval_ms: u64,
    pub accumulation: AccumulationPolicy,
    pub max_agent_steps: usize,
    pub channel_capacity: usize,
}

/// Timeouts applied to every suspending call made on behalf of a request
#[derive(Debug, Clone, Copy)]
pub struct RetrievalTimeouts {
    pub llm: Duration,
    pub store: Duration,
}

impl Default for RetrievalTimeouts {
    fn default() -> Self {
        Self {
            llm: Duration::from_millis(30_000),
            store: Duration::from_millis(10_000),
        }
    }
}

/// Runtime configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    pub database_user: String,
    pub database_pass: String,
    pub openai_api_key: Option<String>,
    pub log_level: String,
    pub llm_timeout_ms: u64,
    pub store_timeout_ms: u64,
    pub http_bind: std::net::SocketAddr,
    pub http_request_timeout_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            database_user: "root".to_string(),
            database_pass: "root".to_string(),
            openai_api_key: None,
            log_level: "chefboost=info,tower_http=info".to_string(),
            llm_timeout_ms: 30_000,
            store_timeout_ms: 10_000,
            http_bind: std::net::SocketAddr::from(([127, 0, 0, 1], 5000)),
            http_request_timeout_ms: 60_000,
        }
    }
}

impl Config {
    /// Load configuration from TOML file and environment variables
    /// Uses CHEFBOOST_CONFIG environment variable or defaults to "chefboost.toml"
    pub fn load() -> anyhow::Result<Self> {
        if let Ok(env_path) = std::env::var("CHEF_ENV_FILE") {
            let _ = dotenvy::from_path(env_path);
        } else {
            let _ = dotenvy::from_path(".env");
        }

        let config_path =
            std::env::var("CHEFBOOST_CONFIG").unwrap_or_else(|_| "chefboost.toml".to_string());

        let mut config: Config = if let Ok(content) = std::fs::read_to_string(&config_path) {
            toml::from_str(&content)?
        } else {
            tracing::warn!("Config file {} not found, using defaults", config_path);
            Self::default()
        };

        config.apply_env_overrides();
        config.runtime = RuntimeConfig::load_from_env();
        config.validate();

        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(db_url) = std::env::var("CHEF_DB_URL") {
            tracing::debug!("CHEF_DB_URL env override applied");
            self.system.database_url = db_url;
        }
        if let Ok(db_ns) = std::env::var("CHEF_DB_NS") {
            self.system.database_ns = db_ns;
        }
        if let Ok(db_name) = std::env::var("CHEF_DB_DB") {
            self.system.database_db = db_name;
        }
        if let Ok(model) = std::env::var("CHEF_LLM_MODEL") {
            self.system.llm_model = model;
        }
        if let Ok(base) = std::env::var("CHEF_LLM_BASE_URL") {
            self.system.llm_base_url = base;
        }
        if let Some(ms) = std::env::var("CHEF_HEARTBEAT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            self.stream.heartbeat_interval_ms = ms;
        }
        if let Ok(policy) = std::env::var("CHEF_ACCUMULATION") {
            match policy.as_str() {
                "preserve" => self.stream.accumulation = AccumulationPolicy::Preserve,
                "reset_on_node_change" => {
                    self.stream.accumulation = AccumulationPolicy::ResetOnNodeChange
                }
                other => tracing::warn!("Unknown CHEF_ACCUMULATION '{}', ignoring", other),
            }
        }
        if let Some(k) = std::env::var("CHEF_TOP_K")
            .ok()
            .and_then(|v| v.parse::<usize>().ok())
        {
            self.retrieval.top_k = k;
        }
    }

    /// Clamp out-of-range values instead of refusing to start
    fn validate(&mut self) {
        if !(1..=50).contains(&self.retrieval.top_k) {
            tracing::warn!("top_k {} out of range, clamping", self.retrieval.top_k);
            self.retrieval.top_k = self.retrieval.top_k.clamp(1, 50);
        }
        if self.retrieval.max_paraphrases > 5 {
            tracing::warn!(
                "max_paraphrases {} exceeds 5, clamping",
                self.retrieval.max_paraphrases
            );
            self.retrieval.max_paraphrases = 5;
        }
        if self.stream.heartbeat_interval_ms == 0 {
            tracing::warn!("heartbeat_interval_ms cannot be zero, using 5000");
            self.stream.heartbeat_interval_ms = 5000;
        }
        if self.stream.max_agent_steps == 0 {
            self.stream.max_agent_steps = 1;
        }
        if self.stream.channel_capacity == 0 {
            self.stream.channel_capacity = 1;
        }
        if !self.system.database_url.starts_with("ws://")
            && !self.system.database_url.starts_with("wss://")
            && !self.system.database_url.contains(':')
        {
            tracing::warn!(
                "Database URL '{}' appears to be missing a port",
                self.system.database_url
            );
        }
    }

    pub fn timeouts(&self) -> RetrievalTimeouts {
        RetrievalTimeouts {
            llm: Duration::from_millis(self.runtime.llm_timeout_ms),
            store: Duration::from_millis(self.runtime.store_timeout_ms),
        }
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.stream.heartbeat_interval_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            system: SystemConfig {
                embedding_model: "text-embedding-3-small".to_string(),
                embedding_dimensions: 1536,
                embedding_cache_size: 512,
                llm_base_url: "https://api.openai.com/v1".to_string(),
                llm_model: "gpt-4o-mini".to_string(),
                llm_temperature: 0.0,
                database_url: "127.0.0.1:8000".to_string(),
                database_ns: "chefboost".to_string(),
                database_db: "gutenberg".to_string(),
            },
            retrieval: RetrievalConfig {
                recipes_table: "recipes".to_string(),
                books_table: "books".to_string(),
                top_k: 4,
                max_paraphrases: 5,
                multi_query_cap: None,
            },
            stream: StreamConfig {
                heartbeat_interval_ms: 5000,
                accumulation: AccumulationPolicy::Preserve,
                max_agent_steps: 6,
                channel_capacity: 64,
            },
            runtime: RuntimeConfig::default(),
        }
    }
}

impl RuntimeConfig {
    /// Load runtime configuration from environment variables
    pub fn load_from_env() -> Self {
        let mut cfg = Self {
            database_user: std::env::var("CHEF_DB_USER").unwrap_or_else(|_| "root".to_string()),
            database_pass: std::env::var("CHEF_DB_PASS").unwrap_or_else(|_| "root".to_string()),
            openai_api_key: std::env::var("OPENAI_API_KEY").ok(),
            log_level: std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "chefboost=info,tower_http=info".to_string()),
            llm_timeout_ms: std::env::var("CHEF_LLM_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30_000),
            store_timeout_ms: std::env::var("CHEF_STORE_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(10_000),
            ..Self::default()
        };

        if let Ok(v) = std::env::var("CHEF_HTTP_BIND")
            && let Ok(bind) = v.parse::<std::net::SocketAddr>()
        {
            cfg.http_bind = bind;
        }
        if let Some(timeout) = std::env::var("CHEF_HTTP_REQUEST_TIMEOUT_MS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
        {
            cfg.http_request_timeout_ms = timeout;
        }

        cfg
    }
}
