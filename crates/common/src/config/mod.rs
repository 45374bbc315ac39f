//! Configuration management for ScholarLink services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default, config/{APP_ENV}, config/local)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration
    pub database: DatabaseConfig,

    /// Embedding provider configuration
    #[serde(default)]
    pub embedding: EmbeddingConfig,

    /// Content generation provider configuration
    #[serde(default)]
    pub generation: GenerationConfig,

    /// External paper source configuration
    #[serde(default)]
    pub paper_source: PaperSourceConfig,

    /// Orchestration pacing and ranking
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,

    /// Run triggers accepted per minute across all clients (0 disables the limit)
    #[serde(default = "default_trigger_rate")]
    pub trigger_rate_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    /// Primary database URL (for writes)
    pub url: String,

    /// Read replica URL (optional, falls back to primary)
    pub read_url: Option<String>,

    /// Maximum number of connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum number of connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,

    /// Connection timeout in seconds
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Idle timeout in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Create missing tables on startup
    #[serde(default)]
    pub auto_create_schema: bool,

    /// Log every SQL statement
    #[serde(default)]
    pub log_statements: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EmbeddingConfig {
    /// Embedding provider: openai, mock
    #[serde(default = "default_embedding_provider")]
    pub provider: String,

    /// API key for embedding service
    pub api_key: Option<String>,

    /// API base URL (for custom endpoints)
    pub api_base: Option<String>,

    /// Model to use
    #[serde(default = "default_embedding_model")]
    pub model: String,

    /// Embedding dimension
    #[serde(default = "default_embedding_dimension")]
    pub dimension: usize,

    /// Connect timeout in seconds
    #[serde(default = "default_provider_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Request timeout in seconds
    #[serde(default = "default_embedding_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GenerationConfig {
    /// Generation provider: openai (any chat-completions compatible API), mock
    #[serde(default = "default_generation_provider")]
    pub provider: String,

    /// API key for the generation service
    pub api_key: Option<String>,

    /// API base URL
    #[serde(default = "default_generation_api_base")]
    pub api_base: String,

    /// Chat model to use
    #[serde(default = "default_generation_model")]
    pub model: String,

    /// Sampling temperature
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Maximum tokens of generated content
    #[serde(default = "default_max_tokens")]
    pub max_tokens: u32,

    /// Connect timeout in seconds
    #[serde(default = "default_provider_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Request timeout in seconds; long-form generation is slow
    #[serde(default = "default_generation_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PaperSourceConfig {
    /// arXiv query endpoint
    #[serde(default = "default_source_base_url")]
    pub base_url: String,

    /// Category clause of the search query
    #[serde(default = "default_category_query")]
    pub category_query: String,

    /// Maximum candidates per run
    #[serde(default = "default_max_results")]
    pub max_results: u32,

    /// Window start, in days before now
    #[serde(default = "default_window_start_days")]
    pub window_start_days: i64,

    /// Window end, in days before now
    #[serde(default = "default_window_end_days")]
    pub window_end_days: i64,

    /// Connect timeout in seconds
    #[serde(default = "default_provider_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Request timeout in seconds
    #[serde(default = "default_source_timeout")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PipelineConfig {
    /// Minimum spacing between embedding calls, in milliseconds
    #[serde(default = "default_item_delay_ms")]
    pub item_delay_ms: u64,

    /// Minimum spacing between generation calls, in milliseconds
    #[serde(default = "default_generation_delay_ms")]
    pub generation_delay_ms: u64,

    /// Papers recommended per user and run
    #[serde(default = "default_top_n")]
    pub top_n: usize,

    /// Pending run requests before triggers are rejected
    #[serde(default = "default_run_queue_capacity")]
    pub run_queue_capacity: usize,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name reported in logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_trigger_rate() -> u32 { 30 }
fn default_max_connections() -> u32 { 20 }
fn default_min_connections() -> u32 { 2 }
fn default_connect_timeout() -> u64 { 10 }
fn default_idle_timeout() -> u64 { 300 }
fn default_embedding_provider() -> String { "openai".to_string() }
fn default_embedding_model() -> String { crate::DEFAULT_EMBEDDING_MODEL.to_string() }
fn default_embedding_dimension() -> usize { crate::DEFAULT_EMBEDDING_DIMENSION }
fn default_provider_connect_timeout() -> u64 { 30 }
fn default_embedding_timeout() -> u64 { 60 }
fn default_generation_provider() -> String { "openai".to_string() }
fn default_generation_api_base() -> String { "https://api.deepseek.com/v1".to_string() }
fn default_generation_model() -> String { "deepseek-chat".to_string() }
fn default_temperature() -> f32 { 0.7 }
fn default_max_tokens() -> u32 { 2000 }
fn default_generation_timeout() -> u64 { 120 }
fn default_source_base_url() -> String { "http://export.arxiv.org/api/query".to_string() }
fn default_category_query() -> String { "cat:cs.*".to_string() }
fn default_max_results() -> u32 { 50 }
fn default_window_start_days() -> i64 { 2 }
fn default_window_end_days() -> i64 { 1 }
fn default_source_timeout() -> u64 { 60 }
fn default_item_delay_ms() -> u64 { 1000 }
fn default_generation_delay_ms() -> u64 { 2000 }
fn default_top_n() -> usize { 3 }
fn default_run_queue_capacity() -> usize { 16 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "scholarlink".to_string() }

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Start with defaults
            .set_default("server.host", default_host())?
            .set_default("server.port", i64::from(default_port()))?

            // Load base config file
            .add_source(File::with_name("config/default").required(false))

            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))

            // Load local overrides
            .add_source(File::with_name("config/local").required(false))

            // Load from environment variables with APP__ prefix
            // e.g., APP__EMBEDDING__API_KEY=sk-...
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )

            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true)
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Get the read database URL (falls back to primary)
    pub fn read_database_url(&self) -> &str {
        self.database.read_url.as_deref().unwrap_or(&self.database.url)
    }
}

impl DatabaseConfig {
    /// Configuration for a private in-memory SQLite database
    pub fn in_memory() -> Self {
        Self {
            url: "sqlite::memory:".to_string(),
            read_url: None,
            max_connections: 1,
            min_connections: 1,
            connect_timeout_secs: default_connect_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            auto_create_schema: true,
            log_statements: false,
        }
    }

    /// Whether the URL points at an in-memory SQLite database
    pub fn is_in_memory(&self) -> bool {
        self.url.starts_with("sqlite:") && self.url.contains(":memory:")
    }
}

impl PipelineConfig {
    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }

    pub fn generation_delay(&self) -> Duration {
        Duration::from_millis(self.generation_delay_ms)
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
            trigger_rate_per_minute: default_trigger_rate(),
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_embedding_provider(),
            api_key: None,
            api_base: None,
            model: default_embedding_model(),
            dimension: default_embedding_dimension(),
            connect_timeout_secs: default_provider_connect_timeout(),
            timeout_secs: default_embedding_timeout(),
        }
    }
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            provider: default_generation_provider(),
            api_key: None,
            api_base: default_generation_api_base(),
            model: default_generation_model(),
            temperature: default_temperature(),
            max_tokens: default_max_tokens(),
            connect_timeout_secs: default_provider_connect_timeout(),
            timeout_secs: default_generation_timeout(),
        }
    }
}

impl Default for PaperSourceConfig {
    fn default() -> Self {
        Self {
            base_url: default_source_base_url(),
            category_query: default_category_query(),
            max_results: default_max_results(),
            window_start_days: default_window_start_days(),
            window_end_days: default_window_end_days(),
            connect_timeout_secs: default_provider_connect_timeout(),
            timeout_secs: default_source_timeout(),
        }
    }
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            item_delay_ms: default_item_delay_ms(),
            generation_delay_ms: default_generation_delay_ms(),
            top_n: default_top_n(),
            run_queue_capacity: default_run_queue_capacity(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            database: DatabaseConfig {
                url: "postgres://localhost/scholarlink".to_string(),
                read_url: None,
                max_connections: default_max_connections(),
                min_connections: default_min_connections(),
                connect_timeout_secs: default_connect_timeout(),
                idle_timeout_secs: default_idle_timeout(),
                auto_create_schema: false,
                log_statements: false,
            },
            embedding: EmbeddingConfig::default(),
            generation: GenerationConfig::default(),
            paper_source: PaperSourceConfig::default(),
            pipeline: PipelineConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}
