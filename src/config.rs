//! Configuration management for Bucketgate.
//!
//! Values come from defaults, then an optional YAML file, then environment
//! variables prefixed with `BUCKETGATE` (`__` separates nesting levels).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use crate::error::{GatewayError, Result};
use crate::ratelimit::FailurePolicy;

/// Main configuration for the Bucketgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GatewayConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,

    /// Admission filter configuration
    #[serde(default)]
    pub admission: AdmissionConfig,

    /// Object storage configuration
    #[serde(default)]
    pub storage: StorageConfig,

    /// Counter store backend
    #[serde(default)]
    pub counters: CounterBackendConfig,

    /// Cleanup job configuration
    #[serde(default)]
    pub janitor: JanitorConfig,

    /// Log output configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// Upper bound on a single request, including backend I/O
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,

    /// Largest accepted upload body in bytes
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,

    /// Mount `/debug/list`. Keep off outside development.
    #[serde(default)]
    pub debug_routes: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            request_timeout_secs: default_request_timeout(),
            max_upload_bytes: default_max_upload_bytes(),
            debug_routes: false,
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8787))
}

fn default_request_timeout() -> u64 {
    30
}

fn default_max_upload_bytes() -> usize {
    25 * 1024 * 1024
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimitingConfig {
    /// Hits admitted per burst window
    #[serde(default = "default_burst_limit")]
    pub burst_limit: u64,

    /// Burst window length, 5 to 60 seconds
    #[serde(default = "default_burst_window")]
    pub burst_window_secs: u64,

    /// Hits admitted per sustained window
    #[serde(default = "default_sustained_limit")]
    pub sustained_limit: u64,

    /// Sustained window length in seconds
    #[serde(default = "default_sustained_window")]
    pub sustained_window_secs: u64,

    /// Behavior when the counter store is unreachable
    #[serde(default)]
    pub failure_policy: FailurePolicy,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            burst_limit: default_burst_limit(),
            burst_window_secs: default_burst_window(),
            sustained_limit: default_sustained_limit(),
            sustained_window_secs: default_sustained_window(),
            failure_policy: FailurePolicy::default(),
        }
    }
}

fn default_burst_limit() -> u64 {
    10
}

fn default_burst_window() -> u64 {
    10
}

fn default_sustained_limit() -> u64 {
    100
}

fn default_sustained_window() -> u64 {
    65
}

/// Admission filter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// User-agent prefixes of trusted internal clients
    #[serde(default = "default_trusted_agents")]
    pub trusted_agent_prefixes: Vec<String>,

    /// Case-insensitive user-agent substrings treated as automation
    #[serde(default = "default_blocked_agents")]
    pub blocked_agent_patterns: Vec<String>,

    /// Path prefix of the binary content route (image transformation requests)
    #[serde(default = "default_content_route_prefix")]
    pub content_route_prefix: String,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            trusted_agent_prefixes: default_trusted_agents(),
            blocked_agent_patterns: default_blocked_agents(),
            content_route_prefix: default_content_route_prefix(),
        }
    }
}

fn default_trusted_agents() -> Vec<String> {
    vec!["Cloudflare-Image-Resizing".to_string()]
}

fn default_blocked_agents() -> Vec<String> {
    [
        "curl",
        "wget",
        "python-requests",
        "python-urllib",
        "aiohttp",
        "httpx",
        "go-http-client",
        "java/",
        "okhttp",
        "libwww-perl",
        "scrapy",
        "httpclient",
        "headlesschrome",
        "phantomjs",
        "bot",
        "crawler",
        "spider",
        "scraper",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn default_content_route_prefix() -> String {
    "/cdn-cgi/image/".to_string()
}

/// Object storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Bucket implementation
    #[serde(default)]
    pub backend: ObjectBackendConfig,

    /// Prefix stripped from request paths to form object keys, e.g. `images/`
    #[serde(default)]
    pub route_prefix: String,

    /// SQLite URL of the object expiry table. In-memory table when unset.
    #[serde(default)]
    pub metadata_url: Option<String>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: ObjectBackendConfig::default(),
            route_prefix: String::new(),
            metadata_url: None,
        }
    }
}

/// Bucket implementation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ObjectBackendConfig {
    /// Objects held in process memory
    #[default]
    Memory,
    /// Objects stored as files under `root`
    Filesystem {
        /// Bucket root directory
        root: PathBuf,
    },
}

/// Counter store backend.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum CounterBackendConfig {
    /// Process-local counters
    #[default]
    Memory,
    /// Shared counters in Redis
    Redis {
        /// Connection URL, e.g. `redis://127.0.0.1:6379/`
        url: String,
        /// Prefix for every counter key
        #[serde(default = "default_redis_prefix")]
        key_prefix: String,
    },
    /// Counters in a SQLite database
    Sqlite {
        /// Database URL, e.g. `sqlite://counters.db?mode=rwc`
        url: String,
    },
}

fn default_redis_prefix() -> String {
    "bucketgate:".to_string()
}

/// Cleanup job configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JanitorConfig {
    /// Run the sweeps on a timer
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Seconds between timer-driven runs
    #[serde(default = "default_janitor_interval")]
    pub interval_secs: u64,

    /// Objects younger than this are never swept
    #[serde(default = "default_object_retention")]
    pub object_retention_secs: u64,

    /// How long an expired counter lingers before it is deleted
    #[serde(default = "default_counter_grace")]
    pub counter_grace_secs: u64,

    /// Only objects under this key prefix are swept
    #[serde(default)]
    pub sweep_prefix: String,

    /// Bearer token required by the manual trigger endpoint. The endpoint refuses every call when unset.
    #[serde(default)]
    pub trigger_token: Option<String>,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_secs: default_janitor_interval(),
            object_retention_secs: default_object_retention(),
            counter_grace_secs: default_counter_grace(),
            sweep_prefix: String::new(),
            trigger_token: None,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_janitor_interval() -> u64 {
    300
}

fn default_object_retention() -> u64 {
    1800
}

fn default_counter_grace() -> u64 {
    1800
}

/// Log output configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
            json: false,
        }
    }
}

fn default_log_filter() -> String {
    "info".to_string()
}

impl GatewayConfig {
    /// Load configuration from an optional YAML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("BUCKETGATE")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("admission.trusted_agent_prefixes")
                .with_list_parse_key("admission.blocked_agent_patterns")
                .try_parsing(true),
        );

        let config: GatewayConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GatewayError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a file path.
    pub fn from_file(path: &str) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GatewayConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GatewayError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject values the gateway cannot run with.
    pub fn validate(&self) -> Result<()> {
        let rl = &self.rate_limiting;
        if !(5..=60).contains(&rl.burst_window_secs) {
            return Err(GatewayError::Config(format!(
                "burst_window_secs must be between 5 and 60, got {}",
                rl.burst_window_secs
            )));
        }
        if rl.burst_limit == 0 || rl.sustained_limit == 0 {
            return Err(GatewayError::Config(
                "rate limits must be greater than zero".to_string(),
            ));
        }
        if rl.sustained_window_secs == 0 {
            return Err(GatewayError::Config(
                "sustained_window_secs must be greater than zero".to_string(),
            ));
        }
        if let ObjectBackendConfig::Filesystem { root } = &self.storage.backend {
            if root.as_os_str().is_empty() {
                return Err(GatewayError::Config(
                    "filesystem storage requires a root directory".to_string(),
                ));
            }
        }
        if self.janitor.interval_secs == 0 {
            return Err(GatewayError::Config(
                "janitor interval_secs must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
