//! Configuration for Volley

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database configuration
    pub database: DatabaseConfig,

    /// SMTP relay configuration
    #[serde(default)]
    pub smtp: SmtpConfig,

    /// Dispatch pacing and retry configuration
    #[serde(default)]
    pub dispatch: DispatchConfig,

    /// Credential encryption configuration
    pub crypto: CryptoConfig,

    /// Telegram notification configuration
    #[serde(default)]
    pub telegram: TelegramConfig,

    /// Control API configuration
    #[serde(default)]
    pub api: ApiConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL (PostgreSQL)
    pub url: String,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    20
}

fn default_min_connections() -> u32 {
    5
}

/// SMTP relay configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SmtpConfig {
    /// Relay hostname
    #[serde(default = "default_smtp_host")]
    pub host: String,

    /// Relay port
    #[serde(default = "default_smtp_port")]
    pub port: u16,

    /// Use implicit TLS (SMTPS)
    #[serde(default = "default_true")]
    pub use_tls: bool,

    /// Send timeout in seconds
    #[serde(default = "default_smtp_timeout")]
    pub timeout_secs: u64,
}

impl Default for SmtpConfig {
    fn default() -> Self {
        Self {
            host: default_smtp_host(),
            port: default_smtp_port(),
            use_tls: true,
            timeout_secs: default_smtp_timeout(),
        }
    }
}

fn default_smtp_host() -> String {
    "smtp.gmail.com".to_string()
}

fn default_smtp_port() -> u16 {
    465
}

fn default_smtp_timeout() -> u64 {
    30
}

fn default_true() -> bool {
    true
}

/// Dispatch pacing and retry configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchConfig {
    /// Total delivery attempts per receiver (1 initial + retries)
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Backoff base in seconds; attempt n waits base * (n + 1)
    #[serde(default = "default_backoff_base")]
    pub backoff_base_secs: u64,

    /// Fixed delay between receivers, in seconds
    #[serde(default = "default_send_delay")]
    pub send_delay_secs: u64,

    /// Poll interval while a campaign is paused, in seconds
    #[serde(default = "default_pause_poll")]
    pub pause_poll_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_base_secs: default_backoff_base(),
            send_delay_secs: default_send_delay(),
            pause_poll_secs: default_pause_poll(),
        }
    }
}

fn default_max_attempts() -> u32 {
    4
}

fn default_backoff_base() -> u64 {
    5
}

fn default_send_delay() -> u64 {
    1
}

fn default_pause_poll() -> u64 {
    1
}

/// Credential encryption configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CryptoConfig {
    /// Base64-encoded 32-byte key for sender credential encryption.
    /// Must be provisioned externally; there is no runtime fallback.
    pub credential_key: String,
}

/// Telegram notification configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelegramConfig {
    /// Master switch for Telegram alerts
    #[serde(default)]
    pub enabled: bool,

    /// Bot token
    #[serde(default)]
    pub bot_token: String,

    /// Target chat id
    #[serde(default)]
    pub chat_id: String,

    /// Alert when a campaign starts
    #[serde(default = "default_true")]
    pub alert_started: bool,

    /// Alert on pause/resume/stop/completion
    #[serde(default = "default_true")]
    pub alert_state_changes: bool,
}

impl Default for TelegramConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bot_token: String::new(),
            chat_id: String::new(),
            alert_started: true,
            alert_state_changes: true,
        }
    }
}

/// Control API configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Bind address
    #[serde(default = "default_api_bind")]
    pub bind: String,

    /// Port
    #[serde(default = "default_api_port")]
    pub port: u16,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind: default_api_bind(),
            port: default_api_port(),
        }
    }
}

fn default_api_bind() -> String {
    "0.0.0.0".to_string()
}

fn default_api_port() -> u16 {
    8025
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset
    #[serde(default = "default_log_filter")]
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            filter: default_log_filter(),
        }
    }
}

fn default_log_filter() -> String {
    "info,volley=debug".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &std::path::Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from default locations
    pub fn load() -> crate::Result<Self> {
        let paths = [
            std::path::PathBuf::from("./config.toml"),
            std::path::PathBuf::from("/etc/volley/config.toml"),
        ];

        for path in paths {
            if path.exists() {
                return Self::from_file(&path);
            }
        }

        Err(crate::Error::Config(
            "No configuration file found".to_string(),
        ))
    }
}
