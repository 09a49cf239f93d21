//! Layered configuration: defaults, then a JSON config file, then
//! environment variables and CLI arguments on top.

use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use crate::connection::{ConnectionConfig, ReconnectPolicy};

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Fleet telemetry sync client", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "FLEET_WS_URL", help = "Telemetry WebSocket endpoint.")]
    pub ws_url: Option<String>,

    #[clap(long, env = "FLEET_API_BASE_URL", help = "Base URL of the REST API, ending in /api/.")]
    pub api_base_url: Option<String>,

    #[clap(long, env = "FLEET_AUTH_TOKEN", help = "Session token, used for REST auth and push registration.")]
    pub auth_token: Option<String>,

    #[clap(long, env = "FLEET_USER_ID", help = "Authenticated user id for the fleet listing.")]
    pub user_id: Option<String>,

    #[clap(long, env = "FLEET_DEVICE_SERIAL", help = "Primary device serial advertised in the register frame.")]
    pub device_serial: Option<String>,

    #[clap(long, env = "FLEET_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "FLEET_HEARTBEAT_INTERVAL_SECONDS", help = "Heartbeat (ping) period in seconds.")]
    pub heartbeat_interval_seconds: Option<u64>,

    #[clap(long, env = "FLEET_RECONNECT_BASE_DELAY_MS", help = "Base delay in milliseconds for reconnect attempts.")]
    pub reconnect_base_delay_ms: Option<u64>,

    #[clap(long, env = "FLEET_RECONNECT_MAX_DELAY_MS", help = "Maximum delay in milliseconds for reconnect attempts.")]
    pub reconnect_max_delay_ms: Option<u64>,

    #[clap(long, env = "FLEET_RECONNECT_MAX_ATTEMPTS", help = "Automatic reconnect attempts before giving up.")]
    pub reconnect_max_attempts: Option<u32>,

    #[clap(long, env = "FLEET_POLL_INTERVAL_SECONDS", help = "Backup alert-poll interval in seconds.")]
    pub poll_interval_seconds: Option<u64>,

    #[clap(long, env = "FLEET_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "FLEET_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            ws_url: other.ws_url.or(self.ws_url),
            api_base_url: other.api_base_url.or(self.api_base_url),
            auth_token: other.auth_token.or(self.auth_token),
            user_id: other.user_id.or(self.user_id),
            device_serial: other.device_serial.or(self.device_serial),
            config_path: other.config_path.or(self.config_path),
            heartbeat_interval_seconds: other.heartbeat_interval_seconds.or(self.heartbeat_interval_seconds),
            reconnect_base_delay_ms: other.reconnect_base_delay_ms.or(self.reconnect_base_delay_ms),
            reconnect_max_delay_ms: other.reconnect_max_delay_ms.or(self.reconnect_max_delay_ms),
            reconnect_max_attempts: other.reconnect_max_attempts.or(self.reconnect_max_attempts),
            poll_interval_seconds: other.poll_interval_seconds.or(self.poll_interval_seconds),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
        }
    }

    pub fn ws_url(&self) -> &str {
        self.ws_url.as_deref().unwrap_or("ws://127.0.0.1:3003")
    }

    pub fn api_base_url(&self) -> &str {
        self.api_base_url.as_deref().unwrap_or("http://127.0.0.1:3003/api/")
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_seconds.unwrap_or(30))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    /// Resolved parameters for the connection manager.
    pub fn connection(&self) -> ConnectionConfig {
        let defaults = ReconnectPolicy::default();
        ConnectionConfig {
            ws_url: self.ws_url().to_string(),
            heartbeat_interval: Duration::from_secs(self.heartbeat_interval_seconds.unwrap_or(30)),
            policy: ReconnectPolicy {
                max_attempts: self.reconnect_max_attempts.unwrap_or(defaults.max_attempts),
                base_delay_ms: self.reconnect_base_delay_ms.unwrap_or(defaults.base_delay_ms),
                max_delay_ms: self.reconnect_max_delay_ms.unwrap_or(defaults.max_delay_ms),
            },
            device_serial: self.device_serial.clone(),
        }
    }
}

/// Loads configuration for the client binary: defaults, then the JSON config
/// file (path overridable from the CLI), then environment variables and CLI
/// arguments on top.
pub fn load_config() -> Config {
    let default_config = Config {
        ws_url: Some("ws://127.0.0.1:3003".to_string()),
        api_base_url: Some("http://127.0.0.1:3003/api/".to_string()),
        heartbeat_interval_seconds: Some(30),
        reconnect_base_delay_ms: Some(1_000),
        reconnect_max_delay_ms: Some(30_000),
        reconnect_max_attempts: Some(5),
        poll_interval_seconds: Some(30),
        log_dir: Some(PathBuf::from("./logs")),
        log_level: Some("info".to_string()),
        ..Default::default()
    };

    // Parse CLI early to honor a config-path override.
    let cli_args = Config::parse();
    let config_file_path = cli_args
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("fleet_client.conf"));

    let mut current_config = default_config;

    if config_file_path.exists() {
        match fs::read_to_string(&config_file_path) {
            Ok(config_str) => match serde_json::from_str::<Config>(&config_str) {
                Ok(file_config) => current_config = current_config.merge(file_config),
                Err(e) => log::warn!(
                    "Failed to parse config file {}: {e}. Falling back to other sources.",
                    config_file_path.display()
                ),
            },
            Err(e) => log::warn!(
                "Failed to read config file {}: {e}. Falling back to other sources.",
                config_file_path.display()
            ),
        }
    }

    // Environment variables and CLI arguments win over file and defaults.
    current_config.merge(cli_args)
}
