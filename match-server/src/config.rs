//! Server settings, read from `ServerConfig.json` next to the binary.
//! Every field is optional, missing ones fall back to the defaults. `PORT` and
//! `MATCH_SERVER_LISTEN_ADDR` override the listen address.

use protocol::Rules;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::fs;

/// The file the configuration is read from.
pub const CONFIG_FILE: &str = "ServerConfig.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// The socket address to listen on.
    pub listen_addr: String,
    /// The directory static files are served from.
    pub web_root: String,
    /// Seconds a running game stays open without any connection.
    pub grace_period_secs: u64,
    /// Seconds between two sweeps for dead matches.
    pub watchdog_interval_secs: u64,
    /// The rules for matches created without their own.
    pub default_rules: Rules,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            listen_addr: "0.0.0.0:8080".to_string(),
            web_root: ".".to_string(),
            grace_period_secs: 5,
            watchdog_interval_secs: 1200, // 20 Min
            default_rules: Rules::default(),
        }
    }
}

impl ServerConfig {
    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn watchdog_interval(&self) -> Duration {
        Duration::from_secs(self.watchdog_interval_secs)
    }

    /// Loads the configuration file if there is one, then applies the environment overrides.
    pub async fn load() -> Result<Self, String> {
        let mut config = match fs::read_to_string(CONFIG_FILE).await {
            Ok(json_content) => Self::from_json(&json_content)?,
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!("No {} found, using defaults.", CONFIG_FILE);
                ServerConfig::default()
            }
            Err(error) => return Err(format!("Failed to read file: {}", error)),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        config.validate()?;
        Ok(config)
    }

    pub fn from_json(json_content: &str) -> Result<Self, String> {
        serde_json::from_str(json_content).map_err(|e| format!("Failed to parse JSON: {}", e))
    }

    /// Applies `PORT` and `MATCH_SERVER_LISTEN_ADDR`, the latter wins.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(port) = lookup("PORT").filter(|port| !port.is_empty()) {
            self.listen_addr = format!("0.0.0.0:{}", port);
        }
        if let Some(addr) = lookup("MATCH_SERVER_LISTEN_ADDR").filter(|addr| !addr.is_empty()) {
            self.listen_addr = addr;
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.listen_addr.parse::<SocketAddr>().is_err() {
            return Err(format!(
                "listen_addr {} is not a valid socket address",
                self.listen_addr
            ));
        }
        if self.watchdog_interval_secs == 0 {
            return Err("watchdog_interval_secs must be > 0".to_string());
        }
        Ok(())
    }
}
