use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use serde_derive::Deserialize;

pub const DEFAULT_MARKERS: [&str; 4] = ["LED ON", "LED/BUZZER ON", "LED 점등", "LED/BUZZER 점등"];

#[derive(Deserialize, Debug, Clone)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub poll: Option<PollConfig>,
    pub events: Option<EventConfig>,
    pub storage: Option<StorageConfig>,
}

#[derive(Deserialize, Debug, Clone)]
pub struct ServerConfig {
    pub base_url: String,
    pub status_path: Option<String>,
    pub control_path: Option<String>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct PollConfig {
    pub interval_ms: Option<u64>,
    pub timeout_multiplier: Option<u32>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct EventConfig {
    pub markers: Option<Vec<String>>,
}

#[derive(Deserialize, Debug, Default, Clone)]
pub struct StorageConfig {
    pub path: Option<PathBuf>,
    pub scope: Option<String>,
}

impl AppConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config file {}", path.display()))?;
        toml::de::from_str(&contents)
            .with_context(|| format!("parsing config file {}", path.display()))
    }

    pub fn poll_interval(&self) -> Duration {
        let millis = self.poll.as_ref().and_then(|p| p.interval_ms).unwrap_or(500);
        Duration::from_millis(millis.max(1))
    }

    /// A stalled request must not hold the cycle guard forever, so every
    /// fetch is bounded by a small multiple of the poll interval.
    pub fn fetch_timeout(&self) -> Duration {
        let multiplier = self
            .poll
            .as_ref()
            .and_then(|p| p.timeout_multiplier)
            .unwrap_or(4)
            .max(1);
        self.poll_interval() * multiplier
    }

    pub fn markers(&self) -> Vec<String> {
        self.events
            .as_ref()
            .and_then(|e| e.markers.clone())
            .unwrap_or_else(|| DEFAULT_MARKERS.iter().map(|m| m.to_string()).collect())
    }

    pub fn storage_path(&self) -> PathBuf {
        self.storage
            .as_ref()
            .and_then(|s| s.path.clone())
            .unwrap_or_else(|| PathBuf::from("fleet-monitor-state.json"))
    }

    pub fn storage_scope(&self) -> String {
        self.storage
            .as_ref()
            .and_then(|s| s.scope.clone())
            .unwrap_or_else(|| "default".to_string())
    }
}

impl ServerConfig {
    pub fn status_path(&self) -> &str {
        self.status_path.as_deref().unwrap_or("/api/status")
    }

    pub fn control_path(&self) -> &str {
        self.control_path.as_deref().unwrap_or("/api/agent")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config() {
        let config_str = r#"
            [server]
            base_url = "http://localhost:5000"

            [poll]
            interval_ms = 1500
            timeout_multiplier = 3

            [events]
            markers = ["LED ON"]

            [storage]
            path = "/tmp/counts.json"
            scope = "operator"
        "#;
        let config: AppConfig = toml::de::from_str(config_str).unwrap();
        assert!(config.server.base_url == "http://localhost:5000");
        assert_eq!(config.poll_interval(), Duration::from_millis(1500));
        assert_eq!(config.fetch_timeout(), Duration::from_millis(4500));
        assert_eq!(config.markers(), vec!["LED ON".to_string()]);
        assert_eq!(config.storage_path(), PathBuf::from("/tmp/counts.json"));
        assert_eq!(config.storage_scope(), "operator");
    }

    #[test]
    fn test_config_defaults() {
        let config: AppConfig = toml::de::from_str(
            r#"
            [server]
            base_url = "http://localhost:5000"
        "#,
        )
        .unwrap();
        assert_eq!(config.server.status_path(), "/api/status");
        assert_eq!(config.server.control_path(), "/api/agent");
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.fetch_timeout(), Duration::from_millis(2000));
        assert_eq!(config.markers().len(), DEFAULT_MARKERS.len());
        assert_eq!(config.storage_scope(), "default");
    }

    #[test]
    fn test_config_requires_server() {
        assert!(toml::de::from_str::<AppConfig>("[poll]\ninterval_ms = 10\n").is_err());
    }
}
