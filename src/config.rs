use serde::Deserialize;
use std::fs;
use std::path::PathBuf;

#[derive(Debug, Clone, Deserialize)]
pub struct MonitorConfig {
    #[serde(default)]
    pub active_monitoring: bool,
    #[serde(default = "default_heartbeat_interval_ms")]
    pub heartbeat_interval_ms: u64,
    pub heartbeat_url: Option<String>,
    /// Applied to the HTTP client only; the monitor never times out a probe itself
    pub request_timeout_ms: Option<u64>,
}

fn default_heartbeat_interval_ms() -> u64 {
    60_000
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            active_monitoring: false,
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            heartbeat_url: None,
            request_timeout_ms: None,
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub monitor: MonitorConfig,
}

impl AppConfig {
    pub fn load_default() -> anyhow::Result<Self> {
        let default = include_str!("../config/default.toml");
        let cfg: AppConfig = toml::from_str(default)?;
        Ok(cfg)
    }

    pub fn load_from(path: impl Into<PathBuf>) -> anyhow::Result<Self> {
        let p = path.into();
        let s = fs::read_to_string(&p)?;
        let cfg: AppConfig = toml::from_str(&s)?;
        Ok(cfg)
    }
}
