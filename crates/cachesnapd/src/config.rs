//! Configuration management for cachesnapd.
//!
//! Loads settings from /etc/cachesnap/config.toml or uses defaults.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{info, warn};

/// Config file path
pub const CONFIG_PATH: &str = "/etc/cachesnap/config.toml";

/// Default config file path for fallback
pub const DEFAULT_CONFIG_PATH: &str = "/var/lib/cachesnap/config.toml";

/// Daemon-level settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonSection {
    /// Unix socket the RPC server binds
    #[serde(default = "default_socket_path")]
    pub socket_path: String,

    /// Directory for policies, journals, and other daemon state
    #[serde(default = "default_data_dir")]
    pub data_dir: String,

    /// Region this daemon triggers snapshots in
    #[serde(default = "default_region")]
    pub region: String,

    /// Snapshot tracker poll interval in seconds
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,

    /// Automatic-config drift check interval in seconds
    #[serde(default = "default_drift_interval")]
    pub drift_check_interval_secs: u64,

    /// Restore poll interval in seconds
    #[serde(default = "default_restore_poll_interval")]
    pub restore_poll_interval_secs: u64,

    /// Snapshots pending longer than this raise an overdue alert
    #[serde(default = "default_pending_alert_after")]
    pub pending_alert_after_secs: u64,

    /// Address the metrics/health HTTP endpoint binds (localhost only)
    #[serde(default = "default_metrics_addr")]
    pub metrics_addr: String,
}

fn default_socket_path() -> String {
    "/run/cachesnap/cachesnapd.sock".to_string()
}

fn default_data_dir() -> String {
    "/var/lib/cachesnap".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_poll_interval() -> u64 {
    30
}

fn default_drift_interval() -> u64 {
    900
}

fn default_restore_poll_interval() -> u64 {
    30
}

fn default_pending_alert_after() -> u64 {
    3600 // Alert only; the control plane stays authoritative on terminal status
}

fn default_metrics_addr() -> String {
    "127.0.0.1:7870".to_string()
}

impl Default for DaemonSection {
    fn default() -> Self {
        Self {
            socket_path: default_socket_path(),
            data_dir: default_data_dir(),
            region: default_region(),
            poll_interval_secs: default_poll_interval(),
            drift_check_interval_secs: default_drift_interval(),
            restore_poll_interval_secs: default_restore_poll_interval(),
            pending_alert_after_secs: default_pending_alert_after(),
            metrics_addr: default_metrics_addr(),
        }
    }
}

/// Control-plane client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlPlaneSection {
    /// "sim" for the in-memory control plane, "http" for a real adapter
    #[serde(default = "default_mode")]
    pub mode: String,

    /// Base URL for mode = "http"
    #[serde(default = "default_endpoint")]
    pub endpoint: String,

    /// Bounded retry for transient API errors
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_mode() -> String {
    "http".to_string()
}

fn default_endpoint() -> String {
    "http://127.0.0.1:7871".to_string()
}

fn default_max_attempts() -> u32 {
    3
}

fn default_base_delay_ms() -> u64 {
    200
}

fn default_max_delay_ms() -> u64 {
    2_000
}

impl Default for ControlPlaneSection {
    fn default() -> Self {
        Self {
            mode: default_mode(),
            endpoint: default_endpoint(),
            max_attempts: default_max_attempts(),
            base_delay_ms: default_base_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
        }
    }
}

/// Alert sink settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AlertSection {
    /// Webhook URLs events are POSTed to (chat, ticketing)
    #[serde(default)]
    pub webhooks: Vec<String>,

    /// Keep a JSONL alert journal under the data dir
    #[serde(default = "default_journal")]
    pub journal: bool,
}

fn default_journal() -> bool {
    true
}

/// Full daemon configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub daemon: DaemonSection,

    #[serde(default)]
    pub control_plane: ControlPlaneSection,

    #[serde(default)]
    pub alerts: AlertSection,
}

impl Config {
    /// Load config from file, or return defaults
    pub fn load() -> Self {
        Self::load_from_path(CONFIG_PATH)
            .or_else(|_| Self::load_from_path(DEFAULT_CONFIG_PATH))
            .unwrap_or_else(|e| {
                warn!("Config not found, using defaults: {}", e);
                Config::default()
            })
    }

    /// Load config from specific path
    pub fn load_from_path(path: &str) -> Result<Self> {
        let content = fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        info!("Loaded config from {}", path);
        Ok(config)
    }

    /// Save default config to path (for init)
    pub fn save_default(path: &str) -> Result<()> {
        let config = Config::default();
        let content = toml::to_string_pretty(&config)?;
        if let Some(parent) = Path::new(path).parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        info!("Saved default config to {}", path);
        Ok(())
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.daemon.poll_interval_secs)
    }

    pub fn drift_check_interval(&self) -> Duration {
        Duration::from_secs(self.daemon.drift_check_interval_secs)
    }

    pub fn restore_poll_interval(&self) -> Duration {
        Duration::from_secs(self.daemon.restore_poll_interval_secs)
    }

    pub fn pending_alert_after(&self) -> Duration {
        Duration::from_secs(self.daemon.pending_alert_after_secs)
    }
}
