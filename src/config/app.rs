// src/config/app.rs
use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::{env, fs, path::Path};

use crate::model::RiskBands;

pub const DEFAULT_CONFIG_PATH: &str = "config/guest_insights.toml";
pub const ENV_CONFIG_PATH: &str = "GUEST_INSIGHTS_CONFIG";

fn default_base_url() -> String {
    "http://127.0.0.1:8000/api/v1".to_string()
}
fn default_tenant() -> String {
    crate::service::DEFAULT_TENANT.to_string()
}
fn default_connect_timeout() -> u64 {
    4
}
fn default_debounce_ms() -> u64 {
    600
}
fn default_true() -> bool {
    true
}
fn default_history_path() -> String {
    "data/analysis_history.json".to_string()
}
fn default_capacity() -> usize {
    100
}
fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Sent as `X-Tenant-ID`.
    #[serde(default = "default_tenant")]
    pub tenant_id: String,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Total request timeout. None waits indefinitely.
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            tenant_id: default_tenant(),
            connect_timeout_secs: default_connect_timeout(),
            timeout_secs: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    #[serde(default = "default_debounce_ms")]
    pub debounce_ms: u64,
    /// Abort the superseded task (and its HTTP request) in addition to the
    /// generation check at delivery.
    #[serde(default = "default_true")]
    pub abort_superseded: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            debounce_ms: default_debounce_ms(),
            abort_superseded: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    #[serde(default = "default_history_path")]
    pub path: String,
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            path: default_history_path(),
            capacity: default_capacity(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind")]
    pub bind_addr: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub risk: RiskBands,
    #[serde(default)]
    pub server: ServerConfig,
}

impl AppConfig {
    /// Parse a TOML file, then apply env overrides and sanitise.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let data = fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        let cfg: AppConfig = toml::from_str(&data)
            .with_context(|| format!("parsing config {}", path.display()))?;
        cfg.finish()
    }

    /// Resolve the config path from `$GUEST_INSIGHTS_CONFIG`, falling back to
    /// `config/guest_insights.toml`. A missing default file means defaults;
    /// a missing explicitly named file is an error.
    pub fn load_default() -> anyhow::Result<Self> {
        if let Ok(p) = env::var(ENV_CONFIG_PATH) {
            return Self::load_from_file(p);
        }
        let p = Path::new(DEFAULT_CONFIG_PATH);
        if p.exists() {
            return Self::load_from_file(p);
        }
        AppConfig::default().finish()
    }

    fn finish(mut self) -> anyhow::Result<Self> {
        self.apply_env()?;
        self.risk = self.risk.sanitized();
        if self.history.capacity == 0 {
            self.history.capacity = 1;
        }
        Ok(self)
    }

    fn apply_env(&mut self) -> anyhow::Result<()> {
        if let Ok(v) = env::var("PREDICTION_API_URL") {
            self.service.base_url = v;
        }
        if let Ok(v) = env::var("TENANT_ID") {
            self.service.tenant_id = v;
        }
        if let Ok(v) = env::var("HISTORY_PATH") {
            self.history.path = v;
        }
        if let Ok(v) = env::var("HISTORY_CAPACITY") {
            self.history.capacity = v
                .trim()
                .parse()
                .with_context(|| format!("HISTORY_CAPACITY is not a number: {v}"))?;
        }
        if let Ok(v) = env::var("DEBOUNCE_MS") {
            self.scheduler.debounce_ms = v
                .trim()
                .parse()
                .with_context(|| format!("DEBOUNCE_MS is not a number: {v}"))?;
        }
        if let Ok(v) = env::var("BIND_ADDR") {
            self.server.bind_addr = v;
        }
        Ok(())
    }
}
