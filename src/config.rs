use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::wsproto::MediaParams;

pub const ENV_CLIENT_ID: &str = "ZM_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "ZM_CLIENT_SECRET";
pub const ENV_SECRET_TOKEN: &str = "ZOOM_SECRET_TOKEN";
pub const ENV_PORT: &str = "PORT";
pub const ENV_WEBHOOK_PATH: &str = "WEBHOOK_PATH";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default)]
    pub webhook_secret_token: Option<String>,
    /// Bearer token guarding the session listing endpoint.
    #[serde(default)]
    pub control_token: Option<String>,
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_webhook_path")]
    pub webhook_path: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub log_path: Option<PathBuf>,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_secs: u64,
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,
    /// Reconnects allowed per channel after a dropped connection; 0 disables.
    #[serde(default = "default_reconnect_attempts")]
    pub reconnect_attempts: u32,
    #[serde(default = "default_reconnect_delay")]
    pub reconnect_delay_ms: u64,
    #[serde(default)]
    pub subscribe_events: Vec<u32>,
    #[serde(default)]
    pub media: MediaParams,
    #[serde(skip)]
    pub config_path: Option<PathBuf>,
}

fn default_listen_addr() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_webhook_path() -> String {
    "/webhook".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("rtms-data")
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_idle_timeout() -> u64 {
    60
}

fn default_reconnect_attempts() -> u32 {
    3
}

fn default_reconnect_delay() -> u64 {
    3000
}

/// Values taken from the process environment, applied over the file.
#[derive(Debug, Default, Clone)]
pub struct EnvOverrides {
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub secret_token: Option<String>,
    pub port: Option<String>,
    pub webhook_path: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        let get = |k: &str| std::env::var(k).ok().filter(|v| !v.trim().is_empty());
        Self {
            client_id: get(ENV_CLIENT_ID),
            client_secret: get(ENV_CLIENT_SECRET),
            secret_token: get(ENV_SECRET_TOKEN),
            port: get(ENV_PORT),
            webhook_path: get(ENV_WEBHOOK_PATH),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self> {
        Self::load_with_overrides(path, EnvOverrides::from_env())
    }

    pub fn load_with_overrides(path: &Path, overrides: EnvOverrides) -> Result<Self> {
        let data = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let mut cfg: Config = serde_json::from_str(&data).context("parse config json")?;
        cfg.config_path = Some(path.to_path_buf());
        cfg.apply_overrides(overrides)?;
        cfg.normalize();
        cfg.validate()?;
        Ok(cfg)
    }

    fn apply_overrides(&mut self, o: EnvOverrides) -> Result<()> {
        if let Some(v) = o.client_id {
            self.client_id = v;
        }
        if let Some(v) = o.client_secret {
            self.client_secret = v;
        }
        if let Some(v) = o.secret_token {
            self.webhook_secret_token = Some(v);
        }
        if let Some(v) = o.webhook_path {
            self.webhook_path = v;
        }
        if let Some(port) = o.port {
            let port: u16 = port
                .trim()
                .parse()
                .with_context(|| format!("{ENV_PORT} is not a port: {port}"))?;
            let host = self
                .listen_addr
                .rsplit_once(':')
                .map(|(h, _)| h.to_string())
                .unwrap_or_else(|| "0.0.0.0".to_string());
            self.listen_addr = format!("{host}:{port}");
        }
        Ok(())
    }

    fn normalize(&mut self) {
        self.client_id = self.client_id.trim().to_string();
        self.listen_addr = self.listen_addr.trim().to_string();
        self.webhook_path = self.webhook_path.trim().to_string();
        if self.webhook_secret_token.as_deref().map(str::trim) == Some("") {
            self.webhook_secret_token = None;
        }
        if self.data_dir.is_relative() {
            if let Some(base) = self.config_path.as_ref().and_then(|p| p.parent()) {
                if !base.as_os_str().is_empty() {
                    self.data_dir = base.join(&self.data_dir);
                }
            }
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            anyhow::bail!("client_id is required (or set {ENV_CLIENT_ID})");
        }
        if self.client_secret.is_empty() {
            anyhow::bail!("client_secret is required (or set {ENV_CLIENT_SECRET})");
        }
        if !self.webhook_path.starts_with('/') {
            anyhow::bail!("webhook_path must start with '/': {}", self.webhook_path);
        }
        self.listen_addr
            .parse::<SocketAddr>()
            .with_context(|| format!("listen_addr {} (use a numeric ip:port)", self.listen_addr))?;
        if self.media.media_type == 0 {
            anyhow::bail!("media.media_type must request at least one media type");
        }
        Ok(())
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_secs(self.handshake_timeout_secs.max(1))
    }

    /// `None` disables the idle watchdog.
    pub fn idle_timeout(&self) -> Option<Duration> {
        if self.idle_timeout_secs == 0 {
            None
        } else {
            Some(Duration::from_secs(self.idle_timeout_secs))
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    pub fn log_file_path(&self) -> PathBuf {
        if let Some(p) = &self.log_path {
            return p.clone();
        }
        if let Some(p) = self.config_path.as_ref().and_then(|p| p.parent()) {
            return p.join("logs").join("rtms.log");
        }
        self.data_dir.join("logs").join("rtms.log")
    }
}
