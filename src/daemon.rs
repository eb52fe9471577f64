use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::Notify;

use crate::config::Config;
use crate::coordinator::{Coordinator, SessionSettings};
use crate::session::SessionRegistry;
use crate::sink::FileSink;
use crate::telemetry::ChannelStats;
use crate::webhook::{self, WebhookState};

#[derive(Debug, Clone, Default)]
pub struct DaemonOptions {
    /// Overrides `listen_addr` from the config.
    pub listen_addr: Option<String>,
    pub log_path: Option<PathBuf>,
}

/// Run the webhook receiver and every session it starts on the current
/// tokio runtime until `shutdown` is notified, then stop all live sessions.
pub async fn run_daemon_with_shutdown(
    cfg: Config,
    opts: DaemonOptions,
    shutdown: Arc<Notify>,
) -> Result<()> {
    let mut cfg = cfg;
    if let Some(addr) = opts.listen_addr.filter(|a| !a.trim().is_empty()) {
        cfg.listen_addr = addr.trim().to_string();
    }
    cfg.validate()?;

    let log_path = opts.log_path.unwrap_or_else(|| cfg.log_file_path());
    crate::logging::init_log_file(&log_path)?;
    crate::logging::info_kv(
        "daemon start",
        &[
            ("version", env!("CARGO_PKG_VERSION")),
            (
                "config",
                &cfg.config_path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default(),
            ),
            ("log", &log_path.display().to_string()),
            ("data_dir", &cfg.data_dir.display().to_string()),
        ],
    );
    if cfg.webhook_secret_token.is_none() {
        crate::logging::warn("no webhook secret token configured; url validation will fail");
    }

    let stats = Arc::new(ChannelStats::default());
    let coordinator = Coordinator::new(
        SessionSettings::from_config(&cfg),
        SessionRegistry::new(),
        Arc::new(FileSink::new(&cfg.data_dir)),
        stats,
    );
    let state = Arc::new(WebhookState {
        coordinator: coordinator.clone(),
        secret_token: cfg.webhook_secret_token.clone(),
        control_token: cfg.control_token.clone(),
    });

    let server_shutdown = Arc::new(Notify::new());
    let bound = webhook::start(
        &cfg.listen_addr,
        &cfg.webhook_path,
        state,
        server_shutdown.clone(),
    )
    .await?;
    if bound.to_string() != cfg.listen_addr {
        crate::logging::info_kv(
            "webhook server bound to different address than configured",
            &[("configured", &cfg.listen_addr), ("actual", &bound.to_string())],
        );
    }

    shutdown.notified().await;

    let stopped = coordinator.stop_all();
    crate::logging::info_kv("daemon stopping", &[("sessions_stopped", &stopped.to_string())]);
    server_shutdown.notify_one();
    Ok(())
}
