use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::Notify;

use rtms_rs::config::Config;
use rtms_rs::daemon::{run_daemon_with_shutdown, DaemonOptions};

#[derive(Parser, Debug)]
#[command(name = "rtms-rs", version)]
struct Cli {
    /// Path to config file
    #[arg(short = 'c', long = "config")]
    config: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Receive webhook notifications and stream every started session
    Serve {
        /// Webhook listen address (overrides config and PORT)
        #[arg(long = "listen-addr")]
        listen_addr: Option<String>,

        /// Log file path (defaults to logs/rtms.log beside the config)
        #[arg(long = "log-path")]
        log_path: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cfg = Config::load(&cli.config)?;

    match cli.command {
        Commands::Serve {
            listen_addr,
            log_path,
        } => {
            let shutdown = Arc::new(Notify::new());
            let signal = shutdown.clone();
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    signal.notify_one();
                }
            });
            run_daemon_with_shutdown(
                cfg,
                DaemonOptions {
                    listen_addr,
                    log_path,
                },
                shutdown,
            )
            .await?;
        }
    }

    Ok(())
}
