//! l2bridged - layer-2 bridge network plugin daemon.
//!
//! Serves the remote network driver protocol on a Unix socket and forwards
//! every call to the l2bridge driver core.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use clap::{ArgAction, Parser, ValueEnum};
use l2bridge::{BridgeDriver, Configuration};
use tokio::net::UnixListener;
use tokio::signal::unix::{SignalKind, signal};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

mod api;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Unix socket to serve the plugin API on
    #[arg(
        long,
        env = "L2BRIDGE_SOCKET",
        default_value = "/run/docker/plugins/l2bridge.sock"
    )]
    socket: PathBuf,

    /// Enable IPv4 forwarding on the host
    #[arg(long, env = "L2BRIDGE_ENABLE_IP_FORWARDING", default_value_t = true, action = ArgAction::Set)]
    enable_ip_forwarding: bool,

    /// Install bridge forwarding rules with iptables
    #[arg(long, env = "L2BRIDGE_ENABLE_IPTABLES", default_value_t = true, action = ArgAction::Set)]
    enable_iptables: bool,

    /// A userland proxy handles published ports; disables hairpin mode
    #[arg(long, env = "L2BRIDGE_ENABLE_USERLAND_PROXY", default_value_t = false, action = ArgAction::Set)]
    enable_userland_proxy: bool,

    /// Path of the userland proxy binary
    #[arg(long, env = "L2BRIDGE_USERLAND_PROXY_PATH")]
    userland_proxy_path: Option<PathBuf>,

    /// Log output format
    #[arg(long, env = "L2BRIDGE_LOG_FORMAT", value_enum, default_value_t = LogFormat::Text)]
    log_format: LogFormat,
}

impl Args {
    fn configuration(&self) -> Configuration {
        Configuration {
            enable_ip_forwarding: self.enable_ip_forwarding,
            enable_iptables: self.enable_iptables,
            enable_userland_proxy: self.enable_userland_proxy,
            userland_proxy_path: self.userland_proxy_path.clone(),
        }
    }
}

fn init_tracing(format: LogFormat) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new("info"))?;
    let registry = tracing_subscriber::registry().with(filter);
    match format {
        LogFormat::Text => registry.with(fmt::layer().with_target(true)).init(),
        LogFormat::Json => registry.with(fmt::layer().json()).init(),
    }
    Ok(())
}

fn bind(socket: &Path) -> anyhow::Result<UnixListener> {
    if let Some(dir) = socket.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create {}", dir.display()))?;
    }
    match std::fs::remove_file(socket) {
        Ok(()) => tracing::debug!(socket = %socket.display(), "Removed stale socket"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            return Err(e).with_context(|| format!("failed to remove {}", socket.display()));
        }
    }
    UnixListener::bind(socket).with_context(|| format!("failed to bind {}", socket.display()))
}

async fn shutdown_signal() {
    let terminate = async {
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        () = terminate => {}
    }
    tracing::info!("Shutting down");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_format)?;

    let config = args.configuration();
    let driver = Arc::new(BridgeDriver::host(config.clone()).context("failed to open netlink")?);
    driver
        .configure(config)
        .await
        .context("failed to configure driver")?;

    // SIGHUP stands in for a packet filter reload notification.
    let mut hangup = signal(SignalKind::hangup()).context("failed to install SIGHUP handler")?;
    let reloads = Arc::clone(&driver);
    tokio::spawn(async move {
        while hangup.recv().await.is_some() {
            tracing::info!("Packet filter reloaded, reapplying rules");
            reloads.filter_reloaded();
        }
    });

    let listener = bind(&args.socket)?;
    tracing::info!(socket = %args.socket.display(), "l2bridged listening");

    axum::serve(listener, api::server::app(driver))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("plugin server failed")?;

    if let Err(e) = std::fs::remove_file(&args.socket) {
        tracing::warn!(socket = %args.socket.display(), error = %e, "Failed to remove socket");
    }
    Ok(())
}
