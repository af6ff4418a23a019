//! wx-logger entry point.
//!
//! Start:  wx-logger
//! Stop:   Ctrl-C or SIGTERM

use std::sync::Arc;

use tracing::info;

use wx_logger::store::Store;
use wx_logger::{Daemon, Settings};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "wx_logger=info".into()),
        )
        .init();

    let settings = Settings::default();
    info!(
        "wx-logger v{} starting (db: {}, ipc port: {})",
        env!("CARGO_PKG_VERSION"),
        settings.db_path,
        settings.ipc_port
    );

    let store = Arc::new(Store::open(&settings.db_path).await?);
    let daemon = Daemon::new(settings, store);

    daemon.start_ipc().await?;
    daemon.auto_connect().await;

    info!("logger daemon ready");
    wait_for_shutdown_signal().await;

    daemon.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown_signal() {
    use tokio::signal::unix::{signal, SignalKind};
    let mut sigterm = match signal(SignalKind::terminate()) {
        Ok(s) => s,
        Err(e) => {
            tracing::warn!("could not install SIGTERM handler: {e}");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("SIGINT received"),
        _ = sigterm.recv() => info!("SIGTERM received"),
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    info!("Ctrl-C received");
}
