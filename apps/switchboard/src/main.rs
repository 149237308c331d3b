use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use switchboard::{
    cli::{self, Cli, Commands},
    config::Config,
    registry::Hub,
    router,
};

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let cli = Cli::parse();
    if let Some(Commands::Inspect {
        url,
        seed,
        terminal_id,
    }) = cli.command
    {
        return cli::run_inspect(url, seed, terminal_id).await;
    }

    let config = Config::from_env();
    info!(
        port = config.port,
        admin_configured = config.admin_public_key.is_some(),
        probe_interval_ms = config.probe_interval.as_millis() as u64,
        "starting switchboard hub"
    );

    let hub = Hub::new(config.clone());
    let app = router(hub.clone());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("switchboard listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(hub))
        .await
        .context("server shutdown with error")?;

    info!("graceful shutdown complete");
    Ok(())
}

/// Resolves once a termination signal arrives and every open socket has
/// been told to close. Connected clients observe their close event before
/// the listener goes away, which is what lets them run reconnect logic.
async fn shutdown_signal(hub: Arc<Hub>) {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(err) => {
                tracing::error!(error = %err, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("termination signal received; closing terminal connections");
    hub.close_all();
}
