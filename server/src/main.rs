use anyhow::{Context, Result};
use server::config::ServerConfig;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();

    let config = ServerConfig::load();
    let listener = TcpListener::bind(&config.addr)
        .await
        .with_context(|| format!("bind {}", config.addr))?;
    let local = listener.local_addr().context("listener address")?;
    info!(
        %local,
        tick_hz = config.tick_hz,
        pattern = %config.pattern_path.display(),
        "dogfight server listening"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let serve = server::serve(listener, config, shutdown_rx);
    tokio::pin!(serve);

    tokio::select! {
        res = &mut serve => return res,
        res = tokio::signal::ctrl_c() => {
            res.context("listen for ctrl-c")?;
            info!("shutting down");
        }
    }

    let _ = shutdown_tx.send(true);
    serve.await
}
