use std::future::IntoFuture;
use std::sync::Arc;
use std::time::Duration;

use dutils::error::ContextWrapper;
use oasis_core::config::Config;
use oasis_core::{gateway, logging, Oasis};
use tracing::{info, warn};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();
    logging::init_logger();

    let config = Config::from_env();
    info!(config = ?config.redacted(), "starting oasis-core");

    let oasis = Arc::new(Oasis::new(config));
    let token = oasis.token.clone();

    {
        let token = token.clone();
        tokio::spawn(async move {
            tokio::signal::ctrl_c().await.track().ok();
            warn!("Ctrl-C received, shutting down...");
            token.cancel();
        });
    }

    let bind_addr = oasis.config.bind_addr.clone();
    let shutdown_grace = Duration::from_millis(oasis.config.control_tick_period_ms * oasis.config.shutdown_grace_ticks as u64);
    let app = gateway::router(oasis.gateway_state.clone());

    let scheduler_handle = tokio::spawn({
        let oasis = oasis.clone();
        async move { oasis.run_scheduler().await }
    });

    let listener = tokio::net::TcpListener::bind(&bind_addr).await.anyhow_with(format!("binding {bind_addr}"))?;
    info!(%bind_addr, "gateway listening");

    let serve = axum::serve(listener, app).with_graceful_shutdown(token.clone().cancelled()).into_future();

    let deadline = async move {
        token.cancelled().await;
        tokio::time::sleep(shutdown_grace).await;
    };

    tokio::select! {
        v = serve => {
            info!("gateway server finished");
            v.anyhow_with("gateway server error")?;
        }
        _ = deadline => {
            warn!("gateway shutdown grace period elapsed");
        }
    }

    oasis.token.cancel();
    scheduler_handle.await.anyhow_with("scheduler task panicked")?.anyhow_with("scheduler loop error")?;

    info!("oasis-core shut down cleanly");
    Ok(())
}
