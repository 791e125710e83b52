//! Guest insights: local dashboard backend.
//! Boots the Axum HTTP server, wiring routes, shared state, and metrics.

use anyhow::Context;
use guest_insights::{api, build_state, config::AppConfig, logging, metrics::Metrics};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env in local/dev; no-op when absent.
    let _ = dotenvy::dotenv();
    logging::init_tracing();

    let cfg = AppConfig::load_default()?;
    let state = build_state(&cfg)?;
    let metrics = Metrics::init()?;

    let app = api::router(state).merge(metrics.router());

    let listener = tokio::net::TcpListener::bind(&cfg.server.bind_addr)
        .await
        .with_context(|| format!("binding {}", cfg.server.bind_addr))?;
    tracing::info!(addr = %cfg.server.bind_addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}
