mod config;
mod context;
mod controller;
mod db;
mod ingress;
mod limiter;
mod producer;
mod store;
mod streams;
mod telegram;
mod types;
mod worker;

use anyhow::Result;
use config::Config;
use context::SystemContext;
use tokio::signal;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("tg_dispatch_gateway=info")),
        )
        .init();

    info!("tg-dispatch-gateway v{}", env!("CARGO_PKG_VERSION"));
    info!("Initializing stream store and limiters...");

    let ctx = SystemContext::new(&config).await?;

    let ingress_state = ingress::AppState {
        producer: ctx.producer.clone(),
        ingress_token: config.ingress_token.clone(),
    };
    let ingress_router = ingress::create_router(ingress_state);
    let ingress_addr = format!("0.0.0.0:{}", config.api_port);
    let ingress_listener = tokio::net::TcpListener::bind(&ingress_addr).await?;
    info!("Ingress server listening on http://{}", ingress_addr);

    let ingress_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(ingress_listener, ingress_router).await {
            error!("ingress server error: {}", e);
        }
    });

    let controller = ctx.controller.clone();
    let controller_handle = tokio::spawn(async move {
        controller.run().await;
    });

    info!("Controller running. Press Ctrl+C to stop.");

    tokio::select! {
        _ = controller_handle => {
            info!("Controller stopped");
        }
        _ = signal::ctrl_c() => {
            info!("Received Ctrl+C, shutting down gracefully...");
        }
    }

    info!("Stopping ingress server...");
    ingress_handle.abort();

    info!("Shutdown complete.");
    Ok(())
}
