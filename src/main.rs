mod clients;
mod geo;
mod handlers;
mod models;
mod redis_client;
mod resilience;
mod routes;
mod security;
mod state;
mod store;

use anyhow::Context;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::env;
use tower_http::cors::CorsLayer;

#[tokio::main]
async fn main() -> Result<(), anyhow::Error> {
    dotenvy::dotenv().ok();

    let metrics_handle = PrometheusBuilder::new()
        .install_recorder()
        .context("Failed to install metrics recorder")?;

    let config = state::AppConfig::from_env();

    println!("Initializing abuse-prevention gates...");
    let state = state::AppState::new(&config, metrics_handle).await?;
    println!("Gates initialized");

    let app = routes::create_router(state).layer(CorsLayer::permissive());

    let bind_addr = env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:3001".to_string());
    println!("Server running on http://{}", bind_addr);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
