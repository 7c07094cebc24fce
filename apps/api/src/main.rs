use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use dotenv::dotenv;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::{self, TraceLayer};
use tracing::{info, warn, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod router;

use appointment_cell::{SchedulingEngine, SchedulingState};
use shared_config::AppConfig;
use video_conferencing_cell::store::token_store_from_config;
use video_conferencing_cell::{AccessTokenIssuer, CredentialMinter, VideoState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Loading Env Vars
    dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info,tower_http=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting scheduling API server");

    // Load configuration
    let config = Arc::new(AppConfig::from_env());

    // Wire the engine and the token issuer onto the same lifecycle and event bus
    let engine = Arc::new(SchedulingEngine::from_config(&config));
    let minter = match CredentialMinter::from_config(&config) {
        Ok(minter) => Some(minter),
        Err(e) => {
            warn!("Session access tokens disabled: {}", e);
            None
        }
    };
    let issuer = AccessTokenIssuer::new(
        token_store_from_config(&config),
        engine.lifecycle.clone(),
        engine.events.clone(),
        minter,
    );

    let scheduling = Arc::new(SchedulingState::new(config.clone(), engine));
    let video = Arc::new(VideoState::new(config.clone(), Arc::new(issuer)));

    // Set up CORS
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Build the application router
    let app = router::create_router(scheduling, video)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(trace::DefaultMakeSpan::new().level(Level::INFO))
                .on_response(trace::DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors);

    // Run the server
    let addr = SocketAddr::from(([0, 0, 0, 0], 3000));
    info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    axum::serve(listener, app).await.context("server error")?;

    Ok(())
}
