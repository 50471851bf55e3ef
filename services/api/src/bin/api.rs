//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{
        AstrologyApiClient, HttpIdentityResolver, HttpWaitlistAdapter, OpenAiChatAdapter,
        SqliteTrialStore,
    },
    config::Config,
    error::ApiError,
    web::{state::AppState, ws_handler},
};
use async_openai::{config::OpenAIConfig, Client};
use axum::http::{header::CONTENT_TYPE, Method};
use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect the Trial Ledger ---
    info!("Connecting to trial ledger database...");
    let trial_store = Arc::new(SqliteTrialStore::connect(&config.database_url).await?);
    info!("Trial ledger ready.");

    // --- 3. Initialize Service Adapters ---
    let openai_config = OpenAIConfig::new().with_api_key(
        config
            .openai_api_key
            .as_ref()
            .ok_or_else(|| ApiError::Internal("OPENAI_API_KEY is required".to_string()))?,
    );
    let openai_client = Client::with_config(openai_config);
    let ai_adapter = Arc::new(OpenAiChatAdapter::new(
        openai_client,
        config.chat_model.clone(),
    ));

    let http = reqwest::Client::new();

    let identity_adapter = Arc::new(HttpIdentityResolver::new(
        http.clone(),
        config.identity_url.clone(),
    ));

    let astrology_client_id = config
        .astrology_client_id
        .clone()
        .ok_or_else(|| ApiError::Internal("ASTROLOGY_CLIENT_ID is required".to_string()))?;
    let astrology_client_secret = config
        .astrology_client_secret
        .clone()
        .ok_or_else(|| ApiError::Internal("ASTROLOGY_CLIENT_SECRET is required".to_string()))?;
    let astrology_adapter = Arc::new(AstrologyApiClient::new(
        http.clone(),
        config.astrology_base_url.clone(),
        astrology_client_id,
        astrology_client_secret,
    ));

    let waitlist_url = config
        .waitlist_url
        .clone()
        .ok_or_else(|| ApiError::Internal("WAITLIST_URL is required".to_string()))?;
    let waitlist_adapter = Arc::new(HttpWaitlistAdapter::new(http, waitlist_url));

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        config: config.clone(),
        trial_store,
        identity: identity_adapter,
        ai: ai_adapter,
        birth: astrology_adapter.clone(),
        chart: astrology_adapter.clone(),
        daily: astrology_adapter,
        waitlist: waitlist_adapter,
    });

    if config.trial_dev_override {
        info!("Trial development override is ON: the gate never blocks.");
    }

    // --- 5. Create the Web Router ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([CONTENT_TYPE]);

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .layer(cors)
        .with_state(app_state);

    // --- 6. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
