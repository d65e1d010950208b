//! services/api/src/bin/api.rs

use api_lib::{
    adapters::{DbAdapter, HttpPaymentAdapter, InMemoryDb, LoggingPaymentAdapter},
    config::Config,
    error::ApiError,
    watchdog::spawn_session_watchdog,
    web::{
        self, auth::TokenVerifier, hub::BroadcastHub, idempotency::IdempotencyCache,
        rest::ApiDoc, state::AppState,
    },
};
use axum::{
    extract::DefaultBodyLimit,
    http::{
        header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
        HeaderName, HeaderValue, Method,
    },
    Router,
};
use boothnow_core::{DatabaseService, PaymentService, SessionEngine, SystemClock};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[tokio::main]
async fn main() -> Result<(), ApiError> {
    // --- 1. Load Configuration & Set Up Logging ---
    let config = Arc::new(Config::from_env()?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(config.log_level.to_string()))
        .with(tracing_subscriber::fmt::layer())
        .init();
    info!("Configuration loaded. Starting server...");

    // --- 2. Connect to Database & Run Migrations ---
    let db: Arc<dyn DatabaseService> = match &config.database_url {
        Some(url) => {
            info!("Connecting to database...");
            let db_pool = PgPoolOptions::new()
                .max_connections(10)
                .connect(url)
                .await?;
            let db_adapter = DbAdapter::new(db_pool);
            info!("Running database migrations...");
            db_adapter.run_migrations().await?;
            info!("Database migrations complete.");
            Arc::new(db_adapter)
        }
        None => {
            warn!("DATABASE_URL is not set; using the in-memory store with demo booths.");
            let memory = InMemoryDb::new();
            seed_demo_booths(&memory).await;
            Arc::new(memory)
        }
    };

    // --- 3. Initialize Service Adapters ---
    let payments: Arc<dyn PaymentService> = match &config.payment_api_key {
        Some(key) => Arc::new(HttpPaymentAdapter::new(
            config.payment_api_url.clone(),
            key.clone(),
        )?),
        None => {
            warn!("PAYMENT_API_KEY is not set; charges will only be logged.");
            Arc::new(LoggingPaymentAdapter)
        }
    };
    let hub = Arc::new(BroadcastHub::default());

    let engine = Arc::new(SessionEngine::new(
        db.clone(),
        payments,
        hub.clone(),
        Arc::new(SystemClock),
        config.session_policy(),
    ));

    // --- 4. Build the Shared AppState ---
    let app_state = Arc::new(AppState {
        engine: engine.clone(),
        db,
        hub,
        tokens: TokenVerifier::new(&config.jwt_secret),
        idempotency: IdempotencyCache::default(),
    });

    let origin = config.cors_origin.parse::<HeaderValue>().map_err(|e| {
        ApiError::Internal(format!(
            "Invalid CORS origin '{}': {}",
            config.cors_origin, e
        ))
    })?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_credentials(true)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([
            AUTHORIZATION,
            CONTENT_TYPE,
            ACCEPT,
            HeaderName::from_static(web::idempotency::IDEMPOTENCY_HEADER),
        ]);

    // --- 5. Create the Web Router ---
    let app = Router::new()
        .merge(web::router(app_state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(DefaultBodyLimit::max(64 * 1024))
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    // --- 6. Start the Watchdog ---
    let shutdown = CancellationToken::new();
    let watchdog = spawn_session_watchdog(
        engine,
        Duration::from_secs(config.sweep_interval_seconds),
        shutdown.clone(),
    );

    // --- 7. Start the Server ---
    info!("Starting server on {}", config.bind_address);
    info!(
        "Swagger UI available at http://{}/swagger-ui",
        config.bind_address
    );
    let listener = tokio::net::TcpListener::bind(&config.bind_address).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(shutdown.clone()))
        .await?;

    shutdown.cancel();
    if let Err(e) = watchdog.await {
        warn!("Watchdog task ended abnormally: {}", e);
    }
    info!("Server stopped.");
    Ok(())
}

async fn shutdown_signal(shutdown: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for the shutdown signal: {}", e);
    }
    info!("Shutdown signal received.");
    shutdown.cancel();
}

async fn seed_demo_booths(memory: &InMemoryDb) {
    let demo = [
        ("KUBO Central", 14.5995, 120.9842, "Ayala Ave, Makati"),
        ("KUBO Station", 14.5547, 121.0244, "BGC High Street, Taguig"),
        ("KUBO Library", 14.6537, 121.0685, "Katipunan Ave, Quezon City"),
    ];
    for (partner, lat, lon, address) in demo {
        let booth = memory.seed_booth(partner, lat, lon, address).await;
        info!("Seeded demo booth {} ({})", booth.id, booth.partner_name);
    }
}
