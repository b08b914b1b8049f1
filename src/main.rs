use axum::{Extension, Router};
use std::sync::Arc;
use tower_http::cors::CorsLayer;

mod chat_client;
mod classifier_client;
mod db;
mod errors;
mod handlers;
mod memory;
mod middleware;
mod models;
mod routing;
mod search_client;

// AppState holds the database pool, the three hosted-service adapters (each
// optional, gated on its environment variables) and the in-process session
// memory.
pub struct AppState {
    pub db_pool: sqlx::PgPool,
    pub classifier_client: Option<classifier_client::ClassifierClient>,
    pub search_client: Option<search_client::SearchClient>,
    pub chat_client: Option<chat_client::ChatModelClient>,
    pub session_memory: memory::SessionMemory,
}

#[tokio::main]
async fn main() {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    init_logging().expect("Failed to initialize logging");

    // Uploaded skin images are stored on local disk
    if let Err(e) = std::fs::create_dir_all("uploads/skin_images") {
        tracing::warn!("Failed to create uploads directory: {}", e);
    } else {
        tracing::info!("Uploads directory ready");
    }

    // Create the database connection pool and apply pending migrations
    let db_pool = db::create_pool()
        .await
        .expect("Failed to create database pool.");
    db::run_migrations(&db_pool)
        .await
        .expect("Failed to run database migrations.");

    // Initialize the skin-condition classifier adapter if configured
    let classifier_client = match std::env::var("CLASSIFIER_API_URL").ok() {
        Some(url) if !url.is_empty() => {
            tracing::info!("Initializing skin-condition classifier client...");
            let api_key = std::env::var("CLASSIFIER_API_KEY").ok().filter(|k| !k.is_empty());
            Some(classifier_client::ClassifierClient::new(url, api_key))
        }
        _ => {
            tracing::warn!("CLASSIFIER_API_URL not found. Image analysis will be disabled.");
            None
        }
    };

    // Initialize the medical knowledge search adapter if configured
    let search_client = match (
        std::env::var("SEARCH_SERVICE_ENDPOINT").ok(),
        std::env::var("SEARCH_SERVICE_API_KEY").ok(),
    ) {
        (Some(endpoint), Some(api_key)) if !endpoint.is_empty() && !api_key.is_empty() => {
            tracing::info!("Initializing medical knowledge search client...");
            Some(search_client::SearchClient::new(endpoint, api_key))
        }
        _ => {
            tracing::warn!(
                "Search service credentials not found. Cited answers will fall back to general chat."
            );
            tracing::info!("To enable search, set: SEARCH_SERVICE_ENDPOINT, SEARCH_SERVICE_API_KEY");
            None
        }
    };

    // Initialize the hosted chat model adapter if configured
    let chat_client = match (
        std::env::var("CHAT_MODEL_ENDPOINT").ok(),
        std::env::var("CHAT_MODEL_API_KEY").ok(),
    ) {
        (Some(endpoint), Some(api_key)) if !endpoint.is_empty() && !api_key.is_empty() => {
            tracing::info!("Initializing chat model client...");
            Some(chat_client::ChatModelClient::new(endpoint, api_key))
        }
        _ => {
            tracing::warn!("Chat model credentials not found. Conversational features will be disabled.");
            tracing::info!("To enable chat, set: CHAT_MODEL_ENDPOINT, CHAT_MODEL_API_KEY");
            None
        }
    };

    let shared_state = Arc::new(AppState {
        db_pool,
        classifier_client,
        search_client,
        chat_client,
        session_memory: memory::SessionMemory::default(),
    });

    // Build our application with all routes and shared state
    let app = Router::new()
        .merge(handlers::auth::auth_routes())
        .merge(handlers::assistant::assistant_routes())
        .merge(handlers::dermatologists::dermatologist_routes())
        .route("/api/status", axum::routing::get(api_status))
        .layer(axum::middleware::from_fn(
            middleware::logging::request_logging_middleware,
        ))
        .layer(CorsLayer::permissive())
        .layer(Extension(shared_state.clone()));

    let bind_addr =
        std::env::var("BIND_ADDR").unwrap_or_else(|_| "0.0.0.0:8000".to_string());
    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .expect("Failed to bind server address.");
    tracing::info!("listening on {}", listener.local_addr().unwrap());
    axum::serve(listener, app).await.expect("Server error.");
}

// Production-grade logging configuration
fn init_logging() -> Result<(), Box<dyn std::error::Error>> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer};

    let log_level = std::env::var("RUST_LOG").unwrap_or_else(|_| {
        if cfg!(debug_assertions) {
            "debug,derm_assistant=trace,sqlx=info,reqwest=info,hyper=info,tower=info".to_string()
        } else {
            "info,derm_assistant=info,sqlx=warn,reqwest=warn,hyper=warn,tower=warn".to_string()
        }
    });

    let env_filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&log_level))?;

    // JSON logging for production (easier for log aggregation), human-readable
    // output otherwise
    let fmt_layer = if std::env::var("LOG_FORMAT").as_deref() == Ok("json") {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_target(true)
            .with_thread_ids(true)
            .with_thread_names(true)
            .boxed()
    } else {
        fmt::layer()
            .with_target(true)
            .with_thread_ids(false)
            .with_thread_names(false)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer)
        .init();

    tracing::info!("Dermatology assistant starting up...");
    tracing::info!("Version: {}", env!("CARGO_PKG_VERSION"));
    tracing::info!(
        "Build mode: {}",
        if cfg!(debug_assertions) { "development" } else { "production" }
    );
    tracing::info!("Log level: {}", log_level);

    let db_configured = std::env::var("DATABASE_URL").is_ok();
    let classifier_configured = std::env::var("CLASSIFIER_API_URL").is_ok();
    let search_configured = std::env::var("SEARCH_SERVICE_ENDPOINT").is_ok();
    let chat_configured = std::env::var("CHAT_MODEL_ENDPOINT").is_ok();

    tracing::info!(
        "Configuration - Database: {}, Classifier: {}, Search: {}, Chat model: {}",
        if db_configured { "ok" } else { "missing" },
        if classifier_configured { "ok" } else { "missing" },
        if search_configured { "ok" } else { "missing" },
        if chat_configured { "ok" } else { "missing" }
    );

    Ok(())
}

// API Status endpoint
async fn api_status(
    Extension(state): Extension<Arc<AppState>>,
) -> axum::response::Json<serde_json::Value> {
    use serde_json::json;

    let db_status = match sqlx::query("SELECT 1").fetch_one(&state.db_pool).await {
        Ok(_) => "healthy",
        Err(_) => "unhealthy",
    };

    let classifier_status = if state.classifier_client.is_some() {
        "configured"
    } else {
        "not_configured"
    };
    let search_status = if state.search_client.is_some() {
        "configured"
    } else {
        "not_configured"
    };
    let chat_status = if state.chat_client.is_some() {
        "configured"
    } else {
        "not_configured"
    };

    axum::response::Json(json!({
        "status": "operational",
        "version": env!("CARGO_PKG_VERSION"),
        "services": {
            "database": db_status,
            "skin_classifier": classifier_status,
            "knowledge_search": search_status,
            "chat_model": chat_status
        },
        "endpoints": {
            "status": "/api/status",
            "auth": "/api/auth/*",
            "assistant": "/api/medical-assistant",
            "chat_history": "/api/chat/history/:session_id",
            "dermatologists": "/api/dermatologists"
        }
    }))
}
