//! Vera gateway: HTTP + WebSocket front door for the PAD education chat.
//! Config-driven via `CoreConfig` (`config/gateway.toml`, `VERA__*`, `.env`).

mod error;
mod extract;
mod handlers;
mod state;

use std::net::SocketAddr;
use std::time::Instant;

use axum::extract::Request;
use axum::http::{HeaderValue, Method};
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::services::ServeDir;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vera_core::{CoreConfig, Database, IdentityStore};

use crate::state::AppState;

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        eprintln!("[vera-gateway] .env not loaded: {} (using system environment)", e);
    }
    if std::env::var("SECRET_KEY").is_err() && std::env::var("VERA__AUTH__SECRET_KEY").is_err() {
        eprintln!("[vera-gateway] Hint: set SECRET_KEY (or VERA__AUTH__SECRET_KEY) in .env; the gateway will not start without it.");
    }

    let _log_guard = init_tracing();

    let config = match CoreConfig::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Failed to load config: {}", e);
            std::process::exit(1);
        }
    };

    let args: Vec<String> = std::env::args().collect();
    if args.iter().any(|a| a == "--verify") {
        match run_verify(&config) {
            Ok(()) => std::process::exit(0),
            Err(e) => {
                eprintln!("PRE-FLIGHT FAILED: {}", e);
                std::process::exit(1);
            }
        }
    }
    if args.iter().any(|a| a == "--seed") {
        match run_seed(&config) {
            Ok(()) => std::process::exit(0),
            Err(e) => {
                eprintln!("SEED FAILED: {}", e);
                std::process::exit(1);
            }
        }
    }

    if let Err(e) = run(config).await {
        tracing::error!(target: "vera::gateway", error = %e, "Gateway stopped");
        std::process::exit(1);
    }
}

/// Console logging always; a daily rolling file as well when `VERA_LOG_DIR` is set.
fn init_tracing() -> Option<tracing_appender::non_blocking::WorkerGuard> {
    let filter = tracing_subscriber::EnvFilter::new(std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()));
    let (file_layer, guard) = match std::env::var("VERA_LOG_DIR").ok().filter(|d| !d.trim().is_empty()) {
        Some(dir) => {
            let appender = tracing_appender::rolling::daily(dir, "vera-gateway.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            (
                Some(tracing_subscriber::fmt::layer().with_ansi(false).with_writer(writer)),
                Some(guard),
            )
        }
        None => (None, None),
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .with(file_layer)
        .init();
    guard
}

/// Pre-flight: config is valid, the database opens, collaborators build, the port is free.
fn run_verify(config: &CoreConfig) -> Result<(), String> {
    print!("Checking config... ");
    config.validate()?;
    println!("OK");

    print!("Opening database {}... ", config.server.database_path);
    AppState::build(config.clone())?;
    println!(
        "OK (engine {} {:?}, speech {})",
        config.engine.provider,
        config.engine.mode,
        if config.speech.enabled { "on" } else { "off" }
    );

    let port = config.server.port;
    print!("Checking port {}... ", port);
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    match std::net::TcpListener::bind(addr) {
        Ok(listener) => {
            drop(listener);
            println!("OK (available)");
        }
        Err(e) => return Err(format!("Port {} BLOCKED: {}", port, e)),
    }

    println!("\nAll checks passed. Ready to start gateway.");
    Ok(())
}

/// Creates the RID001..RID010 test identities; existing ones are left alone.
fn run_seed(config: &CoreConfig) -> Result<(), String> {
    let db = Database::open(&config.server.database_path).map_err(|e| e.to_string())?;
    let (created, skipped) = IdentityStore::new(db).seed_test_ids().map_err(|e| e.to_string())?;
    println!("Seeded test research IDs: {} created, {} already present", created, skipped);
    Ok(())
}

async fn run(config: CoreConfig) -> Result<(), String> {
    config.validate()?;
    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port)
        .parse()
        .map_err(|e| format!("invalid listen address: {}", e))?;
    let state = AppState::build(config)?;
    tracing::info!(
        target: "vera::gateway",
        app = %state.config.server.app_name,
        engine = %state.config.engine.provider,
        mode = ?state.config.engine.mode,
        "Starting gateway on {}",
        addr
    );

    let app = build_app(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("cannot bind {}: {}", addr, e))?;
    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .await
        .map_err(|e| e.to_string())
}

fn build_app(state: AppState) -> Router {
    let origins: Vec<HeaderValue> = state
        .config
        .server
        .cors_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o.trim()).ok())
        .collect();
    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE, Method::OPTIONS])
        .allow_headers(Any);

    let api = Router::new()
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/disclaimer", post(handlers::auth::acknowledge_disclaimer))
        .route("/chat/message", post(handlers::chat::send_message))
        .route("/chat/history", post(handlers::chat::history))
        .route("/chat/conversations", get(handlers::chat::recent_conversations))
        .route("/chat/conversations/new", post(handlers::chat::new_conversation))
        .route("/chat/save-message", post(handlers::chat::save_message))
        .route("/chat/ws/chat", get(handlers::ws::ws_chat))
        .route(
            "/admin/research-ids",
            get(handlers::admin::list_research_ids).post(handlers::admin::create_research_id),
        )
        .route(
            "/admin/research-ids/:research_id",
            get(handlers::admin::get_research_id)
                .patch(handlers::admin::update_research_id)
                .delete(handlers::admin::deactivate_research_id),
        )
        .route("/admin/stats", get(handlers::admin::stats))
        .route("/health", get(handlers::health));

    let audio_dir = state.config.server.audio_dir.clone();
    Router::new()
        .route("/", get(handlers::root))
        .route("/health", get(handlers::health))
        .nest("/api/v1", api)
        .nest_service("/audio", ServeDir::new(audio_dir))
        .layer(middleware::from_fn(log_requests))
        .layer(cors)
        .with_state(state)
}

async fn log_requests(req: Request, next: Next) -> Response {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let started = Instant::now();
    let response = next.run(req).await;
    tracing::info!(
        target: "vera::http",
        method = %method,
        path = %path,
        status = response.status().as_u16(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Request handled"
    );
    response
}
