//! # UN Translator Backend - Main Application Entry Point
//!
//! Live speech-translation relay. Browser clients stream microphone audio
//! over a WebSocket; each connection gets its own bidirectional stream to the
//! upstream speech engine, and translated speech plus transcripts are relayed
//! back as they are produced.
//!
//! ## Application Architecture:
//! - **config**: layered configuration (defaults, `config.toml`, environment)
//! - **state**: process-wide metrics and session admission control
//! - **translation**: the relay core, independent of the web framework
//! - **websocket**: actix actors that bridge client sockets to the core
//! - **health**, **handlers**: REST endpoints
//! - **middleware**: request metrics
//! - **error**: HTTP and session error types

mod config;
mod error;
mod handlers;
mod health;
mod middleware;
mod state;
mod translation;
mod websocket;

use actix_cors::Cors;
use actix_web::{web, App, HttpServer};
use anyhow::Result;
use config::AppConfig;
use state::AppState;
use tokio::signal::unix::{signal, SignalKind};
use tracing::{error, info};
use tracing_actix_web::TracingLogger;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// ## What this function does:
/// 1. **Loads configuration** from `.env`, `config.toml` and the environment
/// 2. **Sets up logging** with `tracing`
/// 3. **Creates shared application state** (metrics, session slots)
/// 4. **Configures the HTTP server** with middleware, REST and WebSocket routes
/// 5. **Handles graceful shutdown** on SIGINT/SIGTERM
#[actix_web::main]
async fn main() -> Result<()> {
    // A missing .env file is fine.
    dotenv::dotenv().ok();

    init_tracing()?;

    let config = AppConfig::load()?;
    config.validate()?;

    info!("Starting un-translator-backend v{}", env!("CARGO_PKG_VERSION"));
    info!(
        upstream = %config.upstream.endpoint,
        model = %config.upstream.model_id,
        region = %config.upstream.region,
        max_sessions = config.session.max_concurrent_sessions,
        "Configuration loaded"
    );

    let app_state = AppState::new(config.clone());
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);

    info!("Starting HTTP server on {}", bind_addr);

    let server = HttpServer::new(move || {
        let cors = Cors::default()
            .allow_any_origin()
            .allow_any_method()
            .allow_any_header()
            .max_age(3600);

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            // Middleware runs in reverse order of registration for responses.
            .wrap(cors)
            .wrap(middleware::MetricsMiddleware)
            .wrap(TracingLogger::default())
            .route("/", web::get().to(handlers::service_info))
            .route("/health", web::get().to(health::health_check))
            .route("/languages", web::get().to(handlers::list_languages))
            .service(
                web::scope("/api/v1")
                    .route("/health", web::get().to(health::health_check))
                    .route("/metrics", web::get().to(health::detailed_metrics)),
            )
            .route("/ws/translate", web::get().to(websocket::translate_websocket))
            .route("/ws/echo", web::get().to(websocket::echo_websocket))
            .default_service(web::to(handlers::not_found))
    })
    .bind(&bind_addr)?
    .run();

    let server_handle = server.handle();
    let server_task = tokio::spawn(server);

    tokio::select! {
        result = server_task => {
            match result {
                Ok(Err(e)) => error!("Server error: {}", e),
                Err(e) => error!("Server task error: {}", e),
                Ok(Ok(())) => {}
            }
        }
        signal = shutdown_signal() => {
            let name = signal?;
            info!("Received {}, stopping server...", name);
            server_handle.stop(true).await;
        }
    }

    info!("Server stopped gracefully");
    Ok(())
}

/// ## Environment Variables:
/// - `RUST_LOG`: filter directives, e.g. `un_translator_backend=trace`
/// - If not set, defaults to `un_translator_backend=debug,actix_web=info`
fn init_tracing() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "un_translator_backend=debug,actix_web=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init()?;

    Ok(())
}

/// Resolves with the name of the first shutdown signal received.
async fn shutdown_signal() -> Result<&'static str> {
    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    let name = tokio::select! {
        _ = sigterm.recv() => "SIGTERM",
        _ = sigint.recv() => "SIGINT",
    };
    Ok(name)
}
