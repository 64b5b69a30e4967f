use service_core::error::AppError;
use service_core::middleware::rate_limit::create_ip_rate_limiter;
use service_core::observability::init_tracing;
use session_service::{
    build_router,
    config::SessionConfig,
    db,
    services::{metrics::init_metrics, JwtService, SessionService},
    store::{MemoryStore, PgStore, SessionStore},
    AppState,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    let config = SessionConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    )?;
    init_metrics()?;

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting session service"
    );

    let store: Arc<dyn SessionStore> = match &config.database {
        Some(database) => {
            let pool = db::create_pool(database).await.map_err(|e| {
                AppError::ServiceUnavailable(
                    anyhow::Error::new(e).context("Could not connect to PostgreSQL"),
                )
            })?;
            db::run_migrations(&pool).await.map_err(|e| {
                AppError::InternalError(anyhow::Error::new(e).context("Migrations failed"))
            })?;
            Arc::new(PgStore::new(pool))
        }
        None => {
            tracing::warn!("DATABASE_URL not set, keeping sessions in process memory");
            Arc::new(MemoryStore::new())
        }
    };

    let jwt = JwtService::new(&config.jwt)?;

    let login_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.login_attempts,
        config.rate_limit.login_window_seconds,
    );
    let register_rate_limiter = create_ip_rate_limiter(
        config.rate_limit.register_attempts,
        config.rate_limit.register_window_seconds,
    );

    let sessions = SessionService::new(
        store.clone(),
        jwt.clone(),
        config.session_settings(),
        service_span.clone(),
    );

    let addr = config.common.socket_addr();

    let state = AppState {
        config: Arc::new(config),
        store,
        jwt,
        sessions: Arc::new(sessions),
        login_rate_limiter,
        register_rate_limiter,
    };
    let app = build_router(state)?;

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    tracing::info!("Service shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received SIGINT, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown");
        },
    }
}
