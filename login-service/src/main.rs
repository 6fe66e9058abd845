use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use login_service::{
    build_router,
    config::{AuthConfig, SessionStoreConfig},
    services::{
        metrics::init_metrics, AuthSessionStore, ConfiguredSignupPolicy, Database, DefaultVerifier,
        HandshakeDeps, HandshakeService, HandshakeSettings, HttpAvatarService, ProviderRegistry,
        RedisAuthSessionStore,
    },
    AppState,
};
use service_core::error::AppError;
use service_core::observability::init_tracing;
use service_core::tasks::BackgroundTasks;
use tokio::signal;
use tokio_util::sync::CancellationToken;

const PURGE_INTERVAL: Duration = Duration::from_secs(600);

#[tokio::main]
async fn main() -> Result<(), AppError> {
    dotenvy::dotenv().ok();

    // Load configuration - fail fast if invalid
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    init_metrics()?;

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting login service"
    );

    let db = Database::new(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await?;
    db.run_migrations().await?;
    tracing::info!("Database initialized successfully");

    let sessions: Arc<dyn AuthSessionStore> = match &config.session_store {
        SessionStoreConfig::Postgres => Arc::new(db.clone()),
        SessionStoreConfig::Redis { url } => Arc::new(RedisAuthSessionStore::new(url).await?),
    };
    tracing::info!(store = config.session_store.name(), "Auth session store initialized");

    let http = reqwest::Client::builder()
        .timeout(Duration::from_secs(config.handshake.http_client_timeout_seconds))
        .user_agent(concat!("login-service/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Failed to build HTTP client: {}", e)))?;

    let registry = ProviderRegistry::from_credentials(&config.oauth, &config.base_url, http);
    tracing::info!(providers = ?registry.configured_ids(), "Identity providers registered");

    let tasks = BackgroundTasks::new(Duration::from_secs(
        config.handshake.avatar_fetch_timeout_seconds,
    ));

    let db_arc = Arc::new(db.clone());
    let avatars = HttpAvatarService::new(
        Duration::from_secs(config.handshake.http_client_timeout_seconds),
        db_arc.clone(),
    )
    .map_err(|e| AppError::ConfigError(anyhow::anyhow!("Failed to build avatar HTTP client: {}", e)))?;
    let handshake = HandshakeService::new(HandshakeDeps {
        tokens: db_arc.clone(),
        sessions: sessions.clone(),
        domains: db_arc.clone(),
        directory: db_arc.clone(),
        registry,
        signup: Arc::new(ConfiguredSignupPolicy {
            instance_federated_signup: config.handshake.federated_signup_enabled,
        }),
        verifier: Arc::new(DefaultVerifier),
        avatars: Arc::new(avatars),
        tasks: tasks.clone(),
        settings: HandshakeSettings {
            auth_session_ttl: chrono::Duration::minutes(config.handshake.auth_session_ttl_minutes),
            login_token_ttl: chrono::Duration::minutes(config.handshake.login_token_ttl_minutes),
            use_gravatar: config.handshake.use_gravatar,
            log_full_ips: config.handshake.log_full_ips,
            secure_cookies: config.secure_cookies(),
        },
    });

    let shutdown = CancellationToken::new();
    let purge = tokio::spawn(purge_expired_loop(db.clone(), shutdown.clone()));

    let state = AppState {
        config: config.clone(),
        handshake,
        sessions,
        db: Some(db),
    };
    let app = build_router(state);

    let addr = config.common.listen_addr();

    let service_span = tracing::info_span!(
        "service",
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
    );
    let _guard = service_span.enter();

    tracing::info!(address = %addr, "Listening");

    let listener = tokio::net::TcpListener::bind(addr).await?;

    service_core::axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    shutdown.cancel();
    tasks.shutdown();
    if let Err(e) = purge.await {
        tracing::warn!(error = %e, "Purge task ended abnormally");
    }

    tracing::info!("Service shutdown complete");
    Ok(())
}

/// Expired auth sessions and tokens are never read again; delete them
/// periodically so the tables stay small.
async fn purge_expired_loop(db: Database, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(PURGE_INTERVAL);
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = interval.tick() => match db.purge_expired().await {
                Ok((sessions, tokens)) => {
                    tracing::debug!(sessions, tokens, "Purged expired auth sessions and tokens");
                }
                Err(e) => tracing::warn!(error = %e, "Failed to purge expired records"),
            },
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
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
