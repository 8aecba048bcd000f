//! API Server Entry Point
//!
//! Application entry point and server initialization.
//! Uses `anyhow` for startup errors, but application-level
//! errors should use `kernel::error::AppError`.

use axum::{
    Router, http,
    http::{HeaderName, Method, header},
};
use base64::Engine;
use base64::engine::general_purpose;
use loader::domain::repository::LoaderStore;
use loader::presentation::middleware::{NONCE_HEADER, SIGNATURE_HEADER, TIMESTAMP_HEADER};
use loader::{
    KeyAuthClient, KeyAuthConfig, LoaderAppState, LoaderConfig, MemoryLoaderRepository,
    PgLoaderRepository, loader_router, spawn_handshake_sweeper, spawn_nonce_sweeper,
    spawn_session_sweeper,
};
use platform::crypto::CryptoProvider;
use sqlx::postgres::PgPoolOptions;
use std::env;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Re-export unified error types for use in handlers
pub use kernel::error::{
    app_error::{AppError, AppResult},
    kind::ErrorKind,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "api=info,loader=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // RSA key generation is CPU-bound
    let crypto = Arc::new(tokio::task::spawn_blocking(CryptoProvider::generate).await??);
    tracing::info!("Server keypair generated");

    let config = loader_config()?;

    let authority = Arc::new(KeyAuthClient::new(KeyAuthConfig {
        api_url: env::var("KEYAUTH_API_URL").unwrap_or_else(|_| KeyAuthConfig::default().api_url),
        owner_id: env::var("KEYAUTH_OWNER_ID").unwrap_or_default(),
        app_name: env::var("KEYAUTH_APP_NAME").unwrap_or_default(),
        ..KeyAuthConfig::default()
    })?);

    // CORS configuration
    let frontend_origins = env::var("FRONTEND_ORIGINS")
        .unwrap_or_else(|_| "http://localhost:40922,http://127.0.0.1:40922".to_string());

    let allowed_origins: Vec<http::HeaderValue> = frontend_origins
        .split(',')
        .filter_map(|origin| origin.trim().parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(allowed_origins)
        .allow_methods(AllowMethods::list([Method::POST, Method::OPTIONS]))
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::AUTHORIZATION,
            header::ACCEPT,
            HeaderName::from_static(NONCE_HEADER),
            HeaderName::from_static(TIMESTAMP_HEADER),
            HeaderName::from_static(SIGNATURE_HEADER),
        ]));

    match env::var("LOADER_STORE").as_deref() {
        Ok("memory") => {
            tracing::warn!("Using in-memory loader store; state is lost on restart");
            serve(Arc::new(MemoryLoaderRepository::new()), authority, crypto, config, cors).await
        }
        _ => {
            let database_url =
                env::var("DATABASE_URL").expect("DATABASE_URL must be set in environment");

            let pool = PgPoolOptions::new()
                .max_connections(5)
                .connect(&database_url)
                .await?;

            tracing::info!("Connected to database");

            sqlx::migrate!("../../../database/migrations")
                .run(&pool)
                .await?;

            tracing::info!("Migrations completed");

            serve(Arc::new(PgLoaderRepository::new(pool)), authority, crypto, config, cors).await
        }
    }
}

fn loader_config() -> anyhow::Result<LoaderConfig> {
    let trusted_proxies = trusted_proxies()?;
    if !trusted_proxies.is_empty() {
        tracing::info!(?trusted_proxies, "X-Forwarded-For honoured from trusted proxies");
    }

    if cfg!(debug_assertions) {
        return Ok(LoaderConfig {
            trusted_proxies,
            ..LoaderConfig::development()
        });
    }

    // In production, load secrets from environment
    let secret_b64 =
        env::var("LOADER_SESSION_SECRET").expect("LOADER_SESSION_SECRET must be set in production");
    let secret_bytes = Engine::decode(&general_purpose::STANDARD, &secret_b64)?;
    let session_secret: [u8; 32] = secret_bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("LOADER_SESSION_SECRET must decode to 32 bytes"))?;

    let request_secret =
        env::var("LOADER_REQUEST_SECRET").expect("LOADER_REQUEST_SECRET must be set in production");
    anyhow::ensure!(
        !request_secret.is_empty(),
        "LOADER_REQUEST_SECRET must not be empty"
    );

    Ok(LoaderConfig {
        session_secret,
        request_secret: request_secret.into_bytes(),
        trusted_proxies,
        ..LoaderConfig::default()
    })
}

/// Comma-separated proxy addresses from LOADER_TRUSTED_PROXIES
fn trusted_proxies() -> anyhow::Result<Vec<IpAddr>> {
    let Ok(raw) = env::var("LOADER_TRUSTED_PROXIES") else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            entry
                .parse::<IpAddr>()
                .map_err(|e| anyhow::anyhow!("LOADER_TRUSTED_PROXIES entry {entry:?}: {e}"))
        })
        .collect()
}

async fn serve<R>(
    repo: Arc<R>,
    authority: Arc<KeyAuthClient>,
    crypto: Arc<CryptoProvider>,
    config: LoaderConfig,
    cors: CorsLayer,
) -> anyhow::Result<()>
where
    R: LoaderStore,
{
    let handshake_every = config.handshake_sweep_interval;
    let session_every = config.session_sweep_interval;
    let nonce_every = config.nonce_sweep_interval;

    let state = LoaderAppState::new(repo, authority, crypto, config);

    // Expired sessions and nonces are purged off the request path
    spawn_handshake_sweeper(state.handshake.clone(), handshake_every);
    spawn_session_sweeper(state.sessions.clone(), session_every);
    spawn_nonce_sweeper(state.replay.clone(), nonce_every);

    // Build router
    let app = Router::new()
        .nest("/api/loader", loader_router(state))
        .layer(TraceLayer::new_for_http())
        .layer(cors);

    // Start server
    let addr = SocketAddr::from(([0, 0, 0, 0], 31113));
    tracing::info!("Listening on {}", addr);

    let listener = TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
