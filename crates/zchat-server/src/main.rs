mod config;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::http::{HeaderValue, Method, header};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use zchat_api::auth::AppStateInner;
use zchat_crypto::Encryptor;
use zchat_gateway::Gateway;
use zchat_gateway::handshake::{JwtVerifier, OriginPolicy, TokenVerifier};
use zchat_gateway::hub::Hub;
use zchat_service::{ChatServices, MessageConfig};

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "zchat_server=debug,zchat_gateway=debug,zchat_service=debug,\
                 zchat_api=debug,zchat_db=info,tower_http=info"
                    .into()
            }),
        )
        .init();

    let config = Config::from_env()?;

    // Init database
    let db = Arc::new(zchat_db::Database::open(&config.db_path)?);

    let encryptor = Encryptor::new(&config.encryption_key, &config.legacy_encryption_keys)?;
    if encryptor.legacy_key_count() > 0 || encryptor.fernet_key_count() > 0 {
        info!(
            "Message decryption falls back to {} legacy key(s) and {} Fernet key(s)",
            encryptor.legacy_key_count(),
            encryptor.fernet_key_count()
        );
    }

    let services = ChatServices::from_database(
        db.clone(),
        Arc::new(encryptor),
        MessageConfig {
            retention_limit: config.max_messages_per_conversation,
            max_page_size: config.max_page_size,
        },
    );

    // Shared state
    let hub = Hub::new();
    let verifier: Arc<dyn TokenVerifier> = Arc::new(JwtVerifier::new(&config.jwt_secret, db.clone()));
    let origins = OriginPolicy::new(&config.allowed_origins);
    if origins.origins().is_empty() {
        warn!("ZCHAT_ALLOWED_ORIGINS is empty: every WebSocket upgrade will be rejected");
    }

    let gateway = Gateway::new(
        hub.clone(),
        services.clone(),
        db.clone(),
        verifier.clone(),
        origins.clone(),
    );

    let api_state = Arc::new(AppStateInner {
        db,
        services,
        hub,
        presence: gateway.presence().clone(),
        verifier,
        jwt_secret: config.jwt_secret.clone(),
        token_ttl: config.token_ttl,
    });

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(
            origins
                .origins()
                .iter()
                .filter_map(|o| o.parse::<HeaderValue>().ok()),
        ))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::AUTHORIZATION, header::CONTENT_TYPE]);

    // Routes
    let app = Router::new()
        .merge(zchat_api::router(api_state))
        .merge(gateway.routes())
        .layer(cors)
        .layer(TraceLayer::new_for_http());

    let addr: SocketAddr = format!("{}:{}", config.host, config.port).parse()?;
    info!("zChat server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
