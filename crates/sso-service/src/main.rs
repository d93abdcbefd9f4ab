use sso_service::cache::{KeyValueCache, RedisCache};
use sso_service::config::Config;
use sso_service::crypto::TokenCodec;
use sso_service::observability::metrics::init_metrics_recorder;
use sso_service::providers::ProviderRegistry;
use sso_service::repositories::{PgClientStore, PgUserStore};
use sso_service::routes::{self, AppState, Backends};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sso_service=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting SSO service");

    let config = Config::from_env().map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    info!(
        issuer = %config.issuer,
        realms = config.realm_groups.realms().count(),
        "Configuration loaded successfully"
    );

    let metrics_handle = init_metrics_recorder().map_err(|e| {
        error!("Failed to initialize metrics recorder: {}", e);
        e
    })?;

    let codec = TokenCodec::from_config(&config).map_err(|e| {
        error!("Failed to load signing key: {}", e);
        e
    })?;

    info!("Connecting to database...");
    let db_pool = sqlx::postgres::PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .map_err(|e| {
            error!("Failed to connect to database: {}", e);
            e
        })?;

    sqlx::migrate!("../../migrations")
        .run(&db_pool)
        .await
        .map_err(|e| {
            error!("Failed to run migrations: {}", e);
            e
        })?;

    info!("Database connection established");

    info!("Connecting to cache...");
    let cache = RedisCache::connect(&config.redis_url, config.cache_timeout)
        .await
        .map_err(|e| {
            error!("Failed to connect to cache: {}", e);
            e
        })?;
    let cache: Arc<dyn KeyValueCache> = Arc::new(cache);

    let providers = ProviderRegistry::from_config(&config).map_err(|e| {
        error!("Failed to configure identity providers: {}", e);
        e
    })?;

    let state = AppState::build(
        &config,
        codec,
        Backends {
            cache,
            users: Arc::new(PgUserStore::new(db_pool.clone())),
            clients: Arc::new(PgClientStore::new(db_pool)),
            providers,
        },
    )?;

    let app = routes::build_routes(Arc::new(state), metrics_handle);

    let addr: SocketAddr = config.bind_address.parse().map_err(|e| {
        error!("Invalid bind address: {}", e);
        e
    })?;

    info!("SSO service listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
