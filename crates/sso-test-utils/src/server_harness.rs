//! Test server harness for E2E testing
//!
//! Provides `TestSsoServer`, which runs the real router on a random port
//! against in-memory stores and an in-memory cache.

use crate::crypto_fixtures::test_signing_key;
use metrics_exporter_prometheus::PrometheusBuilder;
use sso_service::cache::{InMemoryCache, KeyValueCache};
use sso_service::config::Config;
use sso_service::crypto::{self, TokenCodec};
use sso_service::models::ClientApplication;
use sso_service::observability::metrics::init_metrics_recorder;
use sso_service::providers::ProviderRegistry;
use sso_service::repositories::{InMemoryClientStore, InMemoryUserStore};
use sso_service::routes::{self, AppState, Backends};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Realm groups every test server starts with.
pub const TEST_REALM_GROUPS: &str = "school:edu,admission;staff:hr";

/// Seed of the signing key every test server starts with.
pub const TEST_SIGNING_KEY_SEED: u8 = 1;

/// Test harness for spawning the SSO server in E2E tests
///
/// # Example
/// ```rust,ignore
/// #[tokio::test]
/// async fn test_client_credentials_e2e() -> Result<()> {
///     let server = TestSsoServer::spawn().await?;
///     server.register_client("edu", "c1", "s1", &["api:read"]).await?;
///
///     let response = reqwest::Client::new()
///         .post(format!("{}/edu/oauth/token", server.url()))
///         .json(&token_request)
///         .send()
///         .await?;
///
///     assert_eq!(response.status(), 200);
///     Ok(())
/// }
/// ```
pub struct TestSsoServer {
    addr: SocketAddr,
    config: Config,
    cache: Arc<InMemoryCache>,
    users: Arc<InMemoryUserStore>,
    clients: Arc<InMemoryClientStore>,
    _handle: JoinHandle<()>,
}

impl TestSsoServer {
    /// Spawn a server with the default test configuration and no identity
    /// providers.
    pub async fn spawn() -> Result<Self, anyhow::Error> {
        Self::spawn_with(&[]).await
    }

    /// Spawn a server with extra configuration variables layered over the
    /// defaults, e.g. `("YANDEX_OAUTH_URL", mock.uri())` to point a provider
    /// at a mock server.
    pub async fn spawn_with(overrides: &[(&str, &str)]) -> Result<Self, anyhow::Error> {
        let signing_key = test_signing_key(TEST_SIGNING_KEY_SEED)?;

        let mut vars = HashMap::from([
            (
                "DATABASE_URL".to_string(),
                "postgresql://unused/sso_test".to_string(),
            ),
            ("REDIS_URL".to_string(), "redis://unused".to_string()),
            ("BIND_ADDRESS".to_string(), "127.0.0.1:0".to_string()),
            ("SSO_SIGNING_KEY".to_string(), signing_key.pkcs8_base64()),
            ("SSO_REALM_GROUPS".to_string(), TEST_REALM_GROUPS.to_string()),
            // Minimum allowed cost keeps the suite fast.
            ("SSO_BCRYPT_COST".to_string(), "10".to_string()),
            ("SSO_COOKIE_SECURE".to_string(), "false".to_string()),
            ("SSO_CACHE_RETRY_BACKOFF_MS".to_string(), "5".to_string()),
            ("SSO_PROVIDER_TIMEOUT_SECONDS".to_string(), "2".to_string()),
        ]);
        for (name, value) in overrides {
            vars.insert((*name).to_string(), (*value).to_string());
        }

        let config = Config::from_vars(&vars)?;
        let codec = TokenCodec::from_config(&config)?;
        let providers = ProviderRegistry::from_config(&config)?;

        let cache = Arc::new(InMemoryCache::new());
        let users = Arc::new(InMemoryUserStore::new());
        let clients = Arc::new(InMemoryClientStore::new());

        let shared_cache: Arc<dyn KeyValueCache> = cache.clone();
        let state = AppState::build(
            &config,
            codec,
            Backends {
                cache: shared_cache,
                users: users.clone(),
                clients: clients.clone(),
                providers,
            },
        )?;

        // Only the first server in a test process can install the global
        // recorder; later ones get a standalone handle.
        let metrics_handle = match init_metrics_recorder() {
            Ok(handle) => handle,
            Err(_) => PrometheusBuilder::new().build_recorder().handle(),
        };

        let app = routes::build_routes(Arc::new(state), metrics_handle);

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .map_err(|e| anyhow::anyhow!("Failed to bind test server: {}", e))?;

        let addr = listener
            .local_addr()
            .map_err(|e| anyhow::anyhow!("Failed to get local address: {}", e))?;

        let handle = tokio::spawn(async move {
            let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
            if let Err(e) = axum::serve(listener, make_service).await {
                eprintln!("Test server error: {}", e);
            }
        });

        Ok(Self {
            addr,
            config,
            cache,
            users,
            clients,
            _handle: handle,
        })
    }

    /// Get the base URL of the test server
    pub fn url(&self) -> String {
        format!("http://{}", self.addr)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The cache behind every session, state and revocation. Use
    /// `inject_failures` to simulate an outage.
    pub fn cache(&self) -> &Arc<InMemoryCache> {
        &self.cache
    }

    pub fn users(&self) -> &Arc<InMemoryUserStore> {
        &self.users
    }

    /// A codec holding the server's signing key, for minting tokens the
    /// public endpoints would never issue (expired, odd claims).
    pub fn codec(&self) -> Result<TokenCodec, anyhow::Error> {
        Ok(TokenCodec::from_config(&self.config)?)
    }

    /// Register an active machine client.
    ///
    /// # Example
    /// ```rust,ignore
    /// server.register_client("edu", "c1", "s1", &["api:read", "api:write"]).await?;
    /// ```
    pub async fn register_client(
        &self,
        realm: &str,
        client_id: &str,
        client_secret: &str,
        scopes: &[&str],
    ) -> Result<(), anyhow::Error> {
        let client_secret_hash = crypto::hash_secret(client_secret, self.config.bcrypt_cost)?;

        self.clients
            .insert(ClientApplication {
                client_id: client_id.to_string(),
                realm: realm.to_string(),
                client_secret_hash,
                scopes: scopes.iter().map(|s| s.to_string()).collect(),
                is_active: true,
            })
            .await;
        Ok(())
    }

    /// Register an active user with a local password. Returns the user id.
    pub async fn register_user(
        &self,
        realm: &str,
        email: &str,
        password: &str,
    ) -> Result<Uuid, anyhow::Error> {
        let password_hash = crypto::hash_secret(password, self.config.bcrypt_cost)?;
        let user = self
            .users
            .insert_user(realm, &email.to_lowercase(), Some(password_hash))
            .await;
        Ok(user.user_id)
    }
}

impl Drop for TestSsoServer {
    fn drop(&mut self) {
        self._handle.abort();
    }
}
