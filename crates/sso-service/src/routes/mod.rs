//! HTTP routes for the SSO service.
//!
//! Defines the Axum router and application state.

use crate::cache::KeyValueCache;
use crate::config::{Config, RealmGroups};
use crate::crypto::{self, TokenCodec};
use crate::errors::SsoError;
use crate::handlers::{self, session_cookie::SessionCookie};
use crate::middleware::http_metrics_middleware;
use crate::providers::ProviderRegistry;
use crate::repositories::{
    ClientStore, FederationStateStore, RevocationList, SessionStore, UserStore,
};
use crate::services::federation::FederationDeps;
use crate::services::user_auth::UserAuthDeps;
use crate::services::{
    ClientCredentialsGrant, FederationFlow, TokenIssuer, TokenLifetimes, TokenValidator,
    UserAuthFlow,
};
use axum::{
    middleware,
    routing::{get, post},
    Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use std::sync::Arc;
use std::time::Duration;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

/// Storage and upstream dependencies the engine runs against.
pub struct Backends {
    /// Shared cache for sessions, federation states and revocations.
    pub cache: Arc<dyn KeyValueCache>,
    pub users: Arc<dyn UserStore>,
    pub clients: Arc<dyn ClientStore>,
    pub providers: ProviderRegistry,
}

/// Application state shared across all handlers.
///
/// Built once at startup; the signing key and configuration inside are
/// immutable for the life of the process.
#[derive(Clone)]
pub struct AppState {
    pub realm_groups: Arc<RealmGroups>,
    pub client_grant: Arc<ClientCredentialsGrant>,
    pub user_auth: Arc<UserAuthFlow>,
    pub federation: Arc<FederationFlow>,
    pub validator: Arc<TokenValidator>,
    pub session_cookie: SessionCookie,
}

impl AppState {
    /// Wire the services together.
    ///
    /// # Errors
    ///
    /// Fails only if the timing-equalization hash cannot be computed.
    pub fn build(config: &Config, codec: TokenCodec, backends: Backends) -> Result<Self, SsoError> {
        let codec = Arc::new(codec);
        let realm_groups = Arc::new(config.realm_groups.clone());
        let dummy_hash: Arc<str> = Arc::from(crypto::dummy_hash(config.bcrypt_cost)?);
        let lifetimes = TokenLifetimes::from_config(config);

        let sessions = SessionStore::new(backends.cache.clone(), config.cache_retry_backoff);
        let revocations = RevocationList::new(backends.cache.clone(), config.cache_retry_backoff)
            .with_leeway(codec.clock_skew_seconds());
        let states = FederationStateStore::new(backends.cache, config.cache_retry_backoff);

        let issuer = Arc::new(TokenIssuer::new(
            codec.clone(),
            sessions.clone(),
            lifetimes,
        ));
        let validator = Arc::new(TokenValidator::new(
            codec,
            sessions.clone(),
            revocations.clone(),
        ));

        let client_grant = Arc::new(ClientCredentialsGrant::new(
            backends.clients,
            issuer.clone(),
            realm_groups.clone(),
            dummy_hash.clone(),
        ));

        let user_auth = Arc::new(UserAuthFlow::new(UserAuthDeps {
            users: backends.users.clone(),
            issuer: issuer.clone(),
            validator: validator.clone(),
            sessions,
            revocations,
            realm_groups: realm_groups.clone(),
            dummy_hash,
            user_scope: config.default_user_scope.clone(),
            bcrypt_cost: config.bcrypt_cost,
        }));

        let federation = Arc::new(FederationFlow::new(FederationDeps {
            providers: Arc::new(backends.providers),
            states,
            users: backends.users,
            issuer,
            realm_groups: realm_groups.clone(),
            state_ttl_seconds: config.federation_state_ttl_seconds,
            user_scope: config.default_user_scope.clone(),
        }));

        Ok(Self {
            realm_groups,
            client_grant,
            user_auth,
            federation,
            validator,
            session_cookie: SessionCookie::new(lifetimes.session, config.cookie_secure),
        })
    }
}

/// Build the application routes.
///
/// Creates an Axum router with:
/// - `/health` - liveness probe, unversioned
/// - `/metrics` - Prometheus exposition
/// - `/{realm}/oauth/*` - client-credentials grant and introspection
/// - `/{realm}/registration` - password self-registration
/// - `/{realm}/auth/*` - login, refresh, realm switch, logout
/// - `/{realm}/{provider}/*` - federated login
/// - TraceLayer for request logging
/// - HTTP metrics middleware
/// - 30 second request timeout
pub fn build_routes(state: Arc<AppState>, metrics_handle: PrometheusHandle) -> Router {
    let public_routes = Router::new()
        .route("/health", get(handlers::health_check))
        .route("/:realm/oauth/token", post(handlers::handle_token))
        .route("/:realm/oauth/introspect", post(handlers::handle_introspect))
        .route("/:realm/registration", post(handlers::handle_sign_up))
        .route("/:realm/auth/login", post(handlers::handle_login))
        .route("/:realm/auth/refresh", post(handlers::handle_refresh))
        .route("/:realm/auth/switch-realm", post(handlers::handle_switch_realm))
        .route("/:realm/auth/logout", post(handlers::handle_logout))
        .route("/:realm/:provider/link", get(handlers::handle_link))
        .route(
            "/:realm/:provider/registration",
            post(handlers::handle_registration),
        )
        .route(
            "/:realm/:provider/authentication",
            post(handlers::handle_authentication),
        )
        .with_state(state);

    let metrics_routes = Router::new()
        .route("/metrics", get(handlers::metrics_handler))
        .with_state(metrics_handle);

    // Layer order (bottom-to-top execution):
    // 1. TimeoutLayer (innermost)
    // 2. TraceLayer
    // 3. http_metrics_middleware (outermost, sees every response)
    public_routes
        .merge(metrics_routes)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)))
        .layer(middleware::from_fn(http_metrics_middleware))
}
