//! Federated login through external identity providers.
//!
//! ```text
//! issued --redeem--> redeemed --exchange ok--> completed
//!    |                   |
//!    +--ttl--> expired   +--any failure--> failed
//! ```
//!
//! The state record is taken (read and deleted) before anything else
//! happens, so a `state` can be redeemed exactly once whatever the outcome.

use crate::config::RealmGroups;
use crate::crypto::{self, PkcePair};
use crate::errors::SsoError;
use crate::models::{FederationState, IssuedTokens, LinkResponse, ProviderKind};
use crate::observability::metrics::record_federation_completion;
use crate::providers::{missing_device_id, ProviderRegistry};
use crate::repositories::{FederationStateStore, UserStore};
use crate::services::token_issuer::TokenIssuer;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// What a completed handshake is allowed to do when no user is linked to
/// the external identity yet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionMode {
    /// Create and link a new user.
    Registration,
    /// Sign in an already linked user only.
    Authentication,
}

impl CompletionMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CompletionMode::Registration => "registration",
            CompletionMode::Authentication => "authentication",
        }
    }
}

pub struct FederationFlow {
    providers: Arc<ProviderRegistry>,
    states: FederationStateStore,
    users: Arc<dyn UserStore>,
    issuer: Arc<TokenIssuer>,
    realm_groups: Arc<RealmGroups>,
    state_ttl_seconds: i64,
    user_scope: String,
}

/// Dependencies of [`FederationFlow`].
pub struct FederationDeps {
    pub providers: Arc<ProviderRegistry>,
    pub states: FederationStateStore,
    pub users: Arc<dyn UserStore>,
    pub issuer: Arc<TokenIssuer>,
    pub realm_groups: Arc<RealmGroups>,
    pub state_ttl_seconds: i64,
    pub user_scope: String,
}

/// Tokens from a completed handshake plus where the client should go next.
#[derive(Debug)]
pub struct FederationOutcome {
    pub tokens: IssuedTokens,
    pub redirect_target: Option<String>,
}

impl FederationFlow {
    pub fn new(deps: FederationDeps) -> Self {
        Self {
            providers: deps.providers,
            states: deps.states,
            users: deps.users,
            issuer: deps.issuer,
            realm_groups: deps.realm_groups,
            state_ttl_seconds: deps.state_ttl_seconds,
            user_scope: deps.user_scope,
        }
    }

    /// Begin a handshake: store a fresh state with a PKCE verifier and
    /// return the provider's authorize URL.
    #[instrument(skip_all, name = "sso.federation.start", fields(realm = %realm, provider = provider.as_str()))]
    pub async fn start_link(
        &self,
        realm: &str,
        provider: ProviderKind,
        redirect_target: Option<String>,
    ) -> Result<LinkResponse, SsoError> {
        if !self.realm_groups.contains(realm) {
            return Err(SsoError::NotFound("Realm".to_string()));
        }
        let client = self.providers.get(provider)?;

        let state = crypto::generate_opaque_token()?;
        let pkce = PkcePair::generate()?;
        let now = Utc::now().timestamp();

        let record = FederationState {
            realm: realm.to_string(),
            provider,
            code_verifier: pkce.verifier,
            redirect_target,
            created_at: now,
            expires_at: now + self.state_ttl_seconds,
        };
        self.states
            .issue(&state, &record, self.state_ttl_seconds)
            .await?;

        let authorization_url = client.authorization_url(&state, &pkce.challenge)?;

        debug!(target: "sso.federation", "Federation state issued");
        Ok(LinkResponse {
            authorization_url,
            state,
        })
    }

    /// Finish a handshake and sign the user in.
    #[instrument(
        skip_all,
        name = "sso.federation.complete",
        fields(realm = %realm, provider = provider.as_str(), mode = mode.as_str())
    )]
    pub async fn complete_link(
        &self,
        state: &str,
        code: &str,
        realm: &str,
        provider: ProviderKind,
        device_id: Option<&str>,
        mode: CompletionMode,
    ) -> Result<FederationOutcome, SsoError> {
        let result = self
            .redeem_and_sign_in(state, code, realm, provider, device_id, mode)
            .await;

        let status = if result.is_ok() { "success" } else { "error" };
        record_federation_completion(provider.as_str(), mode.as_str(), status);
        result
    }

    async fn redeem_and_sign_in(
        &self,
        state: &str,
        code: &str,
        realm: &str,
        provider: ProviderKind,
        device_id: Option<&str>,
        mode: CompletionMode,
    ) -> Result<FederationOutcome, SsoError> {
        // Checked before the state is taken so a malformed request leaves
        // the handshake usable.
        if provider.requires_device_id() && !device_id.is_some_and(|d| !d.is_empty()) {
            return Err(missing_device_id());
        }

        let record = self
            .states
            .redeem(state)
            .await?
            .ok_or(SsoError::InvalidState)?;

        if record.expires_at <= Utc::now().timestamp() {
            return Err(SsoError::InvalidState);
        }
        if record.realm != realm || record.provider != provider {
            debug!(target: "sso.federation", "State presented to a different realm or provider");
            return Err(SsoError::InvalidState);
        }

        let group = self
            .realm_groups
            .group_of(realm)
            .ok_or_else(|| SsoError::NotFound("Realm".to_string()))?;
        let client = self.providers.get(provider)?;

        let identity = client
            .exchange_code(code, &record.code_verifier, device_id)
            .await?;

        let existing = self
            .users
            .find_by_identity(realm, provider, &identity.external_id)
            .await?;

        let user = match (existing, mode) {
            (Some(user), _) => user,
            (None, CompletionMode::Registration) => {
                let user = self.users.create_with_identity(realm, &identity).await?;
                info!(target: "sso.federation", user_id = %user.user_id, "User registered through provider");
                user
            }
            (None, CompletionMode::Authentication) => {
                return Err(SsoError::IdentityConflict(
                    "No account is linked to this identity".to_string(),
                ));
            }
        };

        if !user.is_active {
            return Err(SsoError::InvalidCredentials);
        }

        let tokens = self
            .issuer
            .issue_for_new_session(user.user_id, realm, group, &self.user_scope)
            .await?;

        Ok(FederationOutcome {
            tokens,
            redirect_target: record.redirect_target,
        })
    }
}
