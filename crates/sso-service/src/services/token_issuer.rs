//! Token issuance and refresh rotation.
//!
//! Every token gets a fresh `jti`. User logins open a session whose
//! `current_refresh_jti` names the only refresh token that may be used next;
//! rotation replaces it with a compare-and-swap so that two concurrent
//! refreshes of the same token cannot both succeed.

use crate::cache::CasOutcome;
use crate::config::Config;
use crate::crypto::{self, TokenCodec};
use crate::errors::SsoError;
use crate::models::{IssuedTokens, Session, TokenClaims, TokenType, CAUSE_REVOKED};
use crate::observability::metrics::record_refresh_replay;
use crate::repositories::{SessionStore, StoredSession};
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

/// Token lifetimes in seconds. Access < refresh <= session is checked when
/// the config loads.
#[derive(Debug, Clone, Copy)]
pub struct TokenLifetimes {
    pub access: i64,
    pub refresh: i64,
    pub session: i64,
    pub client: i64,
}

impl TokenLifetimes {
    pub fn from_config(config: &Config) -> Self {
        Self {
            access: config.access_token_ttl_seconds,
            refresh: config.refresh_token_ttl_seconds,
            session: config.session_ttl_seconds,
            client: config.client_token_ttl_seconds,
        }
    }
}

pub struct TokenIssuer {
    codec: Arc<TokenCodec>,
    sessions: SessionStore,
    lifetimes: TokenLifetimes,
}

/// Access/refresh pair minted for one session, not yet committed.
struct MintedPair {
    access_token: String,
    access_exp: i64,
    refresh_token: String,
    refresh_jti: String,
}

impl TokenIssuer {
    pub fn new(codec: Arc<TokenCodec>, sessions: SessionStore, lifetimes: TokenLifetimes) -> Self {
        Self {
            codec,
            sessions,
            lifetimes,
        }
    }

    pub fn lifetimes(&self) -> TokenLifetimes {
        self.lifetimes
    }

    /// Cache TTL of a session record. The codec accepts a refresh token
    /// until `exp + skew`, so the record has to last that long too.
    fn session_cache_ttl(&self) -> i64 {
        self.lifetimes
            .session
            .saturating_add(self.codec.clock_skew_seconds())
    }

    fn mint(
        &self,
        sub: &str,
        realm: &str,
        token_type: TokenType,
        scope: &str,
        ttl_seconds: i64,
        session_id: Option<&str>,
    ) -> Result<(String, TokenClaims), SsoError> {
        let now = Utc::now().timestamp();
        let claims = TokenClaims {
            sub: sub.to_string(),
            iss: self.codec.issuer().to_string(),
            realm: realm.to_string(),
            token_type,
            scope: scope.to_string(),
            iat: now,
            exp: now + ttl_seconds,
            jti: crypto::generate_jti(),
            session_id: session_id.map(str::to_string),
        };
        let token = self.codec.sign(&claims)?;
        Ok((token, claims))
    }

    fn mint_pair(
        &self,
        sub: &str,
        realm: &str,
        scope: &str,
        session_id: &str,
    ) -> Result<MintedPair, SsoError> {
        let (access_token, access) = self.mint(
            sub,
            realm,
            TokenType::Access,
            scope,
            self.lifetimes.access,
            None,
        )?;
        let (refresh_token, refresh) = self.mint(
            sub,
            realm,
            TokenType::Refresh,
            scope,
            self.lifetimes.refresh,
            Some(session_id),
        )?;

        Ok(MintedPair {
            access_token,
            access_exp: access.exp,
            refresh_token,
            refresh_jti: refresh.jti,
        })
    }

    /// Access-only token for a machine client. No session is created.
    #[instrument(skip_all, name = "sso.issuer.client", fields(realm = %realm))]
    pub fn issue_for_client(
        &self,
        client_id: &str,
        realm: &str,
        scope: &str,
    ) -> Result<IssuedTokens, SsoError> {
        let (access_token, claims) = self.mint(
            client_id,
            realm,
            TokenType::Access,
            scope,
            self.lifetimes.client,
            None,
        )?;

        Ok(IssuedTokens {
            access_token,
            refresh_token: None,
            session_id: None,
            expires_at: claims.exp,
        })
    }

    /// Open a new session for `user_id` and issue its first pair.
    #[instrument(skip_all, name = "sso.issuer.new_session", fields(realm = %realm, group = %realm_group))]
    pub async fn issue_for_new_session(
        &self,
        user_id: Uuid,
        realm: &str,
        realm_group: &str,
        scope: &str,
    ) -> Result<IssuedTokens, SsoError> {
        let session_id = crypto::generate_opaque_token()?;
        let pair = self.mint_pair(&user_id.to_string(), realm, scope, &session_id)?;

        let now = Utc::now().timestamp();
        let session = Session {
            session_id: session_id.clone(),
            user_id,
            realm: realm.to_string(),
            realm_group: realm_group.to_string(),
            current_refresh_jti: pair.refresh_jti,
            created_at: now,
            expires_at: now + self.lifetimes.session,
        };
        self.sessions
            .create(&session, self.session_cache_ttl())
            .await?;

        debug!(target: "sso.issuer", realm = %realm, "Session opened");

        Ok(IssuedTokens {
            access_token: pair.access_token,
            refresh_token: Some(pair.refresh_token),
            session_id: Some(session_id),
            expires_at: pair.access_exp,
        })
    }

    /// Rotate the session owning `refresh` and issue a pair for
    /// `target_realm`.
    ///
    /// The caller has already verified the token's signature, expiry and
    /// realm. A refresh token that is not the session's current one is a
    /// replay: the session is destroyed and every token it issued stops
    /// refreshing.
    #[instrument(skip_all, name = "sso.issuer.rotate", fields(realm = %refresh.realm, target_realm = %target_realm))]
    pub async fn rotate(
        &self,
        refresh: &TokenClaims,
        target_realm: &str,
    ) -> Result<IssuedTokens, SsoError> {
        let session_id = refresh
            .session_id
            .as_deref()
            .ok_or_else(|| SsoError::InvalidToken(CAUSE_REVOKED.to_string()))?;

        let Some(stored) = self.sessions.get(session_id).await? else {
            return Err(SsoError::InvalidToken(CAUSE_REVOKED.to_string()));
        };

        if stored.session.current_refresh_jti != refresh.jti
            || stored.session.user_id.to_string() != refresh.sub
        {
            return Err(self.replay_detected(session_id).await);
        }

        let pair = self.mint_pair(&refresh.sub, target_realm, &refresh.scope, session_id)?;
        let next = next_session(&stored, &pair.refresh_jti, self.lifetimes.session);

        match self
            .sessions
            .rotate(&stored, &next, self.session_cache_ttl())
            .await?
        {
            CasOutcome::Swapped => Ok(IssuedTokens {
                access_token: pair.access_token,
                refresh_token: Some(pair.refresh_token),
                session_id: Some(next.session_id),
                expires_at: pair.access_exp,
            }),
            CasOutcome::Mismatch => Err(self.replay_detected(session_id).await),
            CasOutcome::Missing => Err(SsoError::InvalidToken(CAUSE_REVOKED.to_string())),
        }
    }

    /// Destroy a session after a replayed refresh token. Returns the error
    /// to report to the caller.
    pub(crate) async fn replay_detected(&self, session_id: &str) -> SsoError {
        warn!(
            target: "sso.issuer",
            "Refresh token replay detected, destroying session"
        );
        record_refresh_replay();

        match self.sessions.destroy(session_id).await {
            Ok(_) => SsoError::InvalidToken(CAUSE_REVOKED.to_string()),
            Err(e) => e,
        }
    }
}

fn next_session(current: &StoredSession, refresh_jti: &str, session_ttl: i64) -> Session {
    Session {
        current_refresh_jti: refresh_jti.to_string(),
        expires_at: Utc::now().timestamp() + session_ttl,
        ..current.session.clone()
    }
}
