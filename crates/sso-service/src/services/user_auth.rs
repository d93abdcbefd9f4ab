//! End-user registration, login, refresh, realm switch and logout.

use crate::config::RealmGroups;
use crate::crypto;
use crate::errors::{SsoError, INVALID_TOKEN_MESSAGE};
use crate::models::{IssuedTokens, RegisteredUser};
use crate::repositories::{RevocationList, SessionStore, UserStore};
use crate::services::token_issuer::TokenIssuer;
use crate::services::token_validator::TokenValidator;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, info, instrument};

pub struct UserAuthFlow {
    users: Arc<dyn UserStore>,
    issuer: Arc<TokenIssuer>,
    validator: Arc<TokenValidator>,
    sessions: SessionStore,
    revocations: RevocationList,
    realm_groups: Arc<RealmGroups>,
    dummy_hash: Arc<str>,
    user_scope: String,
    bcrypt_cost: u32,
}

/// Dependencies of [`UserAuthFlow`].
pub struct UserAuthDeps {
    pub users: Arc<dyn UserStore>,
    pub issuer: Arc<TokenIssuer>,
    pub validator: Arc<TokenValidator>,
    pub sessions: SessionStore,
    pub revocations: RevocationList,
    pub realm_groups: Arc<RealmGroups>,
    pub dummy_hash: Arc<str>,
    pub user_scope: String,
    pub bcrypt_cost: u32,
}

impl UserAuthFlow {
    pub fn new(deps: UserAuthDeps) -> Self {
        Self {
            users: deps.users,
            issuer: deps.issuer,
            validator: deps.validator,
            sessions: deps.sessions,
            revocations: deps.revocations,
            realm_groups: deps.realm_groups,
            dummy_hash: deps.dummy_hash,
            user_scope: deps.user_scope,
            bcrypt_cost: deps.bcrypt_cost,
        }
    }

    fn group_of(&self, realm: &str) -> Result<&str, SsoError> {
        self.realm_groups
            .group_of(realm)
            .ok_or_else(|| SsoError::NotFound("Realm".to_string()))
    }

    /// Register a user with a local password. No session is opened; the
    /// caller logs in afterwards.
    ///
    /// `email` is expected trimmed and lowercased.
    #[instrument(skip_all, name = "sso.user.register", fields(realm = %realm))]
    pub async fn register_user(
        &self,
        email: &str,
        password: &SecretString,
        realm: &str,
    ) -> Result<RegisteredUser, SsoError> {
        self.group_of(realm)?;

        if !is_plausible_email(email) {
            return Err(SsoError::BadRequest("Invalid email address".to_string()));
        }
        if password.expose_secret().is_empty() {
            return Err(SsoError::BadRequest("Password must not be empty".to_string()));
        }

        let password_hash = crypto::hash_secret_off_thread(
            password.expose_secret().to_string(),
            self.bcrypt_cost,
        )
        .await?;
        let user = self
            .users
            .create_with_password(realm, email, &password_hash)
            .await?;

        info!(target: "sso.user", user_id = %user.user_id, realm = %realm, "User registered");
        Ok(RegisteredUser {
            user_id: user.user_id,
            realm: user.realm,
            email: email.to_string(),
        })
    }

    /// Password login. Opens a new session.
    ///
    /// Unknown users, users without a local password, inactive users and
    /// wrong passwords are indistinguishable to the caller.
    #[instrument(skip_all, name = "sso.user.login", fields(realm = %realm))]
    pub async fn authenticate_user(
        &self,
        email: &str,
        password: &SecretString,
        realm: &str,
    ) -> Result<IssuedTokens, SsoError> {
        let group = self.group_of(realm)?;

        let user = self.users.find_by_email(realm, email).await?;

        let hash_to_verify = match &user {
            Some(u) if u.is_active => u
                .password_hash
                .clone()
                .unwrap_or_else(|| self.dummy_hash.to_string()),
            _ => self.dummy_hash.to_string(),
        };
        let password_matches = crypto::verify_secret_off_thread(
            password.expose_secret().to_string(),
            hash_to_verify,
        )
        .await?;

        let user = match user {
            Some(u) if u.is_active && u.password_hash.is_some() && password_matches => u,
            _ => {
                debug!(target: "sso.user", "Login rejected");
                return Err(SsoError::InvalidCredentials);
            }
        };

        let issued = self
            .issuer
            .issue_for_new_session(user.user_id, realm, group, &self.user_scope)
            .await?;

        info!(target: "sso.user", user_id = %user.user_id, realm = %realm, "User logged in");
        Ok(issued)
    }

    /// Rotate the session behind `refresh_token` and issue a new pair in the
    /// same realm.
    #[instrument(skip_all, name = "sso.user.refresh", fields(realm = %realm))]
    pub async fn refresh(
        &self,
        refresh_token: &SecretString,
        realm: &str,
    ) -> Result<IssuedTokens, SsoError> {
        self.group_of(realm)?;
        let claims = self
            .validator
            .verify_refresh(refresh_token.expose_secret(), realm)?;
        self.issuer.rotate(&claims, realm).await
    }

    /// Move a session to another realm of the same group.
    #[instrument(
        skip_all,
        name = "sso.user.switch_realm",
        fields(realm = %current_realm, target_realm = %target_realm)
    )]
    pub async fn switch_realm(
        &self,
        refresh_token: &SecretString,
        current_realm: &str,
        target_realm: &str,
    ) -> Result<IssuedTokens, SsoError> {
        let current_group = self.group_of(current_realm)?;
        let target_group = self.group_of(target_realm)?;

        let claims = self
            .validator
            .verify_refresh(refresh_token.expose_secret(), current_realm)?;

        if target_realm == current_realm {
            return Err(SsoError::BadRequest(
                "Target realm must differ from the current realm".to_string(),
            ));
        }
        if target_group != current_group {
            return Err(SsoError::Forbidden(
                "Target realm is outside the session's realm group".to_string(),
            ));
        }

        self.issuer.rotate(&claims, target_realm).await
    }

    /// Destroy the session named by the cookie and optionally revoke an
    /// access token presented with it.
    #[instrument(skip_all, name = "sso.user.logout", fields(realm = %realm))]
    pub async fn logout(
        &self,
        session_id: Option<&str>,
        access_token: Option<&SecretString>,
        realm: &str,
    ) -> Result<(), SsoError> {
        let group = self.group_of(realm)?;
        let session_id = session_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| SsoError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string()))?;

        if let Some(stored) = self.sessions.get(session_id).await? {
            if stored.session.realm_group != group {
                return Err(SsoError::InvalidToken(INVALID_TOKEN_MESSAGE.to_string()));
            }
        }

        if let Some(token) = access_token {
            if let Some(claims) = self.validator.verify_access(token.expose_secret(), realm)? {
                self.revocations.revoke(&claims.jti, claims.exp).await?;
            }
        }

        self.sessions.destroy(session_id).await?;
        debug!(target: "sso.user", realm = %realm, "Session closed");
        Ok(())
    }
}

/// One `@` with something on both sides and a dot in the domain.
fn is_plausible_email(email: &str) -> bool {
    match email.split_once('@') {
        Some((local, domain)) => {
            !local.is_empty()
                && !domain.contains('@')
                && domain.contains('.')
                && !domain.starts_with('.')
                && !domain.ends_with('.')
        }
        None => false,
    }
}
