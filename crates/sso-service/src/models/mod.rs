use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

pub const CAUSE_EXPIRED: &str = "Token expired";
pub const CAUSE_REVOKED: &str = "Token revoked";
pub const CAUSE_MALFORMED: &str = "Malformed token";

/// Token kind carried in the `token_type` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

impl TokenType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenType::Access => "access",
            TokenType::Refresh => "refresh",
        }
    }
}

/// Signed claim set of an access or refresh token.
///
/// Tokens are never stored; two tokens are the same token iff their `jti`
/// match. Refresh tokens always carry the owning `session_id`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// User id (UUID) or machine client id.
    pub sub: String,
    pub iss: String,
    pub realm: String,
    pub token_type: TokenType,
    /// Space-separated opaque scope string.
    pub scope: String,
    pub iat: i64,
    pub exp: i64,
    pub jti: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// `sub`, `jti` and `session_id` identify a principal or grant access, so
/// they are redacted.
impl fmt::Debug for TokenClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenClaims")
            .field("sub", &"[REDACTED]")
            .field("iss", &self.iss)
            .field("realm", &self.realm)
            .field("token_type", &self.token_type)
            .field("scope", &self.scope)
            .field("iat", &self.iat)
            .field("exp", &self.exp)
            .field("jti", &"[REDACTED]")
            .field("session_id", &self.session_id.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// Server-side login session shared by the realms of one realm group.
///
/// Stored in the cache under `session:{session_id}`. Exactly one refresh
/// token is valid at a time: the one whose `jti` equals
/// `current_refresh_jti`.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub user_id: Uuid,
    /// Realm where the login happened.
    pub realm: String,
    pub realm_group: String,
    pub current_refresh_jti: String,
    pub created_at: i64,
    pub expires_at: i64,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("session_id", &"[REDACTED]")
            .field("user_id", &self.user_id)
            .field("realm", &self.realm)
            .field("realm_group", &self.realm_group)
            .field("current_refresh_jti", &"[REDACTED]")
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// External identity providers supported for federated login.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Vk,
    Yandex,
}

impl ProviderKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::Vk => "vk",
            ProviderKind::Yandex => "yandex",
        }
    }

    /// VK ID binds the authorization code to the client's `device_id`.
    pub fn requires_device_id(&self) -> bool {
        matches!(self, ProviderKind::Vk)
    }
}

impl FromStr for ProviderKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "vk" => Ok(ProviderKind::Vk),
            "yandex" => Ok(ProviderKind::Yandex),
            _ => Err(format!("Unknown identity provider: {}", s)),
        }
    }
}

/// Short-lived record of an in-flight federation handshake.
///
/// Stored under `fedstate:{state}` and consumed by the first redemption.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FederationState {
    pub realm: String,
    pub provider: ProviderKind,
    /// PKCE verifier sent to the provider on code exchange.
    pub code_verifier: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_target: Option<String>,
    pub created_at: i64,
    pub expires_at: i64,
}

impl fmt::Debug for FederationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FederationState")
            .field("realm", &self.realm)
            .field("provider", &self.provider)
            .field("code_verifier", &"[REDACTED]")
            .field("redirect_target", &self.redirect_target)
            .field("created_at", &self.created_at)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Identity asserted by an external provider after a successful code exchange.
#[derive(Clone, PartialEq, Eq)]
pub struct ExternalIdentity {
    pub provider: ProviderKind,
    pub external_id: String,
    pub email: Option<String>,
}

impl fmt::Debug for ExternalIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExternalIdentity")
            .field("provider", &self.provider)
            .field("external_id", &"[REDACTED]")
            .field("email", &self.email.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// User model (maps to users table)
#[derive(Clone, FromRow)]
pub struct User {
    pub user_id: Uuid,
    pub realm: String,
    pub email: Option<String>,
    /// Absent for users that only ever signed in through a provider.
    pub password_hash: Option<String>,
    pub is_active: bool,
}

impl fmt::Debug for User {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("User")
            .field("user_id", &self.user_id)
            .field("realm", &self.realm)
            .field("email", &"[REDACTED]")
            .field("password_hash", &"[REDACTED]")
            .field("is_active", &self.is_active)
            .finish()
    }
}

/// Machine client model (maps to client_applications table)
#[derive(Debug, Clone, FromRow)]
pub struct ClientApplication {
    pub client_id: String,
    pub realm: String,
    pub client_secret_hash: String,
    pub scopes: Vec<String>,
    pub is_active: bool,
}

/// Result of a successful issuance.
#[derive(Clone)]
pub struct IssuedTokens {
    pub access_token: String,
    pub refresh_token: Option<String>,
    pub session_id: Option<String>,
    /// Expiry of the access token, epoch seconds.
    pub expires_at: i64,
}

impl fmt::Debug for IssuedTokens {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IssuedTokens")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("session_id", &self.session_id.as_ref().map(|_| "[REDACTED]"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Introspection outcome.
///
/// Inactive results carry only `active` and `cause`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntrospectionResult {
    pub active: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token_type: Option<TokenType>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sub: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub jti: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub realm: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
}

impl IntrospectionResult {
    pub fn inactive(cause: &str) -> Self {
        Self {
            active: false,
            cause: Some(cause.to_string()),
            token_type: None,
            iss: None,
            sub: None,
            exp: None,
            iat: None,
            jti: None,
            realm: None,
            scope: None,
        }
    }

    pub fn active(claims: TokenClaims) -> Self {
        Self {
            active: true,
            cause: None,
            token_type: Some(claims.token_type),
            iss: Some(claims.iss),
            sub: Some(claims.sub),
            exp: Some(claims.exp),
            iat: Some(claims.iat),
            jti: Some(claims.jti),
            realm: Some(claims.realm),
            scope: Some(claims.scope),
        }
    }
}

// ============================================================================
// Request / response bodies
// ============================================================================

/// Client-credentials grant request
#[derive(Debug, Deserialize)]
pub struct TokenRequest {
    pub grant_type: String,
    pub client_id: String,
    pub client_secret: SecretString,
    #[serde(default)]
    pub scope: Option<String>,
}

/// Access-only token response (client credentials)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    pub token_type: String,
    pub expires_at: i64,
}

/// Access/refresh pair response
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenPairResponse {
    pub access_token: String,
    pub refresh_token: String,
    pub token_type: String,
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub redirect_target: Option<String>,
}

impl fmt::Debug for TokenPairResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenPairResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_at", &self.expires_at)
            .field("redirect_target", &self.redirect_target)
            .finish()
    }
}

#[derive(Debug, Deserialize)]
pub struct IntrospectRequest {
    pub token: SecretString,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub email: String,
    pub password: SecretString,
}

#[derive(Debug, Deserialize)]
pub struct RegistrationRequest {
    pub email: String,
    pub password: SecretString,
}

/// A newly registered user. Never carries the password hash.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredUser {
    pub user_id: Uuid,
    pub realm: String,
    pub email: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: SecretString,
}

#[derive(Debug, Deserialize)]
pub struct SwitchRealmRequest {
    pub target_realm: String,
    pub refresh_token: SecretString,
}

#[derive(Debug, Default, Deserialize)]
pub struct LogoutRequest {
    #[serde(default)]
    pub access_token: Option<SecretString>,
}

#[derive(Debug, Deserialize)]
pub struct LinkQuery {
    #[serde(default)]
    pub redirect_target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkResponse {
    pub authorization_url: String,
    pub state: String,
}

/// Body of the provider callback relayed by the client application.
#[derive(Debug, Deserialize)]
pub struct FederationCompletionRequest {
    pub code: SecretString,
    pub state: String,
    #[serde(default)]
    pub device_id: Option<String>,
}
