use base64::{engine::general_purpose, Engine as _};
use secrecy::SecretString;
use std::collections::{BTreeMap, HashMap};
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default access token lifetime for user logins (15 minutes).
pub const DEFAULT_ACCESS_TOKEN_TTL_SECONDS: i64 = 900;

/// Default refresh token lifetime (7 days).
pub const DEFAULT_REFRESH_TOKEN_TTL_SECONDS: i64 = 7 * 24 * 3600;

/// Default session lifetime. Must be at least the refresh token lifetime.
pub const DEFAULT_SESSION_TTL_SECONDS: i64 = 7 * 24 * 3600;

/// Default access token lifetime for machine clients (30 minutes).
pub const DEFAULT_CLIENT_TOKEN_TTL_SECONDS: i64 = 1800;

/// Default lifetime of a federation handshake record (5 minutes).
pub const DEFAULT_FEDERATION_STATE_TTL_SECONDS: i64 = 300;

/// Default leeway applied to `exp` when verifying tokens.
pub const DEFAULT_JWT_CLOCK_SKEW_SECONDS: i64 = 0;

/// Upper bound on the configurable leeway (10 minutes).
pub const MAX_JWT_CLOCK_SKEW_SECONDS: i64 = 600;

/// Default bcrypt cost factor (~200ms per hash).
pub const DEFAULT_BCRYPT_COST: u32 = 12;

/// Minimum bcrypt cost accepted. Lower values are brute-forceable.
pub const MIN_BCRYPT_COST: u32 = 10;

/// Maximum bcrypt cost accepted. Higher values stall logins.
pub const MAX_BCRYPT_COST: u32 = 14;

pub const DEFAULT_CACHE_TIMEOUT_MS: u64 = 500;
pub const DEFAULT_CACHE_RETRY_BACKOFF_MS: u64 = 50;
pub const DEFAULT_PROVIDER_TIMEOUT_SECONDS: u64 = 10;
pub const DEFAULT_USER_SCOPE: &str = "user";

pub const DEFAULT_VK_BASE_URL: &str = "https://id.vk.com";
pub const DEFAULT_YANDEX_OAUTH_URL: &str = "https://oauth.yandex.ru";
pub const DEFAULT_YANDEX_LOGIN_URL: &str = "https://login.yandex.ru";

#[derive(Debug, Clone)]
pub struct Config {
    pub bind_address: String,
    pub database_url: String,
    pub redis_url: String,

    /// Base64-encoded PKCS#8 Ed25519 private key. Decoded by the token codec.
    pub signing_key: SecretString,
    pub signing_key_id: String,
    pub issuer: String,

    pub realm_groups: RealmGroups,

    pub access_token_ttl_seconds: i64,
    pub refresh_token_ttl_seconds: i64,
    pub session_ttl_seconds: i64,
    pub client_token_ttl_seconds: i64,
    pub federation_state_ttl_seconds: i64,
    pub jwt_clock_skew_seconds: i64,

    pub bcrypt_cost: u32,
    pub cache_timeout: Duration,
    pub cache_retry_backoff: Duration,
    pub provider_timeout: Duration,

    /// Scope string carried by tokens issued to end users.
    pub default_user_scope: String,

    /// Adds `Secure` to the `session_id` cookie. Off only for plain-HTTP
    /// local runs.
    pub cookie_secure: bool,

    pub vk: Option<ProviderSettings>,
    pub yandex: Option<ProviderSettings>,
}

/// OAuth client registration with an external identity provider.
///
/// Endpoint URLs are overridable so deployments can point at a proxy and
/// tests can point at a mock server.
#[derive(Debug, Clone)]
pub struct ProviderSettings {
    pub client_id: String,
    pub client_secret: SecretString,
    pub redirect_uri: String,
    /// Base URL for the authorize and token endpoints.
    pub oauth_base_url: String,
    /// Base URL for the user-info endpoint.
    pub api_base_url: String,
}

/// Explicit allow-list of realms that share login sessions.
///
/// Parsed from `group:realm,realm;group:realm`. A realm belongs to at most
/// one group; a realm absent from every group is unknown.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RealmGroups {
    realm_to_group: BTreeMap<String, String>,
}

impl RealmGroups {
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut realm_to_group = BTreeMap::new();

        for entry in raw.split(';').map(str::trim).filter(|e| !e.is_empty()) {
            let (group, realms) = entry.split_once(':').ok_or_else(|| {
                ConfigError::InvalidRealmGroups(format!("entry '{entry}' is missing ':'"))
            })?;
            let group = group.trim();
            if !is_valid_realm_name(group) {
                return Err(ConfigError::InvalidRealmGroups(format!(
                    "invalid group name '{group}'"
                )));
            }

            for realm in realms.split(',').map(str::trim).filter(|r| !r.is_empty()) {
                if !is_valid_realm_name(realm) {
                    return Err(ConfigError::InvalidRealmGroups(format!(
                        "invalid realm name '{realm}'"
                    )));
                }
                if let Some(existing) = realm_to_group.insert(realm.to_string(), group.to_string())
                {
                    return Err(ConfigError::InvalidRealmGroups(format!(
                        "realm '{realm}' listed in both '{existing}' and '{group}'"
                    )));
                }
            }
        }

        if realm_to_group.is_empty() {
            return Err(ConfigError::InvalidRealmGroups(
                "at least one realm must be configured".to_string(),
            ));
        }

        Ok(Self { realm_to_group })
    }

    /// Group the realm belongs to, or `None` for an unknown realm.
    pub fn group_of(&self, realm: &str) -> Option<&str> {
        self.realm_to_group.get(realm).map(String::as_str)
    }

    pub fn contains(&self, realm: &str) -> bool {
        self.realm_to_group.contains_key(realm)
    }

    pub fn realms(&self) -> impl Iterator<Item = &str> {
        self.realm_to_group.keys().map(String::as_str)
    }
}

fn is_valid_realm_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= 64
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid value for {name}: {reason}")]
    InvalidValue { name: String, reason: String },

    #[error("Invalid signing key: {0}")]
    InvalidSigningKey(String),

    #[error("Invalid realm groups: {0}")]
    InvalidRealmGroups(String),

    #[error("Invalid token lifetimes: {0}")]
    InvalidTtl(String),
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a HashMap (for testing)
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = required(vars, "DATABASE_URL")?;
        let redis_url = required(vars, "REDIS_URL")?;

        let bind_address = vars
            .get("BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| "0.0.0.0:8083".to_string());

        let signing_key_base64 = required(vars, "SSO_SIGNING_KEY")?;
        // Only the encoding is checked here; the codec parses the key itself.
        general_purpose::STANDARD
            .decode(signing_key_base64.trim())
            .map_err(|e| ConfigError::InvalidSigningKey(format!("not valid base64: {e}")))?;

        let signing_key_id = vars
            .get("SSO_SIGNING_KEY_ID")
            .cloned()
            .unwrap_or_else(|| "sso-signing-key-1".to_string());

        let issuer = vars
            .get("SSO_ISSUER")
            .cloned()
            .unwrap_or_else(|| "https://sso.local".to_string());

        let realm_groups = RealmGroups::parse(&required(vars, "SSO_REALM_GROUPS")?)?;

        let access_token_ttl_seconds = parse_or(
            vars,
            "SSO_ACCESS_TOKEN_TTL_SECONDS",
            DEFAULT_ACCESS_TOKEN_TTL_SECONDS,
        )?;
        let refresh_token_ttl_seconds = parse_or(
            vars,
            "SSO_REFRESH_TOKEN_TTL_SECONDS",
            DEFAULT_REFRESH_TOKEN_TTL_SECONDS,
        )?;
        let session_ttl_seconds =
            parse_or(vars, "SSO_SESSION_TTL_SECONDS", DEFAULT_SESSION_TTL_SECONDS)?;
        let client_token_ttl_seconds = parse_or(
            vars,
            "SSO_CLIENT_TOKEN_TTL_SECONDS",
            DEFAULT_CLIENT_TOKEN_TTL_SECONDS,
        )?;
        let federation_state_ttl_seconds = parse_or(
            vars,
            "SSO_FEDERATION_STATE_TTL_SECONDS",
            DEFAULT_FEDERATION_STATE_TTL_SECONDS,
        )?;

        validate_ttls(
            access_token_ttl_seconds,
            refresh_token_ttl_seconds,
            session_ttl_seconds,
        )?;
        for (name, value) in [
            ("SSO_CLIENT_TOKEN_TTL_SECONDS", client_token_ttl_seconds),
            (
                "SSO_FEDERATION_STATE_TTL_SECONDS",
                federation_state_ttl_seconds,
            ),
        ] {
            if value <= 0 {
                return Err(ConfigError::InvalidTtl(format!(
                    "{name} must be positive, got {value}"
                )));
            }
        }

        let jwt_clock_skew_seconds = parse_or(
            vars,
            "SSO_JWT_CLOCK_SKEW_SECONDS",
            DEFAULT_JWT_CLOCK_SKEW_SECONDS,
        )?;
        if !(0..=MAX_JWT_CLOCK_SKEW_SECONDS).contains(&jwt_clock_skew_seconds) {
            return Err(ConfigError::InvalidValue {
                name: "SSO_JWT_CLOCK_SKEW_SECONDS".to_string(),
                reason: format!(
                    "must be between 0 and {MAX_JWT_CLOCK_SKEW_SECONDS}, got {jwt_clock_skew_seconds}"
                ),
            });
        }

        let bcrypt_cost = parse_or(vars, "SSO_BCRYPT_COST", DEFAULT_BCRYPT_COST)?;
        if !(MIN_BCRYPT_COST..=MAX_BCRYPT_COST).contains(&bcrypt_cost) {
            return Err(ConfigError::InvalidValue {
                name: "SSO_BCRYPT_COST".to_string(),
                reason: format!(
                    "must be between {MIN_BCRYPT_COST} and {MAX_BCRYPT_COST}, got {bcrypt_cost}"
                ),
            });
        }

        let cache_timeout = Duration::from_millis(parse_or(
            vars,
            "SSO_CACHE_TIMEOUT_MS",
            DEFAULT_CACHE_TIMEOUT_MS,
        )?);
        let cache_retry_backoff = Duration::from_millis(parse_or(
            vars,
            "SSO_CACHE_RETRY_BACKOFF_MS",
            DEFAULT_CACHE_RETRY_BACKOFF_MS,
        )?);
        let provider_timeout = Duration::from_secs(parse_or(
            vars,
            "SSO_PROVIDER_TIMEOUT_SECONDS",
            DEFAULT_PROVIDER_TIMEOUT_SECONDS,
        )?);

        let default_user_scope = vars
            .get("SSO_DEFAULT_USER_SCOPE")
            .cloned()
            .unwrap_or_else(|| DEFAULT_USER_SCOPE.to_string());

        let cookie_secure = parse_or(vars, "SSO_COOKIE_SECURE", true)?;

        let vk = provider_settings(
            vars,
            "VK",
            ("VK_BASE_URL", DEFAULT_VK_BASE_URL),
            ("VK_BASE_URL", DEFAULT_VK_BASE_URL),
        )?;
        let yandex = provider_settings(
            vars,
            "YANDEX",
            ("YANDEX_OAUTH_URL", DEFAULT_YANDEX_OAUTH_URL),
            ("YANDEX_LOGIN_URL", DEFAULT_YANDEX_LOGIN_URL),
        )?;

        Ok(Config {
            bind_address,
            database_url,
            redis_url,
            signing_key: SecretString::from(signing_key_base64.trim().to_string()),
            signing_key_id,
            issuer,
            realm_groups,
            access_token_ttl_seconds,
            refresh_token_ttl_seconds,
            session_ttl_seconds,
            client_token_ttl_seconds,
            federation_state_ttl_seconds,
            jwt_clock_skew_seconds,
            bcrypt_cost,
            cache_timeout,
            cache_retry_backoff,
            provider_timeout,
            default_user_scope,
            cookie_secure,
            vk,
            yandex,
        })
    }
}

/// Access TTL < refresh TTL <= session TTL, all positive.
pub fn validate_ttls(access: i64, refresh: i64, session: i64) -> Result<(), ConfigError> {
    if access <= 0 {
        return Err(ConfigError::InvalidTtl(format!(
            "access token TTL must be positive, got {access}"
        )));
    }
    if access >= refresh {
        return Err(ConfigError::InvalidTtl(format!(
            "access token TTL ({access}s) must be shorter than refresh token TTL ({refresh}s)"
        )));
    }
    if refresh > session {
        return Err(ConfigError::InvalidTtl(format!(
            "refresh token TTL ({refresh}s) must not exceed session TTL ({session}s)"
        )));
    }
    Ok(())
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|v| !v.trim().is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn parse_or<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match vars.get(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            name: name.to_string(),
            reason: e.to_string(),
        }),
    }
}

/// A provider is enabled when `{PREFIX}_CLIENT_ID` is set; its secret and
/// redirect URI then become required.
fn provider_settings(
    vars: &HashMap<String, String>,
    prefix: &str,
    oauth_base: (&str, &str),
    api_base: (&str, &str),
) -> Result<Option<ProviderSettings>, ConfigError> {
    let Some(client_id) = vars.get(&format!("{prefix}_CLIENT_ID")).cloned() else {
        return Ok(None);
    };

    let client_secret = required(vars, &format!("{prefix}_CLIENT_SECRET"))?;
    let redirect_uri = required(vars, &format!("{prefix}_REDIRECT_URI"))?;
    let base = |(name, default): (&str, &str)| {
        vars.get(name)
            .cloned()
            .unwrap_or_else(|| default.to_string())
            .trim_end_matches('/')
            .to_string()
    };

    Ok(Some(ProviderSettings {
        client_id,
        client_secret: SecretString::from(client_secret),
        redirect_uri,
        oauth_base_url: base(oauth_base),
        api_base_url: base(api_base),
    }))
}
