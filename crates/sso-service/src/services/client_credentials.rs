//! OAuth 2.0 client-credentials grant.
//!
//! Unknown clients, inactive clients and wrong secrets all fail the same
//! way, and all pay for one bcrypt verification.

use crate::config::RealmGroups;
use crate::crypto;
use crate::errors::SsoError;
use crate::models::IssuedTokens;
use crate::observability::hash_for_correlation;
use crate::repositories::ClientStore;
use crate::services::token_issuer::TokenIssuer;
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, instrument};

pub const CLIENT_CREDENTIALS_GRANT: &str = "client_credentials";

pub struct ClientCredentialsGrant {
    clients: Arc<dyn ClientStore>,
    issuer: Arc<TokenIssuer>,
    realm_groups: Arc<RealmGroups>,
    dummy_hash: Arc<str>,
}

impl ClientCredentialsGrant {
    pub fn new(
        clients: Arc<dyn ClientStore>,
        issuer: Arc<TokenIssuer>,
        realm_groups: Arc<RealmGroups>,
        dummy_hash: Arc<str>,
    ) -> Self {
        Self {
            clients,
            issuer,
            realm_groups,
            dummy_hash,
        }
    }

    #[instrument(
        skip_all,
        name = "sso.grant.client_credentials",
        fields(realm = %realm, client = %hash_for_correlation(client_id))
    )]
    pub async fn authenticate_client(
        &self,
        grant_type: &str,
        client_id: &str,
        client_secret: &SecretString,
        realm: &str,
        scope: Option<&str>,
    ) -> Result<IssuedTokens, SsoError> {
        if grant_type != CLIENT_CREDENTIALS_GRANT {
            return Err(SsoError::UnsupportedGrantType(grant_type.to_string()));
        }

        if !self.realm_groups.contains(realm) {
            return Err(SsoError::NotFound("Realm".to_string()));
        }

        let client = self.clients.find(realm, client_id).await?;

        // Always run bcrypt so response timing does not reveal which
        // clients exist.
        let hash_to_verify = match &client {
            Some(c) if c.is_active => c.client_secret_hash.clone(),
            _ => self.dummy_hash.to_string(),
        };
        let secret_matches = crypto::verify_secret_off_thread(
            client_secret.expose_secret().to_string(),
            hash_to_verify,
        )
        .await?;

        let client = match client {
            Some(c) if c.is_active && secret_matches => c,
            _ => {
                debug!(target: "sso.grant", "Client authentication failed");
                return Err(SsoError::InvalidCredentials);
            }
        };

        let granted = grant_scope(scope.unwrap_or_default(), &client.scopes)?;

        self.issuer
            .issue_for_client(&client.client_id, realm, &granted)
    }
}

/// Scope to grant for a request.
///
/// An empty request grants every allowed scope. Otherwise each requested
/// token must be allowed.
fn grant_scope(requested: &str, allowed: &[String]) -> Result<String, SsoError> {
    let requested: Vec<&str> = requested.split_whitespace().collect();
    if requested.is_empty() {
        return Ok(allowed.join(" "));
    }

    if requested
        .iter()
        .all(|token| allowed.iter().any(|a| a == token))
    {
        Ok(requested.join(" "))
    } else {
        Err(SsoError::InsufficientScope {
            requested: requested.iter().map(|s| s.to_string()).collect(),
            allowed: allowed.to_vec(),
        })
    }
}
