//! External identity providers.
//!
//! Each provider is an enum variant; the provider key stored in the
//! federation state selects which one completes a handshake. Providers are
//! built once at startup from configuration and shared read-only.
//!
//! # Failure mapping
//!
//! - 4xx from the provider: `ProviderRejected` (401)
//! - 5xx, timeouts, unreachable provider, unreadable body:
//!   `ServiceUnavailable` (503)
//!
//! Only connection failures are retried (once). Such a request never reached
//! the provider, so the authorization code is still unspent.

pub mod vk;
pub mod yandex;

pub use vk::VkClient;
pub use yandex::YandexClient;

use crate::config::Config;
use crate::errors::SsoError;
use crate::models::{ExternalIdentity, ProviderKind};
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{error, warn};

const CONNECT_TIMEOUT_SECS: u64 = 5;

pub enum IdentityProvider {
    Vk(VkClient),
    Yandex(YandexClient),
}

impl IdentityProvider {
    pub fn kind(&self) -> ProviderKind {
        match self {
            IdentityProvider::Vk(_) => ProviderKind::Vk,
            IdentityProvider::Yandex(_) => ProviderKind::Yandex,
        }
    }

    /// Authorize URL embedding `state` and the S256 PKCE challenge.
    pub fn authorization_url(&self, state: &str, code_challenge: &str) -> Result<String, SsoError> {
        match self {
            IdentityProvider::Vk(client) => client.authorization_url(state, code_challenge),
            IdentityProvider::Yandex(client) => client.authorization_url(state, code_challenge),
        }
    }

    /// Exchange an authorization code for the identity it asserts.
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        device_id: Option<&str>,
    ) -> Result<ExternalIdentity, SsoError> {
        match self {
            IdentityProvider::Vk(client) => {
                let device_id = device_id
                    .filter(|d| !d.is_empty())
                    .ok_or_else(missing_device_id)?;
                client.exchange_code(code, code_verifier, device_id).await
            }
            IdentityProvider::Yandex(client) => client.exchange_code(code, code_verifier).await,
        }
    }
}

/// Providers enabled by configuration.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: HashMap<ProviderKind, IdentityProvider>,
}

impl ProviderRegistry {
    pub fn from_config(config: &Config) -> Result<Self, SsoError> {
        let mut registry = Self::default();
        if let Some(settings) = &config.vk {
            registry.register(IdentityProvider::Vk(VkClient::new(
                settings.clone(),
                config.provider_timeout,
            )?));
        }
        if let Some(settings) = &config.yandex {
            registry.register(IdentityProvider::Yandex(YandexClient::new(
                settings.clone(),
                config.provider_timeout,
            )?));
        }
        Ok(registry)
    }

    pub fn register(&mut self, provider: IdentityProvider) {
        self.providers.insert(provider.kind(), provider);
    }

    /// Look up an enabled provider.
    ///
    /// # Errors
    ///
    /// `SsoError::NotFound` if the provider is not configured.
    pub fn get(&self, kind: ProviderKind) -> Result<&IdentityProvider, SsoError> {
        self.providers
            .get(&kind)
            .ok_or_else(|| SsoError::NotFound("Identity provider".to_string()))
    }
}

pub(crate) fn missing_device_id() -> SsoError {
    SsoError::BadRequest("device_id is required for VK".to_string())
}

pub(crate) fn build_http_client(timeout: Duration) -> Result<Client, SsoError> {
    Client::builder()
        .timeout(timeout)
        .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS).min(timeout))
        .build()
        .map_err(|e| {
            error!(target: "sso.providers", error = %e, "Failed to build HTTP client");
            SsoError::Internal(format!("Failed to build HTTP client: {}", e))
        })
}

/// Send a provider request and decode a JSON success body.
///
/// `request` is called again for the single retry, since a
/// `RequestBuilder` is consumed by sending it.
pub(crate) async fn send_json<T, F>(
    provider: ProviderKind,
    step: &'static str,
    request: F,
) -> Result<T, SsoError>
where
    T: DeserializeOwned,
    F: Fn() -> RequestBuilder,
{
    let response = match request().send().await {
        Ok(response) => response,
        Err(e) if e.is_connect() => {
            warn!(
                target: "sso.providers",
                provider = provider.as_str(),
                step,
                error = %e,
                "Provider unreachable, retrying once"
            );
            request()
                .send()
                .await
                .map_err(|e| unavailable(provider, step, &e))?
        }
        Err(e) => return Err(unavailable(provider, step, &e)),
    };

    decode(provider, step, response).await
}

async fn decode<T: DeserializeOwned>(
    provider: ProviderKind,
    step: &'static str,
    response: Response,
) -> Result<T, SsoError> {
    let status = response.status();

    if status.is_client_error() {
        warn!(
            target: "sso.providers",
            provider = provider.as_str(),
            step,
            status = %status,
            "Provider rejected the request"
        );
        return Err(SsoError::ProviderRejected(format!(
            "{} {} returned {}",
            provider.as_str(),
            step,
            status
        )));
    }

    if !status.is_success() {
        warn!(
            target: "sso.providers",
            provider = provider.as_str(),
            step,
            status = %status,
            "Provider returned an error"
        );
        return Err(SsoError::ServiceUnavailable(format!(
            "{} {} returned {}",
            provider.as_str(),
            step,
            status
        )));
    }

    response.json::<T>().await.map_err(|e| {
        warn!(
            target: "sso.providers",
            provider = provider.as_str(),
            step,
            error = %e,
            "Unreadable provider response"
        );
        SsoError::ServiceUnavailable(format!(
            "{} {} returned an unreadable body",
            provider.as_str(),
            step
        ))
    })
}

fn unavailable(provider: ProviderKind, step: &'static str, err: &reqwest::Error) -> SsoError {
    warn!(
        target: "sso.providers",
        provider = provider.as_str(),
        step,
        error = %err,
        "Provider request failed"
    );
    SsoError::ServiceUnavailable(format!("{} {} failed", provider.as_str(), step))
}

/// Provider ids arrive as JSON numbers or strings.
pub(crate) fn id_to_string(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) if !s.is_empty() => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}
