//! VK ID (OAuth 2.1 with PKCE).
//!
//! - authorize: `GET {base}/authorize`
//! - code exchange: `POST {base}/oauth2/auth`, requires `device_id`
//! - user info: `POST {base}/oauth2/user_info`

use crate::config::ProviderSettings;
use crate::errors::SsoError;
use crate::models::{ExternalIdentity, ProviderKind};
use crate::providers::{build_http_client, id_to_string, send_json};
use reqwest::{Client, Url};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::instrument;

#[derive(Serialize)]
struct CodeExchange<'a> {
    grant_type: &'static str,
    code: &'a str,
    code_verifier: &'a str,
    client_id: &'a str,
    device_id: &'a str,
    redirect_uri: &'a str,
}

#[derive(Deserialize)]
struct CodeExchangeResponse {
    access_token: String,
}

#[derive(Serialize)]
struct UserInfoRequest<'a> {
    access_token: &'a str,
    client_id: &'a str,
}

#[derive(Deserialize)]
struct UserInfoResponse {
    user: VkUser,
}

#[derive(Deserialize)]
struct VkUser {
    user_id: serde_json::Value,
    #[serde(default)]
    email: Option<String>,
}

pub struct VkClient {
    http: Client,
    settings: ProviderSettings,
}

impl VkClient {
    pub fn new(settings: ProviderSettings, timeout: Duration) -> Result<Self, SsoError> {
        Ok(Self {
            http: build_http_client(timeout)?,
            settings,
        })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.settings.oauth_base_url.trim_end_matches('/'), path)
    }

    pub fn authorization_url(&self, state: &str, code_challenge: &str) -> Result<String, SsoError> {
        let url = Url::parse_with_params(
            &self.endpoint("authorize"),
            &[
                ("response_type", "code"),
                ("client_id", self.settings.client_id.as_str()),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
                ("state", state),
                ("code_challenge", code_challenge),
                ("code_challenge_method", "S256"),
                ("scope", "email"),
            ],
        )
        .map_err(|e| SsoError::Internal(format!("Invalid VK authorize URL: {}", e)))?;

        Ok(url.into())
    }

    #[instrument(skip_all, name = "sso.providers.vk.exchange")]
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
        device_id: &str,
    ) -> Result<ExternalIdentity, SsoError> {
        let exchange = CodeExchange {
            grant_type: "authorization_code",
            code,
            code_verifier,
            client_id: &self.settings.client_id,
            device_id,
            redirect_uri: &self.settings.redirect_uri,
        };
        let token_url = self.endpoint("oauth2/auth");
        let token: CodeExchangeResponse = send_json(ProviderKind::Vk, "code_exchange", || {
            self.http.post(&token_url).json(&exchange)
        })
        .await?;

        let info_request = UserInfoRequest {
            access_token: &token.access_token,
            client_id: &self.settings.client_id,
        };
        let info_url = format!(
            "{}/oauth2/user_info",
            self.settings.api_base_url.trim_end_matches('/')
        );
        let info: UserInfoResponse = send_json(ProviderKind::Vk, "user_info", || {
            self.http.post(&info_url).json(&info_request)
        })
        .await?;

        let external_id = id_to_string(&info.user.user_id).ok_or_else(|| {
            SsoError::ProviderRejected("VK user info carried no user id".to_string())
        })?;

        Ok(ExternalIdentity {
            provider: ProviderKind::Vk,
            external_id,
            email: info
                .user
                .email
                .filter(|e| !e.is_empty())
                .map(|e| e.to_lowercase()),
        })
    }
}
