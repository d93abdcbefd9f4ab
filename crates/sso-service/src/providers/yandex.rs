//! Yandex ID.
//!
//! - authorize: `GET {oauth}/authorize`
//! - code exchange: form `POST {oauth}/token`
//! - user info: `GET {login}/info?format=json` with `Authorization: OAuth <token>`

use crate::config::ProviderSettings;
use crate::errors::SsoError;
use crate::models::{ExternalIdentity, ProviderKind};
use crate::providers::{build_http_client, id_to_string, send_json};
use reqwest::{header::AUTHORIZATION, Client, Url};
use secrecy::ExposeSecret;
use serde::Deserialize;
use std::time::Duration;
use tracing::instrument;

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
}

#[derive(Deserialize)]
struct UserInfo {
    id: serde_json::Value,
    #[serde(default)]
    default_email: Option<String>,
}

pub struct YandexClient {
    http: Client,
    settings: ProviderSettings,
}

impl YandexClient {
    pub fn new(settings: ProviderSettings, timeout: Duration) -> Result<Self, SsoError> {
        Ok(Self {
            http: build_http_client(timeout)?,
            settings,
        })
    }

    fn oauth_endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.settings.oauth_base_url.trim_end_matches('/'), path)
    }

    pub fn authorization_url(&self, state: &str, code_challenge: &str) -> Result<String, SsoError> {
        let url = Url::parse_with_params(
            &self.oauth_endpoint("authorize"),
            &[
                ("response_type", "code"),
                ("client_id", self.settings.client_id.as_str()),
                ("redirect_uri", self.settings.redirect_uri.as_str()),
                ("state", state),
                ("code_challenge", code_challenge),
                ("code_challenge_method", "S256"),
            ],
        )
        .map_err(|e| SsoError::Internal(format!("Invalid Yandex authorize URL: {}", e)))?;

        Ok(url.into())
    }

    #[instrument(skip_all, name = "sso.providers.yandex.exchange")]
    pub async fn exchange_code(
        &self,
        code: &str,
        code_verifier: &str,
    ) -> Result<ExternalIdentity, SsoError> {
        let form = [
            ("grant_type", "authorization_code"),
            ("code", code),
            ("client_id", self.settings.client_id.as_str()),
            ("client_secret", self.settings.client_secret.expose_secret()),
            ("code_verifier", code_verifier),
        ];
        let token_url = self.oauth_endpoint("token");
        let token: TokenResponse = send_json(ProviderKind::Yandex, "code_exchange", || {
            self.http.post(&token_url).form(&form)
        })
        .await?;

        let info_url = format!(
            "{}/info",
            self.settings.api_base_url.trim_end_matches('/')
        );
        let authorization = format!("OAuth {}", token.access_token);
        let info: UserInfo = send_json(ProviderKind::Yandex, "user_info", || {
            self.http
                .get(&info_url)
                .query(&[("format", "json")])
                .header(AUTHORIZATION, &authorization)
        })
        .await?;

        let external_id = id_to_string(&info.id).ok_or_else(|| {
            SsoError::ProviderRejected("Yandex user info carried no user id".to_string())
        })?;

        Ok(ExternalIdentity {
            provider: ProviderKind::Yandex,
            external_id,
            email: info
                .default_email
                .filter(|e| !e.is_empty())
                .map(|e| e.to_lowercase()),
        })
    }
}
