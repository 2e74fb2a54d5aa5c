//! Client side of push subscription registration.
//!
//! Once the browser has a push channel, its endpoint and keys are posted to
//! the registry. Error bodies (`{ "error": ... }`) are mapped back onto the
//! shared error taxonomy by status code.

use std::time::Duration;

use larder_core::{AppConfig, Error, RegisterRequest};
use reqwest::{Client, StatusCode, Url};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct RegistryReply {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    error: Option<String>,
}

/// HTTP client for the subscription registry endpoint.
pub struct RegistryClient {
    http: Client,
    url: Url,
    token: Option<String>,
}

impl RegistryClient {
    pub fn new(url: &str, token: Option<String>, timeout: Duration) -> Result<Self, Error> {
        let url = Url::parse(url).map_err(|e| Error::InvalidUrl(format!("{url}: {e}")))?;
        let http = Client::builder()
            .timeout(timeout)
            .use_rustls_tls()
            .build()
            .map_err(|e| Error::Network(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { http, url, token })
    }

    pub fn from_app(config: &AppConfig) -> Result<Self, Error> {
        Self::new(&config.registry_url, config.registry_token().map(str::to_string), config.timeout())
    }

    /// Submit a subscription.
    ///
    /// # Errors
    ///
    /// - `InvalidSubscription` for a 4xx validation reply
    /// - `Unauthorized` for 401/403
    /// - `RegistrationFailed` for 5xx or a reply without `success: true`
    /// - `Network` if the registry could not be reached
    pub async fn register(&self, request: &RegisterRequest) -> Result<(), Error> {
        let mut builder = self.http.post(self.url.clone()).json(request);
        if let Some(token) = &self.token {
            builder = builder.bearer_auth(token);
        }

        let response = builder
            .send()
            .await
            .map_err(|e| Error::Network(format!("registry unreachable: {e}")))?;
        let status = response.status();
        let reply: Option<RegistryReply> = response.json().await.ok();
        let message = reply
            .as_ref()
            .and_then(|r| r.error.clone())
            .unwrap_or_else(|| format!("status {}", status.as_u16()));

        match status {
            s if s.is_success() && reply.as_ref().is_some_and(|r| r.success) => {
                tracing::debug!(url = %self.url, "subscription registered");
                Ok(())
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Unauthorized(message)),
            s if s.is_client_error() => Err(Error::InvalidSubscription(message)),
            _ => Err(Error::RegistrationFailed(message)),
        }
    }
}
