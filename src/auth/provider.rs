//! External identity providers.
//!
//! A provider turns an authorization code into a verified [`ExternalIdentity`].
//! [`GoogleProvider`] implements the OAuth 2.0 authorization-code flow against
//! Google's endpoints.

use crate::config::GoogleConfig;
use crate::types::ExternalIdentity;
use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

const AUTHORIZE_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
const USERINFO_URL: &str = "https://openidconnect.googleapis.com/v1/userinfo";
const SCOPES: &str = "openid email profile";

/// Failures talking to an identity provider.
#[derive(Debug, Error)]
pub enum ProviderError {
    /// The authorization code or login session was invalid or expired.
    #[error("login session expired or was invalid")]
    InvalidSession,

    /// Network failure or timeout.
    #[error("could not reach identity provider: {0}")]
    Transport(String),

    /// The provider answered with an unexpected status.
    #[error("identity provider rejected the request with status {status}")]
    Rejected { status: u16 },

    /// The provider's response could not be understood.
    #[error("malformed identity provider response: {0}")]
    Malformed(String),
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ProviderError::Malformed(err.to_string())
        } else {
            ProviderError::Transport(err.to_string())
        }
    }
}

/// An OAuth-style identity provider.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Short provider name used in logs.
    fn name(&self) -> &'static str;

    /// URL to send the browser to, carrying `state` for the callback check.
    fn authorization_url(&self, state: &str) -> String;

    /// Exchange an authorization code for a verified identity.
    ///
    /// Returns `Ok(None)` when the provider answered but the identity is not
    /// usable, such as an unverified email address.
    async fn verified_identity(&self, code: &str)
    -> Result<Option<ExternalIdentity>, ProviderError>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
}

#[derive(Debug, Deserialize)]
struct UserInfo {
    sub: String,
    #[serde(default)]
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    #[serde(default)]
    name: Option<String>,
}

/// Google OAuth 2.0 provider.
#[derive(Clone, Debug)]
pub struct GoogleProvider {
    client_id: String,
    client_secret: String,
    redirect_uri: String,
    http_client: Client,
}

impl GoogleProvider {
    /// Build a provider from configuration.
    ///
    /// Returns `Ok(None)` when no client id or secret is configured.
    pub fn from_config(config: &GoogleConfig) -> anyhow::Result<Option<Self>> {
        if !config.is_configured() {
            return Ok(None);
        }
        let http_client = Client::builder()
            .timeout(Duration::from_secs(config.timeout))
            .build()?;
        Ok(Some(Self {
            client_id: config.client_id.clone(),
            client_secret: config.client_secret.clone(),
            redirect_uri: config.redirect_uri.clone(),
            http_client,
        }))
    }

    async fn exchange_code(&self, code: &str) -> Result<TokenResponse, ProviderError> {
        let params = [
            ("code", code),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("grant_type", "authorization_code"),
        ];

        let response = self.http_client.post(TOKEN_URL).form(&params).send().await?;
        let status = response.status();

        if status == StatusCode::BAD_REQUEST {
            // invalid_grant covers expired, reused and forged codes
            let body = response.text().await.unwrap_or_default();
            return match serde_json::from_str::<TokenErrorResponse>(&body) {
                Ok(err) if err.error == "invalid_grant" => Err(ProviderError::InvalidSession),
                _ => {
                    tracing::error!("Google token exchange failed: {}", body);
                    Err(ProviderError::Rejected {
                        status: status.as_u16(),
                    })
                }
            };
        }

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Google token exchange failed: {}", body);
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
            });
        }

        Ok(response.json().await?)
    }

    async fn fetch_user_info(&self, access_token: &str) -> Result<UserInfo, ProviderError> {
        let response = self
            .http_client
            .get(USERINFO_URL)
            .bearer_auth(access_token)
            .send()
            .await?;
        let status = response.status();

        if status == StatusCode::UNAUTHORIZED {
            return Err(ProviderError::InvalidSession);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::error!("Google userinfo request failed: {}", body);
            return Err(ProviderError::Rejected {
                status: status.as_u16(),
            });
        }

        Ok(response.json().await?)
    }
}

#[async_trait]
impl IdentityProvider for GoogleProvider {
    fn name(&self) -> &'static str {
        "google"
    }

    fn authorization_url(&self, state: &str) -> String {
        let params = [
            ("client_id", self.client_id.as_str()),
            ("redirect_uri", self.redirect_uri.as_str()),
            ("response_type", "code"),
            ("scope", SCOPES),
            ("state", state),
            ("access_type", "offline"),
            ("include_granted_scopes", "true"),
        ];
        // Serializing a slice of string pairs cannot fail.
        let query = serde_urlencoded::to_string(params).unwrap_or_default();
        format!("{}?{}", AUTHORIZE_URL, query)
    }

    async fn verified_identity(
        &self,
        code: &str,
    ) -> Result<Option<ExternalIdentity>, ProviderError> {
        let tokens = self.exchange_code(code).await?;
        let user = self.fetch_user_info(&tokens.access_token).await?;

        let Some(email) = user.email.filter(|e| !e.trim().is_empty()) else {
            tracing::warn!(external_id = %user.sub, "Google identity has no email");
            return Ok(None);
        };
        if !user.email_verified {
            tracing::warn!(email = %email, "Google user email not verified");
            return Ok(None);
        }

        let display_name = user
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| email.clone());

        Ok(Some(ExternalIdentity {
            external_id: user.sub,
            email,
            display_name,
            access_token: tokens.access_token,
            refresh_token: tokens.refresh_token,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> GoogleProvider {
        let config = GoogleConfig {
            client_id: "client-123".into(),
            client_secret: "secret".into(),
            redirect_uri: "http://localhost:8080/auth/google/callback".into(),
            timeout: 5,
        };
        GoogleProvider::from_config(&config).unwrap().unwrap()
    }

    #[test]
    fn test_unconfigured_provider_is_absent() {
        let config = GoogleConfig::default();
        assert!(GoogleProvider::from_config(&config).unwrap().is_none());
    }

    #[test]
    fn test_authorization_url_carries_state_and_offline_access() {
        let url = provider().authorization_url("st@te");
        assert!(url.starts_with(AUTHORIZE_URL));
        assert!(url.contains("client_id=client-123"));
        assert!(url.contains("state=st%40te"));
        assert!(url.contains("access_type=offline"));
        assert!(url.contains("scope=openid+email+profile"));
        assert!(url.contains("redirect_uri=http%3A%2F%2Flocalhost%3A8080%2Fauth%2Fgoogle%2Fcallback"));
    }
}
