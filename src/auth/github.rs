//! GitHub as the OAuth provider.
//!
//! Uses the classic web application flow: the browser is sent to
//! `/login/oauth/authorize`, the code comes back to the callback route and is
//! exchanged at `/login/oauth/access_token`; the profile comes from
//! `/user` and `/user/emails` on the REST API.

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{ACCEPT, USER_AGENT};
use reqwest::Client;
use serde::Deserialize;
use url::Url;

use crate::auth::provider::{
    AccessToken, FetchFailure, OAuthProvider, ProviderProfile, TokenExchangeError,
};
use crate::config::GithubConfig;

const APP_USER_AGENT: &str = "emoshare";
const TOKEN_TIMEOUT: Duration = Duration::from_secs(10);
const API_TIMEOUT: Duration = Duration::from_secs(15);

#[derive(Debug, Deserialize)]
struct GithubUser {
    login: String,
    name: Option<String>,
    avatar_url: Option<String>,
    html_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct GithubEmail {
    email: String,
    #[serde(default)]
    primary: bool,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

pub struct GithubProvider {
    config: GithubConfig,
    http: Client,
    api_timeout: Duration,
}

impl GithubProvider {
    pub fn new(config: GithubConfig) -> Result<Self, reqwest::Error> {
        let http = Client::builder().user_agent(APP_USER_AGENT).build()?;
        Ok(Self {
            config,
            http,
            api_timeout: API_TIMEOUT,
        })
    }

    /// Per-request deadline for REST API calls.
    pub fn with_api_timeout(mut self, timeout: Duration) -> Self {
        self.api_timeout = timeout;
        self
    }

    fn api_url(&self, path: &str) -> String {
        format!("{}{}", self.config.api_base.trim_end_matches('/'), path)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        token: &AccessToken,
        path: &str,
    ) -> Result<T, FetchFailure> {
        let response = self
            .http
            .get(self.api_url(path))
            .bearer_auth(token.secret())
            .header(ACCEPT, "application/vnd.github+json")
            .header(USER_AGENT, APP_USER_AGENT)
            .timeout(self.api_timeout)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(FetchFailure::Status {
                status: status.as_u16(),
                body,
            });
        }

        let bytes = response.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|e| FetchFailure::Decode(e.to_string()))
    }
}

/// The entry flagged primary, else the first one listed.
fn primary_email(emails: Vec<GithubEmail>) -> Option<String> {
    let fallback = emails.first().map(|e| e.email.clone());
    emails
        .into_iter()
        .find(|e| e.primary)
        .map(|e| e.email)
        .or(fallback)
}

#[async_trait]
impl OAuthProvider for GithubProvider {
    fn authorize_url(&self, state: &str) -> Result<Url, url::ParseError> {
        Url::parse_with_params(
            &self.config.authorize_url,
            &[
                ("client_id", self.config.client_id.as_str()),
                ("redirect_uri", self.config.redirect_uri.as_str()),
                ("scope", self.config.scope.as_str()),
                ("state", state),
            ],
        )
    }

    async fn exchange_code(&self, code: &str) -> Result<AccessToken, TokenExchangeError> {
        let form = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("code", code),
            ("redirect_uri", self.config.redirect_uri.as_str()),
        ];

        let response = self
            .http
            .post(&self.config.token_url)
            .header(ACCEPT, "application/json")
            .timeout(TOKEN_TIMEOUT)
            .form(&form)
            .send()
            .await
            .map_err(|e| TokenExchangeError::Transport(e.without_url().to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TokenExchangeError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: TokenResponse = response
            .json()
            .await
            .map_err(|e| TokenExchangeError::Transport(e.without_url().to_string()))?;

        if let Some(error) = body.error {
            return Err(TokenExchangeError::Rejected {
                error,
                description: body.error_description.unwrap_or_default(),
            });
        }

        body.access_token
            .filter(|t| !t.is_empty())
            .map(AccessToken::new)
            .ok_or(TokenExchangeError::MissingToken)
    }

    async fn fetch_profile(&self, token: &AccessToken) -> Result<ProviderProfile, FetchFailure> {
        let user: GithubUser = self.get_json(token, "/user").await?;
        let emails: Vec<GithubEmail> = self.get_json(token, "/user/emails").await?;

        tracing::debug!(login = %user.login, emails = emails.len(), "fetched GitHub profile");

        Ok(ProviderProfile {
            display_name: user
                .name
                .filter(|n| !n.trim().is_empty())
                .unwrap_or_else(|| user.login.clone()),
            username: user.login,
            email: primary_email(emails),
            avatar_url: user.avatar_url,
            profile_url: user.html_url,
        })
    }
}
