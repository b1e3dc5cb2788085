use std::fmt;

use async_trait::async_trait;
use thiserror::Error;
use url::Url;

/// Access token issued by the provider. Never printed.
#[derive(Clone)]
pub struct AccessToken(String);

impl AccessToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn secret(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for AccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("AccessToken(<redacted>)")
    }
}

/// Profile data returned by the provider for the authenticated account.
#[derive(Debug, Clone, PartialEq)]
pub struct ProviderProfile {
    pub username: String,
    pub display_name: String,
    pub email: Option<String>,
    pub avatar_url: Option<String>,
    pub profile_url: Option<String>,
}

/// Why a single profile request failed.
#[derive(Debug, Error)]
pub enum FetchFailure {
    #[error("connection failed: {0}")]
    Connect(String),

    #[error("request timed out: {0}")]
    Timeout(String),

    #[error("provider returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("could not decode provider response: {0}")]
    Decode(String),

    #[error("request failed: {0}")]
    Other(String),
}

impl FetchFailure {
    /// Only transport-level failures are worth another attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(self, FetchFailure::Connect(_) | FetchFailure::Timeout(_))
    }
}

impl From<reqwest::Error> for FetchFailure {
    fn from(e: reqwest::Error) -> Self {
        // reqwest errors can carry the request URL; drop it
        let e = e.without_url();
        if e.is_timeout() {
            FetchFailure::Timeout(e.to_string())
        } else if e.is_connect() {
            FetchFailure::Connect(e.to_string())
        } else if e.is_decode() {
            FetchFailure::Decode(e.to_string())
        } else if let Some(status) = e.status() {
            FetchFailure::Status {
                status: status.as_u16(),
                body: e.to_string(),
            }
        } else {
            FetchFailure::Other(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum TokenExchangeError {
    #[error("token request failed: {0}")]
    Transport(String),

    #[error("token endpoint returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("provider rejected the code: {error} {description}")]
    Rejected { error: String, description: String },

    #[error("no access token in provider response")]
    MissingToken,
}

/// The third-party identity provider, from this application's side.
#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Authorization URL the browser is sent to, carrying `state`.
    fn authorize_url(&self, state: &str) -> Result<Url, url::ParseError>;

    /// Server-to-server exchange of an authorization code for an access token.
    async fn exchange_code(&self, code: &str) -> Result<AccessToken, TokenExchangeError>;

    /// One attempt at fetching the account profile and primary email.
    async fn fetch_profile(&self, token: &AccessToken) -> Result<ProviderProfile, FetchFailure>;
}
