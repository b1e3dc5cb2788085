//! The OAuth login handshake.
//!
//! A callback moves through `Pending → StateValidated → TokenExchanged →
//! ProfileFetched → UserUpserted → SessionEstablished`. Every step fails
//! terminally with its own [`AuthError`]; only the profile fetch retries.

use std::sync::Arc;

use axum::http::StatusCode;
use chrono::{Duration, Utc};
use serde::Deserialize;
use subtle::ConstantTimeEq;
use thiserror::Error;
use url::Url;

use crate::auth::provider::OAuthProvider;
use crate::auth::retry::{fetch_profile_with_retry, RetryPolicy};
use crate::auth::session::{generate_state_token, Session, SessionUser};
use crate::config::GithubConfig;
use crate::store::TableStore;
use crate::users;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("invalid state parameter, possible CSRF attempt")]
    InvalidState,

    #[error("authorization denied by provider: {error} - {description}")]
    ProviderDenied { error: String, description: String },

    #[error("authorization failed: no code received")]
    MissingCode,

    #[error("OAuth client misconfigured: {0}")]
    MisconfiguredClient(&'static str),

    #[error("provider request failed: {0}")]
    ProviderRequestFailed(String),

    #[error("failed to persist user: {0}")]
    UserPersistError(String),

    #[error("authentication failed: {0}")]
    Internal(String),
}

impl AuthError {
    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::UserPersistError(_) | AuthError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            _ => StatusCode::BAD_REQUEST,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStage {
    Pending,
    StateValidated,
    TokenExchanged,
    ProfileFetched,
    UserUpserted,
    SessionEstablished,
}

/// Query parameters the provider appends to the callback URL.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub state: Option<String>,
    pub code: Option<String>,
    pub error: Option<String>,
    pub error_description: Option<String>,
}

pub struct AuthFlow {
    provider: Arc<dyn OAuthProvider>,
    store: Arc<dyn TableStore>,
    client: GithubConfig,
    retry: RetryPolicy,
    session_ttl: Duration,
}

/// Constant-time comparison of the returned state with the issued one.
fn verify_state(received: Option<&str>, expected: Option<&str>) -> Result<(), AuthError> {
    match (received, expected) {
        (Some(received), Some(expected))
            if !expected.is_empty()
                && bool::from(received.as_bytes().ct_eq(expected.as_bytes())) =>
        {
            Ok(())
        }
        _ => Err(AuthError::InvalidState),
    }
}

impl AuthFlow {
    pub fn new(
        provider: Arc<dyn OAuthProvider>,
        store: Arc<dyn TableStore>,
        client: GithubConfig,
        session_ttl: Duration,
    ) -> Self {
        Self {
            provider,
            store,
            client,
            retry: RetryPolicy::default(),
            session_ttl,
        }
    }

    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn session_ttl(&self) -> Duration {
        self.session_ttl
    }

    /// Scrub the client secret out of any text headed for a response or log.
    fn redact(&self, message: String) -> String {
        let secret = self.client.client_secret.trim();
        if secret.is_empty() {
            message
        } else {
            message.replace(secret, "[redacted]")
        }
    }

    /// Start a login: issue a state token into the session and return the
    /// provider URL to redirect to.
    pub fn initiate(&self, session: &mut Session) -> Result<Url, AuthError> {
        let state = generate_state_token();
        let url = self
            .provider
            .authorize_url(&state)
            .map_err(|e| AuthError::Internal(format!("invalid authorize URL: {e}")))?;
        session.oauth_state = Some(state);
        tracing::debug!(stage = ?AuthStage::Pending, "issued OAuth state");
        Ok(url)
    }

    /// Finish a login from the provider callback. On success `session` is
    /// replaced with an authenticated one.
    pub async fn complete(
        &self,
        params: CallbackParams,
        session: &mut Session,
    ) -> Result<SessionUser, AuthError> {
        let expected = session.take_oauth_state();
        if let Err(e) = verify_state(params.state.as_deref(), expected.as_deref()) {
            tracing::warn!(had_pending = expected.is_some(), "OAuth state validation failed");
            return Err(e);
        }
        tracing::debug!(stage = ?AuthStage::StateValidated, "OAuth state validated");

        self.finish(params, session).await.map_err(|e| {
            let e = match e {
                AuthError::Internal(msg) => AuthError::Internal(self.redact(msg)),
                AuthError::ProviderRequestFailed(msg) => {
                    AuthError::ProviderRequestFailed(self.redact(msg))
                }
                AuthError::UserPersistError(msg) => AuthError::UserPersistError(self.redact(msg)),
                other => other,
            };
            tracing::warn!(error = %e, "OAuth callback failed");
            e
        })
    }

    async fn finish(
        &self,
        params: CallbackParams,
        session: &mut Session,
    ) -> Result<SessionUser, AuthError> {
        if let Some(error) = params.error {
            return Err(AuthError::ProviderDenied {
                error,
                description: params.error_description.unwrap_or_default(),
            });
        }

        let code = params
            .code
            .filter(|c| !c.is_empty())
            .ok_or(AuthError::MissingCode)?;

        self.client
            .check_configured()
            .map_err(AuthError::MisconfiguredClient)?;

        let token = self
            .provider
            .exchange_code(&code)
            .await
            .map_err(|e| AuthError::ProviderRequestFailed(format!("token exchange: {e}")))?;
        tracing::debug!(stage = ?AuthStage::TokenExchanged, "exchanged authorization code");

        let profile = fetch_profile_with_retry(self.provider.as_ref(), &token, &self.retry)
            .await
            .map_err(|e| AuthError::ProviderRequestFailed(e.to_string()))?;
        tracing::debug!(stage = ?AuthStage::ProfileFetched, username = %profile.username, "fetched profile");

        let user = users::upsert_from_profile(self.store.as_ref(), &profile)
            .await
            .map_err(|e| AuthError::UserPersistError(e.to_string()))?;
        tracing::debug!(stage = ?AuthStage::UserUpserted, user_id = user.id, "user upserted");

        let session_user = SessionUser {
            id: user.id,
            display_name: user.display_name().to_string(),
            username: user.username,
            avatar_url: profile.avatar_url.or(user.avatar_url),
            email: profile.email,
        };
        *session = Session::establish(session_user.clone(), self.session_ttl, Utc::now());
        tracing::info!(
            stage = ?AuthStage::SessionEstablished,
            user_id = session_user.id,
            username = %session_user.username,
            "login complete"
        );

        Ok(session_user)
    }

    /// Drop everything in the session.
    pub fn logout(&self, session: &mut Session) {
        if let Some(user) = &session.user {
            tracing::info!(user_id = user.id, "logout");
        }
        session.clear();
    }
}
