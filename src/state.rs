use std::sync::Arc;

use axum::http::header::SET_COOKIE;
use axum::http::{HeaderName, HeaderValue};

use crate::auth::provider::OAuthProvider;
use crate::auth::session::{clear_session_cookie, session_cookie};
use crate::auth::{AuthFlow, Session, SessionKey};
use crate::config::Config;
use crate::error::{AppError, AppResult};
use crate::feed::FeedService;
use crate::store::StoreClients;

#[derive(Clone)]
pub struct AppState {
    pub config: Config,
    pub stores: StoreClients,
    pub auth: Arc<AuthFlow>,
    pub session_key: Arc<SessionKey>,
    pub feed: FeedService,
}

impl AppState {
    pub fn new(config: Config, stores: StoreClients, provider: Arc<dyn OAuthProvider>) -> Self {
        let ttl = chrono::Duration::days(config.auth.session_days);
        let auth = AuthFlow::new(provider, stores.service_arc(), config.github.clone(), ttl);
        Self::with_auth_flow(config, stores, auth)
    }

    /// Build state around a preconfigured auth flow (custom retry policy).
    pub fn with_auth_flow(config: Config, stores: StoreClients, auth: AuthFlow) -> Self {
        let session_key = SessionKey::new(config.auth.secret_key.as_bytes());
        let feed = FeedService::new(stores.clone(), config.limits.clone());
        Self {
            config,
            stores,
            auth: Arc::new(auth),
            session_key: Arc::new(session_key),
            feed,
        }
    }

    /// `Set-Cookie` header persisting `session`, or expiring the cookie when
    /// nothing is left in it.
    pub fn session_header(&self, session: &Session) -> AppResult<(HeaderName, HeaderValue)> {
        let name = &self.config.auth.cookie_name;
        let cookie = if session.is_empty() {
            clear_session_cookie(name)
        } else {
            let max_age = self.auth.session_ttl().num_seconds();
            session_cookie(name, &self.session_key.encode(session)?, max_age)
        };
        let value = HeaderValue::from_str(&cookie)
            .map_err(|e| AppError::Internal(format!("invalid cookie header: {e}")))?;
        Ok((SET_COOKIE, value))
    }
}
