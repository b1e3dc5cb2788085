#![allow(dead_code)]

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tempfile::TempDir;
use url::Url;

use emoshare::auth::provider::{
    AccessToken, FetchFailure, OAuthProvider, ProviderProfile, TokenExchangeError,
};
use emoshare::auth::retry::RetryPolicy;
use emoshare::config::GithubConfig;
use emoshare::store::{Query, Row, SqliteStore, StoreError, TableStore};

pub const CLIENT_SECRET: &str = "gh-secret-0123456789";

/// Scripted provider that records how often each endpoint was hit.
pub struct MockProvider {
    pub profile: ProviderProfile,
    profile_failures: Mutex<VecDeque<FetchFailure>>,
    exchange_error: Mutex<Option<TokenExchangeError>>,
    pub exchange_calls: AtomicU32,
    pub profile_calls: AtomicU32,
}

impl MockProvider {
    pub fn new(username: &str) -> Self {
        Self {
            profile: profile(username, username),
            profile_failures: Mutex::new(VecDeque::new()),
            exchange_error: Mutex::new(None),
            exchange_calls: AtomicU32::new(0),
            profile_calls: AtomicU32::new(0),
        }
    }

    pub fn with_profile(mut self, profile: ProviderProfile) -> Self {
        self.profile = profile;
        self
    }

    /// Fail the next profile fetches with these errors, in order.
    pub fn failing_profile_with(self, failures: Vec<FetchFailure>) -> Self {
        *self.profile_failures.lock().unwrap() = failures.into();
        self
    }

    pub fn failing_exchange_with(self, error: TokenExchangeError) -> Self {
        *self.exchange_error.lock().unwrap() = Some(error);
        self
    }

    pub fn exchange_calls(&self) -> u32 {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn profile_calls(&self) -> u32 {
        self.profile_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl OAuthProvider for MockProvider {
    fn authorize_url(&self, state: &str) -> Result<Url, url::ParseError> {
        Url::parse_with_params(
            "https://github.example/login/oauth/authorize",
            &[("client_id", "client-123"), ("state", state)],
        )
    }

    async fn exchange_code(&self, _code: &str) -> Result<AccessToken, TokenExchangeError> {
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.exchange_error.lock().unwrap().take();
        match scripted {
            Some(e) => Err(e),
            None => Ok(AccessToken::new("gho_mock")),
        }
    }

    async fn fetch_profile(&self, _token: &AccessToken) -> Result<ProviderProfile, FetchFailure> {
        self.profile_calls.fetch_add(1, Ordering::SeqCst);
        let scripted = self.profile_failures.lock().unwrap().pop_front();
        match scripted {
            Some(failure) => Err(failure),
            None => Ok(self.profile.clone()),
        }
    }
}

pub fn profile(username: &str, display_name: &str) -> ProviderProfile {
    ProviderProfile {
        username: username.to_string(),
        display_name: display_name.to_string(),
        email: Some(format!("{username}@example.com")),
        avatar_url: Some(format!("https://avatars.example/{username}")),
        profile_url: None,
    }
}

pub fn github_config() -> GithubConfig {
    GithubConfig {
        client_id: "client-123".into(),
        client_secret: CLIENT_SECRET.into(),
        redirect_uri: "http://localhost:5000/login/github/authorized".into(),
        ..GithubConfig::default()
    }
}

pub fn fast_retry() -> RetryPolicy {
    RetryPolicy::default().with_initial_backoff(Duration::from_millis(1))
}

/// A file-backed store in a temporary directory.
pub fn temp_store() -> (TempDir, Arc<dyn TableStore>) {
    let temp_dir = TempDir::new().unwrap();
    let store = SqliteStore::open(&temp_dir.path().join("test.db"))
        .expect("Failed to create test database");
    (temp_dir, Arc::new(store))
}

/// A store whose every call fails the way an unreachable backend would.
pub struct FailingStore;

impl FailingStore {
    fn unavailable() -> StoreError {
        StoreError::Status {
            status: 503,
            body: "store unavailable".into(),
        }
    }
}

#[async_trait]
impl TableStore for FailingStore {
    async fn select(&self, _query: &Query) -> Result<Vec<Row>, StoreError> {
        Err(Self::unavailable())
    }

    async fn count(&self, _query: &Query) -> Result<u64, StoreError> {
        Err(Self::unavailable())
    }

    async fn insert(&self, _table: &str, _row: Row) -> Result<Row, StoreError> {
        Err(Self::unavailable())
    }

    async fn update(&self, _query: &Query, _changes: Row) -> Result<Vec<Row>, StoreError> {
        Err(Self::unavailable())
    }

    async fn delete(&self, _query: &Query) -> Result<u64, StoreError> {
        Err(Self::unavailable())
    }
}
