//! Bounded retry with exponential backoff for provider profile fetches.

use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::auth::provider::{AccessToken, FetchFailure, OAuthProvider, ProviderProfile};

const DEFAULT_MAX_ATTEMPTS: u32 = 3;
const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_secs(1);
const DEFAULT_BACKOFF_MULTIPLIER: u32 = 2;

#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub multiplier: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            multiplier: DEFAULT_BACKOFF_MULTIPLIER,
        }
    }
}

impl RetryPolicy {
    pub fn with_initial_backoff(mut self, backoff: Duration) -> Self {
        self.initial_backoff = backoff;
        self
    }

    /// Delay before retry number `retry` (0 for the first retry).
    pub fn backoff(&self, retry: u32) -> Duration {
        self.initial_backoff
            .saturating_mul(self.multiplier.saturating_pow(retry))
    }
}

#[derive(Debug, Error)]
pub enum ProfileFetchError {
    #[error("profile request failed on attempt {attempt}: {failure}")]
    NonRetryable { attempt: u32, failure: FetchFailure },

    #[error("profile request failed after {attempts} attempts: {last}")]
    Exhausted { attempts: u32, last: FetchFailure },
}

/// Fetch the provider profile, retrying connection and timeout failures.
pub async fn fetch_profile_with_retry(
    provider: &dyn OAuthProvider,
    token: &AccessToken,
    policy: &RetryPolicy,
) -> Result<ProviderProfile, ProfileFetchError> {
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        tracing::debug!(attempt, "fetching provider profile");
        let failure = match provider.fetch_profile(token).await {
            Ok(profile) => return Ok(profile),
            Err(failure) => failure,
        };

        if !failure.is_retryable() {
            return Err(ProfileFetchError::NonRetryable { attempt, failure });
        }
        if attempt >= max_attempts {
            return Err(ProfileFetchError::Exhausted {
                attempts: attempt,
                last: failure,
            });
        }

        let delay = policy.backoff(attempt - 1);
        warn!(attempt, ?delay, error = %failure, "profile fetch failed, retrying");
        tokio::time::sleep(delay).await;
        attempt += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::provider::TokenExchangeError;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use url::Url;

    struct Scripted {
        outcomes: Mutex<VecDeque<Result<ProviderProfile, FetchFailure>>>,
        calls: Mutex<u32>,
    }

    impl Scripted {
        fn new(outcomes: Vec<Result<ProviderProfile, FetchFailure>>) -> Self {
            Self {
                outcomes: Mutex::new(outcomes.into()),
                calls: Mutex::new(0),
            }
        }

        fn calls(&self) -> u32 {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl OAuthProvider for Scripted {
        fn authorize_url(&self, _state: &str) -> Result<Url, url::ParseError> {
            Url::parse("https://provider.example/authorize")
        }

        async fn exchange_code(&self, _code: &str) -> Result<AccessToken, TokenExchangeError> {
            Ok(AccessToken::new("token"))
        }

        async fn fetch_profile(&self, _token: &AccessToken) -> Result<ProviderProfile, FetchFailure> {
            *self.calls.lock().unwrap() += 1;
            self.outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(FetchFailure::Other("script exhausted".into())))
        }
    }

    fn profile() -> ProviderProfile {
        ProviderProfile {
            username: "octocat".into(),
            display_name: "The Octocat".into(),
            email: None,
            avatar_url: None,
            profile_url: None,
        }
    }

    fn fast() -> RetryPolicy {
        RetryPolicy::default().with_initial_backoff(Duration::from_millis(1))
    }

    #[test]
    fn backoff_doubles_from_one_second() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(0), Duration::from_secs(1));
        assert_eq!(policy.backoff(1), Duration::from_secs(2));
        assert_eq!(policy.backoff(2), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn transient_failures_are_retried_transparently() {
        let provider = Scripted::new(vec![
            Err(FetchFailure::Connect("reset".into())),
            Err(FetchFailure::Timeout("slow".into())),
            Ok(profile()),
        ]);
        let result = fetch_profile_with_retry(&provider, &AccessToken::new("t"), &fast()).await;
        assert_eq!(result.unwrap().username, "octocat");
        assert_eq!(provider.calls(), 3);
    }

    #[tokio::test]
    async fn http_errors_fail_without_retry() {
        let provider = Scripted::new(vec![
            Err(FetchFailure::Status {
                status: 401,
                body: "Bad credentials".into(),
            }),
            Ok(profile()),
        ]);
        let err = fetch_profile_with_retry(&provider, &AccessToken::new("t"), &fast())
            .await
            .unwrap_err();
        assert!(matches!(err, ProfileFetchError::NonRetryable { attempt: 1, .. }));
        assert_eq!(provider.calls(), 1);
    }

    #[tokio::test]
    async fn gives_up_after_max_attempts() {
        let provider = Scripted::new(vec![
            Err(FetchFailure::Connect("down".into())),
            Err(FetchFailure::Connect("down".into())),
            Err(FetchFailure::Connect("down".into())),
            Ok(profile()),
        ]);
        let err = fetch_profile_with_retry(&provider, &AccessToken::new("t"), &fast())
            .await
            .unwrap_err();
        assert!(matches!(err, ProfileFetchError::Exhausted { attempts: 3, .. }));
        assert_eq!(provider.calls(), 3);
    }
}
