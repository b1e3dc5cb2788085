mod common;

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use common::{
    fast_retry, github_config, profile, temp_store, FailingStore, MockProvider, CLIENT_SECRET,
};
use emoshare::auth::github::GithubProvider;
use emoshare::auth::provider::{AccessToken, FetchFailure, TokenExchangeError};
use emoshare::auth::retry::{fetch_profile_with_retry, ProfileFetchError};
use emoshare::auth::{AuthError, AuthFlow, CallbackParams, Session};
use emoshare::config::GithubConfig;
use emoshare::store::{Query, TableStore};
use emoshare::users::{self, User};

fn flow(provider: Arc<MockProvider>, store: Arc<dyn TableStore>) -> AuthFlow {
    AuthFlow::new(provider, store, github_config(), Duration::days(7)).with_retry_policy(fast_retry())
}

fn callback(state: &str) -> CallbackParams {
    CallbackParams {
        state: Some(state.to_string()),
        code: Some("auth-code".to_string()),
        ..CallbackParams::default()
    }
}

async fn user_count(store: &dyn TableStore) -> u64 {
    store.count(&Query::table(users::USERS)).await.unwrap()
}

async fn stored_user(store: &dyn TableStore, username: &str) -> User {
    let row = store
        .first(&Query::table(users::USERS).eq("username", username))
        .await
        .unwrap()
        .expect("user row");
    emoshare::store::decode(row).unwrap()
}

#[tokio::test]
async fn test_initiate_stores_state_in_session_and_url() {
    let (_dir, store) = temp_store();
    let flow = flow(Arc::new(MockProvider::new("octocat")), store);

    let mut session = Session::default();
    let url = flow.initiate(&mut session).unwrap();

    let state = session.oauth_state.clone().expect("pending state");
    assert_eq!(state.len(), 43);
    assert!(url
        .query_pairs()
        .any(|(k, v)| k == "state" && v == state.as_str()));

    let mut again = Session::default();
    flow.initiate(&mut again).unwrap();
    assert_ne!(again.oauth_state, session.oauth_state);
}

#[tokio::test]
async fn test_mismatched_state_creates_no_user_or_session() {
    let (_dir, store) = temp_store();
    let provider = Arc::new(MockProvider::new("octocat"));
    let flow = flow(provider.clone(), store.clone());

    let mut session = Session::default();
    flow.initiate(&mut session).unwrap();

    let err = flow
        .complete(callback("forged-state"), &mut session)
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidState));
    assert!(!session.is_authenticated);
    assert!(session.user.is_none());
    // the pending token is spent
    assert!(session.oauth_state.is_none());
    assert_eq!(provider.exchange_calls(), 0);
    assert_eq!(user_count(store.as_ref()).await, 0);
}

#[tokio::test]
async fn test_state_is_single_use() {
    let (_dir, store) = temp_store();
    let provider = Arc::new(MockProvider::new("octocat"));
    let flow = flow(provider.clone(), store.clone());

    let mut session = Session::default();
    flow.initiate(&mut session).unwrap();
    let state = session.oauth_state.clone().unwrap();

    // a failed attempt burns the token; replaying the right value fails too
    let _ = flow.complete(callback("wrong"), &mut session).await;
    let err = flow.complete(callback(&state), &mut session).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidState));

    let mut fresh = Session::default();
    let err = flow.complete(callback(&state), &mut fresh).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidState));

    let mut missing = Session::default();
    flow.initiate(&mut missing).unwrap();
    let params = CallbackParams {
        code: Some("auth-code".into()),
        ..CallbackParams::default()
    };
    let err = flow.complete(params, &mut missing).await.unwrap_err();
    assert!(matches!(err, AuthError::InvalidState));
    assert_eq!(provider.exchange_calls(), 0);
}

#[tokio::test]
async fn test_provider_error_and_missing_code() {
    let (_dir, store) = temp_store();
    let provider = Arc::new(MockProvider::new("octocat"));
    let flow = flow(provider.clone(), store);

    let mut session = Session::default();
    flow.initiate(&mut session).unwrap();
    let params = CallbackParams {
        state: session.oauth_state.clone(),
        error: Some("access_denied".into()),
        error_description: Some("The user has denied your application access.".into()),
        ..CallbackParams::default()
    };
    match flow.complete(params, &mut session).await.unwrap_err() {
        AuthError::ProviderDenied { error, description } => {
            assert_eq!(error, "access_denied");
            assert!(description.contains("denied"));
        }
        other => panic!("unexpected error: {other}"),
    }

    let mut session = Session::default();
    flow.initiate(&mut session).unwrap();
    let params = CallbackParams {
        state: session.oauth_state.clone(),
        ..CallbackParams::default()
    };
    let err = flow.complete(params, &mut session).await.unwrap_err();
    assert!(matches!(err, AuthError::MissingCode));
    assert_eq!(provider.exchange_calls(), 0);
}

#[tokio::test]
async fn test_unset_client_secret_makes_no_token_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "access_token": "x" })))
        .expect(0)
        .mount(&server)
        .await;

    for secret in ["", "   ", "your-github-client-secret"] {
        let config = GithubConfig {
            client_secret: secret.into(),
            token_url: format!("{}/login/oauth/access_token", server.uri()),
            api_base: server.uri(),
            ..github_config()
        };
        let provider = Arc::new(GithubProvider::new(config.clone()).unwrap());
        let (_dir, store) = temp_store();
        let flow = AuthFlow::new(provider, store, config, Duration::days(7));

        let mut session = Session::default();
        flow.initiate(&mut session).unwrap();
        let state = session.oauth_state.clone().unwrap();
        let err = flow.complete(callback(&state), &mut session).await.unwrap_err();
        assert!(matches!(err, AuthError::MisconfiguredClient(_)), "secret {secret:?}");
        assert_eq!(err.status(), 400);
    }
    // MockServer verifies `.expect(0)` on drop
}

#[tokio::test]
async fn test_repeated_logins_keep_one_user_with_increasing_updated_at() {
    let (_dir, store) = temp_store();
    let mut previous: Option<User> = None;

    for display_name in ["Octo", "The Octocat", "Octocat"] {
        let provider = Arc::new(
            MockProvider::new("octocat").with_profile(profile("octocat", display_name)),
        );
        let flow = flow(provider, store.clone());

        let mut session = Session::default();
        flow.initiate(&mut session).unwrap();
        let state = session.oauth_state.clone().unwrap();
        let user = flow.complete(callback(&state), &mut session).await.unwrap();
        assert_eq!(user.display_name, display_name);

        assert_eq!(user_count(store.as_ref()).await, 1);
        let stored = stored_user(store.as_ref(), "octocat").await;
        assert_eq!(stored.id, user.id);
        if let Some(prev) = &previous {
            assert_eq!(stored.id, prev.id);
            assert_eq!(stored.created_at, prev.created_at);
            assert!(stored.updated_at > prev.updated_at);
        }
        previous = Some(stored);
    }
}

#[tokio::test]
async fn test_successful_login_establishes_session() {
    let (_dir, store) = temp_store();
    let provider = Arc::new(MockProvider::new("octocat"));
    let flow = flow(provider.clone(), store);

    let mut session = Session::default();
    flow.initiate(&mut session).unwrap();
    let state = session.oauth_state.clone().unwrap();
    let user = flow.complete(callback(&state), &mut session).await.unwrap();

    assert!(session.is_authenticated);
    assert!(session.oauth_state.is_none());
    assert_eq!(session.user.as_ref(), Some(&user));
    assert_eq!(user.email.as_deref(), Some("octocat@example.com"));
    let expires = session.expires_at.unwrap();
    let expected = Utc::now() + Duration::days(7);
    assert!((expected - expires).num_seconds().abs() < 60);
    assert_eq!(provider.exchange_calls(), 1);
    assert_eq!(provider.profile_calls(), 1);
}

#[tokio::test]
async fn test_transient_profile_failures_are_retried() {
    let (_dir, store) = temp_store();
    let provider = Arc::new(MockProvider::new("octocat").failing_profile_with(vec![
        FetchFailure::Connect("connection reset".into()),
        FetchFailure::Timeout("timed out".into()),
    ]));
    let flow = flow(provider.clone(), store.clone());

    let mut session = Session::default();
    flow.initiate(&mut session).unwrap();
    let state = session.oauth_state.clone().unwrap();
    flow.complete(callback(&state), &mut session).await.unwrap();

    assert!(session.is_authenticated);
    assert_eq!(provider.profile_calls(), 3);
    assert_eq!(user_count(store.as_ref()).await, 1);
}

#[tokio::test]
async fn test_exhausted_or_fatal_profile_fetch_fails() {
    let (_dir, store) = temp_store();
    let provider = Arc::new(MockProvider::new("octocat").failing_profile_with(vec![
        FetchFailure::Connect("down".into()),
        FetchFailure::Connect("down".into()),
        FetchFailure::Connect("down".into()),
    ]));
    let flow = flow(provider.clone(), store.clone());

    let mut session = Session::default();
    flow.initiate(&mut session).unwrap();
    let state = session.oauth_state.clone().unwrap();
    let err = flow.complete(callback(&state), &mut session).await.unwrap_err();
    assert!(matches!(err, AuthError::ProviderRequestFailed(ref m) if m.contains("3 attempts")));
    assert_eq!(provider.profile_calls(), 3);

    let provider = Arc::new(MockProvider::new("octocat").failing_profile_with(vec![
        FetchFailure::Status {
            status: 401,
            body: "Bad credentials".into(),
        },
    ]));
    let flow = self::flow(provider.clone(), store.clone());
    let mut session = Session::default();
    flow.initiate(&mut session).unwrap();
    let state = session.oauth_state.clone().unwrap();
    let err = flow.complete(callback(&state), &mut session).await.unwrap_err();
    assert!(matches!(err, AuthError::ProviderRequestFailed(_)));
    assert_eq!(provider.profile_calls(), 1);

    assert!(!session.is_authenticated);
    assert_eq!(user_count(store.as_ref()).await, 0);
}

#[tokio::test]
async fn test_errors_never_echo_the_client_secret() {
    let (_dir, store) = temp_store();
    let provider = Arc::new(MockProvider::new("octocat").failing_exchange_with(
        TokenExchangeError::Status {
            status: 401,
            body: format!("client_secret={CLIENT_SECRET} is invalid"),
        },
    ));
    let flow = flow(provider, store);

    let mut session = Session::default();
    flow.initiate(&mut session).unwrap();
    let state = session.oauth_state.clone().unwrap();
    let err = flow.complete(callback(&state), &mut session).await.unwrap_err();

    assert!(matches!(err, AuthError::ProviderRequestFailed(_)));
    assert_eq!(err.status(), 400);
    let message = err.to_string();
    assert!(!message.contains(CLIENT_SECRET), "leaked: {message}");
    assert!(message.contains("[redacted]"));
}

#[tokio::test]
async fn test_logout_clears_everything() {
    let (_dir, store) = temp_store();
    let flow = flow(Arc::new(MockProvider::new("octocat")), store);

    let mut session = Session::default();
    flow.initiate(&mut session).unwrap();
    let state = session.oauth_state.clone().unwrap();
    flow.complete(callback(&state), &mut session).await.unwrap();
    assert!(session.is_authenticated);

    flow.logout(&mut session);
    assert!(session.is_empty());

    // logging out twice is harmless
    flow.logout(&mut session);
    assert!(session.is_empty());
}

#[tokio::test]
async fn test_full_github_flow_against_mock_server() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/login/oauth/access_token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": "gho_live",
            "token_type": "bearer",
            "scope": "user:email"
        })))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "login": "hubot",
            "name": "Hubot",
            "avatar_url": "https://avatars.example/hubot",
            "html_url": "https://github.com/hubot"
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/user/emails"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            { "email": "first@example.com", "primary": false },
            { "email": "hubot@example.com", "primary": true }
        ])))
        .mount(&server)
        .await;

    let config = GithubConfig {
        token_url: format!("{}/login/oauth/access_token", server.uri()),
        api_base: server.uri(),
        ..github_config()
    };
    let provider = Arc::new(GithubProvider::new(config.clone()).unwrap());
    let (_dir, store) = temp_store();
    let flow = AuthFlow::new(provider, store.clone(), config, Duration::days(7));

    let mut session = Session::default();
    let url = flow.initiate(&mut session).unwrap();
    assert_eq!(url.host_str(), Some("github.com"));
    let state = session.oauth_state.clone().unwrap();

    let user = flow.complete(callback(&state), &mut session).await.unwrap();
    assert_eq!(user.username, "hubot");
    assert_eq!(user.display_name, "Hubot");
    assert_eq!(user.email.as_deref(), Some("hubot@example.com"));
    assert_eq!(stored_user(store.as_ref(), "hubot").await.id, user.id);
}

#[tokio::test]
async fn test_store_failure_during_callback_leaves_no_session() {
    let provider = Arc::new(MockProvider::new("octocat"));
    let flow = flow(provider.clone(), Arc::new(FailingStore));

    let mut session = Session::default();
    flow.initiate(&mut session).unwrap();
    let state = session.oauth_state.clone().unwrap();

    let err = flow.complete(callback(&state), &mut session).await.unwrap_err();
    assert!(matches!(err, AuthError::UserPersistError(_)), "{err:?}");
    assert_eq!(err.status().as_u16(), 500);
    assert!(err.to_string().contains("503"));
    assert!(!session.is_authenticated);
    assert!(session.user.is_none());
    assert!(session.oauth_state.is_none());
    assert_eq!(provider.profile_calls(), 1);
}

fn github_at(api_base: String) -> GithubProvider {
    let config = GithubConfig {
        api_base,
        ..github_config()
    };
    GithubProvider::new(config).unwrap()
}

#[tokio::test]
async fn test_refused_connections_are_retried_until_exhausted() {
    // grab a free port, then close it so nothing is listening
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let provider = github_at(format!("http://{addr}"));
    let err = fetch_profile_with_retry(&provider, &AccessToken::new("gho_x"), &fast_retry())
        .await
        .unwrap_err();
    match err {
        ProfileFetchError::Exhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(last, FetchFailure::Connect(_)), "{last:?}");
        }
        other => panic!("expected exhausted retries, got {other:?}"),
    }
}

#[tokio::test]
async fn test_slow_profile_endpoint_times_out_and_is_retried() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/user"))
        .respond_with(
            ResponseTemplate::new(200)
                .set_body_json(json!({ "login": "slowpoke" }))
                .set_delay(std::time::Duration::from_millis(500)),
        )
        .expect(3)
        .mount(&server)
        .await;

    let provider = github_at(server.uri()).with_api_timeout(std::time::Duration::from_millis(50));
    let err = fetch_profile_with_retry(&provider, &AccessToken::new("gho_x"), &fast_retry())
        .await
        .unwrap_err();
    match err {
        ProfileFetchError::Exhausted { attempts, last } => {
            assert_eq!(attempts, 3);
            assert!(matches!(last, FetchFailure::Timeout(_)), "{last:?}");
        }
        other => panic!("expected exhausted retries, got {other:?}"),
    }
}

#[tokio::test]
async fn test_http_error_statuses_are_not_retried() {
    for code in [401u16, 503] {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .respond_with(ResponseTemplate::new(code).set_body_string("nope"))
            .expect(1)
            .mount(&server)
            .await;

        let provider = github_at(server.uri());
        let err = fetch_profile_with_retry(&provider, &AccessToken::new("gho_x"), &fast_retry())
            .await
            .unwrap_err();
        match err {
            ProfileFetchError::NonRetryable { attempt, failure } => {
                assert_eq!(attempt, 1);
                assert!(
                    matches!(failure, FetchFailure::Status { status, .. } if status == code),
                    "{failure:?}"
                );
            }
            other => panic!("expected a non-retryable failure, got {other:?}"),
        }
        server.verify().await;
    }
}
