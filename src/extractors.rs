use std::convert::Infallible;

use axum::extract::{FromRequestParts, Path};
use axum::http::request::Parts;
use axum::response::Response;
use chrono::Utc;

use crate::auth::guard::denial_response;
use crate::auth::session::get_cookie_value;
use crate::auth::{require_authenticated, AuthDecision, RequestKind, Session, SessionUser};
use crate::error::AppError;
use crate::state::AppState;

/// Decode the signed session cookie. A missing, tampered or unreadable
/// cookie yields an empty session.
fn read_session(parts: &Parts, state: &AppState) -> Session {
    let Some(value) = get_cookie_value(&parts.headers, &state.config.auth.cookie_name) else {
        return Session::default();
    };
    match state.session_key.decode(value) {
        Ok(session) => session,
        Err(e) => {
            tracing::debug!(error = %e, "discarding invalid session cookie");
            Session::default()
        }
    }
}

impl FromRequestParts<AppState> for Session {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        Ok(read_session(parts, state))
    }
}

/// The authenticated user of this request.
///
/// Rejects with a JSON 401 for API requests and a redirect to
/// `/?login_required=true` for pages.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub SessionUser);

impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session = read_session(parts, state);
        match require_authenticated(&session, Utc::now()) {
            AuthDecision::Authorized(user) => Ok(CurrentUser(user)),
            AuthDecision::Denied(reason) => {
                let kind = RequestKind::from_parts(parts.uri.path(), &parts.headers);
                Err(denial_response(kind, reason))
            }
        }
    }
}

/// Optional user extractor: `None` instead of a rejection when not
/// authenticated.
#[derive(Debug, Clone)]
pub struct MaybeUser(pub Option<SessionUser>);

impl FromRequestParts<AppState> for MaybeUser {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session = read_session(parts, state);
        match require_authenticated(&session, Utc::now()) {
            AuthDecision::Authorized(user) => Ok(MaybeUser(Some(user))),
            AuthDecision::Denied(_) => Ok(MaybeUser(None)),
        }
    }
}

/// Numeric `{id}` path segment. A malformed id is a 400 envelope rather
/// than axum's plain-text rejection.
#[derive(Debug, Clone, Copy)]
pub struct RowId(pub i64);

impl<S: Send + Sync> FromRequestParts<S> for RowId {
    type Rejection = AppError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Path::<i64>::from_request_parts(parts, state)
            .await
            .map(|Path(id)| RowId(id))
            .map_err(|e| AppError::Validation(e.body_text()))
    }
}
