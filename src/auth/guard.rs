use axum::http::{header, HeaderMap};
use axum::response::{IntoResponse, Redirect, Response};
use chrono::{DateTime, Utc};

use crate::auth::session::{Session, SessionUser};
use crate::error::AppError;

/// Where unauthenticated page requests are sent.
pub const LOGIN_REQUIRED_REDIRECT: &str = "/?login_required=true";

/// Whether a request expects JSON or a rendered page.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestKind {
    Api,
    Page,
}

impl RequestKind {
    pub fn classify(path: &str, accept: Option<&str>) -> Self {
        let wants_json = accept.is_some_and(|a| a.trim_start().starts_with("application/json"));
        if path.starts_with("/api/") || wants_json {
            RequestKind::Api
        } else {
            RequestKind::Page
        }
    }

    pub fn from_parts(path: &str, headers: &HeaderMap) -> Self {
        let accept = headers.get(header::ACCEPT).and_then(|v| v.to_str().ok());
        Self::classify(path, accept)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenyReason {
    NotLoggedIn,
    Expired,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AuthDecision {
    Authorized(SessionUser),
    Denied(DenyReason),
}

pub fn require_authenticated(session: &Session, now: DateTime<Utc>) -> AuthDecision {
    if session.is_authenticated && session.is_expired(now) {
        return AuthDecision::Denied(DenyReason::Expired);
    }
    match session.authenticated_user(now) {
        Some(user) => AuthDecision::Authorized(user.clone()),
        None => AuthDecision::Denied(DenyReason::NotLoggedIn),
    }
}

/// Response for a denied request: JSON 401 for API callers, a redirect home
/// with a hint for pages.
pub fn denial_response(kind: RequestKind, reason: DenyReason) -> Response {
    tracing::debug!(?kind, ?reason, "request denied: not authenticated");
    match kind {
        RequestKind::Api => AppError::Unauthenticated.into_response(),
        RequestKind::Page => Redirect::to(LOGIN_REQUIRED_REDIRECT).into_response(),
    }
}
