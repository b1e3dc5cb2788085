use axum::extract::{Query, State};
use axum::response::{IntoResponse, Redirect, Response};
use axum::routing::{get, post};
use axum::Router;

use crate::auth::{CallbackParams, Session};
use crate::error::{AppError, AppResult};
use crate::state::AppState;

pub const LOGOUT_REDIRECT: &str = "/?logout=success";

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login/github", get(login))
        .route("/login/github/authorized", get(authorized))
        .route("/logout", post(logout))
}

/// Issue a state token and send the browser to the provider.
pub async fn login(State(state): State<AppState>, mut session: Session) -> AppResult<Response> {
    let url = state.auth.initiate(&mut session)?;
    let cookie = state.session_header(&session)?;
    Ok(([cookie], Redirect::to(url.as_str())).into_response())
}

/// Provider callback. The pending state token is spent whatever the outcome,
/// so the session cookie is rewritten on failure too.
pub async fn authorized(
    State(state): State<AppState>,
    mut session: Session,
    Query(params): Query<CallbackParams>,
) -> Response {
    let result = state.auth.complete(params, &mut session).await;
    let cookie = match state.session_header(&session) {
        Ok(cookie) => cookie,
        Err(e) => return e.into_response(),
    };
    match result {
        Ok(_) => ([cookie], Redirect::to("/")).into_response(),
        Err(e) => ([cookie], AppError::Auth(e)).into_response(),
    }
}

pub async fn logout(State(state): State<AppState>, mut session: Session) -> AppResult<Response> {
    state.auth.logout(&mut session);
    let cookie = state.session_header(&session)?;
    Ok(([cookie], Redirect::to(LOGOUT_REDIRECT)).into_response())
}
