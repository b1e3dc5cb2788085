use askama::Template;
use axum::extract::{Query, State};
use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use serde::Deserialize;

use crate::auth::SessionUser;
use crate::extractors::{CurrentUser, MaybeUser, RowId};
use crate::feed::EmotionType;
use crate::state::AppState;

/// Wrapper to render askama templates as axum responses
pub struct Html<T: Template>(pub T);

impl<T: Template> IntoResponse for Html<T> {
    fn into_response(self) -> Response {
        match self.0.render() {
            Ok(body) => (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "text/html; charset=utf-8")],
                body,
            )
                .into_response(),
            Err(e) => {
                tracing::error!("Template render error: {}", e);
                (StatusCode::INTERNAL_SERVER_ERROR, "Template error").into_response()
            }
        }
    }
}

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/profile", get(profile))
        .route("/add_emotion", get(add_emotion))
        .route("/emotion/{id}", get(emotion_detail))
}

#[derive(Debug, Default, Deserialize)]
pub struct IndexParams {
    pub login_required: Option<String>,
    pub logout: Option<String>,
}

#[derive(Template)]
#[template(path = "pages/index.html")]
pub struct IndexTemplate {
    pub user: Option<SessionUser>,
    pub login_required: bool,
    pub logged_out: bool,
}

#[derive(Template)]
#[template(path = "pages/profile.html")]
pub struct ProfileTemplate {
    pub user: SessionUser,
}

#[derive(Template)]
#[template(path = "pages/add_emotion.html")]
pub struct AddEmotionTemplate {
    pub user: SessionUser,
    pub emotion_types: Vec<(&'static str, &'static str)>,
    pub max_length: usize,
}

#[derive(Template)]
#[template(path = "pages/emotion_detail.html")]
pub struct EmotionDetailTemplate {
    pub user: Option<SessionUser>,
    pub emotion_id: i64,
}

pub async fn index(
    MaybeUser(user): MaybeUser,
    Query(params): Query<IndexParams>,
) -> Html<IndexTemplate> {
    Html(IndexTemplate {
        user,
        login_required: params.login_required.is_some(),
        logged_out: params.logout.as_deref() == Some("success"),
    })
}

pub async fn profile(CurrentUser(user): CurrentUser) -> Html<ProfileTemplate> {
    Html(ProfileTemplate { user })
}

pub async fn add_emotion(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> Html<AddEmotionTemplate> {
    Html(AddEmotionTemplate {
        user,
        emotion_types: EmotionType::ALL
            .iter()
            .map(|t| (t.as_str(), t.label()))
            .collect(),
        max_length: state.feed.limits().max_emotion_length,
    })
}

pub async fn emotion_detail(
    MaybeUser(user): MaybeUser,
    RowId(emotion_id): RowId,
) -> Html<EmotionDetailTemplate> {
    Html(EmotionDetailTemplate { user, emotion_id })
}
