use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::extractors::{CurrentUser, MaybeUser, RowId};
use crate::feed::model::{NewComment, Pagination};
use crate::routes::{json_body, listing_json, query_params};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/emotions/{id}/comments", get(list).post(create))
        .route("/api/comments/{id}", delete(remove))
        .route("/api/comments/{id}/like", post(like))
}

pub async fn list(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    RowId(emotion_id): RowId,
    pagination: Result<Query<Pagination>, QueryRejection>,
) -> AppResult<Json<Value>> {
    let pagination = query_params(pagination)?;
    let listing = state
        .feed
        .list_comments(emotion_id, viewer.as_ref(), pagination)
        .await?;
    Ok(Json(listing_json("comments", listing)?))
}

pub async fn create(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    RowId(emotion_id): RowId,
    body: Result<Json<NewComment>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let input = json_body(body)?;
    let comment = state.feed.create_comment(emotion_id, &user, input).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Comment created", "comment": comment })),
    ))
}

pub async fn remove(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    RowId(id): RowId,
) -> AppResult<Json<Value>> {
    state.feed.delete_comment(id, &user).await?;
    Ok(Json(json!({ "message": "Comment deleted" })))
}

pub async fn like(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    RowId(id): RowId,
) -> AppResult<Json<Value>> {
    let outcome = state.feed.toggle_comment_like(id, &user).await?;
    Ok(Json(json!({
        "message": "Comment like updated",
        "action": outcome.action,
        "likes_count": outcome.count,
    })))
}
