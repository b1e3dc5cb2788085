use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Map, Value};

use crate::error::AppResult;
use crate::extractors::{CurrentUser, MaybeUser, RowId};
use crate::feed::model::{EmotionUpdate, ListParams, NewEmotion};
use crate::feed::EmotionType;
use crate::routes::{json_body, listing_json, query_params};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/emotions", get(list).post(create))
        .route("/api/emotions/{id}", get(detail).put(update).delete(remove))
        .route("/api/emotions/{id}/like", post(like))
        .route("/api/emotions/{id}/collect", post(collect))
        .route("/api/emotion-types", get(emotion_types))
}

pub async fn list(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    params: Result<Query<ListParams>, QueryRejection>,
) -> AppResult<Json<Value>> {
    let params = query_params(params)?;
    let listing = state.feed.list_emotions(&params, viewer.as_ref()).await?;
    Ok(Json(listing_json("emotions", listing)?))
}

pub async fn create(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    body: Result<Json<NewEmotion>, JsonRejection>,
) -> AppResult<(StatusCode, Json<Value>)> {
    let input = json_body(body)?;
    let emotion = state.feed.create_emotion(&user, input).await?;
    Ok((
        StatusCode::CREATED,
        Json(json!({ "message": "Emotion created", "emotion": emotion })),
    ))
}

pub async fn detail(
    State(state): State<AppState>,
    MaybeUser(viewer): MaybeUser,
    RowId(id): RowId,
) -> AppResult<Json<Value>> {
    let emotion = state.feed.get_emotion(id, viewer.as_ref()).await?;
    Ok(Json(json!({ "emotion": emotion })))
}

pub async fn update(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    RowId(id): RowId,
    body: Result<Json<EmotionUpdate>, JsonRejection>,
) -> AppResult<Json<Value>> {
    let changes = json_body(body)?;
    let emotion = state.feed.update_emotion(id, &user, changes).await?;
    Ok(Json(json!({ "message": "Emotion updated", "emotion": emotion })))
}

pub async fn remove(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    RowId(id): RowId,
) -> AppResult<Json<Value>> {
    state.feed.delete_emotion(id, &user).await?;
    Ok(Json(json!({ "message": "Emotion deleted" })))
}

pub async fn like(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    RowId(id): RowId,
) -> AppResult<Json<Value>> {
    let outcome = state.feed.toggle_like(id, &user).await?;
    Ok(Json(json!({
        "message": "Like updated",
        "action": outcome.action,
        "likes_count": outcome.count,
    })))
}

pub async fn collect(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    RowId(id): RowId,
) -> AppResult<Json<Value>> {
    let outcome = state.feed.toggle_collection(id, &user).await?;
    Ok(Json(json!({
        "message": "Collection updated",
        "action": outcome.action,
        "collections_count": outcome.count,
    })))
}

pub async fn emotion_types() -> Json<Value> {
    let types: Map<String, Value> = EmotionType::ALL
        .iter()
        .map(|t| (t.as_str().to_string(), Value::from(t.label())))
        .collect();
    Json(json!({ "emotion_types": types }))
}
