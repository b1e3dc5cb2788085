use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

use crate::error::AppResult;
use crate::extractors::CurrentUser;
use crate::feed::model::Pagination;
use crate::routes::{listing_json, query_params};
use crate::state::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/user/profile", get(profile))
        .route("/api/user/stats", get(stats))
        .route("/api/user/collections", get(collections))
}

pub async fn profile(CurrentUser(user): CurrentUser) -> Json<Value> {
    Json(json!({ "user": user }))
}

pub async fn stats(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
) -> AppResult<Json<Value>> {
    let stats = state.feed.user_stats(&user).await?;
    Ok(Json(json!({ "stats": stats })))
}

pub async fn collections(
    State(state): State<AppState>,
    CurrentUser(user): CurrentUser,
    pagination: Result<Query<Pagination>, QueryRejection>,
) -> AppResult<Json<Value>> {
    let pagination = query_params(pagination)?;
    let listing = state.feed.collections(&user, pagination).await?;
    Ok(Json(listing_json("collections", listing)?))
}
