pub mod auth;
pub mod comments;
pub mod emotions;
pub mod pages;
pub mod user;

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::Query;
use axum::http::{header, HeaderValue, Method};
use axum::{Json, Router};
use serde::Serialize;
use serde_json::{Map, Value};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::config::CorsConfig;
use crate::error::{AppError, AppResult};
use crate::feed::Listing;
use crate::state::AppState;

/// The full application router.
pub fn router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.cors);
    Router::new()
        .merge(pages::router())
        .merge(auth::router())
        .merge(emotions::router())
        .merge(comments::router())
        .merge(user::router())
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn cors_layer(config: &CorsConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = config
        .origins
        .iter()
        .map(|o| o.trim())
        .filter(|o| !o.is_empty() && *o != "*")
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!("Ignoring invalid CORS origin: {}", o);
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .allow_credentials(true)
}

/// Unwrap a JSON body, reporting malformed input as a 400 envelope.
pub(crate) fn json_body<T>(body: Result<Json<T>, JsonRejection>) -> AppResult<T> {
    body.map(|Json(value)| value)
        .map_err(|e| AppError::Validation(e.body_text()))
}

pub(crate) fn query_params<T>(query: Result<Query<T>, QueryRejection>) -> AppResult<T> {
    query
        .map(|Query(value)| value)
        .map_err(|e| AppError::Validation(e.body_text()))
}

/// `{"<key>": [...], "page": .., "limit": .., "total": ..}`
pub(crate) fn listing_json<T: Serialize>(key: &str, listing: Listing<T>) -> AppResult<Value> {
    let total = listing.items.len();
    let items = serde_json::to_value(listing.items)
        .map_err(|e| AppError::Internal(format!("serialize {key}: {e}")))?;

    let mut body = Map::new();
    body.insert(key.to_string(), items);
    body.insert("page".into(), listing.page.into());
    body.insert("limit".into(), listing.limit.into());
    body.insert("total".into(), total.into());
    Ok(Value::Object(body))
}
