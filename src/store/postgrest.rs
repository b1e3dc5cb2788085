use async_trait::async_trait;
use reqwest::header::{HeaderValue, CONTENT_RANGE};
use reqwest::{Client, RequestBuilder, Response};
use serde_json::Value;
use std::time::Duration;
use url::Url;

use super::query::{Direction, Filter, Query, Row};
use super::{StoreError, TableStore};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(15);

/// Client for a PostgREST endpoint (`<base>/rest/v1/<table>`).
///
/// The API key is sent both as `apikey` and as a bearer token, which is what
/// hosted Supabase projects expect.
pub struct PostgrestStore {
    http: Client,
    base: Url,
    key: String,
}

impl PostgrestStore {
    pub fn new(base_url: &str, key: &str) -> Result<Self, StoreError> {
        let mut base = Url::parse(base_url)?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let base = base.join("rest/v1/")?;
        let http = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http,
            base,
            key: key.to_string(),
        })
    }

    fn endpoint(&self, table: &str) -> Result<Url, StoreError> {
        Ok(self.base.join(table)?)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request.header("apikey", &self.key).bearer_auth(&self.key)
    }

    async fn rows(response: Response) -> Result<Vec<Row>, StoreError> {
        let response = Self::checked(response).await?;
        Ok(response.json::<Vec<Row>>().await?)
    }

    async fn checked(response: Response) -> Result<Response, StoreError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        Err(StoreError::Status {
            status: status.as_u16(),
            body,
        })
    }
}

fn render(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn render_list_item(value: &Value) -> String {
    match value {
        Value::String(s) => format!("\"{}\"", s.replace('"', "\\\"")),
        other => other.to_string(),
    }
}

/// Query-string pairs for filters only (used by update/delete/count).
pub fn filter_params(filters: &[Filter]) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|filter| match filter {
            Filter::Eq(column, Value::Null) => (column.clone(), "is.null".to_string()),
            Filter::Eq(column, value) => (column.clone(), format!("eq.{}", render(value))),
            Filter::Gte(column, value) => (column.clone(), format!("gte.{}", render(value))),
            Filter::In(column, values) => {
                let items: Vec<String> = values.iter().map(render_list_item).collect();
                (column.clone(), format!("in.({})", items.join(",")))
            }
        })
        .collect()
}

/// Full query-string for a select.
pub fn select_params(query: &Query) -> Vec<(String, String)> {
    let projection = if query.columns.is_empty() {
        "*".to_string()
    } else {
        query.columns.join(",")
    };
    let mut params = vec![("select".to_string(), projection)];
    params.extend(filter_params(&query.filters));
    if let Some(order) = &query.order {
        let dir = match order.direction {
            Direction::Asc => "asc",
            Direction::Desc => "desc",
        };
        params.push(("order".to_string(), format!("{}.{dir}", order.column)));
    }
    if let Some(range) = query.range {
        params.push(("offset".to_string(), range.offset.to_string()));
        params.push(("limit".to_string(), range.limit.to_string()));
    }
    params
}

/// Total from a `Content-Range` header such as `0-24/3573` or `*/42`.
pub fn parse_content_range(header: &str) -> Option<u64> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}

#[async_trait]
impl TableStore for PostgrestStore {
    async fn select(&self, query: &Query) -> Result<Vec<Row>, StoreError> {
        let request = self
            .http
            .get(self.endpoint(&query.table)?)
            .query(&select_params(query));
        let response = self.authorized(request).send().await?;
        Self::rows(response).await
    }

    async fn count(&self, query: &Query) -> Result<u64, StoreError> {
        let mut params = vec![("select".to_string(), "id".to_string())];
        params.extend(filter_params(&query.filters));
        let request = self
            .http
            .head(self.endpoint(&query.table)?)
            .query(&params)
            .header("Prefer", "count=exact");
        let response = Self::checked(self.authorized(request).send().await?).await?;
        response
            .headers()
            .get(CONTENT_RANGE)
            .and_then(|v: &HeaderValue| v.to_str().ok())
            .and_then(parse_content_range)
            .ok_or_else(|| StoreError::EmptyResult(format!("count of {}", query.table)))
    }

    async fn insert(&self, table: &str, row: Row) -> Result<Row, StoreError> {
        let request = self
            .http
            .post(self.endpoint(table)?)
            .header("Prefer", "return=representation")
            .json(&[Value::Object(row)]);
        let response = self.authorized(request).send().await?;
        Self::rows(response)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StoreError::EmptyResult(format!("insert into {table}")))
    }

    async fn update(&self, query: &Query, changes: Row) -> Result<Vec<Row>, StoreError> {
        let request = self
            .http
            .patch(self.endpoint(&query.table)?)
            .query(&filter_params(&query.filters))
            .header("Prefer", "return=representation")
            .json(&Value::Object(changes));
        let response = self.authorized(request).send().await?;
        Self::rows(response).await
    }

    async fn delete(&self, query: &Query) -> Result<u64, StoreError> {
        let request = self
            .http
            .delete(self.endpoint(&query.table)?)
            .query(&filter_params(&query.filters))
            .header("Prefer", "return=representation");
        let response = self.authorized(request).send().await?;
        Ok(Self::rows(response).await?.len() as u64)
    }
}
