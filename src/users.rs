//! Local user records, keyed by the provider username.

use std::collections::HashMap;

use chrono::{DateTime, Duration, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::auth::provider::ProviderProfile;
use crate::store::{decode, Query, Row, StoreError, TableStore};

pub const USERS: &str = "users";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl User {
    pub fn display_name(&self) -> &str {
        self.display_name.as_deref().unwrap_or(&self.username)
    }
}

/// Author data embedded in feed items.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthorSummary {
    pub username: String,
    pub display_name: String,
    pub avatar_url: Option<String>,
}

impl From<User> for AuthorSummary {
    fn from(user: User) -> Self {
        Self {
            display_name: user.display_name().to_string(),
            username: user.username,
            avatar_url: user.avatar_url,
        }
    }
}

/// Timestamps are stored as RFC 3339 UTC strings with microseconds so
/// they sort lexically.
pub fn format_timestamp(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub fn now_timestamp() -> String {
    format_timestamp(Utc::now())
}

/// A timestamp strictly after `previous`, normally `now`.
pub fn next_timestamp(previous: Option<&str>, now: DateTime<Utc>) -> String {
    let previous = previous
        .and_then(|p| DateTime::parse_from_rfc3339(p).ok())
        .map(|p| p.with_timezone(&Utc));
    match previous {
        Some(prev) if now <= prev => format_timestamp(prev + Duration::microseconds(1)),
        _ => format_timestamp(now),
    }
}

fn row(value: serde_json::Value) -> Row {
    match value {
        serde_json::Value::Object(map) => map,
        _ => Row::new(),
    }
}

/// Update the user with the profile's username, or create them.
pub async fn upsert_from_profile(
    store: &dyn TableStore,
    profile: &ProviderProfile,
) -> Result<User, StoreError> {
    let existing = store
        .first(&Query::table(USERS).eq("username", profile.username.as_str()))
        .await?
        .map(decode::<User>)
        .transpose()?;

    let now = Utc::now();
    match existing {
        Some(user) => {
            let changes = row(json!({
                "display_name": profile.display_name,
                "avatar_url": profile.avatar_url,
                "updated_at": next_timestamp(Some(&user.updated_at), now),
            }));
            let updated = store
                .update(&Query::table(USERS).eq("id", user.id), changes)
                .await?;
            let stored = updated
                .into_iter()
                .next()
                .ok_or_else(|| StoreError::EmptyResult(format!("update of user {}", user.id)))?;
            tracing::info!(user_id = user.id, username = %profile.username, "updated user on login");
            decode(stored)
        }
        None => {
            let stamp = format_timestamp(now);
            let inserted = store
                .insert(
                    USERS,
                    row(json!({
                        "username": profile.username,
                        "display_name": profile.display_name,
                        "avatar_url": profile.avatar_url,
                        "created_at": stamp,
                        "updated_at": stamp,
                    })),
                )
                .await?;
            let user: User = decode(inserted)?;
            tracing::info!(user_id = user.id, username = %user.username, "created user on first login");
            Ok(user)
        }
    }
}

pub async fn find_by_id(store: &dyn TableStore, id: i64) -> Result<Option<User>, StoreError> {
    store
        .first(&Query::table(USERS).eq("id", id))
        .await?
        .map(decode)
        .transpose()
}

/// Author summaries for a set of user ids, fetched in one query.
pub async fn authors_by_id(
    store: &dyn TableStore,
    ids: impl IntoIterator<Item = i64>,
) -> Result<HashMap<i64, AuthorSummary>, StoreError> {
    let mut ids: Vec<i64> = ids.into_iter().collect();
    ids.sort_unstable();
    ids.dedup();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let rows = store
        .select(
            &Query::table(USERS)
                .select(&["id", "username", "display_name", "avatar_url", "created_at", "updated_at"])
                .is_in("id", ids),
        )
        .await?;
    rows.into_iter()
        .map(|r| decode::<User>(r).map(|u| (u.id, AuthorSummary::from(u))))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::SqliteStore;

    fn profile(name: &str) -> ProviderProfile {
        ProviderProfile {
            username: "octocat".into(),
            display_name: name.into(),
            email: Some("octocat@example.com".into()),
            avatar_url: Some("https://avatars.example/u/1".into()),
            profile_url: None,
        }
    }

    #[test]
    fn next_timestamp_is_strictly_increasing() {
        let now = Utc::now();
        let earlier = format_timestamp(now - Duration::seconds(5));
        assert_eq!(next_timestamp(Some(&earlier), now), format_timestamp(now));

        let same = format_timestamp(now);
        let bumped = next_timestamp(Some(&same), now);
        assert!(bumped > same);

        let future = format_timestamp(now + Duration::seconds(10));
        assert!(next_timestamp(Some(&future), now) > future);
        assert_eq!(next_timestamp(None, now), format_timestamp(now));
    }

    #[tokio::test]
    async fn upsert_creates_then_updates_single_row() {
        let store = SqliteStore::in_memory().unwrap();

        let first = upsert_from_profile(&store, &profile("Octo")).await.unwrap();
        assert_eq!(first.display_name(), "Octo");
        assert_eq!(first.created_at, first.updated_at);

        let second = upsert_from_profile(&store, &profile("The Octocat")).await.unwrap();
        assert_eq!(second.id, first.id);
        assert_eq!(second.display_name(), "The Octocat");
        assert_eq!(second.created_at, first.created_at);
        assert!(second.updated_at > first.updated_at);

        let count = store
            .count(&Query::table(USERS).eq("username", "octocat"))
            .await
            .unwrap();
        assert_eq!(count, 1);
    }

    #[tokio::test]
    async fn authors_are_resolved_in_bulk() {
        let store = SqliteStore::in_memory().unwrap();
        let user = upsert_from_profile(&store, &profile("Octo")).await.unwrap();

        let authors = authors_by_id(&store, [user.id, user.id, 999]).await.unwrap();
        assert_eq!(authors.len(), 1);
        assert_eq!(authors[&user.id].display_name, "Octo");

        assert!(authors_by_id(&store, Vec::new()).await.unwrap().is_empty());
        assert_eq!(find_by_id(&store, user.id).await.unwrap(), Some(user));
    }
}
