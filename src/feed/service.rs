use std::collections::HashMap;

use chrono::Utc;
use serde_json::{json, Value};

use crate::auth::session::SessionUser;
use crate::config::LimitsConfig;
use crate::error::{AppError, AppResult};
use crate::store::{decode, Direction, Privilege, Query, Row, StoreClients, StoreError, TableStore};
use crate::users::{self, format_timestamp, next_timestamp, now_timestamp, AuthorSummary};

use super::model::{
    CollectionEntry, CollectionRecord, CommentRecord, CommentView, EmotionRecord, EmotionStats,
    EmotionUpdate, EmotionView, ListParams, Listing, NewComment, NewEmotion, Pagination,
    ToggleAction, ToggleOutcome, UserStats, COLLECTIONS, COMMENTS, COMMENT_LIKES, EMOTIONS, LIKES,
};

/// A (user, target) join table flipped by a toggle.
struct Toggle {
    table: &'static str,
    target_column: &'static str,
    on: ToggleAction,
    off: ToggleAction,
}

const LIKE: Toggle = Toggle {
    table: LIKES,
    target_column: "emotion_id",
    on: ToggleAction::Liked,
    off: ToggleAction::Unliked,
};

const COLLECT: Toggle = Toggle {
    table: COLLECTIONS,
    target_column: "emotion_id",
    on: ToggleAction::Collected,
    off: ToggleAction::Uncollected,
};

const COMMENT_LIKE: Toggle = Toggle {
    table: COMMENT_LIKES,
    target_column: "comment_id",
    on: ToggleAction::Liked,
    off: ToggleAction::Unliked,
};

fn into_row(value: Value) -> Row {
    match value {
        Value::Object(map) => map,
        _ => Row::new(),
    }
}

fn decode_all<T: serde::de::DeserializeOwned>(rows: Vec<Row>) -> Result<Vec<T>, StoreError> {
    rows.into_iter().map(decode).collect()
}

fn author_of(user: &SessionUser) -> AuthorSummary {
    AuthorSummary {
        username: user.username.clone(),
        display_name: user.display_name.clone(),
        avatar_url: user.avatar_url.clone(),
    }
}

/// Permission-checked access to posts and their social data.
///
/// Ownership and privacy are checked before any mutation or detail read.
/// Reads of the public feed go through the restricted store client; all
/// other access uses the service-role client.
#[derive(Clone)]
pub struct FeedService {
    stores: StoreClients,
    limits: LimitsConfig,
}

impl FeedService {
    pub fn new(stores: StoreClients, limits: LimitsConfig) -> Self {
        Self { stores, limits }
    }

    pub fn limits(&self) -> &LimitsConfig {
        &self.limits
    }

    fn store(&self) -> &dyn TableStore {
        self.stores.service()
    }

    // -- Lookups --

    async fn find_emotion(&self, id: i64) -> AppResult<EmotionRecord> {
        let row = self
            .store()
            .first(&Query::table(EMOTIONS).eq("id", id).eq("is_deleted", false))
            .await?
            .ok_or_else(|| AppError::NotFound("Emotion not found".into()))?;
        Ok(decode(row)?)
    }

    async fn visible_emotion(
        &self,
        id: i64,
        viewer: Option<i64>,
        denied: &str,
    ) -> AppResult<EmotionRecord> {
        let emotion = self.find_emotion(id).await?;
        if !emotion.visible_to(viewer) {
            tracing::debug!(emotion_id = id, ?viewer, "private emotion hidden from viewer");
            return Err(AppError::Forbidden(denied.into()));
        }
        Ok(emotion)
    }

    async fn owned_emotion(
        &self,
        id: i64,
        actor: &SessionUser,
        denied: &str,
    ) -> AppResult<EmotionRecord> {
        let emotion = self.find_emotion(id).await?;
        if emotion.user_id != actor.id {
            return Err(AppError::Forbidden(denied.into()));
        }
        Ok(emotion)
    }

    async fn find_comment(&self, id: i64) -> AppResult<CommentRecord> {
        let row = self
            .store()
            .first(&Query::table(COMMENTS).eq("id", id).eq("is_deleted", false))
            .await?
            .ok_or_else(|| AppError::NotFound("Comment not found".into()))?;
        Ok(decode(row)?)
    }

    async fn has_row(
        &self,
        table: &str,
        target_column: &str,
        target_id: i64,
        user_id: i64,
    ) -> Result<bool, StoreError> {
        let query = Query::table(table)
            .select(&["id"])
            .eq(target_column, target_id)
            .eq("user_id", user_id);
        Ok(self.store().first(&query).await?.is_some())
    }

    async fn with_authors(&self, records: Vec<EmotionRecord>) -> AppResult<Vec<EmotionView>> {
        let authors = users::authors_by_id(self.store(), records.iter().map(|e| e.user_id)).await?;
        Ok(records
            .into_iter()
            .map(|emotion| EmotionView {
                user: authors.get(&emotion.user_id).cloned(),
                emotion,
                stats: None,
            })
            .collect())
    }

    /// Flip membership of (user, target) and report the new count.
    async fn toggle(
        &self,
        toggle: &Toggle,
        target_id: i64,
        user_id: i64,
    ) -> Result<ToggleOutcome, StoreError> {
        let store = self.store();
        let mine = Query::table(toggle.table)
            .eq(toggle.target_column, target_id)
            .eq("user_id", user_id);

        // read-then-write; a concurrent duplicate insert hits the unique index
        let action = if store.first(&mine).await?.is_some() {
            store.delete(&mine).await?;
            toggle.off
        } else {
            let mut row = Row::new();
            row.insert(toggle.target_column.into(), target_id.into());
            row.insert("user_id".into(), user_id.into());
            row.insert("created_at".into(), now_timestamp().into());
            store.insert(toggle.table, row).await?;
            toggle.on
        };

        let count = store
            .count(&Query::table(toggle.table).eq(toggle.target_column, target_id))
            .await?;
        tracing::debug!(table = toggle.table, target_id, user_id, ?action, count, "toggled");
        Ok(ToggleOutcome { action, count })
    }

    // -- Emotions --

    pub async fn list_emotions(
        &self,
        params: &ListParams,
        viewer: Option<&SessionUser>,
    ) -> AppResult<Listing<EmotionView>> {
        let window = params.pagination().resolve()?;
        let type_filter = params.type_filter()?;
        let time_filter = params.time_filter()?;

        let mut query = Query::table(EMOTIONS).eq("is_deleted", false);
        let privilege = match params.privacy.as_deref().unwrap_or("public") {
            "public" => {
                query = query.eq("privacy_setting", "public");
                Privilege::Restricted
            }
            "private" => {
                let viewer = viewer.ok_or(AppError::Unauthenticated)?;
                query = query.eq("user_id", viewer.id);
                Privilege::ServiceRole
            }
            _ => {
                return Err(AppError::Validation(
                    "privacy must be 'public' or 'private'".into(),
                ))
            }
        };
        if let Some(emotion_type) = type_filter {
            query = query.eq("emotion_type", emotion_type.as_str());
        }
        if let Some(user_id) = params.user_id {
            query = query.eq("user_id", user_id);
        }
        if let Some(since) = time_filter.since(Utc::now()) {
            query = query.gte("created_at", format_timestamp(since));
        }
        let query = query
            .order_by("created_at", Direction::Desc)
            .range(window.offset(), window.limit);

        let rows = self.stores.get(privilege).select(&query).await?;
        let items = self.with_authors(decode_all(rows)?).await?;
        Ok(Listing {
            items,
            page: window.page,
            limit: window.limit,
        })
    }

    pub async fn create_emotion(
        &self,
        actor: &SessionUser,
        input: NewEmotion,
    ) -> AppResult<EmotionRecord> {
        let valid = input.validate(&self.limits)?;
        let now = now_timestamp();
        let mut row = into_row(json!({
            "user_id": actor.id,
            "emotion_type": valid.emotion_type.as_str(),
            "content": valid.content,
            "intensity": valid.intensity,
            "latitude": valid.latitude,
            "longitude": valid.longitude,
            "privacy_setting": valid.privacy.as_str(),
            "created_at": now,
            "updated_at": now,
        }));
        if let Some(glyph) = valid.custom_emoji {
            row.insert("custom_emoji".into(), Value::String(glyph));
        }

        let record: EmotionRecord = decode(self.store().insert(EMOTIONS, row).await?)?;
        tracing::info!(
            emotion_id = record.id,
            user_id = actor.id,
            emotion_type = %valid.emotion_type,
            "emotion created"
        );
        Ok(record)
    }

    /// Detail view with social counts and the viewer's own like/collect state.
    pub async fn get_emotion(&self, id: i64, viewer: Option<&SessionUser>) -> AppResult<EmotionView> {
        let viewer_id = viewer.map(|u| u.id);
        let emotion = self
            .visible_emotion(id, viewer_id, "Not allowed to view this emotion")
            .await?;

        let store = self.store();
        let likes_count = store.count(&Query::table(LIKES).eq("emotion_id", id)).await?;
        let collections_count = store
            .count(&Query::table(COLLECTIONS).eq("emotion_id", id))
            .await?;
        let comments_count = store
            .count(
                &Query::table(COMMENTS)
                    .eq("emotion_id", id)
                    .eq("is_deleted", false),
            )
            .await?;

        let (is_liked, is_collected) = match viewer_id {
            Some(user_id) => (
                self.has_row(LIKES, "emotion_id", id, user_id).await?,
                self.has_row(COLLECTIONS, "emotion_id", id, user_id).await?,
            ),
            None => (false, false),
        };

        let user = users::find_by_id(store, emotion.user_id)
            .await?
            .map(AuthorSummary::from);

        Ok(EmotionView {
            emotion,
            user,
            stats: Some(EmotionStats {
                likes_count,
                collections_count,
                comments_count,
                is_liked,
                is_collected,
            }),
        })
    }

    pub async fn update_emotion(
        &self,
        id: i64,
        actor: &SessionUser,
        update: EmotionUpdate,
    ) -> AppResult<EmotionRecord> {
        let emotion = self
            .owned_emotion(id, actor, "Not allowed to modify this emotion")
            .await?;
        let update = update.validate(&self.limits)?;

        let mut changes = Row::new();
        if let Some(content) = update.content {
            changes.insert("content".into(), Value::String(content));
        }
        if let Some(privacy) = update.privacy {
            changes.insert("privacy_setting".into(), privacy.as_str().into());
        }
        changes.insert(
            "updated_at".into(),
            next_timestamp(Some(&emotion.updated_at), Utc::now()).into(),
        );

        let row = self
            .store()
            .update(&Query::table(EMOTIONS).eq("id", id), changes)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| AppError::Internal(format!("update of emotion {id} matched no rows")))?;
        tracing::info!(emotion_id = id, user_id = actor.id, "emotion updated");
        Ok(decode(row)?)
    }

    /// Soft delete.
    pub async fn delete_emotion(&self, id: i64, actor: &SessionUser) -> AppResult<()> {
        let emotion = self
            .owned_emotion(id, actor, "Not allowed to delete this emotion")
            .await?;
        let now = Utc::now();
        let changes = into_row(json!({
            "is_deleted": true,
            "deleted_at": format_timestamp(now),
            "updated_at": next_timestamp(Some(&emotion.updated_at), now),
        }));
        self.store()
            .update(&Query::table(EMOTIONS).eq("id", id), changes)
            .await?;
        tracing::info!(emotion_id = id, user_id = actor.id, "emotion deleted");
        Ok(())
    }

    pub async fn toggle_like(&self, id: i64, actor: &SessionUser) -> AppResult<ToggleOutcome> {
        self.visible_emotion(id, Some(actor.id), "Not allowed to like this emotion")
            .await?;
        Ok(self.toggle(&LIKE, id, actor.id).await?)
    }

    pub async fn toggle_collection(&self, id: i64, actor: &SessionUser) -> AppResult<ToggleOutcome> {
        self.visible_emotion(id, Some(actor.id), "Not allowed to collect this emotion")
            .await?;
        Ok(self.toggle(&COLLECT, id, actor.id).await?)
    }

    // -- Comments --

    pub async fn list_comments(
        &self,
        emotion_id: i64,
        viewer: Option<&SessionUser>,
        pagination: Pagination,
    ) -> AppResult<Listing<CommentView>> {
        let window = pagination.resolve()?;
        let viewer_id = viewer.map(|u| u.id);
        self.visible_emotion(
            emotion_id,
            viewer_id,
            "Not allowed to view comments on this emotion",
        )
        .await?;

        let store = self.store();
        let rows = store
            .select(
                &Query::table(COMMENTS)
                    .eq("emotion_id", emotion_id)
                    .eq("is_deleted", false)
                    .order_by("created_at", Direction::Desc)
                    .range(window.offset(), window.limit),
            )
            .await?;
        let comments: Vec<CommentRecord> = decode_all(rows)?;
        if comments.is_empty() {
            return Ok(Listing {
                items: Vec::new(),
                page: window.page,
                limit: window.limit,
            });
        }

        let authors = users::authors_by_id(store, comments.iter().map(|c| c.user_id)).await?;

        // one query for every like on this page of comments
        let like_rows = store
            .select(
                &Query::table(COMMENT_LIKES)
                    .select(&["comment_id", "user_id"])
                    .is_in("comment_id", comments.iter().map(|c| c.id)),
            )
            .await?;
        let mut like_counts: HashMap<i64, u64> = HashMap::new();
        let mut liked_by_viewer: Vec<i64> = Vec::new();
        for row in &like_rows {
            let Some(comment_id) = row.get("comment_id").and_then(Value::as_i64) else {
                continue;
            };
            *like_counts.entry(comment_id).or_default() += 1;
            if viewer_id.is_some() && row.get("user_id").and_then(Value::as_i64) == viewer_id {
                liked_by_viewer.push(comment_id);
            }
        }

        let items = comments
            .into_iter()
            .map(|comment| CommentView {
                user: authors.get(&comment.user_id).cloned(),
                likes_count: like_counts.get(&comment.id).copied().unwrap_or(0),
                is_liked: liked_by_viewer.contains(&comment.id),
                comment,
            })
            .collect();

        Ok(Listing {
            items,
            page: window.page,
            limit: window.limit,
        })
    }

    pub async fn create_comment(
        &self,
        emotion_id: i64,
        actor: &SessionUser,
        input: NewComment,
    ) -> AppResult<CommentView> {
        let content = input.validate(&self.limits)?;
        self.visible_emotion(
            emotion_id,
            Some(actor.id),
            "Not allowed to comment on this emotion",
        )
        .await?;

        let now = now_timestamp();
        let row = into_row(json!({
            "emotion_id": emotion_id,
            "user_id": actor.id,
            "content": content,
            "created_at": now,
            "updated_at": now,
        }));
        let comment: CommentRecord = decode(self.store().insert(COMMENTS, row).await?)?;
        tracing::info!(comment_id = comment.id, emotion_id, user_id = actor.id, "comment created");

        Ok(CommentView {
            comment,
            user: Some(author_of(actor)),
            likes_count: 0,
            is_liked: false,
        })
    }

    /// Soft delete, author only.
    pub async fn delete_comment(&self, id: i64, actor: &SessionUser) -> AppResult<()> {
        let comment = self.find_comment(id).await?;
        if comment.user_id != actor.id {
            return Err(AppError::Forbidden("Not allowed to delete this comment".into()));
        }
        let now = Utc::now();
        let changes = into_row(json!({
            "is_deleted": true,
            "deleted_at": format_timestamp(now),
            "updated_at": next_timestamp(Some(&comment.updated_at), now),
        }));
        self.store()
            .update(&Query::table(COMMENTS).eq("id", id), changes)
            .await?;
        tracing::info!(comment_id = id, user_id = actor.id, "comment deleted");
        Ok(())
    }

    pub async fn toggle_comment_like(
        &self,
        comment_id: i64,
        actor: &SessionUser,
    ) -> AppResult<ToggleOutcome> {
        let comment = self.find_comment(comment_id).await?;
        // a comment lives and dies with its parent's visibility
        let parent = match self.find_emotion(comment.emotion_id).await {
            Ok(parent) => parent,
            Err(AppError::NotFound(_)) => {
                return Err(AppError::NotFound("Comment not found".into()))
            }
            Err(e) => return Err(e),
        };
        if !parent.visible_to(Some(actor.id)) {
            return Err(AppError::Forbidden("Not allowed to like this comment".into()));
        }
        Ok(self.toggle(&COMMENT_LIKE, comment_id, actor.id).await?)
    }

    // -- Per-user views --

    pub async fn user_stats(&self, actor: &SessionUser) -> AppResult<UserStats> {
        let store = self.store();
        let own = Query::table(EMOTIONS)
            .eq("user_id", actor.id)
            .eq("is_deleted", false);
        let emotions_count = store.count(&own).await?;

        let ids: Vec<i64> = store
            .select(&own.select(&["id"]))
            .await?
            .iter()
            .filter_map(|row| row.get("id").and_then(Value::as_i64))
            .collect();
        if ids.is_empty() {
            return Ok(UserStats {
                emotions_count,
                total_likes: 0,
                total_collections: 0,
            });
        }

        let total_likes = store
            .count(&Query::table(LIKES).is_in("emotion_id", ids.iter().copied()))
            .await?;
        let total_collections = store
            .count(&Query::table(COLLECTIONS).is_in("emotion_id", ids))
            .await?;

        Ok(UserStats {
            emotions_count,
            total_likes,
            total_collections,
        })
    }

    /// The actor's collections, newest first. Deleted emotions, and private
    /// ones that belong to someone else, are skipped.
    pub async fn collections(
        &self,
        actor: &SessionUser,
        pagination: Pagination,
    ) -> AppResult<Listing<CollectionEntry>> {
        let window = pagination.resolve()?;
        let store = self.store();
        let rows = store
            .select(
                &Query::table(COLLECTIONS)
                    .eq("user_id", actor.id)
                    .order_by("created_at", Direction::Desc)
                    .range(window.offset(), window.limit),
            )
            .await?;
        let collected: Vec<CollectionRecord> = decode_all(rows)?;

        let emotions: Vec<EmotionRecord> = if collected.is_empty() {
            Vec::new()
        } else {
            let rows = store
                .select(
                    &Query::table(EMOTIONS)
                        .eq("is_deleted", false)
                        .is_in("id", collected.iter().map(|c| c.emotion_id)),
                )
                .await?;
            decode_all(rows)?
        };
        let visible = emotions
            .into_iter()
            .filter(|e| e.visible_to(Some(actor.id)))
            .collect();

        let mut views: HashMap<i64, EmotionView> = self
            .with_authors(visible)
            .await?
            .into_iter()
            .map(|view| (view.emotion.id, view))
            .collect();

        let items = collected
            .into_iter()
            .filter_map(|c| {
                views.remove(&c.emotion_id).map(|emotion| CollectionEntry {
                    collection_id: c.id,
                    collected_at: c.created_at,
                    emotion,
                })
            })
            .collect();

        Ok(Listing {
            items,
            page: window.page,
            limit: window.limit,
        })
    }
}
