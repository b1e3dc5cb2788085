use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Deserializer, Serialize};

use crate::config::LimitsConfig;
use crate::error::AppError;
use crate::users::AuthorSummary;

pub const EMOTIONS: &str = "emotions";
pub const LIKES: &str = "likes";
pub const COLLECTIONS: &str = "collections";
pub const COMMENTS: &str = "comments";
pub const COMMENT_LIKES: &str = "comment_likes";

const DEFAULT_INTENSITY: i64 = 5;
const INTENSITY_RANGE: std::ops::RangeInclusive<i64> = 1..=10;
const DEFAULT_PAGE_LIMIT: u64 = 20;
const MAX_PAGE_LIMIT: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmotionType {
    Happy,
    Sad,
    Angry,
    Excited,
    Anxious,
    Peaceful,
    Confused,
    Grateful,
    Lonely,
    Hopeful,
    Frustrated,
    Content,
    Custom,
}

impl EmotionType {
    pub const ALL: [EmotionType; 13] = [
        EmotionType::Happy,
        EmotionType::Sad,
        EmotionType::Angry,
        EmotionType::Excited,
        EmotionType::Anxious,
        EmotionType::Peaceful,
        EmotionType::Confused,
        EmotionType::Grateful,
        EmotionType::Lonely,
        EmotionType::Hopeful,
        EmotionType::Frustrated,
        EmotionType::Content,
        EmotionType::Custom,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EmotionType::Happy => "happy",
            EmotionType::Sad => "sad",
            EmotionType::Angry => "angry",
            EmotionType::Excited => "excited",
            EmotionType::Anxious => "anxious",
            EmotionType::Peaceful => "peaceful",
            EmotionType::Confused => "confused",
            EmotionType::Grateful => "grateful",
            EmotionType::Lonely => "lonely",
            EmotionType::Hopeful => "hopeful",
            EmotionType::Frustrated => "frustrated",
            EmotionType::Content => "content",
            EmotionType::Custom => "custom",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            EmotionType::Happy => "Happy",
            EmotionType::Sad => "Sad",
            EmotionType::Angry => "Angry",
            EmotionType::Excited => "Excited",
            EmotionType::Anxious => "Anxious",
            EmotionType::Peaceful => "Peaceful",
            EmotionType::Confused => "Confused",
            EmotionType::Grateful => "Grateful",
            EmotionType::Lonely => "Lonely",
            EmotionType::Hopeful => "Hopeful",
            EmotionType::Frustrated => "Frustrated",
            EmotionType::Content => "Content",
            EmotionType::Custom => "Custom",
        }
    }
}

impl FromStr for EmotionType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        EmotionType::ALL
            .into_iter()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AppError::Validation("Invalid emotion type".into()))
    }
}

impl fmt::Display for EmotionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Privacy {
    #[default]
    Public,
    Private,
}

impl Privacy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Privacy::Public => "public",
            Privacy::Private => "private",
        }
    }
}

impl FromStr for Privacy {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Privacy::Public),
            "private" => Ok(Privacy::Private),
            _ => Err(AppError::Validation(
                "privacy_setting must be 'public' or 'private'".into(),
            )),
        }
    }
}

/// Store booleans arrive as JSON booleans (PostgREST) or 0/1 (SQLite).
fn flag<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Int(i64),
    }
    Ok(match Option::<Flag>::deserialize(deserializer)? {
        Some(Flag::Bool(b)) => b,
        Some(Flag::Int(i)) => i != 0,
        None => false,
    })
}

fn default_intensity() -> i64 {
    DEFAULT_INTENSITY
}

/// An `emotions` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmotionRecord {
    pub id: i64,
    pub user_id: i64,
    pub emotion_type: String,
    #[serde(default)]
    pub content: String,
    pub custom_emoji: Option<String>,
    #[serde(default = "default_intensity")]
    pub intensity: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    #[serde(default)]
    pub privacy_setting: Privacy,
    #[serde(default, deserialize_with = "flag", skip_serializing)]
    pub is_deleted: bool,
    #[serde(default, skip_serializing)]
    pub deleted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl EmotionRecord {
    /// Private posts are visible to their author only.
    pub fn visible_to(&self, viewer: Option<i64>) -> bool {
        self.privacy_setting == Privacy::Public || viewer == Some(self.user_id)
    }
}

/// A `comments` row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommentRecord {
    pub id: i64,
    pub emotion_id: i64,
    pub user_id: i64,
    pub content: String,
    #[serde(default, deserialize_with = "flag", skip_serializing)]
    pub is_deleted: bool,
    #[serde(default, skip_serializing)]
    pub deleted_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

/// A `collections` row.
#[derive(Debug, Clone, Deserialize)]
pub struct CollectionRecord {
    pub id: i64,
    pub emotion_id: i64,
    pub created_at: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct EmotionStats {
    pub likes_count: u64,
    pub collections_count: u64,
    pub comments_count: u64,
    pub is_liked: bool,
    pub is_collected: bool,
}

/// An emotion as returned by the API, with its author embedded.
#[derive(Debug, Clone, Serialize)]
pub struct EmotionView {
    #[serde(flatten)]
    pub emotion: EmotionRecord,
    pub user: Option<AuthorSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stats: Option<EmotionStats>,
}

#[derive(Debug, Clone, Serialize)]
pub struct CommentView {
    #[serde(flatten)]
    pub comment: CommentRecord,
    pub user: Option<AuthorSummary>,
    pub likes_count: u64,
    pub is_liked: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CollectionEntry {
    pub collection_id: i64,
    pub collected_at: String,
    pub emotion: EmotionView,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct UserStats {
    pub emotions_count: u64,
    pub total_likes: u64,
    pub total_collections: u64,
}

/// One page of results.
#[derive(Debug, Clone)]
pub struct Listing<T> {
    pub items: Vec<T>,
    pub page: u64,
    pub limit: u64,
}

// -- Input --

/// Body of `POST /api/emotions`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewEmotion {
    pub emotion_type: Option<String>,
    pub custom_emoji: Option<String>,
    pub description: Option<String>,
    pub intensity: Option<i64>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub privacy_setting: Option<String>,
}

/// A new emotion that passed validation.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidEmotion {
    pub emotion_type: EmotionType,
    pub custom_emoji: Option<String>,
    pub content: String,
    pub intensity: i64,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub privacy: Privacy,
}

fn check_length(text: &str, max: usize, what: &str) -> Result<(), AppError> {
    if text.chars().count() > max {
        return Err(AppError::Validation(format!(
            "{what} cannot exceed {max} characters"
        )));
    }
    Ok(())
}

fn check_coordinate(value: Option<f64>, bound: f64, name: &str) -> Result<(), AppError> {
    match value {
        Some(v) if !v.is_finite() || v.abs() > bound => Err(AppError::Validation(format!(
            "{name} must be between -{bound} and {bound}"
        ))),
        _ => Ok(()),
    }
}

impl NewEmotion {
    pub fn validate(self, limits: &LimitsConfig) -> Result<ValidEmotion, AppError> {
        let emotion_type = self
            .emotion_type
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .ok_or_else(|| AppError::Validation("Missing required field: emotion_type".into()))?
            .parse::<EmotionType>()?;

        let custom_emoji = match emotion_type {
            EmotionType::Custom => {
                let glyph = self
                    .custom_emoji
                    .map(|g| g.trim().to_string())
                    .filter(|g| !g.is_empty())
                    .ok_or_else(|| {
                        AppError::Validation("Custom emotion type requires custom_emoji".into())
                    })?;
                Some(glyph)
            }
            _ => None,
        };

        let content = self.description.unwrap_or_default().trim().to_string();
        check_length(&content, limits.max_emotion_length, "Description")?;

        let intensity = self.intensity.unwrap_or(DEFAULT_INTENSITY);
        if !INTENSITY_RANGE.contains(&intensity) {
            return Err(AppError::Validation(
                "intensity must be between 1 and 10".into(),
            ));
        }

        check_coordinate(self.latitude, 90.0, "latitude")?;
        check_coordinate(self.longitude, 180.0, "longitude")?;

        let privacy = match self.privacy_setting.as_deref() {
            None => Privacy::Public,
            Some(p) => p.parse()?,
        };

        Ok(ValidEmotion {
            emotion_type,
            custom_emoji,
            content,
            intensity,
            latitude: self.latitude,
            longitude: self.longitude,
            privacy,
        })
    }
}

/// Body of `PUT /api/emotions/{id}`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmotionUpdate {
    pub content: Option<String>,
    pub privacy_setting: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidUpdate {
    pub content: Option<String>,
    pub privacy: Option<Privacy>,
}

impl EmotionUpdate {
    pub fn validate(self, limits: &LimitsConfig) -> Result<ValidUpdate, AppError> {
        if let Some(content) = &self.content {
            check_length(content, limits.max_emotion_length, "Content")?;
        }
        let privacy = self
            .privacy_setting
            .as_deref()
            .map(str::parse::<Privacy>)
            .transpose()?;
        if self.content.is_none() && privacy.is_none() {
            return Err(AppError::Validation("No fields to update".into()));
        }
        Ok(ValidUpdate {
            content: self.content,
            privacy,
        })
    }
}

/// Body of `POST /api/emotions/{id}/comments`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewComment {
    pub content: Option<String>,
}

impl NewComment {
    pub fn validate(self, limits: &LimitsConfig) -> Result<String, AppError> {
        let content = self.content.unwrap_or_default().trim().to_string();
        if content.is_empty() {
            return Err(AppError::Validation(
                "Comment content cannot be empty".into(),
            ));
        }
        check_length(&content, limits.max_comment_length, "Comment")?;
        Ok(content)
    }
}

/// 1-based `page` and `limit` query parameters.
#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub struct Pagination {
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageWindow {
    pub page: u64,
    pub limit: u64,
}

impl PageWindow {
    pub fn offset(&self) -> u64 {
        self.page.saturating_sub(1).saturating_mul(self.limit)
    }
}

impl Pagination {
    pub fn resolve(self) -> Result<PageWindow, AppError> {
        let page = self.page.unwrap_or(1);
        if page == 0 {
            return Err(AppError::Validation("page must be at least 1".into()));
        }
        let limit = self.limit.unwrap_or(DEFAULT_PAGE_LIMIT);
        if limit == 0 || limit > MAX_PAGE_LIMIT {
            return Err(AppError::Validation(format!(
                "limit must be between 1 and {MAX_PAGE_LIMIT}"
            )));
        }
        // stores take the offset as a signed 64-bit integer
        let in_range = (page - 1)
            .checked_mul(limit)
            .is_some_and(|offset| i64::try_from(offset).is_ok());
        if !in_range {
            return Err(AppError::Validation("page is out of range".into()));
        }
        Ok(PageWindow { page, limit })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeFilter {
    #[default]
    All,
    Today,
    Week,
    Month,
}

impl FromStr for TimeFilter {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all" => Ok(TimeFilter::All),
            "today" => Ok(TimeFilter::Today),
            "week" => Ok(TimeFilter::Week),
            "month" => Ok(TimeFilter::Month),
            _ => Err(AppError::Validation(
                "time_filter must be one of all, today, week, month".into(),
            )),
        }
    }
}

impl TimeFilter {
    /// Earliest creation time included, in UTC.
    pub fn since(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match self {
            TimeFilter::All => None,
            TimeFilter::Today => {
                let midnight = now.date_naive().and_hms_opt(0, 0, 0)?;
                Some(Utc.from_utc_datetime(&midnight))
            }
            TimeFilter::Week => Some(now - Duration::days(7)),
            TimeFilter::Month => Some(now - Duration::days(30)),
        }
    }
}

/// Query parameters of `GET /api/emotions`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    #[serde(rename = "type")]
    pub emotion_type: Option<String>,
    pub time_filter: Option<String>,
    pub privacy: Option<String>,
    pub user_id: Option<i64>,
    pub page: Option<u64>,
    pub limit: Option<u64>,
}

impl ListParams {
    pub fn pagination(&self) -> Pagination {
        Pagination {
            page: self.page,
            limit: self.limit,
        }
    }

    /// The type filter; `all` or absent means none.
    pub fn type_filter(&self) -> Result<Option<EmotionType>, AppError> {
        match self.emotion_type.as_deref() {
            None | Some("") | Some("all") => Ok(None),
            Some(t) => t.parse().map(Some),
        }
    }

    pub fn time_filter(&self) -> Result<TimeFilter, AppError> {
        self.time_filter
            .as_deref()
            .map_or(Ok(TimeFilter::All), str::parse)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToggleAction {
    Liked,
    Unliked,
    Collected,
    Uncollected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ToggleOutcome {
    pub action: ToggleAction,
    /// Rows for the target after the toggle.
    pub count: u64,
}
