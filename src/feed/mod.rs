//! Emotion posts and the likes, collections and comments attached to them.

pub mod model;
pub mod service;

pub use model::{EmotionType, Listing, Privacy, ToggleAction, ToggleOutcome};
pub use service::FeedService;
