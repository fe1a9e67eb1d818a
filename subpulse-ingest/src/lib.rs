//! Feed source: paginated listing of recent subreddit posts.

pub mod error;
pub mod reddit;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

pub use error::FeedError;
pub use reddit::{RedditFeedClient, RedditFeedConfig};

/// One raw listing item as the feed reports it.
#[derive(Debug, Clone, Deserialize, PartialEq)]
pub struct FeedItem {
    /// Source-native id (e.g. "1abc23").
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub selftext: String,
    #[serde(default)]
    pub author: String,
    #[serde(default)]
    pub score: i64,
    #[serde(default)]
    pub num_comments: i64,
    pub permalink: String,
    /// Creation time in epoch seconds.
    pub created_utc: f64,
    #[serde(default)]
    pub thumbnail: Option<String>,
    #[serde(default)]
    pub link_flair_text: Option<String>,
}

impl FeedItem {
    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp(self.created_utc as i64, 0)
    }

    /// Thumbnail only when it is an actual URL; listings use placeholders
    /// such as "self" or "default" otherwise.
    pub fn thumbnail_url(&self) -> Option<&str> {
        self.thumbnail
            .as_deref()
            .filter(|t| t.starts_with("http://") || t.starts_with("https://"))
    }

    pub fn flair(&self) -> Option<&str> {
        self.link_flair_text.as_deref().filter(|f| !f.trim().is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FeedPage {
    pub items: Vec<FeedItem>,
    /// Cursor for the next page; `None` when the listing is exhausted.
    pub after: Option<String>,
}

#[async_trait]
pub trait FeedSource: Send + Sync {
    /// Fetch one page of newest items, continuing from `after` when given.
    async fn fetch_page(&self, after: Option<&str>, limit: u32) -> Result<FeedPage, FeedError>;

    fn name(&self) -> &str;
}
