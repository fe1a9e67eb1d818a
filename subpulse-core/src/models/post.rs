use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A stored subreddit post. Immutable apart from the summary backfill.
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Post {
    pub id: Uuid,
    pub source_id: String,
    pub title: String,
    pub content: String,
    pub author: String,
    pub score: i32,
    pub num_comments: i32,
    pub permalink: String,
    pub thumbnail: Option<String>,
    pub link_flair_text: Option<String>,
    pub ai_summary: Option<String>,
    pub created_at: DateTime<Utc>,
    pub scraped_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct NewPost {
    pub source_id: String,
    pub title: String,
    pub content: String,
    pub author: String,
    pub score: i32,
    pub num_comments: i32,
    pub permalink: String,
    pub thumbnail: Option<String>,
    pub link_flair_text: Option<String>,
    pub created_at: DateTime<Utc>,
}
