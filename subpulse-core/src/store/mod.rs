//! Persistence seams for posts, taxonomy, assignments and category requests.
//!
//! [`PgStore`] is the production implementation; [`MemoryStore`] backs tests
//! and dry runs.

pub mod memory;
pub mod postgres;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use uuid::Uuid;

use crate::models::{
    AssignmentKind, Category, CategoryAssignmentView, CategoryRequest, NewCategory,
    NewCategoryAssignment, NewCategoryRequest, NewPost, NewProductArea, NewProductAreaAssignment,
    Post, ProductArea, ProductAreaAssignmentView,
};
use crate::trends::TrendSample;

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Store error: {0}")]
    Other(String),
}

// ============================================================================
// Post listing
// ============================================================================

pub const DEFAULT_PAGE_LIMIT: u32 = 20;
pub const MAX_PAGE_LIMIT: u32 = 100;

/// Whitelisted sort columns for the post list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PostSort {
    #[default]
    CreatedAt,
    Score,
    NumComments,
    Title,
}

impl PostSort {
    /// Unknown values fall back to `created_at`.
    pub fn parse(s: &str) -> Self {
        match s {
            "score" => PostSort::Score,
            "num_comments" => PostSort::NumComments,
            "title" => PostSort::Title,
            _ => PostSort::CreatedAt,
        }
    }

    pub fn column(&self) -> &'static str {
        match self {
            PostSort::CreatedAt => "created_at",
            PostSort::Score => "score",
            PostSort::NumComments => "num_comments",
            PostSort::Title => "title",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SortOrder {
    Asc,
    #[default]
    Desc,
}

impl SortOrder {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("asc") {
            SortOrder::Asc
        } else {
            SortOrder::Desc
        }
    }

    pub fn keyword(&self) -> &'static str {
        match self {
            SortOrder::Asc => "ASC",
            SortOrder::Desc => "DESC",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PostListQuery {
    /// 1-based.
    pub page: u32,
    pub limit: u32,
    /// Case-insensitive substring over title and body.
    pub search: Option<String>,
    /// `Some` restricts to posts assigned to any of these categories; an
    /// empty list matches nothing.
    pub category_ids: Option<Vec<Uuid>>,
    pub sort: PostSort,
    pub order: SortOrder,
}

impl Default for PostListQuery {
    fn default() -> Self {
        Self {
            page: 1,
            limit: DEFAULT_PAGE_LIMIT,
            search: None,
            category_ids: None,
            sort: PostSort::default(),
            order: SortOrder::default(),
        }
    }
}

impl PostListQuery {
    pub fn offset(&self) -> i64 {
        (self.page.max(1) as i64 - 1) * self.limit as i64
    }
}

#[derive(Debug, Clone)]
pub struct PostPage {
    pub posts: Vec<Post>,
    pub total: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PostStats {
    pub total_posts: i64,
    pub recent_posts: i64,
    pub avg_score: f64,
}

// ============================================================================
// Traits
// ============================================================================

#[async_trait]
pub trait PostStore: Send + Sync {
    /// Insert unless a post with the same source id exists. `None` means it
    /// was already stored.
    async fn insert_post_if_absent(&self, post: &NewPost) -> Result<Option<Post>, StoreError>;

    async fn post_exists(&self, source_id: &str) -> Result<bool, StoreError>;

    async fn list_posts(&self, query: &PostListQuery) -> Result<PostPage, StoreError>;

    /// Totals plus the number of posts created at or after `recent_since`.
    async fn post_stats(&self, recent_since: DateTime<Utc>) -> Result<PostStats, StoreError>;

    /// Newest first.
    async fn posts_without_summary(&self, limit: i64) -> Result<Vec<Post>, StoreError>;

    async fn set_summary(&self, post_id: Uuid, summary: &str) -> Result<(), StoreError>;

    async fn latest_scraped_at(&self) -> Result<Option<DateTime<Utc>>, StoreError>;

    /// Connectivity probe; returns a backend description.
    async fn ping(&self) -> Result<String, StoreError>;
}

#[async_trait]
pub trait TaxonomyStore: Send + Sync {
    async fn active_categories(&self) -> Result<Vec<Category>, StoreError>;

    async fn active_product_areas(&self) -> Result<Vec<ProductArea>, StoreError>;

    /// Deactivate every category, drop assignments from older versions and
    /// insert the new tree. Returns the new taxonomy version.
    async fn replace_categories(&self, categories: &[NewCategory]) -> Result<i32, StoreError>;

    /// Same as [`TaxonomyStore::replace_categories`] for product areas.
    async fn replace_product_areas(&self, areas: &[NewProductArea]) -> Result<i32, StoreError>;
}

#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Existing (post, category) pairs are left untouched. Returns rows written.
    async fn insert_category_assignments(
        &self,
        rows: &[NewCategoryAssignment],
    ) -> Result<usize, StoreError>;

    async fn insert_product_area_assignments(
        &self,
        rows: &[NewProductAreaAssignment],
    ) -> Result<usize, StoreError>;

    async fn has_assignments(&self, kind: AssignmentKind, post_id: Uuid) -> Result<bool, StoreError>;

    /// Assignments to active categories, with parent names resolved.
    async fn category_views(&self, post_ids: &[Uuid]) -> Result<Vec<CategoryAssignmentView>, StoreError>;

    async fn product_area_views(
        &self,
        post_ids: &[Uuid],
    ) -> Result<Vec<ProductAreaAssignmentView>, StoreError>;

    /// Assignment count per category or product-area id.
    async fn assignment_counts(&self, kind: AssignmentKind) -> Result<HashMap<Uuid, i64>, StoreError>;

    /// Posts with no assignment rows of `kind`, newest first.
    async fn unclassified_posts(&self, kind: AssignmentKind, limit: i64) -> Result<Vec<Post>, StoreError>;

    /// Posts created at or after `since` with their assigned names, for trends.
    async fn trend_samples(
        &self,
        kind: AssignmentKind,
        since: DateTime<Utc>,
    ) -> Result<Vec<TrendSample>, StoreError>;
}

#[async_trait]
pub trait CategoryRequestStore: Send + Sync {
    async fn insert_category_request(
        &self,
        request: &NewCategoryRequest,
    ) -> Result<CategoryRequest, StoreError>;
}

/// Everything the pipeline and the read API need from persistence.
pub trait Store: PostStore + TaxonomyStore + AssignmentStore + CategoryRequestStore {}

impl<T> Store for T where T: PostStore + TaxonomyStore + AssignmentStore + CategoryRequestStore {}

/// Next version after the highest one present.
pub(crate) fn next_version<I: IntoIterator<Item = i32>>(versions: I) -> i32 {
    versions.into_iter().max().unwrap_or(0) + 1
}
