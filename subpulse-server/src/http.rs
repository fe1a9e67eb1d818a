//! Subpulse HTTP read API
//!
//! Axum server consumed by the dashboard. Each endpoint has a thin axum
//! handler that delegates to an inner function taking the store directly, so
//! the logic is testable without a running server.
//!
//! Endpoints:
//! - GET  /health                        : liveness plus store probe
//! - GET  /posts                         : paginated, filterable posts with assignments
//! - GET  /categories                    : category tree with rolled-up counts
//! - GET  /product-areas                 : flat product-area list with counts
//! - GET  /analytics/summary             : totals, last-7-days count, average score
//! - GET  /analytics/trends              : weekly category percentages
//! - GET  /analytics/product-area-trends : weekly product-area percentages
//! - POST /scraper/trigger               : start a background scrape
//! - GET  /scraper/status                : last scrape and schedule
//! - POST /category-requests             : submit a new category suggestion

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};
use subpulse_core::config::HttpConfig;
use subpulse_core::models::{AssignmentKind, NewCategoryRequest, Post};
use subpulse_core::store::{
    PostListQuery, PostSort, SortOrder, Store, DEFAULT_PAGE_LIMIT, MAX_PAGE_LIMIT,
};
use subpulse_core::taxonomy::{build_category_tree, resolve_category_filter, CategoryFilter, NameIndex};
use subpulse_core::trends::{weekly_trends, TREND_WINDOW_DAYS};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::subsystems::schedule::{next_weekly_run, SCHEDULE_DESCRIPTION};
use crate::subsystems::scraper::{ScrapeRunner, StartOutcome};

const RECENT_DAYS: i64 = 7;

/// Shared state for all HTTP handlers
#[derive(Clone)]
pub struct HttpState {
    pub store: Arc<dyn Store>,
    pub runner: Arc<ScrapeRunner>,
    pub schedule_enabled: bool,
}

/// Build the Axum router with all endpoints
pub fn build_router(state: Arc<HttpState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/posts", get(posts_handler))
        .route("/categories", get(categories_handler))
        .route("/product-areas", get(product_areas_handler))
        .route("/analytics/summary", get(summary_handler))
        .route("/analytics/trends", get(trends_handler))
        .route("/analytics/product-area-trends", get(product_area_trends_handler))
        .route("/scraper/trigger", post(trigger_handler))
        .route("/scraper/status", get(status_handler))
        .route("/category-requests", post(category_request_handler))
        .with_state(state)
}

/// Start the HTTP server on the configured address.
/// Gracefully shuts down when the broadcast shutdown signal fires.
pub async fn start_http_server(
    state: Arc<HttpState>,
    config: &HttpConfig,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let addr = format!("{}:{}", config.host, config.port);

    let app = build_router(state);
    let listener = TcpListener::bind(&addr).await?;
    tracing::info!("Subpulse HTTP API listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
            tracing::info!("HTTP server shutting down...");
        })
        .await?;

    Ok(())
}

// ============================================================================
// Request / Response DTOs
// ============================================================================

#[derive(Debug, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct PostsParams {
    pub page: Option<u32>,
    pub limit: Option<u32>,
    pub category: Option<String>,
    pub search: Option<String>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct CategoryRequestBody {
    pub name: Option<String>,
    pub description: Option<String>,
}

/// Standard HTTP error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub status: String,
}

impl ErrorResponse {
    pub fn new(msg: impl Into<String>) -> Self {
        Self {
            error: msg.into(),
            status: "error".to_string(),
        }
    }
}

#[derive(Debug, Serialize)]
struct CategoryRef {
    id: Uuid,
    name: String,
    parent_id: Option<Uuid>,
    level: i32,
    parent_name: Option<String>,
}

#[derive(Debug, Serialize)]
struct CategoryLink {
    confidence: f64,
    categories: CategoryRef,
}

#[derive(Debug, Serialize)]
struct ProductAreaRef {
    id: Uuid,
    name: String,
}

#[derive(Debug, Serialize)]
struct ProductAreaLink {
    confidence: f64,
    product_areas: ProductAreaRef,
}

/// A post with its assignments nested the way the dashboard reads them.
#[derive(Debug, Serialize)]
struct PostWithAssignments {
    #[serde(flatten)]
    post: Post,
    post_categories: Vec<CategoryLink>,
    post_product_areas: Vec<ProductAreaLink>,
}

fn error_body(msg: impl Into<String>) -> serde_json::Value {
    serde_json::json!(ErrorResponse::new(msg))
}

fn internal_error(context: &str, e: impl std::fmt::Display) -> (StatusCode, serde_json::Value) {
    tracing::error!(error = %e, "{}", context);
    (StatusCode::INTERNAL_SERVER_ERROR, error_body(e.to_string()))
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

// ============================================================================
// Inner (directly testable) business logic functions
// ============================================================================

/// Inner health check: probes the store and returns (status_code, json_body).
pub async fn health_inner(store: &dyn Store) -> (StatusCode, serde_json::Value) {
    match store.ping().await {
        Ok(backend) => (
            StatusCode::OK,
            serde_json::json!({
                "status": "ok",
                "database": "connected",
                "backend": backend,
                "version": env!("CARGO_PKG_VERSION"),
                "timestamp": Utc::now(),
            }),
        ),
        Err(e) => (
            StatusCode::SERVICE_UNAVAILABLE,
            serde_json::json!({
                "status": "unhealthy",
                "database": "disconnected",
                "error": e.to_string(),
                "timestamp": Utc::now(),
            }),
        ),
    }
}

/// Inner posts: paginated list with nested category and product-area
/// assignments. A parent category name expands to its children.
pub async fn posts_inner(store: &dyn Store, params: PostsParams) -> (StatusCode, serde_json::Value) {
    let page = params.page.unwrap_or(1).max(1);
    let limit = params.limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT);

    let category_ids = match params.category.as_deref().map(str::trim).filter(|c| !c.is_empty()) {
        Some(name) => match store.active_categories().await {
            Ok(categories) => match resolve_category_filter(&categories, name) {
                CategoryFilter::All => None,
                CategoryFilter::Ids(ids) => Some(ids),
            },
            Err(e) => return internal_error("Failed to load categories", e),
        },
        None => None,
    };

    let query = PostListQuery {
        page,
        limit,
        search: params.search.filter(|s| !s.trim().is_empty()),
        category_ids,
        sort: params.sort_by.as_deref().map(PostSort::parse).unwrap_or_default(),
        order: params.sort_order.as_deref().map(SortOrder::parse).unwrap_or_default(),
    };

    let result = match store.list_posts(&query).await {
        Ok(r) => r,
        Err(e) => return internal_error("Failed to list posts", e),
    };

    let ids: Vec<Uuid> = result.posts.iter().map(|p| p.id).collect();
    let category_views = match store.category_views(&ids).await {
        Ok(v) => v,
        Err(e) => return internal_error("Failed to load category assignments", e),
    };
    let product_area_views = match store.product_area_views(&ids).await {
        Ok(v) => v,
        Err(e) => return internal_error("Failed to load product-area assignments", e),
    };

    let mut categories_by_post: HashMap<Uuid, Vec<CategoryLink>> = HashMap::new();
    for v in category_views {
        categories_by_post.entry(v.post_id).or_default().push(CategoryLink {
            confidence: v.confidence,
            categories: CategoryRef {
                id: v.category_id,
                name: v.name,
                parent_id: v.parent_id,
                level: v.level,
                parent_name: v.parent_name,
            },
        });
    }

    let mut areas_by_post: HashMap<Uuid, Vec<ProductAreaLink>> = HashMap::new();
    for v in product_area_views {
        areas_by_post.entry(v.post_id).or_default().push(ProductAreaLink {
            confidence: v.confidence,
            product_areas: ProductAreaRef {
                id: v.product_area_id,
                name: v.name,
            },
        });
    }

    let data: Vec<PostWithAssignments> = result
        .posts
        .into_iter()
        .map(|post| PostWithAssignments {
            post_categories: categories_by_post.remove(&post.id).unwrap_or_default(),
            post_product_areas: areas_by_post.remove(&post.id).unwrap_or_default(),
            post,
        })
        .collect();

    let total_pages = (result.total + limit as i64 - 1) / limit as i64;

    (
        StatusCode::OK,
        serde_json::json!({
            "data": data,
            "pagination": {
                "page": page,
                "limit": limit,
                "total": result.total,
                "totalPages": total_pages,
            },
        }),
    )
}

/// Inner categories: parents with nested children and rolled-up counts,
/// plus a flat list.
pub async fn categories_inner(store: &dyn Store) -> (StatusCode, serde_json::Value) {
    let categories = match store.active_categories().await {
        Ok(c) => c,
        Err(e) => return internal_error("Failed to load categories", e),
    };
    let counts = match store.assignment_counts(AssignmentKind::Category).await {
        Ok(c) => c,
        Err(e) => return internal_error("Failed to count category assignments", e),
    };

    let tree = build_category_tree(&categories, &counts);
    (StatusCode::OK, serde_json::json!({ "data": tree.data, "flat": tree.flat }))
}

/// Inner product areas: active product areas in sort order with counts.
pub async fn product_areas_inner(store: &dyn Store) -> (StatusCode, serde_json::Value) {
    let areas = match store.active_product_areas().await {
        Ok(a) => a,
        Err(e) => return internal_error("Failed to load product areas", e),
    };
    let counts = match store.assignment_counts(AssignmentKind::ProductArea).await {
        Ok(c) => c,
        Err(e) => return internal_error("Failed to count product-area assignments", e),
    };

    let data: Vec<serde_json::Value> = areas
        .iter()
        .map(|a| {
            serde_json::json!({
                "id": a.id,
                "name": a.name,
                "description": a.description,
                "sort_order": a.sort_order,
                "post_count": counts.get(&a.id).copied().unwrap_or(0),
            })
        })
        .collect();

    (StatusCode::OK, serde_json::json!({ "data": data }))
}

/// Inner summary: totals for the analytics header.
pub async fn summary_inner(store: &dyn Store) -> (StatusCode, serde_json::Value) {
    let stats = match store.post_stats(Utc::now() - Duration::days(RECENT_DAYS)).await {
        Ok(s) => s,
        Err(e) => return internal_error("Failed to compute post stats", e),
    };
    let total_categories = match store.active_categories().await {
        Ok(c) => c.len(),
        Err(e) => return internal_error("Failed to load categories", e),
    };

    (
        StatusCode::OK,
        serde_json::json!({
            "totalPosts": stats.total_posts,
            "totalCategories": total_categories,
            "recentPosts": stats.recent_posts,
            "avgScore": round_to(stats.avg_score, 2),
        }),
    )
}

/// Inner trends: weekly percentage series over the last year, one dataset
/// per assignable category or product area.
pub async fn trends_inner(store: &dyn Store, kind: AssignmentKind) -> (StatusCode, serde_json::Value) {
    let series: Vec<String> = match kind {
        AssignmentKind::Category => match store.active_categories().await {
            Ok(c) => NameIndex::for_categories(&c).names().to_vec(),
            Err(e) => return internal_error("Failed to load categories", e),
        },
        AssignmentKind::ProductArea => match store.active_product_areas().await {
            Ok(a) => NameIndex::for_product_areas(&a).names().to_vec(),
            Err(e) => return internal_error("Failed to load product areas", e),
        },
    };

    let since = Utc::now() - Duration::days(TREND_WINDOW_DAYS);
    let samples = match store.trend_samples(kind, since).await {
        Ok(s) => s,
        Err(e) => return internal_error("Failed to load trend samples", e),
    };

    (StatusCode::OK, serde_json::json!(weekly_trends(&samples, &series)))
}

/// Inner trigger: starts a background scrape and acknowledges immediately.
/// Failures surface only through `/scraper/status` and the logs.
pub fn trigger_inner(runner: &Arc<ScrapeRunner>) -> (StatusCode, serde_json::Value) {
    let body = match runner.spawn("manual") {
        StartOutcome::Started => serde_json::json!({
            "message": "Scraping started in background",
            "status": "running",
            "timestamp": Utc::now(),
        }),
        StartOutcome::AlreadyRunning => serde_json::json!({
            "message": "A scrape is already in progress",
            "status": "already_running",
            "timestamp": Utc::now(),
        }),
    };
    (StatusCode::OK, body)
}

/// Inner status: newest scrape timestamp, totals and run state.
pub async fn status_inner(
    store: &dyn Store,
    runner: &ScrapeRunner,
    schedule_enabled: bool,
) -> (StatusCode, serde_json::Value) {
    let last_scraped = match store.latest_scraped_at().await {
        Ok(t) => t,
        Err(e) => return internal_error("Failed to read last scrape time", e),
    };
    let total_posts = match store.post_stats(Utc::now()).await {
        Ok(s) => s.total_posts,
        Err(e) => return internal_error("Failed to count posts", e),
    };

    let running = runner.is_running();
    let (schedule, next_run) = if schedule_enabled {
        (SCHEDULE_DESCRIPTION, Some(next_weekly_run(Utc::now())))
    } else {
        ("disabled", None)
    };

    (
        StatusCode::OK,
        serde_json::json!({
            "lastScraped": last_scraped,
            "totalPosts": total_posts,
            "status": if running { "running" } else { "idle" },
            "running": running,
            "lastRun": runner.last_run(),
            "schedule": schedule,
            "nextScheduled": next_run,
        }),
    )
}

/// Inner category request: validates and stores a topic suggestion.
pub async fn category_request_inner(
    store: &dyn Store,
    body: CategoryRequestBody,
) -> (StatusCode, serde_json::Value) {
    let request = match NewCategoryRequest::parse(body.name.as_deref(), body.description.as_deref()) {
        Ok(r) => r,
        Err(e) => return (StatusCode::BAD_REQUEST, error_body(e.to_string())),
    };

    match store.insert_category_request(&request).await {
        Ok(stored) => {
            tracing::info!(request_id = %stored.id, name = %stored.name, "Category request submitted");
            (
                StatusCode::CREATED,
                serde_json::json!({
                    "message": "Category request submitted",
                    "data": stored,
                }),
            )
        }
        Err(e) => internal_error("Failed to store category request", e),
    }
}

// ============================================================================
// Axum handler wrappers (thin: delegate to inner functions)
// ============================================================================

pub async fn health_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = health_inner(state.store.as_ref()).await;
    (status, Json(body))
}

pub async fn posts_handler(
    State(state): State<Arc<HttpState>>,
    Query(params): Query<PostsParams>,
) -> impl IntoResponse {
    let (status, body) = posts_inner(state.store.as_ref(), params).await;
    (status, Json(body))
}

pub async fn categories_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = categories_inner(state.store.as_ref()).await;
    (status, Json(body))
}

pub async fn product_areas_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = product_areas_inner(state.store.as_ref()).await;
    (status, Json(body))
}

pub async fn summary_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = summary_inner(state.store.as_ref()).await;
    (status, Json(body))
}

pub async fn trends_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = trends_inner(state.store.as_ref(), AssignmentKind::Category).await;
    (status, Json(body))
}

pub async fn product_area_trends_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = trends_inner(state.store.as_ref(), AssignmentKind::ProductArea).await;
    (status, Json(body))
}

pub async fn trigger_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) = trigger_inner(&state.runner);
    (status, Json(body))
}

pub async fn status_handler(State(state): State<Arc<HttpState>>) -> impl IntoResponse {
    let (status, body) =
        status_inner(state.store.as_ref(), &state.runner, state.schedule_enabled).await;
    (status, Json(body))
}

pub async fn category_request_handler(
    State(state): State<Arc<HttpState>>,
    Json(body): Json<CategoryRequestBody>,
) -> impl IntoResponse {
    let (status, body) = category_request_inner(state.store.as_ref(), body).await;
    (status, Json(body))
}

// ============================================================================
// Unit Tests: call inner functions directly against the in-memory store
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use subpulse_core::models::{NewCategory, NewCategoryAssignment, NewPost};
    use subpulse_core::store::{AssignmentStore, MemoryStore, PostStore, TaxonomyStore};

    async fn post(store: &MemoryStore, id: &str, title: &str, score: i32, age_days: i64) -> Post {
        store
            .insert_post_if_absent(&NewPost {
                source_id: id.into(),
                title: title.into(),
                content: String::new(),
                author: "a".into(),
                score,
                num_comments: 0,
                permalink: String::new(),
                thumbnail: None,
                link_flair_text: None,
                created_at: Utc::now() - Duration::days(age_days),
            })
            .await
            .unwrap()
            .unwrap()
    }

    /// Knowledge > {Retrieval, Formatting}, plus a flat General.
    async fn seeded() -> MemoryStore {
        let store = MemoryStore::new();
        let leaf = |name: &str, sort_order| NewCategory {
            name: name.into(),
            description: None,
            sort_order,
            children: vec![],
        };
        store
            .replace_categories(&[
                NewCategory {
                    name: "Knowledge".into(),
                    description: None,
                    sort_order: 0,
                    children: vec![leaf("Knowledge Retrieval", 0), leaf("Knowledge Formatting", 1)],
                },
                leaf("General", 1),
            ])
            .await
            .unwrap();
        store
    }

    async fn assign(store: &MemoryStore, post: &Post, category: &str) {
        let categories = store.active_categories().await.unwrap();
        let c = categories.iter().find(|c| c.name == category).unwrap();
        store
            .insert_category_assignments(&[NewCategoryAssignment {
                post_id: post.id,
                category_id: c.id,
                confidence: 0.8,
                taxonomy_version: c.taxonomy_version,
            }])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_health_inner_memory_store() {
        let store = MemoryStore::new();
        let (status, body) = health_inner(&store).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["database"], "connected");
        assert_eq!(body["backend"], "memory");
    }

    #[tokio::test]
    async fn test_posts_inner_parent_filter_expands() {
        let store = seeded().await;
        let a = post(&store, "a", "retrieval question", 1, 0).await;
        let b = post(&store, "b", "formatting question", 1, 1).await;
        let c = post(&store, "c", "general question", 1, 2).await;
        assign(&store, &a, "Knowledge Retrieval").await;
        assign(&store, &b, "Knowledge Formatting").await;
        assign(&store, &c, "General").await;

        let params = PostsParams {
            category: Some("Knowledge".into()),
            ..Default::default()
        };
        let (status, body) = posts_inner(&store, params).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pagination"]["total"], 2);
        assert_eq!(body["data"][0]["source_id"], "a");
        assert_eq!(
            body["data"][0]["post_categories"][0]["categories"]["parent_name"],
            "Knowledge"
        );

        let params = PostsParams {
            category: Some("Knowledge Formatting".into()),
            ..Default::default()
        };
        let (_, body) = posts_inner(&store, params).await;
        assert_eq!(body["pagination"]["total"], 1);
        assert_eq!(body["data"][0]["source_id"], "b");
    }

    #[tokio::test]
    async fn test_posts_inner_pagination() {
        let store = seeded().await;
        for i in 0..5 {
            post(&store, &format!("p{}", i), "t", i, i as i64).await;
        }

        let params = PostsParams {
            page: Some(2),
            limit: Some(2),
            sort_by: Some("score".into()),
            sort_order: Some("asc".into()),
            ..Default::default()
        };
        let (_, body) = posts_inner(&store, params).await;
        assert_eq!(body["pagination"]["totalPages"], 3);
        assert_eq!(body["data"].as_array().unwrap().len(), 2);
        assert_eq!(body["data"][0]["score"], 2);
    }

    #[tokio::test]
    async fn test_categories_inner_rolls_up() {
        let store = seeded().await;
        for i in 0..3 {
            let p = post(&store, &format!("r{}", i), "t", 0, 0).await;
            assign(&store, &p, "Knowledge Retrieval").await;
        }
        let p = post(&store, "f", "t", 0, 0).await;
        assign(&store, &p, "Knowledge Formatting").await;

        let (status, body) = categories_inner(&store).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"][0]["name"], "Knowledge");
        assert_eq!(body["data"][0]["post_count"], 4);
        assert_eq!(body["data"][0]["subcategories"][0]["post_count"], 3);
        assert_eq!(body["flat"].as_array().unwrap().len(), 4);
    }

    #[tokio::test]
    async fn test_summary_inner() {
        let store = seeded().await;
        post(&store, "a", "t", 3, 0).await;
        post(&store, "b", "t", 4, 10).await;
        post(&store, "c", "t", 4, 30).await;

        let (_, body) = summary_inner(&store).await;
        assert_eq!(body["totalPosts"], 3);
        assert_eq!(body["totalCategories"], 4);
        assert_eq!(body["recentPosts"], 1);
        assert_eq!(body["avgScore"], 3.67);
    }

    #[tokio::test]
    async fn test_category_request_inner_validation() {
        let store = MemoryStore::new();

        let (status, body) = category_request_inner(
            &store,
            CategoryRequestBody {
                name: Some("   ".into()),
                description: None,
            },
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["status"], "error");

        let (status, body) = category_request_inner(
            &store,
            CategoryRequestBody {
                name: Some("  Voice channels ".into()),
                description: Some("phone bots".into()),
            },
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["data"]["name"], "Voice channels");
        assert_eq!(body["data"]["status"], "pending");
    }

    #[test]
    fn test_round_to() {
        assert_eq!(round_to(3.666_666, 2), 3.67);
        assert_eq!(round_to(0.0, 2), 0.0);
    }
}
