//! Ingestion Loop
//!
//! Pages through the feed newest-first, keeps items inside the time window,
//! inserts unseen posts and classifies each one before moving on. Stops at
//! the target count, on a page with no qualifying items, when the cursor runs
//! out, or at the page ceiling.

use chrono::{Duration, Utc};
use serde::Serialize;
use subpulse_core::config::{FeedConfig, IngestConfig};
use subpulse_core::models::NewPost;
use subpulse_core::store::Store;
use subpulse_ingest::{FeedItem, FeedSource};

use crate::subsystems::classify::{ClassifyBatch, ClassifyError, Orchestrator, PostOutcome};

const PERMALINK_BASE: &str = "https://reddit.com";

#[derive(Debug, Clone)]
pub struct IngestSettings {
    pub target_count: usize,
    pub max_pages: usize,
    pub page_size: u32,
    pub window: Duration,
    pub classify_product_areas: bool,
}

impl IngestSettings {
    pub fn from_config(ingest: &IngestConfig, feed: &FeedConfig, classify_product_areas: bool) -> Self {
        Self {
            target_count: ingest.target_count,
            max_pages: ingest.max_pages,
            page_size: feed.page_size,
            window: Duration::hours(ingest.window_hours),
            classify_product_areas,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct IngestReport {
    pub pages: usize,
    /// Items inside the time window that were looked at.
    pub fetched: usize,
    pub inserted: usize,
    /// Already stored.
    pub skipped: usize,
    pub failed: usize,
    pub classified: usize,
    pub product_areas_classified: usize,
    /// The provider signalled a rate limit and the run stopped early.
    pub rate_limited: bool,
}

/// Map a feed item to an insert form. `None` when the timestamp is unusable.
pub fn to_new_post(item: &FeedItem) -> Option<NewPost> {
    let created_at = item.created_at()?;
    let permalink = if item.permalink.starts_with('/') {
        format!("{}{}", PERMALINK_BASE, item.permalink)
    } else {
        item.permalink.clone()
    };

    Some(NewPost {
        source_id: item.id.clone(),
        title: item.title.clone(),
        content: item.selftext.clone(),
        author: item.author.clone(),
        score: item.score.clamp(i32::MIN as i64, i32::MAX as i64) as i32,
        num_comments: item.num_comments.clamp(0, i32::MAX as i64) as i32,
        permalink,
        thumbnail: item.thumbnail_url().map(str::to_string),
        link_flair_text: item.flair().map(str::to_string),
        created_at,
    })
}

/// Run one ingestion pass. Feed errors abort the run; per-post store errors
/// are logged and counted.
pub async fn run_ingest(
    feed: &dyn FeedSource,
    store: &dyn Store,
    orchestrator: &Orchestrator,
    settings: &IngestSettings,
) -> anyhow::Result<IngestReport> {
    let cutoff = Utc::now() - settings.window;
    let mut report = IngestReport::default();
    let mut batch = orchestrator.begin_batch(store).await?;
    let mut after: Option<String> = None;

    tracing::info!(
        feed = feed.name(),
        target = settings.target_count,
        cutoff = %cutoff,
        "Ingestion run started"
    );

    while report.pages < settings.max_pages && report.fetched < settings.target_count {
        let page = feed.fetch_page(after.as_deref(), settings.page_size).await?;
        report.pages += 1;

        let qualifying: Vec<&FeedItem> = page
            .items
            .iter()
            .filter(|item| item.created_at().is_some_and(|t| t >= cutoff))
            .collect();

        if qualifying.is_empty() {
            tracing::debug!(page = report.pages, "No qualifying items on page, stopping");
            break;
        }

        let remaining = settings.target_count - report.fetched;
        for item in qualifying.into_iter().take(remaining) {
            report.fetched += 1;
            if let Err(ClassifyError::RateLimited) =
                ingest_item(item, store, &mut batch, settings, &mut report).await
            {
                report.rate_limited = true;
                tracing::warn!(source_id = %item.id, "Rate limited, halting ingestion run");
                return Ok(report);
            }
        }

        match page.after {
            Some(next) => after = Some(next),
            None => break,
        }
    }

    tracing::info!(
        pages = report.pages,
        fetched = report.fetched,
        inserted = report.inserted,
        skipped = report.skipped,
        failed = report.failed,
        classified = report.classified,
        "Ingestion run complete"
    );

    Ok(report)
}

/// Insert and classify one item. Only the rate-limit condition is returned
/// as an error; everything else is recorded in the report.
async fn ingest_item(
    item: &FeedItem,
    store: &dyn Store,
    batch: &mut ClassifyBatch<'_>,
    settings: &IngestSettings,
    report: &mut IngestReport,
) -> Result<(), ClassifyError> {
    match store.post_exists(&item.id).await {
        Ok(true) => {
            report.skipped += 1;
            return Ok(());
        }
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(source_id = %item.id, error = %e, "Dedup check failed, skipping item");
            report.failed += 1;
            return Ok(());
        }
    }

    let Some(new_post) = to_new_post(item) else {
        report.failed += 1;
        return Ok(());
    };

    let post = match store.insert_post_if_absent(&new_post).await {
        Ok(Some(post)) => post,
        Ok(None) => {
            report.skipped += 1;
            return Ok(());
        }
        Err(e) => {
            tracing::warn!(source_id = %item.id, error = %e, "Failed to insert post");
            report.failed += 1;
            return Ok(());
        }
    };
    report.inserted += 1;

    match batch.classify_categories(store, &post).await {
        Ok(PostOutcome::Classified { .. }) => report.classified += 1,
        Ok(_) => {}
        Err(ClassifyError::RateLimited) => return Err(ClassifyError::RateLimited),
        Err(e) => {
            tracing::warn!(post_id = %post.id, error = %e, "Failed to classify post");
            report.failed += 1;
        }
    }

    if settings.classify_product_areas {
        match batch.classify_product_areas(store, &post).await {
            Ok(PostOutcome::Classified { .. }) => report.product_areas_classified += 1,
            Ok(_) => {}
            Err(ClassifyError::RateLimited) => return Err(ClassifyError::RateLimited),
            Err(e) => {
                tracing::warn!(post_id = %post.id, error = %e, "Failed to classify product areas");
                report.failed += 1;
            }
        }
    }

    Ok(())
}
