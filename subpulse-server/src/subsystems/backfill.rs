//! Backfill / reclassification over already-stored posts that hold no
//! assignment rows of the requested kind.

use serde::Serialize;
use subpulse_core::models::AssignmentKind;
use subpulse_core::store::Store;

use crate::subsystems::classify::{ClassifyError, Orchestrator, PostOutcome};

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BackfillReport {
    pub examined: usize,
    pub classified: usize,
    pub already_classified: usize,
    pub skipped: usize,
    pub failed: usize,
    pub rate_limited: bool,
}

/// Classify up to `limit` unclassified posts, newest first. Halts on the
/// first rate-limit signal.
pub async fn run_backfill(
    store: &dyn Store,
    orchestrator: &Orchestrator,
    kind: AssignmentKind,
    limit: i64,
) -> anyhow::Result<BackfillReport> {
    let posts = store.unclassified_posts(kind, limit).await?;
    let mut batch = orchestrator.begin_batch(store).await?;
    let mut report = BackfillReport::default();

    tracing::info!(kind = kind.as_str(), candidates = posts.len(), "Backfill started");

    for post in &posts {
        report.examined += 1;

        let outcome = match kind {
            AssignmentKind::Category => batch.classify_categories(store, post).await,
            AssignmentKind::ProductArea => batch.classify_product_areas(store, post).await,
        };

        match outcome {
            Ok(PostOutcome::Classified { .. }) => report.classified += 1,
            Ok(PostOutcome::AlreadyClassified) => report.already_classified += 1,
            Ok(PostOutcome::Skipped) => report.skipped += 1,
            Err(ClassifyError::RateLimited) => {
                report.rate_limited = true;
                tracing::warn!(
                    post_id = %post.id,
                    remaining = posts.len() - report.examined,
                    "Rate limited, halting backfill; rerun later to resume"
                );
                break;
            }
            Err(e) => {
                tracing::warn!(post_id = %post.id, error = %e, "Backfill failed for post, skipping");
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        kind = kind.as_str(),
        classified = report.classified,
        skipped = report.skipped,
        failed = report.failed,
        rate_limited = report.rate_limited,
        "Backfill complete"
    );

    Ok(report)
}
