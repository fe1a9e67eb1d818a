//! Summary backfill: one-sentence summaries for posts that have none.

use serde::Serialize;
use subpulse_core::classifier::LlmClassifier;
use subpulse_core::store::Store;

use crate::subsystems::classify::Pacer;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SummaryReport {
    pub examined: usize,
    pub summarized: usize,
    pub failed: usize,
    pub rate_limited: bool,
}

pub async fn run_summaries(
    store: &dyn Store,
    llm: &LlmClassifier,
    pacer: &mut Pacer,
    limit: i64,
) -> anyhow::Result<SummaryReport> {
    let posts = store.posts_without_summary(limit).await?;
    let mut report = SummaryReport::default();

    tracing::info!(candidates = posts.len(), backend = llm.backend_name(), "Summary backfill started");

    for post in &posts {
        report.examined += 1;
        pacer.wait().await;

        let summary = match llm.summarize(&post.title, &post.content).await {
            Ok(s) if !s.is_empty() => s,
            Ok(_) => {
                tracing::warn!(post_id = %post.id, "Empty summary returned, skipping");
                report.failed += 1;
                continue;
            }
            Err(e) if e.is_rate_limited() => {
                report.rate_limited = true;
                tracing::warn!(post_id = %post.id, "Rate limited, halting summary backfill");
                break;
            }
            Err(e) => {
                tracing::warn!(post_id = %post.id, error = %e, "Summary request failed, skipping");
                report.failed += 1;
                continue;
            }
        };

        match store.set_summary(post.id, &summary).await {
            Ok(()) => report.summarized += 1,
            Err(e) => {
                tracing::warn!(post_id = %post.id, error = %e, "Failed to store summary");
                report.failed += 1;
            }
        }
    }

    tracing::info!(
        summarized = report.summarized,
        failed = report.failed,
        rate_limited = report.rate_limited,
        "Summary backfill complete"
    );

    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Utc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use subpulse_core::classifier::SUMMARY_MAX_CHARS;
    use subpulse_core::llm::{CompletionBackend, CompletionRequest, LlmError};
    use subpulse_core::models::NewPost;
    use subpulse_core::store::{MemoryStore, PostListQuery, PostStore};

    /// Answers with a long summary until `limit_after` calls, then rate limits.
    struct SummaryBackend {
        calls: AtomicUsize,
        limit_after: usize,
    }

    #[async_trait]
    impl CompletionBackend for SummaryBackend {
        async fn complete(&self, _req: &CompletionRequest) -> Result<String, LlmError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n >= self.limit_after {
                return Err(LlmError::RateLimited {
                    message: "quota exceeded".into(),
                });
            }
            Ok(format!("Summary: {}", "x".repeat(300)))
        }
        fn name(&self) -> &str {
            "summary"
        }
    }

    async fn store_with(n: usize) -> MemoryStore {
        let store = MemoryStore::new();
        for i in 0..n {
            store
                .insert_post_if_absent(&NewPost {
                    source_id: format!("p{}", i),
                    title: format!("Post {}", i),
                    content: "body".into(),
                    author: "a".into(),
                    score: 0,
                    num_comments: 0,
                    permalink: String::new(),
                    thumbnail: None,
                    link_flair_text: None,
                    created_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_summaries_truncated_and_halt_on_rate_limit() {
        let store = store_with(3).await;
        let backend = Arc::new(SummaryBackend {
            calls: AtomicUsize::new(0),
            limit_after: 2,
        });
        let llm = LlmClassifier::new(backend.clone(), 0.3, 500);
        let mut pacer = Pacer::new(Duration::ZERO);

        let report = run_summaries(&store, &llm, &mut pacer, 10).await.unwrap();

        assert_eq!(report.summarized, 2);
        assert!(report.rate_limited);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);

        let posts = store.list_posts(&PostListQuery::default()).await.unwrap().posts;
        let summaries: Vec<&String> = posts.iter().filter_map(|p| p.ai_summary.as_ref()).collect();
        assert_eq!(summaries.len(), 2);
        assert!(summaries.iter().all(|s| s.chars().count() == SUMMARY_MAX_CHARS));
        assert_eq!(store.posts_without_summary(10).await.unwrap().len(), 1);
    }
}
