//! Scrape runner shared by the HTTP trigger, the weekly schedule and the
//! `--scrape-once` mode. Holds the last run's outcome for status reporting
//! and refuses to start a run while another is in progress.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::Serialize;
use subpulse_core::store::Store;
use subpulse_ingest::FeedSource;

use crate::subsystems::classify::Orchestrator;
use crate::subsystems::ingest::{run_ingest, IngestReport, IngestSettings};

#[derive(Debug, Clone, Serialize)]
pub struct RunRecord {
    pub trigger: String,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub report: Option<IngestReport>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartOutcome {
    Started,
    AlreadyRunning,
}

/// Clears the running flag when dropped.
pub struct RunGuard(Arc<AtomicBool>);

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct ScrapeRunner {
    feed: Arc<dyn FeedSource>,
    store: Arc<dyn Store>,
    orchestrator: Arc<Orchestrator>,
    settings: IngestSettings,
    running: Arc<AtomicBool>,
    last_run: Mutex<Option<RunRecord>>,
}

impl ScrapeRunner {
    pub fn new(
        feed: Arc<dyn FeedSource>,
        store: Arc<dyn Store>,
        orchestrator: Arc<Orchestrator>,
        settings: IngestSettings,
    ) -> Self {
        Self {
            feed,
            store,
            orchestrator,
            settings,
            running: Arc::new(AtomicBool::new(false)),
            last_run: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn last_run(&self) -> Option<RunRecord> {
        self.last_run.lock().ok().and_then(|r| r.clone())
    }

    fn try_begin(&self) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard(Arc::clone(&self.running)))
    }

    fn record(&self, record: RunRecord) {
        if let Ok(mut slot) = self.last_run.lock() {
            *slot = Some(record);
        }
    }

    async fn execute(&self, _guard: RunGuard, trigger: &str) -> anyhow::Result<IngestReport> {
        let started_at = Utc::now();
        self.record(RunRecord {
            trigger: trigger.to_string(),
            started_at,
            finished_at: None,
            report: None,
            error: None,
        });

        tracing::info!(trigger, "Scrape started");
        let result = run_ingest(
            self.feed.as_ref(),
            self.store.as_ref(),
            &self.orchestrator,
            &self.settings,
        )
        .await;

        let (report, error) = match &result {
            Ok(report) => (Some(report.clone()), None),
            Err(e) => {
                tracing::error!(trigger, error = %e, "Scrape failed");
                (None, Some(e.to_string()))
            }
        };
        self.record(RunRecord {
            trigger: trigger.to_string(),
            started_at,
            finished_at: Some(Utc::now()),
            report,
            error,
        });

        result
    }

    /// Run to completion on the current task. `None` when a run is already
    /// in progress.
    pub async fn run_once(&self, trigger: &str) -> Option<anyhow::Result<IngestReport>> {
        let guard = self.try_begin()?;
        Some(self.execute(guard, trigger).await)
    }

    /// Start a run in the background and return immediately.
    pub fn spawn(self: &Arc<Self>, trigger: &'static str) -> StartOutcome {
        let Some(guard) = self.try_begin() else {
            return StartOutcome::AlreadyRunning;
        };

        let runner = Arc::clone(self);
        tokio::spawn(async move {
            // Outcome is recorded in `last_run`.
            let _ = runner.execute(guard, trigger).await;
        });
        StartOutcome::Started
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::time::Duration;
    use subpulse_core::keywords::KeywordTable;
    use subpulse_core::store::MemoryStore;
    use subpulse_ingest::{FeedError, FeedPage};
    use tokio::sync::Notify;

    /// Feed that blocks until released, then returns an empty page.
    struct GatedFeed {
        gate: Notify,
    }

    #[async_trait]
    impl FeedSource for GatedFeed {
        async fn fetch_page(&self, _after: Option<&str>, _limit: u32) -> Result<FeedPage, FeedError> {
            self.gate.notified().await;
            Ok(FeedPage::default())
        }
        fn name(&self) -> &str {
            "gated"
        }
    }

    /// Feed that always fails.
    struct BrokenFeed;

    #[async_trait]
    impl FeedSource for BrokenFeed {
        async fn fetch_page(&self, _after: Option<&str>, _limit: u32) -> Result<FeedPage, FeedError> {
            Err(FeedError::Status {
                code: 503,
                body: "unavailable".into(),
            })
        }
        fn name(&self) -> &str {
            "broken"
        }
    }

    fn settings() -> IngestSettings {
        IngestSettings {
            target_count: 10,
            max_pages: 2,
            page_size: 10,
            window: chrono::Duration::hours(168),
            classify_product_areas: false,
        }
    }

    fn runner(feed: Arc<dyn FeedSource>) -> Arc<ScrapeRunner> {
        let orchestrator = Orchestrator::new(None, Arc::new(KeywordTable::default()), "General", Duration::ZERO);
        Arc::new(ScrapeRunner::new(
            feed,
            Arc::new(MemoryStore::new()),
            Arc::new(orchestrator),
            settings(),
        ))
    }

    #[tokio::test]
    async fn test_second_start_reports_already_running() {
        let feed = Arc::new(GatedFeed { gate: Notify::new() });
        let runner = runner(feed.clone());

        assert_eq!(runner.spawn("test"), StartOutcome::Started);
        assert!(runner.is_running());
        assert_eq!(runner.spawn("test"), StartOutcome::AlreadyRunning);
        assert!(runner.run_once("test").await.is_none());

        feed.gate.notify_one();
        for _ in 0..100 {
            if !runner.is_running() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        assert!(!runner.is_running());
        let last = runner.last_run().unwrap();
        assert!(last.finished_at.is_some());
        assert_eq!(last.report.unwrap().pages, 1);
    }

    #[tokio::test]
    async fn test_feed_failure_is_recorded() {
        let runner = runner(Arc::new(BrokenFeed));

        let result = runner.run_once("manual").await.unwrap();
        assert!(result.is_err());

        let last = runner.last_run().unwrap();
        assert_eq!(last.trigger, "manual");
        assert!(last.error.unwrap().contains("503"));
        assert!(!runner.is_running());
    }
}
