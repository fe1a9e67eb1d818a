//! Weekly scrape schedule: every Sunday at 00:00 UTC.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, NaiveTime, Utc};
use tokio::sync::broadcast;

use crate::subsystems::scraper::ScrapeRunner;

pub const SCHEDULE_DESCRIPTION: &str = "Every Sunday at 00:00 UTC";

/// First Sunday 00:00 UTC strictly after `now`.
pub fn next_weekly_run(now: DateTime<Utc>) -> DateTime<Utc> {
    let today = now.date_naive();
    let days_ahead = (7 - today.weekday().num_days_from_sunday()) % 7;
    let candidate = (today + Duration::days(days_ahead as i64))
        .and_time(NaiveTime::MIN)
        .and_utc();

    if candidate <= now {
        candidate + Duration::days(7)
    } else {
        candidate
    }
}

/// Fire a scrape at each weekly boundary until shutdown.
pub async fn run_schedule_loop(runner: Arc<ScrapeRunner>, mut shutdown: broadcast::Receiver<()>) {
    tracing::info!(schedule = SCHEDULE_DESCRIPTION, "Scrape schedule started");

    loop {
        let now = Utc::now();
        let next = next_weekly_run(now);
        let wait = (next - now).to_std().unwrap_or_default();
        tracing::debug!(next = %next, "Next scheduled scrape");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                match runner.run_once("schedule").await {
                    Some(Ok(report)) => tracing::info!(
                        inserted = report.inserted,
                        classified = report.classified,
                        rate_limited = report.rate_limited,
                        "Scheduled scrape complete"
                    ),
                    Some(Err(e)) => tracing::error!("Scheduled scrape failed: {}", e),
                    None => tracing::warn!("Scheduled scrape skipped: a run is already in progress"),
                }
            }
            _ = shutdown.recv() => {
                tracing::info!("Scrape schedule shutting down");
                break;
            }
        }
    }
}
