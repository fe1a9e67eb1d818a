pub mod backfill;
pub mod classify;
pub mod ingest;
pub mod schedule;
pub mod scraper;
pub mod summarize;
pub mod taxonomy;
