//! Weekly percentage-of-total trend series.

use std::collections::{BTreeMap, HashMap, HashSet};

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

/// Default lookback for the analytics trend endpoints.
pub const TREND_WINDOW_DAYS: i64 = 365;

/// One post as seen by the trend computation: its creation time and the
/// names of the categories (or product areas) it is assigned to.
#[derive(Debug, Clone, PartialEq)]
pub struct TrendSample {
    pub created_at: DateTime<Utc>,
    pub names: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrendDataset {
    pub label: String,
    pub data: Vec<f64>,
}

/// Chart-ready series: one label per week that has posts, one dataset per
/// requested name with a percentage per week.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct TrendSeries {
    pub labels: Vec<String>,
    pub datasets: Vec<TrendDataset>,
}

/// Sunday that starts the UTC week containing `ts`.
pub fn week_start(ts: DateTime<Utc>) -> NaiveDate {
    let date = ts.date_naive();
    date - Duration::days(date.weekday().num_days_from_sunday() as i64)
}

/// "Mar 3" style label.
pub fn week_label(week: NaiveDate) -> String {
    week.format("%b %-d").to_string()
}

pub fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[derive(Default)]
struct WeekBucket {
    total: u64,
    counts: HashMap<String, u64>,
}

/// Bucket samples by Sunday-aligned week and compute, for each name in
/// `series`, `count / total * 100` rounded to one decimal.
///
/// Weeks with no posts do not appear. A post counts at most once per name.
pub fn weekly_trends(samples: &[TrendSample], series: &[String]) -> TrendSeries {
    let mut weeks: BTreeMap<NaiveDate, WeekBucket> = BTreeMap::new();

    for sample in samples {
        let bucket = weeks.entry(week_start(sample.created_at)).or_default();
        bucket.total += 1;

        let unique: HashSet<&str> = sample.names.iter().map(String::as_str).collect();
        for name in unique {
            *bucket.counts.entry(name.to_string()).or_insert(0) += 1;
        }
    }

    let labels = weeks.keys().copied().map(week_label).collect();
    let datasets = series
        .iter()
        .map(|name| TrendDataset {
            label: name.clone(),
            data: weeks
                .values()
                .map(|bucket| {
                    let count = bucket.counts.get(name).copied().unwrap_or(0);
                    round1(count as f64 / bucket.total as f64 * 100.0)
                })
                .collect(),
        })
        .collect();

    TrendSeries { labels, datasets }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32, h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap()
    }

    fn sample(ts: DateTime<Utc>, names: &[&str]) -> TrendSample {
        TrendSample {
            created_at: ts,
            names: names.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_week_start_is_sunday() {
        // 2024-03-06 is a Wednesday
        assert_eq!(
            week_start(at(2024, 3, 6, 15)),
            NaiveDate::from_ymd_opt(2024, 3, 3).unwrap()
        );
        // Sunday maps to itself, Saturday to the previous Sunday
        assert_eq!(
            week_start(at(2024, 3, 3, 0)),
            NaiveDate::from_ymd_opt(2024, 3, 3).unwrap()
        );
        assert_eq!(
            week_start(at(2024, 3, 9, 23)),
            NaiveDate::from_ymd_opt(2024, 3, 3).unwrap()
        );
        assert_eq!(week_label(NaiveDate::from_ymd_opt(2024, 3, 3).unwrap()), "Mar 3");
    }

    #[test]
    fn test_weekly_percentages() {
        let samples = vec![
            sample(at(2024, 3, 4, 10), &["Flows"]),
            sample(at(2024, 3, 5, 10), &["Flows", "Knowledge Retrieval"]),
            sample(at(2024, 3, 6, 10), &[]),
            // a gap week with no posts, then one post
            sample(at(2024, 3, 20, 10), &["Knowledge Retrieval"]),
        ];
        let series = vec!["Flows".to_string(), "Knowledge Retrieval".to_string()];

        let trends = weekly_trends(&samples, &series);

        assert_eq!(trends.labels, vec!["Mar 3", "Mar 17"]);
        assert_eq!(trends.datasets[0].label, "Flows");
        assert_eq!(trends.datasets[0].data, vec![66.7, 0.0]);
        assert_eq!(trends.datasets[1].data, vec![33.3, 100.0]);
    }

    #[test]
    fn test_duplicate_names_count_once() {
        let samples = vec![sample(at(2024, 3, 4, 10), &["Flows", "Flows"])];
        let trends = weekly_trends(&samples, &["Flows".to_string()]);
        assert_eq!(trends.datasets[0].data, vec![100.0]);
    }

    #[test]
    fn test_no_samples_yields_empty_weeks() {
        let trends = weekly_trends(&[], &["Flows".to_string()]);
        assert!(trends.labels.is_empty());
        assert_eq!(trends.datasets.len(), 1);
        assert!(trends.datasets[0].data.is_empty());
    }
}
