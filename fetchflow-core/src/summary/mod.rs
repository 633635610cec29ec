use std::time::Duration;

use serde::Serialize;

use crate::types::{FetchResult, ResultStatus};

/// Aggregate view over one batch of results.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchSummary {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rejected: usize,
    pub invalid: usize,
    /// Percentage of successful tasks, 0..=100.
    pub success_rate: f64,
    pub total_items: usize,
    #[serde(rename = "total_duration_ms", serialize_with = "serialize_ms")]
    pub total_duration: Duration,
    #[serde(rename = "avg_duration_ms", serialize_with = "serialize_ms")]
    pub avg_duration: Duration,
    pub avg_items_per_source: f64,
    pub items_per_second: f64,
}

impl BatchSummary {
    pub fn from_results(results: &[FetchResult]) -> Self {
        let mut summary = BatchSummary {
            total: results.len(),
            ..Default::default()
        };

        for r in results {
            match r.status() {
                ResultStatus::Succeeded => {
                    summary.succeeded += 1;
                    summary.total_items += r.item_count();
                }
                ResultStatus::Failed => summary.failed += 1,
                ResultStatus::Rejected => summary.rejected += 1,
                ResultStatus::Invalid => summary.invalid += 1,
            }
            summary.total_duration += r.duration;
        }

        if summary.total > 0 {
            summary.success_rate = summary.succeeded as f64 / summary.total as f64 * 100.0;
            summary.avg_duration = summary.total_duration.div_f64(summary.total as f64);
        }
        if summary.succeeded > 0 {
            summary.avg_items_per_source = summary.total_items as f64 / summary.succeeded as f64;
        }
        let secs = summary.total_duration.as_secs_f64();
        if secs > 0.0 {
            summary.items_per_second = summary.total_items as f64 / secs;
        }
        summary
    }

    pub fn unsuccessful(&self) -> usize {
        self.total - self.succeeded
    }

    pub fn all_succeeded(&self) -> bool {
        self.total == self.succeeded
    }
}

/// Sources whose final result was not a success, in result order.
pub fn failed_sources(results: &[FetchResult]) -> Vec<(&str, ResultStatus)> {
    results
        .iter()
        .filter(|r| !r.success)
        .map(|r| (r.source.as_str(), r.status()))
        .collect()
}

fn serialize_ms<S: serde::Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
    s.serialize_u64(d.as_millis().min(u64::MAX as u128) as u64)
}
