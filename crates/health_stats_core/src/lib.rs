//! `HealthDataSource` trait, daily record model and the aggregation/export core.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

pub mod aggregator;
pub mod config;
pub mod export;
pub mod memory;
pub mod observability;
pub mod utils;

pub use aggregator::{DailyAggregator, FetchStrategy};
pub use config::{Config, ExportConfig};
pub use export::CsvExporter;
pub use memory::InMemoryHealthStore;

/// Errors raised by a [`HealthDataSource`].
#[derive(Debug, Error)]
pub enum HealthDataError {
    /// Read access to a metric was never granted (or was revoked).
    #[error("not authorized to read {0}")]
    Unauthorized(String),
    #[error("authorization failed: {0}")]
    AuthorizationDenied(String),
    #[error("query failed: {0}")]
    Query(String),
    #[error("query timed out: {0}")]
    Timeout(String),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("invalid sample data: {0}")]
    Json(#[from] serde_json::Error),
}

/// Aggregation failure. No partial day list survives one of these.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("failed to fetch {metric} for {day}: {source}")]
    Query {
        metric: MetricKind,
        day: NaiveDate,
        #[source]
        source: HealthDataError,
    },
    #[error("fetch cancelled")]
    Cancelled,
}

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("failed to write {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to encode csv: {0}")]
    Csv(#[from] csv::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value for {name}: {value}")]
    Invalid { name: &'static str, value: String },
}

/// The six tracked quantities, in CSV column order.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    Steps,
    ActiveEnergy,
    Carbs,
    Proteins,
    Fats,
    Calories,
}

impl MetricKind {
    pub const ALL: [MetricKind; 6] = [
        MetricKind::Steps,
        MetricKind::ActiveEnergy,
        MetricKind::Carbs,
        MetricKind::Proteins,
        MetricKind::Fats,
        MetricKind::Calories,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricKind::Steps => "steps",
            MetricKind::ActiveEnergy => "active_energy",
            MetricKind::Carbs => "carbs",
            MetricKind::Proteins => "proteins",
            MetricKind::Fats => "fats",
            MetricKind::Calories => "calories",
        }
    }

    /// Unit the summed quantity is expressed in.
    pub fn unit(&self) -> &'static str {
        match self {
            MetricKind::Steps => "count",
            MetricKind::ActiveEnergy | MetricKind::Calories => "kcal",
            MetricKind::Carbs | MetricKind::Proteins | MetricKind::Fats => "g",
        }
    }
}

impl std::fmt::Display for MetricKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One calendar day's aggregated metrics.
#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct DailyRecord {
    pub date: NaiveDate,
    pub steps: f64,
    pub active_energy: f64,
    pub carbs: f64,
    pub proteins: f64,
    pub fats: f64,
    pub calories: f64,
}

impl DailyRecord {
    /// Build a record from per-metric sums. Metrics missing from `sums` are `0`.
    pub fn from_sums(date: NaiveDate, sums: &[(MetricKind, f64)]) -> Self {
        let get = |kind: MetricKind| {
            sums.iter()
                .find(|(k, _)| *k == kind)
                .map(|(_, v)| *v)
                .unwrap_or(0.0)
        };
        Self {
            date,
            steps: get(MetricKind::Steps),
            active_energy: get(MetricKind::ActiveEnergy),
            carbs: get(MetricKind::Carbs),
            proteins: get(MetricKind::Proteins),
            fats: get(MetricKind::Fats),
            calories: get(MetricKind::Calories),
        }
    }

    pub fn value(&self, metric: MetricKind) -> f64 {
        match metric {
            MetricKind::Steps => self.steps,
            MetricKind::ActiveEnergy => self.active_energy,
            MetricKind::Carbs => self.carbs,
            MetricKind::Proteins => self.proteins,
            MetricKind::Fats => self.fats,
            MetricKind::Calories => self.calories,
        }
    }
}

/// Inclusive range of calendar days.
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Self {
        Self { start, end }
    }

    /// `days` days before `today` through `today`, the default report window.
    pub fn last_days(days: u32, today: NaiveDate) -> Self {
        let start = today
            .checked_sub_days(chrono::Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MIN);
        Self { start, end: today }
    }

    /// Signed distance in days from `start` to `end`; negative when inverted.
    pub fn day_count(&self) -> i64 {
        (self.end - self.start).num_days()
    }

    /// Every day of the range in ascending order; empty when inverted.
    pub fn days(&self) -> impl Iterator<Item = NaiveDate> + use<> {
        let start = self.start;
        let count = self.day_count();
        (0..=count).filter_map(move |offset| start.checked_add_days(chrono::Days::new(offset as u64)))
    }
}

/// A materialized CSV export.
#[derive(Clone, Debug, Serialize, PartialEq)]
pub struct ExportArtifact {
    pub path: PathBuf,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub excluded_from_backup: bool,
}

/// Read-only provider of cumulative metric sums.
#[async_trait]
pub trait HealthDataSource: Send + Sync + 'static {
    /// Request read access for `metrics`. Idempotent.
    async fn request_authorization(&self, metrics: &[MetricKind]) -> Result<(), HealthDataError>;

    /// Cumulative sum of `metric` over `[start, end)`; `0` when no samples exist.
    async fn query_sum(
        &self,
        metric: MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64, HealthDataError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[test]
    fn date_range_days_are_inclusive_and_ascending() {
        let range = DateRange::new(day("2025-02-27"), day("2025-03-02"));
        let days: Vec<_> = range.days().collect();
        assert_eq!(
            days,
            vec![day("2025-02-27"), day("2025-02-28"), day("2025-03-01"), day("2025-03-02")]
        );
        assert_eq!(range.day_count(), 3);
    }

    #[test]
    fn inverted_range_has_no_days() {
        let range = DateRange::new(day("2025-03-02"), day("2025-03-01"));
        assert_eq!(range.day_count(), -1);
        assert_eq!(range.days().count(), 0);
    }

    #[test]
    fn last_days_spans_eight_days_for_a_week() {
        let range = DateRange::last_days(7, day("2025-12-15"));
        assert_eq!(range.start, day("2025-12-08"));
        assert_eq!(range.days().count(), 8);
    }

    #[test]
    fn from_sums_defaults_missing_metrics_to_zero() {
        let rec = DailyRecord::from_sums(day("2025-01-01"), &[(MetricKind::Steps, 1200.0)]);
        assert_eq!(rec.steps, 1200.0);
        assert_eq!(rec.fats, 0.0);
        assert_eq!(rec.value(MetricKind::Calories), 0.0);
    }

    #[test]
    fn metric_kind_serializes_snake_case() {
        let v = serde_json::to_value(MetricKind::ActiveEnergy).expect("serialize");
        assert_eq!(v, serde_json::json!("active_energy"));
        let k: MetricKind = serde_json::from_value(serde_json::json!("proteins")).expect("deserialize");
        assert_eq!(k, MetricKind::Proteins);
        assert_eq!(MetricKind::Proteins.unit(), "g");
    }
}
