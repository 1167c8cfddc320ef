//! Day-by-day aggregation over a [`HealthDataSource`](crate::HealthDataSource).

use crate::observability;
use crate::utils::{day_window, local_day};
use crate::{DailyRecord, DateRange, FetchError, HealthDataSource, MetricKind};
use chrono::{DateTime, NaiveDate, TimeZone};
use futures_util::future::try_join_all;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// How the six per-day queries are issued.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum FetchStrategy {
    /// One outstanding query at a time.
    #[default]
    Sequential,
    /// All six metrics of a day in flight together; days stay sequential.
    ConcurrentMetrics,
}

impl FetchStrategy {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sequential" => Some(Self::Sequential),
            "concurrent" | "concurrent_metrics" => Some(Self::ConcurrentMetrics),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct DailyAggregator {
    source: Arc<dyn HealthDataSource>,
    strategy: FetchStrategy,
}

impl DailyAggregator {
    pub fn new(source: Arc<dyn HealthDataSource>) -> Self {
        Self {
            source,
            strategy: FetchStrategy::default(),
        }
    }

    pub fn with_strategy(mut self, strategy: FetchStrategy) -> Self {
        self.strategy = strategy;
        self
    }

    pub fn strategy(&self) -> FetchStrategy {
        self.strategy
    }

    /// Aggregate every day of `[start, end]`.
    ///
    /// An inverted range yields an empty list. The first failing query aborts
    /// the whole fetch and nothing collected so far is returned.
    pub async fn aggregate(
        &self,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<DailyRecord>, FetchError> {
        self.run(DateRange::new(start, end), None).await
    }

    /// Like [`aggregate`](Self::aggregate) but takes instants, normalized to
    /// their local calendar days first.
    pub async fn aggregate_instants<Tz: TimeZone>(
        &self,
        start: &DateTime<Tz>,
        end: &DateTime<Tz>,
    ) -> Result<Vec<DailyRecord>, FetchError> {
        self.aggregate(local_day(start), local_day(end)).await
    }

    /// Aggregate with cooperative cancellation checked between days.
    ///
    /// Setting the watched flag to `true` makes the fetch stop before the next
    /// day and return [`FetchError::Cancelled`].
    pub async fn aggregate_with_cancel(
        &self,
        start: NaiveDate,
        end: NaiveDate,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<Vec<DailyRecord>, FetchError> {
        self.run(DateRange::new(start, end), Some(cancel_rx)).await
    }

    async fn run(
        &self,
        range: DateRange,
        cancel_rx: Option<watch::Receiver<bool>>,
    ) -> Result<Vec<DailyRecord>, FetchError> {
        let day_count = range.day_count();
        if day_count < 0 {
            debug!(start = %range.start, end = %range.end, "inverted range, nothing to fetch");
            return Ok(Vec::new());
        }

        // Ranges have no upper bound; only reserve up to a year.
        let mut records = Vec::with_capacity((day_count as usize).saturating_add(1).min(366));
        for day in range.days() {
            let cancelled = cancel_rx.as_ref().is_some_and(|rx| *rx.borrow());
            if cancelled {
                warn!(%day, fetched = records.len(), "fetch cancelled");
                return Err(FetchError::Cancelled);
            }
            records.push(self.fetch_day(day).await?);
        }

        observability::record_days(records.len());
        info!(
            start = %range.start,
            end = %range.end,
            days = records.len(),
            strategy = ?self.strategy,
            "aggregated health data"
        );
        Ok(records)
    }

    async fn fetch_day(&self, day: NaiveDate) -> Result<DailyRecord, FetchError> {
        let sums = match self.strategy {
            FetchStrategy::Sequential => {
                let mut sums = Vec::with_capacity(MetricKind::ALL.len());
                for metric in MetricKind::ALL {
                    sums.push((metric, self.query(metric, day).await?));
                }
                sums
            }
            FetchStrategy::ConcurrentMetrics => {
                let queries = MetricKind::ALL.map(|metric| async move {
                    self.query(metric, day).await.map(|sum| (metric, sum))
                });
                try_join_all(queries).await?
            }
        };
        debug!(%day, ?sums, "fetched day");
        Ok(DailyRecord::from_sums(day, &sums))
    }

    async fn query(&self, metric: MetricKind, day: NaiveDate) -> Result<f64, FetchError> {
        let (start, end) = day_window(day);
        match self.source.query_sum(metric, start, end).await {
            Ok(sum) => {
                observability::record_query(metric, true);
                Ok(sum)
            }
            Err(source) => {
                observability::record_query(metric, false);
                warn!(%metric, %day, error = %source, "health data query failed");
                Err(FetchError::Query {
                    metric,
                    day,
                    source,
                })
            }
        }
    }
}
