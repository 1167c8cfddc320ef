//! Presentation boundary for the health stats core.
//!
//! [`HealthStatsHandler`] runs authorization, fetch and export against a shared
//! [`HealthDataSource`] and hands every outcome back as a value whose error
//! side is a message ready for display.

use std::sync::Arc;

use chrono::NaiveDate;
use health_stats_core::{
    CsvExporter, DailyAggregator, DailyRecord, DateRange, ExportArtifact, ExportConfig,
    FetchStrategy, HealthDataSource, MetricKind,
};
use tokio::sync::watch;
use tracing::{info, warn};

pub mod error;
pub mod state;

pub use error::{AppError, AppResult};
pub use state::ReportState;

#[derive(Clone)]
pub struct HealthStatsHandler {
    source: Arc<dyn HealthDataSource>,
    aggregator: DailyAggregator,
    exporter: CsvExporter,
}

impl HealthStatsHandler {
    pub fn new(source: Arc<dyn HealthDataSource>, export: ExportConfig) -> Self {
        Self {
            aggregator: DailyAggregator::new(source.clone()),
            exporter: CsvExporter::new(export),
            source,
        }
    }

    pub fn with_fetch_strategy(mut self, strategy: FetchStrategy) -> Self {
        self.aggregator = self.aggregator.with_strategy(strategy);
        self
    }

    pub fn export_config(&self) -> &ExportConfig {
        self.exporter.config()
    }

    /// Ask for read access to all six metrics.
    pub async fn request_authorization(&self) -> Result<(), String> {
        self.try_request_authorization().await.map_err(|e| {
            warn!(error = %e, "authorization failed");
            e.into()
        })
    }

    pub async fn try_request_authorization(&self) -> AppResult<()> {
        self.source
            .request_authorization(&MetricKind::ALL)
            .await
            .map_err(AppError::Authorization)?;
        info!("health data authorization granted");
        Ok(())
    }

    pub async fn fetch(&self, start: NaiveDate, end: NaiveDate) -> Result<Vec<DailyRecord>, String> {
        self.try_fetch(start, end).await.map_err(String::from)
    }

    pub async fn fetch_range(&self, range: DateRange) -> Result<Vec<DailyRecord>, String> {
        self.fetch(range.start, range.end).await
    }

    pub async fn try_fetch(&self, start: NaiveDate, end: NaiveDate) -> AppResult<Vec<DailyRecord>> {
        Ok(self.aggregator.aggregate(start, end).await?)
    }

    /// Fetch that stops between days once `cancel_rx` reads `true`.
    pub async fn fetch_cancellable(
        &self,
        range: DateRange,
        cancel_rx: watch::Receiver<bool>,
    ) -> Result<Vec<DailyRecord>, String> {
        self.aggregator
            .aggregate_with_cancel(range.start, range.end, cancel_rx)
            .await
            .map_err(|e| AppError::from(e).into())
    }

    /// `Ok(None)` when there is nothing to export.
    pub async fn export_csv(
        &self,
        records: &[DailyRecord],
    ) -> Result<Option<ExportArtifact>, String> {
        self.try_export_csv(records).await.map_err(String::from)
    }

    pub async fn try_export_csv(&self, records: &[DailyRecord]) -> AppResult<Option<ExportArtifact>> {
        Ok(self.exporter.export_csv(records).await?)
    }

    /// Fetch `state.range` and fold the outcome into `state`.
    pub async fn refresh(&self, state: &mut ReportState) {
        let result = self.fetch_range(state.range).await;
        state.apply_fetch(result);
    }

    /// Export the records currently held in `state`.
    pub async fn export_state(&self, state: &mut ReportState) {
        let result = self.export_csv(&state.records).await;
        state.apply_export(result);
    }
}
