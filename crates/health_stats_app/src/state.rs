use chrono::NaiveDate;
use health_stats_core::{DailyRecord, DateRange, ExportArtifact};
use serde::Serialize;

/// Days before today covered by the initial selection.
pub const DEFAULT_WINDOW_DAYS: u32 = 7;

/// What a presentation layer keeps between actions.
///
/// Only ever updated from the results the handler returns.
#[derive(Debug, Serialize, Clone, PartialEq)]
pub struct ReportState {
    pub range: DateRange,
    pub records: Vec<DailyRecord>,
    pub error: Option<String>,
    pub artifact: Option<ExportArtifact>,
}

impl ReportState {
    pub fn new(today: NaiveDate) -> Self {
        Self {
            range: DateRange::last_days(DEFAULT_WINDOW_DAYS, today),
            records: Vec::new(),
            error: None,
            artifact: None,
        }
    }

    pub fn can_export(&self) -> bool {
        !self.records.is_empty()
    }

    pub fn apply_authorization(&mut self, result: Result<(), String>) {
        if let Err(e) = result {
            self.error = Some(e);
        }
    }

    /// A failed fetch keeps the previously shown records.
    pub fn apply_fetch(&mut self, result: Result<Vec<DailyRecord>, String>) {
        match result {
            Ok(records) => {
                self.records = records;
                self.error = None;
            }
            Err(e) => self.error = Some(e),
        }
    }

    pub fn apply_export(&mut self, result: Result<Option<ExportArtifact>, String>) {
        match result {
            Ok(Some(artifact)) => {
                self.artifact = Some(artifact);
                self.error = None;
            }
            Ok(None) => {}
            Err(e) => self.error = Some(e),
        }
    }
}
