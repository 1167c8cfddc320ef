//! Error types for the presentation boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("{0}")]
    Authorization(health_stats_core::HealthDataError),

    #[error("Failed to fetch health data: {0}")]
    Fetch(#[from] health_stats_core::FetchError),

    #[error("Failed to export CSV: {0}")]
    Export(#[from] health_stats_core::ExportError),

    #[error("Configuration error: {0}")]
    Config(#[from] health_stats_core::ConfigError),

    #[error("Validation error: {0}")]
    Validation(String),
}

impl From<AppError> for String {
    fn from(err: AppError) -> Self {
        err.to_string()
    }
}

pub type AppResult<T> = Result<T, AppError>;
