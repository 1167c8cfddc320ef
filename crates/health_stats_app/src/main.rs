use std::sync::Arc;

use anyhow::Context;
use health_stats_app::{AppError, HealthStatsHandler, ReportState};
use health_stats_core::utils::parse_day;
use health_stats_core::{Config, DateRange, InMemoryHealthStore};
use metrics_exporter_prometheus::PrometheusBuilder;

const USAGE: &str = "usage: health-stats-export <samples.json> [START END]";

fn parse_range(args: &[String], today: chrono::NaiveDate) -> Result<Option<DateRange>, AppError> {
    match args {
        [] => Ok(None),
        [start, end] => {
            let start = parse_day(start)
                .ok_or_else(|| AppError::Validation(format!("invalid start date: {start}")))?;
            let end = parse_day(end)
                .ok_or_else(|| AppError::Validation(format!("invalid end date: {end}")))?;
            Ok(Some(DateRange::new(start, end)))
        }
        _ => Err(AppError::Validation(format!(
            "expected START and END together (today is {today})"
        ))),
    }
}

fn load_config<F>(get: F) -> Result<Config, AppError>
where
    F: FnMut(&str) -> Option<String>,
{
    Ok(Config::from_env_with(get)?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = load_config(|k| std::env::var(k).ok())?;

    let env_filter = tracing_subscriber::EnvFilter::try_new(&config.log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .compact()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(false)
        .with_env_filter(env_filter)
        .init();
    tracing::info!("health-stats-export: log filter: {}", config.log_level);

    let metrics = PrometheusBuilder::new()
        .install_recorder()
        .context("installing metrics recorder")?;

    let args: Vec<String> = std::env::args().skip(1).collect();
    let Some((samples_path, rest)) = args.split_first() else {
        anyhow::bail!(USAGE);
    };

    let today = chrono::Local::now().date_naive();
    let mut state = ReportState::new(today);
    if let Some(range) = parse_range(rest, today)? {
        state.range = range;
    }

    let store = InMemoryHealthStore::from_json_file(samples_path)
        .await
        .with_context(|| format!("loading samples from {samples_path}"))?;
    let handler = HealthStatsHandler::new(Arc::new(store), config.export.clone())
        .with_fetch_strategy(config.fetch_strategy);

    state.apply_authorization(handler.request_authorization().await);
    if let Some(e) = state.error.take() {
        anyhow::bail!(e);
    }

    handler.refresh(&mut state).await;
    if let Some(e) = state.error.take() {
        anyhow::bail!(e);
    }
    tracing::info!(
        start = %state.range.start,
        end = %state.range.end,
        days = state.records.len(),
        "fetched health data"
    );

    handler.export_state(&mut state).await;
    if let Some(e) = state.error.take() {
        anyhow::bail!(e);
    }

    match &state.artifact {
        Some(artifact) => println!(
            "{}",
            serde_json::json!({
                "path": artifact.path,
                "rows": state.records.len(),
                "created_at": artifact.created_at,
            })
        ),
        None => tracing::warn!("no records in range, nothing exported"),
    }

    tracing::debug!(metrics = %metrics.render(), "metrics snapshot");
    Ok(())
}
