//! In-memory [`HealthDataSource`] backed by timestamped quantity samples.
//!
//! Read access is enforced per metric: a metric has to be granted through
//! `request_authorization` before it can be queried.

use crate::{HealthDataError, HealthDataSource, MetricKind};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use tokio::sync::RwLock;
use tracing::{debug, info};

#[derive(Clone, Debug, Serialize, Deserialize, PartialEq)]
pub struct Sample {
    pub metric: MetricKind,
    pub timestamp: DateTime<Utc>,
    pub value: f64,
}

#[derive(Debug, Default, Deserialize)]
struct SampleFile {
    #[serde(default)]
    samples: Vec<Sample>,
}

#[derive(Debug, Default)]
pub struct InMemoryHealthStore {
    samples: RwLock<Vec<Sample>>,
    granted: RwLock<HashSet<MetricKind>>,
    failures: RwLock<HashMap<MetricKind, String>>,
    deny_authorization: bool,
}

impl InMemoryHealthStore {
    pub fn new(samples: Vec<Sample>) -> Self {
        Self {
            samples: RwLock::new(samples),
            ..Self::default()
        }
    }

    /// Parse `{"samples": [{"metric", "timestamp", "value"}, ...]}`.
    pub fn from_json_str(json: &str) -> Result<Self, HealthDataError> {
        let file: SampleFile = serde_json::from_str(json)?;
        Ok(Self::new(file.samples))
    }

    pub async fn from_json_file(path: impl AsRef<Path>) -> Result<Self, HealthDataError> {
        let path = path.as_ref();
        let raw = tokio::fs::read_to_string(path).await?;
        let store = Self::from_json_str(&raw)?;
        let count = store.samples.read().await.len();
        info!(path = %path.display(), samples = count, "loaded samples");
        Ok(store)
    }

    /// Make every authorization request fail, as when the user declines access.
    pub fn denying_authorization(mut self) -> Self {
        self.deny_authorization = true;
        self
    }

    pub async fn add_sample(&self, metric: MetricKind, timestamp: DateTime<Utc>, value: f64) {
        self.samples.write().await.push(Sample {
            metric,
            timestamp,
            value,
        });
    }

    /// Make queries for `metric` fail with `message` until cleared.
    pub async fn fail_metric(&self, metric: MetricKind, message: impl Into<String>) {
        self.failures.write().await.insert(metric, message.into());
    }

    pub async fn clear_failures(&self) {
        self.failures.write().await.clear();
    }

    /// Drop read access for `metric`, as when a permission is revoked mid-session.
    pub async fn revoke(&self, metric: MetricKind) {
        self.granted.write().await.remove(&metric);
    }

    pub async fn is_authorized(&self, metric: MetricKind) -> bool {
        self.granted.read().await.contains(&metric)
    }
}

#[async_trait]
impl HealthDataSource for InMemoryHealthStore {
    async fn request_authorization(&self, metrics: &[MetricKind]) -> Result<(), HealthDataError> {
        if self.deny_authorization {
            return Err(HealthDataError::AuthorizationDenied(
                "read access was not granted".into(),
            ));
        }
        let mut granted = self.granted.write().await;
        granted.extend(metrics.iter().copied());
        debug!(granted = granted.len(), "authorization granted");
        Ok(())
    }

    async fn query_sum(
        &self,
        metric: MetricKind,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64, HealthDataError> {
        if !self.is_authorized(metric).await {
            return Err(HealthDataError::Unauthorized(metric.to_string()));
        }
        if let Some(message) = self.failures.read().await.get(&metric) {
            return Err(HealthDataError::Query(message.clone()));
        }
        let sum = self
            .samples
            .read()
            .await
            .iter()
            .filter(|s| s.metric == metric && s.timestamp >= start && s.timestamp < end)
            .map(|s| s.value)
            .sum();
        Ok(sum)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(h: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 4, 1, h, 0, 0).unwrap()
    }

    #[tokio::test]
    async fn query_requires_authorization() {
        let store = InMemoryHealthStore::new(vec![]);
        let err = store
            .query_sum(MetricKind::Steps, at(0), at(23))
            .await
            .unwrap_err();
        assert!(matches!(err, HealthDataError::Unauthorized(_)));

        store
            .request_authorization(&MetricKind::ALL)
            .await
            .expect("authorize");
        let sum = store.query_sum(MetricKind::Steps, at(0), at(23)).await.unwrap();
        assert_eq!(sum, 0.0);
    }

    #[tokio::test]
    async fn query_sums_half_open_window() {
        let store = InMemoryHealthStore::new(vec![]);
        store.request_authorization(&MetricKind::ALL).await.unwrap();
        store.add_sample(MetricKind::Carbs, at(0), 10.0).await;
        store.add_sample(MetricKind::Carbs, at(5), 2.5).await;
        store.add_sample(MetricKind::Carbs, at(10), 100.0).await;
        store.add_sample(MetricKind::Fats, at(5), 7.0).await;

        let sum = store.query_sum(MetricKind::Carbs, at(0), at(10)).await.unwrap();
        assert_eq!(sum, 12.5);
    }

    #[tokio::test]
    async fn denied_authorization_errors() {
        let store = InMemoryHealthStore::new(vec![]).denying_authorization();
        let err = store
            .request_authorization(&[MetricKind::Steps])
            .await
            .unwrap_err();
        assert!(matches!(err, HealthDataError::AuthorizationDenied(_)));
    }

    #[tokio::test]
    async fn revoke_and_injected_failure() {
        let store = InMemoryHealthStore::new(vec![]);
        store.request_authorization(&MetricKind::ALL).await.unwrap();
        store.fail_metric(MetricKind::Calories, "store unavailable").await;
        let err = store
            .query_sum(MetricKind::Calories, at(0), at(1))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "query failed: store unavailable");

        store.clear_failures().await;
        store.revoke(MetricKind::Calories).await;
        assert!(!store.is_authorized(MetricKind::Calories).await);
    }

    #[test]
    fn from_json_parses_samples() {
        let json = r#"{"samples": [
            {"metric": "steps", "timestamp": "2025-04-01T08:00:00Z", "value": 1200},
            {"metric": "active_energy", "timestamp": "2025-04-01T09:30:00+02:00", "value": 85.5}
        ]}"#;
        let store = InMemoryHealthStore::from_json_str(json).expect("parse");
        let samples = store.samples.try_read().expect("unlocked");
        assert_eq!(samples.len(), 2);
        assert_eq!(samples[1].metric, MetricKind::ActiveEnergy);
        assert_eq!(samples[1].timestamp, Utc.with_ymd_and_hms(2025, 4, 1, 7, 30, 0).unwrap());
    }

    #[test]
    fn from_json_rejects_unknown_metric() {
        let json = r#"{"samples": [{"metric": "sleep", "timestamp": "2025-04-01T08:00:00Z", "value": 1}]}"#;
        assert!(matches!(
            InMemoryHealthStore::from_json_str(json),
            Err(HealthDataError::Json(_))
        ));
    }
}
