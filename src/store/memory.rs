use anyhow::{Result, bail};
use async_trait::async_trait;
use dashmap::DashMap;

use super::TrackingStore;
use crate::eta::EtaPrediction;
use crate::model::{EnrichedSample, Issue};

/// Process-local store keyed by delivery id.
#[derive(Debug, Default)]
pub struct MemoryStore {
    samples: DashMap<String, Vec<EnrichedSample>>,
    issues: DashMap<String, Vec<Issue>>,
    predictions: DashMap<String, Vec<EtaPrediction>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sample_count(&self, delivery_id: &str) -> usize {
        self.samples.get(delivery_id).map_or(0, |s| s.len())
    }
}

#[async_trait]
impl TrackingStore for MemoryStore {
    async fn append_sample(&self, sample: &EnrichedSample) -> Result<()> {
        let mut series = self.samples.entry(sample.sample.delivery_id.clone()).or_default();
        let expected = series.last().map_or(0, |last| last.sequence + 1);
        if sample.sequence != expected {
            bail!(
                "sample sequence {} for delivery {} does not follow {}",
                sample.sequence,
                sample.sample.delivery_id,
                expected
            );
        }
        if let Some(last) = series.last() {
            if sample.timestamp() <= last.timestamp() {
                bail!(
                    "sample at {} for delivery {} is not after {}",
                    sample.timestamp(),
                    sample.sample.delivery_id,
                    last.timestamp()
                );
            }
        }
        series.push(sample.clone());
        Ok(())
    }

    async fn last_sample(&self, delivery_id: &str) -> Result<Option<EnrichedSample>> {
        Ok(self
            .samples
            .get(delivery_id)
            .and_then(|s| s.last().cloned()))
    }

    async fn recent_samples(&self, delivery_id: &str, limit: usize) -> Result<Vec<EnrichedSample>> {
        Ok(self
            .samples
            .get(delivery_id)
            .map(|s| s[s.len().saturating_sub(limit)..].to_vec())
            .unwrap_or_default())
    }

    async fn record_issue(&self, issue: &Issue) -> Result<()> {
        self.issues
            .entry(issue.delivery_id.clone())
            .or_default()
            .push(issue.clone());
        Ok(())
    }

    async fn issues(&self, delivery_id: &str) -> Result<Vec<Issue>> {
        Ok(self
            .issues
            .get(delivery_id)
            .map(|i| i.value().clone())
            .unwrap_or_default())
    }

    async fn record_prediction(&self, prediction: &EtaPrediction) -> Result<()> {
        self.predictions
            .entry(prediction.delivery_id.clone())
            .or_default()
            .push(prediction.clone());
        Ok(())
    }

    async fn predictions(&self, delivery_id: &str) -> Result<Vec<EtaPrediction>> {
        Ok(self
            .predictions
            .get(delivery_id)
            .map(|p| p.value().clone())
            .unwrap_or_default())
    }
}
