//! Persistence seam for samples, issues and predictions.
//!
//! Samples are append-only: a store must refuse a sample whose sequence does
//! not directly follow the last one stored for that delivery.

mod memory;

pub use memory::MemoryStore;

use anyhow::Result;
use async_trait::async_trait;

use crate::eta::EtaPrediction;
use crate::model::{EnrichedSample, Issue};

#[async_trait]
pub trait TrackingStore: Send + Sync {
    async fn append_sample(&self, sample: &EnrichedSample) -> Result<()>;

    async fn last_sample(&self, delivery_id: &str) -> Result<Option<EnrichedSample>>;

    /// Up to `limit` most recent samples, oldest first.
    async fn recent_samples(&self, delivery_id: &str, limit: usize) -> Result<Vec<EnrichedSample>>;

    async fn record_issue(&self, issue: &Issue) -> Result<()>;

    async fn issues(&self, delivery_id: &str) -> Result<Vec<Issue>>;

    async fn record_prediction(&self, prediction: &EtaPrediction) -> Result<()>;

    /// Every prediction made for the delivery, oldest first.
    async fn predictions(&self, delivery_id: &str) -> Result<Vec<EtaPrediction>>;
}
