//! Output formatting and persistence for predictions and tracking views.
//!
//! Supports pretty-printing, JSON serialization, and CSV append.

use anyhow::Result;
use chrono::{DateTime, Utc};
use csv::WriterBuilder;
use serde::Serialize;
use std::fs::OpenOptions;
use std::path::Path;
use tracing::debug;

use crate::eta::{EtaPrediction, ModelKind};

/// Logs any value using Rust's debug pretty-print format.
pub fn print_pretty<T: std::fmt::Debug>(value: &T) {
    debug!("{:#?}", value);
}

/// Writes a value to stdout as pretty-printed JSON.
pub fn print_json<T: Serialize + ?Sized>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// One audit row per prediction, with the per-model durations flattened
/// into columns.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PredictionRecord {
    pub prediction_id: String,
    pub delivery_id: String,
    pub kind: String,
    pub created_at: DateTime<Utc>,
    pub departure: DateTime<Utc>,
    pub arrival: DateTime<Utc>,
    pub distance_km: f64,
    pub duration_minutes: f64,
    pub std_dev: f64,
    pub lower_90: f64,
    pub upper_90: f64,
    pub lower_95: f64,
    pub upper_95: f64,
    pub quality: String,
    pub historical_routes: usize,
    pub historical_accuracy: f64,
    pub baseline_minutes: Option<f64>,
    pub regression_minutes: Option<f64>,
    pub filter_minutes: Option<f64>,
    pub neural_minutes: Option<f64>,
    pub error: Option<String>,
}

impl From<&EtaPrediction> for PredictionRecord {
    fn from(p: &EtaPrediction) -> Self {
        let minutes = |kind: ModelKind| {
            p.models
                .iter()
                .find(|m| m.model == kind)
                .and_then(|m| m.duration_minutes)
        };
        let ci = &p.confidence_interval;

        PredictionRecord {
            prediction_id: p.id.to_string(),
            delivery_id: p.delivery_id.clone(),
            kind: p.kind.to_string(),
            created_at: p.created_at,
            departure: p.departure,
            arrival: p.arrival,
            distance_km: p.distance_km,
            duration_minutes: p.duration_minutes,
            std_dev: ci.std_dev,
            lower_90: ci.lower_90,
            upper_90: ci.upper_90,
            lower_95: ci.lower_95,
            upper_95: ci.upper_95,
            quality: p.quality.to_string(),
            historical_routes: p.historical_routes,
            historical_accuracy: p.historical_accuracy,
            baseline_minutes: minutes(ModelKind::Baseline),
            regression_minutes: minutes(ModelKind::Regression),
            filter_minutes: minutes(ModelKind::Filter),
            neural_minutes: minutes(ModelKind::Neural),
            error: p.error.clone(),
        }
    }
}

/// Appends a prediction as a row to a CSV file.
///
/// Creates the file with headers if it does not already exist.
pub fn append_prediction(path: &str, prediction: &EtaPrediction) -> Result<()> {
    let file_exists = Path::new(path).exists();
    debug!(path, file_exists, "Appending CSV record");

    let file = OpenOptions::new().append(true).create(true).open(path)?;

    let mut writer = WriterBuilder::new()
        .has_headers(!file_exists) // IMPORTANT when appending
        .from_writer(file);

    writer.serialize(PredictionRecord::from(prediction))?;
    writer.flush()?;

    Ok(())
}
