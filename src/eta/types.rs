//! Data types used by the ETA ensemble.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::eta::filter::MotionSnapshot;
use crate::geo::Coordinate;
use crate::model::TransportMode;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModelKind {
    Baseline,
    Regression,
    Filter,
    Neural,
}

impl std::fmt::Display for ModelKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ModelKind::Baseline => "baseline",
            ModelKind::Regression => "regression",
            ModelKind::Filter => "filter",
            ModelKind::Neural => "neural",
        })
    }
}

/// Why an estimator produced nothing.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ModelError {
    #[error("insufficient data: {0}")]
    InsufficientData(String),

    #[error("computation failed: {0}")]
    Computation(String),
}

/// One estimator's answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelEstimate {
    pub model: ModelKind,
    pub duration_minutes: f64,
    pub arrival: DateTime<Utc>,
    pub average_speed_kmh: f64,
    /// 0.0 (no trust) to 1.0.
    pub confidence: f64,
}

impl ModelEstimate {
    /// Builds an estimate from a travel time over `ctx.distance_km`.
    pub fn from_duration(
        model: ModelKind,
        ctx: &PredictionContext,
        duration_minutes: f64,
        confidence: f64,
    ) -> Result<Self, ModelError> {
        if !duration_minutes.is_finite() || duration_minutes < 0.0 {
            return Err(ModelError::Computation(format!(
                "{model} produced invalid duration {duration_minutes}"
            )));
        }
        let average_speed_kmh = if duration_minutes > 0.0 {
            ctx.distance_km / (duration_minutes / 60.0)
        } else {
            ctx.mode.average_speed_kmh()
        };
        let arrival = arrival_after(ctx.departure, duration_minutes).ok_or_else(|| {
            ModelError::Computation(format!(
                "{model} duration {duration_minutes:.0} minutes is past the representable calendar"
            ))
        })?;
        Ok(Self {
            model,
            duration_minutes,
            arrival,
            average_speed_kmh,
            confidence: confidence.clamp(0.0, 1.0),
        })
    }
}

/// `None` when the result does not fit in a `DateTime`.
pub(crate) fn arrival_after(departure: DateTime<Utc>, minutes: f64) -> Option<DateTime<Utc>> {
    let millis = (minutes * 60_000.0).round();
    if !millis.is_finite() || millis.abs() >= i64::MAX as f64 {
        return None;
    }
    Duration::try_milliseconds(millis as i64).and_then(|d| departure.checked_add_signed(d))
}

/// Per-model line in a prediction's breakdown. Failed models keep their
/// slot with zero confidence and zero weight.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ModelContribution {
    pub model: ModelKind,
    pub duration_minutes: Option<f64>,
    pub average_speed_kmh: Option<f64>,
    pub confidence: f64,
    pub weight: f64,
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfidenceInterval {
    pub mean: f64,
    pub std_dev: f64,
    pub lower_90: f64,
    pub upper_90: f64,
    pub lower_95: f64,
    pub upper_95: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QualityLabel {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for QualityLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            QualityLabel::Low => "low",
            QualityLabel::Medium => "medium",
            QualityLabel::High => "high",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PredictionKind {
    /// Full ensemble at tracking start.
    Initial,
    /// Remaining-time projection after a location update.
    Live,
    /// Periodic full ensemble re-run.
    Refresh,
}

impl std::fmt::Display for PredictionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            PredictionKind::Initial => "initial",
            PredictionKind::Live => "live",
            PredictionKind::Refresh => "refresh",
        })
    }
}

/// A retained ETA estimate. The newest one is shown live; all are kept for
/// backtesting.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EtaPrediction {
    pub id: Uuid,
    pub delivery_id: String,
    pub kind: PredictionKind,
    pub created_at: DateTime<Utc>,
    pub departure: DateTime<Utc>,
    pub distance_km: f64,
    pub duration_minutes: f64,
    pub arrival: DateTime<Utc>,
    pub confidence_interval: ConfidenceInterval,
    pub models: Vec<ModelContribution>,
    pub quality: QualityLabel,
    pub historical_routes: usize,
    pub historical_accuracy: f64,
    /// Coefficient of variation of average speeds on comparable routes.
    pub route_speed_variation: f64,
    pub error: Option<String>,
}

/// A completed trip used to fit and calibrate the estimators.
///
/// Kept flat so it can be loaded straight from CSV.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalRoute {
    pub origin_latitude: f64,
    pub origin_longitude: f64,
    pub destination_latitude: f64,
    pub destination_longitude: f64,
    pub mode: TransportMode,
    pub distance_km: f64,
    pub duration_minutes: f64,
    pub departed_at: DateTime<Utc>,
    #[serde(default = "neutral_factor")]
    pub weather_factor: f64,
    #[serde(default = "neutral_density")]
    pub traffic_density: f64,
    /// What the tracker predicted for this trip, when known.
    #[serde(default)]
    pub predicted_minutes: Option<f64>,
}

fn neutral_factor() -> f64 {
    1.0
}

fn neutral_density() -> f64 {
    0.5
}

impl HistoricalRoute {
    pub fn origin(&self) -> Coordinate {
        Coordinate::new(self.origin_latitude, self.origin_longitude)
    }

    pub fn destination(&self) -> Coordinate {
        Coordinate::new(self.destination_latitude, self.destination_longitude)
    }

    pub fn average_speed_kmh(&self) -> Option<f64> {
        (self.duration_minutes > 0.0).then(|| self.distance_km / (self.duration_minutes / 60.0))
    }
}

/// Everything an estimator may look at. Built once per prediction.
#[derive(Debug, Clone)]
pub struct PredictionContext {
    pub mode: TransportMode,
    pub distance_km: f64,
    pub departure: DateTime<Utc>,
    /// Time-of-day / day-of-week traffic multiplier (>1 is slower).
    pub time_factor: f64,
    /// Weather slowdown multiplier (>1 is slower).
    pub weather_factor: f64,
    /// 0.0 (empty roads) to 1.0 (gridlock).
    pub traffic_density: f64,
    pub history: Vec<HistoricalRoute>,
    pub historical_accuracy: Option<f64>,
    pub route_speed_variation: f64,
    pub motion: Option<MotionSnapshot>,
}
