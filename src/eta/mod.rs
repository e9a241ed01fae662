//! ETA prediction ensemble.
//!
//! Four independent estimators (baseline, regression, filter, neural) are
//! combined by weighted average into a point estimate with a confidence
//! interval and a quality label. [`predictor::EtaPredictor`] gathers the
//! inputs from the external providers.

pub mod baseline;
pub mod ensemble;
pub mod filter;
pub mod neural;
pub mod predictor;
pub mod quality;
pub mod regression;
pub mod stats;
pub mod traffic;
pub mod types;

pub use predictor::{EtaPredictor, PredictionRequest};
pub use types::{
    ConfidenceInterval, EtaPrediction, HistoricalRoute, ModelError, ModelEstimate, ModelKind,
    PredictionContext, PredictionKind, QualityLabel,
};

/// A single ensemble member.
///
/// Estimators must not panic; missing data or numerical trouble is
/// reported through [`ModelError`] and the ensemble carries on without them.
pub trait Estimator: Send + Sync {
    fn kind(&self) -> ModelKind;

    fn estimate(&self, ctx: &PredictionContext) -> Result<ModelEstimate, ModelError>;
}

/// The standard four-model line-up.
pub fn default_estimators() -> Vec<Box<dyn Estimator>> {
    vec![
        Box::new(baseline::BaselineEstimator),
        Box::new(regression::RegressionEstimator::default()),
        Box::new(filter::FilterEstimator),
        Box::new(neural::NeuralEstimator::default()),
    ]
}
