//! Small fixed-weight network producing a speed adjustment factor.
//!
//! The network is a strategy behind [`SpeedAdjustmentModel`]; its weights
//! are hand-set constants, not trained, and any other deterministic model
//! can be dropped in.

use crate::eta::Estimator;
use crate::eta::traffic::{cyclic_hour, day_of_week};
use crate::eta::types::{ModelError, ModelEstimate, ModelKind, PredictionContext};

pub const INPUTS: usize = 7;
const HIDDEN: usize = 4;

/// Factor range the network output is squashed into.
const MIN_FACTOR: f64 = 0.7;
const MAX_FACTOR: f64 = 1.3;

/// Maps normalized trip features to a multiplier on the mode's speed.
pub trait SpeedAdjustmentModel: Send + Sync {
    fn name(&self) -> &'static str;

    /// Features: `[distance/500 (capped at 1), time factor, weather factor,
    /// sin(hour), cos(hour), day of week, traffic density]`.
    fn speed_factor(&self, features: &[f64; INPUTS]) -> f64;
}

/// One tanh hidden layer, sigmoid output.
#[derive(Debug, Clone)]
pub struct FixedWeightNetwork {
    hidden_weights: [[f64; INPUTS]; HIDDEN],
    hidden_bias: [f64; HIDDEN],
    output_weights: [f64; HIDDEN],
    output_bias: f64,
}

impl Default for FixedWeightNetwork {
    fn default() -> Self {
        Self {
            hidden_weights: [
                [0.8, -0.6, -0.4, 0.1, 0.2, 0.0, -0.7],
                [0.3, -0.9, -0.2, -0.3, 0.1, 0.2, -0.5],
                [-0.2, 0.4, -0.8, 0.2, -0.1, 0.3, 0.1],
                [0.5, -0.3, 0.1, 0.0, 0.4, -0.2, -0.9],
            ],
            hidden_bias: [0.2, 0.5, 0.3, 0.4],
            output_weights: [0.6, 0.5, 0.4, 0.7],
            output_bias: -0.4,
        }
    }
}

impl FixedWeightNetwork {
    pub fn new(
        hidden_weights: [[f64; INPUTS]; HIDDEN],
        hidden_bias: [f64; HIDDEN],
        output_weights: [f64; HIDDEN],
        output_bias: f64,
    ) -> Self {
        Self {
            hidden_weights,
            hidden_bias,
            output_weights,
            output_bias,
        }
    }
}

impl SpeedAdjustmentModel for FixedWeightNetwork {
    fn name(&self) -> &'static str {
        "fixed_weight_network"
    }

    fn speed_factor(&self, features: &[f64; INPUTS]) -> f64 {
        let output: f64 = self
            .hidden_weights
            .iter()
            .zip(self.hidden_bias)
            .map(|(weights, bias)| {
                let z: f64 = weights.iter().zip(features).map(|(w, x)| w * x).sum::<f64>() + bias;
                z.tanh()
            })
            .zip(self.output_weights)
            .map(|(h, w)| h * w)
            .sum::<f64>()
            + self.output_bias;

        let squashed = 1.0 / (1.0 + (-output).exp());
        MIN_FACTOR + (MAX_FACTOR - MIN_FACTOR) * squashed
    }
}

pub struct NeuralEstimator {
    model: Box<dyn SpeedAdjustmentModel>,
    confidence: f64,
}

impl Default for NeuralEstimator {
    fn default() -> Self {
        Self::new(Box::new(FixedWeightNetwork::default()))
    }
}

impl NeuralEstimator {
    pub fn new(model: Box<dyn SpeedAdjustmentModel>) -> Self {
        Self {
            model,
            confidence: 0.6,
        }
    }

    pub fn features(ctx: &PredictionContext) -> [f64; INPUTS] {
        let (hour_sin, hour_cos) = cyclic_hour(ctx.departure);
        [
            (ctx.distance_km / 500.0).min(1.0),
            ctx.time_factor,
            ctx.weather_factor,
            hour_sin,
            hour_cos,
            day_of_week(ctx.departure),
            ctx.traffic_density,
        ]
    }
}

impl Estimator for NeuralEstimator {
    fn kind(&self) -> ModelKind {
        ModelKind::Neural
    }

    fn estimate(&self, ctx: &PredictionContext) -> Result<ModelEstimate, ModelError> {
        let factor = self.model.speed_factor(&Self::features(ctx));
        if !factor.is_finite() || factor <= 0.0 {
            return Err(ModelError::Computation(format!(
                "{} returned speed factor {factor}",
                self.model.name()
            )));
        }

        let speed = ctx.mode.average_speed_kmh() * factor / ctx.weather_factor.max(0.1);
        let duration = ctx.distance_km / speed * 60.0 * ctx.time_factor;
        ModelEstimate::from_duration(ModelKind::Neural, ctx, duration, self.confidence)
    }
}
