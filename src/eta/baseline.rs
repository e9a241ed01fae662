use crate::eta::Estimator;
use crate::eta::types::{ModelError, ModelEstimate, ModelKind, PredictionContext};

/// Fixed speed per transport mode scaled by the time-of-day traffic
/// multiplier. Needs nothing but the distance, so it always answers.
#[derive(Debug, Clone, Default)]
pub struct BaselineEstimator;

pub(crate) const BASELINE_CONFIDENCE: f64 = 0.5;

impl BaselineEstimator {
    pub fn duration_minutes(ctx: &PredictionContext) -> f64 {
        ctx.distance_km / ctx.mode.average_speed_kmh() * 60.0 * ctx.time_factor
    }
}

impl Estimator for BaselineEstimator {
    fn kind(&self) -> ModelKind {
        ModelKind::Baseline
    }

    fn estimate(&self, ctx: &PredictionContext) -> Result<ModelEstimate, ModelError> {
        ModelEstimate::from_duration(
            ModelKind::Baseline,
            ctx,
            Self::duration_minutes(ctx),
            BASELINE_CONFIDENCE,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eta::test_support::context;
    use crate::model::TransportMode;

    #[test]
    fn test_truck_244km() {
        let ctx = context(TransportMode::Truck, 244.0, 1.0);
        let est = BaselineEstimator.estimate(&ctx).unwrap();
        assert!((est.duration_minutes - 418.29).abs() < 0.1);
        assert!((est.average_speed_kmh - 35.0).abs() < 1e-9);
    }

    #[test]
    fn test_traffic_scales_duration() {
        let ctx = context(TransportMode::Van, 40.0, 1.3);
        let est = BaselineEstimator.estimate(&ctx).unwrap();
        assert!((est.duration_minutes - 78.0).abs() < 1e-9);
        assert_eq!(est.confidence, BASELINE_CONFIDENCE);
    }

    #[test]
    fn test_zero_distance() {
        let ctx = context(TransportMode::Bicycle, 0.0, 1.0);
        let est = BaselineEstimator.estimate(&ctx).unwrap();
        assert_eq!(est.duration_minutes, 0.0);
        assert_eq!(est.arrival, ctx.departure);
    }
}
