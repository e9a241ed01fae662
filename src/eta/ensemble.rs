//! Weighted combination of estimator outputs with a confidence interval.

use crate::eta::quality::quality_label;
use crate::eta::regression::MIN_REGRESSION_ROUTES;
use crate::eta::stats::{mean, stddev, weighted_mean};
use crate::eta::types::{
    ConfidenceInterval, ModelContribution, ModelError, ModelEstimate, ModelKind,
    PredictionContext, QualityLabel,
};

/// Half-widths never shrink below this many minutes.
pub const MIN_INTERVAL_MINUTES: f64 = 5.0;
const Z_90: f64 = 1.645;
const Z_95: f64 = 1.96;

/// Estimates at or below this confidence are treated as failed.
const MIN_USABLE_CONFIDENCE: f64 = 1e-3;
const FALLBACK_SPEED_KMH: f64 = 40.0;
const FALLBACK_DISTANCE_KM: f64 = 50.0;

/// Relative trust placed in each model.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EnsembleWeights {
    pub regression: f64,
    pub filter: f64,
    pub neural: f64,
    pub baseline: f64,
}

impl EnsembleWeights {
    /// Enough history for the learned models to lead.
    pub const RICH: EnsembleWeights = EnsembleWeights {
        regression: 0.35,
        filter: 0.25,
        neural: 0.25,
        baseline: 0.15,
    };

    /// Sparse history: lean on the baseline.
    pub const SPARSE: EnsembleWeights = EnsembleWeights {
        regression: 0.20,
        filter: 0.20,
        neural: 0.20,
        baseline: 0.40,
    };

    pub fn for_history(routes: usize) -> Self {
        if routes >= MIN_REGRESSION_ROUTES {
            Self::RICH
        } else {
            Self::SPARSE
        }
    }

    pub fn weight(&self, model: ModelKind) -> f64 {
        match model {
            ModelKind::Regression => self.regression,
            ModelKind::Filter => self.filter,
            ModelKind::Neural => self.neural,
            ModelKind::Baseline => self.baseline,
        }
    }
}

/// Result of combining one round of estimator outputs.
#[derive(Debug, Clone, PartialEq)]
pub struct Combined {
    pub duration_minutes: f64,
    pub distance_km: f64,
    pub interval: ConfidenceInterval,
    pub contributions: Vec<ModelContribution>,
    pub quality: QualityLabel,
    pub historical_accuracy: f64,
    pub error: Option<String>,
}

/// Builds the interval around `center` from the spread `std_dev`.
///
/// Bounds always satisfy `lower <= center <= upper`; lower bounds are
/// clipped at zero.
pub fn interval(center: f64, std_dev: f64) -> ConfidenceInterval {
    let center = center.max(0.0);
    let sd = if std_dev.is_finite() { std_dev.max(0.0) } else { 0.0 };
    let half_90 = (Z_90 * sd).max(MIN_INTERVAL_MINUTES);
    let half_95 = (Z_95 * sd).max(MIN_INTERVAL_MINUTES);

    ConfidenceInterval {
        mean: center,
        std_dev: sd,
        lower_90: (center - half_90).max(0.0),
        upper_90: center + half_90,
        lower_95: (center - half_95).max(0.0),
        upper_95: center + half_95,
    }
}

/// Combines estimator outcomes for `ctx`.
///
/// Failed models stay in the breakdown with zero weight. When nothing
/// usable remains a fixed distance/speed fallback is returned with `low`
/// quality and the failure recorded.
pub fn combine(
    ctx: &PredictionContext,
    outcomes: Vec<(ModelKind, Result<ModelEstimate, ModelError>)>,
    default_accuracy: f64,
) -> Combined {
    let weights = EnsembleWeights::for_history(ctx.history.len());
    let accuracy = ctx.historical_accuracy.unwrap_or(default_accuracy);

    let mut contributions = Vec::with_capacity(outcomes.len());
    let mut usable: Vec<(f64, f64)> = Vec::new();
    let mut failures = Vec::new();

    for (model, outcome) in outcomes {
        match outcome {
            Ok(est) if est.confidence > MIN_USABLE_CONFIDENCE => {
                let weight = weights.weight(model);
                usable.push((est.duration_minutes, weight));
                contributions.push(ModelContribution {
                    model,
                    duration_minutes: Some(est.duration_minutes),
                    average_speed_kmh: Some(est.average_speed_kmh),
                    confidence: est.confidence,
                    weight,
                    error: None,
                });
            }
            Ok(est) => {
                failures.push(format!("{model}: confidence {:.3}", est.confidence));
                contributions.push(ModelContribution {
                    model,
                    duration_minutes: Some(est.duration_minutes),
                    average_speed_kmh: Some(est.average_speed_kmh),
                    confidence: est.confidence,
                    weight: 0.0,
                    error: Some("confidence too low".into()),
                });
            }
            Err(e) => {
                failures.push(format!("{model}: {e}"));
                contributions.push(ModelContribution {
                    model,
                    duration_minutes: None,
                    average_speed_kmh: None,
                    confidence: 0.0,
                    weight: 0.0,
                    error: Some(e.to_string()),
                });
            }
        }
    }

    // Renormalize so the reported weights of the usable models sum to one.
    let total: f64 = usable.iter().map(|(_, w)| w).sum();
    if total > 0.0 {
        for c in contributions.iter_mut().filter(|c| c.weight > 0.0) {
            c.weight /= total;
        }
    }

    let Some(center) = weighted_mean(&usable) else {
        let distance_km = if ctx.distance_km.is_finite() && ctx.distance_km >= 0.0 {
            ctx.distance_km
        } else {
            FALLBACK_DISTANCE_KM
        };
        let duration = distance_km / FALLBACK_SPEED_KMH * 60.0;
        return Combined {
            duration_minutes: duration,
            distance_km,
            interval: interval(duration, 0.0),
            contributions,
            quality: QualityLabel::Low,
            historical_accuracy: accuracy,
            error: Some(format!("all models failed: {}", failures.join("; "))),
        };
    };

    let durations: Vec<f64> = usable.iter().map(|(d, _)| *d).collect();
    let spread_mean = mean(&durations);
    let spread = stddev(&durations, spread_mean);
    let scaled = spread / accuracy.max(0.05);
    let disagreement = if spread_mean > 0.0 { spread / spread_mean } else { 0.0 };

    Combined {
        duration_minutes: center,
        distance_km: ctx.distance_km,
        interval: interval(center, scaled),
        contributions,
        quality: quality_label(ctx.history.len(), accuracy, disagreement),
        historical_accuracy: accuracy,
        error: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eta::test_support::{context, route};
    use crate::model::TransportMode;

    fn ok(ctx: &PredictionContext, model: ModelKind, minutes: f64, confidence: f64) -> (ModelKind, Result<ModelEstimate, ModelError>) {
        (model, ModelEstimate::from_duration(model, ctx, minutes, confidence))
    }

    fn failed(model: ModelKind) -> (ModelKind, Result<ModelEstimate, ModelError>) {
        (model, Err(ModelError::Computation("boom".into())))
    }

    #[test]
    fn test_weight_tables_sum_to_one() {
        for w in [EnsembleWeights::RICH, EnsembleWeights::SPARSE] {
            let sum = w.regression + w.filter + w.neural + w.baseline;
            assert!((sum - 1.0).abs() < 1e-12);
        }
        assert_eq!(EnsembleWeights::for_history(0), EnsembleWeights::SPARSE);
        assert_eq!(EnsembleWeights::for_history(5), EnsembleWeights::RICH);
    }

    #[test]
    fn test_sparse_weighting() {
        let ctx = context(TransportMode::Truck, 100.0, 1.0);
        let outcomes = vec![
            ok(&ctx, ModelKind::Baseline, 100.0, 0.5),
            ok(&ctx, ModelKind::Regression, 200.0, 0.3),
            ok(&ctx, ModelKind::Filter, 200.0, 0.4),
            ok(&ctx, ModelKind::Neural, 200.0, 0.6),
        ];
        let c = combine(&ctx, outcomes, 0.8);
        // 0.4 * 100 + 0.6 * 200
        assert!((c.duration_minutes - 160.0).abs() < 1e-9);
        assert_eq!(c.quality, QualityLabel::Low);
        assert!(c.error.is_none());
    }

    #[test]
    fn test_rich_weighting() {
        let mut ctx = context(TransportMode::Truck, 100.0, 1.0);
        ctx.history = (0..6).map(|i| route(100.0, 150.0, i)).collect();
        let outcomes = vec![
            ok(&ctx, ModelKind::Baseline, 100.0, 0.5),
            ok(&ctx, ModelKind::Regression, 200.0, 0.9),
            ok(&ctx, ModelKind::Filter, 200.0, 0.4),
            ok(&ctx, ModelKind::Neural, 200.0, 0.6),
        ];
        let c = combine(&ctx, outcomes, 0.8);
        assert!((c.duration_minutes - 185.0).abs() < 1e-9);
    }

    #[test]
    fn test_failed_model_is_excluded_and_renormalized() {
        let ctx = context(TransportMode::Truck, 100.0, 1.0);
        let outcomes = vec![
            ok(&ctx, ModelKind::Baseline, 100.0, 0.5),
            failed(ModelKind::Regression),
            ok(&ctx, ModelKind::Filter, 100.0, 0.0),
            ok(&ctx, ModelKind::Neural, 160.0, 0.6),
        ];
        let c = combine(&ctx, outcomes, 0.8);
        // baseline 0.4, neural 0.2 -> (40 + 32) / 0.6
        assert!((c.duration_minutes - 120.0).abs() < 1e-9);
        assert_eq!(c.contributions.len(), 4);
        let weight_sum: f64 = c.contributions.iter().map(|m| m.weight).sum();
        assert!((weight_sum - 1.0).abs() < 1e-12);
        assert!(c.contributions[1].error.is_some());
        assert_eq!(c.contributions[2].weight, 0.0);
    }

    #[test]
    fn test_all_failed_uses_fixed_fallback() {
        let ctx = context(TransportMode::Van, 80.0, 1.0);
        let outcomes = vec![failed(ModelKind::Baseline), failed(ModelKind::Neural)];
        let c = combine(&ctx, outcomes, 0.8);
        assert!((c.duration_minutes - 120.0).abs() < 1e-9);
        assert_eq!(c.quality, QualityLabel::Low);
        assert!(c.error.unwrap().starts_with("all models failed"));
    }

    #[test]
    fn test_interval_floor_and_ordering() {
        let ci = interval(30.0, 0.0);
        assert_eq!(ci.lower_90, 25.0);
        assert_eq!(ci.upper_95, 35.0);

        let ci = interval(2.0, 0.0);
        assert_eq!(ci.lower_95, 0.0);
        assert!(ci.lower_95 <= ci.mean && ci.mean <= ci.upper_95);

        for (center, sd) in [(0.0, 0.0), (10.0, 100.0), (500.0, 3.0), (42.0, f64::NAN)] {
            let ci = interval(center, sd);
            assert!(ci.lower_95 <= ci.lower_90);
            assert!(ci.lower_90 <= ci.mean);
            assert!(ci.mean <= ci.upper_90);
            assert!(ci.upper_90 <= ci.upper_95);
        }
    }

    #[test]
    fn test_spread_scaled_by_accuracy() {
        let ctx = context(TransportMode::Truck, 100.0, 1.0);
        let outcomes = || {
            vec![
                ok(&ctx, ModelKind::Baseline, 100.0, 0.5),
                ok(&ctx, ModelKind::Neural, 140.0, 0.6),
            ]
        };
        let sharp = combine(&ctx, outcomes(), 1.0);
        let loose = combine(&ctx, outcomes(), 0.5);
        assert!((sharp.interval.std_dev - 20.0).abs() < 1e-9);
        assert!((loose.interval.std_dev - 40.0).abs() < 1e-9);
        assert!(loose.interval.upper_95 > sharp.interval.upper_95);
    }
}
