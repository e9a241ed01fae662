//! Ordinary least squares over comparable completed routes.

use chrono::{DateTime, Utc};

use crate::eta::Estimator;
use crate::eta::baseline::BaselineEstimator;
use crate::eta::stats::mean;
use crate::eta::traffic::{cyclic_hour, day_of_week, traffic_multiplier};
use crate::eta::types::{HistoricalRoute, ModelError, ModelEstimate, ModelKind, PredictionContext};

/// Fewer comparable routes than this and the regression answers with the
/// baseline figure instead.
pub const MIN_REGRESSION_ROUTES: usize = 5;

const FEATURES: usize = 8;
const FALLBACK_CONFIDENCE: f64 = 0.3;

/// Linear model of trip duration on distance, calendar and conditions.
#[derive(Debug, Clone)]
pub struct RegressionEstimator {
    min_routes: usize,
    ridge: f64,
}

impl Default for RegressionEstimator {
    fn default() -> Self {
        Self {
            min_routes: MIN_REGRESSION_ROUTES,
            ridge: 1e-3,
        }
    }
}

fn features(
    distance_km: f64,
    at: DateTime<Utc>,
    time_factor: f64,
    weather_factor: f64,
    traffic_density: f64,
) -> [f64; FEATURES] {
    let (hour_sin, hour_cos) = cyclic_hour(at);
    [
        1.0,
        distance_km,
        time_factor,
        weather_factor,
        traffic_density,
        hour_sin,
        hour_cos,
        day_of_week(at),
    ]
}

fn route_features(route: &HistoricalRoute) -> [f64; FEATURES] {
    features(
        route.distance_km,
        route.departed_at,
        traffic_multiplier(route.departed_at),
        route.weather_factor,
        route.traffic_density,
    )
}

/// Fitted coefficients plus the in-sample R².
#[derive(Debug, Clone)]
pub struct LinearFit {
    pub coefficients: [f64; FEATURES],
    pub r_squared: f64,
}

impl LinearFit {
    pub fn predict(&self, x: &[f64; FEATURES]) -> f64 {
        self.coefficients.iter().zip(x).map(|(c, v)| c * v).sum()
    }
}

impl RegressionEstimator {
    /// Solves the ridge-regularized normal equations `(XᵀX + λI)β = Xᵀy`.
    /// The intercept is not penalized.
    pub fn fit(&self, routes: &[HistoricalRoute]) -> Result<LinearFit, ModelError> {
        let mut xtx = vec![vec![0.0; FEATURES]; FEATURES];
        let mut xty = vec![0.0; FEATURES];
        let mut targets = Vec::with_capacity(routes.len());

        for route in routes.iter().filter(|r| r.duration_minutes > 0.0) {
            let x = route_features(route);
            for i in 0..FEATURES {
                xty[i] += x[i] * route.duration_minutes;
                for j in 0..FEATURES {
                    xtx[i][j] += x[i] * x[j];
                }
            }
            targets.push((x, route.duration_minutes));
        }

        if targets.len() < self.min_routes {
            return Err(ModelError::InsufficientData(format!(
                "{} usable routes, need {}",
                targets.len(),
                self.min_routes
            )));
        }

        for (i, row) in xtx.iter_mut().enumerate().skip(1) {
            row[i] += self.ridge * targets.len() as f64;
        }

        let beta = solve_linear(xtx, xty)
            .ok_or_else(|| ModelError::Computation("singular normal equations".into()))?;
        let mut coefficients = [0.0; FEATURES];
        coefficients.copy_from_slice(&beta);

        let fit = LinearFit {
            coefficients,
            r_squared: 0.0,
        };
        let observed: Vec<f64> = targets.iter().map(|(_, y)| *y).collect();
        let y_mean = mean(&observed);
        let ss_tot: f64 = observed.iter().map(|y| (y - y_mean).powi(2)).sum();
        let ss_res: f64 = targets.iter().map(|(x, y)| (y - fit.predict(x)).powi(2)).sum();
        let r_squared = if ss_tot > 0.0 {
            (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
        } else {
            1.0
        };

        Ok(LinearFit { r_squared, ..fit })
    }
}

impl Estimator for RegressionEstimator {
    fn kind(&self) -> ModelKind {
        ModelKind::Regression
    }

    fn estimate(&self, ctx: &PredictionContext) -> Result<ModelEstimate, ModelError> {
        let baseline = BaselineEstimator::duration_minutes(ctx);

        let fit = match self.fit(&ctx.history) {
            Ok(fit) => fit,
            Err(ModelError::InsufficientData(_)) => {
                return ModelEstimate::from_duration(
                    ModelKind::Regression,
                    ctx,
                    baseline,
                    FALLBACK_CONFIDENCE,
                );
            }
            Err(e) => return Err(e),
        };

        let x = features(
            ctx.distance_km,
            ctx.departure,
            ctx.time_factor,
            ctx.weather_factor,
            ctx.traffic_density,
        );
        let predicted = fit.predict(&x);
        if !predicted.is_finite() || predicted <= 0.0 {
            return Err(ModelError::Computation(format!(
                "regression extrapolated to {predicted:.1} minutes"
            )));
        }

        // Extrapolation far outside the fitted routes is not trusted.
        let bounded = predicted.clamp(baseline * 0.25, baseline * 4.0);
        let confidence = fit.r_squared.clamp(0.2, 0.95);

        ModelEstimate::from_duration(ModelKind::Regression, ctx, bounded, confidence)
    }
}

/// Gaussian elimination with partial pivoting. `None` if singular.
fn solve_linear(mut a: Vec<Vec<f64>>, mut b: Vec<f64>) -> Option<Vec<f64>> {
    let n = b.len();

    for col in 0..n {
        let pivot = (col..n).max_by(|&i, &j| a[i][col].abs().total_cmp(&a[j][col].abs()))?;
        if a[pivot][col].abs() < 1e-12 {
            return None;
        }
        a.swap(col, pivot);
        b.swap(col, pivot);

        for row in (col + 1)..n {
            let factor = a[row][col] / a[col][col];
            if factor == 0.0 {
                continue;
            }
            for k in col..n {
                a[row][k] -= factor * a[col][k];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|k| a[row][k] * x[k]).sum();
        x[row] = (b[row] - tail) / a[row][row];
    }

    x.iter().all(|v| v.is_finite()).then_some(x)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eta::test_support::{context, route};
    use crate::model::TransportMode;
    use chrono::Duration;

    #[test]
    fn test_solve_linear_small_system() {
        let a = vec![vec![2.0, 1.0], vec![1.0, 3.0]];
        let b = vec![3.0, 5.0];
        let x = solve_linear(a, b).unwrap();
        assert!((x[0] - 0.8).abs() < 1e-12);
        assert!((x[1] - 1.4).abs() < 1e-12);
    }

    #[test]
    fn test_solve_linear_singular() {
        let a = vec![vec![1.0, 2.0], vec![2.0, 4.0]];
        assert!(solve_linear(a, vec![1.0, 2.0]).is_none());
    }

    #[test]
    fn test_sparse_history_falls_back_to_baseline() {
        let mut ctx = context(TransportMode::Truck, 100.0, 1.0);
        ctx.history = (0..3).map(|i| route(50.0 + i as f64, 80.0, i)).collect();

        let est = RegressionEstimator::default().estimate(&ctx).unwrap();
        let baseline = BaselineEstimator::duration_minutes(&ctx);
        assert!((est.duration_minutes - baseline).abs() < 1e-9);
        assert_eq!(est.confidence, FALLBACK_CONFIDENCE);
        assert_eq!(est.model, ModelKind::Regression);
    }

    #[test]
    fn test_learns_route_speed() {
        // Vans on this corridor average 60 km/h regardless of the hour.
        let history: Vec<HistoricalRoute> = (0..30)
            .map(|i| {
                let distance = 20.0 + (i as f64) * 5.0;
                let mut r = route(distance, distance, i);
                r.departed_at = r.departed_at + Duration::hours(i as i64 * 5);
                r
            })
            .collect();

        let mut ctx = context(TransportMode::Van, 90.0, 1.0);
        ctx.history = history;

        let est = RegressionEstimator::default().estimate(&ctx).unwrap();
        assert!((est.duration_minutes - 90.0).abs() < 5.0, "got {}", est.duration_minutes);
        assert!(est.confidence > 0.9);
    }
}
