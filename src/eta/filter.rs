//! Constant-acceleration Kalman filter over along-track motion, and the
//! estimator that projects remaining distance at the smoothed speed.
//!
//! State is `[s, v, a]`: distance travelled (km), speed (km/h) and
//! acceleration (km/h²). One filter lives in each delivery's session.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::eta::Estimator;
use crate::eta::types::{ModelError, ModelEstimate, ModelKind, PredictionContext};

/// Projections never assume the vehicle is slower than this.
pub const MIN_PROJECTION_SPEED_KMH: f64 = 5.0;

/// Spectral density of the white-jerk process noise.
const JERK_NOISE: f64 = 2.5e6;
const DEFAULT_ACCURACY_M: f64 = 20.0;
/// Variance of a device-reported speed, (km/h)².
const REPORTED_SPEED_VARIANCE: f64 = 16.0;

type Matrix3 = [[f64; 3]; 3];

/// The part of the filter state estimators care about.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MotionSnapshot {
    pub speed_kmh: f64,
    pub speed_variance: f64,
    pub observations: u32,
}

#[derive(Debug, Clone, Default)]
pub struct MotionFilter {
    state: [f64; 3],
    covariance: Matrix3,
    odometer_km: f64,
    last_update: Option<DateTime<Utc>>,
    observations: u32,
}

impl MotionFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Folds one sample into the filter.
    ///
    /// `distance_km` is the displacement since the previous sample and
    /// `speed_kmh` the best available speed reading for this one.
    pub fn observe(
        &mut self,
        at: DateTime<Utc>,
        distance_km: f64,
        speed_kmh: Option<f64>,
        accuracy_m: Option<f64>,
    ) {
        let Some(last) = self.last_update else {
            self.state = [0.0, speed_kmh.unwrap_or(0.0), 0.0];
            self.covariance = [[1e-4, 0.0, 0.0], [0.0, 100.0, 0.0], [0.0, 0.0, 1e4]];
            self.odometer_km = 0.0;
            self.last_update = Some(at);
            self.observations = 1;
            return;
        };

        let dt = (at - last).num_milliseconds() as f64 / 3_600_000.0;
        if dt <= 0.0 {
            return;
        }

        self.predict(dt);

        self.odometer_km += distance_km.max(0.0);
        let accuracy_km = accuracy_m.unwrap_or(DEFAULT_ACCURACY_M) / 1000.0;
        self.update(0, self.odometer_km, accuracy_km.powi(2).max(1e-8));
        if let Some(speed) = speed_kmh {
            self.update(1, speed, REPORTED_SPEED_VARIANCE);
        }

        self.last_update = Some(at);
        self.observations += 1;
    }

    pub fn snapshot(&self) -> Option<MotionSnapshot> {
        self.last_update.map(|_| MotionSnapshot {
            speed_kmh: self.state[1].max(0.0),
            speed_variance: self.covariance[1][1].max(0.0),
            observations: self.observations,
        })
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }

    fn predict(&mut self, dt: f64) {
        let f: Matrix3 = [[1.0, dt, dt * dt / 2.0], [0.0, 1.0, dt], [0.0, 0.0, 1.0]];

        let x = self.state;
        self.state = [
            f[0][0] * x[0] + f[0][1] * x[1] + f[0][2] * x[2],
            x[1] + f[1][2] * x[2],
            x[2],
        ];

        let dt2 = dt * dt;
        let dt3 = dt2 * dt;
        let q: Matrix3 = [
            [dt2 * dt3 / 20.0, dt2 * dt2 / 8.0, dt3 / 6.0],
            [dt2 * dt2 / 8.0, dt3 / 3.0, dt2 / 2.0],
            [dt3 / 6.0, dt2 / 2.0, dt],
        ];

        let fp = mul(&f, &self.covariance);
        let fpft = mul(&fp, &transpose(&f));
        for i in 0..3 {
            for j in 0..3 {
                self.covariance[i][j] = fpft[i][j] + JERK_NOISE * q[i][j];
            }
        }
    }

    /// Scalar measurement of state component `i` with variance `r`.
    fn update(&mut self, i: usize, z: f64, r: f64) {
        let s = self.covariance[i][i] + r;
        if s <= 0.0 || !z.is_finite() {
            return;
        }
        let innovation = z - self.state[i];
        let gain = [
            self.covariance[0][i] / s,
            self.covariance[1][i] / s,
            self.covariance[2][i] / s,
        ];
        for (x, k) in self.state.iter_mut().zip(gain) {
            *x += k * innovation;
        }

        let row = self.covariance[i];
        for (a, k) in gain.iter().enumerate() {
            for (b, p) in row.iter().enumerate() {
                self.covariance[a][b] -= k * p;
            }
        }
    }
}

fn mul(a: &Matrix3, b: &Matrix3) -> Matrix3 {
    let mut out = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = (0..3).map(|k| a[i][k] * b[k][j]).sum();
        }
    }
    out
}

fn transpose(a: &Matrix3) -> Matrix3 {
    let mut out = [[0.0; 3]; 3];
    for i in 0..3 {
        for j in 0..3 {
            out[i][j] = a[j][i];
        }
    }
    out
}

/// Projects the remaining distance at the filter's smoothed speed.
///
/// Before the filter has seen movement the mode's typical speed is used as
/// the prior, with reduced confidence.
#[derive(Debug, Clone, Default)]
pub struct FilterEstimator;

impl FilterEstimator {
    /// Speed used for projection and its standard deviation.
    pub fn projection_speed(ctx: &PredictionContext) -> (f64, f64, bool) {
        match ctx.motion {
            Some(m) if m.observations >= 2 => (
                m.speed_kmh.max(MIN_PROJECTION_SPEED_KMH),
                m.speed_variance.sqrt(),
                true,
            ),
            _ => {
                let prior = ctx.mode.average_speed_kmh() / ctx.time_factor.max(0.1);
                (prior.max(MIN_PROJECTION_SPEED_KMH), prior * 0.3, false)
            }
        }
    }
}

impl Estimator for FilterEstimator {
    fn kind(&self) -> ModelKind {
        ModelKind::Filter
    }

    fn estimate(&self, ctx: &PredictionContext) -> Result<ModelEstimate, ModelError> {
        let (speed, speed_sd, primed) = Self::projection_speed(ctx);
        let variation = ctx.route_speed_variation.max(0.0);

        let duration = ctx.distance_km / speed * 60.0 * (1.0 + 0.5 * variation);
        let certainty = 1.0 / (1.0 + speed_sd / speed + variation);
        let confidence = if primed { certainty } else { certainty * 0.5 };

        ModelEstimate::from_duration(ModelKind::Filter, ctx, duration, confidence)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::eta::test_support::context;
    use crate::model::TransportMode;
    use chrono::Duration;

    fn drive(filter: &mut MotionFilter, speed_kmh: f64, minutes: i64) {
        let t0 = filter.last_update.unwrap_or_else(Utc::now);
        for m in 1..=minutes {
            filter.observe(t0 + Duration::minutes(m), speed_kmh / 60.0, Some(speed_kmh), Some(10.0));
        }
    }

    #[test]
    fn test_unprimed_filter_has_no_snapshot() {
        assert!(MotionFilter::new().snapshot().is_none());
    }

    #[test]
    fn test_converges_to_steady_speed() {
        let mut filter = MotionFilter::new();
        filter.observe(Utc::now(), 0.0, Some(0.0), Some(10.0));
        drive(&mut filter, 60.0, 20);

        let snap = filter.snapshot().unwrap();
        assert!((snap.speed_kmh - 60.0).abs() < 3.0, "got {}", snap.speed_kmh);
        assert_eq!(snap.observations, 21);
        assert!(snap.speed_variance < 100.0);
    }

    #[test]
    fn test_smooths_a_single_spike() {
        let mut filter = MotionFilter::new();
        filter.observe(Utc::now(), 0.0, Some(40.0), Some(10.0));
        drive(&mut filter, 40.0, 15);
        let before = filter.snapshot().unwrap().speed_kmh;

        let t = filter.last_update.unwrap() + Duration::minutes(1);
        filter.observe(t, 40.0 / 60.0, Some(140.0), Some(10.0));
        let after = filter.snapshot().unwrap().speed_kmh;

        assert!(after > before);
        assert!(after < 140.0);
    }

    #[test]
    fn test_speed_never_negative() {
        let mut filter = MotionFilter::new();
        filter.observe(Utc::now(), 0.0, Some(30.0), None);
        drive(&mut filter, 0.0, 10);
        assert!(filter.snapshot().unwrap().speed_kmh >= 0.0);
    }

    #[test]
    fn test_ignores_non_increasing_time() {
        let mut filter = MotionFilter::new();
        let t0 = Utc::now();
        filter.observe(t0, 0.0, Some(30.0), None);
        filter.observe(t0, 1.0, Some(90.0), None);
        assert_eq!(filter.snapshot().unwrap().observations, 1);
    }

    #[test]
    fn test_estimator_uses_prior_until_primed() {
        let ctx = context(TransportMode::Van, 40.0, 1.0);
        let est = FilterEstimator.estimate(&ctx).unwrap();
        assert!((est.duration_minutes - 60.0).abs() < 1e-9);
        assert!(est.confidence < 0.5);
    }

    #[test]
    fn test_estimator_projects_smoothed_speed() {
        let mut ctx = context(TransportMode::Van, 30.0, 1.0);
        ctx.motion = Some(MotionSnapshot {
            speed_kmh: 60.0,
            speed_variance: 4.0,
            observations: 10,
        });
        let est = FilterEstimator.estimate(&ctx).unwrap();
        assert!((est.duration_minutes - 30.0).abs() < 1e-9);

        ctx.route_speed_variation = 0.2;
        let slower = FilterEstimator.estimate(&ctx).unwrap();
        assert!((slower.duration_minutes - 33.0).abs() < 1e-9);
        assert!(slower.confidence < est.confidence);
    }

    #[test]
    fn test_stopped_vehicle_uses_floor_speed() {
        let mut ctx = context(TransportMode::Truck, 10.0, 1.0);
        ctx.motion = Some(MotionSnapshot {
            speed_kmh: 0.0,
            speed_variance: 1.0,
            observations: 5,
        });
        let est = FilterEstimator.estimate(&ctx).unwrap();
        assert!((est.duration_minutes - 120.0).abs() < 1e-9);
    }
}
