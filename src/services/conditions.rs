//! Weather and traffic conditions feeding the estimators.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::geo::Coordinate;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Conditions {
    /// Travel-time multiplier, 1.0 for clear weather.
    pub weather_factor: f64,
    /// 0.0 (empty roads) to 1.0 (gridlock).
    pub traffic_density: f64,
}

impl Default for Conditions {
    fn default() -> Self {
        Self {
            weather_factor: 1.0,
            traffic_density: 0.5,
        }
    }
}

/// Plausible range for `weather_factor`.
pub const WEATHER_FACTOR_RANGE: (f64, f64) = (0.5, 3.0);

impl Conditions {
    /// Clamps provider values into their plausible ranges; non-finite values
    /// become neutral.
    pub fn sanitized(self) -> Self {
        let neutral = Conditions::default();
        let (lo, hi) = WEATHER_FACTOR_RANGE;
        Self {
            weather_factor: if self.weather_factor.is_finite() {
                self.weather_factor.clamp(lo, hi)
            } else {
                neutral.weather_factor
            },
            traffic_density: if self.traffic_density.is_finite() {
                self.traffic_density.clamp(0.0, 1.0)
            } else {
                neutral.traffic_density
            },
        }
    }
}

#[async_trait]
pub trait ConditionsProvider: Send + Sync {
    async fn conditions(&self, at: Coordinate, when: DateTime<Utc>) -> Result<Conditions>;
}

/// Always reports the same conditions.
#[derive(Debug, Clone, Default)]
pub struct FixedConditions(pub Conditions);

#[async_trait]
impl ConditionsProvider for FixedConditions {
    async fn conditions(&self, _at: Coordinate, _when: DateTime<Utc>) -> Result<Conditions> {
        Ok(self.0)
    }
}
