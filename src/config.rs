//! Tracker configuration.
//!
//! Stored as a JSON object on disk; every field is optional and falls back
//! to its default:
//! ```json
//! {
//!   "min_update_interval_secs": 30,
//!   "geofence_radius_m": 150,
//!   "max_concurrent_refreshes": 4
//! }
//! ```
//! `TRACKER_*` environment variables override file values.

use anyhow::{Context, Result, ensure};
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TrackerConfig {
    /// Updates closer than this in time *and* `min_displacement_m` in space are dropped.
    pub min_update_interval_secs: f64,
    pub min_displacement_m: f64,
    pub geofence_radius_m: f64,
    pub speed_limit_kmh: f64,
    pub stationary_speed_kmh: f64,
    pub stationary_minutes: i64,
    pub poor_accuracy_m: f64,
    pub low_battery_pct: f64,
    pub refresh_interval_secs: u64,
    pub max_concurrent_refreshes: usize,
    pub provider_timeout_ms: u64,
    pub recent_history_limit: usize,
    pub alert_window_minutes: i64,
    pub default_historical_accuracy: f64,
    /// How close a stored route's endpoints must be to count as the same trip.
    pub history_match_radius_m: f64,
}

/// Upper bound for the minute-based windows: one week.
pub const MAX_WINDOW_MINUTES: i64 = 7 * 24 * 60;

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_update_interval_secs: 30.0,
            min_displacement_m: 100.0,
            geofence_radius_m: 200.0,
            speed_limit_kmh: 100.0,
            stationary_speed_kmh: 2.0,
            stationary_minutes: 30,
            poor_accuracy_m: 100.0,
            low_battery_pct: 20.0,
            refresh_interval_secs: 30,
            max_concurrent_refreshes: 8,
            provider_timeout_ms: 2_000,
            recent_history_limit: 20,
            alert_window_minutes: 60,
            default_historical_accuracy: 0.8,
            history_match_radius_m: 25_000.0,
        }
    }
}

impl TrackerConfig {
    /// Loads the config from a JSON file at `path`.
    pub fn load(path: &str) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file '{path}'"))?;
        let config: TrackerConfig = serde_json::from_str(&content)
            .with_context(|| format!("invalid config file '{path}'"))?;
        config.validated()
    }

    /// Applies `TRACKER_*` overrides from the process environment.
    pub fn with_env_overrides(self) -> Result<Self> {
        self.with_overrides(|key| std::env::var(key).ok())
    }

    fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        macro_rules! override_field {
            ($key:literal, $field:ident) => {
                if let Some(raw) = lookup($key) {
                    self.$field = raw
                        .trim()
                        .parse()
                        .with_context(|| format!("invalid value for {}: '{}'", $key, raw))?;
                }
            };
        }

        override_field!("TRACKER_MIN_UPDATE_INTERVAL_SECS", min_update_interval_secs);
        override_field!("TRACKER_MIN_DISPLACEMENT_M", min_displacement_m);
        override_field!("TRACKER_GEOFENCE_RADIUS_M", geofence_radius_m);
        override_field!("TRACKER_SPEED_LIMIT_KMH", speed_limit_kmh);
        override_field!("TRACKER_STATIONARY_MINUTES", stationary_minutes);
        override_field!("TRACKER_REFRESH_INTERVAL_SECS", refresh_interval_secs);
        override_field!("TRACKER_MAX_CONCURRENT_REFRESHES", max_concurrent_refreshes);
        override_field!("TRACKER_PROVIDER_TIMEOUT_MS", provider_timeout_ms);
        override_field!("TRACKER_STATIONARY_SPEED_KMH", stationary_speed_kmh);
        override_field!("TRACKER_POOR_ACCURACY_M", poor_accuracy_m);
        override_field!("TRACKER_LOW_BATTERY_PCT", low_battery_pct);
        override_field!("TRACKER_RECENT_HISTORY_LIMIT", recent_history_limit);
        override_field!("TRACKER_ALERT_WINDOW_MINUTES", alert_window_minutes);
        override_field!("TRACKER_DEFAULT_HISTORICAL_ACCURACY", default_historical_accuracy);
        override_field!("TRACKER_HISTORY_MATCH_RADIUS_M", history_match_radius_m);

        self.validated()
    }

    fn validated(self) -> Result<Self> {
        ensure!(
            (0..=MAX_WINDOW_MINUTES).contains(&self.stationary_minutes),
            "stationary_minutes must be within 0..={MAX_WINDOW_MINUTES}, got {}",
            self.stationary_minutes
        );
        ensure!(
            (0..=MAX_WINDOW_MINUTES).contains(&self.alert_window_minutes),
            "alert_window_minutes must be within 0..={MAX_WINDOW_MINUTES}, got {}",
            self.alert_window_minutes
        );
        ensure!(
            (0.0..=1.0).contains(&self.default_historical_accuracy),
            "default_historical_accuracy must be within 0..=1, got {}",
            self.default_historical_accuracy
        );
        Ok(self)
    }

    /// How long a vehicle may stand still before it is reported.
    pub fn stationary_limit(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.stationary_minutes.clamp(0, MAX_WINDOW_MINUTES))
    }

    /// How far back from the newest sample issues still count as alerts.
    pub fn alert_window(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.alert_window_minutes.clamp(0, MAX_WINDOW_MINUTES))
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_millis(self.provider_timeout_ms)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_secs.max(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::env;
    use std::fs;

    #[test]
    fn test_partial_file_keeps_defaults() {
        let path = format!("{}/delivery_tracker_config_test.json", env::temp_dir().display());
        fs::write(&path, r#"{ "geofence_radius_m": 150, "max_concurrent_refreshes": 2 }"#).unwrap();

        let config = TrackerConfig::load(&path).unwrap();
        assert_eq!(config.geofence_radius_m, 150.0);
        assert_eq!(config.max_concurrent_refreshes, 2);
        assert_eq!(config.min_update_interval_secs, 30.0);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_missing_file_is_an_error() {
        assert!(TrackerConfig::load("/nonexistent/tracker.json").is_err());
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("TRACKER_GEOFENCE_RADIUS_M", "250"),
            ("TRACKER_REFRESH_INTERVAL_SECS", "10"),
        ]
        .into_iter()
        .collect();

        let config = TrackerConfig::default()
            .with_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.geofence_radius_m, 250.0);
        assert_eq!(config.refresh_interval(), Duration::from_secs(10));
    }

    #[test]
    fn test_every_threshold_can_be_overridden() {
        let vars: HashMap<&str, &str> = [
            ("TRACKER_STATIONARY_SPEED_KMH", "3.5"),
            ("TRACKER_POOR_ACCURACY_M", "60"),
            ("TRACKER_LOW_BATTERY_PCT", "10"),
            ("TRACKER_RECENT_HISTORY_LIMIT", "5"),
            ("TRACKER_ALERT_WINDOW_MINUTES", "15"),
            ("TRACKER_DEFAULT_HISTORICAL_ACCURACY", "0.7"),
            ("TRACKER_HISTORY_MATCH_RADIUS_M", "5000"),
        ]
        .into_iter()
        .collect();

        let config = TrackerConfig::default()
            .with_overrides(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.stationary_speed_kmh, 3.5);
        assert_eq!(config.poor_accuracy_m, 60.0);
        assert_eq!(config.low_battery_pct, 10.0);
        assert_eq!(config.recent_history_limit, 5);
        assert_eq!(config.alert_window(), chrono::Duration::minutes(15));
        assert_eq!(config.default_historical_accuracy, 0.7);
        assert_eq!(config.history_match_radius_m, 5000.0);
    }

    #[test]
    fn test_out_of_range_windows_are_rejected() {
        let huge = TrackerConfig::default()
            .with_overrides(|k| (k == "TRACKER_STATIONARY_MINUTES").then(|| i64::MAX.to_string()));
        assert!(huge.is_err());

        let negative = TrackerConfig::default()
            .with_overrides(|k| (k == "TRACKER_ALERT_WINDOW_MINUTES").then(|| "-5".to_string()));
        assert!(negative.is_err());

        let path = format!("{}/delivery_tracker_bad_window.json", env::temp_dir().display());
        fs::write(&path, r#"{ "alert_window_minutes": 9223372036854775807 }"#).unwrap();
        assert!(TrackerConfig::load(&path).is_err());
        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_window_helpers_clamp_direct_values() {
        let config = TrackerConfig {
            stationary_minutes: i64::MAX,
            alert_window_minutes: -1,
            ..TrackerConfig::default()
        };
        assert_eq!(config.stationary_limit(), chrono::Duration::minutes(MAX_WINDOW_MINUTES));
        assert_eq!(config.alert_window(), chrono::Duration::zero());
    }

    #[test]
    fn test_bad_override_is_rejected() {
        let result = TrackerConfig::default().with_overrides(|k| {
            (k == "TRACKER_MAX_CONCURRENT_REFRESHES").then(|| "many".to_string())
        });
        assert!(result.is_err());
    }
}
