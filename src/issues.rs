//! Per-sample anomaly rules.
//!
//! | Rule                         | Issue               | Severity |
//! |------------------------------|---------------------|----------|
//! | speed above limit            | `excessive_speed`   | high     |
//! | stationary longer than limit | `prolonged_stop`    | medium   |
//! | accuracy worse than limit    | `poor_gps_accuracy` | low      |
//! | battery below limit          | `low_battery`       | medium   |

use chrono::{DateTime, Duration, Utc};
use uuid::Uuid;

use crate::config::TrackerConfig;
use crate::model::{EnrichedSample, Issue, IssueType, Severity};

/// Remembers when a delivery stopped moving, so a long stop is reported
/// once rather than on every stationary sample.
#[derive(Debug, Clone, Default)]
pub struct StationaryTracker {
    since: Option<DateTime<Utc>>,
    reported: bool,
}

impl StationaryTracker {
    pub fn stationary_since(&self) -> Option<DateTime<Utc>> {
        self.since
    }
}

#[derive(Debug, Clone)]
pub struct IssueDetector {
    speed_limit_kmh: f64,
    stationary_speed_kmh: f64,
    stationary_limit: Duration,
    poor_accuracy_m: f64,
    low_battery_pct: f64,
}

impl IssueDetector {
    pub fn new(config: &TrackerConfig) -> Self {
        Self {
            speed_limit_kmh: config.speed_limit_kmh,
            stationary_speed_kmh: config.stationary_speed_kmh,
            stationary_limit: config.stationary_limit(),
            poor_accuracy_m: config.poor_accuracy_m,
            low_battery_pct: config.low_battery_pct,
        }
    }

    /// Runs every rule against `sample`. Rules are independent of each other.
    pub fn inspect(&self, sample: &EnrichedSample, stationary: &mut StationaryTracker) -> Vec<Issue> {
        let mut issues = Vec::new();
        let speed = sample.effective_speed();

        if let Some(speed) = speed {
            if speed > self.speed_limit_kmh {
                issues.push(self.issue(
                    sample,
                    IssueType::ExcessiveSpeed,
                    Severity::High,
                    format!("Speed {speed:.0} km/h exceeds limit of {:.0} km/h", self.speed_limit_kmh),
                ));
            }

            if let Some(issue) = self.check_stationary(sample, speed, stationary) {
                issues.push(issue);
            }
        }

        if let Some(accuracy) = sample.sample.accuracy {
            if accuracy > self.poor_accuracy_m {
                issues.push(self.issue(
                    sample,
                    IssueType::PoorGpsAccuracy,
                    Severity::Low,
                    format!("GPS accuracy degraded to {accuracy:.0} m"),
                ));
            }
        }

        if let Some(battery) = sample.sample.battery_level {
            if battery < self.low_battery_pct {
                issues.push(self.issue(
                    sample,
                    IssueType::LowBattery,
                    Severity::Medium,
                    format!("Device battery at {battery:.0}%"),
                ));
            }
        }

        issues
    }

    fn check_stationary(
        &self,
        sample: &EnrichedSample,
        speed: f64,
        stationary: &mut StationaryTracker,
    ) -> Option<Issue> {
        if speed >= self.stationary_speed_kmh {
            *stationary = StationaryTracker::default();
            return None;
        }

        let since = *stationary.since.get_or_insert(sample.timestamp());
        let stopped_for = sample.timestamp() - since;
        if stationary.reported || stopped_for <= self.stationary_limit {
            return None;
        }

        stationary.reported = true;
        Some(self.issue(
            sample,
            IssueType::ProlongedStop,
            Severity::Medium,
            format!("Vehicle stationary for {} minutes", stopped_for.num_minutes()),
        ))
    }

    fn issue(
        &self,
        sample: &EnrichedSample,
        issue_type: IssueType,
        severity: Severity,
        description: String,
    ) -> Issue {
        Issue {
            id: Uuid::new_v4(),
            delivery_id: sample.sample.delivery_id.clone(),
            issue_type,
            severity,
            description,
            timestamp: sample.timestamp(),
            sample_sequence: sample.sequence,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::Coordinate;
    use crate::model::LocationSample;

    fn sample(at: DateTime<Utc>, speed: Option<f64>) -> EnrichedSample {
        EnrichedSample {
            sequence: 1,
            sample: LocationSample {
                delivery_id: "D1".into(),
                location: Coordinate::new(52.0, 13.0),
                altitude: None,
                accuracy: Some(10.0),
                speed,
                battery_level: Some(80.0),
                signal_strength: None,
                timestamp: at,
            },
            computed_speed_kmh: None,
            bearing: None,
            acceleration: None,
            distance_m: None,
            elapsed_secs: None,
        }
    }

    fn detector() -> IssueDetector {
        IssueDetector::new(&TrackerConfig::default())
    }

    #[test]
    fn test_excessive_speed_is_high() {
        let issues = detector().inspect(&sample(Utc::now(), Some(120.0)), &mut StationaryTracker::default());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, IssueType::ExcessiveSpeed);
        assert_eq!(issues[0].severity, Severity::High);
    }

    #[test]
    fn test_speed_at_limit_is_fine() {
        let issues = detector().inspect(&sample(Utc::now(), Some(100.0)), &mut StationaryTracker::default());
        assert!(issues.is_empty());
    }

    #[test]
    fn test_poor_accuracy_is_low() {
        let mut s = sample(Utc::now(), Some(30.0));
        s.sample.accuracy = Some(150.0);
        let issues = detector().inspect(&s, &mut StationaryTracker::default());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, IssueType::PoorGpsAccuracy);
        assert_eq!(issues[0].severity, Severity::Low);
    }

    #[test]
    fn test_low_battery_is_medium() {
        let mut s = sample(Utc::now(), None);
        s.sample.battery_level = Some(15.0);
        let issues = detector().inspect(&s, &mut StationaryTracker::default());
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, IssueType::LowBattery);
        assert_eq!(issues[0].severity, Severity::Medium);
    }

    #[test]
    fn test_rules_fire_together() {
        let mut s = sample(Utc::now(), Some(130.0));
        s.sample.accuracy = Some(300.0);
        s.sample.battery_level = Some(5.0);
        let issues = detector().inspect(&s, &mut StationaryTracker::default());
        assert_eq!(issues.len(), 3);
    }

    #[test]
    fn test_prolonged_stop_reported_once() {
        let detector = detector();
        let mut tracker = StationaryTracker::default();
        let t0 = Utc::now();

        let mut reported = 0;
        for minute in 0..=35 {
            let issues = detector.inspect(&sample(t0 + Duration::minutes(minute), Some(0.5)), &mut tracker);
            reported += issues
                .iter()
                .filter(|i| i.issue_type == IssueType::ProlongedStop)
                .count();
        }
        assert_eq!(reported, 1);
        assert_eq!(tracker.stationary_since(), Some(t0));
    }

    #[test]
    fn test_movement_resets_stationary_clock() {
        let detector = detector();
        let mut tracker = StationaryTracker::default();
        let t0 = Utc::now();

        detector.inspect(&sample(t0, Some(0.0)), &mut tracker);
        detector.inspect(&sample(t0 + Duration::minutes(20), Some(25.0)), &mut tracker);
        assert!(tracker.stationary_since().is_none());

        let issues = detector.inspect(&sample(t0 + Duration::minutes(40), Some(0.0)), &mut tracker);
        assert!(issues.is_empty());
        let issues = detector.inspect(&sample(t0 + Duration::minutes(71), Some(0.0)), &mut tracker);
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].issue_type, IssueType::ProlongedStop);
    }

    #[test]
    fn test_unknown_speed_leaves_stop_clock_alone() {
        let detector = detector();
        let mut tracker = StationaryTracker::default();
        let t0 = Utc::now();
        detector.inspect(&sample(t0, Some(0.0)), &mut tracker);
        detector.inspect(&sample(t0 + Duration::minutes(10), None), &mut tracker);
        assert_eq!(tracker.stationary_since(), Some(t0));
    }
}
