//! Location update pipeline: validation, ordering, throttling and enrichment.
//!
//! These are the pure steps; the tracker wraps them with the per-delivery
//! lock and persistence.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::TrackerConfig;
use crate::error::{TrackingError, TrackingResult};
use crate::geo::{Coordinate, bearing_degrees, distance_meters};
use crate::model::{EnrichedSample, LocationSample, LocationUpdate};

/// Why an update was accepted without storing anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscardReason {
    /// Too close to the previous sample in both time and space.
    Insignificant,
    /// Same timestamp as the last stored sample.
    Duplicate,
}

/// Checks ranges and required fields and produces an immutable sample.
pub fn validate(update: &LocationUpdate) -> TrackingResult<LocationSample> {
    if update.delivery_id.trim().is_empty() {
        return Err(TrackingError::validation("deliveryId", "is required"));
    }
    let latitude = update
        .latitude
        .ok_or_else(|| TrackingError::validation("latitude", "is required"))?;
    let longitude = update
        .longitude
        .ok_or_else(|| TrackingError::validation("longitude", "is required"))?;
    let timestamp = update
        .timestamp
        .ok_or_else(|| TrackingError::validation("timestamp", "is required"))?;

    if !latitude.is_finite() || !(-90.0..=90.0).contains(&latitude) {
        return Err(TrackingError::validation(
            "latitude",
            format!("must be within [-90, 90], got {latitude}"),
        ));
    }
    if !longitude.is_finite() || !(-180.0..=180.0).contains(&longitude) {
        return Err(TrackingError::validation(
            "longitude",
            format!("must be within [-180, 180], got {longitude}"),
        ));
    }
    if let Some(accuracy) = update.accuracy {
        if !accuracy.is_finite() || accuracy < 0.0 {
            return Err(TrackingError::validation("accuracy", "must be a non-negative number"));
        }
    }
    if let Some(speed) = update.speed {
        if !speed.is_finite() || speed < 0.0 {
            return Err(TrackingError::validation("speed", "must be a non-negative number"));
        }
    }
    if let Some(battery) = update.battery_level {
        if !(0.0..=100.0).contains(&battery) {
            return Err(TrackingError::validation("batteryLevel", "must be a percentage"));
        }
    }

    Ok(LocationSample {
        delivery_id: update.delivery_id.clone(),
        location: Coordinate::new(latitude, longitude),
        altitude: update.altitude,
        accuracy: update.accuracy,
        speed: update.speed,
        battery_level: update.battery_level,
        signal_strength: update.signal_strength,
        timestamp,
    })
}

/// Decides whether `next` should be stored after `last`.
///
/// Older samples are rejected; stored history is never rewritten. A sample
/// is insignificant only when it is both within the time threshold and
/// within the distance threshold of the last one.
pub fn admit(
    last: Option<&EnrichedSample>,
    next: &LocationSample,
    config: &TrackerConfig,
) -> TrackingResult<Option<DiscardReason>> {
    let Some(last) = last else {
        return Ok(None);
    };

    let last_ts = last.timestamp();
    if next.timestamp < last_ts {
        return Err(TrackingError::OutOfOrder {
            delivery_id: next.delivery_id.clone(),
            timestamp: next.timestamp,
            last: last_ts,
        });
    }
    if next.timestamp == last_ts {
        return Ok(Some(DiscardReason::Duplicate));
    }

    let elapsed = seconds_between(last_ts, next.timestamp);
    let displacement = distance_meters(last.location(), next.location);
    if elapsed < config.min_update_interval_secs && displacement < config.min_displacement_m {
        return Ok(Some(DiscardReason::Insignificant));
    }

    Ok(None)
}

/// Derives speed, bearing, acceleration and distance from the predecessor.
pub fn enrich(previous: Option<&EnrichedSample>, sample: LocationSample) -> EnrichedSample {
    let Some(prev) = previous else {
        return EnrichedSample {
            sequence: 0,
            sample,
            computed_speed_kmh: None,
            bearing: None,
            acceleration: None,
            distance_m: None,
            elapsed_secs: None,
        };
    };

    let elapsed = seconds_between(prev.timestamp(), sample.timestamp);
    let distance = distance_meters(prev.location(), sample.location);
    let hours = elapsed / 3600.0;

    let speed = (hours > 0.0).then(|| (distance / 1000.0) / hours);
    let acceleration = match (speed, prev.effective_speed()) {
        (Some(now), Some(before)) if hours > 0.0 => Some((now - before) / hours),
        _ => None,
    };

    EnrichedSample {
        sequence: prev.sequence + 1,
        computed_speed_kmh: speed,
        bearing: Some(bearing_degrees(prev.location(), sample.location)),
        acceleration,
        distance_m: Some(distance),
        elapsed_secs: Some(elapsed),
        sample,
    }
}

fn seconds_between(earlier: DateTime<Utc>, later: DateTime<Utc>) -> f64 {
    (later - earlier).num_milliseconds() as f64 / 1000.0
}

/// Running totals over a delivery's stored samples.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JourneyStats {
    pub total_distance_m: f64,
    pub average_speed_kmh: f64,
    pub stops_count: u32,
    #[serde(skip)]
    started_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    last_at: Option<DateTime<Utc>>,
    #[serde(skip)]
    moving: bool,
}

impl JourneyStats {
    pub fn record(&mut self, sample: &EnrichedSample, stationary_speed_kmh: f64) {
        let started = *self.started_at.get_or_insert(sample.timestamp());
        self.last_at = Some(sample.timestamp());
        self.total_distance_m += sample.distance_m.unwrap_or(0.0);

        let hours = seconds_between(started, sample.timestamp()) / 3600.0;
        self.average_speed_kmh = if hours > 0.0 {
            (self.total_distance_m / 1000.0) / hours
        } else {
            0.0
        };

        if let Some(speed) = sample.effective_speed() {
            let moving = speed >= stationary_speed_kmh;
            if self.moving && !moving {
                self.stops_count += 1;
            }
            self.moving = moving;
        }
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    /// Time between the first and the latest recorded sample.
    pub fn elapsed(&self) -> Option<chrono::Duration> {
        Some(self.last_at? - self.started_at?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::destination_point;
    use chrono::Duration;

    fn update(lat: f64, lng: f64, at: DateTime<Utc>) -> LocationUpdate {
        LocationUpdate {
            delivery_id: "D1".into(),
            latitude: Some(lat),
            longitude: Some(lng),
            timestamp: Some(at),
            ..Default::default()
        }
    }

    fn sample_at(location: Coordinate, at: DateTime<Utc>) -> LocationSample {
        validate(&update(location.latitude, location.longitude, at)).unwrap()
    }

    #[test]
    fn test_validate_rejects_out_of_range() {
        let now = Utc::now();
        assert!(matches!(
            validate(&update(91.0, 0.0, now)),
            Err(TrackingError::Validation { field: "latitude", .. })
        ));
        assert!(matches!(
            validate(&update(0.0, 181.0, now)),
            Err(TrackingError::Validation { field: "longitude", .. })
        ));
    }

    #[test]
    fn test_validate_rejects_missing_fields() {
        let mut u = update(10.0, 10.0, Utc::now());
        u.timestamp = None;
        assert!(matches!(
            validate(&u),
            Err(TrackingError::Validation { field: "timestamp", .. })
        ));

        let mut u = update(10.0, 10.0, Utc::now());
        u.latitude = None;
        assert!(validate(&u).is_err());
    }

    #[test]
    fn test_first_sample_has_no_derived_fields() {
        let s = enrich(None, sample_at(Coordinate::new(1.0, 1.0), Utc::now()));
        assert_eq!(s.sequence, 0);
        assert!(s.computed_speed_kmh.is_none());
        assert!(s.bearing.is_none());
        assert!(s.acceleration.is_none());
        assert!(s.distance_m.is_none());
    }

    #[test]
    fn test_speed_is_distance_over_time() {
        let t0 = Utc::now();
        let a = Coordinate::new(52.0, 13.0);
        let b = destination_point(a, 90.0, 1_000.0);

        let first = enrich(None, sample_at(a, t0));
        let second = enrich(Some(&first), sample_at(b, t0 + Duration::seconds(60)));

        let d = second.distance_m.unwrap();
        assert!((d - 1_000.0).abs() < 0.5);
        let expected = (d / 1000.0) / (60.0 / 3600.0);
        assert!((second.computed_speed_kmh.unwrap() - expected).abs() < 1e-9);
        assert!((second.bearing.unwrap() - 90.0).abs() < 0.1);
        assert_eq!(second.sequence, 1);
        // predecessor had no speed at all
        assert!(second.acceleration.is_none());
    }

    #[test]
    fn test_acceleration_from_previous_speed() {
        let t0 = Utc::now();
        let a = Coordinate::new(52.0, 13.0);
        let first = enrich(None, sample_at(a, t0));
        let b = destination_point(a, 0.0, 500.0);
        let second = enrich(Some(&first), sample_at(b, t0 + Duration::seconds(60)));
        let c = destination_point(b, 0.0, 1_000.0);
        let third = enrich(Some(&second), sample_at(c, t0 + Duration::seconds(120)));

        let dv = third.computed_speed_kmh.unwrap() - second.computed_speed_kmh.unwrap();
        let expected = dv / (60.0 / 3600.0);
        assert!((third.acceleration.unwrap() - expected).abs() < 1e-6);
        assert!(third.acceleration.unwrap() > 0.0);
    }

    #[test]
    fn test_throttle_requires_both_thresholds() {
        let config = TrackerConfig::default();
        let t0 = Utc::now();
        let a = Coordinate::new(52.0, 13.0);
        let last = enrich(None, sample_at(a, t0));

        let near_soon = sample_at(destination_point(a, 0.0, 50.0), t0 + Duration::seconds(10));
        assert_eq!(admit(Some(&last), &near_soon, &config), Ok(Some(DiscardReason::Insignificant)));

        let far_soon = sample_at(destination_point(a, 0.0, 150.0), t0 + Duration::seconds(10));
        assert_eq!(admit(Some(&last), &far_soon, &config), Ok(None));

        let near_late = sample_at(destination_point(a, 0.0, 50.0), t0 + Duration::seconds(45));
        assert_eq!(admit(Some(&last), &near_late, &config), Ok(None));
    }

    #[test]
    fn test_older_sample_is_out_of_order() {
        let config = TrackerConfig::default();
        let t0 = Utc::now();
        let last = enrich(None, sample_at(Coordinate::new(0.0, 0.0), t0));
        let stale = sample_at(Coordinate::new(1.0, 1.0), t0 - Duration::seconds(5));
        assert!(matches!(
            admit(Some(&last), &stale, &config),
            Err(TrackingError::OutOfOrder { .. })
        ));
    }

    #[test]
    fn test_same_timestamp_is_duplicate() {
        let config = TrackerConfig::default();
        let t0 = Utc::now();
        let last = enrich(None, sample_at(Coordinate::new(0.0, 0.0), t0));
        let again = sample_at(Coordinate::new(0.5, 0.5), t0);
        assert_eq!(admit(Some(&last), &again, &config), Ok(Some(DiscardReason::Duplicate)));
    }

    #[test]
    fn test_journey_stats_counts_stops() {
        let t0 = Utc::now();
        let mut stats = JourneyStats::default();
        let mut prev: Option<EnrichedSample> = None;
        let mut here = Coordinate::new(52.0, 13.0);

        // moving, moving, stopped, stopped, moving, stopped
        let speeds = [40.0, 40.0, 0.0, 0.0, 30.0, 1.0];
        for (i, speed) in speeds.iter().enumerate() {
            here = destination_point(here, 0.0, 500.0);
            let mut s = sample_at(here, t0 + Duration::minutes(i as i64));
            s.speed = Some(*speed);
            let enriched = enrich(prev.as_ref(), s);
            stats.record(&enriched, 2.0);
            prev = Some(enriched);
        }

        assert_eq!(stats.stops_count, 2);
        assert!((stats.total_distance_m - 2_500.0).abs() < 1.0);
        // 2.5 km over 5 minutes
        assert!((stats.average_speed_kmh - 30.0).abs() < 0.1);
        assert_eq!(stats.started_at(), Some(t0));
        assert_eq!(stats.elapsed(), Some(Duration::minutes(5)));
    }

    #[test]
    fn test_empty_journey_has_no_elapsed_time() {
        assert!(JourneyStats::default().elapsed().is_none());
    }
}
