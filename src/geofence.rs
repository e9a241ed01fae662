//! Per-delivery circular geofences with edge-triggered enter/exit events.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::geo::{Coordinate, is_inside_geofence};
use crate::model::Delivery;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeofenceKind {
    Pickup,
    Delivery,
}

impl std::fmt::Display for GeofenceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            GeofenceKind::Pickup => "pickup",
            GeofenceKind::Delivery => "delivery",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeofenceTransition {
    Enter,
    Exit,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Geofence {
    pub kind: GeofenceKind,
    pub center: Coordinate,
    pub radius_m: f64,
    pub inside: bool,
}

/// Fired once per containment flip.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GeofenceEvent {
    pub delivery_id: String,
    pub geofence: GeofenceKind,
    pub transition: GeofenceTransition,
    pub location: Coordinate,
    pub timestamp: DateTime<Utc>,
}

/// The active geofences of a single delivery.
///
/// Containment is remembered between samples so that a vehicle parked
/// inside a zone produces one `Enter`, not one per report.
#[derive(Debug, Clone)]
pub struct GeofenceRegistry {
    delivery_id: String,
    fences: Vec<Geofence>,
}

impl GeofenceRegistry {
    /// Creates pickup and delivery zones of `radius_m` around the resolved
    /// addresses.
    pub fn for_delivery(delivery: &Delivery, radius_m: f64) -> Self {
        let fences = vec![
            Geofence {
                kind: GeofenceKind::Pickup,
                center: delivery.pickup_location,
                radius_m,
                inside: false,
            },
            Geofence {
                kind: GeofenceKind::Delivery,
                center: delivery.delivery_location,
                radius_m,
                inside: false,
            },
        ];
        Self {
            delivery_id: delivery.id.clone(),
            fences,
        }
    }

    /// Evaluates every fence against `point` and returns the flips.
    pub fn evaluate(&mut self, point: Coordinate, timestamp: DateTime<Utc>) -> Vec<GeofenceEvent> {
        let mut events = Vec::new();

        for fence in &mut self.fences {
            let inside = is_inside_geofence(point, fence.center, fence.radius_m);
            if inside == fence.inside {
                continue;
            }
            fence.inside = inside;

            let transition = if inside {
                GeofenceTransition::Enter
            } else {
                GeofenceTransition::Exit
            };
            debug!(
                delivery_id = %self.delivery_id,
                geofence = %fence.kind,
                ?transition,
                "Geofence containment changed"
            );
            events.push(GeofenceEvent {
                delivery_id: self.delivery_id.clone(),
                geofence: fence.kind,
                transition,
                location: point,
                timestamp,
            });
        }

        events
    }

    pub fn fences(&self) -> &[Geofence] {
        &self.fences
    }

    pub fn is_empty(&self) -> bool {
        self.fences.is_empty()
    }

    /// Drops every fence; called once the delivery is terminal.
    pub fn clear(&mut self) {
        self.fences.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geo::destination_point;
    use crate::model::TransportMode;
    use crate::status::DeliveryStatus;

    fn delivery() -> Delivery {
        Delivery {
            id: "D1".into(),
            status: DeliveryStatus::Assigned,
            pickup_address: "Farm".into(),
            pickup_location: Coordinate::new(52.0, 13.0),
            delivery_address: "Market".into(),
            delivery_location: Coordinate::new(52.5, 13.4),
            transport_mode: TransportMode::Van,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_enter_fires_once_while_inside() {
        let d = delivery();
        let mut registry = GeofenceRegistry::for_delivery(&d, 200.0);
        let now = Utc::now();

        let far = destination_point(d.pickup_location, 0.0, 5_000.0);
        assert!(registry.evaluate(far, now).is_empty());

        let near = destination_point(d.pickup_location, 0.0, 50.0);
        let events = registry.evaluate(near, now);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].geofence, GeofenceKind::Pickup);
        assert_eq!(events[0].transition, GeofenceTransition::Enter);

        for _ in 0..5 {
            assert!(registry.evaluate(d.pickup_location, now).is_empty());
        }
    }

    #[test]
    fn test_exit_after_enter() {
        let d = delivery();
        let mut registry = GeofenceRegistry::for_delivery(&d, 200.0);
        let now = Utc::now();

        registry.evaluate(d.pickup_location, now);
        let events = registry.evaluate(destination_point(d.pickup_location, 90.0, 300.0), now);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].transition, GeofenceTransition::Exit);
        assert!(!registry.fences()[0].inside);
    }

    #[test]
    fn test_each_flip_reports_once() {
        let d = delivery();
        let mut registry = GeofenceRegistry::for_delivery(&d, 200.0);
        let now = Utc::now();
        let outside = destination_point(d.delivery_location, 180.0, 1_000.0);

        let path = [outside, d.delivery_location, d.delivery_location, outside, outside, d.delivery_location];
        let flips: usize = path.iter().map(|p| registry.evaluate(*p, now).len()).sum();
        assert_eq!(flips, 3);
    }

    #[test]
    fn test_clear_removes_fences() {
        let mut registry = GeofenceRegistry::for_delivery(&delivery(), 200.0);
        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.evaluate(Coordinate::new(52.0, 13.0), Utc::now()).is_empty());
    }
}
