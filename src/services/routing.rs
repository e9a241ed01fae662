//! Road distance between two points.

use anyhow::Result;
use async_trait::async_trait;

use crate::geo::{Coordinate, distance_meters};
use crate::model::TransportMode;

/// Anything that can answer "how far by road from A to B".
#[async_trait]
pub trait RoutingProvider: Send + Sync {
    async fn distance_km(&self, from: Coordinate, to: Coordinate, mode: TransportMode) -> Result<f64>;
}

/// Great-circle distance stretched by a constant detour factor. Works
/// offline, so it doubles as the fallback when a real router times out.
#[derive(Debug, Clone)]
pub struct GreatCircleRouting {
    road_factor: f64,
}

pub const DEFAULT_ROAD_FACTOR: f64 = 1.3;

impl Default for GreatCircleRouting {
    fn default() -> Self {
        Self {
            road_factor: DEFAULT_ROAD_FACTOR,
        }
    }
}

impl GreatCircleRouting {
    pub fn new(road_factor: f64) -> Self {
        Self { road_factor }
    }

    pub fn estimate_km(&self, from: Coordinate, to: Coordinate) -> f64 {
        distance_meters(from, to) / 1000.0 * self.road_factor
    }
}

#[async_trait]
impl RoutingProvider for GreatCircleRouting {
    async fn distance_km(&self, from: Coordinate, to: Coordinate, _mode: TransportMode) -> Result<f64> {
        Ok(self.estimate_km(from, to))
    }
}

/// Known point-to-point road distances, matched in either direction within
/// `match_radius_m` of both endpoints. Unknown pairs go to `fallback`.
pub struct RouteTable<R> {
    entries: Vec<(Coordinate, Coordinate, f64)>,
    match_radius_m: f64,
    fallback: R,
}

impl<R: RoutingProvider> RouteTable<R> {
    pub fn new(fallback: R, match_radius_m: f64) -> Self {
        Self {
            entries: Vec::new(),
            match_radius_m,
            fallback,
        }
    }

    pub fn with_route(mut self, a: Coordinate, b: Coordinate, distance_km: f64) -> Self {
        self.entries.push((a, b, distance_km));
        self
    }

    fn lookup(&self, from: Coordinate, to: Coordinate) -> Option<f64> {
        let near = |x: Coordinate, y: Coordinate| distance_meters(x, y) <= self.match_radius_m;
        self.entries
            .iter()
            .find(|(a, b, _)| (near(*a, from) && near(*b, to)) || (near(*a, to) && near(*b, from)))
            .map(|(_, _, km)| *km)
    }
}

#[async_trait]
impl<R: RoutingProvider> RoutingProvider for RouteTable<R> {
    async fn distance_km(&self, from: Coordinate, to: Coordinate, mode: TransportMode) -> Result<f64> {
        match self.lookup(from, to) {
            Some(km) => Ok(km),
            None => self.fallback.distance_km(from, to, mode).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const A: Coordinate = Coordinate {
        latitude: 52.52,
        longitude: 13.405,
    };
    const B: Coordinate = Coordinate {
        latitude: 53.5511,
        longitude: 9.9937,
    };

    #[tokio::test]
    async fn test_great_circle_applies_road_factor() {
        let straight = distance_meters(A, B) / 1000.0;
        let km = GreatCircleRouting::default()
            .distance_km(A, B, TransportMode::Truck)
            .await
            .unwrap();
        assert!((km - straight * DEFAULT_ROAD_FACTOR).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_table_matches_both_directions() {
        let table = RouteTable::new(GreatCircleRouting::default(), 1_000.0).with_route(A, B, 289.0);
        assert_eq!(table.distance_km(A, B, TransportMode::Van).await.unwrap(), 289.0);
        assert_eq!(table.distance_km(B, A, TransportMode::Van).await.unwrap(), 289.0);
    }

    #[tokio::test]
    async fn test_table_falls_back_for_unknown_pairs() {
        let table = RouteTable::new(GreatCircleRouting::new(1.0), 1_000.0).with_route(A, B, 289.0);
        let c = Coordinate::new(48.1351, 11.5820);
        let km = table.distance_km(A, c, TransportMode::Van).await.unwrap();
        assert!((km - distance_meters(A, c) / 1000.0).abs() < 1e-9);
    }
}
