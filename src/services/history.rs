//! Completed-route history used to fit and calibrate the ensemble.

use anyhow::Result;
use async_trait::async_trait;
use std::fs::File;
use tokio::sync::RwLock;
use tracing::debug;

use crate::eta::HistoricalRoute;
use crate::geo::{Coordinate, distance_meters};
use crate::model::TransportMode;

#[async_trait]
pub trait HistoryProvider: Send + Sync {
    /// Completed routes comparable to a trip from `origin` to `destination`.
    async fn routes(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        mode: TransportMode,
    ) -> Result<Vec<HistoricalRoute>>;

    /// Adds a completed trip. Read-only sources ignore it.
    async fn record(&self, _route: HistoricalRoute) -> Result<()> {
        Ok(())
    }
}

/// Routes held in memory.
///
/// A route matches when it used the same mode and both of its endpoints lie
/// within `match_radius_m` of the requested ones. With no such route the
/// nearest origin/destination pair on record stands in, together with every
/// route sharing that pair.
pub struct InMemoryHistory {
    routes: RwLock<Vec<HistoricalRoute>>,
    match_radius_m: f64,
}

pub const DEFAULT_MATCH_RADIUS_M: f64 = 25_000.0;

impl Default for InMemoryHistory {
    fn default() -> Self {
        Self::new(Vec::new())
    }
}

impl InMemoryHistory {
    pub fn new(routes: Vec<HistoricalRoute>) -> Self {
        Self {
            routes: RwLock::new(routes),
            match_radius_m: DEFAULT_MATCH_RADIUS_M,
        }
    }

    pub fn with_match_radius(mut self, match_radius_m: f64) -> Self {
        self.match_radius_m = match_radius_m;
        self
    }

    /// Reads routes from a CSV file with a header row.
    pub fn load_csv(path: &str) -> Result<Self> {
        let file = File::open(path)?;
        let mut rdr = csv::Reader::from_reader(file);
        let mut routes = Vec::new();

        for result in rdr.deserialize() {
            let record: HistoricalRoute = result?;
            routes.push(record);
        }

        debug!(path, count = routes.len(), "Loaded route history");
        Ok(Self::new(routes))
    }

    pub async fn len(&self) -> usize {
        self.routes.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.routes.read().await.is_empty()
    }

    fn endpoint_gap(route: &HistoricalRoute, origin: Coordinate, destination: Coordinate) -> (f64, f64) {
        (
            distance_meters(route.origin(), origin),
            distance_meters(route.destination(), destination),
        )
    }
}

#[async_trait]
impl HistoryProvider for InMemoryHistory {
    async fn routes(
        &self,
        origin: Coordinate,
        destination: Coordinate,
        mode: TransportMode,
    ) -> Result<Vec<HistoricalRoute>> {
        let routes = self.routes.read().await;
        let same_mode: Vec<&HistoricalRoute> = routes.iter().filter(|r| r.mode == mode).collect();

        let within = |r: &HistoricalRoute, o: Coordinate, d: Coordinate| {
            let (go, gd) = Self::endpoint_gap(r, o, d);
            go <= self.match_radius_m && gd <= self.match_radius_m
        };

        let exact: Vec<HistoricalRoute> = same_mode
            .iter()
            .filter(|r| within(r, origin, destination))
            .map(|r| (*r).clone())
            .collect();
        if !exact.is_empty() {
            return Ok(exact);
        }

        let nearest = same_mode.iter().min_by(|a, b| {
            let (ao, ad) = Self::endpoint_gap(a, origin, destination);
            let (bo, bd) = Self::endpoint_gap(b, origin, destination);
            (ao + ad).total_cmp(&(bo + bd))
        });

        Ok(match nearest {
            Some(anchor) => {
                let (o, d) = (anchor.origin(), anchor.destination());
                same_mode
                    .iter()
                    .filter(|r| within(r, o, d))
                    .map(|r| (*r).clone())
                    .collect()
            }
            None => Vec::new(),
        })
    }

    async fn record(&self, route: HistoricalRoute) -> Result<()> {
        debug!(mode = %route.mode, duration_minutes = route.duration_minutes, "Recorded completed route");
        self.routes.write().await.push(route);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::env;
    use std::fs;

    fn route(origin: Coordinate, destination: Coordinate, mode: TransportMode) -> HistoricalRoute {
        HistoricalRoute {
            origin_latitude: origin.latitude,
            origin_longitude: origin.longitude,
            destination_latitude: destination.latitude,
            destination_longitude: destination.longitude,
            mode,
            distance_km: 100.0,
            duration_minutes: 120.0,
            departed_at: Utc::now(),
            weather_factor: 1.0,
            traffic_density: 0.5,
            predicted_minutes: None,
        }
    }

    const BERLIN: Coordinate = Coordinate {
        latitude: 52.52,
        longitude: 13.405,
    };
    const HAMBURG: Coordinate = Coordinate {
        latitude: 53.5511,
        longitude: 9.9937,
    };
    const MUNICH: Coordinate = Coordinate {
        latitude: 48.1351,
        longitude: 11.582,
    };
    const LEIPZIG: Coordinate = Coordinate {
        latitude: 51.3397,
        longitude: 12.3731,
    };

    #[tokio::test]
    async fn test_matches_same_pair_and_mode() {
        let history = InMemoryHistory::new(vec![
            route(BERLIN, HAMBURG, TransportMode::Truck),
            route(BERLIN, HAMBURG, TransportMode::Truck),
            route(BERLIN, HAMBURG, TransportMode::Van),
            route(BERLIN, MUNICH, TransportMode::Truck),
        ]);
        let found = history.routes(BERLIN, HAMBURG, TransportMode::Truck).await.unwrap();
        assert_eq!(found.len(), 2);
    }

    #[tokio::test]
    async fn test_falls_back_to_nearest_pair() {
        let history = InMemoryHistory::new(vec![
            route(BERLIN, MUNICH, TransportMode::Truck),
            route(BERLIN, MUNICH, TransportMode::Truck),
            route(HAMBURG, MUNICH, TransportMode::Truck),
        ]);
        // Berlin -> Leipzig has no history; Berlin -> Munich is the closest pair.
        let found = history.routes(BERLIN, LEIPZIG, TransportMode::Truck).await.unwrap();
        assert_eq!(found.len(), 2);
        assert!(found.iter().all(|r| r.origin() == BERLIN && r.destination() == MUNICH));
    }

    #[tokio::test]
    async fn test_other_modes_never_match() {
        let history = InMemoryHistory::new(vec![route(BERLIN, HAMBURG, TransportMode::Van)]);
        let found = history.routes(BERLIN, HAMBURG, TransportMode::Bicycle).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_recorded_routes_are_matched() {
        let history = InMemoryHistory::default().with_match_radius(1_000.0);
        history.record(route(BERLIN, HAMBURG, TransportMode::Truck)).await.unwrap();
        assert_eq!(history.len().await, 1);

        let found = history.routes(BERLIN, HAMBURG, TransportMode::Truck).await.unwrap();
        assert_eq!(found.len(), 1);
        // Outside the radius only the nearest-pair fallback applies.
        let near = Coordinate::new(52.55, 13.405);
        let found = history.routes(near, HAMBURG, TransportMode::Truck).await.unwrap();
        assert_eq!(found.len(), 1);
    }

    #[tokio::test]
    async fn test_load_csv() {
        let path = format!("{}/delivery_tracker_history_test.csv", env::temp_dir().display());
        fs::write(
            &path,
            "origin_latitude,origin_longitude,destination_latitude,destination_longitude,mode,distance_km,duration_minutes,departed_at,weather_factor,traffic_density,predicted_minutes\n\
             52.52,13.405,53.5511,9.9937,truck,289,410,2026-01-05T08:00:00Z,1.0,0.6,400\n\
             52.52,13.405,53.5511,9.9937,truck,289,395,2026-01-06T08:00:00Z,1.1,0.4,\n",
        )
        .unwrap();

        let history = InMemoryHistory::load_csv(&path).unwrap();
        assert_eq!(history.len().await, 2);
        let found = history.routes(BERLIN, HAMBURG, TransportMode::Truck).await.unwrap();
        assert_eq!(found[0].predicted_minutes, Some(400.0));
        assert_eq!(found[1].predicted_minutes, None);

        fs::remove_file(&path).unwrap();
    }
}
