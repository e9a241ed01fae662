//! Gathers route distance, conditions and history from the external
//! providers and runs the estimators.
//!
//! Every provider call is bounded by the configured timeout. On timeout or
//! error the offline default is used instead: great-circle routing, neutral
//! conditions, no history.

use anyhow::Result;
use chrono::{DateTime, Utc};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::TrackerConfig;
use crate::eta::ensemble::{self, combine};
use crate::eta::filter::{FilterEstimator, MotionSnapshot};
use crate::eta::stats::{historical_accuracy, speed_variation};
use crate::eta::traffic::traffic_multiplier;
use crate::eta::types::{
    EtaPrediction, HistoricalRoute, ModelContribution, ModelKind, PredictionContext, PredictionKind, QualityLabel,
    arrival_after,
};
use crate::eta::{Estimator, default_estimators};
use crate::geo::Coordinate;
use crate::model::TransportMode;
use crate::services::{
    Conditions, ConditionsProvider, GreatCircleRouting, HistoryProvider, RoutingProvider,
};

/// Inputs for one prediction.
#[derive(Debug, Clone)]
pub struct PredictionRequest {
    pub delivery_id: String,
    pub mode: TransportMode,
    /// Where the trip (or the remaining part of it) starts.
    pub origin: Coordinate,
    pub destination: Coordinate,
    /// Intermediate stop, e.g. the pickup point before the goods are loaded.
    pub via: Option<Coordinate>,
    pub departure: DateTime<Utc>,
    pub kind: PredictionKind,
    pub motion: Option<MotionSnapshot>,
}

/// Longer than any road trip between two points on Earth.
pub const MAX_ROUTE_KM: f64 = 40_075.0;

pub struct EtaPredictor {
    routing: Arc<dyn RoutingProvider>,
    conditions: Arc<dyn ConditionsProvider>,
    history: Arc<dyn HistoryProvider>,
    estimators: Vec<Box<dyn Estimator>>,
    offline_routing: GreatCircleRouting,
    timeout: Duration,
    default_accuracy: f64,
}

impl EtaPredictor {
    pub fn new(
        routing: Arc<dyn RoutingProvider>,
        conditions: Arc<dyn ConditionsProvider>,
        history: Arc<dyn HistoryProvider>,
        config: &TrackerConfig,
    ) -> Self {
        Self {
            routing,
            conditions,
            history,
            estimators: default_estimators(),
            offline_routing: GreatCircleRouting::default(),
            timeout: config.provider_timeout(),
            default_accuracy: config.default_historical_accuracy,
        }
    }

    /// Runs the full ensemble.
    #[tracing::instrument(skip(self, req), fields(delivery_id = %req.delivery_id, kind = %req.kind))]
    pub async fn predict(&self, req: &PredictionRequest) -> EtaPrediction {
        let distance_km = self.route_distance(req).await;

        let conditions = self
            .bounded(
                "conditions",
                self.conditions.conditions(req.origin, req.departure),
                Conditions::default,
            )
            .await
            .sanitized();
        let history = self
            .bounded(
                "history",
                self.history.routes(req.origin, req.destination, req.mode),
                Vec::new,
            )
            .await;

        let ctx = PredictionContext {
            mode: req.mode,
            distance_km,
            departure: req.departure,
            time_factor: traffic_multiplier(req.departure),
            weather_factor: conditions.weather_factor,
            traffic_density: conditions.traffic_density,
            historical_accuracy: historical_accuracy(&history),
            route_speed_variation: speed_variation(&history),
            history,
            motion: req.motion,
        };

        let outcomes = self
            .estimators
            .iter()
            .map(|e| (e.kind(), e.estimate(&ctx)))
            .collect();
        let combined = combine(&ctx, outcomes, self.default_accuracy);

        if let Some(err) = &combined.error {
            warn!(error = %err, "Ensemble fell back to fixed estimate");
        }
        debug!(
            distance_km = combined.distance_km,
            duration_minutes = combined.duration_minutes,
            quality = %combined.quality,
            routes = ctx.history.len(),
            "Ensemble prediction"
        );

        EtaPrediction {
            id: Uuid::new_v4(),
            delivery_id: req.delivery_id.clone(),
            kind: req.kind,
            created_at: Utc::now(),
            departure: req.departure,
            distance_km: combined.distance_km,
            duration_minutes: combined.duration_minutes,
            arrival: arrival_after(req.departure, combined.duration_minutes)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            confidence_interval: combined.interval,
            models: combined.contributions,
            quality: combined.quality,
            historical_routes: ctx.history.len(),
            historical_accuracy: combined.historical_accuracy,
            route_speed_variation: ctx.route_speed_variation,
            error: combined.error,
        }
    }

    /// Projects the remaining time from the filter state alone.
    ///
    /// Quality, accuracy and route variation carry over from `previous`, the
    /// last full-ensemble prediction, when there is one.
    #[tracing::instrument(skip(self, req, previous), fields(delivery_id = %req.delivery_id))]
    pub async fn predict_remaining(
        &self,
        req: &PredictionRequest,
        previous: Option<&EtaPrediction>,
    ) -> EtaPrediction {
        let distance_km = self.route_distance(req).await;
        let accuracy = previous.map_or(self.default_accuracy, |p| p.historical_accuracy);
        let variation = previous.map_or(0.0, |p| p.route_speed_variation);

        let ctx = PredictionContext {
            mode: req.mode,
            distance_km,
            departure: req.departure,
            time_factor: traffic_multiplier(req.departure),
            weather_factor: 1.0,
            traffic_density: 0.5,
            history: Vec::new(),
            historical_accuracy: Some(accuracy),
            route_speed_variation: variation,
            motion: req.motion,
        };

        let (speed, speed_sd, _) = FilterEstimator::projection_speed(&ctx);
        let (duration, contribution, error) = match FilterEstimator.estimate(&ctx) {
            Ok(est) => (
                est.duration_minutes,
                ModelContribution {
                    model: ModelKind::Filter,
                    duration_minutes: Some(est.duration_minutes),
                    average_speed_kmh: Some(est.average_speed_kmh),
                    confidence: est.confidence,
                    weight: 1.0,
                    error: None,
                },
                None,
            ),
            Err(e) => {
                warn!(error = %e, "Filter projection failed, using mode speed");
                let minutes = distance_km.max(0.0) / req.mode.average_speed_kmh() * 60.0;
                (
                    minutes,
                    ModelContribution {
                        model: ModelKind::Filter,
                        duration_minutes: None,
                        average_speed_kmh: None,
                        confidence: 0.0,
                        weight: 0.0,
                        error: Some(e.to_string()),
                    },
                    Some(e.to_string()),
                )
            }
        };

        let sd_minutes = duration * speed_sd / speed;
        let quality = match (previous, &error) {
            (_, Some(_)) | (None, _) => QualityLabel::Low,
            (Some(p), None) => p.quality,
        };

        EtaPrediction {
            id: Uuid::new_v4(),
            delivery_id: req.delivery_id.clone(),
            kind: req.kind,
            created_at: Utc::now(),
            departure: req.departure,
            distance_km,
            duration_minutes: duration,
            arrival: arrival_after(req.departure, duration).unwrap_or(DateTime::<Utc>::MAX_UTC),
            confidence_interval: ensemble::interval(duration, sd_minutes / accuracy.max(0.05)),
            models: vec![contribution],
            quality,
            historical_routes: previous.map_or(0, |p| p.historical_routes),
            historical_accuracy: accuracy,
            route_speed_variation: variation,
            error,
        }
    }

    /// Hands a completed trip to the history provider.
    pub async fn record_trip(&self, route: HistoricalRoute) {
        self.bounded("history", self.history.record(route), || ()).await;
    }

    /// Road distance along origin -> via -> destination.
    async fn route_distance(&self, req: &PredictionRequest) -> f64 {
        let legs: Vec<(Coordinate, Coordinate)> = match req.via {
            Some(via) => vec![(req.origin, via), (via, req.destination)],
            None => vec![(req.origin, req.destination)],
        };

        let mut total = 0.0;
        for (from, to) in legs {
            let offline = self.offline_routing.estimate_km(from, to);
            let km = self
                .bounded("routing", self.routing.distance_km(from, to, req.mode), || offline)
                .await;
            total += if km.is_finite() && (0.0..=MAX_ROUTE_KM).contains(&km) {
                km
            } else {
                warn!(km, "Implausible routing distance, using great-circle estimate");
                offline
            };
        }
        total
    }

    async fn bounded<T>(
        &self,
        provider: &'static str,
        call: impl Future<Output = Result<T>>,
        offline: impl FnOnce() -> T,
    ) -> T {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                warn!(provider, error = %e, "Provider failed, using offline default");
                offline()
            }
            Err(_) => {
                warn!(
                    provider,
                    timeout_ms = self.timeout.as_millis() as u64,
                    "Provider timed out, using offline default"
                );
                offline()
            }
        }
    }
}
