//! The tracking service.
//!
//! Each delivery owns a session behind its own async mutex, so updates for
//! one delivery are serialized while different deliveries proceed in
//! parallel. The session map itself is a sharded `DashMap`; map guards are
//! never held across an `.await`.

use chrono::Utc;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{Instrument, debug, error, info, warn};

use crate::config::TrackerConfig;
use crate::error::{TrackingError, TrackingResult};
use crate::eta::filter::MotionFilter;
use crate::eta::{EtaPredictor, EtaPrediction, HistoricalRoute, PredictionKind, PredictionRequest};
use crate::geo::Coordinate;
use crate::geofence::{GeofenceEvent, GeofenceKind, GeofenceRegistry, GeofenceTransition};
use crate::issues::{IssueDetector, StationaryTracker};
use crate::model::{AlertEvent, Delivery, EnrichedSample, Issue, LocationUpdate, Severity};
use crate::pipeline::{DiscardReason, JourneyStats, admit, enrich, validate};
use crate::query::TrackingView;
use crate::services::{
    FixedConditions, GreatCircleRouting, InMemoryHistory, LogNotifier, Notifier,
};
use crate::status::{DeliveryStatus, StatusChange, StatusMachine, TransitionTrigger};
use crate::store::{MemoryStore, TrackingStore};

/// Mutable per-delivery state.
#[derive(Debug)]
pub(crate) struct DeliverySession {
    pub(crate) delivery: Delivery,
    pub(crate) status: StatusMachine,
    pub(crate) geofences: GeofenceRegistry,
    pub(crate) stationary: StationaryTracker,
    pub(crate) filter: MotionFilter,
    pub(crate) journey: JourneyStats,
    /// Newest prediction of any kind, shown live.
    pub(crate) latest_eta: Option<EtaPrediction>,
    /// Newest full-ensemble prediction; live projections inherit its quality.
    pub(crate) last_full: Option<EtaPrediction>,
    pub(crate) initial_eta: Option<EtaPrediction>,
    /// Bumped per live projection so a slower, older one cannot overwrite a
    /// newer one.
    live_generation: u64,
    pub(crate) arrival_candidate: bool,
}

impl DeliverySession {
    fn new(delivery: Delivery, geofence_radius_m: f64) -> Self {
        Self {
            status: StatusMachine::new(delivery.id.clone(), delivery.status),
            geofences: GeofenceRegistry::for_delivery(&delivery, geofence_radius_m),
            stationary: StationaryTracker::default(),
            filter: MotionFilter::new(),
            journey: JourneyStats::default(),
            latest_eta: None,
            last_full: None,
            initial_eta: None,
            live_generation: 0,
            arrival_candidate: false,
            delivery,
        }
    }

    /// Goods are not on board yet, so the remaining trip runs via pickup.
    fn before_pickup(&self) -> bool {
        matches!(
            self.status.current(),
            DeliveryStatus::Requested | DeliveryStatus::Assigned | DeliveryStatus::PickupPending
        )
    }

    fn request(&self, from: Coordinate, kind: PredictionKind) -> PredictionRequest {
        let via = self.before_pickup().then_some(self.delivery.pickup_location);
        PredictionRequest {
            delivery_id: self.delivery.id.clone(),
            mode: self.delivery.transport_mode,
            origin: from,
            destination: self.delivery.delivery_location,
            via,
            departure: Utc::now(),
            kind,
            motion: self.filter.snapshot(),
        }
    }

    /// The finished trip as a history record: first to last sample, against
    /// the initial prediction.
    fn completed_route(&self) -> Option<HistoricalRoute> {
        let initial = self.initial_eta.as_ref()?;
        let departed_at = self.journey.started_at()?;
        let minutes = self.journey.elapsed()?.num_milliseconds() as f64 / 60_000.0;
        if minutes <= 0.0 {
            return None;
        }
        Some(HistoricalRoute {
            origin_latitude: self.delivery.pickup_location.latitude,
            origin_longitude: self.delivery.pickup_location.longitude,
            destination_latitude: self.delivery.delivery_location.latitude,
            destination_longitude: self.delivery.delivery_location.longitude,
            mode: self.delivery.transport_mode,
            distance_km: initial.distance_km,
            duration_minutes: minutes,
            departed_at,
            weather_factor: 1.0,
            traffic_density: 0.5,
            predicted_minutes: Some(initial.duration_minutes),
        })
    }

    fn apply(&mut self, change: &StatusChange) {
        self.delivery.status = change.to;
        if change.to.is_terminal() {
            self.geofences.clear();
            self.filter.reset();
            self.arrival_candidate = false;
        }
    }
}

/// Everything one stored sample caused.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestReport {
    pub sample: EnrichedSample,
    pub issues: Vec<Issue>,
    pub geofence_events: Vec<GeofenceEvent>,
    pub status_changes: Vec<StatusChange>,
    pub eta: Option<EtaPrediction>,
}

#[derive(Debug, Clone)]
pub enum IngestOutcome {
    Stored(Box<IngestReport>),
    /// Accepted without storing anything.
    Discarded(DiscardReason),
}

impl IngestOutcome {
    pub fn report(&self) -> Option<&IngestReport> {
        match self {
            IngestOutcome::Stored(report) => Some(report),
            IngestOutcome::Discarded(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RefreshSummary {
    pub attempted: usize,
    pub refreshed: usize,
    pub skipped: usize,
}

pub struct Tracker {
    config: TrackerConfig,
    sessions: DashMap<String, Arc<Mutex<DeliverySession>>>,
    /// Lock-free copy of each session's status, written under the session
    /// lock.
    statuses: DashMap<String, DeliveryStatus>,
    store: Arc<dyn TrackingStore>,
    notifier: Arc<dyn Notifier>,
    predictor: EtaPredictor,
    detector: IssueDetector,
}

impl Tracker {
    pub fn new(
        config: TrackerConfig,
        store: Arc<dyn TrackingStore>,
        notifier: Arc<dyn Notifier>,
        predictor: EtaPredictor,
    ) -> Self {
        Self {
            detector: IssueDetector::new(&config),
            config,
            sessions: DashMap::new(),
            statuses: DashMap::new(),
            store,
            notifier,
            predictor,
        }
    }

    /// A tracker with in-memory storage, log notifications and offline
    /// providers.
    pub fn in_memory(config: TrackerConfig) -> Self {
        let predictor = EtaPredictor::new(
            Arc::new(GreatCircleRouting::default()),
            Arc::new(FixedConditions::default()),
            Arc::new(InMemoryHistory::default()),
            &config,
        );
        Self::new(
            config,
            Arc::new(MemoryStore::new()),
            Arc::new(LogNotifier),
            predictor,
        )
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn TrackingStore> {
        &self.store
    }

    pub fn delivery_ids(&self) -> Vec<String> {
        self.sessions.iter().map(|e| e.key().clone()).collect()
    }

    fn session(&self, delivery_id: &str) -> TrackingResult<Arc<Mutex<DeliverySession>>> {
        self.sessions
            .get(delivery_id)
            .map(|s| Arc::clone(s.value()))
            .ok_or_else(|| TrackingError::UnknownDelivery(delivery_id.to_string()))
    }

    /// Registers a delivery, creates its geofences and runs the initial
    /// ensemble prediction.
    #[tracing::instrument(skip(self, delivery), fields(delivery_id = %delivery.id))]
    pub async fn start_tracking(&self, delivery: Delivery) -> TrackingResult<EtaPrediction> {
        if delivery.id.trim().is_empty() {
            return Err(TrackingError::validation("id", "is required"));
        }
        if !delivery.pickup_location.is_valid() {
            return Err(TrackingError::validation("pickupLocation", "is not a valid coordinate"));
        }
        if !delivery.delivery_location.is_valid() {
            return Err(TrackingError::validation("deliveryLocation", "is not a valid coordinate"));
        }
        if delivery.status.is_terminal() {
            return Err(TrackingError::InactiveDelivery {
                delivery_id: delivery.id,
                status: delivery.status,
            });
        }
        if self.sessions.contains_key(&delivery.id) {
            return Err(TrackingError::AlreadyTracking(delivery.id));
        }

        let mut session = DeliverySession::new(delivery, self.config.geofence_radius_m);
        let mut req = session.request(session.delivery.pickup_location, PredictionKind::Initial);
        req.via = None;
        let prediction = self.predictor.predict(&req).await;
        session.latest_eta = Some(prediction.clone());
        session.last_full = Some(prediction.clone());
        session.initial_eta = Some(prediction.clone());
        let status = session.status.current();

        match self.sessions.entry(session.delivery.id.clone()) {
            Entry::Occupied(e) => return Err(TrackingError::AlreadyTracking(e.key().clone())),
            Entry::Vacant(e) => {
                self.statuses.insert(e.key().clone(), status);
                e.insert(Arc::new(Mutex::new(session)));
            }
        }

        self.record_prediction(&prediction).await;
        info!(
            duration_minutes = prediction.duration_minutes,
            quality = %prediction.quality,
            "Tracking started"
        );
        Ok(prediction)
    }

    /// Validates, throttles, enriches and stores one location update, then
    /// runs issue detection, geofencing and the live ETA projection.
    #[tracing::instrument(skip(self, update), fields(delivery_id = %update.delivery_id))]
    pub async fn ingest(&self, update: LocationUpdate) -> TrackingResult<IngestOutcome> {
        let sample = validate(&update)?;
        let session = self.session(&sample.delivery_id)?;
        let mut s = session.lock().await;

        let status = s.status.current();
        if status.is_terminal() {
            return Err(TrackingError::InactiveDelivery {
                delivery_id: sample.delivery_id,
                status,
            });
        }

        let last = self
            .store
            .last_sample(&sample.delivery_id)
            .await
            .map_err(storage_error)?;
        if let Some(reason) = admit(last.as_ref(), &sample, &self.config)? {
            debug!(?reason, timestamp = %sample.timestamp, "Discarded location update");
            return Ok(IngestOutcome::Discarded(reason));
        }

        let enriched = enrich(last.as_ref(), sample);
        self.store
            .append_sample(&enriched)
            .await
            .map_err(storage_error)?;

        // Nothing below may fail the update: the sample is stored.
        s.journey.record(&enriched, self.config.stationary_speed_kmh);
        s.filter.observe(
            enriched.timestamp(),
            enriched.distance_m.unwrap_or(0.0) / 1000.0,
            enriched.effective_speed(),
            enriched.sample.accuracy,
        );

        let issues = self.detector.inspect(&enriched, &mut s.stationary);
        for issue in &issues {
            self.handle_issue(issue).await;
        }

        let geofence_events = s.geofences.evaluate(enriched.location(), enriched.timestamp());
        let mut status_changes = Vec::new();
        for event in &geofence_events {
            if let Some(change) = self.handle_geofence(&mut s, event).await {
                status_changes.push(change);
            }
        }

        let status = s.status.current();
        if !status_changes.is_empty() {
            self.statuses.insert(s.delivery.id.clone(), status);
        }

        let live_request = status.is_active().then(|| {
            let mut req = s.request(enriched.location(), PredictionKind::Live);
            req.departure = enriched.timestamp();
            s.live_generation += 1;
            (req, s.live_generation, s.last_full.clone())
        });
        // The projection may wait on the routing provider; other updates and
        // transitions for this delivery must not.
        drop(s);

        let eta = match live_request {
            Some((req, generation, last_full)) => {
                let live = self.predictor.predict_remaining(&req, last_full.as_ref()).await;
                let mut s = session.lock().await;
                if s.live_generation == generation && s.status.current().is_active() {
                    s.latest_eta = Some(live.clone());
                } else {
                    debug!("Live projection superseded");
                }
                drop(s);
                self.record_prediction(&live).await;
                Some(live)
            }
            None => None,
        };

        debug!(
            sequence = enriched.sequence,
            issues = issues.len(),
            geofence_events = geofence_events.len(),
            "Location update stored"
        );

        Ok(IngestOutcome::Stored(Box::new(IngestReport {
            sample: enriched,
            issues,
            geofence_events,
            status_changes,
            eta,
        })))
    }

    async fn handle_issue(&self, issue: &Issue) {
        if let Err(e) = self.store.record_issue(issue).await {
            warn!(issue = %issue.issue_type, error = %e, "Failed to persist issue");
        }
        if issue.severity == Severity::High {
            if let Err(e) = self.notifier.alert(&AlertEvent::from(issue)).await {
                error!(issue = %issue.issue_type, error = %e, "Alert dispatch failed");
            }
        }
    }

    async fn handle_geofence(
        &self,
        s: &mut DeliverySession,
        event: &GeofenceEvent,
    ) -> Option<StatusChange> {
        if event.transition == GeofenceTransition::Enter {
            if let Err(e) = self.notifier.geofence(event).await {
                error!(geofence = %event.geofence, error = %e, "Geofence notification failed");
            }
        }

        let status = s.status.current();
        match (event.geofence, event.transition) {
            (GeofenceKind::Pickup, GeofenceTransition::Enter) if status == DeliveryStatus::Assigned => {
                let trigger = TransitionTrigger::Geofence("entered pickup zone".into());
                match s.status.transition(DeliveryStatus::PickupPending, trigger, event.timestamp) {
                    Ok(change) => {
                        s.apply(&change);
                        Some(change)
                    }
                    Err(_) => None,
                }
            }
            (GeofenceKind::Delivery, GeofenceTransition::Enter)
                if matches!(status, DeliveryStatus::InTransit | DeliveryStatus::Delayed) =>
            {
                info!(delivery_id = %event.delivery_id, "Arrival candidate");
                s.arrival_candidate = true;
                None
            }
            (GeofenceKind::Delivery, GeofenceTransition::Exit) => {
                s.arrival_candidate = false;
                None
            }
            _ => {
                debug!(
                    geofence = %event.geofence,
                    transition = ?event.transition,
                    status = %status,
                    "Geofence event causes no transition"
                );
                None
            }
        }
    }

    /// Applies an explicit status change. Terminal states drop the
    /// delivery's geofences and filter state.
    #[tracing::instrument(skip(self, trigger))]
    pub async fn transition(
        &self,
        delivery_id: &str,
        next: DeliveryStatus,
        trigger: TransitionTrigger,
    ) -> TrackingResult<StatusChange> {
        let session = self.session(delivery_id)?;
        let mut s = session.lock().await;
        let change = s.status.transition(next, trigger, Utc::now())?;
        s.apply(&change);
        self.statuses.insert(delivery_id.to_string(), change.to);

        let completed = (change.to == DeliveryStatus::Delivered)
            .then(|| s.completed_route())
            .flatten();
        drop(s);

        if let Some(route) = completed {
            info!(
                duration_minutes = route.duration_minutes,
                predicted_minutes = ?route.predicted_minutes,
                "Recording completed trip"
            );
            self.predictor.record_trip(route).await;
        }
        Ok(change)
    }

    /// Ids of deliveries whose status is between `assigned` and `delayed`.
    /// Reads the status mirror; no session is locked.
    pub fn active_deliveries(&self) -> Vec<String> {
        self.statuses
            .iter()
            .filter(|e| e.value().is_active())
            .map(|e| e.key().clone())
            .collect()
    }

    /// Re-runs the full ensemble for every active delivery, at most
    /// `max_concurrent_refreshes` at a time.
    pub async fn refresh_predictions(self: &Arc<Self>) -> RefreshSummary {
        let ids = self.active_deliveries();
        let semaphore = Arc::new(Semaphore::new(self.config.max_concurrent_refreshes.max(1)));

        let mut tasks = vec![];
        for id in ids {
            let sem = semaphore.clone();
            let tracker = Arc::clone(self);
            let span = tracing::info_span!("refresh_delivery", delivery_id = %id);

            let task = tokio::spawn(
                async move {
                    let Ok(_permit) = sem.acquire().await else {
                        return false;
                    };
                    match tracker.refresh_one(&id).await {
                        Ok(refreshed) => refreshed,
                        Err(e) => {
                            warn!(error = %e, "Refresh failed");
                            false
                        }
                    }
                }
                .instrument(span),
            );
            tasks.push(task);
        }

        let mut summary = RefreshSummary {
            attempted: tasks.len(),
            ..RefreshSummary::default()
        };
        for task in tasks {
            match task.await {
                Ok(true) => summary.refreshed += 1,
                Ok(false) => summary.skipped += 1,
                Err(e) => {
                    error!(error = %e, "Refresh task panicked");
                    summary.skipped += 1;
                }
            }
        }

        info!(
            attempted = summary.attempted,
            refreshed = summary.refreshed,
            skipped = summary.skipped,
            "Refresh round finished"
        );
        summary
    }

    /// Full re-prediction for one delivery. The ensemble runs without the
    /// session lock; the result is dropped if the delivery left the active
    /// states in the meantime.
    pub async fn refresh_one(&self, delivery_id: &str) -> TrackingResult<bool> {
        let session = self.session(delivery_id)?;

        let req = {
            let s = session.lock().await;
            if !s.status.current().is_active() {
                return Ok(false);
            }
            let from = match self.store.last_sample(delivery_id).await {
                Ok(Some(last)) => last.location(),
                Ok(None) => s.delivery.pickup_location,
                Err(e) => {
                    warn!(error = %e, "Last sample unavailable, refreshing from pickup");
                    s.delivery.pickup_location
                }
            };
            s.request(from, PredictionKind::Refresh)
        };

        let prediction = self.predictor.predict(&req).await;

        let mut s = session.lock().await;
        let status = s.status.current();
        if !status.is_active() {
            debug!(status = %status, "Discarding refresh for inactive delivery");
            return Ok(false);
        }
        s.latest_eta = Some(prediction.clone());
        s.last_full = Some(prediction.clone());
        drop(s);

        self.record_prediction(&prediction).await;
        Ok(true)
    }

    /// Assembles the read view for one delivery.
    pub async fn view(&self, delivery_id: &str) -> TrackingResult<TrackingView> {
        let session = self.session(delivery_id)?;
        let s = session.lock().await;

        let recent = self
            .store
            .recent_samples(delivery_id, self.config.recent_history_limit)
            .await
            .map_err(storage_error)?;
        let issues = self.store.issues(delivery_id).await.map_err(storage_error)?;

        Ok(TrackingView::build(&s, recent, issues, &self.config))
    }

    async fn record_prediction(&self, prediction: &EtaPrediction) {
        if let Err(e) = self.store.record_prediction(prediction).await {
            warn!(
                delivery_id = %prediction.delivery_id,
                error = %e,
                "Failed to persist prediction"
            );
        }
    }
}

fn storage_error(e: anyhow::Error) -> TrackingError {
    error!(error = %e, "Tracking store unavailable");
    TrackingError::StorageUnavailable(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::TransportMode;
    use std::time::Duration;

    fn delivery(id: &str, status: DeliveryStatus) -> Delivery {
        Delivery {
            id: id.to_string(),
            status,
            pickup_address: "Alexanderplatz 1, Berlin".into(),
            pickup_location: Coordinate::new(52.52, 13.405),
            delivery_address: "Am Neuen Markt 9, Potsdam".into(),
            delivery_location: Coordinate::new(52.40, 13.05),
            transport_mode: TransportMode::Van,
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_enumeration_skips_finished_sessions_without_locking() {
        let tracker = Arc::new(Tracker::in_memory(TrackerConfig::default()));
        tracker.start_tracking(delivery("D1", DeliveryStatus::InTransit)).await.unwrap();
        tracker.start_tracking(delivery("D2", DeliveryStatus::InTransit)).await.unwrap();
        tracker
            .transition("D2", DeliveryStatus::Cancelled, TransitionTrigger::Timeout)
            .await
            .unwrap();

        // Hold the finished delivery's lock for the whole round.
        let finished = tracker.session("D2").unwrap();
        let _guard = finished.lock().await;

        assert_eq!(tracker.active_deliveries(), vec!["D1".to_string()]);
        let summary = tokio::time::timeout(Duration::from_secs(5), tracker.refresh_predictions())
            .await
            .unwrap();
        assert_eq!(summary.attempted, 1);
        assert_eq!(summary.refreshed, 1);
    }

    #[tokio::test]
    async fn test_status_mirror_follows_geofence_transitions() {
        let tracker = Tracker::in_memory(TrackerConfig::default());
        tracker.start_tracking(delivery("D1", DeliveryStatus::Requested)).await.unwrap();
        assert!(tracker.active_deliveries().is_empty());

        tracker
            .transition("D1", DeliveryStatus::Assigned, TransitionTrigger::Operator("ops".into()))
            .await
            .unwrap();
        assert_eq!(tracker.active_deliveries().len(), 1);

        let at_pickup = LocationUpdate {
            delivery_id: "D1".into(),
            latitude: Some(52.52),
            longitude: Some(13.405),
            timestamp: Some(Utc::now()),
            ..Default::default()
        };
        tracker.ingest(at_pickup).await.unwrap();
        assert_eq!(
            tracker.statuses.get("D1").map(|s| *s.value()),
            Some(DeliveryStatus::PickupPending)
        );
    }

    #[test]
    fn test_completed_route_needs_samples() {
        let session = DeliverySession::new(delivery("D1", DeliveryStatus::InTransit), 200.0);
        assert!(session.completed_route().is_none());
    }
}
