//! Read view of one delivery for UIs and notification consumers.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::TrackerConfig;
use crate::eta::{ConfidenceInterval, EtaPrediction, PredictionKind, QualityLabel};
use crate::geo::Coordinate;
use crate::geofence::Geofence;
use crate::model::{EnrichedSample, Issue};
use crate::pipeline::JourneyStats;
use crate::status::{DeliveryStatus, StatusChange};
use crate::tracker::DeliverySession;

/// How trustworthy recent positions are, from their mean reported accuracy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingQuality {
    Good,
    Fair,
    Poor,
    Unknown,
}

impl TrackingQuality {
    pub fn from_samples(samples: &[EnrichedSample]) -> Self {
        let accuracies: Vec<f64> = samples.iter().filter_map(|s| s.sample.accuracy).collect();
        if accuracies.is_empty() {
            return TrackingQuality::Unknown;
        }
        let mean = accuracies.iter().sum::<f64>() / accuracies.len() as f64;
        match mean {
            m if m <= 20.0 => TrackingQuality::Good,
            m if m <= 50.0 => TrackingQuality::Fair,
            _ => TrackingQuality::Poor,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LatestEta {
    pub duration_minutes: f64,
    pub arrival_timestamp: DateTime<Utc>,
    pub confidence_interval: ConfidenceInterval,
    pub quality_label: QualityLabel,
    pub kind: PredictionKind,
    pub created_at: DateTime<Utc>,
}

impl From<&EtaPrediction> for LatestEta {
    fn from(p: &EtaPrediction) -> Self {
        Self {
            duration_minutes: p.duration_minutes,
            arrival_timestamp: p.arrival,
            confidence_interval: p.confidence_interval,
            quality_label: p.quality,
            kind: p.kind,
            created_at: p.created_at,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecentLocation {
    pub location: Coordinate,
    pub speed: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TrackingView {
    pub delivery_id: String,
    pub current_status: DeliveryStatus,
    pub current_location: Option<Coordinate>,
    pub current_speed: Option<f64>,
    pub bearing: Option<f64>,
    pub journey_statistics: JourneyStats,
    pub geofence_status: Vec<Geofence>,
    #[serde(rename = "latestETA")]
    pub latest_eta: Option<LatestEta>,
    pub active_alerts: Vec<Issue>,
    pub tracking_quality: TrackingQuality,
    pub recent_locations: Vec<RecentLocation>,
    pub status_history: Vec<StatusChange>,
    pub arrival_candidate: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl TrackingView {
    /// `recent` is oldest first. Alerts are the issues raised within
    /// `alert_window_minutes` of the newest sample.
    pub(crate) fn build(
        session: &DeliverySession,
        recent: Vec<EnrichedSample>,
        issues: Vec<Issue>,
        config: &TrackerConfig,
    ) -> Self {
        let latest = recent.last();
        let newest = latest.map(|s| s.timestamp()).unwrap_or_else(Utc::now);
        let cutoff = newest
            .checked_sub_signed(config.alert_window())
            .unwrap_or(DateTime::<Utc>::MIN_UTC);

        let active_alerts = issues
            .into_iter()
            .filter(|i| i.timestamp >= cutoff)
            .collect();

        TrackingView {
            delivery_id: session.delivery.id.clone(),
            current_status: session.status.current(),
            current_location: latest.map(|s| s.location()),
            current_speed: latest.and_then(|s| s.effective_speed()),
            bearing: latest.and_then(|s| s.bearing),
            journey_statistics: session.journey.clone(),
            geofence_status: session.geofences.fences().to_vec(),
            latest_eta: session.latest_eta.as_ref().map(LatestEta::from),
            active_alerts,
            tracking_quality: TrackingQuality::from_samples(&recent),
            recent_locations: recent
                .iter()
                .map(|s| RecentLocation {
                    location: s.location(),
                    speed: s.effective_speed(),
                    timestamp: s.timestamp(),
                })
                .collect(),
            status_history: session.status.history().to_vec(),
            arrival_candidate: session.arrival_candidate,
            updated_at: latest.map(|s| s.timestamp()),
        }
    }
}
