//! Data types shared by the tracking pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::geo::Coordinate;
use crate::status::DeliveryStatus;

/// Vehicle class carrying a delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportMode {
    Truck,
    Van,
    Pickup,
    Motorbike,
    Bicycle,
}

impl TransportMode {
    pub const ALL: [TransportMode; 5] = [
        TransportMode::Truck,
        TransportMode::Van,
        TransportMode::Pickup,
        TransportMode::Motorbike,
        TransportMode::Bicycle,
    ];

    /// Typical cruising speed in km/h.
    pub fn average_speed_kmh(self) -> f64 {
        match self {
            TransportMode::Truck => 35.0,
            TransportMode::Van => 40.0,
            TransportMode::Pickup => 45.0,
            TransportMode::Motorbike => 50.0,
            TransportMode::Bicycle => 15.0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TransportMode::Truck => "truck",
            TransportMode::Van => "van",
            TransportMode::Pickup => "pickup",
            TransportMode::Motorbike => "motorbike",
            TransportMode::Bicycle => "bicycle",
        }
    }
}

impl std::fmt::Display for TransportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for TransportMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TransportMode::ALL
            .into_iter()
            .find(|m| m.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown transport mode '{s}'"))
    }
}

/// A transport job as handed over by the order subsystem, with addresses
/// already resolved to coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Delivery {
    pub id: String,
    #[serde(default = "default_status")]
    pub status: DeliveryStatus,
    pub pickup_address: String,
    pub pickup_location: Coordinate,
    pub delivery_address: String,
    pub delivery_location: Coordinate,
    pub transport_mode: TransportMode,
    pub created_at: DateTime<Utc>,
}

fn default_status() -> DeliveryStatus {
    DeliveryStatus::Requested
}

/// Inbound location payload from the mobile client. Required fields are
/// optional here so that a missing field is a validation error rather than
/// a decode failure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationUpdate {
    pub delivery_id: String,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub altitude: Option<f64>,
    pub accuracy: Option<f64>,
    pub speed: Option<f64>,
    pub battery_level: Option<f64>,
    pub signal_strength: Option<f64>,
    pub timestamp: Option<DateTime<Utc>>,
}

/// A validated GPS report. Immutable once stored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LocationSample {
    pub delivery_id: String,
    pub location: Coordinate,
    pub altitude: Option<f64>,
    /// Horizontal accuracy in meters.
    pub accuracy: Option<f64>,
    /// Speed reported by the device, km/h.
    pub speed: Option<f64>,
    pub battery_level: Option<f64>,
    pub signal_strength: Option<f64>,
    pub timestamp: DateTime<Utc>,
}

/// A stored sample plus the quantities derived from its predecessor.
///
/// The first sample of a delivery has every derived field set to `None`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnrichedSample {
    pub sequence: u64,
    pub sample: LocationSample,
    pub computed_speed_kmh: Option<f64>,
    pub bearing: Option<f64>,
    /// km/h per hour.
    pub acceleration: Option<f64>,
    pub distance_m: Option<f64>,
    pub elapsed_secs: Option<f64>,
}

impl EnrichedSample {
    /// Reported device speed when present, otherwise the derived speed.
    pub fn effective_speed(&self) -> Option<f64> {
        self.sample.speed.or(self.computed_speed_kmh)
    }

    pub fn location(&self) -> Coordinate {
        self.sample.location
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.sample.timestamp
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    ExcessiveSpeed,
    ProlongedStop,
    PoorGpsAccuracy,
    LowBattery,
}

impl IssueType {
    pub fn as_str(self) -> &'static str {
        match self {
            IssueType::ExcessiveSpeed => "excessive_speed",
            IssueType::ProlongedStop => "prolonged_stop",
            IssueType::PoorGpsAccuracy => "poor_gps_accuracy",
            IssueType::LowBattery => "low_battery",
        }
    }
}

impl std::fmt::Display for IssueType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
        })
    }
}

/// An anomaly detected on a specific sample.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Issue {
    pub id: Uuid,
    pub delivery_id: String,
    pub issue_type: IssueType,
    pub severity: Severity,
    pub description: String,
    pub timestamp: DateTime<Utc>,
    pub sample_sequence: u64,
}

/// Event handed to the notification collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    pub delivery_id: String,
    pub issue_type: IssueType,
    pub severity: Severity,
    pub description: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&Issue> for AlertEvent {
    fn from(issue: &Issue) -> Self {
        AlertEvent {
            delivery_id: issue.delivery_id.clone(),
            issue_type: issue.issue_type,
            severity: issue.severity,
            description: issue.description.clone(),
            timestamp: issue.timestamp,
        }
    }
}
