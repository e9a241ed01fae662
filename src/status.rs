//! Delivery lifecycle state machine.
//!
//! ```text
//! requested -> assigned -> pickup_pending -> picked_up -> in_transit -> delivered
//!                               |   ^                      |   ^
//!                               v   |                      v   |
//!                             failed <------ delayed ------+---+
//! ```
//!
//! `cancelled` is reachable from every non-terminal state. `delivered` and
//! `cancelled` are terminal.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{TrackingError, TrackingResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Requested,
    Assigned,
    PickupPending,
    PickedUp,
    InTransit,
    Delayed,
    Delivered,
    Failed,
    Cancelled,
}

impl DeliveryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            DeliveryStatus::Requested => "requested",
            DeliveryStatus::Assigned => "assigned",
            DeliveryStatus::PickupPending => "pickup_pending",
            DeliveryStatus::PickedUp => "picked_up",
            DeliveryStatus::InTransit => "in_transit",
            DeliveryStatus::Delayed => "delayed",
            DeliveryStatus::Delivered => "delivered",
            DeliveryStatus::Failed => "failed",
            DeliveryStatus::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, DeliveryStatus::Delivered | DeliveryStatus::Cancelled)
    }

    /// States in which the vehicle is expected to be reporting and the ETA
    /// is kept fresh.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            DeliveryStatus::Assigned
                | DeliveryStatus::PickupPending
                | DeliveryStatus::PickedUp
                | DeliveryStatus::InTransit
                | DeliveryStatus::Delayed
        )
    }

    pub fn can_transition_to(self, next: DeliveryStatus) -> bool {
        use DeliveryStatus::*;

        if self.is_terminal() {
            return false;
        }
        if next == Cancelled {
            return true;
        }
        matches!(
            (self, next),
            (Requested, Assigned)
                | (Assigned, PickupPending)
                | (PickupPending, PickedUp)
                | (PickupPending, Delayed)
                | (PickupPending, Failed)
                | (PickedUp, InTransit)
                | (InTransit, Delivered)
                | (InTransit, Delayed)
                | (InTransit, Failed)
                | (Delayed, InTransit)
                | (Delayed, Delivered)
                | (Delayed, Failed)
                | (Failed, PickupPending)
        )
    }
}

impl std::fmt::Display for DeliveryStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What caused a transition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum TransitionTrigger {
    Geofence(String),
    Operator(String),
    Timeout,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusChange {
    pub from: DeliveryStatus,
    pub to: DeliveryStatus,
    pub trigger: TransitionTrigger,
    pub at: DateTime<Utc>,
}

/// The authoritative status of one delivery plus its transition history.
#[derive(Debug, Clone)]
pub struct StatusMachine {
    delivery_id: String,
    current: DeliveryStatus,
    history: Vec<StatusChange>,
}

impl StatusMachine {
    pub fn new(delivery_id: impl Into<String>, initial: DeliveryStatus) -> Self {
        Self {
            delivery_id: delivery_id.into(),
            current: initial,
            history: Vec::new(),
        }
    }

    pub fn current(&self) -> DeliveryStatus {
        self.current
    }

    pub fn history(&self) -> &[StatusChange] {
        &self.history
    }

    /// Applies `next` if the edge exists. Rejected edges leave the status
    /// untouched and are logged as inconsistencies.
    pub fn transition(
        &mut self,
        next: DeliveryStatus,
        trigger: TransitionTrigger,
        at: DateTime<Utc>,
    ) -> TrackingResult<StatusChange> {
        let from = self.current;
        if !from.can_transition_to(next) {
            warn!(
                delivery_id = %self.delivery_id,
                from = %from,
                to = %next,
                trigger = ?trigger,
                "Rejected inconsistent status transition"
            );
            return Err(TrackingError::IllegalTransition { from, to: next });
        }

        let change = StatusChange {
            from,
            to: next,
            trigger,
            at,
        };
        self.current = next;
        self.history.push(change.clone());

        info!(
            delivery_id = %self.delivery_id,
            from = %from,
            to = %next,
            "Delivery status changed"
        );
        Ok(change)
    }
}
