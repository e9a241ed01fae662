//! Error types for the tracking core.

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::status::DeliveryStatus;

/// Result type for tracking operations
pub type TrackingResult<T> = Result<T, TrackingError>;

/// Errors surfaced synchronously to callers of the tracker.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TrackingError {
    #[error("invalid location update: {field} {reason}")]
    Validation { field: &'static str, reason: String },

    #[error("sample at {timestamp} for delivery {delivery_id} is older than last stored sample at {last}")]
    OutOfOrder {
        delivery_id: String,
        timestamp: DateTime<Utc>,
        last: DateTime<Utc>,
    },

    #[error("illegal status transition {from} -> {to}")]
    IllegalTransition {
        from: DeliveryStatus,
        to: DeliveryStatus,
    },

    #[error("unknown delivery: {0}")]
    UnknownDelivery(String),

    #[error("delivery {0} is already being tracked")]
    AlreadyTracking(String),

    #[error("delivery {delivery_id} is {status} and accepts no further updates")]
    InactiveDelivery {
        delivery_id: String,
        status: DeliveryStatus,
    },

    #[error("storage unavailable: {0}")]
    StorageUnavailable(String),
}

impl TrackingError {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        TrackingError::Validation {
            field,
            reason: reason.into(),
        }
    }

    /// Only storage outages are worth retrying; everything else is a
    /// property of the request itself.
    pub fn is_retryable(&self) -> bool {
        matches!(self, TrackingError::StorageUnavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_storage_errors_are_retryable() {
        assert!(TrackingError::StorageUnavailable("down".into()).is_retryable());
        assert!(!TrackingError::UnknownDelivery("d1".into()).is_retryable());
        assert!(
            !TrackingError::IllegalTransition {
                from: DeliveryStatus::Requested,
                to: DeliveryStatus::Delivered,
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_validation_message_names_field() {
        let err = TrackingError::validation("latitude", "must be within [-90, 90]");
        assert_eq!(
            err.to_string(),
            "invalid location update: latitude must be within [-90, 90]"
        );
    }
}
