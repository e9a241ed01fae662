pub mod config;
pub mod error;
pub mod eta;
pub mod fetch;
pub mod geo;
pub mod geofence;
pub mod issues;
pub mod model;
pub mod output;
pub mod pipeline;
pub mod query;
pub mod refresher;
pub mod services;
pub mod status;
pub mod store;
pub mod tracker;

pub use config::TrackerConfig;
pub use error::{TrackingError, TrackingResult};
pub use tracker::{IngestOutcome, IngestReport, RefreshSummary, Tracker};
