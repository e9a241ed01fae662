//! CLI entry point for the delivery tracker.
//!
//! Provides subcommands for one-off ETA predictions, replaying a recorded
//! location stream through the tracker, and running the periodic refresher
//! against a replayed stream.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use delivery_tracker::config::TrackerConfig;
use delivery_tracker::eta::{EtaPredictor, PredictionKind, PredictionRequest};
use delivery_tracker::fetch::BasicClient;
use delivery_tracker::fetch::auth::BearerToken;
use delivery_tracker::geo::Coordinate;
use delivery_tracker::model::{Delivery, LocationUpdate, TransportMode};
use delivery_tracker::output::{append_prediction, print_json};
use delivery_tracker::refresher::run_refresher;
use delivery_tracker::services::{
    FanoutNotifier, FixedConditions, GreatCircleRouting, InMemoryHistory, LogNotifier, Notifier,
    WebhookNotifier,
};
use delivery_tracker::store::{MemoryStore, TrackingStore};
use delivery_tracker::{IngestOutcome, Tracker};
use std::ffi::OsStr;
use std::fs::File;
use std::path::Path;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "delivery_tracker")]
#[command(about = "Real-time delivery tracking and ETA prediction", long_about = None)]
struct Cli {
    /// JSON config file; TRACKER_* environment variables override it
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// CSV of completed routes used by the regression model
    #[arg(long, global = true)]
    history: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full ETA ensemble for a single trip
    Predict {
        /// Transport mode (truck, van, pickup, motorbike, bicycle)
        #[arg(short, long)]
        mode: TransportMode,

        /// Origin as "lat,lng"
        #[arg(long, allow_hyphen_values = true)]
        from: Coordinate,

        /// Destination as "lat,lng"
        #[arg(long, allow_hyphen_values = true)]
        to: Coordinate,

        /// Departure time (RFC 3339); defaults to now
        #[arg(long)]
        departure: Option<DateTime<Utc>>,
    },
    /// Replay recorded location updates and print each delivery's tracking view
    Replay {
        /// JSON array of deliveries
        #[arg(value_name = "DELIVERIES")]
        deliveries: String,

        /// CSV of location updates, processed in file order
        #[arg(value_name = "SAMPLES")]
        samples: String,

        /// CSV file to append every prediction to
        #[arg(short, long)]
        predictions: Option<String>,

        /// Full re-prediction rounds to run after the stream
        #[arg(short = 'n', long, default_value_t = 1)]
        refresh_rounds: usize,

        /// POST alerts and geofence events to this URL (bearer token from WEBHOOK_TOKEN)
        #[arg(long)]
        webhook_url: Option<String>,
    },
    /// Replay recorded location updates, then keep refreshing ETAs periodically
    Watch {
        #[arg(value_name = "DELIVERIES")]
        deliveries: String,

        #[arg(value_name = "SAMPLES")]
        samples: String,

        /// Seconds between refresh rounds (defaults to the config value)
        #[arg(short, long)]
        interval: Option<u64>,

        /// Number of refresh rounds (0 = until Ctrl+C)
        #[arg(short = 'n', long, default_value_t = 0)]
        rounds: usize,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    // Logging setup: colored stderr + JSON rolling log file
    let log_file_path = std::env::var("LOG_FILE_PATH")
        .unwrap_or_else(|_| "logs/delivery_tracker.log".to_string());
    let log_dir = Path::new(&log_file_path)
        .parent()
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(&log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("delivery_tracker.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, _file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => TrackerConfig::load(path)?,
        None => TrackerConfig::default(),
    }
    .with_env_overrides()?;
    debug!(?config, "Configuration loaded");

    let history = match &cli.history {
        Some(path) => InMemoryHistory::load_csv(path)?,
        None => InMemoryHistory::default(),
    }
    .with_match_radius(config.history_match_radius_m);

    match cli.command {
        Commands::Predict {
            mode,
            from,
            to,
            departure,
        } => {
            let predictor = predictor(&config, history);
            let req = PredictionRequest {
                delivery_id: "adhoc".to_string(),
                mode,
                origin: from,
                destination: to,
                via: None,
                departure: departure.unwrap_or_else(Utc::now),
                kind: PredictionKind::Initial,
                motion: None,
            };
            let prediction = predictor.predict(&req).await;
            print_json(&prediction)?;
        }
        Commands::Replay {
            deliveries,
            samples,
            predictions,
            refresh_rounds,
            webhook_url,
        } => {
            let notifier = notifier(&config, webhook_url)?;
            let tracker = Arc::new(Tracker::new(
                config.clone(),
                Arc::new(MemoryStore::new()),
                notifier,
                predictor(&config, history),
            ));

            replay(&tracker, &deliveries, &samples).await?;
            for _ in 0..refresh_rounds {
                tracker.refresh_predictions().await;
            }

            let mut views = Vec::new();
            for id in tracker.delivery_ids() {
                views.push(tracker.view(&id).await?);
            }
            print_json(&views)?;

            if let Some(path) = predictions {
                let mut written = 0;
                for id in tracker.delivery_ids() {
                    for prediction in tracker.store().predictions(&id).await? {
                        append_prediction(&path, &prediction)?;
                        written += 1;
                    }
                }
                info!(path = %path, written, "Predictions written");
            }
        }
        Commands::Watch {
            deliveries,
            samples,
            interval,
            rounds,
        } => {
            let interval = interval
                .map(std::time::Duration::from_secs)
                .unwrap_or_else(|| config.refresh_interval());
            let tracker = Arc::new(Tracker::new(
                config.clone(),
                Arc::new(MemoryStore::new()),
                Arc::new(LogNotifier),
                predictor(&config, history),
            ));

            replay(&tracker, &deliveries, &samples).await?;

            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    info!("Ctrl+C received, stopping refresher");
                    let _ = shutdown_tx.send(true);
                }
            });

            if rounds == 0 {
                info!(interval_secs = interval.as_secs(), "Refreshing until Ctrl+C");
            }
            run_refresher(Arc::clone(&tracker), interval, rounds, shutdown_rx).await;

            for id in tracker.active_deliveries() {
                print_json(&tracker.view(&id).await?)?;
            }
        }
    }

    Ok(())
}

fn predictor(config: &TrackerConfig, history: InMemoryHistory) -> EtaPredictor {
    EtaPredictor::new(
        Arc::new(GreatCircleRouting::default()),
        Arc::new(FixedConditions::default()),
        Arc::new(history),
        config,
    )
}

fn notifier(config: &TrackerConfig, webhook_url: Option<String>) -> Result<Arc<dyn Notifier>> {
    let Some(url) = webhook_url else {
        return Ok(Arc::new(LogNotifier));
    };

    let client = BasicClient::new(config.provider_timeout())?;
    let fanout = FanoutNotifier::new().with(LogNotifier);
    let fanout = match std::env::var("WEBHOOK_TOKEN") {
        Ok(token) => fanout.with(WebhookNotifier::new(BearerToken::new(client, &token)?, url)),
        Err(_) => fanout.with(WebhookNotifier::new(client, url)),
    };
    Ok(Arc::new(fanout))
}

/// Starts tracking every delivery in `deliveries_path` and feeds the rows of
/// `samples_path` through `ingest` in file order.
#[tracing::instrument(skip(tracker))]
async fn replay(tracker: &Tracker, deliveries_path: &str, samples_path: &str) -> Result<()> {
    let content = std::fs::read_to_string(deliveries_path)
        .with_context(|| format!("failed to read deliveries file '{deliveries_path}'"))?;
    let deliveries: Vec<Delivery> = serde_json::from_str(&content)
        .with_context(|| format!("invalid deliveries file '{deliveries_path}'"))?;

    for delivery in deliveries {
        let id = delivery.id.clone();
        match tracker.start_tracking(delivery).await {
            Ok(eta) => info!(
                delivery_id = %id,
                duration_minutes = eta.duration_minutes,
                quality = %eta.quality,
                "Initial ETA"
            ),
            Err(e) => warn!(delivery_id = %id, error = %e, "Could not start tracking"),
        }
    }

    let file = File::open(samples_path)
        .with_context(|| format!("failed to open samples file '{samples_path}'"))?;
    let mut rdr = csv::Reader::from_reader(file);

    let (mut stored, mut discarded, mut rejected) = (0, 0, 0);
    for result in rdr.deserialize() {
        let update: LocationUpdate = result?;
        match tracker.ingest(update).await {
            Ok(IngestOutcome::Stored(_)) => stored += 1,
            Ok(IngestOutcome::Discarded(_)) => discarded += 1,
            Err(e) if e.is_retryable() => {
                error!(error = %e, "Storage failure during replay");
                return Err(e.into());
            }
            Err(e) => {
                warn!(error = %e, "Location update rejected");
                rejected += 1;
            }
        }
    }

    info!(stored, discarded, rejected, "Replay finished");
    Ok(())
}
