//! Periodic background re-prediction.

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::info;

use crate::tracker::Tracker;

/// Runs `refresh_predictions` every `interval` until `rounds` rounds have
/// completed (0 = forever) or `shutdown` turns true. Returns the number of
/// completed rounds.
pub async fn run_refresher(
    tracker: Arc<Tracker>,
    interval: Duration,
    rounds: usize,
    mut shutdown: watch::Receiver<bool>,
) -> usize {
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick fires immediately; a round right at start-up would
    // repeat the initial predictions.
    ticker.tick().await;

    let mut completed = 0;
    loop {
        if rounds > 0 && completed >= rounds {
            break;
        }
        if *shutdown.borrow() {
            break;
        }

        tokio::select! {
            _ = ticker.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
        }

        let summary = tracker.refresh_predictions().await;
        completed += 1;
        info!(
            round = completed,
            refreshed = summary.refreshed,
            skipped = summary.skipped,
            "Refresh round complete"
        );
    }

    info!(rounds = completed, "Refresher stopped");
    completed
}
