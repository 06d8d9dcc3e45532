use log::{debug, info};
use std::time::Duration;
use tokio::time::{MissedTickBehavior, interval};

use crate::survey::SurveyHandle;

/// Periodically drops subscribers whose connection went away without a
/// clean disconnect. Stops once the survey aggregator is gone.
pub async fn sweep_disconnected_task(survey: SurveyHandle, every: Duration) {
    info!("Starting presence sweeper (every {:?})", every);
    let mut ticker = interval(every);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        match survey.sweep().await {
            Ok(0) => {}
            Ok(pruned) => debug!("Presence sweep removed {} stale subscriber(s)", pruned),
            Err(e) => {
                info!("Presence sweeper stopping: {}", e);
                break;
            }
        }
    }
}
