use std::time::Duration;

use tokio::sync::watch;
use tracing::{debug, error, info};

use crate::config::CONFIG;
use crate::database::session::Session;

const SWEEP_PERIOD: Duration = Duration::from_secs(5 * 60);

/// Evicts idle pins in the background. One instance per process; returns
/// when the shutdown signal fires so the store outlives it.
pub async fn run_sweeper(mut shutdown: watch::Receiver<bool>) {
    let mut ticker =
        tokio::time::interval_at(tokio::time::Instant::now() + SWEEP_PERIOD, SWEEP_PERIOD);
    info!(
        "session sweeper started (idle timeout {}m)",
        CONFIG.session.idle_timeout
    );

    loop {
        tokio::select! {
            _ = ticker.tick() => sweep(),
            _ = shutdown.changed() => {
                info!("session sweeper stopped");
                return;
            }
        }
    }
}

fn sweep() {
    match Session::delete_expired(CONFIG.session.idle_timeout) {
        Ok(removed) if removed > 0 => debug!("session sweep removed {} idle sessions", removed),
        Ok(_) => {}
        Err(e) => error!("session sweep failed: {:?}", e),
    }
}
