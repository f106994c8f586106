use std::collections::{HashMap, HashSet};
use std::sync::RwLock;
use std::time::Duration;

use chrono::Utc;
use once_cell::sync::Lazy;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{error, info};

use crate::config::CONFIG;
use crate::database::channel::Channel;

const UNHEALTHY_THRESHOLD: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
    Unknown,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelHealth {
    pub channel_id: i64,
    pub status: HealthStatus,
    pub last_checked: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    pub consecutive_failures: u32,
}

impl ChannelHealth {
    fn unknown(channel_id: i64) -> Self {
        Self {
            channel_id,
            status: HealthStatus::Unknown,
            last_checked: Utc::now().timestamp_millis(),
            last_error: None,
            consecutive_failures: 0,
        }
    }
}

/// Tracks per-channel liveness from active probes and from real traffic.
/// Readers (the routing engine, the status endpoint) take the read lock;
/// writers (the probe loop, the passive updater) take the write lock.
pub struct HealthChecker {
    statuses: RwLock<HashMap<i64, ChannelHealth>>,
}

pub static HEALTH: Lazy<HealthChecker> = Lazy::new(HealthChecker::new);

impl HealthChecker {
    pub fn new() -> Self {
        Self {
            statuses: RwLock::new(HashMap::new()),
        }
    }

    pub fn register_channel(&self, channel_id: i64) {
        let mut statuses = self.statuses.write().unwrap();
        statuses
            .entry(channel_id)
            .or_insert_with(|| ChannelHealth::unknown(channel_id));
    }

    pub fn unregister_channel(&self, channel_id: i64) {
        self.statuses.write().unwrap().remove(&channel_id);
    }

    pub fn get(&self, channel_id: i64) -> Option<ChannelHealth> {
        self.statuses.read().unwrap().get(&channel_id).cloned()
    }

    pub fn all(&self) -> Vec<ChannelHealth> {
        self.statuses.read().unwrap().values().cloned().collect()
    }

    pub fn is_unhealthy(&self, channel_id: i64) -> bool {
        self.statuses
            .read()
            .unwrap()
            .get(&channel_id)
            .map_or(false, |h| h.status == HealthStatus::Unhealthy)
    }

    /// Applies one observation, from a probe or from forwarded traffic.
    /// A success immediately restores the channel; failures accumulate and
    /// flip the status once they reach the threshold.
    pub fn update_status(&self, channel_id: i64, healthy: bool, err: Option<&str>) {
        let mut statuses = self.statuses.write().unwrap();
        let health = statuses
            .entry(channel_id)
            .or_insert_with(|| ChannelHealth::unknown(channel_id));

        health.last_checked = Utc::now().timestamp_millis();

        if healthy {
            health.status = HealthStatus::Healthy;
            health.consecutive_failures = 0;
            health.last_error = None;
        } else {
            health.consecutive_failures += 1;
            if health.consecutive_failures >= UNHEALTHY_THRESHOLD {
                health.status = HealthStatus::Unhealthy;
            }
            if let Some(err) = err {
                health.last_error = Some(err.to_string());
            }
        }
    }

    /// The active probe loop. Runs until the shutdown signal fires.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let period = Duration::from_secs(CONFIG.health_check.interval);
        let timeout = Duration::from_secs(CONFIG.health_check.timeout);
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        info!(
            "health checker started (interval {}s, timeout {}s)",
            CONFIG.health_check.interval, CONFIG.health_check.timeout
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => self.check_all(timeout).await,
                _ = shutdown.changed() => {
                    info!("health checker stopped");
                    return;
                }
            }
        }
    }

    async fn check_all(&self, timeout: Duration) {
        let channels = match Channel::list() {
            Ok(channels) => channels,
            Err(e) => {
                error!("health check skipped, failed to list channels: {:?}", e);
                return;
            }
        };

        {
            let mut statuses = self.statuses.write().unwrap();
            let live: HashSet<i64> = channels.iter().map(|c| c.id).collect();
            statuses.retain(|id, _| live.contains(id));
            for channel in &channels {
                statuses
                    .entry(channel.id)
                    .or_insert_with(|| ChannelHealth::unknown(channel.id));
            }
        }

        for channel in &channels {
            match check_endpoint(&channel.base_url, timeout).await {
                Ok(()) => self.update_status(channel.id, true, None),
                Err(e) => self.update_status(channel.id, false, Some(&e)),
            }
        }
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new()
    }
}

/// One HTTP probe; any response below 400 counts as alive.
pub async fn check_endpoint(url: &str, timeout: Duration) -> Result<(), String> {
    let client = reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| e.to_string())?;

    let response = client.get(url).send().await.map_err(|e| e.to_string())?;

    if response.status().as_u16() >= 400 {
        return Err(format!(
            "health check failed with status: {}",
            response.status().as_u16()
        ));
    }
    Ok(())
}
