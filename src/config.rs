use std::{fs, path::Path};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

// Used for deserializing user-provided config files where all fields are optional.
#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub db_url: Option<String>,
    pub log_level: Option<String>,
    pub session: Option<PartialSessionConfig>,
    pub health_check: Option<PartialHealthCheckConfig>,
}

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialSessionConfig {
    pub idle_timeout: Option<u64>,
}

#[derive(Debug, Deserialize, Serialize, Default)]
#[serde(deny_unknown_fields)]
pub struct PartialHealthCheckConfig {
    pub interval: Option<u64>,
    pub timeout: Option<u64>,
    pub exclude_unhealthy: Option<bool>,
}

impl PartialConfig {
    /// Merges the fields of this partial config into a final config, overwriting existing values.
    fn merge_into(self, final_config: &mut FinalConfig) {
        if let Some(host) = self.host {
            final_config.host = host;
        }
        if let Some(port) = self.port {
            final_config.port = port;
        }
        if let Some(db_url) = self.db_url {
            final_config.db_url = db_url;
        }
        if let Some(log_level) = self.log_level {
            final_config.log_level = log_level;
        }
        if let Some(session) = self.session {
            if let Some(idle_timeout) = session.idle_timeout {
                final_config.session.idle_timeout = idle_timeout;
            }
        }
        if let Some(health_check) = self.health_check {
            if let Some(interval) = health_check.interval {
                final_config.health_check.interval = interval;
            }
            if let Some(timeout) = health_check.timeout {
                final_config.health_check.timeout = timeout;
            }
            if let Some(exclude_unhealthy) = health_check.exclude_unhealthy {
                final_config.health_check.exclude_unhealthy = exclude_unhealthy;
            }
        }
    }
}

// The fully resolved configuration used by the application.
#[derive(Debug, Deserialize, Serialize)]
pub struct FinalConfig {
    pub host: String,
    pub port: u16,
    pub db_url: String,
    pub log_level: String,
    pub session: SessionConfig,
    pub health_check: HealthCheckConfig,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct SessionConfig {
    /// Minutes of inactivity before the sweeper evicts a pin.
    pub idle_timeout: u64,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct HealthCheckConfig {
    /// Seconds between active probe rounds.
    pub interval: u64,
    /// Seconds before a single probe gives up.
    pub timeout: u64,
    /// Drop unhealthy channels from routing candidates.
    pub exclude_unhealthy: bool,
}

fn get_env_var<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

fn get_config_from_env() -> PartialConfig {
    PartialConfig {
        host: get_env_var("HOST"),
        port: get_env_var("PORT"),
        db_url: get_env_var("DB_URL"),
        log_level: get_env_var("LOG_LEVEL"),
        session: Some(PartialSessionConfig {
            idle_timeout: get_env_var("SESSION_IDLE_TIMEOUT"),
        }),
        health_check: Some(PartialHealthCheckConfig {
            interval: get_env_var("HEALTH_CHECK_INTERVAL"),
            timeout: get_env_var("HEALTH_CHECK_TIMEOUT"),
            exclude_unhealthy: get_env_var("HEALTH_CHECK_EXCLUDE_UNHEALTHY"),
        }),
    }
}

pub static CONFIG: Lazy<FinalConfig> = Lazy::new(|| {
    let user_config_path = Path::new("config.yaml");

    let mut final_config = FinalConfig {
        host: "0.0.0.0".to_string(),
        port: 8080,
        db_url: "./storage/modelgate.db".to_string(),
        log_level: "info".to_string(),
        session: SessionConfig { idle_timeout: 30 },
        health_check: HealthCheckConfig {
            interval: 30,
            timeout: 5,
            exclude_unhealthy: false,
        },
    };

    // Load the user's config if it exists. It's optional and overrides the defaults.
    if user_config_path.exists() {
        if let Ok(config_str) = fs::read_to_string(user_config_path) {
            let user_config: PartialConfig =
                serde_yaml::from_str(&config_str).unwrap_or_else(|e| {
                    panic!(
                        "Failed to parse configuration file at {:?}: {}",
                        user_config_path, e
                    )
                });
            user_config.merge_into(&mut final_config);
        }
    }

    // Environment variables have the highest priority.
    get_config_from_env().merge_into(&mut final_config);

    final_config
});
