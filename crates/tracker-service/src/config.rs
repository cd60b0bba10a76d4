//! Tracker Service configuration.
//!
//! Configuration is loaded from environment variables. Only the SFU signal
//! address is required; everything else has a default.

use crate::signal::SignalConfig;

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

/// Default HTTP bind address for the start/stop API, health and metrics.
pub const DEFAULT_HTTP_BIND_ADDRESS: &str = "0.0.0.0:8090";

/// Default GC sweep period in milliseconds.
pub const DEFAULT_GC_PERIOD_MS: u64 = 5_000;

/// Default tracker lease when a start call omits `expire_in_ms`.
pub const DEFAULT_EXPIRE_MS: u64 = 60_000;

/// Upper bound on a requested lease (24h).
pub const DEFAULT_MAX_EXPIRE_MS: u64 = 86_400_000;

/// Default bound on draining trackers at shutdown.
pub const DEFAULT_SHUTDOWN_GRACE_SECONDS: u64 = 30;

/// Default SFU dial timeout in milliseconds.
pub const DEFAULT_SFU_DIAL_TIMEOUT_MS: u64 = 5_000;

/// Default SFU correlated request timeout in milliseconds.
pub const DEFAULT_SFU_REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Default capacity of the recording job queue.
pub const DEFAULT_JOB_QUEUE_CAPACITY: usize = 256;

/// Default instance ID prefix.
pub const DEFAULT_TS_ID_PREFIX: &str = "ts";

/// Tracker Service configuration.
#[derive(Clone)]
pub struct Config {
    /// HTTP bind address (default: "0.0.0.0:8090").
    pub http_bind_address: String,

    /// Instance identifier reported by `/health`.
    pub instance_id: String,

    /// Period of the GC sweep.
    pub gc_period: Duration,

    /// Lease applied when a start call does not ask for one.
    pub default_expire: Duration,

    /// Longest lease a start call may ask for.
    pub max_expire: Duration,

    /// Bound on the shutdown drain.
    pub shutdown_grace: Duration,

    /// SFU signal endpoint.
    pub signal: SignalConfig,

    /// Capacity of the recording job queue.
    pub job_queue_capacity: usize,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("http_bind_address", &self.http_bind_address)
            .field("instance_id", &self.instance_id)
            .field("gc_period", &self.gc_period)
            .field("default_expire", &self.default_expire)
            .field("max_expire", &self.max_expire)
            .field("shutdown_grace", &self.shutdown_grace)
            .field("sfu_signal_address", &self.signal.address)
            .field("sfu_dial_timeout", &self.signal.dial_timeout)
            .field("sfu_request_timeout", &self.signal.request_timeout)
            .field("job_queue_capacity", &self.job_queue_capacity)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let sfu_signal_address = vars
            .get("SFU_SIGNAL_ADDRESS")
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("SFU_SIGNAL_ADDRESS".to_string()))?
            .clone();

        let http_bind_address = vars
            .get("TS_HTTP_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HTTP_BIND_ADDRESS.to_string());

        let gc_period_ms = parse_positive(vars, "TS_GC_PERIOD_MS", DEFAULT_GC_PERIOD_MS)?;
        let default_expire_ms = parse_positive(vars, "TS_DEFAULT_EXPIRE_MS", DEFAULT_EXPIRE_MS)?;
        let max_expire_ms = parse_positive(vars, "TS_MAX_EXPIRE_MS", DEFAULT_MAX_EXPIRE_MS)?;
        let shutdown_grace_seconds = parse_positive(
            vars,
            "TS_SHUTDOWN_GRACE_SECONDS",
            DEFAULT_SHUTDOWN_GRACE_SECONDS,
        )?;
        let dial_timeout_ms =
            parse_positive(vars, "SFU_DIAL_TIMEOUT_MS", DEFAULT_SFU_DIAL_TIMEOUT_MS)?;
        let request_timeout_ms =
            parse_positive(vars, "SFU_REQUEST_TIMEOUT_MS", DEFAULT_SFU_REQUEST_TIMEOUT_MS)?;
        let job_queue_capacity = parse_positive(
            vars,
            "TS_JOB_QUEUE_CAPACITY",
            DEFAULT_JOB_QUEUE_CAPACITY as u64,
        )?;

        if default_expire_ms > max_expire_ms {
            return Err(ConfigError::InvalidValue(format!(
                "TS_DEFAULT_EXPIRE_MS ({default_expire_ms}) exceeds TS_MAX_EXPIRE_MS ({max_expire_ms})"
            )));
        }

        let job_queue_capacity = usize::try_from(job_queue_capacity).map_err(|_| {
            ConfigError::InvalidValue(format!(
                "TS_JOB_QUEUE_CAPACITY out of range: {job_queue_capacity}"
            ))
        })?;

        // Generate instance ID
        let instance_id = vars.get("TS_INSTANCE_ID").cloned().unwrap_or_else(|| {
            let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_TS_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            http_bind_address,
            instance_id,
            gc_period: Duration::from_millis(gc_period_ms),
            default_expire: Duration::from_millis(default_expire_ms),
            max_expire: Duration::from_millis(max_expire_ms),
            shutdown_grace: Duration::from_secs(shutdown_grace_seconds),
            signal: SignalConfig {
                address: sfu_signal_address,
                dial_timeout: Duration::from_millis(dial_timeout_ms),
                request_timeout: Duration::from_millis(request_timeout_ms),
            },
            job_queue_capacity,
        })
    }
}

/// Parse an optional positive integer, falling back to `default` if unset.
fn parse_positive(
    vars: &HashMap<String, String>,
    key: &str,
    default: u64,
) -> Result<u64, ConfigError> {
    let Some(raw) = vars.get(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(0) => Err(ConfigError::InvalidValue(format!("{key} must be > 0"))),
        Ok(value) => Ok(value),
        Err(e) => Err(ConfigError::InvalidValue(format!("{key}={raw}: {e}"))),
    }
}
