//! Monitor configuration.
//!
//! Every interval the monitor uses is loaded here and injected into the
//! actors, so tests can run the same code with short deterministic timings.

use common::config::ObservabilityConfig;
use monitor_protocol::FrameLimits;
use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default reconciliation poll interval (5s).
pub const DEFAULT_POLL_INTERVAL_MS: u64 = 5_000;

/// Default frame liveness window (10s).
pub const DEFAULT_FRAME_TIMEOUT_MS: u64 = 10_000;

/// Default presence sweep interval.
pub const DEFAULT_PRESENCE_CHECK_INTERVAL_MS: u64 = 1_000;

/// Default minimum spacing between accepted frames from one participant.
pub const DEFAULT_FRAME_MIN_INTERVAL_MS: u64 = 500;

/// Default maximum encoded frame payload (1 MiB).
pub const DEFAULT_MAX_FRAME_BYTES: usize = 1_048_576;

/// Default peer link health check interval (3s).
pub const DEFAULT_PEER_HEALTH_CHECK_MS: u64 = 3_000;

/// Default window for a peer link to reach `Connected`.
pub const DEFAULT_NEGOTIATION_TIMEOUT_MS: u64 = 20_000;

/// Default bound on a single publish call.
pub const DEFAULT_PUBLISH_TIMEOUT_MS: u64 = 2_000;

/// Default maximum warning length in characters.
pub const DEFAULT_MAX_WARNING_CHARS: usize = 500;

/// Default maximum concurrently open monitoring views.
pub const DEFAULT_MAX_VIEWS: usize = 200;

/// Default maximum participants one frame relay tracks.
pub const DEFAULT_MAX_TRACKED_PARTICIPANTS: usize = 1_000;

/// Default health endpoint bind address.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8082";

/// Default monitor instance ID prefix.
pub const DEFAULT_INSTANCE_ID_PREFIX: &str = "monitor";

/// Monitor configuration.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Reconciliation cycle interval.
    pub poll_interval: Duration,

    /// No frame for this long marks a participant offline.
    pub frame_timeout: Duration,

    /// How often the frame relay sweeps for expired presence.
    pub presence_check_interval: Duration,

    /// Frames closer together than this are throttled.
    pub frame_min_interval: Duration,

    /// Maximum encoded frame payload in bytes.
    pub max_frame_bytes: usize,

    /// How often a connected peer link probes its tracks.
    pub peer_health_check_interval: Duration,

    /// A peer link that is not connected within this window is closed.
    pub negotiation_timeout: Duration,

    /// Bound on each publish call.
    pub publish_timeout: Duration,

    /// Maximum warning message length in characters (after trimming).
    pub max_warning_chars: usize,

    /// Maximum concurrently open monitoring views.
    pub max_views: usize,

    /// Maximum participants with a held frame per view.
    pub max_tracked_participants: usize,

    /// Health endpoint bind address (default: "0.0.0.0:8082").
    pub health_bind_address: String,

    /// Unique identifier for this monitor instance.
    pub instance_id: String,

    /// Log filter and format.
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(DEFAULT_POLL_INTERVAL_MS),
            frame_timeout: Duration::from_millis(DEFAULT_FRAME_TIMEOUT_MS),
            presence_check_interval: Duration::from_millis(DEFAULT_PRESENCE_CHECK_INTERVAL_MS),
            frame_min_interval: Duration::from_millis(DEFAULT_FRAME_MIN_INTERVAL_MS),
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            peer_health_check_interval: Duration::from_millis(DEFAULT_PEER_HEALTH_CHECK_MS),
            negotiation_timeout: Duration::from_millis(DEFAULT_NEGOTIATION_TIMEOUT_MS),
            publish_timeout: Duration::from_millis(DEFAULT_PUBLISH_TIMEOUT_MS),
            max_warning_chars: DEFAULT_MAX_WARNING_CHARS,
            max_views: DEFAULT_MAX_VIEWS,
            max_tracked_participants: DEFAULT_MAX_TRACKED_PARTICIPANTS,
            health_bind_address: DEFAULT_HEALTH_BIND_ADDRESS.to_string(),
            instance_id: generate_instance_id(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any variable fails to parse or
    /// an interval is zero.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if any variable fails to parse or
    /// an interval is zero.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let poll_interval =
            parse_interval(vars, "MONITOR_POLL_INTERVAL_MS", DEFAULT_POLL_INTERVAL_MS)?;
        let frame_timeout =
            parse_interval(vars, "MONITOR_FRAME_TIMEOUT_MS", DEFAULT_FRAME_TIMEOUT_MS)?;
        let presence_check_interval = parse_interval(
            vars,
            "MONITOR_PRESENCE_CHECK_INTERVAL_MS",
            DEFAULT_PRESENCE_CHECK_INTERVAL_MS,
        )?;
        let peer_health_check_interval = parse_interval(
            vars,
            "MONITOR_PEER_HEALTH_CHECK_MS",
            DEFAULT_PEER_HEALTH_CHECK_MS,
        )?;
        let negotiation_timeout = parse_interval(
            vars,
            "MONITOR_NEGOTIATION_TIMEOUT_MS",
            DEFAULT_NEGOTIATION_TIMEOUT_MS,
        )?;
        let publish_timeout =
            parse_interval(vars, "MONITOR_PUBLISH_TIMEOUT_MS", DEFAULT_PUBLISH_TIMEOUT_MS)?;

        // Zero disables throttling, so it is not an interval in the strict sense
        let frame_min_interval = Duration::from_millis(parse_number(
            vars,
            "MONITOR_FRAME_MIN_INTERVAL_MS",
            DEFAULT_FRAME_MIN_INTERVAL_MS,
        )?);

        let max_frame_bytes =
            parse_positive(vars, "MONITOR_MAX_FRAME_BYTES", DEFAULT_MAX_FRAME_BYTES)?;
        let max_warning_chars =
            parse_positive(vars, "MONITOR_MAX_WARNING_CHARS", DEFAULT_MAX_WARNING_CHARS)?;
        let max_views = parse_positive(vars, "MONITOR_MAX_VIEWS", DEFAULT_MAX_VIEWS)?;
        let max_tracked_participants = parse_positive(
            vars,
            "MONITOR_MAX_TRACKED_PARTICIPANTS",
            DEFAULT_MAX_TRACKED_PARTICIPANTS,
        )?;

        let health_bind_address = vars
            .get("MONITOR_HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let instance_id = vars
            .get("MONITOR_INSTANCE_ID")
            .cloned()
            .unwrap_or_else(generate_instance_id);

        let observability = ObservabilityConfig {
            log_level: vars
                .get("MONITOR_LOG_LEVEL")
                .cloned()
                .unwrap_or_else(|| ObservabilityConfig::default().log_level),
            json_logs: parse_bool(vars, "MONITOR_JSON_LOGS", false)?,
        };

        Ok(MonitorConfig {
            poll_interval,
            frame_timeout,
            presence_check_interval,
            frame_min_interval,
            max_frame_bytes,
            peer_health_check_interval,
            negotiation_timeout,
            publish_timeout,
            max_warning_chars,
            max_views,
            max_tracked_participants,
            health_bind_address,
            instance_id,
            observability,
        })
    }

    /// Frame payload bounds derived from `max_frame_bytes`.
    #[must_use]
    pub fn frame_limits(&self) -> FrameLimits {
        FrameLimits::from_payload_limit(self.max_frame_bytes)
    }
}

fn generate_instance_id() -> String {
    let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
    let uuid_suffix = uuid::Uuid::new_v4().to_string();
    let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
    format!("{DEFAULT_INSTANCE_ID_PREFIX}-{hostname}-{short_suffix}")
}

fn parse_number<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError> {
    match vars.get(key) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
        None => Ok(default),
    }
}

fn parse_positive(
    vars: &HashMap<String, String>,
    key: &str,
    default: usize,
) -> Result<usize, ConfigError> {
    let value = parse_number(vars, key, default)?;
    if value == 0 {
        return Err(ConfigError::InvalidValue(format!("{key} must be positive")));
    }
    Ok(value)
}

fn parse_interval(
    vars: &HashMap<String, String>,
    key: &str,
    default_ms: u64,
) -> Result<Duration, ConfigError> {
    let millis: u64 = parse_number(vars, key, default_ms)?;
    if millis == 0 {
        return Err(ConfigError::InvalidValue(format!("{key} must be positive")));
    }
    Ok(Duration::from_millis(millis))
}

fn parse_bool(
    vars: &HashMap<String, String>,
    key: &str,
    default: bool,
) -> Result<bool, ConfigError> {
    match vars.get(key).map(|v| v.trim().to_ascii_lowercase()) {
        None => Ok(default),
        Some(v) if v == "true" || v == "1" => Ok(true),
        Some(v) if v == "false" || v == "0" => Ok(false),
        Some(v) => Err(ConfigError::InvalidValue(format!("{key}={v}"))),
    }
}
