//! Configuration module for the power station
//!
//! There is no configuration file. The hub address, the sampling interval and
//! the retry delay are compile-time constants; [`StationConfig::default`]
//! assembles them into the struct the session is built from, and tests build
//! their own variants.

use crate::backend::retry::RetryPolicy;
use std::path::PathBuf;
use std::time::Duration;

/// Hub host name
pub const HOST: &str = "localhost";

/// Hub TCP port
pub const PORT: u16 = 4223;

/// Pause between samples in poll mode
pub const POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Sensor callback period in push mode, in milliseconds
pub const PUSH_PERIOD_MS: u32 = 2000;

/// Pause between connect/enumerate attempts
pub const RETRY_DELAY: Duration = Duration::from_secs(1);

/// How long a device request waits for its response
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(2500);

/// Log file name prefix, followed by the session start time
pub const LOG_FILE_PREFIX: &str = "power_measurements_";

/// Log file extension
pub const LOG_FILE_EXTENSION: &str = "csv";

/// How sampling is triggered
pub const DRIVING_MODE: DrivingMode = DrivingMode::Poll {
    interval: POLL_INTERVAL,
};

/// What triggers `sample_and_report`
///
/// Exactly one mode is active per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrivingMode {
    /// The main thread samples, then sleeps `interval`
    Poll { interval: Duration },
    /// The sensor pushes its current every `period_ms` and each push
    /// triggers a sample on the event thread
    Push { period_ms: u32 },
}

impl DrivingMode {
    /// Callback period to program into a newly bound sensor, if any
    pub fn callback_period_ms(&self) -> Option<u32> {
        match self {
            DrivingMode::Poll { .. } => None,
            DrivingMode::Push { period_ms } => Some(*period_ms),
        }
    }
}

impl Default for DrivingMode {
    fn default() -> Self {
        DRIVING_MODE
    }
}

/// Everything a session needs to run
#[derive(Debug, Clone)]
pub struct StationConfig {
    /// Hub host name
    pub host: String,
    /// Hub TCP port
    pub port: u16,
    /// Poll or push sampling
    pub driving_mode: DrivingMode,
    /// Retry policy for connect and enumerate
    pub retry: RetryPolicy,
    /// Directory the log file is created in
    pub log_dir: PathBuf,
    /// Response timeout for device requests
    pub request_timeout: Duration,
}

impl Default for StationConfig {
    fn default() -> Self {
        Self {
            host: HOST.to_string(),
            port: PORT,
            driving_mode: DRIVING_MODE,
            retry: RetryPolicy::forever(RETRY_DELAY),
            log_dir: PathBuf::from("."),
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}
