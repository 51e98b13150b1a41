//! Output sink: LCD rendering, CSV log and the sampler tying them together
//!
//! A sample reads the sensor's three channels, renders them onto the four
//! display rows and appends one record to the session's log file:
//!
//! ```text
//! 1700000000.0;120;5000;600
//! ```
//!
//! Records are `timestamp;current;voltage;power` with the timestamp in
//! fractional Unix seconds. There is no header row and no rotation.

use crate::backend::devices::{CharacterDisplay, PowerSensor};
use crate::backend::retry::Clock;
use crate::config::{LOG_FILE_EXTENSION, LOG_FILE_PREFIX};
use crate::error::{Result, ResultExt, StationError};
use crate::types::Reading;
use chrono::{DateTime, Local, TimeZone};
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Timestamp layout used in the file name and on display row 0
const TIMESTAMP_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// File name of the log for a session started at `start`
pub fn log_file_name(start: DateTime<Local>) -> String {
    format!(
        "{}{}.{}",
        LOG_FILE_PREFIX,
        start.format(TIMESTAMP_FORMAT),
        LOG_FILE_EXTENSION
    )
}

/// Whole seconds keep one decimal (`1700000000.0`), others print in full
fn format_unix_timestamp(seconds: f64) -> String {
    if seconds.fract() == 0.0 {
        format!("{:.1}", seconds)
    } else {
        format!("{}", seconds)
    }
}

fn parse_field<T: std::str::FromStr>(field: Option<&str>, name: &str, line: &str) -> Result<T> {
    field
        .map(str::trim)
        .and_then(|f| f.parse().ok())
        .ok_or_else(|| StationError::Protocol(format!("bad {} in record '{}'", name, line)))
}

impl Reading {
    /// Log record for this reading, newline included
    pub fn to_record(&self) -> String {
        format!(
            "{};{};{};{}\n",
            format_unix_timestamp(self.unix_timestamp()),
            self.current,
            self.voltage,
            self.power
        )
    }

    /// Parse a record written by [`to_record`](Self::to_record)
    pub fn parse_record(line: &str) -> Result<Self> {
        let line = line.trim_end_matches(&['\r', '\n'][..]);
        let mut fields = line.split(';');

        let seconds: f64 = parse_field(fields.next(), "timestamp", line)?;
        let current = parse_field(fields.next(), "current", line)?;
        let voltage = parse_field(fields.next(), "voltage", line)?;
        let power = parse_field(fields.next(), "power", line)?;
        if fields.next().is_some() {
            return Err(StationError::Protocol(format!(
                "too many fields in record '{}'",
                line
            )));
        }

        let whole = seconds.floor();
        let nanos = (((seconds - whole) * 1e9).round() as u32).min(999_999_999);
        let timestamp = Local
            .timestamp_opt(whole as i64, nanos)
            .single()
            .ok_or_else(|| StationError::Protocol(format!("timestamp out of range in '{}'", line)))?;

        Ok(Self {
            timestamp,
            current,
            voltage,
            power,
        })
    }

    /// Text for display rows 0 to 3
    pub fn display_lines(&self) -> [String; 4] {
        [
            self.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            format!("Current: {} mA", self.current),
            format!("Voltage: {} mV", self.voltage),
            format!("Power: {} mW", self.power),
        ]
    }
}

/// Append-only CSV log
///
/// The file is opened for every record and closed before `append` returns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogFile {
    path: PathBuf,
}

impl LogFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Log file in `dir` named after the session start time
    pub fn in_dir(dir: &Path, start: DateTime<Local>) -> Self {
        Self::new(dir.join(log_file_name(start)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one record
    pub fn append(&self, reading: &Reading) -> Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(StationError::from)
            .with_context(|| format!("Failed to open log file {}", self.path.display()))?;

        file.write_all(reading.to_record().as_bytes())
            .map_err(StationError::from)
            .with_context(|| format!("Failed to write log file {}", self.path.display()))
    }
}

/// Reads the sensor and reports to the display and the log
pub struct Sampler {
    clock: Arc<dyn Clock>,
    log: LogFile,
}

impl Sampler {
    pub fn new(clock: Arc<dyn Clock>, log: LogFile) -> Self {
        Self { clock, log }
    }

    pub fn log_file(&self) -> &LogFile {
        &self.log
    }

    fn read(&self, sensor: &dyn PowerSensor) -> Result<Reading> {
        let timestamp = self.clock.now();
        Ok(Reading {
            timestamp,
            current: sensor.current()?,
            voltage: sensor.voltage()?,
            power: sensor.power()?,
        })
    }

    /// Take one sample and report it
    ///
    /// All three channels are read before anything is written. A failed read
    /// is logged and yields `Ok(None)` with no display writes and no record.
    /// A failed display write is logged and the record is still appended.
    /// Only log file errors are returned.
    pub fn sample_and_report(
        &self,
        display: &dyn CharacterDisplay,
        sensor: &dyn PowerSensor,
    ) -> Result<Option<Reading>> {
        let reading = match self.read(sensor) {
            Ok(reading) => reading,
            Err(e) => {
                tracing::error!("Reading power values failed: {}", e);
                return Ok(None);
            }
        };
        tracing::info!(
            "current: {} mA, voltage: {} mV, power: {} mW",
            reading.current,
            reading.voltage,
            reading.power
        );

        for (row, text) in (0u8..).zip(reading.display_lines().iter()) {
            if let Err(e) = display.write_line(row, 0, text) {
                tracing::error!("Display update failed at row {}: {}", row, e);
                break;
            }
        }

        self.log.append(&reading)?;
        Ok(Some(reading))
    }
}
