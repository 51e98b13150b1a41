//! Core data types for the power station
//!
//! This module contains the value types shared between the transport, the
//! device registry and the output sink.
//!
//! # Main Types
//!
//! - [`Reading`] - One sample of the three sensor channels
//! - [`SessionState`] - Link lifecycle of the session
//! - [`DeviceAnnouncement`] - A device reported by hub enumeration
//! - [`DeviceCallback`] - An unsolicited packet pushed by a bound device
//! - [`EnumerationType`] / [`ConnectReason`] / [`DisconnectReason`] - Event reasons

use crate::backend::packet::Uid;
use chrono::{DateTime, Local};
use std::fmt;

/// Logical role a physical device can be bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The character LCD
    Display,
    /// The voltage/current sensor
    Sensor,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Display => write!(f, "display"),
            Role::Sensor => write!(f, "sensor"),
        }
    }
}

/// Why a device shows up in an enumeration event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnumerationType {
    /// Device was already attached when the broadcast was requested
    Available,
    /// Device was just plugged in or powered up
    Connected,
    /// Device went away
    Disconnected,
    /// Reason code this station does not know
    Other(u8),
}

impl EnumerationType {
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => EnumerationType::Available,
            1 => EnumerationType::Connected,
            2 => EnumerationType::Disconnected,
            other => EnumerationType::Other(other),
        }
    }

    pub fn as_u8(self) -> u8 {
        match self {
            EnumerationType::Available => 0,
            EnumerationType::Connected => 1,
            EnumerationType::Disconnected => 2,
            EnumerationType::Other(v) => v,
        }
    }

    /// Only freshly connected or already present devices get bound
    pub fn triggers_binding(self) -> bool {
        matches!(self, EnumerationType::Available | EnumerationType::Connected)
    }
}

/// Why the transport reports an established link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectReason {
    /// A `connect` call issued by the session
    Request,
    /// The transport restored a dropped link on its own
    AutoReconnect,
}

/// Why the transport reports a lost link
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DisconnectReason {
    /// A `disconnect` call issued by the session
    Request,
    /// Read or write on the socket failed
    Error,
    /// The hub closed the socket
    Shutdown,
}

/// A device reported by the hub in response to an enumeration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceAnnouncement {
    /// Unique id of the device
    pub uid: Uid,
    /// Uid of the brick the device is attached to
    pub connected_uid: String,
    /// Port position on the parent brick
    pub position: char,
    /// Hardware version (major, minor, revision)
    pub hardware_version: [u8; 3],
    /// Firmware version (major, minor, revision)
    pub firmware_version: [u8; 3],
    /// Kind of device
    pub device_identifier: u16,
    /// Why the device is announced
    pub enumeration_type: EnumerationType,
}

impl DeviceAnnouncement {
    /// Announcement with only the fields the registry looks at
    pub fn new(uid: Uid, device_identifier: u16, enumeration_type: EnumerationType) -> Self {
        Self {
            uid,
            connected_uid: String::new(),
            position: 'a',
            hardware_version: [1, 0, 0],
            firmware_version: [2, 0, 0],
            device_identifier,
            enumeration_type,
        }
    }
}

/// Unsolicited packet pushed by a device (button events, periodic values)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceCallback {
    pub uid: Uid,
    pub function_id: u8,
    pub payload: Vec<u8>,
}

/// Link lifecycle of the session
///
/// `Ready` means the link is up and discovery was requested; it does not
/// imply that both devices are bound.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionState {
    /// No link to the hub
    #[default]
    Disconnected,
    /// Retrying `connect` until it succeeds
    Connecting,
    /// Retrying `enumerate` until it succeeds
    Discovering,
    /// Link established, discovery requested
    Ready,
}

impl SessionState {
    pub(crate) fn as_u8(self) -> u8 {
        match self {
            SessionState::Disconnected => 0,
            SessionState::Connecting => 1,
            SessionState::Discovering => 2,
            SessionState::Ready => 3,
        }
    }

    pub(crate) fn from_u8(value: u8) -> Self {
        match value {
            1 => SessionState::Connecting,
            2 => SessionState::Discovering,
            3 => SessionState::Ready,
            _ => SessionState::Disconnected,
        }
    }
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Disconnected => write!(f, "Disconnected"),
            SessionState::Connecting => write!(f, "Connecting..."),
            SessionState::Discovering => write!(f, "Discovering..."),
            SessionState::Ready => write!(f, "Ready"),
        }
    }
}

/// One sample of the sensor's three channels
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Wall-clock time captured before the first channel read
    pub timestamp: DateTime<Local>,
    /// Current in mA
    pub current: i32,
    /// Voltage in mV
    pub voltage: i32,
    /// Power in mW
    pub power: i32,
}

impl Reading {
    /// Seconds since the Unix epoch, fractional
    pub fn unix_timestamp(&self) -> f64 {
        self.timestamp.timestamp() as f64
            + f64::from(self.timestamp.timestamp_subsec_nanos()) / 1_000_000_000.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_enumeration_type_binding() {
        assert!(EnumerationType::Available.triggers_binding());
        assert!(EnumerationType::Connected.triggers_binding());
        assert!(!EnumerationType::Disconnected.triggers_binding());
        assert!(!EnumerationType::Other(7).triggers_binding());
    }

    #[test]
    fn test_enumeration_type_codes() {
        for code in 0..=4u8 {
            assert_eq!(EnumerationType::from_u8(code).as_u8(), code);
        }
    }

    #[test]
    fn test_session_state_codes() {
        for state in [
            SessionState::Disconnected,
            SessionState::Connecting,
            SessionState::Discovering,
            SessionState::Ready,
        ] {
            assert_eq!(SessionState::from_u8(state.as_u8()), state);
        }
    }

    #[test]
    fn test_unix_timestamp_fraction() {
        let ts = Local.timestamp_opt(1_700_000_000, 250_000_000).unwrap();
        let reading = Reading {
            timestamp: ts,
            current: 0,
            voltage: 0,
            power: 0,
        };
        assert_eq!(reading.unix_timestamp(), 1_700_000_000.25);
    }
}
