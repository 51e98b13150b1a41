//! Mock Hub Implementation for Testing
//!
//! This module provides an in-memory hub that can be used for testing the
//! station without real hardware. It speaks the same function ids as the real
//! devices, so the drivers in [`devices`](super::devices) run unchanged on top
//! of it.
//!
//! # Features
//!
//! - **Simulated devices**: an LCD 20x4 that keeps its four lines and
//!   backlight state, and a voltage/current sensor with settable values
//! - **Failure injection**: refuse the next N connects or enumerates, make a
//!   sensor function answer with an error code
//! - **Link simulation**: drop the link and restore it with an automatic
//!   reconnect event
//! - **Callbacks**: button releases and current pushes
//!
//! # Example
//!
//! ```ignore
//! use powerstation_rs::backend::{MockHub, Transport, Uid};
//!
//! let hub = MockHub::new()
//!     .with_lcd(Uid(100))
//!     .with_sensor(Uid(200), 120, 5000, 600);
//! hub.fail_next_connects(3);
//!
//! assert!(hub.connect("localhost", 4223).is_err());
//! ```
//!
//! # Enabling
//!
//! Outside of this crate's own unit tests the mock hub is only available when
//! the `mock-hub` feature is enabled:
//!
//! ```bash
//! cargo test --features mock-hub
//! ```

use crate::backend::devices::{Lcd20x4, VoltageCurrent};
use crate::backend::lock;
use crate::backend::packet::{read_fixed_str, Uid};
use crate::backend::transport::{Request, Transport, TransportEvent};
use crate::error::{DeviceErrorCode, Result, StationError};
use crate::types::{
    ConnectReason, DeviceAnnouncement, DeviceCallback, DisconnectReason, EnumerationType,
};
use crossbeam_channel::{unbounded, Receiver, Sender};
use std::collections::{BTreeMap, HashSet};
use std::sync::Mutex;

/// Simulated LCD 20x4 state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockLcd {
    /// Visible text per line, trailing blanks trimmed
    pub lines: [String; 4],
    /// Backlight state
    pub backlight: bool,
    /// Number of clear_display calls
    pub clear_count: u32,
    /// Number of backlight_on calls
    pub backlight_on_count: u32,
    /// Every write_line call as (line, position, text)
    pub writes: Vec<(u8, u8, String)>,
}

impl MockLcd {
    fn write(&mut self, line: u8, position: u8, text: &str) {
        let Some(slot) = self.lines.get_mut(usize::from(line)) else {
            return;
        };
        let mut cells: Vec<u8> = slot.bytes().collect();
        cells.resize(Lcd20x4::COLUMNS, b' ');
        for (offset, byte) in text.bytes().enumerate() {
            if let Some(cell) = cells.get_mut(usize::from(position) + offset) {
                *cell = byte;
            }
        }
        *slot = String::from_utf8_lossy(&cells).trim_end().to_string();
        self.writes.push((line, position, text.to_string()));
    }
}

/// Simulated voltage/current sensor state
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MockSensor {
    pub current: i32,
    pub voltage: i32,
    pub power: i32,
    /// Last period set through set_current_callback_period
    pub callback_period_ms: u32,
    /// Functions that answer with an error code
    pub failing_functions: HashSet<u8>,
}

#[derive(Debug, Clone)]
enum MockDevice {
    Lcd(MockLcd),
    Sensor(MockSensor),
    Other(u16),
}

impl MockDevice {
    fn device_identifier(&self) -> u16 {
        match self {
            MockDevice::Lcd(_) => Lcd20x4::DEVICE_IDENTIFIER,
            MockDevice::Sensor(_) => VoltageCurrent::DEVICE_IDENTIFIER,
            MockDevice::Other(id) => *id,
        }
    }
}

#[derive(Debug, Default)]
struct HubState {
    connected: bool,
    connect_failures: u32,
    enumerate_failures: u32,
    connect_calls: u32,
    enumerate_calls: u32,
    devices: BTreeMap<Uid, MockDevice>,
    requests: Vec<Request>,
}

fn device_error(uid: Uid, function_id: u8, code: DeviceErrorCode) -> StationError {
    StationError::Peripheral {
        uid: uid.to_string(),
        function_id,
        code,
    }
}

fn handle_lcd(lcd: &mut MockLcd, uid: Uid, request: &Request) -> Result<Vec<u8>> {
    match request.function_id {
        Lcd20x4::FUNCTION_WRITE_LINE => {
            let (line, position) = match request.payload.as_slice() {
                [line, position, ..] if *line < Lcd20x4::ROWS => (*line, *position),
                _ => {
                    return Err(device_error(
                        uid,
                        request.function_id,
                        DeviceErrorCode::InvalidParameter,
                    ))
                }
            };
            let text = read_fixed_str(&request.payload[2..]);
            lcd.write(line, position, &text);
            Ok(Vec::new())
        }
        Lcd20x4::FUNCTION_CLEAR_DISPLAY => {
            lcd.lines = Default::default();
            lcd.clear_count += 1;
            Ok(Vec::new())
        }
        Lcd20x4::FUNCTION_BACKLIGHT_ON => {
            lcd.backlight = true;
            lcd.backlight_on_count += 1;
            Ok(Vec::new())
        }
        Lcd20x4::FUNCTION_BACKLIGHT_OFF => {
            lcd.backlight = false;
            Ok(Vec::new())
        }
        Lcd20x4::FUNCTION_IS_BACKLIGHT_ON => Ok(vec![u8::from(lcd.backlight)]),
        other => Err(device_error(uid, other, DeviceErrorCode::FunctionNotSupported)),
    }
}

fn handle_sensor(sensor: &mut MockSensor, uid: Uid, request: &Request) -> Result<Vec<u8>> {
    if sensor.failing_functions.contains(&request.function_id) {
        return Err(device_error(
            uid,
            request.function_id,
            DeviceErrorCode::Unknown(3),
        ));
    }

    match request.function_id {
        VoltageCurrent::FUNCTION_GET_CURRENT => Ok(sensor.current.to_le_bytes().to_vec()),
        VoltageCurrent::FUNCTION_GET_VOLTAGE => Ok(sensor.voltage.to_le_bytes().to_vec()),
        VoltageCurrent::FUNCTION_GET_POWER => Ok(sensor.power.to_le_bytes().to_vec()),
        VoltageCurrent::FUNCTION_SET_CURRENT_CALLBACK_PERIOD => {
            let bytes: [u8; 4] = request
                .payload
                .get(..4)
                .and_then(|b| b.try_into().ok())
                .ok_or_else(|| {
                    device_error(uid, request.function_id, DeviceErrorCode::InvalidParameter)
                })?;
            sensor.callback_period_ms = u32::from_le_bytes(bytes);
            Ok(Vec::new())
        }
        other => Err(device_error(uid, other, DeviceErrorCode::FunctionNotSupported)),
    }
}

/// In-memory hub for tests
pub struct MockHub {
    state: Mutex<HubState>,
    events_tx: Sender<TransportEvent>,
    events_rx: Receiver<TransportEvent>,
}

impl MockHub {
    /// Create an empty hub
    pub fn new() -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            state: Mutex::new(HubState::default()),
            events_tx,
            events_rx,
        }
    }

    /// Attach an LCD 20x4
    pub fn with_lcd(self, uid: Uid) -> Self {
        lock(&self.state)
            .devices
            .insert(uid, MockDevice::Lcd(MockLcd::default()));
        self
    }

    /// Attach a voltage/current sensor reporting fixed values
    pub fn with_sensor(self, uid: Uid, current: i32, voltage: i32, power: i32) -> Self {
        lock(&self.state).devices.insert(
            uid,
            MockDevice::Sensor(MockSensor {
                current,
                voltage,
                power,
                ..Default::default()
            }),
        );
        self
    }

    /// Attach a device of a kind the station does not use
    pub fn with_device(self, uid: Uid, device_identifier: u16) -> Self {
        lock(&self.state)
            .devices
            .insert(uid, MockDevice::Other(device_identifier));
        self
    }

    /// Refuse the next `count` connect calls
    pub fn fail_next_connects(&self, count: u32) {
        lock(&self.state).connect_failures = count;
    }

    /// Refuse the next `count` enumerate calls
    pub fn fail_next_enumerates(&self, count: u32) {
        lock(&self.state).enumerate_failures = count;
    }

    /// Make a sensor function answer with an error code (or stop doing so)
    pub fn set_sensor_failure(&self, uid: Uid, function_id: u8, failing: bool) {
        if let Some(MockDevice::Sensor(sensor)) = lock(&self.state).devices.get_mut(&uid) {
            if failing {
                sensor.failing_functions.insert(function_id);
            } else {
                sensor.failing_functions.remove(&function_id);
            }
        }
    }

    /// Change the values a sensor reports
    pub fn set_sensor_values(&self, uid: Uid, current: i32, voltage: i32, power: i32) {
        if let Some(MockDevice::Sensor(sensor)) = lock(&self.state).devices.get_mut(&uid) {
            sensor.current = current;
            sensor.voltage = voltage;
            sensor.power = power;
        }
    }

    /// Drop the link as if the hub vanished
    pub fn simulate_link_drop(&self) {
        lock(&self.state).connected = false;
        self.emit(TransportEvent::Disconnected(DisconnectReason::Error));
    }

    /// Restore the link the way the transport does after a drop
    pub fn simulate_auto_reconnect(&self) {
        lock(&self.state).connected = true;
        self.emit(TransportEvent::Connected(ConnectReason::AutoReconnect));
    }

    /// Announce an attached device as freshly plugged in
    pub fn hot_plug(&self, uid: Uid) {
        let announcement = lock(&self.state)
            .devices
            .get(&uid)
            .map(|d| DeviceAnnouncement::new(uid, d.device_identifier(), EnumerationType::Connected));
        if let Some(announcement) = announcement {
            self.emit(TransportEvent::Enumerate(announcement));
        }
    }

    /// Push a button-released callback from an LCD
    pub fn release_button(&self, uid: Uid, button: u8) {
        self.emit(TransportEvent::Callback(DeviceCallback {
            uid,
            function_id: Lcd20x4::CALLBACK_BUTTON_RELEASED,
            payload: vec![button],
        }));
    }

    /// Push a current callback from a sensor
    pub fn push_current(&self, uid: Uid) {
        let current = match lock(&self.state).devices.get(&uid) {
            Some(MockDevice::Sensor(sensor)) => sensor.current,
            _ => return,
        };
        self.emit(TransportEvent::Callback(DeviceCallback {
            uid,
            function_id: VoltageCurrent::CALLBACK_CURRENT,
            payload: current.to_le_bytes().to_vec(),
        }));
    }

    /// Snapshot of an LCD's state
    pub fn lcd(&self, uid: Uid) -> Option<MockLcd> {
        match lock(&self.state).devices.get(&uid) {
            Some(MockDevice::Lcd(lcd)) => Some(lcd.clone()),
            _ => None,
        }
    }

    /// Snapshot of a sensor's state
    pub fn sensor(&self, uid: Uid) -> Option<MockSensor> {
        match lock(&self.state).devices.get(&uid) {
            Some(MockDevice::Sensor(sensor)) => Some(sensor.clone()),
            _ => None,
        }
    }

    pub fn connect_calls(&self) -> u32 {
        lock(&self.state).connect_calls
    }

    pub fn enumerate_calls(&self) -> u32 {
        lock(&self.state).enumerate_calls
    }

    /// Every request received, in order
    pub fn requests(&self) -> Vec<Request> {
        lock(&self.state).requests.clone()
    }

    fn emit(&self, event: TransportEvent) {
        let _ = self.events_tx.send(event);
    }
}

impl Default for MockHub {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for MockHub {
    fn connect(&self, host: &str, port: u16) -> Result<()> {
        let mut state = lock(&self.state);
        state.connect_calls += 1;

        if state.connect_failures > 0 {
            state.connect_failures -= 1;
            return Err(StationError::Connection(format!(
                "mock hub refused connection to {}:{}",
                host, port
            )));
        }
        if state.connected {
            return Err(StationError::Connection(
                "already connected to hub".to_string(),
            ));
        }

        state.connected = true;
        drop(state);
        tracing::info!("Mock hub connected at {}:{}", host, port);
        self.emit(TransportEvent::Connected(ConnectReason::Request));
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(StationError::NotConnected);
        }
        state.connected = false;
        drop(state);
        self.emit(TransportEvent::Disconnected(DisconnectReason::Request));
        Ok(())
    }

    fn is_connected(&self) -> bool {
        lock(&self.state).connected
    }

    fn enumerate(&self) -> Result<()> {
        let mut state = lock(&self.state);
        state.enumerate_calls += 1;

        if state.enumerate_failures > 0 {
            state.enumerate_failures -= 1;
            return Err(StationError::Connection(
                "mock hub dropped enumerate request".to_string(),
            ));
        }
        if !state.connected {
            return Err(StationError::NotConnected);
        }

        let announcements: Vec<DeviceAnnouncement> = state
            .devices
            .iter()
            .map(|(uid, device)| {
                DeviceAnnouncement::new(
                    *uid,
                    device.device_identifier(),
                    EnumerationType::Available,
                )
            })
            .collect();
        drop(state);

        for announcement in announcements {
            self.emit(TransportEvent::Enumerate(announcement));
        }
        Ok(())
    }

    fn request(&self, request: Request) -> Result<Vec<u8>> {
        let mut state = lock(&self.state);
        if !state.connected {
            return Err(StationError::NotConnected);
        }
        state.requests.push(request.clone());

        let uid = request.uid;
        match state.devices.get_mut(&uid) {
            Some(MockDevice::Lcd(lcd)) => handle_lcd(lcd, uid, &request),
            Some(MockDevice::Sensor(sensor)) => handle_sensor(sensor, uid, &request),
            Some(MockDevice::Other(_)) => Err(device_error(
                uid,
                request.function_id,
                DeviceErrorCode::FunctionNotSupported,
            )),
            None => Err(StationError::Timeout {
                uid: uid.to_string(),
                function_id: request.function_id,
            }),
        }
    }

    fn events(&self) -> Receiver<TransportEvent> {
        self.events_rx.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::devices::{CharacterDisplay, PowerSensor};
    use std::sync::Arc;

    const LCD: Uid = Uid(100);
    const SENSOR: Uid = Uid(200);

    #[test]
    fn test_connect_failures_then_success() {
        let hub = MockHub::new();
        hub.fail_next_connects(2);

        assert!(hub.connect("localhost", 4223).is_err());
        assert!(hub.connect("localhost", 4223).is_err());
        assert!(hub.connect("localhost", 4223).is_ok());
        assert_eq!(hub.connect_calls(), 3);
        assert!(hub.is_connected());
    }

    #[test]
    fn test_enumerate_announces_every_device() {
        let hub = MockHub::new()
            .with_lcd(LCD)
            .with_sensor(SENSOR, 1, 2, 3)
            .with_device(Uid(300), 13);
        let events = hub.events();
        hub.connect("localhost", 4223).unwrap();
        hub.enumerate().unwrap();

        let announced: Vec<(Uid, u16)> = events
            .try_iter()
            .filter_map(|e| match e {
                TransportEvent::Enumerate(a) => Some((a.uid, a.device_identifier)),
                _ => None,
            })
            .collect();
        assert_eq!(
            announced,
            vec![(LCD, 212), (SENSOR, 227), (Uid(300), 13)]
        );
    }

    #[test]
    fn test_enumerate_requires_link() {
        let hub = MockHub::new();
        assert!(matches!(hub.enumerate(), Err(StationError::NotConnected)));
    }

    #[test]
    fn test_drivers_run_on_mock_hub() {
        let hub = Arc::new(MockHub::new().with_lcd(LCD).with_sensor(SENSOR, 120, 5000, 600));
        hub.connect("localhost", 4223).unwrap();

        let lcd = Lcd20x4::new(LCD, hub.clone());
        lcd.clear_display().unwrap();
        lcd.backlight_on().unwrap();
        lcd.write_line(2, 0, "Voltage: 5000 mV").unwrap();
        lcd.write_line(2, 17, "ok").unwrap();
        assert!(lcd.is_backlight_on().unwrap());

        let state = hub.lcd(LCD).unwrap();
        assert_eq!(state.lines[2], "Voltage: 5000 mV ok");
        assert_eq!(state.clear_count, 1);
        assert_eq!(state.writes.len(), 2);

        let sensor = VoltageCurrent::new(SENSOR, hub.clone());
        assert_eq!(sensor.current().unwrap(), 120);
        assert_eq!(sensor.voltage().unwrap(), 5000);
        assert_eq!(sensor.power().unwrap(), 600);
        sensor.set_current_callback_period(2000).unwrap();
        assert_eq!(hub.sensor(SENSOR).unwrap().callback_period_ms, 2000);
    }

    #[test]
    fn test_injected_sensor_failure() {
        let hub = Arc::new(MockHub::new().with_sensor(SENSOR, 120, 5000, 600));
        hub.connect("localhost", 4223).unwrap();
        hub.set_sensor_failure(SENSOR, VoltageCurrent::FUNCTION_GET_VOLTAGE, true);

        let sensor = VoltageCurrent::new(SENSOR, hub.clone());
        assert!(sensor.current().is_ok());
        assert!(sensor.voltage().unwrap_err().is_peripheral_class());

        hub.set_sensor_failure(SENSOR, VoltageCurrent::FUNCTION_GET_VOLTAGE, false);
        assert_eq!(sensor.voltage().unwrap(), 5000);
    }

    #[test]
    fn test_unknown_uid_times_out() {
        let hub = MockHub::new();
        hub.connect("localhost", 4223).unwrap();
        let err = hub.request(Request::getter(Uid(1), 1)).unwrap_err();
        assert!(matches!(err, StationError::Timeout { .. }));
    }

    #[test]
    fn test_link_simulation_events() {
        let hub = MockHub::new();
        let events = hub.events();
        hub.connect("localhost", 4223).unwrap();
        hub.simulate_link_drop();
        assert!(!hub.is_connected());
        hub.simulate_auto_reconnect();
        assert!(hub.is_connected());

        let received: Vec<TransportEvent> = events.try_iter().collect();
        assert_eq!(
            received,
            vec![
                TransportEvent::Connected(ConnectReason::Request),
                TransportEvent::Disconnected(DisconnectReason::Error),
                TransportEvent::Connected(ConnectReason::AutoReconnect),
            ]
        );
    }
}
