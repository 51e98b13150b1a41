//! Device drivers for the peripherals this station uses
//!
//! Each driver is a thin handle (uid + shared transport) that encodes function
//! calls into [`Request`]s and decodes the response payloads.
//!
//! - [`Lcd20x4`] - 4x20 character LCD with backlight and four buttons
//! - [`VoltageCurrent`] - current/voltage/power sensor
//!
//! The session never talks to the concrete drivers directly. It goes through
//! the [`CharacterDisplay`] and [`PowerSensor`] traits, and obtains handles
//! from a [`PeripheralFactory`], so tests can substitute mocks.

use crate::backend::packet::Uid;
use crate::backend::transport::{Request, Transport};
use crate::error::{Result, StationError};
use std::sync::Arc;

/// A display addressable by (line, position)
#[cfg_attr(test, mockall::automock)]
pub trait CharacterDisplay: Send + Sync {
    /// Write `text` starting at `position` on `line`
    fn write_line(&self, line: u8, position: u8, text: &str) -> Result<()>;

    /// Blank every line
    fn clear_display(&self) -> Result<()>;

    fn backlight_on(&self) -> Result<()>;

    fn backlight_off(&self) -> Result<()>;

    fn is_backlight_on(&self) -> Result<bool>;
}

/// A sensor with current, voltage and power channels
#[cfg_attr(test, mockall::automock)]
pub trait PowerSensor: Send + Sync {
    /// Current in mA
    fn current(&self) -> Result<i32>;

    /// Voltage in mV
    fn voltage(&self) -> Result<i32>;

    /// Power in mW
    fn power(&self) -> Result<i32>;

    /// Have the sensor push its current every `period_ms` (0 disables)
    fn set_current_callback_period(&self, period_ms: u32) -> Result<()>;
}

/// Creates device handles for announced uids
#[cfg_attr(test, mockall::automock)]
pub trait PeripheralFactory: Send + Sync {
    fn open_display(&self, uid: Uid) -> Result<Arc<dyn CharacterDisplay>>;

    fn open_sensor(&self, uid: Uid) -> Result<Arc<dyn PowerSensor>>;
}

fn decode_i32(uid: Uid, function_id: u8, payload: &[u8]) -> Result<i32> {
    payload
        .get(..4)
        .and_then(|b| b.try_into().ok())
        .map(i32::from_le_bytes)
        .ok_or_else(|| {
            StationError::Protocol(format!(
                "device {} function {} returned {} bytes, expected 4",
                uid,
                function_id,
                payload.len()
            ))
        })
}

fn decode_bool(uid: Uid, function_id: u8, payload: &[u8]) -> Result<bool> {
    payload.first().map(|&b| b != 0).ok_or_else(|| {
        StationError::Protocol(format!(
            "device {} function {} returned an empty payload",
            uid, function_id
        ))
    })
}

/// Encode text for the LCD's fixed 20-byte line buffer
///
/// ASCII passes through, anything else becomes `?`; the rest is zero padded.
pub fn encode_lcd_text(text: &str) -> [u8; Lcd20x4::COLUMNS] {
    let mut buffer = [0u8; Lcd20x4::COLUMNS];
    for (slot, c) in buffer.iter_mut().zip(text.chars()) {
        *slot = if c.is_ascii() && !c.is_ascii_control() {
            c as u8
        } else {
            b'?'
        };
    }
    buffer
}

/// LCD 20x4 bricklet
pub struct Lcd20x4 {
    uid: Uid,
    transport: Arc<dyn Transport>,
}

impl Lcd20x4 {
    pub const DEVICE_IDENTIFIER: u16 = 212;
    pub const ROWS: u8 = 4;
    pub const COLUMNS: usize = 20;

    pub const FUNCTION_WRITE_LINE: u8 = 1;
    pub const FUNCTION_CLEAR_DISPLAY: u8 = 2;
    pub const FUNCTION_BACKLIGHT_ON: u8 = 3;
    pub const FUNCTION_BACKLIGHT_OFF: u8 = 4;
    pub const FUNCTION_IS_BACKLIGHT_ON: u8 = 5;

    pub const CALLBACK_BUTTON_PRESSED: u8 = 9;
    pub const CALLBACK_BUTTON_RELEASED: u8 = 10;

    pub fn new(uid: Uid, transport: Arc<dyn Transport>) -> Self {
        Self { uid, transport }
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    fn call(&self, function_id: u8, payload: Vec<u8>) -> Result<Vec<u8>> {
        self.transport
            .request(Request::new(self.uid, function_id, payload))
    }
}

impl CharacterDisplay for Lcd20x4 {
    fn write_line(&self, line: u8, position: u8, text: &str) -> Result<()> {
        let mut payload = Vec::with_capacity(2 + Self::COLUMNS);
        payload.push(line);
        payload.push(position);
        payload.extend_from_slice(&encode_lcd_text(text));
        self.call(Self::FUNCTION_WRITE_LINE, payload).map(|_| ())
    }

    fn clear_display(&self) -> Result<()> {
        self.call(Self::FUNCTION_CLEAR_DISPLAY, Vec::new())
            .map(|_| ())
    }

    fn backlight_on(&self) -> Result<()> {
        self.call(Self::FUNCTION_BACKLIGHT_ON, Vec::new()).map(|_| ())
    }

    fn backlight_off(&self) -> Result<()> {
        self.call(Self::FUNCTION_BACKLIGHT_OFF, Vec::new())
            .map(|_| ())
    }

    fn is_backlight_on(&self) -> Result<bool> {
        let payload = self.call(Self::FUNCTION_IS_BACKLIGHT_ON, Vec::new())?;
        decode_bool(self.uid, Self::FUNCTION_IS_BACKLIGHT_ON, &payload)
    }
}

/// Voltage/Current bricklet
pub struct VoltageCurrent {
    uid: Uid,
    transport: Arc<dyn Transport>,
}

impl VoltageCurrent {
    pub const DEVICE_IDENTIFIER: u16 = 227;

    pub const FUNCTION_GET_CURRENT: u8 = 1;
    pub const FUNCTION_GET_VOLTAGE: u8 = 2;
    pub const FUNCTION_GET_POWER: u8 = 3;
    pub const FUNCTION_SET_CURRENT_CALLBACK_PERIOD: u8 = 8;

    pub const CALLBACK_CURRENT: u8 = 22;

    pub fn new(uid: Uid, transport: Arc<dyn Transport>) -> Self {
        Self { uid, transport }
    }

    pub fn uid(&self) -> Uid {
        self.uid
    }

    fn get_i32(&self, function_id: u8) -> Result<i32> {
        let payload = self
            .transport
            .request(Request::getter(self.uid, function_id))?;
        decode_i32(self.uid, function_id, &payload)
    }
}

impl PowerSensor for VoltageCurrent {
    fn current(&self) -> Result<i32> {
        self.get_i32(Self::FUNCTION_GET_CURRENT)
    }

    fn voltage(&self) -> Result<i32> {
        self.get_i32(Self::FUNCTION_GET_VOLTAGE)
    }

    fn power(&self) -> Result<i32> {
        self.get_i32(Self::FUNCTION_GET_POWER)
    }

    fn set_current_callback_period(&self, period_ms: u32) -> Result<()> {
        self.transport
            .request(Request::new(
                self.uid,
                Self::FUNCTION_SET_CURRENT_CALLBACK_PERIOD,
                period_ms.to_le_bytes().to_vec(),
            ))
            .map(|_| ())
    }
}

/// Factory producing real drivers on a shared transport
pub struct HubPeripherals {
    transport: Arc<dyn Transport>,
}

impl HubPeripherals {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }
}

impl PeripheralFactory for HubPeripherals {
    fn open_display(&self, uid: Uid) -> Result<Arc<dyn CharacterDisplay>> {
        Ok(Arc::new(Lcd20x4::new(uid, self.transport.clone())))
    }

    fn open_sensor(&self, uid: Uid) -> Result<Arc<dyn PowerSensor>> {
        Ok(Arc::new(VoltageCurrent::new(uid, self.transport.clone())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::transport::MockTransport;

    #[test]
    fn test_lcd_text_encoding() {
        let encoded = encode_lcd_text("Power: 600 mW");
        assert_eq!(&encoded[..13], b"Power: 600 mW");
        assert!(encoded[13..].iter().all(|&b| b == 0));

        let long = encode_lcd_text("0123456789012345678901234");
        assert_eq!(&long, b"01234567890123456789");

        let unicode = encode_lcd_text("µA");
        assert_eq!(&unicode[..2], b"?A");
    }

    #[test]
    fn test_write_line_payload() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .withf(|r| {
                r.uid == Uid(99)
                    && r.function_id == Lcd20x4::FUNCTION_WRITE_LINE
                    && r.payload.len() == 22
                    && r.payload[0] == 1
                    && r.payload[1] == 0
                    && &r.payload[2..17] == b"Current: 120 mA"
            })
            .times(1)
            .returning(|_| Ok(Vec::new()));

        let lcd = Lcd20x4::new(Uid(99), Arc::new(transport));
        lcd.write_line(1, 0, "Current: 120 mA").unwrap();
    }

    #[test]
    fn test_backlight_state_decoding() {
        let mut transport = MockTransport::new();
        transport
            .expect_request()
            .withf(|r| r.function_id == Lcd20x4::FUNCTION_IS_BACKLIGHT_ON)
            .returning(|_| Ok(vec![1]));

        let lcd = Lcd20x4::new(Uid(5), Arc::new(transport));
        assert!(lcd.is_backlight_on().unwrap());
    }

    #[test]
    fn test_sensor_channels() {
        let mut transport = MockTransport::new();
        transport.expect_request().returning(|r| {
            let value: i32 = match r.function_id {
                VoltageCurrent::FUNCTION_GET_CURRENT => 120,
                VoltageCurrent::FUNCTION_GET_VOLTAGE => 5000,
                VoltageCurrent::FUNCTION_GET_POWER => -600,
                _ => return Ok(Vec::new()),
            };
            Ok(value.to_le_bytes().to_vec())
        });

        let sensor = VoltageCurrent::new(Uid(8), Arc::new(transport));
        assert_eq!(sensor.current().unwrap(), 120);
        assert_eq!(sensor.voltage().unwrap(), 5000);
        assert_eq!(sensor.power().unwrap(), -600);
        sensor.set_current_callback_period(2000).unwrap();
    }

    #[test]
    fn test_short_response_is_protocol_error() {
        let mut transport = MockTransport::new();
        transport.expect_request().returning(|_| Ok(vec![1, 2]));

        let sensor = VoltageCurrent::new(Uid(8), Arc::new(transport));
        let err = sensor.current().unwrap_err();
        assert!(matches!(err, StationError::Protocol(_)));
        assert!(err.is_peripheral_class());
    }

    #[test]
    fn test_factory_builds_drivers_without_io() {
        // No expectations: opening a handle must not talk to the hub
        let transport = Arc::new(MockTransport::new());
        let factory = HubPeripherals::new(transport);
        assert!(factory.open_display(Uid(1)).is_ok());
        assert!(factory.open_sensor(Uid(2)).is_ok());
    }
}
