//! Device registry
//!
//! Binds the two roles the station needs, "the display" and "the power
//! sensor", to physical devices as the hub announces them. Bindings live in
//! [`ArcSwapOption`] slots: the event thread swaps them, the sampling path
//! loads them without locking. A later announcement of the same kind simply
//! overwrites the previous binding.

use crate::backend::devices::{
    CharacterDisplay, Lcd20x4, PeripheralFactory, PowerSensor, VoltageCurrent,
};
use crate::backend::packet::Uid;
use crate::config::DrivingMode;
use crate::error::Result;
use crate::types::{DeviceAnnouncement, Role};
use arc_swap::ArcSwapOption;
use std::sync::Arc;

/// A device handle together with the uid it was bound from
pub struct Bound<T: ?Sized> {
    pub uid: Uid,
    pub device: Arc<T>,
}

/// What an announcement did to the registry
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindOutcome {
    /// The role now points at the announced device
    Bound(Role),
    /// Initialising the device failed; the role is unset
    Failed(Role),
    /// Wrong enumeration type or a device kind the station does not use
    Ignored,
}

pub struct DeviceRegistry {
    factory: Arc<dyn PeripheralFactory>,
    driving_mode: DrivingMode,
    display: ArcSwapOption<Bound<dyn CharacterDisplay>>,
    sensor: ArcSwapOption<Bound<dyn PowerSensor>>,
}

impl DeviceRegistry {
    pub fn new(factory: Arc<dyn PeripheralFactory>, driving_mode: DrivingMode) -> Self {
        Self {
            factory,
            driving_mode,
            display: ArcSwapOption::empty(),
            sensor: ArcSwapOption::empty(),
        }
    }

    /// React to a device announcement
    pub fn on_device_announced(&self, announcement: &DeviceAnnouncement) -> BindOutcome {
        tracing::debug!(
            "Device {} (kind {}) announced: {:?}",
            announcement.uid,
            announcement.device_identifier,
            announcement.enumeration_type
        );
        if !announcement.enumeration_type.triggers_binding() {
            return BindOutcome::Ignored;
        }

        let uid = announcement.uid;
        match announcement.device_identifier {
            Lcd20x4::DEVICE_IDENTIFIER => {
                tracing::info!("Found LCD 20x4 {}", uid);
                match self.init_display(uid) {
                    Ok(device) => {
                        self.display.store(Some(Arc::new(Bound { uid, device })));
                        tracing::info!("LCD 20x4 {} initialized", uid);
                        BindOutcome::Bound(Role::Display)
                    }
                    Err(e) => {
                        tracing::error!("LCD 20x4 {} init failed: {}", uid, e);
                        self.display.store(None);
                        BindOutcome::Failed(Role::Display)
                    }
                }
            }
            VoltageCurrent::DEVICE_IDENTIFIER => {
                tracing::info!("Found voltage/current sensor {}", uid);
                match self.init_sensor(uid) {
                    Ok(device) => {
                        self.sensor.store(Some(Arc::new(Bound { uid, device })));
                        tracing::info!("Voltage/current sensor {} initialized", uid);
                        BindOutcome::Bound(Role::Sensor)
                    }
                    Err(e) => {
                        tracing::error!("Voltage/current sensor {} init failed: {}", uid, e);
                        self.sensor.store(None);
                        BindOutcome::Failed(Role::Sensor)
                    }
                }
            }
            _ => BindOutcome::Ignored,
        }
    }

    fn init_display(&self, uid: Uid) -> Result<Arc<dyn CharacterDisplay>> {
        let display = self.factory.open_display(uid)?;
        display.clear_display()?;
        display.backlight_on()?;
        Ok(display)
    }

    fn init_sensor(&self, uid: Uid) -> Result<Arc<dyn PowerSensor>> {
        let sensor = self.factory.open_sensor(uid)?;
        if let Some(period_ms) = self.driving_mode.callback_period_ms() {
            sensor.set_current_callback_period(period_ms)?;
        }
        Ok(sensor)
    }

    /// Currently bound display
    pub fn display(&self) -> Option<Arc<dyn CharacterDisplay>> {
        self.display.load_full().map(|b| b.device.clone())
    }

    /// Currently bound sensor
    pub fn sensor(&self) -> Option<Arc<dyn PowerSensor>> {
        self.sensor.load_full().map(|b| b.device.clone())
    }

    /// Both handles, only when both roles are bound
    pub fn bound_pair(&self) -> Option<(Arc<dyn CharacterDisplay>, Arc<dyn PowerSensor>)> {
        Some((self.display()?, self.sensor()?))
    }

    /// Whether `uid` is the bound display
    pub fn is_display(&self, uid: Uid) -> bool {
        self.display.load_full().is_some_and(|b| b.uid == uid)
    }

    /// Whether `uid` is the bound sensor
    pub fn is_sensor(&self, uid: Uid) -> bool {
        self.sensor.load_full().is_some_and(|b| b.uid == uid)
    }

    /// Flip the display backlight; a no-op while no display is bound
    pub fn toggle_backlight(&self) -> Result<()> {
        let Some(display) = self.display() else {
            return Ok(());
        };
        if display.is_backlight_on()? {
            display.backlight_off()
        } else {
            display.backlight_on()
        }
    }
}
