//! Mock construction helpers

#[cfg(feature = "mock-hub")]
use powerstation_rs::backend::{ManualClock, MockHub, Uid};
#[cfg(feature = "mock-hub")]
use powerstation_rs::{DrivingMode, Session, StationConfig};
#[cfg(feature = "mock-hub")]
use std::path::Path;
#[cfg(feature = "mock-hub")]
use std::sync::Arc;

#[cfg(feature = "mock-hub")]
pub const LCD_UID: Uid = Uid(0x5a1);
#[cfg(feature = "mock-hub")]
pub const SENSOR_UID: Uid = Uid(0x7c3);

/// Hub with the station's LCD and a sensor reporting 120 mA, 5000 mV, 600 mW
#[cfg(feature = "mock-hub")]
pub fn create_station_hub() -> Arc<MockHub> {
    Arc::new(
        MockHub::new()
            .with_lcd(LCD_UID)
            .with_sensor(SENSOR_UID, 120, 5000, 600),
    )
}

/// Session on `hub` with a manual clock at t=1700000000
#[cfg(feature = "mock-hub")]
pub fn create_test_session(
    hub: Arc<MockHub>,
    log_dir: &Path,
    driving_mode: DrivingMode,
) -> (Session, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::at_unix(1_700_000_000));
    let config = StationConfig {
        driving_mode,
        log_dir: log_dir.to_path_buf(),
        ..StationConfig::default()
    };
    (Session::new(config, hub, clock.clone()), clock)
}
