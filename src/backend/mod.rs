//! Backend module for talking to the peripheral hub
//!
//! Everything below the session layer lives here: the wire codec, the TCP
//! transport with its receive thread, the device drivers and the retry
//! machinery.
//!
//! # Components
//!
//! - [`Transport`] - Unified hub interface, implemented by [`IpConnection`]
//! - [`IpConnection`] - Real TCP link with auto-reconnect
//! - [`MockHub`] - In-memory hub for testing without hardware (feature-gated)
//! - [`Lcd20x4`] / [`VoltageCurrent`] - Device drivers on top of a transport
//! - [`RetryPolicy`] / [`Clock`] - Fixed-delay retries against an injectable clock
//! - [`packet`] - Packet header, payload helpers and uid encoding
//!
//! # Example
//!
//! ```ignore
//! use powerstation_rs::backend::{IpConnection, Transport, TransportEvent};
//!
//! let ipcon = IpConnection::new();
//! ipcon.connect("localhost", 4223)?;
//! ipcon.enumerate()?;
//!
//! for event in ipcon.events() {
//!     if let TransportEvent::Enumerate(announcement) = event {
//!         println!("{} is a {}", announcement.uid, announcement.device_identifier);
//!     }
//! }
//! ```

pub mod devices;
pub mod ip_connection;
#[cfg(any(test, feature = "mock-hub"))]
pub mod mock_hub;
pub mod packet;
pub mod retry;
pub mod transport;

pub use devices::{
    encode_lcd_text, CharacterDisplay, HubPeripherals, Lcd20x4, PeripheralFactory, PowerSensor,
    VoltageCurrent,
};
pub use ip_connection::{IpConnection, DEFAULT_RESPONSE_TIMEOUT};
#[cfg(any(test, feature = "mock-hub"))]
pub use mock_hub::{MockHub, MockLcd, MockSensor};
pub use packet::{Packet, PacketHeader, Uid};
#[cfg(any(test, feature = "mock-hub"))]
pub use retry::ManualClock;
pub use retry::{Clock, RetryPolicy, SystemClock};
pub use transport::{Request, Transport, TransportEvent};

use std::sync::{Mutex, MutexGuard, PoisonError};

/// Lock a mutex, recovering the guard if another thread panicked while
/// holding it
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_lock_recovers_from_poison() {
        let shared = Arc::new(Mutex::new(1));
        let clone = shared.clone();
        let _ = std::thread::spawn(move || {
            let _guard = clone.lock().unwrap();
            panic!("poison the mutex");
        })
        .join();

        assert!(shared.is_poisoned());
        *lock(&shared) += 1;
        assert_eq!(*lock(&shared), 2);
    }
}
