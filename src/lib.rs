//! # Power Station
//!
//! Samples a voltage/current sensor attached to a network peripheral hub,
//! shows the live values on a 20x4 character LCD and appends every sample to
//! a CSV log. The station is meant to run unattended: the link to the hub is
//! retried until it comes up and restored after drops, and devices are bound
//! whenever the hub announces them.
//!
//! ## Architecture
//!
//! - **Backend**: hub wire protocol, TCP transport with a receive thread,
//!   device drivers and retry policy
//! - **Session**: connection lifecycle, device bindings and the sampler
//! - **Communication**: transport events flow to the session over a
//!   crossbeam channel; bindings are shared through `arc-swap`
//!
//! ## Output
//!
//! Each sample becomes one line in `power_measurements_<start time>.csv`:
//!
//! ```text
//! 1700000000.0;120;5000;600
//! ```
//!
//! and four display rows: the time, current (mA), voltage (mV) and power (mW).
//!
//! ## Example
//!
//! ```ignore
//! use powerstation_rs::{IpConnection, Session, StationConfig, SystemClock};
//! use std::sync::Arc;
//!
//! fn main() -> powerstation_rs::Result<()> {
//!     let config = StationConfig::default();
//!     let transport = Arc::new(IpConnection::with_timeout(config.request_timeout));
//!     let session = Session::new(config, transport, Arc::new(SystemClock));
//!
//!     session.start()?;
//!     session.run()
//! }
//! ```

pub mod backend;
pub mod config;
pub mod error;
pub mod session;
pub mod types;

// Re-export commonly used types
pub use backend::{IpConnection, SystemClock, Transport, TransportEvent, Uid};
pub use config::{DrivingMode, StationConfig};
pub use error::{Result, StationError};
pub use session::Session;
pub use types::{Reading, SessionState};
