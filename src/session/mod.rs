//! Session: the station's single long-lived object
//!
//! A [`Session`] ties the pieces together:
//!
//! - [`ConnectionManager`] keeps the link to the hub up
//! - [`DeviceRegistry`] binds the display and the sensor as they are announced
//! - [`Sampler`] reads the sensor and reports to the display and the log file
//!
//! Transport events are drained by a dispatcher thread (`hub-events`) started
//! in [`Session::start`]. Sampling is driven either by the caller's thread
//! sleeping between samples ([`DrivingMode::Poll`]) or by the sensor pushing
//! its current ([`DrivingMode::Push`]), in which case samples are taken on the
//! dispatcher thread and the caller just blocks in [`Session::run`].
//!
//! # Example
//!
//! ```ignore
//! use powerstation_rs::backend::{IpConnection, SystemClock};
//! use powerstation_rs::config::StationConfig;
//! use powerstation_rs::session::Session;
//! use std::sync::Arc;
//!
//! let session = Session::new(
//!     StationConfig::default(),
//!     Arc::new(IpConnection::new()),
//!     Arc::new(SystemClock),
//! );
//! session.start()?;
//! session.run()?;
//! ```

pub mod connection;
pub mod registry;
pub mod sink;

pub use connection::ConnectionManager;
pub use registry::{BindOutcome, Bound, DeviceRegistry};
pub use sink::{log_file_name, LogFile, Sampler};

use crate::backend::devices::{HubPeripherals, Lcd20x4, VoltageCurrent};
use crate::backend::lock;
use crate::backend::retry::Clock;
use crate::backend::transport::{Transport, TransportEvent};
use crate::config::{DrivingMode, StationConfig};
use crate::error::{Result, ResultExt, StationError};
use crate::types::{DeviceCallback, Reading, SessionState};
use crossbeam_channel::{bounded, select, unbounded, Receiver, Sender, TryRecvError};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread;

/// The running station
///
/// Cloning is cheap; clones share the same link, bindings and log file.
#[derive(Clone)]
pub struct Session {
    driving_mode: DrivingMode,
    clock: Arc<dyn Clock>,
    connection: Arc<ConnectionManager>,
    registry: Arc<DeviceRegistry>,
    sampler: Arc<Sampler>,
    /// Fatal errors raised on the dispatcher thread
    fatal_tx: Sender<StationError>,
    fatal_rx: Receiver<StationError>,
    /// Dropped on shutdown, which wakes every waiter on `stop_rx`
    stop_tx: Arc<Mutex<Option<Sender<()>>>>,
    stop_rx: Receiver<()>,
}

impl Session {
    /// Create a session; the log file name is fixed here from `clock.now()`
    pub fn new(config: StationConfig, transport: Arc<dyn Transport>, clock: Arc<dyn Clock>) -> Self {
        let factory = Arc::new(HubPeripherals::new(transport.clone()));
        let log = LogFile::in_dir(&config.log_dir, clock.now());
        tracing::info!("Measurements go to {}", log.path().display());

        let (fatal_tx, fatal_rx) = unbounded();
        let (stop_tx, stop_rx) = bounded(0);

        Self {
            driving_mode: config.driving_mode,
            connection: Arc::new(ConnectionManager::new(transport, clock.clone(), &config)),
            registry: Arc::new(DeviceRegistry::new(factory, config.driving_mode)),
            sampler: Arc::new(Sampler::new(clock.clone(), log)),
            clock,
            fatal_tx,
            fatal_rx,
            stop_tx: Arc::new(Mutex::new(Some(stop_tx))),
            stop_rx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.connection.state()
    }

    pub fn registry(&self) -> &DeviceRegistry {
        &self.registry
    }

    pub fn log_path(&self) -> &Path {
        self.sampler.log_file().path()
    }

    /// Start the event dispatcher, then connect and request discovery
    ///
    /// The dispatcher is running before the first enumerate so no
    /// announcement is missed.
    pub fn start(&self) -> Result<()> {
        let events = self.connection.transport().events();
        let session = self.clone();
        thread::Builder::new()
            .name("hub-events".to_string())
            .spawn(move || session.dispatch(events))
            .map_err(StationError::from)
            .context("Failed to start event dispatcher")?;

        self.connection.connect()?;
        self.connection.enumerate()
    }

    fn dispatch(&self, events: Receiver<TransportEvent>) {
        tracing::debug!("Event dispatcher started");
        loop {
            select! {
                recv(events) -> event => match event {
                    Ok(event) => {
                        if let Err(e) = self.handle_event(event) {
                            tracing::error!("Fatal error on event thread: {}", e);
                            let _ = self.fatal_tx.send(e);
                        }
                    }
                    Err(_) => break,
                },
                recv(self.stop_rx) -> _ => break,
            }
        }
        tracing::debug!("Event dispatcher stopped");
    }

    /// React to one transport event
    ///
    /// Connection and device failures are logged here. Only log file errors
    /// are returned.
    pub fn handle_event(&self, event: TransportEvent) -> Result<()> {
        match event {
            TransportEvent::Enumerate(announcement) => {
                self.registry.on_device_announced(&announcement);
            }
            TransportEvent::Connected(reason) => {
                if let Err(e) = self.connection.on_connected(reason) {
                    tracing::error!("Rediscovery after reconnect failed: {}", e);
                }
            }
            TransportEvent::Disconnected(reason) => self.connection.on_disconnected(reason),
            TransportEvent::Callback(callback) => return self.handle_callback(&callback),
        }
        Ok(())
    }

    fn handle_callback(&self, callback: &DeviceCallback) -> Result<()> {
        let uid = callback.uid;
        if callback.function_id == Lcd20x4::CALLBACK_BUTTON_RELEASED && self.registry.is_display(uid) {
            tracing::info!("Button {:?} released, toggling backlight", callback.payload.first());
            if let Err(e) = self.registry.toggle_backlight() {
                tracing::error!("Backlight toggle failed: {}", e);
            }
        } else if callback.function_id == VoltageCurrent::CALLBACK_CURRENT
            && self.registry.is_sensor(uid)
            && matches!(self.driving_mode, DrivingMode::Push { .. })
        {
            self.poll_once()?;
        } else {
            tracing::trace!("Ignoring callback {} from {}", callback.function_id, uid);
        }
        Ok(())
    }

    /// Take one sample if both devices are bound
    pub fn poll_once(&self) -> Result<Option<Reading>> {
        match self.registry.bound_pair() {
            Some((display, sensor)) => self
                .sampler
                .sample_and_report(display.as_ref(), sensor.as_ref()),
            None => {
                tracing::debug!("Display or sensor not bound yet, skipping sample");
                Ok(None)
            }
        }
    }

    fn is_stopped(&self) -> bool {
        matches!(self.stop_rx.try_recv(), Err(TryRecvError::Disconnected))
    }

    /// Drive sampling until shutdown or a fatal error
    pub fn run(&self) -> Result<()> {
        match self.driving_mode {
            DrivingMode::Poll { interval } => {
                tracing::info!("Polling every {:?}", interval);
                while !self.is_stopped() {
                    self.poll_once()?;
                    self.clock.sleep(interval);
                }
                Ok(())
            }
            DrivingMode::Push { period_ms } => {
                tracing::info!("Sampling on sensor pushes every {} ms", period_ms);
                select! {
                    recv(self.fatal_rx) -> e => match e {
                        Ok(e) => Err(e),
                        Err(_) => Ok(()),
                    },
                    recv(self.stop_rx) -> _ => Ok(()),
                }
            }
        }
    }

    /// Stop the dispatcher and `run`, then close the link (best effort)
    pub fn shutdown(&self) -> Result<()> {
        lock(&self.stop_tx).take();
        self.connection.disconnect()
    }
}
