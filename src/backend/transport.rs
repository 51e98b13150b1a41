//! Transport trait for a unified hub interface
//!
//! This module provides a common trait for all hub transports, enabling both
//! the real TCP connection ([`IpConnection`](super::IpConnection)) and the
//! in-memory [`MockHub`](super::MockHub) used in tests.
//!
//! Notifications that the hub pushes on its own (enumeration results, link
//! state changes, device callbacks) are delivered as [`TransportEvent`]s on a
//! crossbeam channel. Every call to [`Transport::events`] returns a receiver
//! on the same stream, so there should be exactly one consumer.

use crate::backend::packet::Uid;
use crate::error::Result;
use crate::types::{ConnectReason, DeviceAnnouncement, DeviceCallback, DisconnectReason};
use crossbeam_channel::Receiver;

/// Notification pushed by the transport from its background thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// A device answered an enumeration (or was hot-plugged)
    Enumerate(DeviceAnnouncement),
    /// The link to the hub is up
    Connected(ConnectReason),
    /// The link to the hub went down
    Disconnected(DisconnectReason),
    /// A bound device pushed a callback packet
    Callback(DeviceCallback),
}

/// A function call addressed to one device
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub uid: Uid,
    pub function_id: u8,
    pub payload: Vec<u8>,
}

impl Request {
    pub fn new(uid: Uid, function_id: u8, payload: Vec<u8>) -> Self {
        Self {
            uid,
            function_id,
            payload,
        }
    }

    /// Request without parameters
    pub fn getter(uid: Uid, function_id: u8) -> Self {
        Self::new(uid, function_id, Vec::new())
    }
}

/// Unified interface for hub transports
///
/// Implementations must be `Send + Sync`: the session calls into the
/// transport both from the sampling thread and from the event dispatcher.
///
/// # Example
///
/// ```ignore
/// fn discover(transport: &dyn Transport) -> Result<()> {
///     transport.connect("localhost", 4223)?;
///     transport.enumerate()
/// }
/// ```
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send + Sync {
    /// Open the link to the hub
    fn connect(&self, host: &str, port: u16) -> Result<()>;

    /// Close the link and stop reconnecting
    fn disconnect(&self) -> Result<()>;

    /// Check if the link is currently up
    fn is_connected(&self) -> bool;

    /// Ask every attached device to announce itself
    ///
    /// Announcements arrive later as [`TransportEvent::Enumerate`].
    fn enumerate(&self) -> Result<()>;

    /// Call a device function and wait for its response payload
    fn request(&self, request: Request) -> Result<Vec<u8>>;

    /// Receiver for events pushed by the transport
    fn events(&self) -> Receiver<TransportEvent>;
}
