//! TCP transport to a peripheral hub
//!
//! This module provides the real [`Transport`] implementation. It owns one
//! TCP socket to the hub and a background receive thread that:
//!
//! - matches responses to waiting requests by (uid, function id, sequence)
//! - turns enumerate callbacks into [`TransportEvent::Enumerate`]
//! - forwards every other unsolicited packet as [`TransportEvent::Callback`]
//! - on link loss, emits [`TransportEvent::Disconnected`], reconnects to the
//!   last target and emits [`TransportEvent::Connected`] with
//!   [`ConnectReason::AutoReconnect`]
//!
//! # Example
//!
//! ```ignore
//! use powerstation_rs::backend::{IpConnection, Transport};
//!
//! let ipcon = IpConnection::new();
//! ipcon.connect("localhost", 4223)?;
//! ipcon.enumerate()?;
//!
//! for event in ipcon.events() {
//!     println!("{:?}", event);
//! }
//! ```

use crate::backend::lock;
use crate::backend::packet::{
    parse_enumerate_payload, Packet, PacketHeader, Uid, BROADCAST_UID, CALLBACK_ENUMERATE,
    FUNCTION_ENUMERATE, HEADER_LEN,
};
use crate::backend::transport::{Request, Transport, TransportEvent};
use crate::error::{DeviceErrorCode, Result, StationError};
use crate::types::{ConnectReason, DeviceCallback, DisconnectReason};
use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;

/// How long a request waits for its response
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_millis(2500);

/// Pause between reconnect attempts after a link drop
const RECONNECT_DELAY: Duration = Duration::from_millis(100);

/// (uid, function id, sequence number)
type PendingKey = (u32, u8, u8);

/// State shared between the caller side and the receive thread
struct Shared {
    /// Write half of the socket, `None` while the link is down
    stream: Mutex<Option<TcpStream>>,
    /// Last target passed to `connect`, used for reconnects
    target: Mutex<Option<(String, u16)>>,
    /// Requests waiting for a response
    pending: Mutex<HashMap<PendingKey, Sender<Packet>>>,
    /// Last sequence number handed out
    sequence: AtomicU8,
    /// Bumped on every connect/disconnect so stale receive threads exit
    generation: AtomicU64,
    /// Whether a dropped link is restored automatically
    auto_reconnect: AtomicBool,
    /// Event stream to the session
    events_tx: Sender<TransportEvent>,
    /// Response timeout for requests
    timeout: Duration,
}

impl Shared {
    fn emit(&self, event: TransportEvent) {
        let _ = self.events_tx.send(event);
    }

    fn is_current(&self, generation: u64) -> bool {
        self.generation.load(Ordering::SeqCst) == generation
    }

    /// Forget the socket and fail every waiting request
    fn drop_link(&self) {
        lock(&self.stream).take();
        lock(&self.pending).clear();
    }

    /// Route one received packet
    fn dispatch(&self, packet: Packet) {
        let header = packet.header;

        if header.is_callback() {
            if header.function_id == CALLBACK_ENUMERATE {
                match parse_enumerate_payload(&packet.payload) {
                    Ok(announcement) => self.emit(TransportEvent::Enumerate(announcement)),
                    Err(e) => tracing::warn!("Ignoring malformed enumerate callback: {}", e),
                }
            } else {
                self.emit(TransportEvent::Callback(DeviceCallback {
                    uid: Uid(header.uid),
                    function_id: header.function_id,
                    payload: packet.payload,
                }));
            }
            return;
        }

        let key = (header.uid, header.function_id, header.sequence);
        match lock(&self.pending).remove(&key) {
            Some(waiter) => {
                let _ = waiter.send(packet);
            }
            None => tracing::debug!(
                "Dropping unmatched response from {} (function {}, seq {})",
                Uid(header.uid),
                header.function_id,
                header.sequence
            ),
        }
    }

    /// Retry the last target until it answers or the link is abandoned
    fn reconnect(&self, generation: u64) -> Option<TcpStream> {
        let (host, port) = lock(&self.target).clone()?;

        loop {
            thread::sleep(RECONNECT_DELAY);
            if !self.is_current(generation) || !self.auto_reconnect.load(Ordering::SeqCst) {
                return None;
            }

            match open_stream(&host, port) {
                Ok((writer, reader)) => {
                    *lock(&self.stream) = Some(writer);
                    if !self.is_current(generation) {
                        // disconnect() raced with us
                        if let Some(stream) = lock(&self.stream).take() {
                            let _ = stream.shutdown(Shutdown::Both);
                        }
                        return None;
                    }
                    tracing::info!("Reconnected to {}:{}", host, port);
                    return Some(reader);
                }
                Err(e) => tracing::debug!("Reconnect to {}:{} failed: {}", host, port, e),
            }
        }
    }
}

/// Open a socket and split it into write and read halves
fn open_stream(host: &str, port: u16) -> Result<(TcpStream, TcpStream)> {
    let stream = TcpStream::connect((host, port)).map_err(StationError::Socket)?;
    if let Err(e) = stream.set_nodelay(true) {
        tracing::warn!("Failed to disable Nagle on hub socket: {}", e);
    }
    let reader = stream.try_clone().map_err(StationError::Socket)?;
    Ok((stream, reader))
}

/// Read exactly one packet from the socket
fn read_packet(reader: &mut impl Read) -> io::Result<Packet> {
    let mut header_bytes = [0u8; HEADER_LEN];
    reader.read_exact(&mut header_bytes)?;
    let header = PacketHeader::decode(&header_bytes);

    if usize::from(header.length) < HEADER_LEN {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!("packet length {} shorter than header", header.length),
        ));
    }

    let mut payload = vec![0u8; header.payload_len()];
    reader.read_exact(&mut payload)?;
    Ok(Packet { header, payload })
}

/// Receive thread body; survives link drops while auto-reconnect is on
fn receive_loop(shared: Arc<Shared>, mut reader: TcpStream, generation: u64) {
    loop {
        match read_packet(&mut reader) {
            Ok(packet) => {
                tracing::trace!(
                    "Received packet from {} (function {}, seq {})",
                    Uid(packet.header.uid),
                    packet.header.function_id,
                    packet.header.sequence
                );
                shared.dispatch(packet);
            }
            Err(e) => {
                if !shared.is_current(generation) {
                    return;
                }

                let reason = if e.kind() == io::ErrorKind::UnexpectedEof {
                    DisconnectReason::Shutdown
                } else {
                    DisconnectReason::Error
                };
                tracing::warn!("Hub link lost ({:?}): {}", reason, e);
                shared.drop_link();
                shared.emit(TransportEvent::Disconnected(reason));

                if !shared.auto_reconnect.load(Ordering::SeqCst) {
                    return;
                }
                match shared.reconnect(generation) {
                    Some(new_reader) => {
                        reader = new_reader;
                        shared.emit(TransportEvent::Connected(ConnectReason::AutoReconnect));
                    }
                    None => return,
                }
            }
        }
    }
}

/// TCP connection to a peripheral hub
pub struct IpConnection {
    shared: Arc<Shared>,
    events_rx: Receiver<TransportEvent>,
}

impl IpConnection {
    /// Create a disconnected transport with the default response timeout
    pub fn new() -> Self {
        Self::with_timeout(DEFAULT_RESPONSE_TIMEOUT)
    }

    /// Create a disconnected transport with a custom response timeout
    pub fn with_timeout(timeout: Duration) -> Self {
        let (events_tx, events_rx) = unbounded();
        Self {
            shared: Arc::new(Shared {
                stream: Mutex::new(None),
                target: Mutex::new(None),
                pending: Mutex::new(HashMap::new()),
                sequence: AtomicU8::new(0),
                generation: AtomicU64::new(0),
                auto_reconnect: AtomicBool::new(true),
                events_tx,
                timeout,
            }),
            events_rx,
        }
    }

    /// Enable or disable automatic reconnects after a link drop
    pub fn set_auto_reconnect(&self, enabled: bool) {
        self.shared.auto_reconnect.store(enabled, Ordering::SeqCst);
    }

    /// Next sequence number in 1..=15
    fn next_sequence(&self) -> u8 {
        let previous = self
            .shared
            .sequence
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |s| Some(s % 15 + 1))
            .unwrap_or_else(|s| s);
        previous % 15 + 1
    }

    fn send(&self, packet: &Packet) -> Result<()> {
        let mut guard = lock(&self.shared.stream);
        let stream = guard.as_mut().ok_or(StationError::NotConnected)?;
        stream
            .write_all(&packet.encode())
            .map_err(StationError::Socket)
    }
}

impl Default for IpConnection {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for IpConnection {
    fn connect(&self, host: &str, port: u16) -> Result<()> {
        if self.is_connected() {
            return Err(StationError::Connection(
                "already connected to hub".to_string(),
            ));
        }

        let (writer, reader) = open_stream(host, port)?;
        *lock(&self.shared.target) = Some((host.to_string(), port));
        *lock(&self.shared.stream) = Some(writer);
        let generation = self.shared.generation.fetch_add(1, Ordering::SeqCst) + 1;

        let shared = self.shared.clone();
        let spawned = thread::Builder::new()
            .name("hub-receiver".to_string())
            .spawn(move || receive_loop(shared, reader, generation));
        if let Err(e) = spawned {
            self.shared.drop_link();
            return Err(StationError::Socket(e));
        }

        tracing::info!("Connected to hub at {}:{}", host, port);
        self.shared
            .emit(TransportEvent::Connected(ConnectReason::Request));
        Ok(())
    }

    fn disconnect(&self) -> Result<()> {
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        let stream = lock(&self.shared.stream).take();
        lock(&self.shared.pending).clear();

        match stream {
            Some(stream) => {
                let _ = stream.shutdown(Shutdown::Both);
                tracing::info!("Disconnected from hub");
                self.shared
                    .emit(TransportEvent::Disconnected(DisconnectReason::Request));
                Ok(())
            }
            None => Err(StationError::NotConnected),
        }
    }

    fn is_connected(&self) -> bool {
        lock(&self.shared.stream).is_some()
    }

    fn enumerate(&self) -> Result<()> {
        let packet = Packet::request(
            BROADCAST_UID,
            FUNCTION_ENUMERATE,
            self.next_sequence(),
            false,
            Vec::new(),
        )?;
        self.send(&packet)
    }

    fn request(&self, request: Request) -> Result<Vec<u8>> {
        let sequence = self.next_sequence();
        let uid = request.uid;
        let function_id = request.function_id;
        let packet = Packet::request(uid.raw(), function_id, sequence, true, request.payload)?;
        let key = (uid.raw(), function_id, sequence);

        let (tx, rx) = bounded(1);
        lock(&self.shared.pending).insert(key, tx);
        if let Err(e) = self.send(&packet) {
            lock(&self.shared.pending).remove(&key);
            return Err(e);
        }

        let response = match rx.recv_timeout(self.shared.timeout) {
            Ok(response) => response,
            Err(RecvTimeoutError::Timeout) => {
                lock(&self.shared.pending).remove(&key);
                return Err(StationError::Timeout {
                    uid: uid.to_string(),
                    function_id,
                });
            }
            Err(RecvTimeoutError::Disconnected) => return Err(StationError::NotConnected),
        };

        if let Some(code) = DeviceErrorCode::from_bits(response.header.error_code) {
            return Err(StationError::Peripheral {
                uid: uid.to_string(),
                function_id,
                code,
            });
        }

        Ok(response.payload)
    }

    fn events(&self) -> Receiver<TransportEvent> {
        self.events_rx.clone()
    }
}

impl Drop for IpConnection {
    fn drop(&mut self) {
        self.shared.auto_reconnect.store(false, Ordering::SeqCst);
        self.shared.generation.fetch_add(1, Ordering::SeqCst);
        if let Some(stream) = lock(&self.shared.stream).take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}
