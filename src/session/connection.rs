//! Connection manager
//!
//! Keeps the link to the hub up. `connect` and `enumerate` run under the
//! session's [`RetryPolicy`], so with the default policy they only return once
//! the hub has accepted them. Link events from the transport move the session
//! state:
//!
//! ```text
//! Disconnected -> Connecting -> Discovering -> Ready
//!                     ^                          |
//!                     +------ link dropped ------+
//! Ready -> Discovering -> Ready    (automatic reconnect)
//! ```

use crate::backend::retry::{Clock, RetryPolicy};
use crate::backend::transport::Transport;
use crate::config::StationConfig;
use crate::error::Result;
use crate::types::{ConnectReason, DisconnectReason, SessionState};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

pub struct ConnectionManager {
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    host: String,
    port: u16,
    state: AtomicU8,
}

impl ConnectionManager {
    pub fn new(transport: Arc<dyn Transport>, clock: Arc<dyn Clock>, config: &StationConfig) -> Self {
        Self {
            transport,
            clock,
            retry: config.retry,
            host: config.host.clone(),
            port: config.port,
            state: AtomicU8::new(SessionState::Disconnected.as_u8()),
        }
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    pub fn state(&self) -> SessionState {
        SessionState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn set_state(&self, state: SessionState) {
        let previous = SessionState::from_u8(self.state.swap(state.as_u8(), Ordering::SeqCst));
        if previous != state {
            tracing::info!("Session state: {} -> {}", previous, state);
        }
    }

    /// Open the link, retrying per policy
    ///
    /// Returns at once if the transport already has a link, which also covers
    /// an automatic reconnect landing between two attempts.
    pub fn connect(&self) -> Result<()> {
        self.set_state(SessionState::Connecting);
        let result = self.retry.run(self.clock.as_ref(), "Connect", || {
            if self.transport.is_connected() {
                return Ok(());
            }
            self.transport.connect(&self.host, self.port)
        });
        if result.is_err() {
            self.set_state(SessionState::Disconnected);
        }
        result
    }

    /// Request a discovery broadcast, retrying per policy
    pub fn enumerate(&self) -> Result<()> {
        self.set_state(SessionState::Discovering);
        self.retry
            .run(self.clock.as_ref(), "Enumerate", || self.transport.enumerate())?;
        self.set_state(SessionState::Ready);
        Ok(())
    }

    /// Handle a link-up event
    ///
    /// Bindings may be stale after an automatic reconnect, so discovery is
    /// requested again. Returns whether enumerate was re-issued.
    pub fn on_connected(&self, reason: ConnectReason) -> Result<bool> {
        match reason {
            ConnectReason::AutoReconnect => {
                tracing::info!("Auto reconnect to {}:{}", self.host, self.port);
                self.enumerate()?;
                Ok(true)
            }
            ConnectReason::Request => Ok(false),
        }
    }

    /// Handle a link-down event
    pub fn on_disconnected(&self, reason: DisconnectReason) {
        match reason {
            DisconnectReason::Request => self.set_state(SessionState::Disconnected),
            DisconnectReason::Error | DisconnectReason::Shutdown => {
                tracing::warn!("Link to hub lost ({:?}), waiting for reconnect", reason);
                self.set_state(SessionState::Connecting);
            }
        }
    }

    /// Close the link; a no-op without one
    pub fn disconnect(&self) -> Result<()> {
        let result = if self.transport.is_connected() {
            self.transport.disconnect()
        } else {
            Ok(())
        };
        self.set_state(SessionState::Disconnected);
        result
    }
}
