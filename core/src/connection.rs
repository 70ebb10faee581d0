//! Radio Service connection lifecycle
//!
//! Tracks the bind state of the Radio Service and is the only place commands
//! reach a radio handle. Commands issued while not bound are dropped (and
//! logged); the mode state machine keeps the intent so it can be replayed
//! once a new handle arrives.

use crate::radio::{
    DiscoveredDevice, LinkSender, RadioBinder, RadioCommand, RadioEventSender, RadioHandle,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Bind state of the Radio Service
pub enum ConnectionState {
    /// Never bound, or released by an explicit shutdown
    Unbound,
    /// Bind requested, waiting for the platform
    Binding,
    /// Live handle
    Bound(Arc<dyn RadioHandle>),
    /// Bind failed or the platform dropped the connection
    Disconnected,
}

impl ConnectionState {
    pub fn status(&self) -> ConnectionStatus {
        match self {
            ConnectionState::Unbound => ConnectionStatus::Unbound,
            ConnectionState::Binding => ConnectionStatus::Binding,
            ConnectionState::Bound(_) => ConnectionStatus::Bound,
            ConnectionState::Disconnected => ConnectionStatus::Disconnected,
        }
    }
}

impl fmt::Debug for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.status())
    }
}

/// Handle-free view of [`ConnectionState`] for callers and logs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    Unbound,
    Binding,
    Bound,
    Disconnected,
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Unbound => write!(f, "Unbound"),
            ConnectionStatus::Binding => write!(f, "Binding"),
            ConnectionStatus::Bound => write!(f, "Bound"),
            ConnectionStatus::Disconnected => write!(f, "Disconnected"),
        }
    }
}

pub struct RadioServiceConnection {
    binder: Arc<dyn RadioBinder>,
    link: LinkSender,
    state: ConnectionState,
    /// Re-attached to every new handle
    listener: Option<RadioEventSender>,
    dropped: AtomicU64,
}

impl RadioServiceConnection {
    pub fn new(binder: Arc<dyn RadioBinder>, link: LinkSender) -> Self {
        Self {
            binder,
            link,
            state: ConnectionState::Unbound,
            listener: None,
            dropped: AtomicU64::new(0),
        }
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state.status()
    }

    pub fn is_bound(&self) -> bool {
        matches!(self.state, ConnectionState::Bound(_))
    }

    /// Store the listener and attach it to the current handle, if any
    pub fn set_listener(&mut self, listener: Option<RadioEventSender>) {
        if let ConnectionState::Bound(handle) = &self.state {
            handle.set_listener(listener.clone());
        }
        self.listener = listener;
    }

    /// Request a bind. Returns `false` without doing anything when already
    /// bound or binding.
    pub fn connect(&mut self) -> bool {
        match self.state {
            ConnectionState::Bound(_) | ConnectionState::Binding => {
                debug!("connect ignored, connection is {}", self.status());
                false
            }
            ConnectionState::Unbound | ConnectionState::Disconnected => {
                info!("Binding radio service");
                self.state = ConnectionState::Binding;
                self.binder.bind(self.link.clone());
                true
            }
        }
    }

    /// Accept a handle from a completed bind.
    ///
    /// A handle that arrives after an explicit release, or while another
    /// handle is already live, is handed straight back to the binder and
    /// `false` is returned.
    pub fn on_bound(&mut self, handle: Arc<dyn RadioHandle>) -> bool {
        match self.state {
            ConnectionState::Unbound => {
                debug!("stale bind completed after release, unbinding");
                self.binder.unbind(handle.as_ref());
                return false;
            }
            ConnectionState::Bound(_) => {
                debug!("surplus bind completed while bound, unbinding");
                self.binder.unbind(handle.as_ref());
                return false;
            }
            ConnectionState::Binding | ConnectionState::Disconnected => {}
        }

        handle.set_listener(self.listener.clone());
        self.state = ConnectionState::Bound(handle);
        info!("Radio service bound");
        true
    }

    /// Returns `true` if the state changed
    pub fn on_bind_failed(&mut self, reason: &str) -> bool {
        match self.state {
            ConnectionState::Binding => {
                warn!("Radio service bind failed: {}", reason);
                self.state = ConnectionState::Disconnected;
                true
            }
            _ => {
                debug!("bind failure ignored while {}: {}", self.status(), reason);
                false
            }
        }
    }

    /// Returns `true` if the state changed
    pub fn on_disconnected(&mut self) -> bool {
        match self.state {
            ConnectionState::Bound(_) | ConnectionState::Binding => {
                warn!("Radio service disconnected");
                self.state = ConnectionState::Disconnected;
                true
            }
            _ => false,
        }
    }

    /// Issue a command to the bound handle. Returns `false` if the command was
    /// dropped because nothing is bound.
    pub fn issue(&self, command: RadioCommand<'_>) -> bool {
        match &self.state {
            ConnectionState::Bound(handle) => {
                debug!("issuing {:?}", command);
                command.apply_to(handle.as_ref());
                true
            }
            other => {
                debug!("{} dropped, connection is {:?}", command.name(), other);
                self.dropped.fetch_add(1, Ordering::Relaxed);
                false
            }
        }
    }

    /// Commands dropped because nothing was bound
    pub fn dropped_commands(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Devices known to the bound radio; empty when not bound
    pub fn discovered(&self) -> Vec<DiscoveredDevice> {
        match &self.state {
            ConnectionState::Bound(handle) => handle.discovered(),
            _ => Vec::new(),
        }
    }

    /// Release the handle and return to `Unbound`
    pub fn release(&mut self) {
        let previous = std::mem::replace(&mut self.state, ConnectionState::Unbound);
        if let ConnectionState::Bound(handle) = previous {
            handle.set_listener(None);
            self.binder.unbind(handle.as_ref());
            info!("Radio service released");
        }
    }
}
