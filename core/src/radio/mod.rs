//! Radio Service contract
//!
//! The actual BLE work (scan callbacks, GATT server and client, advertisement
//! packets, payload encryption) is done by a platform Radio Service. This
//! module defines the capability surface the relay core depends on:
//!
//! - **RadioBinder**: starts an asynchronous bind and tears a handle down
//! - **RadioHandle**: the per-connection command surface
//! - **LinkEvent**: bind outcome and disconnect notifications, pushed by the platform
//! - **RadioEvent**: received payloads and discovered devices, pushed by the radio
//!
//! Platform callbacks are replaced by channels: the platform sends typed events,
//! the core consumes them on its own tasks.

pub mod loopback;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Channel the radio pushes payloads and discoveries onto
pub type RadioEventSender = mpsc::UnboundedSender<RadioEvent>;
pub type RadioEventReceiver = mpsc::UnboundedReceiver<RadioEvent>;

/// Channel the platform pushes bind/disconnect notifications onto
pub type LinkSender = mpsc::UnboundedSender<LinkEvent>;
pub type LinkReceiver = mpsc::UnboundedReceiver<LinkEvent>;

/// A peer seen while scanning
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Hardware address, e.g. `AA:BB:CC:DD:EE:FF`
    pub address: String,
    /// Advertised local name, if any
    pub name: Option<String>,
}

impl DiscoveredDevice {
    pub fn new(address: impl Into<String>, name: Option<String>) -> Self {
        Self {
            address: address.into(),
            name,
        }
    }
}

impl fmt::Display for DiscoveredDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{} {}", self.address, name),
            None => write!(f, "{}", self.address),
        }
    }
}

/// Events emitted by the radio towards the consumer
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RadioEvent {
    /// A relayed payload arrived (already decrypted by the radio)
    PayloadReceived(Vec<u8>),
    /// A matching device was found while scanning
    DeviceDiscovered(DiscoveredDevice),
}

/// Connection lifecycle notifications from the platform
pub enum LinkEvent {
    /// Bind completed; the handle is valid until the next `Disconnected`
    Bound(Arc<dyn RadioHandle>),
    /// Bind attempt failed
    BindFailed(String),
    /// The platform dropped the service connection
    Disconnected,
}

impl fmt::Debug for LinkEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LinkEvent::Bound(_) => write!(f, "Bound(..)"),
            LinkEvent::BindFailed(reason) => write!(f, "BindFailed({:?})", reason),
            LinkEvent::Disconnected => write!(f, "Disconnected"),
        }
    }
}

/// Per-connection command surface of the Radio Service.
///
/// Every method is fire-and-forget: the radio reports nothing back except
/// through the attached listener.
pub trait RadioHandle: Send + Sync {
    fn start_scan(&self);
    fn stop_scan(&self);
    fn start_advertise(&self, filter_value: &[u8]);
    fn stop_advertise(&self);
    /// Transmit `payload`, encrypted by the radio with `key`
    fn relay(&self, payload: &[u8], key: &[u8]);
    /// Snapshot of devices found so far
    fn discovered(&self) -> Vec<DiscoveredDevice>;
    /// Attach (or clear) the event channel for this handle
    fn set_listener(&self, listener: Option<RadioEventSender>);
}

/// Entry point to the Radio Service
pub trait RadioBinder: Send + Sync {
    /// Start an asynchronous bind. The outcome must be delivered on `link` as
    /// [`LinkEvent::Bound`] or [`LinkEvent::BindFailed`]; later connection loss
    /// as [`LinkEvent::Disconnected`]. Must not block.
    fn bind(&self, link: LinkSender);
    /// Release a handle obtained from a previous bind
    fn unbind(&self, handle: &dyn RadioHandle);
}

/// A single command issued against a bound handle
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum RadioCommand<'a> {
    StartScan,
    StopScan,
    StartAdvertise { filter_value: &'a [u8] },
    StopAdvertise,
    Relay { payload: &'a [u8], key: &'a [u8] },
}

impl RadioCommand<'_> {
    pub fn name(&self) -> &'static str {
        match self {
            RadioCommand::StartScan => "start_scan",
            RadioCommand::StopScan => "stop_scan",
            RadioCommand::StartAdvertise { .. } => "start_advertise",
            RadioCommand::StopAdvertise => "stop_advertise",
            RadioCommand::Relay { .. } => "relay",
        }
    }

    /// Execute this command on `handle`
    pub fn apply_to(&self, handle: &dyn RadioHandle) {
        match *self {
            RadioCommand::StartScan => handle.start_scan(),
            RadioCommand::StopScan => handle.stop_scan(),
            RadioCommand::StartAdvertise { filter_value } => handle.start_advertise(filter_value),
            RadioCommand::StopAdvertise => handle.stop_advertise(),
            RadioCommand::Relay { payload, key } => handle.relay(payload, key),
        }
    }
}

// Key bytes never reach logs
impl fmt::Debug for RadioCommand<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RadioCommand::StartAdvertise { filter_value } => f
                .debug_struct("StartAdvertise")
                .field("filter_value", &String::from_utf8_lossy(filter_value))
                .finish(),
            RadioCommand::Relay { payload, .. } => f
                .debug_struct("Relay")
                .field("payload_len", &payload.len())
                .finish_non_exhaustive(),
            other => write!(f, "{}", other.name()),
        }
    }
}
