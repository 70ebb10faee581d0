//! Event delivery to the consumer
//!
//! The radio pushes [`RadioEvent`]s from whatever context it runs on. The
//! dispatcher funnels them through one channel and a single delivery task, so
//! the listener is invoked serially and in arrival order.

use crate::radio::{DiscoveredDevice, RadioEvent, RadioEventReceiver, RadioEventSender};
use crate::worker::{self, ReceiverLease, Slot};
use parking_lot::RwLock;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

/// Consumer-side callbacks.
///
/// Never invoked concurrently with itself; implementations need not be
/// reentrant.
pub trait RelayListener: Send + Sync {
    /// A relayed payload arrived
    fn on_payload(&self, payload: Vec<u8>);

    /// A device was discovered while scanning
    fn on_device_discovered(&self, _device: DiscoveredDevice) {}
}

type ListenerSlot = Arc<RwLock<Option<Arc<dyn RelayListener>>>>;

#[derive(Default)]
struct DeliveryCounters {
    payloads: AtomicU64,
    devices: AtomicU64,
}

pub struct EventDispatcher {
    tx: RadioEventSender,
    rx: Slot<RadioEventReceiver>,
    listener: ListenerSlot,
    counters: Arc<DeliveryCounters>,
}

impl EventDispatcher {
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: worker::slot(rx),
            listener: Arc::new(RwLock::new(None)),
            counters: Arc::new(DeliveryCounters::default()),
        }
    }

    /// Sender to hand to the radio
    pub fn sender(&self) -> RadioEventSender {
        self.tx.clone()
    }

    /// Register or replace the listener. Takes effect from the next event.
    pub fn set_listener(&self, listener: Option<Arc<dyn RelayListener>>) {
        *self.listener.write() = listener;
    }

    pub fn has_listener(&self) -> bool {
        self.listener.read().is_some()
    }

    pub fn payloads_delivered(&self) -> u64 {
        self.counters.payloads.load(Ordering::Relaxed)
    }

    pub fn devices_delivered(&self) -> u64 {
        self.counters.devices.load(Ordering::Relaxed)
    }

    /// The delivery loop. `None` while another runner is alive; dropping a
    /// runner makes the next call succeed again. The loop ends once every
    /// sender is gone.
    pub fn runner(&self) -> Option<impl Future<Output = ()> + Send + 'static> {
        let mut rx = ReceiverLease::take(&self.rx)?;
        let listener = self.listener.clone();
        let counters = self.counters.clone();

        Some(async move {
            while let Some(event) = rx.recv().await {
                deliver(&listener, &counters, event);
            }
            debug!("Event dispatcher stopped");
        })
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

fn deliver(slot: &ListenerSlot, counters: &DeliveryCounters, event: RadioEvent) {
    // Clone out so the listener runs without the slot lock held
    let listener = slot.read().clone();
    let Some(listener) = listener else {
        debug!("No listener registered, dropping {:?}", event);
        return;
    };

    match event {
        RadioEvent::PayloadReceived(payload) => {
            trace!("delivering payload ({} bytes)", payload.len());
            counters.payloads.fetch_add(1, Ordering::Relaxed);
            listener.on_payload(payload);
        }
        RadioEvent::DeviceDiscovered(device) => {
            trace!("delivering device {}", device);
            counters.devices.fetch_add(1, Ordering::Relaxed);
            listener.on_device_discovered(device);
        }
    }
}
