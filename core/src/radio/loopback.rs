//! In-process Radio Service
//!
//! `LoopbackRadio` stands in for the platform radio on desktop and in tests.
//! It records every command it receives, echoes relayed payloads back to the
//! attached listener as if a peer had forwarded them, and lets the caller
//! inject discoveries, fail binds or drop the link.

use super::{
    DiscoveredDevice, LinkEvent, LinkSender, RadioBinder, RadioEvent, RadioEventSender, RadioHandle,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tracing::debug;

/// Owned copy of a command as the loopback radio saw it
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecordedCommand {
    StartScan,
    StopScan,
    StartAdvertise(Vec<u8>),
    StopAdvertise,
    Relay { payload: Vec<u8>, key: Vec<u8> },
}

/// State shared by the binder and every handle it hands out
struct Shared {
    commands: Mutex<Vec<RecordedCommand>>,
    devices: Mutex<Vec<DiscoveredDevice>>,
    link: Mutex<Option<LinkSender>>,
    /// Handles bound and not yet released, oldest first
    live: Mutex<Vec<Arc<LoopbackHandle>>>,
    pending_failures: AtomicU32,
    binds: AtomicU32,
    unbinds: AtomicU32,
    auto_complete: AtomicBool,
    echo: AtomicBool,
}

/// Loopback implementation of [`RadioBinder`]; clones share state
#[derive(Clone)]
pub struct LoopbackRadio {
    shared: Arc<Shared>,
}

impl LoopbackRadio {
    /// Binds complete immediately and relayed payloads are echoed back
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                commands: Mutex::new(Vec::new()),
                devices: Mutex::new(Vec::new()),
                link: Mutex::new(None),
                live: Mutex::new(Vec::new()),
                pending_failures: AtomicU32::new(0),
                binds: AtomicU32::new(0),
                unbinds: AtomicU32::new(0),
                auto_complete: AtomicBool::new(true),
                echo: AtomicBool::new(true),
            }),
        }
    }

    /// Leave binds pending until [`LoopbackRadio::complete_bind`] is called
    pub fn manual_bind(self) -> Self {
        self.shared.auto_complete.store(false, Ordering::SeqCst);
        self
    }

    /// Stop echoing relayed payloads back to the listener
    pub fn without_echo(self) -> Self {
        self.shared.echo.store(false, Ordering::SeqCst);
        self
    }

    /// Fail the next `count` bind attempts
    pub fn fail_next_binds(&self, count: u32) {
        self.shared.pending_failures.store(count, Ordering::SeqCst);
    }

    /// Finish a pending bind by handing a fresh handle to the core
    pub fn complete_bind(&self) -> bool {
        let link = self.shared.link.lock().clone();
        match link {
            Some(link) => {
                let handle = Arc::new(LoopbackHandle {
                    shared: self.shared.clone(),
                    listener: Mutex::new(None),
                    scanning: AtomicBool::new(false),
                    advertising: AtomicBool::new(false),
                });
                self.shared.live.lock().push(handle.clone());
                link.send(LinkEvent::Bound(handle)).is_ok()
            }
            None => false,
        }
    }

    /// Simulate the platform killing the service connection
    pub fn drop_link(&self) -> bool {
        for handle in self.shared.live.lock().drain(..) {
            handle.set_listener(None);
        }
        match self.shared.link.lock().as_ref() {
            Some(link) => link.send(LinkEvent::Disconnected).is_ok(),
            None => false,
        }
    }

    /// Deliver a payload as if a remote peer had sent it
    pub fn inject_payload(&self, payload: &[u8]) -> bool {
        self.emit(RadioEvent::PayloadReceived(payload.to_vec()))
    }

    /// Record a discovery and notify the listener
    pub fn inject_device(&self, device: DiscoveredDevice) -> bool {
        {
            let mut devices = self.shared.devices.lock();
            if !devices.contains(&device) {
                devices.push(device.clone());
            }
        }
        self.emit(RadioEvent::DeviceDiscovered(device))
    }

    pub fn commands(&self) -> Vec<RecordedCommand> {
        self.shared.commands.lock().clone()
    }

    pub fn clear_commands(&self) {
        self.shared.commands.lock().clear();
    }

    pub fn bind_count(&self) -> u32 {
        self.shared.binds.load(Ordering::SeqCst)
    }

    pub fn unbind_count(&self) -> u32 {
        self.shared.unbinds.load(Ordering::SeqCst)
    }

    /// Handles bound and not yet unbound or dropped
    pub fn live_handles(&self) -> usize {
        self.shared.live.lock().len()
    }

    pub fn is_scanning(&self) -> bool {
        self.current()
            .map(|h| h.scanning.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    pub fn is_advertising(&self) -> bool {
        self.current()
            .map(|h| h.advertising.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Most recently bound live handle
    fn current(&self) -> Option<Arc<LoopbackHandle>> {
        self.shared.live.lock().last().cloned()
    }

    fn emit(&self, event: RadioEvent) -> bool {
        let handle = self.current();
        match handle {
            Some(handle) => handle.emit(event),
            None => false,
        }
    }
}

impl Default for LoopbackRadio {
    fn default() -> Self {
        Self::new()
    }
}

impl RadioBinder for LoopbackRadio {
    fn bind(&self, link: LinkSender) {
        self.shared.binds.fetch_add(1, Ordering::SeqCst);
        *self.shared.link.lock() = Some(link.clone());

        let failures = self.shared.pending_failures.load(Ordering::SeqCst);
        if failures > 0 {
            self.shared.pending_failures.store(failures - 1, Ordering::SeqCst);
            let _ = link.send(LinkEvent::BindFailed("loopback bind refused".to_string()));
            return;
        }

        if self.shared.auto_complete.load(Ordering::SeqCst) {
            self.complete_bind();
        }
    }

    fn unbind(&self, handle: &dyn RadioHandle) {
        self.shared.unbinds.fetch_add(1, Ordering::SeqCst);
        let target = handle as *const dyn RadioHandle as *const ();
        let mut live = self.shared.live.lock();
        if let Some(pos) = live
            .iter()
            .position(|h| Arc::as_ptr(h) as *const () == target)
        {
            live.remove(pos).set_listener(None);
        }
    }
}

/// Handle produced by one successful loopback bind
pub struct LoopbackHandle {
    shared: Arc<Shared>,
    listener: Mutex<Option<RadioEventSender>>,
    scanning: AtomicBool,
    advertising: AtomicBool,
}

impl LoopbackHandle {
    fn record(&self, command: RecordedCommand) {
        debug!("loopback radio: {:?}", command);
        self.shared.commands.lock().push(command);
    }

    fn emit(&self, event: RadioEvent) -> bool {
        match self.listener.lock().as_ref() {
            Some(tx) => tx.send(event).is_ok(),
            None => false,
        }
    }
}

impl RadioHandle for LoopbackHandle {
    fn start_scan(&self) {
        self.scanning.store(true, Ordering::SeqCst);
        self.record(RecordedCommand::StartScan);
    }

    fn stop_scan(&self) {
        self.scanning.store(false, Ordering::SeqCst);
        self.record(RecordedCommand::StopScan);
    }

    fn start_advertise(&self, filter_value: &[u8]) {
        self.advertising.store(true, Ordering::SeqCst);
        self.record(RecordedCommand::StartAdvertise(filter_value.to_vec()));
    }

    fn stop_advertise(&self) {
        self.advertising.store(false, Ordering::SeqCst);
        self.record(RecordedCommand::StopAdvertise);
    }

    fn relay(&self, payload: &[u8], key: &[u8]) {
        self.record(RecordedCommand::Relay {
            payload: payload.to_vec(),
            key: key.to_vec(),
        });
        if self.shared.echo.load(Ordering::SeqCst) {
            self.emit(RadioEvent::PayloadReceived(payload.to_vec()));
        }
    }

    fn discovered(&self) -> Vec<DiscoveredDevice> {
        self.shared.devices.lock().clone()
    }

    fn set_listener(&self, listener: Option<RadioEventSender>) {
        *self.listener.lock() = listener;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn bound_handle(radio: &LoopbackRadio) -> Arc<dyn RadioHandle> {
        let (link_tx, mut link_rx) = mpsc::unbounded_channel();
        radio.bind(link_tx);
        match link_rx.try_recv() {
            Ok(LinkEvent::Bound(handle)) => handle,
            other => panic!("expected Bound, got {:?}", other),
        }
    }

    #[test]
    fn test_bind_delivers_handle() {
        let radio = LoopbackRadio::new();
        let handle = bound_handle(&radio);

        handle.start_scan();
        handle.start_advertise(b"abc");

        assert_eq!(radio.bind_count(), 1);
        assert!(radio.is_scanning());
        assert!(radio.is_advertising());
        assert_eq!(
            radio.commands(),
            vec![
                RecordedCommand::StartScan,
                RecordedCommand::StartAdvertise(b"abc".to_vec())
            ]
        );
    }

    #[test]
    fn test_failed_bind() {
        let radio = LoopbackRadio::new();
        radio.fail_next_binds(1);

        let (link_tx, mut link_rx) = mpsc::unbounded_channel();
        radio.bind(link_tx.clone());
        assert!(matches!(link_rx.try_recv(), Ok(LinkEvent::BindFailed(_))));

        radio.bind(link_tx);
        assert!(matches!(link_rx.try_recv(), Ok(LinkEvent::Bound(_))));
    }

    #[test]
    fn test_relay_echoes_to_listener() {
        let radio = LoopbackRadio::new();
        let handle = bound_handle(&radio);
        let (event_tx, mut event_rx) = mpsc::unbounded_channel();
        handle.set_listener(Some(event_tx));

        handle.relay(b"ping", b"12345678");

        assert_eq!(
            event_rx.try_recv().unwrap(),
            RadioEvent::PayloadReceived(b"ping".to_vec())
        );
    }

    #[test]
    fn test_injected_devices_are_deduplicated() {
        let radio = LoopbackRadio::new();
        let handle = bound_handle(&radio);
        let device = DiscoveredDevice::new("AA:BB:CC:DD:EE:FF", None);

        radio.inject_device(device.clone());
        radio.inject_device(device.clone());

        assert_eq!(handle.discovered(), vec![device]);
    }

    #[test]
    fn test_drop_link_reports_disconnect() {
        let radio = LoopbackRadio::new();
        let (link_tx, mut link_rx) = mpsc::unbounded_channel();
        radio.bind(link_tx);
        let _ = link_rx.try_recv();

        assert!(radio.drop_link());
        assert!(matches!(link_rx.try_recv(), Ok(LinkEvent::Disconnected)));
        assert!(!radio.is_scanning());
        assert_eq!(radio.live_handles(), 0);
    }

    #[test]
    fn test_unbind_releases_only_that_handle() {
        let radio = LoopbackRadio::new();
        let first = bound_handle(&radio);
        let second = bound_handle(&radio);
        first.start_scan();
        assert_eq!(radio.live_handles(), 2);

        radio.unbind(second.as_ref());
        assert_eq!(radio.live_handles(), 1);
        assert!(radio.is_scanning());

        radio.unbind(first.as_ref());
        assert_eq!(radio.live_handles(), 0);
        assert_eq!(radio.unbind_count(), 2);
    }
}
