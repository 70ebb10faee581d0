//! Relay facade - the single entry point for platform callers
//!
//! `RelayFacade` is a cheap, cloneable handle around one relay instance. It
//! owns the validator, the connection, the mode state machine and the event
//! dispatcher, and serializes every state change through one lock.
//!
//! Two background workers are started by [`RelayFacade::init`]:
//! - the link pump, which consumes bind/disconnect notifications, replays the
//!   desired-active intent after a rebind and schedules backoff retries
//! - the event dispatcher loop, which delivers radio events to the listener
//!
//! Both run on a dedicated thread owned by the relay, never on the caller's
//! runtime. If they ever end while the relay is alive, the next `init`
//! starts them again; dropping the last facade clone stops them.

use crate::config::{ConfigError, RelayConfig};
use crate::connection::{ConnectionStatus, RadioServiceConnection};
use crate::dispatcher::{EventDispatcher, RelayListener};
use crate::environment::Environment;
use crate::machine::{ActiveMode, ModeStateMachine};
use crate::params::{ParameterChange, ParameterValidator, RelayMode, RelayParameters};
use crate::radio::{DiscoveredDevice, LinkEvent, LinkReceiver, RadioBinder, RadioCommand};
use crate::worker::{self, ReceiverLease, Slot};
use crate::StatusCode;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Counters for observing a running relay
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelayStats {
    pub payloads_delivered: u64,
    pub devices_delivered: u64,
    pub relays_issued: u64,
    pub commands_dropped: u64,
    pub reconnect_attempts: u64,
}

// ============================================================================
// SHARED STATE
// ============================================================================

/// Everything guarded by the relay lock
struct RelayCore {
    connection: RadioServiceConnection,
    machine: ModeStateMachine,
    committed: Option<RelayParameters>,
    initialized: bool,
}

impl RelayCore {
    fn filter_value(&self) -> &[u8] {
        self.committed
            .as_ref()
            .map(|p| p.filter_value.as_slice())
            .unwrap_or(&[])
    }
}

struct Inner {
    config: RelayConfig,
    environment: Arc<dyn Environment>,
    validator: ParameterValidator,
    core: Mutex<RelayCore>,
    dispatcher: EventDispatcher,
    link_rx: Slot<LinkReceiver>,
    /// Dropping the sender stops the worker thread
    workers: Mutex<Option<oneshot::Sender<()>>>,
    relays_issued: AtomicU64,
    reconnect_attempts: AtomicU64,
}

/// What a link notification means for a pending rebind
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Retry {
    /// Notification was ignored; leave any pending retry alone
    Keep,
    Cancel,
    At(Instant),
}

impl Inner {
    /// Rebind right away if an explicit operation finds the link down
    fn ensure_connected(&self, core: &mut RelayCore) {
        if core.initialized && core.connection.status() == ConnectionStatus::Disconnected {
            info!("Connection is down, rebinding");
            self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
            core.connection.connect();
        }
    }

    /// Apply one link notification and say what happens to the pending retry
    fn handle_link_event(&self, event: LinkEvent, attempt: &mut u32) -> Retry {
        let mut guard = self.core.lock();
        let core = &mut *guard;

        match event {
            LinkEvent::Bound(handle) => {
                if !core.connection.on_bound(handle) {
                    return Retry::Keep;
                }
                *attempt = 0;
                core.machine.resume(&core.connection, core.filter_value());
                Retry::Cancel
            }
            LinkEvent::BindFailed(reason) => {
                if !core.connection.on_bind_failed(&reason) {
                    return Retry::Keep;
                }
                self.schedule_retry(core.initialized, *attempt)
            }
            LinkEvent::Disconnected => {
                if !core.connection.on_disconnected() {
                    return Retry::Keep;
                }
                self.schedule_retry(core.initialized, *attempt)
            }
        }
    }

    fn schedule_retry(&self, initialized: bool, attempt: u32) -> Retry {
        if !initialized {
            return Retry::Cancel;
        }
        match self.config.reconnect.backoff_duration(attempt) {
            Some(delay) => {
                debug!("Rebinding in {:?} (attempt {})", delay, attempt + 1);
                Retry::At(Instant::now() + delay)
            }
            None => {
                warn!(
                    "Giving up on automatic rebind after {} attempts; next operation will retry",
                    attempt
                );
                Retry::Cancel
            }
        }
    }

    fn retry_bind(&self, attempt: &mut u32) {
        let mut core = self.core.lock();
        if core.initialized && core.connection.status() == ConnectionStatus::Disconnected {
            *attempt += 1;
            self.reconnect_attempts.fetch_add(1, Ordering::Relaxed);
            core.connection.connect();
        }
    }
}

async fn link_pump(inner: Weak<Inner>, mut link_rx: ReceiverLease<LinkEvent>) {
    let mut attempt: u32 = 0;
    let mut retry_at: Option<Instant> = None;

    loop {
        tokio::select! {
            event = link_rx.recv() => {
                let Some(event) = event else { break };
                let Some(inner) = inner.upgrade() else { break };
                match inner.handle_link_event(event, &mut attempt) {
                    Retry::Keep => {}
                    Retry::Cancel => retry_at = None,
                    Retry::At(at) => retry_at = Some(at),
                }
            }
            _ = tokio::time::sleep_until(retry_at.unwrap_or_else(Instant::now)), if retry_at.is_some() => {
                retry_at = None;
                let Some(inner) = inner.upgrade() else { break };
                inner.retry_bind(&mut attempt);
            }
        }
    }
    debug!("Link pump stopped");
}

// ============================================================================
// FACADE
// ============================================================================

/// Entry point for consumers. Clones share the same relay.
#[derive(Clone)]
pub struct RelayFacade {
    inner: Arc<Inner>,
}

impl RelayFacade {
    pub fn new(
        binder: Arc<dyn RadioBinder>,
        environment: Arc<dyn Environment>,
        config: RelayConfig,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let (link_tx, link_rx) = mpsc::unbounded_channel();
        let dispatcher = EventDispatcher::new();
        let mut connection = RadioServiceConnection::new(binder, link_tx);
        connection.set_listener(Some(dispatcher.sender()));

        let inner = Inner {
            validator: ParameterValidator::new(&config.default_encryption_key),
            config,
            environment,
            core: Mutex::new(RelayCore {
                connection,
                machine: ModeStateMachine::new(),
                committed: None,
                initialized: false,
            }),
            dispatcher,
            link_rx: worker::slot(link_rx),
            workers: Mutex::new(None),
            relays_issued: AtomicU64::new(0),
            reconnect_attempts: AtomicU64::new(0),
        };

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    // ------------------------------------------------------------------------
    // Lifecycle
    // ------------------------------------------------------------------------

    /// Bind the Radio Service. Further calls do not bind again until
    /// `shutdown`, but they do restart the workers if those have ended.
    pub fn init(&self) -> StatusCode {
        self.start_workers();

        let mut core = self.inner.core.lock();
        if core.initialized {
            debug!("init ignored, already initialized");
            return StatusCode::Success;
        }
        core.initialized = true;
        core.connection.connect();
        info!("Relay initialized");
        StatusCode::Success
    }

    /// Stop both roles and release the Radio Service
    pub fn shutdown(&self) {
        let mut guard = self.inner.core.lock();
        let core = &mut *guard;
        if !core.initialized {
            return;
        }
        core.machine.stop(&core.connection);
        core.connection.release();
        core.initialized = false;
        info!("Relay shut down");
    }

    /// Start the link pump and the dispatcher unless they are already running
    fn start_workers(&self) {
        let Some(link_rx) = ReceiverLease::take(&self.inner.link_rx) else {
            return;
        };
        let Some(dispatcher) = self.inner.dispatcher.runner() else {
            debug!("Event dispatcher still winding down, workers not restarted");
            return;
        };

        let pump = link_pump(Arc::downgrade(&self.inner), link_rx);
        let stop = worker::spawn_worker(async move {
            // Either one ending takes the other down so both restart together
            tokio::select! {
                _ = pump => {}
                _ = dispatcher => {}
            }
        });
        *self.inner.workers.lock() = Some(stop);
        debug!("Relay workers started");
    }

    // ------------------------------------------------------------------------
    // Parameters
    // ------------------------------------------------------------------------

    pub fn update_parameters(
        &self,
        mode: RelayMode,
        filter_value: &str,
        encryption_key: Option<&str>,
    ) -> StatusCode {
        self.update_parameters_code(mode.code(), filter_value, encryption_key)
    }

    /// Validate and commit new parameters, restarting whatever the change
    /// requires. On failure nothing is touched.
    pub fn update_parameters_code(
        &self,
        mode_code: i32,
        filter_value: &str,
        encryption_key: Option<&str>,
    ) -> StatusCode {
        let mut guard = self.inner.core.lock();

        let params = match self.inner.validator.validate(
            mode_code,
            filter_value,
            encryption_key,
            self.inner.environment.as_ref(),
        ) {
            Ok(params) => params,
            Err(e) => {
                warn!("Parameter update rejected: {}", e);
                return StatusCode::from(&e);
            }
        };

        let core = &mut *guard;
        self.inner.ensure_connected(core);

        let change = ParameterChange::between(core.committed.as_ref(), &params);
        debug!("Parameter update: {:?} -> {:?}", change, params);
        core.machine.apply(&core.connection, change, &params);
        core.committed = Some(params);
        StatusCode::Success
    }

    // ------------------------------------------------------------------------
    // Mode control
    // ------------------------------------------------------------------------

    pub fn start(&self) {
        self.with_core(|core| {
            let filter = core.filter_value().to_vec();
            core.machine.start(&core.connection, &filter);
        });
    }

    pub fn stop(&self) {
        self.with_core(|core| core.machine.stop(&core.connection));
    }

    pub fn start_scan(&self) {
        self.with_core(|core| core.machine.start_scan(&core.connection));
    }

    pub fn stop_scan(&self) {
        self.with_core(|core| core.machine.stop_scan(&core.connection));
    }

    pub fn start_advertising(&self) {
        self.with_core(|core| {
            let filter = core.filter_value().to_vec();
            core.machine.start_advertising(&core.connection, &filter);
        });
    }

    pub fn stop_advertising(&self) {
        self.with_core(|core| core.machine.stop_advertising(&core.connection));
    }

    fn with_core<F>(&self, f: F)
    where
        F: FnOnce(&mut RelayCore),
    {
        let mut guard = self.inner.core.lock();
        self.inner.ensure_connected(&mut *guard);
        f(&mut *guard);
    }

    // ------------------------------------------------------------------------
    // Data
    // ------------------------------------------------------------------------

    /// Hand `message` to the radio, encrypted with the committed key (or the
    /// default key when nothing is committed). Does not wait for delivery.
    pub fn relay_data<'a>(&self, message: impl Into<Option<&'a str>>) -> StatusCode {
        let message = match message.into() {
            Some(m) if !m.is_empty() => m,
            _ => {
                debug!("relay rejected, message is empty");
                return StatusCode::InvalidParameter;
            }
        };

        let mut guard = self.inner.core.lock();
        self.inner.ensure_connected(&mut *guard);

        let key = match &guard.committed {
            Some(params) => params.encryption_key(),
            None => self.inner.validator.default_key(),
        };
        let issued = guard.connection.issue(RadioCommand::Relay {
            payload: message.as_bytes(),
            key,
        });
        if issued {
            self.inner.relays_issued.fetch_add(1, Ordering::Relaxed);
        }
        StatusCode::Success
    }

    /// Snapshot of devices the radio has found; empty when nothing is bound
    pub fn get_discovered_devices(&self) -> Vec<DiscoveredDevice> {
        self.inner.core.lock().connection.discovered()
    }

    pub fn set_listener(&self, listener: Option<Arc<dyn RelayListener>>) {
        self.inner.dispatcher.set_listener(listener);
    }

    // ------------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------------

    pub fn active_mode(&self) -> ActiveMode {
        self.inner.core.lock().machine.active_mode()
    }

    pub fn is_desired_active(&self) -> bool {
        self.inner.core.lock().machine.desired_active()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.inner.core.lock().connection.status()
    }

    pub fn committed_parameters(&self) -> Option<RelayParameters> {
        self.inner.core.lock().committed.clone()
    }

    pub fn config(&self) -> &RelayConfig {
        &self.inner.config
    }

    pub fn stats(&self) -> RelayStats {
        let commands_dropped = self.inner.core.lock().connection.dropped_commands();
        RelayStats {
            payloads_delivered: self.inner.dispatcher.payloads_delivered(),
            devices_delivered: self.inner.dispatcher.devices_delivered(),
            relays_issued: self.inner.relays_issued.load(Ordering::Relaxed),
            commands_dropped,
            reconnect_attempts: self.inner.reconnect_attempts.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::environment::StaticEnvironment;
    use crate::radio::loopback::{LoopbackRadio, RecordedCommand};
    use std::time::Duration;

    fn facade(radio: &LoopbackRadio) -> RelayFacade {
        RelayFacade::new(
            Arc::new(radio.clone()),
            Arc::new(StaticEnvironment::ready()),
            RelayConfig::default(),
        )
        .unwrap()
    }

    async fn wait_for_bound(relay: &RelayFacade) {
        for _ in 0..1000 {
            if relay.connection_status() == ConnectionStatus::Bound {
                return;
            }
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
        panic!("relay never bound");
    }

    #[test]
    fn test_invalid_config_rejected() {
        let config = RelayConfig {
            default_encryption_key: "tiny".to_string(),
            ..RelayConfig::default()
        };
        let result = RelayFacade::new(
            Arc::new(LoopbackRadio::new()),
            Arc::new(StaticEnvironment::ready()),
            config,
        );
        assert!(result.is_err());
    }

    #[test]
    fn test_operations_before_init_record_intent_only() {
        let radio = LoopbackRadio::new();
        let relay = facade(&radio);

        relay.start_scan();
        assert_eq!(relay.active_mode(), ActiveMode::ScanningOnly);
        assert_eq!(relay.connection_status(), ConnectionStatus::Unbound);
        assert!(radio.commands().is_empty());
        assert_eq!(relay.stats().commands_dropped, 1);
    }

    fn wait_until<F: Fn() -> bool>(cond: F) {
        for _ in 0..2000 {
            if cond() {
                return;
            }
            std::thread::sleep(Duration::from_millis(5));
        }
        panic!("condition not reached");
    }

    impl RelayFacade {
        /// Stop the worker thread as if it had died
        fn kill_workers(&self) {
            self.inner.workers.lock().take();
        }

        /// Both receivers are back in their slots
        fn workers_parked(&self) -> bool {
            self.inner.link_rx.lock().is_some() && self.inner.dispatcher.runner().is_some()
        }
    }

    struct PayloadSink {
        tx: std::sync::mpsc::Sender<Vec<u8>>,
    }

    impl RelayListener for PayloadSink {
        fn on_payload(&self, payload: Vec<u8>) {
            let _ = self.tx.send(payload);
        }
    }

    #[test]
    fn test_init_without_runtime_uses_worker_thread() {
        let radio = LoopbackRadio::new();
        let relay = facade(&radio);
        assert_eq!(relay.init(), StatusCode::Success);

        wait_until(|| relay.connection_status() == ConnectionStatus::Bound);
    }

    #[test]
    fn test_workers_outlive_the_callers_runtime() {
        let radio = LoopbackRadio::new().manual_bind();
        let relay = facade(&radio);

        let rt = tokio::runtime::Builder::new_current_thread().build().unwrap();
        rt.block_on(async { relay.init() });
        drop(rt);

        assert!(radio.complete_bind());
        wait_until(|| relay.connection_status() == ConnectionStatus::Bound);

        relay.shutdown();
        relay.init();
        assert!(radio.complete_bind());
        wait_until(|| relay.connection_status() == ConnectionStatus::Bound);
        assert_eq!(radio.bind_count(), 2);
    }

    #[test]
    fn test_init_restarts_workers_that_ended() {
        let radio = LoopbackRadio::new();
        let relay = facade(&radio);
        let (tx, payloads) = std::sync::mpsc::channel();
        relay.set_listener(Some(Arc::new(PayloadSink { tx })));

        relay.init();
        wait_until(|| relay.connection_status() == ConnectionStatus::Bound);

        relay.kill_workers();
        wait_until(|| relay.workers_parked());

        // Already initialized, so only the workers come back
        assert_eq!(relay.init(), StatusCode::Success);
        assert_eq!(radio.bind_count(), 1);

        radio.inject_payload(b"back");
        assert_eq!(
            payloads.recv_timeout(Duration::from_secs(5)),
            Ok(b"back".to_vec())
        );
    }

    #[test]
    fn test_dropping_the_facade_stops_workers() {
        // The loopback binder keeps a link sender alive on its own
        let radio = LoopbackRadio::new();
        let relay = facade(&radio);
        relay.init();
        wait_until(|| relay.connection_status() == ConnectionStatus::Bound);

        let link_slot = relay.inner.link_rx.clone();
        assert!(link_slot.lock().is_none());

        drop(relay);
        wait_until(|| link_slot.lock().is_some());
    }

    #[tokio::test]
    async fn test_init_is_idempotent() {
        let radio = LoopbackRadio::new();
        let relay = facade(&radio);

        assert_eq!(relay.init(), StatusCode::Success);
        assert_eq!(relay.init(), StatusCode::Success);
        wait_for_bound(&relay).await;
        assert_eq!(radio.bind_count(), 1);
    }

    #[tokio::test]
    async fn test_rejected_update_leaves_state_untouched() {
        let radio = LoopbackRadio::new();
        let relay = facade(&radio);
        relay.init();
        wait_for_bound(&relay).await;

        assert_eq!(
            relay.update_parameters(RelayMode::Both, "abc", Some("12345678")),
            StatusCode::Success
        );
        radio.clear_commands();

        assert_eq!(
            relay.update_parameters(RelayMode::CentralOnly, "abc", Some("short")),
            StatusCode::InvalidParameter
        );
        assert_eq!(relay.update_parameters_code(7, "abc", None), StatusCode::InvalidParameter);

        assert!(radio.commands().is_empty());
        assert_eq!(relay.active_mode(), ActiveMode::Both);
        assert_eq!(relay.committed_parameters().unwrap().mode, RelayMode::Both);
    }

    #[tokio::test]
    async fn test_relay_without_committed_parameters_uses_default_key() {
        let radio = LoopbackRadio::new().without_echo();
        let relay = facade(&radio);
        relay.init();
        wait_for_bound(&relay).await;

        assert_eq!(relay.relay_data("hi"), StatusCode::Success);
        assert_eq!(
            radio.commands(),
            vec![RecordedCommand::Relay {
                payload: b"hi".to_vec(),
                key: b"blerelay".to_vec(),
            }]
        );
        assert_eq!(relay.stats().relays_issued, 1);
    }

    #[tokio::test]
    async fn test_shutdown_releases_and_reinit_binds_again() {
        let radio = LoopbackRadio::new();
        let relay = facade(&radio);
        relay.init();
        wait_for_bound(&relay).await;
        relay.start();

        relay.shutdown();
        assert_eq!(relay.connection_status(), ConnectionStatus::Unbound);
        assert_eq!(relay.active_mode(), ActiveMode::Off);
        assert_eq!(radio.unbind_count(), 1);

        relay.init();
        wait_for_bound(&relay).await;
        assert_eq!(radio.bind_count(), 2);
    }
}
