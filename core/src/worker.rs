//! Background worker plumbing
//!
//! Relay workers run on a dedicated thread that owns its own runtime, so they
//! do not depend on whatever runtime the caller happened to be on. Receivers
//! are leased out of a [`Slot`] for the life of a worker and handed back when
//! the worker ends, which lets a later `init` start it again.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

pub(crate) const WORKER_THREAD_NAME: &str = "blerelay-core";

/// Home of a receiver while no worker holds it
pub(crate) type Slot<T> = Arc<Mutex<Option<T>>>;

pub(crate) fn slot<T>(value: T) -> Slot<T> {
    Arc::new(Mutex::new(Some(value)))
}

/// Receiver checked out of a [`Slot`]; goes back in on drop
pub(crate) struct ReceiverLease<E> {
    slot: Slot<mpsc::UnboundedReceiver<E>>,
    rx: Option<mpsc::UnboundedReceiver<E>>,
}

impl<E> ReceiverLease<E> {
    /// `None` while another lease is out
    pub(crate) fn take(slot: &Slot<mpsc::UnboundedReceiver<E>>) -> Option<Self> {
        let rx = slot.lock().take()?;
        Some(Self {
            slot: slot.clone(),
            rx: Some(rx),
        })
    }

    pub(crate) async fn recv(&mut self) -> Option<E> {
        match self.rx.as_mut() {
            Some(rx) => rx.recv().await,
            None => None,
        }
    }
}

impl<E> Drop for ReceiverLease<E> {
    fn drop(&mut self) {
        if let Some(rx) = self.rx.take() {
            *self.slot.lock() = Some(rx);
        }
    }
}

/// Run `work` on a dedicated thread with its own current-thread runtime.
///
/// The work is abandoned as soon as the returned sender is dropped.
pub(crate) fn spawn_worker<F>(work: F) -> oneshot::Sender<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let (stop_tx, stop_rx) = oneshot::channel::<()>();

    let spawned = std::thread::Builder::new()
        .name(WORKER_THREAD_NAME.to_string())
        .spawn(move || {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build();
            match rt {
                Ok(rt) => rt.block_on(async move {
                    tokio::select! {
                        _ = stop_rx => debug!("Relay workers stopped by owner"),
                        _ = work => debug!("Relay workers finished"),
                    }
                }),
                Err(e) => error!("Failed to create relay runtime: {}", e),
            }
        });

    if let Err(e) = spawned {
        error!("Failed to spawn relay worker thread: {}", e);
    }
    stop_tx
}
