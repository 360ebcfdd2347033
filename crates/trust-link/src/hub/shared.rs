//! Thread-safe hub handle and background event pump.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use smol_str::SmolStr;
use tracing::debug;

use crate::error::LinkError;
use crate::registry::ControllerId;
use crate::status::StatusView;
use crate::telemetry::HistoryRecord;

use super::{ConnectOutcome, ControllerHub, DisconnectOutcome, SubscribeOutcome};

/// Cloneable handle to a hub shared between a UI thread and the pump.
#[derive(Debug, Clone)]
pub struct SharedHub {
    inner: Arc<Mutex<ControllerHub>>,
}

impl SharedHub {
    #[must_use]
    pub fn new(hub: ControllerHub) -> Self {
        Self {
            inner: Arc::new(Mutex::new(hub)),
        }
    }

    /// Lock the hub for a batch of operations.
    pub fn lock(&self) -> MutexGuard<'_, ControllerHub> {
        self.inner.lock()
    }

    pub fn connect(&self, id: &str) -> ConnectOutcome {
        self.inner.lock().connect(id)
    }

    pub fn connect_all(&self) -> Vec<(ControllerId, ConnectOutcome)> {
        self.inner.lock().connect_all()
    }

    pub fn disconnect(&self, id: &str) -> DisconnectOutcome {
        self.inner.lock().disconnect(id)
    }

    pub fn disconnect_all(&self) -> Vec<(ControllerId, DisconnectOutcome)> {
        self.inner.lock().disconnect_all()
    }

    pub fn subscribe_to_variables<I, S>(
        &self,
        names: I,
        namespace: impl Into<SmolStr>,
    ) -> SubscribeOutcome
    where
        I: IntoIterator<Item = S>,
        S: Into<SmolStr>,
    {
        self.inner.lock().subscribe_to_variables(names, namespace)
    }

    #[must_use]
    pub fn get_status(&self, id: &str) -> bool {
        self.inner.lock().get_status(id)
    }

    #[must_use]
    pub fn snapshot(&self) -> StatusView {
        self.inner.lock().status_view()
    }

    #[must_use]
    pub fn history_snapshot(&self) -> Vec<HistoryRecord> {
        self.inner.lock().history().iter().cloned().collect()
    }

    /// History records pushed after the first `seen`, plus the new total.
    #[must_use]
    pub fn history_since(&self, seen: u64) -> (u64, Vec<HistoryRecord>) {
        let hub = self.inner.lock();
        let history = hub.history();
        (history.pushed(), history.since(seen).cloned().collect())
    }

    /// Start a thread that drains transport events every `interval`.
    ///
    /// The lock is only held while pending work is processed, never while
    /// sleeping.
    pub fn spawn_pump(&self, interval: Duration) -> Result<PumpHandle, LinkError> {
        let stop = Arc::new(AtomicBool::new(false));
        let hub = self.clone();
        let thread_stop = Arc::clone(&stop);
        let thread = thread::Builder::new()
            .name("trust-link-pump".into())
            .spawn(move || {
                while !thread_stop.load(Ordering::Acquire) {
                    let handled = hub.inner.lock().process_pending();
                    if handled > 0 {
                        debug!(handled, "pump processed events");
                    }
                    thread::sleep(interval);
                }
            })
            .map_err(|err| LinkError::Io(err.to_string().into()))?;
        Ok(PumpHandle {
            stop,
            thread: Some(thread),
        })
    }
}

/// Stops the pump thread when dropped.
#[derive(Debug)]
pub struct PumpHandle {
    stop: Arc<AtomicBool>,
    thread: Option<thread::JoinHandle<()>>,
}

impl PumpHandle {
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

impl Drop for PumpHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}
