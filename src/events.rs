//! Typed notifications and the shared running-state table.
//!
//! Every observable event in the manager flows through a single
//! [`Notification`] channel: per-service state changes, the all-stopped
//! aggregate, warnings and errors surfaced by the lifecycle workers.
use std::{
    collections::HashMap,
    sync::{Condvar, Mutex, mpsc},
    time::{Duration, Instant},
};

use tracing::debug;

use crate::{error::ManagerError, services::ServiceName};

/// An event emitted by the manager for its embedding application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notification {
    /// A service transitioned between running and stopped.
    StateChanged {
        /// The service that changed state.
        service: ServiceName,
        /// Whether the service is now running.
        running: bool,
    },
    /// Every managed service is stopped. Emitted exactly once per
    /// transition into the all-stopped condition.
    AllStopped,
    /// A recoverable problem the user should see.
    Warning {
        /// The service the warning concerns.
        service: ServiceName,
        /// Human-readable warning text.
        message: String,
    },
    /// A failed operation.
    Error {
        /// Short title for the failure.
        title: String,
        /// Human-readable failure detail.
        message: String,
    },
}

/// Cloneable sending half of the notification channel.
///
/// Delivery is best effort: once the receiving side is gone, events are
/// dropped with a debug log rather than failing the operation that
/// produced them.
#[derive(Debug, Clone)]
pub struct EventSender {
    tx: mpsc::Sender<Notification>,
}

impl EventSender {
    /// Emits a notification, ignoring a disconnected receiver.
    pub fn emit(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            debug!("Notification receiver disconnected; event dropped");
        }
    }
}

/// Creates the notification channel used by a manager instance.
pub fn channel() -> (EventSender, mpsc::Receiver<Notification>) {
    let (tx, rx) = mpsc::channel();
    (EventSender { tx }, rx)
}

/// The shared running-state table, seeded with one entry per managed
/// service at construction.
///
/// `set` emits [`Notification::StateChanged`] only when the stored value
/// actually changes, and [`Notification::AllStopped`] exactly once when
/// the last entry turns false. The condvar lets the shutdown coordinator
/// wait for the all-stopped condition without subscribing to the
/// notification channel.
#[derive(Debug)]
pub struct RunningStates {
    table: Mutex<HashMap<ServiceName, bool>>,
    stopped: Condvar,
    events: EventSender,
}

impl RunningStates {
    /// Creates the table with every service marked stopped.
    pub fn new(events: EventSender) -> Self {
        let table = ServiceName::ALL.iter().map(|name| (*name, false)).collect();
        Self {
            table: Mutex::new(table),
            stopped: Condvar::new(),
            events,
        }
    }

    /// Records a service's running state, emitting notifications on change.
    pub fn set(&self, service: ServiceName, running: bool) -> Result<(), ManagerError> {
        let mut table = self.table.lock()?;
        let entry = table.entry(service).or_insert(false);
        if *entry == running {
            return Ok(());
        }
        *entry = running;
        let all_stopped = table.values().all(|state| !state);
        drop(table);

        debug!(service = %service, running, "Service state changed");
        self.events
            .emit(Notification::StateChanged { service, running });
        if all_stopped {
            self.events.emit(Notification::AllStopped);
        }
        self.stopped.notify_all();
        Ok(())
    }

    /// Returns whether a service is currently marked running.
    pub fn get(&self, service: ServiceName) -> Result<bool, ManagerError> {
        let table = self.table.lock()?;
        Ok(table.get(&service).copied().unwrap_or(false))
    }

    /// Returns every service currently marked running.
    pub fn running_services(&self) -> Result<Vec<ServiceName>, ManagerError> {
        let table = self.table.lock()?;
        Ok(table
            .iter()
            .filter(|(_, running)| **running)
            .map(|(name, _)| *name)
            .collect())
    }

    /// Blocks until every entry is false or the timeout elapses.
    ///
    /// Returns `true` when the all-stopped condition was reached. The check
    /// happens under the same lock `set` takes, so a stop that completes
    /// between the caller's snapshot and this wait is never missed.
    pub fn wait_all_stopped(&self, timeout: Duration) -> Result<bool, ManagerError> {
        let deadline = Instant::now() + timeout;
        let mut table = self.table.lock()?;
        loop {
            if table.values().all(|running| !running) {
                return Ok(true);
            }
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            let (guard, _) = self.stopped.wait_timeout(table, deadline - now)?;
            table = guard;
        }
    }
}
