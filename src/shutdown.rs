//! Coordinated stop of every running service.
use std::{sync::Arc, time::Duration};

use tracing::info;

use crate::{error::ManagerError, events::RunningStates, services::ServiceName};

/// Requests a stop for every running service and waits for the running
/// table to drain.
///
/// The wait re-checks the table under the same lock its writers take, so
/// a service that stops between the snapshot and the wait is never missed.
pub struct ShutdownCoordinator {
    states: Arc<RunningStates>,
}

impl ShutdownCoordinator {
    /// Creates a coordinator over the shared running-state table.
    pub fn new(states: Arc<RunningStates>) -> Self {
        Self { states }
    }

    /// Stops everything that is running, bounded by `timeout`.
    ///
    /// `request_stop` enqueues the stop for one service; it must not
    /// block. Returns immediately when nothing is running.
    pub fn shutdown<F>(&self, request_stop: F, timeout: Duration) -> Result<(), ManagerError>
    where
        F: Fn(ServiceName),
    {
        let running = self.states.running_services()?;
        if running.is_empty() {
            info!("No services running; nothing to stop");
            return Ok(());
        }

        info!(count = running.len(), "Stopping all running services");
        for name in running {
            request_stop(name);
        }

        if self.states.wait_all_stopped(timeout)? {
            info!("All services stopped");
            Ok(())
        } else {
            Err(ManagerError::ShutdownTimeout)
        }
    }
}
