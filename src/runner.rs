//! Per-service lifecycle workers.
//!
//! Each service gets one worker thread fed by a FIFO queue. Submission
//! never blocks the caller; requests for the same service execute strictly
//! in order while different services proceed concurrently. Failures
//! surface as notifications, never as panics.
use std::{
    sync::{Arc, Mutex, mpsc},
    thread,
};

use tracing::{error, warn};

use crate::{
    error::ManagerError,
    events::{EventSender, Notification},
    services::{Service, ServiceName},
};

/// A queued lifecycle request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleRequest {
    /// Start the service.
    Start,
    /// Stop the service.
    Stop,
}

/// One worker thread plus its request queue.
pub struct TaskRunner {
    name: ServiceName,
    queue: Option<mpsc::Sender<LifecycleRequest>>,
    worker: Option<thread::JoinHandle<()>>,
}

impl TaskRunner {
    /// Spawns the worker for a service.
    pub fn spawn(
        name: ServiceName,
        service: Arc<Mutex<dyn Service + Send>>,
        events: EventSender,
    ) -> Self {
        let (queue, requests) = mpsc::channel();
        let worker = thread::spawn(move || {
            while let Ok(request) = requests.recv() {
                let mut guard = match service.lock() {
                    Ok(guard) => guard,
                    Err(err) => {
                        error!(service = %name, error = %err, "Service mutex poisoned");
                        continue;
                    }
                };
                match request {
                    LifecycleRequest::Start => {
                        if let Err(err) = guard.start() {
                            report_start_failure(name, err, &events);
                        }
                    }
                    LifecycleRequest::Stop => {
                        if let Err(err) = guard.stop() {
                            report_stop_failure(name, err, &events);
                        }
                    }
                }
            }
        });

        Self {
            name,
            queue: Some(queue),
            worker: Some(worker),
        }
    }

    /// Enqueues a request without waiting for it to execute.
    pub fn submit(&self, request: LifecycleRequest) {
        if let Some(queue) = &self.queue
            && queue.send(request).is_err()
        {
            warn!(service = %self.name, "Lifecycle worker is gone; request dropped");
        }
    }
}

impl Drop for TaskRunner {
    fn drop(&mut self) {
        // Closing the queue lets the worker drain and exit.
        self.queue.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}

fn report_start_failure(name: ServiceName, err: ManagerError, events: &EventSender) {
    match err {
        ManagerError::PortInUse { service, port } => {
            warn!(service = %service, port, "Port is already in use");
            events.emit(Notification::Warning {
                service,
                message: format!("The port {port} is already in use."),
            });
        }
        other => {
            error!(service = %name, error = %other, "Failed to start the server");
            events.emit(Notification::Error {
                title: "Failed to start the server".to_string(),
                message: other.to_string(),
            });
        }
    }
}

fn report_stop_failure(name: ServiceName, err: ManagerError, events: &EventSender) {
    match err {
        // A stop that raced a crash or another stop is benign.
        ManagerError::NotRunning { service } => {
            warn!(service = %service, "Stop requested while not running");
        }
        other => {
            error!(service = %name, error = %other, "Failed to stop the server");
            events.emit(Notification::Error {
                title: "Failed to stop the server".to_string(),
                message: other.to_string(),
            });
        }
    }
}
