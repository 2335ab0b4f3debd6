//! The top-level manager context.
//!
//! A [`ServiceManager`] wires together the configuration document, the
//! service registry, one lifecycle worker per service and the
//! notification channel. It is constructed explicitly by the embedding
//! application; there is no global instance.
use std::{
    collections::{BTreeMap, HashMap},
    path::{Path, PathBuf},
    sync::Arc,
    time::Duration,
};

use tracing::debug;

use crate::{
    config,
    error::{Diagnostic, ManagerError},
    events::{EventSender, RunningStates},
    registry::ServiceRegistry,
    runner::{LifecycleRequest, TaskRunner},
    services::{PortChange, ServiceName, ServiceSettings},
    shutdown::ShutdownCoordinator,
};

/// The request surface of the stack manager.
pub struct ServiceManager {
    document_path: PathBuf,
    registry: Arc<ServiceRegistry>,
    runners: HashMap<ServiceName, TaskRunner>,
    states: Arc<RunningStates>,
}

impl ServiceManager {
    /// Builds the full context around a configuration document path.
    ///
    /// Nothing is loaded yet; call [`ServiceManager::load`] to apply the
    /// document.
    pub fn new(document_path: &Path, app_root: &Path, events: EventSender) -> Self {
        let states = Arc::new(RunningStates::new(events.clone()));
        let registry = Arc::new(ServiceRegistry::new(
            app_root,
            Arc::clone(&states),
            events.clone(),
        ));
        let runners = ServiceName::ALL
            .iter()
            .map(|name| {
                (
                    *name,
                    TaskRunner::spawn(*name, registry.lifecycle_handle(*name), events.clone()),
                )
            })
            .collect();

        Self {
            document_path: document_path.to_path_buf(),
            registry,
            runners,
            states,
        }
    }

    /// Loads the configuration document and applies it atomically.
    pub fn load(&self) -> Result<(), ManagerError> {
        let document = config::load_document(&self.document_path)?;
        self.registry.load_configurations(&document)
    }

    /// Writes every service's active settings back into the document.
    pub fn save(&self) -> Result<(), ManagerError> {
        let mut document = config::load_document(&self.document_path)?;
        self.registry.store_configurations(&mut document)?;
        config::save_document(&document, &self.document_path)
    }

    /// Enqueues a start for the service. Never blocks.
    pub fn start(&self, name: ServiceName) {
        debug!(service = %name, "Start requested");
        if let Some(runner) = self.runners.get(&name) {
            runner.submit(LifecycleRequest::Start);
        }
    }

    /// Enqueues a stop for the service. Never blocks.
    pub fn stop(&self, name: ServiceName) {
        debug!(service = %name, "Stop requested");
        if let Some(runner) = self.runners.get(&name) {
            runner.submit(LifecycleRequest::Stop);
        }
    }

    /// Enqueues a start for every service.
    pub fn start_all(&self) {
        for name in ServiceName::ALL {
            self.start(name);
        }
    }

    /// Enqueues a stop for every service.
    pub fn stop_all(&self) {
        for name in ServiceName::ALL {
            self.stop(name);
        }
    }

    /// Whether the service is currently marked running.
    pub fn is_running(&self, name: ServiceName) -> Result<bool, ManagerError> {
        self.registry.is_running(name)
    }

    /// A pure snapshot of the service's active settings.
    pub fn get_config(&self, name: ServiceName) -> Result<ServiceSettings, ManagerError> {
        self.registry.get_config(name)
    }

    /// Switches a service's active version.
    pub fn set_version(&self, name: ServiceName, label: &str) -> Result<(), ManagerError> {
        self.registry.set_version(name, label)
    }

    /// Changes a service's listen port.
    pub fn set_port(
        &self,
        name: ServiceName,
        port: u16,
    ) -> Result<(PortChange, Vec<Diagnostic>), ManagerError> {
        self.registry.set_port(name, port)
    }

    /// Changes the proxy's auxiliary PHP-CGI port.
    pub fn set_php_cgi_port(
        &self,
        name: ServiceName,
        port: u16,
    ) -> Result<(PortChange, Vec<Diagnostic>), ManagerError> {
        self.registry.set_php_cgi_port(name, port)
    }

    /// Points a PHP-capable service's document root at an existing
    /// directory. Returns `Ok(false)` when the path does not exist.
    pub fn set_document_root(
        &self,
        name: ServiceName,
        path: &Path,
    ) -> Result<bool, ManagerError> {
        self.registry.set_document_root(name, path)
    }

    /// Switches a PHP-capable service's active PHP runtime.
    pub fn set_php_version(
        &self,
        name: ServiceName,
        label: &str,
    ) -> Result<(), ManagerError> {
        self.registry.set_php_version(name, label)
    }

    /// Installed versions available to the service.
    pub fn available_versions(
        &self,
        name: ServiceName,
    ) -> Result<BTreeMap<String, PathBuf>, ManagerError> {
        self.registry.available_versions(name)
    }

    /// Installed PHP runtimes available to the service.
    pub fn available_php_versions(
        &self,
        name: ServiceName,
    ) -> Result<BTreeMap<String, PathBuf>, ManagerError> {
        self.registry.available_php_versions(name)
    }

    /// Path of the service's active PHP runtime.
    pub fn php_path(&self, name: ServiceName) -> Result<PathBuf, ManagerError> {
        self.registry.php_path(name)
    }

    /// Whether no managed service holds the port.
    pub fn is_port_free_in_app(&self, port: u16) -> Result<bool, ManagerError> {
        self.registry.is_port_free_in_app(port)
    }

    /// Stops every running service and waits for the last one, bounded by
    /// `timeout`.
    pub fn shutdown(&self, timeout: Duration) -> Result<(), ManagerError> {
        let coordinator = ShutdownCoordinator::new(Arc::clone(&self.states));
        coordinator.shutdown(|name| self.stop(name), timeout)
    }
}
