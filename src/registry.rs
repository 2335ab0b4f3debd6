//! The service registry: one shared instance of each managed service,
//! per-name dispatch and atomic configuration loads.
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use tracing::{info, warn};

use crate::{
    config::ConfigDocument,
    error::{Diagnostic, ManagerError},
    events::{EventSender, RunningStates},
    process,
    services::{
        DatabaseServer, PhpCapable, PortChange, PortReservations, ProxyServer, Service,
        ServiceName, ServiceSettings, WebServer,
        database::DatabaseSettings, proxy::ProxySettings, web::WebSettings,
    },
};

/// Owns every managed service and dispatches operations by name.
///
/// Constructed explicitly and shared behind an `Arc`; there is no global
/// instance.
pub struct ServiceRegistry {
    web: Arc<Mutex<WebServer>>,
    proxy: Arc<Mutex<ProxyServer>>,
    database: Arc<Mutex<DatabaseServer>>,
    states: Arc<RunningStates>,
    app_root: PathBuf,
}

impl ServiceRegistry {
    /// Creates the registry with every service unconfigured.
    pub fn new(app_root: &Path, states: Arc<RunningStates>, events: EventSender) -> Self {
        Self {
            web: Arc::new(Mutex::new(WebServer::new(
                app_root,
                Arc::clone(&states),
                events.clone(),
            ))),
            proxy: Arc::new(Mutex::new(ProxyServer::new(
                app_root,
                Arc::clone(&states),
                events.clone(),
            ))),
            database: Arc::new(Mutex::new(DatabaseServer::new(
                app_root,
                Arc::clone(&states),
                events,
            ))),
            states,
            app_root: app_root.to_path_buf(),
        }
    }

    /// A type-erased handle for the lifecycle workers.
    pub fn lifecycle_handle(&self, name: ServiceName) -> Arc<Mutex<dyn Service + Send>> {
        match name {
            ServiceName::Apache => Arc::clone(&self.web) as Arc<Mutex<dyn Service + Send>>,
            ServiceName::Nginx => Arc::clone(&self.proxy) as Arc<Mutex<dyn Service + Send>>,
            ServiceName::Mysql => {
                Arc::clone(&self.database) as Arc<Mutex<dyn Service + Send>>
            }
        }
    }

    /// The shared running-state table.
    pub fn states(&self) -> Arc<RunningStates> {
        Arc::clone(&self.states)
    }

    /// Whether the service is currently marked running.
    pub fn is_running(&self, name: ServiceName) -> Result<bool, ManagerError> {
        self.states.get(name)
    }

    /// Applies a configuration document atomically.
    ///
    /// Every service's settings are staged on fresh state first; the
    /// in-memory services are replaced only when every stage step
    /// succeeded, so a failed load leaves nothing configured. The
    /// path-rewrite pass over every installed version runs while staging.
    pub fn load_configurations(
        &self,
        document: &ConfigDocument,
    ) -> Result<(), ManagerError> {
        let mut reserved = PortReservations::default();
        let web =
            WebSettings::from_entry(&document.servers.apache, &self.app_root, &mut reserved)?;
        let proxy =
            ProxySettings::from_entry(&document.servers.nginx, &self.app_root, &mut reserved)?;
        let database = DatabaseSettings::from_entry(
            &document.servers.mysql,
            &self.app_root,
            &mut reserved,
        )?;

        web.rewrite_install_paths()?;
        proxy.rewrite_install_paths()?;
        database.rewrite_install_paths()?;

        self.web.lock()?.apply(web);
        self.proxy.lock()?.apply(proxy);
        self.database.lock()?.apply(database);

        info!("Service configurations loaded");
        Ok(())
    }

    /// Writes every service's active settings back into the document.
    pub fn store_configurations(
        &self,
        document: &mut ConfigDocument,
    ) -> Result<(), ManagerError> {
        document.servers.apache.config = self.web.lock()?.settings().config();
        document.servers.nginx.config = self.proxy.lock()?.settings().config();
        document.servers.mysql.config = self.database.lock()?.settings().config();
        Ok(())
    }

    /// A snapshot of every port held by a managed service.
    pub fn port_reservations(&self) -> Result<PortReservations, ManagerError> {
        let mut reserved = PortReservations::default();
        for name in ServiceName::ALL {
            let handle = self.lifecycle_handle(name);
            let service = handle.lock()?;
            for port in service.ports() {
                reserved.reserve(port);
            }
        }
        Ok(reserved)
    }

    /// Whether no managed service holds the port, active or auxiliary.
    pub fn is_port_free_in_app(&self, port: u16) -> Result<bool, ManagerError> {
        Ok(self.port_reservations()?.is_free(port))
    }

    /// Whether nothing on this host answers a TCP probe on the port.
    pub fn is_port_free_on_host(&self, port: u16) -> bool {
        !process::port_occupied(port)
    }

    /// A pure snapshot of the service's active settings.
    pub fn get_config(&self, name: ServiceName) -> Result<ServiceSettings, ManagerError> {
        let handle = self.lifecycle_handle(name);
        let service = handle.lock()?;
        Ok(service.config())
    }

    /// Installed versions available to the service.
    pub fn available_versions(
        &self,
        name: ServiceName,
    ) -> Result<BTreeMap<String, PathBuf>, ManagerError> {
        let handle = self.lifecycle_handle(name);
        let service = handle.lock()?;
        Ok(service.installed_versions())
    }

    /// Installed PHP runtimes available to the service.
    pub fn available_php_versions(
        &self,
        name: ServiceName,
    ) -> Result<BTreeMap<String, PathBuf>, ManagerError> {
        match name {
            ServiceName::Apache => Ok(self.web.lock()?.installed_php_versions()),
            ServiceName::Nginx => Ok(self.proxy.lock()?.installed_php_versions()),
            ServiceName::Mysql => Err(ManagerError::PhpUnsupported(name)),
        }
    }

    /// Path of the service's active PHP runtime.
    pub fn php_path(&self, name: ServiceName) -> Result<PathBuf, ManagerError> {
        match name {
            ServiceName::Apache => Ok(self.web.lock()?.php_path().to_path_buf()),
            ServiceName::Nginx => Ok(self.proxy.lock()?.php_path().to_path_buf()),
            ServiceName::Mysql => Err(ManagerError::PhpUnsupported(name)),
        }
    }

    /// Switches a service's active version.
    pub fn set_version(&self, name: ServiceName, label: &str) -> Result<(), ManagerError> {
        let handle = self.lifecycle_handle(name);
        let mut service = handle.lock()?;
        if service.is_running() {
            warn!(service = %name, "Changing version while the service is running");
        }
        service.set_version(label)
    }

    /// Changes a service's listen port.
    ///
    /// Expected failures come back as diagnostics with the port unchanged.
    pub fn set_port(
        &self,
        name: ServiceName,
        port: u16,
    ) -> Result<(PortChange, Vec<Diagnostic>), ManagerError> {
        let reserved = self.port_reservations()?;
        let handle = self.lifecycle_handle(name);
        let mut service = handle.lock()?;
        let mut diagnostics = Vec::new();
        let change = service.set_port(port, &reserved, &mut diagnostics)?;
        Ok((change, diagnostics))
    }

    /// Changes the proxy's auxiliary PHP-CGI port.
    pub fn set_php_cgi_port(
        &self,
        name: ServiceName,
        port: u16,
    ) -> Result<(PortChange, Vec<Diagnostic>), ManagerError> {
        if name != ServiceName::Nginx {
            return Err(ManagerError::AuxPortUnsupported(name));
        }
        let reserved = self.port_reservations()?;
        let mut proxy = self.proxy.lock()?;
        let mut diagnostics = Vec::new();
        let change =
            proxy
                .settings_mut()
                .set_php_cgi_port(port, &reserved, &mut diagnostics)?;
        Ok((change, diagnostics))
    }

    /// Points a PHP-capable service's document root at an existing
    /// directory. Returns `Ok(false)` when the path does not exist.
    pub fn set_document_root(
        &self,
        name: ServiceName,
        path: &Path,
    ) -> Result<bool, ManagerError> {
        match name {
            ServiceName::Apache => self.web.lock()?.set_document_root(path),
            ServiceName::Nginx => self.proxy.lock()?.set_document_root(path),
            ServiceName::Mysql => Err(ManagerError::PhpUnsupported(name)),
        }
    }

    /// Switches a PHP-capable service's active PHP runtime.
    pub fn set_php_version(
        &self,
        name: ServiceName,
        label: &str,
    ) -> Result<(), ManagerError> {
        match name {
            ServiceName::Apache => self.web.lock()?.set_php_version(label),
            ServiceName::Nginx => self.proxy.lock()?.set_php_version(label),
            ServiceName::Mysql => Err(ManagerError::PhpUnsupported(name)),
        }
    }
}
