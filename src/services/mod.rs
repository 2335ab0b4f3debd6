//! The closed set of managed services and their shared contracts.
pub mod database;
pub mod proxy;
pub mod web;

use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    time::Duration,
};

use strum_macros::{AsRefStr, Display, EnumString};

use crate::{
    config::{ApacheConfig, MysqlConfig, NginxConfig},
    error::{Diagnostic, ManagerError},
};

pub use database::DatabaseServer;
pub use proxy::ProxyServer;
pub use web::WebServer;

/// Bounded wait for a service process to exit after SIGTERM.
pub(crate) const STOP_TIMEOUT: Duration = Duration::from_secs(5);

/// Identifies one of the managed services.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, EnumString, AsRefStr, Display,
)]
#[strum(serialize_all = "lowercase")]
pub enum ServiceName {
    /// The web server.
    Apache,
    /// The proxy server with its PHP-CGI helper.
    Nginx,
    /// The database server.
    Mysql,
}

impl ServiceName {
    /// Every managed service, in start order.
    pub const ALL: [ServiceName; 3] =
        [ServiceName::Apache, ServiceName::Nginx, ServiceName::Mysql];
}

/// Outcome of a port change request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortChange {
    /// The port was applied to memory and the native file.
    Updated,
    /// The requested port equals the current one; nothing was touched.
    Unchanged,
}

/// In-memory snapshot of every port reserved by the managed services,
/// active and auxiliary alike.
#[derive(Debug, Default, Clone)]
pub struct PortReservations {
    ports: Vec<u16>,
}

impl PortReservations {
    /// Records a reservation. Port 0 marks an unconfigured service and is
    /// never reserved.
    pub fn reserve(&mut self, port: u16) {
        if port != 0 && !self.ports.contains(&port) {
            self.ports.push(port);
        }
    }

    /// Whether no managed service holds the port.
    pub fn is_free(&self, port: u16) -> bool {
        !self.ports.contains(&port)
    }
}

/// A typed snapshot of one service's active settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceSettings {
    /// Web server settings.
    Apache(ApacheConfig),
    /// Proxy server settings.
    Nginx(NginxConfig),
    /// Database server settings.
    Mysql(MysqlConfig),
}

/// Lifecycle and configuration surface common to every managed service.
pub trait Service: Send {
    /// The service's identity.
    fn name(&self) -> ServiceName;

    /// Starts the service process(es).
    ///
    /// Fails `AlreadyRunning` unless the service is stopped and `PortInUse`
    /// when the configured port answers a TCP probe.
    fn start(&mut self) -> Result<(), ManagerError>;

    /// Stops the service process(es), descendants first.
    ///
    /// Fails `NotRunning` unless the service is running.
    fn stop(&mut self) -> Result<(), ManagerError>;

    /// Whether the main process is confirmed alive.
    fn is_running(&self) -> bool;

    /// A pure snapshot of the active settings.
    fn config(&self) -> ServiceSettings;

    /// Switches the active version to an installed label.
    fn set_version(&mut self, label: &str) -> Result<(), ManagerError>;

    /// Changes the listen port, patching the native configuration file.
    ///
    /// Expected failures (invalid range, port reserved in-app) are appended
    /// to `diagnostics` and leave the port unchanged; the `Err` path is for
    /// structural problems with the native file only.
    fn set_port(
        &mut self,
        port: u16,
        reserved: &PortReservations,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<PortChange, ManagerError>;

    /// Every port this service holds, active and auxiliary.
    fn ports(&self) -> Vec<u16>;

    /// The installed versions available to this service.
    fn installed_versions(&self) -> BTreeMap<String, PathBuf>;
}

/// Extra surface of services that run PHP.
pub trait PhpCapable {
    /// Switches the active PHP runtime to an installed label.
    fn set_php_version(&mut self, label: &str) -> Result<(), ManagerError>;

    /// Path of the active PHP runtime.
    fn php_path(&self) -> &Path;

    /// The installed PHP runtimes available to this service.
    fn installed_php_versions(&self) -> BTreeMap<String, PathBuf>;
}

/// Resolves a version label against an installed map, requiring the
/// install path to still exist on disk.
pub(crate) fn resolve_version(
    service: ServiceName,
    versions: &BTreeMap<String, PathBuf>,
    label: &str,
) -> Result<PathBuf, ManagerError> {
    let path = versions
        .get(label)
        .ok_or_else(|| ManagerError::VersionNotFound {
            service,
            version: label.to_string(),
        })?;
    if !path.exists() {
        return Err(ManagerError::VersionNotFound {
            service,
            version: label.to_string(),
        });
    }
    Ok(path.clone())
}

/// Resolves a PHP version label, requiring the runtime path to exist.
pub(crate) fn resolve_php_version(
    service: ServiceName,
    php_versions: &BTreeMap<String, PathBuf>,
    label: &str,
) -> Result<PathBuf, ManagerError> {
    let path = php_versions
        .get(label)
        .ok_or_else(|| ManagerError::PhpVersionNotFound {
            service,
            version: label.to_string(),
        })?;
    if !path.exists() {
        return Err(ManagerError::PhpVersionNotFound {
            service,
            version: label.to_string(),
        });
    }
    Ok(path.clone())
}

/// Validates a requested port against range and in-app reservations.
///
/// Returns `Some(Unchanged)` when the request needs no work, `None` when
/// the caller should apply the change.
pub(crate) fn check_port(
    current: u16,
    requested: u16,
    reserved: &PortReservations,
    diagnostics: &mut Vec<Diagnostic>,
) -> Option<PortChange> {
    if requested == 0 {
        diagnostics.push(Diagnostic::InvalidPort(requested));
        return Some(PortChange::Unchanged);
    }
    if requested == current {
        return Some(PortChange::Unchanged);
    }
    if !reserved.is_free(requested) {
        diagnostics.push(Diagnostic::PortOccupied(requested));
        return Some(PortChange::Unchanged);
    }
    None
}
