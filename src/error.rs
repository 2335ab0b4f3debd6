//! Error handling for servstack.
use std::{path::PathBuf, process::ExitStatus, time::Duration};

use thiserror::Error;

use crate::services::ServiceName;

/// Defines all fatal errors that can occur in the stack manager.
///
/// Expected validation failures raised while changing settings are not
/// errors; they are collected as [`Diagnostic`] values so one attempt can
/// report every problem at once.
#[derive(Debug, Error)]
pub enum ManagerError {
    /// Error reading the configuration document from disk.
    #[error("Failed to read configuration document: {0}")]
    DocumentRead(#[from] std::io::Error),

    /// Error parsing the JSON configuration document.
    #[error("Configuration document is corrupted: {0}")]
    DocumentParse(#[from] serde_json::Error),

    /// The document parsed but carries values that cannot be applied.
    #[error("Configuration document is invalid: {0}")]
    DocumentInvalid(String),

    /// A PHP operation requested on a service without a PHP runtime.
    #[error("Service '{0}' does not support PHP")]
    PhpUnsupported(ServiceName),

    /// An auxiliary-port change requested on a service that runs no
    /// helper process.
    #[error("Service '{0}' has no auxiliary PHP-CGI port")]
    AuxPortUnsupported(ServiceName),

    /// `start` was requested while the service is not stopped.
    #[error("Failed to start '{service}': the server is already running")]
    AlreadyRunning {
        /// The service that was already running.
        service: ServiceName,
    },

    /// `stop` was requested while the service is not running.
    #[error("Failed to stop '{service}': the server is not running")]
    NotRunning {
        /// The service that was not running.
        service: ServiceName,
    },

    /// The configured port answered a TCP probe before start.
    #[error("Cannot start '{service}': port {port} is already in use")]
    PortInUse {
        /// The service whose port is occupied.
        service: ServiceName,
        /// The occupied port.
        port: u16,
    },

    /// A version label missing from the installed-versions map, or an
    /// install path that no longer exists on disk.
    #[error("Version '{version}' is not installed for '{service}'")]
    VersionNotFound {
        /// The service whose version was requested.
        service: ServiceName,
        /// The missing version label.
        version: String,
    },

    /// A PHP version label missing from the installed map, or a PHP
    /// runtime path that no longer exists on disk.
    #[error("PHP version '{version}' is not installed for '{service}'")]
    PhpVersionNotFound {
        /// The service whose PHP runtime was requested.
        service: ServiceName,
        /// The missing PHP version label.
        version: String,
    },

    /// A service executable is absent from its install.
    #[error("Executable not found: {path}")]
    ExecutableNotFound {
        /// The expected executable path.
        path: PathBuf,
    },

    /// Error spawning a managed process.
    #[error("Failed to start process '{label}': {source}")]
    ProcessStartFailed {
        /// The process label that failed to start.
        label: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// A managed process exited within the startup grace window.
    #[error("Process '{label}' exited during startup with {status}")]
    ProcessExitedEarly {
        /// The process label that exited.
        label: String,
        /// The observed exit status.
        status: ExitStatus,
    },

    /// Error delivering a signal to a managed process.
    #[error("Failed to signal process '{label}': {source}")]
    ProcessSignal {
        /// The process label that could not be signalled.
        label: String,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// A managed process did not terminate within the bounded wait.
    #[error("Process '{label}' did not stop within {timeout:?}")]
    StopTimeout {
        /// The process label that failed to stop.
        label: String,
        /// The bounded wait that elapsed.
        timeout: Duration,
    },

    /// A native configuration file that must exist does not.
    #[error("Configuration file not found: {path}")]
    ConfigFileMissing {
        /// The missing file path.
        path: PathBuf,
    },

    /// I/O failure while rewriting a native configuration file.
    #[error("Failed to rewrite configuration file {path}: {source}")]
    ConfigFileIo {
        /// The file being rewritten.
        path: PathBuf,
        /// The underlying error that occurred.
        #[source]
        source: std::io::Error,
    },

    /// A directive a patch requires was not present in the file.
    #[error("Directive matching `{directive}` not found in {path}")]
    DirectiveNotFound {
        /// The file that was searched.
        path: PathBuf,
        /// The directive pattern that had no match.
        directive: String,
    },

    /// Validation diagnostics collected while applying a configuration.
    #[error("Configuration for '{service}' has invalid values: {diagnostics:?}")]
    InvalidSettings {
        /// The service whose settings were rejected.
        service: ServiceName,
        /// Every problem found during the attempt.
        diagnostics: Vec<Diagnostic>,
    },

    /// Error for poisoned mutex.
    #[error("Mutex is poisoned: {0}")]
    MutexPoisonError(String),

    /// Not every service reached the stopped state before the deadline.
    #[error("Timed out waiting for all services to stop")]
    ShutdownTimeout,
}

/// Implement the `From` trait to convert a `std::sync::PoisonError` into a `ManagerError`.
impl<T> From<std::sync::PoisonError<T>> for ManagerError {
    /// Converts a `std::sync::PoisonError` into a `ManagerError`.
    fn from(err: std::sync::PoisonError<T>) -> Self {
        ManagerError::MutexPoisonError(err.to_string())
    }
}

/// A non-fatal validation problem found while changing service settings.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Diagnostic {
    /// The requested port is outside the valid range.
    #[error("port {0} is outside the valid range 1-65535")]
    InvalidPort(u16),

    /// The requested port is already reserved by a managed service.
    #[error("port {0} is already used by another service")]
    PortOccupied(u16),

    /// The requested auxiliary port is already reserved by a managed service.
    #[error("auxiliary port {0} is already used by another service")]
    AuxPortOccupied(u16),
}
