//! The Nginx-style proxy server and its PHP-CGI helper process.
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{debug, error, warn};

use crate::{
    config::{NginxConfig, NginxEntry},
    error::{Diagnostic, ManagerError},
    events::{EventSender, Notification, RunningStates},
    patcher::{self, PatchRule},
    process::{self, ProcessState, ProcessSupervisor},
    services::{
        self, PhpCapable, PortChange, PortReservations, Service, ServiceName,
        ServiceSettings, STOP_TIMEOUT,
    },
};

/// In-memory settings of the proxy server, kept consistent with
/// `conf/nginx.conf` inside the active install and with the app-level
/// `conf/nginx/php_cgi.conf`.
#[derive(Debug, Clone)]
pub struct ProxySettings {
    app_root: PathBuf,
    version: String,
    install_path: PathBuf,
    port: u16,
    php_cgi_port: u16,
    document_root: PathBuf,
    php_version: String,
    php_path: PathBuf,
    versions: BTreeMap<String, PathBuf>,
    php_versions: BTreeMap<String, PathBuf>,
}

impl ProxySettings {
    /// Unconfigured settings rooted at the application directory.
    pub fn new(app_root: &Path) -> Self {
        Self {
            app_root: app_root.to_path_buf(),
            version: String::new(),
            install_path: PathBuf::new(),
            port: 0,
            php_cgi_port: 0,
            document_root: PathBuf::new(),
            php_version: String::new(),
            php_path: PathBuf::new(),
            versions: BTreeMap::new(),
            php_versions: BTreeMap::new(),
        }
    }

    /// Stages settings from a document entry, validating every field and
    /// patching the native files of the selected install.
    pub fn from_entry(
        entry: &NginxEntry,
        app_root: &Path,
        reserved: &mut PortReservations,
    ) -> Result<Self, ManagerError> {
        let mut settings = Self::new(app_root);
        settings.versions = entry.versions.clone();
        settings.php_versions = entry.php_versions.clone();

        settings.set_version(&entry.config.version)?;
        settings.set_php_version(&entry.config.php_version)?;

        let mut diagnostics = Vec::new();
        settings.set_port(entry.config.port, reserved, &mut diagnostics)?;
        reserved.reserve(settings.port);
        settings.set_php_cgi_port(entry.config.php_cgi_port, reserved, &mut diagnostics)?;
        if !diagnostics.is_empty() {
            return Err(ManagerError::InvalidSettings {
                service: ServiceName::Nginx,
                diagnostics,
            });
        }
        if !settings.set_document_root(&entry.config.document_root)? {
            return Err(ManagerError::DocumentInvalid(format!(
                "document root '{}' does not exist",
                entry.config.document_root.display()
            )));
        }

        reserved.reserve(settings.php_cgi_port);
        Ok(settings)
    }

    fn conf_path(&self) -> PathBuf {
        self.install_path.join("conf/nginx.conf")
    }

    fn php_cgi_conf_path(&self) -> PathBuf {
        self.app_root.join("conf/nginx/php_cgi.conf")
    }

    /// Switches the active version.
    pub fn set_version(&mut self, label: &str) -> Result<(), ManagerError> {
        let path = services::resolve_version(ServiceName::Nginx, &self.versions, label)?;
        self.version = label.to_string();
        self.install_path = path;
        Ok(())
    }

    /// Switches the active PHP runtime. The proxy reaches PHP through the
    /// helper process, so no native file changes here.
    pub fn set_php_version(&mut self, label: &str) -> Result<(), ManagerError> {
        let path =
            services::resolve_php_version(ServiceName::Nginx, &self.php_versions, label)?;
        self.php_version = label.to_string();
        self.php_path = path;
        Ok(())
    }

    /// Changes the listen port after range and reservation checks.
    pub fn set_port(
        &mut self,
        port: u16,
        reserved: &PortReservations,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<PortChange, ManagerError> {
        if let Some(unchanged) = services::check_port(self.port, port, reserved, diagnostics)
        {
            return Ok(unchanged);
        }
        let rule = PatchRule::new(r"listen\s+\d+;", format!("listen {port};"));
        patcher::patch_file(&self.conf_path(), &[rule])?;
        self.port = port;
        Ok(PortChange::Updated)
    }

    /// Changes the auxiliary port the PHP-CGI helper binds, rewriting the
    /// `fastcgi_pass` upstream in the app-level include.
    pub fn set_php_cgi_port(
        &mut self,
        port: u16,
        reserved: &PortReservations,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<PortChange, ManagerError> {
        if port == 0 {
            diagnostics.push(Diagnostic::InvalidPort(port));
            return Ok(PortChange::Unchanged);
        }
        if port == self.php_cgi_port {
            return Ok(PortChange::Unchanged);
        }
        if !reserved.is_free(port) {
            diagnostics.push(Diagnostic::AuxPortOccupied(port));
            return Ok(PortChange::Unchanged);
        }
        let rule = PatchRule::new(
            r"fastcgi_pass\s+127\.0\.0\.1:\d+;",
            format!("fastcgi_pass 127.0.0.1:{port};"),
        );
        patcher::patch_file_required(&self.php_cgi_conf_path(), &rule)?;
        self.php_cgi_port = port;
        Ok(PortChange::Updated)
    }

    /// Points the served document root at an existing directory.
    ///
    /// Returns `Ok(false)` without touching anything when the path does
    /// not exist. Indentation of the `root` directives is preserved.
    pub fn set_document_root(&mut self, path: &Path) -> Result<bool, ManagerError> {
        if !path.exists() {
            return Ok(false);
        }
        let rule = PatchRule::new(
            r"(?m)^(\s*)root\s+[^;]+;",
            format!("${{1}}root {};", path.display()),
        );
        patcher::patch_file(&self.conf_path(), &[rule])?;
        self.document_root = path.to_path_buf();
        Ok(true)
    }

    /// Snapshot written back into the configuration document.
    pub fn config(&self) -> NginxConfig {
        NginxConfig {
            version: self.version.clone(),
            php_version: self.php_version.clone(),
            port: self.port,
            php_cgi_port: self.php_cgi_port,
            document_root: self.document_root.clone(),
        }
    }

    /// Rewrites every absolute-path directive of every installed version
    /// plus the app-level PHP-CGI include.
    pub fn rewrite_install_paths(&self) -> Result<(), ManagerError> {
        let include = self.php_cgi_conf_path();
        for base in self.versions.values() {
            let conf = base.join("conf/nginx.conf");
            let rule = PatchRule::new(
                r"include\s+\S+/conf/nginx/php_cgi\.conf;",
                format!("include {};", include.display()),
            );
            patcher::patch_file(&conf, &[rule])?;
        }
        let root_rule = PatchRule::new(
            r"(?m)^(\s*)root\s+[^;]+;",
            format!("${{1}}root {};", self.app_root.display()),
        );
        patcher::patch_file(&include, &[root_rule])?;
        Ok(())
    }
}

/// The proxy server service: settings plus a supervised nginx process and
/// its PHP-CGI helper.
pub struct ProxyServer {
    settings: ProxySettings,
    supervisor: ProcessSupervisor,
    php_cgi: ProcessSupervisor,
    states: Arc<RunningStates>,
    events: EventSender,
}

impl ProxyServer {
    /// Creates an unconfigured proxy server.
    pub fn new(app_root: &Path, states: Arc<RunningStates>, events: EventSender) -> Self {
        Self {
            settings: ProxySettings::new(app_root),
            supervisor: ProcessSupervisor::new("nginx"),
            php_cgi: ProcessSupervisor::new("php-cgi"),
            states,
            events,
        }
    }

    /// Commits staged settings. Callers do not apply settings while the
    /// service is running.
    pub fn apply(&mut self, settings: ProxySettings) {
        self.settings = settings;
    }

    /// The in-memory settings.
    pub fn settings(&self) -> &ProxySettings {
        &self.settings
    }

    /// Mutable access for per-field setters dispatched by the registry.
    pub fn settings_mut(&mut self) -> &mut ProxySettings {
        &mut self.settings
    }

    /// Points the served document root at an existing directory.
    pub fn set_document_root(&mut self, path: &Path) -> Result<bool, ManagerError> {
        self.settings.set_document_root(path)
    }

    /// Starts the PHP-CGI helper on the auxiliary port.
    ///
    /// Helper problems never roll back the already-running main process;
    /// they surface as warnings.
    fn start_php_cgi(&mut self) {
        let port = self.settings.php_cgi_port;
        if process::port_occupied(port) {
            warn!(port, "PHP-CGI port is already in use; helper not started");
            self.events.emit(Notification::Warning {
                service: ServiceName::Nginx,
                message: format!("The PHP-CGI port {port} is already in use."),
            });
            return;
        }

        let executable = self.settings.php_path.join("bin/php-cgi");
        let args = vec!["-b".to_string(), format!("127.0.0.1:{port}")];
        let events = self.events.clone();
        let result = self.php_cgi.spawn(&executable, &args, None, move |status| {
            warn!(%status, "PHP-CGI helper exited unexpectedly");
            events.emit(Notification::Warning {
                service: ServiceName::Nginx,
                message: "The PHP-CGI helper stopped unexpectedly.".to_string(),
            });
        });
        if let Err(err) = result {
            warn!(error = %err, "Failed to start the PHP-CGI helper");
            self.events.emit(Notification::Warning {
                service: ServiceName::Nginx,
                message: format!("Failed to start the PHP-CGI helper: {err}"),
            });
        }
    }
}

impl Service for ProxyServer {
    fn name(&self) -> ServiceName {
        ServiceName::Nginx
    }

    fn start(&mut self) -> Result<(), ManagerError> {
        if self.supervisor.state() != ProcessState::Stopped {
            return Err(ManagerError::AlreadyRunning {
                service: ServiceName::Nginx,
            });
        }
        if process::port_occupied(self.settings.port) {
            return Err(ManagerError::PortInUse {
                service: ServiceName::Nginx,
                port: self.settings.port,
            });
        }

        let executable = self.settings.install_path.join("sbin/nginx");
        let workdir = self.settings.install_path.clone();
        let states = Arc::clone(&self.states);
        let events = self.events.clone();
        self.supervisor
            .spawn(&executable, &[], Some(&workdir), move |status| {
                error!(%status, "Nginx exited unexpectedly");
                events.emit(Notification::Error {
                    title: "The server was stopped".to_string(),
                    message: "The Nginx server stopped due to an internal error. \
                              Check the Nginx error log for details."
                        .to_string(),
                });
                let _ = states.set(ServiceName::Nginx, false);
            })?;
        self.states.set(ServiceName::Nginx, true)?;

        self.start_php_cgi();
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ManagerError> {
        if !self.supervisor.is_running() {
            return Err(ManagerError::NotRunning {
                service: ServiceName::Nginx,
            });
        }
        // Main process first, then the helper.
        self.supervisor.terminate(STOP_TIMEOUT)?;
        if self.php_cgi.is_running() {
            self.php_cgi.terminate(STOP_TIMEOUT)?;
        } else {
            debug!("PHP-CGI helper already stopped");
        }
        self.states.set(ServiceName::Nginx, false)?;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    fn config(&self) -> ServiceSettings {
        ServiceSettings::Nginx(self.settings.config())
    }

    fn set_version(&mut self, label: &str) -> Result<(), ManagerError> {
        self.settings.set_version(label)
    }

    fn set_port(
        &mut self,
        port: u16,
        reserved: &PortReservations,
        diagnostics: &mut Vec<Diagnostic>,
    ) -> Result<PortChange, ManagerError> {
        self.settings.set_port(port, reserved, diagnostics)
    }

    fn ports(&self) -> Vec<u16> {
        vec![self.settings.port, self.settings.php_cgi_port]
    }

    fn installed_versions(&self) -> BTreeMap<String, PathBuf> {
        self.settings.versions.clone()
    }
}

impl PhpCapable for ProxyServer {
    fn set_php_version(&mut self, label: &str) -> Result<(), ManagerError> {
        self.settings.set_php_version(label)
    }

    fn php_path(&self) -> &Path {
        &self.settings.php_path
    }

    fn installed_php_versions(&self) -> BTreeMap<String, PathBuf> {
        self.settings.php_versions.clone()
    }
}
