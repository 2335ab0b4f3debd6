//! The Apache-style web server.
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{error, info};

use crate::{
    config::{ApacheConfig, ApacheEntry},
    error::{Diagnostic, ManagerError},
    events::{EventSender, Notification, RunningStates},
    patcher::{self, PatchRule},
    process::{self, ProcessState, ProcessSupervisor},
    services::{
        self, PhpCapable, PortChange, PortReservations, Service, ServiceName,
        ServiceSettings, STOP_TIMEOUT,
    },
};

/// In-memory settings of the web server, kept consistent with
/// `conf/httpd.conf` inside the active install.
#[derive(Debug, Clone)]
pub struct WebSettings {
    app_root: PathBuf,
    version: String,
    install_path: PathBuf,
    port: u16,
    document_root: PathBuf,
    php_version: String,
    php_path: PathBuf,
    versions: BTreeMap<String, PathBuf>,
    php_versions: BTreeMap<String, PathBuf>,
}

impl WebSettings {
    /// Unconfigured settings rooted at the application directory.
    pub fn new(app_root: &Path) -> Self {
        Self {
            app_root: app_root.to_path_buf(),
            version: String::new(),
            install_path: PathBuf::new(),
            port: 0,
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
        entry: &ApacheEntry,
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
        if !diagnostics.is_empty() {
            return Err(ManagerError::InvalidSettings {
                service: ServiceName::Apache,
                diagnostics,
            });
        }
        if !settings.set_document_root(&entry.config.document_root)? {
            return Err(ManagerError::DocumentInvalid(format!(
                "document root '{}' does not exist",
                entry.config.document_root.display()
            )));
        }

        reserved.reserve(settings.port);
        Ok(settings)
    }

    fn conf_path(&self) -> PathBuf {
        self.install_path.join("conf/httpd.conf")
    }

    fn php_wrapper_path(&self, label: &str) -> PathBuf {
        self.app_root
            .join(format!("conf/apache/php{label}_fcgid.conf"))
    }

    /// Switches the active version.
    pub fn set_version(&mut self, label: &str) -> Result<(), ManagerError> {
        let path = services::resolve_version(ServiceName::Apache, &self.versions, label)?;
        self.version = label.to_string();
        self.install_path = path;
        Ok(())
    }

    /// Switches the active PHP runtime and repoints the PHP include line
    /// in httpd.conf. The include must already be present.
    pub fn set_php_version(&mut self, label: &str) -> Result<(), ManagerError> {
        let path =
            services::resolve_php_version(ServiceName::Apache, &self.php_versions, label)?;
        let rule = PatchRule::new(
            r"Include\s+\S*conf/apache/php\d+(?:\.\d+)*_fcgid\.conf",
            format!(
                "Include {}",
                self.php_wrapper_path(label).display()
            ),
        );
        patcher::patch_file_required(&self.conf_path(), &rule)?;
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
        let rule = PatchRule::new(r"Listen \d+", format!("Listen {port}"));
        patcher::patch_file(&self.conf_path(), &[rule])?;
        self.port = port;
        Ok(PortChange::Updated)
    }

    /// Points the served document root at an existing directory.
    ///
    /// Returns `Ok(false)` without touching anything when the path does
    /// not exist. Rewrites the `DocumentRoot` line and the `<Directory>`
    /// line immediately following it.
    pub fn set_document_root(&mut self, path: &Path) -> Result<bool, ManagerError> {
        if !path.exists() {
            return Ok(false);
        }
        patch_document_root(&self.conf_path(), path)?;
        self.document_root = path.to_path_buf();
        Ok(true)
    }

    /// Snapshot written back into the configuration document.
    pub fn config(&self) -> ApacheConfig {
        ApacheConfig {
            version: self.version.clone(),
            php_version: self.php_version.clone(),
            port: self.port,
            document_root: self.document_root.clone(),
        }
    }

    /// Rewrites every absolute-path directive of every installed version
    /// so relocated installs keep working.
    pub fn rewrite_install_paths(&self) -> Result<(), ManagerError> {
        for (label, base) in &self.versions {
            let conf = base.join("conf/httpd.conf");
            let admin = self.app_root.join("phpMyAdmin");
            let rules = [
                PatchRule::new(
                    r#"ServerRoot\s+"[^"]+""#,
                    format!(r#"ServerRoot "{}""#, base.display()),
                ),
                PatchRule::new(
                    r"Alias\s+/phpMyAdmin\s+\S+",
                    format!(r#"Alias /phpMyAdmin "{}""#, admin.display()),
                ),
                PatchRule::new(
                    r#"<Directory\s+"[^"]+/phpMyAdmin">"#,
                    format!(r#"<Directory "{}">"#, admin.display()),
                ),
            ];
            info!(version = %label, "Rewriting web server install paths");
            patcher::patch_file(&conf, &rules)?;
        }
        for (label, php_base) in &self.php_versions {
            let wrapper = self.php_wrapper_path(label);
            let cgi = php_base.join("bin/php-cgi");
            let rules = [
                PatchRule::new(
                    r#"FcgidWrapper\s+"[^"]+"\s+\.php"#,
                    format!(r#"FcgidWrapper "{}" .php"#, cgi.display()),
                ),
                PatchRule::new(
                    r#"FcgidWrapper\s+"[^"]+"\s+\.html"#,
                    format!(r#"FcgidWrapper "{}" .html"#, cgi.display()),
                ),
            ];
            patcher::patch_file(&wrapper, &rules)?;
        }
        Ok(())
    }
}

/// Rewrites the `DocumentRoot` directive and the `<Directory>` block
/// opener on the next matching line, leaving every other line untouched
/// byte-for-byte, line terminators included.
fn patch_document_root(conf: &Path, root: &Path) -> Result<(), ManagerError> {
    let content = patcher::read_file(conf)?;
    let doc_line = regex::Regex::new(r#"^DocumentRoot\s+"[^"]+""#).expect("static pattern");
    let dir_line = regex::Regex::new(r#"^<Directory\s+"[^"]+">"#).expect("static pattern");

    let mut rewritten = String::with_capacity(content.len());
    let mut expect_directory = false;
    for line in content.split_inclusive('\n') {
        let (body, terminator) = split_terminator(line);
        if doc_line.is_match(body) {
            rewritten.push_str(&format!(r#"DocumentRoot "{}""#, root.display()));
            rewritten.push_str(terminator);
            expect_directory = true;
        } else if expect_directory && dir_line.is_match(body) {
            rewritten.push_str(&format!(r#"<Directory "{}">"#, root.display()));
            rewritten.push_str(terminator);
            expect_directory = false;
        } else {
            rewritten.push_str(line);
        }
    }

    if rewritten != content {
        patcher::write_file(conf, &rewritten)?;
    }
    Ok(())
}

fn split_terminator(line: &str) -> (&str, &str) {
    if let Some(body) = line.strip_suffix("\r\n") {
        (body, "\r\n")
    } else if let Some(body) = line.strip_suffix('\n') {
        (body, "\n")
    } else {
        (line, "")
    }
}

/// The web server service: settings plus a supervised httpd process.
pub struct WebServer {
    settings: WebSettings,
    supervisor: ProcessSupervisor,
    states: Arc<RunningStates>,
    events: EventSender,
}

impl WebServer {
    /// Creates an unconfigured web server.
    pub fn new(app_root: &Path, states: Arc<RunningStates>, events: EventSender) -> Self {
        Self {
            settings: WebSettings::new(app_root),
            supervisor: ProcessSupervisor::new("apache"),
            states,
            events,
        }
    }

    /// Commits staged settings. Callers do not apply settings while the
    /// service is running.
    pub fn apply(&mut self, settings: WebSettings) {
        self.settings = settings;
    }

    /// The in-memory settings.
    pub fn settings(&self) -> &WebSettings {
        &self.settings
    }

    /// Mutable access for per-field setters dispatched by the registry.
    pub fn settings_mut(&mut self) -> &mut WebSettings {
        &mut self.settings
    }

    /// Points the served document root at an existing directory.
    pub fn set_document_root(&mut self, path: &Path) -> Result<bool, ManagerError> {
        self.settings.set_document_root(path)
    }
}

impl Service for WebServer {
    fn name(&self) -> ServiceName {
        ServiceName::Apache
    }

    fn start(&mut self) -> Result<(), ManagerError> {
        if self.supervisor.state() != ProcessState::Stopped {
            return Err(ManagerError::AlreadyRunning {
                service: ServiceName::Apache,
            });
        }
        if process::port_occupied(self.settings.port) {
            return Err(ManagerError::PortInUse {
                service: ServiceName::Apache,
                port: self.settings.port,
            });
        }

        let executable = self.settings.install_path.join("bin/httpd");
        let states = Arc::clone(&self.states);
        let events = self.events.clone();
        self.supervisor.spawn(&executable, &[], None, move |status| {
            error!(%status, "Apache exited unexpectedly");
            events.emit(Notification::Error {
                title: "The server was stopped".to_string(),
                message: "The Apache server stopped due to an internal error. \
                          Check the Apache error log for details."
                    .to_string(),
            });
            let _ = states.set(ServiceName::Apache, false);
        })?;
        self.states.set(ServiceName::Apache, true)?;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ManagerError> {
        if !self.supervisor.is_running() {
            return Err(ManagerError::NotRunning {
                service: ServiceName::Apache,
            });
        }
        self.supervisor.terminate(STOP_TIMEOUT)?;
        self.states.set(ServiceName::Apache, false)?;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    fn config(&self) -> ServiceSettings {
        ServiceSettings::Apache(self.settings.config())
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
        vec![self.settings.port]
    }

    fn installed_versions(&self) -> BTreeMap<String, PathBuf> {
        self.settings.versions.clone()
    }
}

impl PhpCapable for WebServer {
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
