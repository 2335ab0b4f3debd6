//! The MySQL-style database server.
//!
//! The database port is mirrored into the phpMyAdmin configuration so the
//! admin UI keeps pointing at the server after every port change.
use std::{
    collections::BTreeMap,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::{error, info};

use crate::{
    config::{MysqlConfig, MysqlEntry},
    error::{Diagnostic, ManagerError},
    events::{EventSender, Notification, RunningStates},
    patcher::{self, PatchRule},
    process::{self, ProcessState, ProcessSupervisor},
    services::{
        self, PortChange, PortReservations, Service, ServiceName, ServiceSettings,
        STOP_TIMEOUT,
    },
};

/// In-memory settings of the database server, kept consistent with the
/// install's `my.ini` and the phpMyAdmin `config.inc.php`.
#[derive(Debug, Clone)]
pub struct DatabaseSettings {
    app_root: PathBuf,
    version: String,
    install_path: PathBuf,
    port: u16,
    versions: BTreeMap<String, PathBuf>,
}

impl DatabaseSettings {
    /// Unconfigured settings rooted at the application directory.
    pub fn new(app_root: &Path) -> Self {
        Self {
            app_root: app_root.to_path_buf(),
            version: String::new(),
            install_path: PathBuf::new(),
            port: 0,
            versions: BTreeMap::new(),
        }
    }

    /// Stages settings from a document entry, validating every field and
    /// patching the native files of the selected install.
    pub fn from_entry(
        entry: &MysqlEntry,
        app_root: &Path,
        reserved: &mut PortReservations,
    ) -> Result<Self, ManagerError> {
        let mut settings = Self::new(app_root);
        settings.versions = entry.versions.clone();

        settings.set_version(&entry.config.version)?;

        let mut diagnostics = Vec::new();
        settings.set_port(entry.config.port, reserved, &mut diagnostics)?;
        if !diagnostics.is_empty() {
            return Err(ManagerError::InvalidSettings {
                service: ServiceName::Mysql,
                diagnostics,
            });
        }

        reserved.reserve(settings.port);
        Ok(settings)
    }

    fn conf_path(&self) -> PathBuf {
        self.install_path.join("my.ini")
    }

    fn admin_conf_path(&self) -> PathBuf {
        self.app_root.join("phpMyAdmin/config.inc.php")
    }

    /// Switches the active version.
    pub fn set_version(&mut self, label: &str) -> Result<(), ManagerError> {
        let path = services::resolve_version(ServiceName::Mysql, &self.versions, label)?;
        self.version = label.to_string();
        self.install_path = path;
        Ok(())
    }

    /// Changes the listen port, updating both `my.ini` and the phpMyAdmin
    /// server entry. Both directives must already be present.
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
        let port_rule = PatchRule::new(r"port=\d+", format!("port={port}"));
        patcher::patch_file_required(&self.conf_path(), &port_rule)?;

        let admin_rule = PatchRule::new(
            r"\$cfg\['Servers'\]\[\$i\]\['port'\]\s*=\s*'\d+';",
            format!("$$cfg['Servers'][$$i]['port'] = '{port}';"),
        );
        patcher::patch_file_required(&self.admin_conf_path(), &admin_rule)?;

        self.port = port;
        Ok(PortChange::Updated)
    }

    /// Snapshot written back into the configuration document.
    pub fn config(&self) -> MysqlConfig {
        MysqlConfig {
            version: self.version.clone(),
            port: self.port,
        }
    }

    /// Repoints the data directory of every installed version at the
    /// install's own `data` subdirectory.
    pub fn rewrite_install_paths(&self) -> Result<(), ManagerError> {
        for (label, base) in &self.versions {
            let rule = PatchRule::new(
                r"datadir\s*=\s*\S+",
                format!("datadir={}/data", base.display()),
            );
            info!(version = %label, "Rewriting database install paths");
            patcher::patch_file(&base.join("my.ini"), &[rule])?;
        }
        Ok(())
    }
}

/// The database server service: settings plus a supervised mysqld process.
pub struct DatabaseServer {
    settings: DatabaseSettings,
    supervisor: ProcessSupervisor,
    states: Arc<RunningStates>,
    events: EventSender,
}

impl DatabaseServer {
    /// Creates an unconfigured database server.
    pub fn new(app_root: &Path, states: Arc<RunningStates>, events: EventSender) -> Self {
        Self {
            settings: DatabaseSettings::new(app_root),
            supervisor: ProcessSupervisor::new("mysql"),
            states,
            events,
        }
    }

    /// Commits staged settings. Callers do not apply settings while the
    /// service is running.
    pub fn apply(&mut self, settings: DatabaseSettings) {
        self.settings = settings;
    }

    /// The in-memory settings.
    pub fn settings(&self) -> &DatabaseSettings {
        &self.settings
    }

    /// Mutable access for per-field setters dispatched by the registry.
    pub fn settings_mut(&mut self) -> &mut DatabaseSettings {
        &mut self.settings
    }
}

impl Service for DatabaseServer {
    fn name(&self) -> ServiceName {
        ServiceName::Mysql
    }

    fn start(&mut self) -> Result<(), ManagerError> {
        if self.supervisor.state() != ProcessState::Stopped {
            return Err(ManagerError::AlreadyRunning {
                service: ServiceName::Mysql,
            });
        }
        if process::port_occupied(self.settings.port) {
            return Err(ManagerError::PortInUse {
                service: ServiceName::Mysql,
                port: self.settings.port,
            });
        }

        let executable = self.settings.install_path.join("bin/mysqld");
        let states = Arc::clone(&self.states);
        let events = self.events.clone();
        self.supervisor.spawn(&executable, &[], None, move |status| {
            error!(%status, "MySQL exited unexpectedly");
            events.emit(Notification::Error {
                title: "The server was stopped".to_string(),
                message: "The MySQL server stopped due to an internal error. \
                          Check the MySQL error log for details."
                    .to_string(),
            });
            let _ = states.set(ServiceName::Mysql, false);
        })?;
        self.states.set(ServiceName::Mysql, true)?;
        Ok(())
    }

    fn stop(&mut self) -> Result<(), ManagerError> {
        if !self.supervisor.is_running() {
            return Err(ManagerError::NotRunning {
                service: ServiceName::Mysql,
            });
        }
        self.supervisor.terminate(STOP_TIMEOUT)?;
        self.states.set(ServiceName::Mysql, false)?;
        Ok(())
    }

    fn is_running(&self) -> bool {
        self.supervisor.is_running()
    }

    fn config(&self) -> ServiceSettings {
        ServiceSettings::Mysql(self.settings.config())
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
