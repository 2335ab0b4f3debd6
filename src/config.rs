//! The durable configuration document for servstack.
//!
//! The document is a single JSON file describing every managed service:
//! its active settings (`config`), the installed versions available to it
//! (`versions`) and, for PHP-capable services, the installed PHP runtimes
//! (`php_versions`). Deserialization is strict: a missing or mistyped
//! required field fails the whole load and nothing is applied.
use std::{
    collections::BTreeMap,
    fs,
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::error::ManagerError;

/// Root of the configuration document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigDocument {
    /// The per-service sections.
    pub servers: Servers,
}

/// The fixed set of managed server sections.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Servers {
    /// Web server section.
    pub apache: ApacheEntry,
    /// Proxy server section.
    pub nginx: NginxEntry,
    /// Database server section.
    pub mysql: MysqlEntry,
}

/// Web server section: active settings plus installed versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApacheEntry {
    /// Active settings.
    pub config: ApacheConfig,
    /// Installed server versions, label to install path.
    pub versions: BTreeMap<String, PathBuf>,
    /// Installed PHP runtimes, label to install path.
    pub php_versions: BTreeMap<String, PathBuf>,
}

/// Proxy server section: active settings plus installed versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NginxEntry {
    /// Active settings.
    pub config: NginxConfig,
    /// Installed server versions, label to install path.
    pub versions: BTreeMap<String, PathBuf>,
    /// Installed PHP runtimes, label to install path.
    pub php_versions: BTreeMap<String, PathBuf>,
}

/// Database server section: active settings plus installed versions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MysqlEntry {
    /// Active settings.
    pub config: MysqlConfig,
    /// Installed server versions, label to install path.
    pub versions: BTreeMap<String, PathBuf>,
}

/// Active settings of the web server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApacheConfig {
    /// Active version label.
    pub version: String,
    /// Active PHP runtime label.
    pub php_version: String,
    /// Listen port.
    pub port: u16,
    /// Served document root.
    pub document_root: PathBuf,
}

/// Active settings of the proxy server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NginxConfig {
    /// Active version label.
    pub version: String,
    /// Active PHP runtime label.
    pub php_version: String,
    /// Listen port.
    pub port: u16,
    /// Auxiliary port the PHP-CGI helper binds.
    pub php_cgi_port: u16,
    /// Served document root.
    pub document_root: PathBuf,
}

/// Active settings of the database server.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MysqlConfig {
    /// Active version label.
    pub version: String,
    /// Listen port.
    pub port: u16,
}

/// Loads and parses the configuration document.
pub fn load_document(path: &Path) -> Result<ConfigDocument, ManagerError> {
    let content = fs::read_to_string(path).map_err(ManagerError::DocumentRead)?;
    let document = serde_json::from_str(&content)?;
    Ok(document)
}

/// Serializes the document back to disk, replacing the previous contents.
pub fn save_document(document: &ConfigDocument, path: &Path) -> Result<(), ManagerError> {
    let content = serde_json::to_string_pretty(document)?;
    fs::write(path, content).map_err(|source| ManagerError::ConfigFileIo {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn sample_document_json() -> &'static str {
    r#"{
        "servers": {
            "apache": {
                "config": {
                    "version": "2.4.58",
                    "php_version": "8.2.13",
                    "port": 8080,
                    "document_root": "/srv/www"
                },
                "versions": { "2.4.58": "/opt/stack/apache/2.4.58" },
                "php_versions": { "8.2.13": "/opt/stack/php/8.2.13" }
            },
            "nginx": {
                "config": {
                    "version": "1.25.3",
                    "php_version": "8.2.13",
                    "port": 8081,
                    "php_cgi_port": 9000,
                    "document_root": "/srv/www"
                },
                "versions": { "1.25.3": "/opt/stack/nginx/1.25.3" },
                "php_versions": { "8.2.13": "/opt/stack/php/8.2.13" }
            },
            "mysql": {
                "config": {
                    "version": "8.0.35",
                    "port": 3306
                },
                "versions": { "8.0.35": "/opt/stack/mysql/8.0.35" }
            }
        }
    }"#
}
