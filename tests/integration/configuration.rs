#[path = "common/mod.rs"]
mod common;

use std::fs;

use common::{APACHE_PORT, MYSQL_PORT, build_stack};
use servstack::{
    config,
    error::ManagerError,
    events,
    manager::ServiceManager,
    services::{PortChange, ServiceName, ServiceSettings},
};
use tempfile::tempdir;

#[test]
fn load_applies_the_document_and_rewrites_installs() {
    let temp = tempdir().expect("failed to create tempdir");
    let stack = build_stack(temp.path());
    let (events, _rx) = events::channel();
    let manager = ServiceManager::new(&stack.document_path, &stack.app_root, events);

    manager.load().expect("failed to load configuration");

    let ServiceSettings::Apache(apache) = manager.get_config(ServiceName::Apache).unwrap()
    else {
        panic!("wrong settings variant");
    };
    assert_eq!(apache.port, APACHE_PORT);
    assert_eq!(apache.version, "2.4.58");
    assert_eq!(apache.document_root, stack.docroot);

    // The native files now reflect the document.
    let httpd = fs::read_to_string(stack.apache_install.join("conf/httpd.conf")).unwrap();
    assert!(httpd.contains(&format!("Listen {APACHE_PORT}")));
    assert!(httpd.contains(&format!(
        "Include {}",
        stack.app_root.join("conf/apache/php8.2.13_fcgid.conf").display()
    )));
    let my_ini = fs::read_to_string(stack.mysql_install.join("my.ini")).unwrap();
    assert!(my_ini.contains(&format!("port={MYSQL_PORT}")));
    assert!(my_ini.contains(&format!(
        "datadir={}",
        stack.mysql_install.join("data").display()
    )));
    let php_cgi =
        fs::read_to_string(stack.app_root.join("conf/nginx/php_cgi.conf")).unwrap();
    assert!(php_cgi.contains(&format!("root {};", stack.app_root.display())));
}

#[test]
fn missing_required_subkey_loads_nothing() {
    let temp = tempdir().expect("failed to create tempdir");
    let stack = build_stack(temp.path());

    // Drop a required field from the mysql section.
    let mut document: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&stack.document_path).unwrap()).unwrap();
    document["servers"]["mysql"]["config"]
        .as_object_mut()
        .unwrap()
        .remove("port");
    fs::write(&stack.document_path, document.to_string()).unwrap();

    let (events, _rx) = events::channel();
    let manager = ServiceManager::new(&stack.document_path, &stack.app_root, events);
    let result = manager.load();

    assert!(matches!(result, Err(ManagerError::DocumentParse(_))));

    // Not even the valid services were applied.
    let ServiceSettings::Apache(apache) = manager.get_config(ServiceName::Apache).unwrap()
    else {
        panic!("wrong settings variant");
    };
    assert_eq!(apache.port, 0);
    assert_eq!(apache.version, "");
}

#[test]
fn save_writes_active_settings_back() {
    let temp = tempdir().expect("failed to create tempdir");
    let stack = build_stack(temp.path());
    let (events, _rx) = events::channel();
    let manager = ServiceManager::new(&stack.document_path, &stack.app_root, events);
    manager.load().expect("failed to load configuration");

    let (change, diagnostics) = manager.set_port(ServiceName::Mysql, 13307).unwrap();
    assert_eq!(change, PortChange::Updated);
    assert!(diagnostics.is_empty());

    manager.save().expect("failed to save configuration");

    let document = config::load_document(&stack.document_path).unwrap();
    assert_eq!(document.servers.mysql.config.port, 13307);
    assert_eq!(document.servers.apache.config.port, APACHE_PORT);
    // Installed-version maps survive the save untouched.
    assert!(document.servers.mysql.versions.contains_key("8.0.35"));

    // The database port change chained into the admin UI config.
    let admin =
        fs::read_to_string(stack.app_root.join("phpMyAdmin/config.inc.php")).unwrap();
    assert!(admin.contains("$cfg['Servers'][$i]['port'] = '13307';"));
}

#[test]
fn document_root_round_trip() {
    let temp = tempdir().expect("failed to create tempdir");
    let stack = build_stack(temp.path());
    let (events, _rx) = events::channel();
    let manager = ServiceManager::new(&stack.document_path, &stack.app_root, events);
    manager.load().expect("failed to load configuration");

    let new_root = temp.path().join("public");
    fs::create_dir_all(&new_root).unwrap();

    assert!(manager.set_document_root(ServiceName::Apache, &new_root).unwrap());
    let ServiceSettings::Apache(apache) = manager.get_config(ServiceName::Apache).unwrap()
    else {
        panic!("wrong settings variant");
    };
    assert_eq!(apache.document_root, new_root);
    let httpd = fs::read_to_string(stack.apache_install.join("conf/httpd.conf")).unwrap();
    assert!(httpd.contains(&format!(r#"DocumentRoot "{}""#, new_root.display())));

    // A nonexistent path is refused without an error.
    let missing = temp.path().join("nonexistent");
    assert!(!manager.set_document_root(ServiceName::Apache, &missing).unwrap());
    let ServiceSettings::Apache(apache) = manager.get_config(ServiceName::Apache).unwrap()
    else {
        panic!("wrong settings variant");
    };
    assert_eq!(apache.document_root, new_root);
}

#[test]
fn version_queries_and_php_guards() {
    let temp = tempdir().expect("failed to create tempdir");
    let stack = build_stack(temp.path());
    let (events, _rx) = events::channel();
    let manager = ServiceManager::new(&stack.document_path, &stack.app_root, events);
    manager.load().expect("failed to load configuration");

    let versions = manager.available_versions(ServiceName::Apache).unwrap();
    assert!(versions.contains_key("2.4.58"));

    let php_versions = manager.available_php_versions(ServiceName::Nginx).unwrap();
    assert!(php_versions.contains_key("8.2.13"));
    assert_eq!(
        manager.php_path(ServiceName::Nginx).unwrap(),
        stack.php_install
    );

    assert!(matches!(
        manager.available_php_versions(ServiceName::Mysql),
        Err(ManagerError::PhpUnsupported(ServiceName::Mysql))
    ));
    assert!(matches!(
        manager.set_version(ServiceName::Mysql, "9.9.9"),
        Err(ManagerError::VersionNotFound { .. })
    ));
}
