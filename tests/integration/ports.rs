#[path = "common/mod.rs"]
mod common;

use std::{fs, net::TcpListener};

use common::{
    APACHE_PORT, MYSQL_PORT, build_stack, wait_for_notification, wait_for_state,
};
use servstack::{
    error::{Diagnostic, ManagerError},
    events::{self, Notification},
    manager::ServiceManager,
    services::{PortChange, ServiceName, ServiceSettings},
};
use tempfile::tempdir;

#[test]
fn duplicate_ports_in_the_document_fail_the_load() {
    let temp = tempdir().expect("failed to create tempdir");
    let stack = build_stack(temp.path());

    let mut document: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&stack.document_path).unwrap()).unwrap();
    document["servers"]["nginx"]["config"]["port"] = serde_json::json!(APACHE_PORT);
    fs::write(&stack.document_path, document.to_string()).unwrap();

    let (events, _rx) = events::channel();
    let manager = ServiceManager::new(&stack.document_path, &stack.app_root, events);
    let result = manager.load();

    match result {
        Err(ManagerError::InvalidSettings {
            service,
            diagnostics,
        }) => {
            assert_eq!(service, ServiceName::Nginx);
            assert_eq!(diagnostics, vec![Diagnostic::PortOccupied(APACHE_PORT)]);
        }
        other => panic!("unexpected load result: {other:?}"),
    }

    let ServiceSettings::Nginx(nginx) = manager.get_config(ServiceName::Nginx).unwrap()
    else {
        panic!("wrong settings variant");
    };
    assert_eq!(nginx.port, 0);
}

#[test]
fn in_app_conflict_is_a_diagnostic_and_leaves_the_port_alone() {
    let temp = tempdir().expect("failed to create tempdir");
    let stack = build_stack(temp.path());
    let (events, _rx) = events::channel();
    let manager = ServiceManager::new(&stack.document_path, &stack.app_root, events);
    manager.load().expect("failed to load configuration");

    let (change, diagnostics) =
        manager.set_port(ServiceName::Apache, MYSQL_PORT).unwrap();

    assert_eq!(change, PortChange::Unchanged);
    assert_eq!(diagnostics, vec![Diagnostic::PortOccupied(MYSQL_PORT)]);

    let ServiceSettings::Apache(apache) = manager.get_config(ServiceName::Apache).unwrap()
    else {
        panic!("wrong settings variant");
    };
    assert_eq!(apache.port, APACHE_PORT);
    let httpd = fs::read_to_string(stack.apache_install.join("conf/httpd.conf")).unwrap();
    assert!(httpd.contains(&format!("Listen {APACHE_PORT}")));
}

#[test]
fn setting_the_same_port_twice_is_a_no_op() {
    let temp = tempdir().expect("failed to create tempdir");
    let stack = build_stack(temp.path());
    let (events, _rx) = events::channel();
    let manager = ServiceManager::new(&stack.document_path, &stack.app_root, events);
    manager.load().expect("failed to load configuration");

    let (change, _) = manager.set_port(ServiceName::Apache, 18085).unwrap();
    assert_eq!(change, PortChange::Updated);
    let before = fs::read_to_string(stack.apache_install.join("conf/httpd.conf")).unwrap();

    let (change, diagnostics) = manager.set_port(ServiceName::Apache, 18085).unwrap();
    assert_eq!(change, PortChange::Unchanged);
    assert!(diagnostics.is_empty());
    let after = fs::read_to_string(stack.apache_install.join("conf/httpd.conf")).unwrap();
    assert_eq!(before, after);
}

#[test]
fn occupied_host_port_blocks_the_start_with_a_warning() {
    let temp = tempdir().expect("failed to create tempdir");
    let stack = build_stack(temp.path());
    let (events, rx) = events::channel();
    let manager = ServiceManager::new(&stack.document_path, &stack.app_root, events);
    manager.load().expect("failed to load configuration");

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let taken_port = listener.local_addr().unwrap().port();
    let (change, diagnostics) =
        manager.set_port(ServiceName::Apache, taken_port).unwrap();
    assert_eq!(change, PortChange::Updated);
    assert!(diagnostics.is_empty());

    manager.start(ServiceName::Apache);

    let event = wait_for_notification(&rx, |event| {
        matches!(event, Notification::Warning { .. })
    });
    let Notification::Warning { service, message } = event else {
        unreachable!()
    };
    assert_eq!(service, ServiceName::Apache);
    assert!(message.contains(&taken_port.to_string()));
    assert!(!manager.is_running(ServiceName::Apache).unwrap());
}

#[test]
fn occupied_helper_port_warns_but_the_proxy_keeps_running() {
    let temp = tempdir().expect("failed to create tempdir");
    let stack = build_stack(temp.path());
    let (events, rx) = events::channel();
    let manager = ServiceManager::new(&stack.document_path, &stack.app_root, events);
    manager.load().expect("failed to load configuration");

    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let taken_port = listener.local_addr().unwrap().port();
    let (change, diagnostics) = manager
        .set_php_cgi_port(ServiceName::Nginx, taken_port)
        .unwrap();
    assert_eq!(change, PortChange::Updated);
    assert!(diagnostics.is_empty());

    manager.start(ServiceName::Nginx);
    wait_for_state(&manager, ServiceName::Nginx, true);

    let event = wait_for_notification(&rx, |event| {
        matches!(event, Notification::Warning { .. })
    });
    let Notification::Warning { message, .. } = event else {
        unreachable!()
    };
    assert!(message.contains("PHP-CGI"));
    assert!(manager.is_running(ServiceName::Nginx).unwrap());

    manager.stop(ServiceName::Nginx);
    wait_for_state(&manager, ServiceName::Nginx, false);
}
