#[path = "common/mod.rs"]
mod common;

use std::time::Duration;

use common::{build_stack, drain, wait_for_notification, wait_for_state, write_executable};
use servstack::{
    events::{self, Notification},
    manager::ServiceManager,
    services::ServiceName,
};
use tempfile::tempdir;

#[test]
fn start_then_stop_round_trips_the_state() {
    let temp = tempdir().expect("failed to create tempdir");
    let stack = build_stack(temp.path());
    let (events, rx) = events::channel();
    let manager = ServiceManager::new(&stack.document_path, &stack.app_root, events);
    manager.load().expect("failed to load configuration");

    manager.start(ServiceName::Apache);
    wait_for_state(&manager, ServiceName::Apache, true);
    wait_for_notification(&rx, |event| {
        matches!(
            event,
            Notification::StateChanged {
                service: ServiceName::Apache,
                running: true,
            }
        )
    });

    manager.stop(ServiceName::Apache);
    wait_for_state(&manager, ServiceName::Apache, false);
    wait_for_notification(&rx, |event| {
        matches!(
            event,
            Notification::StateChanged {
                service: ServiceName::Apache,
                running: false,
            }
        )
    });
}

#[test]
fn starting_twice_reports_an_error_and_keeps_running() {
    let temp = tempdir().expect("failed to create tempdir");
    let stack = build_stack(temp.path());
    let (events, rx) = events::channel();
    let manager = ServiceManager::new(&stack.document_path, &stack.app_root, events);
    manager.load().expect("failed to load configuration");

    manager.start(ServiceName::Mysql);
    wait_for_state(&manager, ServiceName::Mysql, true);

    manager.start(ServiceName::Mysql);
    let event = wait_for_notification(&rx, |event| {
        matches!(event, Notification::Error { .. })
    });
    let Notification::Error { title, message } = event else {
        unreachable!()
    };
    assert_eq!(title, "Failed to start the server");
    assert!(message.contains("already running"));
    assert!(manager.is_running(ServiceName::Mysql).unwrap());

    manager.stop(ServiceName::Mysql);
    wait_for_state(&manager, ServiceName::Mysql, false);
}

#[test]
fn stopping_a_stopped_service_changes_nothing() {
    let temp = tempdir().expect("failed to create tempdir");
    let stack = build_stack(temp.path());
    let (events, _rx) = events::channel();
    let manager = ServiceManager::new(&stack.document_path, &stack.app_root, events);
    manager.load().expect("failed to load configuration");

    manager.stop(ServiceName::Apache);
    // The request is benign; the worker drains it without flipping state.
    std::thread::sleep(Duration::from_millis(300));
    assert!(!manager.is_running(ServiceName::Apache).unwrap());
}

#[test]
fn crash_flips_state_and_reports_an_error() {
    let temp = tempdir().expect("failed to create tempdir");
    let stack = build_stack(temp.path());
    // A database that dies shortly after starting.
    write_executable(
        &stack.mysql_install.join("bin/mysqld"),
        "#!/bin/sh\nsleep 1\nexit 1\n",
    );
    let (events, rx) = events::channel();
    let manager = ServiceManager::new(&stack.document_path, &stack.app_root, events);
    manager.load().expect("failed to load configuration");

    manager.start(ServiceName::Mysql);
    wait_for_state(&manager, ServiceName::Mysql, true);

    let event = wait_for_notification(&rx, |event| {
        matches!(event, Notification::Error { .. })
    });
    let Notification::Error { message, .. } = event else {
        unreachable!()
    };
    assert!(message.contains("internal error"));
    wait_for_state(&manager, ServiceName::Mysql, false);
}

#[test]
fn proxy_runs_its_php_cgi_helper() {
    let temp = tempdir().expect("failed to create tempdir");
    let stack = build_stack(temp.path());
    let (events, rx) = events::channel();
    let manager = ServiceManager::new(&stack.document_path, &stack.app_root, events);
    manager.load().expect("failed to load configuration");

    manager.start(ServiceName::Nginx);
    wait_for_state(&manager, ServiceName::Nginx, true);

    manager.stop(ServiceName::Nginx);
    wait_for_state(&manager, ServiceName::Nginx, false);

    // A healthy helper never produces warnings.
    let warnings = drain(&rx)
        .into_iter()
        .filter(|event| matches!(event, Notification::Warning { .. }))
        .count();
    assert_eq!(warnings, 0);
}

#[test]
fn shutdown_stops_everything_with_one_all_stopped_event() {
    let temp = tempdir().expect("failed to create tempdir");
    let stack = build_stack(temp.path());
    let (events, rx) = events::channel();
    let manager = ServiceManager::new(&stack.document_path, &stack.app_root, events);
    manager.load().expect("failed to load configuration");

    manager.start_all();
    for name in ServiceName::ALL {
        wait_for_state(&manager, name, true);
    }

    manager
        .shutdown(Duration::from_secs(20))
        .expect("shutdown timed out");

    for name in ServiceName::ALL {
        assert!(!manager.is_running(name).unwrap());
    }
    let all_stopped = drain(&rx)
        .into_iter()
        .filter(|event| *event == Notification::AllStopped)
        .count();
    assert_eq!(all_stopped, 1);
}
