#![allow(dead_code)]

use std::{
    fs,
    os::unix::fs::PermissionsExt,
    path::{Path, PathBuf},
    sync::mpsc::Receiver,
    thread,
    time::{Duration, Instant},
};

use serde_json::json;
use servstack::{
    events::Notification, manager::ServiceManager, services::ServiceName,
};

pub const APACHE_PORT: u16 = 18080;
pub const NGINX_PORT: u16 = 18081;
pub const PHP_CGI_PORT: u16 = 19000;
pub const MYSQL_PORT: u16 = 13306;

/// Paths of a fully populated fake stack.
pub struct Stack {
    pub app_root: PathBuf,
    pub document_path: PathBuf,
    pub docroot: PathBuf,
    pub apache_install: PathBuf,
    pub nginx_install: PathBuf,
    pub mysql_install: PathBuf,
    pub php_install: PathBuf,
}

/// Builds three fake installs with native config files and long-running
/// stand-in executables, plus the app-level includes and a configuration
/// document pointing at all of it.
pub fn build_stack(dir: &Path) -> Stack {
    let app_root = dir.join("app");
    let docroot = dir.join("www");
    let apache_install = dir.join("apache/2.4.58");
    let nginx_install = dir.join("nginx/1.25.3");
    let mysql_install = dir.join("mysql/8.0.35");
    let php_install = dir.join("php/8.2.13");

    fs::create_dir_all(&docroot).expect("failed to create docroot");
    fs::create_dir_all(apache_install.join("conf")).expect("failed to create apache dirs");
    fs::create_dir_all(nginx_install.join("conf")).expect("failed to create nginx dirs");
    fs::create_dir_all(&mysql_install).expect("failed to create mysql dirs");
    fs::create_dir_all(app_root.join("conf/apache")).expect("failed to create app dirs");
    fs::create_dir_all(app_root.join("conf/nginx")).expect("failed to create app dirs");
    fs::create_dir_all(app_root.join("phpMyAdmin")).expect("failed to create app dirs");

    write_executable(&apache_install.join("bin/httpd"), "#!/bin/sh\nexec sleep 30\n");
    write_executable(&nginx_install.join("sbin/nginx"), "#!/bin/sh\nexec sleep 30\n");
    write_executable(&mysql_install.join("bin/mysqld"), "#!/bin/sh\nexec sleep 30\n");
    write_executable(&php_install.join("bin/php-cgi"), "#!/bin/sh\nexec sleep 30\n");

    fs::write(
        apache_install.join("conf/httpd.conf"),
        "ServerRoot \"/old\"\nListen 80\nInclude /old/conf/apache/php8.1.0_fcgid.conf\nDocumentRoot \"/old/root\"\n<Directory \"/old/root\">\n</Directory>\n",
    )
    .expect("failed to write httpd.conf");
    fs::write(
        app_root.join("conf/apache/php8.2.13_fcgid.conf"),
        "FcgidWrapper \"/old/php-cgi\" .php\nFcgidWrapper \"/old/php-cgi\" .html\n",
    )
    .expect("failed to write fcgid conf");
    fs::write(
        nginx_install.join("conf/nginx.conf"),
        "http {\n    server {\n        listen 80;\n        root /old/root;\n        include /old/conf/nginx/php_cgi.conf;\n    }\n}\n",
    )
    .expect("failed to write nginx.conf");
    fs::write(
        app_root.join("conf/nginx/php_cgi.conf"),
        "fastcgi_pass 127.0.0.1:9999;\nroot /old;\n",
    )
    .expect("failed to write php_cgi.conf");
    fs::write(
        mysql_install.join("my.ini"),
        "[mysqld]\nport=3300\ndatadir=/old/data\n",
    )
    .expect("failed to write my.ini");
    fs::write(
        app_root.join("phpMyAdmin/config.inc.php"),
        "<?php\n$cfg['Servers'][$i]['port'] = '3300';\n",
    )
    .expect("failed to write phpMyAdmin config");

    let document = json!({
        "servers": {
            "apache": {
                "config": {
                    "version": "2.4.58",
                    "php_version": "8.2.13",
                    "port": APACHE_PORT,
                    "document_root": &docroot,
                },
                "versions": { "2.4.58": &apache_install },
                "php_versions": { "8.2.13": &php_install },
            },
            "nginx": {
                "config": {
                    "version": "1.25.3",
                    "php_version": "8.2.13",
                    "port": NGINX_PORT,
                    "php_cgi_port": PHP_CGI_PORT,
                    "document_root": &docroot,
                },
                "versions": { "1.25.3": &nginx_install },
                "php_versions": { "8.2.13": &php_install },
            },
            "mysql": {
                "config": {
                    "version": "8.0.35",
                    "port": MYSQL_PORT,
                },
                "versions": { "8.0.35": &mysql_install },
            },
        },
    });
    let document_path = dir.join("config.json");
    fs::write(
        &document_path,
        serde_json::to_string_pretty(&document).unwrap(),
    )
    .expect("failed to write document");

    Stack {
        app_root,
        document_path,
        docroot,
        apache_install,
        nginx_install,
        mysql_install,
        php_install,
    }
}

/// Writes a stand-in executable shell script.
pub fn write_executable(path: &Path, contents: &str) {
    fs::create_dir_all(path.parent().unwrap()).expect("failed to create bin dir");
    fs::write(path, contents).expect("failed to write script");
    let mut permissions = fs::metadata(path).expect("missing script").permissions();
    permissions.set_mode(0o755);
    fs::set_permissions(path, permissions).expect("failed to chmod script");
}

/// Polls until the service reaches the expected running state.
pub fn wait_for_state(manager: &ServiceManager, name: ServiceName, running: bool) {
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        if manager.is_running(name).expect("state query failed") == running {
            return;
        }
        if Instant::now() >= deadline {
            panic!("Timed out waiting for {name} running={running}");
        }
        thread::sleep(Duration::from_millis(100));
    }
}

/// Receives notifications until one matches, returning it. Earlier
/// non-matching events are discarded.
pub fn wait_for_notification<F>(rx: &Receiver<Notification>, matches: F) -> Notification
where
    F: Fn(&Notification) -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    loop {
        let now = Instant::now();
        if now >= deadline {
            panic!("Timed out waiting for notification");
        }
        if let Ok(event) = rx.recv_timeout(deadline - now)
            && matches(&event)
        {
            return event;
        }
    }
}

/// Drains every pending notification.
pub fn drain(rx: &Receiver<Notification>) -> Vec<Notification> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
