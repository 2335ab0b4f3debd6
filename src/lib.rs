//! Servstack is a local development stack manager used to run, monitor and
//! configure an Apache-style web server, an Nginx-style proxy with its
//! PHP-CGI helper, and a MySQL-style database server. It keeps the native
//! configuration files of each install authoritative, supervises the
//! server processes, and reports every observable event through a typed
//! notification channel.

/// CLI interface.
pub mod cli;

/// The durable configuration document.
pub mod config;

/// Error handling.
pub mod error;

/// Notifications and the shared running-state table.
pub mod events;

/// The top-level manager context.
pub mod manager;

/// Native configuration file patching.
pub mod patcher;

/// OS process supervision.
pub mod process;

/// The service registry and per-name dispatch.
pub mod registry;

/// Per-service lifecycle workers.
pub mod runner;

/// The managed services.
pub mod services;

/// Coordinated stop of every running service.
pub mod shutdown;
