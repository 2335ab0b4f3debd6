use std::{
    error::Error,
    path::PathBuf,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
        mpsc::RecvTimeoutError,
    },
    time::Duration,
};

use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use servstack::{
    cli::{Cli, Commands, parse_args},
    config,
    events::{self, Notification},
    manager::ServiceManager,
};

fn main() -> Result<(), Box<dyn Error>> {
    let args = parse_args();
    init_logging(&args);

    match args.command {
        Commands::Run {
            config,
            app_root,
            stop_timeout,
        } => run(&config, app_root, Duration::from_secs(stop_timeout)),
        Commands::Check { config } => check(&config),
    }
}

fn init_logging(args: &Cli) {
    let filter = if let Some(level) = args.log_level {
        EnvFilter::new(level.as_str())
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn run(
    config_path: &str,
    app_root: Option<String>,
    stop_timeout: Duration,
) -> Result<(), Box<dyn Error>> {
    let document_path = resolve_path(config_path)?;
    let app_root = match app_root {
        Some(dir) => resolve_path(&dir)?,
        None => std::env::current_dir()?,
    };

    let (events, notifications) = events::channel();
    let manager = ServiceManager::new(&document_path, &app_root, events);
    manager.load()?;
    info!("Configuration loaded from {:?}", document_path);

    let interrupted = Arc::new(AtomicBool::new(false));
    {
        let interrupted = Arc::clone(&interrupted);
        ctrlc::set_handler(move || {
            interrupted.store(true, Ordering::SeqCst);
        })?;
    }

    manager.start_all();

    while !interrupted.load(Ordering::SeqCst) {
        match notifications.recv_timeout(Duration::from_millis(200)) {
            Ok(event) => report(&event),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }

    info!("Shutting down...");
    manager.shutdown(stop_timeout)?;
    // Drain whatever the shutdown produced.
    while let Ok(event) = notifications.try_recv() {
        report(&event);
    }

    Ok(())
}

fn check(config_path: &str) -> Result<(), Box<dyn Error>> {
    let document_path = resolve_path(config_path)?;
    let document = config::load_document(&document_path)?;

    println!("Configuration document is valid: {}", document_path.display());
    println!(
        "  apache: version {} on port {} ({} installed)",
        document.servers.apache.config.version,
        document.servers.apache.config.port,
        document.servers.apache.versions.len(),
    );
    println!(
        "  nginx:  version {} on port {} (php-cgi on {})",
        document.servers.nginx.config.version,
        document.servers.nginx.config.port,
        document.servers.nginx.config.php_cgi_port,
    );
    println!(
        "  mysql:  version {} on port {}",
        document.servers.mysql.config.version, document.servers.mysql.config.port,
    );
    Ok(())
}

fn report(event: &Notification) {
    match event {
        Notification::StateChanged { service, running } => {
            info!(service = %service, running, "Service state changed");
        }
        Notification::AllStopped => {
            info!("All services stopped");
        }
        Notification::Warning { service, message } => {
            warn!(service = %service, "{message}");
        }
        Notification::Error { title, message } => {
            error!("{title}: {message}");
        }
    }
}

fn resolve_path(path: &str) -> Result<PathBuf, Box<dyn Error>> {
    let candidate = PathBuf::from(path);
    if candidate.is_absolute() {
        return Ok(candidate);
    }

    let resolved = std::env::current_dir()?.join(&candidate);
    Ok(resolved.canonicalize().unwrap_or(resolved))
}
