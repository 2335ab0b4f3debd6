//! Supervision of a single managed OS process.
//!
//! Each service owns one [`ProcessSupervisor`] per executable it runs. The
//! supervisor spawns the process in its own process group, watches it from
//! a background thread, distinguishes deliberate stops from crashes via an
//! expected-stop flag, and terminates the whole process tree on stop with
//! SIGTERM followed by a bounded wait and SIGKILL escalation.
use std::{
    net::{SocketAddr, TcpStream},
    os::unix::process::CommandExt,
    path::Path,
    process::{Child, Command, ExitStatus, Stdio},
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
    },
    thread,
    time::{Duration, Instant},
};

use nix::{
    sys::signal::{Signal, kill},
    unistd::Pid,
};
use sysinfo::{Pid as SysPid, ProcessesToUpdate, System};
use tracing::{debug, error, info, warn};

use crate::error::ManagerError;

/// Window after spawn during which an exit is treated as a failed start.
const STARTUP_GRACE: Duration = Duration::from_millis(250);
/// Polling interval of the exit watcher thread.
const WATCH_INTERVAL: Duration = Duration::from_millis(100);
/// Bounded wait after SIGKILL before giving up on a stop.
const KILL_WAIT: Duration = Duration::from_secs(2);
/// TCP connect window for the port probe.
const PROBE_TIMEOUT: Duration = Duration::from_millis(100);

/// Lifecycle states of a supervised process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    /// No live process.
    Stopped,
    /// Spawn requested, startup grace window still open.
    Starting,
    /// Process confirmed alive.
    Running,
    /// Termination in progress.
    Stopping,
}

/// Supervises one OS process through spawn, watch and terminate.
#[derive(Debug)]
pub struct ProcessSupervisor {
    label: String,
    state: Arc<Mutex<ProcessState>>,
    child: Arc<Mutex<Option<Child>>>,
    expected_stop: Arc<AtomicBool>,
    watcher: Option<thread::JoinHandle<()>>,
}

impl ProcessSupervisor {
    /// Creates an idle supervisor with a label used in logs and errors.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            label: label.into(),
            state: Arc::new(Mutex::new(ProcessState::Stopped)),
            child: Arc::new(Mutex::new(None)),
            expected_stop: Arc::new(AtomicBool::new(false)),
            watcher: None,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessState {
        self.state
            .lock()
            .map(|guard| *guard)
            .unwrap_or(ProcessState::Stopped)
    }

    /// Whether the supervised process is confirmed alive.
    pub fn is_running(&self) -> bool {
        self.state() == ProcessState::Running
    }

    /// Spawns the executable and arms the exit watcher.
    ///
    /// The process gets its own process group. An exit inside the startup
    /// grace window fails the spawn with `ProcessExitedEarly`. After a
    /// successful spawn, `on_unexpected_exit` fires exactly once if the
    /// process exits while no deliberate stop is in progress.
    pub fn spawn<F>(
        &mut self,
        program: &Path,
        args: &[String],
        workdir: Option<&Path>,
        on_unexpected_exit: F,
    ) -> Result<u32, ManagerError>
    where
        F: FnOnce(ExitStatus) + Send + 'static,
    {
        if !program.exists() {
            return Err(ManagerError::ExecutableNotFound {
                path: program.to_path_buf(),
            });
        }

        // A watcher from a previous run exits as soon as the child slot is
        // empty; wait for it before rearming.
        if let Some(handle) = self.watcher.take() {
            let _ = handle.join();
        }

        *self.state.lock()? = ProcessState::Starting;

        let mut command = Command::new(program);
        command
            .args(args)
            .stdout(Stdio::null())
            .stderr(Stdio::null());
        if let Some(dir) = workdir {
            command.current_dir(dir);
        }
        unsafe {
            command.pre_exec(|| {
                libc::setpgid(0, 0);
                Ok(())
            });
        }

        let mut child = command.spawn().map_err(|source| {
            if let Ok(mut state) = self.state.lock() {
                *state = ProcessState::Stopped;
            }
            ManagerError::ProcessStartFailed {
                label: self.label.clone(),
                source,
            }
        })?;
        let pid = child.id();

        let deadline = Instant::now() + STARTUP_GRACE;
        while Instant::now() < deadline {
            if let Ok(Some(status)) = child.try_wait() {
                *self.state.lock()? = ProcessState::Stopped;
                return Err(ManagerError::ProcessExitedEarly {
                    label: self.label.clone(),
                    status,
                });
            }
            thread::sleep(Duration::from_millis(50));
        }

        self.expected_stop.store(false, Ordering::SeqCst);
        *self.child.lock()? = Some(child);
        *self.state.lock()? = ProcessState::Running;
        info!(label = %self.label, pid, "Process started");

        let label = self.label.clone();
        let state = Arc::clone(&self.state);
        let slot = Arc::clone(&self.child);
        let expected_stop = Arc::clone(&self.expected_stop);
        let mut observer = Some(on_unexpected_exit);
        self.watcher = Some(thread::spawn(move || {
            loop {
                thread::sleep(WATCH_INTERVAL);
                let Ok(mut guard) = slot.lock() else {
                    break;
                };
                let Some(child) = guard.as_mut() else {
                    // A deliberate stop took ownership of the child.
                    break;
                };
                match child.try_wait() {
                    Ok(Some(status)) => {
                        *guard = None;
                        drop(guard);
                        if let Ok(mut state) = state.lock() {
                            *state = ProcessState::Stopped;
                        }
                        if expected_stop.load(Ordering::SeqCst) {
                            debug!(label = %label, %status, "Process exited during stop");
                        } else {
                            warn!(label = %label, %status, "Process exited unexpectedly");
                            if let Some(observer) = observer.take() {
                                observer(status);
                            }
                        }
                        break;
                    }
                    Ok(None) => {}
                    Err(err) => {
                        error!(label = %label, error = %err, "Failed to poll process");
                        break;
                    }
                }
            }
        }));

        Ok(pid)
    }

    /// Terminates the process and its descendants.
    ///
    /// Descendants are killed first so the main process cannot respawn
    /// them, then the main process receives SIGTERM and, after `timeout`,
    /// SIGKILL. Returns `Ok` immediately when no process is live.
    pub fn terminate(&mut self, timeout: Duration) -> Result<(), ManagerError> {
        self.expected_stop.store(true, Ordering::SeqCst);
        *self.state.lock()? = ProcessState::Stopping;

        let Some(mut child) = self.child.lock()?.take() else {
            *self.state.lock()? = ProcessState::Stopped;
            debug!(label = %self.label, "No live process to terminate");
            return Ok(());
        };
        let pid = child.id();

        kill_descendants(pid);

        info!(label = %self.label, pid, "Sending SIGTERM");
        match kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            Ok(()) | Err(nix::errno::Errno::ESRCH) => {}
            Err(errno) => {
                return Err(ManagerError::ProcessSignal {
                    label: self.label.clone(),
                    source: std::io::Error::from(errno),
                });
            }
        }

        if wait_with_timeout(&mut child, timeout).is_none() {
            warn!(label = %self.label, pid, "Process ignored SIGTERM; sending SIGKILL");
            let _ = kill(Pid::from_raw(pid as i32), Signal::SIGKILL);
            if wait_with_timeout(&mut child, KILL_WAIT).is_none() {
                return self.abandon_stop(child, timeout);
            }
        }

        *self.state.lock()? = ProcessState::Stopped;
        info!(label = %self.label, pid, "Process stopped");
        Ok(())
    }

    /// Hands the still-live child back after a failed stop.
    ///
    /// The process stays owned and the state returns to `Running`, so a
    /// retried `terminate` can reach it instead of leaving it wedged in
    /// `Stopping` with the child leaked.
    fn abandon_stop(&mut self, child: Child, timeout: Duration) -> Result<(), ManagerError> {
        error!(label = %self.label, pid = child.id(), "Process survived SIGKILL; keeping it owned");
        *self.child.lock()? = Some(child);
        *self.state.lock()? = ProcessState::Running;
        Err(ManagerError::StopTimeout {
            label: self.label.clone(),
            timeout,
        })
    }
}

impl Drop for ProcessSupervisor {
    fn drop(&mut self) {
        self.expected_stop.store(true, Ordering::SeqCst);
        if let Ok(mut guard) = self.child.lock()
            && let Some(mut child) = guard.take()
        {
            kill_descendants(child.id());
            let _ = child.kill();
            let _ = child.wait();
        }
        if let Some(handle) = self.watcher.take() {
            let _ = handle.join();
        }
    }
}

/// Waits for a child to exit, polling at a short interval.
fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Option<ExitStatus> {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if let Ok(Some(status)) = child.try_wait() {
            return Some(status);
        }
        thread::sleep(Duration::from_millis(50));
    }
    None
}

/// Kills every descendant of `pid`, deepest first.
fn kill_descendants(pid: u32) {
    let mut system = System::new();
    system.refresh_processes(ProcessesToUpdate::All, true);

    let mut descendants = Vec::new();
    let mut frontier = vec![SysPid::from_u32(pid)];
    while let Some(parent) = frontier.pop() {
        for (child_pid, process) in system.processes() {
            if process.parent() == Some(parent) {
                descendants.push(child_pid.as_u32());
                frontier.push(*child_pid);
            }
        }
    }

    for descendant in descendants.iter().rev() {
        debug!(pid = descendant, "Killing descendant process");
        let _ = kill(Pid::from_raw(*descendant as i32), Signal::SIGKILL);
    }
}

/// Probes a local TCP port; a successful connect means it is occupied.
pub fn port_occupied(port: u16) -> bool {
    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    TcpStream::connect_timeout(&addr, PROBE_TIMEOUT).is_ok()
}
