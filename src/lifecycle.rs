/// Daemon lifecycle: PID file, signal-driven shutdown and the stop command
use crate::{
    context::AppContext,
    error::{ResponderError, ResponderResult},
    server::{OcspServer, TransportState},
};
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use sysinfo::{Pid, Process, Signal, System};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

/// Contents of the PID file: pid on the first line, listen address on the second
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessHandle {
    pub pid: u32,
    pub listen_address: String,
}

impl ProcessHandle {
    fn parse(contents: &str) -> Option<Self> {
        let mut lines = contents.lines();
        let pid = lines.next()?.trim().parse().ok()?;
        let listen_address = lines.next().unwrap_or_default().trim().to_string();
        Some(Self {
            pid,
            listen_address,
        })
    }

    fn render(&self) -> String {
        format!("{}\n{}\n", self.pid, self.listen_address)
    }
}

/// Start/stop control over a responder process tracked through a PID file
#[derive(Debug, Clone)]
pub struct LifecycleController {
    pid_file: PathBuf,
    process_name: String,
}

impl LifecycleController {
    pub fn new(pid_file: impl Into<PathBuf>) -> Self {
        Self {
            pid_file: pid_file.into(),
            process_name: own_process_name(),
        }
    }

    /// Program name a live PID-file process must carry to count as the responder.
    /// Defaults to the name of the running executable.
    pub fn with_process_name(mut self, name: impl Into<String>) -> Self {
        self.process_name = name.into();
        self
    }

    pub fn pid_file(&self) -> &Path {
        &self.pid_file
    }

    /// Read the PID file. `None` when it is absent or unreadable as a handle.
    pub fn read_handle(&self) -> ResponderResult<Option<ProcessHandle>> {
        match std::fs::read_to_string(&self.pid_file) {
            Ok(contents) => Ok(ProcessHandle::parse(&contents)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Fail with `AlreadyRunning` if the PID file names another live responder
    pub fn ensure_not_running(&self) -> ResponderResult<()> {
        if let Some(handle) = self.read_handle()? {
            if handle.pid != std::process::id() && self.responder_alive(handle.pid) {
                return Err(ResponderError::AlreadyRunning(handle.pid));
            }
            warn!(pid = handle.pid, "Replacing stale PID file");
        }
        Ok(())
    }

    /// Persist this process's handle. The file is removed when the guard is released or dropped.
    pub fn write_handle(&self, listen_address: SocketAddr) -> ResponderResult<PidGuard> {
        let handle = ProcessHandle {
            pid: std::process::id(),
            listen_address: listen_address.to_string(),
        };

        if let Some(parent) = self.pid_file.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        std::fs::write(&self.pid_file, handle.render())?;

        Ok(PidGuard {
            path: self.pid_file.clone(),
            released: false,
        })
    }

    /// Ask the recorded responder process to terminate. Returns its pid.
    ///
    /// A PID file naming a dead process, or a pid since reused by another
    /// program, is removed before reporting `NotRunning`.
    pub fn stop(&self) -> ResponderResult<u32> {
        let handle = match self.read_handle()? {
            Some(handle) => handle,
            None if self.pid_file.exists() => {
                std::fs::remove_file(&self.pid_file)?;
                return Err(ResponderError::NotRunning(format!(
                    "unreadable PID file {} removed",
                    self.pid_file.display()
                )));
            }
            None => {
                return Err(ResponderError::NotRunning(format!(
                    "no PID file at {}",
                    self.pid_file.display()
                )))
            }
        };

        let mut system = System::new();
        let pid = Pid::from_u32(handle.pid);
        let process = if system.refresh_process(pid) {
            system.process(pid)
        } else {
            None
        };

        let process = match process {
            Some(process) => process,
            None => {
                std::fs::remove_file(&self.pid_file)?;
                return Err(ResponderError::NotRunning(format!(
                    "process {} is gone, stale PID file removed",
                    handle.pid
                )));
            }
        };

        if !self.is_responder(process) {
            warn!(
                pid = handle.pid,
                name = process.name(),
                expected = %self.process_name,
                "PID file names an unrelated process"
            );
            std::fs::remove_file(&self.pid_file)?;
            return Err(ResponderError::NotRunning(format!(
                "process {} is {}, not {}, stale PID file removed",
                handle.pid,
                process.name(),
                self.process_name
            )));
        }

        let signalled = match process.kill_with(Signal::Term) {
            Some(sent) => sent,
            // Platform has no SIGTERM
            None => process.kill(),
        };

        if !signalled {
            return Err(ResponderError::Internal(format!(
                "could not signal process {}",
                handle.pid
            )));
        }

        info!(pid = handle.pid, address = %handle.listen_address, "Termination requested");
        Ok(handle.pid)
    }

    fn is_responder(&self, process: &Process) -> bool {
        same_program(process.name(), &self.process_name)
            || process
                .exe()
                .and_then(|exe| exe.file_name())
                .map_or(false, |name| name.to_string_lossy() == self.process_name.as_str())
    }

    fn responder_alive(&self, pid: u32) -> bool {
        let mut system = System::new();
        let pid = Pid::from_u32(pid);
        system.refresh_process(pid)
            && system
                .process(pid)
                .map_or(false, |process| self.is_responder(process))
    }
}

fn own_process_name() -> String {
    std::env::current_exe()
        .ok()
        .and_then(|exe| exe.file_name().map(|name| name.to_string_lossy().into_owned()))
        .unwrap_or_else(|| env!("CARGO_PKG_NAME").to_string())
}

/// Linux reports at most 15 bytes of a process name
fn same_program(actual: &str, expected: &str) -> bool {
    actual == expected || (actual.len() == 15 && expected.starts_with(actual))
}

/// Removes the PID file once the responder has stopped
#[derive(Debug)]
pub struct PidGuard {
    path: PathBuf,
    released: bool,
}

impl PidGuard {
    pub fn release(mut self) {
        self.remove();
    }

    fn remove(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match std::fs::remove_file(&self.path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => error!(error = %e, path = %self.path.display(), "Failed to remove PID file"),
        }
    }
}

impl Drop for PidGuard {
    fn drop(&mut self) {
        self.remove();
    }
}

/// Resolves on SIGINT or SIGTERM (Ctrl-C only on non-Unix)
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}

/// Run the responder until `shutdown` fires.
///
/// The PID file is written once the listener is bound and removed after it
/// has drained.
pub async fn run_until(
    ctx: AppContext,
    controller: &LifecycleController,
    shutdown: CancellationToken,
) -> ResponderResult<()> {
    controller.ensure_not_running()?;

    let server = OcspServer::new(ctx);
    let mut state = server.subscribe();
    let stop = shutdown.child_token();
    let run = server.run(stop.clone());
    tokio::pin!(run);

    let bound = loop {
        tokio::select! {
            result = &mut run => return result,
            changed = state.changed() => {
                if changed.is_err() {
                    break None;
                }
                if let TransportState::Listening(addr) = *state.borrow_and_update() {
                    break Some(addr);
                }
            }
        }
    };

    let written = match bound {
        Some(addr) => controller.write_handle(addr),
        None => Err(ResponderError::Internal(
            "transport state channel closed".to_string(),
        )),
    };

    match written {
        Ok(guard) => {
            let result = run.await;
            guard.release();
            result
        }
        Err(e) => {
            // The listener is already bound: stop it before reporting
            error!(
                error = %e,
                path = %controller.pid_file().display(),
                "Could not record PID file, stopping listener"
            );
            stop.cancel();
            if let Err(run_error) = run.await {
                warn!(error = %run_error, "Listener stopped with an error");
            }
            Err(e)
        }
    }
}

/// Run the responder until SIGINT/SIGTERM
pub async fn run_daemon(ctx: AppContext, controller: &LifecycleController) -> ResponderResult<()> {
    let shutdown = CancellationToken::new();

    let trigger = shutdown.clone();
    let signals = tokio::spawn(async move {
        shutdown_signal().await;
        trigger.cancel();
    });

    let result = run_until(ctx, controller, shutdown).await;
    signals.abort();
    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_without_pid_file_is_not_running() {
        let dir = tempfile::tempdir().unwrap();
        let controller = LifecycleController::new(dir.path().join("PIDFILE"));

        let err = controller.stop().unwrap_err();

        assert!(matches!(err, ResponderError::NotRunning(_)));
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_stop_with_stale_pid_file_removes_it() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("PIDFILE");
        // Far above any default pid_max
        std::fs::write(&pid_file, "4194000\n127.0.0.1:1443\n").unwrap();

        let controller = LifecycleController::new(&pid_file);
        let err = controller.stop().unwrap_err();

        assert!(matches!(err, ResponderError::NotRunning(_)));
        assert!(!pid_file.exists());
    }

    #[test]
    fn test_garbage_pid_file_is_removed_on_stop() {
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("PIDFILE");
        std::fs::write(&pid_file, "not a pid").unwrap();

        let err = LifecycleController::new(&pid_file).stop().unwrap_err();

        assert!(matches!(err, ResponderError::NotRunning(_)));
        assert!(!pid_file.exists());
    }

    #[test]
    fn test_write_and_release_handle() {
        let dir = tempfile::tempdir().unwrap();
        let controller = LifecycleController::new(dir.path().join("run").join("PIDFILE"));

        let guard = controller
            .write_handle("127.0.0.1:1443".parse().unwrap())
            .unwrap();
        let handle = controller.read_handle().unwrap().unwrap();
        assert_eq!(handle.pid, std::process::id());
        assert_eq!(handle.listen_address, "127.0.0.1:1443");

        // Our own pid does not count as another instance
        controller.ensure_not_running().unwrap();

        guard.release();
        assert!(controller.read_handle().unwrap().is_none());
    }

    #[cfg(unix)]
    #[test]
    fn test_live_process_blocks_start() {
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("PIDFILE");
        std::fs::write(&pid_file, format!("{}\n0.0.0.0:1443\n", child.id())).unwrap();

        let controller = LifecycleController::new(&pid_file).with_process_name("sleep");
        let err = controller.ensure_not_running().unwrap_err();
        assert!(matches!(err, ResponderError::AlreadyRunning(pid) if pid == child.id()));

        assert_eq!(controller.stop().unwrap(), child.id());
        child.wait().unwrap();
    }

    #[cfg(unix)]
    #[test]
    fn test_reused_pid_is_not_signalled() {
        // The recorded pid now belongs to some other program
        let mut child = std::process::Command::new("sleep").arg("30").spawn().unwrap();
        let dir = tempfile::tempdir().unwrap();
        let pid_file = dir.path().join("PIDFILE");
        std::fs::write(&pid_file, format!("{}\n0.0.0.0:1443\n", child.id())).unwrap();

        let controller = LifecycleController::new(&pid_file);
        controller.ensure_not_running().unwrap();

        let err = controller.stop().unwrap_err();
        assert!(matches!(err, ResponderError::NotRunning(_)));
        assert!(!pid_file.exists());

        std::thread::sleep(std::time::Duration::from_millis(100));
        assert!(child.try_wait().unwrap().is_none());

        child.kill().unwrap();
        child.wait().unwrap();
    }

    #[test]
    fn test_same_program_allows_truncated_names() {
        assert!(same_program("ocsp-responder", "ocsp-responder"));
        assert!(same_program("ocsp_responder-", "ocsp_responder-5f0c1d2e"));
        assert!(!same_program("sleep", "ocsp-responder"));
        assert!(!same_program("ocsp", "ocsp-responder"));
    }

    #[test]
    fn test_process_handle_parsing() {
        assert_eq!(
            ProcessHandle::parse("42\n0.0.0.0:1443\n"),
            Some(ProcessHandle {
                pid: 42,
                listen_address: "0.0.0.0:1443".to_string()
            })
        );
        assert_eq!(ProcessHandle::parse("42").unwrap().listen_address, "");
        assert!(ProcessHandle::parse("").is_none());
    }
}
