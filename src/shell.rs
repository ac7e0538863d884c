//! Runs external commands one at a time and lets another task cancel them.
//!
//! A [`Cmd`] owns at most one child process. Callers await the result as if
//! the call were blocking; a clone of the handle (held e.g. by a Ctrl-C
//! handler) can [`Cmd::halt`] the child in the meantime.

use crate::error::{RepomanError, RepomanResult};
use log::{debug, warn};
use parking_lot::Mutex;
use std::process::Stdio;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::Notify;

const SHELL: &str = "/bin/bash";
const KILL_GRACE: Duration = Duration::from_secs(1);

/// Observer for process lifecycle; the CLI hangs its spinner off this.
pub trait ProcessListener: Send + Sync {
    fn on_started(&self, command: &str);
    fn on_finished(&self, success: bool);
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CmdOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub stdout: String,
}

impl CmdOutput {
    fn failed() -> Self {
        Self::default()
    }
}

/// Set once the user asked to stop. Long operations check it between
/// steps that leave the files consistent.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn check(&self, step: &str) -> RepomanResult<()> {
        if self.is_set() {
            return Err(RepomanError::Cancelled(format!("interrupted before {}", step)));
        }
        Ok(())
    }
}

#[derive(Clone)]
pub struct Cmd {
    running: Arc<Mutex<Option<u32>>>,
    finished: Arc<Notify>,
    interrupt: Interrupt,
    listener: Option<Arc<dyn ProcessListener>>,
    halt_grace: Duration,
}

impl std::fmt::Debug for Cmd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cmd")
            .field("running", &*self.running.lock())
            .field("halt_grace", &self.halt_grace)
            .finish()
    }
}

impl Default for Cmd {
    fn default() -> Self {
        Self::new()
    }
}

impl Cmd {
    pub fn new() -> Self {
        Self {
            running: Arc::new(Mutex::new(None)),
            finished: Arc::new(Notify::new()),
            interrupt: Interrupt::new(),
            listener: None,
            halt_grace: Duration::from_secs(5),
        }
    }

    pub fn with_listener(mut self, listener: Arc<dyn ProcessListener>) -> Self {
        self.listener = Some(listener);
        self
    }

    pub fn with_halt_grace(mut self, grace: Duration) -> Self {
        self.halt_grace = grace;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.lock().is_some()
    }

    pub fn interrupt_handle(&self) -> Interrupt {
        self.interrupt.clone()
    }

    /// Mark the session interrupted and stop the running child, if any.
    /// No further commands start afterwards.
    pub async fn interrupt(&self) {
        self.interrupt.trigger();
        self.halt().await;
    }

    /// Run `cmd` through bash; true on a normal exit with status 0.
    pub async fn run(&self, cmd: &str, quiet: bool) -> bool {
        self.run_with_output(cmd, quiet).await.success
    }

    /// Trimmed stdout of `cmd`, whether or not it succeeded.
    pub async fn get_cmd_out(&self, cmd: &str, quiet: bool) -> String {
        self.run_with_output(cmd, quiet).await.stdout
    }

    pub async fn run_with_output(&self, cmd: &str, quiet: bool) -> CmdOutput {
        self.execute(SHELL, &["-c", cmd], cmd, quiet).await
    }

    /// Like [`Cmd::run_with_output`] without a shell in between.
    pub async fn run_program<S: AsRef<str>>(
        &self,
        program: &str,
        args: &[S],
        quiet: bool,
    ) -> CmdOutput {
        let args: Vec<&str> = args.iter().map(|a| a.as_ref()).collect();
        let display = std::iter::once(program)
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ");
        self.execute(program, &args, &display, quiet).await
    }

    async fn execute(&self, program: &str, args: &[&str], display: &str, quiet: bool) -> CmdOutput {
        let child = {
            let mut running = self.running.lock();
            if self.interrupt.is_set() {
                debug!("Interrupted, not starting: {}", display);
                return CmdOutput::failed();
            }
            if let Some(pid) = *running {
                debug!("Process already running (pid {}), refusing: {}", pid, display);
                return CmdOutput::failed();
            }
            if !quiet {
                debug!("{}", display);
            }

            let spawned = Command::new(program)
                .args(args)
                .stdin(Stdio::null())
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .process_group(0)
                .kill_on_drop(true)
                .spawn();

            match spawned {
                Ok(child) => {
                    *running = child.id();
                    child
                }
                Err(e) => {
                    warn!("Failed to start {}: {}", program, e);
                    return CmdOutput::failed();
                }
            }
        };

        if let Some(listener) = &self.listener {
            listener.on_started(display);
        }

        let result = child.wait_with_output().await;

        *self.running.lock() = None;
        self.finished.notify_waiters();

        let output = match result {
            Ok(output) => {
                if !output.stderr.is_empty() {
                    debug!("stderr: {}", String::from_utf8_lossy(&output.stderr).trim());
                }
                CmdOutput {
                    success: output.status.success(),
                    exit_code: output.status.code(),
                    stdout: String::from_utf8_lossy(&output.stdout).trim().to_string(),
                }
            }
            Err(e) => {
                warn!("Failed waiting for {}: {}", program, e);
                CmdOutput::failed()
            }
        };

        if let Some(listener) = &self.listener {
            listener.on_finished(output.success);
        }
        output
    }

    /// Terminate the running child: SIGTERM, then SIGKILL if it lingers.
    pub async fn halt(&self) {
        let Some(pid) = *self.running.lock() else {
            return;
        };
        debug!("Halting process {}", pid);
        signal_group(pid, libc::SIGTERM);
        if self.wait_finished(self.halt_grace).await {
            return;
        }
        warn!("Process {} ignored SIGTERM, killing", pid);
        signal_group(pid, libc::SIGKILL);
        self.wait_finished(KILL_GRACE).await;
    }

    async fn wait_finished(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, async {
            loop {
                let notified = self.finished.notified();
                tokio::pin!(notified);
                notified.as_mut().enable();
                if self.running.lock().is_none() {
                    return;
                }
                notified.await;
            }
        })
        .await
        .is_ok()
    }
}

// children are spawned as group leaders so grandchildren go down with them
fn signal_group(pid: u32, signal: libc::c_int) {
    let rc = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
    if rc != 0 {
        debug!(
            "kill({}, {}) failed: {}",
            pid,
            signal,
            std::io::Error::last_os_error()
        );
    }
}
