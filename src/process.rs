// ABOUTME: Child process handles and termination for browser invocations
// ABOUTME: Models interrupt-then-kill escalation as an explicit state machine

use log::{debug, warn};
use parking_lot::Mutex;
use std::io;
use std::process::{Child, ExitStatus};
use std::time::{Duration, Instant};

const EXIT_POLL: Duration = Duration::from_millis(25);

/// What the pipeline needs from a running external process.
pub trait ProcessHandle: Send + Sync {
    fn pid(&self) -> Option<u32>;

    /// Ask the process to stop (SIGINT on Unix).
    fn interrupt(&self) -> io::Result<()>;

    /// Stop the process unconditionally.
    fn kill(&self) -> io::Result<()>;

    /// Non-blocking check whether the process has exited.
    fn has_exited(&self) -> io::Result<bool>;
}

/// Lifecycle of a tracked process during termination.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    InterruptRequested,
    Exited,
    Killed,
}

impl ProcessState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessState::Exited | ProcessState::Killed)
    }
}

/// Drives one process from `Running` to a terminal state.
pub struct Termination<'a> {
    handle: &'a dyn ProcessHandle,
    state: ProcessState,
}

impl<'a> Termination<'a> {
    pub fn new(handle: &'a dyn ProcessHandle) -> Self {
        Self {
            handle,
            state: ProcessState::Running,
        }
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    /// Advance one step. Returns the new state, or the reason the step failed.
    pub fn step(&mut self, grace: Duration) -> Result<ProcessState, String> {
        self.state = match self.state {
            ProcessState::Running => {
                if matches!(self.handle.has_exited(), Ok(true)) {
                    ProcessState::Exited
                } else {
                    match self.handle.interrupt() {
                        Ok(()) => ProcessState::InterruptRequested,
                        Err(e) => {
                            debug!("Interrupt failed for pid {:?}: {}", self.handle.pid(), e);
                            self.force_kill()?
                        }
                    }
                }
            }
            ProcessState::InterruptRequested => {
                if wait_for_exit(self.handle, grace) {
                    ProcessState::Exited
                } else {
                    debug!(
                        "Process {:?} ignored interrupt for {:?}, killing",
                        self.handle.pid(),
                        grace
                    );
                    self.force_kill()?
                }
            }
            terminal => terminal,
        };
        Ok(self.state)
    }

    /// Run steps until a terminal state or a failure.
    pub fn run(mut self, grace: Duration) -> Result<ProcessState, String> {
        while !self.state.is_terminal() {
            self.step(grace)?;
        }
        Ok(self.state)
    }

    fn force_kill(&mut self) -> Result<ProcessState, String> {
        match self.handle.kill() {
            Ok(()) => Ok(ProcessState::Killed),
            // Killing an already-reaped child fails; that still counts as stopped.
            Err(_) if matches!(self.handle.has_exited(), Ok(true)) => Ok(ProcessState::Exited),
            Err(e) => Err(format!("failed to kill pid {:?}: {}", self.handle.pid(), e)),
        }
    }
}

fn wait_for_exit(handle: &dyn ProcessHandle, grace: Duration) -> bool {
    let until = Instant::now().checked_add(grace);
    loop {
        if matches!(handle.has_exited(), Ok(true)) {
            return true;
        }
        if until.map_or(false, |until| Instant::now() >= until) {
            return false;
        }
        std::thread::sleep(EXIT_POLL.min(grace));
    }
}

/// A real child process spawned by the browser runner.
pub struct ChildProcess {
    pid: u32,
    child: Mutex<Child>,
}

impl ChildProcess {
    pub fn new(child: Child) -> Self {
        Self {
            pid: child.id(),
            child: Mutex::new(child),
        }
    }

    pub fn try_wait(&self) -> io::Result<Option<ExitStatus>> {
        self.child.lock().try_wait()
    }

    /// Kill and reap, ignoring "already exited" failures.
    pub fn kill_and_reap(&self) {
        let mut child = self.child.lock();
        if let Err(e) = child.kill() {
            debug!("kill on pid {} returned: {}", self.pid, e);
        }
        if let Err(e) = child.wait() {
            warn!("Failed to reap pid {}: {}", self.pid, e);
        }
    }
}

impl ProcessHandle for ChildProcess {
    fn pid(&self) -> Option<u32> {
        Some(self.pid)
    }

    #[cfg(unix)]
    fn interrupt(&self) -> io::Result<()> {
        // Holding the lock keeps the pid from being reaped and reused mid-signal.
        let mut child = self.child.lock();
        if child.try_wait()?.is_some() {
            return Ok(());
        }
        let pid = libc::pid_t::try_from(self.pid)
            .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "pid out of range"))?;
        // SAFETY: kill(2) takes plain integers and touches no memory we own.
        if unsafe { libc::kill(pid, libc::SIGINT) } == 0 {
            Ok(())
        } else {
            Err(io::Error::last_os_error())
        }
    }

    #[cfg(not(unix))]
    fn interrupt(&self) -> io::Result<()> {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            "graceful interrupt is not supported on this platform",
        ))
    }

    fn kill(&self) -> io::Result<()> {
        self.child.lock().kill()
    }

    fn has_exited(&self) -> io::Result<bool> {
        Ok(self.try_wait()?.is_some())
    }
}
