//! Pseudo-terminal abstraction.
//!
//! The daemon is written against a small capability set so the rest of
//! the system never touches OS handles directly. The production backend
//! is ConPTY; non-Windows builds get a plain process-pipe stand-in that
//! keeps the daemon, dispatcher, codec and buffers testable (it does not
//! emulate a terminal).

use std::io;
use std::path::Path;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

#[cfg(windows)]
mod conpty;
#[cfg(not(windows))]
mod exec;

pub trait Terminal: Send + Sync {
    /// Read output produced by the child. Returns `Ok(0)` once the child
    /// has exited and the pipe is drained.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Send input to the child. Callers treat short writes as errors;
    /// everything written through here is a short key sequence.
    fn write(&self, data: &[u8]) -> io::Result<usize>;

    /// Change the terminal dimensions.
    fn resize(&self, cols: u16, rows: u16) -> io::Result<()>;

    /// Block until the child exits; returns its exit code.
    fn wait(&self) -> i32;

    /// The exit code, or `None` while the child is still running.
    fn exit_code(&self) -> Option<i32>;

    /// Terminate the child and release resources. Idempotent; safe from
    /// any thread.
    fn close(&self);
}

/// Start `command` in `workdir` under the platform backend. An empty
/// command line resolves the default shell.
pub fn spawn(cols: u16, rows: u16, command: &str, workdir: &Path) -> io::Result<Arc<dyn Terminal>> {
    #[cfg(windows)]
    let terminal: Arc<dyn Terminal> = conpty::ConPty::spawn(cols, rows, command, workdir)?;
    #[cfg(not(windows))]
    let terminal: Arc<dyn Terminal> = exec::ExecTerminal::spawn(cols, rows, command, workdir)?;
    Ok(terminal)
}

/// One-shot exit signal shared between a backend's watcher thread and
/// everyone waiting on the child.
pub(crate) struct ExitFlag {
    code: Mutex<Option<i32>>,
    cond: Condvar,
}

impl ExitFlag {
    pub fn new() -> Self {
        ExitFlag { code: Mutex::new(None), cond: Condvar::new() }
    }

    /// Record the exit code and wake all waiters. Later calls keep the
    /// first code.
    pub fn signal(&self, code: i32) {
        let mut slot = self.code.lock().unwrap();
        if slot.is_none() {
            *slot = Some(code);
        }
        self.cond.notify_all();
    }

    pub fn get(&self) -> Option<i32> {
        *self.code.lock().unwrap()
    }

    pub fn wait(&self) -> i32 {
        let mut slot = self.code.lock().unwrap();
        loop {
            if let Some(code) = *slot {
                return code;
            }
            slot = self.cond.wait(slot).unwrap();
        }
    }

    /// Best-effort bounded wait, for teardown paths that must not block.
    #[cfg_attr(not(windows), allow(dead_code))]
    pub fn wait_timeout(&self, timeout: Duration) -> Option<i32> {
        let slot = self.code.lock().unwrap();
        if slot.is_some() {
            return *slot;
        }
        let (slot, _) = self.cond.wait_timeout(slot, timeout).unwrap();
        *slot
    }
}
