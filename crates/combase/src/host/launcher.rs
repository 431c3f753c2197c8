//! Local server launch and the wait used while it starts

use std::io;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use parking_lot::{Condvar, Mutex};
use tracing::{debug, warn};
use crate::types::{ComError, Result};

/// Starts local server processes
pub trait ProcessLauncher: Send + Sync {
    /// Start `command_line` without waiting for it
    fn spawn(&self, command_line: &str) -> Result<()>;
}

/// Launcher backed by `std::process::Command`
///
/// The command line is split on whitespace: the first word is the program,
/// the rest are arguments. The broker does not wait for the child; a
/// background thread collects its exit status so it does not linger as a
/// zombie.
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemLauncher;

impl ProcessLauncher for SystemLauncher {
    fn spawn(&self, command_line: &str) -> Result<()> {
        let mut words = command_line.split_whitespace();
        let program = words
            .next()
            .ok_or_else(|| ComError::AppNotFound("empty command line".to_string()))?;

        let child = Command::new(program)
            .args(words)
            .stdin(Stdio::null())
            .spawn()
            .map_err(|e| {
                warn!("Failed to start {}: {}", program, e);
                ComError::AppNotFound(format!("{}: {}", program, e))
            })?;

        debug!("Started local server {} (pid {})", program, child.id());
        if let Err(e) = reap_in_background(program.to_string(), child) {
            warn!("No reaper for {}; its exit status will not be collected: {}", program, e);
        }
        Ok(())
    }
}

/// Wait for `child` on its own thread, returning the exit status when joined
fn reap_in_background(program: String, mut child: Child) -> io::Result<JoinHandle<Option<ExitStatus>>> {
    thread::Builder::new()
        .name(format!("reap-{}", child.id()))
        .spawn(move || match child.wait() {
            Ok(status) => {
                debug!("Local server {} exited: {}", program, status);
                Some(status)
            }
            Err(e) => {
                warn!("Lost track of local server {}: {}", program, e);
                None
            }
        })
}

/// Sleeps between server availability checks
pub trait PollWaiter: Send + Sync {
    /// Block for `interval`; `false` when the wait was cancelled
    fn wait(&self, interval: Duration) -> bool;
}

/// Timed wait that can be interrupted from another thread
///
/// After [`cancel`](Self::cancel) every wait returns `false` immediately until
/// [`reset`](Self::reset) is called.
pub struct CancellableWait {
    cancelled: Mutex<bool>,
    signal: Condvar,
}

impl CancellableWait {
    /// Create an uncancelled waiter
    pub fn new() -> Self {
        Self {
            cancelled: Mutex::new(false),
            signal: Condvar::new(),
        }
    }

    /// Wake all current waiters and fail future ones
    pub fn cancel(&self) {
        *self.cancelled.lock() = true;
        self.signal.notify_all();
    }

    /// Allow waits again
    pub fn reset(&self) {
        *self.cancelled.lock() = false;
    }

    /// Whether cancellation is in effect
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.lock()
    }
}

impl Default for CancellableWait {
    fn default() -> Self {
        Self::new()
    }
}

impl PollWaiter for CancellableWait {
    fn wait(&self, interval: Duration) -> bool {
        let deadline = Instant::now() + interval;
        let mut cancelled = self.cancelled.lock();
        // Loop to absorb spurious wakeups so a poll never runs early
        while !*cancelled {
            if self.signal.wait_until(&mut cancelled, deadline).timed_out() {
                return !*cancelled;
            }
        }
        false
    }
}
