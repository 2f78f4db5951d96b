//! Wake notification to the host process: `SIGUSR1` to the pid it publishes.
//! The keyword itself is never transmitted.

use std::path::Path;

use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use tracing::{debug, warn};

use crate::{Error, Result};

/// Tells the host that a wake word was confirmed.
pub trait HostSignal {
    /// Fire one notification.
    fn notify(&mut self) -> Result<()>;
}

/// Signals the host pid read from its pid file at startup.
#[derive(Debug, Clone)]
pub struct HostNotifier {
    pid: Option<Pid>,
}

impl HostNotifier {
    /// Read the trimmed decimal pid from `path`. A missing or invalid file
    /// yields a disabled notifier.
    pub fn from_pid_file(path: &Path) -> Self {
        match read_pid(path) {
            Ok(pid) => {
                debug!(pid = pid.as_raw(), path = %path.display(), "host_pid_loaded");
                Self { pid: Some(pid) }
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "host pid unavailable, triggers will only be logged");
                Self::disabled()
            }
        }
    }

    pub fn disabled() -> Self {
        Self { pid: None }
    }

    pub fn pid(&self) -> Option<i32> {
        self.pid.map(Pid::as_raw)
    }
}

impl HostSignal for HostNotifier {
    fn notify(&mut self) -> Result<()> {
        let pid = self
            .pid
            .ok_or_else(|| Error::Notify("no host pid".into()))?;
        kill(pid, Signal::SIGUSR1)
            .map_err(|e| Error::Notify(format!("SIGUSR1 to {pid} failed: {e}")))
    }
}

fn read_pid(path: &Path) -> Result<Pid> {
    let text = std::fs::read_to_string(path)?;
    let raw: i32 = text
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("invalid pid {:?}", text.trim())))?;
    if raw <= 0 {
        return Err(Error::Config(format!("invalid pid {raw}")));
    }
    Ok(Pid::from_raw(raw))
}
