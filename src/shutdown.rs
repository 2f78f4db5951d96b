//! Cooperative shutdown: a shared flag the loop polls between cycles.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::info;

use crate::{Error, Result};

/// Cloneable handle to the process-wide stop request.
#[derive(Debug, Clone, Default)]
pub struct ShutdownSignal {
    requested: Arc<AtomicBool>,
}

impl ShutdownSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Route SIGINT and SIGTERM to this signal. Call once per process.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if a handler is already installed.
    pub fn install_handler(&self) -> Result<()> {
        let signal = self.clone();
        ctrlc::set_handler(move || {
            info!("shutdown_requested");
            signal.request();
        })
        .map_err(|e| Error::Config(format!("failed to install signal handler: {e}")))
    }

    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    #[inline]
    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clones_share_the_flag() {
        let signal = ShutdownSignal::new();
        let handle = signal.clone();
        assert!(!signal.is_requested());
        handle.request();
        assert!(signal.is_requested());
    }
}
