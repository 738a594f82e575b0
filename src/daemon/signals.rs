//! Signal wiring: SIGTERM/SIGINT cancel the root token, SIGUSR1 wakes the
//! tick loop for an immediate cycle.
//!
//! Uses `signal-hook` flag registration; the daemon polls the flags rather than
//! doing work inside a handler.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGINT, SIGTERM};

use crate::core::cancel::CancelToken;

// ──────────────────── signal handler ────────────────────

#[derive(Clone)]
pub struct SignalHandler {
    cancel: CancelToken,
    wake_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Register OS hooks on the flags behind `cancel` and `wake_flag`.
    ///
    /// Registration is best-effort; failures are reported on stderr, not fatal.
    #[must_use]
    pub fn install(cancel: &CancelToken, wake_flag: Arc<AtomicBool>) -> Self {
        let handler = Self {
            cancel: cancel.clone(),
            wake_flag,
        };
        handler.register_signals();
        handler
    }

    #[must_use]
    pub fn should_shutdown(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Programmatic equivalent of SIGTERM.
    pub fn request_shutdown(&self) {
        self.cancel.cancel();
    }

    /// Programmatic equivalent of SIGUSR1.
    pub fn request_wake(&self) {
        self.wake_flag.store(true, Ordering::Release);
    }

    fn register_signals(&self) {
        for (signal, name) in [(SIGTERM, "SIGTERM"), (SIGINT, "SIGINT")] {
            if let Err(e) = signal_hook::flag::register(signal, self.cancel.flag()) {
                eprintln!("[SPW-SIGNAL] failed to register {name}: {e}");
            }
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::SIGUSR1;
            if let Err(e) = signal_hook::flag::register(SIGUSR1, Arc::clone(&self.wake_flag)) {
                eprintln!("[SPW-SIGNAL] failed to register SIGUSR1: {e}");
            }
        }
    }
}
