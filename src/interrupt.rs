//! Termination-signal tracking.
//!
//! Signals never exit the process directly. The handler only records that one
//! arrived; the orchestrator polls [`Interrupt::is_set`] while the recipe runs
//! and unwinds through its normal cleanup path.

use anyhow::{Context, Result};
use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const HANDLED_SIGNALS: [i32; 3] = [SIGINT, SIGTERM, SIGHUP];

/// Cancellation flag observed by a running build.
#[derive(Debug, Clone, Default)]
pub struct Interrupt(Arc<AtomicBool>);

impl Interrupt {
    /// A flag set by SIGINT, SIGTERM or SIGHUP.
    pub fn install_signal_handlers() -> Result<Self> {
        let interrupt = Self::manual();
        for signal in HANDLED_SIGNALS {
            signal_hook::flag::register(signal, Arc::clone(&interrupt.0))
                .with_context(|| format!("installing handler for signal {signal}"))?;
        }
        Ok(interrupt)
    }

    /// A flag that only [`Interrupt::trigger`] sets.
    pub fn manual() -> Self {
        Self::default()
    }

    pub fn is_set(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}
