//! Module-gated logging macros and a warn-once latch.
//!
//! A module opts into the macros by declaring its own switch:
//! ```ignore
//! const ENABLE_LOGS: bool = true;
//! use crate::{log_error, log_info, log_warn};
//! ```
//! Flipping the const silences the loop-level chatter of that module without
//! touching `RUST_LOG` for the rest of the agent.

use std::sync::atomic::{AtomicBool, Ordering};

#[macro_export]
macro_rules! log_info {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::info!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_debug {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::debug!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_warn {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::warn!($($arg)*);
        }
    };
}

#[macro_export]
macro_rules! log_error {
    ($($arg:tt)*) => {
        if ENABLE_LOGS {
            log::error!($($arg)*);
        }
    };
}

/// Latch that lets a warning through once per process lifetime. Shared by
/// both producers so a missing OS permission is reported
/// once rather than every tick.
#[derive(Debug, Default)]
pub struct WarnOnce {
    fired: AtomicBool,
}

impl WarnOnce {
    pub const fn new() -> Self {
        Self {
            fired: AtomicBool::new(false),
        }
    }

    /// Returns true exactly once.
    pub fn should_warn(&self) -> bool {
        !self.fired.swap(true, Ordering::AcqRel)
    }

    pub fn warn(&self, message: &str) {
        if self.should_warn() {
            log::warn!("{message}");
        }
    }
}
