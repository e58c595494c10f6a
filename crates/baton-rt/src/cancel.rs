// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Cooperative cancellation flag.
//!
//! Set by the driver, observed by the body only at suspension points.

use std::sync::atomic::{AtomicBool, Ordering};

/// Stop request shared between a handle and its execution thread.
#[derive(Debug)]
pub struct CancelToken {
    flag: AtomicBool,
}

impl CancelToken {
    pub fn new() -> Self {
        Self {
            flag: AtomicBool::new(false),
        }
    }

    /// Request a stop. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Unwind payload used to abort a body after a stop request.
///
/// Raised with `resume_unwind`, so the panic hook stays quiet.
pub(crate) struct StopSignal;

/// True if a caught unwind payload is the stop signal.
pub(crate) fn is_stop_signal(payload: &(dyn std::any::Any + Send)) -> bool {
    payload.is::<StopSignal>()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cancel_is_sticky() {
        let t = CancelToken::new();
        assert!(!t.is_cancelled());
        t.cancel();
        t.cancel();
        assert!(t.is_cancelled());
    }

    #[test]
    fn stop_signal_is_recognised() {
        let caught = std::panic::catch_unwind(|| {
            std::panic::resume_unwind(Box::new(StopSignal));
        })
        .unwrap_err();
        assert!(is_stop_signal(caught.as_ref()));

        let other: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert!(!is_stop_signal(other.as_ref()));
    }
}
