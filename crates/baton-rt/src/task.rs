// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! What a driving context needs from anything it steps.

use std::fmt;

use crate::error::Failure;

/// Registry key handed out by the scheduler. Coroutines themselves are
/// anonymous.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub(crate) u64);

impl TaskId {
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task#{}", self.0)
    }
}

/// Caller-side contract shared by `Coroutine` and `GeneratorAdapter`.
///
/// `step` never reports failure; poll `is_alive` and `last_failure`.
pub trait Steppable: Send {
    /// Run one turn. No-op once terminated.
    fn step(&self);
    /// Cancel cooperatively and wait for the unwind. Idempotent.
    fn request_stop(&self);
    fn is_alive(&self) -> bool;
    fn last_failure(&self) -> Option<Failure>;
}

impl<S: Steppable + ?Sized> Steppable for Box<S> {
    fn step(&self) {
        (**self).step()
    }

    fn request_stop(&self) {
        (**self).request_stop()
    }

    fn is_alive(&self) -> bool {
        (**self).is_alive()
    }

    fn last_failure(&self) -> Option<Failure> {
        (**self).last_failure()
    }
}
