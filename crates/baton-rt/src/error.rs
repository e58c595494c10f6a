// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Error taxonomy.
//!
//! Cancellation and natural completion are not errors and never show up
//! here. A body failure is a `Failure`: captured on the coroutine thread,
//! recorded, and polled by the caller instead of being propagated.

use std::fmt;

use thiserror::Error;

/// An unhandled fault raised by a coroutine body or generator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    /// Body panicked with the given message.
    #[error("body panicked: {0}")]
    Panicked(String),
    /// Body returned an error value.
    #[error("body failed: {0}")]
    Errored(String),
}

impl Failure {
    /// Human-readable message without the kind prefix.
    pub fn message(&self) -> &str {
        match self {
            Failure::Panicked(msg) | Failure::Errored(msg) => msg,
        }
    }
}

/// Errors from creating runtime objects.
#[derive(Debug, Error)]
pub enum RuntimeError {
    #[error("failed to spawn execution thread: {0}")]
    Spawn(#[from] std::io::Error),
}

/// Baton protocol faults. Both indicate the other side is gone or the
/// single-permit invariant was broken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BatonError {
    #[error("the other side of the baton has gone away")]
    Closed,
    #[error("baton released twice without an acquire")]
    Overfull,
}

/// Failure of a whole hardware transfer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IoError {
    #[error("hardware link error: {0}")]
    Link(String),
}

/// What a coroutine body hands back when it returns.
///
/// `()` always succeeds. `Result<T, E>` turns `Err(e)` into
/// `Failure::Errored` using the error's `Display` output.
pub trait BodyOutcome {
    fn into_failure(self) -> Option<Failure>;
}

impl BodyOutcome for () {
    fn into_failure(self) -> Option<Failure> {
        None
    }
}

impl<T, E: fmt::Display> BodyOutcome for Result<T, E> {
    fn into_failure(self) -> Option<Failure> {
        match self {
            Ok(_) => None,
            Err(e) => Some(Failure::Errored(e.to_string())),
        }
    }
}

/// Extract a message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
