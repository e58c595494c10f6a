// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Baton runtime: cooperative coroutines on OS threads, driven by a tick.
//!
//! Control logic is written as straight-line code ("run motor, wait
//! 500ms, read sensor") and executed in short, non-overlapping turns.
//! Every coroutine owns a thread, but a baton handed back and forth over
//! single-slot channels lets only one side run at a time, so turns are
//! strictly serialized in the order the driver steps them.
//!
//! Components:
//! - clock    : monotonic milliseconds since process start
//! - baton    : single-permit hand-off signals
//! - permit   : counting completion permit
//! - coroutine: step/suspend/stop on a baton-guarded thread
//! - generator: adapters stepping externally supplied generators
//! - scheduler: groups, per-tick stepping, next-wake hint
//! - driver   : the `TickDriver` capability and a plain tick loop
//! - hardware : per-tick I/O boundary and the update task body

mod baton;
pub mod cancel;
pub mod clock;
pub mod coroutine;
pub mod driver;
pub mod error;
pub mod generator;
pub mod hardware;
pub mod permit;
pub mod scheduler;
pub mod task;

pub use coroutine::{
    in_coroutine, suspend, suspend_for, suspend_for_with, suspend_until, Coroutine, CoroutineState,
};
pub use driver::{run_ticks, TickDriver};
pub use error::{BatonError, BodyOutcome, Failure, IoError, RuntimeError};
pub use generator::{GeneratorAdapter, GeneratorState, StepGroup};
pub use scheduler::{Group, Scheduler, SchedulerConfig, SchedulerHandle};
pub use task::{Steppable, TaskId};
