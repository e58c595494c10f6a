// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Generator adapters.
//!
//! The other way to get a steppable task: instead of a thread running a
//! body that calls `suspend()`, a thread advances an externally supplied
//! `Generator` one unit per step. Adapters live in a `StepGroup`, which
//! owns their lifecycle: the active set and one counting permit shared
//! by every adapter in it.
//!
//! Bookkeeping rule: every wake-up of an adapter thread is answered by
//! exactly one permit release, whether the generator yielded, finished,
//! failed, or was cancelled. An adapter that exits removes itself from
//! the active set before its final release.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;

use log::{debug, trace, warn};

use crate::baton::{binary_signal, Acquire, Release};
use crate::cancel::CancelToken;
use crate::coroutine::CoroutineState;
use crate::error::{panic_message, BatonError, Failure, RuntimeError};
use crate::permit::CountingPermit;
use crate::task::Steppable;

/// Result of advancing a generator one unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GeneratorState {
    /// Produced one unit, more may follow.
    Yielded,
    /// Exhausted.
    Complete,
}

pub type GeneratorError = Box<dyn std::error::Error + Send + Sync>;

/// A resumable computation driven from outside.
pub trait Generator: Send + 'static {
    /// Advance by exactly one unit.
    fn resume(&mut self) -> Result<GeneratorState, GeneratorError>;

    /// Cancellation injected at the current suspension point. The
    /// generator is dropped right after.
    fn cancel(&mut self) {}
}

/// Generator backed by a closure.
pub struct FnGenerator<F> {
    f: F,
}

impl<F> Generator for FnGenerator<F>
where
    F: FnMut() -> Result<GeneratorState, GeneratorError> + Send + 'static,
{
    fn resume(&mut self) -> Result<GeneratorState, GeneratorError> {
        (self.f)()
    }
}

/// Wrap a closure; each call is one unit.
pub fn from_fn<F>(f: F) -> FnGenerator<F>
where
    F: FnMut() -> Result<GeneratorState, GeneratorError> + Send + 'static,
{
    FnGenerator { f }
}

/// Generator backed by an iterator; each item is one unit.
pub struct IterGenerator<I> {
    iter: I,
}

impl<I> Generator for IterGenerator<I>
where
    I: Iterator + Send + 'static,
{
    fn resume(&mut self) -> Result<GeneratorState, GeneratorError> {
        Ok(match self.iter.next() {
            Some(_) => GeneratorState::Yielded,
            None => GeneratorState::Complete,
        })
    }
}

pub fn from_iter<I>(iter: I) -> IterGenerator<I::IntoIter>
where
    I: IntoIterator,
    I::IntoIter: Send + 'static,
{
    IterGenerator {
        iter: iter.into_iter(),
    }
}

/// Per-adapter state shared by the handle, the group, and the thread.
struct AdapterCore {
    id: u64,
    state: AtomicU8,
    cancel: CancelToken,
    /// The only waker. Taken when the handle goes away, which closes the
    /// signal the thread is parked on.
    wake: Mutex<Option<Release>>,
    last_failure: Mutex<Option<Failure>>,
}

impl AdapterCore {
    fn state(&self) -> CoroutineState {
        CoroutineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, new: CoroutineState) {
        self.state.store(new as u8, Ordering::Release);
        trace!("adapter {} -> {:?}", self.id, new);
    }

    fn is_alive(&self) -> bool {
        self.state() != CoroutineState::Terminated
    }

    /// Wake the thread for one unit, then wait for its completion permit.
    fn step(&self, permit: &CountingPermit) {
        if !self.is_alive() {
            return;
        }
        if self.state() != CoroutineState::CancelRequested {
            self.set_state(CoroutineState::Running);
        }
        match self.wake() {
            Ok(()) => permit.acquire(),
            Err(e) => {
                warn!("adapter {} lost its thread: {}", self.id, e);
                self.set_state(CoroutineState::Terminated);
            }
        }
    }

    fn wake(&self) -> Result<(), BatonError> {
        match self
            .wake
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
        {
            Some(wake) => wake.release(),
            None => Err(BatonError::Closed),
        }
    }

    fn disconnect(&self) {
        self.wake
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
    }

    fn request_stop(&self, permit: &CountingPermit) {
        if !self.is_alive() {
            return;
        }
        self.cancel.cancel();
        self.set_state(CoroutineState::CancelRequested);
        self.step(permit);
    }

    fn last_failure(&self) -> Option<Failure> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

struct GroupShared {
    permit: CountingPermit,
    active: Mutex<Vec<Arc<AdapterCore>>>,
    last_failure: Mutex<Option<Failure>>,
    next_id: AtomicU64,
}

impl GroupShared {
    fn deregister(&self, id: u64) {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|core| core.id != id);
    }

    fn record_failure(&self, core: &AdapterCore, failure: Failure) {
        warn!("adapter {} caught failure: {}", core.id, failure);
        *core
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(failure.clone());
        *self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(failure);
    }

    fn snapshot(&self) -> Vec<Arc<AdapterCore>> {
        self.active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Scheduling context shared by a set of generator adapters.
///
/// Cheap to clone; clones refer to the same group.
#[derive(Clone)]
pub struct StepGroup {
    shared: Arc<GroupShared>,
}

impl StepGroup {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(GroupShared {
                permit: CountingPermit::new(),
                active: Mutex::new(Vec::new()),
                last_failure: Mutex::new(None),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Start an adapter for `generator` and add it to the active set.
    pub fn spawn<G: Generator>(&self, generator: G) -> Result<GeneratorAdapter, RuntimeError> {
        let id = self.shared.next_id.fetch_add(1, Ordering::Relaxed);
        let (wake, wait) = binary_signal();
        let core = Arc::new(AdapterCore {
            id,
            state: AtomicU8::new(CoroutineState::Created as u8),
            cancel: CancelToken::new(),
            wake: Mutex::new(Some(wake)),
            last_failure: Mutex::new(None),
        });

        let thread_core = core.clone();
        let thread_group = self.shared.clone();
        thread::Builder::new()
            .name(format!("baton-adapter-{}", id))
            .spawn(move || run_adapter(generator, thread_core, wait, thread_group))?;

        self.shared
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(core.clone());
        debug!("adapter {} registered", id);

        Ok(GeneratorAdapter {
            core,
            group: self.shared.clone(),
        })
    }

    /// Step every active adapter once, in registration order. Returns how
    /// many were stepped.
    pub fn step_all(&self) -> usize {
        let cores = self.shared.snapshot();
        for core in &cores {
            core.step(&self.shared.permit);
        }
        cores.len()
    }

    /// Stop every active adapter.
    pub fn stop_all(&self) {
        for core in self.shared.snapshot() {
            core.request_stop(&self.shared.permit);
        }
    }

    pub fn active_len(&self) -> usize {
        self.shared
            .active
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Last failure caught by any adapter of this group.
    pub fn last_failure(&self) -> Option<Failure> {
        self.shared
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Completion permits posted but not consumed. Zero between steps
    /// when bookkeeping is balanced.
    pub fn pending_permits(&self) -> usize {
        self.shared.permit.available()
    }
}

impl Default for StepGroup {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for StepGroup {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StepGroup")
            .field("active", &self.active_len())
            .field("pending_permits", &self.pending_permits())
            .finish()
    }
}

/// Caller-side handle to one generator adapter.
///
/// Dropping a live handle stops the adapter.
pub struct GeneratorAdapter {
    core: Arc<AdapterCore>,
    group: Arc<GroupShared>,
}

impl GeneratorAdapter {
    /// Advance the generator one unit and wait for it.
    pub fn step(&self) {
        self.core.step(&self.group.permit);
    }

    /// Inject cancellation into the generator and wait for the adapter
    /// to leave its group. No-op once terminated.
    pub fn request_stop(&self) {
        self.core.request_stop(&self.group.permit);
    }

    pub fn is_alive(&self) -> bool {
        self.core.is_alive()
    }

    pub fn last_failure(&self) -> Option<Failure> {
        self.core.last_failure()
    }

    pub fn state(&self) -> CoroutineState {
        self.core.state()
    }
}

impl Steppable for GeneratorAdapter {
    fn step(&self) {
        GeneratorAdapter::step(self)
    }

    fn request_stop(&self) {
        GeneratorAdapter::request_stop(self)
    }

    fn is_alive(&self) -> bool {
        GeneratorAdapter::is_alive(self)
    }

    fn last_failure(&self) -> Option<Failure> {
        GeneratorAdapter::last_failure(self)
    }
}

impl fmt::Debug for GeneratorAdapter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeneratorAdapter")
            .field("id", &self.core.id)
            .field("state", &self.state())
            .finish()
    }
}

impl Drop for GeneratorAdapter {
    fn drop(&mut self) {
        if self.is_alive() && !thread::panicking() {
            self.request_stop();
        }
        self.core.disconnect();
    }
}

/// Adapter thread: one generator unit per wake-up.
fn run_adapter<G: Generator>(
    mut generator: G,
    core: Arc<AdapterCore>,
    wait: Acquire,
    group: Arc<GroupShared>,
) {
    let _ = core.state.compare_exchange(
        CoroutineState::Created as u8,
        CoroutineState::AwaitingFirstStep as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
    );

    loop {
        if wait.acquire().is_err() {
            // Handle dropped without a stop; nobody waits on a permit.
            group.deregister(core.id);
            core.set_state(CoroutineState::Terminated);
            return;
        }

        if core.cancel.is_cancelled() {
            if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| generator.cancel())) {
                group.record_failure(&core, Failure::Panicked(panic_message(payload.as_ref())));
            }
            trace!("adapter {} cancelled", core.id);
            break;
        }

        match panic::catch_unwind(AssertUnwindSafe(|| generator.resume())) {
            Ok(Ok(GeneratorState::Yielded)) => {
                core.set_state(CoroutineState::Suspended);
                group.permit.release();
            }
            Ok(Ok(GeneratorState::Complete)) => break,
            Ok(Err(e)) => {
                group.record_failure(&core, Failure::Errored(e.to_string()));
                break;
            }
            Err(payload) => {
                group.record_failure(&core, Failure::Panicked(panic_message(payload.as_ref())));
                break;
            }
        }
    }

    drop(generator);
    group.deregister(core.id);
    core.set_state(CoroutineState::Terminated);
    debug!("adapter {} finished", core.id);
    group.permit.release();
}
