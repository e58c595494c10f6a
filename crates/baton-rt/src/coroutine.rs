// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Thread-backed coroutines.
//!
//! Each coroutine body runs on its own OS thread, but only while the
//! driver has handed it the baton. `step()` passes the baton over and
//! blocks until the body reaches its next `suspend()` or exits, so body
//! code between two suspension points runs as one uninterrupted turn.
//!
//! ```text
//!   driver thread                    coroutine thread
//!   ─────────────                    ────────────────
//!   step() ── release ─────────────▶ wait_turn()
//!      │                             body runs…
//!   acquire ◀──────────────── release  suspend()
//! ```
//!
//! Cancellation is cooperative: `request_stop()` sets the flag and steps
//! once; the body observes it on return from `suspend()` and unwinds,
//! dropping its locals on the way out.

use std::cell::RefCell;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread;
use std::time::Duration;

use log::{trace, warn};

use crate::baton::{baton_pair, CallerHand, CoroutineHand};
use crate::cancel::{is_stop_signal, CancelToken, StopSignal};
use crate::clock::{SystemClock, TimeSource};
use crate::error::{panic_message, BodyOutcome, Failure, RuntimeError};
use crate::task::Steppable;

/// Coroutine lifecycle states.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoroutineState {
    /// Handle exists, thread may not have started yet.
    Created = 0,
    /// Thread is parked waiting for the first step.
    AwaitingFirstStep = 1,
    /// Parked at a suspension point.
    Suspended = 2,
    /// Holding the baton.
    Running = 3,
    /// Stop requested, unwind not finished yet.
    CancelRequested = 4,
    /// Body returned, failed, or finished unwinding.
    Terminated = 5,
}

impl CoroutineState {
    pub(crate) fn from_u8(v: u8) -> Self {
        match v {
            0 => Self::Created,
            1 => Self::AwaitingFirstStep,
            2 => Self::Suspended,
            3 => Self::Running,
            4 => Self::CancelRequested,
            _ => Self::Terminated,
        }
    }
}

/// State visible from both sides of the baton.
struct Shared {
    state: AtomicU8,
    cancel: CancelToken,
    last_failure: Mutex<Option<Failure>>,
}

impl Shared {
    fn state(&self) -> CoroutineState {
        CoroutineState::from_u8(self.state.load(Ordering::Acquire))
    }

    fn set_state(&self, new: CoroutineState) {
        let prev = self.state.swap(new as u8, Ordering::AcqRel);
        trace!(
            "coroutine {:?} -> {:?}",
            CoroutineState::from_u8(prev),
            new
        );
    }

    fn record_failure(&self, failure: Failure) {
        warn!("coroutine caught failure: {}", failure);
        *self
            .last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(failure);
    }

    fn last_failure(&self) -> Option<Failure> {
        self.last_failure
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

/// Coroutine-side view, installed in a thread-local on the body thread.
struct Current {
    shared: Arc<Shared>,
    hand: CoroutineHand,
}

thread_local! {
    static CURRENT: RefCell<Option<Rc<Current>>> = const { RefCell::new(None) };
}

fn current() -> Option<Rc<Current>> {
    CURRENT.with(|cell| cell.borrow().clone())
}

/// Caller-side handle to one coroutine.
///
/// `Send` but not `Sync`: exactly one driver steps a coroutine.
/// Dropping a live handle stops it first, so the thread always unwinds.
pub struct Coroutine {
    shared: Arc<Shared>,
    hand: CallerHand,
}

impl Coroutine {
    /// Spawn the execution thread for `body`. The body does not start
    /// running until the first `step()`.
    pub fn new<F, O>(body: F) -> Result<Self, RuntimeError>
    where
        F: FnOnce() -> O + Send + 'static,
        O: BodyOutcome,
    {
        let shared = Arc::new(Shared {
            state: AtomicU8::new(CoroutineState::Created as u8),
            cancel: CancelToken::new(),
            last_failure: Mutex::new(None),
        });
        let (caller, coroutine) = baton_pair();

        let thread_shared = shared.clone();
        // Dropping the JoinHandle detaches the thread; it never blocks exit.
        thread::Builder::new()
            .name("baton-coroutine".to_string())
            .spawn(move || run_body(thread_shared, coroutine, body))?;

        Ok(Self {
            shared,
            hand: caller,
        })
    }

    /// Run the body up to its next suspension point or exit.
    pub fn step(&self) {
        if !self.is_alive() {
            return;
        }
        if !self.is_stop_requested() {
            self.shared.set_state(CoroutineState::Running);
        }
        if let Err(e) = self.hand.hand_over() {
            // Thread is gone without handing back; nothing left to run.
            warn!("coroutine baton lost: {}", e);
            self.shared.set_state(CoroutineState::Terminated);
        }
    }

    /// Ask the body to stop and wait until it has unwound.
    pub fn request_stop(&self) {
        if !self.is_alive() {
            return;
        }
        self.shared.cancel.cancel();
        self.shared.set_state(CoroutineState::CancelRequested);
        self.step();
    }

    pub fn is_alive(&self) -> bool {
        self.shared.state() != CoroutineState::Terminated
    }

    /// Most recent failure captured from the body. Not cleared by reads.
    pub fn last_failure(&self) -> Option<Failure> {
        self.shared.last_failure()
    }

    pub fn state(&self) -> CoroutineState {
        self.shared.state()
    }

    /// True once `request_stop` has been called, even after termination.
    pub fn is_stop_requested(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }
}

impl Steppable for Coroutine {
    fn step(&self) {
        Coroutine::step(self)
    }

    fn request_stop(&self) {
        Coroutine::request_stop(self)
    }

    fn is_alive(&self) -> bool {
        Coroutine::is_alive(self)
    }

    fn last_failure(&self) -> Option<Failure> {
        Coroutine::last_failure(self)
    }
}

impl fmt::Debug for Coroutine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Coroutine")
            .field("state", &self.state())
            .field("last_failure", &self.last_failure())
            .finish()
    }
}

impl Drop for Coroutine {
    fn drop(&mut self) {
        if self.is_alive() && !thread::panicking() {
            self.request_stop();
        }
    }
}

/// Thread entry point. Always hands the baton back on the way out.
fn run_body<F, O>(shared: Arc<Shared>, hand: CoroutineHand, body: F)
where
    F: FnOnce() -> O,
    O: BodyOutcome,
{
    let _ = shared.state.compare_exchange(
        CoroutineState::Created as u8,
        CoroutineState::AwaitingFirstStep as u8,
        Ordering::AcqRel,
        Ordering::Acquire,
    );

    if hand.wait_turn().is_err() {
        // Handle dropped before the first step.
        shared.set_state(CoroutineState::Terminated);
        return;
    }

    let current = Rc::new(Current {
        shared: shared.clone(),
        hand,
    });
    CURRENT.with(|cell| *cell.borrow_mut() = Some(current.clone()));

    if shared.cancel.is_cancelled() {
        trace!("coroutine stopped before its first step");
    } else {
        match panic::catch_unwind(AssertUnwindSafe(body)) {
            Ok(outcome) => {
                if let Some(failure) = outcome.into_failure() {
                    shared.record_failure(failure);
                }
            }
            Err(payload) if is_stop_signal(payload.as_ref()) => {
                trace!("coroutine unwound after stop request");
            }
            Err(payload) => {
                shared.record_failure(Failure::Panicked(panic_message(payload.as_ref())));
            }
        }
    }

    CURRENT.with(|cell| cell.borrow_mut().take());
    shared.set_state(CoroutineState::Terminated);
    // Caller may already be gone; nothing to do about it here.
    let _ = current.hand.hand_back();
}

/// True when called from inside a coroutine body.
pub fn in_coroutine() -> bool {
    current().is_some()
}

/// Give the baton back to the driver and wait for the next step.
///
/// If a stop was requested meanwhile, this does not return: the body is
/// unwound instead.
///
/// # Panics
///
/// When called outside a coroutine body.
pub fn suspend() {
    let Some(current) = current() else {
        panic!("suspend() called outside a coroutine body");
    };

    current.shared.set_state(CoroutineState::Suspended);
    let resumed = current.hand.yield_turn();
    let stop = resumed.is_err() || current.shared.cancel.is_cancelled();
    drop(current);

    if stop {
        panic::resume_unwind(Box::new(StopSignal));
    }
}

/// Suspend until at least `duration` has passed on the process clock.
///
/// Elapsed time is only checked when the driver steps us, so the real
/// delay is rounded up to a whole number of ticks.
pub fn suspend_for(duration: Duration) {
    suspend_for_with(&SystemClock, duration);
}

/// `suspend_for` against an explicit time source.
pub fn suspend_for_with<C: TimeSource + ?Sized>(clock: &C, duration: Duration) {
    let wait = duration.as_secs_f64() * 1000.0;
    let start = clock.now_millis();
    while clock.now_millis() - start < wait {
        suspend();
    }
}

/// Suspend until `ready` returns true. Checked before every suspension.
pub fn suspend_until<P: FnMut() -> bool>(mut ready: P) {
    while !ready() {
        suspend();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::convert::Infallible;
    use std::sync::atomic::{AtomicBool, AtomicUsize};

    fn counter() -> Arc<AtomicUsize> {
        Arc::new(AtomicUsize::new(0))
    }

    #[test]
    fn thread_parks_awaiting_first_step() {
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        let co = Coroutine::new(move || r.store(true, Ordering::SeqCst)).unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(5);
        while co.state() == CoroutineState::Created && std::time::Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(co.state(), CoroutineState::AwaitingFirstStep);
        assert!(!ran.load(Ordering::SeqCst));

        co.step();
        assert!(ran.load(Ordering::SeqCst));
        assert_eq!(co.state(), CoroutineState::Terminated);
        assert!(!co.is_stop_requested());
    }

    #[test]
    fn two_suspends_then_return() {
        let progress = counter();
        let p = progress.clone();
        let co = Coroutine::new(move || -> Result<i32, Infallible> {
            p.store(1, Ordering::SeqCst);
            suspend();
            p.store(2, Ordering::SeqCst);
            suspend();
            p.store(3, Ordering::SeqCst);
            Ok(42)
        })
        .unwrap();

        assert!(matches!(
            co.state(),
            CoroutineState::Created | CoroutineState::AwaitingFirstStep
        ));
        assert_eq!(progress.load(Ordering::SeqCst), 0);

        co.step();
        assert_eq!(progress.load(Ordering::SeqCst), 1);
        assert_eq!(co.state(), CoroutineState::Suspended);
        co.step();
        assert_eq!(progress.load(Ordering::SeqCst), 2);
        assert!(co.is_alive());
        co.step();
        assert_eq!(progress.load(Ordering::SeqCst), 3);
        assert!(!co.is_alive());
        assert_eq!(co.state(), CoroutineState::Terminated);
        assert_eq!(co.last_failure(), None);
    }

    #[test]
    fn n_suspensions_need_n_plus_one_steps() {
        for n in [0usize, 1, 5, 20] {
            let co = Coroutine::new(move || {
                for _ in 0..n {
                    suspend();
                }
            })
            .unwrap();
            for _ in 0..n {
                co.step();
                assert!(co.is_alive(), "terminated early with n = {}", n);
            }
            co.step();
            assert!(!co.is_alive(), "still alive after {} steps", n + 1);
        }
    }

    #[test]
    fn step_after_termination_is_noop() {
        let runs = counter();
        let r = runs.clone();
        let co = Coroutine::new(move || {
            r.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();
        co.step();
        co.step();
        co.step();
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    struct Cleanup(Arc<AtomicBool>);

    impl Drop for Cleanup {
        fn drop(&mut self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[test]
    fn stop_unwinds_and_runs_cleanup() {
        let cleaned = Arc::new(AtomicBool::new(false));
        let after_suspend = Arc::new(AtomicBool::new(false));
        let (c, a) = (cleaned.clone(), after_suspend.clone());
        let co = Coroutine::new(move || {
            let _guard = Cleanup(c);
            suspend();
            a.store(true, Ordering::SeqCst);
        })
        .unwrap();

        co.step();
        assert!(!cleaned.load(Ordering::SeqCst));
        co.request_stop();
        assert!(!co.is_alive());
        assert!(cleaned.load(Ordering::SeqCst));
        assert!(!after_suspend.load(Ordering::SeqCst));
        assert_eq!(co.last_failure(), None);
        assert!(co.is_stop_requested());
    }

    #[test]
    fn stop_before_first_step_skips_body() {
        let ran = Arc::new(AtomicBool::new(false));
        let r = ran.clone();
        let co = Coroutine::new(move || r.store(true, Ordering::SeqCst)).unwrap();
        co.request_stop();
        assert!(!co.is_alive());
        assert!(!ran.load(Ordering::SeqCst));
    }

    #[test]
    fn stop_is_idempotent() {
        let co = Coroutine::new(|| suspend()).unwrap();
        co.step();
        co.request_stop();
        assert_eq!(co.state(), CoroutineState::Terminated);
        co.request_stop();
        co.request_stop();
        assert_eq!(co.state(), CoroutineState::Terminated);
        assert_eq!(co.last_failure(), None);
    }

    #[test]
    fn error_return_is_captured() {
        let co = Coroutine::new(|| -> Result<(), String> {
            suspend();
            Err("motor stalled".to_string())
        })
        .unwrap();
        co.step();
        co.step();
        assert!(!co.is_alive());
        assert_eq!(
            co.last_failure(),
            Some(Failure::Errored("motor stalled".to_string()))
        );
    }

    #[test]
    fn panic_is_captured_and_step_returns() {
        let co = Coroutine::new::<_, ()>(|| {
            suspend();
            panic!("encoder exploded");
        })
        .unwrap();
        co.step();
        co.step();
        assert!(!co.is_alive());
        match co.last_failure() {
            Some(Failure::Panicked(msg)) => assert!(msg.contains("encoder exploded")),
            other => panic!("expected Panicked, got {:?}", other),
        }
        // Failure stays until replaced.
        assert!(co.last_failure().is_some());
    }

    #[test]
    fn baton_is_exclusive() {
        let caller_running = Arc::new(AtomicBool::new(true));
        let body_running = Arc::new(AtomicBool::new(false));
        let violations = counter();

        let (cr, br, v) = (
            caller_running.clone(),
            body_running.clone(),
            violations.clone(),
        );
        let co = Coroutine::new(move || {
            for _ in 0..100 {
                br.store(true, Ordering::SeqCst);
                if cr.load(Ordering::SeqCst) {
                    v.fetch_add(1, Ordering::SeqCst);
                }
                br.store(false, Ordering::SeqCst);
                suspend();
            }
        })
        .unwrap();

        while co.is_alive() {
            caller_running.store(false, Ordering::SeqCst);
            co.step();
            caller_running.store(true, Ordering::SeqCst);
            if body_running.load(Ordering::SeqCst) {
                violations.fetch_add(1, Ordering::SeqCst);
            }
        }
        assert_eq!(violations.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn suspend_for_takes_whole_ticks() {
        for tick in [7.0f64, 20.0, 30.0, 100.0] {
            let clock = ManualClock::new();
            let body_clock = clock.clone();
            let co = Coroutine::new(move || {
                suspend_for_with(&body_clock, Duration::from_millis(500));
            })
            .unwrap();

            co.step();
            let mut ticks_waited = 0u32;
            while co.is_alive() {
                clock.advance(tick);
                co.step();
                ticks_waited += 1;
            }
            assert_eq!(ticks_waited, (500.0 / tick).ceil() as u32, "tick = {}", tick);
        }
    }

    #[test]
    fn suspend_for_zero_does_not_suspend() {
        let co = Coroutine::new(|| suspend_for(Duration::ZERO)).unwrap();
        co.step();
        assert!(!co.is_alive());
    }

    #[test]
    fn suspend_until_predicate() {
        let gate = Arc::new(AtomicBool::new(false));
        let g = gate.clone();
        let co = Coroutine::new(move || suspend_until(|| g.load(Ordering::SeqCst))).unwrap();
        co.step();
        co.step();
        assert!(co.is_alive());
        gate.store(true, Ordering::SeqCst);
        co.step();
        assert!(!co.is_alive());
    }

    #[test]
    fn in_coroutine_reports_context() {
        assert!(!in_coroutine());
        let seen = Arc::new(AtomicBool::new(false));
        let s = seen.clone();
        let co = Coroutine::new(move || s.store(in_coroutine(), Ordering::SeqCst)).unwrap();
        co.step();
        assert!(seen.load(Ordering::SeqCst));
    }

    #[test]
    #[should_panic(expected = "outside a coroutine")]
    fn suspend_outside_coroutine_panics() {
        suspend();
    }

    #[test]
    fn drop_stops_live_coroutine() {
        let cleaned = Arc::new(AtomicBool::new(false));
        let c = cleaned.clone();
        let co = Coroutine::new(move || {
            let _guard = Cleanup(c);
            suspend_until(|| false);
        })
        .unwrap();
        co.step();
        drop(co);
        assert!(cleaned.load(Ordering::SeqCst));
    }
}
