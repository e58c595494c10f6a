// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Baton hand-off between a driver and one coroutine thread.
//!
//! Each direction is a binary signal: a `sync_channel(1)` whose single
//! slot is the one pending permit. Releasing into a full slot is a
//! protocol fault, not a second permit.

use std::sync::mpsc;

use crate::error::BatonError;

/// Release half of a binary signal.
pub(crate) struct Release {
    inner: mpsc::SyncSender<()>,
}

impl Release {
    /// Post the permit. Never blocks.
    pub fn release(&self) -> Result<(), BatonError> {
        match self.inner.try_send(()) {
            Ok(()) => Ok(()),
            Err(mpsc::TrySendError::Full(())) => Err(BatonError::Overfull),
            Err(mpsc::TrySendError::Disconnected(())) => Err(BatonError::Closed),
        }
    }
}

/// Acquire half of a binary signal.
pub(crate) struct Acquire {
    inner: mpsc::Receiver<()>,
}

impl Acquire {
    /// Block until the permit is posted, consuming it.
    pub fn acquire(&self) -> Result<(), BatonError> {
        self.inner.recv().map_err(|_| BatonError::Closed)
    }
}

/// Create a binary signal with no pending permit.
pub(crate) fn binary_signal() -> (Release, Acquire) {
    let (tx, rx) = mpsc::sync_channel(1);
    (Release { inner: tx }, Acquire { inner: rx })
}

/// The driver's hand: passes the baton to the coroutine and waits for it.
pub(crate) struct CallerHand {
    to_coroutine: Release,
    from_coroutine: Acquire,
}

impl CallerHand {
    /// Give the coroutine one turn. Returns once the baton is back.
    pub fn hand_over(&self) -> Result<(), BatonError> {
        self.to_coroutine.release()?;
        self.from_coroutine.acquire()
    }
}

/// The coroutine's hand: waits for its turn and gives the baton back.
pub(crate) struct CoroutineHand {
    to_caller: Release,
    from_caller: Acquire,
}

impl CoroutineHand {
    /// Block until the driver hands over the baton.
    pub fn wait_turn(&self) -> Result<(), BatonError> {
        self.from_caller.acquire()
    }

    /// Give the baton back without waiting (used on exit).
    pub fn hand_back(&self) -> Result<(), BatonError> {
        self.to_caller.release()
    }

    /// Give the baton back and wait for the next turn.
    pub fn yield_turn(&self) -> Result<(), BatonError> {
        self.hand_back()?;
        self.wait_turn()
    }
}

/// Both hands of a fresh baton. Nobody holds a permit yet.
pub(crate) fn baton_pair() -> (CallerHand, CoroutineHand) {
    let (to_coroutine, from_caller) = binary_signal();
    let (to_caller, from_coroutine) = binary_signal();
    (
        CallerHand {
            to_coroutine,
            from_coroutine,
        },
        CoroutineHand {
            to_caller,
            from_caller,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signal_holds_one_permit() {
        let (tx, rx) = binary_signal();
        tx.release().unwrap();
        assert_eq!(tx.release(), Err(BatonError::Overfull));
        rx.acquire().unwrap();
        tx.release().unwrap();
    }

    #[test]
    fn closed_signal() {
        let (tx, rx) = binary_signal();
        drop(tx);
        assert_eq!(rx.acquire(), Err(BatonError::Closed));

        let (tx, rx) = binary_signal();
        drop(rx);
        assert_eq!(tx.release(), Err(BatonError::Closed));
    }

    #[test]
    fn hand_over_round_trip() {
        let (caller, coroutine) = baton_pair();
        let t = std::thread::spawn(move || {
            coroutine.wait_turn().unwrap();
            coroutine.yield_turn().unwrap();
            coroutine.hand_back().unwrap();
        });
        caller.hand_over().unwrap();
        caller.hand_over().unwrap();
        t.join().unwrap();
    }

    #[test]
    fn hand_over_after_exit_reports_closed() {
        let (caller, coroutine) = baton_pair();
        drop(coroutine);
        assert_eq!(caller.hand_over(), Err(BatonError::Closed));
    }
}
