// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Counting completion permit.
//!
//! Shared by every generator adapter in a `StepGroup`: each finished unit
//! of work posts one permit, the stepping context takes one per adapter
//! it woke.

use std::sync::{Condvar, Mutex, PoisonError};

#[derive(Debug, Default)]
pub struct CountingPermit {
    count: Mutex<usize>,
    cvar: Condvar,
}

impl CountingPermit {
    pub fn new() -> Self {
        Self::default()
    }

    /// Post one permit and wake one waiter.
    pub fn release(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        *count += 1;
        self.cvar.notify_one();
    }

    /// Block until a permit is available, then take it.
    pub fn acquire(&self) {
        let mut count = self.count.lock().unwrap_or_else(PoisonError::into_inner);
        while *count == 0 {
            count = self
                .cvar
                .wait(count)
                .unwrap_or_else(PoisonError::into_inner);
        }
        *count -= 1;
    }

    /// Permits posted but not yet taken.
    pub fn available(&self) -> usize {
        *self.count.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn counts_up_and_down() {
        let p = CountingPermit::new();
        assert_eq!(p.available(), 0);
        p.release();
        p.release();
        assert_eq!(p.available(), 2);
        p.acquire();
        assert_eq!(p.available(), 1);
        p.acquire();
        assert_eq!(p.available(), 0);
    }

    #[test]
    fn acquire_waits_for_release() {
        let p = Arc::new(CountingPermit::new());
        let mut handles = vec![];
        for _ in 0..4 {
            let p = p.clone();
            handles.push(std::thread::spawn(move || p.release()));
        }
        for _ in 0..4 {
            p.acquire();
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(p.available(), 0);
    }
}
