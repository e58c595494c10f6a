// SPDX-License-Identifier: (MIT OR Apache-2.0)
//! Driving contexts.
//!
//! Whatever supplies the periodic tick (a GUI timer, an event loop, a
//! plain loop) talks to the scheduler through `TickDriver` only.

use std::time::Duration;

use log::trace;

use crate::scheduler::Group;
use crate::task::{Steppable, TaskId};

/// Capability interface of a tick-driven scheduler.
pub trait TickDriver {
    fn register(&mut self, group: Group, task: Box<dyn Steppable>) -> TaskId;

    /// Step every registered task once.
    fn drive_tick(&mut self);

    /// How long the external loop may sleep before the next tick.
    fn time_millis_to_next_wake(&self) -> f64;
}

/// Plain blocking loop: tick, then sleep until the next tick is due.
///
/// Checks `keep_running` before every tick and returns the number of
/// ticks driven.
pub fn run_ticks<D, P>(driver: &mut D, mut keep_running: P) -> u64
where
    D: TickDriver + ?Sized,
    P: FnMut(&D) -> bool,
{
    let mut ticks = 0;
    while keep_running(driver) {
        driver.drive_tick();
        ticks += 1;
        let wait = driver.time_millis_to_next_wake();
        trace!("tick {} done, sleeping {:.1}ms", ticks, wait);
        if wait > 0.0 {
            std::thread::sleep(Duration::from_secs_f64(wait / 1000.0));
        }
    }
    ticks
}
