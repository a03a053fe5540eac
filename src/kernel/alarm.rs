//! The alarm: lets threads sleep until a machine time.
//!
//! Waiters are keyed by wake tick in a `BTreeMap`; several threads may
//! share a tick and all of them wake on the same timer interrupt. The
//! handler also yields the running thread, which is what gives the
//! machine time slicing.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use log::trace;

use super::{KThread, Kernel, lock};

pub struct Alarm {
    waiting: Mutex<BTreeMap<u64, Vec<Arc<KThread>>>>,
}

impl Alarm {
    pub(crate) fn new() -> Self {
        Self {
            waiting: Mutex::new(BTreeMap::new()),
        }
    }

    /// Hook the hardware timer. Skipped entirely when the configuration
    /// turns timer interrupts off.
    pub(crate) fn start(&self, kernel: &Kernel) {
        if !kernel.machine().config.timer_interrupts {
            return;
        }
        kernel
            .machine()
            .timer
            .set_interrupt_handler(kernel, Arc::new(|k| k.alarm().timer_interrupt(k)));
    }

    /// Block the current thread for at least `ticks` ticks. The thread
    /// wakes on the first timer interrupt at or after the target time,
    /// never before it.
    pub fn wait_for(&self, kernel: &Kernel, ticks: u64) {
        let current = kernel.current_thread();
        trace!("{current} waiting {ticks} ticks");

        let previous = kernel.interrupt().disable();
        let wake_time = kernel.timer().time() + ticks;
        lock(&self.waiting)
            .entry(wake_time)
            .or_default()
            .push(current);
        kernel.sleep_current();
        kernel.interrupt().restore(previous);
    }

    /// Timer-interrupt handler: wake everything that has come due, then
    /// yield so the ready queue gets a chance to rotate.
    fn timer_interrupt(&self, kernel: &Kernel) {
        let now = kernel.timer().time();
        let due: Vec<Arc<KThread>> = {
            let mut waiting = lock(&self.waiting);
            let later = waiting.split_off(&(now + 1));
            let due = std::mem::replace(&mut *waiting, later);
            due.into_values().flatten().collect()
        };
        for thread in due {
            trace!("alarm waking {thread}");
            thread.ready(kernel);
        }
        kernel.yield_now();
    }
}
