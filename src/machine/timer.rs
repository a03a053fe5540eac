//! Simulated hardware timer.
//!
//! Fires roughly every [`TIMER_TICKS`](super::TIMER_TICKS) ticks with a
//! little deterministic jitter so threads cannot tune themselves to the
//! period. The kernel installs one handler at boot (the alarm's).

use std::sync::{Arc, Mutex};

use super::TIMER_TICKS;
use crate::kernel::Kernel;

pub(crate) type TimerHandler = Arc<dyn Fn(&Kernel) + Send + Sync>;

pub(crate) struct Timer {
    handler: Mutex<Option<TimerHandler>>,
}

impl Timer {
    pub(crate) fn new() -> Self {
        Self {
            handler: Mutex::new(None),
        }
    }

    /// Install the handler and schedule the first tick.
    pub(crate) fn set_interrupt_handler(&self, kernel: &Kernel, handler: TimerHandler) {
        *super::lock(&self.handler) = Some(handler);
        self.schedule_next(kernel);
    }

    fn schedule_next(&self, kernel: &Kernel) {
        // Period with jitter in [-5%, +10%).
        let jitter = kernel.machine().random_below(TIMER_TICKS / 10);
        let delay = TIMER_TICKS - TIMER_TICKS / 20 + jitter;
        kernel
            .machine()
            .interrupt
            .schedule(delay, "timer", Box::new(|k| k.machine().timer.fire(k)));
    }

    /// One timer interrupt: reschedule first, then run the handler. The
    /// handler lock is not held across the call because the handler may
    /// context-switch and a later tick may fire before this one returns.
    fn fire(&self, kernel: &Kernel) {
        self.schedule_next(kernel);
        let handler = super::lock(&self.handler).clone();
        if let Some(handler) = handler {
            handler(kernel);
        }
    }
}
