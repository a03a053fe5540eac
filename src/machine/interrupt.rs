//! Simulated interrupt controller.
//!
//! There is no real asynchrony here: time only advances when kernel code
//! re-enables interrupts, and pending interrupts are delivered at that
//! moment, with interrupts held disabled for the handlers. A handler may
//! context-switch away; delivery resumes when the enabling context is
//! scheduled again.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};

use log::trace;

use super::KERNEL_TICK;
use crate::kernel::Kernel;
use crate::machine::context;

pub(crate) type InterruptHandler = Box<dyn Fn(&Kernel) + Send + Sync>;

struct PendingInterrupt {
    label: &'static str,
    handler: InterruptHandler,
}

struct InterruptState {
    enabled: bool,
    ticks: u64,
    /// Breaks ties between interrupts due on the same tick: delivery is
    /// in schedule order.
    sequence: u64,
    pending: BTreeMap<(u64, u64), PendingInterrupt>,
}

pub(crate) struct Interrupt {
    state: Mutex<InterruptState>,
    halt: AtomicBool,
}

impl Interrupt {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(InterruptState {
                enabled: false,
                ticks: 0,
                sequence: 0,
                pending: BTreeMap::new(),
            }),
            halt: AtomicBool::new(false),
        }
    }

    /// Disable interrupts, returning the previous status.
    pub(crate) fn disable(&self) -> bool {
        let mut state = super::lock(&self.state);
        let previous = state.enabled;
        state.enabled = false;
        previous
    }

    /// Restore a status saved by `disable`. Restoring "disabled" never
    /// turns interrupts off; it only undoes a disable that actually
    /// changed the status.
    pub(crate) fn restore(&self, kernel: &Kernel, previous: bool) {
        if previous && !self.enabled() {
            self.enable(kernel);
        }
    }

    /// Re-enable interrupts. Advances the clock by one kernel tick and
    /// delivers everything that has come due before turning interrupts
    /// back on.
    pub(crate) fn enable(&self, kernel: &Kernel) {
        if self.halt.load(Ordering::SeqCst) {
            context::unwind_exit();
        }
        {
            let mut state = super::lock(&self.state);
            assert!(!state.enabled, "interrupts already enabled");
            state.ticks += KERNEL_TICK;
        }
        self.deliver_due(kernel);
        super::lock(&self.state).enabled = true;
    }

    pub(crate) fn enabled(&self) -> bool {
        super::lock(&self.state).enabled
    }

    pub(crate) fn disabled(&self) -> bool {
        !self.enabled()
    }

    pub(crate) fn time(&self) -> u64 {
        super::lock(&self.state).ticks
    }

    /// Schedule `handler` to run `delay` ticks from now, when some
    /// context next re-enables interrupts at or past that time.
    pub(crate) fn schedule(&self, delay: u64, label: &'static str, handler: InterruptHandler) {
        assert!(delay > 0, "interrupt delay must be positive");
        let mut state = super::lock(&self.state);
        let when = state.ticks + delay;
        let sequence = state.sequence;
        state.sequence += 1;
        trace!("scheduling {} interrupt at tick {}", label, when);
        state
            .pending
            .insert((when, sequence), PendingInterrupt { label, handler });
    }

    /// Halt the machine: the next context to re-enable interrupts
    /// unwinds out of the simulation. Safe to call from outside it.
    pub(crate) fn request_halt(&self) {
        self.halt.store(true, Ordering::SeqCst);
    }

    /// Pending-map lock is released around each handler call: handlers
    /// may switch contexts, and another context may finish delivery.
    fn deliver_due(&self, kernel: &Kernel) {
        loop {
            let due = {
                let mut state = super::lock(&self.state);
                let now = state.ticks;
                match state.pending.first_key_value() {
                    Some((&(when, _), _)) if when <= now => state.pending.pop_first(),
                    _ => None,
                }
            };
            match due {
                Some((_, interrupt)) => {
                    trace!("delivering {} interrupt", interrupt.label);
                    (interrupt.handler)(kernel);
                }
                None => break,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disable_reports_previous_status() {
        let interrupt = Interrupt::new();
        assert!(!interrupt.disable());
        assert!(!interrupt.disable());
        assert!(interrupt.disabled());
    }

    #[test]
    fn starts_disabled_at_tick_zero() {
        let interrupt = Interrupt::new();
        assert!(interrupt.disabled());
        assert_eq!(interrupt.time(), 0);
    }

    #[test]
    fn pending_interrupts_order_by_due_time_then_schedule_order() {
        let interrupt = Interrupt::new();
        interrupt.schedule(30, "c", Box::new(|_| {}));
        interrupt.schedule(10, "a", Box::new(|_| {}));
        interrupt.schedule(10, "b", Box::new(|_| {}));
        let state = super::super::lock(&interrupt.state);
        let labels: Vec<&str> = state.pending.values().map(|p| p.label).collect();
        assert_eq!(labels, ["a", "b", "c"]);
    }

    #[test]
    #[should_panic(expected = "delay must be positive")]
    fn zero_delay_is_rejected() {
        Interrupt::new().schedule(0, "now", Box::new(|_| {}));
    }
}
