//! The simulated machine: clock, interrupt controller, timer, PRNG, and
//! the execution-context engine. One `Machine` per simulation; nothing
//! here is process-global.

pub mod config;
pub(crate) mod context;
pub(crate) mod interrupt;
pub(crate) mod random;
pub(crate) mod timer;

use std::any::Any;
use std::sync::{Mutex, MutexGuard, PoisonError};

pub use config::{ConfigError, MachineConfig, SchedulerKind};
pub use context::MAX_CONTEXTS;

use context::ContextEngine;
use interrupt::Interrupt;
use random::Random;
use timer::Timer;

/// Ticks charged for one stretch of kernel code (one interrupt
/// re-enable).
pub const KERNEL_TICK: u64 = 10;

/// Approximate period of the hardware timer, in ticks.
pub const TIMER_TICKS: u64 = 500;

/// Lock that shrugs off poisoning. A context unwinding on a fatal
/// assertion must not wedge teardown of the rest of the machine.
pub(crate) fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) struct Machine {
    pub(crate) interrupt: Interrupt,
    pub(crate) timer: Timer,
    pub(crate) contexts: ContextEngine,
    pub(crate) config: MachineConfig,
    random: Mutex<Random>,
    /// First panic payload to escape a forked context; re-raised from
    /// `Kernel::run` once the machine is torn down.
    fatal: Mutex<Option<Box<dyn Any + Send>>>,
}

impl Machine {
    pub(crate) fn new(config: MachineConfig) -> Self {
        Self {
            interrupt: Interrupt::new(),
            timer: Timer::new(),
            contexts: ContextEngine::new(),
            random: Mutex::new(Random::new(config.random_seed)),
            config,
            fatal: Mutex::new(None),
        }
    }

    pub(crate) fn random_below(&self, bound: u64) -> u64 {
        lock(&self.random).next_below(bound)
    }

    pub(crate) fn record_fatal(&self, payload: Box<dyn Any + Send>) {
        let mut fatal = lock(&self.fatal);
        if fatal.is_none() {
            *fatal = Some(payload);
        }
    }

    pub(crate) fn take_fatal(&self) -> Option<Box<dyn Any + Send>> {
        lock(&self.fatal).take()
    }
}
