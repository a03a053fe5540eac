//! The kernel proper: thread system, alarm, synchronization primitives,
//! and the pluggable scheduler, all hanging off one `Kernel` instance.
//!
//! Kernel code receives `&Kernel` (or `&Arc<Kernel>` where it forks)
//! explicitly; there are no thread-locals or globals, so independent
//! simulated machines can coexist in one process.

pub mod alarm;
pub mod scheduler;
pub mod sync;
pub mod thread;

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::AtomicU64;
use std::sync::{Arc, Mutex};

use log::debug;

pub use alarm::Alarm;
pub use thread::{KThread, Status};

use crate::machine::context::{ExecutionContext, MachineExit};
use crate::machine::{self, Machine, MachineConfig};
use scheduler::{Scheduler, ThreadQueue};

/// Thread-system state formerly kept in statics: the ready queue, the
/// running thread, the thread awaiting destruction, the idle thread,
/// and the id counter.
pub(crate) struct ThreadSystem {
    pub(crate) ready_queue: Arc<dyn ThreadQueue>,
    pub(crate) current: Mutex<Option<Arc<KThread>>>,
    pub(crate) to_be_destroyed: Mutex<Option<Arc<KThread>>>,
    pub(crate) idle: Mutex<Option<Arc<KThread>>>,
    pub(crate) created: AtomicU64,
}

pub struct Kernel {
    machine: Arc<Machine>,
    scheduler: Box<dyn Scheduler>,
    alarm: Alarm,
    pub(crate) threads: ThreadSystem,
}

impl Kernel {
    /// Boot a machine, run `body` as the main kernel thread, then halt
    /// and tear everything down. A fatal assertion anywhere in the
    /// simulation re-raises here after teardown.
    pub fn run<F>(config: MachineConfig, body: F)
    where
        F: FnOnce(&Arc<Kernel>),
    {
        let machine = Arc::new(Machine::new(config));
        let scheduler = scheduler::build(machine.config.scheduler);
        let ready_queue = scheduler.new_thread_queue(false);
        let kernel = Arc::new(Kernel {
            machine: Arc::clone(&machine),
            scheduler,
            alarm: Alarm::new(),
            threads: ThreadSystem {
                ready_queue,
                current: Mutex::new(None),
                to_be_destroyed: Mutex::new(None),
                idle: Mutex::new(None),
                created: AtomicU64::new(0),
            },
        });

        // The booting OS thread becomes the first execution context.
        let main_context = ExecutionContext::new();
        main_context.start_first(&machine);

        debug!(
            "booting with {} scheduler",
            machine.config.scheduler.name()
        );
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            thread::boot(&kernel, main_context);
            kernel.alarm.start(&kernel);
            kernel.machine.interrupt.enable(&kernel);
            body(&kernel);
        }));

        machine.interrupt.request_halt();
        machine.contexts.teardown(&machine);

        if let Some(fatal) = machine.take_fatal() {
            panic::resume_unwind(fatal);
        }
        if let Err(payload) = result {
            // A plain machine exit (halt) unwinds with a marker; that is
            // a normal way out. Anything else was a real panic on the
            // main context.
            if !payload.is::<MachineExit>() {
                panic::resume_unwind(payload);
            }
        }
        debug!("machine halted");
    }

    /// Ask the machine to stop: the next context to re-enable interrupts
    /// unwinds out of the simulation. Callable from outside it, which is
    /// how test harnesses break livelocks.
    pub fn halt(&self) {
        self.machine.interrupt.request_halt();
    }

    pub fn interrupt(&self) -> InterruptCtl<'_> {
        InterruptCtl { kernel: self }
    }

    pub fn timer(&self) -> TimerCtl<'_> {
        TimerCtl { kernel: self }
    }

    pub fn scheduler(&self) -> &dyn Scheduler {
        self.scheduler.as_ref()
    }

    pub fn alarm(&self) -> &Alarm {
        &self.alarm
    }

    /// Deterministic draw in `[0, bound)` from the machine's seeded
    /// generator.
    pub fn random(&self, bound: u64) -> u64 {
        self.machine.random_below(bound)
    }

    pub(crate) fn machine(&self) -> &Arc<Machine> {
        &self.machine
    }
}

/// Interrupt-controller surface for kernel code.
pub struct InterruptCtl<'a> {
    kernel: &'a Kernel,
}

impl InterruptCtl<'_> {
    /// Disable interrupts, returning the previous status for `restore`.
    pub fn disable(&self) -> bool {
        self.kernel.machine.interrupt.disable()
    }

    /// Undo a matching `disable`. Only ever re-enables.
    pub fn restore(&self, previous: bool) {
        self.kernel.machine.interrupt.restore(self.kernel, previous);
    }

    /// Re-enable interrupts; fatal if they already are.
    pub fn enable(&self) {
        self.kernel.machine.interrupt.enable(self.kernel);
    }

    pub fn enabled(&self) -> bool {
        self.kernel.machine.interrupt.enabled()
    }

    pub fn disabled(&self) -> bool {
        self.kernel.machine.interrupt.disabled()
    }
}

/// Hardware-timer surface for kernel code.
pub struct TimerCtl<'a> {
    kernel: &'a Kernel,
}

impl TimerCtl<'_> {
    /// Current machine time in ticks.
    pub fn time(&self) -> u64 {
        self.kernel.machine.interrupt.time()
    }
}

pub(crate) use machine::lock;
