//! minos - a teaching operating-system kernel simulator.
//!
//! Many logical kernel threads are multiplexed onto one logical CPU. A
//! simulated machine owns the clock, the interrupt controller, a seeded
//! PRNG, and an execution-context engine that backs each kernel thread
//! with a parked OS thread. On top of that the kernel provides cooperative
//! scheduling with pluggable policies and the classic synchronization
//! primitives.
//!
//! Design principles:
//! - No process-wide state: every simulated machine is an independent
//!   instance, so tests can run several side by side.
//! - Determinism: all randomness (timer jitter, lottery draws) flows from
//!   one seeded generator in the machine configuration.
//! - Fatal by default: kernel invariant violations are assertions that
//!   abort the simulated machine, not recoverable errors. The only
//!   `Result` surface is configuration loading.
//!
//! ```no_run
//! use minos::{KThread, Kernel, MachineConfig};
//!
//! Kernel::run(MachineConfig::new(), |kernel| {
//!     let t = KThread::new(kernel, |k: &std::sync::Arc<Kernel>| {
//!         k.yield_now();
//!     });
//!     t.fork(kernel);
//!     t.join(kernel);
//! });
//! ```

pub mod kernel;
pub mod machine;

pub use kernel::scheduler::{Scheduler, ThreadQueue};
pub use kernel::sync::{
    Communicator, Condition, InterruptsCondition, Lock, Semaphore, SemaphoresCondition, SynchList,
};
pub use kernel::{Alarm, KThread, Kernel, Status};
pub use machine::config::{ConfigError, MachineConfig, SchedulerKind};
pub use machine::{KERNEL_TICK, MAX_CONTEXTS, TIMER_TICKS};
