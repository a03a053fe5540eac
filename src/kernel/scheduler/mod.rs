//! Scheduling policies.
//!
//! A `Scheduler` is chosen at boot and mints every `ThreadQueue` in the
//! machine: the ready queue, lock queues, semaphore queues. Queues
//! created with `transfer_priority` let waiters donate their priority to
//! the queue's holder; whether that means anything depends on the
//! policy.
//!
//! Per-thread policy bookkeeping lives in a tagged slot on the thread
//! itself, so switching policies never chases stale state.

pub mod lottery;
pub mod priority;
pub mod round_robin;

use std::sync::Arc;

pub use lottery::LotteryScheduler;
pub use priority::PriorityScheduler;
pub use round_robin::RoundRobinScheduler;

use super::{KThread, Kernel};
use crate::machine::SchedulerKind;

pub trait Scheduler: Send + Sync {
    /// Mint a queue threads can wait on. `transfer_priority` marks it as
    /// a donation channel from waiters to holder.
    fn new_thread_queue(&self, transfer_priority: bool) -> Arc<dyn ThreadQueue>;

    /// The thread's own priority. Interrupts must be disabled.
    fn priority(&self, kernel: &Kernel, thread: &Arc<KThread>) -> u64;

    /// Set the thread's own priority; fatal outside the policy's range.
    /// Interrupts must be disabled.
    fn set_priority(&self, kernel: &Kernel, thread: &Arc<KThread>, priority: u64);

    /// The priority the thread competes with: its own plus whatever its
    /// waiters donate. Interrupts must be disabled.
    fn effective_priority(&self, kernel: &Kernel, thread: &Arc<KThread>) -> u64;

    /// Bump the current thread's priority by one. False at the top of
    /// the range.
    fn increase_priority(&self, kernel: &Kernel) -> bool;

    /// Drop the current thread's priority by one. False at the bottom of
    /// the range.
    fn decrease_priority(&self, kernel: &Kernel) -> bool;

    fn default_priority(&self) -> u64;
    fn minimum_priority(&self) -> u64;
    fn maximum_priority(&self) -> u64;
}

/// A queue of threads waiting for some resource (the CPU, a lock, a
/// semaphore permit). All operations require interrupts disabled.
pub trait ThreadQueue: Send + Sync {
    /// `thread` starts waiting here.
    fn wait_for_access(&self, kernel: &Kernel, thread: &Arc<KThread>);

    /// `thread` takes the queue's resource without waiting. Fatal if
    /// anyone is already queued.
    fn acquire(&self, kernel: &Kernel, thread: &Arc<KThread>);

    /// Pick, dequeue, and return the next thread, making it the queue's
    /// holder where the policy tracks one. `None` on an empty queue.
    fn next_thread(&self, kernel: &Kernel) -> Option<Arc<KThread>>;
}

/// Per-thread scheduler slot, tagged by the policy that owns it.
pub(crate) enum SchedulingState {
    /// No policy state yet; round-robin never stores any.
    Vacant,
    /// Priority and lottery bookkeeping (lottery reads priority as a
    /// ticket count).
    Priority(priority::PriorityState),
}

pub(crate) fn build(kind: SchedulerKind) -> Box<dyn Scheduler> {
    match kind {
        SchedulerKind::RoundRobin => Box::new(RoundRobinScheduler::new()),
        SchedulerKind::Priority => Box::new(PriorityScheduler::new()),
        SchedulerKind::Lottery => Box::new(LotteryScheduler::new()),
    }
}
