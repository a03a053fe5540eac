//! Lottery scheduling: priorities are ticket counts, and each pick is a
//! uniform draw over the waiters' effective tickets.
//!
//! Shares the donation machinery with the priority scheduler, with two
//! differences: donated tickets *add* to the holder's own instead of
//! maxing, and the winner is drawn rather than the front of a sorted
//! order. Tickets can run to `u32::MAX` per thread; nothing is stored
//! per ticket, so huge counts cost nothing.

use std::sync::Arc;

use super::priority::{Policy, PolicyCore};
use super::{Scheduler, ThreadQueue};
use crate::kernel::{KThread, Kernel};

pub struct LotteryScheduler {
    core: Arc<PolicyCore>,
}

impl LotteryScheduler {
    pub fn new() -> Self {
        Self {
            core: PolicyCore::new(Policy::Lottery, 1, 1, u64::from(u32::MAX)),
        }
    }
}

impl Default for LotteryScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for LotteryScheduler {
    fn new_thread_queue(&self, transfer_priority: bool) -> Arc<dyn ThreadQueue> {
        self.core.new_queue(transfer_priority)
    }

    fn priority(&self, kernel: &Kernel, thread: &Arc<KThread>) -> u64 {
        self.core.priority(kernel, thread)
    }

    fn set_priority(&self, kernel: &Kernel, thread: &Arc<KThread>, tickets: u64) {
        self.core.set_priority(kernel, thread, tickets);
    }

    fn effective_priority(&self, kernel: &Kernel, thread: &Arc<KThread>) -> u64 {
        self.core.effective_priority(kernel, thread)
    }

    fn increase_priority(&self, kernel: &Kernel) -> bool {
        self.core.increase_priority(kernel)
    }

    fn decrease_priority(&self, kernel: &Kernel) -> bool {
        self.core.decrease_priority(kernel)
    }

    fn default_priority(&self) -> u64 {
        self.core.default_priority()
    }

    fn minimum_priority(&self) -> u64 {
        self.core.minimum_priority()
    }

    fn maximum_priority(&self) -> u64 {
        self.core.maximum_priority()
    }
}
