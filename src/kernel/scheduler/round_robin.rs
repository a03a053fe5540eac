//! Round-robin: plain FIFO time slicing. Every thread has the same
//! priority and `transfer_priority` means nothing.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::{Scheduler, ThreadQueue};
use crate::kernel::{KThread, Kernel, lock};

const ROUND_ROBIN_PRIORITY: u64 = 1;

pub struct RoundRobinScheduler;

impl RoundRobinScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RoundRobinScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for RoundRobinScheduler {
    fn new_thread_queue(&self, _transfer_priority: bool) -> Arc<dyn ThreadQueue> {
        Arc::new(FifoQueue {
            waiters: Mutex::new(VecDeque::new()),
        })
    }

    fn priority(&self, kernel: &Kernel, _thread: &Arc<KThread>) -> u64 {
        assert!(kernel.machine().interrupt.disabled());
        ROUND_ROBIN_PRIORITY
    }

    fn set_priority(&self, kernel: &Kernel, _thread: &Arc<KThread>, priority: u64) {
        assert!(kernel.machine().interrupt.disabled());
        assert_eq!(
            priority, ROUND_ROBIN_PRIORITY,
            "round-robin threads all share one priority"
        );
    }

    fn effective_priority(&self, kernel: &Kernel, _thread: &Arc<KThread>) -> u64 {
        assert!(kernel.machine().interrupt.disabled());
        ROUND_ROBIN_PRIORITY
    }

    fn increase_priority(&self, _kernel: &Kernel) -> bool {
        false
    }

    fn decrease_priority(&self, _kernel: &Kernel) -> bool {
        false
    }

    fn default_priority(&self) -> u64 {
        ROUND_ROBIN_PRIORITY
    }

    fn minimum_priority(&self) -> u64 {
        ROUND_ROBIN_PRIORITY
    }

    fn maximum_priority(&self) -> u64 {
        ROUND_ROBIN_PRIORITY
    }
}

struct FifoQueue {
    waiters: Mutex<VecDeque<Arc<KThread>>>,
}

impl ThreadQueue for FifoQueue {
    fn wait_for_access(&self, kernel: &Kernel, thread: &Arc<KThread>) {
        assert!(kernel.machine().interrupt.disabled());
        lock(&self.waiters).push_back(Arc::clone(thread));
    }

    fn acquire(&self, kernel: &Kernel, _thread: &Arc<KThread>) {
        assert!(kernel.machine().interrupt.disabled());
        let empty = lock(&self.waiters).is_empty();
        assert!(empty, "acquiring a queue with waiters");
    }

    fn next_thread(&self, kernel: &Kernel) -> Option<Arc<KThread>> {
        assert!(kernel.machine().interrupt.disabled());
        lock(&self.waiters).pop_front()
    }
}
