//! Counting semaphore.
//!
//! `v()` on a contended semaphore hands the permit straight to the first
//! waiter instead of bumping the count, so a woken thread never has to
//! re-check.

use std::sync::{Arc, Mutex};

use log::trace;

use crate::kernel::scheduler::ThreadQueue;
use crate::kernel::{Kernel, lock};

pub struct Semaphore {
    value: Mutex<usize>,
    /// Waiters do not receive donated priority; a semaphore has no
    /// single owner to donate to.
    wait_queue: Arc<dyn ThreadQueue>,
}

impl Semaphore {
    pub fn new(kernel: &Kernel, initial: usize) -> Self {
        Self {
            value: Mutex::new(initial),
            wait_queue: kernel.scheduler().new_thread_queue(false),
        }
    }

    /// Take a permit, blocking while none are available.
    pub fn p(&self, kernel: &Kernel) {
        let previous = kernel.interrupt().disable();
        let mut value = lock(&self.value);
        if *value == 0 {
            drop(value);
            trace!("{} blocking on semaphore", kernel.current_thread());
            self.wait_queue.wait_for_access(kernel, &kernel.current_thread());
            kernel.sleep_current();
        } else {
            *value -= 1;
            drop(value);
        }
        kernel.interrupt().restore(previous);
    }

    /// Release a permit, waking one waiter if there is one.
    pub fn v(&self, kernel: &Kernel) {
        let previous = kernel.interrupt().disable();
        match self.wait_queue.next_thread(kernel) {
            Some(waiter) => waiter.ready(kernel),
            None => *lock(&self.value) += 1,
        }
        kernel.interrupt().restore(previous);
    }
}
