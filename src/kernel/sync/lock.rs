//! Mutual-exclusion lock with a tracked holder.
//!
//! The wait queue transfers priority: while high-priority threads sit in
//! it, the holder runs with their donated priority. Release hands the
//! lock directly to the next waiter, so ownership never goes through an
//! unlocked window under contention.

use std::sync::{Arc, Mutex};

use log::trace;

use crate::kernel::scheduler::ThreadQueue;
use crate::kernel::{KThread, Kernel, lock};

pub struct Lock {
    holder: Mutex<Option<Arc<KThread>>>,
    wait_queue: Arc<dyn ThreadQueue>,
}

impl Lock {
    pub fn new(kernel: &Kernel) -> Self {
        Self {
            holder: Mutex::new(None),
            wait_queue: kernel.scheduler().new_thread_queue(true),
        }
    }

    /// Take the lock, blocking while someone else holds it. Reacquiring
    /// a lock you already hold is fatal; the lock is not reentrant.
    pub fn acquire(&self, kernel: &Kernel) {
        let current = kernel.current_thread();
        assert!(!self.held_by(&current), "lock acquired reentrantly");

        let previous = kernel.interrupt().disable();
        let held = lock(&self.holder).is_some();
        if held {
            trace!("{current} blocking on lock");
            self.wait_queue.wait_for_access(kernel, &current);
            kernel.sleep_current();
            // release() made us the holder before readying us.
        } else {
            self.wait_queue.acquire(kernel, &current);
            *lock(&self.holder) = Some(current);
        }
        kernel.interrupt().restore(previous);
    }

    /// Give the lock up. If anyone is waiting, the first waiter becomes
    /// the holder immediately. Releasing a lock you do not hold is
    /// fatal.
    pub fn release(&self, kernel: &Kernel) {
        assert!(
            self.is_held_by_current_thread(kernel),
            "lock released by a thread that does not hold it"
        );
        let previous = kernel.interrupt().disable();
        let next = self.wait_queue.next_thread(kernel);
        *lock(&self.holder) = next.clone();
        if let Some(next) = next {
            next.ready(kernel);
        }
        kernel.interrupt().restore(previous);
    }

    pub fn is_held_by_current_thread(&self, kernel: &Kernel) -> bool {
        self.held_by(&kernel.current_thread())
    }

    fn held_by(&self, thread: &Arc<KThread>) -> bool {
        lock(&self.holder)
            .as_ref()
            .is_some_and(|holder| holder.id() == thread.id())
    }
}
