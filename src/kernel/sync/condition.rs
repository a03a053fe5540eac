//! Condition variables, Mesa style: `wake` makes a waiter runnable, it
//! does not run it, so woken threads recheck their predicate in a loop.
//!
//! Two interchangeable implementations satisfy the one contract. One
//! parks waiters directly with interrupts disabled; the other gives each
//! waiter a private single-use semaphore. Both pair with an external
//! `Lock` that must be held across every operation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use log::trace;

use super::{Lock, Semaphore};
use crate::kernel::{KThread, Kernel, lock};

pub trait Condition: Send + Sync {
    /// Atomically release the paired lock and block until woken, then
    /// reacquire the lock before returning.
    fn sleep(&self, kernel: &Kernel);

    /// Make at most one waiter runnable.
    fn wake(&self, kernel: &Kernel);

    /// Make every current waiter runnable.
    fn wake_all(&self, kernel: &Kernel);
}

/// Condition variable built on interrupt disabling: waiters sleep on a
/// plain FIFO of threads.
pub struct InterruptsCondition {
    cond_lock: Arc<Lock>,
    waiters: Mutex<VecDeque<Arc<KThread>>>,
}

impl InterruptsCondition {
    pub fn new(cond_lock: Arc<Lock>) -> Self {
        Self {
            cond_lock,
            waiters: Mutex::new(VecDeque::new()),
        }
    }
}

impl Condition for InterruptsCondition {
    fn sleep(&self, kernel: &Kernel) {
        assert!(
            self.cond_lock.is_held_by_current_thread(kernel),
            "condition used without its lock"
        );
        trace!("{} sleeping on condition", kernel.current_thread());

        let previous = kernel.interrupt().disable();
        self.cond_lock.release(kernel);
        lock(&self.waiters).push_back(kernel.current_thread());
        kernel.sleep_current();
        kernel.interrupt().restore(previous);

        self.cond_lock.acquire(kernel);
    }

    fn wake(&self, kernel: &Kernel) {
        assert!(
            self.cond_lock.is_held_by_current_thread(kernel),
            "condition used without its lock"
        );
        let previous = kernel.interrupt().disable();
        let waiter = lock(&self.waiters).pop_front();
        if let Some(waiter) = waiter {
            trace!("condition waking {waiter}");
            waiter.ready(kernel);
        }
        kernel.interrupt().restore(previous);
    }

    fn wake_all(&self, kernel: &Kernel) {
        assert!(
            self.cond_lock.is_held_by_current_thread(kernel),
            "condition used without its lock"
        );
        while !lock(&self.waiters).is_empty() {
            self.wake(kernel);
        }
    }
}

/// Condition variable built on semaphores: every waiter gets its own
/// `Semaphore(0)` and blocks on `p()`; a wake is a `v()` on the oldest
/// one. No interrupt fiddling of its own beyond what the semaphore does.
pub struct SemaphoresCondition {
    cond_lock: Arc<Lock>,
    waiters: Mutex<VecDeque<Arc<Semaphore>>>,
}

impl SemaphoresCondition {
    pub fn new(cond_lock: Arc<Lock>) -> Self {
        Self {
            cond_lock,
            waiters: Mutex::new(VecDeque::new()),
        }
    }
}

impl Condition for SemaphoresCondition {
    fn sleep(&self, kernel: &Kernel) {
        assert!(
            self.cond_lock.is_held_by_current_thread(kernel),
            "condition used without its lock"
        );
        trace!("{} sleeping on condition", kernel.current_thread());

        let waiter = Arc::new(Semaphore::new(kernel, 0));
        lock(&self.waiters).push_back(Arc::clone(&waiter));
        self.cond_lock.release(kernel);
        waiter.p(kernel);
        self.cond_lock.acquire(kernel);
    }

    fn wake(&self, kernel: &Kernel) {
        assert!(
            self.cond_lock.is_held_by_current_thread(kernel),
            "condition used without its lock"
        );
        let waiter = lock(&self.waiters).pop_front();
        if let Some(waiter) = waiter {
            waiter.v(kernel);
        }
    }

    fn wake_all(&self, kernel: &Kernel) {
        assert!(
            self.cond_lock.is_held_by_current_thread(kernel),
            "condition used without its lock"
        );
        while !lock(&self.waiters).is_empty() {
            self.wake(kernel);
        }
    }
}
