//! Synchronized FIFO: unbounded, any number of producers and consumers.
//! A consumer on an empty list blocks until something arrives. Mostly an
//! integration exercise for `Lock` + `Condition`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use super::{Condition, Lock, SemaphoresCondition};
use crate::kernel::{Kernel, lock};

pub struct SynchList<T> {
    items: Mutex<VecDeque<T>>,
    list_lock: Arc<Lock>,
    non_empty: SemaphoresCondition,
}

impl<T: Send> SynchList<T> {
    pub fn new(kernel: &Kernel) -> Self {
        let list_lock = Arc::new(Lock::new(kernel));
        Self {
            items: Mutex::new(VecDeque::new()),
            non_empty: SemaphoresCondition::new(Arc::clone(&list_lock)),
            list_lock,
        }
    }

    /// Append `item` and wake one blocked consumer, if any.
    pub fn push(&self, kernel: &Kernel, item: T) {
        self.list_lock.acquire(kernel);
        lock(&self.items).push_back(item);
        self.non_empty.wake(kernel);
        self.list_lock.release(kernel);
    }

    /// Remove and return the head, blocking while the list is empty.
    pub fn pop(&self, kernel: &Kernel) -> T {
        self.list_lock.acquire(kernel);
        loop {
            let head = lock(&self.items).pop_front();
            if let Some(item) = head {
                self.list_lock.release(kernel);
                return item;
            }
            self.non_empty.sleep(kernel);
        }
    }
}
