//! Rendezvous channel: `speak` and `listen` meet one-to-one through a
//! single word-sized slot. A speaker waits while an unheard word is
//! pending; a listener waits while none is; each side wakes the other.

use std::sync::{Arc, Mutex};

use log::trace;

use super::{Condition, Lock, SemaphoresCondition};
use crate::kernel::{Kernel, lock};

pub struct Communicator {
    pair_lock: Arc<Lock>,
    speakers: SemaphoresCondition,
    listeners: SemaphoresCondition,
    slot: Mutex<Option<i64>>,
}

impl Communicator {
    pub fn new(kernel: &Kernel) -> Self {
        let pair_lock = Arc::new(Lock::new(kernel));
        Self {
            speakers: SemaphoresCondition::new(Arc::clone(&pair_lock)),
            listeners: SemaphoresCondition::new(Arc::clone(&pair_lock)),
            pair_lock,
            slot: Mutex::new(None),
        }
    }

    /// Deposit `word` for exactly one listener. Blocks while an earlier
    /// word is still unheard.
    pub fn speak(&self, kernel: &Kernel, word: i64) {
        self.pair_lock.acquire(kernel);
        while lock(&self.slot).is_some() {
            self.speakers.sleep(kernel);
        }
        trace!("{} speaks {word}", kernel.current_thread());
        *lock(&self.slot) = Some(word);
        self.listeners.wake(kernel);
        self.pair_lock.release(kernel);
    }

    /// Take the pending word, blocking until a speaker provides one.
    pub fn listen(&self, kernel: &Kernel) -> i64 {
        self.pair_lock.acquire(kernel);
        loop {
            let taken = lock(&self.slot).take();
            if let Some(word) = taken {
                trace!("{} hears {word}", kernel.current_thread());
                self.speakers.wake(kernel);
                self.pair_lock.release(kernel);
                return word;
            }
            self.listeners.sleep(kernel);
        }
    }
}
