//! Semaphores, locks, both condition-variable implementations, and the
//! communicator rendezvous.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{Outcome, run_with_timeout};
use minos::{
    Condition, InterruptsCondition, KThread, Kernel, Lock, MachineConfig, Semaphore,
    SemaphoresCondition, Status,
};

fn quiet_config() -> MachineConfig {
    MachineConfig::new().with_timer_interrupts(false)
}

// ===========================================================================
// Semaphore
// ===========================================================================

#[test]
fn semaphore_permit_is_consumed_without_blocking() {
    Kernel::run(quiet_config(), |kernel| {
        let sem = Semaphore::new(kernel, 0);
        sem.v(kernel);
        sem.p(kernel);
    });
}

#[test]
fn semaphore_blocks_until_released() {
    Kernel::run(quiet_config(), |kernel| {
        let sem = Arc::new(Semaphore::new(kernel, 0));
        let through = Arc::new(Mutex::new(false));

        let waiter_sem = Arc::clone(&sem);
        let waiter_through = Arc::clone(&through);
        let waiter = KThread::new(kernel, move |k: &Arc<Kernel>| {
            waiter_sem.p(k);
            *waiter_through.lock().unwrap() = true;
        });
        waiter.fork(kernel);

        kernel.yield_now();
        assert_eq!(waiter.status(), Status::Blocked);
        assert!(!*through.lock().unwrap());

        sem.v(kernel);
        waiter.join(kernel);
        assert!(*through.lock().unwrap());
    });
}

#[test]
fn semaphore_paces_a_producer_consumer_pair() {
    let outcome = run_with_timeout(MachineConfig::new(), Duration::from_secs(20), |kernel| {
        let items = Arc::new(Semaphore::new(kernel, 0));
        let consumed = Arc::new(Mutex::new(0u32));

        let consumer_items = Arc::clone(&items);
        let consumer_count = Arc::clone(&consumed);
        let consumer = KThread::new(kernel, move |k: &Arc<Kernel>| {
            for _ in 0..10 {
                consumer_items.p(k);
                *consumer_count.lock().unwrap() += 1;
            }
        });
        let producer_items = Arc::clone(&items);
        let producer = KThread::new(kernel, move |k: &Arc<Kernel>| {
            for _ in 0..10 {
                producer_items.v(k);
                k.yield_now();
            }
        });
        consumer.fork(kernel);
        producer.fork(kernel);
        consumer.join(kernel);
        producer.join(kernel);
        assert_eq!(*consumed.lock().unwrap(), 10);
    });
    assert_eq!(outcome, Outcome::Completed);
}

// ===========================================================================
// Lock
// ===========================================================================

#[test]
#[should_panic(expected = "acquired reentrantly")]
fn reentrant_lock_acquire_is_fatal() {
    Kernel::run(quiet_config(), |kernel| {
        let lock = Lock::new(kernel);
        lock.acquire(kernel);
        lock.acquire(kernel);
    });
}

#[test]
#[should_panic(expected = "does not hold it")]
fn releasing_an_unheld_lock_is_fatal() {
    Kernel::run(quiet_config(), |kernel| {
        let lock = Lock::new(kernel);
        lock.release(kernel);
    });
}

#[test]
fn contended_lock_passes_between_threads() {
    let outcome = run_with_timeout(MachineConfig::new(), Duration::from_secs(20), |kernel| {
        let lock = Arc::new(Lock::new(kernel));
        let tally = Arc::new(Mutex::new(0u32));
        let mut threads = Vec::new();
        for _ in 0..8 {
            let lock = Arc::clone(&lock);
            let tally = Arc::clone(&tally);
            let t = KThread::new(kernel, move |k: &Arc<Kernel>| {
                for _ in 0..10 {
                    lock.acquire(k);
                    assert!(lock.is_held_by_current_thread(k));
                    *tally.lock().unwrap() += 1;
                    k.yield_now();
                    lock.release(k);
                }
            });
            t.fork(kernel);
            threads.push(t);
        }
        for t in &threads {
            t.join(kernel);
        }
        assert_eq!(*tally.lock().unwrap(), 80);
    });
    assert_eq!(outcome, Outcome::Completed);
}

// ===========================================================================
// Condition variables - one contract, two implementations
// ===========================================================================

fn wake_all_wakes_every_waiter(make: fn(Arc<Lock>) -> Arc<dyn Condition>) {
    Kernel::run(quiet_config(), |kernel| {
        const WAITERS: usize = 5;
        let lock = Arc::new(Lock::new(kernel));
        let condition = make(Arc::clone(&lock));
        let counter = Arc::new(Mutex::new(0usize));

        let mut threads = Vec::new();
        for _ in 0..WAITERS {
            let lock = Arc::clone(&lock);
            let condition = Arc::clone(&condition);
            let counter = Arc::clone(&counter);
            let t = KThread::new(kernel, move |k: &Arc<Kernel>| {
                lock.acquire(k);
                *counter.lock().unwrap() += 1;
                condition.sleep(k);
                *counter.lock().unwrap() += 1;
                lock.release(k);
            });
            t.fork(kernel);
            threads.push(t);
        }

        while *counter.lock().unwrap() < WAITERS
            || threads.iter().any(|t| t.status() != Status::Blocked)
        {
            kernel.yield_now();
        }
        assert_eq!(*counter.lock().unwrap(), WAITERS);

        lock.acquire(kernel);
        condition.wake_all(kernel);
        lock.release(kernel);

        for t in &threads {
            t.join(kernel);
        }
        assert_eq!(*counter.lock().unwrap(), 2 * WAITERS);
    });
}

fn wake_wakes_at_most_one(make: fn(Arc<Lock>) -> Arc<dyn Condition>) {
    Kernel::run(quiet_config(), |kernel| {
        const WAITERS: usize = 4;
        let lock = Arc::new(Lock::new(kernel));
        let condition = make(Arc::clone(&lock));
        let woken = Arc::new(Mutex::new(0usize));

        let mut threads = Vec::new();
        for _ in 0..WAITERS {
            let lock = Arc::clone(&lock);
            let condition = Arc::clone(&condition);
            let woken = Arc::clone(&woken);
            let t = KThread::new(kernel, move |k: &Arc<Kernel>| {
                lock.acquire(k);
                condition.sleep(k);
                *woken.lock().unwrap() += 1;
                lock.release(k);
            });
            t.fork(kernel);
            threads.push(t);
        }

        while threads.iter().any(|t| t.status() != Status::Blocked) {
            kernel.yield_now();
        }

        lock.acquire(kernel);
        condition.wake(kernel);
        lock.release(kernel);
        while threads.iter().filter(|t| t.status() == Status::Finished).count() < 1 {
            kernel.yield_now();
        }
        assert_eq!(*woken.lock().unwrap(), 1);
        assert_eq!(
            threads.iter().filter(|t| t.status() == Status::Blocked).count(),
            WAITERS - 1
        );

        lock.acquire(kernel);
        condition.wake_all(kernel);
        lock.release(kernel);
        for t in &threads {
            t.join(kernel);
        }
        assert_eq!(*woken.lock().unwrap(), WAITERS);
    });
}

#[test]
fn interrupts_condition_wake_all_wakes_every_waiter() {
    wake_all_wakes_every_waiter(|lock| Arc::new(InterruptsCondition::new(lock)));
}

#[test]
fn semaphores_condition_wake_all_wakes_every_waiter() {
    wake_all_wakes_every_waiter(|lock| Arc::new(SemaphoresCondition::new(lock)));
}

#[test]
fn interrupts_condition_wake_wakes_at_most_one() {
    wake_wakes_at_most_one(|lock| Arc::new(InterruptsCondition::new(lock)));
}

#[test]
fn semaphores_condition_wake_wakes_at_most_one() {
    wake_wakes_at_most_one(|lock| Arc::new(SemaphoresCondition::new(lock)));
}

#[test]
#[should_panic(expected = "condition used without its lock")]
fn condition_sleep_requires_the_lock() {
    Kernel::run(quiet_config(), |kernel| {
        let lock = Arc::new(Lock::new(kernel));
        let condition = InterruptsCondition::new(lock);
        condition.sleep(kernel);
    });
}

// ===========================================================================
// Communicator
// ===========================================================================

#[test]
fn communicator_delivers_words_in_order_one_to_one() {
    Kernel::run(quiet_config(), |kernel| {
        let channel = Arc::new(minos::Communicator::new(kernel));
        let heard = Arc::new(Mutex::new(Vec::new()));

        let speaker_channel = Arc::clone(&channel);
        let speaker = KThread::new(kernel, move |k: &Arc<Kernel>| {
            for word in 1..=5 {
                speaker_channel.speak(k, word);
            }
        });
        let listener_channel = Arc::clone(&channel);
        let listener_heard = Arc::clone(&heard);
        let listener = KThread::new(kernel, move |k: &Arc<Kernel>| {
            for _ in 0..5 {
                listener_heard.lock().unwrap().push(listener_channel.listen(k));
            }
        });
        speaker.fork(kernel);
        listener.fork(kernel);
        speaker.join(kernel);
        listener.join(kernel);
        assert_eq!(*heard.lock().unwrap(), vec![1, 2, 3, 4, 5]);
    });
}

#[test]
fn second_speaker_blocks_while_a_word_is_pending() {
    Kernel::run(quiet_config(), |kernel| {
        let channel = Arc::new(minos::Communicator::new(kernel));

        let first_channel = Arc::clone(&channel);
        let first = KThread::new(kernel, move |k: &Arc<Kernel>| first_channel.speak(k, 1));
        let second_channel = Arc::clone(&channel);
        let second = KThread::new(kernel, move |k: &Arc<Kernel>| second_channel.speak(k, 2));

        first.fork(kernel);
        second.fork(kernel);
        kernel.yield_now();
        // The first word is deposited and unheard; its speaker is done,
        // the second speaker is stuck.
        assert_eq!(first.status(), Status::Finished);
        assert_eq!(second.status(), Status::Blocked);

        assert_eq!(channel.listen(kernel), 1);
        assert_eq!(channel.listen(kernel), 2);
        second.join(kernel);
    });
}

#[test]
fn every_spoken_word_is_heard_exactly_once() {
    let outcome = run_with_timeout(MachineConfig::new(), Duration::from_secs(30), |kernel| {
        const SPEAKERS: i64 = 5;
        const WORDS_EACH: i64 = 4;
        let channel = Arc::new(minos::Communicator::new(kernel));
        let heard = Arc::new(Mutex::new(Vec::new()));

        let mut threads = Vec::new();
        for s in 0..SPEAKERS {
            let channel = Arc::clone(&channel);
            let t = KThread::new(kernel, move |k: &Arc<Kernel>| {
                for w in 0..WORDS_EACH {
                    channel.speak(k, s * WORDS_EACH + w);
                }
            });
            t.fork(kernel);
            threads.push(t);
        }
        for _ in 0..SPEAKERS {
            let channel = Arc::clone(&channel);
            let heard = Arc::clone(&heard);
            let t = KThread::new(kernel, move |k: &Arc<Kernel>| {
                for _ in 0..WORDS_EACH {
                    let word = channel.listen(k);
                    heard.lock().unwrap().push(word);
                }
            });
            t.fork(kernel);
            threads.push(t);
        }
        for t in &threads {
            t.join(kernel);
        }

        let mut heard = heard.lock().unwrap().clone();
        heard.sort_unstable();
        let expected: Vec<i64> = (0..SPEAKERS * WORDS_EACH).collect();
        assert_eq!(heard, expected);
    });
    assert_eq!(outcome, Outcome::Completed);
}
