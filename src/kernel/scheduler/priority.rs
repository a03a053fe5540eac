//! Strict priority scheduling with priority donation.
//!
//! A thread's *effective* priority is its own plus donations from
//! threads waiting on transfer-enabled queues it holds, applied
//! transitively: if A waits on a lock held by B while B waits on a lock
//! held by C, A's priority reaches C. Donation is what stops priority
//! inversion from starving a low-priority lock holder.
//!
//! Effective values are cached per thread behind a dirty flag. Any
//! priority change or queue membership change dirties the threads whose
//! cached value could have moved, walking up the chain of transfer
//! queues each affected holder is itself waiting on. Both the walk and
//! the recomputation carry a visited-queue set, so cyclic wait graphs
//! (actual deadlocks) terminate instead of recursing forever.
//!
//! Ties at equal effective priority go to the earliest enqueue stamp;
//! stamps come from one per-scheduler counter, so the ready queue is
//! FIFO among equals.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, Weak};

use super::{Scheduler, SchedulingState, ThreadQueue};
use crate::kernel::{KThread, Kernel, lock};

/// How donated priority combines with the holder's own.
pub(crate) enum Policy {
    /// Take the maximum: classic priority donation.
    Priority,
    /// Take the sum: lottery tickets pool.
    Lottery,
}

/// Per-thread bookkeeping for both donation policies.
pub(crate) struct PriorityState {
    /// The thread's own priority (ticket count under lottery).
    priority: u64,
    /// Cached effective priority; meaningful only while `dirty` is
    /// false.
    effective: u64,
    dirty: bool,
    /// Stamp of the most recent enqueue, for FIFO tie-breaking.
    enqueued_at: u64,
    /// Queues this thread is currently waiting on.
    waiting_on: Vec<Weak<PolicyQueue>>,
    /// Transfer-enabled queues donate to their holder through this list.
    held: Vec<Arc<PolicyQueue>>,
}

impl PriorityState {
    fn new(priority: u64) -> Self {
        Self {
            priority,
            effective: priority,
            dirty: false,
            enqueued_at: 0,
            waiting_on: Vec::new(),
            held: Vec::new(),
        }
    }
}

/// State shared by a scheduler and every queue it has minted.
pub(crate) struct PolicyCore {
    policy: Policy,
    default_priority: u64,
    minimum_priority: u64,
    maximum_priority: u64,
    enqueue_clock: AtomicU64,
    queue_ids: AtomicU64,
}

impl PolicyCore {
    pub(crate) fn new(
        policy: Policy,
        default_priority: u64,
        minimum_priority: u64,
        maximum_priority: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            policy,
            default_priority,
            minimum_priority,
            maximum_priority,
            enqueue_clock: AtomicU64::new(0),
            queue_ids: AtomicU64::new(0),
        })
    }

    pub(crate) fn new_queue(self: &Arc<Self>, transfer_priority: bool) -> Arc<PolicyQueue> {
        let id = self.queue_ids.fetch_add(1, Ordering::Relaxed);
        Arc::new_cyclic(|me| PolicyQueue {
            id,
            transfer_priority,
            core: Arc::clone(self),
            me: me.clone(),
            inner: Mutex::new(QueueInner {
                waiters: Vec::new(),
                holder: None,
            }),
        })
    }

    pub(crate) fn priority(&self, kernel: &Kernel, thread: &Arc<KThread>) -> u64 {
        assert!(kernel.machine().interrupt.disabled());
        with_state(self, thread, |state| state.priority)
    }

    pub(crate) fn set_priority(&self, kernel: &Kernel, thread: &Arc<KThread>, priority: u64) {
        assert!(kernel.machine().interrupt.disabled());
        assert!(
            (self.minimum_priority..=self.maximum_priority).contains(&priority),
            "priority out of range"
        );
        let changed = with_state(self, thread, |state| {
            if state.priority == priority {
                false
            } else {
                state.priority = priority;
                true
            }
        });
        if changed {
            // What this thread donates changed too, so the whole chain
            // above it goes stale.
            invalidate_chain(self, thread, &mut Vec::new());
        }
    }

    pub(crate) fn effective_priority(&self, kernel: &Kernel, thread: &Arc<KThread>) -> u64 {
        assert!(kernel.machine().interrupt.disabled());
        effective(self, thread, &mut Vec::new())
    }

    pub(crate) fn increase_priority(&self, kernel: &Kernel) -> bool {
        let previous = kernel.interrupt().disable();
        let current = kernel.current_thread();
        let priority = with_state(self, &current, |state| state.priority);
        let can = priority < self.maximum_priority;
        if can {
            self.set_priority(kernel, &current, priority + 1);
        }
        kernel.interrupt().restore(previous);
        can
    }

    pub(crate) fn decrease_priority(&self, kernel: &Kernel) -> bool {
        let previous = kernel.interrupt().disable();
        let current = kernel.current_thread();
        let priority = with_state(self, &current, |state| state.priority);
        let can = priority > self.minimum_priority;
        if can {
            self.set_priority(kernel, &current, priority - 1);
        }
        kernel.interrupt().restore(previous);
        can
    }

    pub(crate) fn default_priority(&self) -> u64 {
        self.default_priority
    }

    pub(crate) fn minimum_priority(&self) -> u64 {
        self.minimum_priority
    }

    pub(crate) fn maximum_priority(&self) -> u64 {
        self.maximum_priority
    }
}

struct QueueInner {
    waiters: Vec<Arc<KThread>>,
    /// Weak both ways between queues and threads on the ownership side,
    /// so a wait graph only cycles `Arc`s if the threads are genuinely
    /// deadlocked.
    holder: Option<Weak<KThread>>,
}

pub(crate) struct PolicyQueue {
    id: u64,
    transfer_priority: bool,
    core: Arc<PolicyCore>,
    me: Weak<PolicyQueue>,
    inner: Mutex<QueueInner>,
}

impl PolicyQueue {
    /// Membership or holdership changed: dirty every thread whose
    /// effective value may have moved.
    fn make_dirty(&self) {
        if !self.transfer_priority {
            return;
        }
        let (waiters, holder) = {
            let inner = lock(&self.inner);
            (inner.waiters.clone(), inner.holder.clone())
        };
        for waiter in &waiters {
            with_state(&self.core, waiter, |state| state.dirty = true);
        }
        if let Some(holder) = holder.and_then(|weak| weak.upgrade()) {
            invalidate_chain(&self.core, &holder, &mut vec![self.id]);
        }
    }

    /// Swap the holder. The outgoing holder loses this queue's donations
    /// and is invalidated up its own wait chain.
    fn set_holder(&self, thread: Option<&Arc<KThread>>) {
        let me = self.me.upgrade().expect("queue dropped while in use");
        let old = lock(&self.inner)
            .holder
            .take()
            .and_then(|weak| weak.upgrade());
        if let Some(old) = old {
            with_state(&self.core, &old, |state| {
                state.held.retain(|queue| queue.id != self.id);
            });
            invalidate_chain(&self.core, &old, &mut Vec::new());
        }
        if let Some(thread) = thread {
            lock(&self.inner).holder = Some(Arc::downgrade(thread));
            with_state(&self.core, thread, |state| state.held.push(Arc::clone(&me)));
        }
        self.make_dirty();
    }

    fn pick(&self, kernel: &Kernel) -> Option<Arc<KThread>> {
        let waiters = lock(&self.inner).waiters.clone();
        if waiters.is_empty() {
            return None;
        }
        match self.core.policy {
            Policy::Priority => {
                let mut best: Option<(Arc<KThread>, u64, u64)> = None;
                for waiter in waiters {
                    let donated = effective(&self.core, &waiter, &mut vec![self.id]);
                    let stamp = with_state(&self.core, &waiter, |state| state.enqueued_at);
                    let better = match &best {
                        None => true,
                        Some((leader, best_donated, best_stamp)) => {
                            donated > *best_donated
                                || (donated == *best_donated && stamp < *best_stamp)
                                || (donated == *best_donated
                                    && stamp == *best_stamp
                                    && waiter.id() < leader.id())
                        }
                    };
                    if better {
                        best = Some((waiter, donated, stamp));
                    }
                }
                best.map(|(winner, _, _)| winner)
            }
            Policy::Lottery => {
                let mut tallies = Vec::with_capacity(waiters.len());
                let mut total = 0u64;
                for waiter in waiters {
                    let tickets = effective(&self.core, &waiter, &mut vec![self.id]);
                    total += tickets;
                    tallies.push((waiter, tickets));
                }
                let mut draw = kernel.machine().random_below(total);
                for (waiter, tickets) in tallies {
                    if draw < tickets {
                        return Some(waiter);
                    }
                    draw -= tickets;
                }
                unreachable!("lottery draw past the ticket total")
            }
        }
    }
}

impl ThreadQueue for PolicyQueue {
    fn wait_for_access(&self, kernel: &Kernel, thread: &Arc<KThread>) {
        assert!(kernel.machine().interrupt.disabled());
        let me = self.me.upgrade().expect("queue dropped while in use");
        let stamp = self.core.enqueue_clock.fetch_add(1, Ordering::Relaxed);
        with_state(&self.core, thread, |state| {
            state.enqueued_at = stamp;
            state.waiting_on.retain(|queue| queue.upgrade().is_some());
            state.waiting_on.push(Arc::downgrade(&me));
        });
        lock(&self.inner).waiters.push(Arc::clone(thread));
        self.make_dirty();
    }

    fn acquire(&self, kernel: &Kernel, thread: &Arc<KThread>) {
        assert!(kernel.machine().interrupt.disabled());
        let empty = lock(&self.inner).waiters.is_empty();
        assert!(empty, "acquiring a queue with waiters");
        self.set_holder(Some(thread));
    }

    fn next_thread(&self, kernel: &Kernel) -> Option<Arc<KThread>> {
        assert!(kernel.machine().interrupt.disabled());
        match self.pick(kernel) {
            Some(winner) => {
                lock(&self.inner)
                    .waiters
                    .retain(|waiter| waiter.id() != winner.id());
                with_state(&self.core, &winner, |state| {
                    state.waiting_on.retain(|queue| {
                        queue.upgrade().is_some_and(|queue| queue.id != self.id)
                    });
                });
                self.set_holder(Some(&winner));
                Some(winner)
            }
            None => {
                // Nobody left to donate; drop the holder so it stops
                // collecting from an empty queue.
                self.set_holder(None);
                None
            }
        }
    }
}

/// Run `f` on the thread's policy state, installing a default-priority
/// state the first time the policy sees the thread. `f` must not touch
/// other threads' state: the slot lock is held across the call.
fn with_state<R>(
    core: &PolicyCore,
    thread: &Arc<KThread>,
    f: impl FnOnce(&mut PriorityState) -> R,
) -> R {
    let mut slot = lock(&thread.sched_state);
    if matches!(*slot, SchedulingState::Vacant) {
        *slot = SchedulingState::Priority(PriorityState::new(core.default_priority));
    }
    match &mut *slot {
        SchedulingState::Priority(state) => f(state),
        SchedulingState::Vacant => unreachable!(),
    }
}

/// Effective priority of `thread`, recomputing through held queues when
/// the cache is dirty. `visited` carries queue ids already being summed
/// higher up the recursion, which both breaks cycles and keeps a queue
/// from donating to itself through its own pick.
fn effective(core: &PolicyCore, thread: &Arc<KThread>, visited: &mut Vec<u64>) -> u64 {
    let (own, cached) = with_state(core, thread, |state| {
        (state.priority, (!state.dirty).then_some(state.effective))
    });
    if let Some(value) = cached {
        return value;
    }
    let held: Vec<Arc<PolicyQueue>> = with_state(core, thread, |state| state.held.clone());
    let mut value = own;
    for queue in held {
        if !queue.transfer_priority || visited.contains(&queue.id) {
            continue;
        }
        visited.push(queue.id);
        let waiters = lock(&queue.inner).waiters.clone();
        for waiter in waiters {
            let donated = effective(core, &waiter, visited);
            value = match core.policy {
                Policy::Priority => value.max(donated),
                Policy::Lottery => value + donated,
            };
        }
    }
    with_state(core, thread, |state| {
        state.effective = value;
        state.dirty = false;
    });
    value
}

/// Dirty `thread` and every holder reachable through the transfer
/// queues it waits on: their cached values all depend on what this
/// thread donates.
fn invalidate_chain(core: &PolicyCore, thread: &Arc<KThread>, visited: &mut Vec<u64>) {
    with_state(core, thread, |state| state.dirty = true);
    let waiting: Vec<Arc<PolicyQueue>> = with_state(core, thread, |state| {
        state.waiting_on.iter().filter_map(Weak::upgrade).collect()
    });
    for queue in waiting {
        if !queue.transfer_priority || visited.contains(&queue.id) {
            continue;
        }
        visited.push(queue.id);
        let holder = lock(&queue.inner)
            .holder
            .clone()
            .and_then(|weak| weak.upgrade());
        if let Some(holder) = holder {
            invalidate_chain(core, &holder, visited);
        }
    }
}

/// Priorities 0..=7, default 1; effective priority is the max over
/// donations.
pub struct PriorityScheduler {
    core: Arc<PolicyCore>,
}

impl PriorityScheduler {
    pub fn new() -> Self {
        Self {
            core: PolicyCore::new(Policy::Priority, 1, 0, 7),
        }
    }
}

impl Default for PriorityScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler for PriorityScheduler {
    fn new_thread_queue(&self, transfer_priority: bool) -> Arc<dyn ThreadQueue> {
        self.core.new_queue(transfer_priority)
    }

    fn priority(&self, kernel: &Kernel, thread: &Arc<KThread>) -> u64 {
        self.core.priority(kernel, thread)
    }

    fn set_priority(&self, kernel: &Kernel, thread: &Arc<KThread>, priority: u64) {
        self.core.set_priority(kernel, thread, priority);
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
