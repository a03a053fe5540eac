//! Kernel threads.
//!
//! A `KThread` is one logical thread multiplexed onto the simulated CPU.
//! Threads are cooperative: control moves at `yield_now`, `sleep_current`
//! and the blocking points of the synchronization primitives (plus timer
//! preemption, which itself yields). Every dispatch runs the
//! save-state / switch / restore-state protocol, and a finished thread
//! is destroyed by the *next* thread to run, never by itself.

use std::fmt;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex};

use log::{debug, trace};

use super::scheduler::SchedulingState;
use super::{Kernel, lock};
use crate::machine::context::ExecutionContext;

/// Life-cycle of a kernel thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// Created, not yet forked.
    New,
    /// Runnable, waiting on the ready queue.
    Ready,
    /// The one thread currently executing.
    Running,
    /// Asleep until some primitive wakes it.
    Blocked,
    /// Done; awaiting destruction by the next running thread.
    Finished,
}

pub struct KThread {
    id: u64,
    name: Mutex<String>,
    status: Mutex<Status>,
    target: Mutex<Option<Box<dyn FnOnce(&Arc<Kernel>) + Send>>>,
    context: Mutex<Option<Arc<ExecutionContext>>>,
    /// At most one thread may wait in `join`.
    joiner: Mutex<Option<Arc<KThread>>>,
    /// Slot for the active scheduler's per-thread bookkeeping.
    pub(crate) sched_state: Mutex<SchedulingState>,
}

impl KThread {
    /// Create a thread that will run `target` once forked.
    pub fn new<F>(kernel: &Kernel, target: F) -> Arc<Self>
    where
        F: FnOnce(&Arc<Kernel>) + Send + 'static,
    {
        Self::allocate(
            kernel,
            Some(Box::new(target)),
            Some(ExecutionContext::new()),
        )
    }

    fn allocate(
        kernel: &Kernel,
        target: Option<Box<dyn FnOnce(&Arc<Kernel>) + Send>>,
        context: Option<Arc<ExecutionContext>>,
    ) -> Arc<Self> {
        let id = kernel.threads.created.fetch_add(1, Ordering::Relaxed);
        Arc::new(Self {
            id,
            name: Mutex::new(format!("thread-{id}")),
            status: Mutex::new(Status::New),
            target: Mutex::new(target),
            context: Mutex::new(context),
            joiner: Mutex::new(None),
            sched_state: Mutex::new(SchedulingState::Vacant),
        })
    }

    pub fn id(&self) -> u64 {
        self.id
    }

    pub fn name(&self) -> String {
        lock(&self.name).clone()
    }

    pub fn set_name(&self, name: &str) {
        *lock(&self.name) = name.to_string();
    }

    pub fn status(&self) -> Status {
        *lock(&self.status)
    }

    /// Start the thread: give its execution context an OS thread and put
    /// it on the ready queue. Forking twice is fatal.
    pub fn fork(self: &Arc<Self>, kernel: &Arc<Kernel>) {
        assert_eq!(self.status(), Status::New, "thread forked twice");
        {
            let has_target = lock(&self.target).is_some();
            assert!(has_target, "thread has no target");
        }
        debug!("forking {self}");

        let previous = kernel.interrupt().disable();
        let context = lock(&self.context)
            .clone()
            .expect("new thread lost its context");
        let this = Arc::clone(self);
        let kernel_for_target = Arc::clone(kernel);
        context.start(
            kernel.machine(),
            Box::new(move || this.run_thread(&kernel_for_target)),
        );
        self.ready(kernel);
        kernel.interrupt().restore(previous);
    }

    /// Wait until this thread finishes. Immediate if it already has.
    /// Joining yourself, or a thread someone else is joining, is fatal.
    pub fn join(self: &Arc<Self>, kernel: &Kernel) {
        let current = kernel.current_thread();
        assert!(current.id != self.id, "a thread cannot join itself");
        debug!("{current} joining {self}");

        let previous = kernel.interrupt().disable();
        if self.status() == Status::Finished {
            kernel.interrupt().restore(previous);
            return;
        }
        {
            let mut joiner = lock(&self.joiner);
            if joiner.is_some() {
                drop(joiner);
                panic!("thread is already being joined");
            }
            *joiner = Some(current);
        }
        kernel.sleep_current();
        kernel.interrupt().restore(previous);
    }

    /// Mark runnable and enqueue, except for the idle thread, which is
    /// dispatched directly when the ready queue runs dry and never sits
    /// on any queue.
    pub(crate) fn ready(self: &Arc<Self>, kernel: &Kernel) {
        trace!("readying {self}");
        assert!(kernel.machine().interrupt.disabled());
        assert_ne!(self.status(), Status::Ready);

        *lock(&self.status) = Status::Ready;
        if !kernel.is_idle_thread(self) {
            kernel.threads.ready_queue.wait_for_access(kernel, self);
        }
    }

    /// Trampoline for forked threads: finish the dispatch protocol, run
    /// the target, and finish. Never returns.
    fn run_thread(self: &Arc<Self>, kernel: &Arc<Kernel>) {
        self.begin(kernel);
        let target = lock(&self.target).take().expect("thread has no target");
        target(kernel);
        kernel.finish_current();
    }

    fn begin(self: &Arc<Self>, kernel: &Kernel) {
        trace!("beginning {self}");
        assert_eq!(kernel.current_thread().id, self.id);
        self.restore_state(kernel);
        kernel.machine().interrupt.enable(kernel);
    }

    /// Dispatch this thread: it becomes current and its context gets the
    /// CPU. When the call returns, the *calling* thread has been
    /// re-dispatched by someone else.
    pub(crate) fn dispatch(self: &Arc<Self>, kernel: &Kernel) {
        assert!(kernel.machine().interrupt.disabled());
        let previous = kernel.current_thread();
        previous.save_state(kernel);
        trace!("switching from {previous} to {self}");

        *lock(&kernel.threads.current) = Some(Arc::clone(self));
        let context = lock(&self.context)
            .clone()
            .expect("dispatching a thread without a context");
        context.context_switch(kernel.machine());

        // Back on the original thread's stack: whoever dispatched us has
        // already made us current again.
        kernel.current_thread().restore_state(kernel);
    }

    /// First thing a thread does when it gets the CPU: become Running
    /// and bury whichever thread finished while we were off it.
    pub(crate) fn restore_state(self: &Arc<Self>, kernel: &Kernel) {
        assert!(kernel.machine().interrupt.disabled());
        assert_eq!(kernel.current_thread().id, self.id);
        trace!("running {self}");

        *lock(&self.status) = Status::Running;
        let doomed = lock(&kernel.threads.to_be_destroyed).take();
        if let Some(doomed) = doomed {
            debug!("destroying {doomed}");
            let context = lock(&doomed.context)
                .take()
                .expect("finished thread has no context");
            context.destroy(kernel.machine());
        }
    }

    fn save_state(self: &Arc<Self>, kernel: &Kernel) {
        assert!(kernel.machine().interrupt.disabled());
        assert_eq!(kernel.current_thread().id, self.id);
    }
}

impl fmt::Display for KThread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (#{})", lock(&self.name), self.id)
    }
}

impl Kernel {
    pub fn current_thread(&self) -> Arc<KThread> {
        lock(&self.threads.current)
            .clone()
            .expect("no current thread")
    }

    /// Give up the CPU to the next ready thread (possibly ourselves).
    pub fn yield_now(&self) {
        let current = self.current_thread();
        trace!("yielding {current}");
        assert_eq!(current.status(), Status::Running);

        let previous = self.interrupt().disable();
        current.ready(self);
        self.run_next_thread();
        self.interrupt().restore(previous);
    }

    /// Relinquish the CPU until some primitive readies us again. The
    /// caller must hold interrupts disabled; waking is someone else's
    /// responsibility, so the wake source must be latched first.
    pub fn sleep_current(&self) {
        let current = self.current_thread();
        trace!("sleeping {current}");
        assert!(
            self.machine().interrupt.disabled(),
            "sleeping with interrupts enabled"
        );
        {
            let mut status = lock(&current.status);
            if *status != Status::Finished {
                *status = Status::Blocked;
            }
        }
        self.run_next_thread();
    }

    /// End the current thread. Wakes the joiner, authorizes destruction,
    /// and hands off the CPU for good: the next thread to run performs
    /// the actual burial. Never returns.
    pub fn finish_current(&self) {
        let current = self.current_thread();
        debug!("finishing {current}");
        self.interrupt().disable();

        if let Some(joiner) = lock(&current.joiner).take() {
            joiner.ready(self);
        }

        let context = lock(&current.context)
            .clone()
            .expect("finishing thread has no context");
        self.machine().contexts.authorize_destroy(&context);
        {
            let mut doomed = lock(&self.threads.to_be_destroyed);
            if doomed.is_some() {
                drop(doomed);
                panic!("a finished thread is already pending destruction");
            }
            *doomed = Some(Arc::clone(&current));
        }

        *lock(&current.status) = Status::Finished;
        self.sleep_current();
        unreachable!("finished thread resumed");
    }

    fn run_next_thread(&self) {
        let next = self
            .threads
            .ready_queue
            .next_thread(self)
            .unwrap_or_else(|| self.idle_thread());
        next.dispatch(self);
    }

    fn idle_thread(&self) -> Arc<KThread> {
        lock(&self.threads.idle).clone().expect("no idle thread")
    }

    pub(crate) fn is_idle_thread(&self, thread: &Arc<KThread>) -> bool {
        lock(&self.threads.idle)
            .as_ref()
            .is_some_and(|idle| idle.id == thread.id)
    }
}

/// Bring the thread system up: wrap the boot context in the main thread,
/// hand it the ready queue, and fork the idle thread. Interrupts are
/// still disabled throughout.
pub(crate) fn boot(kernel: &Arc<Kernel>, main_context: Arc<ExecutionContext>) {
    let main = KThread::allocate(kernel, None, Some(main_context));
    main.set_name("main");
    kernel.threads.ready_queue.acquire(kernel, &main);
    *lock(&kernel.threads.current) = Some(Arc::clone(&main));
    main.restore_state(kernel);

    let idle = KThread::new(kernel, |k: &Arc<Kernel>| {
        loop {
            k.yield_now();
        }
    });
    idle.set_name("idle");
    *lock(&kernel.threads.idle) = Some(Arc::clone(&idle));
    idle.fork(kernel);
}
