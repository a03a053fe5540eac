//! Execution-context engine.
//!
//! Every logical kernel thread is backed by a real OS thread parked on a
//! per-context monitor. A single running token is handed from context to
//! context, so exactly one OS thread executes simulated code at any
//! moment; the rest sit in a condvar wait. The very first context adopts
//! the OS thread that booted the machine.
//!
//! Contexts leave their stacks by unwinding: `resume_unwind` with a
//! private marker payload, caught at the context root. One marker means
//! the thread-finish protocol destroyed the context, the other that the
//! whole machine is exiting.

use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

use log::{debug, trace};
use slab::Slab;

use super::{Machine, lock};

/// Maximum number of live execution contexts per machine.
pub const MAX_CONTEXTS: usize = 250;

/// Unwind payload: this context was destroyed by the finish protocol.
struct ContextFinished;

/// Unwind payload: the machine is exiting; leave the stack quietly.
pub(crate) struct MachineExit;

/// Unwind the calling context out of the simulation.
pub(crate) fn unwind_exit() -> ! {
    panic::resume_unwind(Box::new(MachineExit))
}

struct ContextState {
    started: bool,
    /// The running token. True on exactly one context at a time, except
    /// transiently during a hand-off.
    running: bool,
    /// Set by `destroy`; the woken context unwinds instead of resuming.
    done: bool,
    /// Set at machine teardown; the woken context unwinds and exits.
    exiting: bool,
}

pub(crate) struct ExecutionContext {
    monitor: Mutex<ContextState>,
    signal: Condvar,
    slot: Mutex<Option<usize>>,
    os_thread: Mutex<Option<JoinHandle<()>>>,
}

struct EngineState {
    live: Slab<Arc<ExecutionContext>>,
    current: Option<Arc<ExecutionContext>>,
    main: Option<Arc<ExecutionContext>>,
    /// Context the finish protocol has cleared for destruction.
    authorized: Option<Arc<ExecutionContext>>,
}

pub(crate) struct ContextEngine {
    state: Mutex<EngineState>,
}

impl ContextEngine {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(EngineState {
                live: Slab::new(),
                current: None,
                main: None,
                authorized: None,
            }),
        }
    }

    /// The context holding the running token.
    pub(crate) fn current(&self) -> Arc<ExecutionContext> {
        lock(&self.state).current.clone().expect("no running context")
    }

    /// Clear `context` for destruction. At most one context may be
    /// pending destruction at a time.
    pub(crate) fn authorize_destroy(&self, context: &Arc<ExecutionContext>) {
        let mut engine = lock(&self.state);
        if engine.authorized.is_some() {
            drop(engine);
            panic!("a context is already pending destruction");
        }
        engine.authorized = Some(context.clone());
    }

    /// Wake the main context with an exit mark, unless it is the one
    /// currently running. Used when a forked context halts the machine:
    /// main is parked somewhere and must unwind out of the boot body.
    fn signal_exit_to_main(&self) {
        let (main, current) = {
            let engine = lock(&self.state);
            (engine.main.clone(), engine.current.clone())
        };
        if let Some(main) = main {
            let main_is_running = current.is_some_and(|c| Arc::ptr_eq(&c, &main));
            if !main_is_running {
                let mut state = lock(&main.monitor);
                state.exiting = true;
                state.running = true;
                main.signal.notify_one();
            }
        }
    }

    /// Unwind and join every surviving context except main (which is the
    /// caller). Leaves the engine empty.
    pub(crate) fn teardown(&self, machine: &Arc<Machine>) {
        loop {
            let victim = {
                let engine = lock(&self.state);
                let main = engine.main.clone();
                engine
                    .live
                    .iter()
                    .map(|(_, c)| c.clone())
                    .find(|c| main.as_ref().is_none_or(|m| !Arc::ptr_eq(c, m)))
            };
            let Some(victim) = victim else { break };
            {
                let mut state = lock(&victim.monitor);
                state.exiting = true;
                state.running = true;
                victim.signal.notify_one();
            }
            match lock(&victim.os_thread).take() {
                Some(handle) => {
                    let _ = handle.join();
                }
                None => victim.remove(machine),
            }
        }
        let mut engine = lock(&self.state);
        engine.live.clear();
        engine.current = None;
        engine.main = None;
        engine.authorized = None;
    }
}

impl ExecutionContext {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            monitor: Mutex::new(ContextState {
                started: false,
                running: false,
                done: false,
                exiting: false,
            }),
            signal: Condvar::new(),
            slot: Mutex::new(None),
            os_thread: Mutex::new(None),
        })
    }

    /// Bind the calling OS thread as the machine's first context. It
    /// holds the running token immediately; no thread is spawned.
    pub(crate) fn start_first(self: &Arc<Self>, machine: &Arc<Machine>) {
        let slot = {
            let mut engine = lock(&machine.contexts.state);
            assert!(engine.current.is_none(), "machine already has a first context");
            let slot = engine.live.insert(self.clone());
            engine.current = Some(self.clone());
            engine.main = Some(self.clone());
            slot
        };
        *lock(&self.slot) = Some(slot);
        let mut state = lock(&self.monitor);
        state.started = true;
        state.running = true;
    }

    /// Spawn an OS thread for this context. The new thread parks itself
    /// before `target` runs; the caller resumes once that park is
    /// confirmed, so the single-runner invariant holds throughout.
    pub(crate) fn start(self: &Arc<Self>, machine: &Arc<Machine>, target: Box<dyn FnOnce() + Send>) {
        {
            let state = lock(&self.monitor);
            let started = state.started;
            drop(state);
            assert!(!started, "execution context started twice");
        }
        let live = lock(&machine.contexts.state).live.len();
        assert!(live < MAX_CONTEXTS, "too many live execution contexts");

        let slot = lock(&machine.contexts.state).live.insert(self.clone());
        *lock(&self.slot) = Some(slot);
        lock(&self.monitor).started = true;

        let starter = machine.contexts.current();
        lock(&starter.monitor).running = false;

        let context = self.clone();
        let machine = Arc::clone(machine);
        let handle = std::thread::Builder::new()
            .name(format!("context-{slot}"))
            .spawn(move || context.thread_root(&machine, target))
            .expect("failed to spawn context thread");
        *lock(&self.os_thread) = Some(handle);

        starter.wait_for_signal();
    }

    /// Hand the running token from the current context to this one.
    /// Switching to the running context returns immediately.
    pub(crate) fn context_switch(self: &Arc<Self>, machine: &Arc<Machine>) {
        let previous = machine.contexts.current();
        if Arc::ptr_eq(self, &previous) {
            return;
        }
        // Latch the outgoing context before waking the incoming one; the
        // moment the wake lands, the other side may run.
        lock(&previous.monitor).running = false;
        self.wake();
        previous.park(machine);
    }

    /// Tear down a context that has stopped running and been authorized
    /// by the finish protocol. The doomed context wakes, unwinds off its
    /// own stack, acknowledges, and exits; its OS thread is joined here.
    pub(crate) fn destroy(self: &Arc<Self>, machine: &Arc<Machine>) {
        let current = machine.contexts.current();
        assert!(
            !Arc::ptr_eq(self, &current),
            "cannot destroy the running context"
        );
        {
            let state = lock(&self.monitor);
            let destroyable = state.started && !state.done;
            drop(state);
            assert!(destroyable, "context is not destroyable");
        }
        {
            let authorized = lock(&machine.contexts.state).authorized.take();
            assert!(
                authorized.is_some_and(|a| Arc::ptr_eq(&a, self)),
                "context was not authorized for destruction"
            );
        }
        debug!("destroying context {:?}", *lock(&self.slot));

        lock(&current.monitor).running = false;
        {
            let mut state = lock(&self.monitor);
            state.done = true;
            state.running = true;
            self.signal.notify_one();
        }
        current.wait_for_signal();
        if let Some(handle) = lock(&self.os_thread).take() {
            let _ = handle.join();
        }
    }

    fn thread_root(self: &Arc<Self>, machine: &Arc<Machine>, target: Box<dyn FnOnce() + Send>) {
        trace!("context {:?} up", *lock(&self.slot));
        // Ping the starter back, then park until first dispatched.
        machine.contexts.current().wake();
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            self.park(machine);
            target();
        }));
        match result {
            Err(payload) if payload.is::<ContextFinished>() => {
                self.remove(machine);
                // Acknowledge destroy(); the destroyer holds the token.
                machine.contexts.current().wake();
            }
            Err(payload) if payload.is::<MachineExit>() => {
                self.remove(machine);
                machine.contexts.signal_exit_to_main();
            }
            Err(payload) => {
                // A kernel assertion failed on this context. Record it,
                // halt the machine, and let main unwind and re-raise.
                machine.record_fatal(payload);
                machine.interrupt.request_halt();
                self.remove(machine);
                machine.contexts.signal_exit_to_main();
            }
            Ok(()) => {
                machine.record_fatal(Box::new("context target returned without finishing"));
                machine.interrupt.request_halt();
                self.remove(machine);
                machine.contexts.signal_exit_to_main();
            }
        }
    }

    /// Park until the running token comes back, then become current.
    fn park(self: &Arc<Self>, machine: &Arc<Machine>) {
        self.wait_for_signal();
        let done = lock(&self.monitor).done;
        if done {
            panic::resume_unwind(Box::new(ContextFinished));
        }
        lock(&machine.contexts.state).current = Some(self.clone());
    }

    fn wake(&self) {
        let mut state = lock(&self.monitor);
        state.running = true;
        self.signal.notify_one();
    }

    fn wait_for_signal(&self) {
        let mut state = lock(&self.monitor);
        while !state.running {
            state = self
                .signal
                .wait(state)
                .unwrap_or_else(std::sync::PoisonError::into_inner);
        }
        let exiting = state.exiting;
        drop(state);
        if exiting {
            panic::resume_unwind(Box::new(MachineExit));
        }
    }

    fn remove(&self, machine: &Arc<Machine>) {
        if let Some(slot) = lock(&self.slot).take() {
            let _ = lock(&machine.contexts.state).live.try_remove(slot);
        }
    }
}
