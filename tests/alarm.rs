//! Alarm behavior: wake times are never early, jitter-bounded, and
//! threads sharing a wake tick all wake on the same interrupt.

mod common;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use common::{Outcome, run_with_timeout};
use minos::{KERNEL_TICK, KThread, Kernel, MachineConfig, TIMER_TICKS};

/// Worst-case lateness: one full jittered timer period, plus the couple
/// of kernel ticks spent between the interrupt and the measurement.
fn lateness_bound() -> u64 {
    TIMER_TICKS + TIMER_TICKS / 10 - TIMER_TICKS / 20 + 2 * KERNEL_TICK
}

#[test]
fn wait_for_wakes_on_time_never_early() {
    Kernel::run(MachineConfig::new(), |kernel| {
        for wait in [1, 10 * KERNEL_TICK, 1_000, 2 * TIMER_TICKS] {
            let before = kernel.timer().time();
            kernel.alarm().wait_for(kernel, wait);
            let after = kernel.timer().time();
            assert!(
                after >= before + wait,
                "woke {} ticks early",
                before + wait - after
            );
            assert!(
                after <= before + wait + lateness_bound(),
                "woke {} ticks past the bound",
                after - before - wait
            );
        }
    });
}

#[test]
fn wait_for_zero_still_waits_for_an_interrupt() {
    Kernel::run(MachineConfig::new(), |kernel| {
        let before = kernel.timer().time();
        kernel.alarm().wait_for(kernel, 0);
        let after = kernel.timer().time();
        assert!(after > before);
        assert!(after <= before + lateness_bound());
    });
}

#[test]
fn equal_wake_times_wake_on_the_same_interrupt() {
    Kernel::run(MachineConfig::new(), |kernel| {
        const SLEEPERS: usize = 8;
        let wake_at = kernel.timer().time() + 60_000;
        let recorded: Arc<Mutex<Vec<u64>>> = Arc::new(Mutex::new(Vec::new()));

        let mut threads = Vec::new();
        for _ in 0..SLEEPERS {
            let recorded = Arc::clone(&recorded);
            let t = KThread::new(kernel, move |k: &Arc<Kernel>| {
                k.alarm().wait_for(k, wake_at - k.timer().time());
                recorded.lock().unwrap().push(k.timer().time());
            });
            t.fork(kernel);
            threads.push(t);
        }
        for t in &threads {
            t.join(kernel);
        }

        // The sleepers resume back to back, each charged one kernel tick
        // for its own wakeup; removing that charge must leave one shared
        // wake time.
        let recorded = recorded.lock().unwrap();
        assert_eq!(recorded.len(), SLEEPERS);
        let base = recorded[0] - KERNEL_TICK;
        for (position, time) in recorded.iter().enumerate() {
            assert_eq!(
                time - (position as u64 + 1) * KERNEL_TICK,
                base,
                "sleeper at position {position} woke on a different interrupt"
            );
        }
        assert!(base >= wake_at);
    });
}

#[test]
fn sleepers_with_mixed_durations_all_wake() {
    let outcome = run_with_timeout(MachineConfig::new(), Duration::from_secs(30), |kernel| {
        let mut threads = Vec::new();
        for i in 0..10u64 {
            let t = KThread::new(kernel, move |k: &Arc<Kernel>| {
                let wait = (i + 1) * 300;
                let before = k.timer().time();
                k.alarm().wait_for(k, wait);
                assert!(k.timer().time() >= before + wait);
            });
            t.fork(kernel);
            threads.push(t);
        }
        for t in &threads {
            t.join(kernel);
        }
    });
    assert_eq!(outcome, Outcome::Completed);
}
