//! Shared test harness: run a kernel body under a wall-clock timeout so
//! livelocks (threads that never finish) become observable test results
//! instead of hung test binaries.

#![allow(dead_code)]

use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;

use minos::{Kernel, MachineConfig};

#[derive(Debug, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    TimedOut,
}

/// Run `body` on its own machine. If it does not complete within
/// `timeout`, halt the machine from the outside and report `TimedOut`.
pub fn run_with_timeout<F>(config: MachineConfig, timeout: Duration, body: F) -> Outcome
where
    F: FnOnce(&Arc<Kernel>) + Send + 'static,
{
    let (kernel_tx, kernel_rx) = mpsc::channel();
    let (done_tx, done_rx) = mpsc::channel();
    let runner = std::thread::spawn(move || {
        Kernel::run(config, move |kernel| {
            kernel_tx.send(Arc::clone(kernel)).unwrap();
            body(kernel);
            let _ = done_tx.send(());
        });
    });

    let kernel: Arc<Kernel> = kernel_rx.recv().expect("kernel never booted");
    let outcome = match done_rx.recv_timeout(timeout) {
        Ok(()) => Outcome::Completed,
        Err(_) => {
            kernel.halt();
            Outcome::TimedOut
        }
    };
    runner.join().expect("kernel run panicked");
    outcome
}
