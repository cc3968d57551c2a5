//! Asynchronous task scheduling for node components.
//!
//! Components never spawn onto tokio directly; they receive a [`Scheduler`]
//! at construction so tests can drive the same code paths and shutdown can
//! cancel what it started. Repeating tasks skip missed ticks rather than
//! bursting to catch up.

use std::future::Future;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};

/// Handle to a scheduled task. Cancellation is explicit: dropping the handle
/// leaves the task running.
#[derive(Debug)]
pub struct TaskHandle {
    handle: JoinHandle<()>,
}

impl TaskHandle {
    /// Stops the task. Safe to call more than once.
    pub fn cancel(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

/// Spawns work onto the ambient tokio runtime. Must be used from within a
/// runtime context.
#[derive(Debug, Clone, Copy, Default)]
pub struct Scheduler;

impl Scheduler {
    pub fn new() -> Self {
        Scheduler
    }

    /// Runs `future` once, as soon as the runtime gets to it.
    pub fn run_once<F>(&self, future: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        TaskHandle {
            handle: tokio::spawn(future),
        }
    }

    /// Runs `future` once after `delay`.
    pub fn run_once_later<F>(&self, delay: Duration, future: F) -> TaskHandle
    where
        F: Future<Output = ()> + Send + 'static,
    {
        TaskHandle {
            handle: tokio::spawn(async move {
                sleep(delay).await;
                future.await;
            }),
        }
    }

    /// Runs `task` every `period`, first after `initial_delay`, until the
    /// returned handle is cancelled.
    pub fn run_repeating<F, Fut>(
        &self,
        initial_delay: Duration,
        period: Duration,
        mut task: F,
    ) -> TaskHandle
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = ()> + Send,
    {
        TaskHandle {
            handle: tokio::spawn(async move {
                let mut ticker = interval_at(Instant::now() + initial_delay, period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
                loop {
                    ticker.tick().await;
                    task().await;
                }
            }),
        }
    }
}
