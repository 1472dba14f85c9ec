//! Timer abstraction for auto-sync, token refresh and reconnect backoff.
//!
//! Production code schedules on tokio timers; tests drive a
//! [`ManualScheduler`] that advances virtual time without real waits.

use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;

use crate::util::lock;

/// A unit of scheduled work.
pub type ScheduledTask = Pin<Box<dyn Future<Output = ()> + Send + 'static>>;

/// Schedules work to run after a delay.
pub trait Scheduler: Send + Sync + 'static {
    /// Run `task` once `delay` has elapsed, unless the handle is cancelled first.
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> ScheduleHandle;
}

/// Cancellation handle for a scheduled task.
///
/// Cancelling is idempotent and never interrupts a task that has already
/// started running, so a task may safely cancel its own handle while
/// re-arming itself.
#[derive(Debug, Clone, Default)]
pub struct ScheduleHandle {
    cancelled: Arc<AtomicBool>,
    wake: Arc<Notify>,
}

impl ScheduleHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        self.wake.notify_one();
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Scheduler backed by tokio timers.
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioScheduler;

impl Scheduler for TokioScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> ScheduleHandle {
        let handle = ScheduleHandle::default();
        let timer = handle.clone();
        tokio::spawn(async move {
            tokio::select! {
                () = tokio::time::sleep(delay) => {}
                () = timer.wake.notified() => {}
            }
            if !timer.is_cancelled() {
                task.await;
            }
        });
        handle
    }
}

struct PendingTask {
    due: Duration,
    seq: u64,
    handle: ScheduleHandle,
    task: ScheduledTask,
}

#[derive(Default)]
struct ManualState {
    now: Duration,
    next_seq: u64,
    pending: Vec<PendingTask>,
}

/// Deterministic scheduler for tests and simulations.
///
/// Tasks only run inside [`ManualScheduler::advance`], in due-time order
/// (ties in scheduling order). Tasks scheduled while advancing run in the
/// same call if they fall due within the advanced window.
#[derive(Clone, Default)]
pub struct ManualScheduler {
    state: Arc<Mutex<ManualState>>,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Virtual time elapsed since creation.
    pub fn now(&self) -> Duration {
        lock(&self.state).now
    }

    /// Number of scheduled tasks that are neither cancelled nor run yet.
    pub fn pending(&self) -> usize {
        lock(&self.state)
            .pending
            .iter()
            .filter(|task| !task.handle.is_cancelled())
            .count()
    }

    /// Delay until the earliest live task falls due.
    pub fn next_due_in(&self) -> Option<Duration> {
        let state = lock(&self.state);
        state
            .pending
            .iter()
            .filter(|task| !task.handle.is_cancelled())
            .map(|task| task.due.saturating_sub(state.now))
            .min()
    }

    /// Advance virtual time by `by`, running every task that falls due.
    pub async fn advance(&self, by: Duration) {
        let target = lock(&self.state).now + by;
        while let Some(task) = self.pop_due(target) {
            task.await;
        }
        lock(&self.state).now = target;
    }

    fn pop_due(&self, target: Duration) -> Option<ScheduledTask> {
        let mut state = lock(&self.state);
        state.pending.retain(|task| !task.handle.is_cancelled());
        let index = state
            .pending
            .iter()
            .enumerate()
            .filter(|(_, task)| task.due <= target)
            .min_by_key(|(_, task)| (task.due, task.seq))
            .map(|(index, _)| index)?;
        let task = state.pending.swap_remove(index);
        state.now = state.now.max(task.due);
        Some(task.task)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule(&self, delay: Duration, task: ScheduledTask) -> ScheduleHandle {
        let handle = ScheduleHandle::default();
        let mut state = lock(&self.state);
        let seq = state.next_seq;
        state.next_seq += 1;
        let due = state.now + delay;
        state.pending.push(PendingTask {
            due,
            seq,
            handle: handle.clone(),
            task,
        });
        handle
    }
}
