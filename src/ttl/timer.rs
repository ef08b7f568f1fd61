//! One-shot deferred execution on a dedicated timer thread.
//!
//! Backs [`SystemClock`](crate::ttl::clock::SystemClock). The worker parks
//! on a condvar until the armed deadline (or a re-arm/shutdown signal),
//! then runs the job outside the lock so the job may arm the next wakeup
//! itself.
//!
//! ## Operations
//! - `schedule(after, job)`: arm the slot; replaces a pending job
//! - `cancel()`: disarm without running
//! - `shutdown()`: disarm and stop the thread (run on owner drop)
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::ttl::clock::TimerJob;

struct WorkerState {
    pending: Option<(Instant, TimerJob)>,
    shutdown: bool,
}

struct WorkerShared {
    state: Mutex<WorkerState>,
    cond: Condvar,
}

/// Handle to the timer thread. Dropping it stops the thread.
pub(crate) struct TimerWorker {
    shared: Arc<WorkerShared>,
}

impl TimerWorker {
    /// Spawns the worker thread.
    pub(crate) fn spawn() -> Self {
        let shared = Arc::new(WorkerShared {
            state: Mutex::new(WorkerState {
                pending: None,
                shutdown: false,
            }),
            cond: Condvar::new(),
        });
        let for_thread = Arc::clone(&shared);
        thread::Builder::new()
            .name("rankkit-ttl-timer".into())
            .spawn(move || run(for_thread))
            .expect("failed to spawn rankkit timer thread");
        Self { shared }
    }

    /// Arms the slot: run `job` once `after` has elapsed.
    pub(crate) fn schedule(&self, after: Duration, job: TimerJob) {
        let mut state = self.shared.state.lock();
        state.pending = Some((Instant::now() + after, job));
        self.shared.cond.notify_one();
    }

    /// Disarms the slot, dropping any pending job.
    pub(crate) fn cancel(&self) {
        self.shared.state.lock().pending = None;
    }

    fn shutdown(&self) {
        let mut state = self.shared.state.lock();
        state.pending = None;
        state.shutdown = true;
        self.shared.cond.notify_one();
    }
}

impl Drop for TimerWorker {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run(shared: Arc<WorkerShared>) {
    let mut state = shared.state.lock();
    loop {
        if state.shutdown {
            return;
        }
        match state.pending.as_ref().map(|(deadline, _)| *deadline) {
            None => {
                shared.cond.wait(&mut state);
            }
            Some(deadline) => {
                let now = Instant::now();
                if now >= deadline {
                    let (_, job) = state.pending.take().unwrap();
                    // run outside the lock so the job can re-arm
                    drop(state);
                    job();
                    state = shared.state.lock();
                } else {
                    let _ = shared.cond.wait_for(&mut state, deadline - now);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn scheduled_job_runs_after_delay() {
        let worker = TimerWorker::spawn();
        let (tx, rx) = mpsc::channel();
        worker.schedule(
            Duration::from_millis(5),
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        rx.recv_timeout(Duration::from_secs(5))
            .expect("timer job did not run");
    }

    #[test]
    fn cancel_prevents_run() {
        let worker = TimerWorker::spawn();
        let fired = Arc::new(AtomicUsize::new(0));
        let f = fired.clone();
        worker.schedule(
            Duration::from_millis(20),
            Box::new(move || {
                f.fetch_add(1, Ordering::Relaxed);
            }),
        );
        worker.cancel();
        thread::sleep(Duration::from_millis(80));
        assert_eq!(fired.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn rearm_from_job_fires_again() {
        let worker = Arc::new(TimerWorker::spawn());
        let (tx, rx) = mpsc::channel();
        let again = Arc::clone(&worker);
        worker.schedule(
            Duration::from_millis(2),
            Box::new(move || {
                let tx2 = tx.clone();
                again.schedule(
                    Duration::from_millis(2),
                    Box::new(move || {
                        let _ = tx2.send(());
                    }),
                );
            }),
        );
        rx.recv_timeout(Duration::from_secs(5))
            .expect("re-armed timer job did not run");
    }
}
