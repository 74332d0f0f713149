//! Stream-driven step scheduling.
//!
//! Each newly-observed tool step runs on its own task. The first failing
//! step atomically flips a "stopped" flag and stores its error in a
//! size-one slot; once stopped, later schedule calls are ignored. A task
//! tracker plays the wait-group role for turn completion.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_util::task::TaskTracker;

use ag_domain::plan::Step;
use ag_domain::{Error, ExecContext};

use crate::executor::Executor;

pub struct StepScheduler {
    executor: Arc<Executor>,
    ctx: ExecContext,
    stopped: Arc<AtomicBool>,
    error_tx: mpsc::Sender<Error>,
    error_rx: Mutex<Option<mpsc::Receiver<Error>>>,
    tracker: TaskTracker,
    /// Fingerprints seen across every plan of this turn; duplicates are
    /// short-circuited here rather than in plan refinement.
    seen: Mutex<HashSet<String>>,
}

impl StepScheduler {
    pub fn new(executor: Arc<Executor>, ctx: ExecContext) -> Self {
        let (error_tx, error_rx) = mpsc::channel(1);
        Self {
            executor,
            ctx,
            stopped: Arc::new(AtomicBool::new(false)),
            error_tx,
            error_rx: Mutex::new(Some(error_rx)),
            tracker: TaskTracker::new(),
            seen: Mutex::new(HashSet::new()),
        }
    }

    pub fn stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    /// Dispatch one step onto its own task. No-ops after the first error or
    /// for a fingerprint this turn has already executed.
    pub fn schedule(&self, step: Step) {
        if self.stopped() {
            return;
        }
        if !self.seen.lock().insert(step.fingerprint()) {
            tracing::debug!(tool = %step.name, "duplicate step short-circuited");
            return;
        }

        let executor = self.executor.clone();
        let ctx = self.ctx.clone();
        let stopped = self.stopped.clone();
        let error_tx = self.error_tx.clone();
        self.tracker.spawn(async move {
            let result = executor.execute_step(&ctx, &step).await;
            let stop_error = match result {
                Ok(step_result) => step_result.stop_error(),
                Err(e) => Some(e),
            };
            if let Some(error) = stop_error {
                stopped.store(true, Ordering::Release);
                let _ = error_tx.try_send(error);
            }
        });
    }

    /// Wait for every scheduled step; returns the first stored error.
    pub async fn wait(&self) -> Option<Error> {
        self.tracker.close();
        self.tracker.wait().await;
        let mut slot = self.error_rx.lock();
        slot.as_mut().and_then(|rx| rx.try_recv().ok())
    }
}
