//! Per-interpreter operation scheduler (§4.5).
//!
//! Operations against one interpreter must execute in submission order, but
//! a callback dispatched *from* PHP may itself need to issue further
//! operations back into PHP before its own reply can be sent — those nested
//! operations must run to completion ahead of the outer queue's next item,
//! without blocking on it. A stack of FIFO levels gives each nesting depth
//! its own tail to chain onto; levels opened while servicing a callback are
//! truncated once that callback returns.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::Mutex;

struct SchedulerLevel {
    /// The tail of this level's chain: resolves once every operation
    /// enqueued so far at this level has run.
    tail: Arc<Mutex<()>>,
}

impl SchedulerLevel {
    fn new() -> Self {
        SchedulerLevel { tail: Arc::new(Mutex::new(())) }
    }
}

/// Serializes async operations onto nested FIFO levels.
///
/// Chaining is implemented with a per-level `tokio::sync::Mutex<()>`: to run
/// an operation at level N, a caller acquires level N's mutex (which queues
/// behind anything already enqueued there), runs the operation, then drops
/// the guard. This gives FIFO order within a level without a teacher analog
/// to crib from directly — reentrant nesting is specific to this bridge.
pub struct Scheduler {
    levels: Mutex<Vec<SchedulerLevel>>,
    nesting_level: AtomicUsize,
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl Scheduler {
    pub fn new() -> Self {
        Scheduler { levels: Mutex::new(vec![SchedulerLevel::new()]), nesting_level: AtomicUsize::new(0) }
    }

    /// Current reentrant nesting depth (0 at the top level).
    pub fn nesting_level(&self) -> usize {
        self.nesting_level.load(Ordering::Acquire)
    }

    /// Enqueues `op` on the current nesting level and awaits its result.
    /// Operations enqueued concurrently at the same level still run one at
    /// a time, in submission order. `T` is typically a `Result`; the
    /// scheduler itself is agnostic to success/failure, it only orders.
    pub async fn enqueue<F, Fut, T>(&self, op: F) -> T
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = T>,
    {
        let level = self.nesting_level();
        let tail = {
            let mut levels = self.levels.lock().await;
            while levels.len() <= level {
                levels.push(SchedulerLevel::new());
            }
            levels[level].tail.clone()
        };
        let _guard = tail.lock().await;
        op().await
    }

    /// Marks entry into servicing an inbound callback: subsequent
    /// `enqueue` calls land one level deeper until `leave_callback` is
    /// called, so they complete before the outer level's next operation.
    pub async fn enter_callback(&self) {
        let mut levels = self.levels.lock().await;
        self.nesting_level.fetch_add(1, Ordering::AcqRel);
        levels.push(SchedulerLevel::new());
    }

    /// Leaves callback-servicing mode, truncating every level opened above
    /// the one we are returning to.
    pub async fn leave_callback(&self) {
        let depth = self.nesting_level.fetch_sub(1, Ordering::AcqRel) - 1;
        let mut levels = self.levels.lock().await;
        levels.truncate(depth + 1);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn operations_run_in_submission_order() {
        let scheduler = Scheduler::new();
        let order = Arc::new(Mutex::new(Vec::new()));

        let a = {
            let order = order.clone();
            scheduler.enqueue(|| async move {
                order.lock().await.push(1);
            })
        };
        let b = {
            let order = order.clone();
            scheduler.enqueue(|| async move {
                order.lock().await.push(2);
            })
        };
        tokio::join!(a, b);
        assert_eq!(*order.lock().await, vec![1, 2]);
    }

    #[tokio::test]
    async fn nested_callback_level_completes_before_outer_continues() {
        let scheduler = Arc::new(Scheduler::new());
        let order = Arc::new(Mutex::new(Vec::new()));

        scheduler.enter_callback().await;
        assert_eq!(scheduler.nesting_level(), 1);

        {
            let order = order.clone();
            scheduler
                .enqueue(|| async move {
                    order.lock().await.push("nested");
                })
                .await;
        }

        scheduler.leave_callback().await;
        assert_eq!(scheduler.nesting_level(), 0);

        {
            let order = order.clone();
            scheduler
                .enqueue(|| async move {
                    order.lock().await.push("outer");
                })
                .await;
        }

        assert_eq!(*order.lock().await, vec!["nested", "outer"]);
    }

    #[tokio::test]
    async fn enqueue_propagates_error() {
        let scheduler = Scheduler::new();
        let result: Result<(), &'static str> = scheduler.enqueue(|| async move { Err("boom") }).await;
        assert!(result.is_err());
    }
}
