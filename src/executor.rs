//! Bounded, fail-fast batch execution shared by the mirror, orchestrator and
//! verdict stages.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::{mpsc, watch, Mutex, Semaphore};
use tracing::{debug, instrument};

/// Cooperative cancellation flag shared by every task in a batch.
///
/// Checked at pool-acquisition and poll-tick boundaries; nothing is
/// interrupted mid-request.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    tx: Arc<watch::Sender<bool>>,
}

impl CancelSignal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once [`cancel`](Self::cancel) has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives as long as `self`, so this only returns on cancel.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

/// What happened to one item of a batch.
#[derive(Debug)]
pub enum TaskOutcome<I, T, E> {
    Completed(I, T),
    Failed(I, E),
    /// Never started because the batch was already cancelled.
    Skipped(I),
}

/// Results of a batch in completion order.
#[derive(Debug)]
pub struct BatchReport<I, T, E> {
    pub outcomes: Vec<TaskOutcome<I, T, E>>,
}

impl<I, T, E> BatchReport<I, T, E> {
    pub fn completed(&self) -> impl Iterator<Item = (&I, &T)> {
        self.outcomes.iter().filter_map(|o| match o {
            TaskOutcome::Completed(item, value) => Some((item, value)),
            _ => None,
        })
    }

    pub fn skipped(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| matches!(o, TaskOutcome::Skipped(_)))
            .count()
    }

    /// Removes and returns the first failure in completion order.
    pub fn take_first_failure(&mut self) -> Option<(I, E)> {
        let index = self
            .outcomes
            .iter()
            .position(|o| matches!(o, TaskOutcome::Failed(..)))?;
        match self.outcomes.remove(index) {
            TaskOutcome::Failed(item, err) => Some((item, err)),
            _ => None,
        }
    }
}

/// Fixed-width worker pool pulling from a shared queue.
///
/// At most `limit` tasks run at once. The first failing task cancels the
/// shared [`CancelSignal`]; queued items are then reported as
/// [`TaskOutcome::Skipped`] while in-flight tasks run to completion.
pub struct WorkerPool {
    limit: usize,
    semaphore: Arc<Semaphore>,
}

impl WorkerPool {
    pub fn new(concurrency_limit: usize) -> Self {
        let limit = concurrency_limit.max(1);
        Self {
            limit,
            semaphore: Arc::new(Semaphore::new(limit)),
        }
    }

    pub fn limit(&self) -> usize {
        self.limit
    }

    #[instrument(skip(self, items, cancel, work), fields(limit = self.limit))]
    pub async fn run<I, T, E, F, Fut>(
        &self,
        items: Vec<I>,
        cancel: &CancelSignal,
        work: F,
    ) -> BatchReport<I, T, E>
    where
        I: Clone + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
        F: Fn(I, CancelSignal) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
    {
        let total = items.len();
        let queue = Arc::new(Mutex::new(items.into_iter().collect::<VecDeque<_>>()));
        let (tx, mut rx) = mpsc::channel(total.max(1));
        let work = Arc::new(work);

        let mut workers = Vec::with_capacity(self.limit);
        for worker_id in 0..self.limit.min(total) {
            let queue = Arc::clone(&queue);
            let tx = tx.clone();
            let work = Arc::clone(&work);
            let semaphore = Arc::clone(&self.semaphore);
            let cancel = cancel.clone();

            workers.push(tokio::spawn(async move {
                loop {
                    let Some(item) = queue.lock().await.pop_front() else {
                        break;
                    };
                    if cancel.is_cancelled() {
                        let _ = tx.send(TaskOutcome::Skipped(item)).await;
                        continue;
                    }
                    let Ok(_permit) = semaphore.acquire().await else {
                        let _ = tx.send(TaskOutcome::Skipped(item)).await;
                        continue;
                    };
                    debug!(worker_id, "Worker picked up task");
                    let outcome = match work(item.clone(), cancel.clone()).await {
                        Ok(value) => TaskOutcome::Completed(item, value),
                        Err(err) => {
                            cancel.cancel();
                            TaskOutcome::Failed(item, err)
                        }
                    };
                    let _ = tx.send(outcome).await;
                }
            }));
        }
        drop(tx);

        // Single collector drains the result channel.
        let mut outcomes = Vec::with_capacity(total);
        while let Some(outcome) = rx.recv().await {
            if matches!(outcome, TaskOutcome::Failed(..)) {
                cancel.cancel();
            }
            outcomes.push(outcome);
        }
        for worker in workers {
            let _ = worker.await;
        }

        BatchReport { outcomes }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_pool_never_exceeds_limit() {
        let pool = WorkerPool::new(3);
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let (f, p) = (Arc::clone(&in_flight), Arc::clone(&peak));
        let report = pool
            .run((0..12).collect(), &CancelSignal::new(), move |i: u32, _| {
                let (f, p) = (Arc::clone(&f), Arc::clone(&p));
                async move {
                    let now = f.fetch_add(1, Ordering::SeqCst) + 1;
                    p.fetch_max(now, Ordering::SeqCst);
                    tokio::time::sleep(Duration::from_millis(10)).await;
                    f.fetch_sub(1, Ordering::SeqCst);
                    Ok::<_, String>(i)
                }
            })
            .await;

        assert_eq!(report.completed().count(), 12);
        assert!(peak.load(Ordering::SeqCst) <= 3);
        assert!(peak.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_first_failure_cancels_remaining() {
        let pool = WorkerPool::new(1);
        let cancel = CancelSignal::new();
        let started = Arc::new(AtomicUsize::new(0));

        let s = Arc::clone(&started);
        let mut report = pool
            .run(vec![1, 2, 3, 4], &cancel, move |i: u32, _| {
                let s = Arc::clone(&s);
                async move {
                    s.fetch_add(1, Ordering::SeqCst);
                    if i == 1 {
                        Err(format!("boom {i}"))
                    } else {
                        Ok(i)
                    }
                }
            })
            .await;

        assert!(cancel.is_cancelled());
        assert_eq!(started.load(Ordering::SeqCst), 1);
        assert_eq!(report.skipped(), 3);
        let (item, err) = report.take_first_failure().unwrap();
        assert_eq!(item, 1);
        assert_eq!(err, "boom 1");
    }

    #[tokio::test]
    async fn test_cancelled_resolves_after_cancel() {
        let cancel = CancelSignal::new();
        let waiter = {
            let cancel = cancel.clone();
            tokio::spawn(async move { cancel.cancelled().await })
        };
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
    }
}
