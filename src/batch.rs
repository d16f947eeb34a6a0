//! Bounded worker pool for running a stage over a batch of items.
//!
//! Items are partitioned into batches that workers pull from a shared queue.
//! Each result is tagged with its input index and placed back into a slot, so
//! callers always receive results in input order.

use crate::config::BatchConfig;
use crate::error::ItemError;
use crossbeam_channel::{unbounded, Receiver, RecvTimeoutError, Sender};
use log::{debug, warn};
use std::any::Any;
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

type Indexed<T> = (usize, T);

/// Stop signal shared between a batch and its stage functions.
///
/// Set when the batch deadline passes. Stages that do several slow units of
/// work per item check it between units and return early.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

/// Runs stage functions over item batches with a fixed-size worker pool.
#[derive(Debug, Clone)]
pub struct BatchExecutor {
    workers: usize,
    batch_size: usize,
    timeout: Option<Duration>,
}

impl BatchExecutor {
    pub fn new(config: &BatchConfig) -> Self {
        Self::with_settings(config.workers, config.batch_size, config.timeout())
    }

    /// Zero worker counts and batch sizes are raised to one.
    pub fn with_settings(workers: usize, batch_size: usize, timeout: Option<Duration>) -> Self {
        BatchExecutor {
            workers: workers.max(1),
            batch_size: batch_size.max(1),
            timeout,
        }
    }

    /// Applies `stage` to every item and returns one result per item, in input order.
    ///
    /// A failing or panicking item yields an [`ItemError`] in its slot and
    /// does not affect other items. When the timeout elapses, outstanding
    /// workers are told to stop and every unfinished item is reported as
    /// [`ItemError::TimedOut`].
    pub fn run<T, R, E, F>(&self, items: Vec<T>, stage: F) -> Vec<Result<R, ItemError>>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: fmt::Display + 'static,
        F: Fn(T) -> Result<R, E> + Send + Sync + 'static,
    {
        self.run_cancellable(items, move |item: T, _: &CancelToken| stage(item))
    }

    /// Like [`run`](Self::run), but hands each call the batch's
    /// [`CancelToken`] so a running item can stop once the deadline passes.
    pub fn run_cancellable<T, R, E, F>(&self, items: Vec<T>, stage: F) -> Vec<Result<R, ItemError>>
    where
        T: Send + 'static,
        R: Send + 'static,
        E: fmt::Display + 'static,
        F: Fn(T, &CancelToken) -> Result<R, E> + Send + Sync + 'static,
    {
        let total = items.len();
        if total == 0 {
            return Vec::new();
        }

        let batches = partition(items, self.batch_size);
        let pool_size = self.workers.min(batches.len());
        debug!(
            "Running {} items in {} batches on {} workers",
            total,
            batches.len(),
            pool_size
        );

        let (batch_tx, batch_rx) = unbounded::<Vec<Indexed<T>>>();
        let (result_tx, result_rx) = unbounded::<Indexed<Result<R, ItemError>>>();
        for batch in batches {
            if batch_tx.send(batch).is_err() {
                break;
            }
        }
        drop(batch_tx);

        let stage = Arc::new(stage);
        let cancel = CancelToken::new();
        for worker_id in 0..pool_size {
            let batch_rx = batch_rx.clone();
            let result_tx = result_tx.clone();
            let stage = Arc::clone(&stage);
            let cancel = cancel.clone();
            let spawned = thread::Builder::new()
                .name(format!("batch-worker-{}", worker_id))
                .spawn(move || work(batch_rx, result_tx, stage, cancel));
            if let Err(e) = spawned {
                warn!("Failed to spawn batch worker {}: {}", worker_id, e);
            }
        }
        drop(result_tx);

        self.collect(total, result_rx, &cancel)
    }

    /// Gathers indexed results into input order until every slot is filled,
    /// the deadline passes, or all workers have exited.
    fn collect<R>(
        &self,
        total: usize,
        result_rx: Receiver<Indexed<Result<R, ItemError>>>,
        cancel: &CancelToken,
    ) -> Vec<Result<R, ItemError>> {
        let mut slots: Vec<Option<Result<R, ItemError>>> = (0..total).map(|_| None).collect();
        let deadline = self.timeout.map(|t| Instant::now() + t);
        let mut received = 0;
        let mut timed_out = false;

        while received < total {
            let next = match deadline {
                Some(deadline) => result_rx.recv_deadline(deadline),
                None => result_rx
                    .recv()
                    .map_err(|_| RecvTimeoutError::Disconnected),
            };
            match next {
                Ok((idx, result)) => {
                    if slots[idx].is_none() {
                        received += 1;
                    }
                    slots[idx] = Some(result);
                }
                Err(RecvTimeoutError::Timeout) => {
                    timed_out = true;
                    break;
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }

        let after_ms = self
            .timeout
            .map(|t| u64::try_from(t.as_millis()).unwrap_or(u64::MAX))
            .unwrap_or(0);
        if timed_out {
            cancel.cancel();
            warn!(
                "Batch timed out after {} ms with {} of {} items unfinished",
                after_ms,
                total - received,
                total
            );
        } else if received < total {
            warn!("Workers exited with {} items unprocessed", total - received);
        }

        slots
            .into_iter()
            .map(|slot| {
                slot.unwrap_or_else(|| {
                    Err(if timed_out {
                        ItemError::TimedOut { after_ms }
                    } else {
                        ItemError::WorkerLost
                    })
                })
            })
            .collect()
    }
}

fn partition<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<Indexed<T>>> {
    let chunk = batch_size.min(items.len()).max(1);
    let mut batches = Vec::with_capacity(items.len() / chunk + 1);
    let mut current = Vec::with_capacity(chunk);
    for indexed in items.into_iter().enumerate() {
        current.push(indexed);
        if current.len() == chunk {
            batches.push(std::mem::replace(&mut current, Vec::with_capacity(chunk)));
        }
    }
    if !current.is_empty() {
        batches.push(current);
    }
    batches
}

fn work<T, R, E, F>(
    batch_rx: Receiver<Vec<Indexed<T>>>,
    result_tx: Sender<Indexed<Result<R, ItemError>>>,
    stage: Arc<F>,
    cancel: CancelToken,
) where
    E: fmt::Display,
    F: Fn(T, &CancelToken) -> Result<R, E>,
{
    for batch in batch_rx.iter() {
        for (idx, item) in batch {
            if cancel.is_cancelled() {
                return;
            }
            let result = match panic::catch_unwind(AssertUnwindSafe(|| (*stage)(item, &cancel))) {
                Ok(Ok(value)) => Ok(value),
                Ok(Err(e)) => {
                    debug!("Item {} failed: {}", idx, e);
                    Err(ItemError::Failed(e.to_string()))
                }
                Err(payload) => {
                    let message = panic_message(payload.as_ref());
                    warn!("Item {} panicked: {}", idx, message);
                    Err(ItemError::Panicked(message))
                }
            };
            if result_tx.send((idx, result)).is_err() {
                return;
            }
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_follow_input_order() {
        let items: Vec<u64> = (0..23).collect();
        for workers in 1..=4 {
            for batch_size in 1..=3 {
                let executor = BatchExecutor::with_settings(workers, batch_size, None);
                let results = executor.run(items.clone(), |x: u64| {
                    thread::sleep(Duration::from_millis(5 - x % 5));
                    Ok::<_, String>(x * 10)
                });
                let values: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
                let expected: Vec<u64> = items.iter().map(|x| x * 10).collect();
                assert_eq!(values, expected, "workers={} batch_size={}", workers, batch_size);
            }
        }
    }

    #[test]
    fn test_failing_item_is_isolated() {
        let executor = BatchExecutor::with_settings(2, 2, Some(Duration::from_secs(10)));
        let results = executor.run(vec![1, 2, 3, 4, 5], |x: i32| {
            if x == 3 {
                Err(format!("item {} is broken", x))
            } else {
                Ok(x)
            }
        });

        assert_eq!(results.len(), 5);
        assert_eq!(
            results[2],
            Err(ItemError::Failed("item 3 is broken".to_string()))
        );
        for (idx, expected) in [(0, 1), (1, 2), (3, 4), (4, 5)] {
            assert_eq!(results[idx], Ok(expected));
        }
    }

    #[test]
    fn test_panicking_item_is_captured() {
        let executor = BatchExecutor::with_settings(1, 5, None);
        let results = executor.run(vec![1, 2, 3], |x: i32| {
            if x == 2 {
                panic!("stage exploded");
            }
            Ok::<_, String>(x)
        });

        assert_eq!(results[0], Ok(1));
        assert_eq!(
            results[1],
            Err(ItemError::Panicked("stage exploded".to_string()))
        );
        assert_eq!(results[2], Ok(3));
    }

    #[test]
    fn test_timeout_marks_unfinished_items() {
        let executor = BatchExecutor::with_settings(3, 1, Some(Duration::from_millis(300)));
        let results = executor.run(vec![0u64, 2_000, 0], |delay: u64| {
            thread::sleep(Duration::from_millis(delay));
            Ok::<_, String>(delay)
        });

        assert_eq!(results[0], Ok(0));
        assert_eq!(results[1], Err(ItemError::TimedOut { after_ms: 300 }));
        assert_eq!(results[2], Ok(0));
    }

    #[test]
    fn test_empty_input() {
        let executor = BatchExecutor::with_settings(4, 10, None);
        let results = executor.run(Vec::<u8>::new(), |x: u8| Ok::<_, String>(x));
        assert!(results.is_empty());
    }

    #[test]
    fn test_zero_settings_are_clamped() {
        let executor = BatchExecutor::with_settings(0, 0, None);
        let results = executor.run(vec!["a", "b"], |s: &'static str| Ok::<_, String>(s.len()));
        assert_eq!(results, vec![Ok(1), Ok(1)]);
    }

    #[test]
    fn test_running_item_sees_cancellation() {
        let executor = BatchExecutor::with_settings(1, 1, Some(Duration::from_millis(50)));
        let stopped_early = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&stopped_early);

        let results = executor.run_cancellable(vec![()], move |_: (), cancel: &CancelToken| {
            for _ in 0..200 {
                if cancel.is_cancelled() {
                    flag.store(true, Ordering::SeqCst);
                    return Err("stopped");
                }
                thread::sleep(Duration::from_millis(5));
            }
            Ok(())
        });

        assert_eq!(results[0], Err(ItemError::TimedOut { after_ms: 50 }));
        thread::sleep(Duration::from_millis(200));
        assert!(stopped_early.load(Ordering::SeqCst));
    }

    #[test]
    fn test_huge_batch_size_keeps_order() {
        let executor = BatchExecutor::with_settings(2, usize::MAX, None);
        let results = executor.run(vec![1, 2, 3], |x: i32| Ok::<_, String>(x * 2));
        assert_eq!(results, vec![Ok(2), Ok(4), Ok(6)]);
        assert_eq!(partition(vec!['a', 'b'], usize::MAX).len(), 1);
    }

    #[test]
    fn test_partition() {
        let batches = partition(vec!['a', 'b', 'c', 'd', 'e'], 2);
        assert_eq!(batches.len(), 3);
        assert_eq!(batches[2], vec![(4, 'e')]);
    }
}
