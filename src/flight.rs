//! Single-flight deduplication of concurrent fetches.
//!
//! While a call for a key is in flight, further callers for the same key
//! join it instead of starting their own. The call runs on a spawned task,
//! so a waiter that gives up (for example on a deadline) never cancels it
//! for the others. Once the call completes the key returns to idle and the
//! next caller starts a new execution.

use std::future::Future;
use std::hash::Hash;
use std::panic;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// The spawned call was cancelled before producing an output, which only
/// happens while the runtime shuts down.
#[derive(Debug, Clone, Copy, Error, PartialEq, Eq)]
#[error("in-flight call was cancelled")]
pub struct Cancelled;

type Call<T> = Shared<BoxFuture<'static, Result<T, Cancelled>>>;

/// Per-key in-flight call table.
pub struct SingleFlight<K, T>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    calls: Arc<DashMap<K, Call<T>>>,
}

impl<K, T> Clone for SingleFlight<K, T>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn clone(&self) -> Self {
        Self {
            calls: Arc::clone(&self.calls),
        }
    }
}

impl<K, T> Default for SingleFlight<K, T>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self {
            calls: Arc::new(DashMap::new()),
        }
    }
}

/// Returns keys to idle when the call finishes, including by panic.
struct Landing<K: Hash + Eq, T> {
    calls: Arc<DashMap<K, Call<T>>>,
    keys: Vec<K>,
}

impl<K: Hash + Eq, T> Drop for Landing<K, T> {
    fn drop(&mut self) {
        for key in &self.keys {
            self.calls.remove(key);
        }
    }
}

/// Await a spawned call, re-raising its panic in the waiter.
async fn land<T>(handle: JoinHandle<T>) -> Result<T, Cancelled> {
    match handle.await {
        Ok(output) => Ok(output),
        Err(err) if err.is_panic() => panic::resume_unwind(err.into_panic()),
        Err(_) => Err(Cancelled),
    }
}

impl<K, T> SingleFlight<K, T>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    /// Create an empty group.
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `func` for `key`, or join the call already in flight for it.
    ///
    /// Every caller that joins the same execution observes the same output.
    /// Must be called from within a Tokio runtime.
    pub async fn work<F, Fut>(&self, key: K, func: F) -> Result<T, Cancelled>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T> + Send + 'static,
    {
        let call = match self.calls.entry(key.clone()) {
            Entry::Occupied(in_flight) => in_flight.get().clone(),
            Entry::Vacant(idle) => {
                let landing = Landing {
                    calls: Arc::clone(&self.calls),
                    keys: vec![key],
                };
                let fut = func();
                let handle = tokio::spawn(async move {
                    let output = fut.await;
                    drop(landing);
                    output
                });
                let call = land(handle).boxed().shared();
                idle.insert(call.clone());
                call
            }
        };

        call.await
    }

    /// Resolve many keys with at most one new execution.
    ///
    /// Keys already in flight join their existing calls. The remaining keys
    /// are handed to a single `func` call, and each of them is registered
    /// against it so later callers join too. `select` projects the shared
    /// batch output onto one key. Outputs are returned in `keys` order.
    pub async fn work_many<B, F, Fut, P>(
        &self,
        keys: &[K],
        func: F,
        select: P,
    ) -> Vec<Result<T, Cancelled>>
    where
        B: Clone + Send + Sync + 'static,
        F: FnOnce(Vec<K>) -> Fut,
        Fut: Future<Output = B> + Send + 'static,
        P: Fn(&B, &K) -> T + Clone + Send + Sync + 'static,
    {
        let (tx, rx) = oneshot::channel::<JoinHandle<B>>();
        let batch = async move {
            let handle = rx.await.map_err(|_| Cancelled)?;
            land(handle).await
        }
        .boxed()
        .shared();

        let mut leaders = Vec::new();
        let calls: Vec<Call<T>> = keys
            .iter()
            .map(|key| match self.calls.entry(key.clone()) {
                Entry::Occupied(in_flight) => in_flight.get().clone(),
                Entry::Vacant(idle) => {
                    let (owned, select) = (key.clone(), select.clone());
                    let call = batch
                        .clone()
                        .map(move |output| output.map(|batch| select(&batch, &owned)))
                        .boxed()
                        .shared();
                    idle.insert(call.clone());
                    leaders.push(key.clone());
                    call
                }
            })
            .collect();

        if !leaders.is_empty() {
            let landing = Landing {
                calls: Arc::clone(&self.calls),
                keys: leaders.clone(),
            };
            let fut = func(leaders);
            let handle = tokio::spawn(async move {
                let output = fut.await;
                drop(landing);
                output
            });
            // The receiver lives in `batch`, which the registered calls hold.
            let _ = tx.send(handle);
        }

        join_all(calls).await
    }

    /// Number of keys with a call in flight.
    pub fn in_flight(&self) -> usize {
        self.calls.len()
    }
}

impl<K, T> std::fmt::Debug for SingleFlight<K, T>
where
    K: Hash + Eq + Clone + Send + Sync + 'static,
    T: Clone + Send + Sync + 'static,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SingleFlight")
            .field("in_flight", &self.calls.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[tokio::test]
    async fn test_direct_call() {
        let group = SingleFlight::new();
        let result = group.work("key", || async { "Result".to_string() }).await;
        assert_eq!(result, Ok("Result".to_string()));
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_parallel_calls_share_one_execution() {
        let counter = Arc::new(AtomicUsize::new(0));
        let group = SingleFlight::new();

        let calls = (0..10).map(|_| {
            let counter = Arc::clone(&counter);
            group.work("key", move || async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                "Result".to_string()
            })
        });

        let results = join_all(calls).await;
        assert!(results.iter().all(|r| r.as_deref() == Ok("Result")));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_keys_run_independently() {
        let counter = Arc::new(AtomicUsize::new(0));
        let group = SingleFlight::new();

        let calls = ["a", "b", "c"].map(|key| {
            let counter = Arc::clone(&counter);
            group.work(key, move || async move {
                tokio::time::sleep(Duration::from_millis(20)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                key.to_string()
            })
        });

        let results: Vec<String> = join_all(calls).await.into_iter().map(Result::unwrap).collect();
        assert_eq!(results, vec!["a", "b", "c"]);
        assert_eq!(counter.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_key_returns_to_idle_after_completion() {
        let counter = Arc::new(AtomicUsize::new(0));
        let group = SingleFlight::new();

        for _ in 0..3 {
            let counter = Arc::clone(&counter);
            group
                .work(1_u32, move || async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .await
                .unwrap();
        }

        assert_eq!(counter.load(Ordering::SeqCst), 3);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_errors_are_broadcast() {
        let group: SingleFlight<&str, Result<u32, String>> = SingleFlight::new();

        let calls = (0..5).map(|_| {
            group.work("key", || async {
                tokio::time::sleep(Duration::from_millis(20)).await;
                Err("boom".to_string())
            })
        });

        for result in join_all(calls).await {
            assert_eq!(result, Ok(Err("boom".to_string())));
        }
    }

    #[tokio::test]
    async fn test_abandoned_waiter_does_not_cancel_call() {
        let counter = Arc::new(AtomicUsize::new(0));
        let group = SingleFlight::new();

        let first = {
            let counter = Arc::clone(&counter);
            group.work("key", move || async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                counter.fetch_add(1, Ordering::SeqCst);
                42
            })
        };
        let timed_out = tokio::time::timeout(Duration::from_millis(5), first).await;
        assert!(timed_out.is_err());

        let joined = group.work("key", || async { 0 }).await;
        assert_eq!(joined, Ok(42));
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_runtime_shutdown_reports_cancelled() {
        let group: SingleFlight<&str, u32> = SingleFlight::new();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();

        let call = runtime.block_on(async {
            let mut call = Box::pin(group.work("key", || std::future::pending::<u32>()));
            assert!(futures::poll!(&mut call).is_pending());
            call
        });
        drop(runtime);

        assert_eq!(futures::executor::block_on(call), Err(Cancelled));
        assert_eq!(group.in_flight(), 0);
    }

    fn lengths(batch: &HashMap<&'static str, usize>, key: &&'static str) -> Option<usize> {
        batch.get(key).copied()
    }

    #[tokio::test]
    async fn test_batch_runs_once_for_overlapping_callers() {
        let counter = Arc::new(AtomicUsize::new(0));
        let group: SingleFlight<&'static str, Option<usize>> = SingleFlight::new();

        let calls = (0..10).map(|_| {
            let counter = Arc::clone(&counter);
            group.work_many(
                &["a", "bb"],
                move |keys| async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    keys.into_iter().map(|k| (k, k.len())).collect::<HashMap<_, _>>()
                },
                lengths,
            )
        });

        for results in join_all(calls).await {
            assert_eq!(results, vec![Ok(Some(1)), Ok(Some(2))]);
        }
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(group.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_batch_joins_point_calls_in_flight() {
        let group: SingleFlight<&'static str, Option<usize>> = SingleFlight::new();
        let batched = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let point = group.work("a", || async {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Some(100)
        });
        let batch = {
            let batched = Arc::clone(&batched);
            group.work_many(
                &["a", "ccc", "ccc"],
                move |keys| async move {
                    batched.lock().extend(keys.iter().copied());
                    keys.into_iter().map(|k| (k, k.len())).collect::<HashMap<_, _>>()
                },
                lengths,
            )
        };

        let (point, batch) = tokio::join!(point, batch);
        assert_eq!(point, Ok(Some(100)));
        assert_eq!(batch, vec![Ok(Some(100)), Ok(Some(3)), Ok(Some(3))]);
        assert_eq!(*batched.lock(), vec!["ccc"]);
    }

    #[tokio::test]
    async fn test_abandoned_batch_still_completes() {
        let counter = Arc::new(AtomicUsize::new(0));
        let group: SingleFlight<&'static str, Option<usize>> = SingleFlight::new();

        let first = {
            let counter = Arc::clone(&counter);
            group.work_many(
                &["a"],
                move |keys| async move {
                    tokio::time::sleep(Duration::from_millis(50)).await;
                    counter.fetch_add(1, Ordering::SeqCst);
                    keys.into_iter().map(|k| (k, 7)).collect::<HashMap<_, _>>()
                },
                lengths,
            )
        };
        assert!(tokio::time::timeout(Duration::from_millis(5), first).await.is_err());

        let joined = group.work("a", || async { None }).await;
        assert_eq!(joined, Ok(Some(7)));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(counter.load(Ordering::SeqCst), 1);
        assert_eq!(group.in_flight(), 0);
    }
}
