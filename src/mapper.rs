//! The bounded-concurrency mapper.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures::{FutureExt, Stream};
use tokio::sync::mpsc;
use tokio::task::{JoinHandle, JoinSet};

use crate::metrics::MapperMetrics;
use crate::source::Source;
use crate::worker::Worker;
use crate::{Error, Outcome, Result};

/// Progress counters shared between the driver task and the mapper handle.
///
/// The runtime schedules tasks across threads, so these are atomics; the
/// refill decision itself is serialized on the driver task.
#[derive(Debug, Default)]
struct Counters {
    processed: AtomicUsize,
    failed: AtomicUsize,
    in_flight: AtomicUsize,
}

/// Applies an async [`Worker`] to every item of a [`Source`] with at most
/// `limit` invocations in flight, yielding [`Outcome`]s as they complete.
///
/// Work starts eagerly on construction: a driver task is spawned immediately
/// and begins pulling items and launching workers, whether or not anyone is
/// consuming outcomes yet. Construction therefore requires a running Tokio
/// runtime.
///
/// Outcomes are delivered in *completion* order, not submission order, so a
/// slow item never holds up results that finished behind it. The sequence is
/// finite iff the source is finite, and is not restartable: once it has
/// ended, [`recv`](Self::recv) keeps returning `None`.
///
/// Dropping the mapper, or calling [`cancel`](Self::cancel), stops refilling
/// and aborts all in-flight workers.
///
/// # Example
///
/// ```rust
/// use each_limit::{BoundedMapper, IterSource, LambdaWorker};
///
/// # tokio_test::block_on(async {
/// let worker = LambdaWorker::new(|x: i32| async move {
///     Ok::<i32, each_limit::Error>(x * 2)
/// });
/// let mut mapper = BoundedMapper::new(IterSource::new(vec![1, 2, 3]), worker, 2).unwrap();
///
/// let mut doubled = Vec::new();
/// while let Some(outcome) = mapper.recv().await {
///     doubled.push(outcome.ok().unwrap());
/// }
/// doubled.sort_unstable();
/// assert_eq!(doubled, vec![2, 4, 6]);
/// assert_eq!(mapper.processed(), 3);
/// # });
/// ```
#[derive(Debug)]
pub struct BoundedMapper<I, T> {
    outcomes: mpsc::UnboundedReceiver<Outcome<I, T>>,
    counters: Arc<Counters>,
    driver: Option<JoinHandle<()>>,
}

impl<I, T> BoundedMapper<I, T>
where
    I: Clone + Send + 'static,
    T: Send + 'static,
{
    /// Create a mapper over `source` with at most `limit` concurrent worker
    /// invocations, delivering every outcome.
    ///
    /// Equivalent to `MapperBuilder::new(source, worker, limit).build()`.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidLimit`] when `limit` is zero, before any
    /// item is pulled from the source.
    pub fn new<S, W>(source: S, worker: W, limit: usize) -> Result<Self>
    where
        S: Source<Item = I> + 'static,
        W: Worker<Item = I, Output = T> + 'static,
    {
        MapperBuilder::new(source, worker, limit).build()
    }
}

impl<I, T> BoundedMapper<I, T> {
    /// Receive the next outcome, suspending until one completes or the
    /// mapper finishes.
    ///
    /// Returns `None` once the source is exhausted and every in-flight
    /// worker has settled. In discard mode this is the only thing it ever
    /// returns, once the mapper is done.
    pub async fn recv(&mut self) -> Option<Outcome<I, T>> {
        self.outcomes.recv().await
    }

    /// Worker invocations that have completed successfully so far.
    ///
    /// Monotonic and safe to read at any time; it is a final total only
    /// after [`join`](Self::join) has returned. Failed invocations are
    /// counted by [`failed`](Self::failed) instead.
    pub fn processed(&self) -> usize {
        self.counters.processed.load(Ordering::Relaxed)
    }

    /// Worker invocations that have failed (error or panic) so far.
    pub fn failed(&self) -> usize {
        self.counters.failed.load(Ordering::Relaxed)
    }

    /// Worker invocations currently running.
    pub fn in_flight(&self) -> usize {
        self.counters.in_flight.load(Ordering::Relaxed)
    }

    /// Get a snapshot of the current progress counters.
    #[must_use]
    pub fn metrics(&self) -> MapperMetrics {
        MapperMetrics {
            processed: self.processed(),
            failed: self.failed(),
            in_flight: self.in_flight(),
        }
    }

    /// Suspend until the source is exhausted and all workers have settled,
    /// without consuming any outcomes.
    ///
    /// The natural way to run a discard-mode mapper to completion. Never
    /// returns while a queue source is still open.
    pub async fn join(&mut self) {
        if let Some(driver) = self.driver.take() {
            // The only way the driver can fail is an abort; worker panics
            // are caught per item.
            let _ = driver.await;
        }
    }

    /// Stop pulling items and abort every in-flight worker.
    ///
    /// Outcomes already delivered to the buffer remain consumable; after
    /// they drain, [`recv`](Self::recv) returns `None`. The progress
    /// counters freeze at their values as of the cancellation.
    pub fn cancel(&mut self) {
        if let Some(driver) = self.driver.take() {
            driver.abort();
        }
    }
}

impl<I, T> Drop for BoundedMapper<I, T> {
    fn drop(&mut self) {
        if let Some(driver) = &self.driver {
            driver.abort();
        }
    }
}

impl<I, T> Stream for BoundedMapper<I, T> {
    type Item = Outcome<I, T>;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.get_mut().outcomes.poll_recv(cx)
    }
}

/// Builder for configuring and constructing a [`BoundedMapper`].
///
/// # Example
///
/// ```rust
/// use each_limit::{IterSource, LambdaWorker, MapperBuilder};
///
/// # tokio_test::block_on(async {
/// let worker = LambdaWorker::new(|_x: i32| async move {
///     Ok::<(), each_limit::Error>(())
/// });
/// let mut mapper = MapperBuilder::new(IterSource::new(vec![1, 2, 3]), worker, 2)
///     .discard_results(true)
///     .build()
///     .unwrap();
///
/// mapper.join().await;
/// assert_eq!(mapper.processed(), 3);
/// # });
/// ```
pub struct MapperBuilder<S, W> {
    source: S,
    worker: W,
    limit: usize,
    discard_results: bool,
}

impl<S, W> MapperBuilder<S, W>
where
    S: Source + 'static,
    S::Item: Clone + Send + 'static,
    W: Worker<Item = S::Item> + 'static,
    W::Output: Send + 'static,
{
    /// Create a builder for a mapper over `source` with at most `limit`
    /// concurrent invocations of `worker`.
    pub fn new(source: S, worker: W, limit: usize) -> Self {
        Self {
            source,
            worker,
            limit,
            discard_results: false,
        }
    }

    /// Drop outcomes instead of buffering them for consumption.
    ///
    /// Use when the mapper is run purely for the worker's side effects;
    /// progress is still observable through the counters, and
    /// [`BoundedMapper::join`] awaits completion.
    pub fn discard_results(mut self, discard: bool) -> Self {
        self.discard_results = discard;
        self
    }

    /// Validate the configuration and start the mapper.
    ///
    /// # Errors
    ///
    /// Fails with [`Error::InvalidLimit`] when the limit is zero. No item
    /// has been pulled from the source at that point.
    pub fn build(self) -> Result<BoundedMapper<S::Item, W::Output>> {
        if self.limit == 0 {
            return Err(Error::InvalidLimit(self.limit));
        }

        let counters = Arc::new(Counters::default());
        let (tx, rx) = mpsc::unbounded_channel();
        let driver = tokio::spawn(drive(
            self.source,
            Arc::new(self.worker),
            self.limit,
            self.discard_results,
            tx,
            Arc::clone(&counters),
        ));

        Ok(BoundedMapper {
            outcomes: rx,
            counters,
            driver: Some(driver),
        })
    }
}

/// The driver loop: pull while below the limit, settle completions as they
/// arrive, drain once the source is exhausted.
///
/// All refill decisions happen on this one task, so the cap cannot be
/// over-committed by racing completions. Worker tasks live in the
/// [`JoinSet`]; dropping the driver (via abort) cancels them with it.
async fn drive<S, W>(
    mut source: S,
    worker: Arc<W>,
    limit: usize,
    discard: bool,
    outcomes: mpsc::UnboundedSender<Outcome<S::Item, W::Output>>,
    counters: Arc<Counters>,
) where
    S: Source + 'static,
    S::Item: Clone + Send + 'static,
    W: Worker<Item = S::Item> + 'static,
    W::Output: Send + 'static,
{
    let mut in_flight: JoinSet<Outcome<S::Item, W::Output>> = JoinSet::new();
    let mut exhausted = false;

    tracing::debug!(limit, discard, "mapper started");

    loop {
        if !exhausted && !source.has_more() {
            exhausted = true;
            tracing::debug!("source exhausted, draining");
        }
        if exhausted && in_flight.is_empty() {
            break;
        }

        tokio::select! {
            item = source.pull(), if !exhausted && in_flight.len() < limit => {
                match item {
                    Some(item) => {
                        let worker = Arc::clone(&worker);
                        in_flight.spawn(async move {
                            let keep = item.clone();
                            match AssertUnwindSafe(worker.process(item)).catch_unwind().await {
                                Ok(Ok(value)) => Outcome::Success(value),
                                Ok(Err(error)) => Outcome::Failed { item: keep, error },
                                Err(payload) => Outcome::Failed {
                                    item: keep,
                                    error: Error::WorkerPanic(panic_message(payload)),
                                },
                            }
                        });
                        counters.in_flight.fetch_add(1, Ordering::Relaxed);
                        tracing::trace!(in_flight = in_flight.len(), "worker launched");
                    }
                    None => {
                        exhausted = true;
                        tracing::debug!("source exhausted, draining");
                    }
                }
            }
            Some(finished) = in_flight.join_next(), if !in_flight.is_empty() => {
                counters.in_flight.fetch_sub(1, Ordering::Relaxed);
                let outcome = match finished {
                    Ok(outcome) => outcome,
                    // Workers are only ever aborted together with this task.
                    Err(_) => continue,
                };
                match &outcome {
                    Outcome::Success(_) => {
                        counters.processed.fetch_add(1, Ordering::Relaxed);
                    }
                    Outcome::Failed { error, .. } => {
                        counters.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(%error, "worker failed");
                    }
                }
                if !discard && outcomes.send(outcome).is_err() {
                    tracing::debug!("consumer gone, stopping");
                    return;
                }
            }
        }
    }

    tracing::debug!(
        processed = counters.processed.load(Ordering::Relaxed),
        failed = counters.failed.load(Ordering::Relaxed),
        "mapper complete"
    );
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{IterSource, LambdaWorker, QueueSource};

    use std::sync::Mutex;
    use std::time::Duration;

    use async_trait::async_trait;
    use futures::StreamExt;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_doubles_all_items() {
        let worker = LambdaWorker::new(|x: i32| async move { Ok::<i32, Error>(x * 2) });
        let mut mapper =
            BoundedMapper::new(IterSource::new(vec![1, 2, 3, 4, 5]), worker, 2).unwrap();

        let mut results = Vec::new();
        while let Some(outcome) = mapper.recv().await {
            results.push(outcome.ok().unwrap());
        }
        results.sort_unstable();

        assert_eq!(results, vec![2, 4, 6, 8, 10]);
        assert_eq!(mapper.processed(), 5);
        assert_eq!(mapper.failed(), 0);
        // Not restartable: the sequence stays ended.
        assert!(mapper.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_empty_source_ends_immediately() {
        let worker = LambdaWorker::new(|x: i32| async move { Ok::<i32, Error>(x) });
        let mut mapper = BoundedMapper::new(IterSource::new(Vec::<i32>::new()), worker, 4).unwrap();

        assert!(mapper.recv().await.is_none());
        assert_eq!(mapper.processed(), 0);
    }

    #[tokio::test]
    async fn test_zero_limit_rejected() {
        let worker = LambdaWorker::new(|x: i32| async move { Ok::<i32, Error>(x) });
        let err = BoundedMapper::new(IterSource::new(vec![1]), worker, 0).unwrap_err();
        assert!(matches!(err, Error::InvalidLimit(0)));
    }

    #[tokio::test]
    async fn test_limit_larger_than_source() {
        let worker = LambdaWorker::new(|x: i32| async move { Ok::<i32, Error>(x) });
        let mut mapper = BoundedMapper::new(IterSource::new(vec![1, 2, 3]), worker, 10).unwrap();

        let mut count = 0;
        while mapper.recv().await.is_some() {
            count += 1;
        }
        assert_eq!(count, 3);
        assert_eq!(mapper.processed(), 3);
    }

    #[tokio::test]
    async fn test_exhaustion_at_any_limit() {
        for limit in [1, 2, 3, 5, 8] {
            let worker = LambdaWorker::new(|x: u32| async move { Ok::<u32, Error>(x) });
            let mut mapper = BoundedMapper::new(IterSource::new(0..5u32), worker, limit).unwrap();
            mapper.join().await;
            assert_eq!(mapper.processed(), 5, "limit {limit}");
        }
    }

    #[tokio::test]
    async fn test_failure_is_tagged_not_fatal() {
        let worker = LambdaWorker::new(|x: i32| async move {
            if x == 2 {
                Err(Error::from("bad input"))
            } else {
                Ok(x)
            }
        });
        let mut mapper = BoundedMapper::new(IterSource::new(vec![1, 2, 3]), worker, 3).unwrap();

        let mut succeeded = Vec::new();
        let mut failed = Vec::new();
        while let Some(outcome) = mapper.recv().await {
            match outcome {
                Outcome::Success(value) => succeeded.push(value),
                Outcome::Failed { item, error } => {
                    assert_eq!(error.to_string(), "bad input");
                    failed.push(item);
                }
            }
        }
        succeeded.sort_unstable();

        assert_eq!(succeeded, vec![1, 3]);
        assert_eq!(failed, vec![2]);
        assert_eq!(mapper.processed(), 2);
        assert_eq!(mapper.failed(), 1);
    }

    #[tokio::test]
    async fn test_worker_panic_is_isolated() {
        let worker = LambdaWorker::new(|x: i32| async move {
            if x == 2 {
                panic!("boom on {x}");
            }
            Ok::<i32, Error>(x)
        });
        let mut mapper = BoundedMapper::new(IterSource::new(vec![1, 2, 3]), worker, 1).unwrap();

        let mut succeeded = Vec::new();
        let mut panicked = Vec::new();
        while let Some(outcome) = mapper.recv().await {
            match outcome {
                Outcome::Success(value) => succeeded.push(value),
                Outcome::Failed { item, error } => {
                    assert!(matches!(&error, Error::WorkerPanic(msg) if msg.contains("boom")));
                    panicked.push(item);
                }
            }
        }

        assert_eq!(succeeded, vec![1, 3]);
        assert_eq!(panicked, vec![2]);
        assert_eq!(mapper.failed(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cap_never_exceeded() {
        let live = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let worker = {
            let live = Arc::clone(&live);
            let peak = Arc::clone(&peak);
            LambdaWorker::new(move |x: u32| {
                let live = Arc::clone(&live);
                let peak = Arc::clone(&peak);
                async move {
                    let now = live.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    sleep(Duration::from_millis(10)).await;
                    live.fetch_sub(1, Ordering::SeqCst);
                    Ok::<u32, Error>(x)
                }
            })
        };

        let mut mapper = BoundedMapper::new(IterSource::new(0..20u32), worker, 3).unwrap();
        while mapper.recv().await.is_some() {}

        assert_eq!(peak.load(Ordering::SeqCst), 3);
        assert_eq!(mapper.processed(), 20);
    }

    #[tokio::test]
    async fn test_each_item_seen_exactly_once() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let worker = {
            let seen = Arc::clone(&seen);
            LambdaWorker::new(move |x: u32| {
                let seen = Arc::clone(&seen);
                async move {
                    seen.lock().unwrap().push(x);
                    Ok::<(), Error>(())
                }
            })
        };

        let mut mapper = BoundedMapper::new(IterSource::new(0..50u32), worker, 7).unwrap();
        mapper.join().await;

        let mut seen = seen.lock().unwrap().clone();
        seen.sort_unstable();
        assert_eq!(seen, (0..50u32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_discard_mode_still_counts() {
        let worker = LambdaWorker::new(|x: i32| async move { Ok::<i32, Error>(x) });
        let mut mapper = MapperBuilder::new(IterSource::new(vec![1, 2, 3, 4]), worker, 2)
            .discard_results(true)
            .build()
            .unwrap();

        mapper.join().await;

        assert_eq!(mapper.processed(), 4);
        // Nothing is ever surfaced in discard mode.
        assert!(mapper.recv().await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_results_arrive_in_completion_order() {
        let worker = LambdaWorker::new(|ms: u64| async move {
            sleep(Duration::from_millis(ms)).await;
            Ok::<u64, Error>(ms)
        });
        let mut mapper = BoundedMapper::new(IterSource::new(vec![30, 10, 20]), worker, 3).unwrap();

        let mut order = Vec::new();
        while let Some(outcome) = mapper.recv().await {
            order.push(outcome.ok().unwrap());
        }
        assert_eq!(order, vec![10, 20, 30]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_cap_of_one_serializes() {
        let events = Arc::new(Mutex::new(Vec::new()));
        let worker = {
            let events = Arc::clone(&events);
            LambdaWorker::new(move |name: &'static str| {
                let events = Arc::clone(&events);
                async move {
                    events.lock().unwrap().push(format!("start {name}"));
                    sleep(Duration::from_millis(10)).await;
                    events.lock().unwrap().push(format!("end {name}"));
                    Ok::<&'static str, Error>(name)
                }
            })
        };

        let (sender, source) = QueueSource::channel();
        let mut mapper = BoundedMapper::new(source, worker, 1).unwrap();

        // Both queued before either worker can finish.
        sender.push("a").unwrap();
        sender.push("b").unwrap();

        assert_eq!(mapper.recv().await.unwrap().ok(), Some("a"));
        assert_eq!(mapper.recv().await.unwrap().ok(), Some("b"));
        drop(sender);
        assert!(mapper.recv().await.is_none());

        let events = events.lock().unwrap();
        assert_eq!(*events, vec!["start a", "end a", "start b", "end b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_queue_wakes_after_draining() {
        let worker = LambdaWorker::new(|x: u32| async move { Ok::<u32, Error>(x) });
        let (sender, source) = QueueSource::channel();
        let mut mapper = BoundedMapper::new(source, worker, 2).unwrap();

        sender.push(1).unwrap();
        assert_eq!(mapper.recv().await.unwrap().ok(), Some(1));

        // Fully drained, nothing in flight; a late push alone must restart work.
        sleep(Duration::from_millis(1)).await;
        assert_eq!(mapper.in_flight(), 0);

        sender.push(2).unwrap();
        assert_eq!(mapper.recv().await.unwrap().ok(), Some(2));

        drop(sender);
        assert!(mapper.recv().await.is_none());
        assert_eq!(mapper.processed(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_starts_eagerly_without_consumer() {
        let worker = LambdaWorker::new(|x: i32| async move { Ok::<i32, Error>(x) });
        let mapper = BoundedMapper::new(IterSource::new(vec![1, 2, 3]), worker, 2).unwrap();

        // No recv() calls at all; the driver makes progress on its own.
        sleep(Duration::from_millis(1)).await;
        assert_eq!(mapper.processed(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_aborts_in_flight() {
        let worker = LambdaWorker::new(|x: i32| async move {
            sleep(Duration::from_secs(3600)).await;
            Ok::<i32, Error>(x)
        });
        let mut mapper = BoundedMapper::new(IterSource::new(vec![1, 2, 3]), worker, 2).unwrap();

        sleep(Duration::from_millis(1)).await;
        assert_eq!(mapper.in_flight(), 2);

        mapper.cancel();
        assert!(mapper.recv().await.is_none());
        assert_eq!(mapper.processed(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_drop_stops_workers() {
        let completions = Arc::new(AtomicUsize::new(0));
        let worker = {
            let completions = Arc::clone(&completions);
            LambdaWorker::new(move |x: i32| {
                let completions = Arc::clone(&completions);
                async move {
                    sleep(Duration::from_millis(10)).await;
                    completions.fetch_add(1, Ordering::SeqCst);
                    Ok::<i32, Error>(x)
                }
            })
        };
        let mapper = BoundedMapper::new(IterSource::new(vec![1, 2, 3]), worker, 3).unwrap();

        sleep(Duration::from_millis(1)).await;
        drop(mapper);

        sleep(Duration::from_millis(100)).await;
        assert_eq!(completions.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_stream_interface() {
        let worker = LambdaWorker::new(|x: i32| async move { Ok::<i32, Error>(x + 1) });
        let mapper = BoundedMapper::new(IterSource::new(vec![1, 2, 3]), worker, 2).unwrap();

        let mut results: Vec<i32> = mapper.map(|outcome| outcome.ok().unwrap()).collect().await;
        results.sort_unstable();
        assert_eq!(results, vec![2, 3, 4]);
    }

    #[tokio::test]
    async fn test_metrics_snapshot_after_completion() {
        let worker = LambdaWorker::new(|x: i32| async move {
            if x % 2 == 0 {
                Err(Error::from("even"))
            } else {
                Ok(x)
            }
        });
        let mut mapper = BoundedMapper::new(IterSource::new(vec![1, 2, 3, 4, 5]), worker, 2).unwrap();
        while mapper.recv().await.is_some() {}

        let metrics = mapper.metrics();
        assert_eq!(metrics.processed, 3);
        assert_eq!(metrics.failed, 2);
        assert_eq!(metrics.in_flight, 0);
        assert_eq!(metrics.settled(), 5);
        assert!(metrics.has_failures());
    }

    #[tokio::test]
    async fn test_custom_worker_impl() {
        struct Doubler;

        #[async_trait]
        impl Worker for Doubler {
            type Item = u8;
            type Output = u16;

            async fn process(&self, item: u8) -> Result<u16> {
                Ok(u16::from(item) * 2)
            }
        }

        let mut mapper = BoundedMapper::new(IterSource::new(vec![10u8, 20]), Doubler, 2).unwrap();
        let mut results = Vec::new();
        while let Some(outcome) = mapper.recv().await {
            results.push(outcome.ok().unwrap());
        }
        results.sort_unstable();
        assert_eq!(results, vec![20u16, 40]);
    }
}
