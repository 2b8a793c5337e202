//! # each-limit
//!
//! Bounded-concurrency async mapping over finite sequences and unbounded
//! queues, for the Tokio runtime.
//!
//! A [`BoundedMapper`] pulls items from a [`Source`], applies an async
//! [`Worker`] to each with at most N invocations in flight, and yields
//! per-item [`Outcome`]s as they complete. The concurrency cap holds no
//! matter how long individual invocations take, and one failing item never
//! stops the rest.
//!
//! ## Core Concepts
//!
//! - **Source**: where items come from — [`IterSource`] (finite) or
//!   [`QueueSource`] (unbounded, fed through a [`QueueSender`])
//! - **Worker**: the async function applied to each item, with
//!   [`LambdaWorker`] for closures
//! - **BoundedMapper**: the eager driver enforcing the concurrency cap
//! - **Outcome**: a tagged per-item result — success, or failure with the
//!   original item attached
//! - **MapperMetrics**: a snapshot of processed/failed/in-flight counters
//!
//! ## Example: map a sequence with a cap of 2
//!
//! ```rust
//! use each_limit::{BoundedMapper, IterSource, LambdaWorker};
//!
//! # tokio_test::block_on(async {
//! let worker = LambdaWorker::new(|x: i32| async move {
//!     Ok::<i32, each_limit::Error>(x * 2)
//! });
//! let mut mapper = BoundedMapper::new(
//!     IterSource::new(vec![1, 2, 3, 4, 5]),
//!     worker,
//!     2,
//! ).unwrap();
//!
//! let mut doubled = Vec::new();
//! while let Some(outcome) = mapper.recv().await {
//!     doubled.push(outcome.ok().unwrap());
//! }
//! doubled.sort_unstable();
//!
//! assert_eq!(doubled, vec![2, 4, 6, 8, 10]);
//! assert_eq!(mapper.processed(), 5);
//! # });
//! ```
//!
//! ## Example: feed a live queue
//!
//! ```rust
//! use each_limit::{BoundedMapper, LambdaWorker, QueueSource};
//!
//! # tokio_test::block_on(async {
//! let worker = LambdaWorker::new(|job: String| async move {
//!     Ok::<usize, each_limit::Error>(job.len())
//! });
//! let (sender, source) = QueueSource::channel();
//! let mut mapper = BoundedMapper::new(source, worker, 4).unwrap();
//!
//! sender.push("fetch".to_string()).unwrap();
//! sender.push("resize".to_string()).unwrap();
//! drop(sender); // close the queue so the mapper completes
//!
//! let mut lengths = Vec::new();
//! while let Some(outcome) = mapper.recv().await {
//!     lengths.push(outcome.ok().unwrap());
//! }
//! lengths.sort_unstable();
//! assert_eq!(lengths, vec![5, 6]);
//! # });
//! ```

pub mod error;
pub mod mapper;
pub mod metrics;
pub mod outcome;
pub mod source;
pub mod worker;

pub use error::{Error, Result};
pub use mapper::{BoundedMapper, MapperBuilder};
pub use metrics::MapperMetrics;
pub use outcome::Outcome;
pub use source::{IterSource, QueueSender, QueueSource, Source};
pub use worker::{LambdaWorker, Worker};
