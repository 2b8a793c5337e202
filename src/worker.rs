//! The per-item computation applied by a mapper.
//!
//! This module defines the [`Worker`] trait — the async function a mapper
//! applies to each item — along with [`LambdaWorker`] for closure-based
//! workers.

use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;

use crate::Result;

/// An asynchronous computation applied to each item pulled from a source.
///
/// A worker may suspend internally (network, disk, timers). It is invoked
/// once per consumed item and must tolerate concurrent invocations; if it
/// carries state that is not safe to share, that is a contract violation by
/// the caller, not something the mapper enforces.
///
/// # Example
///
/// ```rust
/// use each_limit::LambdaWorker;
///
/// let double = LambdaWorker::new(|x: i32| async move {
///     Ok::<i32, each_limit::Error>(x * 2)
/// });
/// ```
#[async_trait]
pub trait Worker: Send + Sync {
    /// The item type this worker consumes.
    type Item: Send;
    /// The value produced per item.
    type Output: Send;

    /// Process one item.
    ///
    /// An `Err` here fails that single item only; the mapper keeps going.
    async fn process(&self, item: Self::Item) -> Result<Self::Output>;
}

/// A worker constructed from a closure or function pointer.
///
/// The type parameters `I` and `O` encode the item and output types,
/// while `F` is the concrete closure type.
///
/// # Example
///
/// ```rust
/// use each_limit::LambdaWorker;
///
/// let shout = LambdaWorker::new(|s: String| async move {
///     Ok::<String, each_limit::Error>(s.to_uppercase())
/// });
/// ```
pub struct LambdaWorker<I, O, F> {
    f: F,
    _phantom: PhantomData<fn(I) -> O>,
}

impl<I, O, F, Fut> LambdaWorker<I, O, F>
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    I: Send + 'static,
    O: Send + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
{
    /// Create a new `LambdaWorker` from the given closure.
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<F, I, O, Fut> Worker for LambdaWorker<I, O, F>
where
    F: Fn(I) -> Fut + Send + Sync + 'static,
    I: Send + 'static,
    O: Send + 'static,
    Fut: Future<Output = Result<O>> + Send + 'static,
{
    type Item = I;
    type Output = O;

    async fn process(&self, item: I) -> Result<O> {
        (self.f)(item).await
    }
}
