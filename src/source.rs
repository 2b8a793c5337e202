//! Item sources feeding a mapper.
//!
//! A [`Source`] supplies the items a mapper consumes. Two shapes are
//! provided: [`IterSource`] for a finite sequence whose length is known
//! upfront, and [`QueueSource`] for an unbounded queue whose items arrive
//! over time. The mapper itself is variant-agnostic: it only ever calls
//! [`Source::has_more`] and [`Source::pull`].

use std::collections::VecDeque;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::{Error, Result};

/// Supplies items to a mapper.
///
/// A source is exclusively owned by the mapper for the duration of its
/// lifetime. Exhaustion is signalled by `pull` returning `None`, which is
/// distinct from any valid item value.
#[async_trait]
pub trait Source: Send {
    /// The item type supplied by this source.
    type Item: Send;

    /// Whether another item may still be produced.
    ///
    /// Must be synchronous and non-blocking. A queue-backed source answers
    /// `true` until it has observed its feeding side close.
    fn has_more(&self) -> bool;

    /// Take the next item, suspending until one is available.
    ///
    /// Returns `None` once the source is exhausted, and keeps returning
    /// `None` on every call after that.
    async fn pull(&mut self) -> Option<Self::Item>;
}

/// A finite source backed by an in-memory sequence.
///
/// # Example
///
/// ```rust
/// use each_limit::{IterSource, Source};
///
/// # tokio_test::block_on(async {
/// let mut source = IterSource::new(vec![1, 2]);
/// assert!(source.has_more());
/// assert_eq!(source.pull().await, Some(1));
/// assert_eq!(source.pull().await, Some(2));
/// assert!(!source.has_more());
/// assert_eq!(source.pull().await, None);
/// # });
/// ```
#[derive(Debug)]
pub struct IterSource<T> {
    items: VecDeque<T>,
}

impl<T> IterSource<T> {
    /// Create a source over the given items, preserving their order.
    pub fn new(items: impl IntoIterator<Item = T>) -> Self {
        Self {
            items: items.into_iter().collect(),
        }
    }

    /// Number of items not yet pulled.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether every item has been pulled.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl<T> From<Vec<T>> for IterSource<T> {
    fn from(items: Vec<T>) -> Self {
        Self::new(items)
    }
}

#[async_trait]
impl<T: Send> Source for IterSource<T> {
    type Item = T;

    fn has_more(&self) -> bool {
        !self.items.is_empty()
    }

    async fn pull(&mut self) -> Option<T> {
        self.items.pop_front()
    }
}

/// An unbounded queue source fed externally through a [`QueueSender`].
///
/// `pull` suspends until an item is pushed. The source becomes exhausted
/// once every sender has been dropped and the queue has drained, at which
/// point a mapper consuming it completes like any finite source.
#[derive(Debug)]
pub struct QueueSource<T> {
    rx: mpsc::UnboundedReceiver<T>,
    done: bool,
}

impl<T> QueueSource<T> {
    /// Create a queue source along with the sender half that feeds it.
    pub fn channel() -> (QueueSender<T>, QueueSource<T>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (QueueSender { tx }, QueueSource { rx, done: false })
    }
}

#[async_trait]
impl<T: Send> Source for QueueSource<T> {
    type Item = T;

    fn has_more(&self) -> bool {
        !self.done
    }

    async fn pull(&mut self) -> Option<T> {
        if self.done {
            return None;
        }
        let item = self.rx.recv().await;
        if item.is_none() {
            self.done = true;
        }
        item
    }
}

/// The feeding half of a [`QueueSource`].
///
/// Cloneable; pushing never blocks. Pushes fail once the consuming side
/// (the source, or the mapper that owns it) is gone.
///
/// # Example
///
/// ```rust
/// use each_limit::QueueSource;
///
/// let (sender, source) = QueueSource::channel();
/// sender.push("job").unwrap();
/// drop(sender); // closes the queue; `source` drains then reports exhaustion
/// # let _ = source;
/// ```
#[derive(Debug, Clone)]
pub struct QueueSender<T> {
    tx: mpsc::UnboundedSender<T>,
}

impl<T> QueueSender<T> {
    /// Push an item into the queue.
    ///
    /// # Errors
    ///
    /// Returns [`Error::QueueClosed`] if the consuming side has been dropped.
    pub fn push(&self, item: T) -> Result<()> {
        self.tx.send(item).map_err(|_| Error::QueueClosed)
    }
}
