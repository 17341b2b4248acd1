//! Aggregation of single-item calls into bulk backend calls.
//!
//! Many backends are far cheaper to call once for N items than N times for one item.
//! [`BulkCall`] exposes a per-item [`invoke`](BulkCall::invoke) while a background
//! dispatcher groups concurrent invocations into batches of at most `size` items, or
//! whatever arrived within `delay` of the first item of a batch.
//!
//! All tasks of a batch share its fate: a failing command or a result list of the wrong
//! length fails every task of that batch with the same error.

use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, OwnedSemaphorePermit, Semaphore};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

use crate::error::BulkCallError;

/// Result delivered to a single invocation.
pub type BulkResult<R, E> = Result<Option<R>, BulkCallError<E>>;

type BulkCommand<T, R, E> =
    Arc<dyn Fn(Vec<T>) -> BoxFuture<'static, Result<Option<Vec<R>>, E>> + Send + Sync>;

struct Task<T, R, E> {
    item: T,
    reply: oneshot::Sender<BulkResult<R, E>>,
}

/// A per-item facade over a bulk command.
///
/// The command receives the items of one batch in submission order and must return
/// either `None` (every task resolves to `None`) or exactly one result per item, in
/// the same order.
///
/// The dispatcher task is started lazily on the first [`invoke`](Self::invoke) and stops
/// once the `BulkCall` is dropped and its queue is drained.
pub struct BulkCall<T, R, E> {
    command: BulkCommand<T, R, E>,
    size: usize,
    delay: Duration,
    concurrency: Option<Arc<Semaphore>>,
    queue: Mutex<Option<mpsc::UnboundedSender<Task<T, R, E>>>>,
}

impl<T, R, E> BulkCall<T, R, E>
where
    T: Send + 'static,
    R: Send + 'static,
    E: Send + Sync + 'static,
{
    /// Wrap `command`, batching up to `size` items or waiting at most `delay` per batch.
    ///
    /// A `size` of zero is treated as one.
    pub fn new<F, Fut>(command: F, size: usize, delay: Duration) -> Self
    where
        F: Fn(Vec<T>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Vec<R>>, E>> + Send + 'static,
    {
        Self {
            command: Arc::new(move |items| command(items).boxed()),
            size: size.max(1),
            delay,
            concurrency: None,
            queue: Mutex::new(None),
        }
    }

    /// Bound the number of bulk commands in flight at the same time.
    #[must_use]
    pub fn with_concurrency(mut self, concurrent: usize) -> Self {
        self.concurrency = Some(Arc::new(Semaphore::new(concurrent.max(1))));
        self
    }

    /// Maximum number of items per batch.
    #[must_use]
    pub const fn size(&self) -> usize {
        self.size
    }

    /// Maximum time a batch waits for more items.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Queue `item` and wait for its result from the next batch.
    ///
    /// # Errors
    ///
    /// Returns the batch error shared by all tasks of the batch `item` ended up in.
    pub async fn invoke(&self, item: T) -> BulkResult<R, E> {
        let (reply, result) = oneshot::channel();
        self.sender()
            .send(Task { item, reply })
            .map_err(|_| BulkCallError::Closed)?;
        result.await.map_err(|_| BulkCallError::Closed)?
    }

    /// Return the queue sender, starting the dispatcher if it is not running.
    fn sender(&self) -> mpsc::UnboundedSender<Task<T, R, E>> {
        let mut queue = self.queue.lock();
        if let Some(sender) = queue.as_ref().filter(|sender| !sender.is_closed()) {
            return sender.clone();
        }

        let (sender, receiver) = mpsc::unbounded_channel();
        tokio::spawn(dispatch(
            receiver,
            Arc::clone(&self.command),
            self.size,
            self.delay,
            self.concurrency.clone(),
        ));
        debug!(size = self.size, delay = ?self.delay, "started bulk call dispatcher");
        *queue = Some(sender.clone());
        sender
    }
}

impl<T, R, E> fmt::Debug for BulkCall<T, R, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BulkCall")
            .field("size", &self.size)
            .field("delay", &self.delay)
            .field("concurrent", &self.concurrency.as_ref().map(|s| s.available_permits()))
            .finish_non_exhaustive()
    }
}

async fn dispatch<T, R, E>(
    mut receiver: mpsc::UnboundedReceiver<Task<T, R, E>>,
    command: BulkCommand<T, R, E>,
    size: usize,
    delay: Duration,
    concurrency: Option<Arc<Semaphore>>,
) where
    T: Send + 'static,
    R: Send + 'static,
    E: Send + Sync + 'static,
{
    while let Some(first) = receiver.recv().await {
        let mut batch = Vec::with_capacity(size);
        batch.push(first);

        // The deadline is fixed by the first item so a trickle of items cannot stall a batch.
        let deadline = Instant::now() + delay;
        while batch.len() < size {
            match timeout_at(deadline, receiver.recv()).await {
                Ok(Some(task)) => batch.push(task),
                Ok(None) | Err(_) => break,
            }
        }

        let permit = match &concurrency {
            Some(semaphore) => match Arc::clone(semaphore).acquire_owned().await {
                Ok(permit) => Some(permit),
                Err(_) => break,
            },
            None => None,
        };

        let (items, replies): (Vec<T>, Vec<_>) =
            batch.into_iter().map(|task| (task.item, task.reply)).unzip();
        debug!(batch_size = items.len(), "dispatching bulk call");

        // The command is called here so batches are numbered in dispatch order; only
        // awaiting its future happens concurrently.
        let call = command(items);
        tokio::spawn(complete(call, replies, permit));
    }
}

async fn complete<R, E>(
    call: BoxFuture<'static, Result<Option<Vec<R>>, E>>,
    replies: Vec<oneshot::Sender<BulkResult<R, E>>>,
    _permit: Option<OwnedSemaphorePermit>,
) {
    match call.await {
        Ok(None) => {
            for reply in replies {
                let _ = reply.send(Ok(None));
            }
        }
        Ok(Some(results)) if results.len() == replies.len() => {
            for (reply, result) in replies.into_iter().zip(results) {
                let _ = reply.send(Ok(Some(result)));
            }
        }
        Ok(Some(results)) => {
            let (expected, got) = (replies.len(), results.len());
            warn!(expected, got, "bulk command returned wrong number of results");
            fail_all(replies, &BulkCallError::LengthMismatch { expected, got });
        }
        Err(err) => {
            debug!(batch_size = replies.len(), "bulk command failed");
            fail_all(replies, &BulkCallError::Command(Arc::new(err)));
        }
    }
}

fn fail_all<R, E>(replies: Vec<oneshot::Sender<BulkResult<R, E>>>, error: &BulkCallError<E>) {
    for reply in replies {
        let _ = reply.send(Err(error.clone()));
    }
}
