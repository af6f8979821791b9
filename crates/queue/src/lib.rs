//! Bounded-concurrency task queue.
//!
//! A [`BoundedQueue`] admits at most `max` concurrently-running tasks;
//! the rest wait on a fair semaphore, so admission is FIFO by submission
//! order. Completion order is whatever the underlying futures finish in.
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

use std::fmt::Debug;
use std::future::Future;
use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinSet;
use tracing::warn;

/// Errors surfaced by [`BoundedQueue::join`].
#[derive(Debug, Error)]
pub enum Error<E>
where
    E: Debug + std::error::Error,
{
    /// A task returned an error.
    #[error("task failed: {0}")]
    Task(E),

    /// A task panicked; the panic is captured, not propagated.
    #[error("task panicked")]
    Panicked,
}

/// A bounded-concurrency task runner.
///
/// A pushed task takes a semaphore permit before it is spawned and holds
/// it for the duration of its run, capping concurrency at the configured
/// maximum; `push` waits when all permits are taken.
#[derive(Debug)]
pub struct BoundedQueue<E>
where
    E: Debug + std::error::Error + Send + 'static,
{
    semaphore: Arc<Semaphore>,
    tasks: Mutex<JoinSet<Result<(), E>>>,
}

impl<E> BoundedQueue<E>
where
    E: Debug + std::error::Error + Send + 'static,
{
    /// Creates a queue admitting at most `max` concurrent tasks.
    #[must_use]
    pub fn new(max: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max)),
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Submits a task, waiting for a permit first so admission follows
    /// submission order.
    pub async fn push<F>(&self, task: F)
    where
        F: Future<Output = Result<(), E>> + Send + 'static,
    {
        // The queue never closes its semaphore; acquisition only fails
        // during runtime teardown, in which case run unthrottled.
        let permit = self.semaphore.clone().acquire_owned().await.ok();
        self.tasks.lock().await.spawn(async move {
            let _permit = permit;
            task.await
        });
    }

    /// Waits for every submitted task and resolves exactly once: `Ok(())`
    /// when all tasks succeeded, otherwise the first error observed.
    /// Errors after the first are absorbed; a panicking task becomes
    /// [`Error::Panicked`] rather than crashing the join.
    pub async fn join(self) -> Result<(), Error<E>> {
        let mut tasks = self.tasks.into_inner();
        let mut first_err = None;

        while let Some(completed) = tasks.join_next().await {
            let err = match completed {
                Ok(Ok(())) => continue,
                Ok(Err(task_err)) => Error::Task(task_err),
                Err(join_err) => {
                    warn!("queued task panicked: {join_err}");
                    Error::Panicked
                }
            };
            if first_err.is_none() {
                first_err = Some(err);
            }
        }

        match first_err {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}
