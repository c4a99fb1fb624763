//! # Thread pool
//!
//! Module dedicated to thread pool management. The [`ThreadPool`] is
//! the main structure of this module: it spawns n threads and
//! transfers tasks to them using an unbounded channel. The receiver
//! part is shared accross all threads in a mutex, this way only one
//! thread can wait for a task at a time. When a thread receives a
//! task, it releases the lock and an other thread can wait for the
//! next task.
//!
//! Each thread owns its own context, built once when the pool is
//! built and closed once when the pool is closed. A task is a
//! function that takes a [`ThreadPoolContextBuilder::Context`] and
//! returns a future. The easiest way to build a pool is to use the
//! [`ThreadPoolBuilder`].

mod error;

use std::{num::NonZeroUsize, pin::Pin, sync::Arc, thread::available_parallelism};

use async_trait::async_trait;
use futures::{lock::Mutex, stream::FuturesUnordered, Future, StreamExt};
use tokio::{
    sync::{mpsc, oneshot},
    task::JoinHandle,
};
use tracing::{debug, trace};

#[doc(inline)]
pub use self::error::{Error, Result};
use crate::AnyResult;

/// The thread pool task.
pub type ThreadPoolTask<C> =
    Box<dyn FnOnce(Arc<C>) -> Pin<Box<dyn Future<Output = ()> + Send>> + Send + Sync>;

/// The thread pool.
pub struct ThreadPool<C: ThreadPoolContext> {
    /// Channel used to send tasks to threads.
    tx: mpsc::UnboundedSender<ThreadPoolTask<C>>,

    /// The contexts owned by threads, kept for closing them.
    ctxs: Vec<Arc<C>>,

    /// The list of threads spawned by the pool.
    threads: Vec<JoinHandle<()>>,
}

impl<C> ThreadPool<C>
where
    C: ThreadPoolContext + 'static,
{
    /// The number of threads of the pool.
    pub fn size(&self) -> usize {
        self.threads.len()
    }

    /// Execute the given task and await for its output.
    ///
    /// The task is sent to the pool channel and will be executed by
    /// the first available thread.
    pub async fn exec<F, T>(&self, task: impl FnOnce(Arc<C>) -> F + Send + Sync + 'static) -> Result<T>
    where
        F: Future<Output = T> + Send + 'static,
        T: Send + 'static,
    {
        let (tx, rx) = oneshot::channel();

        let task: ThreadPoolTask<C> = Box::new(move |ctx| {
            Box::pin(async move {
                let output = task(ctx).await;
                // the caller may not wait for the output anymore
                let _ = tx.send(output);
            })
        });

        self.tx.send(task).map_err(|_| Error::SendTaskError)?;
        rx.await.map_err(|_| Error::ReceiveTaskOutputError)
    }

    /// Close the pool.
    ///
    /// Stops dispatching tasks, waits for threads to finish their
    /// current task then closes all contexts.
    pub async fn close(self) {
        let Self { tx, ctxs, threads } = self;

        debug!("closing pool…");
        drop(tx);

        for (id, thread) in threads.into_iter().enumerate() {
            let id = id + 1;

            match thread.await {
                Ok(()) => debug!(id, "thread stopped"),
                Err(err) => debug!(id, info = err.to_string(), "thread aborted"),
            }
        }

        for ctx in ctxs {
            ctx.close().await;
        }

        debug!("pool closed");
    }
}

/// The thread pool builder.
///
/// Builder that help you to create a [`ThreadPool`].
#[derive(Clone)]
pub struct ThreadPoolBuilder<B: ThreadPoolContextBuilder> {
    /// The context builder.
    ctx_builder: B,

    /// The size of the pool.
    ///
    /// Represents the number of threads that will be spawn in
    /// parallel. Defaults to the number of available CPUs.
    size: usize,
}

impl<B: ThreadPoolContextBuilder + 'static> ThreadPoolBuilder<B> {
    /// Create a new thread pool builder with a context builder.
    pub fn new(ctx_builder: B) -> Self {
        Self {
            ctx_builder,
            size: available_parallelism().map_or(1, NonZeroUsize::get),
        }
    }

    /// Change the thread pool size.
    ///
    /// A pool has at least one thread.
    pub fn set_some_size(&mut self, size: Option<usize>) {
        if let Some(size) = size {
            self.size = size.max(1);
        }
    }

    /// Change the thread pool size.
    pub fn set_size(&mut self, size: usize) {
        self.set_some_size(Some(size));
    }

    /// Change the thread pool size using the builder pattern.
    pub fn with_some_size(mut self, size: Option<usize>) -> Self {
        self.set_some_size(size);
        self
    }

    /// Change the thread pool size using the builder pattern.
    pub fn with_size(mut self, size: usize) -> Self {
        self.set_size(size);
        self
    }

    /// Build the final thread pool.
    ///
    /// Contexts are built in parallel. If one of them cannot be
    /// built, the ones already built are closed.
    pub async fn build(self) -> Result<ThreadPool<B::Context>> {
        let size = self.size;
        debug!(size, "creating pool");

        let ctxs = FuturesUnordered::from_iter(
            (0..size).map(|_| tokio::spawn(self.ctx_builder.clone().build())),
        )
        .collect::<Vec<_>>()
        .await;

        let mut built = Vec::with_capacity(size);
        let mut first_err = None;

        for (id, ctx) in ctxs.into_iter().enumerate() {
            let id = id + 1;

            let ctx = ctx
                .map_err(Error::JoinError)
                .and_then(|ctx| ctx.map_err(|err| Error::BuildContextError(err, id, size)));

            match ctx {
                Ok(ctx) => built.push(Arc::new(ctx)),
                Err(err) if first_err.is_none() => first_err = Some(err),
                Err(err) => debug!(id, "{err}"),
            }
        }

        if let Some(err) = first_err {
            for ctx in built {
                ctx.close().await;
            }
            return Err(err);
        }

        let (tx, rx) = mpsc::unbounded_channel::<ThreadPoolTask<B::Context>>();
        let rx = Arc::new(Mutex::new(rx));

        let threads = built
            .iter()
            .enumerate()
            .map(|(id, ctx)| {
                let id = id + 1;
                let ctx = ctx.clone();
                let rx = rx.clone();

                tokio::spawn(async move {
                    loop {
                        let task = {
                            let mut lock = rx.lock().await;
                            trace!(id, "thread waiting for a task");
                            lock.recv().await
                        };

                        match task {
                            None => break,
                            Some(task) => {
                                trace!(id, "thread executing task…");
                                task(ctx.clone()).await;
                                trace!(id, "thread executed task");
                            }
                        }
                    }

                    debug!(id, "no more task for thread, exiting");
                })
            })
            .collect();

        Ok(ThreadPool {
            tx,
            ctxs: built,
            threads,
        })
    }
}

/// The thread pool context builder.
#[async_trait]
pub trait ThreadPoolContextBuilder: Clone + Send + Sync {
    /// The context built by this trait.
    type Context: ThreadPoolContext;

    /// Build the thread pool context.
    async fn build(self) -> AnyResult<Self::Context>;
}

/// The thread pool context.
#[async_trait]
pub trait ThreadPoolContext: Send + Sync {
    /// Release the resources held by the context.
    async fn close(&self) {
        //
    }
}
