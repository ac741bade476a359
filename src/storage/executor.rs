//! Serial execution context
//!
//! A dedicated thread owns the [`SqliteStore`] for its whole life. Jobs
//! arrive over a channel and run one at a time in submission order; each
//! job reports back through a oneshot channel wrapped in a [`Task`].

use std::any::Any;
use std::future::Future;
use std::panic::{self, AssertUnwindSafe};
use std::pin::Pin;
use std::task::{Context, Poll};
use crossbeam::channel::{self, Sender};
use tokio::sync::oneshot;
use crate::config::StoreConfig;
use crate::{Error, Result};
use super::sqlite::SqliteStore;

type Job = Box<dyn FnOnce(&mut SqliteStore) + Send>;

/// Pending result of an operation submitted to a store.
///
/// Resolves to the operation's result once the executor has run it. The
/// operation runs whether or not the task is awaited.
#[must_use = "a Task reports the outcome of the operation"]
pub struct Task<T> {
    state: TaskState<T>,
}

enum TaskState<T> {
    Failed(Option<Error>),
    Pending(oneshot::Receiver<Result<T>>),
}

impl<T> Task<T> {
    /// A task that has already failed
    pub fn failed(error: Error) -> Self {
        Self {
            state: TaskState::Failed(Some(error)),
        }
    }

    /// Block the current thread until the result is available.
    ///
    /// Must not be called from within an async runtime.
    pub fn wait(self) -> Result<T> {
        match self.state {
            TaskState::Failed(error) => Err(error.unwrap_or(Error::ExecutorClosed)),
            TaskState::Pending(rx) => rx.blocking_recv().unwrap_or(Err(Error::ExecutorClosed)),
        }
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match &mut self.get_mut().state {
            TaskState::Failed(error) => Poll::Ready(Err(error.take().unwrap_or(Error::ExecutorClosed))),
            TaskState::Pending(rx) => Pin::new(rx)
                .poll(cx)
                .map(|received| received.unwrap_or(Err(Error::ExecutorClosed))),
        }
    }
}

/// Handle to the executor thread of one store
pub struct Executor {
    sender: Sender<Job>,
    thread_name: String,
}

impl Executor {
    /// Start the executor thread and open the database on it.
    ///
    /// Returns once the database is open, with the open error if it failed.
    pub fn start(config: &StoreConfig) -> Result<Self> {
        let (sender, receiver) = channel::unbounded::<Job>();
        let (opened_tx, opened_rx) = channel::bounded::<Result<()>>(1);
        let thread_name = config.thread_name();
        let config = config.clone();

        std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let mut store = match SqliteStore::open_with_config(&config) {
                    Ok(store) => {
                        let _ = opened_tx.send(Ok(()));
                        store
                    }
                    Err(e) => {
                        let _ = opened_tx.send(Err(e));
                        return;
                    }
                };

                for job in receiver {
                    job(&mut store);
                }
                tracing::debug!("Executor {} stopped", config.thread_name());
            })?;

        opened_rx.recv().unwrap_or(Err(Error::ExecutorClosed))?;
        Ok(Self { sender, thread_name })
    }

    /// Queue a job; it runs after every previously submitted job.
    ///
    /// A job that panics resolves to [`Error::Panicked`] and the executor
    /// keeps serving later jobs.
    pub fn submit<T, F>(&self, job: F) -> Task<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteStore) -> Result<T> + Send + 'static,
    {
        let (tx, rx) = oneshot::channel();
        let job: Job = Box::new(move |store: &mut SqliteStore| {
            let result = panic::catch_unwind(AssertUnwindSafe(|| job(store))).unwrap_or_else(|payload| {
                let message = panic_message(payload.as_ref());
                tracing::error!("Store job panicked: {}", message);
                Err(Error::Panicked(message))
            });
            let _ = tx.send(result);
        });

        match self.sender.send(job) {
            Ok(()) => Task {
                state: TaskState::Pending(rx),
            },
            Err(_) => Task::failed(Error::ExecutorClosed),
        }
    }

    pub fn thread_name(&self) -> &str {
        &self.thread_name
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}
