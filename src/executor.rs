//! Callback executors
//!
//! Completion and progress callbacks are never invoked on a runner's
//! internal I/O thread; the coordinator hands them to a
//! [`CallbackExecutor`]. Two implementations are provided: an inline
//! executor that runs jobs on the scheduling thread (useful in tests and
//! synchronous hosts) and a worker executor backed by a dedicated thread
//! that preserves scheduling order.

use std::sync::mpsc;
use std::sync::mpsc::Sender;
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;
use tracing::warn;

/// A unit of callback work.
pub type Job = Box<dyn FnOnce() + Send + 'static>;

/// Executes callback jobs away from runner I/O threads.
///
/// Implementations must run jobs in the order they were scheduled from
/// any single scheduling thread; subscriber completion ordering depends
/// on it.
pub trait CallbackExecutor: Send + Sync {
  fn execute(&self, job: Job);
}

impl<T: CallbackExecutor + ?Sized> CallbackExecutor for Arc<T> {
  fn execute(&self, job: Job) {
    (**self).execute(job)
  }
}

/// Runs jobs immediately on the scheduling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct InlineExecutor;

impl InlineExecutor {
  pub fn new() -> Self {
    Self
  }
}

impl CallbackExecutor for InlineExecutor {
  fn execute(&self, job: Job) {
    job();
  }
}

/// Runs jobs on one dedicated thread, in scheduling order.
///
/// Dropping the executor stops the thread after draining already
/// scheduled jobs.
pub struct WorkerExecutor {
  sender: Option<Sender<Job>>,
  worker: Option<JoinHandle<()>>,
}

impl WorkerExecutor {
  pub fn new() -> Self {
    let (sender, receiver) = mpsc::channel::<Job>();
    let worker = thread::Builder::new()
      .name("imageloader-callbacks".to_string())
      .spawn(move || {
        while let Ok(job) = receiver.recv() {
          job();
        }
      })
      .expect("spawn callback worker thread");
    Self {
      sender: Some(sender),
      worker: Some(worker),
    }
  }
}

impl Default for WorkerExecutor {
  fn default() -> Self {
    Self::new()
  }
}

impl CallbackExecutor for WorkerExecutor {
  fn execute(&self, job: Job) {
    let Some(sender) = self.sender.as_ref() else {
      return;
    };
    if sender.send(job).is_err() {
      warn!("callback worker is gone, dropping job");
    }
  }
}

impl Drop for WorkerExecutor {
  fn drop(&mut self) {
    // Disconnect first so the worker loop ends after the backlog.
    drop(self.sender.take());
    if let Some(worker) = self.worker.take() {
      let _ = worker.join();
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;
  use std::sync::atomic::Ordering;
  use std::sync::Mutex;

  #[test]
  fn inline_executor_runs_on_the_calling_thread() {
    let executor = InlineExecutor::new();
    let calling_thread = thread::current().id();
    let observed = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&observed);
    executor.execute(Box::new(move || {
      *slot.lock().unwrap() = Some(thread::current().id());
    }));
    assert_eq!(*observed.lock().unwrap(), Some(calling_thread));
  }

  #[test]
  fn worker_executor_preserves_scheduling_order() {
    let executor = WorkerExecutor::new();
    let order = Arc::new(Mutex::new(Vec::new()));
    for i in 0..32 {
      let order = Arc::clone(&order);
      executor.execute(Box::new(move || {
        order.lock().unwrap().push(i);
      }));
    }
    drop(executor); // joins after draining
    assert_eq!(*order.lock().unwrap(), (0..32).collect::<Vec<_>>());
  }

  #[test]
  fn worker_executor_drains_backlog_on_drop() {
    let counter = Arc::new(AtomicUsize::new(0));
    let executor = WorkerExecutor::new();
    for _ in 0..8 {
      let counter = Arc::clone(&counter);
      executor.execute(Box::new(move || {
        counter.fetch_add(1, Ordering::SeqCst);
      }));
    }
    drop(executor);
    assert_eq!(counter.load(Ordering::SeqCst), 8);
  }
}
