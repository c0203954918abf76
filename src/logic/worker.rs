//! Worker pool for CPU-bound logic.
//!
//! A singleton task queue over long-lived worker threads. Each worker owns a
//! current-thread async runtime; the host side posts `{id, src, args}` tasks
//! and receives `{id, result}` / `{id, error}` messages back, resolving the
//! matching in-flight completion and reusing the freed worker for queued
//! work.

use super::loader::{Arg, ModuleLoader};
use crate::signal::Value;
use crate::{Error, Result};
use anyhow::Context;
use std::collections::{HashMap, VecDeque};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::thread;
use tokio::sync::oneshot;

/// Worker pool sizing.
#[derive(Clone, Copy, Debug)]
pub struct WorkerOptions {
    /// Upper bound on workers; actual capacity is clamped by the reported
    /// hardware concurrency (fallback 4).
    pub max_workers: usize,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self { max_workers: 4 }
    }
}

struct WorkerTask {
    id: u64,
    src: String,
    args: Vec<serde_json::Value>,
}

struct WorkerMessage {
    worker: usize,
    id: u64,
    outcome: std::result::Result<serde_json::Value, String>,
}

struct WorkerHandle {
    sender: Sender<WorkerTask>,
    busy: bool,
}

#[derive(Default)]
struct PoolState {
    workers: Vec<WorkerHandle>,
    queue: VecDeque<WorkerTask>,
    pending: HashMap<u64, oneshot::Sender<std::result::Result<serde_json::Value, String>>>,
    next_task: u64,
}

/// Task queue over N reusable worker threads.
pub struct WorkerPool {
    state: Arc<Mutex<PoolState>>,
    results: Sender<WorkerMessage>,
    loader: Arc<dyn ModuleLoader>,
    capacity: usize,
}

static SHARED: OnceLock<Arc<WorkerPool>> = OnceLock::new();

impl WorkerPool {
    /// A pool with its own workers and queue, independent of the shared one.
    pub fn new(options: WorkerOptions, loader: Arc<dyn ModuleLoader>) -> Self {
        let hardware = thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        let capacity = options.max_workers.min(hardware).max(1);

        let state = Arc::new(Mutex::new(PoolState::default()));
        let (results, inbox) = mpsc::channel();
        spawn_dispatcher(state.clone(), inbox);

        Self {
            state,
            results,
            loader,
            capacity,
        }
    }

    /// The process-wide pool, created on first use with the given loader.
    pub fn shared(loader: Arc<dyn ModuleLoader>) -> Arc<WorkerPool> {
        SHARED
            .get_or_init(|| Arc::new(Self::new(WorkerOptions::default(), loader)))
            .clone()
    }

    /// Number of workers this pool may grow to.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Number of workers currently spun up.
    pub fn worker_count(&self) -> usize {
        self.lock().workers.len()
    }

    /// Dispatch `{src, args}`: reuse a free worker, grow the pool, or queue.
    pub async fn execute(
        &self,
        src: &str,
        args: Vec<serde_json::Value>,
    ) -> Result<serde_json::Value> {
        let (done, completion) = oneshot::channel();
        {
            let mut state = self.lock();
            let id = state.next_task;
            state.next_task += 1;
            state.pending.insert(id, done);

            let task = WorkerTask {
                id,
                src: src.to_owned(),
                args,
            };
            if let Some(index) = state.workers.iter().position(|w| !w.busy) {
                state.workers[index].busy = true;
                dispatch(&mut state, index, task);
            } else if state.workers.len() < self.capacity {
                let index = state.workers.len();
                let sender = spawn_worker(
                    index,
                    self.loader.clone(),
                    self.results.clone(),
                );
                state.workers.push(WorkerHandle { sender, busy: true });
                dispatch(&mut state, index, task);
            } else {
                state.queue.push_back(task);
            }
        }

        match completion.await {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(message)) => Err(Error::Worker(message)),
            Err(_) => Err(Error::Worker("worker completion dropped".to_owned())),
        }
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

/// Hand a task to a worker; a dead worker fails the task rather than
/// wedging the queue.
fn dispatch(state: &mut PoolState, index: usize, task: WorkerTask) {
    let id = task.id;
    if state.workers[index].sender.send(task).is_err() {
        tracing::warn!(worker = index, "worker channel closed; failing task");
        state.workers[index].busy = false;
        if let Some(done) = state.pending.remove(&id) {
            let _ = done.send(Err("worker thread terminated".to_owned()));
        }
    }
}

fn spawn_dispatcher(state: Arc<Mutex<PoolState>>, inbox: Receiver<WorkerMessage>) {
    thread::spawn(move || {
        while let Ok(message) = inbox.recv() {
            let mut state = state
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner());
            if let Some(worker) = state.workers.get_mut(message.worker) {
                worker.busy = false;
            }
            if let Some(done) = state.pending.remove(&message.id) {
                let _ = done.send(message.outcome);
            }
            // Drain: the freed worker takes the oldest queued task.
            if let Some(task) = state.queue.pop_front() {
                if let Some(worker) = state.workers.get_mut(message.worker) {
                    worker.busy = true;
                }
                dispatch(&mut state, message.worker, task);
            }
        }
    });
}

fn spawn_worker(
    index: usize,
    loader: Arc<dyn ModuleLoader>,
    results: Sender<WorkerMessage>,
) -> Sender<WorkerTask> {
    let (sender, tasks) = mpsc::channel::<WorkerTask>();
    thread::spawn(move || {
        let runtime = match tokio::runtime::Builder::new_current_thread()
            .enable_time()
            .build()
            .context("building the worker's async runtime")
        {
            Ok(runtime) => runtime,
            Err(error) => {
                tracing::error!(worker = index, %error, "worker startup failed");
                return;
            }
        };

        while let Ok(task) = tasks.recv() {
            let WorkerTask { id, src, args } = task;
            let outcome = catch_unwind(AssertUnwindSafe(|| {
                runtime.block_on(async {
                    let f = loader
                        .load(&src)
                        .await
                        .map_err(|error| error.to_string())?;
                    let args = args.into_iter().map(|v| Arg::Value(Value::Json(v))).collect();
                    match f(args).await.map_err(|error| error.to_string())? {
                        Value::Json(value) => Ok(value),
                        other => Err(format!("worker logic must return JSON, got {other:?}")),
                    }
                })
            }))
            .unwrap_or_else(|_| Err("worker task panicked".to_owned()));

            if results
                .send(WorkerMessage {
                    worker: index,
                    id,
                    outcome,
                })
                .is_err()
            {
                break;
            }
        }
    });
    sender
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logic::ModuleRegistry;
    use serde_json::json;

    fn modules() -> Arc<ModuleRegistry> {
        let modules = Arc::new(ModuleRegistry::new());
        modules.register_fn("/logic/add.ts", |args| async move {
            let sum: i64 = args.iter().filter_map(Arg::as_i64).sum();
            Ok(Value::from(sum))
        });
        modules
    }

    #[tokio::test]
    async fn test_execute_round_trips_json() {
        let pool = WorkerPool::new(WorkerOptions { max_workers: 2 }, modules());
        let out = pool.execute("/logic/add.ts", vec![json!(2), json!(3)]).await.unwrap();
        assert_eq!(out, json!(5));
    }

    #[tokio::test]
    async fn test_workers_are_reused() {
        let pool = WorkerPool::new(WorkerOptions { max_workers: 1 }, modules());
        for n in 0..5i64 {
            let out = pool.execute("/logic/add.ts", vec![json!(n)]).await.unwrap();
            assert_eq!(out, json!(n));
        }
        assert_eq!(pool.worker_count(), 1);
    }

    #[tokio::test]
    async fn test_overflow_queues_and_drains() {
        let pool = Arc::new(WorkerPool::new(WorkerOptions { max_workers: 2 }, modules()));
        let tasks: Vec<_> = (0..8i64)
            .map(|n| {
                let pool = pool.clone();
                tokio::spawn(async move { pool.execute("/logic/add.ts", vec![json!(n)]).await })
            })
            .collect();
        for (n, task) in tasks.into_iter().enumerate() {
            assert_eq!(task.await.unwrap().unwrap(), json!(n as i64));
        }
        assert!(pool.worker_count() <= 2);
    }

    #[tokio::test]
    async fn test_failed_task_rejects_and_pool_survives() {
        let registry = Arc::new(ModuleRegistry::new());
        registry.register_fn("/logic/fail.ts", |_| async {
            Err(Error::Logic("boom".to_owned()))
        });
        registry.register_fn("/logic/ok.ts", |_| async { Ok(Value::from(1)) });

        let pool = WorkerPool::new(WorkerOptions { max_workers: 1 }, registry);
        assert!(matches!(
            pool.execute("/logic/fail.ts", vec![]).await,
            Err(Error::Worker(_))
        ));
        assert_eq!(pool.execute("/logic/ok.ts", vec![]).await.unwrap(), json!(1));
    }
}
