//! Batch task manager.
//!
//! A task fans one operation out over a device list with bounded
//! concurrency and tracks progress in memory for the lifetime of the
//! process. Workers report over a channel; a single collector owns the task
//! record, so the completion transition (`completed + failed == total`) is
//! decided under one lock.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use domain::models::{TaskResult, TaskResultStatus, TaskSnapshot, TaskStatus};
use shared::naming;
use tokio::sync::{mpsc, Mutex, Semaphore};
use tracing::{info, warn};

/// Hard ceiling on parallel workers, regardless of configuration.
pub const MAX_WORKER_CEILING: usize = 50;

/// Terminal tasks are evicted after this age.
const TASK_RETENTION: Duration = Duration::from_secs(30 * 60);
/// At most this many tasks are retained; the oldest terminal ones go first.
const MAX_RETAINED_TASKS: usize = 100;

struct TaskState {
    status: TaskStatus,
    total: usize,
    completed: usize,
    failed: usize,
    results: Vec<TaskResult>,
    created_at: Instant,
    finished_at: Option<Instant>,
}

/// Process-wide registry of batch tasks.
pub struct TaskRegistry {
    tasks: Mutex<HashMap<String, Arc<Mutex<TaskState>>>>,
}

impl TaskRegistry {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Clamps a requested worker count into `[1, min(configured_max, 50)]`.
    pub fn clamp_workers(requested: usize, configured_max: usize) -> usize {
        let ceiling = configured_max.min(MAX_WORKER_CEILING).max(1);
        requested.clamp(1, ceiling)
    }

    /// Starts a fan-out task and returns its id immediately.
    ///
    /// `op` runs once per device, at most `max_worker` in flight; its Ok/Err
    /// string becomes the per-device result message. Worker failure never
    /// aborts siblings.
    pub async fn submit<F, Fut>(
        self: &Arc<Self>,
        device_ids: Vec<String>,
        max_worker: usize,
        op: F,
    ) -> String
    where
        F: Fn(String) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<String, String>> + Send + 'static,
    {
        let task_id = naming::random_token(32);
        let total = device_ids.len();

        let state = Arc::new(Mutex::new(TaskState {
            status: TaskStatus::Pending,
            total,
            completed: 0,
            failed: 0,
            results: Vec::with_capacity(total),
            created_at: Instant::now(),
            finished_at: None,
        }));

        self.tasks
            .lock()
            .await
            .insert(task_id.clone(), state.clone());

        info!(task_id = %task_id, total, max_worker, "batch task submitted");

        tokio::spawn(async move {
            {
                let mut task = state.lock().await;
                if task.total == 0 {
                    task.status = TaskStatus::Complete;
                    task.finished_at = Some(Instant::now());
                    return;
                }
                task.status = TaskStatus::Running;
            }

            let semaphore = Arc::new(Semaphore::new(max_worker.max(1)));
            let op = Arc::new(op);
            let (tx, mut rx) = mpsc::unbounded_channel();

            for device_id in device_ids {
                let semaphore = semaphore.clone();
                let op = op.clone();
                let tx = tx.clone();
                tokio::spawn(async move {
                    let Ok(_permit) = semaphore.acquire_owned().await else {
                        return;
                    };
                    let outcome = op(device_id.clone()).await;
                    let _ = tx.send((device_id, outcome));
                });
            }
            drop(tx);

            while let Some((device_id, outcome)) = rx.recv().await {
                let mut task = state.lock().await;
                match outcome {
                    Ok(message) => {
                        task.completed += 1;
                        task.results.push(TaskResult {
                            device_id,
                            status: TaskResultStatus::Complete,
                            message,
                        });
                    }
                    Err(message) => {
                        task.failed += 1;
                        task.results.push(TaskResult {
                            device_id,
                            status: TaskResultStatus::Failed,
                            message,
                        });
                    }
                }
                if task.completed + task.failed == task.total {
                    task.status = TaskStatus::Complete;
                    task.finished_at = Some(Instant::now());
                }
            }
        });

        task_id
    }

    /// Point-in-time snapshot of one task.
    pub async fn snapshot(&self, task_id: &str) -> Option<TaskSnapshot> {
        let state = self.tasks.lock().await.get(task_id).cloned()?;
        let task = state.lock().await;
        Some(TaskSnapshot {
            task_id: task_id.to_string(),
            status: task.status,
            total: task.total,
            completed: task.completed,
            failed: task.failed,
            results: task.results.clone(),
        })
    }

    /// Housekeeping: drops terminal tasks past the retention age, and the
    /// oldest terminal tasks beyond the retention count.
    pub async fn evict_finished(&self) -> usize {
        let mut tasks = self.tasks.lock().await;
        let mut evictable: Vec<(String, Instant)> = Vec::new();

        for (id, state) in tasks.iter() {
            let task = state.lock().await;
            if let Some(finished_at) = task.finished_at {
                if finished_at.elapsed() > TASK_RETENTION {
                    evictable.push((id.clone(), task.created_at));
                }
            }
        }

        let mut evicted = evictable.len();
        for (id, _) in &evictable {
            tasks.remove(id);
        }

        if tasks.len() > MAX_RETAINED_TASKS {
            let mut terminal: Vec<(String, Instant)> = Vec::new();
            for (id, state) in tasks.iter() {
                let task = state.lock().await;
                if task.status.is_terminal() {
                    terminal.push((id.clone(), task.created_at));
                }
            }
            terminal.sort_by_key(|(_, created_at)| *created_at);
            let excess = tasks.len().saturating_sub(MAX_RETAINED_TASKS);
            for (id, _) in terminal.into_iter().take(excess) {
                tasks.remove(&id);
                evicted += 1;
            }
        }

        if evicted > 0 {
            warn!(evicted, "evicted finished batch tasks");
        }
        evicted
    }
}

impl Default for TaskRegistry {
    fn default() -> Self {
        Self::new()
    }
}
