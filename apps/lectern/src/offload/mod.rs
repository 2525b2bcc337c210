use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::telemetry;

pub mod transforms;

pub use transforms::{
    OffloadTask, RosterStatistics, SortKey, StudentFilters, TaskOutput,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutorKind {
    Worker,
    Inline,
}

/// Asynchronous task contract shared by both execution strategies. `Ok(None)`
/// means the task itself failed; the error has already been logged.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: OffloadTask) -> anyhow::Result<Option<TaskOutput>>;
    fn kind(&self) -> ExecutorKind;
}

/// In-process fallback: same transforms, resolved on the next yield point so
/// callers see the same asynchronous contract as the worker path.
pub struct InlineExecutor;

#[async_trait]
impl TaskExecutor for InlineExecutor {
    async fn execute(&self, task: OffloadTask) -> anyhow::Result<Option<TaskOutput>> {
        tokio::task::yield_now().await;
        let kind = task.kind();
        match transforms::run(task) {
            Ok(output) => Ok(Some(output)),
            Err(err) => {
                tracing::error!(task = kind, error = %err, "inline task failed");
                Ok(None)
            }
        }
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Inline
    }
}

struct WorkerRequest {
    task_id: Uuid,
    task: OffloadTask,
}

struct WorkerResponse {
    task_id: Uuid,
    result: Result<TaskOutput, String>,
}

type PendingMap = Arc<Mutex<HashMap<Uuid, oneshot::Sender<Result<TaskOutput, String>>>>>;

/// Dedicated worker thread. Requests go in over a crossbeam channel, results
/// come back over a tokio channel and are matched to their pending callers by
/// correlation id. Communication is message-passing only.
pub struct WorkerExecutor {
    inbox: crossbeam_channel::Sender<WorkerRequest>,
    pending: PendingMap,
    _router: tokio::task::JoinHandle<()>,
}

impl WorkerExecutor {
    /// Spawn the worker thread and the response router. Construction failure
    /// is the caller's cue to fall back to [`InlineExecutor`].
    pub fn spawn() -> anyhow::Result<Self> {
        let (inbox, work_rx) = crossbeam_channel::unbounded::<WorkerRequest>();
        let (result_tx, mut result_rx) = mpsc::unbounded_channel::<WorkerResponse>();

        std::thread::Builder::new()
            .name("lectern-offload".to_string())
            .spawn(move || {
                while let Ok(request) = work_rx.recv() {
                    let result = transforms::run(request.task).map_err(|err| err.to_string());
                    if result_tx
                        .send(WorkerResponse {
                            task_id: request.task_id,
                            result,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
            })?;

        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let router_pending = pending.clone();
        let router = tokio::spawn(async move {
            while let Some(response) = result_rx.recv().await {
                let waiter = router_pending.lock().remove(&response.task_id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(response.result);
                    }
                    None => {
                        tracing::debug!(task_id = %response.task_id, "result for unknown task");
                    }
                }
            }
        });

        Ok(Self {
            inbox,
            pending,
            _router: router,
        })
    }
}

#[async_trait]
impl TaskExecutor for WorkerExecutor {
    async fn execute(&self, task: OffloadTask) -> anyhow::Result<Option<TaskOutput>> {
        let task_id = Uuid::new_v4();
        let kind = task.kind();
        let (tx, rx) = oneshot::channel();
        self.pending.lock().insert(task_id, tx);

        if self.inbox.send(WorkerRequest { task_id, task }).is_err() {
            self.pending.lock().remove(&task_id);
            anyhow::bail!("offload worker is gone");
        }

        match rx.await {
            Ok(Ok(output)) => Ok(Some(output)),
            Ok(Err(err)) => {
                tracing::error!(task = kind, task_id = %task_id, error = %err, "worker task failed");
                Ok(None)
            }
            Err(_) => {
                // Router dropped without responding; the worker thread died.
                tracing::error!(task = kind, task_id = %task_id, "worker stopped before responding");
                Ok(None)
            }
        }
    }

    fn kind(&self) -> ExecutorKind {
        ExecutorKind::Worker
    }
}

/// Runs filter/sort/statistics transforms off the hot path, with a
/// transparent in-process fallback when the worker cannot be created.
pub struct OffloadManager {
    executor: Arc<dyn TaskExecutor>,
    timings: Mutex<RollingDuration>,
}

impl OffloadManager {
    /// Prefer the worker; fall back to inline if its thread cannot start.
    /// Callers never need to know which path ran.
    pub fn new() -> Self {
        let executor: Arc<dyn TaskExecutor> = match WorkerExecutor::spawn() {
            Ok(worker) => Arc::new(worker),
            Err(err) => {
                tracing::warn!(error = %err, "offload worker unavailable, using inline executor");
                Arc::new(InlineExecutor)
            }
        };
        Self::with_executor(executor)
    }

    pub fn inline_only() -> Self {
        Self::with_executor(Arc::new(InlineExecutor))
    }

    pub fn with_executor(executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            executor,
            timings: Mutex::new(RollingDuration::default()),
        }
    }

    pub async fn execute(&self, task: OffloadTask) -> anyhow::Result<Option<TaskOutput>> {
        let started = Instant::now();
        let result = self.executor.execute(task).await;
        let elapsed = started.elapsed();
        telemetry::record_duration("offload.task", elapsed);
        self.timings.lock().record(elapsed);
        result
    }

    pub fn executor_kind(&self) -> ExecutorKind {
        self.executor.kind()
    }

    pub fn average_task_duration(&self) -> Option<Duration> {
        self.timings.lock().average()
    }
}

impl Default for OffloadManager {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Default)]
struct RollingDuration {
    total: Duration,
    count: u32,
}

impl RollingDuration {
    fn record(&mut self, sample: Duration) {
        self.total += sample;
        self.count += 1;
    }

    fn average(&self) -> Option<Duration> {
        if self.count == 0 {
            None
        } else {
            Some(self.total / self.count)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Student, StudentStatus};
    use chrono::Utc;

    fn roster() -> Vec<Student> {
        (0..6)
            .map(|i| Student {
                id: format!("s{i}"),
                name: format!("Student {i}"),
                team: if i % 2 == 0 { "TeamA" } else { "TeamB" }.to_string(),
                status: if i < 4 {
                    StudentStatus::Active
                } else {
                    StudentStatus::Idle
                },
                progress: 10.0 * i as f64,
                last_activity: Utc::now(),
                is_urgent: i == 3,
                confirmed: true,
            })
            .collect()
    }

    #[tokio::test]
    async fn worker_and_inline_paths_agree() {
        let worker = WorkerExecutor::spawn().expect("worker starts");
        let inline = InlineExecutor;

        let task = OffloadTask::FilterStudents {
            students: roster(),
            filters: StudentFilters {
                status: Some(StudentStatus::Active),
                ..Default::default()
            },
        };

        let from_worker = worker.execute(task.clone()).await.unwrap();
        let from_inline = inline.execute(task).await.unwrap();
        assert_eq!(from_worker, from_inline);
        assert!(from_worker.is_some());
    }

    #[tokio::test]
    async fn statistics_through_the_manager() {
        let manager = OffloadManager::new();
        let output = manager
            .execute(OffloadTask::ComputeStatistics { students: roster() })
            .await
            .unwrap()
            .expect("statistics computed");
        match output {
            TaskOutput::Statistics(stats) => {
                assert_eq!(stats.total, 6);
                assert_eq!(stats.active, 4);
                assert_eq!(stats.urgent, 1);
            }
            other => panic!("unexpected output: {other:?}"),
        }
        assert!(manager.average_task_duration().is_some());
    }

    #[tokio::test]
    async fn concurrent_tasks_resolve_independently() {
        let manager = Arc::new(OffloadManager::new());
        let mut handles = Vec::new();
        for descending in [true, false, true, false] {
            let manager = manager.clone();
            handles.push(tokio::spawn(async move {
                manager
                    .execute(OffloadTask::SortStudents {
                        students: roster(),
                        key: SortKey::Progress,
                        descending,
                    })
                    .await
                    .unwrap()
                    .expect("sorted")
            }));
        }
        for handle in handles {
            match handle.await.unwrap() {
                TaskOutput::Students(students) => assert_eq!(students.len(), 6),
                other => panic!("unexpected output: {other:?}"),
            }
        }
    }

    #[tokio::test]
    async fn inline_manager_matches_worker_manager() {
        let worker = OffloadManager::new();
        let inline = OffloadManager::inline_only();
        let task = OffloadTask::SortStudents {
            students: roster(),
            key: SortKey::Name,
            descending: false,
        };
        assert_eq!(
            worker.execute(task.clone()).await.unwrap(),
            inline.execute(task).await.unwrap()
        );
    }
}
