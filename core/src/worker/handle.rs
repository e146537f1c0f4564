//! Spawned worker tasks

use std::time::Duration;

use tokio::task::JoinHandle;

use super::consumer::ConsumerWorker;
use super::producer::ProducerWorker;
use super::stats::{WorkerRole, WorkerStats};

/// A worker running on its own tokio task
#[derive(Debug)]
pub struct WorkerHandle {
    id: usize,
    role: WorkerRole,
    task: JoinHandle<WorkerStats>,
}

impl WorkerHandle {
    /// Spawn a producer
    pub fn spawn_producer(worker: ProducerWorker) -> Self {
        Self {
            id: worker.id(),
            role: WorkerRole::Producer,
            task: tokio::spawn(worker.run()),
        }
    }

    /// Spawn a consumer
    pub fn spawn_consumer(worker: ConsumerWorker) -> Self {
        Self {
            id: worker.id(),
            role: WorkerRole::Consumer,
            task: tokio::spawn(worker.run()),
        }
    }

    /// Worker ID
    pub fn id(&self) -> usize {
        self.id
    }

    /// Worker role
    pub fn role(&self) -> WorkerRole {
        self.role
    }

    /// Wait for the worker; `None` if its task panicked or was aborted
    pub async fn join(self) -> Option<WorkerStats> {
        match self.task.await {
            Ok(stats) => Some(stats),
            Err(e) => {
                tracing::error!(worker_id = self.id, role = %self.role, error = %e, "Worker task failed");
                None
            }
        }
    }

    /// Wait up to `grace` for the worker, aborting it afterwards
    pub async fn join_within(mut self, grace: Duration) -> Option<WorkerStats> {
        match tokio::time::timeout(grace, &mut self.task).await {
            Ok(Ok(stats)) => Some(stats),
            Ok(Err(e)) => {
                tracing::error!(worker_id = self.id, role = %self.role, error = %e, "Worker task failed");
                None
            }
            Err(_) => {
                tracing::warn!(
                    worker_id = self.id,
                    role = %self.role,
                    grace_ms = grace.as_millis() as u64,
                    "Worker did not stop in time, aborting"
                );
                self.task.abort();
                None
            }
        }
    }
}
