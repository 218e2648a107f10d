//! One background sync task per managed instance.
use common::InstanceKey;
use futures::future::BoxFuture;
use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Builds the task run for an instance; the task must return once the token is cancelled
pub type Runner = Arc<dyn Fn(InstanceKey, CancellationToken) -> BoxFuture<'static, ()> + Send + Sync>;

struct Handle {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl Handle {
    async fn shutdown(self, key: &InstanceKey) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::error!(instance = %key, "sync task ended abnormally: {e}");
        }
    }
}

pub struct InstanceRegistry {
    runner: Runner,
    processes: Mutex<HashMap<InstanceKey, Handle>>,
}

impl InstanceRegistry {
    pub fn new(runner: Runner) -> Self {
        Self {
            runner,
            processes: Mutex::new(HashMap::new()),
        }
    }

    fn processes(&self) -> MutexGuard<'_, HashMap<InstanceKey, Handle>> {
        self.processes.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make sure a task runs for `key`, returning true when one had to be started.
    ///
    /// A running task already reads the latest declared state on its own schedule, so
    /// an existing one is left alone. One that ended on its own is replaced.
    pub fn update(&self, key: &InstanceKey) -> bool {
        let mut processes = self.processes();
        if processes.get(key).is_some_and(|h| !h.task.is_finished()) {
            return false;
        }
        let cancel = CancellationToken::new();
        let task = tokio::spawn((self.runner)(key.clone(), cancel.clone()));
        tracing::info!(instance = %key, "starting sync task");
        processes.insert(key.clone(), Handle { cancel, task });
        true
    }

    /// Cancel the task of `key` and wait for it to finish. Absent keys are ignored.
    pub async fn stop(&self, key: &InstanceKey) {
        let handle = self.processes().remove(key);
        if let Some(handle) = handle {
            tracing::info!(instance = %key, "stopping sync task");
            handle.shutdown(key).await;
        }
    }

    /// Cancel every task, then wait until all of them have returned
    pub async fn stop_all(&self) {
        let handles: Vec<_> = self.processes().drain().collect();
        for (_, handle) in &handles {
            handle.cancel.cancel();
        }
        for (key, handle) in handles {
            handle.shutdown(&key).await;
        }
    }

    pub fn len(&self) -> usize {
        self.processes().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, key: &InstanceKey) -> bool {
        self.processes().contains_key(key)
    }
}
