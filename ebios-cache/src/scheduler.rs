//! Keyed one-shot delayed tasks.
//!
//! At most one task is scheduled per key. Scheduling again for the same key
//! aborts the previous task. A task that fires should call
//! [`DelayedTasks::complete`] with its own [`TaskId`] so a newer task under
//! the same key is left alone.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::hash::Hash;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;

/// Identifies one scheduled task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(u64);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "task-{}", self.0)
    }
}

struct Scheduled {
    id: TaskId,
    handle: JoinHandle<()>,
}

pub struct DelayedTasks<K> {
    runtime: Handle,
    tasks: HashMap<K, Scheduled>,
    next_id: u64,
}

impl<K> DelayedTasks<K>
where
    K: Eq + Hash + Clone,
{
    /// Tasks are spawned on `runtime`.
    pub fn new(runtime: Handle) -> Self {
        Self {
            runtime,
            tasks: HashMap::new(),
            next_id: 0,
        }
    }

    /// Run the task built by `make` once `delay` has elapsed.
    ///
    /// `make` receives the id of the task being scheduled.
    pub fn schedule<F, Fut>(&mut self, key: K, delay: Duration, make: F) -> TaskId
    where
        F: FnOnce(TaskId) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let id = TaskId(self.next_id);
        self.next_id += 1;

        let task = make(id);
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            task.await;
        });

        if let Some(previous) = self.tasks.insert(key, Scheduled { id, handle }) {
            previous.handle.abort();
        }
        id
    }

    /// Abort the task for `key`. Returns whether one was scheduled.
    pub fn cancel(&mut self, key: &K) -> bool {
        match self.tasks.remove(key) {
            Some(scheduled) => {
                scheduled.handle.abort();
                true
            }
            None => false,
        }
    }

    /// Abort every task, returning how many were scheduled.
    pub fn cancel_all(&mut self) -> usize {
        let count = self.tasks.len();
        for (_, scheduled) in self.tasks.drain() {
            scheduled.handle.abort();
        }
        count
    }

    /// Forget the slot for `key` if it still belongs to `id`.
    pub fn complete(&mut self, key: &K, id: TaskId) -> bool {
        if self.tasks.get(key).is_some_and(|scheduled| scheduled.id == id) {
            self.tasks.remove(key);
            true
        } else {
            false
        }
    }

    pub fn is_scheduled(&self, key: &K) -> bool {
        self.tasks.contains_key(key)
    }

    pub fn task_id(&self, key: &K) -> Option<TaskId> {
        self.tasks.get(key).map(|scheduled| scheduled.id)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }
}

impl<K> Drop for DelayedTasks<K> {
    fn drop(&mut self) {
        for scheduled in self.tasks.values() {
            scheduled.handle.abort();
        }
    }
}
