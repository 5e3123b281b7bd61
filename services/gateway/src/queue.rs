//! The task queue boundary.
//!
//! Manifests become tasks which a separate worker pool executes. The gateway
//! only enqueues; it never observes a task again.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use registry::ArtifactIdentifier;
use serde::Deserialize;
use uuid::Uuid;

/// Identifies an enqueued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TaskId(Uuid);

impl TaskId {
    /// A fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(&self.0, f)
    }
}

/// Work to enqueue: run `function` from an artifact against `input`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRequest {
    /// The artifact providing the entry point.
    pub artifact: ArtifactIdentifier,

    /// Which exported entry point to run.
    pub function: String,

    /// Raw input handed to the entry point.
    pub input: Bytes,
}

/// A task as it sits in the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Task {
    /// Assigned at enqueue time.
    pub id: TaskId,

    /// The artifact providing the entry point.
    pub artifact: ArtifactIdentifier,

    /// Which exported entry point to run.
    pub function: String,

    /// Raw input handed to the entry point.
    pub input: Bytes,
}

/// The queue refused a task.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// The queue already holds as many tasks as it accepts.
    #[error("queue is full ({capacity} tasks)")]
    Full {
        /// How many tasks the queue holds at most
        capacity: usize,
    },

    /// The queue could not be reached.
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// Somewhere to put tasks.
#[async_trait::async_trait]
pub trait TaskQueue: fmt::Debug + Send + Sync {
    /// Enqueue a task, returning the identifier assigned to it.
    async fn enqueue(&self, request: TaskRequest) -> Result<TaskId, QueueError>;
}

/// An in-process FIFO queue.
///
/// Clones share the same queue.
#[derive(Debug, Clone, Default)]
pub struct MemoryQueue {
    tasks: Arc<Mutex<VecDeque<Task>>>,
    capacity: Option<usize>,
}

impl MemoryQueue {
    /// An unbounded queue.
    pub fn new() -> Self {
        Self::default()
    }

    /// A queue which refuses tasks once `capacity` are waiting.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            tasks: Arc::default(),
            capacity: Some(capacity),
        }
    }

    /// Take the oldest task.
    pub fn pop(&self) -> Option<Task> {
        self.tasks.lock().pop_front()
    }

    /// Number of waiting tasks.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    /// Whether no tasks are waiting.
    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }
}

#[async_trait::async_trait]
impl TaskQueue for MemoryQueue {
    async fn enqueue(&self, request: TaskRequest) -> Result<TaskId, QueueError> {
        let mut tasks = self.tasks.lock();
        if let Some(capacity) = self.capacity {
            if tasks.len() >= capacity {
                return Err(QueueError::Full { capacity });
            }
        }

        let id = TaskId::new();
        tracing::debug!(task = %id, artifact = %request.artifact, function = %request.function, "Enqueued task");
        tasks.push_back(Task {
            id,
            artifact: request.artifact,
            function: request.function,
            input: request.input,
        });
        Ok(id)
    }
}

/// Which task queue to use.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum QueueConfig {
    /// An in-process queue. Tasks are lost when the process exits.
    #[default]
    Memory,
}

impl QueueConfig {
    /// Construct the configured queue.
    pub fn build(&self) -> Arc<dyn TaskQueue> {
        match self {
            QueueConfig::Memory => Arc::new(MemoryQueue::new()),
        }
    }
}
