use async_trait::async_trait;
use uuid::Uuid;
use crate::runtime::activation::Activation;
use crate::runtime::context::TokenContext;
use crate::runtime::task::{TaskStatus, WorkflowTask};
use anyhow::{Result, anyhow};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use tokio::sync::mpsc;

// --- Interfaces ---

#[async_trait]
pub trait ActivationQueue: Send + Sync {
    async fn push(&self, activation: Activation) -> Result<()>;
    /// Waits for the next activation. `None` means nothing arrived in time.
    async fn pop(&self) -> Result<Option<Activation>>;
    /// Returns immediately.
    async fn try_pop(&self) -> Result<Option<Activation>>;
}

/// Persistence collaborator for contexts and workflow tasks.
#[async_trait]
pub trait ContextStore: Send + Sync {
    /// Creates a branch of `parent` and atomically increments the parent's
    /// live-child count. The child is not saved yet.
    async fn create_child_context(&self, parent: &TokenContext) -> Result<TokenContext>;
    async fn save_context(&self, ctx: &TokenContext) -> Result<()>;
    async fn load_context(&self, id: Uuid) -> Result<Option<TokenContext>>;

    async fn live_children(&self, id: Uuid) -> Result<usize>;
    /// Atomically decrements the live-child count of `parent`.
    /// Returns the NEW value after decrement.
    async fn release_child(&self, parent: Uuid) -> Result<usize>;

    /// Blank task bound to `ctx` and its current socket; not persisted.
    async fn create_workflow_task(&self, ctx: &TokenContext) -> Result<WorkflowTask>;
    async fn add_workflow_task(&self, task: WorkflowTask) -> Result<WorkflowTask>;
    async fn load_workflow_task(&self, id: Uuid) -> Result<Option<WorkflowTask>>;
    async fn save_workflow_task(&self, task: &WorkflowTask) -> Result<()>;
}

pub(crate) fn blank_task(ctx: &TokenContext) -> WorkflowTask {
    WorkflowTask {
        id: Uuid::new_v4(),
        context_id: ctx.id,
        socket: ctx.current.clone(),
        process: ctx.process.clone(),
        node: String::new(),
        title: None,
        description: None,
        role: None,
        user: None,
        priority: 0,
        permissions: Vec::new(),
        creator: None,
        created_at: None,
        status: TaskStatus::Created,
    }
}

// --- In-Memory Implementations ---

pub struct InMemoryActivationQueue {
    sender: mpsc::Sender<Activation>,
    receiver: tokio::sync::Mutex<mpsc::Receiver<Activation>>,
}

impl InMemoryActivationQueue {
    pub fn new(capacity: usize) -> Self {
        let (tx, rx) = mpsc::channel(capacity);
        Self {
            sender: tx,
            receiver: tokio::sync::Mutex::new(rx),
        }
    }
}

#[async_trait]
impl ActivationQueue for InMemoryActivationQueue {
    async fn push(&self, activation: Activation) -> Result<()> {
        self.sender.send(activation).await.map_err(|e| anyhow!("Activation channel closed: {}", e))
    }

    async fn pop(&self) -> Result<Option<Activation>> {
        let mut rx = self.receiver.lock().await;
        Ok(rx.recv().await)
    }

    async fn try_pop(&self) -> Result<Option<Activation>> {
        let mut rx = self.receiver.lock().await;
        Ok(rx.try_recv().ok())
    }
}

/// Keeps contexts as serialized JSON so every checkpoint goes through the
/// same encoding a remote store would use.
pub struct InMemoryContextStore {
    contexts: DashMap<Uuid, String>,
    // live-child count per parent; zero counts are removed
    children: DashMap<Uuid, usize>,
    tasks: DashMap<Uuid, WorkflowTask>,
}

impl InMemoryContextStore {
    pub fn new() -> Self {
        Self {
            contexts: DashMap::new(),
            children: DashMap::new(),
            tasks: DashMap::new(),
        }
    }

    pub fn workflow_tasks(&self) -> Vec<WorkflowTask> {
        self.tasks.iter().map(|t| t.value().clone()).collect()
    }
}

impl Default for InMemoryContextStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContextStore for InMemoryContextStore {
    async fn create_child_context(&self, parent: &TokenContext) -> Result<TokenContext> {
        let child = parent.new_child();
        *self.children.entry(parent.id).or_insert(0) += 1;
        Ok(child)
    }

    async fn save_context(&self, ctx: &TokenContext) -> Result<()> {
        let serialized = serde_json::to_string(ctx)?;
        self.contexts.insert(ctx.id, serialized);
        Ok(())
    }

    async fn load_context(&self, id: Uuid) -> Result<Option<TokenContext>> {
        match self.contexts.get(&id) {
            Some(raw) => Ok(Some(serde_json::from_str(raw.value())?)),
            None => Ok(None),
        }
    }

    async fn live_children(&self, id: Uuid) -> Result<usize> {
        Ok(self.children.get(&id).map(|c| *c.value()).unwrap_or(0))
    }

    async fn release_child(&self, parent: Uuid) -> Result<usize> {
        // the entry lock makes decrement and removal one step
        match self.children.entry(parent) {
            Entry::Occupied(mut count) if *count.get() > 0 => {
                *count.get_mut() -= 1;
                let remaining = *count.get();
                if remaining == 0 {
                    count.remove();
                }
                Ok(remaining)
            }
            _ => Err(anyhow!("Context {} has no live children to release", parent)),
        }
    }

    async fn create_workflow_task(&self, ctx: &TokenContext) -> Result<WorkflowTask> {
        Ok(blank_task(ctx))
    }

    async fn add_workflow_task(&self, task: WorkflowTask) -> Result<WorkflowTask> {
        self.tasks.insert(task.id, task.clone());
        Ok(task)
    }

    async fn load_workflow_task(&self, id: Uuid) -> Result<Option<WorkflowTask>> {
        Ok(self.tasks.get(&id).map(|t| t.value().clone()))
    }

    async fn save_workflow_task(&self, task: &WorkflowTask) -> Result<()> {
        self.tasks.insert(task.id, task.clone());
        Ok(())
    }
}
