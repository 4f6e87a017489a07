use async_trait::async_trait;
use uuid::Uuid;
use crate::runtime::activation::Activation;
use crate::runtime::context::TokenContext;
use crate::runtime::storage::{blank_task, ActivationQueue, ContextStore};
use crate::runtime::task::WorkflowTask;
use anyhow::{Result, anyhow};
use redis::AsyncCommands;

pub struct RedisActivationQueue {
    client: redis::Client,
    queue_key: String,
}

impl RedisActivationQueue {
    pub fn new(client: redis::Client, queue_key: String) -> Self {
        Self {
            client,
            queue_key,
        }
    }
}

#[async_trait]
impl ActivationQueue for RedisActivationQueue {
    async fn push(&self, activation: Activation) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(&activation)?;
        let _: () = conn.lpush(&self.queue_key, serialized).await?;
        Ok(())
    }

    async fn pop(&self) -> Result<Option<Activation>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        // 1 second block keeps workers responsive
        let result: Option<(String, String)> = conn.brpop(&self.queue_key, 1.0).await?;
        match result {
            Some((_, raw)) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }

    async fn try_pop(&self) -> Result<Option<Activation>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let result: Option<String> = conn.rpop(&self.queue_key, None).await?;
        match result {
            Some(raw) => Ok(Some(serde_json::from_str(&raw)?)),
            None => Ok(None),
        }
    }
}

pub struct RedisContextStore {
    client: redis::Client,
    prefix: String,
}

impl RedisContextStore {
    pub fn new(client: redis::Client) -> Self {
        Self::with_prefix(client, "tokenflow")
    }

    pub fn with_prefix(client: redis::Client, prefix: &str) -> Self {
        Self { client, prefix: prefix.to_string() }
    }

    fn contexts_key(&self) -> String {
        format!("{}:contexts", self.prefix)
    }

    fn children_key(&self) -> String {
        format!("{}:children", self.prefix)
    }

    fn tasks_key(&self) -> String {
        format!("{}:tasks", self.prefix)
    }
}

#[async_trait]
impl ContextStore for RedisContextStore {
    async fn create_child_context(&self, parent: &TokenContext) -> Result<TokenContext> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let _: i64 = conn.hincr(self.children_key(), parent.id.to_string(), 1).await?;
        Ok(parent.new_child())
    }

    async fn save_context(&self, ctx: &TokenContext) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(ctx)?;
        let _: () = conn.hset(self.contexts_key(), ctx.id.to_string(), serialized).await?;
        Ok(())
    }

    async fn load_context(&self, id: Uuid) -> Result<Option<TokenContext>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.hget(self.contexts_key(), id.to_string()).await?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    async fn live_children(&self, id: Uuid) -> Result<usize> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let count: Option<usize> = conn.hget(self.children_key(), id.to_string()).await?;
        Ok(count.unwrap_or(0))
    }

    async fn release_child(&self, parent: Uuid) -> Result<usize> {
        // Decrement and clean up in one step; -1 signals an underflow
        let script = redis::Script::new(r#"
            local current = tonumber(redis.call("HGET", KEYS[1], ARGV[1]) or "0")
            if current <= 0 then
                return -1
            end
            local val = current - 1
            if val == 0 then
                redis.call("HDEL", KEYS[1], ARGV[1])
            else
                redis.call("HSET", KEYS[1], ARGV[1], val)
            end
            return val
        "#);

        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let remaining: i64 = script
            .key(self.children_key())
            .arg(parent.to_string())
            .invoke_async(&mut conn)
            .await?;

        if remaining < 0 {
            return Err(anyhow!("Context {} has no live children to release", parent));
        }
        Ok(remaining as usize)
    }

    async fn create_workflow_task(&self, ctx: &TokenContext) -> Result<WorkflowTask> {
        Ok(blank_task(ctx))
    }

    async fn add_workflow_task(&self, task: WorkflowTask) -> Result<WorkflowTask> {
        self.save_workflow_task(&task).await?;
        Ok(task)
    }

    async fn load_workflow_task(&self, id: Uuid) -> Result<Option<WorkflowTask>> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let raw: Option<String> = conn.hget(self.tasks_key(), id.to_string()).await?;
        match raw {
            Some(s) => Ok(Some(serde_json::from_str(&s)?)),
            None => Ok(None),
        }
    }

    async fn save_workflow_task(&self, task: &WorkflowTask) -> Result<()> {
        let mut conn = self.client.get_multiplexed_async_connection().await?;
        let serialized = serde_json::to_string(task)?;
        let _: () = conn.hset(self.tasks_key(), task.id.to_string(), serialized).await?;
        Ok(())
    }
}
