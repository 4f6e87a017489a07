use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{info, warn};
use crate::dsl::{NodeKind, TaskPrototype};
use crate::error::{ExecutionError, Result};
use crate::runtime::context::{Lifecycle, TokenContext};
use crate::runtime::engine::Engine;
use crate::runtime::node::{NodeExecutor, NodeScope, Transition};
use crate::runtime::task::{TaskStatus, WorkflowTask};

// --- WORKFLOW NODE ---

/// Publishes a human work item and waits for its completion.
#[derive(Debug)]
pub struct WorkflowExecutor;

fn text(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Null => None,
        other => Some(other.to_string()),
    }
}

impl WorkflowExecutor {
    /// Task fields from the node's prototype, overridden by same-named
    /// values bound on the entry socket.
    fn stamp(task: &mut WorkflowTask, prototype: &TaskPrototype, scope: &NodeScope<'_>, ctx: &TokenContext) {
        let bound = |name: &str| ctx.binding(scope.entry, name);

        task.node = scope.node.name.clone();
        task.title = text(bound("title")).or_else(|| prototype.title.clone());
        task.description = text(bound("description")).or_else(|| prototype.description.clone());
        task.role = text(bound("role")).or_else(|| prototype.role.clone());
        task.user = text(bound("user")).or_else(|| prototype.user.clone());
        task.priority = bound("priority")
            .and_then(|v| v.as_i64())
            .or(prototype.priority)
            .unwrap_or(task.priority);
        task.permissions = match bound("permissions") {
            Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str().map(String::from)).collect(),
            _ => prototype.permissions.clone(),
        };
    }
}

#[async_trait]
impl NodeExecutor for WorkflowExecutor {
    fn kind(&self) -> &str { "workflow" }

    async fn execute(&self, engine: &Engine, scope: &NodeScope<'_>, ctx: &mut TokenContext) -> Result<Transition> {
        let conventions = engine.conventions();
        let prototype = match &scope.node.kind {
            NodeKind::Workflow { task } => task.clone(),
            _ => TaskPrototype::default(),
        };

        let mut task = engine.store().create_workflow_task(ctx).await.map_err(ExecutionError::Store)?;
        Self::stamp(&mut task, &prototype, scope, ctx);
        task.socket = Some(scope.entry.clone());
        if task.creator.is_none() {
            task.creator = Some(ctx.creator.clone().unwrap_or_else(|| "system".to_string()));
        }
        if task.created_at.is_none() {
            task.created_at = Some(Utc::now());
        }
        task.status = TaskStatus::Enabled;
        let task = engine.store().add_workflow_task(task).await.map_err(ExecutionError::Store)?;

        info!(context_id = %ctx.id, node = %scope.node.name, task_id = %task.id, "Workflow task published");

        let Some(published) = scope.exit_named(&conventions.published) else {
            return Ok(Transition::suspend());
        };
        if scope.blueprint.socket(published.index).declares(&conventions.task) {
            let value = serde_json::to_value(&task).map_err(|e| ExecutionError::Store(e.into()))?;
            ctx.bind(&published, conventions.task.clone(), value);
        }
        Ok(Transition::advance(published))
    }
}

// --- WORKFLOW END NODE ---

/// Ends the branch and the whole instance: a child context also stops its
/// root ancestor.
#[derive(Debug)]
pub struct WorkflowEndExecutor;

#[async_trait]
impl NodeExecutor for WorkflowEndExecutor {
    fn kind(&self) -> &str { "workflow_end" }

    async fn execute(&self, engine: &Engine, scope: &NodeScope<'_>, ctx: &mut TokenContext) -> Result<Transition> {
        if !ctx.is_root() {
            let root_id = ctx.root;
            let _guard = engine.lock_context(root_id).await;
            match engine.store().load_context(root_id).await.map_err(ExecutionError::Store)? {
                Some(mut root) => {
                    root.lifecycle = Lifecycle::Stop;
                    engine.store().save_context(&root).await.map_err(ExecutionError::Store)?;
                    info!(context_id = %ctx.id, root = %root_id, node = %scope.node.name, "Root context stopped");
                }
                None => warn!(context_id = %ctx.id, root = %root_id, "Root context not found"),
            }
        }
        Ok(Transition::stop())
    }
}
