use std::collections::HashMap;
use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, info, warn};
use uuid::Uuid;
use crate::dsl::NodeKind;
use crate::error::{ExecutionError, Result};
use crate::runtime::activation::{Activation, ActivationReason};
use crate::runtime::blueprint::SocketRef;
use crate::runtime::context::{Lifecycle, TokenContext};
use crate::runtime::engine::Engine;
use crate::runtime::node::{NodeExecutor, NodeScope, Transition};
use crate::runtime::script::is_truthy;

// --- DECISION NODE ---

#[derive(Debug)]
pub struct DecisionExecutor;

#[async_trait]
impl NodeExecutor for DecisionExecutor {
    fn kind(&self) -> &str { "decision" }

    async fn execute(&self, engine: &Engine, scope: &NodeScope<'_>, ctx: &mut TokenContext) -> Result<Transition> {
        let conventions = engine.conventions();
        let expression = match &scope.node.kind {
            NodeKind::Decision { expression } => expression.as_deref(),
            _ => None,
        };

        let taken = match expression {
            Some(expr) => {
                let label = scope.blueprint.describe(scope.entry.index);
                let value = engine.evaluate(expr, &label, scope.entry, ctx)?;
                if is_truthy(&value) { &conventions.yes } else { &conventions.no }
            }
            None => &conventions.no,
        };

        debug!(context_id = %ctx.id, node = %scope.node.name, branch = %taken, "Decision taken");
        let next = engine.require_socket(taken, scope.entry, ctx)?;
        Ok(Transition::advance(next))
    }
}

// --- FORK NODE ---

/// Spawns one child context per exit socket, or per element of a bound
/// collection. The parent continues at the `resume` exit socket if the node
/// has one and suspends otherwise.
#[derive(Debug)]
pub struct ForkExecutor;

impl ForkExecutor {
    async fn spawn(
        engine: &Engine,
        parent: &TokenContext,
        exit: &SocketRef,
        values: HashMap<String, Value>,
    ) -> Result<Uuid> {
        let mut child = engine.store().create_child_context(parent).await.map_err(ExecutionError::Store)?;
        child.bind_all(exit, values);
        child.current = Some(exit.clone());
        child.lifecycle = Lifecycle::Resume;
        engine.store().save_context(&child).await.map_err(ExecutionError::Store)?;
        debug!(parent = %parent.id, child = %child.id, socket = %exit, "Child context spawned");
        Ok(child.id)
    }
}

#[async_trait]
impl NodeExecutor for ForkExecutor {
    fn kind(&self) -> &str { "fork" }

    async fn execute(&self, engine: &Engine, scope: &NodeScope<'_>, ctx: &mut TokenContext) -> Result<Transition> {
        let conventions = engine.conventions();
        let node = &scope.node.name;
        let mut entry_values = ctx.socket_values(scope.entry);
        let mut spawned = Vec::new();

        if let Some(collection) = entry_values.remove(&conventions.collection) {
            let exit_index = scope.blueprint.default_exit(scope.node_index)
                .ok_or_else(|| ExecutionError::NoDefaultExitSocket { node: node.clone() })?;
            let exit_socket = scope.blueprint.socket(exit_index);
            if !exit_socket.declares(&conventions.element) {
                return Err(ExecutionError::NoCollectionElementForFork {
                    node: node.clone(),
                    socket: exit_socket.name.clone(),
                    param: conventions.element.clone(),
                });
            }
            let exit = scope.socket_ref(exit_index);

            let elements = match collection {
                Value::Null => Vec::new(),
                Value::Array(items) => items,
                single => vec![single],
            };
            for element in elements {
                let mut values = entry_values.clone();
                values.insert(conventions.element.clone(), element);
                spawned.push(Self::spawn(engine, ctx, &exit, values).await?);
            }
        } else {
            for index in scope.blueprint.exit_sockets(scope.node_index) {
                if scope.blueprint.socket(index).name == conventions.resume {
                    continue;
                }
                let exit = scope.socket_ref(index);
                spawned.push(Self::spawn(engine, ctx, &exit, entry_values.clone()).await?);
            }
        }

        info!(context_id = %ctx.id, node = %node, children = spawned.len(), "Fork spawned children");

        let transition = match scope.exit_named(&conventions.resume) {
            Some(resume) => Transition::advance(resume),
            None => Transition::suspend(),
        };
        Ok(transition.with_spawned(spawned))
    }
}

// --- JOIN NODE ---

/// Ends a forked branch and hands control back to its parent once the
/// branch is the last one alive (`out`), or on every arrival when the node
/// has an `incomplete` exit socket.
#[derive(Debug)]
pub struct JoinExecutor;

#[async_trait]
impl NodeExecutor for JoinExecutor {
    fn kind(&self) -> &str { "join" }

    async fn execute(&self, engine: &Engine, scope: &NodeScope<'_>, ctx: &mut TokenContext) -> Result<Transition> {
        let conventions = engine.conventions();

        let Some(parent_id) = ctx.parent else {
            // nothing to join with: pass through
            let next = scope.default_exit()
                .ok_or_else(|| ExecutionError::NoDefaultExitSocket { node: scope.node.name.clone() })?;
            return Ok(Transition::advance(next).with_checkpoint());
        };

        let remaining = engine.store().release_child(parent_id).await.map_err(ExecutionError::Store)?;
        let target = if remaining > 0 {
            engine.resolve_socket(&conventions.incomplete, scope.entry, ctx, false)?
        } else {
            Some(engine.require_socket(&conventions.out, scope.entry, ctx)?)
        };
        debug!(context_id = %ctx.id, parent = %parent_id, remaining, "Branch joined");

        if let Some(target) = target {
            let guard = engine.lock_context(parent_id).await;
            let mut parent = engine.store().load_context(parent_id).await
                .map_err(ExecutionError::Store)?
                .ok_or(ExecutionError::ContextNotFound(parent_id))?;

            if parent.lifecycle == Lifecycle::Stop {
                warn!(context_id = %ctx.id, parent = %parent_id, "Parent already stopped; not resuming it");
            } else {
                parent.bind_all(&target, ctx.socket_values(scope.entry));
                parent.current = Some(target);
                parent.lifecycle = Lifecycle::Resume;
                engine.store().save_context(&parent).await.map_err(ExecutionError::Store)?;
                drop(guard);
                engine.schedule(Activation::new(parent_id, ActivationReason::Joined)).await?;
                info!(context_id = %ctx.id, parent = %parent_id, "Parent resumed by join");
            }
        }

        Ok(Transition::stop())
    }
}
