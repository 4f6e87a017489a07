use async_trait::async_trait;
use tracing::{debug, info};
use crate::dsl::NodeKind;
use crate::error::{ExecutionError, Result};
use crate::runtime::blueprint::SocketRef;
use crate::runtime::call_stack::Frame;
use crate::runtime::context::TokenContext;
use crate::runtime::engine::{Engine, initial_node_of};
use crate::runtime::node::{NodeExecutor, NodeScope, Transition};

// --- SUBPROCESS NODE ---

/// Calls another process. The entry socket name selects the callee's
/// Initial node; the matching Final node returns to the caller's exit socket
/// of the same name.
#[derive(Debug)]
pub struct SubprocessExecutor;

#[async_trait]
impl NodeExecutor for SubprocessExecutor {
    fn kind(&self) -> &str { "subprocess" }

    async fn execute(&self, engine: &Engine, scope: &NodeScope<'_>, ctx: &mut TokenContext) -> Result<Transition> {
        let node = &scope.node.name;
        let static_process = match &scope.node.kind {
            NodeKind::Subprocess { process } => process.clone(),
            _ => None,
        };
        let dynamic_process = ctx.binding(scope.entry, &engine.conventions().subprocess)
            .and_then(|v| v.as_str())
            .filter(|name| engine.has_process(name))
            .map(String::from);

        let Some(process) = dynamic_process.or(static_process) else {
            return scope.default_exit()
                .map(Transition::advance)
                .ok_or_else(|| ExecutionError::MissingSubprocess { node: node.clone() });
        };
        let callee = engine.blueprint(&process)
            .map_err(|_| ExecutionError::MissingSubprocess { node: node.clone() })?;

        let entry_name = scope.entry_name();
        let initial = initial_node_of(&callee, entry_name)?;
        let start = callee.default_exit(initial)
            .map(|s| SocketRef::new(callee.name.clone(), s))
            .ok_or_else(|| ExecutionError::NoDefaultExitSocket { node: entry_name.to_string() })?;

        let caller_variables = std::mem::replace(&mut ctx.variables, callee.variables.clone());
        ctx.call_stack.push(Frame { socket: scope.entry.clone(), variables: caller_variables });
        ctx.process = callee.name.clone();
        ctx.copy_bindings(scope.entry, &start);
        engine.bind_declared(&start, ctx)?;

        info!(context_id = %ctx.id, node = %node, process = %process, depth = ctx.call_stack.depth(), "Entering subprocess");
        Ok(Transition::advance(start))
    }
}

// --- FINAL NODE ---

/// Jumps to a named socket, returns from a subprocess call, or ends the
/// context when there is nothing to return to.
#[derive(Debug)]
pub struct FinalExecutor;

impl FinalExecutor {
    /// A jump onto a calling Subprocess node's socket leaves every call up to
    /// and including that one.
    fn unwind_to(engine: &Engine, target: &SocketRef, ctx: &mut TokenContext) -> Result<()> {
        let target_bp = engine.blueprint(&target.process)?;
        let target_node = target_bp.socket(target.index).node;

        let mut calls = 0;
        let mut found = false;
        for frame in ctx.call_stack.ancestors() {
            calls += 1;
            if frame.socket.process == target.process
                && target_bp.sockets.get(frame.socket.index).map(|s| s.node) == Some(target_node)
            {
                found = true;
                break;
            }
        }
        if !found {
            return Ok(());
        }

        for _ in 0..calls {
            if let Some(frame) = ctx.call_stack.pop() {
                ctx.variables = frame.variables;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl NodeExecutor for FinalExecutor {
    fn kind(&self) -> &str { "final" }

    async fn execute(&self, engine: &Engine, scope: &NodeScope<'_>, ctx: &mut TokenContext) -> Result<Transition> {
        let node = &scope.node.name;
        let static_jump = match &scope.node.kind {
            NodeKind::Final { jump_target } => jump_target.clone(),
            _ => None,
        };
        let jump = ctx.binding(scope.entry, &engine.conventions().jump)
            .and_then(|v| v.as_str())
            .map(String::from)
            .or(static_jump);
        let values = ctx.socket_values(scope.entry);

        if let Some(jump) = jump {
            let target = engine.require_socket(&jump, scope.entry, ctx)?;
            debug!(context_id = %ctx.id, node = %node, target = %jump, "Final jump");
            Self::unwind_to(engine, &target, ctx)?;
            ctx.process = target.process.clone();
            ctx.bind_all(&target, values);
            return Ok(Transition::advance(target));
        }

        let Some(frame) = ctx.call_stack.pop() else {
            info!(context_id = %ctx.id, node = %node, "Process instance ended");
            return Ok(Transition::stop());
        };

        let caller = engine.blueprint(&frame.socket.process)?;
        let caller_node = caller.sockets.get(frame.socket.index)
            .map(|s| s.node)
            .ok_or_else(|| ExecutionError::SocketNotFound {
                name: node.clone(),
                from: frame.socket.to_string(),
            })?;
        let exit = caller.exit_socket(caller_node, node).ok_or_else(|| ExecutionError::SocketNotFound {
            name: node.clone(),
            from: caller.describe(frame.socket.index),
        })?;
        let target = SocketRef::new(caller.name.clone(), exit);

        ctx.process = frame.socket.process;
        ctx.variables = frame.variables;
        ctx.bind_all(&target, values);

        info!(context_id = %ctx.id, node = %node, process = %ctx.process, depth = ctx.call_stack.depth(), "Returned from subprocess");
        Ok(Transition::advance(target))
    }
}
