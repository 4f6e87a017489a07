use async_trait::async_trait;
use tracing::debug;
use crate::dsl::NodeKind;
use crate::error::{ExecutionError, Result};
use crate::runtime::context::TokenContext;
use crate::runtime::engine::Engine;
use crate::runtime::node::{NodeExecutor, NodeScope, Transition};

/// UI-driven step. Wait-state nodes always suspend; otherwise the visual
/// adapter picks the exit socket, and the context suspends until
/// `Engine::resume` when it has no answer yet.
#[derive(Debug)]
pub struct VisualExecutor;

#[async_trait]
impl NodeExecutor for VisualExecutor {
    fn kind(&self) -> &str { "visual" }

    async fn execute(&self, engine: &Engine, scope: &NodeScope<'_>, ctx: &mut TokenContext) -> Result<Transition> {
        if scope.node.wait_state {
            return Ok(Transition::suspend());
        }
        let Some(adapter) = engine.visual_adapter() else {
            debug!(context_id = %ctx.id, node = %scope.node.name, "No visual adapter; waiting for callback");
            return Ok(Transition::suspend());
        };
        let visual = match &scope.node.kind {
            NodeKind::Visual { visual } => visual.as_deref(),
            _ => None,
        };

        let picked = adapter.execute_visual(self.kind(), visual, ctx, scope.entry).await
            .map_err(|source| ExecutionError::VisualExecutionFailed { node: scope.node.name.clone(), source })?;

        match picked {
            Some(name) => Ok(Transition::advance(engine.require_socket(&name, scope.entry, ctx)?)),
            None => Ok(Transition::suspend()),
        }
    }
}
