use async_trait::async_trait;
use tracing::debug;
use crate::dsl::NodeKind;
use crate::error::{ExecutionError, Result};
use crate::handlers::HandlerCall;
use crate::runtime::context::TokenContext;
use crate::runtime::engine::Engine;
use crate::runtime::node::{NodeExecutor, NodeScope, Transition};

/// Runs the handler bound to an Activity node and follows the socket it
/// names. Without a handler the node is a pass-through.
#[derive(Debug)]
pub struct ActivityExecutor;

#[async_trait]
impl NodeExecutor for ActivityExecutor {
    fn kind(&self) -> &str { "activity" }

    async fn execute(&self, engine: &Engine, scope: &NodeScope<'_>, ctx: &mut TokenContext) -> Result<Transition> {
        let node = &scope.node.name;
        let candidate = scope.default_exit();

        let handler = match &scope.node.kind {
            NodeKind::Activity { handler: Some(h) } => h,
            _ => {
                return candidate
                    .map(Transition::advance)
                    .ok_or_else(|| ExecutionError::NoDefaultExitSocket { node: node.clone() });
            }
        };

        let call = HandlerCall {
            node: node.clone(),
            kind: self.kind().to_string(),
            entry: scope.entry.clone(),
            candidate: candidate.map(|s| scope.blueprint.socket(s.index).name.clone()),
            params: ctx.socket_values(scope.entry),
        };
        let outcome = engine.execute_handler(handler, call, ctx).await?;

        let next_name = outcome.next
            .ok_or_else(|| ExecutionError::MissingNextSocket { node: node.clone() })?;

        let mut replacement = outcome.context;
        let target = replacement.as_mut().unwrap_or(ctx);
        let next = engine.require_socket(&next_name, scope.entry, target)?;
        target.bind_all(&next, outcome.outputs);

        debug!(context_id = %target.id, node = %node, next = %next_name, "Activity completed");
        Ok(Transition::advance(next).with_replacement(replacement))
    }
}
