use async_trait::async_trait;
use crate::error::{ExecutionError, Result};
use crate::runtime::context::TokenContext;
use crate::runtime::engine::Engine;
use crate::runtime::node::{NodeExecutor, NodeScope, Transition};

/// The engine positions new instances at the Initial node's default exit
/// socket itself, so there is nothing left to do here.
#[derive(Debug)]
pub struct InitialExecutor;

#[async_trait]
impl NodeExecutor for InitialExecutor {
    fn kind(&self) -> &str { "initial" }

    async fn execute(&self, _engine: &Engine, _scope: &NodeScope<'_>, _ctx: &mut TokenContext) -> Result<Transition> {
        Ok(Transition::hold())
    }
}

/// Stand-in for a node not modelled yet: passes straight through.
#[derive(Debug)]
pub struct PlaceholderExecutor;

#[async_trait]
impl NodeExecutor for PlaceholderExecutor {
    fn kind(&self) -> &str { "placeholder" }

    async fn execute(&self, _engine: &Engine, scope: &NodeScope<'_>, _ctx: &mut TokenContext) -> Result<Transition> {
        scope.default_exit()
            .map(Transition::advance)
            .ok_or_else(|| ExecutionError::NoDefaultExitSocket { node: scope.node.name.clone() })
    }
}
