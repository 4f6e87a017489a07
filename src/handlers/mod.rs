use async_trait::async_trait;
use serde_json::Value;
use crate::runtime::blueprint::SocketRef;
use crate::runtime::context::TokenContext;
use anyhow::Result;
use std::collections::HashMap;
use std::fmt::Debug;

pub mod builtin;
pub mod http;

/// What the engine hands a handler for one Activity execution.
#[derive(Debug, Clone)]
pub struct HandlerCall {
    pub node: String,
    /// Handler kind; always "activity" for Activity nodes.
    pub kind: String,
    pub entry: SocketRef,
    /// Name of the default exit socket, if the node has one.
    pub candidate: Option<String>,
    /// Values bound on the entry socket.
    pub params: HashMap<String, Value>,
}

/// Result of a handler run.
#[derive(Debug, Default)]
pub struct HandlerOutcome {
    /// Exit socket name to continue at.
    pub next: Option<String>,
    /// Values bound on the next socket.
    pub outputs: HashMap<String, Value>,
    /// Replacement context, e.g. after a rollback.
    pub context: Option<TokenContext>,
}

impl HandlerOutcome {
    pub fn next(name: impl Into<String>) -> Self {
        Self { next: Some(name.into()), ..Default::default() }
    }

    /// Continue at the candidate socket.
    pub fn proceed(call: &HandlerCall) -> Self {
        Self { next: call.candidate.clone(), ..Default::default() }
    }

    pub fn with_output(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.outputs.insert(name.into(), value.into());
        self
    }
}

/// Business logic bound to Activity nodes by name.
#[async_trait]
pub trait ActivityHandler: Send + Sync + Debug {
    fn name(&self) -> &str;
    async fn execute(&self, ctx: &mut TokenContext, call: HandlerCall) -> Result<HandlerOutcome>;
}
