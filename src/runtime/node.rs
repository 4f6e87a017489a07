use async_trait::async_trait;
use uuid::Uuid;
use crate::error::Result;
use crate::runtime::blueprint::{Blueprint, BlueprintNode, SocketRef};
use crate::runtime::context::TokenContext;
use crate::runtime::engine::Engine;

/// Where the token goes after a transition.
#[derive(Debug, Clone, PartialEq)]
pub enum Next {
    /// Move to this socket and keep running.
    Advance(SocketRef),
    /// Checkpoint and leave the driver loop until an external event.
    Suspend,
    /// This context's run ends.
    Stop,
    /// Leave position and lifecycle untouched.
    Hold,
}

/// Decision returned by a node executor.
#[derive(Debug)]
pub struct Transition {
    pub next: Next,
    /// Context the driver continues with instead of the one it passed in.
    pub replacement: Option<TokenContext>,
    /// Children created by this transition; queued once the driver has
    /// checkpointed the parent.
    pub spawned: Vec<Uuid>,
    /// Save the context before continuing.
    pub checkpoint: bool,
}

impl Transition {
    pub fn new(next: Next) -> Self {
        Self { next, replacement: None, spawned: Vec::new(), checkpoint: false }
    }

    pub fn advance(socket: SocketRef) -> Self {
        Self::new(Next::Advance(socket))
    }

    pub fn suspend() -> Self {
        Self::new(Next::Suspend)
    }

    pub fn stop() -> Self {
        Self::new(Next::Stop)
    }

    pub fn hold() -> Self {
        Self::new(Next::Hold)
    }

    pub fn with_replacement(mut self, ctx: Option<TokenContext>) -> Self {
        self.replacement = ctx;
        self
    }

    pub fn with_spawned(mut self, spawned: Vec<Uuid>) -> Self {
        self.spawned = spawned;
        self
    }

    pub fn with_checkpoint(mut self) -> Self {
        self.checkpoint = true;
        self
    }
}

/// Everything an executor needs to know about the node being executed.
pub struct NodeScope<'a> {
    pub blueprint: &'a Blueprint,
    pub node: &'a BlueprintNode,
    pub node_index: usize,
    /// The entry socket the token arrived on.
    pub entry: &'a SocketRef,
}

impl NodeScope<'_> {
    pub fn socket_ref(&self, index: usize) -> SocketRef {
        SocketRef::new(self.blueprint.name.clone(), index)
    }

    pub fn default_exit(&self) -> Option<SocketRef> {
        self.blueprint.default_exit(self.node_index).map(|s| self.socket_ref(s))
    }

    pub fn exit_named(&self, name: &str) -> Option<SocketRef> {
        self.blueprint.exit_socket(self.node_index, name).map(|s| self.socket_ref(s))
    }

    pub fn entry_name(&self) -> &str {
        &self.blueprint.socket(self.entry.index).name
    }
}

/// Transition logic of one node type.
#[async_trait]
pub trait NodeExecutor: Send + Sync {
    /// Registry tag, matching `NodeKind::tag`.
    fn kind(&self) -> &str;
    async fn execute(&self, engine: &Engine, scope: &NodeScope<'_>, ctx: &mut TokenContext) -> Result<Transition>;
}
