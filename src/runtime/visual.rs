use async_trait::async_trait;
use anyhow::Result;
use crate::runtime::blueprint::SocketRef;
use crate::runtime::context::TokenContext;

/// UI side of Visual nodes. Returns the name of the exit socket the user
/// picked, or `None` while the step is still open.
#[async_trait]
pub trait VisualAdapter: Send + Sync {
    async fn execute_visual(
        &self,
        kind: &str,
        visual: Option<&str>,
        ctx: &TokenContext,
        entry: &SocketRef,
    ) -> Result<Option<String>>;
}
