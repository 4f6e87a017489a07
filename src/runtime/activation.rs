use serde::{Serialize, Deserialize};
use uuid::Uuid;

/// Why a context was queued for a driver pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ActivationReason {
    /// A fork spawned it.
    Spawned,
    /// A join resumed it.
    Joined,
    /// An external event (task completion, UI callback) resumed it.
    External,
}

/// Unit of work on the activation queue.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Activation {
    pub context_id: Uuid,
    pub reason: ActivationReason,
}

impl Activation {
    pub fn new(context_id: Uuid, reason: ActivationReason) -> Self {
        Self { context_id, reason }
    }
}
