use thiserror::Error;
use uuid::Uuid;

/// Fatal conditions raised by node executors and the driver loop.
#[derive(Error, Debug)]
pub enum ExecutionError {
    #[error("Handler of node {node} completed without a next socket")]
    MissingNextSocket { node: String },

    #[error("Node {node} has no default exit socket")]
    NoDefaultExitSocket { node: String },

    #[error("Fork {node}: exit socket '{socket}' declares no collection element parameter '{param}'")]
    NoCollectionElementForFork { node: String, socket: String, param: String },

    #[error("Process {process} has no initial node named '{name}'")]
    InitialNodeNotFound { process: String, name: String },

    #[error("Node '{name}' in process {process} is not an initial node")]
    NotAnInitialNode { process: String, name: String },

    #[error("Subprocess node {node} has no resolvable subprocess")]
    MissingSubprocess { node: String },

    #[error("Visual node {node} failed: {source}")]
    VisualExecutionFailed {
        node: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("Socket '{name}' could not be resolved from {from}")]
    SocketNotFound { name: String, from: String },

    #[error("No executor registered for node type: {0}")]
    UnknownNodeType(String),

    #[error("No handler registered under name: {0}")]
    UnknownHandler(String),

    #[error("Process not found: {0}")]
    UnknownProcess(String),

    #[error("Exit socket {0} is not connected")]
    UnconnectedExitSocket(String),

    #[error("Context {0} has no current socket")]
    NoCurrentSocket(Uuid),

    #[error("Context not found: {0}")]
    ContextNotFound(Uuid),

    #[error("Workflow task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("Context {0} is not suspended")]
    NotSuspended(Uuid),

    #[error("Context {context} exceeded the step limit of {limit}")]
    StepLimitExceeded { context: Uuid, limit: usize },

    #[error(transparent)]
    Script(anyhow::Error),

    #[error(transparent)]
    Handler(anyhow::Error),

    #[error(transparent)]
    Store(anyhow::Error),
}

/// Errors surfaced by the public `Engine` API.
#[derive(Error, Debug)]
pub enum EngineError {
    /// An executor failed; carries the socket qualifier and the serialized
    /// context so the surrounding service can report the failed instance.
    #[error("Execution aborted at {qualifier}: {source}")]
    Aborted {
        qualifier: String,
        state: String,
        #[source]
        source: ExecutionError,
    },

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Failed to compile process: {0}")]
    Compile(#[source] anyhow::Error),
}

impl EngineError {
    /// The underlying taxonomy entry, looking through `Aborted`.
    pub fn execution(&self) -> Option<&ExecutionError> {
        match self {
            EngineError::Aborted { source, .. } => Some(source),
            EngineError::Execution(e) => Some(e),
            EngineError::Compile(_) => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, ExecutionError>;
