pub mod compiler;
pub mod config;
pub mod dsl;
pub mod error;
pub mod handlers;
pub mod nodes;
pub mod runtime;

pub use config::EngineConfig;
pub use error::{EngineError, ExecutionError};
pub use runtime::engine::Engine;
