pub mod activation;
pub mod blueprint;
pub mod call_stack;
pub mod context;
pub mod engine;
pub mod node;
pub mod redis_storage;
pub mod registry;
pub mod script;
pub mod storage;
pub mod task;
pub mod visual;
