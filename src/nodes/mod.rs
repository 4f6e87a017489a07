use std::sync::Arc;
use crate::runtime::registry::ExecutorRegistry;

pub mod activity;
pub mod common;
pub mod flow;
pub mod subprocess;
pub mod visual;
pub mod workflow;

pub fn register_all(registry: &mut ExecutorRegistry) {
    registry.register(Arc::new(common::InitialExecutor));
    registry.register(Arc::new(common::PlaceholderExecutor));
    registry.register(Arc::new(activity::ActivityExecutor));
    registry.register(Arc::new(flow::DecisionExecutor));
    registry.register(Arc::new(flow::ForkExecutor));
    registry.register(Arc::new(flow::JoinExecutor));
    registry.register(Arc::new(subprocess::SubprocessExecutor));
    registry.register(Arc::new(subprocess::FinalExecutor));
    registry.register(Arc::new(workflow::WorkflowExecutor));
    registry.register(Arc::new(workflow::WorkflowEndExecutor));
    registry.register(Arc::new(visual::VisualExecutor));
}
