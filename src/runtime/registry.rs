use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;
use crate::nodes;
use crate::runtime::node::NodeExecutor;

/// Node-type tag → executor table.
pub struct ExecutorRegistry {
    executors: HashMap<String, Arc<dyn NodeExecutor>>,
}

impl ExecutorRegistry {
    pub fn empty() -> Self {
        Self { executors: HashMap::new() }
    }

    /// Registry with an executor for every built-in node type.
    pub fn standard() -> Self {
        let mut registry = Self::empty();
        nodes::register_all(&mut registry);
        registry
    }

    /// Registers (or replaces) the executor for `executor.kind()`.
    pub fn register(&mut self, executor: Arc<dyn NodeExecutor>) {
        let kind = executor.kind().to_string();
        debug!(kind = %kind, "Registering node executor");
        self.executors.insert(kind, executor);
    }

    pub fn get(&self, kind: &str) -> Option<Arc<dyn NodeExecutor>> {
        self.executors.get(kind).cloned()
    }

    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<_> = self.executors.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl Default for ExecutorRegistry {
    fn default() -> Self {
        Self::standard()
    }
}
