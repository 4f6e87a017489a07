use serde::{Serialize, Deserialize};
use anyhow::{Result, Context as AnyhowContext};
use std::path::Path;
use std::time::Duration;

/// Engine settings, loadable from YAML. Missing keys take their defaults.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Maximum executor dispatches per driver pass.
    pub max_steps: usize,
    /// Per-activation timeout for workers, in seconds.
    pub activation_timeout_secs: u64,
    pub queue_capacity: usize,
    pub script_pool_size: usize,
    /// Record visited entry sockets on the context.
    pub record_trail: bool,
    /// Most recent trail entries kept per context.
    pub trail_limit: usize,
    pub conventions: Conventions,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_steps: 10_000,
            activation_timeout_secs: 60,
            queue_capacity: 1024,
            script_pool_size: 4,
            record_trail: true,
            trail_limit: 256,
            conventions: Conventions::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }

    pub fn activation_timeout(&self) -> Duration {
        Duration::from_secs(self.activation_timeout_secs)
    }
}

/// Conventional socket and parameter names the executors look for.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Conventions {
    pub yes: String,
    pub no: String,
    pub collection: String,
    pub element: String,
    pub resume: String,
    pub incomplete: String,
    pub out: String,
    pub published: String,
    pub task: String,
    pub subprocess: String,
    pub jump: String,
}

impl Default for Conventions {
    fn default() -> Self {
        Self {
            yes: "yes".to_string(),
            no: "no".to_string(),
            collection: "collection".to_string(),
            element: "element".to_string(),
            resume: "resume".to_string(),
            incomplete: "incomplete".to_string(),
            out: "out".to_string(),
            published: "published".to_string(),
            task: "task".to_string(),
            subprocess: "subprocess".to_string(),
            jump: "jump".to_string(),
        }
    }
}
