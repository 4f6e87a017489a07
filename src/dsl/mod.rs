pub mod builder;

use std::collections::HashMap;
use serde::{Serialize, Deserialize};
use serde_json::Value;

/// A process definition as authored (YAML or builder).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Process {
    pub name: String,
    #[serde(default)]
    pub variables: HashMap<String, Value>,
    pub nodes: Vec<Node>,
    #[serde(default)]
    pub connections: Vec<Connection>,
}

/// Node type tag plus the static properties each type carries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum NodeKind {
    Initial,
    Activity {
        #[serde(default)]
        handler: Option<String>,
    },
    Decision {
        #[serde(default)]
        expression: Option<String>,
    },
    Fork,
    Join,
    Final {
        #[serde(default)]
        jump_target: Option<String>,
    },
    Subprocess {
        #[serde(default)]
        process: Option<String>,
    },
    Workflow {
        #[serde(default)]
        task: TaskPrototype,
    },
    WorkflowEnd,
    Placeholder,
    Visual {
        #[serde(default)]
        visual: Option<String>,
    },
}

impl NodeKind {
    /// Tag used by the executor registry.
    pub fn tag(&self) -> &'static str {
        match self {
            NodeKind::Initial => "initial",
            NodeKind::Activity { .. } => "activity",
            NodeKind::Decision { .. } => "decision",
            NodeKind::Fork => "fork",
            NodeKind::Join => "join",
            NodeKind::Final { .. } => "final",
            NodeKind::Subprocess { .. } => "subprocess",
            NodeKind::Workflow { .. } => "workflow",
            NodeKind::WorkflowEnd => "workflow_end",
            NodeKind::Placeholder => "placeholder",
            NodeKind::Visual { .. } => "visual",
        }
    }
}

/// Static descriptor a Workflow node stamps its tasks from.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TaskPrototype {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub role: Option<String>,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub priority: Option<i64>,
    #[serde(default)]
    pub permissions: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub name: String,
    #[serde(flatten)]
    pub kind: NodeKind,
    #[serde(default)]
    pub wait_state: bool,
    #[serde(default)]
    pub sockets: Vec<Socket>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Entry,
    Exit,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Socket {
    pub name: String,
    pub direction: Direction,
    #[serde(default)]
    pub default: bool,
    #[serde(default)]
    pub params: Vec<Param>,
}

/// Declared socket parameter. `value` is a literal, `expr` is evaluated by the
/// script engine; both only apply while the parameter is unbound.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Param {
    pub name: String,
    #[serde(default)]
    pub value: Option<Value>,
    #[serde(default)]
    pub expr: Option<String>,
}

/// Connection from an exit socket to an entry socket, both written `Node.socket`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Connection {
    pub from: String,
    pub to: String,
}
