use crate::dsl::{Process, Node, NodeKind, Socket, Param, Direction, Connection, TaskPrototype};
use std::collections::HashMap;
use serde_json::Value;

pub struct ProcessBuilder {
    name: String,
    variables: HashMap<String, Value>,
    pub nodes: Vec<Node>, // public so tests can tweak nodes directly
    connections: Vec<Connection>,
}

impl ProcessBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            variables: HashMap::new(),
            nodes: Vec::new(),
            connections: Vec::new(),
        }
    }

    pub fn var(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.variables.insert(key.to_string(), value.into());
        self
    }

    pub fn node(self, name: &str, kind: NodeKind) -> NodeBuilder {
        NodeBuilder {
            process_builder: self,
            node: Node {
                name: name.to_string(),
                kind,
                wait_state: false,
                sockets: Vec::new(),
            },
        }
    }

    /// Initial node with a default exit socket named `next`.
    pub fn initial(self, name: &str) -> Self {
        self.node(name, NodeKind::Initial).default_exit("next").build()
    }

    pub fn activity(self, name: &str, handler: Option<&str>) -> NodeBuilder {
        self.node(name, NodeKind::Activity { handler: handler.map(str::to_string) })
            .default_entry("in")
    }

    pub fn decision(self, name: &str, expression: Option<&str>) -> NodeBuilder {
        self.node(name, NodeKind::Decision { expression: expression.map(str::to_string) })
            .default_entry("in")
    }

    pub fn fork(self, name: &str) -> NodeBuilder {
        self.node(name, NodeKind::Fork).default_entry("in")
    }

    pub fn join(self, name: &str) -> NodeBuilder {
        self.node(name, NodeKind::Join).default_entry("in")
    }

    /// Final node with a single entry socket; returns control to the caller's
    /// exit socket named like the node.
    pub fn final_node(self, name: &str) -> Self {
        self.node(name, NodeKind::Final { jump_target: None })
            .default_entry("in")
            .build()
    }

    pub fn subprocess(self, name: &str, process: Option<&str>) -> NodeBuilder {
        self.node(name, NodeKind::Subprocess { process: process.map(str::to_string) })
    }

    pub fn workflow(self, name: &str, task: TaskPrototype) -> NodeBuilder {
        self.node(name, NodeKind::Workflow { task }).default_entry("in")
    }

    pub fn workflow_end(self, name: &str) -> Self {
        self.node(name, NodeKind::WorkflowEnd).default_entry("in").build()
    }

    pub fn placeholder(self, name: &str) -> NodeBuilder {
        self.node(name, NodeKind::Placeholder).default_entry("in")
    }

    pub fn visual(self, name: &str, visual: Option<&str>) -> NodeBuilder {
        self.node(name, NodeKind::Visual { visual: visual.map(str::to_string) })
            .default_entry("in")
    }

    /// Connects `Node.socket` (exit) to `Node.socket` (entry).
    pub fn connect(mut self, from: &str, to: &str) -> Self {
        self.connections.push(Connection {
            from: from.to_string(),
            to: to.to_string(),
        });
        self
    }

    pub fn build(self) -> Process {
        Process {
            name: self.name,
            variables: self.variables,
            nodes: self.nodes,
            connections: self.connections,
        }
    }
}

pub struct NodeBuilder {
    process_builder: ProcessBuilder,
    node: Node,
}

impl NodeBuilder {
    fn socket(mut self, name: &str, direction: Direction, default: bool) -> Self {
        self.node.sockets.push(Socket {
            name: name.to_string(),
            direction,
            default,
            params: Vec::new(),
        });
        self
    }

    pub fn entry(self, name: &str) -> Self {
        self.socket(name, Direction::Entry, false)
    }

    pub fn default_entry(self, name: &str) -> Self {
        self.socket(name, Direction::Entry, true)
    }

    pub fn exit(self, name: &str) -> Self {
        self.socket(name, Direction::Exit, false)
    }

    pub fn default_exit(self, name: &str) -> Self {
        self.socket(name, Direction::Exit, true)
    }

    /// Declares a parameter on the most recently added socket.
    pub fn param(self, name: &str) -> Self {
        self.push_param(Param { name: name.to_string(), value: None, expr: None })
    }

    pub fn param_value(self, name: &str, value: impl Into<Value>) -> Self {
        self.push_param(Param { name: name.to_string(), value: Some(value.into()), expr: None })
    }

    pub fn param_expr(self, name: &str, expr: &str) -> Self {
        self.push_param(Param { name: name.to_string(), value: None, expr: Some(expr.to_string()) })
    }

    fn push_param(mut self, param: Param) -> Self {
        if let Some(socket) = self.node.sockets.last_mut() {
            socket.params.push(param);
        }
        self
    }

    pub fn wait_state(mut self) -> Self {
        self.node.wait_state = true;
        self
    }

    pub fn build(mut self) -> ProcessBuilder {
        self.process_builder.nodes.push(self.node);
        self.process_builder
    }
}
