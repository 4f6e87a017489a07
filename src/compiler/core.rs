use crate::dsl::{Process, Node, NodeKind, Direction};
use crate::runtime::blueprint::{Blueprint, BlueprintNode, BlueprintSocket, NodeIndex, SocketIndex};
use std::collections::{HashMap, HashSet};
use anyhow::{Result, anyhow, bail};

/// Turns an authored `Process` into an indexed `Blueprint`, rejecting graphs
/// the engine cannot execute.
pub struct Compiler {
    id_map: HashMap<String, Vec<NodeIndex>>,
}

impl Compiler {
    pub fn new() -> Self {
        Self {
            id_map: HashMap::new(),
        }
    }

    pub fn compile(&mut self, process: Process) -> Result<Blueprint> {
        self.id_map.clear();

        // 1. Index nodes
        for (idx, node) in process.nodes.iter().enumerate() {
            if node.name.contains('.') {
                bail!("Node name '{}' must not contain '.'", node.name);
            }
            let same_name = self.id_map.entry(node.name.clone()).or_default();
            if same_name.iter().any(|&other| !Self::may_share_name(&process.nodes[other].kind, &node.kind)) {
                bail!("Duplicate node name: {}", node.name);
            }
            same_name.push(idx);
        }

        // 2. Flatten sockets
        let mut nodes = Vec::with_capacity(process.nodes.len());
        let mut sockets = Vec::new();
        for (idx, node) in process.nodes.iter().enumerate() {
            Self::validate_node(node)?;
            let mut socket_indices = Vec::with_capacity(node.sockets.len());
            for socket in &node.sockets {
                socket_indices.push(sockets.len());
                sockets.push(BlueprintSocket {
                    name: socket.name.clone(),
                    direction: socket.direction,
                    node: idx,
                    default: socket.default,
                    params: socket.params.clone(),
                    target: None,
                });
            }
            nodes.push(BlueprintNode {
                name: node.name.clone(),
                kind: node.kind.clone(),
                wait_state: node.wait_state,
                sockets: socket_indices,
            });
        }

        let mut blueprint = Blueprint {
            name: process.name,
            variables: process.variables,
            nodes,
            sockets,
        };

        // 3. Wire connections
        for connection in &process.connections {
            let from = self.resolve_socket(&blueprint, &connection.from, Direction::Exit)?;
            let to = self.resolve_socket(&blueprint, &connection.to, Direction::Entry)?;
            let socket = &mut blueprint.sockets[from];
            if socket.target.is_some() {
                bail!("Exit socket {} has more than one connection", connection.from);
            }
            socket.target = Some(to);
        }

        Ok(blueprint)
    }

    fn validate_node(node: &Node) -> Result<()> {
        let mut seen = HashSet::new();
        let mut default_entries = 0;
        let mut default_exits = 0;
        for socket in &node.sockets {
            if !seen.insert((socket.direction, socket.name.as_str())) {
                bail!("Duplicate {:?} socket '{}' on node {}", socket.direction, socket.name, node.name);
            }
            if socket.default {
                match socket.direction {
                    Direction::Entry => default_entries += 1,
                    Direction::Exit => default_exits += 1,
                }
            }
        }
        if default_entries > 1 {
            bail!("Node {} has more than one default entry socket", node.name);
        }
        if default_exits > 1 {
            bail!("Node {} has more than one default exit socket", node.name);
        }

        if matches!(node.kind, NodeKind::Initial) {
            if node.sockets.iter().any(|s| s.direction == Direction::Entry) {
                bail!("Initial node {} must not have entry sockets", node.name);
            }
            if default_exits == 0 {
                bail!("Initial node {} has no default exit socket", node.name);
            }
        }
        Ok(())
    }

    /// A subprocess's Initial node and the Final node returning through the
    /// same socket name may be called alike.
    fn may_share_name(a: &NodeKind, b: &NodeKind) -> bool {
        matches!(
            (a, b),
            (NodeKind::Initial, NodeKind::Final { .. }) | (NodeKind::Final { .. }, NodeKind::Initial)
        )
    }

    fn resolve_socket(&self, blueprint: &Blueprint, qualified: &str, direction: Direction) -> Result<SocketIndex> {
        let (node_name, socket_name) = qualified.split_once('.')
            .ok_or_else(|| anyhow!("Connection endpoint '{}' is not of the form Node.socket", qualified))?;
        let candidates = self.id_map.get(node_name)
            .ok_or_else(|| anyhow!("Connection references unknown node: {}", node_name))?;
        let socket = candidates.iter().find_map(|&node| match direction {
            Direction::Exit => blueprint.exit_socket(node, socket_name),
            Direction::Entry => blueprint.entry_socket(node, socket_name),
        });
        socket.ok_or_else(|| anyhow!("Node {} has no {:?} socket named '{}'", node_name, direction, socket_name))
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}
