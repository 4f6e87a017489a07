use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use serde::{Serialize, Deserialize, Serializer, Deserializer};
use serde_json::Value;
use crate::dsl::{Direction, NodeKind, Param};

pub type NodeIndex = usize;
pub type SocketIndex = usize;

/// Compiled, read-only process graph (shared between all running contexts).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Blueprint {
    pub name: String,
    pub variables: HashMap<String, Value>,
    pub nodes: Vec<BlueprintNode>,
    pub sockets: Vec<BlueprintSocket>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintNode {
    pub name: String,
    pub kind: NodeKind,
    pub wait_state: bool,
    pub sockets: Vec<SocketIndex>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlueprintSocket {
    pub name: String,
    pub direction: Direction,
    pub node: NodeIndex,
    pub default: bool,
    pub params: Vec<Param>,
    /// Connected entry socket (exit sockets only).
    pub target: Option<SocketIndex>,
}

impl BlueprintSocket {
    pub fn declares(&self, param: &str) -> bool {
        self.params.iter().any(|p| p.name == param)
    }
}

impl Blueprint {
    pub fn node(&self, index: NodeIndex) -> &BlueprintNode {
        &self.nodes[index]
    }

    pub fn socket(&self, index: SocketIndex) -> &BlueprintSocket {
        &self.sockets[index]
    }

    pub fn node_index(&self, name: &str) -> Option<NodeIndex> {
        self.nodes.iter().position(|n| n.name == name)
    }

    pub fn find_node(&self, name: &str) -> Option<&BlueprintNode> {
        self.nodes.iter().find(|n| n.name == name)
    }

    /// Indices of the nodes called `name`. An Initial and a Final node may
    /// share a name; every other name is unique.
    pub fn nodes_named<'a>(&'a self, name: &'a str) -> impl Iterator<Item = NodeIndex> + 'a {
        self.nodes.iter().enumerate()
            .filter(move |(_, n)| n.name == name)
            .map(|(i, _)| i)
    }

    pub fn initial_node(&self, name: &str) -> Option<NodeIndex> {
        self.nodes_named(name).find(|&i| matches!(self.nodes[i].kind, NodeKind::Initial))
    }

    /// Exit socket addressed as `node.socket`.
    pub fn qualified_exit(&self, node: &str, socket: &str) -> Option<SocketIndex> {
        self.nodes_named(node).find_map(|n| self.exit_socket(n, socket))
    }

    pub fn qualified_entry(&self, node: &str, socket: &str) -> Option<SocketIndex> {
        self.nodes_named(node).find_map(|n| self.entry_socket(n, socket))
    }

    fn socket_on(&self, node: NodeIndex, direction: Direction, name: Option<&str>) -> Option<SocketIndex> {
        self.nodes.get(node)?.sockets.iter().copied().find(|&s| {
            let socket = &self.sockets[s];
            socket.direction == direction && match name {
                Some(n) => socket.name == n,
                None => socket.default,
            }
        })
    }

    pub fn exit_socket(&self, node: NodeIndex, name: &str) -> Option<SocketIndex> {
        self.socket_on(node, Direction::Exit, Some(name))
    }

    pub fn entry_socket(&self, node: NodeIndex, name: &str) -> Option<SocketIndex> {
        self.socket_on(node, Direction::Entry, Some(name))
    }

    pub fn default_exit(&self, node: NodeIndex) -> Option<SocketIndex> {
        self.socket_on(node, Direction::Exit, None)
    }

    pub fn default_entry(&self, node: NodeIndex) -> Option<SocketIndex> {
        self.socket_on(node, Direction::Entry, None)
    }

    pub fn exit_sockets(&self, node: NodeIndex) -> impl Iterator<Item = SocketIndex> + '_ {
        self.nodes[node].sockets.iter().copied()
            .filter(|&s| self.sockets[s].direction == Direction::Exit)
    }

    /// `Node.socket` rendering used in logs and error qualifiers.
    pub fn describe(&self, socket: SocketIndex) -> String {
        match self.sockets.get(socket) {
            Some(s) => format!("{}/{}.{}", self.name, self.nodes[s.node].name, s.name),
            None => format!("{}/#{}", self.name, socket),
        }
    }
}

/// Stable address of a socket: owning process plus socket index.
/// Serialized as `"process#index"` so it can key JSON maps.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SocketRef {
    pub process: String,
    pub index: SocketIndex,
}

impl SocketRef {
    pub fn new(process: impl Into<String>, index: SocketIndex) -> Self {
        Self { process: process.into(), index }
    }
}

impl fmt::Display for SocketRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.process, self.index)
    }
}

impl FromStr for SocketRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (process, index) = s.rsplit_once('#')
            .ok_or_else(|| format!("invalid socket reference: {}", s))?;
        let index = index.parse::<SocketIndex>()
            .map_err(|e| format!("invalid socket index in {}: {}", s, e))?;
        Ok(SocketRef::new(process, index))
    }
}

impl Serialize for SocketRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for SocketRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}
