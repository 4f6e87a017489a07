use std::collections::HashMap;
use serde::{Serialize, Deserialize};
use serde_json::Value;
use uuid::Uuid;
use crate::runtime::blueprint::SocketRef;
use crate::runtime::call_stack::CallStack;

/// Disposition the driver acts on after each transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Lifecycle {
    Continue,
    SuspendImmediate,
    Stop,
    Resume,
}

/// Runtime state of one process instance or one forked branch of it.
///
/// Owned by exactly one driver between load and save; parent, root and
/// children are referred to by id and resolved through the `ContextStore`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenContext {
    pub id: Uuid,
    pub root: Uuid,
    pub parent: Option<Uuid>,
    /// Process whose graph `current` lives in.
    pub process: String,
    pub current: Option<SocketRef>,
    pub lifecycle: Lifecycle,
    pub call_stack: CallStack,
    /// Process-scoped variables of the executing process.
    pub variables: HashMap<String, Value>,
    pub creator: Option<String>,
    bindings: HashMap<SocketRef, HashMap<String, Value>>,
    /// Most recent entry sockets in dispatch order.
    pub trail: Vec<SocketRef>,
}

impl TokenContext {
    pub fn new_root(process: impl Into<String>, creator: Option<String>) -> Self {
        let id = Uuid::new_v4();
        Self {
            id,
            root: id,
            parent: None,
            process: process.into(),
            current: None,
            lifecycle: Lifecycle::Continue,
            call_stack: CallStack::new(),
            variables: HashMap::new(),
            creator,
            bindings: HashMap::new(),
            trail: Vec::new(),
        }
    }

    /// Fresh branch context: same process, call stack and variables, no bindings.
    pub fn new_child(&self) -> Self {
        Self {
            id: Uuid::new_v4(),
            root: self.root,
            parent: Some(self.id),
            process: self.process.clone(),
            current: None,
            lifecycle: Lifecycle::Continue,
            call_stack: self.call_stack.clone(),
            variables: self.variables.clone(),
            creator: self.creator.clone(),
            bindings: HashMap::new(),
            trail: Vec::new(),
        }
    }

    pub fn is_root(&self) -> bool {
        self.parent.is_none()
    }

    pub fn bind(&mut self, socket: &SocketRef, name: impl Into<String>, value: Value) {
        self.bindings.entry(socket.clone()).or_default().insert(name.into(), value);
    }

    pub fn binding(&self, socket: &SocketRef, name: &str) -> Option<&Value> {
        self.bindings.get(socket).and_then(|values| values.get(name))
    }

    pub fn is_bound(&self, socket: &SocketRef, name: &str) -> bool {
        self.binding(socket, name).is_some()
    }

    /// All values bound on `socket` (empty if none).
    pub fn socket_values(&self, socket: &SocketRef) -> HashMap<String, Value> {
        self.bindings.get(socket).cloned().unwrap_or_default()
    }

    /// Copies every binding of `from` onto `to`, overwriting same-named values.
    pub fn copy_bindings(&mut self, from: &SocketRef, to: &SocketRef) {
        if from == to {
            return;
        }
        let values = self.socket_values(from);
        if values.is_empty() {
            return;
        }
        self.bindings.entry(to.clone()).or_default().extend(values);
    }

    /// Removes and returns the values bound on `socket`.
    pub fn take_bindings(&mut self, socket: &SocketRef) -> HashMap<String, Value> {
        self.bindings.remove(socket).unwrap_or_default()
    }

    /// Replaces whatever `socket` held with `values`.
    pub fn set_bindings(&mut self, socket: &SocketRef, values: HashMap<String, Value>) {
        if values.is_empty() {
            self.bindings.remove(socket);
        } else {
            self.bindings.insert(socket.clone(), values);
        }
    }

    /// Appends `socket` to the trail, keeping at most `limit` entries.
    pub fn record_visit(&mut self, socket: &SocketRef, limit: usize) {
        if limit == 0 {
            return;
        }
        self.trail.push(socket.clone());
        if self.trail.len() > limit {
            let excess = self.trail.len() - limit;
            self.trail.drain(..excess);
        }
    }

    pub fn bind_all(&mut self, socket: &SocketRef, values: HashMap<String, Value>) {
        if values.is_empty() {
            return;
        }
        self.bindings.entry(socket.clone()).or_default().extend(values);
    }

    /// Bound value at the current socket.
    pub fn current_value(&self, name: &str) -> Option<&Value> {
        self.current.as_ref().and_then(|s| self.binding(s, name))
    }
}
