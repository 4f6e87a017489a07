use std::collections::HashMap;
use serde::{Serialize, Deserialize};
use serde_json::Value;
use crate::runtime::blueprint::SocketRef;

/// Return address of one subprocess call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Entry socket of the calling Subprocess node.
    pub socket: SocketRef,
    /// Caller's process-scoped variables, restored on return.
    pub variables: HashMap<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CallStack {
    frames: Vec<Frame>,
}

impl CallStack {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, frame: Frame) {
        self.frames.push(frame);
    }

    pub fn pop(&mut self) -> Option<Frame> {
        self.frames.pop()
    }

    pub fn peek(&self) -> Option<&Frame> {
        self.frames.last()
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    /// Frames from the innermost call outwards.
    pub fn ancestors(&self) -> impl Iterator<Item = &Frame> {
        self.frames.iter().rev()
    }
}
