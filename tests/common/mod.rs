#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokenflow::handlers::{ActivityHandler, HandlerCall, HandlerOutcome};
use tokenflow::runtime::context::TokenContext;
use tokenflow::runtime::engine::Engine;
use anyhow::Result;

/// Copies every entry-socket value into the process variables.
#[derive(Debug)]
pub struct CaptureHandler;

#[async_trait]
impl ActivityHandler for CaptureHandler {
    fn name(&self) -> &str { "capture" }

    async fn execute(&self, ctx: &mut TokenContext, call: HandlerCall) -> Result<HandlerOutcome> {
        ctx.variables.extend(call.params.clone());
        Ok(HandlerOutcome::proceed(&call))
    }
}

/// Emits fixed outputs on the candidate socket.
#[derive(Debug)]
pub struct EchoHandler {
    pub outputs: HashMap<String, Value>,
}

#[async_trait]
impl ActivityHandler for EchoHandler {
    fn name(&self) -> &str { "echo" }

    async fn execute(&self, _ctx: &mut TokenContext, call: HandlerCall) -> Result<HandlerOutcome> {
        let mut outcome = HandlerOutcome::proceed(&call);
        outcome.outputs = self.outputs.clone();
        Ok(outcome)
    }
}

/// Records the `element` value of every call, optionally after a delay.
#[derive(Debug, Default)]
pub struct CollectHandler {
    pub seen: Arc<Mutex<Vec<Value>>>,
    pub delay_ms: u64,
}

#[async_trait]
impl ActivityHandler for CollectHandler {
    fn name(&self) -> &str { "collect" }

    async fn execute(&self, _ctx: &mut TokenContext, call: HandlerCall) -> Result<HandlerOutcome> {
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }
        let element = call.params.get("element").cloned().unwrap_or(Value::Null);
        self.seen.lock().unwrap().push(element);
        Ok(HandlerOutcome::proceed(&call))
    }
}

pub fn engine_with_capture() -> Engine {
    let mut engine = Engine::new();
    engine.register_handler(Arc::new(CaptureHandler));
    engine
}

pub fn params(pairs: &[(&str, Value)]) -> HashMap<String, Value> {
    pairs.iter().map(|(k, v)| (k.to_string(), v.clone())).collect()
}

/// Names of the visited entry sockets as `Node.socket`.
pub fn trail_names(engine: &Engine, ctx: &TokenContext) -> Vec<String> {
    ctx.trail.iter()
        .map(|s| {
            let bp = engine.blueprint(&s.process).unwrap();
            let socket = bp.socket(s.index);
            format!("{}.{}", bp.node(socket.node).name, socket.name)
        })
        .collect()
}
