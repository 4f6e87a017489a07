use std::collections::HashMap;
use std::sync::Mutex;
use anyhow::{Result, anyhow};
use evalexpr::{eval_with_context, ContextWithMutableVariables, DefaultNumericTypes, HashMapContext};
use serde_json::{Value, json};
use tracing::debug;
use crate::runtime::blueprint::SocketRef;
use crate::runtime::context::TokenContext;

/// Expression evaluator used by Decision nodes and parameter expressions.
///
/// Callers bracket every evaluation with `prepare_socket` / `finish_socket` so
/// the engine can scope variable visibility to one socket.
pub trait ScriptEngine: Send {
    fn prepare_socket(&mut self, socket: &SocketRef, ctx: &TokenContext) -> Result<()>;
    fn execute_script(&mut self, expr: &str, label: &str, scope_id: &str) -> Result<Value>;
    fn finish_socket(&mut self, socket: &SocketRef);
}

/// Hands out script engines per evaluation.
pub trait ScriptEngineFactory: Send + Sync {
    fn acquire(&self) -> Box<dyn ScriptEngine>;
    fn release(&self, engine: Box<dyn ScriptEngine>);
}

/// `evalexpr` backed engine. Sees the process variables overlaid with the
/// values bound on the prepared socket.
#[derive(Default)]
pub struct EvalexprScriptEngine {
    scope: Option<HashMapContext<DefaultNumericTypes>>,
}

impl ScriptEngine for EvalexprScriptEngine {
    fn prepare_socket(&mut self, socket: &SocketRef, ctx: &TokenContext) -> Result<()> {
        let mut vars = ctx.variables.clone();
        vars.extend(ctx.socket_values(socket));
        self.scope = Some(eval_context(&vars)?);
        Ok(())
    }

    fn execute_script(&mut self, expr: &str, label: &str, scope_id: &str) -> Result<Value> {
        let scope = self.scope.as_ref()
            .ok_or_else(|| anyhow!("Script '{}' executed outside of a prepared socket", label))?;
        let clean = strip_placeholders(expr);
        let result = eval_with_context(&clean, scope)
            .map_err(|e| anyhow!("Expression '{}' of {} failed: {}", expr, label, e))?;
        debug!(label, scope_id, expr, "Script evaluated");
        Ok(from_eval_value(result))
    }

    fn finish_socket(&mut self, _socket: &SocketRef) {
        self.scope = None;
    }
}

/// Unwraps `${name}` placeholders to `name`; every other brace is kept.
pub fn strip_placeholders(expr: &str) -> String {
    let mut out = String::with_capacity(expr.len());
    let mut rest = expr;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let inner = &rest[start + 2..];
        match inner.find('}') {
            Some(end) => {
                out.push_str(&inner[..end]);
                rest = &inner[end + 1..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

/// Pool of evalexpr engines capped at `capacity` idle instances.
pub struct EvalexprScriptFactory {
    pool: Mutex<Vec<Box<dyn ScriptEngine>>>,
    capacity: usize,
}

impl EvalexprScriptFactory {
    pub fn new(capacity: usize) -> Self {
        Self {
            pool: Mutex::new(Vec::with_capacity(capacity)),
            capacity,
        }
    }
}

impl ScriptEngineFactory for EvalexprScriptFactory {
    fn acquire(&self) -> Box<dyn ScriptEngine> {
        let pooled = self.pool.lock().ok().and_then(|mut pool| pool.pop());
        pooled.unwrap_or_else(|| Box::new(EvalexprScriptEngine::default()))
    }

    fn release(&self, engine: Box<dyn ScriptEngine>) {
        if let Ok(mut pool) = self.pool.lock() {
            if pool.len() < self.capacity {
                pool.push(engine);
            }
        }
    }
}

/// Builds an evalexpr context; values evalexpr cannot represent are skipped.
pub fn eval_context(vars: &HashMap<String, Value>) -> Result<HashMapContext<DefaultNumericTypes>> {
    let mut eval_ctx = HashMapContext::<DefaultNumericTypes>::new();
    for (k, v) in vars {
        if let Some(ev) = to_eval_value(v) {
            eval_ctx.set_value(k.clone(), ev)
                .map_err(|e| anyhow!("Cannot bind script variable {}: {}", k, e))?;
        }
    }
    Ok(eval_ctx)
}

pub fn to_eval_value(v: &Value) -> Option<evalexpr::Value> {
    match v {
        Value::String(s) => Some(evalexpr::Value::String(s.clone())),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() { Some(evalexpr::Value::Int(i)) }
            else { n.as_f64().map(evalexpr::Value::Float) }
        },
        Value::Bool(b) => Some(evalexpr::Value::Boolean(*b)),
        Value::Array(items) => {
            let tuple: Option<Vec<_>> = items.iter().map(to_eval_value).collect();
            tuple.map(evalexpr::Value::Tuple)
        },
        Value::Null => Some(evalexpr::Value::Empty),
        Value::Object(_) => None,
    }
}

pub fn from_eval_value(v: evalexpr::Value) -> Value {
    match v {
        evalexpr::Value::String(s) => Value::String(s),
        evalexpr::Value::Int(i) => json!(i),
        evalexpr::Value::Float(f) => json!(f),
        evalexpr::Value::Boolean(b) => Value::Bool(b),
        evalexpr::Value::Tuple(items) => Value::Array(items.into_iter().map(from_eval_value).collect()),
        evalexpr::Value::Empty => Value::Null,
        #[allow(unreachable_patterns)]
        _ => Value::Null,
    }
}

/// Truthiness used for routing: anything but null and `false`.
pub fn is_truthy(v: &Value) -> bool {
    !matches!(v, Value::Null | Value::Bool(false))
}
