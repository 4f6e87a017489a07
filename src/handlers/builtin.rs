use async_trait::async_trait;
use serde_json::Value;
use crate::handlers::{ActivityHandler, HandlerCall, HandlerOutcome};
use crate::runtime::context::TokenContext;
use crate::runtime::script::{eval_context, from_eval_value};
use anyhow::{Result, anyhow};
use evalexpr::eval_with_context;
use tracing::info;

#[derive(Debug)]
pub struct LogHandler;

#[async_trait]
impl ActivityHandler for LogHandler {
    fn name(&self) -> &str {
        "log"
    }

    async fn execute(&self, ctx: &mut TokenContext, call: HandlerCall) -> Result<HandlerOutcome> {
        if let Some(msg) = call.params.get("msg").and_then(|v| v.as_str()) {
            info!(context_id = %ctx.id, node = %call.node, "[LOG] {}", msg);
        } else {
            info!(context_id = %ctx.id, node = %call.node, "[LOG] {:?}", call.params);
        }
        Ok(HandlerOutcome::proceed(&call))
    }
}

/// Writes process variables.
///
/// `assignments` is a list of `{key, value}` objects; `expression` is either
/// `var = expr` or a bare expression whose result goes to the `result` output.
#[derive(Debug)]
pub struct AssignHandler;

#[async_trait]
impl ActivityHandler for AssignHandler {
    fn name(&self) -> &str {
        "assign"
    }

    async fn execute(&self, ctx: &mut TokenContext, call: HandlerCall) -> Result<HandlerOutcome> {
        let mut outcome = HandlerOutcome::proceed(&call);

        if let Some(list) = call.params.get("assignments").and_then(|v| v.as_array()) {
            for item in list {
                if let (Some(k), Some(v)) = (item.get("key").and_then(|s| s.as_str()), item.get("value")) {
                    ctx.variables.insert(k.to_string(), v.clone());
                }
            }
        }

        if let Some(expr) = call.params.get("expression").and_then(|v| v.as_str()) {
            let (target_var, rhs) = match expr.split_once('=') {
                // keep comparison operators intact
                Some((left, right)) if !right.starts_with('=') && !left.ends_with(['!', '<', '>']) => {
                    (Some(left.trim()), right.trim())
                }
                _ => (None, expr),
            };

            let mut scope = ctx.variables.clone();
            scope.extend(call.params.clone());
            let eval_ctx = eval_context(&scope)?;
            let result = eval_with_context(rhs, &eval_ctx)
                .map_err(|e| anyhow!("Expression evaluation failed: {} -> {}", rhs, e))?;
            let value = from_eval_value(result);

            match target_var {
                Some(var_name) => {
                    ctx.variables.insert(var_name.to_string(), value);
                }
                None => {
                    outcome = outcome.with_output("result", value);
                }
            }
        }

        if let Some(val) = call.params.get("value") {
            outcome = outcome.with_output("result", val.clone());
        }

        Ok(outcome)
    }
}

/// Routes to the exit socket named by its `route` parameter.
#[derive(Debug)]
pub struct RouteHandler;

#[async_trait]
impl ActivityHandler for RouteHandler {
    fn name(&self) -> &str {
        "route"
    }

    async fn execute(&self, _ctx: &mut TokenContext, call: HandlerCall) -> Result<HandlerOutcome> {
        match call.params.get("route") {
            Some(Value::String(route)) => Ok(HandlerOutcome::next(route.clone())),
            _ => Ok(HandlerOutcome::proceed(&call)),
        }
    }
}
