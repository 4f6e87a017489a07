use std::time::Duration;
use async_trait::async_trait;
use anyhow::{Result, anyhow};
use reqwest::{Client, Method};
use serde_json::{Value, json};
use tracing::{debug, warn};
use crate::handlers::{ActivityHandler, HandlerCall, HandlerOutcome};
use crate::runtime::context::TokenContext;

/// Calls an HTTP endpoint described by the entry-socket values.
///
/// Reads `url` (required), `method` (GET), `headers`, `query`, `body` and
/// `timeout_secs`. Binds `{status, data}` to the `response` output. A non-2xx
/// status continues at the socket named by `on_error` when that value is
/// bound, and at the default exit socket otherwise.
#[derive(Debug, Default)]
pub struct HttpHandler {
    client: Client,
}

impl HttpHandler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

fn method_of(call: &HandlerCall) -> Result<Method> {
    let raw = call.params.get("method").and_then(Value::as_str).unwrap_or("GET");
    raw.to_ascii_uppercase().parse::<Method>()
        .map_err(|_| anyhow!("Node {}: invalid HTTP method {}", call.node, raw))
}

#[async_trait]
impl ActivityHandler for HttpHandler {
    fn name(&self) -> &str {
        "http"
    }

    async fn execute(&self, ctx: &mut TokenContext, call: HandlerCall) -> Result<HandlerOutcome> {
        let url = call.params.get("url").and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Node {}: missing url", call.node))?;
        let method = method_of(&call)?;
        debug!(context_id = %ctx.id, node = %call.node, %method, url, "HTTP request");

        let mut request = self.client.request(method, url);
        if let Some(Value::Object(headers)) = call.params.get("headers") {
            for (name, value) in headers {
                match value {
                    Value::String(s) => request = request.header(name.as_str(), s.as_str()),
                    other => request = request.header(name.as_str(), other.to_string()),
                }
            }
        }
        if let Some(Value::Object(query)) = call.params.get("query") {
            let pairs: Vec<(String, String)> = query.iter()
                .map(|(k, v)| (k.clone(), v.as_str().map(String::from).unwrap_or_else(|| v.to_string())))
                .collect();
            request = request.query(&pairs);
        }
        if let Some(body) = call.params.get("body") {
            request = request.json(body);
        }
        if let Some(secs) = call.params.get("timeout_secs").and_then(Value::as_u64) {
            request = request.timeout(Duration::from_secs(secs));
        }

        let response = request.send().await?;
        let status = response.status();
        // bodies that are not JSON come back as text
        let text = response.text().await?;
        let data = serde_json::from_str(&text).unwrap_or(Value::String(text));

        let mut outcome = HandlerOutcome::proceed(&call);
        if !status.is_success() {
            warn!(context_id = %ctx.id, node = %call.node, status = status.as_u16(), "HTTP request failed");
            if let Some(on_error) = call.params.get("on_error").and_then(Value::as_str) {
                outcome.next = Some(on_error.to_string());
            }
        }
        Ok(outcome.with_output("response", json!({ "status": status.as_u16(), "data": data })))
    }
}
