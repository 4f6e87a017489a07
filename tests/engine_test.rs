mod common;

use async_trait::async_trait;
use common::{CaptureHandler, EchoHandler, engine_with_capture, params, trail_names};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tokenflow::config::EngineConfig;
use tokenflow::dsl::NodeKind;
use tokenflow::dsl::builder::ProcessBuilder;
use tokenflow::error::{EngineError, ExecutionError};
use tokenflow::handlers::builtin::{AssignHandler, RouteHandler};
use tokenflow::handlers::http::HttpHandler;
use tokenflow::handlers::{ActivityHandler, HandlerCall, HandlerOutcome};
use tokenflow::runtime::context::{Lifecycle, TokenContext};
use tokenflow::runtime::engine::Engine;
use uuid::Uuid;

#[tokio::test]
async fn test_linear_process_runs_to_stop() {
    let process = ProcessBuilder::new("linear")
        .initial("Start")
        .activity("Compute", Some("assign"))
            .param_value("expression", "x = 1 + 2")
            .default_exit("done")
            .build()
        .final_node("End")
        .connect("Start.next", "Compute.in")
        .connect("Compute.done", "End.in")
        .build();

    let mut engine = Engine::new();
    engine.register_handler(Arc::new(AssignHandler));
    engine.register_process(process).expect("Compilation failed");

    let ctx = engine.start_process("linear", "Start", HashMap::new()).await.expect("Run failed");

    assert_eq!(ctx.lifecycle, Lifecycle::Stop);
    assert_eq!(ctx.variables.get("x"), Some(&json!(3)));
    assert!(ctx.call_stack.is_empty());
    assert_eq!(trail_names(&engine, &ctx), vec!["Compute.in", "End.in"]);

    // the stopped context was checkpointed
    let saved = engine.context(ctx.id).await.unwrap();
    assert_eq!(saved, ctx);
}

fn decision_process(expression: Option<&str>) -> tokenflow::dsl::Process {
    ProcessBuilder::new("decide")
        .initial("Start")
        .decision("Check", expression)
            .exit("yes")
            .exit("no")
            .build()
        .activity("Big", Some("capture"))
            .param_value("path", "big")
            .default_exit("done")
            .build()
        .activity("Small", Some("capture"))
            .param_value("path", "small")
            .default_exit("done")
            .build()
        .final_node("End")
        .connect("Start.next", "Check.in")
        .connect("Check.yes", "Big.in")
        .connect("Check.no", "Small.in")
        .connect("Big.done", "End.in")
        .connect("Small.done", "End.in")
        .build()
}

#[tokio::test]
async fn test_decision_routes_on_truthiness() {
    let engine = engine_with_capture();
    engine.register_process(decision_process(Some("amount > 100"))).unwrap();

    let big = engine.start_process("decide", "Start", params(&[("amount", json!(150))])).await.unwrap();
    assert_eq!(big.variables.get("path"), Some(&json!("big")));

    let small = engine.start_process("decide", "Start", params(&[("amount", json!(50))])).await.unwrap();
    assert_eq!(small.variables.get("path"), Some(&json!("small")));
}

#[tokio::test]
async fn test_decision_reads_process_variables() {
    let mut process = decision_process(Some("${limit} == 3"));
    process.variables.insert("limit".to_string(), json!(3));

    let engine = engine_with_capture();
    engine.register_process(process).unwrap();

    let ctx = engine.start_process("decide", "Start", HashMap::new()).await.unwrap();
    assert_eq!(ctx.variables.get("path"), Some(&json!("big")));
}

#[tokio::test]
async fn test_decision_without_expression_takes_no() {
    let engine = engine_with_capture();
    engine.register_process(decision_process(None)).unwrap();

    let ctx = engine.start_process("decide", "Start", HashMap::new()).await.unwrap();
    assert_eq!(ctx.variables.get("path"), Some(&json!("small")));
}

#[tokio::test]
async fn test_decision_missing_branch_socket() {
    let process = ProcessBuilder::new("one-armed")
        .initial("Start")
        .decision("Check", Some("false"))
            .exit("yes")
            .build()
        .final_node("End")
        .connect("Start.next", "Check.in")
        .connect("Check.yes", "End.in")
        .build();

    let engine = Engine::new();
    engine.register_process(process).unwrap();

    let err = engine.start_process("one-armed", "Start", HashMap::new()).await.unwrap_err();
    match err {
        EngineError::Aborted { qualifier, source: ExecutionError::SocketNotFound { name, .. }, .. } => {
            assert_eq!(qualifier, "one-armed/Check.in");
            assert_eq!(name, "no");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_handler_outputs_travel_to_next_node() {
    let process = ProcessBuilder::new("outputs")
        .initial("Start")
        .activity("Produce", Some("echo"))
            .default_exit("done")
            .build()
        .activity("Consume", Some("capture"))
            .default_exit("done")
            .build()
        .final_node("End")
        .connect("Start.next", "Produce.in")
        .connect("Produce.done", "Consume.in")
        .connect("Consume.done", "End.in")
        .build();

    let mut engine = engine_with_capture();
    engine.register_handler(Arc::new(EchoHandler {
        outputs: params(&[("greeting", json!("hello"))]),
    }));
    engine.register_process(process).unwrap();

    let ctx = engine.start_process("outputs", "Start", HashMap::new()).await.unwrap();
    assert_eq!(ctx.variables.get("greeting"), Some(&json!("hello")));
}

#[tokio::test]
async fn test_declared_values_and_expressions_bind_on_entry() {
    let process = ProcessBuilder::new("declared")
        .var("price", 21)
        .initial("Start")
        .activity("Quote", Some("capture"))
            .param_value("currency", "EUR")
            .param_expr("total", "price * 2")
            .param_value("note", "default note")
            .default_exit("done")
            .build()
        .final_node("End")
        .connect("Start.next", "Quote.in")
        .connect("Quote.done", "End.in")
        .build();

    let engine = engine_with_capture();
    engine.register_process(process).unwrap();

    let ctx = engine.start_process("declared", "Start", params(&[("note", json!("given"))])).await.unwrap();
    assert_eq!(ctx.variables.get("currency"), Some(&json!("EUR")));
    assert_eq!(ctx.variables.get("total"), Some(&json!(42)));
    // already bound values win over declared ones
    assert_eq!(ctx.variables.get("note"), Some(&json!("given")));
}

#[tokio::test]
async fn test_route_handler_selects_exit() {
    let process = ProcessBuilder::new("routing")
        .initial("Start")
        .activity("Switch", Some("route"))
            .param_value("route", "left")
            .default_exit("right")
            .exit("left")
            .build()
        .activity("Left", Some("capture"))
            .param_value("side", "left")
            .default_exit("done")
            .build()
        .final_node("End")
        .placeholder("Right")
            .default_exit("done")
            .build()
        .connect("Start.next", "Switch.in")
        .connect("Switch.left", "Left.in")
        .connect("Switch.right", "Right.in")
        .connect("Left.done", "End.in")
        .connect("Right.done", "End.in")
        .build();

    let mut engine = engine_with_capture();
    engine.register_handler(Arc::new(RouteHandler));
    engine.register_process(process).unwrap();

    let ctx = engine.start_process("routing", "Start", HashMap::new()).await.unwrap();
    assert_eq!(ctx.variables.get("side"), Some(&json!("left")));
    assert!(!trail_names(&engine, &ctx).contains(&"Right.in".to_string()));
}

#[tokio::test]
async fn test_activity_without_handler_passes_through() {
    let process = ProcessBuilder::new("passthrough")
        .initial("Start")
        .activity("Noop", None)
            .default_exit("done")
            .build()
        .placeholder("Later")
            .default_exit("done")
            .build()
        .final_node("End")
        .connect("Start.next", "Noop.in")
        .connect("Noop.done", "Later.in")
        .connect("Later.done", "End.in")
        .build();

    let engine = Engine::new();
    engine.register_process(process).unwrap();

    let ctx = engine.start_process("passthrough", "Start", HashMap::new()).await.unwrap();
    assert_eq!(ctx.lifecycle, Lifecycle::Stop);
    assert_eq!(trail_names(&engine, &ctx), vec!["Noop.in", "Later.in", "End.in"]);
}

#[tokio::test]
async fn test_pass_through_nodes_need_a_default_exit() {
    let process = ProcessBuilder::new("dead-end")
        .initial("Start")
        .activity("Noop", None)
            .exit("somewhere")
            .build()
        .final_node("End")
        .connect("Start.next", "Noop.in")
        .connect("Noop.somewhere", "End.in")
        .build();

    let engine = Engine::new();
    engine.register_process(process).unwrap();

    let err = engine.start_process("dead-end", "Start", HashMap::new()).await.unwrap_err();
    assert!(matches!(err.execution(), Some(ExecutionError::NoDefaultExitSocket { node }) if node == "Noop"));

    let placeholder = ProcessBuilder::new("placeholder-dead-end")
        .initial("Start")
        .placeholder("Todo")
            .build()
        .connect("Start.next", "Todo.in")
        .build();
    engine.register_process(placeholder).unwrap();

    let err = engine.start_process("placeholder-dead-end", "Start", HashMap::new()).await.unwrap_err();
    assert!(matches!(err.execution(), Some(ExecutionError::NoDefaultExitSocket { node }) if node == "Todo"));
}

#[tokio::test]
async fn test_unknown_handler_aborts_with_state() {
    let process = ProcessBuilder::new("missing-handler")
        .initial("Start")
        .activity("Call", Some("does_not_exist"))
            .default_exit("done")
            .build()
        .final_node("End")
        .connect("Start.next", "Call.in")
        .connect("Call.done", "End.in")
        .build();

    let engine = Engine::new();
    engine.register_process(process).unwrap();

    let err = engine.start_process("missing-handler", "Start", HashMap::new()).await.unwrap_err();
    match err {
        EngineError::Aborted { qualifier, state, source } => {
            assert_eq!(qualifier, "missing-handler/Call.in");
            assert!(matches!(source, ExecutionError::UnknownHandler(ref h) if h == "does_not_exist"));
            let snapshot: TokenContext = serde_json::from_str(&state).expect("state is a serialized context");
            assert_eq!(snapshot.process, "missing-handler");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_http_handler_rejects_bad_requests_before_sending() {
    let process = ProcessBuilder::new("http-call")
        .initial("Start")
        .activity("Fetch", Some("http"))
            .default_exit("done")
            .build()
        .final_node("End")
        .connect("Start.next", "Fetch.in")
        .connect("Fetch.done", "End.in")
        .build();

    let mut engine = Engine::new();
    engine.register_handler(Arc::new(HttpHandler::new()));
    engine.register_process(process).unwrap();

    let err = engine.start_process("http-call", "Start", HashMap::new()).await.unwrap_err();
    assert!(matches!(err.execution(), Some(ExecutionError::Handler(e)) if e.to_string().contains("missing url")));

    let bad_method = params(&[("url", json!("http://127.0.0.1:1/")), ("method", json!("NOT A METHOD"))]);
    let err = engine.start_process("http-call", "Start", bad_method).await.unwrap_err();
    assert!(matches!(err.execution(), Some(ExecutionError::Handler(e)) if e.to_string().contains("invalid HTTP method")));
}

#[derive(Debug)]
struct SilentHandler;

#[async_trait]
impl ActivityHandler for SilentHandler {
    fn name(&self) -> &str { "silent" }

    async fn execute(&self, _ctx: &mut TokenContext, _call: HandlerCall) -> anyhow::Result<HandlerOutcome> {
        Ok(HandlerOutcome::default())
    }
}

#[tokio::test]
async fn test_handler_without_next_socket() {
    let process = ProcessBuilder::new("silent")
        .initial("Start")
        .activity("Quiet", Some("silent"))
            .default_exit("done")
            .build()
        .final_node("End")
        .connect("Start.next", "Quiet.in")
        .connect("Quiet.done", "End.in")
        .build();

    let mut engine = Engine::new();
    engine.register_handler(Arc::new(SilentHandler));
    engine.register_process(process).unwrap();

    let err = engine.start_process("silent", "Start", HashMap::new()).await.unwrap_err();
    assert!(matches!(err.execution(), Some(ExecutionError::MissingNextSocket { node }) if node == "Quiet"));
}

#[derive(Debug)]
struct RollbackHandler;

#[async_trait]
impl ActivityHandler for RollbackHandler {
    fn name(&self) -> &str { "rollback" }

    async fn execute(&self, ctx: &mut TokenContext, call: HandlerCall) -> anyhow::Result<HandlerOutcome> {
        let mut replacement = ctx.clone();
        replacement.id = Uuid::new_v4();
        replacement.variables.insert("rolled_back".to_string(), Value::Bool(true));
        let mut outcome = HandlerOutcome::proceed(&call);
        outcome.context = Some(replacement);
        Ok(outcome)
    }
}

#[tokio::test]
async fn test_handler_replacement_context_is_adopted() {
    let process = ProcessBuilder::new("rollback")
        .initial("Start")
        .activity("Undo", Some("rollback"))
            .default_exit("done")
            .build()
        .final_node("End")
        .connect("Start.next", "Undo.in")
        .connect("Undo.done", "End.in")
        .build();

    let mut engine = Engine::new();
    engine.register_handler(Arc::new(RollbackHandler));
    engine.register_process(process).unwrap();

    let result = engine.start_process("rollback", "Start", HashMap::new()).await.unwrap();
    // the replacement keeps the root id of the context it replaced
    assert_ne!(result.id, result.root);
    assert_eq!(result.variables.get("rolled_back"), Some(&json!(true)));
    assert_eq!(result.lifecycle, Lifecycle::Stop);
    assert_eq!(engine.context(result.id).await.unwrap().lifecycle, Lifecycle::Stop);
}

#[tokio::test]
async fn test_unconnected_exit_socket() {
    let process = ProcessBuilder::new("loose")
        .initial("Start")
        .placeholder("Step")
            .default_exit("done")
            .build()
        .connect("Start.next", "Step.in")
        .build();

    let engine = Engine::new();
    engine.register_process(process).unwrap();

    let err = engine.start_process("loose", "Start", HashMap::new()).await.unwrap_err();
    match err {
        EngineError::Aborted { qualifier, source: ExecutionError::UnconnectedExitSocket(socket), .. } => {
            assert_eq!(qualifier, "loose/Step.done");
            assert_eq!(socket, "loose/Step.done");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[tokio::test]
async fn test_start_requires_an_initial_node() {
    let engine = Engine::new();
    engine.register_process(decision_process(None)).unwrap();

    let err = engine.start_process("decide", "Begin", HashMap::new()).await.unwrap_err();
    assert!(matches!(err.execution(), Some(ExecutionError::InitialNodeNotFound { name, .. }) if name == "Begin"));

    let err = engine.start_process("decide", "Check", HashMap::new()).await.unwrap_err();
    assert!(matches!(err.execution(), Some(ExecutionError::NotAnInitialNode { name, .. }) if name == "Check"));

    let err = engine.start_process("nope", "Start", HashMap::new()).await.unwrap_err();
    assert!(matches!(err.execution(), Some(ExecutionError::UnknownProcess(p)) if p == "nope"));
}

#[tokio::test]
async fn test_step_limit_stops_cycles() {
    let process = ProcessBuilder::new("spin")
        .initial("Start")
        .placeholder("Ping")
            .default_exit("out")
            .build()
        .placeholder("Pong")
            .default_exit("out")
            .build()
        .connect("Start.next", "Ping.in")
        .connect("Ping.out", "Pong.in")
        .connect("Pong.out", "Ping.in")
        .build();

    let config = EngineConfig { max_steps: 25, ..EngineConfig::default() };
    let engine = Engine::with_config(config);
    engine.register_process(process).unwrap();

    let err = engine.start_process("spin", "Start", HashMap::new()).await.unwrap_err();
    assert!(matches!(err.execution(), Some(ExecutionError::StepLimitExceeded { limit: 25, .. })));
}

#[tokio::test]
async fn test_trail_recording_can_be_disabled() {
    let config = EngineConfig { record_trail: false, ..EngineConfig::default() };
    let mut engine = Engine::with_config(config);
    engine.register_handler(Arc::new(CaptureHandler));
    engine.register_process(decision_process(None)).unwrap();

    let ctx = engine.start_process("decide", "Start", HashMap::new()).await.unwrap();
    assert_eq!(ctx.lifecycle, Lifecycle::Stop);
    assert!(ctx.trail.is_empty());
}

/// Start -> Inc -> Check, looping back to Inc until `finished`.
fn counter_loop() -> tokenflow::dsl::Process {
    ProcessBuilder::new("loop")
        .var("counter", 0)
        .initial("Start")
        .activity("Inc", Some("assign"))
            .param_value("expression", "counter = counter + 1")
            .default_exit("done")
            .build()
        .decision("Check", Some("finished"))
            .param_expr("finished", "counter >= 3")
            .exit("yes")
            .exit("no")
            .build()
        .final_node("End")
        .connect("Start.next", "Inc.in")
        .connect("Inc.done", "Check.in")
        .connect("Check.no", "Inc.in")
        .connect("Check.yes", "End.in")
        .build()
}

#[tokio::test]
async fn test_loop_reevaluates_entry_parameters() {
    let mut engine = Engine::new();
    engine.register_handler(Arc::new(AssignHandler));
    engine.register_process(counter_loop()).unwrap();

    let ctx = engine.start_process("loop", "Start", HashMap::new()).await.unwrap();
    assert_eq!(ctx.lifecycle, Lifecycle::Stop);
    assert_eq!(ctx.variables.get("counter"), Some(&json!(3)));

    let names = trail_names(&engine, &ctx);
    assert_eq!(names.iter().filter(|n| *n == "Inc.in").count(), 3);
    assert_eq!(names.last().map(String::as_str), Some("End.in"));
}

#[tokio::test]
async fn test_loop_does_not_carry_values_between_visits() {
    // Start seeds `seed` once; later visits to Show.in must not see it
    let process = ProcessBuilder::new("revisit")
        .var("round", 0)
        .initial("Start")
        .activity("Show", Some("capture"))
            .default_exit("done")
            .build()
        .activity("Bump", Some("assign"))
            .param_value("expression", "round = round + 1")
            .default_exit("done")
            .build()
        .decision("Again", Some("round < 2"))
            .exit("yes")
            .exit("no")
            .build()
        .final_node("End")
        .connect("Start.next", "Show.in")
        .connect("Show.done", "Bump.in")
        .connect("Bump.done", "Again.in")
        .connect("Again.yes", "Show.in")
        .connect("Again.no", "End.in")
        .build();

    let mut engine = engine_with_capture();
    engine.register_handler(Arc::new(AssignHandler));
    engine.register_process(process).unwrap();

    let ctx = engine.start_process("revisit", "Start", params(&[("seed", json!(1))])).await.unwrap();
    assert_eq!(ctx.lifecycle, Lifecycle::Stop);
    assert_eq!(ctx.variables.get("round"), Some(&json!(2)));
    // captured on the first visit only; no binding left on the entry socket
    let show_in = ctx.trail[0].clone();
    assert!(ctx.binding(&show_in, "seed").is_none());
}

#[tokio::test]
async fn test_trail_keeps_most_recent_entries() {
    let config = EngineConfig { trail_limit: 3, ..EngineConfig::default() };
    let mut engine = Engine::with_config(config);
    engine.register_handler(Arc::new(AssignHandler));
    engine.register_process(counter_loop()).unwrap();

    let ctx = engine.start_process("loop", "Start", HashMap::new()).await.unwrap();
    assert_eq!(trail_names(&engine, &ctx), vec!["Inc.in", "Check.in", "End.in"]);
}

#[tokio::test]
async fn test_lock_table_is_emptied_after_runs() {
    let mut engine = Engine::new();
    engine.register_handler(Arc::new(AssignHandler));
    engine.register_process(counter_loop()).unwrap();

    for _ in 0..5 {
        engine.start_process("loop", "Start", HashMap::new()).await.unwrap();
    }
    assert_eq!(engine.tracked_locks(), 0);

    let missing = engine.cancel(Uuid::new_v4()).await;
    assert!(missing.is_err());
    assert_eq!(engine.tracked_locks(), 0);
}

#[tokio::test]
async fn test_custom_executor_replaces_builtin() {
    use tokenflow::runtime::node::{NodeExecutor, NodeScope, Transition};

    #[derive(Debug)]
    struct HaltingPlaceholder;

    #[async_trait]
    impl NodeExecutor for HaltingPlaceholder {
        fn kind(&self) -> &str { "placeholder" }

        async fn execute(&self, _engine: &Engine, _scope: &NodeScope<'_>, _ctx: &mut TokenContext) -> tokenflow::error::Result<Transition> {
            Ok(Transition::stop())
        }
    }

    let process = ProcessBuilder::new("halting")
        .initial("Start")
        .placeholder("Stub")
            .default_exit("out")
            .build()
        .node("Never", NodeKind::Activity { handler: Some("missing".to_string()) })
            .default_entry("in")
            .build()
        .connect("Start.next", "Stub.in")
        .connect("Stub.out", "Never.in")
        .build();

    let mut engine = Engine::new();
    engine.register_executor(Arc::new(HaltingPlaceholder));
    engine.register_process(process).unwrap();

    let ctx = engine.start_process("halting", "Start", HashMap::new()).await.unwrap();
    assert_eq!(ctx.lifecycle, Lifecycle::Stop);
    assert_eq!(trail_names(&engine, &ctx), vec!["Stub.in"]);
}
