use serde_json::json;
use std::collections::HashMap;
use std::fs;
use std::sync::Arc;
use tokenflow::compiler::loader;
use tokenflow::config::EngineConfig;
use tokenflow::dsl::builder::ProcessBuilder;
use tokenflow::dsl::{NodeKind, TaskPrototype};
use tokenflow::handlers::builtin::AssignHandler;
use tokenflow::runtime::context::Lifecycle;
use tokenflow::runtime::engine::Engine;

const GREETING: &str = r#"
name: greeting
variables:
  greeting: hello
nodes:
  - name: Start
    type: Initial
    sockets:
      - name: next
        direction: exit
        default: true
  - name: Greet
    type: Activity
    handler: assign
    sockets:
      - name: in
        direction: entry
        default: true
        params:
          - name: expression
            value: "message = greeting + \" world\""
      - name: done
        direction: exit
        default: true
  - name: End
    type: Final
    sockets:
      - name: in
        direction: entry
        default: true
connections:
  - from: Start.next
    to: Greet.in
  - from: Greet.done
    to: End.in
"#;

#[test]
fn test_load_process_from_yaml() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let file_path = temp_dir.path().join("greeting.yaml");
    fs::write(&file_path, GREETING).expect("Failed to write temp file");

    let loaded = loader::load_process_from_yaml(&file_path).expect("Failed to load process from YAML");

    let expected = ProcessBuilder::new("greeting")
        .var("greeting", "hello")
        .initial("Start")
        .activity("Greet", Some("assign"))
            .param_value("expression", "message = greeting + \" world\"")
            .default_exit("done")
            .build()
        .final_node("End")
        .connect("Start.next", "Greet.in")
        .connect("Greet.done", "End.in")
        .build();

    assert_eq!(loaded, expected);
}

#[test]
fn test_load_node_properties() {
    let yaml = r#"
name: props
nodes:
  - name: Review
    type: Workflow
    task:
      title: Review
      role: editor
      priority: 2
  - name: Call
    type: Subprocess
    process: child
  - name: Back
    type: Final
    jump_target: Call.retry
  - name: Form
    type: Visual
    visual: forms/review
    wait_state: true
"#;
    let temp_dir = tempfile::tempdir().unwrap();
    let file_path = temp_dir.path().join("props.yml");
    fs::write(&file_path, yaml).unwrap();

    let process = loader::load_process_from_yaml(&file_path).unwrap();
    assert_eq!(
        process.nodes[0].kind,
        NodeKind::Workflow {
            task: TaskPrototype {
                title: Some("Review".to_string()),
                role: Some("editor".to_string()),
                priority: Some(2),
                ..TaskPrototype::default()
            }
        }
    );
    assert_eq!(process.nodes[1].kind, NodeKind::Subprocess { process: Some("child".to_string()) });
    assert_eq!(process.nodes[2].kind, NodeKind::Final { jump_target: Some("Call.retry".to_string()) });
    assert!(process.nodes[3].wait_state);
    assert!(process.connections.is_empty());
}

#[test]
fn test_load_processes_from_dir_in_name_order() {
    let temp_dir = tempfile::tempdir().unwrap();
    fs::write(temp_dir.path().join("b.yaml"), GREETING.replace("name: greeting", "name: second")).unwrap();
    fs::write(temp_dir.path().join("a.yml"), GREETING).unwrap();
    fs::write(temp_dir.path().join("notes.txt"), "not a process").unwrap();

    let processes = loader::load_processes_from_dir(temp_dir.path()).unwrap();
    let names: Vec<_> = processes.iter().map(|p| p.name.as_str()).collect();
    assert_eq!(names, vec!["greeting", "second"]);
}

#[test]
fn test_load_errors_name_the_file() {
    let temp_dir = tempfile::tempdir().unwrap();
    let file_path = temp_dir.path().join("broken.yaml");
    fs::write(&file_path, "name: [unclosed").unwrap();

    let err = loader::load_process_from_yaml(&file_path).unwrap_err();
    assert!(err.to_string().contains("broken.yaml"));

    let missing = loader::load_process_from_yaml(temp_dir.path().join("missing.yaml")).unwrap_err();
    assert!(missing.to_string().contains("missing.yaml"));
}

#[test]
fn test_engine_config_from_yaml() {
    let temp_dir = tempfile::tempdir().unwrap();
    let file_path = temp_dir.path().join("engine.yaml");
    fs::write(&file_path, "max_steps: 50\nconventions:\n  yes: approved\n").unwrap();

    let config = EngineConfig::from_yaml_file(&file_path).unwrap();
    assert_eq!(config.max_steps, 50);
    assert_eq!(config.conventions.yes, "approved");
    // untouched keys keep their defaults
    assert_eq!(config.conventions.no, "no");
    assert_eq!(config.queue_capacity, EngineConfig::default().queue_capacity);
}

#[tokio::test]
async fn test_loaded_process_runs() {
    let temp_dir = tempfile::tempdir().unwrap();
    let file_path = temp_dir.path().join("greeting.yaml");
    fs::write(&file_path, GREETING).unwrap();

    let mut engine = Engine::new();
    engine.register_handler(Arc::new(AssignHandler));
    engine.register_process(loader::load_process_from_yaml(&file_path).unwrap()).unwrap();

    let ctx = engine.start_process("greeting", "Start", HashMap::new()).await.unwrap();
    assert_eq!(ctx.lifecycle, Lifecycle::Stop);
    assert_eq!(ctx.variables.get("message"), Some(&json!("hello world")));
}
