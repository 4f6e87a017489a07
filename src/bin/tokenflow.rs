use clap::{Parser, Subcommand};
use tokenflow::compiler::loader::{load_process_from_yaml, load_processes_from_dir};
use tokenflow::config::EngineConfig;
use tokenflow::handlers::builtin::{AssignHandler, LogHandler, RouteHandler};
use tokenflow::handlers::http::HttpHandler;
use tokenflow::runtime::engine::Engine;
use tokenflow::runtime::redis_storage::{RedisActivationQueue, RedisContextStore};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use anyhow::{Context as AnyhowContext, Result};
use tracing::{error, info};

const QUEUE_KEY: &str = "tokenflow:activations";

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Engine configuration file (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a process locally in memory until every branch has settled
    Run {
        /// Path to the process YAML file
        #[arg(long, short)]
        file: PathBuf,

        /// Directory with further processes (subprocesses) to register
        #[arg(long)]
        library: Option<PathBuf>,

        /// Initial node to start at
        #[arg(long, default_value = "Start")]
        entry: String,

        /// Start parameters (key=value)
        #[arg(long, short = 'D', value_parser = parse_key_val)]
        vars: Vec<(String, serde_json::Value)>,
    },

    /// Drain activations from Redis (distributed mode)
    Worker {
        /// Redis connection URL
        #[arg(long, default_value = "redis://127.0.0.1:6379/0")]
        redis: String,

        /// Worker name (for logging)
        #[arg(long, default_value = "worker")]
        name: String,

        /// Directory containing the process YAML files to register
        #[arg(long)]
        library: PathBuf,
    },

    /// Start a process instance against Redis; forked branches are left to workers
    Submit {
        /// Path to the process YAML file
        #[arg(long, short)]
        file: PathBuf,

        #[arg(long, default_value = "redis://127.0.0.1:6379/0")]
        redis: String,

        #[arg(long)]
        library: Option<PathBuf>,

        #[arg(long, default_value = "Start")]
        entry: String,

        #[arg(long, short = 'D', value_parser = parse_key_val)]
        vars: Vec<(String, serde_json::Value)>,
    },
}

fn parse_key_val(s: &str) -> Result<(String, serde_json::Value), String> {
    let (key, raw) = s.split_once('=')
        .ok_or_else(|| format!("invalid KEY=value: no `=` found in `{}`", s))?;
    // JSON if it parses, plain string otherwise
    let value = serde_json::from_str(raw).unwrap_or_else(|_| serde_json::Value::String(raw.to_string()));
    Ok((key.to_string(), value))
}

fn register_standard_handlers(engine: &mut Engine) {
    engine.register_handler(Arc::new(LogHandler));
    engine.register_handler(Arc::new(AssignHandler));
    engine.register_handler(Arc::new(RouteHandler));
    engine.register_handler(Arc::new(HttpHandler::new()));
}

fn register_library(engine: &Engine, dir: &Path) -> Result<()> {
    info!("Loading processes from: {}", dir.display());
    for process in load_processes_from_dir(dir)? {
        let name = process.name.clone();
        if let Err(e) = engine.register_process(process) {
            error!("Failed to compile {}: {}", name, e);
        }
    }
    Ok(())
}

fn redis_engine(redis: &str, config: EngineConfig) -> Result<Engine> {
    let client = redis::Client::open(redis).with_context(|| format!("Invalid Redis URL: {}", redis))?;
    let store = Arc::new(RedisContextStore::new(client.clone()));
    let queue = Arc::new(RedisActivationQueue::new(client, QUEUE_KEY.to_string()));
    Ok(Engine::new_with_storage(store, queue, config))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt::init();
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => EngineConfig::from_yaml_file(path)?,
        None => EngineConfig::default(),
    };

    match cli.command {
        Commands::Run { file, library, entry, vars } => {
            info!("Running in standalone memory mode");
            let mut engine = Engine::with_config(config);
            register_standard_handlers(&mut engine);
            if let Some(dir) = library {
                register_library(&engine, &dir)?;
            }

            let process = load_process_from_yaml(&file)?;
            let name = process.name.clone();
            engine.register_process(process)?;

            let params: HashMap<_, _> = vars.into_iter().collect();
            let ctx = engine.start_process(&name, &entry, params).await?;
            info!(context_id = %ctx.id, "Process started");

            let handled = engine.run_pending().await?;
            let root = engine.context(ctx.id).await?;
            info!(context_id = %root.id, lifecycle = ?root.lifecycle, activations = handled, "Process settled");
            println!("{}", serde_json::to_string_pretty(&root)?);
        }

        Commands::Worker { redis, name, library } => {
            info!("[{}] Starting worker... Redis: {}", name, redis);
            let mut engine = redis_engine(&redis, config)?;
            register_standard_handlers(&mut engine);
            register_library(&engine, &library)?;

            info!("[{}] Worker ready.", name);
            engine.run_worker().await;
        }

        Commands::Submit { file, redis, library, entry, vars } => {
            info!("Submitting to Redis: {}", redis);
            let mut engine = redis_engine(&redis, config)?;
            register_standard_handlers(&mut engine);
            if let Some(dir) = library {
                register_library(&engine, &dir)?;
            }

            let process = load_process_from_yaml(&file)?;
            let name = process.name.clone();
            engine.register_process(process)?;

            let params: HashMap<_, _> = vars.into_iter().collect();
            let ctx = engine.start_process(&name, &entry, params).await?;
            info!("Process submitted. Instance ID: {}", ctx.id);
        }
    }

    Ok(())
}
