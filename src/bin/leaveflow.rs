use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use serde_json::{Value, json};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use leaveflow::hooks::builtin::{LogHook, TableHook};
use leaveflow::runtime::engine::{Engine, EngineConfig, ProcessOutcome};
use leaveflow::runtime::instance::Variables;
use leaveflow::runtime::redis_storage::RedisSnapshotStore;
use leaveflow::runtime::snapshot;
use leaveflow::runtime::storage::{FileSnapshotStore, SnapshotStore, StoredSnapshot};

#[derive(Parser)]
#[command(author, version, about = "Run leave-request style approval processes", long_about = None)]
struct Cli {
    /// Engine configuration (YAML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Root directory of process models
    #[arg(long, global = true, env = "LEAVEFLOW_PROCESS_DIR")]
    process_dir: Option<PathBuf>,

    /// Upper bound on automatic transitions per call
    #[arg(long, global = true)]
    max_transitions: Option<usize>,

    /// Directory holding instance snapshots
    #[arg(long, global = true, default_value = ".leaveflow/instances")]
    state_dir: PathBuf,

    /// Store snapshots in Redis instead of the state directory
    #[arg(long, global = true)]
    redis: Option<String>,

    /// YAML map of hook name to lookup table, e.g. get_direct_manager
    #[arg(long, global = true)]
    directory: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a process model and report its shape
    Validate {
        /// Model id, e.g. leave/annual_leave
        model: String,
    },

    /// Start a new instance and store its snapshot
    Start {
        model: String,

        /// Initial variables (key=value)
        #[arg(long, short = 'D', value_parser = parse_key_val)]
        vars: Vec<(String, Value)>,
    },

    /// List ready tasks of a stored instance
    Tasks {
        instance: Uuid,

        /// Only tasks assigned to this user
        #[arg(long)]
        assignee: Option<String>,
    },

    /// Complete a ready task
    Complete {
        instance: Uuid,
        task: Uuid,

        /// Data merged into the instance variables (key=value)
        #[arg(long, short = 'D', value_parser = parse_key_val)]
        vars: Vec<(String, Value)>,
    },

    /// Show whether an instance has completed
    Status { instance: Uuid },
}

fn parse_key_val(s: &str) -> Result<(String, Value), String> {
    let (key, raw) = s
        .split_once('=')
        .ok_or_else(|| format!("invalid KEY=value: no `=` found in `{}`", s))?;
    // JSON when it parses, plain string otherwise
    let val = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((key.to_string(), val))
}

fn build_config(cli: &Cli) -> Result<EngineConfig> {
    let mut config = match &cli.config {
        Some(path) => EngineConfig::from_yaml_file(path)?,
        None => EngineConfig::default(),
    };
    if let Some(dir) = &cli.process_dir {
        config.process_dir = dir.clone();
    }
    if let Some(limit) = cli.max_transitions {
        config.max_transitions = limit;
    }
    Ok(config)
}

fn build_engine(cli: &Cli) -> Result<Engine> {
    let mut engine = Engine::new(build_config(cli)?);
    engine.register_hook(Arc::new(LogHook));

    if let Some(path) = &cli.directory {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read directory file {}", path.display()))?;
        let tables: BTreeMap<String, BTreeMap<String, Value>> = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse directory file {}", path.display()))?;
        for (name, table) in tables {
            info!(hook = %name, entries = table.len(), "registering lookup hook");
            engine.register_hook(Arc::new(TableHook::new(&name, table)));
        }
    }
    Ok(engine)
}

fn build_store(cli: &Cli) -> Result<Box<dyn SnapshotStore>> {
    match &cli.redis {
        Some(url) => {
            let client = redis::Client::open(url.as_str()).context("Invalid Redis URL")?;
            Ok(Box::new(RedisSnapshotStore::new(client)))
        }
        None => Ok(Box::new(FileSnapshotStore::new(cli.state_dir.clone()))),
    }
}

async fn load_stored(store: &dyn SnapshotStore, instance: Uuid) -> Result<StoredSnapshot> {
    match store.load(instance).await? {
        Some(stored) => Ok(stored),
        None => bail!("instance {} not found", instance),
    }
}

fn outcome_json(outcome: &ProcessOutcome, version: u64) -> Value {
    json!({
        "instance_id": outcome.instance_id,
        "model_id": outcome.model_id,
        "status": outcome.status,
        "completed": outcome.completed,
        "version": version,
        "ready_tasks": outcome.ready_tasks,
        "variables": outcome.variables,
    })
}

fn print(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();
    let cli = Cli::parse();

    if let Err(e) = run(&cli).await {
        error!("{:#}", e);
        std::process::exit(1);
    }
}

async fn run(cli: &Cli) -> Result<()> {
    let engine = build_engine(cli)?;

    match &cli.command {
        Commands::Validate { model } => {
            let definition = engine.load_definition(model)?;
            let nodes: Vec<Value> = definition
                .nodes()
                .iter()
                .map(|n| json!({ "id": n.id, "kind": format!("{:?}", n.kind) }))
                .collect();
            print(&json!({
                "model_id": definition.model_id(),
                "digest": definition.digest(),
                "name": definition.name(),
                "nodes": nodes,
                "flows": definition.flows().len(),
            }))?;
        }

        Commands::Start { model, vars } => {
            let store = build_store(cli)?;
            let variables: Variables = vars.iter().cloned().collect();
            let outcome = engine.start_process(model, variables)?;
            let version = store.save(outcome.instance_id, &outcome.snapshot, None).await?;
            info!(instance_id = %outcome.instance_id, version, "instance stored");
            print(&outcome_json(&outcome, version))?;
        }

        Commands::Tasks { instance, assignee } => {
            let store = build_store(cli)?;
            let stored = load_stored(store.as_ref(), *instance).await?;
            let (_, reference) = snapshot::peek(&stored.snapshot)?;
            let tasks = engine.ready_tasks(&reference.model_id, &stored.snapshot, assignee.as_deref())?;
            print(&serde_json::to_value(tasks)?)?;
        }

        Commands::Complete { instance, task, vars } => {
            let store = build_store(cli)?;
            let stored = load_stored(store.as_ref(), *instance).await?;
            let (_, reference) = snapshot::peek(&stored.snapshot)?;
            let data: Variables = vars.iter().cloned().collect();
            let outcome = engine.complete(&reference.model_id, &stored.snapshot, *task, data)?;
            let version = store
                .save(*instance, &outcome.snapshot, Some(stored.version))
                .await?;
            print(&outcome_json(&outcome, version))?;
        }

        Commands::Status { instance } => {
            let store = build_store(cli)?;
            let stored = load_stored(store.as_ref(), *instance).await?;
            let (_, reference) = snapshot::peek(&stored.snapshot)?;
            let completed = engine.is_completed(&reference.model_id, &stored.snapshot)?;
            print(&json!({
                "instance_id": instance,
                "model_id": reference.model_id,
                "version": stored.version,
                "completed": completed,
            }))?;
        }
    }

    Ok(())
}
