/// choreo: run operator workflows from the command line
///
/// Definitions come either from a JSON bundle (`--definitions`) loaded into
/// memory, or from the SQLite definition store (`--store` / CHOREO_STORE_URL).

use anyhow::{anyhow, Context, Result};
use choreo::config::Config;
use choreo::runtime::{build_execution_order, OperatorDispatcher, Payload, WorkflowEngine};
use choreo::workflow::types::DefinitionBundle;
use choreo::workflow::{InMemoryWorkflowStore, SqliteWorkflowStore, WorkflowStore};
use choreo::{builtin_registry, PoolManager};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "choreo", version, about = "Compose operator templates into workflows and run them")]
struct Cli {
    /// SQLite URL of the definition store (overrides CHOREO_STORE_URL)
    #[arg(long, global = true)]
    store: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a workflow and print the run report as JSON
    Run {
        workflow_id: String,
        /// Initial run context as a JSON object
        #[arg(long)]
        input: Option<String>,
        /// JSON definition bundle to run from instead of the store
        #[arg(long)]
        definitions: Option<PathBuf>,
    },
    /// Print the execution order of a workflow
    Order {
        workflow_id: String,
        #[arg(long)]
        definitions: Option<PathBuf>,
    },
    /// Import a JSON definition bundle into the store
    Import { file: PathBuf },
    /// List workflows held in the store
    List,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = Config::default().with_store_url(cli.store.clone());

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_new(&config.log_filter).unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Run {
            workflow_id,
            input,
            definitions,
        } => run(&config, &workflow_id, input.as_deref(), definitions.as_deref()).await,
        Command::Order {
            workflow_id,
            definitions,
        } => order(&config, &workflow_id, definitions.as_deref()).await,
        Command::Import { file } => {
            let bundle = read_bundle(&file)?;
            let store = SqliteWorkflowStore::connect(&config.store.url).await?;
            store.import_bundle(&bundle).await?;
            println!(
                "imported {} workflows and {} templates into {}",
                bundle.workflows.len(),
                bundle.templates.len(),
                config.store.url
            );
            Ok(())
        }
        Command::List => {
            let store = SqliteWorkflowStore::connect(&config.store.url).await?;
            for workflow in store.list_workflows().await? {
                println!(
                    "{}\t{}\t{}",
                    workflow.id,
                    workflow.name,
                    workflow.status.as_deref().unwrap_or("-")
                );
            }
            Ok(())
        }
    }
}

async fn run(
    config: &Config,
    workflow_id: &str,
    input: Option<&str>,
    definitions: Option<&Path>,
) -> Result<()> {
    let input = parse_input(input)?;
    let store = open_store(config, definitions).await?;

    let pools = Arc::new(PoolManager::new());
    let registry = builtin_registry(Arc::clone(&pools), Arc::clone(&store), config.http.timeout())?;
    let dispatcher = Arc::new(OperatorDispatcher::new(Arc::new(registry)));
    let engine = WorkflowEngine::new(store, dispatcher);

    let report = engine.run_workflow(workflow_id, input).await;
    pools.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&report)?);
    if report.is_success() {
        Ok(())
    } else {
        Err(anyhow!(
            "run failed: {}",
            report.error.as_deref().unwrap_or("unknown error")
        ))
    }
}

async fn order(config: &Config, workflow_id: &str, definitions: Option<&Path>) -> Result<()> {
    let store = open_store(config, definitions).await?;
    if store.get_workflow(workflow_id).await?.is_none() {
        return Err(anyhow!("workflow not found: {}", workflow_id));
    }
    let nodes = store.list_nodes(workflow_id).await?;
    let edges = store.list_edges(workflow_id).await?;

    for (step, node) in build_execution_order(&nodes, &edges).iter().enumerate() {
        println!("{}\t{}\t{}", step + 1, node.id, node.name);
    }
    Ok(())
}

async fn open_store(config: &Config, definitions: Option<&Path>) -> Result<Arc<dyn WorkflowStore>> {
    match definitions {
        Some(path) => Ok(Arc::new(InMemoryWorkflowStore::from_bundle(read_bundle(path)?))),
        None => Ok(Arc::new(SqliteWorkflowStore::connect(&config.store.url).await?)),
    }
}

fn read_bundle(path: &Path) -> Result<DefinitionBundle> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    DefinitionBundle::from_json(&raw).with_context(|| format!("invalid bundle {}", path.display()))
}

fn parse_input(raw: Option<&str>) -> Result<Payload> {
    match raw {
        None => Ok(Payload::new()),
        Some(raw) => serde_json::from_str(raw).context("--input must be a JSON object"),
    }
}
