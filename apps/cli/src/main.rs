//! Conductor CLI
//!
//! Administrative command-line tool over the Use-Case Layer: the same
//! operations the HTTP API exposes, reached directly without a server
//! running, useful for local development.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};

use conductor_common::{init_tracing, Settings};
use conductor_domain::{ExecutionId, WorkflowId};
use conductor_engine::{ExecutionEngine, StepRegistry, WorkflowService};
use conductor_store::{connect, Pagination, PgExecutionStore, PgRevisionStore};

#[derive(Parser)]
#[command(name = "conductor")]
#[command(about = "Conductor administration CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Workflow revision management
    Workflow {
        #[command(subcommand)]
        action: WorkflowCommands,
    },
    /// Execution management
    Execution {
        #[command(subcommand)]
        action: ExecutionCommands,
    },
}

#[derive(Subcommand)]
enum WorkflowCommands {
    /// Create a workflow's first revision from a YAML file
    Create { source: PathBuf },
    /// Create a new revision of an existing workflow from a YAML file
    Revision {
        namespace: String,
        id: String,
        source: PathBuf,
    },
    /// Activate a revision
    Activate {
        namespace: String,
        id: String,
        version: u32,
    },
    /// Deactivate a revision
    Deactivate {
        namespace: String,
        id: String,
        version: u32,
    },
    /// Delete a single revision, or every revision if no version is given
    Delete {
        namespace: String,
        id: String,
        version: Option<u32>,
    },
    /// List workflows in a namespace
    List { namespace: String },
    /// Execution history for a workflow
    History { namespace: String, id: String },
}

#[derive(Subcommand)]
enum ExecutionCommands {
    /// Launch an execution of one revision
    Run {
        namespace: String,
        id: String,
        version: u32,
        /// Optional JSON input
        #[arg(long)]
        input: Option<String>,
    },
    /// Show an execution's header and step results
    Show { execution_id: String },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    let settings = Settings::load()?;
    let pool = connect(&settings.database_url, 5).await?;
    let revisions = Arc::new(PgRevisionStore::new(pool.clone()));
    let executions = Arc::new(PgExecutionStore::new(pool));
    let registry = Arc::new(StepRegistry::with_builtins());
    let service = WorkflowService::new(revisions, executions.clone(), registry.clone());
    let engine = ExecutionEngine::new(registry, executions);

    match cli.command {
        Commands::Workflow { action } => run_workflow_command(&service, action).await?,
        Commands::Execution { action } => run_execution_command(&service, &engine, action).await?,
    }

    Ok(())
}

async fn run_workflow_command(service: &WorkflowService, action: WorkflowCommands) -> anyhow::Result<()> {
    match action {
        WorkflowCommands::Create { source } => {
            let text = std::fs::read_to_string(&source)
                .with_context(|| format!("reading {}", source.display()))?;
            let created = service.create_workflow(&text).await?;
            println!("{}", created.source);
        }
        WorkflowCommands::Revision { namespace, id, source } => {
            let workflow_id = WorkflowId::new(namespace, id)?;
            let text = std::fs::read_to_string(&source)
                .with_context(|| format!("reading {}", source.display()))?;
            let created = service.create_revision(&workflow_id, &text).await?;
            println!("{}", created.source);
        }
        WorkflowCommands::Activate { namespace, id, version } => {
            let revision_id = WorkflowId::new(namespace, id)?.revision(version);
            let current = service.get_revision(&revision_id).await?;
            let activated = service
                .activate_revision(&revision_id, &current.revision.updated_at.to_rfc3339())
                .await?;
            println!("{}", activated.source);
        }
        WorkflowCommands::Deactivate { namespace, id, version } => {
            let revision_id = WorkflowId::new(namespace, id)?.revision(version);
            let current = service.get_revision(&revision_id).await?;
            let deactivated = service
                .deactivate_revision(&revision_id, &current.revision.updated_at.to_rfc3339())
                .await?;
            println!("{}", deactivated.source);
        }
        WorkflowCommands::Delete { namespace, id, version } => {
            let workflow_id = WorkflowId::new(namespace, id)?;
            match version {
                Some(v) => {
                    service.delete_revision(&workflow_id.revision(v)).await?;
                    println!("deleted {workflow_id}/{v}");
                }
                None => {
                    let count = service.delete_workflow(&workflow_id).await?;
                    println!("deleted {count} revision(s) of {workflow_id}");
                }
            }
        }
        WorkflowCommands::List { namespace } => {
            let page = service
                .list_workflows(Some(&namespace), &Pagination::with_limit(100))
                .await?;
            for summary in page.items {
                println!(
                    "{}  latest={}  active={:?}  revisions={}",
                    summary.workflow_id, summary.latest_version, summary.active_versions, summary.revision_count
                );
            }
        }
        WorkflowCommands::History { namespace, id } => {
            let workflow_id = WorkflowId::new(namespace, id)?;
            let page = service
                .execution_history(&workflow_id, &Pagination::with_limit(50))
                .await?;
            for execution in page.items {
                println!(
                    "{}  v{}  {:?}  started={}",
                    execution.id, execution.version, execution.status, execution.started_at
                );
            }
        }
    }
    Ok(())
}

async fn run_execution_command(
    service: &WorkflowService,
    engine: &ExecutionEngine,
    action: ExecutionCommands,
) -> anyhow::Result<()> {
    match action {
        ExecutionCommands::Run { namespace, id, version, input } => {
            let revision_id = WorkflowId::new(namespace, id)?.revision(version);
            let input = input
                .map(|raw| serde_json::from_str(&raw))
                .transpose()
                .context("parsing --input as JSON")?;
            let execution = service.launch_execution(&revision_id, engine, input).await?;
            println!("{}  {:?}", execution.id, execution.status);
        }
        ExecutionCommands::Show { execution_id } => {
            let id: ExecutionId = execution_id.parse()?;
            let (header, steps) = service.get_execution(&id).await?;
            println!("{header:#?}");
            for step in steps {
                println!("  [{}] {} {:?}", step.step_index, step.step_id, step.status);
            }
        }
    }
    Ok(())
}
