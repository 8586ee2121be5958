//! Conductor Worker
//!
//! Background process that launches executions of every currently-active
//! workflow revision on a fixed poll interval. The HTTP surface never
//! exposes a "launch execution" endpoint (launching is synchronous and
//! runs a revision's step tree to completion before returning), so this is
//! the process that actually drives executions end to end.

use std::sync::Arc;
use std::time::Duration;

use backoff::ExponentialBackoff;
use conductor_common::{init_tracing, Settings};
use conductor_domain::WorkflowSummary;
use conductor_engine::{ExecutionEngine, StepRegistry, WorkflowService};
use conductor_store::{connect, Page, PgExecutionStore, PgRevisionStore, Pagination};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;
    let pool = connect(&settings.database_url, 10).await?;
    let revisions = Arc::new(PgRevisionStore::new(pool.clone()));
    let executions = Arc::new(PgExecutionStore::new(pool));
    let registry = Arc::new(StepRegistry::with_builtins());

    let service = Arc::new(WorkflowService::new(revisions, executions.clone(), registry.clone()));
    let engine = ExecutionEngine::new(registry, executions);

    tracing::info!(poll_interval_ms = settings.worker_poll_interval_ms, "worker started");

    let poll_interval = Duration::from_millis(settings.worker_poll_interval_ms);
    let mut shutdown = std::pin::pin!(tokio::signal::ctrl_c());

    loop {
        if let Err(e) = tick(&service, &engine).await {
            tracing::error!(error = %e, "poll tick failed");
        }

        tokio::select! {
            () = tokio::time::sleep(poll_interval) => {}
            _ = &mut shutdown => break,
        }
    }

    tracing::info!("shutting down worker");
    Ok(())
}

/// One poll cycle: list every active revision and launch an execution for
/// each. Listing retries transient store errors with exponential backoff;
/// a failed launch of one revision is logged and does not stop the others.
async fn tick(service: &WorkflowService, engine: &ExecutionEngine) -> anyhow::Result<()> {
    let summaries = list_active_workflows_with_retry(service).await?;

    for summary in summaries {
        for version in &summary.active_versions {
            let id = summary.workflow_id.revision(*version);
            match service.launch_execution(&id, engine, None).await {
                Ok(execution) => {
                    tracing::info!(revision_id = %id, execution_id = %execution.id, status = ?execution.status, "execution launched by worker");
                }
                Err(e) => {
                    tracing::warn!(revision_id = %id, error = %e, "worker failed to launch execution");
                }
            }
        }
    }
    Ok(())
}

async fn list_active_workflows_with_retry(
    service: &WorkflowService,
) -> anyhow::Result<Vec<WorkflowSummary>> {
    let backoff = ExponentialBackoff {
        initial_interval: Duration::from_secs(1),
        multiplier: 4.0,
        max_interval: Duration::from_secs(16),
        max_elapsed_time: Some(Duration::from_secs(60)),
        ..Default::default()
    };

    let page: Page<WorkflowSummary> = backoff::future::retry(backoff, || async {
        service
            .list_workflows(None, &Pagination::with_limit(100))
            .await
            .map_err(|e| backoff::Error::transient(anyhow::anyhow!(e.to_string())))
    })
    .await?;

    Ok(page
        .items
        .into_iter()
        .filter(|s| !s.active_versions.is_empty())
        .collect())
}
