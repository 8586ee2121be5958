//! The Use-Case Layer: composes the Revision Store, Execution Store, Codec
//! and Execution Engine into the business operations, enforcing every
//! invariant that isn't structurally guaranteed by the storage schema.
//!
//! One struct wraps the store trait objects, a single error enum aggregates
//! every lower-layer error with `#[from]`, and handlers log `info!` on
//! state-changing success and `warn!` on domain-error rejections.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use conductor_domain::{
    ExecutionId, ExecutionStatus, WorkflowExecution, WorkflowId, WorkflowRevision,
    WorkflowRevisionId, WorkflowRevisionWithSource, WorkflowSummary,
};
use conductor_store::{
    ExecutionStore, ExecutionStoreError, Page, Pagination, RevisionStore, RevisionStoreError,
};

use crate::codec::{self, MetadataUpdate, ParseError};
use crate::engine::{EngineError, ExecutionEngine};
use crate::execution_context::ExecutionContext;
use crate::registry::StepRegistry;

/// The taxonomy of spec error kinds: every domain-observable failure a
/// use-case operation can produce, each mapping to one stable HTTP status at
/// the API boundary (see `apps/api`'s `ApiError`).
#[derive(Debug, Error)]
pub enum WorkflowError {
    #[error("revision is invalid: {0}")]
    InvalidRevision(String),
    #[error("invalid YAML source: {0}")]
    InvalidYaml(#[from] ParseError),
    #[error("unknown step type: {0}")]
    UnknownStepType(String),
    #[error("invalid or missing X-Current-Updated-At header: {0}")]
    InvalidHeader(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("already exists: {0}")]
    AlreadyExists(String),
    #[error("revision is active, operation not permitted: {0}")]
    ActiveConflict(String),
    #[error("optimistic lock failed: expected updatedAt {expected}, found {actual}")]
    OptimisticLock {
        expected: DateTime<Utc>,
        actual: DateTime<Utc>,
    },
    #[error("execution not found: {0}")]
    ExecutionNotFound(ExecutionId),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<RevisionStoreError> for WorkflowError {
    fn from(e: RevisionStoreError) -> Self {
        match e {
            RevisionStoreError::AlreadyExists(id) => Self::AlreadyExists(id.to_string()),
            RevisionStoreError::NotFound(id) => Self::NotFound(id.to_string()),
            RevisionStoreError::WorkflowNotFound(id) => Self::NotFound(id.to_string()),
            RevisionStoreError::ActiveConflict(id) => Self::ActiveConflict(id.to_string()),
            RevisionStoreError::OptimisticLock { expected, actual } => {
                Self::OptimisticLock { expected, actual }
            }
            RevisionStoreError::Database(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<ExecutionStoreError> for WorkflowError {
    fn from(e: ExecutionStoreError) -> Self {
        match e {
            ExecutionStoreError::NotFound(id) => Self::ExecutionNotFound(id),
            ExecutionStoreError::AlreadyExists(id) => Self::AlreadyExists(id.to_string()),
            ExecutionStoreError::Database(e) => Self::Internal(e.to_string()),
        }
    }
}

impl From<EngineError> for WorkflowError {
    fn from(e: EngineError) -> Self {
        Self::Internal(e.to_string())
    }
}

/// `X-Current-Updated-At` carried by (de)activation requests; parsed
/// independently of the full codec since it is a bare header value, not a
/// YAML document.
pub fn parse_updated_at_header(raw: &str) -> Result<DateTime<Utc>, WorkflowError> {
    DateTime::parse_from_rfc3339(raw.trim())
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| WorkflowError::InvalidHeader(e.to_string()))
}

/// Composes the Revision Store, Execution Store, Codec and Execution Engine
/// into the workflow business operations.
pub struct WorkflowService {
    revisions: Arc<dyn RevisionStore>,
    executions: Arc<dyn ExecutionStore>,
    registry: Arc<StepRegistry>,
}

impl WorkflowService {
    #[must_use]
    pub fn new(
        revisions: Arc<dyn RevisionStore>,
        executions: Arc<dyn ExecutionStore>,
        registry: Arc<StepRegistry>,
    ) -> Self {
        Self {
            revisions,
            executions,
            registry,
        }
    }

    /// Create a workflow's first revision.
    pub async fn create_workflow(&self, source: &str) -> Result<WorkflowRevisionWithSource, WorkflowError> {
        let mut revision = codec::parse_revision(source, false, &self.registry)?;

        if self.revisions.exists(&revision.workflow_id).await? {
            return Err(WorkflowError::AlreadyExists(revision.workflow_id.to_string()));
        }

        let now = Utc::now();
        revision.version = 1;
        revision.created_at = now;
        revision.updated_at = now;
        revision.active = false;
        revision.validate_fields().map_err(|e| WorkflowError::InvalidRevision(e.to_string()))?;

        let final_source = codec::update_metadata(
            source,
            &MetadataUpdate {
                created_at: Some(now),
                updated_at: Some(now),
                active: Some(false),
                version: Some(1),
            },
        );

        self.revisions
            .save_with_source(revision.clone(), final_source.clone())
            .await?;

        info!(workflow_id = %revision.workflow_id, version = revision.version, "workflow created");
        Ok(WorkflowRevisionWithSource {
            revision,
            source: final_source,
        })
    }

    /// Create a new revision of an existing workflow. Path
    /// `(namespace, id)` overrides whatever the source text declares.
    pub async fn create_revision(
        &self,
        workflow_id: &WorkflowId,
        source: &str,
    ) -> Result<WorkflowRevisionWithSource, WorkflowError> {
        if !self.revisions.exists(workflow_id).await? {
            return Err(WorkflowError::NotFound(workflow_id.to_string()));
        }

        let mut revision = codec::parse_revision(source, false, &self.registry)?;
        revision.workflow_id = workflow_id.clone();

        let next_version = self.revisions.find_max_version(workflow_id).await?.unwrap_or(0) + 1;
        let now = Utc::now();
        revision.version = next_version;
        revision.created_at = now;
        revision.updated_at = now;
        revision.active = false;
        revision.validate_fields().map_err(|e| WorkflowError::InvalidRevision(e.to_string()))?;

        let final_source = codec::update_metadata(
            source,
            &MetadataUpdate {
                created_at: Some(now),
                updated_at: Some(now),
                active: Some(false),
                version: Some(next_version),
            },
        );

        self.revisions
            .save_with_source(revision.clone(), final_source.clone())
            .await?;

        info!(workflow_id = %workflow_id, version = next_version, "revision created");
        Ok(WorkflowRevisionWithSource {
            revision,
            source: final_source,
        })
    }

    /// Update an inactive revision, enforcing its optimistic lock
    /// and that the parsed body's identifiers match the path.
    pub async fn update_revision(
        &self,
        id: &WorkflowRevisionId,
        source: &str,
    ) -> Result<WorkflowRevisionWithSource, WorkflowError> {
        let parsed = codec::parse_revision(source, true, &self.registry)?;
        let expected = parsed.updated_at;

        if &parsed.workflow_id != id.workflow_id() || parsed.version != id.version() {
            return Err(WorkflowError::InvalidRevision(
                "body namespace/id/version must match the path".to_string(),
            ));
        }

        let existing = self
            .revisions
            .find_by_id(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))?;
        if existing.active {
            warn!(revision_id = %id, "rejected update on active revision");
            return Err(WorkflowError::ActiveConflict(id.to_string()));
        }
        if existing.updated_at != expected {
            return Err(WorkflowError::OptimisticLock {
                expected,
                actual: existing.updated_at,
            });
        }

        let now = Utc::now();
        let mut revision = parsed;
        revision.created_at = existing.created_at;
        revision.updated_at = now;
        revision.validate_fields().map_err(|e| WorkflowError::InvalidRevision(e.to_string()))?;

        let final_source = codec::update_metadata(
            source,
            &MetadataUpdate {
                updated_at: Some(now),
                ..Default::default()
            },
        );

        self.revisions
            .update_with_source(revision.clone(), final_source.clone(), expected)
            .await?;

        info!(revision_id = %id, "revision updated");
        Ok(WorkflowRevisionWithSource {
            revision,
            source: final_source,
        })
    }

    /// Activate a revision. Idempotent on an already-active row —
    /// still restamps `updatedAt`, still requires the lock header to match.
    pub async fn activate_revision(
        &self,
        id: &WorkflowRevisionId,
        current_updated_at_header: &str,
    ) -> Result<WorkflowRevisionWithSource, WorkflowError> {
        self.set_active(id, current_updated_at_header, true).await
    }

    /// Deactivate a revision. Idempotent on an already-inactive row.
    pub async fn deactivate_revision(
        &self,
        id: &WorkflowRevisionId,
        current_updated_at_header: &str,
    ) -> Result<WorkflowRevisionWithSource, WorkflowError> {
        self.set_active(id, current_updated_at_header, false).await
    }

    async fn set_active(
        &self,
        id: &WorkflowRevisionId,
        current_updated_at_header: &str,
        target: bool,
    ) -> Result<WorkflowRevisionWithSource, WorkflowError> {
        let expected = parse_updated_at_header(current_updated_at_header)?;

        let existing = self
            .revisions
            .find_by_id_with_source(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))?;
        if existing.revision.updated_at != expected {
            return Err(WorkflowError::OptimisticLock {
                expected,
                actual: existing.revision.updated_at,
            });
        }

        let new_source = codec::update_metadata(
            &existing.source,
            &MetadataUpdate {
                active: Some(target),
                updated_at: Some(Utc::now()),
                ..Default::default()
            },
        );

        let revision = if target {
            self.revisions
                .activate_with_source(id, new_source.clone(), expected)
                .await?
        } else {
            self.revisions
                .deactivate_with_source(id, new_source.clone(), expected)
                .await?
        };

        info!(revision_id = %id, active = target, "revision activation changed");
        Ok(WorkflowRevisionWithSource {
            revision,
            source: new_source,
        })
    }

    pub async fn get_revision(
        &self,
        id: &WorkflowRevisionId,
    ) -> Result<WorkflowRevisionWithSource, WorkflowError> {
        self.revisions
            .find_by_id_with_source(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))
    }

    pub async fn list_revisions(
        &self,
        workflow_id: &WorkflowId,
        pagination: &Pagination,
    ) -> Result<Page<WorkflowRevision>, WorkflowError> {
        Ok(self.revisions.find_by_workflow_id(workflow_id, pagination).await?)
    }

    /// All currently-active revisions of a workflow, version ascending.
    /// Multi-active is allowed — this may return more than one row.
    pub async fn find_active_revisions(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<WorkflowRevision>, WorkflowError> {
        Ok(self.revisions.find_active_revisions(workflow_id).await?)
    }

    pub async fn list_workflows(
        &self,
        namespace: Option<&str>,
        pagination: &Pagination,
    ) -> Result<Page<WorkflowSummary>, WorkflowError> {
        Ok(self.revisions.list_workflows(namespace, pagination).await?)
    }

    /// Delete a single revision; must be inactive.
    pub async fn delete_revision(&self, id: &WorkflowRevisionId) -> Result<(), WorkflowError> {
        let existing = self
            .revisions
            .find_by_id(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))?;
        if existing.active {
            warn!(revision_id = %id, "rejected delete on active revision");
            return Err(WorkflowError::ActiveConflict(id.to_string()));
        }
        self.revisions.delete_by_id(id).await?;
        info!(revision_id = %id, "revision deleted");
        Ok(())
    }

    /// Delete every revision of a workflow unconditionally.
    pub async fn delete_workflow(&self, workflow_id: &WorkflowId) -> Result<u64, WorkflowError> {
        let had_active = !self.revisions.find_active_revisions(workflow_id).await?.is_empty();
        let count = self.revisions.delete_by_workflow_id(workflow_id).await?;
        if had_active {
            warn!(workflow_id = %workflow_id, "deleted workflow that had an active revision");
        }
        info!(workflow_id = %workflow_id, deleted = count, "workflow deleted");
        Ok(count)
    }

    /// Launch an execution of one revision's step tree, running it
    /// to completion (or failure/cancellation) before returning.
    pub async fn launch_execution(
        &self,
        id: &WorkflowRevisionId,
        engine: &ExecutionEngine,
        input: Option<serde_json::Value>,
    ) -> Result<WorkflowExecution, WorkflowError> {
        let revision = self
            .revisions
            .find_by_id(id)
            .await?
            .ok_or_else(|| WorkflowError::NotFound(id.to_string()))?;

        let execution =
            WorkflowExecution::new_running(id.workflow_id().clone(), id.version(), input.clone());
        self.executions.create_execution(execution.clone()).await?;
        info!(execution_id = %execution.id, revision_id = %id, "execution launched");

        let mut ctx = ExecutionContext::new(execution.id.clone(), input);
        let run_result = engine.run(&revision.steps, &mut ctx).await;

        let (status, output, error_message) = match run_result {
            Ok(outcome) if outcome.is_failed() => (
                ExecutionStatus::Failed,
                outcome.output,
                outcome.error_message,
            ),
            Ok(outcome) => (ExecutionStatus::Completed, outcome.output, None),
            Err(e) => (ExecutionStatus::Failed, None, Some(e.to_string())),
        };

        self.executions
            .update_execution_status(&execution.id, status, output.clone(), error_message.clone(), Some(Utc::now()))
            .await?;

        if status == ExecutionStatus::Failed {
            warn!(execution_id = %execution.id, "execution finished with failure");
        } else {
            info!(execution_id = %execution.id, "execution finished");
        }

        Ok(WorkflowExecution {
            status,
            output,
            error_message,
            finished_at: Some(Utc::now()),
            ..execution
        })
    }

    /// Fetch one execution's header plus its full step-result log.
    pub async fn get_execution(
        &self,
        id: &ExecutionId,
    ) -> Result<(WorkflowExecution, Vec<conductor_domain::ExecutionStepResult>), WorkflowError> {
        let execution = self
            .executions
            .find_by_id(id)
            .await?
            .ok_or_else(|| WorkflowError::ExecutionNotFound(id.clone()))?;
        let steps = self.executions.find_step_results_by_execution_id(id).await?;
        Ok((execution, steps))
    }

    /// History query for a workflow, paginated.
    pub async fn execution_history(
        &self,
        workflow_id: &WorkflowId,
        pagination: &Pagination,
    ) -> Result<Page<WorkflowExecution>, WorkflowError> {
        if !self.revisions.exists(workflow_id).await? {
            return Err(WorkflowError::NotFound(workflow_id.to_string()));
        }
        Ok(self.executions.find_by_workflow_id(workflow_id, pagination).await?)
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<StepRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn executions(&self) -> &Arc<dyn ExecutionStore> {
        &self.executions
    }
}

/// Re-derive a revision's canonical YAML form, e.g. for a GET response where
/// only the structured representation (not the original source) is at hand.
pub fn to_canonical_yaml(revision: &WorkflowRevision, registry: &StepRegistry) -> Result<String, WorkflowError> {
    codec::to_yaml(revision, registry).map_err(WorkflowError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use conductor_store::{InMemoryExecutionStore, InMemoryRevisionStore};
    use serde_json::json;

    fn service() -> WorkflowService {
        WorkflowService::new(
            Arc::new(InMemoryRevisionStore::new()),
            Arc::new(InMemoryExecutionStore::new()),
            Arc::new(StepRegistry::with_builtins()),
        )
    }

    fn sample_source() -> String {
        "namespace: billing\nid: invoice-dispatch\nname: Invoice Dispatch\nsteps:\n  type: LogTask\n  message: \"hi\"\n".to_string()
    }

    #[tokio::test]
    async fn create_workflow_assigns_version_one() {
        let svc = service();
        let created = svc.create_workflow(&sample_source()).await.unwrap();
        assert_eq!(created.revision.version, 1);
        assert!(!created.revision.active);
    }

    #[tokio::test]
    async fn create_workflow_rejects_duplicate() {
        let svc = service();
        svc.create_workflow(&sample_source()).await.unwrap();
        let err = svc.create_workflow(&sample_source()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::AlreadyExists(_)));
    }

    #[tokio::test]
    async fn create_revision_increments_version() {
        let svc = service();
        svc.create_workflow(&sample_source()).await.unwrap();
        let wf = WorkflowId::new("billing", "invoice-dispatch").unwrap();
        let second = svc.create_revision(&wf, &sample_source()).await.unwrap();
        assert_eq!(second.revision.version, 2);
    }

    #[tokio::test]
    async fn create_revision_on_missing_workflow_fails() {
        let svc = service();
        let wf = WorkflowId::new("billing", "ghost").unwrap();
        let err = svc.create_revision(&wf, &sample_source()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }

    #[tokio::test]
    async fn update_rejects_mismatched_path() {
        let svc = service();
        let created = svc.create_workflow(&sample_source()).await.unwrap();
        let other_id = WorkflowId::new("billing", "invoice-dispatch").unwrap().revision(7);
        let err = svc.update_revision(&other_id, &created.source).await.unwrap_err();
        assert!(matches!(err, WorkflowError::InvalidRevision(_)));
    }

    #[tokio::test]
    async fn update_rejects_active_revision() {
        let svc = service();
        let created = svc.create_workflow(&sample_source()).await.unwrap();
        let id = created.revision.workflow_id.revision(1);
        svc.activate_revision(&id, &created.revision.updated_at.to_rfc3339())
            .await
            .unwrap();
        let active = svc.get_revision(&id).await.unwrap();
        let err = svc.update_revision(&id, &active.source).await.unwrap_err();
        assert!(matches!(err, WorkflowError::ActiveConflict(_)));
    }

    #[tokio::test]
    async fn activate_then_deactivate_round_trips() {
        let svc = service();
        let created = svc.create_workflow(&sample_source()).await.unwrap();
        let id = created.revision.workflow_id.revision(1);

        let activated = svc
            .activate_revision(&id, &created.revision.updated_at.to_rfc3339())
            .await
            .unwrap();
        assert!(activated.revision.active);

        let deactivated = svc
            .deactivate_revision(&id, &activated.revision.updated_at.to_rfc3339())
            .await
            .unwrap();
        assert!(!deactivated.revision.active);
    }

    #[tokio::test]
    async fn activate_rejects_stale_header() {
        let svc = service();
        let created = svc.create_workflow(&sample_source()).await.unwrap();
        let id = created.revision.workflow_id.revision(1);
        let err = svc
            .activate_revision(&id, "2000-01-01T00:00:00+00:00")
            .await
            .unwrap_err();
        assert!(matches!(err, WorkflowError::OptimisticLock { .. }));
    }

    #[tokio::test]
    async fn activating_two_versions_leaves_both_active() {
        let svc = service();
        let created = svc.create_workflow(&sample_source()).await.unwrap();
        let wf = created.revision.workflow_id.clone();
        let second = svc.create_revision(&wf, &sample_source()).await.unwrap();

        svc.activate_revision(&wf.revision(1), &created.revision.updated_at.to_rfc3339())
            .await
            .unwrap();
        svc.activate_revision(&wf.revision(2), &second.revision.updated_at.to_rfc3339())
            .await
            .unwrap();

        let active = svc.find_active_revisions(&wf).await.unwrap();
        assert_eq!(active.len(), 2);
        assert_eq!(active[0].version, 1);
        assert_eq!(active[1].version, 2);
    }

    #[tokio::test]
    async fn delete_rejects_active_revision() {
        let svc = service();
        let created = svc.create_workflow(&sample_source()).await.unwrap();
        let id = created.revision.workflow_id.revision(1);
        svc.activate_revision(&id, &created.revision.updated_at.to_rfc3339())
            .await
            .unwrap();
        let err = svc.delete_revision(&id).await.unwrap_err();
        assert!(matches!(err, WorkflowError::ActiveConflict(_)));
    }

    #[tokio::test]
    async fn delete_workflow_removes_all_versions_even_if_active() {
        let svc = service();
        let created = svc.create_workflow(&sample_source()).await.unwrap();
        let wf = created.revision.workflow_id.clone();
        svc.activate_revision(&wf.revision(1), &created.revision.updated_at.to_rfc3339())
            .await
            .unwrap();
        let removed = svc.delete_workflow(&wf).await.unwrap();
        assert_eq!(removed, 1);
    }

    #[tokio::test]
    async fn launch_execution_runs_to_completion() {
        let svc = service();
        let created = svc.create_workflow(&sample_source()).await.unwrap();
        let id = created.revision.workflow_id.revision(1);
        let engine = ExecutionEngine::new(svc.registry().clone(), svc.executions().clone());
        let execution = svc.launch_execution(&id, &engine, Some(json!({"k": "v"}))).await.unwrap();
        assert_eq!(execution.status, ExecutionStatus::Completed);
        assert!(execution.finished_at.is_some());
    }

    #[tokio::test]
    async fn get_execution_returns_step_results() {
        let svc = service();
        let created = svc.create_workflow(&sample_source()).await.unwrap();
        let id = created.revision.workflow_id.revision(1);
        let engine = ExecutionEngine::new(svc.registry().clone(), svc.executions().clone());
        let execution = svc.launch_execution(&id, &engine, None).await.unwrap();

        let (header, steps) = svc.get_execution(&execution.id).await.unwrap();
        assert_eq!(header.id, execution.id);
        assert_eq!(steps.len(), 1);
    }

    #[tokio::test]
    async fn execution_history_rejects_unknown_workflow() {
        let svc = service();
        let wf = WorkflowId::new("billing", "ghost").unwrap();
        let err = svc.execution_history(&wf, &Pagination::default()).await.unwrap_err();
        assert!(matches!(err, WorkflowError::NotFound(_)));
    }
}
