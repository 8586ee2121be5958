//! The Revision Store: durable, optimistically-locked storage for workflow
//! revisions, each kept as a dual representation (source text + structured
//! JSON) that must never drift apart.
//!
//! One `async_trait` per aggregate, with per-operation error enums rather
//! than one store-wide error.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use conductor_domain::{WorkflowId, WorkflowRevision, WorkflowRevisionId, WorkflowRevisionWithSource, WorkflowSummary};

use crate::pagination::{Page, Pagination};

#[derive(Debug, Error)]
pub enum RevisionStoreError {
    #[error("revision {0} already exists")]
    AlreadyExists(WorkflowRevisionId),
    #[error("revision {0} not found")]
    NotFound(WorkflowRevisionId),
    #[error("workflow {0} has no revisions")]
    WorkflowNotFound(WorkflowId),
    #[error("workflow {0} already has an active revision")]
    ActiveConflict(WorkflowId),
    #[error("optimistic lock failed: expected updatedAt {expected}, found {actual}")]
    OptimisticLock {
        expected: DateTime<Utc>,
        actual: DateTime<Utc>,
    },
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait RevisionStore: Send + Sync {
    /// Persist a brand-new revision (its version must not already exist).
    async fn save_with_source(
        &self,
        revision: WorkflowRevision,
        source: String,
    ) -> Result<(), RevisionStoreError>;

    /// Overwrite an existing revision's structured and source form
    /// atomically, enforcing the caller's optimistic lock.
    async fn update_with_source(
        &self,
        revision: WorkflowRevision,
        source: String,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<(), RevisionStoreError>;

    async fn find_by_id_with_source(
        &self,
        id: &WorkflowRevisionId,
    ) -> Result<Option<WorkflowRevisionWithSource>, RevisionStoreError>;

    async fn find_by_id(
        &self,
        id: &WorkflowRevisionId,
    ) -> Result<Option<WorkflowRevision>, RevisionStoreError>;

    async fn find_by_workflow_id(
        &self,
        workflow_id: &WorkflowId,
        pagination: &Pagination,
    ) -> Result<Page<WorkflowRevision>, RevisionStoreError>;

    /// All revisions of a workflow with `active = true`, version ascending.
    /// Multiple revisions may be active simultaneously (canary/AB routing is
    /// the caller's concern, not this store's).
    async fn find_active_revisions(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Vec<WorkflowRevision>, RevisionStoreError>;

    async fn find_max_version(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<Option<u32>, RevisionStoreError>;

    /// Whether any revision at all exists for this `(namespace, id)` pair,
    /// irrespective of version.
    async fn exists(&self, workflow_id: &WorkflowId) -> Result<bool, RevisionStoreError>;

    async fn delete_by_id(&self, id: &WorkflowRevisionId) -> Result<(), RevisionStoreError>;

    /// Delete every revision of a workflow unconditionally, including an
    /// active one if present; returns the number of rows removed.
    async fn delete_by_workflow_id(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<u64, RevisionStoreError>;

    async fn list_workflows(
        &self,
        namespace: Option<&str>,
        pagination: &Pagination,
    ) -> Result<Page<WorkflowSummary>, RevisionStoreError>;

    async fn activate_with_source(
        &self,
        id: &WorkflowRevisionId,
        source: String,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<WorkflowRevision, RevisionStoreError>;

    async fn deactivate_with_source(
        &self,
        id: &WorkflowRevisionId,
        source: String,
        expected_updated_at: DateTime<Utc>,
    ) -> Result<WorkflowRevision, RevisionStoreError>;
}
