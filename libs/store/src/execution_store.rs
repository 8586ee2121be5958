//! The Execution Store: an append-only log of executions and their
//! per-step checkpoints, committed synchronously so a crash mid-run loses
//! at most the step in flight.
//!
//! Durable, immediately-committed appends with optimistic concurrency. No
//! snapshot-every-N-events machinery is needed here: an execution's steps
//! are strictly ordered and bounded by its step tree, not an open-ended
//! event stream, so replay is just "read all step results".

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use conductor_domain::{
    ExecutionId, ExecutionStepResult, ExecutionStatus, WorkflowExecution, WorkflowId,
};

use crate::pagination::{Page, Pagination};

#[derive(Debug, Error)]
pub enum ExecutionStoreError {
    #[error("execution {0} not found")]
    NotFound(ExecutionId),
    #[error("execution {0} already exists")]
    AlreadyExists(ExecutionId),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
}

#[async_trait]
pub trait ExecutionStore: Send + Sync {
    async fn create_execution(
        &self,
        execution: WorkflowExecution,
    ) -> Result<(), ExecutionStoreError>;

    /// Durably append one step's result. Must commit before the engine
    /// proceeds to the next step, per the checkpoint contract.
    async fn save_step_result(
        &self,
        result: ExecutionStepResult,
    ) -> Result<(), ExecutionStoreError>;

    async fn update_execution_status(
        &self,
        id: &ExecutionId,
        status: ExecutionStatus,
        output: Option<Value>,
        error_message: Option<String>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<(), ExecutionStoreError>;

    async fn find_by_id(
        &self,
        id: &ExecutionId,
    ) -> Result<Option<WorkflowExecution>, ExecutionStoreError>;

    async fn find_step_results_by_execution_id(
        &self,
        id: &ExecutionId,
    ) -> Result<Vec<ExecutionStepResult>, ExecutionStoreError>;

    async fn find_by_workflow_id(
        &self,
        workflow_id: &WorkflowId,
        pagination: &Pagination,
    ) -> Result<Page<WorkflowExecution>, ExecutionStoreError>;

    async fn count_by_workflow_id(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<u64, ExecutionStoreError>;
}
