//! PostgreSQL-backed `ExecutionStore`. Every `save_step_result` call is its
//! own committed statement: there is no batching, because the checkpoint
//! contract requires each step to be durable before the engine continues.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::PgPool;

use conductor_domain::{
    ExecutionId, ExecutionStatus, ExecutionStepResult, StepResultStatus, WorkflowExecution,
    WorkflowId,
};

use crate::execution_store::{ExecutionStore, ExecutionStoreError};
use crate::pagination::{Page, Pagination};

pub struct PgExecutionStore {
    pool: PgPool,
}

impl PgExecutionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ExecutionRow {
    id: String,
    namespace: String,
    workflow_id: String,
    version: i32,
    status: String,
    input: Option<Value>,
    output: Option<Value>,
    error_message: Option<String>,
    started_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

fn parse_execution_status(s: &str) -> Result<ExecutionStatus, sqlx::Error> {
    match s {
        "running" => Ok(ExecutionStatus::Running),
        "completed" => Ok(ExecutionStatus::Completed),
        "failed" => Ok(ExecutionStatus::Failed),
        "cancelled" => Ok(ExecutionStatus::Cancelled),
        other => Err(sqlx::Error::Decode(
            format!("unknown execution status '{other}'").into(),
        )),
    }
}

fn execution_status_str(status: ExecutionStatus) -> &'static str {
    match status {
        ExecutionStatus::Running => "running",
        ExecutionStatus::Completed => "completed",
        ExecutionStatus::Failed => "failed",
        ExecutionStatus::Cancelled => "cancelled",
    }
}

impl TryFrom<ExecutionRow> for WorkflowExecution {
    type Error = sqlx::Error;

    fn try_from(row: ExecutionRow) -> Result<Self, Self::Error> {
        let workflow_id = WorkflowId::new(row.namespace, row.workflow_id)
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;
        Ok(Self {
            id: row
                .id
                .parse()
                .map_err(|e: conductor_domain::IdParseError| sqlx::Error::Decode(Box::new(e)))?,
            workflow_id,
            version: row.version as u32,
            status: parse_execution_status(&row.status)?,
            input: row.input,
            output: row.output,
            error_message: row.error_message,
            started_at: row.started_at,
            finished_at: row.finished_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct StepResultRow {
    execution_id: String,
    step_index: i32,
    step_id: String,
    status: String,
    input_data: Option<Value>,
    output_data: Option<Value>,
    error_message: Option<String>,
    error_details: Option<Value>,
    started_at: DateTime<Utc>,
    completed_at: DateTime<Utc>,
}

fn parse_step_status(s: &str) -> Result<StepResultStatus, sqlx::Error> {
    match s {
        "completed" => Ok(StepResultStatus::Completed),
        "failed" => Ok(StepResultStatus::Failed),
        "skipped" => Ok(StepResultStatus::Skipped),
        "cancelled" => Ok(StepResultStatus::Cancelled),
        other => Err(sqlx::Error::Decode(
            format!("unknown step result status '{other}'").into(),
        )),
    }
}

fn step_status_str(status: StepResultStatus) -> &'static str {
    match status {
        StepResultStatus::Completed => "completed",
        StepResultStatus::Failed => "failed",
        StepResultStatus::Skipped => "skipped",
        StepResultStatus::Cancelled => "cancelled",
    }
}

impl TryFrom<StepResultRow> for ExecutionStepResult {
    type Error = sqlx::Error;

    fn try_from(row: StepResultRow) -> Result<Self, Self::Error> {
        Ok(Self {
            execution_id: row
                .execution_id
                .parse()
                .map_err(|e: conductor_domain::IdParseError| sqlx::Error::Decode(Box::new(e)))?,
            step_index: row.step_index as u32,
            step_id: row.step_id,
            status: parse_step_status(&row.status)?,
            input_data: row.input_data,
            output_data: row.output_data,
            error_message: row.error_message,
            error_details: row.error_details,
            started_at: row.started_at,
            completed_at: row.completed_at,
        })
    }
}

#[async_trait]
impl ExecutionStore for PgExecutionStore {
    async fn create_execution(
        &self,
        execution: WorkflowExecution,
    ) -> Result<(), ExecutionStoreError> {
        let result = sqlx::query(
            r"
            INSERT INTO workflow_executions
                (id, namespace, workflow_id, version, status, input, output,
                 error_message, started_at, finished_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(execution.id.as_str())
        .bind(execution.workflow_id.namespace())
        .bind(execution.workflow_id.id())
        .bind(execution.version as i32)
        .bind(execution_status_str(execution.status))
        .bind(&execution.input)
        .bind(&execution.output)
        .bind(&execution.error_message)
        .bind(execution.started_at)
        .bind(execution.finished_at)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.as_database_error().is_some_and(|d| d.is_unique_violation()) {
                    return Err(ExecutionStoreError::AlreadyExists(execution.id));
                }
                Err(ExecutionStoreError::Database(e))
            }
        }
    }

    async fn save_step_result(
        &self,
        result: ExecutionStepResult,
    ) -> Result<(), ExecutionStoreError> {
        let outcome = sqlx::query(
            r"
            INSERT INTO execution_step_results
                (execution_id, step_index, step_id, status, input_data,
                 output_data, error_message, error_details, started_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ",
        )
        .bind(result.execution_id.as_str())
        .bind(result.step_index as i32)
        .bind(&result.step_id)
        .bind(step_status_str(result.status))
        .bind(&result.input_data)
        .bind(&result.output_data)
        .bind(&result.error_message)
        .bind(&result.error_details)
        .bind(result.started_at)
        .bind(result.completed_at)
        .execute(&self.pool)
        .await;

        match outcome {
            Ok(_) => Ok(()),
            Err(e) => {
                if e.as_database_error().is_some_and(|d| d.is_unique_violation()) {
                    return Err(ExecutionStoreError::AlreadyExists(result.execution_id));
                }
                Err(ExecutionStoreError::Database(e))
            }
        }
    }

    async fn update_execution_status(
        &self,
        id: &ExecutionId,
        status: ExecutionStatus,
        output: Option<Value>,
        error_message: Option<String>,
        finished_at: Option<DateTime<Utc>>,
    ) -> Result<(), ExecutionStoreError> {
        let result = sqlx::query(
            r"
            UPDATE workflow_executions
            SET status = $1, output = $2, error_message = $3, finished_at = $4
            WHERE id = $5
            ",
        )
        .bind(execution_status_str(status))
        .bind(&output)
        .bind(&error_message)
        .bind(finished_at)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(ExecutionStoreError::NotFound(id.clone()));
        }
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: &ExecutionId,
    ) -> Result<Option<WorkflowExecution>, ExecutionStoreError> {
        let row = sqlx::query_as::<_, ExecutionRow>(
            r"
            SELECT id, namespace, workflow_id, version, status, input, output,
                   error_message, started_at, finished_at
            FROM workflow_executions WHERE id = $1
            ",
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        row.map(TryInto::try_into)
            .transpose()
            .map_err(ExecutionStoreError::Database)
    }

    async fn find_step_results_by_execution_id(
        &self,
        id: &ExecutionId,
    ) -> Result<Vec<ExecutionStepResult>, ExecutionStoreError> {
        let rows = sqlx::query_as::<_, StepResultRow>(
            r"
            SELECT execution_id, step_index, step_id, status, input_data,
                   output_data, error_message, error_details, started_at, completed_at
            FROM execution_step_results
            WHERE execution_id = $1
            ORDER BY step_index ASC
            ",
        )
        .bind(id.as_str())
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter()
            .map(TryInto::try_into)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ExecutionStoreError::Database)
    }

    async fn find_by_workflow_id(
        &self,
        workflow_id: &WorkflowId,
        pagination: &Pagination,
    ) -> Result<Page<WorkflowExecution>, ExecutionStoreError> {
        let total: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM workflow_executions WHERE namespace = $1 AND workflow_id = $2",
        )
        .bind(workflow_id.namespace())
        .bind(workflow_id.id())
        .fetch_one(&self.pool)
        .await?;

        let rows = sqlx::query_as::<_, ExecutionRow>(
            r"
            SELECT id, namespace, workflow_id, version, status, input, output,
                   error_message, started_at, finished_at
            FROM workflow_executions
            WHERE namespace = $1 AND workflow_id = $2
            ORDER BY started_at DESC
            LIMIT $3 OFFSET $4
            ",
        )
        .bind(workflow_id.namespace())
        .bind(workflow_id.id())
        .bind(pagination.clamped_limit())
        .bind(pagination.offset)
        .fetch_all(&self.pool)
        .await?;

        let items = rows
            .into_iter()
            .map(TryInto::try_into)
            .collect::<Result<Vec<_>, _>>()
            .map_err(ExecutionStoreError::Database)?;

        Ok(Page::new(items, total, pagination))
    }

    async fn count_by_workflow_id(
        &self,
        workflow_id: &WorkflowId,
    ) -> Result<u64, ExecutionStoreError> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM workflow_executions WHERE namespace = $1 AND workflow_id = $2",
        )
        .bind(workflow_id.namespace())
        .bind(workflow_id.id())
        .fetch_one(&self.pool)
        .await?;
        Ok(count as u64)
    }
}
