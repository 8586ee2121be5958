//! Execution entities: a run of a workflow revision and its per-step results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use typeshare::typeshare;

use crate::enums::{ExecutionStatus, StepResultStatus};
use crate::ids::{ExecutionId, WorkflowId};

/// A single launch of a workflow revision, tracked end to end.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowExecution {
    pub id: ExecutionId,
    pub workflow_id: WorkflowId,
    pub version: u32,
    pub status: ExecutionStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub started_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

impl WorkflowExecution {
    #[must_use]
    pub fn new_running(workflow_id: WorkflowId, version: u32, input: Option<Value>) -> Self {
        Self {
            id: ExecutionId::new(),
            workflow_id,
            version,
            status: ExecutionStatus::Running,
            input,
            output: None,
            error_message: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }
}

/// The checkpointed outcome of one leaf step within an execution.
///
/// Only leaf (task-class) steps are checkpointed; orchestration steps
/// (`Sequence`, `If`) update traversal order but do not emit their own row.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionStepResult {
    pub execution_id: ExecutionId,
    /// Monotonically increasing count of leaf steps executed so far,
    /// assigned by the engine in traversal order.
    pub step_index: u32,
    /// The step's address: its explicit `id`, or its tag if none was given.
    pub step_id: String,
    pub status: StepResultStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_details: Option<Value>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_execution_starts_running() {
        let wf = WorkflowId::new("billing", "invoice-dispatch").unwrap();
        let exec = WorkflowExecution::new_running(wf, 1, None);
        assert_eq!(exec.status, ExecutionStatus::Running);
        assert!(exec.finished_at.is_none());
    }
}
