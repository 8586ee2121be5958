//! The Execution Engine: walks a workflow revision's step tree for one
//! execution, checkpointing each leaf step durably before continuing.
//!
//! An `EngineError` aggregates its collaborators' errors via `#[from]`.
//! The tree is walked recursively rather than as a flat transition graph,
//! and each leaf step commits synchronously to the Execution Store before
//! the walk continues, so a crash mid-run loses at most the step in
//! flight, not the whole run.

use std::sync::Arc;

use chrono::Utc;
use thiserror::Error;
use tracing::{debug, info, warn};

use conductor_domain::{ExecutionStepResult, Step};
use conductor_store::{ExecutionStore, ExecutionStoreError};

use crate::execution_context::ExecutionContext;
use crate::executor::{ExecutorError, StepOutcome};
use crate::registry::StepRegistry;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("step execution failed: {0}")]
    Executor(#[from] ExecutorError),
    #[error("execution store error: {0}")]
    Store(#[from] ExecutionStoreError),
    #[error("step kind '{0}' vanished from the registry mid-run")]
    UnregisteredKind(String),
}

/// Walks one execution's step tree against a fixed registry and execution
/// store. One `ExecutionEngine` is shared across all concurrently running
/// executions; state specific to a single run lives in `ExecutionContext`.
pub struct ExecutionEngine {
    registry: Arc<StepRegistry>,
    store: Arc<dyn ExecutionStore>,
}

impl ExecutionEngine {
    #[must_use]
    pub fn new(registry: Arc<StepRegistry>, store: Arc<dyn ExecutionStore>) -> Self {
        Self { registry, store }
    }

    /// Run the whole tree for one execution, updating the execution's
    /// terminal status in the store once the root step settles.
    pub async fn run(&self, root: &Step, ctx: &mut ExecutionContext) -> Result<StepOutcome, EngineError> {
        let outcome = self.run_step(root, ctx).await?;
        info!(
            execution_id = %ctx.execution_id,
            status = ?outcome.status,
            "execution finished"
        );
        Ok(outcome)
    }

    /// Run a single node. Leaf steps are checkpointed by the engine after
    /// their executor returns; orchestration-class steps (registered with
    /// `is_orchestration`) delegate to their executor, which calls back into
    /// `run_step` for whichever children it selects, and are not themselves
    /// checkpointed even when they happen to have zero children (an empty
    /// `Sequence` is still orchestration-class, not a leaf).
    pub async fn run_step(
        &self,
        step: &Step,
        ctx: &mut ExecutionContext,
    ) -> Result<StepOutcome, EngineError> {
        if ctx.is_cancelled() {
            return Ok(StepOutcome::cancelled());
        }

        let executor = self
            .registry
            .executor_for(&step.tag)
            .ok_or_else(|| EngineError::UnregisteredKind(step.tag.clone()))?;

        if !self.registry.is_orchestration(&step.tag) {
            let started_at = Utc::now();
            let outcome = match executor.execute(step, ctx, self).await {
                Ok(o) => o,
                Err(e) => StepOutcome::failed(e.to_string()),
            };
            let completed_at = Utc::now();
            let step_index = ctx.next_step_index();

            debug!(
                execution_id = %ctx.execution_id,
                step_id = step.address(),
                step_index,
                status = ?outcome.status,
                "step checkpoint"
            );

            self.store
                .save_step_result(ExecutionStepResult {
                    execution_id: ctx.execution_id.clone(),
                    step_index,
                    step_id: step.address().to_string(),
                    status: outcome.status,
                    input_data: None,
                    output_data: outcome.output.clone(),
                    error_message: outcome.error_message.clone(),
                    error_details: outcome.error_details.clone(),
                    started_at,
                    completed_at,
                })
                .await?;

            if let Some(output) = &outcome.output {
                ctx.merge_context(output);
            }

            Ok(outcome)
        } else {
            let outcome = executor.execute(step, ctx, self).await?;
            if outcome.is_failed() {
                warn!(
                    execution_id = %ctx.execution_id,
                    step = step.address(),
                    "orchestration step propagating child failure"
                );
            }
            Ok(outcome)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::execution_context::ExecutionContext;
    use conductor_domain::{ExecutionId, StepResultStatus};
    use conductor_store::InMemoryExecutionStore;
    use serde_json::json;

    fn registry() -> Arc<StepRegistry> {
        Arc::new(StepRegistry::with_builtins())
    }

    #[tokio::test]
    async fn sequence_checkpoints_only_leaves() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let engine = ExecutionEngine::new(registry(), store.clone());
        let reg = StepRegistry::with_builtins();
        let root = reg
            .decode_root(&json!({
                "type": "Sequence",
                "steps": [
                    {"type": "LogTask", "message": "a"},
                    {"type": "LogTask", "message": "b"},
                ]
            }))
            .unwrap();

        let execution_id = ExecutionId::new();
        let mut ctx = ExecutionContext::new(execution_id.clone(), None);
        let outcome = engine.run(&root, &mut ctx).await.unwrap();
        assert_eq!(outcome.status, StepResultStatus::Completed);

        let results = store
            .find_step_results_by_execution_id(&execution_id)
            .await
            .unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(results[0].step_index, 0);
        assert_eq!(results[1].step_index, 1);
    }

    #[tokio::test]
    async fn sequence_aborts_on_condition_error_without_partial_checkpoints() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let engine = ExecutionEngine::new(registry(), store.clone());
        let reg = StepRegistry::with_builtins();
        // A condition referencing a field absent from the context is an
        // engine-level error, not a business-level step failure, so it
        // aborts the whole run rather than checkpointing a Failed result.
        let root = reg
            .decode_root(&json!({
                "type": "Sequence",
                "steps": [
                    {"type": "If", "condition": "context.missing == 1", "then": {"type": "LogTask", "message": "never"}},
                    {"type": "LogTask", "message": "also never"},
                ]
            }))
            .unwrap();

        let execution_id = ExecutionId::new();
        let mut ctx = ExecutionContext::new(execution_id.clone(), None);
        let err = engine.run(&root, &mut ctx).await.unwrap_err();
        assert!(matches!(err, EngineError::Executor(_)));

        let results = store
            .find_step_results_by_execution_id(&execution_id)
            .await
            .unwrap();
        assert!(results.is_empty(), "no leaf ran before the error");
    }

    #[tokio::test]
    async fn sequence_checkpoints_failed_leaf_and_stops() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let engine = ExecutionEngine::new(registry(), store.clone());
        let reg = StepRegistry::with_builtins();
        let root = reg
            .decode_root(&json!({
                "type": "Sequence",
                "steps": [
                    {"type": "If", "condition": "context.ready", "then": {"type": "LogTask", "message": "a"}},
                    {"type": "LogTask", "message": "b"},
                ]
            }))
            .unwrap();

        let execution_id = ExecutionId::new();
        let mut ctx = ExecutionContext::new(execution_id.clone(), Some(json!({"ready": true})));
        let outcome = engine.run(&root, &mut ctx).await.unwrap();
        assert_eq!(outcome.status, StepResultStatus::Completed);

        let results = store
            .find_step_results_by_execution_id(&execution_id)
            .await
            .unwrap();
        assert_eq!(results.len(), 2, "If's then-branch leaf plus the trailing LogTask both ran");
    }

    #[tokio::test]
    async fn if_runs_matching_branch() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let engine = ExecutionEngine::new(registry(), store.clone());
        let reg = StepRegistry::with_builtins();
        let root = reg
            .decode_root(&json!({
                "type": "If",
                "condition": "context.flag",
                "then": {"type": "LogTask", "message": "yes"},
                "else": {"type": "LogTask", "message": "no"}
            }))
            .unwrap();

        let execution_id = ExecutionId::new();
        let mut ctx = ExecutionContext::new(execution_id.clone(), Some(json!({"flag": true})));
        engine.run(&root, &mut ctx).await.unwrap();

        let results = store
            .find_step_results_by_execution_id(&execution_id)
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].output_data, Some(json!({"message": "yes"})));
    }

    #[tokio::test]
    async fn empty_sequence_is_not_checkpointed_as_a_leaf() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let engine = ExecutionEngine::new(registry(), store.clone());
        let reg = StepRegistry::with_builtins();
        let root = reg
            .decode_root(&json!({"type": "Sequence", "steps": []}))
            .unwrap();
        assert!(root.children.is_empty());

        let execution_id = ExecutionId::new();
        let mut ctx = ExecutionContext::new(execution_id.clone(), None);
        let outcome = engine.run(&root, &mut ctx).await.unwrap();
        assert_eq!(outcome.status, StepResultStatus::Completed);

        let results = store
            .find_step_results_by_execution_id(&execution_id)
            .await
            .unwrap();
        assert!(
            results.is_empty(),
            "an empty Sequence is orchestration-class, not a leaf, and must not be checkpointed"
        );
    }

    #[tokio::test]
    async fn cancellation_short_circuits_remaining_steps() {
        let store = Arc::new(InMemoryExecutionStore::new());
        let engine = ExecutionEngine::new(registry(), store.clone());
        let reg = StepRegistry::with_builtins();
        let root = reg
            .decode_root(&json!({
                "type": "Sequence",
                "steps": [
                    {"type": "LogTask", "message": "a"},
                    {"type": "LogTask", "message": "b"},
                ]
            }))
            .unwrap();

        let execution_id = ExecutionId::new();
        let mut ctx = ExecutionContext::new(execution_id.clone(), None);
        ctx.cancellation.cancel();
        let outcome = engine.run(&root, &mut ctx).await.unwrap();
        assert_eq!(outcome.status, StepResultStatus::Cancelled);

        let results = store
            .find_step_results_by_execution_id(&execution_id)
            .await
            .unwrap();
        assert!(results.is_empty());
    }
}
