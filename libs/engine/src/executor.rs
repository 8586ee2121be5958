//! The `StepExecutor` trait every step kind implements, and the execution
//! context/outcome types it exchanges with the engine.
//!
//! A single `async_trait` method takes a context and returns a tagged
//! outcome enum. The re-entrant `engine` handle lets orchestration-class
//! kinds (`Sequence`, `If`) call back into the engine to run their
//! children.
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use conductor_domain::StepResultStatus;

use crate::engine::{EngineError, ExecutionEngine};
use crate::execution_context::ExecutionContext;

#[derive(Debug, Error)]
pub enum ExecutorError {
    #[error("step execution failed: {0}")]
    Failed(String),
    #[error("condition evaluation failed: {0}")]
    Condition(#[from] crate::condition::ConditionError),
    #[error(transparent)]
    Engine(#[from] Box<EngineError>),
}

impl From<EngineError> for ExecutorError {
    fn from(e: EngineError) -> Self {
        Self::Engine(Box::new(e))
    }
}

/// What running one step produced. Leaf steps always return a concrete
/// status; orchestration steps return the status of whichever child they
/// last ran (or `Completed` if they ran none, e.g. an `If` with no matching
/// branch and no `else`).
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub status: StepResultStatus,
    pub output: Option<Value>,
    pub error_message: Option<String>,
    pub error_details: Option<Value>,
}

impl StepOutcome {
    #[must_use]
    pub fn completed(output: Option<Value>) -> Self {
        Self {
            status: StepResultStatus::Completed,
            output,
            error_message: None,
            error_details: None,
        }
    }

    #[must_use]
    pub fn skipped() -> Self {
        Self {
            status: StepResultStatus::Skipped,
            output: None,
            error_message: None,
            error_details: None,
        }
    }

    #[must_use]
    pub fn cancelled() -> Self {
        Self {
            status: StepResultStatus::Cancelled,
            output: None,
            error_message: None,
            error_details: None,
        }
    }

    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: StepResultStatus::Failed,
            output: None,
            error_message: Some(message.into()),
            error_details: None,
        }
    }

    #[must_use]
    pub fn is_failed(&self) -> bool {
        self.status == StepResultStatus::Failed
    }
}

/// Implemented by every step kind, built-in or plugin-provided. Orchestration
/// kinds (non-leaf steps) call `engine.run_step(child, ctx)` for whichever
/// children their semantics select; leaf kinds do their own work and return.
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        step: &conductor_domain::Step,
        ctx: &mut ExecutionContext,
        engine: &ExecutionEngine,
    ) -> Result<StepOutcome, ExecutorError>;
}

pub type SharedExecutor = Arc<dyn StepExecutor>;
