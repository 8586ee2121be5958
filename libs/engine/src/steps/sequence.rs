//! `Sequence`: run every child step in order, stopping at the first failure.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use conductor_domain::Step;

use crate::engine::ExecutionEngine;
use crate::execution_context::ExecutionContext;
use crate::executor::{ExecutorError, StepExecutor, StepOutcome};
use crate::registry::{DecodeError, DecodedChildren, StepRegistry};

pub fn decode(
    obj: &Map<String, Value>,
    registry: &StepRegistry,
    depth: usize,
) -> Result<DecodedChildren, DecodeError> {
    let steps = obj
        .get("steps")
        .and_then(Value::as_array)
        .ok_or_else(|| DecodeError::MissingField {
            tag: "Sequence".to_string(),
            field: "steps",
        })?;

    let children = steps
        .iter()
        .map(|raw| registry.decode_node(raw, depth + 1))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(DecodedChildren {
        fields: Value::Object(obj.clone()),
        children,
    })
}

/// `decode` retains the entire raw object (including `type` and `steps`) in
/// `fields`, so encoding is just handing it back; the registry layers `type`/
/// `id` back on top, which is a no-op here since they're already present.
pub fn encode(step: &Step) -> Value {
    step.fields.clone()
}

pub struct SequenceExecutor;

#[async_trait]
impl StepExecutor for SequenceExecutor {
    async fn execute(
        &self,
        step: &Step,
        ctx: &mut ExecutionContext,
        engine: &ExecutionEngine,
    ) -> Result<StepOutcome, ExecutorError> {
        let mut last = StepOutcome::completed(None);
        for child in &step.children {
            if ctx.is_cancelled() {
                return Ok(StepOutcome::cancelled());
            }
            last = engine.run_step(child, ctx).await?;
            if last.is_failed() {
                return Ok(last);
            }
        }
        Ok(last)
    }
}

pub fn executor() -> Arc<dyn StepExecutor> {
    Arc::new(SequenceExecutor)
}
