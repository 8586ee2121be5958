//! `If`: evaluate a condition and run the `then` branch, or the `else`
//! branch when present, otherwise skip.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use conductor_domain::Step;

use crate::condition;
use crate::engine::ExecutionEngine;
use crate::execution_context::ExecutionContext;
use crate::executor::{ExecutorError, StepExecutor, StepOutcome};
use crate::registry::{DecodeError, DecodedChildren, StepRegistry};

pub fn decode(
    obj: &Map<String, Value>,
    registry: &StepRegistry,
    depth: usize,
) -> Result<DecodedChildren, DecodeError> {
    if !obj.contains_key("condition") {
        return Err(DecodeError::MissingField {
            tag: "If".to_string(),
            field: "condition",
        });
    }
    let then_raw = obj.get("then").ok_or_else(|| DecodeError::MissingField {
        tag: "If".to_string(),
        field: "then",
    })?;
    let then_step = registry.decode_node(then_raw, depth + 1)?;

    let mut children = vec![then_step];
    if let Some(else_raw) = obj.get("else") {
        children.push(registry.decode_node(else_raw, depth + 1)?);
    }

    Ok(DecodedChildren {
        fields: Value::Object(obj.clone()),
        children,
    })
}

pub fn encode(step: &Step) -> Value {
    step.fields.clone()
}

pub struct IfExecutor;

#[async_trait]
impl StepExecutor for IfExecutor {
    async fn execute(
        &self,
        step: &Step,
        ctx: &mut ExecutionContext,
        engine: &ExecutionEngine,
    ) -> Result<StepOutcome, ExecutorError> {
        let expr = step
            .fields
            .get("condition")
            .and_then(Value::as_str)
            .ok_or_else(|| ExecutorError::Failed("If step missing condition string".to_string()))?;

        let matched = condition::evaluate(expr, &ctx.context)?;

        if matched {
            Ok(engine.run_step(&step.children[0], ctx).await?)
        } else if step.children.len() > 1 {
            Ok(engine.run_step(&step.children[1], ctx).await?)
        } else {
            Ok(StepOutcome::skipped())
        }
    }
}

pub fn executor() -> Arc<dyn StepExecutor> {
    Arc::new(IfExecutor)
}
