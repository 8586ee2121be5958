//! `LogTask`: the reference leaf step kind. Emits a `tracing` line and
//! echoes its message into the execution output, mostly useful for tests and
//! worked examples; real deployments register their own task kinds the same
//! way through the registry.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use conductor_domain::Step;

use crate::engine::ExecutionEngine;
use crate::execution_context::ExecutionContext;
use crate::executor::{ExecutorError, StepExecutor, StepOutcome};
use crate::registry::{DecodeError, DecodedChildren, StepRegistry};

pub fn decode(
    obj: &Map<String, Value>,
    _registry: &StepRegistry,
    _depth: usize,
) -> Result<DecodedChildren, DecodeError> {
    if !obj.contains_key("message") {
        return Err(DecodeError::MissingField {
            tag: "LogTask".to_string(),
            field: "message",
        });
    }
    Ok(DecodedChildren {
        fields: Value::Object(obj.clone()),
        children: Vec::new(),
    })
}

pub fn encode(step: &Step) -> Value {
    step.fields.clone()
}

pub struct LogTaskExecutor;

#[async_trait]
impl StepExecutor for LogTaskExecutor {
    async fn execute(
        &self,
        step: &Step,
        _ctx: &mut ExecutionContext,
        _engine: &ExecutionEngine,
    ) -> Result<StepOutcome, ExecutorError> {
        let message = step
            .fields
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or_default();
        tracing::info!(step = step.address(), message, "log task");
        Ok(StepOutcome::completed(Some(json!({ "message": message }))))
    }
}

pub fn executor() -> Arc<dyn StepExecutor> {
    Arc::new(LogTaskExecutor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StepRegistry;

    #[test]
    fn decode_requires_message() {
        let registry = StepRegistry::with_builtins();
        let raw = json!({"type": "LogTask"});
        let err = registry.decode_root(&raw).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::MissingField { field: "message", .. }
        ));
    }
}
