//! The mutable context threaded through a single execution's step tree walk.
//!
//! A JSON context bag that steps read and write to pass data to later
//! siblings, plus a running step-index counter used to number
//! `ExecutionStepResult` rows in traversal order. Per-step durability
//! comes from the Execution Store's checkpoint rows, not from in-memory
//! state replay, so this type carries no history log or snapshots.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde_json::Value;

use conductor_domain::ExecutionId;

/// Cooperative cancellation flag shared between the engine driving an
/// execution and whatever requested it be cancelled.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Per-execution state visible to every step as the engine walks the tree.
pub struct ExecutionContext {
    pub execution_id: ExecutionId,
    /// Shared JSON bag steps may read and write to pass data forward.
    pub context: Value,
    /// Count of leaf steps checkpointed so far, in traversal order.
    pub step_index: u32,
    pub cancellation: CancellationToken,
}

impl ExecutionContext {
    #[must_use]
    pub fn new(execution_id: ExecutionId, input: Option<Value>) -> Self {
        Self {
            execution_id,
            context: input.unwrap_or(Value::Null),
            step_index: 0,
            cancellation: CancellationToken::new(),
        }
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn next_step_index(&mut self) -> u32 {
        let idx = self.step_index;
        self.step_index += 1;
        idx
    }

    /// Merge a JSON object into the shared context, folding a step's
    /// output forward for later siblings to read.
    pub fn merge_context(&mut self, update: &Value) {
        if let (Value::Object(base), Value::Object(patch)) = (&mut self.context, update) {
            for (k, v) in patch {
                base.insert(k.clone(), v.clone());
            }
        } else if !update.is_null() {
            self.context = update.clone();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn merge_context_folds_object_fields() {
        let mut ctx = ExecutionContext::new(ExecutionId::new(), Some(json!({"a": 1})));
        ctx.merge_context(&json!({"b": 2}));
        assert_eq!(ctx.context, json!({"a": 1, "b": 2}));
    }

    #[test]
    fn step_index_increments() {
        let mut ctx = ExecutionContext::new(ExecutionId::new(), None);
        assert_eq!(ctx.next_step_index(), 0);
        assert_eq!(ctx.next_step_index(), 1);
    }

    #[test]
    fn cancellation_token_is_observed() {
        let ctx = ExecutionContext::new(ExecutionId::new(), None);
        let token = ctx.cancellation.clone();
        assert!(!ctx.is_cancelled());
        token.cancel();
        assert!(ctx.is_cancelled());
    }
}
