//! The step registry: an open, tag-keyed map from step kind to its decoder
//! and executor, rather than a closed `match step_type { ... }` dispatch.
//! Built-ins register unconditionally at startup, plugins register by
//! discovery, and registering an already-taken tag is a fatal
//! configuration error rather than a silent overwrite.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::{Map, Value};
use thiserror::Error;

use conductor_domain::Step;

use crate::executor::StepExecutor;

/// A decoded step's non-child, kind-specific fields plus its decoded
/// children, handed back from a kind's decode function.
pub struct DecodedChildren {
    pub fields: Value,
    pub children: Vec<Step>,
}

/// Extracts a step's children (if any) from its raw JSON object and
/// validates the kind-specific fields are well formed. Built-ins implement
/// this directly; a WASM-discovered plugin kind always returns no children
/// (plugin step kinds are leaves).
pub type DecodeFn =
    fn(&Map<String, Value>, &StepRegistry, depth: usize) -> Result<DecodedChildren, DecodeError>;

/// Builds a fresh executor instance for a kind. Stateless kinds can return a
/// shared singleton; this is a factory so stateful executors (e.g. one
/// wrapping a WASM instance) can be constructed freshly per step if needed.
pub type ExecutorFactory = fn() -> Arc<dyn StepExecutor>;

/// Generic decode for a kind with no host-known field schema and no
/// children, e.g. a plugin-provided kind: keep every authored field
/// verbatim, same as a built-in's own decode, minus any kind-specific
/// validation only the plugin itself understands.
pub fn generic_leaf_decode(
    obj: &Map<String, Value>,
    _registry: &StepRegistry,
    _depth: usize,
) -> Result<DecodedChildren, DecodeError> {
    Ok(DecodedChildren {
        fields: Value::Object(obj.clone()),
        children: Vec::new(),
    })
}

/// Generic encode pairing `generic_leaf_decode`: the fields are already the
/// full original object, so re-emitting them verbatim satisfies the
/// round-trip law.
pub fn generic_leaf_encode(step: &Step) -> Value {
    step.fields.clone()
}

/// The dual of `DecodeFn`: rebuilds a step's raw JSON object (sans `type`/
/// `id`, which the registry adds back) from its decoded fields and children.
/// `encode ∘ decode = identity` on the fields each kind defines, which is
/// what lets the codec re-derive a step subtree for `toYaml` without having
/// kept the original text.
pub type EncodeFn = fn(&Step) -> Value;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DecodeError {
    #[error("unknown step type '{tag}'{suggestion}", suggestion = suggestion_suffix(.suggestion))]
    UnknownStepType {
        tag: String,
        suggestion: Option<String>,
    },
    #[error("step node at depth {depth} is not a JSON object")]
    NotAnObject { depth: usize },
    #[error("step node is missing required field '{field}' for type '{tag}'")]
    MissingField { tag: String, field: &'static str },
    #[error("step node has malformed field '{field}' for type '{tag}': {reason}")]
    MalformedField {
        tag: String,
        field: &'static str,
        reason: String,
    },
    #[error("step tree exceeds maximum depth of {max} (at depth {depth})")]
    TooDeep { max: usize, depth: usize },
    #[error("step tree exceeds maximum node count of {max}")]
    TooManyNodes { max: usize },
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    suggestion
        .as_ref()
        .map(|s| format!(", did you mean '{s}'?"))
        .unwrap_or_default()
}

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("step kind '{0}' is already registered")]
    DuplicateTag(String),
}

/// How a registered kind builds its executor: built-ins are stateless, so a
/// plain function pointer suffices; a plugin-provided kind wraps a loaded
/// WASM instance and so must carry that state, which a `fn` pointer cannot.
enum ExecutorSource {
    Factory(ExecutorFactory),
    Instance(Arc<dyn StepExecutor>),
}

struct RegisteredKind {
    decode: DecodeFn,
    encode: EncodeFn,
    executor: ExecutorSource,
    is_orchestration: bool,
    #[allow(dead_code)]
    display_name: String,
}

/// The open registry of step kinds known to this process.
#[derive(Default)]
pub struct StepRegistry {
    kinds: HashMap<String, RegisteredKind>,
}

pub const MAX_STEP_DEPTH: usize = 10;
pub const MAX_STEP_NODES: usize = 1000;

impl StepRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self {
            kinds: HashMap::new(),
        }
    }

    /// Register a step kind. `is_orchestration` marks a kind whose executor
    /// itself walks (a subset of) its children back into the engine — such a
    /// step is never checkpointed, regardless of how many children it
    /// happens to have at decode time. Returns `DuplicateTag` if the tag is
    /// already registered; callers at startup treat that as fatal.
    pub fn register(
        &mut self,
        tag: impl Into<String>,
        decode: DecodeFn,
        encode: EncodeFn,
        executor: ExecutorFactory,
        is_orchestration: bool,
        display_name: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let tag = tag.into();
        if self.kinds.contains_key(&tag) {
            return Err(RegistryError::DuplicateTag(tag));
        }
        self.kinds.insert(
            tag,
            RegisteredKind {
                decode,
                encode,
                executor: ExecutorSource::Factory(executor),
                is_orchestration,
                display_name: display_name.into(),
            },
        );
        Ok(())
    }

    /// Register a kind whose executor carries state a plain `fn` pointer
    /// cannot (e.g. a loaded WASM module instance). Used by plugin
    /// discovery; built-ins use `register` instead.
    pub fn register_dynamic(
        &mut self,
        tag: impl Into<String>,
        decode: DecodeFn,
        encode: EncodeFn,
        executor: Arc<dyn StepExecutor>,
        is_orchestration: bool,
        display_name: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let tag = tag.into();
        if self.kinds.contains_key(&tag) {
            return Err(RegistryError::DuplicateTag(tag));
        }
        self.kinds.insert(
            tag,
            RegisteredKind {
                decode,
                encode,
                executor: ExecutorSource::Instance(executor),
                is_orchestration,
                display_name: display_name.into(),
            },
        );
        Ok(())
    }

    #[must_use]
    pub fn is_registered(&self, tag: &str) -> bool {
        self.kinds.contains_key(tag)
    }

    #[must_use]
    pub fn tags(&self) -> Vec<&str> {
        self.kinds.keys().map(String::as_str).collect()
    }

    /// Find the registered tag closest (by Levenshtein distance) to an
    /// unknown one, for a "did you mean" suggestion in the error.
    #[must_use]
    pub fn suggest(&self, unknown_tag: &str) -> Option<String> {
        self.kinds
            .keys()
            .map(|known| (known, strsim::levenshtein(unknown_tag, known)))
            .filter(|(_, dist)| *dist <= 3)
            .min_by_key(|(_, dist)| *dist)
            .map(|(known, _)| known.clone())
    }

    pub fn executor_for(&self, tag: &str) -> Option<Arc<dyn StepExecutor>> {
        self.kinds.get(tag).map(|k| match &k.executor {
            ExecutorSource::Factory(f) => f(),
            ExecutorSource::Instance(instance) => instance.clone(),
        })
    }

    /// Whether a registered tag is orchestration-class (delegates to
    /// children, never checkpointed) rather than a leaf/task that the
    /// engine checkpoints after it runs. An empty-children orchestration
    /// step (e.g. `Sequence` with no steps) is still orchestration-class,
    /// not a leaf: checkpointing is a property of the kind, not the tree
    /// shape of one instance. Unknown tags are treated as leaves; the
    /// engine rejects them before this would matter.
    #[must_use]
    pub fn is_orchestration(&self, tag: &str) -> bool {
        self.kinds.get(tag).is_some_and(|k| k.is_orchestration)
    }

    /// Decode a raw step node (`{"type": ..., ...}`) into a `Step`, depth
    /// first, rejecting unknown tags, malformed fields, and trees that
    /// exceed the depth/size limits.
    pub fn decode_node(&self, raw: &Value, depth: usize) -> Result<Step, DecodeError> {
        if depth > MAX_STEP_DEPTH {
            return Err(DecodeError::TooDeep {
                max: MAX_STEP_DEPTH,
                depth,
            });
        }
        let obj = raw.as_object().ok_or(DecodeError::NotAnObject { depth })?;
        let tag = obj
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| DecodeError::MissingField {
                tag: "?".to_string(),
                field: "type",
            })?
            .to_string();
        let id = obj
            .get("id")
            .and_then(Value::as_str)
            .map(ToString::to_string);

        let kind = self.kinds.get(&tag).ok_or_else(|| DecodeError::UnknownStepType {
            tag: tag.clone(),
            suggestion: self.suggest(&tag),
        })?;

        let decoded = (kind.decode)(obj, self, depth)?;

        Ok(Step {
            id,
            tag,
            fields: decoded.fields,
            children: decoded.children,
        })
    }

    /// Re-derive a step node's raw JSON form (`{"type": ..., "id"?: ..., ...}`)
    /// from its decoded representation, the dual of `decode_node`. Used by
    /// the codec to re-emit canonical YAML for a revision without the
    /// original source text.
    pub fn encode_node(&self, step: &Step) -> Result<Value, DecodeError> {
        let kind = self
            .kinds
            .get(&step.tag)
            .ok_or_else(|| DecodeError::UnknownStepType {
                tag: step.tag.clone(),
                suggestion: self.suggest(&step.tag),
            })?;
        let mut obj = (kind.encode)(step)
            .as_object()
            .cloned()
            .unwrap_or_default();
        obj.insert("type".to_string(), Value::String(step.tag.clone()));
        if let Some(id) = &step.id {
            obj.insert("id".to_string(), Value::String(id.clone()));
        }
        Ok(Value::Object(obj))
    }

    /// Decode a top-level `steps:` value, which per the step model may be a
    /// single step node (a mapping) or a bare sequence of steps (an implicit
    /// `Sequence`), then validate the full tree's node count.
    pub fn decode_root(&self, raw: &Value) -> Result<Step, DecodeError> {
        let root = if raw.is_array() {
            let mut fields = Map::new();
            fields.insert("type".to_string(), Value::String("Sequence".to_string()));
            fields.insert("steps".to_string(), raw.clone());
            self.decode_node(&Value::Object(fields), 0)?
        } else {
            self.decode_node(raw, 0)?
        };

        let count = root.node_count();
        if count > MAX_STEP_NODES {
            return Err(DecodeError::TooManyNodes {
                max: MAX_STEP_NODES,
            });
        }
        Ok(root)
    }

    /// Populate a registry with the reference built-in kinds
    /// (`Sequence`, `If`, `LogTask`). Plugin kinds are added afterward by
    /// `conductor-plugins`, via `register_dynamic`, which rejects tag
    /// collisions the same way.
    #[must_use]
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        crate::steps::register_builtins(&mut registry)
            .expect("built-in step kinds must not collide with each other");
        registry
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::steps::log_task;

    #[test]
    fn register_rejects_duplicate_tag() {
        let mut registry = StepRegistry::new();
        registry
            .register("LogTask", log_task::decode, log_task::encode, log_task::executor, false, "Log")
            .unwrap();
        let err = registry
            .register("LogTask", log_task::decode, log_task::encode, log_task::executor, false, "Log again")
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTag(t) if t == "LogTask"));
    }

    #[test]
    fn is_orchestration_reflects_registration() {
        let registry = StepRegistry::with_builtins();
        assert!(registry.is_orchestration("Sequence"));
        assert!(registry.is_orchestration("If"));
        assert!(!registry.is_orchestration("LogTask"));
        assert!(!registry.is_orchestration("NoSuchTag"));
    }

    #[test]
    fn encode_decode_roundtrips_fields() {
        let registry = StepRegistry::with_builtins();
        let raw = serde_json::json!({"type": "LogTask", "id": "announce", "message": "hi"});
        let step = registry.decode_root(&raw).unwrap();
        let back = registry.encode_node(&step).unwrap();
        assert_eq!(back, raw);
    }

    #[test]
    fn decode_root_rejects_unknown_tag() {
        let registry = StepRegistry::with_builtins();
        let raw = serde_json::json!({"type": "LgTask", "message": "hi"});
        let err = registry.decode_root(&raw).unwrap_err();
        match err {
            DecodeError::UnknownStepType { tag, suggestion } => {
                assert_eq!(tag, "LgTask");
                assert_eq!(suggestion.as_deref(), Some("LogTask"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn decode_root_accepts_bare_sequence() {
        let registry = StepRegistry::with_builtins();
        let raw = serde_json::json!([
            {"type": "LogTask", "message": "a"},
            {"type": "LogTask", "message": "b"},
        ]);
        let step = registry.decode_root(&raw).unwrap();
        assert_eq!(step.tag, "Sequence");
        assert_eq!(step.children.len(), 2);
    }

    #[test]
    fn decode_root_rejects_too_deep_tree() {
        let registry = StepRegistry::with_builtins();
        let mut node = serde_json::json!({"type": "LogTask", "message": "leaf"});
        for _ in 0..12 {
            node = serde_json::json!({"type": "Sequence", "steps": [node]});
        }
        let err = registry.decode_root(&node).unwrap_err();
        assert!(matches!(err, DecodeError::TooDeep { .. }));
    }

    #[test]
    fn register_dynamic_executor_is_reachable() {
        let mut registry = StepRegistry::new();
        registry
            .register_dynamic(
                "Frobnicate",
                generic_leaf_decode,
                generic_leaf_encode,
                log_task::executor(),
                false,
                "Plugin-provided",
            )
            .unwrap();
        assert!(registry.is_registered("Frobnicate"));
        assert!(registry.executor_for("Frobnicate").is_some());
        assert!(!registry.is_orchestration("Frobnicate"));
    }

    #[test]
    fn register_dynamic_rejects_duplicate_tag() {
        let mut registry = StepRegistry::with_builtins();
        let err = registry
            .register_dynamic(
                "LogTask",
                generic_leaf_decode,
                generic_leaf_encode,
                log_task::executor(),
                false,
                "Plugin-provided",
            )
            .unwrap_err();
        assert!(matches!(err, RegistryError::DuplicateTag(t) if t == "LogTask"));
    }
}
