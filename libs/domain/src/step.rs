//! The step tree: the structural data type shared by the workflow codec,
//! the step registry and the execution engine.
//!
//! A `Step` is deliberately thin: it carries just enough structure (a tag,
//! an optional address, and its decoded children) for the engine to walk the
//! tree generically, while every kind-specific field stays in `fields` as
//! JSON and is decoded lazily by that kind's executor, rather than a
//! fully-typed enum per step kind.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One node of a workflow's step tree.
///
/// `children` is populated at decode time by the registered kind's child
/// extractor: typically empty for a task step, one entry for a single
/// branch, two for `If` (`then`, optional `else`), N for `Sequence`. Whether
/// a tag is checkpointed as a leaf or delegates to its children is a
/// property of the registered kind, not of how many children one instance
/// happens to have — an empty `Sequence` still has zero children but is
/// not a leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Step {
    /// Operator-assigned address for this node, used to label
    /// `ExecutionStepResult::step_id`. Defaults to `tag` when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// The step-registry tag (`type` in the authored YAML/JSON).
    pub tag: String,

    /// Kind-specific fields, exactly as authored, minus `type`/`id`/child
    /// keys already reflected in `children`. Preserved verbatim so the codec
    /// can re-encode a step without reconstructing its original field order.
    #[serde(default)]
    pub fields: Value,

    /// Decoded child steps, in the order this step's kind defines.
    #[serde(default)]
    pub children: Vec<Step>,
}

impl Step {
    #[must_use]
    pub fn leaf(tag: impl Into<String>, fields: Value) -> Self {
        Self {
            id: None,
            tag: tag.into(),
            fields,
            children: Vec::new(),
        }
    }

    /// The address used for addressing this node in execution results:
    /// the explicit `id` if set, otherwise the tag.
    #[must_use]
    pub fn address(&self) -> &str {
        self.id.as_deref().unwrap_or(&self.tag)
    }

    /// Total node count of the subtree rooted at `self`, inclusive.
    #[must_use]
    pub fn node_count(&self) -> usize {
        1 + self.children.iter().map(Step::node_count).sum::<usize>()
    }

    /// Depth of the subtree rooted at `self`; a single leaf has depth 1.
    #[must_use]
    pub fn depth(&self) -> usize {
        1 + self
            .children
            .iter()
            .map(Step::depth)
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn address_defaults_to_tag() {
        let s = Step::leaf("LogTask", json!({"message": "hi"}));
        assert_eq!(s.address(), "LogTask");
    }

    #[test]
    fn address_prefers_explicit_id() {
        let mut s = Step::leaf("LogTask", json!({}));
        s.id = Some("announce".to_string());
        assert_eq!(s.address(), "announce");
    }

    #[test]
    fn leaf_has_no_children() {
        assert!(Step::leaf("LogTask", json!({})).children.is_empty());
    }

    #[test]
    fn node_count_counts_subtree() {
        let child_a = Step::leaf("LogTask", json!({}));
        let child_b = Step::leaf("LogTask", json!({}));
        let root = Step {
            id: None,
            tag: "Sequence".to_string(),
            fields: json!({}),
            children: vec![child_a, child_b],
        };
        assert_eq!(root.node_count(), 3);
    }

    #[test]
    fn depth_of_nested_tree() {
        let leaf = Step::leaf("LogTask", json!({}));
        let branch = Step {
            id: None,
            tag: "If".to_string(),
            fields: json!({}),
            children: vec![leaf],
        };
        let root = Step {
            id: None,
            tag: "Sequence".to_string(),
            fields: json!({}),
            children: vec![branch],
        };
        assert_eq!(root.depth(), 3);
    }
}
