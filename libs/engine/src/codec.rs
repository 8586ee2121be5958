//! The Workflow Codec: YAML source text in, a structured `WorkflowRevision`
//! out, and back, via `serde_yml::from_str` for the decode direction. The
//! metadata-only surgical rewrite (`update_metadata`/`require_updated_at`)
//! is built on top of the `regex` crate rather than full reserialization,
//! to satisfy the round-trip law: editing only
//! `{createdAt, updatedAt, active, version}` must not disturb comments,
//! key order, or any other authored byte.

use chrono::{DateTime, Utc};
use regex::Regex;
use serde_json::Value;
use thiserror::Error;

use conductor_domain::{FieldValidationError, WorkflowId, WorkflowRevision};

use crate::registry::{DecodeError, StepRegistry};

#[derive(Debug, Error)]
pub enum ParseError {
    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yml::Error),
    #[error("workflow source must be a YAML mapping")]
    NotAMapping,
    #[error("missing required field '{0}'")]
    MissingField(&'static str),
    #[error("malformed field '{field}': {reason}")]
    MalformedField { field: &'static str, reason: String },
    #[error("step tree error: {0}")]
    Step(#[from] DecodeError),
    #[error("revision field validation failed: {0}")]
    Validation(#[from] FieldValidationError),
    #[error("updatedAt is required on this operation but was not present in the source")]
    MissingUpdatedAt,
}

/// A subset of metadata fields to rewrite in place. `None` leaves a field
/// untouched.
#[derive(Debug, Clone, Default)]
pub struct MetadataUpdate {
    pub created_at: Option<DateTime<Utc>>,
    pub updated_at: Option<DateTime<Utc>>,
    pub active: Option<bool>,
    pub version: Option<u32>,
}

/// Parse a workflow source document into its structured form.
///
/// `strict = false` (creation) tolerates a missing `updatedAt`/`createdAt` —
/// the use-case layer stamps both before persisting. `strict = true`
/// (update) requires a declared `updatedAt`, since that value is the
/// optimistic-lock token the use-case compares against the stored row.
pub fn parse_revision(
    text: &str,
    strict: bool,
    registry: &StepRegistry,
) -> Result<WorkflowRevision, ParseError> {
    let value: Value = serde_yml::from_str(text)?;
    let obj = value.as_object().ok_or(ParseError::NotAMapping)?;

    let namespace = obj
        .get("namespace")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("namespace"))?;
    let id = obj
        .get("id")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("id"))?;
    let workflow_id = WorkflowId::new(namespace, id).map_err(|e| ParseError::MalformedField {
        field: "namespace/id",
        reason: e.to_string(),
    })?;

    let version = match obj.get("version") {
        Some(v) => v.as_u64().ok_or_else(|| ParseError::MalformedField {
            field: "version",
            reason: "must be a positive integer".to_string(),
        })? as u32,
        None => 0,
    };

    let name = obj
        .get("name")
        .and_then(Value::as_str)
        .ok_or(ParseError::MissingField("name"))?
        .to_string();

    let description = obj
        .get("description")
        .and_then(Value::as_str)
        .map(ToString::to_string);

    let active = obj.get("active").and_then(Value::as_bool).unwrap_or(false);

    let created_at = parse_optional_instant(obj.get("createdAt"), "createdAt")?;
    let updated_at = parse_optional_instant(obj.get("updatedAt"), "updatedAt")?;

    if strict && updated_at.is_none() {
        return Err(ParseError::MissingUpdatedAt);
    }

    let steps_raw = obj.get("steps").ok_or(ParseError::MissingField("steps"))?;
    let steps = registry.decode_root(steps_raw)?;

    let now = Utc::now();
    let revision = WorkflowRevision {
        workflow_id,
        version,
        name,
        description,
        active,
        created_at: created_at.unwrap_or(now),
        updated_at: updated_at.unwrap_or(now),
        steps,
    };
    revision.validate_fields()?;
    Ok(revision)
}

fn parse_optional_instant(
    v: Option<&Value>,
    field: &'static str,
) -> Result<Option<DateTime<Utc>>, ParseError> {
    let Some(v) = v else { return Ok(None) };
    let s = v.as_str().ok_or(ParseError::MalformedField {
        field,
        reason: "must be an ISO-8601 string".to_string(),
    })?;
    let parsed = DateTime::parse_from_rfc3339(s).map_err(|e| ParseError::MalformedField {
        field,
        reason: e.to_string(),
    })?;
    Ok(Some(parsed.with_timezone(&Utc)))
}

/// Canonical YAML emission for a revision that was not derived from
/// user-authored text (e.g. a freshly-decoded in-memory revision returned to
/// a caller that wants the YAML form).
pub fn to_yaml(revision: &WorkflowRevision, registry: &StepRegistry) -> Result<String, ParseError> {
    let mut map = serde_yml::Mapping::new();
    map.insert(yv("namespace"), yv(revision.workflow_id.namespace()));
    map.insert(yv("id"), yv(revision.workflow_id.id()));
    map.insert(yv("version"), serde_yml::Value::from(u64::from(revision.version)));
    map.insert(yv("name"), yv(&revision.name));
    if let Some(desc) = &revision.description {
        map.insert(yv("description"), yv(desc));
    }
    map.insert(yv("active"), serde_yml::Value::Bool(revision.active));
    map.insert(yv("createdAt"), yv(&revision.created_at.to_rfc3339()));
    map.insert(yv("updatedAt"), yv(&revision.updated_at.to_rfc3339()));

    let steps_json = registry.encode_node(&revision.steps)?;
    let steps_yaml = json_to_yaml_value(&steps_json);
    map.insert(yv("steps"), steps_yaml);

    serde_yml::to_string(&serde_yml::Value::Mapping(map)).map_err(ParseError::Yaml)
}

fn yv(s: &str) -> serde_yml::Value {
    serde_yml::Value::String(s.to_string())
}

/// `serde_json::Value` and `serde_yml::Value` are structurally identical
/// (null/bool/number/string/seq/map); convert field by field rather than
/// round-tripping through text.
fn json_to_yaml_value(v: &Value) -> serde_yml::Value {
    match v {
        Value::Null => serde_yml::Value::Null,
        Value::Bool(b) => serde_yml::Value::Bool(*b),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                serde_yml::Value::from(i)
            } else if let Some(u) = n.as_u64() {
                serde_yml::Value::from(u)
            } else {
                serde_yml::Value::from(n.as_f64().unwrap_or_default())
            }
        }
        Value::String(s) => serde_yml::Value::String(s.clone()),
        Value::Array(items) => {
            serde_yml::Value::Sequence(items.iter().map(json_to_yaml_value).collect())
        }
        Value::Object(obj) => {
            let mut map = serde_yml::Mapping::new();
            for (k, v) in obj {
                map.insert(yv(k), json_to_yaml_value(v));
            }
            serde_yml::Value::Mapping(map)
        }
    }
}

/// Surgically rewrite `{createdAt, updatedAt, active, version}` keys inside
/// an existing source document, leaving every other byte untouched. Keys not
/// already present are appended at the end of the document, so creation
/// flows (where the source arrives without `version`/timestamps) still work.
#[must_use]
pub fn update_metadata(text: &str, updates: &MetadataUpdate) -> String {
    let mut out = text.to_string();
    if let Some(v) = updates.version {
        out = rewrite_or_append(&out, "version", &v.to_string());
    }
    if let Some(v) = updates.created_at {
        out = rewrite_or_append(&out, "createdAt", &v.to_rfc3339());
    }
    if let Some(v) = updates.updated_at {
        out = rewrite_or_append(&out, "updatedAt", &v.to_rfc3339());
    }
    if let Some(v) = updates.active {
        out = rewrite_or_append(&out, "active", &v.to_string());
    }
    out
}

fn rewrite_or_append(text: &str, key: &str, value: &str) -> String {
    let pattern = format!(r"(?m)^{}:[ \t]*.*$", regex::escape(key));
    let re = Regex::new(&pattern).expect("static key pattern is always valid regex");
    if re.is_match(text) {
        let replacement = format!("{key}: {value}");
        re.replace(text, move |_: &regex::Captures| replacement.clone())
            .into_owned()
    } else {
        let mut out = text.trim_end_matches('\n').to_string();
        out.push('\n');
        out.push_str(&format!("{key}: {value}\n"));
        out
    }
}

/// Extract the `updatedAt` value from a source document without a full
/// parse, the way activation/deactivation need just the optimistic-lock
/// token and nothing else from the body.
pub fn require_updated_at(text: &str) -> Result<DateTime<Utc>, ParseError> {
    let re = Regex::new(r"(?m)^updatedAt:[ \t]*(.+)$")
        .expect("static updatedAt pattern is always valid regex");
    let caps = re.captures(text).ok_or(ParseError::MissingUpdatedAt)?;
    let raw = caps[1].trim().trim_matches(|c| c == '"' || c == '\'');
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| ParseError::MalformedField {
            field: "updatedAt",
            reason: e.to_string(),
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::StepRegistry;

    fn sample_source() -> String {
        r#"namespace: billing
id: invoice-dispatch
name: Invoice Dispatch
steps:
  type: LogTask
  message: "hi"
"#
        .to_string()
    }

    #[test]
    fn parse_revision_permits_missing_timestamps_when_not_strict() {
        let registry = StepRegistry::with_builtins();
        let revision = parse_revision(&sample_source(), false, &registry).unwrap();
        assert_eq!(revision.workflow_id.namespace(), "billing");
        assert_eq!(revision.version, 0);
        assert!(!revision.active);
    }

    #[test]
    fn parse_revision_requires_updated_at_when_strict() {
        let registry = StepRegistry::with_builtins();
        let err = parse_revision(&sample_source(), true, &registry).unwrap_err();
        assert!(matches!(err, ParseError::MissingUpdatedAt));
    }

    #[test]
    fn parse_revision_rejects_unknown_step_type() {
        let registry = StepRegistry::with_builtins();
        let source = sample_source().replace("LogTask", "Frobnicate");
        let err = parse_revision(&source, false, &registry).unwrap_err();
        assert!(matches!(
            err,
            ParseError::Step(DecodeError::UnknownStepType { .. })
        ));
    }

    #[test]
    fn update_metadata_preserves_comments_and_unrelated_keys() {
        let source = "namespace: billing\n# a note\nid: invoice-dispatch\nversion: 1\nupdatedAt: 2024-01-01T00:00:00+00:00\n";
        let updated = update_metadata(
            source,
            &MetadataUpdate {
                updated_at: Some(DateTime::parse_from_rfc3339("2024-02-02T00:00:00+00:00").unwrap().with_timezone(&Utc)),
                ..Default::default()
            },
        );
        assert!(updated.contains("# a note"));
        assert!(updated.contains("namespace: billing"));
        assert!(updated.contains("updatedAt: 2024-02-02T00:00:00+00:00"));
        assert!(!updated.contains("2024-01-01T00:00:00+00:00"));
    }

    #[test]
    fn update_metadata_appends_missing_keys() {
        let source = "namespace: billing\nid: invoice-dispatch\nname: N\nsteps:\n  type: LogTask\n  message: hi\n";
        let updated = update_metadata(
            source,
            &MetadataUpdate {
                version: Some(1),
                ..Default::default()
            },
        );
        assert!(updated.contains("version: 1"));
    }

    #[test]
    fn round_trip_law_changes_only_updated_fields() {
        let registry = StepRegistry::with_builtins();
        let source = format!(
            "{}version: 1\ncreatedAt: 2024-01-01T00:00:00+00:00\nupdatedAt: 2024-01-01T00:00:00+00:00\n",
            sample_source()
        );
        let original = parse_revision(&source, true, &registry).unwrap();

        let new_updated_at = DateTime::parse_from_rfc3339("2024-03-03T00:00:00+00:00")
            .unwrap()
            .with_timezone(&Utc);
        let rewritten = update_metadata(
            &source,
            &MetadataUpdate {
                updated_at: Some(new_updated_at),
                ..Default::default()
            },
        );
        let after = parse_revision(&rewritten, true, &registry).unwrap();

        assert_eq!(after.updated_at, new_updated_at);
        assert_eq!(after.workflow_id, original.workflow_id);
        assert_eq!(after.version, original.version);
        assert_eq!(after.name, original.name);
        assert_eq!(after.created_at, original.created_at);
        assert_eq!(after.steps, original.steps);
    }

    #[test]
    fn require_updated_at_extracts_without_full_parse() {
        let source = "namespace: billing\nupdatedAt: 2024-05-05T00:00:00+00:00\n";
        let dt = require_updated_at(source).unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-05-05T00:00:00+00:00");
    }

    #[test]
    fn require_updated_at_errors_when_absent() {
        let source = "namespace: billing\n";
        assert!(matches!(
            require_updated_at(source),
            Err(ParseError::MissingUpdatedAt)
        ));
    }

    #[test]
    fn to_yaml_then_parse_preserves_fields() {
        let registry = StepRegistry::with_builtins();
        let source = format!(
            "{}version: 2\ncreatedAt: 2024-01-01T00:00:00+00:00\nupdatedAt: 2024-01-01T00:00:00+00:00\nactive: true\n",
            sample_source()
        );
        let revision = parse_revision(&source, true, &registry).unwrap();
        let yaml = to_yaml(&revision, &registry).unwrap();
        let reparsed = parse_revision(&yaml, true, &registry).unwrap();
        assert_eq!(reparsed.workflow_id, revision.workflow_id);
        assert_eq!(reparsed.version, revision.version);
        assert_eq!(reparsed.active, revision.active);
        assert_eq!(reparsed.steps, revision.steps);
    }
}
