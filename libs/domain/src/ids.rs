//! Identifiers for workflows, revisions and executions.
//!
//! `WorkflowId`/`WorkflowRevisionId` are not opaque tokens: a workflow is
//! addressed by an operator-chosen `(namespace, id)` pair, and a revision by
//! that pair plus an integer version. `ExecutionId` is the one identifier
//! this system mints itself, so it follows the prefixed-random-token shape
//! (`exec_<random>`) used consistently across every minted entity.

use rand::Rng;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt::{self, Display};
use std::str::FromStr;
use thiserror::Error;

/// Characters allowed in a namespace or workflow identifier segment.
fn is_valid_segment_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_' || c == '-'
}

fn validate_segment(s: &str, field: &'static str) -> Result<(), IdParseError> {
    if s.is_empty() || s.len() > 100 {
        return Err(IdParseError::InvalidLength {
            field,
            len: s.len(),
        });
    }
    if !s.chars().all(is_valid_segment_char) {
        return Err(IdParseError::InvalidChars { field });
    }
    Ok(())
}

/// Errors that can occur when parsing entity identifiers.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum IdParseError {
    #[error("{field} must be 1-100 characters, got {len}")]
    InvalidLength { field: &'static str, len: usize },
    #[error("{field} may only contain letters, digits, '_' and '-'")]
    InvalidChars { field: &'static str },
    #[error("missing prefix separator '_'")]
    MissingPrefix,
    #[error("wrong prefix: expected '{expected}', got '{got}'")]
    WrongPrefix { expected: &'static str, got: String },
    #[error("missing version")]
    MissingVersion,
    #[error("invalid version: {0}")]
    InvalidVersion(String),
}

/// A workflow's stable address: an operator-chosen namespace plus identifier.
///
/// Both segments are validated against `[A-Za-z0-9_-]`, 1-100 characters, per
/// the revision store's key shape.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkflowId {
    namespace: String,
    id: String,
}

impl WorkflowId {
    pub fn new(namespace: impl Into<String>, id: impl Into<String>) -> Result<Self, IdParseError> {
        let namespace = namespace.into();
        let id = id.into();
        validate_segment(&namespace, "namespace")?;
        validate_segment(&id, "id")?;
        Ok(Self { namespace, id })
    }

    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn revision(&self, version: u32) -> WorkflowRevisionId {
        WorkflowRevisionId {
            workflow_id: self.clone(),
            version,
        }
    }
}

impl Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.namespace, self.id)
    }
}

impl FromStr for WorkflowId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (namespace, id) = s.split_once('/').ok_or(IdParseError::MissingPrefix)?;
        Self::new(namespace, id)
    }
}

impl Serialize for WorkflowId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for WorkflowId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A specific, immutable version of a workflow.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorkflowRevisionId {
    workflow_id: WorkflowId,
    version: u32,
}

impl WorkflowRevisionId {
    #[must_use]
    pub fn new(workflow_id: WorkflowId, version: u32) -> Self {
        Self {
            workflow_id,
            version,
        }
    }

    #[must_use]
    pub fn workflow_id(&self) -> &WorkflowId {
        &self.workflow_id
    }

    #[must_use]
    pub fn version(&self) -> u32 {
        self.version
    }
}

impl Display for WorkflowRevisionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.workflow_id, self.version)
    }
}

impl FromStr for WorkflowRevisionId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, version_str) = s.rsplit_once('/').ok_or(IdParseError::MissingVersion)?;
        let workflow_id: WorkflowId = prefix.parse()?;
        let version = version_str
            .parse()
            .map_err(|_| IdParseError::InvalidVersion(version_str.to_string()))?;
        Ok(Self {
            workflow_id,
            version,
        })
    }
}

/// A minted, opaque identifier for one execution run.
///
/// Unlike `WorkflowId`, this is not operator-chosen: it is generated when an
/// execution is launched, using a random token (via `rand`) rather than a
/// UUID, since executions have no natural time-ordering requirement beyond
/// `startedAt`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ExecutionId(String);

const EXECUTION_ID_PREFIX: &str = "exec";
const EXECUTION_TOKEN_LEN: usize = 21;
const TOKEN_ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";

impl ExecutionId {
    #[must_use]
    pub fn new() -> Self {
        let mut rng = rand::thread_rng();
        let token: String = (0..EXECUTION_TOKEN_LEN)
            .map(|_| {
                let idx = rng.gen_range(0..TOKEN_ALPHABET.len());
                TOKEN_ALPHABET[idx] as char
            })
            .collect();
        Self(format!("{EXECUTION_ID_PREFIX}_{token}"))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for ExecutionId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for ExecutionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ExecutionId {
    type Err = IdParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (prefix, token) = s.split_once('_').ok_or(IdParseError::MissingPrefix)?;
        if prefix != EXECUTION_ID_PREFIX {
            return Err(IdParseError::WrongPrefix {
                expected: EXECUTION_ID_PREFIX,
                got: prefix.to_string(),
            });
        }
        if token.is_empty() || !token.chars().all(|c| c.is_ascii_alphanumeric()) {
            return Err(IdParseError::InvalidChars { field: "token" });
        }
        Ok(Self(s.to_string()))
    }
}

impl Serialize for ExecutionId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ExecutionId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn workflow_id_roundtrip() {
        let id = WorkflowId::new("billing", "invoice-dispatch").unwrap();
        let s = id.to_string();
        let parsed: WorkflowId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn workflow_id_rejects_empty_segment() {
        assert!(matches!(
            WorkflowId::new("", "x"),
            Err(IdParseError::InvalidLength { field: "namespace", .. })
        ));
    }

    #[test]
    fn workflow_id_rejects_invalid_chars() {
        assert!(matches!(
            WorkflowId::new("billing", "invoice dispatch"),
            Err(IdParseError::InvalidChars { field: "id" })
        ));
    }

    #[test]
    fn workflow_id_rejects_too_long_segment() {
        let long = "a".repeat(101);
        assert!(matches!(
            WorkflowId::new(long, "x"),
            Err(IdParseError::InvalidLength { field: "namespace", .. })
        ));
    }

    #[test]
    fn revision_id_roundtrip() {
        let wf = WorkflowId::new("billing", "invoice-dispatch").unwrap();
        let rev = wf.revision(3);
        let s = rev.to_string();
        let parsed: WorkflowRevisionId = s.parse().unwrap();
        assert_eq!(rev, parsed);
        assert_eq!(parsed.version(), 3);
    }

    #[test]
    fn revision_id_rejects_missing_version() {
        assert!(matches!(
            "billing/invoice-dispatch".parse::<WorkflowRevisionId>(),
            Err(IdParseError::MissingVersion)
        ));
    }

    #[test]
    fn execution_id_roundtrip() {
        let id = ExecutionId::new();
        let s = id.to_string();
        assert!(s.starts_with("exec_"));
        let parsed: ExecutionId = s.parse().unwrap();
        assert_eq!(id, parsed);
    }

    #[test]
    fn execution_id_rejects_wrong_prefix() {
        assert!(matches!(
            "wf_abc123".parse::<ExecutionId>(),
            Err(IdParseError::WrongPrefix { expected: "exec", .. })
        ));
    }

    #[test]
    fn execution_ids_are_unique() {
        assert_ne!(ExecutionId::new(), ExecutionId::new());
    }

    #[test]
    fn execution_id_serde_roundtrip() {
        let id = ExecutionId::new();
        let json = serde_json::to_string(&id).unwrap();
        let parsed: ExecutionId = serde_json::from_str(&json).unwrap();
        assert_eq!(id, parsed);
    }
}
