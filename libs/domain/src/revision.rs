//! Workflow and revision entities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use typeshare::typeshare;

use crate::ids::WorkflowId;
use crate::step::Step;

/// One immutable, versioned snapshot of a workflow's structured definition.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRevision {
    pub workflow_id: WorkflowId,
    pub version: u32,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub steps: Step,
}

impl WorkflowRevision {
    /// Validate the field-level constraints spec'd for revision metadata
    /// (name 1-255 chars, description at most 1000 chars when present).
    pub fn validate_fields(&self) -> Result<(), FieldValidationError> {
        if self.name.is_empty() || self.name.chars().count() > 255 {
            return Err(FieldValidationError::InvalidName(self.name.chars().count()));
        }
        if let Some(desc) = &self.description {
            if desc.chars().count() > 1000 {
                return Err(FieldValidationError::DescriptionTooLong(desc.chars().count()));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum FieldValidationError {
    #[error("name must be 1-255 characters, got {0}")]
    InvalidName(usize),
    #[error("description must be at most 1000 characters, got {0}")]
    DescriptionTooLong(usize),
}

/// A revision bundled with the exact source text it was parsed from, kept in
/// sync with the structured representation at all times.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRevisionWithSource {
    pub revision: WorkflowRevision,
    pub source: String,
}

/// Summary row for listing workflows within a namespace.
///
/// `active_versions` holds every version currently active, version ascending
/// — multi-active is allowed, so this is a list rather than a single
/// `Option<u32>`.
#[typeshare]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub workflow_id: WorkflowId,
    pub active_versions: Vec<u32>,
    pub latest_version: u32,
    pub revision_count: u32,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_revision() -> WorkflowRevision {
        WorkflowRevision {
            workflow_id: WorkflowId::new("billing", "invoice-dispatch").unwrap(),
            version: 1,
            name: "Invoice Dispatch".to_string(),
            description: None,
            active: false,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            steps: Step::leaf("LogTask", json!({"message": "start"})),
        }
    }

    #[test]
    fn validate_fields_accepts_reasonable_name() {
        assert!(sample_revision().validate_fields().is_ok());
    }

    #[test]
    fn validate_fields_rejects_empty_name() {
        let mut rev = sample_revision();
        rev.name = String::new();
        assert_eq!(
            rev.validate_fields(),
            Err(FieldValidationError::InvalidName(0))
        );
    }

    #[test]
    fn validate_fields_rejects_long_description() {
        let mut rev = sample_revision();
        rev.description = Some("x".repeat(1001));
        assert_eq!(
            rev.validate_fields(),
            Err(FieldValidationError::DescriptionTooLong(1001))
        );
    }
}
