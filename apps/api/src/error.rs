//! Maps `WorkflowError`, the use-case layer's taxonomy, onto HTTP status and
//! an RFC 7807 Problem+JSON body. No business logic lives here: every
//! variant below corresponds 1:1 to a row in the error taxonomy table.

use axum::response::{IntoResponse, Response};
use conductor_engine::WorkflowError;
use http::StatusCode;
use problem_details::ProblemDetails;

/// The one error type every handler in this crate returns. Wraps
/// `WorkflowError` plus the handful of adapter-level failures (bad path
/// segments, malformed query strings) that never reach the use-case layer.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Workflow(#[from] WorkflowError),
    #[error("invalid path parameter: {0}")]
    BadPath(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            Self::BadPath(_) => StatusCode::BAD_REQUEST,
            Self::Workflow(e) => match e {
                WorkflowError::InvalidRevision(_)
                | WorkflowError::InvalidYaml(_)
                | WorkflowError::UnknownStepType(_)
                | WorkflowError::InvalidHeader(_) => StatusCode::BAD_REQUEST,
                WorkflowError::NotFound(_) | WorkflowError::ExecutionNotFound(_) => {
                    StatusCode::NOT_FOUND
                }
                WorkflowError::AlreadyExists(_)
                | WorkflowError::ActiveConflict(_)
                | WorkflowError::OptimisticLock { .. } => StatusCode::CONFLICT,
                WorkflowError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }

    fn title(&self) -> &'static str {
        match self {
            Self::BadPath(_) => "invalid-path",
            Self::Workflow(e) => match e {
                WorkflowError::InvalidRevision(_) => "invalid-revision",
                WorkflowError::InvalidYaml(_) => "invalid-yaml",
                WorkflowError::UnknownStepType(_) => "unknown-step-type",
                WorkflowError::InvalidHeader(_) => "invalid-header",
                WorkflowError::NotFound(_) => "not-found",
                WorkflowError::AlreadyExists(_) => "already-exists",
                WorkflowError::ActiveConflict(_) => "active-conflict",
                WorkflowError::OptimisticLock { .. } => "optimistic-lock",
                WorkflowError::ExecutionNotFound(_) => "execution-not-found",
                WorkflowError::Internal(_) => "internal-error",
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal error reached the API boundary");
        }
        let problem = ProblemDetails::new()
            .with_type(format!("https://conductor.dev/problems/{}", self.title()))
            .with_title(self.title())
            .with_status(status)
            .with_detail(self.to_string());
        (status, problem).into_response()
    }
}
