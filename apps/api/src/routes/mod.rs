//! API route definitions

pub mod workflows;

use std::sync::Arc;

use axum::Router;

use workflows::AppState;

/// Build the API router with all routes, mounted under `/api`.
pub fn api_routes(state: Arc<AppState>) -> Router {
    Router::new()
        .nest("/api/workflows", workflows::routes())
        .with_state(state)
}

/// Get all route paths for OpenAPI documentation
pub fn openapi_paths() -> utoipa::openapi::Paths {
    use utoipa::OpenApi;

    #[derive(OpenApi)]
    #[openapi(paths(
        workflows::create_workflow,
        workflows::create_revision,
        workflows::list_namespace,
        workflows::list_revisions,
        workflows::get_revision,
        workflows::update_revision,
        workflows::delete_revision,
        workflows::delete_workflow,
        workflows::activate_revision,
        workflows::deactivate_revision,
        workflows::execution_history,
    ))]
    struct WorkflowPaths;

    WorkflowPaths::openapi().paths
}
