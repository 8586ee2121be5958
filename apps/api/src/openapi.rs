//! OpenAPI specification generation
//!
//! Configures the OpenAPI document for the Conductor API.

use utoipa::OpenApi;

/// API documentation configuration
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Conductor API",
        version = "1.0.0",
        description = "Workflow revision store and execution engine API.",
        license(
            name = "MIT",
            url = "https://opensource.org/licenses/MIT"
        )
    ),
    servers(
        (url = "/api", description = "API")
    ),
    tags(
        (name = "workflows", description = "Workflow revision management and execution history")
    )
)]
pub struct ApiDoc;
