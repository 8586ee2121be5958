//! Conductor Server - main entry point

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::Router;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use conductor_common::{init_tracing, Settings};
use conductor_engine::{StepRegistry, WorkflowService};
use conductor_plugins::{discover_plugins, WasmRuntime, WasmRuntimeConfig};
use conductor_store::{connect, PgExecutionStore, PgRevisionStore};

use conductor_api::{routes, ApiDoc};
use routes::workflows::AppState;

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    dotenvy::dotenv().ok();

    let settings = Settings::load()?;

    let pool = connect(&settings.database_url, 10).await?;
    let revisions = Arc::new(PgRevisionStore::new(pool.clone()));
    let executions = Arc::new(PgExecutionStore::new(pool));

    let mut registry = StepRegistry::with_builtins();
    if let Some(plugin_dir) = &settings.plugin_dir {
        let runtime = WasmRuntime::new(WasmRuntimeConfig::default())?;
        let loaded = discover_plugins(plugin_dir, &runtime, &mut registry)?;
        tracing::info!(loaded, dir = %plugin_dir.display(), "plugin discovery complete");
    }

    let service = Arc::new(WorkflowService::new(revisions, executions, Arc::new(registry)));
    let state = Arc::new(AppState { service });

    let mut openapi = ApiDoc::openapi();
    openapi.paths = routes::openapi_paths();

    let app = Router::new()
        .merge(routes::api_routes(state))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = settings.http_bind_address.parse()?;
    tracing::info!(%addr, "starting conductor server");
    tracing::info!("Swagger UI available at http://{addr}/swagger-ui/");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
