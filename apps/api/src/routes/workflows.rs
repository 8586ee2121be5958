//! The thin HTTP adapter over `WorkflowService`: translates the illustrative
//! HTTP surface into use-case calls and back, with no business logic of its
//! own. Workflow definitions travel as YAML; listings and history travel as
//! JSON, per the content-type split the table specifies.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::{header, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use conductor_domain::WorkflowId;
use conductor_engine::WorkflowService;
use conductor_store::Pagination;
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::error::ApiError;

pub struct AppState {
    pub service: Arc<WorkflowService>,
}

fn yaml_response(status: StatusCode, body: String) -> Response {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/yaml"),
    );
    (status, headers, body).into_response()
}

fn workflow_id(ns: &str, id: &str) -> Result<WorkflowId, ApiError> {
    WorkflowId::new(ns, id).map_err(|e| ApiError::BadPath(e.to_string()))
}

fn paginated(limit: Option<i64>, offset: Option<i64>) -> Pagination {
    Pagination {
        limit: limit.unwrap_or(20).clamp(1, 100),
        offset: offset.unwrap_or(0).max(0),
        sort_by: None,
        sort_order: Default::default(),
    }
}

/// `POST /api/workflows` — create a workflow's first revision.
#[utoipa::path(
    post,
    path = "/workflows",
    tag = "workflows",
    request_body(content = String, description = "YAML workflow source", content_type = "application/yaml"),
    responses(
        (status = 201, description = "Created, Location header points at the new revision"),
        (status = 400, description = "Invalid YAML or revision"),
        (status = 409, description = "Workflow already exists")
    )
)]
pub async fn create_workflow(
    State(state): State<Arc<AppState>>,
    source: String,
) -> Result<Response, ApiError> {
    let created = state.service.create_workflow(&source).await?;
    let location = format!(
        "/api/workflows/{}/{}",
        created.revision.workflow_id, created.revision.version
    );
    let mut response = yaml_response(StatusCode::CREATED, created.source);
    response.headers_mut().insert(
        header::LOCATION,
        HeaderValue::from_str(&location).map_err(|e| ApiError::BadPath(e.to_string()))?,
    );
    Ok(response)
}

/// `POST /api/workflows/{ns}/{id}` — create a new revision.
#[utoipa::path(
    post,
    path = "/workflows/{ns}/{id}",
    tag = "workflows",
    params(("ns" = String, Path), ("id" = String, Path)),
    request_body(content = String, description = "YAML workflow source", content_type = "application/yaml"),
    responses(
        (status = 201, description = "Created, Location header points at the new revision"),
        (status = 404, description = "Workflow does not exist yet")
    )
)]
pub async fn create_revision(
    State(state): State<Arc<AppState>>,
    Path((ns, id)): Path<(String, String)>,
    source: String,
) -> Result<Response, ApiError> {
    let workflow_id = workflow_id(&ns, &id)?;
    let created = state.service.create_revision(&workflow_id, &source).await?;
    let location = format!("/api/workflows/{workflow_id}/{}", created.revision.version);
    let mut response = yaml_response(StatusCode::CREATED, created.source);
    response.headers_mut().insert(
        header::LOCATION,
        HeaderValue::from_str(&location).map_err(|e| ApiError::BadPath(e.to_string()))?,
    );
    Ok(response)
}

#[derive(Debug, Serialize, ToSchema)]
pub struct WorkflowRef {
    pub namespace: String,
    pub id: String,
}

/// `GET /api/workflows/{ns}` — every workflow known in a namespace.
#[utoipa::path(
    get,
    path = "/workflows/{ns}",
    tag = "workflows",
    params(("ns" = String, Path)),
    responses((status = 200, description = "Workflows in the namespace", body = [WorkflowRef]))
)]
pub async fn list_namespace(
    State(state): State<Arc<AppState>>,
    Path(ns): Path<String>,
) -> Result<Json<Vec<WorkflowRef>>, ApiError> {
    let page = state
        .service
        .list_workflows(Some(&ns), &Pagination::with_limit(100))
        .await?;
    Ok(Json(
        page.items
            .into_iter()
            .map(|s| WorkflowRef {
                namespace: s.workflow_id.namespace().to_string(),
                id: s.workflow_id.id().to_string(),
            })
            .collect(),
    ))
}

#[derive(Debug, Deserialize)]
pub struct ActiveFilter {
    pub active: Option<bool>,
}

/// `GET /api/workflows/{ns}/{id}?active=` — revision descriptors for one
/// workflow, optionally filtered to only active (or only inactive) rows.
#[utoipa::path(
    get,
    path = "/workflows/{ns}/{id}",
    tag = "workflows",
    params(("ns" = String, Path), ("id" = String, Path), ("active" = Option<bool>, Query)),
    responses(
        (status = 200, description = "YAML list of revision descriptors"),
        (status = 404, description = "No revisions found")
    )
)]
pub async fn list_revisions(
    State(state): State<Arc<AppState>>,
    Path((ns, id)): Path<(String, String)>,
    Query(filter): Query<ActiveFilter>,
) -> Result<Response, ApiError> {
    let workflow_id = workflow_id(&ns, &id)?;
    let page = state
        .service
        .list_revisions(&workflow_id, &Pagination::with_limit(100))
        .await?;
    let revisions: Vec<_> = page
        .items
        .into_iter()
        .filter(|r| filter.active.is_none_or(|want| r.active == want))
        .collect();
    if revisions.is_empty() {
        return Err(ApiError::Workflow(conductor_engine::WorkflowError::NotFound(
            workflow_id.to_string(),
        )));
    }
    let yaml = serde_yml::to_string(&revisions).map_err(|e| ApiError::BadPath(e.to_string()))?;
    Ok(yaml_response(StatusCode::OK, yaml))
}

/// `GET /api/workflows/{ns}/{id}/{v}` — one revision's canonical source.
#[utoipa::path(
    get,
    path = "/workflows/{ns}/{id}/{v}",
    tag = "workflows",
    params(("ns" = String, Path), ("id" = String, Path), ("v" = u32, Path)),
    responses(
        (status = 200, description = "YAML source"),
        (status = 404, description = "Revision not found")
    )
)]
pub async fn get_revision(
    State(state): State<Arc<AppState>>,
    Path((ns, id, version)): Path<(String, String, u32)>,
) -> Result<Response, ApiError> {
    let revision_id = workflow_id(&ns, &id)?.revision(version);
    let found = state.service.get_revision(&revision_id).await?;
    Ok(yaml_response(StatusCode::OK, found.source))
}

/// `PUT /api/workflows/{ns}/{id}/{v}` — update an inactive revision. The
/// body's `updatedAt` carries the optimistic lock token.
#[utoipa::path(
    put,
    path = "/workflows/{ns}/{id}/{v}",
    tag = "workflows",
    params(("ns" = String, Path), ("id" = String, Path), ("v" = u32, Path)),
    request_body(content = String, description = "YAML workflow source, must include updatedAt", content_type = "application/yaml"),
    responses(
        (status = 200, description = "YAML source"),
        (status = 409, description = "Active revision or stale optimistic lock")
    )
)]
pub async fn update_revision(
    State(state): State<Arc<AppState>>,
    Path((ns, id, version)): Path<(String, String, u32)>,
    source: String,
) -> Result<Response, ApiError> {
    let revision_id = workflow_id(&ns, &id)?.revision(version);
    let updated = state.service.update_revision(&revision_id, &source).await?;
    Ok(yaml_response(StatusCode::OK, updated.source))
}

/// `DELETE /api/workflows/{ns}/{id}/{v}` — delete a single inactive revision.
#[utoipa::path(
    delete,
    path = "/workflows/{ns}/{id}/{v}",
    tag = "workflows",
    params(("ns" = String, Path), ("id" = String, Path), ("v" = u32, Path)),
    responses((status = 204, description = "Deleted"), (status = 409, description = "Revision is active"))
)]
pub async fn delete_revision(
    State(state): State<Arc<AppState>>,
    Path((ns, id, version)): Path<(String, String, u32)>,
) -> Result<StatusCode, ApiError> {
    let revision_id = workflow_id(&ns, &id)?.revision(version);
    state.service.delete_revision(&revision_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `DELETE /api/workflows/{ns}/{id}` — delete every revision of a workflow.
#[utoipa::path(
    delete,
    path = "/workflows/{ns}/{id}",
    tag = "workflows",
    params(("ns" = String, Path), ("id" = String, Path)),
    responses((status = 204, description = "Deleted"))
)]
pub async fn delete_workflow(
    State(state): State<Arc<AppState>>,
    Path((ns, id)): Path<(String, String)>,
) -> Result<StatusCode, ApiError> {
    let workflow_id = workflow_id(&ns, &id)?;
    state.service.delete_workflow(&workflow_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

fn require_updated_at_header(headers: &HeaderMap) -> Result<String, ApiError> {
    headers
        .get("X-Current-Updated-At")
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
        .ok_or_else(|| {
            ApiError::Workflow(conductor_engine::WorkflowError::InvalidHeader(
                "X-Current-Updated-At is required".to_string(),
            ))
        })
}

/// `POST /api/workflows/{ns}/{id}/{v}/activate`
#[utoipa::path(
    post,
    path = "/workflows/{ns}/{id}/{v}/activate",
    tag = "workflows",
    params(("ns" = String, Path), ("id" = String, Path), ("v" = u32, Path)),
    responses(
        (status = 200, description = "YAML source"),
        (status = 400, description = "Missing or malformed X-Current-Updated-At"),
        (status = 409, description = "Stale optimistic lock")
    )
)]
pub async fn activate_revision(
    State(state): State<Arc<AppState>>,
    Path((ns, id, version)): Path<(String, String, u32)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let header_value = require_updated_at_header(&headers)?;
    let revision_id = workflow_id(&ns, &id)?.revision(version);
    let activated = state
        .service
        .activate_revision(&revision_id, &header_value)
        .await?;
    Ok(yaml_response(StatusCode::OK, activated.source))
}

/// `POST /api/workflows/{ns}/{id}/{v}/deactivate`
#[utoipa::path(
    post,
    path = "/workflows/{ns}/{id}/{v}/deactivate",
    tag = "workflows",
    params(("ns" = String, Path), ("id" = String, Path), ("v" = u32, Path)),
    responses(
        (status = 200, description = "YAML source"),
        (status = 400, description = "Missing or malformed X-Current-Updated-At"),
        (status = 409, description = "Stale optimistic lock")
    )
)]
pub async fn deactivate_revision(
    State(state): State<Arc<AppState>>,
    Path((ns, id, version)): Path<(String, String, u32)>,
    headers: HeaderMap,
) -> Result<Response, ApiError> {
    let header_value = require_updated_at_header(&headers)?;
    let revision_id = workflow_id(&ns, &id)?.revision(version);
    let deactivated = state
        .service
        .deactivate_revision(&revision_id, &header_value)
        .await?;
    Ok(yaml_response(StatusCode::OK, deactivated.source))
}

#[derive(Debug, Deserialize)]
pub struct ExecutionHistoryQuery {
    pub version: Option<u32>,
    pub status: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ExecutionHistoryResponse {
    pub executions: Vec<conductor_domain::WorkflowExecution>,
    pub pagination: ExecutionHistoryPagination,
    pub links: ExecutionHistoryLinks,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ExecutionHistoryPagination {
    pub total: i64,
    pub limit: i64,
    pub offset: i64,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct ExecutionHistoryLinks {
    pub next: Option<String>,
}

/// `GET /api/workflows/{ns}/{id}/executions` — paginated execution history.
/// `version`/`status` are applied as a post-filter over the store's
/// returned page rather than pushed into the query, since the Execution
/// Store's contract does not expose those as indexed predicates.
#[utoipa::path(
    get,
    path = "/workflows/{ns}/{id}/executions",
    tag = "workflows",
    params(
        ("ns" = String, Path), ("id" = String, Path),
        ("version" = Option<u32>, Query), ("status" = Option<String>, Query),
        ("limit" = Option<i64>, Query), ("offset" = Option<i64>, Query)
    ),
    responses(
        (status = 200, description = "Execution history", body = ExecutionHistoryResponse),
        (status = 404, description = "Workflow not found")
    )
)]
pub async fn execution_history(
    State(state): State<Arc<AppState>>,
    Path((ns, id)): Path<(String, String)>,
    Query(query): Query<ExecutionHistoryQuery>,
) -> Result<Json<ExecutionHistoryResponse>, ApiError> {
    let workflow_id = workflow_id(&ns, &id)?;
    let pagination = paginated(query.limit, query.offset);
    let page = state
        .service
        .execution_history(&workflow_id, &pagination)
        .await?;

    let next = page
        .next_offset()
        .map(|offset| format!("/api/workflows/{workflow_id}/executions?limit={}&offset={offset}", page.limit));

    let executions: Vec<_> = page
        .items
        .into_iter()
        .filter(|e| query.version.is_none_or(|v| e.version == v))
        .filter(|e| {
            query
                .status
                .as_deref()
                .is_none_or(|s| format!("{:?}", e.status).eq_ignore_ascii_case(s))
        })
        .collect();

    Ok(Json(ExecutionHistoryResponse {
        executions,
        pagination: ExecutionHistoryPagination {
            total: page.total,
            limit: page.limit,
            offset: page.offset,
        },
        links: ExecutionHistoryLinks { next },
    }))
}

pub fn routes() -> axum::Router<Arc<AppState>> {
    use axum::routing::{get, post};

    axum::Router::new()
        .route("/", post(create_workflow))
        .route(
            "/{ns}/{id}",
            post(create_revision).get(list_revisions).delete(delete_workflow),
        )
        .route("/{ns}", get(list_namespace))
        .route(
            "/{ns}/{id}/{v}",
            get(get_revision).put(update_revision).delete(delete_revision),
        )
        .route("/{ns}/{id}/{v}/activate", post(activate_revision))
        .route("/{ns}/{id}/{v}/deactivate", post(deactivate_revision))
        .route("/{ns}/{id}/executions", get(execution_history))
}
