//! Project API endpoints: registration, sharing, sync and cached listings.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::{repo_from_path, success, ApiResult};
use crate::auth::RequestContext;
use crate::errors::AppError;
use crate::models::{
    CreateProjectRequest, DeleteSummary, ListPostsQuery, PathsRequest, Post, Project,
    ProjectAccess, SchemaDefinition, ShareRequest, SyncSummary,
};
use crate::AppState;

/// Upper bound on paths accepted by one sync or deletion request.
const MAX_PATHS_PER_REQUEST: usize = 1000;

/// GET /api/projects - List own and shared projects.
pub async fn list_projects(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> ApiResult<Vec<ProjectAccess>> {
    success(state.collab.list_accessible_projects(&ctx.tenant_id).await?)
}

/// POST /api/projects - Register a repository as a project.
pub async fn create_project(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(request): Json<CreateProjectRequest>,
) -> ApiResult<Project> {
    success(state.collab.create_project(&ctx.tenant_id, &request).await?)
}

/// GET /api/projects/{owner}/{repo} - Get a project with the caller's role.
pub async fn get_project(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((owner, name)): Path<(String, String)>,
) -> ApiResult<ProjectAccess> {
    let repository = repo_from_path(&owner, &name)?;
    success(state.collab.resolve_project(&ctx.tenant_id, &repository).await?)
}

/// POST /api/projects/{owner}/{repo}/sync - Pull files from the remote store.
pub async fn sync_project(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((owner, name)): Path<(String, String)>,
    Json(request): Json<PathsRequest>,
) -> ApiResult<SyncSummary> {
    let repository = repo_from_path(&owner, &name)?;
    check_paths(&request.paths)?;
    let credential = ctx.require_credential()?;
    let partition = state
        .collab
        .resolve_owning_partition(&ctx.tenant_id, &repository)
        .await?;

    success(
        state
            .sync
            .sync_files(credential, &partition, &repository, &request.paths)
            .await?,
    )
}

/// POST /api/projects/{owner}/{repo}/deletions - Drop cache entries of removed files.
pub async fn delete_project_files(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((owner, name)): Path<(String, String)>,
    Json(request): Json<PathsRequest>,
) -> ApiResult<DeleteSummary> {
    let repository = repo_from_path(&owner, &name)?;
    check_paths(&request.paths)?;
    let partition = state
        .collab
        .resolve_owning_partition(&ctx.tenant_id, &repository)
        .await?;

    success(
        state
            .sync
            .delete_files(&partition, &repository, &request.paths)
            .await?,
    )
}

/// GET /api/projects/{owner}/{repo}/posts - List cached posts.
pub async fn list_project_posts(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((owner, name)): Path<(String, String)>,
    Query(query): Query<ListPostsQuery>,
) -> ApiResult<Vec<Post>> {
    let repository = repo_from_path(&owner, &name)?;
    let partition = state
        .collab
        .resolve_owning_partition(&ctx.tenant_id, &repository)
        .await?;

    success(
        state
            .repo
            .list_posts(&partition, &repository.full_name(), query.collection.as_deref())
            .await?,
    )
}

/// GET /api/projects/{owner}/{repo}/schemas - List schemas cached by the last sync.
pub async fn list_project_schemas(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((owner, name)): Path<(String, String)>,
) -> ApiResult<Vec<SchemaDefinition>> {
    let repository = repo_from_path(&owner, &name)?;
    let partition = state
        .collab
        .resolve_owning_partition(&ctx.tenant_id, &repository)
        .await?;

    success(
        state
            .repo
            .list_schemas(&partition, &repository.full_name())
            .await?,
    )
}

/// POST /api/projects/{owner}/{repo}/collaborators - Share a project.
pub async fn add_collaborator(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((owner, name)): Path<(String, String)>,
    Json(request): Json<ShareRequest>,
) -> ApiResult<Project> {
    let repository = repo_from_path(&owner, &name)?;
    success(state.collab.share(&ctx.tenant_id, &repository, request).await?)
}

/// DELETE /api/projects/{owner}/{repo}/collaborators/{tenant} - Revoke access.
pub async fn remove_collaborator(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path((owner, name, tenant)): Path<(String, String, String)>,
) -> ApiResult<Project> {
    let repository = repo_from_path(&owner, &name)?;
    success(
        state
            .collab
            .unshare(&ctx.tenant_id, &repository, &tenant)
            .await?,
    )
}

fn check_paths(paths: &[String]) -> Result<(), AppError> {
    if paths.is_empty() {
        return Err(AppError::Validation("No paths provided".to_string()));
    }
    if paths.len() > MAX_PATHS_PER_REQUEST {
        return Err(AppError::Validation(format!(
            "At most {} paths per request",
            MAX_PATHS_PER_REQUEST
        )));
    }
    Ok(())
}
