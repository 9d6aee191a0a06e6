//! Post API endpoints.

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::{success, ApiResult};
use crate::auth::RequestContext;
use crate::models::{CreatePostRequest, DeletePostOptions, Post, UpdatePostRequest};
use crate::AppState;

/// POST /api/posts - Create a post, committing it when asked.
pub async fn create_post(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(request): Json<CreatePostRequest>,
) -> ApiResult<Post> {
    success(
        state
            .publisher
            .create(ctx.credential.as_ref(), &ctx.tenant_id, request)
            .await?,
    )
}

/// GET /api/posts/{id} - Get a single post.
pub async fn get_post(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
) -> ApiResult<Post> {
    success(state.publisher.get(&ctx.tenant_id, &id).await?)
}

/// PUT /api/posts/{id} - Edit a post, committing it when asked.
pub async fn update_post(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    Json(request): Json<UpdatePostRequest>,
) -> ApiResult<Post> {
    success(
        state
            .publisher
            .update(ctx.credential.as_ref(), &ctx.tenant_id, &id, request)
            .await?,
    )
}

/// DELETE /api/posts/{id} - Delete a post, optionally from the repository too.
pub async fn delete_post(
    State(state): State<AppState>,
    ctx: RequestContext,
    Path(id): Path<String>,
    Query(options): Query<DeletePostOptions>,
) -> ApiResult<()> {
    state
        .publisher
        .delete(ctx.credential.as_ref(), &ctx.tenant_id, &id, options)
        .await?;
    success(())
}
