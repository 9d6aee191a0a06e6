//! Tenant settings endpoints.

use axum::{extract::State, Json};

use super::{success, ApiResult};
use crate::auth::RequestContext;
use crate::models::{Settings, UpdateSettingsRequest};
use crate::AppState;

/// GET /api/settings - Get the caller's settings.
pub async fn get_settings(
    State(state): State<AppState>,
    ctx: RequestContext,
) -> ApiResult<Settings> {
    success(state.repo.get_settings(&ctx.tenant_id).await?)
}

/// PUT /api/settings - Replace the caller's settings.
pub async fn put_settings(
    State(state): State<AppState>,
    ctx: RequestContext,
    Json(request): Json<UpdateSettingsRequest>,
) -> ApiResult<Settings> {
    success(
        state
            .repo
            .put_settings(&ctx.tenant_id, &request.values)
            .await?,
    )
}
