//! REST API module.
//!
//! Handlers resolve the caller's tenant, delegate to the engine components and wrap the result
//! in the `{success, data}` envelope.

mod posts;
mod projects;
mod settings;

pub use posts::*;
pub use projects::*;
pub use settings::*;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::errors::AppError;
use crate::models::RepoId;

/// Success response envelope.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub success: bool,
    pub data: T,
}

impl<T: Serialize> ApiResponse<T> {
    pub fn new(data: T) -> Self {
        Self {
            success: true,
            data,
        }
    }
}

impl<T: Serialize> IntoResponse for ApiResponse<T> {
    fn into_response(self) -> Response {
        (StatusCode::OK, Json(self)).into_response()
    }
}

/// Response type that can be either success or error.
pub type ApiResult<T> = Result<ApiResponse<T>, AppError>;

/// Create a successful API response.
pub fn success<T: Serialize>(data: T) -> ApiResult<T> {
    Ok(ApiResponse::new(data))
}

/// Repository named by the `{owner}/{repo}` path segments.
fn repo_from_path(owner: &str, name: &str) -> Result<RepoId, AppError> {
    RepoId::new(owner, name)
}
