//! Post model: a cached copy of one remote document.

use serde::{Deserialize, Serialize};

use super::{FieldError, Metadata, RepoId};

/// How far the cached copy can be trusted to match the remote file.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PostStatus {
    /// Created locally, never committed
    Draft,
    /// Edited locally since the last successful commit or sync
    Modified,
    /// Matches the remote revision named by the version token
    Synced,
}

impl PostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PostStatus::Draft => "draft",
            PostStatus::Modified => "modified",
            PostStatus::Synced => "synced",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(PostStatus::Draft),
            "modified" => Some(PostStatus::Modified),
            "synced" => Some(PostStatus::Synced),
            _ => None,
        }
    }
}

/// A document cached in a tenant partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Post {
    pub id: String,
    pub tenant_id: String,
    pub repository: String,
    pub path: String,
    pub collection: String,
    pub metadata: Metadata,
    pub body: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub version_token: Option<String>,
    pub status: PostStatus,
    /// Schema problems found on the last write or sync; never blocks persistence
    #[serde(skip_serializing_if = "Option::is_none")]
    pub validation_errors: Option<Vec<FieldError>>,
    pub created_at: String,
    pub updated_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_commit_at: Option<String>,
}

/// Request body for creating a post.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatePostRequest {
    pub repository: RepoId,
    pub path: String,
    #[serde(default)]
    pub metadata: Metadata,
    #[serde(default)]
    pub body: String,
    /// Commit the new file to the remote store immediately
    #[serde(default)]
    pub commit: bool,
    #[serde(default)]
    pub message: Option<String>,
    /// Author the commit with the service identity instead of the caller
    #[serde(default)]
    pub as_service: bool,
}

/// Request body for editing a post.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdatePostRequest {
    #[serde(default)]
    pub metadata: Option<Metadata>,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub commit: bool,
    #[serde(default)]
    pub message: Option<String>,
    /// Author the commit with the service identity instead of the caller
    #[serde(default)]
    pub as_service: bool,
}

/// Query options for deleting a post.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeletePostOptions {
    #[serde(default)]
    pub remove_from_remote: bool,
    #[serde(default)]
    pub message: Option<String>,
}

/// Query parameters for listing posts.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListPostsQuery {
    #[serde(default)]
    pub collection: Option<String>,
}

/// Request body naming repository paths for sync or deletion.
#[derive(Debug, Clone, Deserialize)]
pub struct PathsRequest {
    pub paths: Vec<String>,
}

/// Outcome of a bulk sync.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncSummary {
    pub synced_count: usize,
    pub failures: Vec<SyncFailure>,
}

/// A path that did not complete the sync pipeline.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncFailure {
    pub path: String,
    pub code: String,
    pub reason: String,
    /// Transport failures that may succeed on a later sync
    pub retryable: bool,
}

/// Outcome of a bulk cache deletion.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteSummary {
    pub removed_count: u64,
}
