//! Project and sharing models.

use serde::{Deserialize, Serialize};

use super::{Metadata, RepoId};

/// A tenant granted access to another tenant's project.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Collaborator {
    pub tenant_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    #[serde(default)]
    pub added_at: String,
}

/// Hosting provider settings for the site built from the repository.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct DeploymentConfig {
    pub provider: String,
    #[serde(default)]
    pub settings: Metadata,
}

/// A repository registered in its owner's partition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Project {
    pub repository: String,
    pub tenant_id: String,
    pub collaborators: Vec<Collaborator>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployment: Option<DeploymentConfig>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_synced_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Project {
    pub fn has_collaborator(&self, tenant_id: &str) -> bool {
        self.collaborators.iter().any(|c| c.tenant_id == tenant_id)
    }
}

/// Pointer stored in a collaborator's partition; resolved by lookup, never copied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareReference {
    pub tenant_id: String,
    pub repository: String,
    pub owner_tenant_id: String,
    pub created_at: String,
    pub updated_at: String,
}

/// How the requesting tenant reaches a project.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum AccessRole {
    Owner,
    Collaborator,
}

/// A project visible to a tenant, with its role.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectAccess {
    pub role: AccessRole,
    pub project: Project,
}

/// Request body for registering a project.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateProjectRequest {
    pub repository: RepoId,
    #[serde(default)]
    pub deployment: Option<DeploymentConfig>,
}

/// Request body for sharing a project.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ShareRequest {
    pub tenant_id: String,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}
