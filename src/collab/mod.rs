//! Project ownership and sharing between tenant partitions.
//!
//! A shared project lives only in its owner's partition. A collaborator holds a
//! `ShareReference` pointing at the owner, and every access is resolved through it.

use crate::db::Repository;
use crate::errors::AppError;
use crate::models::{
    AccessRole, Collaborator, CreateProjectRequest, Project, ProjectAccess, RepoId, ShareRequest,
};

#[derive(Clone)]
pub struct CollaborationResolver {
    repo: Repository,
}

impl CollaborationResolver {
    pub fn new(repo: Repository) -> Self {
        Self { repo }
    }

    /// Partition that holds `repository` for `tenant_id`.
    pub async fn resolve_owning_partition(
        &self,
        tenant_id: &str,
        repository: &RepoId,
    ) -> Result<String, AppError> {
        Ok(self.resolve_project(tenant_id, repository).await?.project.tenant_id)
    }

    /// The project `tenant_id` reaches for `repository`, with the tenant's role.
    pub async fn resolve_project(
        &self,
        tenant_id: &str,
        repository: &RepoId,
    ) -> Result<ProjectAccess, AppError> {
        let full_name = repository.full_name();

        if let Some(project) = self.repo.get_project(tenant_id, &full_name).await? {
            return Ok(ProjectAccess {
                role: AccessRole::Owner,
                project,
            });
        }

        if let Some(reference) = self.repo.get_share_reference(tenant_id, &full_name).await? {
            let owned = self
                .repo
                .get_project(&reference.owner_tenant_id, &full_name)
                .await?;
            match owned {
                Some(project) if project.has_collaborator(tenant_id) => {
                    return Ok(ProjectAccess {
                        role: AccessRole::Collaborator,
                        project,
                    });
                }
                _ => tracing::warn!(
                    "Share reference of {} for {} no longer resolves to {}",
                    tenant_id,
                    full_name,
                    reference.owner_tenant_id
                ),
            }
        }

        Err(AppError::NotFound(format!("Project {} not found", full_name)))
    }

    /// Register `repository` in the tenant's own partition.
    pub async fn create_project(
        &self,
        tenant_id: &str,
        request: &CreateProjectRequest,
    ) -> Result<Project, AppError> {
        let full_name = request.repository.full_name();

        if let Some(reference) = self.repo.get_share_reference(tenant_id, &full_name).await? {
            return Err(AppError::Conflict(format!(
                "{} is already shared with you by {}",
                full_name, reference.owner_tenant_id
            )));
        }

        let project = self
            .repo
            .create_project(tenant_id, &full_name, request.deployment.as_ref())
            .await?;
        tracing::info!("Tenant {} registered project {}", tenant_id, full_name);
        Ok(project)
    }

    /// Own projects followed by shared ones.
    pub async fn list_accessible_projects(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<ProjectAccess>, AppError> {
        let mut projects: Vec<ProjectAccess> = self
            .repo
            .list_projects(tenant_id)
            .await?
            .into_iter()
            .map(|project| ProjectAccess {
                role: AccessRole::Owner,
                project,
            })
            .collect();

        for reference in self.repo.list_share_references(tenant_id).await? {
            match self
                .repo
                .get_project(&reference.owner_tenant_id, &reference.repository)
                .await?
            {
                Some(project) if project.has_collaborator(tenant_id) => {
                    projects.push(ProjectAccess {
                        role: AccessRole::Collaborator,
                        project,
                    })
                }
                _ => tracing::warn!(
                    "Skipping dangling share reference of {} for {}",
                    tenant_id,
                    reference.repository
                ),
            }
        }

        Ok(projects)
    }

    /// Grant `request.tenant_id` access to a project the caller owns.
    pub async fn share(
        &self,
        owner_tenant_id: &str,
        repository: &RepoId,
        request: ShareRequest,
    ) -> Result<Project, AppError> {
        let full_name = repository.full_name();
        self.require_owner(owner_tenant_id, repository).await?;

        let target = request.tenant_id.trim();
        if target.is_empty() {
            return Err(AppError::Validation("Collaborator tenant id is required".to_string()));
        }
        if target == owner_tenant_id {
            return Err(AppError::Validation(
                "A project cannot be shared with its owner".to_string(),
            ));
        }
        if self.repo.get_project(target, &full_name).await?.is_some() {
            return Err(AppError::Conflict(format!(
                "{} already owns a project for {}",
                target, full_name
            )));
        }

        let collaborator = Collaborator {
            tenant_id: target.to_string(),
            display_name: request.display_name,
            email: request.email,
            added_at: String::new(),
        };
        let project = self
            .repo
            .add_collaborator(owner_tenant_id, &full_name, collaborator)
            .await?;

        tracing::info!("Shared {} from {} with {}", full_name, owner_tenant_id, target);
        Ok(project)
    }

    /// Revoke a collaborator's access.
    pub async fn unshare(
        &self,
        owner_tenant_id: &str,
        repository: &RepoId,
        target_tenant_id: &str,
    ) -> Result<Project, AppError> {
        let full_name = repository.full_name();
        self.require_owner(owner_tenant_id, repository).await?;

        let project = self
            .repo
            .remove_collaborator(owner_tenant_id, &full_name, target_tenant_id)
            .await?;

        tracing::info!(
            "Unshared {} from {} with {}",
            full_name,
            owner_tenant_id,
            target_tenant_id
        );
        Ok(project)
    }

    async fn require_owner(&self, tenant_id: &str, repository: &RepoId) -> Result<(), AppError> {
        match self.resolve_project(tenant_id, repository).await?.role {
            AccessRole::Owner => Ok(()),
            AccessRole::Collaborator => Err(AppError::PermissionDenied(format!(
                "Only the owner can change who has access to {}",
                repository
            ))),
        }
    }
}
