//! Write/commit protocol for posts.
//!
//! Edits land in the cache before the remote is contacted, so a failed commit never loses
//! local work. Remote writes are compare-and-swap on the stored version token and are not
//! retried here.

use std::sync::Arc;

use chrono::Utc;

use crate::collab::CollaborationResolver;
use crate::db::Repository;
use crate::errors::AppError;
use crate::frontmatter;
use crate::models::{
    CreatePostRequest, DeletePostOptions, FieldError, Metadata, Post, PostStatus, RepoId,
    UpdatePostRequest,
};
use crate::remote::{CommitIdentity, CommitOptions, ContentStore, Credential, FileWrite};
use crate::schema;

#[derive(Clone)]
pub struct Publisher {
    repo: Repository,
    store: Arc<dyn ContentStore>,
    collab: CollaborationResolver,
}

impl Publisher {
    pub fn new(
        repo: Repository,
        store: Arc<dyn ContentStore>,
        collab: CollaborationResolver,
    ) -> Self {
        Self { repo, store, collab }
    }

    /// Create a post, optionally committing it as a new remote file.
    pub async fn create(
        &self,
        credential: Option<&Credential>,
        tenant_id: &str,
        request: CreatePostRequest,
    ) -> Result<Post, AppError> {
        let path = normalize_path(&request.path)?;
        let partition = self
            .collab
            .resolve_owning_partition(tenant_id, &request.repository)
            .await?;
        let full_name = request.repository.full_name();
        let collection = schema::classify(&path);

        let (metadata, validation_errors) = self
            .validate(&partition, &full_name, &collection, request.metadata)
            .await?;

        // Encode up front so a codec failure cannot strand a draft.
        let content = match request.commit {
            true => Some(frontmatter::encode(&metadata, &request.body)?),
            false => None,
        };
        let credential = match request.commit {
            true => Some(require_credential(credential)?),
            false => None,
        };

        let now = Utc::now().to_rfc3339();
        let post = Post {
            id: uuid::Uuid::new_v4().to_string(),
            tenant_id: partition,
            repository: full_name,
            path,
            collection,
            metadata,
            body: request.body,
            version_token: None,
            status: PostStatus::Draft,
            validation_errors,
            created_at: now.clone(),
            updated_at: now,
            last_commit_at: None,
        };
        self.repo.insert_post(&post).await?;

        let (Some(content), Some(credential)) = (content, credential) else {
            tracing::info!("Created draft {} at {}", post.id, post.path);
            return Ok(post);
        };

        let message = request
            .message
            .unwrap_or_else(|| format!("Create {}", post.path));
        let write = FileWrite {
            path: &post.path,
            content: &content,
            message: &message,
            expected_token: None,
            options: commit_options(request.as_service),
        };

        match self
            .store
            .update_file(credential, &request.repository, write)
            .await
        {
            Ok(receipt) => {
                tracing::info!(
                    "Committed new post {} to {} ({})",
                    post.path,
                    post.repository,
                    receipt.commit_id
                );
                self.record_commit(&post, &receipt.version_token).await
            }
            Err(e) => {
                tracing::warn!("Create of {} in {} failed: {}", post.path, post.repository, e);
                match self.repo.delete_post(&post.id).await {
                    Ok(()) | Err(AppError::NotFound(_)) => Err(e),
                    Err(cleanup) => {
                        tracing::error!(
                            "Failed to remove draft {} after rejected create: {}",
                            post.id,
                            cleanup
                        );
                        Err(AppError::Internal(format!(
                            "Create of {} was rejected ({}) and its draft {} could not be removed: {}",
                            post.path,
                            e.message(),
                            post.id,
                            cleanup.message()
                        )))
                    }
                }
            }
        }
    }

    /// Get a post the tenant can reach.
    pub async fn get(&self, tenant_id: &str, id: &str) -> Result<Post, AppError> {
        let (post, _) = self.load_visible(tenant_id, id).await?;
        Ok(post)
    }

    /// Apply an edit to the cache, then optionally commit it.
    pub async fn update(
        &self,
        credential: Option<&Credential>,
        tenant_id: &str,
        id: &str,
        request: UpdatePostRequest,
    ) -> Result<Post, AppError> {
        let (post, repository) = self.load_visible(tenant_id, id).await?;
        let credential = match request.commit {
            true => Some(require_credential(credential)?),
            false => None,
        };

        let metadata = request.metadata.unwrap_or(post.metadata);
        let body = request.body.unwrap_or(post.body);
        let (metadata, validation_errors) = self
            .validate(&post.tenant_id, &post.repository, &post.collection, metadata)
            .await?;

        let edited = self
            .repo
            .save_local_edit(&post.id, &metadata, &body, validation_errors.as_deref())
            .await?;

        let Some(credential) = credential else {
            tracing::debug!("Saved local edit of {}", edited.path);
            return Ok(edited);
        };

        let content = frontmatter::encode(&edited.metadata, &edited.body)?;
        let message = request.message.unwrap_or_else(|| {
            if edited.version_token.is_some() {
                format!("Update {}", edited.path)
            } else {
                format!("Create {}", edited.path)
            }
        });
        let write = FileWrite {
            path: &edited.path,
            content: &content,
            message: &message,
            expected_token: edited.version_token.as_deref(),
            options: commit_options(request.as_service),
        };

        match self.store.update_file(credential, &repository, write).await {
            Ok(receipt) => {
                tracing::info!(
                    "Committed {} to {} ({})",
                    edited.path,
                    edited.repository,
                    receipt.commit_id
                );
                self.record_commit(&edited, &receipt.version_token).await
            }
            Err(e) => {
                tracing::warn!(
                    "Commit of {} in {} failed, local edit kept: {}",
                    edited.path,
                    edited.repository,
                    e
                );
                Err(e)
            }
        }
    }

    /// Delete a post from the cache, and from the remote when asked.
    pub async fn delete(
        &self,
        credential: Option<&Credential>,
        tenant_id: &str,
        id: &str,
        options: DeletePostOptions,
    ) -> Result<(), AppError> {
        let (post, repository) = self.load_visible(tenant_id, id).await?;

        if options.remove_from_remote {
            let token = post.version_token.as_deref().ok_or_else(|| {
                AppError::Validation(format!(
                    "{} was never committed and cannot be removed from the repository",
                    post.path
                ))
            })?;
            let credential = require_credential(credential)?;

            let message = options
                .message
                .unwrap_or_else(|| format!("Delete {}", post.path));
            self.store
                .delete_file(credential, &repository, &post.path, token, &message)
                .await
                .inspect_err(|e| {
                    tracing::warn!("Remote delete of {} in {} failed: {}", post.path, post.repository, e)
                })?;
        }

        self.repo.delete_post(&post.id).await?;
        tracing::info!(
            "Deleted post {} ({}, remote: {})",
            post.id,
            post.path,
            options.remove_from_remote
        );
        Ok(())
    }

    /// Store the receipt of a commit of `sent`, which only counts as synced if nothing newer
    /// was saved while it was in flight.
    async fn record_commit(&self, sent: &Post, version_token: &str) -> Result<Post, AppError> {
        let post = self
            .repo
            .mark_committed(&sent.id, version_token, &sent.updated_at)
            .await?;
        if post.status != PostStatus::Synced {
            tracing::warn!(
                "{} changed while its commit was in flight; keeping it modified",
                post.path
            );
        }
        Ok(post)
    }

    /// Load a post and check the tenant resolves to its partition.
    async fn load_visible(&self, tenant_id: &str, id: &str) -> Result<(Post, RepoId), AppError> {
        let not_found = || AppError::NotFound(format!("Post {} not found", id));

        let post = self.repo.get_post(id).await?.ok_or_else(not_found)?;
        let repository = RepoId::parse(&post.repository)?;

        match self
            .collab
            .resolve_owning_partition(tenant_id, &repository)
            .await
        {
            Ok(partition) if partition == post.tenant_id => Ok((post, repository)),
            Ok(_) | Err(AppError::NotFound(_)) => Err(not_found()),
            Err(e) => Err(e),
        }
    }

    async fn validate(
        &self,
        partition: &str,
        repository: &str,
        collection: &str,
        metadata: Metadata,
    ) -> Result<(Metadata, Option<Vec<FieldError>>), AppError> {
        let Some(definition) = self
            .repo
            .get_schema(partition, repository, collection)
            .await?
        else {
            return Ok((metadata, None));
        };

        let outcome = schema::validate(&metadata, &definition);
        if outcome.valid {
            Ok((outcome.data, None))
        } else {
            Ok((outcome.data, Some(outcome.errors)))
        }
    }
}

fn commit_options(as_service: bool) -> CommitOptions {
    CommitOptions {
        identity: if as_service {
            CommitIdentity::Service
        } else {
            CommitIdentity::User
        },
        branch: None,
    }
}

fn require_credential(credential: Option<&Credential>) -> Result<&Credential, AppError> {
    credential.ok_or_else(|| {
        AppError::Unauthorized("A remote token is required to commit changes".to_string())
    })
}

fn normalize_path(path: &str) -> Result<String, AppError> {
    let path = path.trim().trim_start_matches('/');
    if path.is_empty() || path.ends_with('/') {
        return Err(AppError::Validation(format!("Invalid document path: {:?}", path)));
    }
    if path.split('/').any(|s| s.is_empty() || s == "." || s == "..") {
        return Err(AppError::Validation(format!("Invalid document path: {:?}", path)));
    }
    Ok(path.to_string())
}
