//! Cache repository for tenant-partitioned CRUD operations.
//!
//! Every lookup is filtered by tenant. Cross-partition reads are left to callers as explicit
//! second queries. Writes that touch two partitions run in one transaction.

use chrono::Utc;
use sqlx::{QueryBuilder, Row, Sqlite, SqlitePool};

use crate::errors::AppError;
use crate::models::{
    Collaborator, DeploymentConfig, FieldError, Metadata, Post, PostStatus, Project,
    SchemaDefinition, Settings, ShareReference,
};

/// Paths per `DELETE ... IN (...)` statement, well under SQLite's bind limit.
const DELETE_CHUNK: usize = 500;

const POST_COLUMNS: &str = "id, tenant_id, repository, path, collection, metadata, body, \
     version_token, status, validation_errors, created_at, updated_at, last_commit_at";

const PROJECT_COLUMNS: &str =
    "tenant_id, repository, collaborators, deployment, last_synced_at, created_at, updated_at";

/// Fields written when a remote file is pulled into the cache.
#[derive(Debug, Clone)]
pub struct SyncedPost<'a> {
    pub tenant_id: &'a str,
    pub repository: &'a str,
    pub path: &'a str,
    pub collection: &'a str,
    pub metadata: &'a Metadata,
    pub body: &'a str,
    pub version_token: &'a str,
    pub validation_errors: Option<&'a [FieldError]>,
}

/// Database repository for all cache operations.
#[derive(Clone)]
pub struct Repository {
    pool: SqlitePool,
}

impl Repository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    #[cfg(test)]
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ==================== PROJECT OPERATIONS ====================

    /// Register a project in the owner's partition.
    pub async fn create_project(
        &self,
        tenant_id: &str,
        repository: &str,
        deployment: Option<&DeploymentConfig>,
    ) -> Result<Project, AppError> {
        let now = now();
        let deployment_json = deployment.map(serde_json::to_string).transpose()?;

        sqlx::query(
            "INSERT INTO projects (tenant_id, repository, collaborators, deployment, created_at, updated_at) VALUES (?, ?, '[]', ?, ?, ?)",
        )
        .bind(tenant_id)
        .bind(repository)
        .bind(&deployment_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!("Project {} already exists", repository))
            } else {
                e.into()
            }
        })?;

        Ok(Project {
            repository: repository.to_string(),
            tenant_id: tenant_id.to_string(),
            collaborators: Vec::new(),
            deployment: deployment.cloned(),
            last_synced_at: None,
            created_at: now.clone(),
            updated_at: now,
        })
    }

    /// Get a project from one partition.
    pub async fn get_project(
        &self,
        tenant_id: &str,
        repository: &str,
    ) -> Result<Option<Project>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM projects WHERE tenant_id = ? AND repository = ?",
            PROJECT_COLUMNS
        ))
        .bind(tenant_id)
        .bind(repository)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(project_from_row))
    }

    /// List the projects a tenant owns.
    pub async fn list_projects(&self, tenant_id: &str) -> Result<Vec<Project>, AppError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM projects WHERE tenant_id = ? ORDER BY repository",
            PROJECT_COLUMNS
        ))
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(project_from_row).collect())
    }

    /// Record a completed sync. Returns false when the project does not exist.
    pub async fn touch_project_synced(
        &self,
        tenant_id: &str,
        repository: &str,
    ) -> Result<bool, AppError> {
        let now = now();
        let result = sqlx::query(
            "UPDATE projects SET last_synced_at = ?, updated_at = ? WHERE tenant_id = ? AND repository = ?",
        )
        .bind(&now)
        .bind(&now)
        .bind(tenant_id)
        .bind(repository)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    // ==================== SHARING OPERATIONS ====================

    /// Add a collaborator and write their share reference in one transaction.
    pub async fn add_collaborator(
        &self,
        owner_tenant_id: &str,
        repository: &str,
        collaborator: Collaborator,
    ) -> Result<Project, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM projects WHERE tenant_id = ? AND repository = ?",
            PROJECT_COLUMNS
        ))
        .bind(owner_tenant_id)
        .bind(repository)
        .fetch_optional(&mut *tx)
        .await?;
        let mut project = row
            .as_ref()
            .map(project_from_row)
            .ok_or_else(|| AppError::NotFound(format!("Project {} not found", repository)))?;

        let existing_ref = sqlx::query(
            "SELECT owner_tenant_id FROM share_references WHERE tenant_id = ? AND repository = ?",
        )
        .bind(&collaborator.tenant_id)
        .bind(repository)
        .fetch_optional(&mut *tx)
        .await?;
        if let Some(row) = existing_ref {
            let other_owner: String = row.get("owner_tenant_id");
            if other_owner != owner_tenant_id {
                return Err(AppError::Conflict(format!(
                    "{} is already shared with {} by another owner",
                    repository, collaborator.tenant_id
                )));
            }
        }

        let now = now();
        match project
            .collaborators
            .iter_mut()
            .find(|c| c.tenant_id == collaborator.tenant_id)
        {
            Some(existing) => {
                existing.display_name = collaborator.display_name.or(existing.display_name.take());
                existing.email = collaborator.email.or(existing.email.take());
            }
            None => project.collaborators.push(Collaborator {
                added_at: now.clone(),
                ..collaborator.clone()
            }),
        }
        let collaborators_json = serde_json::to_string(&project.collaborators)?;

        sqlx::query(
            "UPDATE projects SET collaborators = ?, updated_at = ? WHERE tenant_id = ? AND repository = ?",
        )
        .bind(&collaborators_json)
        .bind(&now)
        .bind(owner_tenant_id)
        .bind(repository)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            r#"INSERT INTO share_references (tenant_id, repository, owner_tenant_id, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT (tenant_id, repository) DO UPDATE SET
                   owner_tenant_id = excluded.owner_tenant_id,
                   updated_at = excluded.updated_at"#,
        )
        .bind(&collaborator.tenant_id)
        .bind(repository)
        .bind(owner_tenant_id)
        .bind(&now)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        project.updated_at = now;
        Ok(project)
    }

    /// Remove a collaborator and their share reference in one transaction.
    ///
    /// Absent collaborators or references are not an error.
    pub async fn remove_collaborator(
        &self,
        owner_tenant_id: &str,
        repository: &str,
        collaborator_tenant_id: &str,
    ) -> Result<Project, AppError> {
        let mut tx = self.pool.begin().await?;

        let row = sqlx::query(&format!(
            "SELECT {} FROM projects WHERE tenant_id = ? AND repository = ?",
            PROJECT_COLUMNS
        ))
        .bind(owner_tenant_id)
        .bind(repository)
        .fetch_optional(&mut *tx)
        .await?;
        let mut project = row
            .as_ref()
            .map(project_from_row)
            .ok_or_else(|| AppError::NotFound(format!("Project {} not found", repository)))?;

        let now = now();
        project
            .collaborators
            .retain(|c| c.tenant_id != collaborator_tenant_id);
        let collaborators_json = serde_json::to_string(&project.collaborators)?;

        sqlx::query(
            "UPDATE projects SET collaborators = ?, updated_at = ? WHERE tenant_id = ? AND repository = ?",
        )
        .bind(&collaborators_json)
        .bind(&now)
        .bind(owner_tenant_id)
        .bind(repository)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "DELETE FROM share_references WHERE tenant_id = ? AND repository = ? AND owner_tenant_id = ?",
        )
        .bind(collaborator_tenant_id)
        .bind(repository)
        .bind(owner_tenant_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        project.updated_at = now;
        Ok(project)
    }

    /// Get the share reference a tenant holds for a repository.
    pub async fn get_share_reference(
        &self,
        tenant_id: &str,
        repository: &str,
    ) -> Result<Option<ShareReference>, AppError> {
        let row = sqlx::query(
            "SELECT tenant_id, repository, owner_tenant_id, created_at, updated_at FROM share_references WHERE tenant_id = ? AND repository = ?",
        )
        .bind(tenant_id)
        .bind(repository)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(share_reference_from_row))
    }

    /// List every share reference held by a tenant.
    pub async fn list_share_references(
        &self,
        tenant_id: &str,
    ) -> Result<Vec<ShareReference>, AppError> {
        let rows = sqlx::query(
            "SELECT tenant_id, repository, owner_tenant_id, created_at, updated_at FROM share_references WHERE tenant_id = ? ORDER BY repository",
        )
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(share_reference_from_row).collect())
    }

    // ==================== POST OPERATIONS ====================

    /// Insert a new post. A duplicate (tenant, repository, path) is a conflict.
    pub async fn insert_post(&self, post: &Post) -> Result<(), AppError> {
        let metadata_json = serde_json::to_string(&post.metadata)?;
        let errors_json = post
            .validation_errors
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(&format!(
            "INSERT INTO posts ({}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
            POST_COLUMNS
        ))
        .bind(&post.id)
        .bind(&post.tenant_id)
        .bind(&post.repository)
        .bind(&post.path)
        .bind(&post.collection)
        .bind(&metadata_json)
        .bind(&post.body)
        .bind(&post.version_token)
        .bind(post.status.as_str())
        .bind(&errors_json)
        .bind(&post.created_at)
        .bind(&post.updated_at)
        .bind(&post.last_commit_at)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            if is_unique_violation(&e) {
                AppError::Conflict(format!(
                    "A post already exists at {} in {}",
                    post.path, post.repository
                ))
            } else {
                e.into()
            }
        })?;

        Ok(())
    }

    /// Get a post by ID.
    pub async fn get_post(&self, id: &str) -> Result<Option<Post>, AppError> {
        let row = sqlx::query(&format!("SELECT {} FROM posts WHERE id = ?", POST_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(row.as_ref().map(post_from_row))
    }

    /// Get a post by its partition key.
    pub async fn get_post_by_path(
        &self,
        tenant_id: &str,
        repository: &str,
        path: &str,
    ) -> Result<Option<Post>, AppError> {
        let row = sqlx::query(&format!(
            "SELECT {} FROM posts WHERE tenant_id = ? AND repository = ? AND path = ?",
            POST_COLUMNS
        ))
        .bind(tenant_id)
        .bind(repository)
        .bind(path)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(post_from_row))
    }

    /// List posts of a repository, optionally narrowed to one collection.
    pub async fn list_posts(
        &self,
        tenant_id: &str,
        repository: &str,
        collection: Option<&str>,
    ) -> Result<Vec<Post>, AppError> {
        let rows = match collection {
            Some(collection) => {
                sqlx::query(&format!(
                    "SELECT {} FROM posts WHERE tenant_id = ? AND repository = ? AND collection = ? ORDER BY path",
                    POST_COLUMNS
                ))
                .bind(tenant_id)
                .bind(repository)
                .bind(collection)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {} FROM posts WHERE tenant_id = ? AND repository = ? ORDER BY path",
                    POST_COLUMNS
                ))
                .bind(tenant_id)
                .bind(repository)
                .fetch_all(&self.pool)
                .await?
            }
        };

        Ok(rows.iter().map(post_from_row).collect())
    }

    /// Store a local edit. Committed posts become modified; drafts stay drafts.
    pub async fn save_local_edit(
        &self,
        id: &str,
        metadata: &Metadata,
        body: &str,
        validation_errors: Option<&[FieldError]>,
    ) -> Result<Post, AppError> {
        let metadata_json = serde_json::to_string(metadata)?;
        let errors_json = validation_errors.map(serde_json::to_string).transpose()?;

        let result = sqlx::query(
            r#"UPDATE posts SET
                metadata = ?, body = ?, validation_errors = ?, updated_at = ?,
                status = CASE WHEN version_token IS NULL THEN 'draft' ELSE 'modified' END
            WHERE id = ?"#,
        )
        .bind(&metadata_json)
        .bind(body)
        .bind(&errors_json)
        .bind(now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Post {} not found", id)));
        }

        self.get_post(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Post {} not found", id)))
    }

    /// Record a successful commit of the edit saved at `committed_at`.
    ///
    /// The post only becomes `synced` while its `updated_at` still equals `committed_at`. If
    /// another edit landed while the commit was in flight, the new token is stored and the post
    /// stays `modified`, since the cached content is not what the remote received.
    pub async fn mark_committed(
        &self,
        id: &str,
        version_token: &str,
        committed_at: &str,
    ) -> Result<Post, AppError> {
        let now = now();
        let result = sqlx::query(
            r#"UPDATE posts SET
                status = CASE WHEN updated_at = ? THEN 'synced' ELSE 'modified' END,
                version_token = ?, last_commit_at = ?, updated_at = ?
            WHERE id = ?"#,
        )
        .bind(committed_at)
        .bind(version_token)
        .bind(&now)
        .bind(&now)
        .bind(id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Post {} not found", id)));
        }

        self.get_post(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Post {} not found", id)))
    }

    /// Insert or refresh a post from its remote revision. `created_at` is only set on insert.
    pub async fn upsert_synced_post(&self, post: &SyncedPost<'_>) -> Result<(), AppError> {
        let now = now();
        let metadata_json = serde_json::to_string(post.metadata)?;
        let errors_json = post
            .validation_errors
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"INSERT INTO posts (
                id, tenant_id, repository, path, collection, metadata, body,
                version_token, status, validation_errors, created_at, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, 'synced', ?, ?, ?)
            ON CONFLICT (tenant_id, repository, path) DO UPDATE SET
                collection = excluded.collection,
                metadata = excluded.metadata,
                body = excluded.body,
                version_token = excluded.version_token,
                status = 'synced',
                validation_errors = excluded.validation_errors,
                updated_at = excluded.updated_at"#,
        )
        .bind(uuid::Uuid::new_v4().to_string())
        .bind(post.tenant_id)
        .bind(post.repository)
        .bind(post.path)
        .bind(post.collection)
        .bind(&metadata_json)
        .bind(post.body)
        .bind(post.version_token)
        .bind(&errors_json)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Delete a post.
    pub async fn delete_post(&self, id: &str) -> Result<(), AppError> {
        let result = sqlx::query("DELETE FROM posts WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Post {} not found", id)));
        }

        Ok(())
    }

    /// Delete every post of a repository whose path is listed. Returns the number removed.
    pub async fn delete_posts_by_paths(
        &self,
        tenant_id: &str,
        repository: &str,
        paths: &[String],
    ) -> Result<u64, AppError> {
        let mut tx = self.pool.begin().await?;
        let mut removed = 0;

        for chunk in paths.chunks(DELETE_CHUNK) {
            let mut query: QueryBuilder<Sqlite> =
                QueryBuilder::new("DELETE FROM posts WHERE tenant_id = ");
            query
                .push_bind(tenant_id)
                .push(" AND repository = ")
                .push_bind(repository)
                .push(" AND path IN (");
            let mut separated = query.separated(", ");
            for path in chunk {
                separated.push_bind(path);
            }
            separated.push_unseparated(")");

            removed += query.build().execute(&mut *tx).await?.rows_affected();
        }

        tx.commit().await?;
        Ok(removed)
    }

    // ==================== SCHEMA OPERATIONS ====================

    /// Replace the cached schemas of a repository with a fresh discovery.
    pub async fn replace_schemas(
        &self,
        tenant_id: &str,
        repository: &str,
        schemas: &[SchemaDefinition],
    ) -> Result<(), AppError> {
        let now = now();
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM schema_definitions WHERE tenant_id = ? AND repository = ?")
            .bind(tenant_id)
            .bind(repository)
            .execute(&mut *tx)
            .await?;

        for schema in schemas {
            let fields_json = serde_json::to_string(&schema.fields)?;
            sqlx::query(
                "INSERT INTO schema_definitions (tenant_id, repository, collection, fields, updated_at) VALUES (?, ?, ?, ?, ?)",
            )
            .bind(tenant_id)
            .bind(repository)
            .bind(&schema.collection)
            .bind(&fields_json)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    /// Get the cached schema of one collection.
    pub async fn get_schema(
        &self,
        tenant_id: &str,
        repository: &str,
        collection: &str,
    ) -> Result<Option<SchemaDefinition>, AppError> {
        let row = sqlx::query(
            "SELECT repository, collection, fields FROM schema_definitions WHERE tenant_id = ? AND repository = ? AND collection = ?",
        )
        .bind(tenant_id)
        .bind(repository)
        .bind(collection)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(schema_from_row))
    }

    /// List the cached schemas of a repository.
    pub async fn list_schemas(
        &self,
        tenant_id: &str,
        repository: &str,
    ) -> Result<Vec<SchemaDefinition>, AppError> {
        let rows = sqlx::query(
            "SELECT repository, collection, fields FROM schema_definitions WHERE tenant_id = ? AND repository = ? ORDER BY collection",
        )
        .bind(tenant_id)
        .bind(repository)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(schema_from_row).collect())
    }

    // ==================== SETTINGS OPERATIONS ====================

    /// Get a tenant's settings; empty when none were stored.
    pub async fn get_settings(&self, tenant_id: &str) -> Result<Settings, AppError> {
        let row = sqlx::query("SELECT entries, updated_at FROM settings WHERE tenant_id = ?")
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;

        Ok(match row {
            Some(row) => {
                let entries: String = row.get("entries");
                Settings {
                    tenant_id: tenant_id.to_string(),
                    values: serde_json::from_str(&entries).unwrap_or_default(),
                    updated_at: row.get("updated_at"),
                }
            }
            None => Settings {
                tenant_id: tenant_id.to_string(),
                values: Metadata::new(),
                updated_at: None,
            },
        })
    }

    /// Replace a tenant's settings.
    pub async fn put_settings(
        &self,
        tenant_id: &str,
        values: &Metadata,
    ) -> Result<Settings, AppError> {
        let now = now();
        let entries = serde_json::to_string(values)?;

        sqlx::query(
            r#"INSERT INTO settings (tenant_id, entries, updated_at) VALUES (?, ?, ?)
               ON CONFLICT (tenant_id) DO UPDATE SET
                   entries = excluded.entries,
                   updated_at = excluded.updated_at"#,
        )
        .bind(tenant_id)
        .bind(&entries)
        .bind(&now)
        .execute(&self.pool)
        .await?;

        Ok(Settings {
            tenant_id: tenant_id.to_string(),
            values: values.clone(),
            updated_at: Some(now),
        })
    }
}

// Helper functions for row conversion

fn now() -> String {
    Utc::now().to_rfc3339()
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

fn project_from_row(row: &sqlx::sqlite::SqliteRow) -> Project {
    let collaborators: String = row.get("collaborators");
    let deployment: Option<String> = row.get("deployment");
    Project {
        repository: row.get("repository"),
        tenant_id: row.get("tenant_id"),
        collaborators: serde_json::from_str(&collaborators).unwrap_or_default(),
        deployment: deployment.and_then(|s| serde_json::from_str(&s).ok()),
        last_synced_at: row.get("last_synced_at"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn share_reference_from_row(row: &sqlx::sqlite::SqliteRow) -> ShareReference {
    ShareReference {
        tenant_id: row.get("tenant_id"),
        repository: row.get("repository"),
        owner_tenant_id: row.get("owner_tenant_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

fn post_from_row(row: &sqlx::sqlite::SqliteRow) -> Post {
    let metadata: String = row.get("metadata");
    let status: String = row.get("status");
    let validation_errors: Option<String> = row.get("validation_errors");
    Post {
        id: row.get("id"),
        tenant_id: row.get("tenant_id"),
        repository: row.get("repository"),
        path: row.get("path"),
        collection: row.get("collection"),
        metadata: serde_json::from_str(&metadata).unwrap_or_default(),
        body: row.get("body"),
        version_token: row.get("version_token"),
        // An unreadable status is treated as unsynced.
        status: PostStatus::from_str(&status).unwrap_or(PostStatus::Modified),
        validation_errors: validation_errors.and_then(|s| serde_json::from_str(&s).ok()),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        last_commit_at: row.get("last_commit_at"),
    }
}

fn schema_from_row(row: &sqlx::sqlite::SqliteRow) -> SchemaDefinition {
    let fields: String = row.get("fields");
    SchemaDefinition {
        repository: row.get("repository"),
        collection: row.get("collection"),
        fields: serde_json::from_str(&fields).unwrap_or_default(),
    }
}
