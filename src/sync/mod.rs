//! Bulk synchronization from the remote store into the cache.
//!
//! Each path runs an independent fetch, decode, validate and upsert pipeline. A failing path
//! is reported in the summary and never aborts the rest of the batch.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use futures::stream::{self, StreamExt};

use crate::db::{Repository, SyncedPost};
use crate::errors::AppError;
use crate::frontmatter;
use crate::models::{DeleteSummary, RepoId, SchemaDefinition, SyncFailure, SyncSummary};
use crate::remote::{ContentStore, Credential};
use crate::schema::{self, SchemaRegistry};

#[derive(Clone)]
pub struct SyncOrchestrator {
    repo: Repository,
    store: Arc<dyn ContentStore>,
    registry: SchemaRegistry,
    concurrency: usize,
}

impl SyncOrchestrator {
    pub fn new(
        repo: Repository,
        store: Arc<dyn ContentStore>,
        registry: SchemaRegistry,
        concurrency: usize,
    ) -> Self {
        Self {
            repo,
            store,
            registry,
            concurrency: concurrency.max(1),
        }
    }

    /// Pull `paths` of `repository` into `partition`.
    pub async fn sync_files(
        &self,
        credential: &Credential,
        partition: &str,
        repository: &RepoId,
        paths: &[String],
    ) -> Result<SyncSummary, AppError> {
        let full_name = repository.full_name();

        let schemas = match self.registry.discover(credential, repository).await {
            Some(schemas) => {
                self.repo
                    .replace_schemas(partition, &full_name, &schemas)
                    .await?;
                schemas
            }
            None => {
                tracing::warn!("Keeping cached schemas of {} in {}", full_name, partition);
                self.repo.list_schemas(partition, &full_name).await?
            }
        };
        let schemas: HashMap<&str, &SchemaDefinition> = schemas
            .iter()
            .map(|s| (s.collection.as_str(), s))
            .collect();
        let schemas = &schemas;

        let mut seen = HashSet::new();
        let unique: Vec<&String> = paths.iter().filter(|p| seen.insert(*p)).collect();
        let total = unique.len();

        let pipelines: Vec<_> = unique
            .into_iter()
            .map(|path| async move {
                let outcome = self
                    .sync_one(credential, partition, repository, path, schemas)
                    .await;
                (path, outcome)
            })
            .collect();
        let outcomes: Vec<(&String, Result<(), AppError>)> = stream::iter(pipelines)
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut summary = SyncSummary {
            synced_count: 0,
            failures: Vec::new(),
        };
        for (path, outcome) in outcomes {
            match outcome {
                Ok(()) => summary.synced_count += 1,
                Err(e) => {
                    tracing::warn!("Skipped {} while syncing {}: {}", path, full_name, e);
                    summary.failures.push(SyncFailure {
                        path: path.clone(),
                        code: e.error_code().to_string(),
                        reason: e.message(),
                        retryable: e.is_transient(),
                    });
                }
            }
        }
        summary.failures.sort_by(|a, b| a.path.cmp(&b.path));

        if let Err(e) = self.repo.touch_project_synced(partition, &full_name).await {
            tracing::warn!(
                "Could not record sync time of {} in {}: {}",
                full_name,
                partition,
                e
            );
        }

        tracing::info!(
            "Synced {}/{} files of {} into {}",
            summary.synced_count,
            total,
            full_name,
            partition
        );
        Ok(summary)
    }

    async fn sync_one(
        &self,
        credential: &Credential,
        partition: &str,
        repository: &RepoId,
        path: &str,
        schemas: &HashMap<&str, &SchemaDefinition>,
    ) -> Result<(), AppError> {
        let full_name = repository.full_name();
        let Some(file) = self.store.get_file(credential, repository, path).await? else {
            let cached = self
                .repo
                .get_post_by_path(partition, &full_name, path)
                .await?
                .is_some();
            if cached {
                tracing::warn!("{} is gone from {}; keeping the cached copy", path, full_name);
            }
            return Err(AppError::NotFound(format!(
                "{} does not exist in {}",
                path, full_name
            )));
        };

        let document = frontmatter::decode(&file.content)?;
        let collection = schema::classify(path);

        let (metadata, errors) = match schemas.get(collection.as_str()) {
            Some(definition) => {
                let outcome = schema::validate(&document.metadata, definition);
                if outcome.valid {
                    (outcome.data, None)
                } else {
                    tracing::debug!(
                        "{} in {} has {} schema errors",
                        path,
                        repository,
                        outcome.errors.len()
                    );
                    (outcome.data, Some(outcome.errors))
                }
            }
            None => (document.metadata, None),
        };

        self.repo
            .upsert_synced_post(&SyncedPost {
                tenant_id: partition,
                repository: &full_name,
                path,
                collection: &collection,
                metadata: &metadata,
                body: &document.body,
                version_token: &file.version_token,
                validation_errors: errors.as_deref(),
            })
            .await
    }

    /// Remove cache entries for paths deleted in the repository. The remote is not contacted.
    pub async fn delete_files(
        &self,
        partition: &str,
        repository: &RepoId,
        paths: &[String],
    ) -> Result<DeleteSummary, AppError> {
        let removed_count = self
            .repo
            .delete_posts_by_paths(partition, &repository.full_name(), paths)
            .await?;

        tracing::info!(
            "Removed {} cached files of {} from {}",
            removed_count,
            repository,
            partition
        );
        Ok(DeleteSummary { removed_count })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_database;
    use crate::models::PostStatus;
    use crate::remote::memory::MemoryContentStore;
    use crate::remote::{FileWrite, RemoteFile, WriteReceipt};
    use crate::schema::DEFAULT_CONFIG_PATH;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tempfile::TempDir;

    struct Fixture {
        sync: SyncOrchestrator,
        repo: Repository,
        store: Arc<MemoryContentStore>,
        _dir: TempDir,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(MemoryContentStore::new());
        let (sync, repo, dir) = orchestrator(store.clone()).await;
        Fixture {
            sync,
            repo,
            store,
            _dir: dir,
        }
    }

    async fn orchestrator(store: Arc<dyn ContentStore>) -> (SyncOrchestrator, Repository, TempDir) {
        let temp_dir = TempDir::new().expect("Failed to create temp dir");
        let pool = init_database(&temp_dir.path().join("cache.sqlite"))
            .await
            .expect("Failed to init DB");
        let repo = Repository::new(pool);
        let registry = SchemaRegistry::new(store.clone(), DEFAULT_CONFIG_PATH);
        let sync = SyncOrchestrator::new(repo.clone(), store, registry, 2);
        (sync, repo, temp_dir)
    }

    /// Records how many reads are in flight at once.
    #[derive(Default)]
    struct CountingStore {
        inner: MemoryContentStore,
        in_flight: AtomicUsize,
        peak: AtomicUsize,
    }

    #[async_trait]
    impl ContentStore for CountingStore {
        async fn get_file(
            &self,
            credential: &Credential,
            repo: &RepoId,
            path: &str,
        ) -> Result<Option<RemoteFile>, AppError> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(20)).await;
            let result = self.inner.get_file(credential, repo, path).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            result
        }

        async fn update_file(
            &self,
            credential: &Credential,
            repo: &RepoId,
            write: FileWrite<'_>,
        ) -> Result<WriteReceipt, AppError> {
            self.inner.update_file(credential, repo, write).await
        }

        async fn delete_file(
            &self,
            credential: &Credential,
            repo: &RepoId,
            path: &str,
            expected_token: &str,
            message: &str,
        ) -> Result<(), AppError> {
            self.inner
                .delete_file(credential, repo, path, expected_token, message)
                .await
        }
    }

    fn blog() -> RepoId {
        RepoId::new("acme", "blog").unwrap()
    }

    fn paths(list: &[&str]) -> Vec<String> {
        list.iter().map(|p| p.to_string()).collect()
    }

    #[tokio::test]
    async fn test_sync_classifies_and_records_tokens() {
        let f = fixture().await;
        f.store
            .insert("acme/blog", "posts/a.md", "---\ntitle: A\n---\nAlpha", "v1")
            .await;
        f.store
            .insert("acme/blog", "posts/b.md", "---\ntitle: B\n---\nBeta", "v2")
            .await;

        let summary = f
            .sync
            .sync_files(&Credential::new("t"), "alice", &blog(), &paths(&["posts/a.md", "posts/b.md"]))
            .await
            .unwrap();
        assert_eq!(summary.synced_count, 2);
        assert!(summary.failures.is_empty());

        let posts = f.repo.list_posts("alice", "acme/blog", None).await.unwrap();
        assert_eq!(posts.len(), 2);
        assert!(posts.iter().all(|p| p.collection == "posts"));
        assert!(posts.iter().all(|p| p.status == PostStatus::Synced));
        assert_eq!(posts[0].version_token.as_deref(), Some("v1"));
        assert_eq!(posts[1].version_token.as_deref(), Some("v2"));
        assert_eq!(posts[0].body, "Alpha");
    }

    #[tokio::test]
    async fn test_malformed_file_is_isolated() {
        let f = fixture().await;
        let mut list = Vec::new();
        for i in 0..5 {
            let path = format!("posts/{}.md", i);
            let content = if i == 3 {
                "---\ntitle: [unclosed\n---\nbody".to_string()
            } else {
                format!("---\ntitle: Post {}\n---\nbody", i)
            };
            f.store.insert("acme/blog", &path, &content, &format!("v{}", i)).await;
            list.push(path);
        }

        let summary = f
            .sync
            .sync_files(&Credential::new("t"), "alice", &blog(), &list)
            .await
            .unwrap();

        assert_eq!(summary.synced_count, 4);
        assert_eq!(summary.failures.len(), 1);
        assert_eq!(summary.failures[0].path, "posts/3.md");
        assert_eq!(summary.failures[0].code, "MALFORMED_DOCUMENT");
    }

    #[tokio::test]
    async fn test_missing_and_unreachable_paths_are_skipped() {
        let f = fixture().await;
        f.store.insert("acme/blog", "posts/a.md", "Alpha", "v1").await;
        f.store.insert("acme/blog", "posts/b.md", "Beta", "v2").await;
        f.store.break_path("posts/b.md").await;

        let summary = f
            .sync
            .sync_files(
                &Credential::new("t"),
                "alice",
                &blog(),
                &paths(&["posts/a.md", "posts/b.md", "posts/gone.md", "posts/a.md"]),
            )
            .await
            .unwrap();

        assert_eq!(summary.synced_count, 1);
        let codes: Vec<&str> = summary.failures.iter().map(|f| f.code.as_str()).collect();
        assert_eq!(codes, vec!["TRANSIENT_TRANSPORT", "NOT_FOUND"]);
        assert!(summary.failures[0].retryable);
        assert!(!summary.failures[1].retryable);
        assert!(f
            .repo
            .get_post_by_path("alice", "acme/blog", "posts/gone.md")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_resync_refreshes_without_duplicating() {
        let f = fixture().await;
        let list = paths(&["posts/a.md"]);
        f.store.insert("acme/blog", "posts/a.md", "old", "v1").await;
        f.sync
            .sync_files(&Credential::new("t"), "alice", &blog(), &list)
            .await
            .unwrap();

        f.store.insert("acme/blog", "posts/a.md", "new", "v2").await;
        f.sync
            .sync_files(&Credential::new("t"), "alice", &blog(), &list)
            .await
            .unwrap();

        let posts = f.repo.list_posts("alice", "acme/blog", None).await.unwrap();
        assert_eq!(posts.len(), 1);
        assert_eq!(posts[0].body, "new");
        assert_eq!(posts[0].version_token.as_deref(), Some("v2"));
    }

    #[tokio::test]
    async fn test_schema_errors_are_attached_not_fatal() {
        let f = fixture().await;
        f.store
            .insert(
                "acme/blog",
                DEFAULT_CONFIG_PATH,
                "collections:\n  posts:\n    fields:\n      title:\n        type: string\n        required: true\n",
                "cfg",
            )
            .await;
        f.store.insert("acme/blog", "posts/a.md", "---\ndraft: true\n---\n", "v1").await;

        let summary = f
            .sync
            .sync_files(&Credential::new("t"), "alice", &blog(), &paths(&["posts/a.md"]))
            .await
            .unwrap();
        assert_eq!(summary.synced_count, 1);

        let post = f
            .repo
            .get_post_by_path("alice", "acme/blog", "posts/a.md")
            .await
            .unwrap()
            .unwrap();
        let errors = post.validation_errors.unwrap();
        assert_eq!(errors[0].field, "title");
        assert!(f.repo.get_schema("alice", "acme/blog", "posts").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_delete_files_touches_cache_only() {
        let f = fixture().await;
        f.store.insert("acme/blog", "posts/a.md", "Alpha", "v1").await;
        f.sync
            .sync_files(&Credential::new("t"), "alice", &blog(), &paths(&["posts/a.md"]))
            .await
            .unwrap();
        let calls = f.store.calls();

        let summary = f
            .sync
            .delete_files("alice", &blog(), &paths(&["posts/a.md", "posts/none.md"]))
            .await
            .unwrap();

        assert_eq!(summary.removed_count, 1);
        assert_eq!(f.store.calls(), calls);
        assert!(f.store.file("acme/blog", "posts/a.md").await.is_some());
    }

    #[tokio::test]
    async fn test_fan_out_is_bounded_but_concurrent() {
        let store = Arc::new(CountingStore::default());
        let mut list = Vec::new();
        for i in 0..8 {
            let path = format!("posts/{}.md", i);
            store
                .inner
                .insert("acme/blog", &path, &format!("body {}", i), &format!("v{}", i))
                .await;
            list.push(path);
        }
        let (sync, repo, _dir) = orchestrator(store.clone()).await;

        let summary = sync
            .sync_files(&Credential::new("t"), "alice", &blog(), &list)
            .await
            .unwrap();

        assert_eq!(summary.synced_count, 8);
        assert_eq!(repo.list_posts("alice", "acme/blog", None).await.unwrap().len(), 8);
        let peak = store.peak.load(Ordering::SeqCst);
        assert!(peak > 1, "reads never overlapped");
        assert!(peak <= 2, "{} reads in flight with a limit of 2", peak);
    }

    #[tokio::test]
    async fn test_unreadable_schema_config_keeps_cached_schemas() {
        let f = fixture().await;
        f.store
            .insert(
                "acme/blog",
                DEFAULT_CONFIG_PATH,
                "collections:\n  posts:\n    fields:\n      title: { type: string, required: true }\n",
                "cfg",
            )
            .await;
        f.store.insert("acme/blog", "posts/a.md", "no title", "v1").await;
        let list = paths(&["posts/a.md"]);
        f.sync
            .sync_files(&Credential::new("t"), "alice", &blog(), &list)
            .await
            .unwrap();

        f.store.break_path(DEFAULT_CONFIG_PATH).await;
        f.store.insert("acme/blog", "posts/a.md", "still no title", "v2").await;
        let summary = f
            .sync
            .sync_files(&Credential::new("t"), "alice", &blog(), &list)
            .await
            .unwrap();

        assert_eq!(summary.synced_count, 1);
        assert!(f.repo.get_schema("alice", "acme/blog", "posts").await.unwrap().is_some());
        let post = f
            .repo
            .get_post_by_path("alice", "acme/blog", "posts/a.md")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(post.body, "still no title");
        assert_eq!(post.validation_errors.unwrap()[0].field, "title");
    }

    #[tokio::test]
    async fn test_removed_schema_config_clears_schemas() {
        let f = fixture().await;
        f.store
            .insert("acme/blog", DEFAULT_CONFIG_PATH, "collections:\n  posts: {}\n", "cfg")
            .await;
        f.sync
            .sync_files(&Credential::new("t"), "alice", &blog(), &[])
            .await
            .unwrap();
        assert_eq!(f.repo.list_schemas("alice", "acme/blog").await.unwrap().len(), 1);

        f.store.remove("acme/blog", DEFAULT_CONFIG_PATH).await;
        f.sync
            .sync_files(&Credential::new("t"), "alice", &blog(), &[])
            .await
            .unwrap();
        assert!(f.repo.list_schemas("alice", "acme/blog").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sync_time_bookkeeping_failure_keeps_summary() {
        let f = fixture().await;
        f.store.insert("acme/blog", "posts/a.md", "Alpha", "v1").await;
        sqlx::query("DROP TABLE projects")
            .execute(f.repo.pool())
            .await
            .unwrap();

        let summary = f
            .sync
            .sync_files(&Credential::new("t"), "alice", &blog(), &paths(&["posts/a.md"]))
            .await
            .unwrap();

        assert_eq!(summary.synced_count, 1);
        assert!(summary.failures.is_empty());
    }
}
