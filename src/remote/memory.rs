//! In-memory content store for tests.
//!
//! Same compare-and-swap semantics as the HTTP client. Counts calls so tests can prove an
//! operation never reached the remote.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::RwLock;

use super::{
    permission_denied, version_conflict, ContentStore, Credential, FileWrite, RemoteFile,
    WriteReceipt,
};
use crate::errors::AppError;
use crate::models::RepoId;

#[derive(Default)]
pub struct MemoryContentStore {
    files: RwLock<HashMap<(String, String), RemoteFile>>,
    read_only: RwLock<HashSet<String>>,
    unavailable: RwLock<HashSet<String>>,
    revisions: AtomicU64,
    calls: AtomicUsize,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed a file at an explicit version token.
    pub async fn insert(&self, repo: &str, path: &str, content: &str, token: &str) {
        self.files.write().await.insert(
            (repo.to_string(), path.to_string()),
            RemoteFile {
                content: content.to_string(),
                version_token: token.to_string(),
            },
        );
    }

    pub async fn file(&self, repo: &str, path: &str) -> Option<RemoteFile> {
        self.files
            .read()
            .await
            .get(&(repo.to_string(), path.to_string()))
            .cloned()
    }

    pub async fn remove(&self, repo: &str, path: &str) {
        self.files
            .write()
            .await
            .remove(&(repo.to_string(), path.to_string()));
    }

    /// Reject every write to `repo` with `PermissionDenied`.
    pub async fn deny_writes(&self, repo: &str) {
        self.read_only.write().await.insert(repo.to_string());
    }

    /// Fail every call touching `path` with a transport error.
    pub async fn break_path(&self, path: &str) {
        self.unavailable.write().await.insert(path.to_string());
    }

    /// Number of protocol calls received.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    async fn admit(&self, repo: &RepoId, path: &str, write: bool) -> Result<(), AppError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.read().await.contains(path) {
            return Err(AppError::TransientTransport(format!(
                "Remote store unreachable for {}",
                path
            )));
        }
        if write && self.read_only.read().await.contains(&repo.full_name()) {
            return Err(permission_denied(repo, "read-only access"));
        }
        Ok(())
    }

    fn next_revision(&self) -> u64 {
        self.revisions.fetch_add(1, Ordering::SeqCst) + 1
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn get_file(
        &self,
        _credential: &Credential,
        repo: &RepoId,
        path: &str,
    ) -> Result<Option<RemoteFile>, AppError> {
        self.admit(repo, path, false).await?;
        Ok(self.file(&repo.full_name(), path).await)
    }

    async fn update_file(
        &self,
        credential: &Credential,
        repo: &RepoId,
        write: FileWrite<'_>,
    ) -> Result<WriteReceipt, AppError> {
        credential.token_for(write.options.identity)?;
        self.admit(repo, write.path, true).await?;

        let key = (repo.full_name(), write.path.to_string());
        let mut files = self.files.write().await;
        let current = files.get(&key).map(|f| f.version_token.clone());

        match (current, write.expected_token) {
            (Some(_), None) => {
                return Err(AppError::Conflict(format!(
                    "{} already exists in {}",
                    write.path, repo
                )))
            }
            (Some(current), Some(expected)) if current != expected => {
                return Err(version_conflict(repo, write.path, Some(current)))
            }
            (None, Some(_)) => return Err(version_conflict(repo, write.path, None)),
            _ => {}
        }

        let revision = self.next_revision();
        let receipt = WriteReceipt {
            version_token: format!("mem-{}", revision),
            commit_id: format!("commit-{}", revision),
        };
        files.insert(
            key,
            RemoteFile {
                content: write.content.to_string(),
                version_token: receipt.version_token.clone(),
            },
        );
        Ok(receipt)
    }

    async fn delete_file(
        &self,
        _credential: &Credential,
        repo: &RepoId,
        path: &str,
        expected_token: &str,
        _message: &str,
    ) -> Result<(), AppError> {
        self.admit(repo, path, true).await?;

        let key = (repo.full_name(), path.to_string());
        let mut files = self.files.write().await;
        match files.get(&key) {
            None => Err(AppError::NotFound(format!(
                "{} does not exist in {}",
                path, repo
            ))),
            Some(file) if file.version_token != expected_token => Err(version_conflict(
                repo,
                path,
                Some(file.version_token.clone()),
            )),
            Some(_) => {
                files.remove(&key);
                Ok(())
            }
        }
    }
}
