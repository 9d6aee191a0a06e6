//! GitHub contents API client.
//!
//! The blob `sha` is the version token. Transient failures (connect errors, rate limiting,
//! unavailable upstream) are retried here with exponential backoff and nowhere else.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use reqwest::{header, Client, Method, RequestBuilder, Response, StatusCode, Url};
use serde::{Deserialize, Serialize};

use super::{
    permission_denied, version_conflict, ContentStore, Credential, FileWrite, RemoteFile,
    WriteReceipt,
};
use crate::errors::AppError;
use crate::models::RepoId;

const API_VERSION: &str = "2022-11-28";
const MAX_BACKOFF: Duration = Duration::from_secs(60);

/// HTTP client for `/repos/{owner}/{repo}/contents/{path}`.
pub struct GitHubContentStore {
    client: Client,
    base_url: Url,
    max_retries: u32,
    retry_base: Duration,
}

#[derive(Debug, Deserialize)]
struct FileContent {
    sha: String,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    encoding: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ShaRef {
    sha: String,
}

#[derive(Debug, Deserialize)]
struct WriteResponse {
    content: Option<ShaRef>,
    commit: ShaRef,
}

#[derive(Debug, Deserialize)]
struct ApiMessage {
    message: String,
}

#[derive(Debug, Serialize)]
struct PutBody<'a> {
    message: &'a str,
    content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    sha: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    branch: Option<&'a str>,
}

#[derive(Debug, Serialize)]
struct DeleteBody<'a> {
    message: &'a str,
    sha: &'a str,
}

impl GitHubContentStore {
    pub fn new(
        base_url: &str,
        timeout: Duration,
        max_retries: u32,
        retry_base: Duration,
    ) -> Result<Self, AppError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| AppError::Internal(format!("Invalid remote API URL {}: {}", base_url, e)))?;
        if base_url.cannot_be_a_base() {
            return Err(AppError::Internal(format!(
                "Remote API URL {} cannot be used as a base",
                base_url
            )));
        }

        let client = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("gitpress-backend/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| AppError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            base_url,
            max_retries,
            retry_base,
        })
    }

    fn contents_url(&self, repo: &RepoId, path: &str) -> Result<Url, AppError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| AppError::Internal("Remote API URL cannot be used as a base".to_string()))?
            .pop_if_empty()
            .extend(["repos", repo.owner.as_str(), repo.name.as_str(), "contents"])
            .extend(path.split('/').filter(|segment| !segment.is_empty()));
        Ok(url)
    }

    fn request(&self, method: Method, url: Url, token: &str) -> RequestBuilder {
        self.client
            .request(method, url)
            .bearer_auth(token)
            .header(header::ACCEPT, "application/vnd.github+json")
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    /// Send, retrying transient failures.
    ///
    /// Non-idempotent requests are only retried when the failure proves they were not applied.
    async fn send_with_retry<F>(&self, build: F, idempotent: bool) -> Result<Response, AppError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt: u32 = 0;
        loop {
            let (error, hint) = match build().send().await {
                Ok(resp) => match transient_reason(&resp, idempotent) {
                    None => return Ok(resp),
                    Some(reason) => (AppError::TransientTransport(reason), retry_after(&resp)),
                },
                Err(err) if err.is_connect() || (idempotent && err.is_timeout()) => {
                    (AppError::from(err), None)
                }
                Err(err) => return Err(err.into()),
            };

            if attempt >= self.max_retries {
                return Err(error);
            }

            let delay = hint
                .unwrap_or_else(|| {
                    self.retry_base
                        .checked_mul(2u32.saturating_pow(attempt))
                        .unwrap_or(MAX_BACKOFF)
                })
                .min(MAX_BACKOFF);
            tracing::warn!(
                attempt = attempt + 1,
                delay_ms = delay.as_millis() as u64,
                "Retrying remote call: {}",
                error
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }
}

#[async_trait]
impl ContentStore for GitHubContentStore {
    async fn get_file(
        &self,
        credential: &Credential,
        repo: &RepoId,
        path: &str,
    ) -> Result<Option<RemoteFile>, AppError> {
        let url = self.contents_url(repo, path)?;
        let resp = self
            .send_with_retry(|| self.request(Method::GET, url.clone(), &credential.token), true)
            .await?;

        match resp.status() {
            StatusCode::OK => {
                let file: FileContent = resp.json().await?;
                decode_content(file, path).map(Some)
            }
            StatusCode::NOT_FOUND => Ok(None),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(permission_denied(repo, &error_message(resp).await))
            }
            status => Err(AppError::Remote(format!(
                "Unexpected status {} reading {}: {}",
                status,
                path,
                error_message(resp).await
            ))),
        }
    }

    async fn update_file(
        &self,
        credential: &Credential,
        repo: &RepoId,
        write: FileWrite<'_>,
    ) -> Result<WriteReceipt, AppError> {
        let token = credential.token_for(write.options.identity)?;
        let url = self.contents_url(repo, write.path)?;
        let body = PutBody {
            message: write.message,
            content: STANDARD.encode(write.content),
            sha: write.expected_token,
            branch: write.options.branch.as_deref(),
        };

        let resp = self
            .send_with_retry(
                || self.request(Method::PUT, url.clone(), token).json(&body),
                false,
            )
            .await?;

        match resp.status() {
            StatusCode::OK | StatusCode::CREATED => {
                let written: WriteResponse = resp.json().await?;
                let content = written.content.ok_or_else(|| {
                    AppError::Remote(format!("Write of {} returned no content sha", write.path))
                })?;
                Ok(WriteReceipt {
                    version_token: content.sha,
                    commit_id: written.commit.sha,
                })
            }
            StatusCode::CONFLICT => Err(version_conflict(repo, write.path, None)),
            // GitHub answers 422 both for "sha missing" on an existing file and for a sha that
            // does not match.
            StatusCode::UNPROCESSABLE_ENTITY => match write.expected_token {
                Some(_) => Err(version_conflict(repo, write.path, None)),
                None => Err(AppError::Conflict(format!(
                    "{} already exists in {}",
                    write.path, repo
                ))),
            },
            StatusCode::NOT_FOUND => Err(AppError::NotFound(format!(
                "Repository {} was not found or is not visible to this account",
                repo
            ))),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(permission_denied(repo, &error_message(resp).await))
            }
            status => Err(AppError::Remote(format!(
                "Unexpected status {} writing {}: {}",
                status,
                write.path,
                error_message(resp).await
            ))),
        }
    }

    async fn delete_file(
        &self,
        credential: &Credential,
        repo: &RepoId,
        path: &str,
        expected_token: &str,
        message: &str,
    ) -> Result<(), AppError> {
        let url = self.contents_url(repo, path)?;
        let body = DeleteBody {
            message,
            sha: expected_token,
        };

        let resp = self
            .send_with_retry(
                || {
                    self.request(Method::DELETE, url.clone(), &credential.token)
                        .json(&body)
                },
                false,
            )
            .await?;

        match resp.status() {
            StatusCode::OK | StatusCode::NO_CONTENT => Ok(()),
            StatusCode::NOT_FOUND => Err(AppError::NotFound(format!(
                "{} does not exist in {}",
                path, repo
            ))),
            StatusCode::CONFLICT | StatusCode::UNPROCESSABLE_ENTITY => {
                Err(version_conflict(repo, path, None))
            }
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(permission_denied(repo, &error_message(resp).await))
            }
            status => Err(AppError::Remote(format!(
                "Unexpected status {} deleting {}: {}",
                status,
                path,
                error_message(resp).await
            ))),
        }
    }
}

/// Why a response should be retried, if it should.
fn transient_reason(resp: &Response, idempotent: bool) -> Option<String> {
    let status = resp.status();
    let headers = resp.headers();
    let exhausted = headers
        .get("x-ratelimit-remaining")
        .and_then(|v| v.to_str().ok())
        .is_some_and(|v| v.trim() == "0");

    let rate_limited = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN
            && (exhausted || headers.contains_key(header::RETRY_AFTER)));
    if rate_limited {
        return Some(format!("Remote store rate limit reached ({})", status));
    }

    match status {
        StatusCode::SERVICE_UNAVAILABLE => Some(format!("Remote store unavailable ({})", status)),
        StatusCode::INTERNAL_SERVER_ERROR | StatusCode::BAD_GATEWAY | StatusCode::GATEWAY_TIMEOUT
            if idempotent =>
        {
            Some(format!("Remote store failed ({})", status))
        }
        _ => None,
    }
}

fn retry_after(resp: &Response) -> Option<Duration> {
    resp.headers()
        .get(header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.trim().parse::<u64>().ok())
        .map(Duration::from_secs)
}

async fn error_message(resp: Response) -> String {
    let status = resp.status();
    match resp.json::<ApiMessage>().await {
        Ok(body) => body.message,
        Err(_) => status.to_string(),
    }
}

fn decode_content(file: FileContent, path: &str) -> Result<RemoteFile, AppError> {
    match file.encoding.as_deref() {
        None | Some("base64") => {}
        Some(other) => {
            return Err(AppError::Remote(format!(
                "{} is served with unsupported encoding '{}'",
                path, other
            )))
        }
    }

    let packed: String = file
        .content
        .unwrap_or_default()
        .chars()
        .filter(|c| !c.is_whitespace())
        .collect();
    let bytes = STANDARD
        .decode(packed)
        .map_err(|e| AppError::Remote(format!("Invalid base64 content for {}: {}", path, e)))?;
    let content = String::from_utf8(bytes)
        .map_err(|_| AppError::MalformedDocument(format!("{} is not valid UTF-8", path)))?;

    Ok(RemoteFile {
        content,
        version_token: file.sha,
    })
}
