//! Integration tests for the gitpress backend.

use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::Request;
use reqwest::{Client, RequestBuilder};
use serde_json::{json, Value};
use tempfile::TempDir;
use tower::ServiceExt;

use crate::config::Config;
use crate::db::{init_database, Repository};
use crate::remote::memory::MemoryContentStore;
use crate::schema::DEFAULT_CONFIG_PATH;
use crate::{create_router, AppState};

const PSK: &str = "test-api-key";

/// Test fixture for integration tests.
struct TestFixture {
    client: Client,
    base_url: String,
    store: Arc<MemoryContentStore>,
    _temp_dir: TempDir,
}

async fn test_state(psk: Option<String>) -> (AppState, Arc<MemoryContentStore>, TempDir) {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let db_path = temp_dir.path().join("test.sqlite");

    let pool = init_database(&db_path).await.expect("Failed to init DB");
    let repo = Repository::new(pool);
    let store = Arc::new(MemoryContentStore::new());

    let config = Config {
        api_psk: psk,
        db_path,
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        log_level: "warn".to_string(),
        remote_api_url: "http://127.0.0.1:9".to_string(),
        remote_timeout: Duration::from_secs(5),
        remote_max_retries: 0,
        remote_retry_base: Duration::from_millis(1),
        sync_concurrency: 4,
        schema_config_path: DEFAULT_CONFIG_PATH.to_string(),
    };

    let state = AppState::new(repo, store.clone(), config);
    (state, store, temp_dir)
}

impl TestFixture {
    async fn new() -> Self {
        let (state, store, temp_dir) = test_state(Some(PSK.to_string())).await;
        let app = create_router(state);

        // Bind to random port
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("Failed to bind");
        let addr = listener.local_addr().expect("Failed to get addr");
        let base_url = format!("http://{}", addr);

        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        // Wait for server to start
        tokio::time::sleep(Duration::from_millis(100)).await;

        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert("x-api-key", PSK.parse().unwrap());

        TestFixture {
            client: Client::builder().default_headers(headers).build().unwrap(),
            base_url,
            store,
            _temp_dir: temp_dir,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    /// Request as `tenant`, carrying a remote token.
    fn as_tenant(&self, builder: RequestBuilder, tenant: &str) -> RequestBuilder {
        builder
            .header("x-tenant-id", tenant)
            .header("x-remote-token", format!("{}-token", tenant))
    }

    async fn send(&self, builder: RequestBuilder, tenant: &str) -> (u16, Value) {
        let resp = self.as_tenant(builder, tenant).send().await.unwrap();
        let status = resp.status().as_u16();
        (status, resp.json().await.unwrap())
    }

    async fn create_project(&self, tenant: &str, repository: &str) {
        let (status, body) = self
            .send(
                self.client
                    .post(self.url("/api/projects"))
                    .json(&json!({ "repository": repository })),
                tenant,
            )
            .await;
        assert_eq!(status, 200, "{}", body);
    }
}

#[tokio::test]
async fn test_health_check() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/health"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    assert_eq!(resp.text().await.unwrap(), "OK");
}

#[tokio::test]
async fn test_health_check_in_process() {
    let (state, _store, _dir) = test_state(Some(PSK.to_string())).await;
    let app = create_router(state);

    let resp = app
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

#[tokio::test]
async fn test_auth_missing_psk() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .get(fixture.url("/api/projects"))
        .header("x-tenant-id", "alice")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_auth_invalid_psk() {
    let fixture = TestFixture::new().await;

    let resp = Client::new()
        .get(fixture.url("/api/projects"))
        .header("x-api-key", "wrong-key")
        .header("x-tenant-id", "alice")
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
}

#[tokio::test]
async fn test_missing_tenant_header() {
    let fixture = TestFixture::new().await;

    let resp = fixture
        .client
        .get(fixture.url("/api/projects"))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_sync_then_commit() {
    let fixture = TestFixture::new().await;
    fixture.create_project("alice", "acme/blog").await;
    fixture
        .store
        .insert("acme/blog", "posts/a.md", "---\ntitle: A\n---\nAlpha\n", "v1")
        .await;
    fixture
        .store
        .insert("acme/blog", "posts/b.md", "---\ntitle: B\n---\nBeta\n", "v2")
        .await;
    fixture
        .store
        .insert("acme/blog", "about.md", "About\n", "v3")
        .await;

    let (status, body) = fixture
        .send(
            fixture
                .client
                .post(fixture.url("/api/projects/acme/blog/sync"))
                .json(&json!({ "paths": ["posts/a.md", "posts/b.md", "about.md", "posts/gone.md"] })),
            "alice",
        )
        .await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["data"]["syncedCount"], 3);
    assert_eq!(body["data"]["failures"][0]["path"], "posts/gone.md");

    let (status, body) = fixture
        .send(
            fixture
                .client
                .get(fixture.url("/api/projects/acme/blog/posts?collection=posts")),
            "alice",
        )
        .await;
    assert_eq!(status, 200);
    let posts = body["data"].as_array().unwrap();
    assert_eq!(posts.len(), 2);
    assert_eq!(posts[0]["status"], "synced");
    assert_eq!(posts[0]["versionToken"], "v1");
    let id = posts[0]["id"].as_str().unwrap().to_string();

    let (status, body) = fixture
        .send(
            fixture
                .client
                .put(fixture.url(&format!("/api/posts/{}", id)))
                .json(&json!({ "body": "Alpha, revised\n", "commit": true })),
            "alice",
        )
        .await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["data"]["status"], "synced");

    let remote = fixture.store.file("acme/blog", "posts/a.md").await.unwrap();
    assert_eq!(remote.content, "---\ntitle: A\n---\nAlpha, revised\n");
    assert_eq!(body["data"]["versionToken"], remote.version_token.as_str());

    let (status, body) = fixture
        .send(
            fixture
                .client
                .get(fixture.url("/api/projects/acme/blog")),
            "alice",
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["role"], "owner");
    assert!(body["data"]["project"]["lastSyncedAt"].is_string());
}

#[tokio::test]
async fn test_stale_commit_reports_version_conflict() {
    let fixture = TestFixture::new().await;
    fixture.create_project("alice", "acme/blog").await;

    let (status, body) = fixture
        .send(
            fixture.client.post(fixture.url("/api/posts")).json(&json!({
                "repository": "acme/blog",
                "path": "posts/hello.md",
                "metadata": { "title": "Hello" },
                "body": "Hi\n",
                "commit": true
            })),
            "alice",
        )
        .await;
    assert_eq!(status, 200, "{}", body);
    let id = body["data"]["id"].as_str().unwrap().to_string();

    // A commit lands in the repository from elsewhere.
    fixture
        .store
        .insert("acme/blog", "posts/hello.md", "---\ntitle: Theirs\n---\n", "theirs")
        .await;

    let (status, body) = fixture
        .send(
            fixture
                .client
                .put(fixture.url(&format!("/api/posts/{}", id)))
                .json(&json!({ "body": "Mine\n", "commit": true })),
            "alice",
        )
        .await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "VERSION_CONFLICT");
    assert_eq!(body["error"]["details"]["currentToken"], "theirs");

    let (status, body) = fixture
        .send(
            fixture.client.get(fixture.url(&format!("/api/posts/{}", id))),
            "alice",
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["status"], "modified");
    assert_eq!(body["data"]["body"], "Mine\n");
}

#[tokio::test]
async fn test_duplicate_create_is_conflict() {
    let fixture = TestFixture::new().await;
    fixture.create_project("alice", "acme/blog").await;

    let create = || {
        fixture.client.post(fixture.url("/api/posts")).json(&json!({
            "repository": "acme/blog",
            "path": "posts/hello.md",
            "body": "Hi\n"
        }))
    };

    let (status, body) = fixture.send(create(), "alice").await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["status"], "draft");

    let (status, body) = fixture.send(create(), "alice").await;
    assert_eq!(status, 409);
    assert_eq!(body["error"]["code"], "CONFLICT");
}

#[tokio::test]
async fn test_remote_delete_requires_commit_history() {
    let fixture = TestFixture::new().await;
    fixture.create_project("alice", "acme/blog").await;

    let (_, body) = fixture
        .send(
            fixture.client.post(fixture.url("/api/posts")).json(&json!({
                "repository": "acme/blog",
                "path": "posts/draft.md"
            })),
            "alice",
        )
        .await;
    let id = body["data"]["id"].as_str().unwrap().to_string();

    let (status, body) = fixture
        .send(
            fixture
                .client
                .delete(fixture.url(&format!("/api/posts/{}?removeFromRemote=true", id))),
            "alice",
        )
        .await;
    assert_eq!(status, 400);
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    assert_eq!(fixture.store.calls(), 0);

    let (status, _) = fixture
        .send(
            fixture
                .client
                .delete(fixture.url(&format!("/api/posts/{}", id))),
            "alice",
        )
        .await;
    assert_eq!(status, 200);
}

#[tokio::test]
async fn test_sharing_lifecycle() {
    let fixture = TestFixture::new().await;
    fixture.create_project("alice", "acme/blog").await;

    let (status, body) = fixture
        .send(
            fixture
                .client
                .post(fixture.url("/api/projects/acme/blog/collaborators"))
                .json(&json!({ "tenantId": "bob", "displayName": "Bob" })),
            "alice",
        )
        .await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["data"]["collaborators"][0]["tenantId"], "bob");

    let (_, body) = fixture
        .send(fixture.client.get(fixture.url("/api/projects")), "bob")
        .await;
    assert_eq!(body["data"][0]["role"], "collaborator");
    assert_eq!(body["data"][0]["project"]["tenantId"], "alice");

    // Bob writes into Alice's partition.
    let (status, body) = fixture
        .send(
            fixture.client.post(fixture.url("/api/posts")).json(&json!({
                "repository": "acme/blog",
                "path": "posts/from-bob.md",
                "body": "Hello from Bob\n"
            })),
            "bob",
        )
        .await;
    assert_eq!(status, 200, "{}", body);
    assert_eq!(body["data"]["tenantId"], "alice");

    let (_, body) = fixture
        .send(
            fixture
                .client
                .get(fixture.url("/api/projects/acme/blog/posts")),
            "alice",
        )
        .await;
    assert_eq!(body["data"].as_array().unwrap().len(), 1);

    // Only the owner manages access.
    let (status, body) = fixture
        .send(
            fixture
                .client
                .post(fixture.url("/api/projects/acme/blog/collaborators"))
                .json(&json!({ "tenantId": "carol" })),
            "bob",
        )
        .await;
    assert_eq!(status, 403);
    assert_eq!(body["error"]["code"], "PERMISSION_DENIED");

    let (status, _) = fixture
        .send(
            fixture
                .client
                .delete(fixture.url("/api/projects/acme/blog/collaborators/bob")),
            "alice",
        )
        .await;
    assert_eq!(status, 200);

    let (status, body) = fixture
        .send(
            fixture
                .client
                .get(fixture.url("/api/projects/acme/blog/posts")),
            "bob",
        )
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["error"]["code"], "NOT_FOUND");
}

#[tokio::test]
async fn test_sync_requires_remote_token() {
    let fixture = TestFixture::new().await;
    fixture.create_project("alice", "acme/blog").await;

    let resp = fixture
        .client
        .post(fixture.url("/api/projects/acme/blog/sync"))
        .header("x-tenant-id", "alice")
        .json(&json!({ "paths": ["posts/a.md"] }))
        .send()
        .await
        .unwrap();

    assert_eq!(resp.status(), 401);
    assert_eq!(fixture.store.calls(), 0);
}

#[tokio::test]
async fn test_deletions_and_schemas() {
    let fixture = TestFixture::new().await;
    fixture.create_project("alice", "acme/blog").await;
    fixture
        .store
        .insert(
            "acme/blog",
            DEFAULT_CONFIG_PATH,
            "collections:\n  posts:\n    fields:\n      title: { type: string, required: true }\n",
            "cfg",
        )
        .await;
    fixture
        .store
        .insert("acme/blog", "posts/a.md", "No frontmatter\n", "v1")
        .await;

    let (status, body) = fixture
        .send(
            fixture
                .client
                .post(fixture.url("/api/projects/acme/blog/sync"))
                .json(&json!({ "paths": ["posts/a.md"] })),
            "alice",
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["syncedCount"], 1);

    let (_, body) = fixture
        .send(
            fixture
                .client
                .get(fixture.url("/api/projects/acme/blog/schemas")),
            "alice",
        )
        .await;
    assert_eq!(body["data"][0]["collection"], "posts");

    let (_, body) = fixture
        .send(
            fixture
                .client
                .get(fixture.url("/api/projects/acme/blog/posts")),
            "alice",
        )
        .await;
    assert_eq!(body["data"][0]["validationErrors"][0]["field"], "title");

    let (status, body) = fixture
        .send(
            fixture
                .client
                .post(fixture.url("/api/projects/acme/blog/deletions"))
                .json(&json!({ "paths": ["posts/a.md"] })),
            "alice",
        )
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["removedCount"], 1);
    assert!(fixture.store.file("acme/blog", "posts/a.md").await.is_some());
}

#[tokio::test]
async fn test_settings_roundtrip() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture
        .send(fixture.client.get(fixture.url("/api/settings")), "alice")
        .await;
    assert_eq!(status, 200);
    assert_eq!(body["data"]["values"], json!({}));

    let (status, _) = fixture
        .send(
            fixture
                .client
                .put(fixture.url("/api/settings"))
                .json(&json!({ "values": { "theme": "dark" } })),
            "alice",
        )
        .await;
    assert_eq!(status, 200);

    let (_, body) = fixture
        .send(fixture.client.get(fixture.url("/api/settings")), "alice")
        .await;
    assert_eq!(body["data"]["values"]["theme"], "dark");

    let (_, body) = fixture
        .send(fixture.client.get(fixture.url("/api/settings")), "bob")
        .await;
    assert_eq!(body["data"]["values"], json!({}));
}

#[tokio::test]
async fn test_not_found_errors() {
    let fixture = TestFixture::new().await;

    let (status, body) = fixture
        .send(
            fixture.client.get(fixture.url("/api/posts/non-existent-id")),
            "alice",
        )
        .await;
    assert_eq!(status, 404);
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "NOT_FOUND");

    let (status, _) = fixture
        .send(
            fixture.client.get(fixture.url("/api/projects/acme/unknown")),
            "alice",
        )
        .await;
    assert_eq!(status, 404);
}
