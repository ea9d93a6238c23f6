use std::collections::HashMap;
use std::env;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, ensure, Context, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Method, Request};
use axum::Router;
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::PgConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use http_body_util::BodyExt;
use lexdraft::config::AppConfig;
use lexdraft::db::{self, PgPool};
use lexdraft::extract::{ExtractError, ExtractedText, TextExtractor};
use lexdraft::llm::{CompletionRequest, LanguageModel, LlmError};
use lexdraft::models::{NewDocument, NewFirm, NewLetterTemplate, NewUser};
use lexdraft::routes;
use lexdraft::state::AppState;
use lexdraft::storage::ObjectStorage;
use once_cell::sync::Lazy;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::Mutex;
use tower::util::ServiceExt;
use uuid::Uuid;

const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

static DB_LOCK: Lazy<Mutex<()>> = Lazy::new(|| Mutex::new(()));

pub const CANNED_LETTER_HTML: &str = "<h1>Demand Letter</h1>\
<p>We represent <strong>the claimant</strong> in this matter.</p>\
<ul><li>Medical expenses</li><li>Lost wages</li></ul>";

#[allow(dead_code)]
#[derive(Clone)]
pub struct StoredObject {
    pub key: String,
    pub bytes: Vec<u8>,
    pub content_type: Option<String>,
    pub content_disposition: Option<String>,
}

#[derive(Default)]
pub struct FakeStorage {
    objects: Mutex<HashMap<String, StoredObject>>,
}

#[async_trait]
impl ObjectStorage for FakeStorage {
    async fn put_object(
        &self,
        key: &str,
        bytes: Vec<u8>,
        content_type: Option<String>,
        content_disposition: Option<String>,
    ) -> Result<()> {
        let stored = StoredObject {
            key: key.to_string(),
            bytes,
            content_type,
            content_disposition,
        };
        let mut guard = self.objects.lock().await;
        guard.insert(stored.key.clone(), stored);
        Ok(())
    }

    async fn get_object(&self, key: &str) -> Result<Vec<u8>> {
        let guard = self.objects.lock().await;
        guard
            .get(key)
            .map(|obj| obj.bytes.clone())
            .ok_or_else(|| anyhow!("object {key} missing"))
    }

    async fn delete_object(&self, key: &str) -> Result<()> {
        let mut guard = self.objects.lock().await;
        guard.remove(key);
        Ok(())
    }

    async fn presign_get_object(&self, key: &str, expires_in: Duration) -> Result<String> {
        let guard = self.objects.lock().await;
        ensure!(guard.contains_key(key), "object {key} missing");
        Ok(format!(
            "https://fake-storage/{key}?expires_in={}",
            expires_in.as_secs()
        ))
    }
}

impl FakeStorage {
    #[allow(dead_code)]
    pub async fn get(&self, key: &str) -> Option<StoredObject> {
        let guard = self.objects.lock().await;
        guard.get(key).cloned()
    }

    #[allow(dead_code)]
    pub async fn object_count(&self) -> usize {
        let guard = self.objects.lock().await;
        guard.len()
    }
}

/// Treats everything after the `%PDF-` header as the document's text. Bodies
/// containing the literal `UNREADABLE` fail extraction.
pub struct FakeExtractor;

impl TextExtractor for FakeExtractor {
    fn extract(&self, bytes: &[u8]) -> Result<ExtractedText, ExtractError> {
        if !bytes.starts_with(b"%PDF-") {
            return Err(ExtractError::NotAPdf);
        }
        let text = String::from_utf8_lossy(&bytes[5..]).to_string();
        if text.contains("UNREADABLE") {
            return Err(ExtractError::Unreadable("simulated failure".to_string()));
        }
        Ok(ExtractedText {
            text,
            page_count: 1,
        })
    }
}

/// Records every completion request and replies from a canned queue, falling
/// back to [`CANNED_LETTER_HTML`].
#[derive(Default)]
pub struct FakeLlm {
    requests: Mutex<Vec<CompletionRequest>>,
    responses: Mutex<Vec<String>>,
}

impl FakeLlm {
    #[allow(dead_code)]
    pub async fn push_response(&self, response: impl Into<String>) {
        self.responses.lock().await.push(response.into());
    }

    #[allow(dead_code)]
    pub async fn requests(&self) -> Vec<CompletionRequest> {
        self.requests.lock().await.clone()
    }
}

#[async_trait]
impl LanguageModel for FakeLlm {
    async fn complete(&self, request: CompletionRequest) -> Result<String, LlmError> {
        self.requests.lock().await.push(request);
        let mut responses = self.responses.lock().await;
        if responses.is_empty() {
            Ok(CANNED_LETTER_HTML.to_string())
        } else {
            Ok(responses.remove(0))
        }
    }
}

pub struct TestApp {
    pub state: AppState,
    router: Router,
    storage: Arc<FakeStorage>,
    llm: Arc<FakeLlm>,
}

impl TestApp {
    /// Returns `None` when TEST_DATABASE_URL is not set so test runs without
    /// a database skip instead of failing.
    pub async fn new() -> Result<Option<Self>> {
        let Ok(database_url) = env::var("TEST_DATABASE_URL") else {
            eprintln!("TEST_DATABASE_URL not set, skipping integration test");
            return Ok(None);
        };

        let config = AppConfig {
            database_url: database_url.clone(),
            database_max_pool_size: db::DEFAULT_MAX_POOL_SIZE,
            server_host: "127.0.0.1".to_string(),
            server_port: 0,
            cors_allowed_origin: None,
            aws_endpoint_url: None,
            aws_access_key_id: None,
            aws_secret_access_key: None,
            aws_region: "us-east-1".to_string(),
            s3_bucket: "test-bucket".to_string(),
            openai_api_key: "test-key".to_string(),
            openai_model: "gpt-4".to_string(),
            openai_temperature: 0.7,
            openai_max_tokens: 2000,
            prompt_max_context_chars: 60_000,
            presign_expiry_seconds: 3600,
        };

        let pool = db::init_pool_with_size(&config.database_url, config.database_max_pool_size)?;
        prepare_database(&pool).await?;

        let storage = Arc::new(FakeStorage::default());
        let storage_for_state: Arc<dyn ObjectStorage> = storage.clone();
        let llm = Arc::new(FakeLlm::default());
        let llm_for_state: Arc<dyn LanguageModel> = llm.clone();
        let state = AppState::new(
            pool.clone(),
            config,
            storage_for_state,
            Arc::new(FakeExtractor),
            llm_for_state,
        );
        let router = routes::create_router(state.clone());

        Ok(Some(Self {
            state,
            router,
            storage,
            llm,
        }))
    }

    pub async fn cleanup(&self) -> Result<()> {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get cleanup connection: {err}"))?;
            truncate_all(&mut conn)?;
            Ok(())
        })
        .await
        .context("cleanup task panicked")?
    }

    #[allow(dead_code)]
    pub fn storage(&self) -> Arc<FakeStorage> {
        self.storage.clone()
    }

    #[allow(dead_code)]
    pub fn llm(&self) -> Arc<FakeLlm> {
        self.llm.clone()
    }

    pub async fn insert_firm(&self, name: &str) -> Result<Uuid> {
        let name = name.to_string();
        self.with_conn(move |conn| {
            let firm = NewFirm {
                id: Uuid::new_v4(),
                name,
            };
            diesel::insert_into(lexdraft::schema::firms::table)
                .values(&firm)
                .execute(conn)
                .context("failed to insert firm")?;
            Ok(firm.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_user(&self, firm_id: Uuid, email: &str) -> Result<Uuid> {
        let email = email.to_string();
        self.with_conn(move |conn| {
            let user = NewUser {
                id: Uuid::new_v4(),
                firm_id,
                email: email.clone(),
                display_name: email,
            };
            diesel::insert_into(lexdraft::schema::users::table)
                .values(&user)
                .execute(conn)
                .context("failed to insert user")?;
            Ok(user.id)
        })
        .await
    }

    /// Inserts a document row and seeds the fake storage so extraction of the
    /// given text succeeds.
    #[allow(dead_code)]
    pub async fn insert_document(&self, firm_id: Uuid, filename: &str, text: &str) -> Result<Uuid> {
        let document_id = Uuid::new_v4();
        let bytes = format!("%PDF-{text}").into_bytes();
        let s3_key = format!("{firm_id}/documents/{document_id}/{filename}");
        self.storage
            .put_object(
                &s3_key,
                bytes.clone(),
                Some("application/pdf".to_string()),
                None,
            )
            .await?;

        let filename = filename.to_string();
        self.with_conn(move |conn| {
            let document = NewDocument {
                id: document_id,
                firm_id,
                uploaded_by: None,
                filename,
                content_type: "application/pdf".to_string(),
                size_bytes: bytes.len() as i64,
                s3_key,
                checksum: hex::encode(Sha256::digest(&bytes)),
            };
            diesel::insert_into(lexdraft::schema::documents::table)
                .values(&document)
                .execute(conn)
                .context("failed to insert document")?;
            Ok(document.id)
        })
        .await
    }

    #[allow(dead_code)]
    pub async fn insert_template(
        &self,
        firm_id: Uuid,
        name: &str,
        sections: &[&str],
        is_default: bool,
    ) -> Result<Uuid> {
        let name = name.to_string();
        let sections = serde_json::json!(sections);
        self.with_conn(move |conn| {
            let template = NewLetterTemplate {
                id: Uuid::new_v4(),
                firm_id,
                name,
                letterhead_text: Some("Test Firm LLP".to_string()),
                opening_paragraph: Some("We write on behalf of our client.".to_string()),
                closing_paragraph: Some("We look forward to your response.".to_string()),
                sections,
                is_default,
                created_by: None,
            };
            diesel::insert_into(lexdraft::schema::letter_templates::table)
                .values(&template)
                .execute(conn)
                .context("failed to insert template")?;
            Ok(template.id)
        })
        .await
    }

    pub async fn post_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
        user: Option<Uuid>,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let mut builder = Request::builder()
            .method(Method::POST)
            .uri(path)
            .header("content-type", "application/json");
        if let Some(user) = user {
            builder = builder.header("x-user-id", user.to_string());
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn patch_json<T: Serialize + ?Sized>(
        &self,
        path: &str,
        payload: &T,
    ) -> Result<hyper::Response<Body>> {
        let body = serde_json::to_vec(payload)?;
        let request = Request::builder()
            .method(Method::PATCH)
            .uri(path)
            .header("content-type", "application/json")
            .body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    pub async fn get(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(path)
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn delete(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::DELETE)
            .uri(path)
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn post_empty(&self, path: &str) -> Result<hyper::Response<Body>> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(path)
            .body(Body::empty())?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    #[allow(dead_code)]
    pub async fn upload_document(
        &self,
        path: &str,
        filename: &str,
        content_type: &str,
        data: &[u8],
        user: Option<Uuid>,
    ) -> Result<hyper::Response<Body>> {
        let boundary = format!("boundary-{}", Uuid::new_v4());
        let mut body = Vec::new();
        body.extend(format!("--{boundary}\r\n").as_bytes());
        body.extend(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{}\"\r\n",
                filename
            )
            .as_bytes(),
        );
        body.extend(format!("Content-Type: {}\r\n\r\n", content_type).as_bytes());
        body.extend(data);
        body.extend(b"\r\n");
        body.extend(format!("--{boundary}--\r\n").as_bytes());

        let mut builder = Request::builder().method(Method::POST).uri(path).header(
            "content-type",
            format!("multipart/form-data; boundary={boundary}"),
        );
        if let Some(user) = user {
            builder = builder.header("x-user-id", user.to_string());
        }
        let request = builder.body(Body::from(body))?;
        Ok(self
            .router
            .clone()
            .oneshot(request)
            .await
            .expect("infallible response"))
    }

    async fn with_conn<F, T>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&mut PgConnection) -> Result<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.state.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = pool
                .get()
                .map_err(|err| anyhow!("failed to get database connection: {err}"))?;
            f(&mut conn)
        })
        .await
        .context("connection task panicked")?
    }
}

pub async fn acquire_db_lock() -> tokio::sync::MutexGuard<'static, ()> {
    DB_LOCK.lock().await
}

pub async fn body_to_vec(body: Body) -> Result<Vec<u8>> {
    let collected = body
        .collect()
        .await
        .map_err(|err| anyhow!("failed to read response body: {err}"))?;
    Ok(collected.to_bytes().to_vec())
}

async fn prepare_database(pool: &PgPool) -> Result<()> {
    let pool = pool.clone();
    tokio::task::spawn_blocking(move || -> Result<()> {
        let mut conn = pool
            .get()
            .map_err(|err| anyhow!("failed to acquire connection: {err}"))?;
        conn.run_pending_migrations(MIGRATIONS)
            .map_err(|err| anyhow!("failed to run migrations: {err}"))?;
        truncate_all(&mut conn)?;
        Ok(())
    })
    .await
    .context("migration task panicked")?
}

fn truncate_all(conn: &mut PgConnection) -> Result<()> {
    conn.batch_execute(
        "TRUNCATE TABLE letter_documents, letters, letter_templates, documents, users, firms RESTART IDENTITY CASCADE;",
    )
    .context("failed to truncate tables")?;
    Ok(())
}
