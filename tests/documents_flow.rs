mod common;

use anyhow::Result;
use axum::http::StatusCode;
use common::{acquire_db_lock, body_to_vec, TestApp};
use serde::Deserialize;
use uuid::Uuid;

#[derive(Deserialize)]
struct DocumentBody {
    id: Uuid,
    filename: String,
    content_type: String,
    size_bytes: i64,
    checksum: String,
    uploaded_by: Option<Uuid>,
}

#[derive(Deserialize)]
struct DownloadBody {
    url: String,
    filename: String,
    expires_in_seconds: u64,
}

async fn parse<T: serde::de::DeserializeOwned>(
    response: hyper::Response<axum::body::Body>,
) -> Result<T> {
    let bytes = body_to_vec(response.into_body()).await?;
    Ok(serde_json::from_slice(&bytes)?)
}

#[tokio::test]
async fn upload_list_and_fetch() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let firm = app.insert_firm("Firm A").await?;
    let user = app.insert_user(firm, "uploader@firm-a.test").await?;
    let payload = b"%PDF-1.7 fake pdf payload";

    let response = app
        .upload_document(
            &format!("/api/firms/{firm}/documents"),
            "police report.pdf",
            "application/pdf",
            payload,
            Some(user),
        )
        .await?;
    assert_eq!(response.status(), StatusCode::CREATED);
    let document: DocumentBody = parse(response).await?;
    assert_eq!(document.filename, "police report.pdf");
    assert_eq!(document.content_type, "application/pdf");
    assert_eq!(document.size_bytes, payload.len() as i64);
    assert_eq!(document.checksum.len(), 64);
    assert_eq!(document.uploaded_by, Some(user));

    let list = app.get(&format!("/api/firms/{firm}/documents")).await?;
    let list: Vec<DocumentBody> = parse(list).await?;
    assert_eq!(list.len(), 1);
    assert_eq!(list[0].id, document.id);

    let fetched = app
        .get(&format!("/api/firms/{firm}/documents/{}", document.id))
        .await?;
    assert_eq!(fetched.status(), StatusCode::OK);

    // The blob landed under the tenant-scoped key.
    let key = format!(
        "{firm}/documents/{}/police_report.pdf",
        document.id
    );
    let stored = app.storage().get(&key).await.expect("blob stored");
    assert_eq!(stored.bytes, payload);

    app.cleanup().await
}

#[tokio::test]
async fn upload_rejects_non_pdf() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let firm = app.insert_firm("Firm A").await?;
    let response = app
        .upload_document(
            &format!("/api/firms/{firm}/documents"),
            "photo.png",
            "image/png",
            b"not a pdf",
            None,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);

    app.cleanup().await
}

#[tokio::test]
async fn download_returns_short_lived_url() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let firm = app.insert_firm("Firm A").await?;
    let doc = app.insert_document(firm, "records.pdf", "text").await?;

    let response = app
        .get(&format!("/api/firms/{firm}/documents/{doc}/download"))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let download: DownloadBody = parse(response).await?;
    assert_eq!(download.filename, "records.pdf");
    assert_eq!(download.expires_in_seconds, 300);
    assert!(download.url.contains(&doc.to_string()));

    app.cleanup().await
}

#[tokio::test]
async fn delete_removes_row_and_blob_and_is_firm_scoped() -> Result<()> {
    let _lock = acquire_db_lock().await;
    let Some(app) = TestApp::new().await? else {
        return Ok(());
    };

    let firm = app.insert_firm("Firm A").await?;
    let other_firm = app.insert_firm("Firm B").await?;
    let doc = app.insert_document(firm, "records.pdf", "text").await?;
    let key = format!("{firm}/documents/{doc}/records.pdf");
    assert!(app.storage().get(&key).await.is_some());

    // Foreign firm gets a 404, not someone else's document.
    let foreign = app
        .get(&format!("/api/firms/{other_firm}/documents/{doc}"))
        .await?;
    assert_eq!(foreign.status(), StatusCode::NOT_FOUND);

    let response = app
        .delete(&format!("/api/firms/{firm}/documents/{doc}"))
        .await?;
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert!(app.storage().get(&key).await.is_none());

    let gone = app
        .get(&format!("/api/firms/{firm}/documents/{doc}"))
        .await?;
    assert_eq!(gone.status(), StatusCode::NOT_FOUND);

    app.cleanup().await
}
