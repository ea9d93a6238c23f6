use std::time::Duration;

use axum::extract::{Json, Multipart, Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Document, NewDocument};
use crate::request_user::RequestUser;
use crate::schema::{documents, firms};
use crate::state::AppState;

const PRESIGNED_URL_EXPIRY_SECONDS: u64 = 300;

#[derive(Serialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub firm_id: Uuid,
    pub uploaded_by: Option<Uuid>,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub checksum: String,
    pub uploaded_at: DateTime<Utc>,
}

impl From<Document> for DocumentResponse {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            firm_id: doc.firm_id,
            uploaded_by: doc.uploaded_by,
            filename: doc.filename,
            content_type: doc.content_type,
            size_bytes: doc.size_bytes,
            checksum: doc.checksum,
            uploaded_at: doc.uploaded_at,
        }
    }
}

#[derive(Serialize)]
pub struct DownloadResponse {
    pub url: String,
    pub filename: String,
    pub expires_in_seconds: u64,
}

fn is_pdf(content_type: Option<&str>, filename: &str) -> bool {
    if content_type == Some("application/pdf") {
        return true;
    }
    filename.to_ascii_lowercase().ends_with(".pdf")
}

/// Keeps the filename key-safe: alphanumerics, dot, underscore, hyphen.
fn sanitize_filename(filename: &str) -> String {
    let cleaned: String = filename
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() || matches!(ch, '.' | '_' | '-') {
                ch
            } else {
                '_'
            }
        })
        .collect();
    if cleaned.trim_matches('_').is_empty() {
        "document.pdf".to_string()
    } else {
        cleaned
    }
}

fn firm_exists(conn: &mut crate::state::PgPooledConnection, firm_id: Uuid) -> AppResult<()> {
    let found = diesel::select(diesel::dsl::exists(
        firms::table.filter(firms::id.eq(firm_id)),
    ))
    .get_result::<bool>(conn)?;
    if found {
        Ok(())
    } else {
        Err(AppError::not_found())
    }
}

pub async fn upload_document(
    State(state): State<AppState>,
    Path(firm_id): Path<Uuid>,
    user: RequestUser,
    mut multipart: Multipart,
) -> AppResult<(StatusCode, Json<DocumentResponse>)> {
    let mut file_bytes: Option<Vec<u8>> = None;
    let mut original_name: Option<String> = None;
    let mut content_type: Option<String> = None;

    while let Some(field) = multipart.next_field().await.map_err(|err| {
        error!(error = %err, "invalid multipart data");
        AppError::bad_request(format!("invalid multipart data: {err}"))
    })? {
        if field.name() == Some("file") {
            original_name = field.file_name().map(|n| n.to_string());
            content_type = field.content_type().map(|mime| mime.to_string());
            let data = field.bytes().await.map_err(|err| {
                error!(error = %err, "failed to read file bytes");
                AppError::bad_request(format!("failed to read file bytes: {err}"))
            })?;
            file_bytes = Some(data.to_vec());
        }
    }

    let file_bytes = file_bytes.ok_or_else(|| AppError::bad_request("file field is required"))?;
    if file_bytes.is_empty() {
        return Err(AppError::bad_request("file field must not be empty"));
    }
    let original_name =
        original_name.ok_or_else(|| AppError::bad_request("filename is required"))?;

    if !is_pdf(content_type.as_deref(), &original_name) {
        return Err(AppError::unprocessable("only PDF documents are accepted"));
    }

    {
        let mut conn = state.db()?;
        firm_exists(&mut conn, firm_id)?;
    }

    let document_id = Uuid::new_v4();
    let safe_name = sanitize_filename(&original_name);
    let s3_key = format!("{firm_id}/documents/{document_id}/{safe_name}");
    let checksum = hex::encode(Sha256::digest(&file_bytes));
    let size_bytes = file_bytes.len() as i64;
    let content_type = content_type.unwrap_or_else(|| {
        mime_guess::from_path(&original_name)
            .first_or_octet_stream()
            .to_string()
    });

    state
        .storage
        .put_object(&s3_key, file_bytes, Some(content_type.clone()), None)
        .await
        .map_err(|err| {
            error!(error = ?err, key = %s3_key, "document upload to storage failed");
            AppError::internal("failed to store document")
        })?;

    let new_document = NewDocument {
        id: document_id,
        firm_id,
        uploaded_by: user.0,
        filename: original_name,
        content_type,
        size_bytes,
        s3_key,
        checksum,
    };

    let mut conn = state.db()?;
    let document: Document = diesel::insert_into(documents::table)
        .values(&new_document)
        .get_result(&mut conn)?;

    info!(
        document_id = %document.id,
        firm_id = %firm_id,
        size_bytes,
        "document uploaded"
    );
    Ok((StatusCode::CREATED, Json(document.into())))
}

pub async fn list_documents(
    State(state): State<AppState>,
    Path(firm_id): Path<Uuid>,
) -> AppResult<Json<Vec<DocumentResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<Document> = documents::table
        .filter(documents::firm_id.eq(firm_id))
        .order(documents::uploaded_at.desc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

fn load_document(
    conn: &mut crate::state::PgPooledConnection,
    firm_id: Uuid,
    document_id: Uuid,
) -> AppResult<Document> {
    documents::table
        .filter(documents::id.eq(document_id))
        .filter(documents::firm_id.eq(firm_id))
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)
}

pub async fn get_document(
    State(state): State<AppState>,
    Path((firm_id, document_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<DocumentResponse>> {
    let mut conn = state.db()?;
    let document = load_document(&mut conn, firm_id, document_id)?;
    Ok(Json(document.into()))
}

pub async fn download_document(
    State(state): State<AppState>,
    Path((firm_id, document_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<DownloadResponse>> {
    let document = {
        let mut conn = state.db()?;
        load_document(&mut conn, firm_id, document_id)?
    };

    let url = state
        .storage
        .presign_get_object(
            &document.s3_key,
            Duration::from_secs(PRESIGNED_URL_EXPIRY_SECONDS),
        )
        .await
        .map_err(|err| {
            error!(error = ?err, key = %document.s3_key, "presign failed");
            AppError::internal("failed to create download link")
        })?;

    Ok(Json(DownloadResponse {
        url,
        filename: document.filename,
        expires_in_seconds: PRESIGNED_URL_EXPIRY_SECONDS,
    }))
}

pub async fn delete_document(
    State(state): State<AppState>,
    Path((firm_id, document_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let document = {
        let mut conn = state.db()?;
        load_document(&mut conn, firm_id, document_id)?
    };

    // Blob failures must not strand the row.
    if let Err(err) = state.storage.delete_object(&document.s3_key).await {
        warn!(error = ?err, key = %document.s3_key, "blob delete failed, removing row anyway");
    }

    let mut conn = state.db()?;
    diesel::delete(
        documents::table
            .filter(documents::id.eq(document_id))
            .filter(documents::firm_id.eq(firm_id)),
    )
    .execute(&mut conn)?;

    info!(document_id = %document_id, firm_id = %firm_id, "document deleted");
    Ok(StatusCode::NO_CONTENT)
}
