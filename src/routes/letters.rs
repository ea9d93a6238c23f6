use std::time::Duration;

use axum::extract::{Json, Path, Query, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::docx::{export_filename, html_to_docx_bytes, DOCX_CONTENT_TYPE};
use crate::error::{AppError, AppResult};
use crate::generation::{generate_letter, GenerateLetterRequest};
use crate::models::{
    clamp_letter_title, Document, Letter, LETTER_STATUS_CREATED, LETTER_STATUS_DRAFT,
};
use crate::request_user::RequestUser;
use crate::schema::{documents, letter_documents, letters};
use crate::state::{AppState, PgPooledConnection};

const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

#[derive(Deserialize)]
pub struct LetterListQuery {
    pub page: Option<i64>,
    pub page_size: Option<i64>,
    pub sort_by: Option<String>,
    pub sort_order: Option<String>,
}

#[derive(Serialize)]
pub struct LetterResponse {
    pub id: Uuid,
    pub firm_id: Uuid,
    pub created_by: Option<Uuid>,
    pub title: String,
    pub content: String,
    pub status: String,
    pub template_id: Option<Uuid>,
    pub docx_s3_key: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<Letter> for LetterResponse {
    fn from(letter: Letter) -> Self {
        Self {
            id: letter.id,
            firm_id: letter.firm_id,
            created_by: letter.created_by,
            title: letter.title,
            content: letter.content,
            status: letter.status,
            template_id: letter.template_id,
            docx_s3_key: letter.docx_s3_key,
            created_at: letter.created_at,
            updated_at: letter.updated_at,
        }
    }
}

#[derive(Serialize)]
pub struct LetterListResponse {
    pub letters: Vec<LetterResponse>,
    pub total: i64,
    pub page: i64,
    pub page_size: i64,
}

#[derive(Serialize)]
pub struct SourceDocumentResponse {
    pub id: Uuid,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
}

#[derive(Serialize)]
pub struct LetterDetailResponse {
    #[serde(flatten)]
    pub letter: LetterResponse,
    pub documents: Vec<SourceDocumentResponse>,
    pub download_url: Option<String>,
}

#[derive(Deserialize)]
pub struct UpdateLetterRequest {
    pub title: Option<String>,
    pub content: Option<String>,
}

#[derive(Serialize)]
pub struct ExportResponse {
    pub url: String,
    pub filename: String,
    pub status: String,
}

fn attachment_content_disposition(filename: &str) -> String {
    let encoded =
        percent_encoding::utf8_percent_encode(filename, percent_encoding::NON_ALPHANUMERIC);
    format!("attachment; filename=\"{filename}\"; filename*=UTF-8''{encoded}")
}

fn load_letter(
    conn: &mut PgPooledConnection,
    firm_id: Uuid,
    letter_id: Uuid,
) -> AppResult<Letter> {
    letters::table
        .filter(letters::id.eq(letter_id))
        .filter(letters::firm_id.eq(firm_id))
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)
}

pub async fn generate(
    State(state): State<AppState>,
    Path(firm_id): Path<Uuid>,
    user: RequestUser,
    Json(payload): Json<GenerateLetterRequest>,
) -> AppResult<(StatusCode, Json<LetterResponse>)> {
    let letter = generate_letter(&state, firm_id, user.0, payload).await?;
    Ok((StatusCode::CREATED, Json(letter.into())))
}

pub async fn list_letters(
    State(state): State<AppState>,
    Path(firm_id): Path<Uuid>,
    Query(query): Query<LetterListQuery>,
) -> AppResult<Json<LetterListResponse>> {
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query
        .page_size
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .clamp(1, MAX_PAGE_SIZE);
    let sort_by = query.sort_by.as_deref().unwrap_or("created_at");
    let ascending = matches!(query.sort_order.as_deref(), Some("asc"));

    let mut conn = state.db()?;
    let total: i64 = letters::table
        .filter(letters::firm_id.eq(firm_id))
        .count()
        .get_result(&mut conn)?;

    let mut rows = letters::table
        .filter(letters::firm_id.eq(firm_id))
        .into_boxed();
    rows = match (sort_by, ascending) {
        ("title", true) => rows.order(letters::title.asc()),
        ("title", false) => rows.order(letters::title.desc()),
        ("status", true) => rows.order(letters::status.asc()),
        ("status", false) => rows.order(letters::status.desc()),
        ("updated_at", true) => rows.order(letters::updated_at.asc()),
        ("updated_at", false) => rows.order(letters::updated_at.desc()),
        ("created_at", true) => rows.order(letters::created_at.asc()),
        ("created_at", false) => rows.order(letters::created_at.desc()),
        _ => {
            return Err(AppError::unprocessable(
                "sort_by must be one of created_at, updated_at, title, status",
            ))
        }
    };

    let page_rows: Vec<Letter> = rows
        .limit(page_size)
        .offset((page - 1) * page_size)
        .load(&mut conn)?;

    Ok(Json(LetterListResponse {
        letters: page_rows.into_iter().map(Into::into).collect(),
        total,
        page,
        page_size,
    }))
}

pub async fn get_letter(
    State(state): State<AppState>,
    Path((firm_id, letter_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<LetterDetailResponse>> {
    let (letter, source_documents) = {
        let mut conn = state.db()?;
        let letter = load_letter(&mut conn, firm_id, letter_id)?;
        let source_documents: Vec<Document> = letter_documents::table
            .inner_join(documents::table)
            .filter(letter_documents::letter_id.eq(letter.id))
            .select(documents::all_columns)
            .order(letter_documents::linked_at.asc())
            .load(&mut conn)?;
        (letter, source_documents)
    };

    // A broken signing setup should not make the letter unreadable.
    let download_url = match &letter.docx_s3_key {
        Some(key) => match state
            .storage
            .presign_get_object(key, Duration::from_secs(state.config.presign_expiry_seconds))
            .await
        {
            Ok(url) => Some(url),
            Err(err) => {
                warn!(error = ?err, key = %key, "presign failed for letter export");
                None
            }
        },
        None => None,
    };

    Ok(Json(LetterDetailResponse {
        letter: letter.into(),
        documents: source_documents
            .into_iter()
            .map(|doc| SourceDocumentResponse {
                id: doc.id,
                filename: doc.filename,
                content_type: doc.content_type,
                size_bytes: doc.size_bytes,
            })
            .collect(),
        download_url,
    }))
}

pub async fn update_letter(
    State(state): State<AppState>,
    Path((firm_id, letter_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateLetterRequest>,
) -> AppResult<Json<LetterResponse>> {
    if payload.title.is_none() && payload.content.is_none() {
        return Err(AppError::unprocessable(
            "at least one of title or content is required",
        ));
    }
    if let Some(title) = payload.title.as_deref() {
        if title.trim().is_empty() {
            return Err(AppError::unprocessable("title must not be empty"));
        }
    }

    let mut conn = state.db()?;
    let existing = load_letter(&mut conn, firm_id, letter_id)?;

    let letter: Letter = diesel::update(letters::table.find(existing.id))
        .set((
            letters::title.eq(payload
                .title
                .map(|t| clamp_letter_title(t.trim()))
                .unwrap_or(existing.title)),
            letters::content.eq(payload.content.unwrap_or(existing.content)),
            letters::updated_at.eq(Utc::now()),
        ))
        .get_result(&mut conn)?;

    Ok(Json(letter.into()))
}

pub async fn delete_letter(
    State(state): State<AppState>,
    Path((firm_id, letter_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let letter = {
        let mut conn = state.db()?;
        load_letter(&mut conn, firm_id, letter_id)?
    };

    if let Some(key) = &letter.docx_s3_key {
        if let Err(err) = state.storage.delete_object(key).await {
            warn!(error = ?err, key = %key, "export blob delete failed, removing row anyway");
        }
    }

    let mut conn = state.db()?;
    diesel::delete(
        letters::table
            .filter(letters::id.eq(letter_id))
            .filter(letters::firm_id.eq(firm_id)),
    )
    .execute(&mut conn)?;

    info!(letter_id = %letter_id, firm_id = %firm_id, "letter deleted");
    Ok(StatusCode::NO_CONTENT)
}

/// Renders the letter's current content, uploads it under a filename-derived
/// key, drops the previous blob when the key rotated, and returns the new key
/// with a signed URL. Shared by finalize and export.
async fn render_and_store(state: &AppState, letter: &Letter) -> AppResult<(String, String, String)> {
    let filename = export_filename(&letter.title, Utc::now().date_naive());
    let key = format!("{}/letters/{}/{}", letter.firm_id, letter.id, filename);

    let bytes = html_to_docx_bytes(&letter.content).map_err(|err| {
        error!(error = %err, letter_id = %letter.id, "docx rendering failed");
        AppError::internal("failed to render letter document")
    })?;

    state
        .storage
        .put_object(
            &key,
            bytes,
            Some(DOCX_CONTENT_TYPE.to_string()),
            Some(attachment_content_disposition(&filename)),
        )
        .await
        .map_err(|err| {
            error!(error = ?err, key = %key, "export upload failed");
            AppError::internal("failed to store letter document")
        })?;

    if let Some(old_key) = &letter.docx_s3_key {
        if old_key != &key {
            if let Err(err) = state.storage.delete_object(old_key).await {
                warn!(error = ?err, key = %old_key, "stale export blob delete failed");
            }
        }
    }

    let url = state
        .storage
        .presign_get_object(&key, Duration::from_secs(state.config.presign_expiry_seconds))
        .await
        .map_err(|err| {
            error!(error = ?err, key = %key, "presign failed");
            AppError::internal("failed to create download link")
        })?;

    Ok((key, url, filename))
}

pub async fn finalize_letter(
    State(state): State<AppState>,
    Path((firm_id, letter_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ExportResponse>> {
    let letter = {
        let mut conn = state.db()?;
        load_letter(&mut conn, firm_id, letter_id)?
    };
    // Re-runnable from either status; finalizing again just regenerates.
    if letter.status != LETTER_STATUS_DRAFT && letter.status != LETTER_STATUS_CREATED {
        return Err(AppError::unprocessable(format!(
            "letter cannot be finalized from status '{}'",
            letter.status
        )));
    }

    let (key, url, filename) = render_and_store(&state, &letter).await?;

    let mut conn = state.db()?;
    diesel::update(letters::table.find(letter.id))
        .set((
            letters::status.eq(LETTER_STATUS_CREATED),
            letters::docx_s3_key.eq(Some(key)),
            letters::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

    info!(letter_id = %letter.id, firm_id = %firm_id, "letter finalized");
    Ok(Json(ExportResponse {
        url,
        filename,
        status: LETTER_STATUS_CREATED.to_string(),
    }))
}

pub async fn export_letter(
    State(state): State<AppState>,
    Path((firm_id, letter_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<ExportResponse>> {
    let letter = {
        let mut conn = state.db()?;
        load_letter(&mut conn, firm_id, letter_id)?
    };

    // Always rendered from the current content; a cached blob is never served.
    let (key, url, filename) = render_and_store(&state, &letter).await?;

    let mut conn = state.db()?;
    diesel::update(letters::table.find(letter.id))
        .set((
            letters::docx_s3_key.eq(Some(key)),
            letters::updated_at.eq(Utc::now()),
        ))
        .execute(&mut conn)?;

    info!(letter_id = %letter.id, firm_id = %firm_id, "letter exported");
    Ok(Json(ExportResponse {
        url,
        filename,
        status: letter.status,
    }))
}
