//! Letter generation orchestration: load inputs, extract text, prompt the
//! model, sanitize the draft, persist letter and join rows in one
//! transaction. No blob writes happen here; export is a separate step.

use std::collections::HashSet;
use std::sync::Arc;

use diesel::prelude::*;
use serde::Deserialize;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::AppError;
use crate::extract::{ExtractError, TextExtractor};
use crate::llm::{CompletionRequest, LlmError};
use crate::models::{Document, Letter, LetterTemplate, NewLetter, NewLetterDocument};
use crate::prompt::{build_letter_prompt, DocumentContext};
use crate::sanitize::{looks_like_html, sanitize_html};
use crate::schema::{documents, letter_documents, letter_templates, letters};
use crate::state::AppState;

pub const MAX_SOURCE_DOCUMENTS: usize = 5;

#[derive(Debug, Deserialize)]
pub struct GenerateLetterRequest {
    pub template_id: Uuid,
    pub document_ids: Vec<Uuid>,
    pub title: Option<String>,
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("document_ids must contain between 1 and {MAX_SOURCE_DOCUMENTS} entries")]
    BadDocumentCount(usize),
    #[error("document_ids must not contain duplicates")]
    DuplicateDocuments,
    #[error("template not found")]
    TemplateNotFound,
    #[error("document {0} not found")]
    DocumentNotFound(Uuid),
    #[error("could not read text from '{filename}': {source}")]
    Extraction {
        filename: String,
        source: ExtractError,
    },
    #[error("no text could be extracted from the selected documents")]
    NoExtractedText,
    #[error("language model request failed")]
    Llm(#[source] LlmError),
    #[error("language model did not return usable letter content")]
    ImplausibleOutput,
    #[error("storage error")]
    Storage(#[source] anyhow::Error),
    #[error("database pool error: {0}")]
    Pool(String),
    #[error("database error")]
    Db(#[from] diesel::result::Error),
    #[error("extraction task failed")]
    Join(#[from] tokio::task::JoinError),
}

impl From<GenerateError> for AppError {
    fn from(err: GenerateError) -> Self {
        match &err {
            GenerateError::BadDocumentCount(_) | GenerateError::DuplicateDocuments => {
                AppError::unprocessable(err.to_string())
            }
            GenerateError::TemplateNotFound | GenerateError::DocumentNotFound(_) => {
                AppError::not_found()
            }
            GenerateError::Extraction { .. } | GenerateError::NoExtractedText => {
                AppError::unprocessable(err.to_string())
            }
            GenerateError::Llm(_) | GenerateError::ImplausibleOutput => AppError::bad_gateway(
                "letter generation is temporarily unavailable, please try again",
            ),
            GenerateError::Storage(_)
            | GenerateError::Pool(_)
            | GenerateError::Db(_)
            | GenerateError::Join(_) => AppError::internal(err),
        }
    }
}

pub async fn generate_letter(
    state: &AppState,
    firm_id: Uuid,
    created_by: Option<Uuid>,
    request: GenerateLetterRequest,
) -> Result<Letter, GenerateError> {
    let count = request.document_ids.len();
    if count == 0 || count > MAX_SOURCE_DOCUMENTS {
        return Err(GenerateError::BadDocumentCount(count));
    }
    let unique: HashSet<Uuid> = request.document_ids.iter().copied().collect();
    if unique.len() != count {
        return Err(GenerateError::DuplicateDocuments);
    }

    let (template, source_documents) = {
        let mut conn = state
            .db()
            .map_err(|err| GenerateError::Pool(err.message().to_string()))?;

        let template: LetterTemplate = letter_templates::table
            .filter(letter_templates::id.eq(request.template_id))
            .filter(letter_templates::firm_id.eq(firm_id))
            .first(&mut conn)
            .optional()?
            .ok_or(GenerateError::TemplateNotFound)?;

        let loaded: Vec<Document> = documents::table
            .filter(documents::firm_id.eq(firm_id))
            .filter(documents::id.eq_any(&request.document_ids))
            .load(&mut conn)?;

        // Preserve the caller's ordering for prompt labeling.
        let mut ordered = Vec::with_capacity(count);
        for id in &request.document_ids {
            let doc = loaded
                .iter()
                .find(|d| d.id == *id)
                .cloned()
                .ok_or(GenerateError::DocumentNotFound(*id))?;
            ordered.push(doc);
        }
        (template, ordered)
    };

    let mut contexts = Vec::with_capacity(count);
    let mut non_empty = 0usize;
    for doc in &source_documents {
        let bytes = state
            .storage
            .get_object(&doc.s3_key)
            .await
            .map_err(GenerateError::Storage)?;

        let extractor: Arc<dyn TextExtractor> = Arc::clone(&state.extractor);
        let extracted = tokio::task::spawn_blocking(move || extractor.extract(&bytes))
            .await?
            .map_err(|source| GenerateError::Extraction {
                filename: doc.filename.clone(),
                source,
            })?;

        if extracted.text.trim().is_empty() {
            warn!(document_id = %doc.id, "document yielded no text, using empty context");
        } else {
            non_empty += 1;
        }
        contexts.push(DocumentContext {
            document_id: doc.id,
            filename: doc.filename.clone(),
            text: extracted.text,
        });
    }
    if non_empty == 0 {
        return Err(GenerateError::NoExtractedText);
    }

    let prompt = build_letter_prompt(&template, &contexts, state.config.prompt_max_context_chars);
    let completion = state
        .llm
        .complete(CompletionRequest {
            system: prompt.system,
            user: prompt.user,
            temperature: state.config.openai_temperature,
            max_tokens: state.config.openai_max_tokens,
        })
        .await
        .map_err(|err| {
            warn!(error = %err, "language model call failed");
            GenerateError::Llm(err)
        })?;

    if !looks_like_html(&completion) {
        warn!("model output failed the html plausibility check");
        return Err(GenerateError::ImplausibleOutput);
    }
    let content = sanitize_html(&completion);

    let title = request
        .title
        .as_deref()
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .unwrap_or_else(|| format!("Demand Letter - {}", template.name));
    let title = crate::models::clamp_letter_title(&title);

    let new_letter = NewLetter {
        id: Uuid::new_v4(),
        firm_id,
        created_by,
        title,
        content,
        status: crate::models::LETTER_STATUS_DRAFT.to_string(),
        template_id: Some(template.id),
    };

    let mut conn = state
        .db()
        .map_err(|err| GenerateError::Pool(err.message().to_string()))?;
    let letter = conn.transaction::<Letter, diesel::result::Error, _>(|conn| {
        let letter: Letter = diesel::insert_into(letters::table)
            .values(&new_letter)
            .get_result(conn)?;

        let joins: Vec<NewLetterDocument> = source_documents
            .iter()
            .map(|doc| NewLetterDocument {
                letter_id: letter.id,
                document_id: doc.id,
            })
            .collect();
        diesel::insert_into(letter_documents::table)
            .values(&joins)
            .execute(conn)?;

        Ok(letter)
    })?;

    info!(
        letter_id = %letter.id,
        firm_id = %firm_id,
        template_id = %template.id,
        documents = count,
        "generated letter draft"
    );
    Ok(letter)
}
