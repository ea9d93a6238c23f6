use axum::extract::{Json, Path, State};
use axum::http::StatusCode;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{LetterTemplate, NewLetterTemplate};
use crate::request_user::RequestUser;
use crate::schema::{letter_templates, letters};
use crate::state::{AppState, PgPooledConnection};

#[derive(Deserialize)]
pub struct CreateTemplateRequest {
    pub name: String,
    pub letterhead_text: Option<String>,
    pub opening_paragraph: Option<String>,
    pub closing_paragraph: Option<String>,
    #[serde(default)]
    pub sections: Vec<String>,
    #[serde(default)]
    pub is_default: bool,
}

// Absent field keeps the stored value; an explicit null clears it.
#[derive(Deserialize)]
pub struct UpdateTemplateRequest {
    pub name: Option<String>,
    #[serde(default, deserialize_with = "nullable_update")]
    pub letterhead_text: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable_update")]
    pub opening_paragraph: Option<Option<String>>,
    #[serde(default, deserialize_with = "nullable_update")]
    pub closing_paragraph: Option<Option<String>>,
    pub sections: Option<Vec<String>>,
    pub is_default: Option<bool>,
}

fn nullable_update<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

#[derive(Serialize)]
pub struct TemplateResponse {
    pub id: Uuid,
    pub firm_id: Uuid,
    pub name: String,
    pub letterhead_text: Option<String>,
    pub opening_paragraph: Option<String>,
    pub closing_paragraph: Option<String>,
    pub sections: Vec<String>,
    pub is_default: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<LetterTemplate> for TemplateResponse {
    fn from(template: LetterTemplate) -> Self {
        let sections = template.section_names();
        Self {
            id: template.id,
            firm_id: template.firm_id,
            name: template.name,
            letterhead_text: template.letterhead_text,
            opening_paragraph: template.opening_paragraph,
            closing_paragraph: template.closing_paragraph,
            sections,
            is_default: template.is_default,
            created_by: template.created_by,
            created_at: template.created_at,
            updated_at: template.updated_at,
        }
    }
}

fn load_template(
    conn: &mut PgPooledConnection,
    firm_id: Uuid,
    template_id: Uuid,
) -> AppResult<LetterTemplate> {
    letter_templates::table
        .filter(letter_templates::id.eq(template_id))
        .filter(letter_templates::firm_id.eq(firm_id))
        .first(conn)
        .optional()?
        .ok_or_else(AppError::not_found)
}

fn unset_other_defaults(
    conn: &mut PgPooledConnection,
    firm_id: Uuid,
    keep: Uuid,
) -> QueryResult<usize> {
    diesel::update(
        letter_templates::table
            .filter(letter_templates::firm_id.eq(firm_id))
            .filter(letter_templates::id.ne(keep))
            .filter(letter_templates::is_default.eq(true)),
    )
    .set(letter_templates::is_default.eq(false))
    .execute(conn)
}

pub async fn create_template(
    State(state): State<AppState>,
    Path(firm_id): Path<Uuid>,
    user: RequestUser,
    Json(payload): Json<CreateTemplateRequest>,
) -> AppResult<(StatusCode, Json<TemplateResponse>)> {
    let name = payload.name.trim();
    if name.is_empty() {
        return Err(AppError::unprocessable("name must not be empty"));
    }

    let new_template = NewLetterTemplate {
        id: Uuid::new_v4(),
        firm_id,
        name: name.to_string(),
        letterhead_text: payload.letterhead_text,
        opening_paragraph: payload.opening_paragraph,
        closing_paragraph: payload.closing_paragraph,
        sections: json!(payload.sections),
        is_default: payload.is_default,
        created_by: user.0,
    };

    let mut conn = state.db()?;
    let template = conn.transaction::<LetterTemplate, diesel::result::Error, _>(|conn| {
        if new_template.is_default {
            unset_other_defaults(conn, firm_id, new_template.id)?;
        }
        diesel::insert_into(letter_templates::table)
            .values(&new_template)
            .get_result(conn)
    })?;

    info!(template_id = %template.id, firm_id = %firm_id, "template created");
    Ok((StatusCode::CREATED, Json(template.into())))
}

pub async fn list_templates(
    State(state): State<AppState>,
    Path(firm_id): Path<Uuid>,
) -> AppResult<Json<Vec<TemplateResponse>>> {
    let mut conn = state.db()?;
    let rows: Vec<LetterTemplate> = letter_templates::table
        .filter(letter_templates::firm_id.eq(firm_id))
        .order(letter_templates::created_at.desc())
        .load(&mut conn)?;
    Ok(Json(rows.into_iter().map(Into::into).collect()))
}

pub async fn get_default_template(
    State(state): State<AppState>,
    Path(firm_id): Path<Uuid>,
) -> AppResult<Json<TemplateResponse>> {
    let mut conn = state.db()?;
    let template: LetterTemplate = letter_templates::table
        .filter(letter_templates::firm_id.eq(firm_id))
        .filter(letter_templates::is_default.eq(true))
        .first(&mut conn)
        .optional()?
        .ok_or_else(AppError::not_found)?;
    Ok(Json(template.into()))
}

pub async fn get_template(
    State(state): State<AppState>,
    Path((firm_id, template_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<TemplateResponse>> {
    let mut conn = state.db()?;
    let template = load_template(&mut conn, firm_id, template_id)?;
    Ok(Json(template.into()))
}

pub async fn update_template(
    State(state): State<AppState>,
    Path((firm_id, template_id)): Path<(Uuid, Uuid)>,
    Json(payload): Json<UpdateTemplateRequest>,
) -> AppResult<Json<TemplateResponse>> {
    if let Some(name) = payload.name.as_deref() {
        if name.trim().is_empty() {
            return Err(AppError::unprocessable("name must not be empty"));
        }
    }

    let mut conn = state.db()?;
    let template = conn.transaction::<LetterTemplate, diesel::result::Error, _>(|conn| {
        let existing: LetterTemplate = letter_templates::table
            .filter(letter_templates::id.eq(template_id))
            .filter(letter_templates::firm_id.eq(firm_id))
            .first(conn)?;

        if payload.is_default == Some(true) {
            unset_other_defaults(conn, firm_id, template_id)?;
        }

        diesel::update(letter_templates::table.find(existing.id))
            .set((
                letter_templates::name
                    .eq(payload.name.map(|n| n.trim().to_string()).unwrap_or(existing.name)),
                letter_templates::letterhead_text
                    .eq(payload.letterhead_text.unwrap_or(existing.letterhead_text)),
                letter_templates::opening_paragraph
                    .eq(payload.opening_paragraph.unwrap_or(existing.opening_paragraph)),
                letter_templates::closing_paragraph
                    .eq(payload.closing_paragraph.unwrap_or(existing.closing_paragraph)),
                letter_templates::sections.eq(payload
                    .sections
                    .map(|s| json!(s))
                    .unwrap_or(existing.sections)),
                letter_templates::is_default.eq(payload.is_default.unwrap_or(existing.is_default)),
                letter_templates::updated_at.eq(Utc::now()),
            ))
            .get_result(conn)
    });

    match template {
        Ok(template) => Ok(Json(template.into())),
        Err(diesel::result::Error::NotFound) => Err(AppError::not_found()),
        Err(err) => Err(AppError::from(err)),
    }
}

pub async fn set_default_template(
    State(state): State<AppState>,
    Path((firm_id, template_id)): Path<(Uuid, Uuid)>,
) -> AppResult<Json<TemplateResponse>> {
    let mut conn = state.db()?;
    let template = conn.transaction::<LetterTemplate, diesel::result::Error, _>(|conn| {
        unset_other_defaults(conn, firm_id, template_id)?;
        diesel::update(
            letter_templates::table
                .filter(letter_templates::id.eq(template_id))
                .filter(letter_templates::firm_id.eq(firm_id)),
        )
        .set((
            letter_templates::is_default.eq(true),
            letter_templates::updated_at.eq(Utc::now()),
        ))
        .get_result(conn)
    });

    match template {
        Ok(template) => {
            info!(template_id = %template_id, firm_id = %firm_id, "default template set");
            Ok(Json(template.into()))
        }
        Err(diesel::result::Error::NotFound) => Err(AppError::not_found()),
        Err(err) => Err(AppError::from(err)),
    }
}

pub async fn delete_template(
    State(state): State<AppState>,
    Path((firm_id, template_id)): Path<(Uuid, Uuid)>,
) -> AppResult<StatusCode> {
    let mut conn = state.db()?;
    load_template(&mut conn, firm_id, template_id)?;

    let referenced: bool = diesel::select(diesel::dsl::exists(
        letters::table.filter(letters::template_id.eq(template_id)),
    ))
    .get_result(&mut conn)?;
    if referenced {
        return Err(AppError::conflict(
            "template is referenced by existing letters",
        ));
    }

    diesel::delete(
        letter_templates::table
            .filter(letter_templates::id.eq(template_id))
            .filter(letter_templates::firm_id.eq(firm_id)),
    )
    .execute(&mut conn)?;

    info!(template_id = %template_id, firm_id = %firm_id, "template deleted");
    Ok(StatusCode::NO_CONTENT)
}
