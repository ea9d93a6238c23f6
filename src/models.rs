use chrono::{DateTime, Utc};
use diesel::prelude::*;
use uuid::Uuid;

use crate::schema::*;

pub const LETTER_STATUS_DRAFT: &str = "draft";
pub const LETTER_STATUS_CREATED: &str = "created";

pub const LETTER_TITLE_MAX_CHARS: usize = 255;

/// Clamps a letter title to the column width on a character boundary.
pub fn clamp_letter_title(title: &str) -> String {
    title.chars().take(LETTER_TITLE_MAX_CHARS).collect()
}

#[derive(Debug, Clone, Queryable, Identifiable)]
#[diesel(table_name = firms)]
pub struct Firm {
    pub id: Uuid,
    pub name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = firms)]
pub struct NewFirm {
    pub id: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = users)]
#[diesel(belongs_to(Firm))]
pub struct User {
    pub id: Uuid,
    pub firm_id: Uuid,
    pub email: String,
    pub display_name: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = users)]
pub struct NewUser {
    pub id: Uuid,
    pub firm_id: Uuid,
    pub email: String,
    pub display_name: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = documents)]
#[diesel(belongs_to(Firm))]
pub struct Document {
    pub id: Uuid,
    pub firm_id: Uuid,
    pub uploaded_by: Option<Uuid>,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub s3_key: String,
    pub checksum: String,
    pub uploaded_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = documents)]
pub struct NewDocument {
    pub id: Uuid,
    pub firm_id: Uuid,
    pub uploaded_by: Option<Uuid>,
    pub filename: String,
    pub content_type: String,
    pub size_bytes: i64,
    pub s3_key: String,
    pub checksum: String,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = letter_templates)]
#[diesel(belongs_to(Firm))]
pub struct LetterTemplate {
    pub id: Uuid,
    pub firm_id: Uuid,
    pub name: String,
    pub letterhead_text: Option<String>,
    pub opening_paragraph: Option<String>,
    pub closing_paragraph: Option<String>,
    pub sections: serde_json::Value,
    pub is_default: bool,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl LetterTemplate {
    /// Section names in template order. Non-string entries are skipped.
    pub fn section_names(&self) -> Vec<String> {
        self.sections
            .as_array()
            .map(|entries| {
                entries
                    .iter()
                    .filter_map(|entry| entry.as_str().map(|s| s.to_string()))
                    .collect()
            })
            .unwrap_or_default()
    }
}

#[derive(Debug, Insertable)]
#[diesel(table_name = letter_templates)]
pub struct NewLetterTemplate {
    pub id: Uuid,
    pub firm_id: Uuid,
    pub name: String,
    pub letterhead_text: Option<String>,
    pub opening_paragraph: Option<String>,
    pub closing_paragraph: Option<String>,
    pub sections: serde_json::Value,
    pub is_default: bool,
    pub created_by: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Identifiable, Associations)]
#[diesel(table_name = letters)]
#[diesel(belongs_to(Firm))]
#[diesel(belongs_to(LetterTemplate, foreign_key = template_id))]
pub struct Letter {
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

#[derive(Debug, Insertable)]
#[diesel(table_name = letters)]
pub struct NewLetter {
    pub id: Uuid,
    pub firm_id: Uuid,
    pub created_by: Option<Uuid>,
    pub title: String,
    pub content: String,
    pub status: String,
    pub template_id: Option<Uuid>,
}

#[derive(Debug, Clone, Queryable, Associations)]
#[diesel(table_name = letter_documents)]
#[diesel(belongs_to(Letter))]
#[diesel(belongs_to(Document))]
#[diesel(primary_key(letter_id, document_id))]
pub struct LetterDocument {
    pub letter_id: Uuid,
    pub document_id: Uuid,
    pub linked_at: DateTime<Utc>,
}

#[derive(Debug, Insertable)]
#[diesel(table_name = letter_documents)]
pub struct NewLetterDocument {
    pub letter_id: Uuid,
    pub document_id: Uuid,
}
