//! Prompt assembly for letter generation.

use tracing::warn;
use uuid::Uuid;

use crate::models::LetterTemplate;

const SYSTEM_PROMPT: &str = "\
You are an expert legal writer specializing in personal injury demand letters.
Your role is to draft professional, persuasive demand letters that attorneys can use in settlement negotiations.
You have access to source documents (medical records, police reports, bills, etc.) and a firm-specific template
that defines the structure and style for the letter.

PROCESS TO FOLLOW:

1. Analyze Source Documents
   - Review all provided documents thoroughly
   - Identify key facts: incident details, injuries, damages, liability evidence
   - Extract specific data: dates, amounts, medical diagnoses, treatment details
   - Note any gaps in information that should be acknowledged

2. Apply Template Structure
   - Follow the template's section organization exactly
   - Use the provided letterhead, opening, and closing paragraphs as guides
   - Maintain consistency with the firm's established style and tone
   - Adapt template language to fit the specific case facts

3. Draft Letter Content
   - Start with incident overview: what happened, when, where, who was involved
   - Detail injuries and medical treatment: diagnoses, procedures, ongoing care
   - Document damages: medical expenses, lost wages, pain and suffering
   - Establish liability: explain why the defendant is responsible
   - State the demand: clear monetary amount with justification
   - Include consequences: litigation timeline if settlement not reached

4. Ensure Quality and Accuracy
   - Use specific facts and figures from source documents
   - Cite document sources when referencing medical records or reports
   - Maintain professional, assertive tone without being aggressive
   - Ensure all claims are supported by provided documentation
   - Format clearly for readability

GUIDELINES:

- Legal Tone: Use formal legal language but avoid unnecessary jargon that obscures meaning
- Specificity: Include concrete details (dates, dollar amounts, medical terminology) from source documents
- Persuasiveness: Frame facts to build a compelling case for settlement
- Completeness: Address all elements of damages (economic and non-economic)
- Professionalism: Maintain respectful but firm tone throughout
- Structure: Use clear headings, organized paragraphs, and logical flow
- Accuracy: Only include information supported by the source documents provided

OUTPUT FORMAT:
- Generate HTML content only (no markdown, no explanations)
- Use semantic HTML tags: <h1>, <h2>, <h3> for headings; <p> for paragraphs; <strong>, <em> for emphasis; <ul>, <ol>, <li> for lists
- Ensure proper document structure following the template's organization
- Make the letter ready for attorney review and finalization";

const OUTPUT_INSTRUCTIONS: &str = "\
## OUTPUT REQUIREMENTS

Generate a complete demand letter in HTML format. The letter should:
1. Follow the template structure provided above
2. Extract and incorporate relevant information from the source documents
3. Be formatted as clean HTML with appropriate tags (p, h1, h2, h3, strong, em, ul, ol, li)
4. Include the letterhead, opening paragraph, all required sections, and closing paragraph
5. Be professional and legally appropriate

Output only the HTML content of the letter, without any additional explanation or markdown formatting.";

/// One source document's contribution to the prompt context.
pub struct DocumentContext {
    pub document_id: Uuid,
    pub filename: String,
    pub text: String,
}

/// System and user message pair ready for the chat completion call.
pub struct LetterPrompt {
    pub system: String,
    pub user: String,
}

pub fn build_letter_prompt(
    template: &LetterTemplate,
    documents: &[DocumentContext],
    max_context_chars: usize,
) -> LetterPrompt {
    let mut user = String::new();
    user.push_str(&template_instructions(template));
    user.push('\n');
    user.push_str("## SOURCE DOCUMENTS\n\n");
    user.push_str(&document_context(documents, max_context_chars));
    user.push('\n');
    user.push_str(OUTPUT_INSTRUCTIONS);

    LetterPrompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}

fn template_instructions(template: &LetterTemplate) -> String {
    let mut out = String::from("## TEMPLATE STRUCTURE\n\n");

    if let Some(letterhead) = non_empty(template.letterhead_text.as_deref()) {
        out.push_str("**Letterhead:**\n");
        out.push_str(letterhead);
        out.push_str("\n\n");
    }
    if let Some(opening) = non_empty(template.opening_paragraph.as_deref()) {
        out.push_str("**Opening Paragraph:**\n");
        out.push_str(opening);
        out.push_str("\n\n");
    }
    let sections = template.section_names();
    if !sections.is_empty() {
        out.push_str("**Sections to include:**\n");
        for section in &sections {
            out.push_str("- ");
            out.push_str(section);
            out.push('\n');
        }
        out.push('\n');
    }
    if let Some(closing) = non_empty(template.closing_paragraph.as_deref()) {
        out.push_str("**Closing Paragraph:**\n");
        out.push_str(closing);
        out.push_str("\n\n");
    }

    out
}

fn document_context(documents: &[DocumentContext], max_chars: usize) -> String {
    let mut parts = Vec::new();
    for (idx, doc) in documents.iter().enumerate() {
        parts.push(format!(
            "### Document {} ({}, ID: {})",
            idx + 1,
            doc.filename,
            doc.document_id
        ));
        parts.push(String::new());
        parts.push(doc.text.clone());
        parts.push(String::new());
        parts.push("---".to_string());
        parts.push(String::new());
    }
    let context = parts.join("\n");

    if max_chars > 0 && context.chars().count() > max_chars {
        warn!(
            original = context.chars().count(),
            truncated = max_chars,
            "document context truncated"
        );
        let mut truncated: String = context.chars().take(max_chars).collect();
        truncated.push_str("\n\n[Content truncated due to length limits...]");
        return truncated;
    }

    context
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|s| !s.is_empty())
}
