//! HTML to DOCX conversion for letter export.
//!
//! Letter content is stored as a constrained HTML subset. Export parses that
//! subset into a flat block structure and serializes it as an OOXML document
//! with `docx-rs`. Tags outside the subset are dropped but their text still
//! flows into the surrounding block.

use std::io::Cursor;

use chrono::NaiveDate;
use docx_rs::{
    AbstractNumbering, Docx, IndentLevel, Level, LevelJc, LevelText, NumberFormat, Numbering,
    NumberingId, Paragraph, Run, RunFonts, Start, Style, StyleType,
};
use thiserror::Error;

use crate::html::{decode_entities, tokenize, HtmlEvent};

pub const DOCX_CONTENT_TYPE: &str =
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document";

const BULLET_NUMBERING_ID: usize = 1;
const DECIMAL_NUMBERING_ID: usize = 2;

#[derive(Debug, Error)]
pub enum DocxError {
    #[error("failed to assemble docx file: {0}")]
    Pack(#[from] docx_rs::DocxError),
    #[error("failed to write docx archive: {0}")]
    Archive(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListKind {
    Bullet,
    Number,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Paragraph,
    Heading(u8),
    ListItem(ListKind),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextRun {
    pub text: String,
    pub bold: bool,
    pub italic: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub runs: Vec<TextRun>,
}

/// Intermediate representation of a letter between HTML and OOXML. Flat list
/// of blocks; inline nesting is already resolved into per-run flags.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LetterBody {
    pub blocks: Vec<Block>,
}

impl LetterBody {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Concatenated text content, blocks separated by newlines.
    pub fn plain_text(&self) -> String {
        self.blocks
            .iter()
            .map(|block| {
                block
                    .runs
                    .iter()
                    .map(|run| run.text.as_str())
                    .collect::<String>()
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum InlineStyle {
    Bold,
    Italic,
}

struct Parser {
    blocks: Vec<Block>,
    current: Option<Block>,
    inline_stack: Vec<InlineStyle>,
    list_stack: Vec<ListKind>,
}

impl Parser {
    fn new() -> Self {
        Self {
            blocks: Vec::new(),
            current: None,
            inline_stack: Vec::new(),
            list_stack: Vec::new(),
        }
    }

    fn open_block(&mut self, kind: BlockKind) {
        self.flush();
        self.current = Some(Block {
            kind,
            runs: Vec::new(),
        });
    }

    fn flush(&mut self) {
        if let Some(mut block) = self.current.take() {
            if let Some(last) = block.runs.last_mut() {
                let trimmed = last.text.trim_end().len();
                last.text.truncate(trimmed);
                if last.text.is_empty() {
                    block.runs.pop();
                }
            }
            if !block.runs.is_empty() {
                self.blocks.push(block);
            }
        }
    }

    fn push_text(&mut self, data: &str) {
        let text = normalize_whitespace(&decode_entities(data));
        if text.trim().is_empty() {
            return;
        }
        let bold = self.inline_stack.contains(&InlineStyle::Bold);
        let italic = self.inline_stack.contains(&InlineStyle::Italic);

        let block = self.current.get_or_insert_with(|| Block {
            kind: BlockKind::Paragraph,
            runs: Vec::new(),
        });

        let mut text = text;
        if block.runs.is_empty() {
            text = text.trim_start().to_string();
        }
        match block.runs.last_mut() {
            Some(last) if last.bold == bold && last.italic == italic => {
                if last.text.ends_with(' ') && text.starts_with(' ') {
                    last.text.pop();
                }
                last.text.push_str(&text);
            }
            _ => block.runs.push(TextRun { text, bold, italic }),
        }
    }

    fn start_tag(&mut self, name: &str) {
        match name {
            "p" => self.open_block(BlockKind::Paragraph),
            "h1" => self.open_block(BlockKind::Heading(1)),
            "h2" => self.open_block(BlockKind::Heading(2)),
            "h3" => self.open_block(BlockKind::Heading(3)),
            "strong" | "b" => self.inline_stack.push(InlineStyle::Bold),
            "em" | "i" => self.inline_stack.push(InlineStyle::Italic),
            "br" => {
                // Soft break; rendered as a space within the current block.
                if let Some(block) = &mut self.current {
                    if let Some(last) = block.runs.last_mut() {
                        if !last.text.ends_with(' ') {
                            last.text.push(' ');
                        }
                    }
                }
            }
            "ul" => self.list_stack.push(ListKind::Bullet),
            "ol" => self.list_stack.push(ListKind::Number),
            "li" => {
                // A stray li outside any list renders as a plain paragraph.
                let kind = match self.list_stack.last() {
                    Some(list) => BlockKind::ListItem(*list),
                    None => BlockKind::Paragraph,
                };
                self.open_block(kind);
            }
            _ => {}
        }
    }

    fn end_tag(&mut self, name: &str) {
        match name {
            "p" | "h1" | "h2" | "h3" | "li" => self.flush(),
            "strong" | "b" => self.pop_inline(InlineStyle::Bold),
            "em" | "i" => self.pop_inline(InlineStyle::Italic),
            "ul" => {
                if self.list_stack.last() == Some(&ListKind::Bullet) {
                    self.list_stack.pop();
                }
            }
            "ol" => {
                if self.list_stack.last() == Some(&ListKind::Number) {
                    self.list_stack.pop();
                }
            }
            _ => {}
        }
    }

    fn pop_inline(&mut self, style: InlineStyle) {
        if let Some(position) = self.inline_stack.iter().rposition(|s| *s == style) {
            self.inline_stack.remove(position);
        }
    }

    fn finish(mut self) -> LetterBody {
        self.flush();
        LetterBody {
            blocks: self.blocks,
        }
    }
}

/// Parses letter HTML into the block representation. Never fails; malformed
/// input degrades to plain paragraphs.
pub fn parse_letter_html(html: &str) -> LetterBody {
    let mut parser = Parser::new();
    for event in tokenize(strip_markdown_fences(html)) {
        match event {
            HtmlEvent::StartTag { name, .. } => parser.start_tag(&name),
            HtmlEvent::EndTag { name } => parser.end_tag(&name),
            HtmlEvent::Text { content, raw } => {
                if !raw {
                    parser.push_text(&content);
                }
            }
        }
    }
    parser.finish()
}

/// Models sometimes wrap the whole letter in a markdown code fence even when
/// told not to. Strips a leading fence marker with an optional language tag
/// (newline-terminated or directly abutting the first tag), a trailing fence
/// marker, and stray backticks at either end.
pub fn strip_markdown_fences(content: &str) -> &str {
    let mut text = content.trim();

    if let Some(rest) = text.strip_prefix("```") {
        text = match (rest.find('\n'), rest.find('<')) {
            (Some(newline), Some(tag)) if tag < newline => &rest[tag..],
            (Some(newline), _) => &rest[newline + 1..],
            (None, Some(tag)) => &rest[tag..],
            (None, None) => rest,
        };
    }

    text = text.trim_end();
    if let Some(inner) = text.strip_suffix("```") {
        text = inner.trim_end();
    }

    text.trim_matches('`').trim()
}

fn normalize_whitespace(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_space = false;
    for ch in text.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push(' ');
                in_space = true;
            }
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out
}

/// Serializes the block representation as a .docx byte buffer. Times New
/// Roman 12pt body text, styled headings, bullet and decimal numbering.
pub fn render_docx(body: &LetterBody) -> Result<Vec<u8>, DocxError> {
    let mut docx = Docx::new()
        .default_fonts(RunFonts::new().ascii("Times New Roman"))
        .default_size(24)
        .add_style(
            Style::new("Heading1", StyleType::Paragraph)
                .name("Heading 1")
                .size(32)
                .bold(),
        )
        .add_style(
            Style::new("Heading2", StyleType::Paragraph)
                .name("Heading 2")
                .size(28)
                .bold(),
        )
        .add_style(
            Style::new("Heading3", StyleType::Paragraph)
                .name("Heading 3")
                .size(24)
                .bold(),
        )
        .add_abstract_numbering(AbstractNumbering::new(BULLET_NUMBERING_ID).add_level(
            Level::new(
                0,
                Start::new(1),
                NumberFormat::new("bullet"),
                LevelText::new("\u{2022}"),
                LevelJc::new("left"),
            ),
        ))
        .add_numbering(Numbering::new(BULLET_NUMBERING_ID, BULLET_NUMBERING_ID))
        .add_abstract_numbering(AbstractNumbering::new(DECIMAL_NUMBERING_ID).add_level(
            Level::new(
                0,
                Start::new(1),
                NumberFormat::new("decimal"),
                LevelText::new("%1."),
                LevelJc::new("left"),
            ),
        ))
        .add_numbering(Numbering::new(DECIMAL_NUMBERING_ID, DECIMAL_NUMBERING_ID));

    for block in &body.blocks {
        let mut paragraph = Paragraph::new();
        for run in &block.runs {
            let mut docx_run = Run::new().add_text(run.text.as_str());
            if run.bold {
                docx_run = docx_run.bold();
            }
            if run.italic {
                docx_run = docx_run.italic();
            }
            paragraph = paragraph.add_run(docx_run);
        }
        paragraph = match block.kind {
            BlockKind::Paragraph => paragraph,
            BlockKind::Heading(level) => paragraph.style(&format!("Heading{level}")),
            BlockKind::ListItem(ListKind::Bullet) => {
                paragraph.numbering(NumberingId::new(BULLET_NUMBERING_ID), IndentLevel::new(0))
            }
            BlockKind::ListItem(ListKind::Number) => {
                paragraph.numbering(NumberingId::new(DECIMAL_NUMBERING_ID), IndentLevel::new(0))
            }
        };
        docx = docx.add_paragraph(paragraph);
    }

    let mut cursor = Cursor::new(Vec::new());
    docx.build()
        .pack(&mut cursor)
        .map_err(|err| DocxError::Archive(err.to_string()))?;
    Ok(cursor.into_inner())
}

/// Parses letter HTML and serializes it in one step.
pub fn html_to_docx_bytes(html: &str) -> Result<Vec<u8>, DocxError> {
    render_docx(&parse_letter_html(html))
}

const FILENAME_MAX_LEN: usize = 50;
const FILENAME_PREFIX: &str = "Demand_Letter_";
// "_YYYY-MM-DD" plus ".docx".
const FILENAME_SUFFIX_LEN: usize = 11 + 5;

/// Keeps alphanumerics, underscores and hyphens; whitespace runs become a
/// single underscore, everything else is dropped. Idempotent.
pub fn sanitize_title(title: &str) -> String {
    let kept: String = title
        .trim()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || c.is_whitespace() || *c == '_' || *c == '-')
        .collect();

    let mut out = String::with_capacity(kept.len());
    let mut in_space = false;
    for ch in kept.chars() {
        if ch.is_whitespace() {
            if !in_space {
                out.push('_');
                in_space = true;
            }
        } else {
            out.push(ch);
            in_space = false;
        }
    }
    out
}

/// Derives the export filename `Demand_Letter_<title>_<date>.docx`, capped at
/// 50 characters by truncating the title. An empty title leaves just the
/// prefix and date.
pub fn export_filename(title: &str, date: NaiveDate) -> String {
    let date_str = date.format("%Y-%m-%d").to_string();
    let sanitized = sanitize_title(title);
    if sanitized.is_empty() {
        return format!("Demand_Letter_{date_str}.docx");
    }

    let filename = format!("{FILENAME_PREFIX}{sanitized}_{date_str}.docx");
    if filename.len() <= FILENAME_MAX_LEN {
        return filename;
    }

    let max_title_len = FILENAME_MAX_LEN - FILENAME_PREFIX.len() - FILENAME_SUFFIX_LEN;
    let truncated: String = sanitized.chars().take(max_title_len).collect();
    format!("{FILENAME_PREFIX}{truncated}_{date_str}.docx")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, 14).unwrap()
    }

    fn run(text: &str) -> TextRun {
        TextRun {
            text: text.to_string(),
            bold: false,
            italic: false,
        }
    }

    #[test]
    fn parses_paragraphs_and_headings() {
        let body = parse_letter_html("<h1>Demand</h1><p>We represent the claimant.</p>");
        assert_eq!(body.blocks.len(), 2);
        assert_eq!(body.blocks[0].kind, BlockKind::Heading(1));
        assert_eq!(body.blocks[0].runs, vec![run("Demand")]);
        assert_eq!(body.blocks[1].kind, BlockKind::Paragraph);
        assert_eq!(body.blocks[1].runs, vec![run("We represent the claimant.")]);
    }

    #[test]
    fn inline_formatting_becomes_run_flags() {
        let body = parse_letter_html("<p>Pay <strong>now <em>or</em></strong> else</p>");
        let runs = &body.blocks[0].runs;
        assert_eq!(runs.len(), 4);
        assert_eq!(runs[0].text, "Pay ");
        assert!(!runs[0].bold);
        assert_eq!(runs[1].text, "now ");
        assert!(runs[1].bold && !runs[1].italic);
        assert_eq!(runs[2].text, "or");
        assert!(runs[2].bold && runs[2].italic);
        assert_eq!(runs[3].text, " else");
        assert!(!runs[3].bold);
    }

    #[test]
    fn lists_map_to_list_items() {
        let body = parse_letter_html("<ul><li>one</li><li>two</li></ul><ol><li>three</li></ol>");
        assert_eq!(body.blocks[0].kind, BlockKind::ListItem(ListKind::Bullet));
        assert_eq!(body.blocks[1].kind, BlockKind::ListItem(ListKind::Bullet));
        assert_eq!(body.blocks[2].kind, BlockKind::ListItem(ListKind::Number));
        assert_eq!(body.plain_text(), "one\ntwo\nthree");
    }

    #[test]
    fn li_outside_list_is_a_paragraph() {
        let body = parse_letter_html("<li>stranded</li>");
        assert_eq!(body.blocks[0].kind, BlockKind::Paragraph);
    }

    #[test]
    fn unknown_tag_text_still_flows() {
        let body = parse_letter_html("<p>before <span>inside</span> after</p>");
        assert_eq!(body.plain_text(), "before inside after");
    }

    #[test]
    fn bare_text_gets_a_paragraph() {
        let body = parse_letter_html("no markup at all");
        assert_eq!(body.blocks.len(), 1);
        assert_eq!(body.blocks[0].kind, BlockKind::Paragraph);
        assert_eq!(body.plain_text(), "no markup at all");
    }

    #[test]
    fn whitespace_collapses_and_entities_decode() {
        let body = parse_letter_html("<p>Smith &amp; Jones\n   settle &#x2014; now</p>");
        assert_eq!(body.plain_text(), "Smith & Jones settle \u{2014} now");
    }

    #[test]
    fn script_content_is_dropped() {
        let body = parse_letter_html("<p>ok</p><script>var x = '<p>fake</p>';</script>");
        assert_eq!(body.plain_text(), "ok");
    }

    #[test]
    fn whitespace_only_markup_yields_empty_body() {
        let body = parse_letter_html("<p>   </p><p></p>");
        assert!(body.is_empty());
    }

    #[test]
    fn fenced_output_is_unwrapped() {
        let fenced = "```html\n<p>letter</p>\n```";
        assert_eq!(strip_markdown_fences(fenced), "<p>letter</p>");
        assert_eq!(strip_markdown_fences("<p>plain</p>"), "<p>plain</p>");
        let unterminated = "```html\n<p>letter</p>";
        assert_eq!(strip_markdown_fences(unterminated), "<p>letter</p>");
    }

    #[test]
    fn fence_abutting_the_first_tag_is_stripped() {
        let abutting = "```<p>We demand payment.</p>```";
        assert_eq!(strip_markdown_fences(abutting), "<p>We demand payment.</p>");
        let body = parse_letter_html(abutting);
        assert_eq!(body.plain_text(), "We demand payment.");
    }

    #[test]
    fn stray_backticks_are_trimmed() {
        assert_eq!(strip_markdown_fences("`<p>hi</p>`"), "<p>hi</p>");
        assert_eq!(strip_markdown_fences("``` <p>hi</p>"), "<p>hi</p>");
    }

    #[test]
    fn rendered_bytes_are_a_zip_archive() {
        let body = parse_letter_html("<h1>Title</h1><p>Body <strong>text</strong></p>");
        let bytes = render_docx(&body).unwrap();
        assert!(bytes.len() > 4);
        assert_eq!(&bytes[..2], b"PK");
    }

    #[test]
    fn filename_basic() {
        assert_eq!(
            export_filename("Car Accident", date()),
            "Demand_Letter_Car_Accident_2025-03-14.docx"
        );
    }

    #[test]
    fn filename_strips_special_characters() {
        assert_eq!(
            export_filename("Smith v. Jones: $50,000!", date()),
            "Demand_Letter_Smith_v_Jones_50000_2025-03-14.docx"
        );
    }

    #[test]
    fn filename_is_capped_at_fifty_characters() {
        let name = export_filename(
            "An Extremely Long Letter Title That Keeps Going And Going",
            date(),
        );
        assert_eq!(name.len(), 50);
        assert!(name.starts_with("Demand_Letter_An_Extremely_Long_"));
        assert!(name.ends_with("_2025-03-14.docx"));
    }

    #[test]
    fn empty_title_falls_back_to_date_only() {
        assert_eq!(
            export_filename("", date()),
            "Demand_Letter_2025-03-14.docx"
        );
        assert_eq!(
            export_filename("!!!", date()),
            "Demand_Letter_2025-03-14.docx"
        );
    }

    #[test]
    fn sanitization_is_idempotent() {
        let once = sanitize_title("Re: Smith & Sons (final)");
        assert_eq!(sanitize_title(&once), once);
    }
}
