use crate::html::{escape_text, tokenize, HtmlEvent};

/// Tags that survive sanitization. Everything else is dropped (its text
/// content still flows through), and script/style lose their content too.
const ALLOWED_TAGS: &[&str] = &[
    "p", "br", "strong", "em", "u", "b", "i", "ul", "ol", "li", "h1", "h2", "h3", "h4", "h5",
    "h6", "div", "span", "blockquote", "a", "table", "thead", "tbody", "tr", "td", "th",
];

const VOID_TAGS: &[&str] = &["br"];

fn allowed_attr(tag: &str, name: &str, value: &str) -> bool {
    if name.starts_with("on") {
        return false;
    }
    match (tag, name) {
        ("a", "href") => {
            let scheme = value.trim().to_ascii_lowercase();
            !scheme.starts_with("javascript:") && !scheme.starts_with("data:")
        }
        ("a", "title") => true,
        ("td" | "th", "colspan" | "rowspan") => true,
        _ => false,
    }
}

/// Allowlist HTML sanitizer for model output. Rebuilds the markup from
/// tokenizer events: unknown tags vanish, dangerous attributes are stripped,
/// text is re-escaped, and only tags that were actually opened are closed.
pub fn sanitize_html(input: &str) -> String {
    if input.is_empty() {
        return String::new();
    }

    let mut out = String::with_capacity(input.len());
    let mut open_stack: Vec<String> = Vec::new();

    for event in tokenize(input) {
        match event {
            HtmlEvent::StartTag {
                name,
                attrs,
                self_closing,
            } => {
                if !ALLOWED_TAGS.contains(&name.as_str()) {
                    continue;
                }
                out.push('<');
                out.push_str(&name);
                for (attr_name, attr_value) in &attrs {
                    if allowed_attr(&name, attr_name, attr_value) {
                        out.push(' ');
                        out.push_str(attr_name);
                        out.push_str("=\"");
                        out.push_str(&escape_text(attr_value));
                        out.push('"');
                    }
                }
                if self_closing || VOID_TAGS.contains(&name.as_str()) {
                    out.push_str("/>");
                } else {
                    out.push('>');
                    open_stack.push(name);
                }
            }
            HtmlEvent::EndTag { name } => {
                if !ALLOWED_TAGS.contains(&name.as_str()) {
                    continue;
                }
                if let Some(position) = open_stack.iter().rposition(|open| *open == name) {
                    open_stack.truncate(position);
                    out.push_str("</");
                    out.push_str(&name);
                    out.push('>');
                }
            }
            HtmlEvent::Text { content, raw } => {
                // Raw text only occurs inside script/style; drop it.
                if raw {
                    continue;
                }
                out.push_str(&escape_text(&crate::html::decode_entities(&content)));
            }
        }
    }

    // Force-close anything left open at end of input.
    while let Some(name) = open_stack.pop() {
        out.push_str("</");
        out.push_str(&name);
        out.push('>');
    }

    out
}

/// Syntactic plausibility gate for model output: non-empty and containing at
/// least one recognized tag.
pub fn looks_like_html(input: &str) -> bool {
    if input.trim().is_empty() {
        return false;
    }
    tokenize(input).iter().any(|event| match event {
        HtmlEvent::StartTag { name, .. } => ALLOWED_TAGS.contains(&name.as_str()),
        _ => false,
    })
}
