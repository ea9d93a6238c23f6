//! A minimal hand-rolled HTML tokenizer shared by the sanitizer and the
//! DOCX converter. It handles the constrained markup a letter can contain:
//! start/end tags with attributes, comments, raw-text elements (script and
//! style, whose contents are a single opaque text event), and character
//! entities. It never fails on malformed input; anything that does not parse
//! as a tag is emitted as literal text.

#[derive(Debug, Clone, PartialEq)]
pub enum HtmlEvent {
    StartTag {
        name: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
    },
    EndTag {
        name: String,
    },
    /// Raw text, entities not yet decoded. `raw` marks script/style payloads.
    Text {
        content: String,
        raw: bool,
    },
}

/// Elements whose content is opaque text up to the matching close tag.
const RAW_TEXT_ELEMENTS: &[&str] = &["script", "style"];

pub fn tokenize(input: &str) -> Vec<HtmlEvent> {
    let bytes = input.as_bytes();
    let mut events = Vec::new();
    let mut pos = 0;
    let mut text_start = 0;

    while pos < bytes.len() {
        if bytes[pos] != b'<' {
            pos += 1;
            continue;
        }

        let Some(markup) = scan_markup(input, pos) else {
            // Not valid markup; the '<' stays in the pending text run.
            pos += 1;
            continue;
        };

        // Flush pending text before the markup.
        if text_start < pos {
            events.push(HtmlEvent::Text {
                content: input[text_start..pos].to_string(),
                raw: false,
            });
        }

        match markup {
            Markup::Comment { end } => {
                pos = end;
                text_start = pos;
            }
            Markup::End { name, end } => {
                events.push(HtmlEvent::EndTag { name });
                pos = end;
                text_start = pos;
            }
            Markup::Start {
                name,
                attrs,
                self_closing,
                end,
            } => {
                pos = end;
                text_start = pos;
                let is_raw = RAW_TEXT_ELEMENTS.contains(&name.as_str());
                events.push(HtmlEvent::StartTag {
                    name: name.clone(),
                    attrs,
                    self_closing,
                });
                if is_raw && !self_closing {
                    let (payload, after) = consume_raw_text(input, pos, &name);
                    if !payload.is_empty() {
                        events.push(HtmlEvent::Text {
                            content: payload,
                            raw: true,
                        });
                    }
                    events.push(HtmlEvent::EndTag { name });
                    pos = after;
                    text_start = pos;
                }
            }
        }
    }

    if text_start < bytes.len() {
        events.push(HtmlEvent::Text {
            content: input[text_start..].to_string(),
            raw: false,
        });
    }

    events
}

enum Markup {
    Comment {
        end: usize,
    },
    Start {
        name: String,
        attrs: Vec<(String, String)>,
        self_closing: bool,
        end: usize,
    },
    End {
        name: String,
        end: usize,
    },
}

/// Tries to read one piece of markup starting at `start` (which points at
/// '<'). Returns None when the input is not markup, including an unterminated
/// tag at end of input.
fn scan_markup(input: &str, start: usize) -> Option<Markup> {
    let rest = &input[start..];
    let mut chars = rest.char_indices().skip(1);
    let (_, first) = chars.next()?;

    if first == '!' {
        // Comment or doctype; skip to its terminator.
        if rest.starts_with("<!--") {
            let close = rest.find("-->")?;
            return Some(Markup::Comment {
                end: start + close + 3,
            });
        }
        let close = rest.find('>')?;
        return Some(Markup::Comment {
            end: start + close + 1,
        });
    }

    if first == '/' {
        let close = rest.find('>')?;
        let name = rest[2..close].trim().to_ascii_lowercase();
        if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
            return None;
        }
        return Some(Markup::End {
            name,
            end: start + close + 1,
        });
    }

    if !first.is_ascii_alphabetic() {
        return None;
    }

    // Find the closing '>' while respecting quoted attribute values.
    let mut quote: Option<char> = None;
    let mut close = None;
    for (offset, ch) in rest.char_indices().skip(1) {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"') | (None, '\'') => quote = Some(ch),
            (None, '>') => {
                close = Some(offset);
                break;
            }
            _ => {}
        }
    }
    let close = close?;

    let mut body = &rest[1..close];
    let self_closing = body.ends_with('/');
    if self_closing {
        body = &body[..body.len() - 1];
    }

    let name_end = body
        .find(|c: char| c.is_whitespace())
        .unwrap_or(body.len());
    let name = body[..name_end].to_ascii_lowercase();
    if name.is_empty() || !name.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }

    let attrs = parse_attrs(&body[name_end..]);

    Some(Markup::Start {
        name,
        attrs,
        self_closing,
        end: start + close + 1,
    })
}

fn parse_attrs(mut input: &str) -> Vec<(String, String)> {
    let mut attrs = Vec::new();

    loop {
        input = input.trim_start();
        if input.is_empty() {
            break;
        }

        let name_end = input
            .find(|c: char| c.is_whitespace() || c == '=')
            .unwrap_or(input.len());
        let name = input[..name_end].to_ascii_lowercase();
        input = input[name_end..].trim_start();

        let mut value = String::new();
        if let Some(rest) = input.strip_prefix('=') {
            let rest = rest.trim_start();
            if let Some(quoted) = rest.strip_prefix('"') {
                let end = quoted.find('"').unwrap_or(quoted.len());
                value = quoted[..end].to_string();
                input = &quoted[quoted.len().min(end + 1)..];
            } else if let Some(quoted) = rest.strip_prefix('\'') {
                let end = quoted.find('\'').unwrap_or(quoted.len());
                value = quoted[..end].to_string();
                input = &quoted[quoted.len().min(end + 1)..];
            } else {
                let end = rest
                    .find(|c: char| c.is_whitespace())
                    .unwrap_or(rest.len());
                value = rest[..end].to_string();
                input = &rest[end..];
            }
        }

        if !name.is_empty() {
            attrs.push((name, value));
        }
    }

    attrs
}

/// Reads raw-text element content up to the matching case-insensitive close
/// tag. Unterminated content runs to end of input.
fn consume_raw_text(input: &str, from: usize, name: &str) -> (String, usize) {
    let rest = &input[from..];
    let lower = rest.to_ascii_lowercase();
    let needle = format!("</{name}");
    match lower.find(&needle) {
        Some(offset) => {
            let after_tag = lower[offset..]
                .find('>')
                .map(|gt| from + offset + gt + 1)
                .unwrap_or(input.len());
            (rest[..offset].to_string(), after_tag)
        }
        None => (rest.to_string(), input.len()),
    }
}

/// Decodes the named entities the letter pipeline produces plus numeric
/// character references. Unknown entities pass through untouched.
pub fn decode_entities(text: &str) -> String {
    if !text.contains('&') {
        return text.to_string();
    }

    let mut out = String::with_capacity(text.len());
    let mut rest = text;

    while let Some(amp) = rest.find('&') {
        out.push_str(&rest[..amp]);
        rest = &rest[amp..];

        let semi = match rest.find(';') {
            // An entity name this long is not an entity.
            Some(idx) if idx <= 32 => idx,
            _ => {
                out.push('&');
                rest = &rest[1..];
                continue;
            }
        };

        let entity = &rest[1..semi];
        let decoded = match entity {
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "quot" => Some('"'),
            "apos" => Some('\''),
            "nbsp" => Some(' '),
            _ => decode_numeric_entity(entity),
        };

        match decoded {
            Some(ch) => {
                out.push(ch);
                rest = &rest[semi + 1..];
            }
            None => {
                out.push('&');
                rest = &rest[1..];
            }
        }
    }

    out.push_str(rest);
    out
}

fn decode_numeric_entity(entity: &str) -> Option<char> {
    let digits = entity.strip_prefix('#')?;
    let code = if let Some(hex) = digits.strip_prefix('x').or_else(|| digits.strip_prefix('X')) {
        u32::from_str_radix(hex, 16).ok()?
    } else {
        digits.parse().ok()?
    };
    char::from_u32(code)
}

/// Escapes text for safe re-emission inside sanitized HTML.
pub fn escape_text(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for ch in text.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}
