use std::fmt;
use unicode_general_category::{get_general_category, GeneralCategory};

/// Leading tokens of HTTP request and status lines.
pub const HTTP_PREFIXES: [&str; 9] = [
    "GET ", "POST ", "PUT ", "DELETE ", "HEAD ", "OPTIONS ", "PATCH ", "HTTP/1.", "HTTP/2",
];

/// Minimum share of printable characters for a payload to count as text.
pub const TEXT_PRINTABLE_RATIO: f64 = 0.7;

/// What a payload looks like, checked in declaration order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ContentKind {
    Http,
    Json,
    Text,
    Binary,
}

impl fmt::Display for ContentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ContentKind::Http => write!(f, "HTTP"),
            ContentKind::Json => write!(f, "JSON"),
            ContentKind::Text => write!(f, "Text"),
            ContentKind::Binary => write!(f, "Binary"),
        }
    }
}

/// Classifies a payload. The first matching kind wins.
pub fn classify(payload: &[u8]) -> ContentKind {
    if is_http(payload) {
        ContentKind::Http
    } else if is_json(payload) {
        ContentKind::Json
    } else if is_text(payload) {
        ContentKind::Text
    } else {
        ContentKind::Binary
    }
}

/// Printable code points plus tab, line feed and carriage return.
///
/// Letters, marks, numbers, punctuation, symbols and the ASCII space are
/// printable; controls, format characters, private-use and unassigned code
/// points and every other separator are not.
pub fn is_printable(c: char) -> bool {
    if matches!(c, '\t' | '\n' | '\r' | ' ') {
        return true;
    }
    !matches!(
        get_general_category(c),
        GeneralCategory::Control
            | GeneralCategory::Format
            | GeneralCategory::Surrogate
            | GeneralCategory::PrivateUse
            | GeneralCategory::Unassigned
            | GeneralCategory::SpaceSeparator
            | GeneralCategory::LineSeparator
            | GeneralCategory::ParagraphSeparator
    )
}

fn is_http(payload: &[u8]) -> bool {
    HTTP_PREFIXES
        .iter()
        .any(|prefix| payload.starts_with(prefix.as_bytes()))
}

fn is_json(payload: &[u8]) -> bool {
    let trimmed = payload.trim_ascii();
    matches!(
        (trimmed.first(), trimmed.last()),
        (Some(b'{'), Some(b'}')) | (Some(b'['), Some(b']'))
    )
}

fn is_text(payload: &[u8]) -> bool {
    let Ok(text) = std::str::from_utf8(payload) else {
        return false;
    };
    let total = text.chars().count();
    if total == 0 {
        return false;
    }
    let printable = text.chars().filter(|c| is_printable(*c)).count();
    printable as f64 / total as f64 >= TEXT_PRINTABLE_RATIO
}
