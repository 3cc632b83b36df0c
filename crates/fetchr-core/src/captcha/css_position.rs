//! CSS-position captcha: each digit is a `span` pushed right by `padding-left`;
//! reading the digits in offset order gives the code.

use regex::Regex;
use std::sync::OnceLock;

use crate::html::decode_entities;

fn re_span() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?is)<span\b([^>]*)>(.*?)</span>").unwrap())
}

fn re_padding_left() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?i)padding-left\s*:\s*([^;]*?)\s*px").unwrap())
}

fn re_tags() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?s)<[^>]*>").unwrap())
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MalformedCaptchaError {
    #[error("no positioned captcha characters found")]
    Empty,
    #[error("expected {expected} captcha characters, found {found}")]
    TooFew { expected: usize, found: usize },
    #[error("captcha offset {0:?} is not a non-negative integer")]
    BadOffset(String),
    #[error("captcha node holds {0:?}, expected a single character")]
    BadText(String),
}

/// One positioned character.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptchaNode {
    pub text: char,
    pub offset: u32,
}

/// Extract positioned nodes in document order. Spans without a
/// `padding-left` are decoration and are skipped.
pub fn parse_nodes(markup: &str) -> Result<Vec<CaptchaNode>, MalformedCaptchaError> {
    let mut nodes = Vec::new();
    for span in re_span().captures_iter(markup) {
        let attrs = &span[1];
        let Some(style) = crate::html::attribute(attrs, "style") else {
            continue;
        };
        let Some(offset) = re_padding_left().captures(&style) else {
            continue;
        };
        let raw_offset = offset[1].trim();
        let offset: u32 = raw_offset
            .parse()
            .map_err(|_| MalformedCaptchaError::BadOffset(raw_offset.to_string()))?;

        let text = decode_entities(&re_tags().replace_all(&span[2], ""));
        let text = text.trim();
        let mut chars = text.chars();
        match (chars.next(), chars.next()) {
            (Some(c), None) => nodes.push(CaptchaNode { text: c, offset }),
            _ => return Err(MalformedCaptchaError::BadText(text.to_string())),
        }
    }
    Ok(nodes)
}

/// Decode the captcha in `markup`, requiring at least `expected_len` nodes
/// (pass 0 to accept any non-empty count).
pub fn decode(markup: &str, expected_len: usize) -> Result<String, MalformedCaptchaError> {
    let mut nodes = parse_nodes(markup)?;
    if nodes.is_empty() {
        return Err(MalformedCaptchaError::Empty);
    }
    if nodes.len() < expected_len {
        return Err(MalformedCaptchaError::TooFew {
            expected: expected_len,
            found: nodes.len(),
        });
    }
    // stable: equal offsets keep document order
    nodes.sort_by_key(|n| n.offset);
    Ok(nodes.into_iter().map(|n| n.text).collect())
}
