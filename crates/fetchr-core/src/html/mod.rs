//! Minimal share-page scraping: forms, attributes, links, entities.
//!
//! Hosts emit small, regular markup, so this sticks to cached regexes rather
//! than a DOM. Anything structurally unexpected yields `None` and the caller
//! reports the page as changed.

mod entities;
mod form;

pub use entities::decode_entities;
pub use form::{find_form_by_field, find_forms, Form};

use regex::Regex;
use std::sync::OnceLock;

fn re_attr() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r#"(?is)([a-z_:][-a-z0-9_:.]*)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s"'>]+))"#)
            .unwrap()
    })
}

fn re_captcha_block() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(
            r#"(?is)<div\b[^>]*\bstyle\s*=\s*["'][^"']*background\s*:\s*#ccc[^"']*["'][^>]*>(.*?)</div>"#,
        )
        .unwrap()
    })
}

fn re_table() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?is)<table\b.*?</table>").unwrap())
}

fn re_anchor() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?is)<a\b([^>]*)>").unwrap())
}

fn re_direct_link_anchor() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| {
        Regex::new(r#"(?is)\bid\s*=\s*["']direct_link["'][^>]*>.*?<a\b([^>]*)>"#).unwrap()
    })
}

/// Attributes of a tag's attribute text, names lower-cased, values entity-decoded.
pub fn parse_attributes(tag_attrs: &str) -> Vec<(String, String)> {
    re_attr()
        .captures_iter(tag_attrs)
        .map(|c| {
            let name = c[1].to_ascii_lowercase();
            let raw = c
                .get(2)
                .or_else(|| c.get(3))
                .or_else(|| c.get(4))
                .map_or("", |m| m.as_str());
            (name, decode_entities(raw))
        })
        .collect()
}

pub fn attribute(tag_attrs: &str, name: &str) -> Option<String> {
    parse_attributes(tag_attrs)
        .into_iter()
        .find(|(k, _)| k.eq_ignore_ascii_case(name))
        .map(|(_, v)| v)
}

/// Inner markup of the CSS-position captcha box (`div` styled `background:#ccc`).
pub fn find_captcha_block(html: &str) -> Option<&str> {
    re_captcha_block()
        .captures(html)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
}

/// Direct download link embedded in a page, absolute against `base`.
///
/// Tried in order: an absolute link inside a table, the anchor in
/// `#direct_link`, an anchor with class `downloadbtn`.
pub fn find_direct_link(html: &str, base: &url::Url) -> Option<String> {
    let in_table = re_table().find_iter(html).find_map(|t| {
        re_anchor()
            .captures_iter(t.as_str())
            .filter_map(|c| attribute(&c[1], "href"))
            .find(|href| href.contains("://"))
    });
    let in_direct_link = || {
        re_direct_link_anchor()
            .captures(html)
            .and_then(|c| attribute(&c[1], "href"))
    };
    let download_btn = || {
        re_anchor().captures_iter(html).find_map(|c| {
            let attrs = &c[1];
            let is_btn = attribute(attrs, "class")
                .is_some_and(|cls| cls.split_whitespace().any(|k| k == "downloadbtn"));
            if is_btn {
                attribute(attrs, "href")
            } else {
                None
            }
        })
    };

    let href = in_table
        .or_else(in_direct_link)
        .or_else(download_btn)
        .filter(|h| !h.trim().is_empty())?;
    base.join(href.trim()).ok().map(String::from)
}
