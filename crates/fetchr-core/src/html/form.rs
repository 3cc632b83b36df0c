use regex::Regex;
use std::sync::OnceLock;

use super::{attribute, parse_attributes};

fn re_form() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?is)<form\b([^>]*)>(.*?)</form>").unwrap())
}

fn re_input() -> &'static Regex {
    static R: OnceLock<Regex> = OnceLock::new();
    R.get_or_init(|| Regex::new(r"(?is)<input\b([^>]*)>").unwrap())
}

/// An HTML form with its named inputs in document order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Form {
    pub name: Option<String>,
    pub action: Option<String>,
    pub method: Option<String>,
    pub fields: Vec<(String, String)>,
    /// Markup between `<form>` and `</form>`.
    pub inner_html: String,
}

impl Form {
    pub fn field(&self, name: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Set `name`, replacing an existing field of that name.
    pub fn set_field(&mut self, name: &str, value: &str) {
        match self.fields.iter_mut().find(|(k, _)| k == name) {
            Some(slot) => slot.1 = value.to_string(),
            None => self.fields.push((name.to_string(), value.to_string())),
        }
    }
}

pub fn find_forms(html: &str) -> Vec<Form> {
    re_form()
        .captures_iter(html)
        .map(|c| {
            let attrs = &c[1];
            let inner = &c[2];
            let fields = re_input()
                .captures_iter(inner)
                .filter_map(|ic| {
                    let input = parse_attributes(&ic[1]);
                    let get = |k: &str| input.iter().find(|(n, _)| n == k).map(|(_, v)| v.clone());
                    let name = get("name").filter(|n| !n.is_empty())?;
                    Some((name, get("value").unwrap_or_default()))
                })
                .collect();
            Form {
                name: attribute(attrs, "name"),
                action: attribute(attrs, "action").filter(|a| !a.trim().is_empty()),
                method: attribute(attrs, "method"),
                fields,
                inner_html: inner.to_string(),
            }
        })
        .collect()
}

/// The form whose `field` input carries `value`. Decoy forms with a
/// different value are skipped regardless of position.
pub fn find_form_by_field(html: &str, field: &str, value: &str) -> Option<Form> {
    find_forms(html)
        .into_iter()
        .find(|f| f.field(field) == Some(value))
}
