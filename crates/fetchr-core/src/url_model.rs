//! Host identity and local filename derivation for share and download URLs.

/// Used when neither headers nor the URL yield a usable name.
pub const FALLBACK_FILENAME: &str = "download.bin";

/// Linux `NAME_MAX`.
const NAME_MAX: usize = 255;

/// Host identity used for resolver lookup and per-host limits:
/// lower-cased host with a leading `www.` removed.
pub fn host_id(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let host = parsed.host_str()?.to_ascii_lowercase();
    let host = host.strip_prefix("www.").map(str::to_string).unwrap_or(host);
    (!host.is_empty()).then_some(host)
}

/// Safe local filename: `Content-Disposition` first, then the last URL path
/// segment (percent-decoded), then [`FALLBACK_FILENAME`].
pub fn derive_filename(url: &str, content_disposition: Option<&str>) -> String {
    content_disposition
        .and_then(content_disposition_filename)
        .or_else(|| last_path_segment(url))
        .map(|raw| sanitize_filename(&raw))
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| FALLBACK_FILENAME.to_string())
}

fn last_path_segment(url: &str) -> Option<String> {
    let parsed = url::Url::parse(url).ok()?;
    let segment = parsed.path_segments()?.rev().find(|s| !s.is_empty())?;
    Some(percent_decode(segment))
}

/// `filename*=UTF-8''…` wins over `filename=`.
pub fn content_disposition_filename(value: &str) -> Option<String> {
    let mut plain = None;
    for param in value.split(';') {
        let Some((name, v)) = param.split_once('=') else {
            continue;
        };
        let v = v.trim();
        match name.trim().to_ascii_lowercase().as_str() {
            "filename*" => {
                if let Some((charset, rest)) = v.split_once("''") {
                    if charset.eq_ignore_ascii_case("utf-8") {
                        let decoded = percent_decode(rest.trim_matches('"'));
                        if !decoded.is_empty() {
                            return Some(decoded);
                        }
                    }
                }
            }
            "filename" => {
                let unquoted = v
                    .strip_prefix('"')
                    .and_then(|s| s.strip_suffix('"'))
                    .map(|s| s.replace("\\\"", "\"").replace("\\\\", "\\"))
                    .unwrap_or_else(|| v.to_string());
                if !unquoted.is_empty() {
                    plain = Some(unquoted);
                }
            }
            _ => {}
        }
    }
    plain
}

fn percent_decode(input: &str) -> String {
    fn hex(b: u8) -> Option<u8> {
        (b as char).to_digit(16).map(|d| d as u8)
    }
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(h), Some(l)) = (hex(bytes[i + 1]), hex(bytes[i + 2])) {
                out.push(h << 4 | l);
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Replace path separators, NUL and control characters; trim dots and
/// whitespace at both ends; cap at `NAME_MAX` bytes on a char boundary.
pub fn sanitize_filename(name: &str) -> String {
    let replaced: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let trimmed = replaced.trim_matches(|c: char| c == '.' || c.is_whitespace());
    if trimmed.len() <= NAME_MAX {
        return trimmed.to_string();
    }
    let mut cut = NAME_MAX;
    while !trimmed.is_char_boundary(cut) {
        cut -= 1;
    }
    trimmed[..cut].to_string()
}
