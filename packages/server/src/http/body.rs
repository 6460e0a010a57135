//! Request body parsing
//!
//! Bodies arrive as a single bounded byte buffer (`Content-Length` is
//! required; chunked request bodies are not accepted). Parsing dispatches
//! on the media type. JSON is kept as raw text with a best-effort flat
//! key/value extraction rather than a full parse.

use bytes::Bytes;

use super::escape::percent_decode;

/// Parsed request body, tagged by media type.
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedBody {
    /// `application/json`: raw text plus flat top-level key/value pairs.
    Json { raw: String, fields: Vec<(String, String)> },
    /// `application/x-www-form-urlencoded` pairs in document order.
    Form(Vec<(String, String)>),
    /// `multipart/form-data` field name/value pairs.
    Multipart(Vec<(String, String)>),
    /// `text/plain` content.
    Text(String),
    /// Anything else.
    Raw(Bytes),
    Empty,
}

impl ParsedBody {
    /// Field pairs regardless of the source encoding.
    #[must_use]
    pub fn fields(&self) -> &[(String, String)] {
        match self {
            Self::Json { fields, .. } | Self::Form(fields) | Self::Multipart(fields) => fields,
            _ => &[],
        }
    }

    /// Short tag used in handler acknowledgements.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Json { .. } => "json",
            Self::Form(_) => "form",
            Self::Multipart(_) => "multipart",
            Self::Text(_) => "text",
            Self::Raw(_) => "raw",
            Self::Empty => "empty",
        }
    }
}

/// Dispatches on the `Content-Type` header value.
#[must_use]
pub fn parse(content_type: Option<&str>, body: &Bytes) -> ParsedBody {
    if body.is_empty() {
        return ParsedBody::Empty;
    }
    let Some(content_type) = content_type else {
        return ParsedBody::Raw(body.clone());
    };
    let media_type = content_type
        .split(';')
        .next()
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase();

    match media_type.as_str() {
        "application/json" => {
            let raw = String::from_utf8_lossy(body).into_owned();
            let fields = extract_flat_json(&raw);
            ParsedBody::Json { raw, fields }
        }
        "application/x-www-form-urlencoded" => {
            let text = String::from_utf8_lossy(body);
            ParsedBody::Form(parse_urlencoded(&text))
        }
        "multipart/form-data" => match boundary_param(content_type) {
            Some(boundary) => ParsedBody::Multipart(parse_multipart(body, &boundary)),
            None => ParsedBody::Raw(body.clone()),
        },
        "text/plain" => ParsedBody::Text(String::from_utf8_lossy(body).into_owned()),
        _ => ParsedBody::Raw(body.clone()),
    }
}

/// Splits on `&` then the first `=`, percent-decoding both halves.
#[must_use]
pub fn parse_urlencoded(text: &str) -> Vec<(String, String)> {
    text.split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (percent_decode(k, true), percent_decode(v, true)),
            None => (percent_decode(pair, true), String::new()),
        })
        .collect()
}

/// Best-effort flat extraction of top-level `"key": value` pairs. Nested
/// objects and arrays are skipped wholesale; this is intentionally not a
/// JSON parser.
fn extract_flat_json(raw: &str) -> Vec<(String, String)> {
    let mut fields = Vec::new();
    let bytes = raw.as_bytes();
    let mut depth = 0i32;
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'{' | b'[' => {
                depth += 1;
                i += 1;
            }
            b'}' | b']' => {
                depth -= 1;
                i += 1;
            }
            b'"' if depth == 1 => {
                let Some((key, after_key)) = read_string(bytes, i) else {
                    break;
                };
                let mut j = after_key;
                while j < bytes.len() && (bytes[j] as char).is_whitespace() {
                    j += 1;
                }
                if j < bytes.len() && bytes[j] == b':' {
                    j += 1;
                    while j < bytes.len() && (bytes[j] as char).is_whitespace() {
                        j += 1;
                    }
                    let (value, next) = read_scalar(bytes, j);
                    if let Some(value) = value {
                        fields.push((key, value));
                    }
                    i = next;
                } else {
                    i = after_key;
                }
            }
            _ => i += 1,
        }
    }
    fields
}

/// Reads a quoted string starting at `start`, returning (content, index
/// past the closing quote).
fn read_string(bytes: &[u8], start: usize) -> Option<(String, usize)> {
    let mut out = String::new();
    let mut i = start + 1;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => return Some((out, i + 1)),
            b'\\' if i + 1 < bytes.len() => {
                let escaped = bytes[i + 1];
                out.push(match escaped {
                    b'n' => '\n',
                    b't' => '\t',
                    b'r' => '\r',
                    other => other as char,
                });
                i += 2;
            }
            b => {
                out.push(b as char);
                i += 1;
            }
        }
    }
    None
}

/// Reads one scalar value (string, number, bool, null). Structured values
/// return `None` but still advance past their extent.
fn read_scalar(bytes: &[u8], start: usize) -> (Option<String>, usize) {
    if start >= bytes.len() {
        return (None, start);
    }
    match bytes[start] {
        b'"' => match read_string(bytes, start) {
            Some((s, next)) => (Some(s), next),
            None => (None, bytes.len()),
        },
        b'{' | b'[' => {
            let open = bytes[start];
            let close = if open == b'{' { b'}' } else { b']' };
            let mut depth = 0;
            let mut i = start;
            while i < bytes.len() {
                if bytes[i] == open {
                    depth += 1;
                } else if bytes[i] == close {
                    depth -= 1;
                    if depth == 0 {
                        return (None, i + 1);
                    }
                }
                i += 1;
            }
            (None, bytes.len())
        }
        _ => {
            let mut i = start;
            while i < bytes.len() && !matches!(bytes[i], b',' | b'}' | b']') {
                i += 1;
            }
            let value = String::from_utf8_lossy(&bytes[start..i]).trim().to_string();
            if value.is_empty() {
                (None, i)
            } else {
                (Some(value), i)
            }
        }
    }
}

fn boundary_param(content_type: &str) -> Option<String> {
    content_type.split(';').skip(1).find_map(|param| {
        let (key, value) = param.trim().split_once('=')?;
        if key.trim().eq_ignore_ascii_case("boundary") {
            Some(value.trim().trim_matches('"').to_string())
        } else {
            None
        }
    })
}

/// Simple multipart form: split on `--boundary`, pull `name="…"` from the
/// part's Content-Disposition, then take the first non-empty line after
/// the blank separator as the value.
fn parse_multipart(body: &Bytes, boundary: &str) -> Vec<(String, String)> {
    let text = String::from_utf8_lossy(body);
    let marker = format!("--{boundary}");
    let mut fields = Vec::new();

    for part in text.split(marker.as_str()) {
        let part = part.trim_start_matches("\r\n");
        if part.is_empty() || part.starts_with("--") {
            continue;
        }
        let Some(name) = part
            .lines()
            .find(|line| line.to_ascii_lowercase().starts_with("content-disposition"))
            .and_then(extract_name)
        else {
            continue;
        };

        let value = part
            .split_once("\r\n\r\n")
            .or_else(|| part.split_once("\n\n"))
            .map(|(_, rest)| rest)
            .and_then(|rest| rest.lines().find(|line| !line.trim().is_empty()))
            .unwrap_or("")
            .trim_end_matches('\r')
            .to_string();
        fields.push((name, value));
    }
    fields
}

fn extract_name(disposition: &str) -> Option<String> {
    let idx = disposition.find("name=\"")?;
    let rest = &disposition[idx + 6..];
    let end = rest.find('"')?;
    Some(rest[..end].to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn urlencoded_pairs_decode() {
        let body = Bytes::from_static(b"user=jo%40example.com&msg=hello+world&flag");
        let parsed = parse(Some("application/x-www-form-urlencoded"), &body);
        assert_eq!(
            parsed.fields(),
            &[
                ("user".to_string(), "jo@example.com".to_string()),
                ("msg".to_string(), "hello world".to_string()),
                ("flag".to_string(), String::new()),
            ]
        );
    }

    #[test]
    fn json_keeps_raw_and_extracts_flat_fields() {
        let body = Bytes::from_static(
            br#"{"name": "alice", "age": 30, "active": true, "nested": {"x": 1}}"#,
        );
        let parsed = parse(Some("application/json"), &body);
        match &parsed {
            ParsedBody::Json { raw, fields } => {
                assert!(raw.contains("alice"));
                assert_eq!(
                    fields,
                    &vec![
                        ("name".to_string(), "alice".to_string()),
                        ("age".to_string(), "30".to_string()),
                        ("active".to_string(), "true".to_string()),
                    ]
                );
            }
            other => panic!("unexpected parse: {other:?}"),
        }
    }

    #[test]
    fn multipart_extracts_named_fields() {
        let body = Bytes::from_static(
            b"--XBOUND\r\n\
              Content-Disposition: form-data; name=\"field1\"\r\n\
              \r\n\
              value1\r\n\
              --XBOUND\r\n\
              Content-Disposition: form-data; name=\"field2\"\r\n\
              \r\n\
              value2\r\n\
              --XBOUND--\r\n",
        );
        let parsed = parse(Some("multipart/form-data; boundary=XBOUND"), &body);
        assert_eq!(
            parsed.fields(),
            &[
                ("field1".to_string(), "value1".to_string()),
                ("field2".to_string(), "value2".to_string()),
            ]
        );
    }

    #[test]
    fn unknown_content_type_stays_raw() {
        let body = Bytes::from_static(b"\x00\x01\x02");
        let parsed = parse(Some("application/octet-stream"), &body);
        assert_eq!(parsed, ParsedBody::Raw(body));
    }

    #[test]
    fn text_plain_decodes_utf8() {
        let body = Bytes::from_static("héllo".as_bytes());
        assert_eq!(
            parse(Some("text/plain; charset=utf-8"), &body),
            ParsedBody::Text("héllo".to_string())
        );
    }
}
