//! MIME multipart message parsing for user-data
//!
//! Splits RFC 822 style messages into their parts, undoing any
//! Content-Transfer-Encoding on the way.

use super::types::{ContentType, media_type};
use crate::CloudInitError;
use crate::config::decode_base64;
use std::collections::HashMap;
use tracing::debug;

/// A single part from a MIME multipart message
#[derive(Debug, Clone)]
pub struct MimePart {
    /// Content type of this part
    pub content_type: ContentType,
    /// Raw Content-Type header value, parameters included
    pub mime_type: String,
    /// Decoded body
    pub body: Vec<u8>,
    /// Optional filename from Content-Disposition
    pub filename: Option<String>,
}

/// Split a message at the first blank line
fn split_message(data: &str) -> (&str, &str) {
    if data.starts_with("\r\n") {
        return ("", &data[2..]);
    }
    if data.starts_with('\n') {
        return ("", &data[1..]);
    }
    if let Some(idx) = data.find("\r\n\r\n") {
        (&data[..idx], &data[idx + 4..])
    } else if let Some(idx) = data.find("\n\n") {
        (&data[..idx], &data[idx + 2..])
    } else {
        (data, "")
    }
}

/// Parse a header block; `None` if a line is not a header
fn parse_headers(block: &str) -> Option<HashMap<String, String>> {
    let mut headers = HashMap::new();
    let mut current: Option<(String, String)> = None;

    for line in block.lines() {
        let line = line.trim_end_matches('\r');
        if line.starts_with(' ') || line.starts_with('\t') {
            let (_, value) = current.as_mut()?;
            value.push(' ');
            value.push_str(line.trim());
            continue;
        }
        let (name, value) = line.split_once(':')?;
        if name.is_empty() || name.contains(char::is_whitespace) {
            return None;
        }
        if let Some((n, v)) = current.take() {
            headers.insert(n, v);
        }
        current = Some((name.to_lowercase(), value.trim().to_string()));
    }

    if let Some((n, v)) = current {
        headers.insert(n, v);
    }
    Some(headers)
}

/// Content-Type of a top-level message, if the document is one
pub fn message_content_type(data: &str) -> Option<String> {
    let (headers, _) = split_message(data);
    parse_headers(headers)?.remove("content-type")
}

/// Body of a top-level message
pub fn message_body(data: &str) -> &str {
    split_message(data).1
}

/// Extract a parameter (`boundary`, `filename`) from a header value
fn header_param(value: &str, param: &str) -> Option<String> {
    value.split(';').skip(1).find_map(|p| {
        let (name, v) = p.split_once('=')?;
        if !name.trim().eq_ignore_ascii_case(param) {
            return None;
        }
        let v = v.trim();
        let v = v
            .strip_prefix('"')
            .and_then(|v| v.strip_suffix('"'))
            .unwrap_or(v);
        Some(v.to_string())
    })
}

/// Split a multipart body according to its Content-Type
pub fn parse_multipart(content_type: &str, body: &str) -> Result<Vec<MimePart>, CloudInitError> {
    if !media_type(content_type).starts_with("multipart/") {
        return Err(CloudInitError::parse(format!(
            "not a multipart content type: {content_type}"
        )));
    }
    let boundary = header_param(content_type, "boundary")
        .filter(|b| !b.is_empty())
        .ok_or_else(|| CloudInitError::parse("No MIME boundary found"))?;
    debug!("Found MIME boundary: {}", boundary);

    let delimiter = format!("--{boundary}");
    let mut parts = Vec::new();

    for section in body.split(&delimiter).skip(1) {
        // Closing delimiter
        if section.starts_with("--") {
            break;
        }
        // Rest of the delimiter line
        let section = match section.find('\n') {
            Some(idx) => &section[idx + 1..],
            None => continue,
        };
        // The line break before the next delimiter belongs to it
        let section = section
            .strip_suffix("\r\n")
            .or_else(|| section.strip_suffix('\n'))
            .unwrap_or(section);

        parts.push(parse_part(section)?);
    }

    debug!("Parsed {} MIME parts", parts.len());
    Ok(parts)
}

fn parse_part(data: &str) -> Result<MimePart, CloudInitError> {
    let (header_block, body) = split_message(data);
    let headers = parse_headers(header_block)
        .ok_or_else(|| CloudInitError::parse("malformed MIME part headers"))?;

    let mime_type = headers
        .get("content-type")
        .cloned()
        .unwrap_or_else(|| "text/plain".to_string());

    let filename = headers
        .get("content-disposition")
        .and_then(|cd| header_param(cd, "filename"));

    let body = match headers
        .get("content-transfer-encoding")
        .map(|s| s.to_lowercase())
        .as_deref()
    {
        Some("base64") => decode_base64(body)?,
        Some("quoted-printable") => decode_quoted_printable(body),
        _ => body.as_bytes().to_vec(),
    };

    Ok(MimePart {
        content_type: ContentType::from_mime(&mime_type),
        mime_type,
        body,
        filename,
    })
}

/// Decode quoted-printable content
fn decode_quoted_printable(data: &str) -> Vec<u8> {
    let bytes = data.as_bytes();
    let mut result = Vec::with_capacity(bytes.len());
    let mut i = 0;

    while i < bytes.len() {
        if bytes[i] != b'=' {
            result.push(bytes[i]);
            i += 1;
            continue;
        }
        // Soft line break
        if bytes[i + 1..].starts_with(b"\r\n") {
            i += 3;
            continue;
        }
        if bytes[i + 1..].starts_with(b"\n") {
            i += 2;
            continue;
        }
        let hex = bytes.get(i + 1..i + 3).and_then(|h| std::str::from_utf8(h).ok());
        match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
            Some(byte) => {
                result.push(byte);
                i += 3;
            }
            None => {
                result.push(b'=');
                i += 1;
            }
        }
    }

    result
}
