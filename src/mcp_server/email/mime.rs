//! Minimal RFC 5322 / MIME reader for the latest-email tool.
//!
//! Only what `get_latest_email` renders: the `From` and `Subject` headers
//! (raw, not RFC 2047-decoded) and a body. For multipart messages the body is
//! the first `text/plain` part in depth-first order; if there is none the body
//! is empty. Undecodable bytes are replaced, never reported.

use base64::Engine;

/// The parts of a message the tool reports.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedMessage {
    pub from: Option<String>,
    pub subject: Option<String>,
    pub body: String,
}

/// Parse a raw RFC 822 message.
pub fn parse_message(raw: &[u8]) -> ParsedMessage {
    let part = Part::parse(raw);
    let body = if part.content_type().0.starts_with("multipart/") {
        first_plain_text(&part).unwrap_or_default()
    } else {
        part.decoded_text()
    };

    ParsedMessage {
        from: part.header("from").map(str::to_string),
        subject: part.header("subject").map(str::to_string),
        body,
    }
}

// ─── Parts ──────────────────────────────────────────────────────────────────

struct Part<'a> {
    headers: Vec<(String, String)>,
    body: &'a [u8],
}

impl<'a> Part<'a> {
    fn parse(raw: &'a [u8]) -> Self {
        let (head, body) = split_head_body(raw);
        Self {
            headers: parse_headers(head),
            body,
        }
    }

    fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    /// Lower-cased MIME type and the `boundary` parameter, if any.
    fn content_type(&self) -> (String, Option<String>) {
        let Some(value) = self.header("content-type") else {
            return ("text/plain".to_string(), None);
        };
        let mut pieces = value.split(';');
        let mime = pieces.next().unwrap_or("").trim().to_ascii_lowercase();
        let boundary = pieces.find_map(|p| {
            let (key, val) = p.split_once('=')?;
            key.trim()
                .eq_ignore_ascii_case("boundary")
                .then(|| val.trim().trim_matches('"').to_string())
        });
        (mime, boundary)
    }

    fn decoded_text(&self) -> String {
        let encoding = self
            .header("content-transfer-encoding")
            .map(|e| e.trim().to_ascii_lowercase())
            .unwrap_or_default();

        let bytes = match encoding.as_str() {
            "base64" => {
                let cleaned: Vec<u8> = self
                    .body
                    .iter()
                    .copied()
                    .filter(|b| !b.is_ascii_whitespace())
                    .collect();
                base64::engine::general_purpose::STANDARD
                    .decode(&cleaned)
                    .unwrap_or_else(|_| self.body.to_vec())
            }
            "quoted-printable" => decode_quoted_printable(self.body),
            _ => self.body.to_vec(),
        };

        String::from_utf8_lossy(&bytes).into_owned()
    }
}

/// Depth-first search for the first `text/plain` leaf.
fn first_plain_text(part: &Part<'_>) -> Option<String> {
    let (mime, boundary) = part.content_type();
    if mime.starts_with("multipart/") {
        let boundary = boundary?;
        return split_multipart(part.body, &boundary)
            .into_iter()
            .map(Part::parse)
            .find_map(|child| first_plain_text(&child));
    }
    (mime == "text/plain").then(|| part.decoded_text())
}

// ─── Low-level helpers ──────────────────────────────────────────────────────

/// Split at the first blank line. A part that starts with a blank line has no headers.
fn split_head_body(raw: &[u8]) -> (&[u8], &[u8]) {
    if raw.starts_with(b"\r\n") {
        return (&[], &raw[2..]);
    }
    if raw.starts_with(b"\n") {
        return (&[], &raw[1..]);
    }
    if let Some(i) = find(raw, b"\r\n\r\n") {
        return (&raw[..i], &raw[i + 4..]);
    }
    if let Some(i) = find(raw, b"\n\n") {
        return (&raw[..i], &raw[i + 2..]);
    }
    (raw, &[])
}

/// Parse header lines, unfolding continuations. Names are lower-cased.
fn parse_headers(head: &[u8]) -> Vec<(String, String)> {
    let text = String::from_utf8_lossy(head);
    let mut headers: Vec<(String, String)> = Vec::new();

    for line in text.lines() {
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, value)) = headers.last_mut() {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = line.split_once(':') {
            headers.push((name.trim().to_ascii_lowercase(), value.trim().to_string()));
        }
    }

    headers
}

/// Split a multipart body into its raw parts (preamble and epilogue dropped).
fn split_multipart<'a>(body: &'a [u8], boundary: &str) -> Vec<&'a [u8]> {
    let delimiter = format!("--{boundary}");
    let closing = format!("--{boundary}--");
    let mut parts = Vec::new();
    let mut current_start: Option<usize> = None;
    let mut offset = 0;

    while offset < body.len() {
        let end = body[offset..]
            .iter()
            .position(|&b| b == b'\n')
            .map(|i| offset + i + 1)
            .unwrap_or(body.len());
        let line = trim_line_end(&body[offset..end]);

        let is_closing = line == closing.as_bytes();
        if is_closing || line == delimiter.as_bytes() {
            if let Some(start) = current_start {
                parts.push(trim_line_end(&body[start..offset]));
            }
            if is_closing {
                return parts;
            }
            current_start = Some(end);
        }
        offset = end;
    }

    if let Some(start) = current_start {
        parts.push(&body[start..]);
    }
    parts
}

fn trim_line_end(line: &[u8]) -> &[u8] {
    let line = line.strip_suffix(b"\n").unwrap_or(line);
    line.strip_suffix(b"\r").unwrap_or(line)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

fn decode_quoted_printable(input: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(input.len());
    let mut i = 0;

    while i < input.len() {
        if input[i] != b'=' {
            out.push(input[i]);
            i += 1;
            continue;
        }
        // Soft line breaks.
        if input[i + 1..].starts_with(b"\r\n") {
            i += 3;
            continue;
        }
        if input[i + 1..].starts_with(b"\n") {
            i += 2;
            continue;
        }
        match (input.get(i + 1).and_then(hex_value), input.get(i + 2).and_then(hex_value)) {
            (Some(hi), Some(lo)) => {
                out.push((hi << 4) | lo);
                i += 3;
            }
            _ => {
                out.push(b'=');
                i += 1;
            }
        }
    }

    out
}

fn hex_value(b: &u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

// ─── Tests ───────────────────────────────────────────────────────────────────
