//! HTTP request parsing and URL-encoded form decoding.
//!
//! Wire input is untrusted. The parser clamps declared body sizes to
//! [`MAX_CONTENT_LENGTH`], degrades invalid text to empty values instead of
//! erroring, and passes malformed percent escapes through literally. A
//! request that cannot be parsed at all yields `None`; the connection is
//! simply closed.

use std::collections::HashMap;
use std::fmt;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};

/// Clamp on the declared Content-Length; a provisioning form fits well
/// within it and anything larger is a memory-exhaustion attempt.
pub const MAX_CONTENT_LENGTH: usize = 1024;

/// Clamp on the request line and each header line.
const MAX_LINE_LENGTH: usize = 1024;

/// HTTP request method.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
    Other(String),
}

impl Method {
    fn parse(s: &str) -> Self {
        match s {
            "GET" => Method::Get,
            "POST" => Method::Post,
            other => Method::Other(other.to_string()),
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Method::Get => write!(f, "GET"),
            Method::Post => write!(f, "POST"),
            Method::Other(s) => write!(f, "{}", s),
        }
    }
}

/// One parsed request.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub path: String,
    /// Header names lower-cased; values trimmed.
    pub headers: HashMap<String, String>,
    /// Raw body text; empty unless a POST carried one.
    pub body: String,
    /// Decoded form parameters; the last occurrence of a duplicate key wins.
    pub params: HashMap<String, String>,
}

impl HttpRequest {
    /// Header value by case-insensitive name.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
    }

    /// Form parameter by exact key.
    pub fn param(&self, key: &str) -> Option<&str> {
        self.params.get(key).map(String::as_str)
    }
}

/// Read one request from a connection.
///
/// Returns `Ok(None)` for malformed or empty input (close without a reply)
/// and `Err` only for transport failures.
pub async fn read_request<R>(reader: &mut R) -> std::io::Result<Option<HttpRequest>>
where
    R: AsyncBufRead + Unpin,
{
    let Some(request_line) = read_line_clamped(reader).await? else {
        return Ok(None);
    };
    let request_line = request_line.trim();
    if request_line.is_empty() {
        return Ok(None);
    }

    let mut parts = request_line.splitn(3, ' ');
    let (Some(method), Some(path)) = (parts.next(), parts.next()) else {
        return Ok(None);
    };
    if path.is_empty() {
        return Ok(None);
    }
    let method = Method::parse(method);
    let path = path.to_string();

    // Headers until the blank line; track Content-Length, clamped
    let mut headers = HashMap::new();
    let mut content_length = 0usize;
    loop {
        let Some(line) = read_line_clamped(reader).await? else {
            break;
        };
        let line = line.trim_end_matches(['\r', '\n']);
        if line.is_empty() {
            break;
        }
        let Some((name, value)) = line.split_once(':') else {
            continue;
        };
        let name = name.trim().to_ascii_lowercase();
        let value = value.trim().to_string();
        if name == "content-length" {
            content_length = value
                .parse::<usize>()
                .map(|n| n.min(MAX_CONTENT_LENGTH))
                .unwrap_or(0);
        }
        headers.insert(name, value);
    }

    // Body only for POST, and only the clamped byte count
    let mut body = String::new();
    if method == Method::Post && content_length > 0 {
        let mut raw = vec![0u8; content_length];
        match reader.read_exact(&mut raw).await {
            Ok(_) => body = String::from_utf8(raw).unwrap_or_default(),
            // A client that lied about its length gets an empty body
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {}
            Err(e) => return Err(e),
        }
    }

    let params = if body.is_empty() {
        HashMap::new()
    } else {
        parse_form(&body)
    };

    Ok(Some(HttpRequest {
        method,
        path,
        headers,
        body,
        params,
    }))
}

/// Read one line, dropping the connection's input on oversized lines.
async fn read_line_clamped<R>(reader: &mut R) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut line = String::new();
    let read = reader.take(MAX_LINE_LENGTH as u64).read_line(&mut line).await?;
    if read == 0 {
        return Ok(None);
    }
    // take() can split a line at the clamp; treat that as malformed
    if read == MAX_LINE_LENGTH && !line.ends_with('\n') {
        return Ok(None);
    }
    Ok(Some(line))
}

/// Decode a URL-encoded form body.
///
/// Pairs split on `&`, keys and values on the first `=`. Values get `+`
/// replaced with space and `%XX` escapes decoded; keys are matched
/// literally. The last occurrence of a duplicate key wins.
pub fn parse_form(body: &str) -> HashMap<String, String> {
    let mut params = HashMap::new();
    for pair in body.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            params.insert(key.to_string(), url_decode(value));
        }
    }
    params
}

/// Percent-decode a form value.
///
/// `+` becomes space; `%XX` with two hex digits becomes the byte; malformed
/// escapes pass through literally. The decoded bytes are interpreted as
/// UTF-8 with invalid sequences replaced, never raised.
fn url_decode(value: &str) -> String {
    let value = value.replace('+', " ");
    let mut bytes = Vec::with_capacity(value.len());
    let mut rest = value.as_bytes();
    while let Some(pos) = rest.iter().position(|&b| b == b'%') {
        bytes.extend_from_slice(&rest[..pos]);
        let escape = &rest[pos..];
        if escape.len() >= 3 {
            let hex = std::str::from_utf8(&escape[1..3]).ok();
            match hex.and_then(|h| u8::from_str_radix(h, 16).ok()) {
                Some(byte) => {
                    bytes.push(byte);
                    rest = &escape[3..];
                    continue;
                }
                None => {}
            }
        }
        bytes.push(b'%');
        rest = &escape[1..];
    }
    bytes.extend_from_slice(rest);
    String::from_utf8_lossy(&bytes).into_owned()
}
