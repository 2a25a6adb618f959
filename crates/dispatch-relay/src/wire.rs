//! Wire-level HTTP/1.1 codec for the requests embedded in poll bodies and
//! the responses shipped back to the bridge.

use bytes::Bytes;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::{Method, StatusCode};
use thiserror::Error;

const MAX_HEADERS: usize = 64;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("malformed HTTP request: {0}")]
    Malformed(String),

    #[error("truncated HTTP request")]
    Truncated,
}

/// An HTTP request parsed out of a poll body, ready to be replayed against
/// the local endpoint. The body is fully buffered so the request is
/// replayable and its length known.
#[derive(Debug)]
pub struct EmbeddedRequest {
    pub method: Method,
    /// Origin-form target: path plus optional query.
    pub path: String,
    pub headers: HeaderMap,
    pub body: Bytes,
}

/// Parses the serialised HTTP/1.1 request carried in a poll body.
pub fn parse_request(raw: &[u8]) -> Result<EmbeddedRequest, WireError> {
    let mut header_buf = [httparse::EMPTY_HEADER; MAX_HEADERS];
    let mut parsed = httparse::Request::new(&mut header_buf);

    let header_len = match parsed
        .parse(raw)
        .map_err(|err| WireError::Malformed(err.to_string()))?
    {
        httparse::Status::Complete(len) => len,
        httparse::Status::Partial => return Err(WireError::Truncated),
    };

    let method = parsed
        .method
        .ok_or_else(|| WireError::Malformed("missing method".to_string()))?;
    let method = Method::from_bytes(method.as_bytes())
        .map_err(|err| WireError::Malformed(err.to_string()))?;
    let path = origin_form(
        parsed
            .path
            .ok_or_else(|| WireError::Malformed("missing request target".to_string()))?,
    );

    let mut headers = HeaderMap::new();
    let mut content_length: Option<usize> = None;
    for header in parsed.headers.iter() {
        let name = HeaderName::from_bytes(header.name.as_bytes())
            .map_err(|err| WireError::Malformed(err.to_string()))?;
        let value = HeaderValue::from_bytes(header.value)
            .map_err(|err| WireError::Malformed(err.to_string()))?;
        match name.as_str() {
            "content-length" => {
                let len = value
                    .to_str()
                    .ok()
                    .and_then(|v| v.trim().parse::<usize>().ok())
                    .ok_or_else(|| WireError::Malformed("invalid content-length".to_string()))?;
                content_length = Some(len);
            }
            "transfer-encoding" => {
                return Err(WireError::Malformed(
                    "transfer-encoding is not supported".to_string(),
                ))
            }
            // The host is rewritten to the local endpoint on replay.
            "host" => {}
            _ => {
                headers.append(name, value);
            }
        }
    }

    let rest = &raw[header_len..];
    let body = match content_length {
        Some(len) if len > rest.len() => return Err(WireError::Truncated),
        Some(len) => Bytes::copy_from_slice(&rest[..len]),
        None => Bytes::copy_from_slice(rest),
    };

    Ok(EmbeddedRequest {
        method,
        path,
        headers,
        body,
    })
}

/// Reduces an absolute-form target left by the parser to origin-form, so the
/// replayed request always addresses the configured local endpoint.
fn origin_form(target: &str) -> String {
    for scheme in ["http://", "https://"] {
        if let Some(rest) = target.strip_prefix(scheme) {
            return match rest.find('/') {
                Some(idx) => rest[idx..].to_string(),
                None => "/".to_string(),
            };
        }
    }
    target.to_string()
}

/// Serialises an HTTP/1.1 response suitable as the POST body to the bridge.
pub fn serialize_response(status: StatusCode, headers: &HeaderMap, body: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 256);
    out.extend_from_slice(b"HTTP/1.1 ");
    out.extend_from_slice(status.as_str().as_bytes());
    out.push(b' ');
    out.extend_from_slice(status.canonical_reason().unwrap_or("").as_bytes());
    out.extend_from_slice(b"\r\n");

    for (name, value) in headers.iter() {
        if matches!(name.as_str(), "content-length" | "transfer-encoding") {
            continue;
        }
        out.extend_from_slice(name.as_str().as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }

    out.extend_from_slice(format!("Content-Length: {}\r\n\r\n", body.len()).as_bytes());
    out.extend_from_slice(body);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_embedded_request() {
        let raw = b"POST /dispatch.sdk.v1.FunctionService/Run HTTP/1.1\r\n\
                    Host: upstream.example\r\n\
                    Content-Type: application/proto\r\n\
                    Content-Length: 5\r\n\
                    \r\n\
                    hello";
        let req = parse_request(raw).unwrap();
        assert_eq!(req.method, Method::POST);
        assert_eq!(req.path, "/dispatch.sdk.v1.FunctionService/Run");
        assert_eq!(
            req.headers.get("content-type").unwrap(),
            "application/proto"
        );
        assert!(req.headers.get("host").is_none());
        assert_eq!(&req.body[..], b"hello");
    }

    #[test]
    fn clears_absolute_uri() {
        let raw = b"GET http://upstream.example/work?x=1 HTTP/1.1\r\n\r\n";
        let req = parse_request(raw).unwrap();
        assert_eq!(req.path, "/work?x=1");
        assert!(req.body.is_empty());
    }

    #[test]
    fn rejects_truncated_body() {
        let raw = b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nshort";
        assert!(matches!(parse_request(raw), Err(WireError::Truncated)));
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            parse_request(b"\x00\x01\x02 nope"),
            Err(WireError::Malformed(_))
        ));
    }

    #[test]
    fn serializes_response_with_recomputed_length() {
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/proto"));
        headers.insert("content-length", HeaderValue::from_static("999"));
        let out = serialize_response(StatusCode::OK, &headers, b"abc");
        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with("HTTP/1.1 200 OK\r\n"));
        assert!(text.contains("content-type: application/proto\r\n"));
        assert!(text.contains("Content-Length: 3\r\n\r\nabc"));
        assert!(!text.contains("999"));
    }
}
