//! Line-based, ICAP-like request/response framing for the adaptation server
//! (spec.md §4.5). Ground truth:
//! `examples/original_source/gateway-sidecar/anthropic_icap_server.py`.

use std::collections::BTreeMap;

use crate::errors::AdaptationError;

/// The 5-byte chunked terminator a preview body consists of when the
/// client wants a 100-equivalent continue before sending the real body.
pub const PREVIEW_SENTINEL: &[u8] = b"0\r\n\r\n";

/// The method line of a parsed request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// Capability handshake.
    Options,
    /// Request modification (credential injection).
    ReqMod,
}

/// A parsed adaptation request.
#[derive(Debug, Clone)]
pub struct Request {
    /// The requested method.
    pub method: Method,
    /// The encapsulated HTTP request's header block, line by line.
    pub http_request_headers: Vec<String>,
    /// The encapsulated HTTP request's body bytes, if any.
    pub http_request_body: Vec<u8>,
    /// Whether the body is the preview sentinel (awaiting the real body).
    pub is_preview: bool,
}

fn parse_encapsulated_offsets(header_value: &str) -> Result<BTreeMap<String, usize>, AdaptationError> {
    let mut offsets = BTreeMap::new();
    for part in header_value.split(',') {
        let part = part.trim();
        let Some((key, value)) = part.split_once('=') else {
            return Err(AdaptationError::MalformedEncapsulated(format!(
                "unparseable segment: {part}"
            )));
        };
        let offset: usize = value
            .trim()
            .parse()
            .map_err(|_| AdaptationError::MalformedEncapsulated(format!("non-numeric offset: {value}")))?;
        offsets.insert(key.trim().to_string(), offset);
    }
    Ok(offsets)
}

/// Parse a raw adaptation request frame (everything up to and including the
/// header/body separator, plus whatever body bytes have been read so far).
pub fn parse_request(raw: &[u8]) -> Result<Request, AdaptationError> {
    let text = String::from_utf8_lossy(raw);
    let Some(header_end) = text.find("\r\n\r\n") else {
        return Err(AdaptationError::Malformed("no header terminator found".to_string()));
    };

    let header_block = &text[..header_end];
    let mut lines = header_block.split("\r\n");

    let request_line = lines.next().unwrap_or_default();
    let method = if request_line.starts_with("OPTIONS ") {
        Method::Options
    } else if request_line.starts_with("REQMOD ") {
        Method::ReqMod
    } else {
        let verb = request_line.split_whitespace().next().unwrap_or("").to_string();
        return Err(AdaptationError::UnsupportedMethod(verb));
    };

    let mut encapsulated: Option<String> = None;
    let mut http_request_headers = Vec::new();
    for line in lines {
        if let Some(value) = line
            .strip_prefix("Encapsulated:")
            .or_else(|| line.strip_prefix("encapsulated:"))
        {
            encapsulated = Some(value.trim().to_string());
        } else if !line.is_empty() {
            http_request_headers.push(line.to_string());
        }
    }

    let body_start = header_end + 4;
    let body_bytes = &raw[body_start.min(raw.len())..];

    let is_preview = body_bytes == PREVIEW_SENTINEL;

    if method == Method::ReqMod && encapsulated.is_none() {
        return Err(AdaptationError::MalformedEncapsulated("missing Encapsulated header".to_string()));
    }
    if let Some(value) = &encapsulated {
        parse_encapsulated_offsets(value)?;
    }

    Ok(Request {
        method,
        http_request_headers,
        http_request_body: body_bytes.to_vec(),
        is_preview,
    })
}

/// Build a 100-equivalent interim continue response.
#[must_use]
pub fn build_continue_response() -> Vec<u8> {
    b"ICAP/1.0 100 Continue\r\n\r\n".to_vec()
}

/// Build a 204-equivalent "no modification" response.
#[must_use]
pub fn build_no_modification_response() -> Vec<u8> {
    b"ICAP/1.0 204 No Content\r\n\r\n".to_vec()
}

/// Build a 405-equivalent "unsupported method" response.
#[must_use]
pub fn build_unsupported_method_response() -> Vec<u8> {
    b"ICAP/1.0 405 Method Not Allowed\r\n\r\n".to_vec()
}

/// Build a 400-equivalent "malformed request" response.
#[must_use]
pub fn build_bad_request_response() -> Vec<u8> {
    b"ICAP/1.0 400 Bad Request\r\n\r\n".to_vec()
}

/// Build an OPTIONS response advertising REQMOD support and preview.
#[must_use]
pub fn build_options_response() -> Vec<u8> {
    let body = concat!(
        "ICAP/1.0 200 OK\r\n",
        "Methods: REQMOD\r\n",
        "Service: sandbox-gateway adaptation server\r\n",
        "ISTag: \"gw-1\"\r\n",
        "Max-Connections: 100\r\n",
        "Options-TTL: 3600\r\n",
        "Allow: 204\r\n",
        "Preview: 0\r\n",
        "Transfer-Preview: *\r\n",
        "\r\n",
    );
    body.as_bytes().to_vec()
}

/// Build a 200-equivalent REQMOD response carrying the modified header
/// block and a chunked-passthrough body. `body_already_chunked` reflects
/// whether `body` bytes already carry chunked framing (the usual case,
/// since the adaptation server passes the encapsulated HTTP body through
/// byte for byte).
#[must_use]
pub fn build_reqmod_response(
    http_headers: &[String],
    body: &[u8],
    body_already_chunked: bool,
) -> Vec<u8> {
    let header_block = http_headers.join("\r\n");
    let req_hdr_len = header_block.len() + 4; // header block + trailing \r\n\r\n
    let encapsulated = if body.is_empty() {
        format!("req-hdr=0, null-body={req_hdr_len}")
    } else {
        format!("req-hdr=0, req-body={req_hdr_len}")
    };

    let mut out = Vec::new();
    out.extend_from_slice(b"ICAP/1.0 200 OK\r\n");
    out.extend_from_slice(format!("Encapsulated: {encapsulated}\r\n").as_bytes());
    out.extend_from_slice(b"\r\n");
    out.extend_from_slice(header_block.as_bytes());
    out.extend_from_slice(b"\r\n\r\n");

    if !body.is_empty() {
        if body_already_chunked {
            out.extend_from_slice(body);
        } else {
            out.extend_from_slice(format!("{:x}\r\n", body.len()).as_bytes());
            out.extend_from_slice(body);
            out.extend_from_slice(b"\r\n0\r\n\r\n");
        }
    }

    out
}

/// Remove any client-supplied `x-api-key`/`authorization` headers
/// (case-insensitive), leaving every other header untouched. Used both as
/// the first step of credential injection and, when no credential is
/// currently loaded, on its own — a client-supplied placeholder must never
/// reach the upstream host unmodified.
#[must_use]
pub fn strip_placeholder_auth_headers(http_headers: &[String]) -> Vec<String> {
    http_headers
        .iter()
        .filter(|line| {
            let lower = line.to_lowercase();
            !(lower.starts_with("x-api-key:") || lower.starts_with("authorization:"))
        })
        .cloned()
        .collect()
}

/// Strip `x-api-key`/`authorization` headers (case-insensitive) and insert
/// the credential store's current header in their place, right before the
/// header block's end.
#[must_use]
pub fn inject_credential_header(
    http_headers: &[String],
    header_name: &str,
    header_value: &str,
) -> Vec<String> {
    let mut result = strip_placeholder_auth_headers(http_headers);
    result.push(format!("{header_name}: {header_value}"));
    result
}
