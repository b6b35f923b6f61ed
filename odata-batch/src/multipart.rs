// multipart/mixed codec for $batch bodies.
//
// A batch body is a sequence of parts separated by `--boundary` lines and
// closed by `--boundary--`. Each part is either an `application/http`
// message or a nested `multipart/mixed` changeset.

use crate::error::{BatchError, BatchResult, MessageKey};
use crate::request::{BatchRequestPart, ODataRequest, ODataResponse, ODataResponsePart};
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_LENGTH, CONTENT_TYPE};
use http::{HeaderMap, Method, StatusCode};
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, trace};
use uuid::Uuid;

const CRLF: &[u8] = b"\r\n";
const CONTENT_ID: &str = "content-id";

static BOUNDARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i);\s*boundary\s*=\s*(?:"([^"]*)"|([^;\s]+))"#).expect("boundary pattern is valid")
});

fn bad(key: MessageKey, message: impl Into<String>) -> BatchError {
    BatchError::new(key, message)
}

pub fn is_multipart_mixed(content_type: &str) -> bool {
    media_type_is(content_type, "multipart/mixed")
}

fn media_type_is(content_type: &str, expected: &str) -> bool {
    content_type
        .split(';')
        .next()
        .is_some_and(|mt| mt.trim().eq_ignore_ascii_case(expected))
}

/// RFC 2046 `bchars`.
fn is_bchar(c: char) -> bool {
    c.is_ascii_alphanumeric() || "'()+_,-./:=? ".contains(c)
}

/// Extract and validate the `boundary` parameter of a multipart/mixed type.
pub fn boundary_from_content_type(content_type: &str) -> BatchResult<String> {
    if !is_multipart_mixed(content_type) {
        return Err(bad(
            MessageKey::InvalidContentType,
            format!("Expected multipart/mixed, found '{}'", content_type),
        ));
    }
    let caps = BOUNDARY_RE.captures(content_type).ok_or_else(|| {
        bad(
            MessageKey::MissingBoundary,
            format!("Content type '{}' has no boundary parameter", content_type),
        )
    })?;
    let boundary = caps
        .get(1)
        .or_else(|| caps.get(2))
        .map_or("", |m| m.as_str());
    if boundary.is_empty() || boundary.len() > 70 || boundary.ends_with(' ') || !boundary.chars().all(is_bchar) {
        return Err(bad(
            MessageKey::InvalidContentType,
            format!("Invalid multipart boundary '{}'", boundary),
        ));
    }
    Ok(boundary.to_string())
}

pub fn generate_boundary(prefix: &str) -> String {
    format!("{}_{}", prefix, Uuid::new_v4())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Eol {
    CrLf,
    Lf,
    None,
}

#[derive(Debug)]
struct Line<'a> {
    text: &'a str,
    start: usize,
    /// Offset just past the line terminator.
    end: usize,
    eol: Eol,
}

fn lines(input: &str) -> Vec<Line<'_>> {
    let bytes = input.as_bytes();
    let mut out = Vec::new();
    let mut start = 0;
    while start < input.len() {
        let line = match input[start..].find('\n') {
            Some(i) => {
                let nl = start + i;
                if nl > start && bytes[nl - 1] == b'\r' {
                    Line { text: &input[start..nl - 1], start, end: nl + 1, eol: Eol::CrLf }
                } else {
                    Line { text: &input[start..nl], start, end: nl + 1, eol: Eol::Lf }
                }
            }
            None => Line { text: &input[start..], start, end: input.len(), eol: Eol::None },
        };
        start = line.end;
        out.push(line);
    }
    out
}

fn strip_trailing_eol(text: &str) -> &str {
    text.strip_suffix("\r\n")
        .or_else(|| text.strip_suffix('\n'))
        .unwrap_or(text)
}

/// Split a multipart body into raw part texts. Preamble and epilogue are
/// dropped; the line break before each delimiter belongs to the delimiter.
fn split_parts<'a>(body: &'a str, boundary: &str, strict: bool) -> BatchResult<Vec<&'a str>> {
    let delimiter = format!("--{}", boundary);
    let close = format!("--{}--", boundary);
    let mut parts = Vec::new();
    let mut current: Option<usize> = None;
    let mut seen_delimiter = false;

    for line in lines(body) {
        // Transport padding after the delimiter is allowed.
        let text = line.text.trim_end_matches([' ', '\t']);
        let is_close = text == close;
        if !is_close && text != delimiter {
            continue;
        }
        if strict && line.eol == Eol::Lf {
            return Err(BatchError::invalid_header("Multipart delimiter lines must end with CRLF"));
        }
        seen_delimiter = true;
        if let Some(start) = current.take() {
            parts.push(strip_trailing_eol(&body[start..line.start]));
        }
        if is_close {
            trace!(boundary, parts = parts.len(), "multipart closed");
            return Ok(parts);
        }
        current = Some(line.end);
    }

    if seen_delimiter {
        Err(bad(
            MessageKey::MissingCloseDelimiter,
            format!("Missing close delimiter '--{}--'", boundary),
        ))
    } else {
        Err(bad(
            MessageKey::MissingBoundary,
            format!("Body contains no delimiter for boundary '{}'", boundary),
        ))
    }
}

/// Parse a header block up to the first empty line; returns the headers and
/// the remaining text.
fn parse_headers(text: &str, strict: bool) -> BatchResult<(HeaderMap, &str)> {
    let mut fields: Vec<(String, String)> = Vec::new();
    let mut rest = "";

    for line in lines(text) {
        if strict && line.eol == Eol::Lf {
            return Err(BatchError::invalid_header("Header lines must end with CRLF"));
        }
        if line.text.is_empty() {
            rest = &text[line.end..];
            break;
        }
        if line.text.starts_with([' ', '\t']) {
            let Some((_, value)) = fields.last_mut() else {
                return Err(BatchError::invalid_header("Header continuation without a header"));
            };
            value.push(' ');
            value.push_str(line.text.trim());
            continue;
        }
        let (name, value) = line
            .text
            .split_once(':')
            .ok_or_else(|| BatchError::invalid_header(format!("Malformed header line '{}'", line.text)))?;
        if strict && name.ends_with([' ', '\t']) {
            return Err(BatchError::invalid_header(format!("Whitespace before colon in '{}'", line.text)));
        }
        fields.push((name.trim().to_string(), value.trim().to_string()));
    }

    let mut headers = HeaderMap::new();
    for (name, value) in fields {
        let header_name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| BatchError::invalid_header(format!("Invalid header name '{}'", name)))?;
        let header_value = HeaderValue::from_str(&value)
            .map_err(|_| BatchError::invalid_header(format!("Invalid value for header '{}'", name)))?;
        headers.append(header_name, header_value);
    }
    Ok((headers, rest))
}

fn header_str<'a>(headers: &'a HeaderMap, name: impl http::header::AsHeaderName) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

enum PartKind {
    Http,
    Changeset(String),
}

fn part_kind(mime: &HeaderMap, strict: bool) -> BatchResult<PartKind> {
    match header_str(mime, CONTENT_TYPE) {
        None if strict => Err(bad(MessageKey::InvalidContentType, "Batch part without Content-Type")),
        None => Ok(PartKind::Http),
        Some(ct) if is_multipart_mixed(ct) => Ok(PartKind::Changeset(boundary_from_content_type(ct)?)),
        Some(ct) if media_type_is(ct, "application/http") => Ok(PartKind::Http),
        Some(ct) => Err(bad(
            MessageKey::InvalidContentType,
            format!("Unsupported batch part content type '{}'", ct),
        )),
    }
}

/// Service root the request URIs of a batch are resolved against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRoot {
    origin: Option<String>,
    path: String,
}

impl ServiceRoot {
    /// `http://host/svc/`, `/svc` or an empty root.
    pub fn parse(base_uri: &str) -> BatchResult<Self> {
        let trimmed = base_uri.trim_end_matches('/');
        if let Some(idx) = trimmed.find("://") {
            let after = idx + 3;
            let (origin, path) = match trimmed[after..].find('/') {
                Some(i) => trimmed.split_at(after + i),
                None => (trimmed, ""),
            };
            if origin.len() == after {
                return Err(bad(MessageKey::InvalidUri, format!("Base URI '{}' has no host", base_uri)));
            }
            return Ok(ServiceRoot {
                origin: Some(origin.to_string()),
                path: path.to_string(),
            });
        }
        if trimmed.is_empty() || trimmed.starts_with('/') {
            return Ok(ServiceRoot {
                origin: None,
                path: trimmed.to_string(),
            });
        }
        Err(bad(MessageKey::InvalidUri, format!("Invalid base URI '{}'", base_uri)))
    }

    /// Absolute URI of a service-relative path.
    pub fn absolute(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        match &self.origin {
            Some(origin) => format!("{}{}/{}", origin, self.path, path),
            None => format!("{}/{}", self.path, path),
        }
    }

    /// Service-relative path and query of a request-line URI.
    pub fn resolve(&self, uri: &str) -> BatchResult<(String, Option<String>)> {
        let outside = || bad(MessageKey::InvalidUri, format!("URI '{}' is not below the service root", uri));
        let relative = if uri.contains("://") {
            let origin = self.origin.as_deref().ok_or_else(outside)?;
            let matches_origin = uri
                .get(..origin.len())
                .is_some_and(|prefix| prefix.eq_ignore_ascii_case(origin));
            if !matches_origin {
                return Err(outside());
            }
            self.strip_root_path(&uri[origin.len()..]).ok_or_else(outside)?
        } else if uri.starts_with('/') {
            self.strip_root_path(uri).ok_or_else(outside)?
        } else {
            uri
        };

        let (path, query) = match relative.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (relative, None),
        };
        Ok((format!("/{}", path.trim_start_matches('/')), query))
    }

    fn strip_root_path<'a>(&self, path: &'a str) -> Option<&'a str> {
        if self.path.is_empty() {
            return Some(path);
        }
        let rest = path.strip_prefix(self.path.as_str())?;
        (rest.is_empty() || rest.starts_with(['/', '?'])).then_some(rest)
    }
}

/// First line of `text` and everything after its terminator.
fn split_first_line(text: &str, strict: bool) -> BatchResult<(&str, &str)> {
    for line in lines(text) {
        if line.text.is_empty() && !strict {
            continue;
        }
        if strict && line.eol == Eol::Lf {
            return Err(BatchError::invalid_header("Start lines must end with CRLF"));
        }
        return Ok((line.text, &text[line.end..]));
    }
    Ok(("", ""))
}

fn parse_method(text: &str) -> BatchResult<Method> {
    let method = match text {
        "GET" => Method::GET,
        "POST" => Method::POST,
        "PUT" => Method::PUT,
        "PATCH" => Method::PATCH,
        "DELETE" => Method::DELETE,
        "HEAD" => Method::HEAD,
        other => return Err(bad(MessageKey::InvalidMethod, format!("Invalid method '{}'", other))),
    };
    Ok(method)
}

fn body_bytes(headers: &HeaderMap, body: &str, strict: bool) -> BatchResult<Bytes> {
    let Some(declared) = header_str(headers, CONTENT_LENGTH) else {
        return Ok(Bytes::copy_from_slice(body.as_bytes()));
    };
    let length: usize = declared
        .trim()
        .parse()
        .map_err(|_| BatchError::invalid_header(format!("Invalid Content-Length '{}'", declared)))?;
    let bytes = body.as_bytes();
    if length <= bytes.len() {
        Ok(Bytes::copy_from_slice(&bytes[..length]))
    } else if strict {
        Err(BatchError::invalid_header(format!(
            "Content-Length {} exceeds the {} bytes present",
            length,
            bytes.len()
        )))
    } else {
        Ok(Bytes::copy_from_slice(bytes))
    }
}

fn take_content_id(mime: &HeaderMap, inner: &mut HeaderMap) -> Option<String> {
    let inner_id = inner.remove(CONTENT_ID).and_then(|v| v.to_str().ok().map(str::to_string));
    header_str(mime, CONTENT_ID).map(str::to_string).or(inner_id)
}

fn parse_http_request(mime: &HeaderMap, content: &str, root: &ServiceRoot, strict: bool) -> BatchResult<ODataRequest> {
    let (request_line, rest) = split_first_line(content, strict)?;
    let fields: Vec<&str> = request_line.split(' ').filter(|f| !f.is_empty()).collect();
    let (method, uri) = match fields.as_slice() {
        [method, uri, version] if version.starts_with("HTTP/") => (*method, *uri),
        [method, uri] if !strict => (*method, *uri),
        _ => {
            return Err(bad(
                MessageKey::InvalidRequestLine,
                format!("Invalid request line '{}'", request_line),
            ))
        }
    };
    let method = parse_method(method)?;
    let (path, query) = root.resolve(uri)?;
    let (mut headers, body) = parse_headers(rest, strict)?;
    let body = body_bytes(&headers, body, strict)?;
    headers.remove(CONTENT_LENGTH);
    let content_id = take_content_id(mime, &mut headers);

    Ok(ODataRequest {
        method,
        path,
        query,
        headers,
        body,
        content_id,
    })
}

/// Parse a `$batch` request body into its parts.
pub fn parse_batch_request(
    body: &[u8],
    content_type: &str,
    base_uri: &str,
    strict: bool,
) -> BatchResult<Vec<BatchRequestPart>> {
    let boundary = boundary_from_content_type(content_type)?;
    let text = std::str::from_utf8(body).map_err(|_| BatchError::invalid_header("Batch body is not valid UTF-8"))?;
    let root = ServiceRoot::parse(base_uri)?;

    let mut parts = Vec::new();
    for raw in split_parts(text, &boundary, strict)? {
        let (mime, content) = parse_headers(raw, strict)?;
        match part_kind(&mime, strict)? {
            PartKind::Http => {
                parts.push(BatchRequestPart::single(parse_http_request(&mime, content, &root, strict)?));
            }
            PartKind::Changeset(changeset_boundary) => {
                let mut requests = Vec::new();
                for raw in split_parts(content, &changeset_boundary, strict)? {
                    let (mime, content) = parse_headers(raw, strict)?;
                    if let PartKind::Changeset(_) = part_kind(&mime, strict)? {
                        return Err(bad(MessageKey::InvalidContentType, "Changesets must not be nested"));
                    }
                    let request = parse_http_request(&mime, content, &root, strict)?;
                    if strict && request.content_id.is_none() {
                        return Err(bad(
                            MessageKey::MissingContentId,
                            format!("Changeset request {} {} has no Content-ID", request.method, request.path),
                        ));
                    }
                    if strict && matches!(request.method, Method::GET | Method::HEAD) {
                        return Err(bad(
                            MessageKey::InvalidChangesetMethod,
                            format!("{} is not allowed inside a changeset", request.method),
                        ));
                    }
                    requests.push(request);
                }
                parts.push(BatchRequestPart::changeset(requests));
            }
        }
    }
    debug!(parts = parts.len(), strict, "parsed batch request");
    Ok(parts)
}

fn parse_http_response(mime: &HeaderMap, content: &str, strict: bool) -> BatchResult<ODataResponse> {
    let (status_line, rest) = split_first_line(content, strict)?;
    let invalid = || bad(MessageKey::InvalidStatusLine, format!("Invalid status line '{}'", status_line));
    let mut fields = status_line.splitn(3, ' ');
    let version = fields.next().unwrap_or_default();
    if !version.starts_with("HTTP/") {
        return Err(invalid());
    }
    let status = fields
        .next()
        .and_then(|code| code.parse::<u16>().ok())
        .and_then(|code| StatusCode::from_u16(code).ok())
        .ok_or_else(invalid)?;
    let (mut headers, body) = parse_headers(rest, strict)?;
    let body = body_bytes(&headers, body, strict)?;
    headers.remove(CONTENT_LENGTH);
    let content_id = take_content_id(mime, &mut headers);

    Ok(ODataResponse {
        status,
        headers,
        body,
        content_id,
    })
}

/// Parse a `$batch` response body; the client-side counterpart of
/// [`write_batch_response`].
pub fn parse_batch_response(body: &[u8], content_type: &str, strict: bool) -> BatchResult<Vec<ODataResponsePart>> {
    let boundary = boundary_from_content_type(content_type)?;
    let text = std::str::from_utf8(body).map_err(|_| BatchError::invalid_header("Batch body is not valid UTF-8"))?;

    let mut parts = Vec::new();
    for raw in split_parts(text, &boundary, strict)? {
        let (mime, content) = parse_headers(raw, strict)?;
        match part_kind(&mime, strict)? {
            PartKind::Http => parts.push(ODataResponsePart::single(parse_http_response(&mime, content, strict)?)),
            PartKind::Changeset(changeset_boundary) => {
                let responses = split_parts(content, &changeset_boundary, strict)?
                    .into_iter()
                    .map(|raw| {
                        let (mime, content) = parse_headers(raw, strict)?;
                        parse_http_response(&mime, content, strict)
                    })
                    .collect::<BatchResult<Vec<_>>>()?;
                parts.push(ODataResponsePart::changeset(responses));
            }
        }
    }
    debug!(parts = parts.len(), "parsed batch response");
    Ok(parts)
}

/// Encoded multipart message.
#[derive(Debug, Clone, PartialEq)]
pub struct MultipartBody {
    pub content_type: String,
    pub body: Bytes,
}

fn multipart_content_type(boundary: &str) -> String {
    format!("multipart/mixed; boundary={}", boundary)
}

struct Writer {
    out: Vec<u8>,
}

impl Writer {
    fn new() -> Self {
        Writer { out: Vec::new() }
    }

    fn line(&mut self, text: &str) {
        self.out.extend_from_slice(text.as_bytes());
        self.out.extend_from_slice(CRLF);
    }

    fn mime_headers(&mut self, boundary: &str, content_id: Option<&str>) {
        self.line(&format!("--{}", boundary));
        self.line("Content-Type: application/http");
        self.line("Content-Transfer-Encoding: binary");
        if let Some(id) = content_id {
            self.line(&format!("Content-ID: {}", id));
        }
        self.line("");
    }

    /// Message headers with a recomputed Content-Length, then the body.
    fn message(&mut self, headers: &HeaderMap, body: &[u8], always_length: bool) {
        for (name, value) in headers {
            if name == CONTENT_LENGTH {
                continue;
            }
            self.out.extend_from_slice(name.as_str().as_bytes());
            self.out.extend_from_slice(b": ");
            self.out.extend_from_slice(value.as_bytes());
            self.out.extend_from_slice(CRLF);
        }
        if always_length || !body.is_empty() {
            self.line(&format!("Content-Length: {}", body.len()));
        }
        self.line("");
        self.out.extend_from_slice(body);
        self.out.extend_from_slice(CRLF);
    }

    fn response(&mut self, boundary: &str, response: &ODataResponse) {
        self.mime_headers(boundary, response.content_id.as_deref());
        let reason = response.status.canonical_reason().unwrap_or("");
        self.line(format!("HTTP/1.1 {} {}", response.status.as_u16(), reason).trim_end());
        self.message(&response.headers, &response.body, true);
    }

    fn request(&mut self, boundary: &str, request: &ODataRequest) {
        self.mime_headers(boundary, request.content_id.as_deref());
        let target = request.target();
        self.line(&format!("{} {} HTTP/1.1", request.method, target.trim_start_matches('/')));
        self.message(&request.headers, &request.body, false);
    }

    fn changeset_open(&mut self, boundary: &str, changeset_boundary: &str) {
        self.line(&format!("--{}", boundary));
        self.line(&format!("Content-Type: {}", multipart_content_type(changeset_boundary)));
        self.line("");
    }

    fn close(&mut self, boundary: &str) {
        self.line(&format!("--{}--", boundary));
    }

    fn finish(self, boundary: &str) -> MultipartBody {
        MultipartBody {
            content_type: multipart_content_type(boundary),
            body: Bytes::from(self.out),
        }
    }
}

/// Serialize response parts in their original order. Each response carries
/// its Content-ID in the part's MIME headers.
pub fn write_batch_response(parts: &[ODataResponsePart], boundary: &str) -> MultipartBody {
    let mut writer = Writer::new();
    for part in parts {
        if part.is_changeset {
            let changeset = generate_boundary("changesetresponse");
            writer.changeset_open(boundary, &changeset);
            for response in &part.responses {
                writer.response(&changeset, response);
            }
            writer.close(&changeset);
        } else {
            for response in &part.responses {
                writer.response(boundary, response);
            }
        }
    }
    writer.close(boundary);
    writer.finish(boundary)
}

/// Serialize request parts; request lines use service-relative URIs.
pub fn write_batch_request(parts: &[BatchRequestPart], boundary: &str) -> MultipartBody {
    let mut writer = Writer::new();
    for part in parts {
        if part.is_changeset {
            let changeset = generate_boundary("changeset");
            writer.changeset_open(boundary, &changeset);
            for request in &part.requests {
                writer.request(&changeset, request);
            }
            writer.close(&changeset);
        } else {
            for request in &part.requests {
                writer.request(boundary, request);
            }
        }
    }
    writer.close(boundary);
    writer.finish(boundary)
}

#[cfg(test)]
mod tests {
    use super::*;

    const BASE: &str = "http://host/service/";
    const CT: &str = "multipart/mixed; boundary=batch_36522ad7";

    fn crlf(text: &str) -> String {
        text.replace('\n', "\r\n")
    }

    fn sample_batch() -> String {
        crlf(concat!(
            "preamble is ignored\n",
            "--batch_36522ad7\n",
            "Content-Type: application/http\n",
            "Content-Transfer-Encoding: binary\n",
            "\n",
            "GET Customers('ALFKI')?$select=Name HTTP/1.1\n",
            "Accept: application/json\n",
            "\n",
            "\n",
            "--batch_36522ad7\n",
            "Content-Type: multipart/mixed; boundary=changeset_77162fcd\n",
            "\n",
            "--changeset_77162fcd\n",
            "Content-Type: application/http\n",
            "Content-ID: 1\n",
            "\n",
            "POST /service/Customers HTTP/1.1\n",
            "Content-Type: application/json\n",
            "Content-Length: 14\n",
            "\n",
            "{\"Name\":\"Ada\"}\n",
            "--changeset_77162fcd\n",
            "Content-Type: application/http\n",
            "\n",
            "PATCH $1 HTTP/1.1\n",
            "Content-ID: 2\n",
            "Content-Type: application/json\n",
            "\n",
            "{\"Age\":36}\n",
            "--changeset_77162fcd--\n",
            "--batch_36522ad7--\n",
            "epilogue",
        ))
    }

    #[test]
    fn test_boundary_extraction() {
        assert_eq!(boundary_from_content_type(CT).unwrap(), "batch_36522ad7");
        assert_eq!(
            boundary_from_content_type("Multipart/Mixed;boundary=\"a b:c\"").unwrap(),
            "a b:c"
        );
        assert_eq!(
            boundary_from_content_type("application/json").unwrap_err().key,
            MessageKey::InvalidContentType
        );
        assert_eq!(
            boundary_from_content_type("multipart/mixed").unwrap_err().key,
            MessageKey::MissingBoundary
        );
        assert_eq!(
            boundary_from_content_type("multipart/mixed; boundary=\"\"").unwrap_err().key,
            MessageKey::InvalidContentType
        );
    }

    #[test]
    fn test_parse_plain_and_changeset_parts() {
        let body = sample_batch();
        let parts = parse_batch_request(body.as_bytes(), CT, BASE, true).unwrap();
        assert_eq!(parts.len(), 2);

        assert!(!parts[0].is_changeset);
        let get = &parts[0].requests[0];
        assert_eq!(get.method, Method::GET);
        assert_eq!(get.path, "/Customers('ALFKI')");
        assert_eq!(get.query.as_deref(), Some("$select=Name"));
        assert_eq!(get.header("accept"), Some("application/json"));
        assert!(get.body.is_empty());

        assert!(parts[1].is_changeset);
        let post = &parts[1].requests[0];
        assert_eq!(post.path, "/Customers");
        assert_eq!(post.content_id(), Some("1"));
        assert_eq!(post.body.as_ref(), b"{\"Name\":\"Ada\"}");

        let patch = &parts[1].requests[1];
        assert_eq!(patch.method, Method::PATCH);
        assert_eq!(patch.path, "/$1");
        assert_eq!(patch.content_id(), Some("2"));
        assert!(patch.header("content-id").is_none());
        assert_eq!(patch.body.as_ref(), b"{\"Age\":36}");
    }

    #[test]
    fn test_mime_content_id_wins_over_inner() {
        let body = crlf(concat!(
            "--b\n",
            "Content-Type: application/http\n",
            "Content-ID: outer\n",
            "\n",
            "GET People HTTP/1.1\n",
            "Content-ID: inner\n",
            "\n",
            "\n",
            "--b--\n",
        ));
        let parts = parse_batch_request(body.as_bytes(), "multipart/mixed;boundary=b", BASE, true).unwrap();
        assert_eq!(parts[0].requests[0].content_id(), Some("outer"));
    }

    #[test]
    fn test_lenient_line_endings() {
        let body = sample_batch().replace("\r\n", "\n");
        let parts = parse_batch_request(body.as_bytes(), CT, BASE, false).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].requests.len(), 2);

        let err = parse_batch_request(body.as_bytes(), CT, BASE, true).unwrap_err();
        assert_eq!(err.key, MessageKey::InvalidHeader);
    }

    #[test]
    fn test_missing_close_delimiter() {
        let body = sample_batch().replace("--batch_36522ad7--", "");
        let err = parse_batch_request(body.as_bytes(), CT, BASE, true).unwrap_err();
        assert_eq!(err.key, MessageKey::MissingCloseDelimiter);

        let err = parse_batch_request(b"no parts at all", CT, BASE, false).unwrap_err();
        assert_eq!(err.key, MessageKey::MissingBoundary);
    }

    #[test]
    fn test_strict_changeset_rules() {
        let get_in_changeset = crlf(concat!(
            "--b\n",
            "Content-Type: multipart/mixed; boundary=c\n",
            "\n",
            "--c\n",
            "Content-Type: application/http\n",
            "Content-ID: 1\n",
            "\n",
            "GET People HTTP/1.1\n",
            "\n",
            "\n",
            "--c--\n",
            "--b--\n",
        ));
        let ct = "multipart/mixed; boundary=b";
        let err = parse_batch_request(get_in_changeset.as_bytes(), ct, BASE, true).unwrap_err();
        assert_eq!(err.key, MessageKey::InvalidChangesetMethod);
        assert!(parse_batch_request(get_in_changeset.as_bytes(), ct, BASE, false).is_ok());

        let no_content_id = get_in_changeset.replace("Content-ID: 1\r\n", "").replace("GET", "DELETE");
        let err = parse_batch_request(no_content_id.as_bytes(), ct, BASE, true).unwrap_err();
        assert_eq!(err.key, MessageKey::MissingContentId);
    }

    #[test]
    fn test_rejects_malformed_parts() {
        let ct = "multipart/mixed; boundary=b";
        let bad_method = crlf("--b\nContent-Type: application/http\n\nFETCH People HTTP/1.1\n\n\n--b--\n");
        assert_eq!(
            parse_batch_request(bad_method.as_bytes(), ct, BASE, true).unwrap_err().key,
            MessageKey::InvalidMethod
        );

        let bad_line = crlf("--b\nContent-Type: application/http\n\nGET\n\n\n--b--\n");
        assert_eq!(
            parse_batch_request(bad_line.as_bytes(), ct, BASE, true).unwrap_err().key,
            MessageKey::InvalidRequestLine
        );

        let bad_type = crlf("--b\nContent-Type: text/plain\n\nhello\n--b--\n");
        assert_eq!(
            parse_batch_request(bad_type.as_bytes(), ct, BASE, true).unwrap_err().key,
            MessageKey::InvalidContentType
        );

        let bad_header = crlf("--b\nContent-Type: application/http\n\nGET People HTTP/1.1\nno colon here\n\n\n--b--\n");
        assert_eq!(
            parse_batch_request(bad_header.as_bytes(), ct, BASE, true).unwrap_err().key,
            MessageKey::InvalidHeader
        );

        let foreign = crlf("--b\nContent-Type: application/http\n\nGET http://other/People HTTP/1.1\n\n\n--b--\n");
        assert_eq!(
            parse_batch_request(foreign.as_bytes(), ct, BASE, true).unwrap_err().key,
            MessageKey::InvalidUri
        );
    }

    #[test]
    fn test_service_root_resolution() {
        let root = ServiceRoot::parse("http://Host/svc/").unwrap();
        assert_eq!(root.resolve("http://host/svc/People(1)").unwrap(), ("/People(1)".to_string(), None));
        assert_eq!(
            root.resolve("/svc/People?$top=1").unwrap(),
            ("/People".to_string(), Some("$top=1".to_string()))
        );
        assert_eq!(root.resolve("People").unwrap().0, "/People");
        assert_eq!(root.resolve("$3/Orders").unwrap().0, "/$3/Orders");
        assert!(root.resolve("/svcx/People").is_err());
        assert_eq!(root.absolute("/People(1)"), "http://Host/svc/People(1)");

        let bare = ServiceRoot::parse("").unwrap();
        assert_eq!(bare.resolve("/People").unwrap().0, "/People");
        assert!(ServiceRoot::parse("svc").is_err());
    }

    #[test]
    fn test_content_length_limits_body() {
        let ct = "multipart/mixed; boundary=b";
        let body = crlf("--b\nContent-Type: application/http\n\nPOST People HTTP/1.1\nContent-Length: 2\n\n{}trailing\n--b--\n");
        let parts = parse_batch_request(body.as_bytes(), ct, BASE, true).unwrap();
        assert_eq!(parts[0].requests[0].body.as_ref(), b"{}");

        let short = crlf("--b\nContent-Type: application/http\n\nPOST People HTTP/1.1\nContent-Length: 99\n\n{}\n--b--\n");
        assert!(parse_batch_request(short.as_bytes(), ct, BASE, true).is_err());
        assert!(parse_batch_request(short.as_bytes(), ct, BASE, false).is_ok());
    }

    #[test]
    fn test_response_writer_echoes_content_id() {
        let created = ODataResponse::json(StatusCode::CREATED, &serde_json::json!({"ID": 1}))
            .with_header(http::header::LOCATION, HeaderValue::from_static("http://host/service/Customers(1)"))
            .with_content_id(Some("1".to_string()));
        let updated = ODataResponse::new(StatusCode::NO_CONTENT).with_content_id(Some("2".to_string()));
        let read = ODataResponse::json(StatusCode::OK, &serde_json::json!({"value": []}));
        let parts = vec![
            ODataResponsePart::single(read),
            ODataResponsePart::changeset(vec![created, updated]),
        ];

        let encoded = write_batch_response(&parts, "batchresponse_1");
        assert_eq!(encoded.content_type, "multipart/mixed; boundary=batchresponse_1");
        let text = std::str::from_utf8(&encoded.body).unwrap();
        assert!(text.contains("Content-ID: 1\r\n"));
        assert!(text.contains("HTTP/1.1 201 Created\r\n"));
        assert!(text.contains("HTTP/1.1 204 No Content\r\n"));
        assert!(text.ends_with("--batchresponse_1--\r\n"));

        let decoded = parse_batch_response(&encoded.body, &encoded.content_type, true).unwrap();
        assert_eq!(decoded, parts);
    }

    #[test]
    fn test_request_writer_output_parses_back() {
        let parts = vec![
            BatchRequestPart::single(ODataRequest::get("/Customers?$top=2")),
            BatchRequestPart::changeset(vec![
                ODataRequest::post("/Customers")
                    .with_content_id("1")
                    .with_json(&serde_json::json!({"Name": "Ada"})),
                ODataRequest::new(Method::PATCH, "/$1")
                    .with_content_id("2")
                    .with_json(&serde_json::json!({"Age": 36})),
            ]),
        ];
        let encoded = write_batch_request(&parts, "batch_x");
        let text = std::str::from_utf8(&encoded.body).unwrap();
        assert!(text.contains("GET Customers?$top=2 HTTP/1.1\r\n"));
        assert!(text.contains("PATCH $1 HTTP/1.1\r\n"));

        let decoded = parse_batch_request(&encoded.body, &encoded.content_type, BASE, true).unwrap();
        assert_eq!(decoded, parts);
    }
}
