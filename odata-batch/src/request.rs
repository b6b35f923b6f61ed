// Single requests and responses as carried inside a batch, and the part
// groupings the multipart codec produces.

use crate::error::BatchError;
use bytes::Bytes;
use http::header::{HeaderName, HeaderValue, CONTENT_TYPE, LOCATION};
use http::{HeaderMap, Method, StatusCode};
use odata_core::ODataError;
use serde_json::Value;

pub static ODATA_ENTITY_ID: HeaderName = HeaderName::from_static("odata-entityid");
pub static ODATA_VERSION: HeaderName = HeaderName::from_static("odata-version");

pub const JSON_CONTENT_TYPE: &str = "application/json;odata.metadata=minimal";

#[derive(Debug, Clone, PartialEq)]
pub struct ODataRequest {
    pub method: Method,
    /// Resource path relative to the service root, always starting with `/`.
    pub path: String,
    pub query: Option<String>,
    pub headers: HeaderMap,
    pub body: Bytes,
    pub content_id: Option<String>,
}

impl ODataRequest {
    /// `target` is a service-relative path with an optional query string.
    pub fn new(method: Method, target: &str) -> Self {
        let (path, query) = match target.split_once('?') {
            Some((path, query)) => (path, Some(query.to_string())),
            None => (target, None),
        };
        let path = if path.starts_with('/') {
            path.to_string()
        } else {
            format!("/{}", path)
        };
        ODataRequest {
            method,
            path,
            query,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            content_id: None,
        }
    }

    pub fn get(target: &str) -> Self {
        Self::new(Method::GET, target)
    }

    pub fn post(target: &str) -> Self {
        Self::new(Method::POST, target)
    }

    pub fn with_content_id(mut self, content_id: impl Into<String>) -> Self {
        self.content_id = Some(content_id.into());
        self
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_json(self, value: &Value) -> Self {
        self.with_header(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))
            .with_body(value.to_string())
    }

    pub fn content_id(&self) -> Option<&str> {
        self.content_id.as_deref()
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// All values of a repeatable header.
    pub fn header_values(&self, name: &str) -> Vec<&str> {
        self.headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .collect()
    }

    /// Path and query as written on a request line.
    pub fn target(&self) -> String {
        match &self.query {
            Some(query) => format!("{}?{}", self.path, query),
            None => self.path.clone(),
        }
    }

    pub fn body_json(&self) -> Result<Value, ODataError> {
        if self.body.is_empty() {
            return Err(ODataError::bad_request("Request body is empty"));
        }
        Ok(serde_json::from_slice(&self.body)?)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ODataResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: Bytes,
    /// Content-ID of the request this answers, echoed in batch output.
    pub content_id: Option<String>,
}

impl ODataResponse {
    pub fn new(status: StatusCode) -> Self {
        ODataResponse {
            status,
            headers: HeaderMap::new(),
            body: Bytes::new(),
            content_id: None,
        }
    }

    pub fn json(status: StatusCode, value: &Value) -> Self {
        Self::new(status)
            .with_header(CONTENT_TYPE, HeaderValue::from_static(JSON_CONTENT_TYPE))
            .with_body(value.to_string())
    }

    pub fn from_error(err: &ODataError) -> Self {
        let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        Self::json(status, &err.to_json())
    }

    pub fn from_batch_error(err: &BatchError) -> Self {
        let status = StatusCode::from_u16(err.status_code()).unwrap_or(StatusCode::BAD_REQUEST);
        Self::json(status, &err.to_json())
    }

    pub fn with_header(mut self, name: HeaderName, value: HeaderValue) -> Self {
        self.headers.insert(name, value);
        self
    }

    pub fn with_body(mut self, body: impl Into<Bytes>) -> Self {
        self.body = body.into();
        self
    }

    pub fn with_content_id(mut self, content_id: Option<String>) -> Self {
        self.content_id = content_id;
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    /// URI of the resource a request created or touched.
    pub fn location(&self) -> Option<&str> {
        self.headers
            .get(LOCATION)
            .or_else(|| self.headers.get(&ODATA_ENTITY_ID))
            .and_then(|v| v.to_str().ok())
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }

    pub fn body_json(&self) -> Option<Value> {
        serde_json::from_slice(&self.body).ok()
    }
}

/// Top-level unit of a batch request: one request, or a changeset.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchRequestPart {
    pub is_changeset: bool,
    pub requests: Vec<ODataRequest>,
}

impl BatchRequestPart {
    pub fn single(request: ODataRequest) -> Self {
        BatchRequestPart {
            is_changeset: false,
            requests: vec![request],
        }
    }

    pub fn changeset(requests: Vec<ODataRequest>) -> Self {
        BatchRequestPart {
            is_changeset: true,
            requests,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ODataResponsePart {
    pub is_changeset: bool,
    pub responses: Vec<ODataResponse>,
}

impl ODataResponsePart {
    pub fn single(response: ODataResponse) -> Self {
        ODataResponsePart {
            is_changeset: false,
            responses: vec![response],
        }
    }

    pub fn changeset(responses: Vec<ODataResponse>) -> Self {
        ODataResponsePart {
            is_changeset: true,
            responses,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_request_target_split() {
        let request = ODataRequest::get("Customers?$top=2");
        assert_eq!(request.path, "/Customers");
        assert_eq!(request.query.as_deref(), Some("$top=2"));
        assert_eq!(request.target(), "/Customers?$top=2");
    }

    #[test]
    fn test_request_json_body() {
        let request = ODataRequest::post("/Customers").with_json(&json!({"Name": "Ada"}));
        assert_eq!(request.header("content-type"), Some(JSON_CONTENT_TYPE));
        assert_eq!(request.body_json().unwrap()["Name"], "Ada");
        assert!(ODataRequest::post("/Customers").body_json().is_err());
    }

    #[test]
    fn test_response_location_fallback() {
        let response = ODataResponse::new(StatusCode::NO_CONTENT)
            .with_header(ODATA_ENTITY_ID.clone(), HeaderValue::from_static("http://host/svc/Customers(1)"));
        assert_eq!(response.location(), Some("http://host/svc/Customers(1)"));

        let response = response.with_header(LOCATION, HeaderValue::from_static("http://host/svc/Customers(2)"));
        assert_eq!(response.location(), Some("http://host/svc/Customers(2)"));
    }

    #[test]
    fn test_error_responses() {
        let response = ODataResponse::from_error(&ODataError::not_found("No Customers(9)"));
        assert_eq!(response.status, StatusCode::NOT_FOUND);
        assert_eq!(response.body_json().unwrap()["error"]["code"], "not_found");

        let response = ODataResponse::from_batch_error(&BatchError::handler_failure("boom"));
        assert_eq!(response.status, StatusCode::INTERNAL_SERVER_ERROR);
    }
}
