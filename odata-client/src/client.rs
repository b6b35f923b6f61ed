use crate::batch::BatchBuilder;
use crate::error::{ClientError, ClientResult};
use bytes::Bytes;
use http::header::{ACCEPT, CONTENT_TYPE};
use odata_batch::{
    generate_boundary, parse_batch_response, write_batch_request, ODataRequest, ODataResponse,
    ODataResponsePart, ODATA_VERSION,
};
use reqwest::Client as HttpClient;
use std::time::Duration;
use tracing::{debug, trace};

/// Client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Absolute service root, e.g. `http://localhost:8080/odata`.
    pub service_root: String,
    pub timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_root: "http://localhost:8080/odata".to_string(),
            timeout: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Clone)]
pub struct ODataClient {
    config: ClientConfig,
    http_client: HttpClient,
}

impl ODataClient {
    pub fn new(config: ClientConfig) -> ClientResult<Self> {
        if !config.service_root.starts_with("http://") && !config.service_root.starts_with("https://") {
            return Err(ClientError::Config(format!(
                "service root '{}' must be an absolute http(s) URL",
                config.service_root
            )));
        }
        let http_client = HttpClient::builder().timeout(config.timeout).build()?;
        Ok(Self { config, http_client })
    }

    pub fn new_with_url(service_root: &str) -> ClientResult<Self> {
        Self::new(ClientConfig {
            service_root: service_root.to_string(),
            ..Default::default()
        })
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.config.service_root.trim_end_matches('/'), path)
    }

    /// Send one request outside a batch.
    pub async fn send(&self, request: ODataRequest) -> ClientResult<ODataResponse> {
        let url = self.url(&request.target());
        debug!(method = %request.method, %url, "sending request");
        let response = self
            .http_client
            .request(request.method, &url)
            .headers(request.headers)
            .header(ODATA_VERSION.clone(), "4.0")
            .body(request.body)
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let body = response.bytes().await?;
        let mut reply = ODataResponse::new(status).with_body(body);
        reply.headers = headers;
        Ok(reply)
    }

    /// Post all parts of `batch` to `{service_root}/$batch`.
    ///
    /// Returns one response part per request part, in order. A non-2xx
    /// status on the batch itself is an error.
    pub async fn execute_batch(&self, batch: BatchBuilder) -> ClientResult<Vec<ODataResponsePart>> {
        let parts = batch.build();
        if parts.is_empty() {
            return Ok(Vec::new());
        }
        let encoded = write_batch_request(&parts, &generate_boundary("batch"));
        let url = self.url("/$batch");
        debug!(%url, parts = parts.len(), size = encoded.body.len(), "sending batch");
        trace!("Request body:\n{}", String::from_utf8_lossy(&encoded.body));

        let response = self
            .http_client
            .post(&url)
            .header(CONTENT_TYPE, encoded.content_type)
            .header(ACCEPT, "multipart/mixed")
            .header(ODATA_VERSION.clone(), "4.0")
            .body(encoded.body)
            .send()
            .await?;

        let status = response.status();
        let content_type = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body: Bytes = response.bytes().await?;
        if !status.is_success() {
            return Err(ClientError::Status {
                status: status.as_u16(),
                body: String::from_utf8_lossy(&body).into_owned(),
            });
        }

        let content_type = content_type.ok_or(ClientError::MissingContentType)?;
        trace!("Response body:\n{}", String::from_utf8_lossy(&body));
        let responses = parse_batch_response(&body, &content_type, false)?;
        debug!(parts = responses.len(), "received batch response");
        Ok(responses)
    }
}
