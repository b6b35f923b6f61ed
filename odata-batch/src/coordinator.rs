use crate::changeset::{substitute_content_id, ChangesetSorter};
use crate::error::{BatchError, BatchResult, MessageKey};
use crate::multipart::{generate_boundary, is_multipart_mixed, parse_batch_request, write_batch_response, ServiceRoot};
use crate::request::{BatchRequestPart, ODataRequest, ODataResponse, ODataResponsePart, ODATA_VERSION};
use async_trait::async_trait;
use http::header::{HeaderValue, CONTENT_TYPE};
use http::{Method, StatusCode};
use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Dispatches one request extracted from a batch.
#[async_trait]
pub trait RequestHandler: Send + Sync {
    async fn handle(&self, request: ODataRequest) -> Result<ODataResponse, BatchError>;
}

#[derive(Debug, Clone)]
pub struct BatchConfig {
    /// Service root that request URIs inside the batch are resolved against.
    pub base_uri: String,
    pub strict: bool,
    /// Upper bound on the number of requests across all parts.
    pub max_parts: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        BatchConfig {
            base_uri: "/".to_string(),
            strict: true,
            max_parts: 100,
        }
    }
}

#[derive(Clone)]
pub struct BatchCoordinator {
    config: BatchConfig,
    root: ServiceRoot,
    handler: Arc<dyn RequestHandler>,
}

impl fmt::Debug for BatchCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BatchCoordinator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl BatchCoordinator {
    pub fn new(config: BatchConfig, handler: Arc<dyn RequestHandler>) -> BatchResult<Self> {
        let root = ServiceRoot::parse(&config.base_uri)?;
        Ok(BatchCoordinator { config, root, handler })
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Execute a `$batch` request. An `Err` means the batch as a whole was
    /// rejected before any part ran.
    #[tracing::instrument(skip_all, fields(base_uri = %self.config.base_uri, bytes = request.body.len()))]
    pub async fn handle(&self, request: ODataRequest) -> BatchResult<ODataResponse> {
        if request.method != Method::POST {
            return Err(BatchError::new(
                MessageKey::InvalidMethod,
                format!("$batch requires POST, got {}", request.method),
            ));
        }
        let content_type = request
            .header("content-type")
            .filter(|ct| is_multipart_mixed(ct))
            .ok_or_else(|| {
                BatchError::new(
                    MessageKey::InvalidContentType,
                    "$batch requires a multipart/mixed Content-Type",
                )
            })?;

        let parts = parse_batch_request(&request.body, content_type, &self.config.base_uri, self.config.strict)?;
        let total: usize = parts.iter().map(|p| p.requests.len()).sum();
        if total > self.config.max_parts {
            warn!(total, limit = self.config.max_parts, "batch exceeds request limit");
            return Err(BatchError::new(
                MessageKey::TooManyParts,
                format!("Batch holds {} requests, the limit is {}", total, self.config.max_parts),
            ));
        }

        // Sorting every changeset first keeps a bad reference from leaving
        // earlier parts executed.
        let parts = parts
            .into_iter()
            .map(|part| {
                if part.is_changeset {
                    Ok(BatchRequestPart::changeset(ChangesetSorter.sort(part.requests)?))
                } else {
                    Ok(part)
                }
            })
            .collect::<BatchResult<Vec<_>>>()?;

        let mut responses = Vec::with_capacity(parts.len());
        for part in parts {
            let response = if part.is_changeset {
                self.execute_changeset(part.requests).await
            } else {
                self.execute_plain(part.requests).await
            };
            responses.push(response);
        }

        let boundary = generate_boundary("batchresponse");
        let encoded = write_batch_response(&responses, &boundary);
        info!(parts = responses.len(), requests = total, "batch executed");

        let content_type = HeaderValue::from_str(&encoded.content_type)
            .map_err(|_| BatchError::invalid_header("Generated boundary is not a valid header value"))?;
        Ok(ODataResponse::new(StatusCode::OK)
            .with_header(CONTENT_TYPE, content_type)
            .with_header(ODATA_VERSION.clone(), HeaderValue::from_static("4.0"))
            .with_body(encoded.body))
    }

    async fn execute_plain(&self, requests: Vec<ODataRequest>) -> ODataResponsePart {
        let mut responses = Vec::with_capacity(requests.len());
        for request in requests {
            let content_id = request.content_id.clone();
            let response = match self.handler.handle(request).await {
                Ok(response) => response,
                Err(err) => {
                    warn!(error = %err, "batch request failed");
                    ODataResponse::from_batch_error(&err)
                }
            };
            responses.push(response.with_content_id(content_id));
        }
        ODataResponsePart {
            is_changeset: false,
            responses,
        }
    }

    /// Run sorted changeset members in order. The first failure abandons the
    /// rest and becomes the only response for the changeset.
    async fn execute_changeset(&self, requests: Vec<ODataRequest>) -> ODataResponsePart {
        let mut pending: VecDeque<ODataRequest> = requests.into();
        let mut responses = Vec::with_capacity(pending.len());

        while let Some(request) = pending.pop_front() {
            let content_id = request.content_id.clone();
            let target = format!("{} {}", request.method, request.path);
            let response = match self.handler.handle(request).await {
                Ok(response) if response.is_success() => response,
                Ok(response) => {
                    warn!(%target, status = response.status.as_u16(), skipped = pending.len(), "changeset aborted");
                    return ODataResponsePart::single(response.with_content_id(content_id));
                }
                Err(err) => {
                    warn!(%target, error = %err, skipped = pending.len(), "changeset aborted");
                    return ODataResponsePart::single(ODataResponse::from_batch_error(&err).with_content_id(content_id));
                }
            };

            if let (Some(id), Some(location)) = (content_id.as_deref(), response.location()) {
                match self.root.resolve(location) {
                    Ok((resource_path, _)) => {
                        let mut rewritten = 0;
                        for pending_request in pending.iter_mut() {
                            if substitute_content_id(pending_request, id, &resource_path) {
                                rewritten += 1;
                            }
                        }
                        debug!(content_id = id, %resource_path, rewritten, "content-id resolved");
                    }
                    Err(err) => warn!(content_id = id, location, error = %err, "location outside service root"),
                }
            }
            responses.push(response.with_content_id(content_id));
        }
        ODataResponsePart::changeset(responses)
    }
}
