use http::Method;
use odata_batch::{BatchRequestPart, ODataRequest};
use serde_json::Value;
use std::fmt;

/// Handle for a changeset request, usable as the first segment of a later
/// request target in the same changeset.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentIdRef {
    id: String,
}

impl ContentIdRef {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// `$n` followed by `path`, e.g. `$1/Items`.
    pub fn join(&self, path: &str) -> String {
        let path = path.trim_start_matches('/');
        if path.is_empty() {
            self.to_string()
        } else {
            format!("${}/{}", self.id, path)
        }
    }
}

impl fmt::Display for ContentIdRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "${}", self.id)
    }
}

/// Collects the parts of one `$batch` request in order.
#[derive(Debug, Default)]
pub struct BatchBuilder {
    parts: Vec<BatchRequestPart>,
    next_content_id: u64,
}

impl BatchBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&mut self, target: &str) -> &mut Self {
        self.request(ODataRequest::get(target))
    }

    pub fn post(&mut self, target: &str, body: &Value) -> &mut Self {
        self.request(ODataRequest::post(target).with_json(body))
    }

    pub fn patch(&mut self, target: &str, body: &Value) -> &mut Self {
        self.request(ODataRequest::new(Method::PATCH, target).with_json(body))
    }

    pub fn delete(&mut self, target: &str) -> &mut Self {
        self.request(ODataRequest::new(Method::DELETE, target))
    }

    /// Add a prepared request as its own part.
    pub fn request(&mut self, request: ODataRequest) -> &mut Self {
        self.parts.push(BatchRequestPart::single(request));
        self
    }

    /// Group the requests added by `build` into one atomic changeset.
    /// Empty changesets are dropped.
    pub fn changeset<R>(&mut self, build: impl FnOnce(&mut ChangesetBuilder<'_>) -> R) -> R {
        let mut changeset = ChangesetBuilder {
            requests: Vec::new(),
            next_content_id: &mut self.next_content_id,
        };
        let result = build(&mut changeset);
        let requests = changeset.requests;
        if !requests.is_empty() {
            self.parts.push(BatchRequestPart::changeset(requests));
        }
        result
    }

    pub fn len(&self) -> usize {
        self.parts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    pub fn parts(&self) -> &[BatchRequestPart] {
        &self.parts
    }

    pub fn build(self) -> Vec<BatchRequestPart> {
        self.parts
    }
}

/// Requests of one changeset. Every request gets a Content-ID unique within
/// the batch.
#[derive(Debug)]
pub struct ChangesetBuilder<'a> {
    requests: Vec<ODataRequest>,
    next_content_id: &'a mut u64,
}

impl ChangesetBuilder<'_> {
    pub fn post(&mut self, target: &str, body: &Value) -> ContentIdRef {
        self.request(ODataRequest::post(target).with_json(body))
    }

    pub fn patch(&mut self, target: &str, body: &Value) -> ContentIdRef {
        self.request(ODataRequest::new(Method::PATCH, target).with_json(body))
    }

    pub fn put(&mut self, target: &str, body: &Value) -> ContentIdRef {
        self.request(ODataRequest::new(Method::PUT, target).with_json(body))
    }

    pub fn delete(&mut self, target: &str) -> ContentIdRef {
        self.request(ODataRequest::new(Method::DELETE, target))
    }

    /// Add a prepared request; an explicit Content-ID is replaced.
    pub fn request(&mut self, request: ODataRequest) -> ContentIdRef {
        *self.next_content_id += 1;
        let id = self.next_content_id.to_string();
        self.requests.push(request.with_content_id(id.clone()));
        ContentIdRef { id }
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}
