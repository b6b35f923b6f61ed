// Batch coordinator flows against a recording handler: part ordering,
// content-id substitution and failure scoping.

use async_trait::async_trait;
use http::header::{HeaderValue, CONTENT_TYPE, LOCATION};
use http::{Method, StatusCode};
use odata_batch::{
    parse_batch_response, write_batch_request, BatchConfig, BatchCoordinator, BatchError,
    BatchRequestPart, MessageKey, ODataRequest, ODataResponse, ODataResponsePart, RequestHandler,
};
use serde_json::json;
use std::sync::{Arc, Mutex};

const BASE: &str = "http://host/service";

#[derive(Debug, Default)]
struct Recorder {
    log: Mutex<Vec<String>>,
    next_id: Mutex<u32>,
}

impl Recorder {
    fn log(&self) -> Vec<String> {
        self.log.lock().map(|log| log.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl RequestHandler for Recorder {
    async fn handle(&self, request: ODataRequest) -> Result<ODataResponse, BatchError> {
        if let Ok(mut log) = self.log.lock() {
            log.push(format!("{} {}", request.method, request.path));
        }
        match (&request.method, request.path.as_str()) {
            (&Method::POST, "/Customers") => {
                let id = {
                    let mut next = self.next_id.lock().map_err(|_| BatchError::handler_failure("poisoned"))?;
                    *next += 1;
                    *next
                };
                let location = format!("{}/Customers({})", BASE, id);
                Ok(ODataResponse::json(StatusCode::CREATED, &json!({"ID": id}))
                    .with_header(LOCATION, HeaderValue::from_str(&location).map_err(|e| BatchError::handler_failure(e.to_string()))?))
            }
            (&Method::POST, "/Broken") => Err(BatchError::handler_failure("storage offline")),
            (&Method::POST, "/Rejected") => Ok(ODataResponse::json(
                StatusCode::BAD_REQUEST,
                &json!({"error": {"code": "bad_request", "message": "rejected"}}),
            )),
            (&Method::GET, _) => Ok(ODataResponse::json(StatusCode::OK, &json!({"value": []}))),
            _ => Ok(ODataResponse::new(StatusCode::NO_CONTENT)),
        }
    }
}

fn batch(parts: &[BatchRequestPart]) -> ODataRequest {
    let encoded = write_batch_request(parts, "batch_test");
    ODataRequest::post("/$batch")
        .with_header(CONTENT_TYPE, HeaderValue::from_str(&encoded.content_type).unwrap())
        .with_body(encoded.body)
}

async fn run(recorder: Arc<Recorder>, request: ODataRequest) -> Result<Vec<ODataResponsePart>, BatchError> {
    let config = BatchConfig {
        base_uri: BASE.to_string(),
        ..BatchConfig::default()
    };
    let coordinator = BatchCoordinator::new(config, recorder)?;
    let response = coordinator.handle(request).await?;
    assert_eq!(response.status, StatusCode::OK);
    assert_eq!(response.header("odata-version"), Some("4.0"));
    let content_type = response.header("content-type").unwrap_or_default().to_string();
    parse_batch_response(&response.body, &content_type, true)
}

fn create(id: &str) -> ODataRequest {
    ODataRequest::post("/Customers")
        .with_content_id(id)
        .with_json(&json!({"Name": "Ada"}))
}

fn update(target: &str, id: &str) -> ODataRequest {
    ODataRequest::new(Method::PATCH, target)
        .with_content_id(id)
        .with_json(&json!({"Age": 36}))
}

#[cfg(test)]
mod coordinator_tests {
    use super::*;

    #[tokio::test]
    async fn test_parts_execute_in_order_with_substitution() {
        let recorder = Arc::new(Recorder::default());
        let parts = vec![
            BatchRequestPart::single(ODataRequest::get("/Customers")),
            BatchRequestPart::changeset(vec![update("/$1", "2"), create("1")]),
            BatchRequestPart::single(ODataRequest::get("/Customers?$top=1")),
        ];

        let responses = run(recorder.clone(), batch(&parts)).await.unwrap();
        assert_eq!(
            recorder.log(),
            vec!["GET /Customers", "POST /Customers", "PATCH /Customers(1)", "GET /Customers"]
        );

        assert_eq!(responses.len(), 3);
        assert!(!responses[0].is_changeset);
        assert!(responses[1].is_changeset);
        let changeset = &responses[1].responses;
        assert_eq!(changeset[0].status, StatusCode::CREATED);
        assert_eq!(changeset[0].content_id.as_deref(), Some("1"));
        assert_eq!(changeset[1].status, StatusCode::NO_CONTENT);
        assert_eq!(changeset[1].content_id.as_deref(), Some("2"));
        assert!(!responses[2].is_changeset);
    }

    #[tokio::test]
    async fn test_changeset_failure_is_scoped_to_changeset() {
        let recorder = Arc::new(Recorder::default());
        let parts = vec![
            BatchRequestPart::changeset(vec![
                create("1"),
                ODataRequest::post("/Broken").with_content_id("2"),
                update("/$1", "3"),
            ]),
            BatchRequestPart::single(ODataRequest::get("/Customers")),
        ];

        let responses = run(recorder.clone(), batch(&parts)).await.unwrap();
        assert_eq!(recorder.log(), vec!["POST /Customers", "POST /Broken", "GET /Customers"]);

        assert_eq!(responses.len(), 2);
        assert!(!responses[0].is_changeset);
        let failure = &responses[0].responses[0];
        assert_eq!(failure.status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(failure.content_id.as_deref(), Some("2"));
        assert_eq!(failure.body_json().unwrap()["error"]["code"], "HANDLER_FAILURE");
        assert_eq!(responses[1].responses[0].status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_error_status_aborts_changeset() {
        let recorder = Arc::new(Recorder::default());
        let parts = vec![BatchRequestPart::changeset(vec![
            ODataRequest::post("/Rejected").with_content_id("1"),
            create("2"),
        ])];

        let responses = run(recorder.clone(), batch(&parts)).await.unwrap();
        assert_eq!(recorder.log(), vec!["POST /Rejected"]);
        assert_eq!(responses[0].responses.len(), 1);
        assert_eq!(responses[0].responses[0].status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_unsortable_changeset_runs_nothing() {
        let recorder = Arc::new(Recorder::default());
        let parts = vec![
            BatchRequestPart::single(ODataRequest::get("/Customers")),
            BatchRequestPart::changeset(vec![update("/$7", "1")]),
        ];

        let err = run(recorder.clone(), batch(&parts)).await.unwrap_err();
        assert_eq!(err.key, MessageKey::InvalidContentId);
        assert!(recorder.log().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_body_runs_nothing() {
        let recorder = Arc::new(Recorder::default());
        let request = ODataRequest::post("/$batch")
            .with_header(CONTENT_TYPE, HeaderValue::from_static("multipart/mixed; boundary=b"))
            .with_body("--b\r\nContent-Type: application/http\r\n\r\nGET Customers HTTP/1.1\r\n\r\n");

        let err = run(recorder.clone(), request).await.unwrap_err();
        assert_eq!(err.key, MessageKey::MissingCloseDelimiter);
        assert!(recorder.log().is_empty());
    }
}
