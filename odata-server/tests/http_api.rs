// End-to-end requests through the axum router: CRUD, query options,
// ETag preconditions, bound functions and $batch.

use axum::body::{to_bytes, Body, Bytes};
use axum::http::{HeaderMap, Request, StatusCode};
use axum::Router;
use odata_batch::{parse_batch_response, write_batch_request, BatchRequestPart, ODataRequest};
use odata_core::edm::{EdmFunction, EdmProperty, EdmStructuredType, EdmTypeRef, Facets};
use odata_core::{EdmModel, EdmPrimitiveKind, Entity, ODataError, PrimitiveValue, PropertyValue, TypeRegistry};
use odata_server::{init_test_logging, EntityService, ODataServer, ServerConfig};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::ServiceExt;

fn model() -> EdmModel {
    EdmModel::new("Test", Arc::new(TypeRegistry::standard()))
        .with_entity_type(
            EdmStructuredType::new("Person")
                .key("ID")
                .property(EdmProperty::primitive("ID", EdmPrimitiveKind::Int32).with_facets(Facets::non_nullable()))
                .property(EdmProperty::primitive("Name", EdmPrimitiveKind::String))
                .property(EdmProperty::primitive("Age", EdmPrimitiveKind::Int32)),
        )
        .with_function(
            EdmFunction::bound("IsAdult", "Person", EdmTypeRef::Primitive(EdmPrimitiveKind::Boolean))
                .parameter("min", EdmTypeRef::Primitive(EdmPrimitiveKind::Int32)),
        )
        .with_entity_set("People", "Person")
}

fn app(people: &[(&str, i32)]) -> Router {
    init_test_logging();
    let config = ServerConfig::default();
    let service = EntityService::new(Arc::new(model()), &config.base_uri())
        .unwrap()
        .with_function("IsAdult", |person, parameters| {
            let age = person
                .property("Age")
                .and_then(PropertyValue::as_primitive)
                .and_then(PrimitiveValue::as_i128);
            let min = parameters
                .iter()
                .find(|(name, _)| name == "min")
                .and_then(|(_, operand)| operand.value().as_i128())
                .ok_or_else(|| ODataError::bad_request("min is required"))?;
            Ok(PropertyValue::from(age.is_some_and(|age| age >= min)))
        });
    for (name, age) in people {
        service
            .insert("People", Entity::new("Person").with("Name", *name).with("Age", *age))
            .unwrap();
    }
    ODataServer::new(config, service).unwrap().router()
}

async fn send(app: &Router, request: Request<Body>) -> (StatusCode, HeaderMap, Bytes) {
    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let headers = response.headers().clone();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, headers, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn json_request(method: &str, uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

fn parse(body: &Bytes) -> Value {
    serde_json::from_slice(body).unwrap()
}

#[tokio::test]
async fn test_health_and_service_document() {
    let app = app(&[]);
    let (status, _, body) = send(&app, get("/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["status"], "healthy");

    let (status, headers, body) = send(&app, get("/odata")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(headers["odata-version"], "4.0");
    assert_eq!(parse(&body)["value"][0]["name"], "People");
}

#[tokio::test]
async fn test_create_then_read() {
    let app = app(&[]);
    let (status, headers, body) = send(&app, json_request("POST", "/odata/People", json!({"Name": "Ann", "Age": 30}))).await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(headers["location"], "http://127.0.0.1:8080/odata/People(1)");
    assert_eq!(headers["odata-entityid"], "http://127.0.0.1:8080/odata/People(1)");
    assert!(headers.contains_key("etag"));
    assert_eq!(parse(&body)["ID"], 1);

    let (status, _, body) = send(&app, get("/odata/People(1)")).await;
    assert_eq!(status, StatusCode::OK);
    let person = parse(&body);
    assert_eq!(person["Name"], "Ann");
    assert_eq!(person["@odata.etag"], headers["etag"].to_str().unwrap());

    let (status, _, body) = send(&app, get("/odata/People(1)/Name/$value")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(&body[..], b"Ann");

    let (status, _, _) = send(&app, json_request("POST", "/odata/People", json!({"ID": 1, "Name": "Dup"}))).await;
    assert_eq!(status, StatusCode::CONFLICT);
}

#[tokio::test]
async fn test_query_options() {
    let app = app(&[("Ann", 30), ("Bob", 17), ("Cid", 45)]);
    let (status, _, body) = send(
        &app,
        get("/odata/People?$filter=Age%20gt%2020&$orderby=Name%20desc&$count=true"),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let page = parse(&body);
    assert_eq!(page["@odata.count"], 2);
    let names: Vec<&str> = page["value"].as_array().unwrap().iter().filter_map(|p| p["Name"].as_str()).collect();
    assert_eq!(names, ["Cid", "Ann"]);

    let (_, _, body) = send(&app, get("/odata/People/$count?$filter=Age%20lt%2040")).await;
    assert_eq!(&body[..], b"2");

    let (status, _, body) = send(&app, get("/odata/People?$filter=Age%20eq%20'x'")).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(parse(&body)["error"]["message"].is_string());
}

#[tokio::test]
async fn test_bound_function() {
    let app = app(&[("Ann", 30), ("Bob", 17)]);
    let (status, _, body) = send(&app, get("/odata/People(2)/Test.IsAdult(min=18)")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(parse(&body)["value"], false);

    let (_, _, body) = send(&app, get("/odata/People?$filter=Test.IsAdult(min=18)")).await;
    let page = parse(&body);
    assert_eq!(page["value"].as_array().map(Vec::len), Some(1));
    assert_eq!(page["value"][0]["Name"], "Ann");

    let (status, _, _) = send(&app, get("/odata/People(1)/Test.Missing()")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_etag_preconditions() {
    let app = app(&[("Ann", 30)]);
    let (_, headers, _) = send(&app, get("/odata/People(1)")).await;
    let etag = headers["etag"].to_str().unwrap().to_string();

    let request = Request::get("/odata/People(1)").header("if-none-match", &etag).body(Body::empty()).unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NOT_MODIFIED);

    let mut stale = json_request("PATCH", "/odata/People(1)", json!({"Age": 31}));
    stale.headers_mut().insert("if-match", "W/\"999\"".parse().unwrap());
    let (status, _, _) = send(&app, stale).await;
    assert_eq!(status, StatusCode::PRECONDITION_FAILED);

    let mut fresh = json_request("PATCH", "/odata/People(1)", json!({"Age": 31}));
    fresh.headers_mut().insert("if-match", etag.parse().unwrap());
    let (status, headers, _) = send(&app, fresh).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    assert_ne!(headers["etag"].to_str().unwrap(), etag);

    let (_, _, body) = send(&app, get("/odata/People(1)")).await;
    let person = parse(&body);
    assert_eq!(person["Age"], 31);
    assert_eq!(person["Name"], "Ann");
}

#[tokio::test]
async fn test_put_replaces_and_delete_removes() {
    let app = app(&[("Ann", 30)]);
    let (status, _, _) = send(&app, json_request("PUT", "/odata/People(1)", json!({"Name": "Anna"}))).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (_, _, body) = send(&app, get("/odata/People(1)")).await;
    let person = parse(&body);
    assert_eq!(person["Name"], "Anna");
    assert_eq!(person["ID"], 1);
    assert!(person.get("Age").is_none());

    let (status, _, _) = send(&app, json_request("PATCH", "/odata/People(1)", json!({"ID": 9}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let request = Request::delete("/odata/People(1)").body(Body::empty()).unwrap();
    let (status, _, _) = send(&app, request).await;
    assert_eq!(status, StatusCode::NO_CONTENT);
    let (status, _, _) = send(&app, get("/odata/People(1)")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_errors_use_odata_shape() {
    let app = app(&[]);
    let (status, _, body) = send(&app, get("/odata/Planets")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert!(parse(&body)["error"]["code"].is_string());

    let (status, _, _) = send(&app, get("/odata/People/$ref")).await;
    assert_eq!(status, StatusCode::NOT_IMPLEMENTED);

    let (status, _, _) = send(&app, json_request("POST", "/odata/People", json!({"Height": 2}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_batch_changeset_with_content_id_reference() {
    let app = app(&[("Ann", 30)]);
    let parts = [
        BatchRequestPart::changeset(vec![
            ODataRequest::post("/People")
                .with_content_id("1")
                .with_json(&json!({"Name": "Zoe", "Age": 20})),
            ODataRequest::new(http::Method::PATCH, "/$1")
                .with_content_id("2")
                .with_json(&json!({"Age": 21})),
        ]),
        BatchRequestPart::single(ODataRequest::get("/People?$filter=Name%20eq%20'Zoe'")),
    ];
    let encoded = write_batch_request(&parts, "batch_http");
    let request = Request::post("/odata/$batch")
        .header("content-type", &encoded.content_type)
        .body(Body::from(encoded.body))
        .unwrap();

    let (status, headers, body) = send(&app, request).await;
    assert_eq!(status, StatusCode::OK);
    let content_type = headers["content-type"].to_str().unwrap();
    let parts = parse_batch_response(&body, content_type, true).unwrap();
    assert_eq!(parts.len(), 2);

    assert!(parts[0].is_changeset);
    let statuses: Vec<u16> = parts[0].responses.iter().map(|r| r.status.as_u16()).collect();
    assert_eq!(statuses, [201, 204]);
    assert_eq!(parts[0].responses[0].content_id.as_deref(), Some("1"));

    let page = parts[1].responses[0].body_json().unwrap();
    assert_eq!(page["value"][0]["Age"], 21);
}

#[tokio::test]
async fn test_batch_rejects_non_multipart() {
    let app = app(&[]);
    let (status, _, body) = send(&app, json_request("POST", "/odata/$batch", json!({}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(parse(&body)["error"]["message"].is_string());
}
