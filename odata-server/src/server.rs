use crate::config::ServerConfig;
use crate::service::EntityService;
use axum::{
    body::Bytes,
    extract::State,
    http::{HeaderMap, Method, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::{any, get, post},
    Json, Router,
};
use http::header::HeaderValue;
use odata_batch::{BatchCoordinator, BatchError, ODataRequest, ODataResponse, ODATA_VERSION};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, info, warn};

#[derive(Clone, Debug)]
pub struct ODataServer {
    config: ServerConfig,
    service: Arc<EntityService>,
    coordinator: BatchCoordinator,
}

impl ODataServer {
    pub fn new(config: ServerConfig, service: EntityService) -> Result<Self, BatchError> {
        let service = Arc::new(service);
        let coordinator = BatchCoordinator::new(config.batch_config(), service.clone())?;
        Ok(ODataServer {
            config,
            service,
            coordinator,
        })
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn service(&self) -> &Arc<EntityService> {
        &self.service
    }

    /// Routes for the service root, `$batch` and `/health`.
    pub fn router(&self) -> Router {
        let root = self.config.service_root.as_str();
        let app = Router::new()
            .route("/health", get(handle_health))
            .route(&format!("{}/$batch", root), post(handle_batch))
            .route(&format!("{}/{{*path}}", root), any(handle_request))
            .route(if root.is_empty() { "/" } else { root }, any(handle_request));

        app.layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
        .with_state(Arc::new(self.clone()))
    }

    pub async fn run(self) -> Result<(), std::io::Error> {
        let app = self.router();
        let addr = self.config.addr();
        let listener = TcpListener::bind(&addr).await?;

        info!(%addr, "server listening");
        info!(service = %self.config.base_uri(), "service root");
        info!(batch = %format!("{}/$batch", self.config.base_uri()), "batch endpoint");
        info!(health = %format!("http://{}/health", addr), "health endpoint");

        axum::serve(listener, app).await?;
        Ok(())
    }
}

fn into_http(response: ODataResponse) -> Response {
    (response.status, response.headers, response.body).into_response()
}

async fn handle_request(
    State(server): State<Arc<ODataServer>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let path = uri
        .path()
        .strip_prefix(server.config.service_root.as_str())
        .unwrap_or(uri.path());
    let mut request = ODataRequest::new(method, path);
    request.query = uri.query().map(str::to_string);
    request.headers = headers;
    request.body = body;

    let response = server.service.respond(&request);
    debug!(method = %request.method, path = %request.path, status = %response.status, "request served");
    into_http(response)
}

async fn handle_batch(State(server): State<Arc<ODataServer>>, headers: HeaderMap, body: Bytes) -> Response {
    debug!(size = body.len(), "incoming batch request");
    let mut request = ODataRequest::post("/$batch");
    request.headers = headers;
    request.body = body;

    let response = match server.coordinator.handle(request).await {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "batch request rejected");
            ODataResponse::from_batch_error(&err).with_header(ODATA_VERSION.clone(), HeaderValue::from_static("4.0"))
        }
    };
    into_http(response)
}

async fn handle_health(State(server): State<Arc<ODataServer>>) -> impl IntoResponse {
    let health_response = serde_json::json!({
        "status": "healthy",
        "server": "odata-rust",
        "version": env!("CARGO_PKG_VERSION"),
        "namespace": server.service.edm().namespace(),
        "entity_sets": server.service.edm().entity_sets().count(),
        "max_batch_parts": server.config.max_batch_parts,
        "strict_batch_parsing": server.config.strict_batch_parsing,
        "endpoints": {
            "service": server.config.base_uri(),
            "batch": format!("{}/$batch", server.config.service_root),
            "health": "/health"
        }
    });

    (StatusCode::OK, Json(health_response))
}
