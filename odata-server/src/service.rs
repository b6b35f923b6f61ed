// In-memory entity service: dispatches single OData requests against
// entity sets declared in the model and executes bound functions.

use crate::json::{entity_from_json, entity_to_json, property_to_json};
use crate::path::{ResourcePath, Segment};
use async_trait::async_trait;
use dashmap::DashMap;
use http::header::{HeaderValue, CONTENT_TYPE, ETAG, LOCATION};
use http::{Method, StatusCode};
use indexmap::IndexMap;
use odata_batch::{BatchError, ODataRequest, ODataResponse, RequestHandler, ServiceRoot, ODATA_ENTITY_ID, ODATA_VERSION};
use odata_core::edm::{
    format_value, from_uri_literal, to_uri_literal, EdmFunction, EdmModel, EdmPrimitiveKind, EdmProperty,
    EdmStructuredType, PrimitiveValue,
};
use odata_core::etag::{check_change_preconditions, check_precondition_required, check_read_preconditions};
use odata_core::{
    apply_query_options, DataProvider, Entity, EtagInformation, ODataError, ODataResult, PropertyValue,
    TypedOperand, UriInfo,
};
use serde_json::{json, Value};
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

/// Implementation of a bound function, keyed by its qualified name.
pub type BoundFunction = Arc<dyn Fn(&Entity, &[(String, TypedOperand)]) -> ODataResult<PropertyValue> + Send + Sync>;

#[derive(Debug)]
struct EntitySetStore {
    entity_type: Arc<EdmStructuredType>,
    key: Arc<EdmProperty>,
    rows: IndexMap<String, Entity>,
}

impl EntitySetStore {
    fn key_kind(&self) -> ODataResult<EdmPrimitiveKind> {
        self.key
            .ty
            .as_primitive()
            .ok_or_else(|| ODataError::internal(format!("Key of {} is not primitive", self.entity_type.name)))
    }

    /// Canonical key literal of a key predicate such as `1`, `'A'` or `ID=1`.
    fn key_of(&self, predicate: &str) -> ODataResult<String> {
        let prefix = format!("{}=", self.key.name);
        let literal = predicate.trim().strip_prefix(prefix.as_str()).unwrap_or(predicate).trim();
        let value = from_uri_literal(literal, self.key_kind()?)
            .map_err(|err| ODataError::bad_request(format!("Invalid key predicate: {}", err)))?;
        if value.is_null() {
            return Err(ODataError::bad_request("Key values must not be null"));
        }
        Ok(to_uri_literal(&value))
    }

    fn key_of_entity(&self, entity: &Entity) -> Option<String> {
        entity
            .property(&self.key.name)
            .and_then(PropertyValue::as_primitive)
            .filter(|value| !value.is_null())
            .map(to_uri_literal)
    }

    fn next_integer_key(&self) -> ODataResult<PrimitiveValue> {
        let kind = self.key_kind()?;
        if !kind.is_integer() {
            return Err(ODataError::bad_request(format!(
                "A value for key '{}' is required",
                self.key.name
            )));
        }
        let next = self
            .rows
            .values()
            .filter_map(|e| e.property(&self.key.name).and_then(PropertyValue::as_primitive))
            .filter_map(PrimitiveValue::as_i128)
            .max()
            .map_or(1, |max| max + 1);
        from_uri_literal(&next.to_string(), kind)
            .map_err(|_| ODataError::conflict(format!("Key space of {} is exhausted", self.entity_type.name)))
    }
}

pub struct EntityService {
    edm: Arc<EdmModel>,
    root: ServiceRoot,
    sets: DashMap<String, EntitySetStore>,
    functions: DashMap<String, BoundFunction>,
    version: AtomicU64,
    require_if_match: bool,
}

impl fmt::Debug for EntityService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityService")
            .field("namespace", &self.edm.namespace())
            .field("root", &self.root)
            .field("sets", &self.sets.len())
            .field("functions", &self.functions.len())
            .field("require_if_match", &self.require_if_match)
            .finish()
    }
}

impl EntityService {
    /// An empty store for every entity set in `edm`. `service_root` is the
    /// absolute root used for `Location` headers.
    pub fn new(edm: Arc<EdmModel>, service_root: &str) -> ODataResult<Self> {
        let root = ServiceRoot::parse(service_root).map_err(|err| ODataError::internal(err.to_string()))?;
        let sets = DashMap::new();
        for set in edm.entity_sets() {
            let entity_type = edm
                .entity_type(&set.entity_type)
                .cloned()
                .ok_or_else(|| ODataError::internal(format!("Entity set {} has unknown type {}", set.name, set.entity_type)))?;
            let key = entity_type
                .keys
                .first()
                .and_then(|name| entity_type.get(name))
                .cloned()
                .ok_or_else(|| ODataError::internal(format!("Entity type {} declares no key", entity_type.name)))?;
            sets.insert(
                set.name.clone(),
                EntitySetStore {
                    entity_type,
                    key,
                    rows: IndexMap::new(),
                },
            );
        }
        Ok(EntityService {
            edm,
            root,
            sets,
            functions: DashMap::new(),
            version: AtomicU64::new(1),
            require_if_match: false,
        })
    }

    pub fn with_function<F>(self, name: &str, function: F) -> Self
    where
        F: Fn(&Entity, &[(String, TypedOperand)]) -> ODataResult<PropertyValue> + Send + Sync + 'static,
    {
        self.functions.insert(self.edm.qualify(name), Arc::new(function));
        self
    }

    /// Reject unconditional updates and deletes of entities with an ETag.
    pub fn require_if_match(mut self, required: bool) -> Self {
        self.require_if_match = required;
        self
    }

    pub fn edm(&self) -> &EdmModel {
        &self.edm
    }

    fn next_etag(&self) -> String {
        format!("W/\"{}\"", self.version.fetch_add(1, Ordering::Relaxed))
    }

    /// Store an entity directly, assigning a key and ETag when missing.
    pub fn insert(&self, set: &str, mut entity: Entity) -> ODataResult<Entity> {
        let mut store = self
            .sets
            .get_mut(set)
            .ok_or_else(|| ODataError::not_found(format!("No entity set '{}'", set)))?;
        entity.type_name = store.entity_type.name.clone();
        let key = match store.key_of_entity(&entity) {
            Some(key) => key,
            None => {
                let value = store.next_integer_key()?;
                let key = to_uri_literal(&value);
                entity.set(store.key.name.clone(), value);
                key
            }
        };
        if store.rows.contains_key(&key) {
            return Err(ODataError::conflict(format!("{}({}) already exists", set, key)));
        }
        entity.etag = Some(self.next_etag());
        store.rows.insert(key, entity.clone());
        Ok(entity)
    }

    pub fn entities(&self, set: &str) -> ODataResult<Vec<Entity>> {
        let store = self.store(set)?;
        Ok(store.rows.values().cloned().collect())
    }

    fn store(&self, set: &str) -> ODataResult<dashmap::mapref::one::Ref<'_, String, EntitySetStore>> {
        self.sets
            .get(set)
            .ok_or_else(|| ODataError::not_found(format!("No entity set '{}'", set)))
    }

    fn lookup(&self, set: &str, predicate: &str) -> ODataResult<(String, Entity)> {
        let store = self.store(set)?;
        let key = store.key_of(predicate)?;
        let entity = store
            .rows
            .get(&key)
            .cloned()
            .ok_or_else(|| ODataError::not_found(format!("No entity {}({})", set, key)))?;
        Ok((key, entity))
    }

    fn entity_location(&self, set: &str, key: &str) -> String {
        self.root.absolute(&format!("/{}({})", set, key))
    }

    /// Serve one request; failures become OData error responses.
    pub fn respond(&self, request: &ODataRequest) -> ODataResponse {
        let response = match self.dispatch(request) {
            Ok(response) => response,
            Err(err) => {
                if err.status_code() >= 500 {
                    warn!(method = %request.method, path = %request.path, error = %err, "request failed");
                } else {
                    debug!(method = %request.method, path = %request.path, error = %err, "request rejected");
                }
                ODataResponse::from_error(&err)
            }
        };
        response.with_header(ODATA_VERSION.clone(), HeaderValue::from_static("4.0"))
    }

    fn dispatch(&self, request: &ODataRequest) -> ODataResult<ODataResponse> {
        let path = ResourcePath::parse(&request.path)?;
        let Some(set) = path.entity_set.as_deref() else {
            return match request.method {
                Method::GET => Ok(self.service_document()),
                _ => Err(ODataError::not_implemented("Only GET is supported on the service document")),
            };
        };

        match (&request.method, path.key.as_deref(), path.segments.as_slice()) {
            (&Method::GET, None, []) => self.read_collection(set, request.query.as_deref()),
            (&Method::GET, None, [Segment::Count]) => self.count_collection(set, request.query.as_deref()),
            (&Method::POST, None, []) => self.create(set, request),
            (&Method::GET, Some(key), []) => self.read_entity(set, key, request),
            (&Method::GET, Some(key), [Segment::Property(name)]) => self.read_property(set, key, name, false),
            (&Method::GET, Some(key), [Segment::Property(name), Segment::Value]) => {
                self.read_property(set, key, name, true)
            }
            (&Method::GET, Some(key), [Segment::Function { name, arguments }]) => {
                self.invoke_function(set, key, name, arguments)
            }
            (&Method::PATCH, Some(key), []) => self.update(set, key, request, true),
            (&Method::PUT, Some(key), []) => self.update(set, key, request, false),
            (&Method::DELETE, Some(key), []) => self.delete(set, key, request),
            (method, _, _) => Err(ODataError::not_implemented(format!(
                "{} {} is not supported",
                method, request.path
            ))),
        }
    }

    fn service_document(&self) -> ODataResponse {
        let sets: Vec<Value> = self
            .edm
            .entity_sets()
            .map(|set| json!({"name": set.name, "kind": "EntitySet", "url": set.name}))
            .collect();
        ODataResponse::json(
            StatusCode::OK,
            &json!({"@odata.context": self.root.absolute("/$metadata"), "value": sets}),
        )
    }

    fn query(&self, set: &str, query: Option<&str>) -> ODataResult<odata_core::QueryResult> {
        let info = match query {
            Some(query) => UriInfo::from_query(query)?,
            None => UriInfo::default(),
        };
        // Rows are cloned out so no map guard is held while filters call
        // bound functions.
        let entities = self.entities(set)?;
        apply_query_options(entities, &info, &self.edm, Some(self))
    }

    fn read_collection(&self, set: &str, query: Option<&str>) -> ODataResult<ODataResponse> {
        let result = self.query(set, query)?;
        let mut body = json!({"@odata.context": self.root.absolute(&format!("/$metadata#{}", set))});
        if let Some(count) = result.count {
            body["@odata.count"] = json!(count);
        }
        body["value"] = Value::Array(result.entities.iter().map(|e| entity_to_json(e, &self.edm)).collect());
        Ok(ODataResponse::json(StatusCode::OK, &body))
    }

    fn count_collection(&self, set: &str, query: Option<&str>) -> ODataResult<ODataResponse> {
        let result = self.query(set, query)?;
        Ok(ODataResponse::new(StatusCode::OK)
            .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
            .with_body(result.entities.len().to_string()))
    }

    fn read_entity(&self, set: &str, predicate: &str, request: &ODataRequest) -> ODataResult<ODataResponse> {
        let (_, entity) = self.lookup(set, predicate)?;
        let (if_match, if_none_match) = preconditions(request);
        if check_read_preconditions(entity.etag.as_deref(), &if_match, &if_none_match)? {
            return Ok(with_etag(ODataResponse::new(StatusCode::NOT_MODIFIED), entity.etag.as_deref()));
        }
        let mut body = entity_to_json(&entity, &self.edm);
        body["@odata.context"] = json!(self.root.absolute(&format!("/$metadata#{}/$entity", set)));
        Ok(with_etag(ODataResponse::json(StatusCode::OK, &body), entity.etag.as_deref()))
    }

    fn read_property(&self, set: &str, predicate: &str, name: &str, raw: bool) -> ODataResult<ODataResponse> {
        let (key, entity) = self.lookup(set, predicate)?;
        let store = self.store(set)?;
        let declared = store
            .entity_type
            .get(name)
            .cloned()
            .ok_or_else(|| ODataError::not_found(format!("{} has no property '{}'", store.entity_type.name, name)))?;
        drop(store);

        let value = entity.property(name).cloned().unwrap_or_else(PropertyValue::null);
        if value.is_null() {
            return Ok(ODataResponse::new(StatusCode::NO_CONTENT));
        }
        if raw {
            let PropertyValue::Primitive(primitive) = &value else {
                return Err(ODataError::bad_request(format!("$value is only available on primitive properties, not '{}'", name)));
            };
            return Ok(ODataResponse::new(StatusCode::OK)
                .with_header(CONTENT_TYPE, HeaderValue::from_static("text/plain"))
                .with_body(format_value(primitive, &declared.facets)));
        }
        let body = json!({
            "@odata.context": self.root.absolute(&format!("/$metadata#{}({})/{}", set, key, name)),
            "value": property_to_json(&value, Some(&*declared), &self.edm),
        });
        Ok(ODataResponse::json(StatusCode::OK, &body))
    }

    fn invoke_function(
        &self,
        set: &str,
        predicate: &str,
        name: &str,
        arguments: &[(String, String)],
    ) -> ODataResult<ODataResponse> {
        let (_, entity) = self.lookup(set, predicate)?;
        let function = self
            .edm
            .function(name)
            .cloned()
            .ok_or_else(|| ODataError::not_found(format!("No function '{}'", name)))?;
        if self.edm.qualify(&entity.type_name) != function.binding_type {
            return Err(ODataError::bad_request(format!(
                "Function {} is not bound to {}",
                function.name, entity.type_name
            )));
        }

        let mut parameters = Vec::with_capacity(arguments.len());
        for (parameter, literal) in arguments {
            let declared = function
                .parameters
                .iter()
                .find(|p| p.name == *parameter)
                .ok_or_else(|| ODataError::bad_request(format!("Unknown parameter '{}' of {}", parameter, function.name)))?;
            let kind = declared.ty.as_primitive().ok_or_else(|| {
                ODataError::not_implemented(format!("Parameter '{}' has a non-primitive type", parameter))
            })?;
            let value = from_uri_literal(literal, kind).map_err(|err| ODataError::bad_request(err.to_string()))?;
            let operand = if value.is_null() {
                TypedOperand::null_of(kind)
            } else {
                TypedOperand::from_value(value)
            };
            parameters.push((parameter.clone(), operand));
        }

        let result = self.call_function(&function, &entity, &parameters)?;
        let mut declared = EdmProperty::new("value", function.return_type.clone());
        declared.collection = function.returns_collection;
        Ok(ODataResponse::json(
            StatusCode::OK,
            &json!({"value": property_to_json(&result, Some(&declared), &self.edm)}),
        ))
    }

    fn create(&self, set: &str, request: &ODataRequest) -> ODataResult<ODataResponse> {
        let entity_type = self.store(set)?.entity_type.clone();
        let entity = entity_from_json(&request.body_json()?, &entity_type, &self.edm)?;
        let created = self.insert(set, entity)?;
        let key = self
            .store(set)?
            .key_of_entity(&created)
            .ok_or_else(|| ODataError::internal("Created entity has no key"))?;
        let location = self.entity_location(set, &key);
        debug!(set, %key, "entity created");

        let mut body = entity_to_json(&created, &self.edm);
        body["@odata.context"] = json!(self.root.absolute(&format!("/$metadata#{}/$entity", set)));
        let location = header_value(&location)?;
        Ok(with_etag(
            ODataResponse::json(StatusCode::CREATED, &body)
                .with_header(LOCATION, location.clone())
                .with_header(ODATA_ENTITY_ID.clone(), location),
            created.etag.as_deref(),
        ))
    }

    fn check_change(&self, etag: Option<&str>, request: &ODataRequest) -> ODataResult<()> {
        let (if_match, if_none_match) = preconditions(request);
        if self.require_if_match {
            check_precondition_required(etag, &if_match, &if_none_match)?;
        }
        check_change_preconditions(etag, &if_match, &if_none_match)?;
        Ok(())
    }

    fn update(&self, set: &str, predicate: &str, request: &ODataRequest, merge: bool) -> ODataResult<ODataResponse> {
        let entity_type = self.store(set)?.entity_type.clone();
        let changes = entity_from_json(&request.body_json()?, &entity_type, &self.edm)?;

        let mut store = self
            .sets
            .get_mut(set)
            .ok_or_else(|| ODataError::not_found(format!("No entity set '{}'", set)))?;
        let key = store.key_of(predicate)?;
        if store.key_of_entity(&changes).is_some_and(|changed| changed != key) {
            return Err(ODataError::bad_request("Key properties cannot be changed"));
        }
        let key_name = store.key.name.clone();
        let existing = store
            .rows
            .get_mut(&key)
            .ok_or_else(|| ODataError::not_found(format!("No entity {}({})", set, key)))?;
        self.check_change(existing.etag.as_deref(), request)?;
        let etag = self.next_etag();

        if merge {
            for property in changes.properties {
                existing.set(property.name, property.value);
            }
        } else {
            let key_value = existing.property(&key_name).cloned().unwrap_or_else(PropertyValue::null);
            existing.properties = changes.properties;
            existing.set(key_name, key_value);
        }
        existing.etag = Some(etag);
        debug!(set, %key, merge, "entity updated");
        Ok(with_etag(ODataResponse::new(StatusCode::NO_CONTENT), existing.etag.as_deref()))
    }

    fn delete(&self, set: &str, predicate: &str, request: &ODataRequest) -> ODataResult<ODataResponse> {
        let mut store = self
            .sets
            .get_mut(set)
            .ok_or_else(|| ODataError::not_found(format!("No entity set '{}'", set)))?;
        let key = store.key_of(predicate)?;
        let etag = store
            .rows
            .get(&key)
            .ok_or_else(|| ODataError::not_found(format!("No entity {}({})", set, key)))?
            .etag
            .clone();
        self.check_change(etag.as_deref(), request)?;
        store.rows.shift_remove(&key);
        debug!(set, %key, "entity deleted");
        Ok(ODataResponse::new(StatusCode::NO_CONTENT))
    }
}

fn preconditions(request: &ODataRequest) -> (EtagInformation, EtagInformation) {
    (
        EtagInformation::parse(&request.header_values("if-match")),
        EtagInformation::parse(&request.header_values("if-none-match")),
    )
}

fn header_value(text: &str) -> ODataResult<HeaderValue> {
    HeaderValue::from_str(text).map_err(|_| ODataError::internal(format!("'{}' is not a valid header value", text)))
}

fn with_etag(response: ODataResponse, etag: Option<&str>) -> ODataResponse {
    match etag.and_then(|etag| HeaderValue::from_str(etag).ok()) {
        Some(value) => response.with_header(ETAG, value),
        None => response,
    }
}

impl DataProvider for EntityService {
    fn call_function(
        &self,
        function: &EdmFunction,
        binding: &Entity,
        parameters: &[(String, TypedOperand)],
    ) -> ODataResult<PropertyValue> {
        let implementation = self
            .functions
            .get(&function.name)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| ODataError::not_implemented(format!("Function {} has no implementation", function.name)))?;
        implementation(binding, parameters)
    }
}

#[async_trait]
impl RequestHandler for EntityService {
    #[tracing::instrument(skip_all, fields(method = %request.method, path = %request.path))]
    async fn handle(&self, request: ODataRequest) -> Result<ODataResponse, BatchError> {
        Ok(self.respond(&request))
    }
}
