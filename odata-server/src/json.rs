// Minimal OData JSON mapping between entity values and serde_json.
//
// Decimal values are written as strings so they survive the round trip
// exactly; numbers and strings are both accepted on input.

use odata_core::edm::{
    format_value, parse_value, EdmModel, EdmPrimitiveKind, EdmProperty, EdmStructuredType, EdmTypeRef, Facets,
    PrimitiveValue,
};
use odata_core::{ComplexValue, Entity, ODataError, ODataResult, PropertyValue};
use serde_json::{Map, Number, Value};

pub fn primitive_to_json(value: &PrimitiveValue, facets: &Facets) -> Value {
    match value {
        PrimitiveValue::Null => Value::Null,
        PrimitiveValue::Boolean(b) => Value::Bool(*b),
        PrimitiveValue::Byte(v) => Value::from(*v),
        PrimitiveValue::SByte(v) => Value::from(*v),
        PrimitiveValue::Int16(v) => Value::from(*v),
        PrimitiveValue::Int32(v) => Value::from(*v),
        PrimitiveValue::Int64(v) => Value::from(*v),
        PrimitiveValue::Single(v) => Number::from_f64(f64::from(*v))
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(format_value(value, facets))),
        PrimitiveValue::Double(v) => Number::from_f64(*v)
            .map(Value::Number)
            .unwrap_or_else(|| Value::String(format_value(value, facets))),
        other => Value::String(format_value(other, facets)),
    }
}

pub fn primitive_from_json(value: &Value, kind: EdmPrimitiveKind, facets: &Facets) -> ODataResult<PrimitiveValue> {
    let parse = |text: &str| parse_value(text, kind, facets).map_err(|err| ODataError::bad_request(err.to_string()));
    match (value, kind) {
        (Value::Null, _) => Ok(PrimitiveValue::Null),
        (Value::Bool(b), EdmPrimitiveKind::Boolean) => Ok(PrimitiveValue::Boolean(*b)),
        (Value::Number(n), kind) if kind.is_numeric() => parse(&n.to_string()),
        (Value::String(s), _) => parse(s),
        (other, kind) => Err(ODataError::bad_request(format!("JSON value {} is not a valid {}", other, kind))),
    }
}

/// Entity as a JSON object in declared property order, annotated with its
/// ETag.
pub fn entity_to_json(entity: &Entity, edm: &EdmModel) -> Value {
    let ty = edm.entity_type(&entity.type_name);
    let mut object = Map::new();
    if let Some(etag) = &entity.etag {
        object.insert("@odata.etag".to_string(), Value::String(etag.clone()));
    }
    structured_into(&mut object, &entity.properties, ty.map(|ty| &**ty), edm);
    Value::Object(object)
}

fn structured_into(
    object: &mut Map<String, Value>,
    properties: &[odata_core::Property],
    ty: Option<&EdmStructuredType>,
    edm: &EdmModel,
) {
    for property in properties {
        let declared = ty.and_then(|ty| ty.get(&property.name));
        object.insert(
            property.name.clone(),
            property_to_json(&property.value, declared.map(|p| &**p), edm),
        );
    }
}

pub fn property_to_json(value: &PropertyValue, declared: Option<&EdmProperty>, edm: &EdmModel) -> Value {
    let facets = declared.map(|p| p.facets).unwrap_or_default();
    match value {
        PropertyValue::Primitive(value) => primitive_to_json(value, &facets),
        PropertyValue::Enum { type_name, value } => match edm.enum_type(type_name) {
            Some(ty) => {
                let names = ty.names_of(*value);
                if names.is_empty() {
                    Value::String(value.to_string())
                } else {
                    Value::String(names.join(","))
                }
            }
            None => Value::String(value.to_string()),
        },
        PropertyValue::Complex(complex) => {
            let ty = complex.type_name.as_deref().and_then(|name| edm.complex_type(name));
            let mut object = Map::new();
            structured_into(&mut object, &complex.properties, ty.map(|ty| &**ty), edm);
            Value::Object(object)
        }
        PropertyValue::Collection(items) => {
            let element = declared.map(|p| EdmProperty {
                collection: false,
                ..p.clone()
            });
            Value::Array(items.iter().map(|item| property_to_json(item, element.as_ref(), edm)).collect())
        }
    }
}

/// Read the properties present in `value`. Unknown properties are rejected;
/// `@`-annotations are skipped.
pub fn entity_from_json(value: &Value, ty: &EdmStructuredType, edm: &EdmModel) -> ODataResult<Entity> {
    let mut entity = Entity::new(ty.name.clone());
    entity.properties = structured_from_json(value, ty, edm)?;
    Ok(entity)
}

fn structured_from_json(
    value: &Value,
    ty: &EdmStructuredType,
    edm: &EdmModel,
) -> ODataResult<Vec<odata_core::Property>> {
    let object = value
        .as_object()
        .ok_or_else(|| ODataError::bad_request(format!("Expected a JSON object for {}", ty.name)))?;
    let mut properties = Vec::with_capacity(object.len());
    for (name, value) in object {
        if name.starts_with('@') || name.contains("@odata.") {
            continue;
        }
        let declared = ty
            .get(name)
            .ok_or_else(|| ODataError::bad_request(format!("{} has no property '{}'", ty.name, name)))?;
        properties.push(odata_core::Property::new(
            name.clone(),
            property_from_json(value, declared, edm)?,
        ));
    }
    Ok(properties)
}

pub fn property_from_json(value: &Value, declared: &EdmProperty, edm: &EdmModel) -> ODataResult<PropertyValue> {
    if value.is_null() {
        if !declared.facets.nullable {
            return Err(ODataError::bad_request(format!("Property '{}' is not nullable", declared.name)));
        }
        return Ok(PropertyValue::null());
    }
    if declared.collection {
        let items = value
            .as_array()
            .ok_or_else(|| ODataError::bad_request(format!("Property '{}' expects a JSON array", declared.name)))?;
        let element = EdmProperty {
            collection: false,
            ..declared.clone()
        };
        return items
            .iter()
            .map(|item| property_from_json(item, &element, edm))
            .collect::<ODataResult<Vec<_>>>()
            .map(PropertyValue::Collection);
    }

    match &declared.ty {
        EdmTypeRef::Primitive(kind) => Ok(PropertyValue::Primitive(primitive_from_json(
            value,
            *kind,
            &declared.facets,
        )?)),
        EdmTypeRef::Enum(name) => {
            let ty = edm
                .enum_type(name)
                .ok_or_else(|| ODataError::internal(format!("Unknown enum type '{}'", name)))?;
            let value = match value {
                Value::Number(n) => n
                    .as_i64()
                    .ok_or_else(|| ODataError::bad_request(format!("Invalid {} value {}", name, n)))?,
                Value::String(text) => {
                    let mut combined = 0;
                    for member in text.split(',').map(str::trim) {
                        let bits = ty.value_of(member).ok_or_else(|| {
                            ODataError::bad_request(format!("'{}' is not a member of {}", member, name))
                        })?;
                        combined |= bits;
                    }
                    if !ty.is_flags && text.contains(',') {
                        return Err(ODataError::bad_request(format!("{} does not allow combined members", name)));
                    }
                    combined
                }
                other => return Err(ODataError::bad_request(format!("Invalid {} value {}", name, other))),
            };
            Ok(PropertyValue::Enum {
                type_name: ty.name.clone(),
                value,
            })
        }
        EdmTypeRef::Complex(name) => {
            let ty = edm
                .complex_type(name)
                .ok_or_else(|| ODataError::internal(format!("Unknown complex type '{}'", name)))?;
            Ok(PropertyValue::Complex(ComplexValue {
                type_name: Some(ty.name.clone()),
                properties: structured_from_json(value, ty, edm)?,
            }))
        }
        EdmTypeRef::Entity(name) => Err(ODataError::not_implemented(format!(
            "Inline entities of type {} are not supported",
            name
        ))),
    }
}
