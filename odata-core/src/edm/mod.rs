// Entity Data Model: primitive kinds, literal grammar and the service schema.

pub mod literal;
pub mod model;
pub mod primitive;
pub mod registry;

pub use literal::{format_value, from_uri_literal, parse_value, to_uri_literal, LiteralError};
pub use model::{
    EdmEntitySet, EdmEnumType, EdmFunction, EdmModel, EdmParameter, EdmProperty,
    EdmStructuredType, EdmTypeRef,
};
pub use primitive::{EdmPrimitiveKind, Facets, PrimitiveValue};
pub use registry::{TypeRegistry, INFERENCE_ORDER, PROMOTION_LADDER};
