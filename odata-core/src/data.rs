// In-memory entity data that filter and orderby expressions are evaluated against.

use crate::edm::PrimitiveValue;
use bigdecimal::BigDecimal;

#[derive(Debug, Clone, PartialEq)]
pub enum PropertyValue {
    Primitive(PrimitiveValue),
    Enum { type_name: String, value: i64 },
    Complex(ComplexValue),
    Collection(Vec<PropertyValue>),
}

impl PropertyValue {
    pub fn null() -> Self {
        PropertyValue::Primitive(PrimitiveValue::Null)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PropertyValue::Primitive(PrimitiveValue::Null))
    }

    pub fn as_primitive(&self) -> Option<&PrimitiveValue> {
        match self {
            PropertyValue::Primitive(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_complex(&self) -> Option<&ComplexValue> {
        match self {
            PropertyValue::Complex(value) => Some(value),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&[PropertyValue]> {
        match self {
            PropertyValue::Collection(items) => Some(items),
            _ => None,
        }
    }
}

macro_rules! primitive_property {
    ($($ty:ty),*) => {
        $(impl From<$ty> for PropertyValue {
            fn from(value: $ty) -> Self {
                PropertyValue::Primitive(value.into())
            }
        })*
    };
}

primitive_property!(bool, i32, i64, f64, &str, String, BigDecimal);

impl From<PrimitiveValue> for PropertyValue {
    fn from(value: PrimitiveValue) -> Self {
        PropertyValue::Primitive(value)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Property {
    pub name: String,
    pub value: PropertyValue,
}

impl Property {
    pub fn new(name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Structured value without identity.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ComplexValue {
    pub type_name: Option<String>,
    pub properties: Vec<Property>,
}

impl ComplexValue {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: Some(type_name.into()),
            properties: Vec::new(),
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        set_property(&mut self.properties, name.into(), value.into());
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        find_property(&self.properties, name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Entity {
    pub type_name: String,
    pub properties: Vec<Property>,
    pub etag: Option<String>,
}

impl Entity {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            properties: Vec::new(),
            etag: None,
        }
    }

    pub fn with(mut self, name: impl Into<String>, value: impl Into<PropertyValue>) -> Self {
        set_property(&mut self.properties, name.into(), value.into());
        self
    }

    pub fn with_etag(mut self, etag: impl Into<String>) -> Self {
        self.etag = Some(etag.into());
        self
    }

    pub fn property(&self, name: &str) -> Option<&PropertyValue> {
        find_property(&self.properties, name)
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<PropertyValue>) {
        set_property(&mut self.properties, name.into(), value.into());
    }
}

impl From<ComplexValue> for PropertyValue {
    fn from(value: ComplexValue) -> Self {
        PropertyValue::Complex(value)
    }
}

impl From<Vec<PropertyValue>> for PropertyValue {
    fn from(items: Vec<PropertyValue>) -> Self {
        PropertyValue::Collection(items)
    }
}

fn find_property<'a>(properties: &'a [Property], name: &str) -> Option<&'a PropertyValue> {
    properties.iter().find(|p| p.name == name).map(|p| &p.value)
}

fn set_property(properties: &mut Vec<Property>, name: String, value: PropertyValue) {
    match properties.iter_mut().find(|p| p.name == name) {
        Some(existing) => existing.value = value,
        None => properties.push(Property { name, value }),
    }
}
