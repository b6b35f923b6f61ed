use super::primitive::{EdmPrimitiveKind, Facets};
use super::registry::TypeRegistry;
use indexmap::IndexMap;
use std::sync::Arc;

/// Reference to a type declared in the model or a primitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdmTypeRef {
    Primitive(EdmPrimitiveKind),
    Complex(String),
    Enum(String),
    Entity(String),
}

impl EdmTypeRef {
    pub fn name(&self) -> &str {
        match self {
            EdmTypeRef::Primitive(kind) => kind.name(),
            EdmTypeRef::Complex(name) | EdmTypeRef::Enum(name) | EdmTypeRef::Entity(name) => name,
        }
    }

    pub fn as_primitive(&self) -> Option<EdmPrimitiveKind> {
        match self {
            EdmTypeRef::Primitive(kind) => Some(*kind),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdmProperty {
    pub name: String,
    pub ty: EdmTypeRef,
    pub collection: bool,
    pub facets: Facets,
}

impl EdmProperty {
    pub fn new(name: impl Into<String>, ty: EdmTypeRef) -> Self {
        Self {
            name: name.into(),
            ty,
            collection: false,
            facets: Facets::default(),
        }
    }

    pub fn primitive(name: impl Into<String>, kind: EdmPrimitiveKind) -> Self {
        Self::new(name, EdmTypeRef::Primitive(kind))
    }

    pub fn collection(mut self) -> Self {
        self.collection = true;
        self
    }

    pub fn with_facets(mut self, facets: Facets) -> Self {
        self.facets = facets;
        self
    }
}

/// Entity or complex type.
#[derive(Debug, Clone, PartialEq)]
pub struct EdmStructuredType {
    pub name: String,
    pub keys: Vec<String>,
    pub properties: IndexMap<String, Arc<EdmProperty>>,
}

impl EdmStructuredType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keys: Vec::new(),
            properties: IndexMap::new(),
        }
    }

    pub fn key(mut self, name: impl Into<String>) -> Self {
        self.keys.push(name.into());
        self
    }

    pub fn property(mut self, property: EdmProperty) -> Self {
        self.properties
            .insert(property.name.clone(), Arc::new(property));
        self
    }

    pub fn get(&self, name: &str) -> Option<&Arc<EdmProperty>> {
        self.properties.get(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdmEnumType {
    pub name: String,
    pub is_flags: bool,
    pub underlying: EdmPrimitiveKind,
    pub members: IndexMap<String, i64>,
}

impl EdmEnumType {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            is_flags: false,
            underlying: EdmPrimitiveKind::Int32,
            members: IndexMap::new(),
        }
    }

    pub fn flags(mut self) -> Self {
        self.is_flags = true;
        self
    }

    pub fn member(mut self, name: impl Into<String>, value: i64) -> Self {
        self.members.insert(name.into(), value);
        self
    }

    pub fn value_of(&self, member: &str) -> Option<i64> {
        self.members.get(member).copied()
    }

    /// Member names for a value, flags split into their components.
    pub fn names_of(&self, value: i64) -> Vec<&str> {
        if let Some((name, _)) = self.members.iter().find(|(_, v)| **v == value) {
            return vec![name.as_str()];
        }
        if !self.is_flags {
            return Vec::new();
        }
        self.members
            .iter()
            .filter(|(_, v)| **v != 0 && value & **v == **v)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EdmParameter {
    pub name: String,
    pub ty: EdmTypeRef,
}

/// Bound function callable from a member path, e.g. `Demo.OrderCount()`.
#[derive(Debug, Clone, PartialEq)]
pub struct EdmFunction {
    pub name: String,
    pub binding_type: String,
    pub parameters: Vec<EdmParameter>,
    pub return_type: EdmTypeRef,
    pub returns_collection: bool,
}

impl EdmFunction {
    pub fn bound(name: impl Into<String>, binding_type: impl Into<String>, return_type: EdmTypeRef) -> Self {
        Self {
            name: name.into(),
            binding_type: binding_type.into(),
            parameters: Vec::new(),
            return_type,
            returns_collection: false,
        }
    }

    pub fn parameter(mut self, name: impl Into<String>, ty: EdmTypeRef) -> Self {
        self.parameters.push(EdmParameter {
            name: name.into(),
            ty,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EdmEntitySet {
    pub name: String,
    pub entity_type: String,
}

/// Programmatically assembled service model.
#[derive(Debug, Clone)]
pub struct EdmModel {
    namespace: String,
    registry: Arc<TypeRegistry>,
    entity_types: IndexMap<String, Arc<EdmStructuredType>>,
    complex_types: IndexMap<String, Arc<EdmStructuredType>>,
    enum_types: IndexMap<String, Arc<EdmEnumType>>,
    functions: IndexMap<String, Arc<EdmFunction>>,
    entity_sets: IndexMap<String, EdmEntitySet>,
}

impl EdmModel {
    pub fn new(namespace: impl Into<String>, registry: Arc<TypeRegistry>) -> Self {
        Self {
            namespace: namespace.into(),
            registry,
            entity_types: IndexMap::new(),
            complex_types: IndexMap::new(),
            enum_types: IndexMap::new(),
            functions: IndexMap::new(),
            entity_sets: IndexMap::new(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    /// Prefix an unqualified name with the model namespace.
    pub fn qualify(&self, name: &str) -> String {
        if name.contains('.') {
            name.to_string()
        } else {
            format!("{}.{}", self.namespace, name)
        }
    }

    pub fn with_entity_type(mut self, mut ty: EdmStructuredType) -> Self {
        ty.name = self.qualify(&ty.name);
        self.entity_types.insert(ty.name.clone(), Arc::new(ty));
        self
    }

    pub fn with_complex_type(mut self, mut ty: EdmStructuredType) -> Self {
        ty.name = self.qualify(&ty.name);
        self.complex_types.insert(ty.name.clone(), Arc::new(ty));
        self
    }

    pub fn with_enum_type(mut self, mut ty: EdmEnumType) -> Self {
        ty.name = self.qualify(&ty.name);
        self.enum_types.insert(ty.name.clone(), Arc::new(ty));
        self
    }

    pub fn with_function(mut self, mut function: EdmFunction) -> Self {
        function.name = self.qualify(&function.name);
        function.binding_type = self.qualify(&function.binding_type);
        self.functions.insert(function.name.clone(), Arc::new(function));
        self
    }

    pub fn with_entity_set(mut self, name: impl Into<String>, entity_type: &str) -> Self {
        let name = name.into();
        let entity_type = self.qualify(entity_type);
        self.entity_sets.insert(
            name.clone(),
            EdmEntitySet { name, entity_type },
        );
        self
    }

    pub fn entity_type(&self, name: &str) -> Option<&Arc<EdmStructuredType>> {
        self.entity_types.get(&self.qualify(name))
    }

    pub fn complex_type(&self, name: &str) -> Option<&Arc<EdmStructuredType>> {
        self.complex_types.get(&self.qualify(name))
    }

    /// Entity or complex type by name.
    pub fn structured_type(&self, name: &str) -> Option<&Arc<EdmStructuredType>> {
        self.entity_type(name).or_else(|| self.complex_type(name))
    }

    pub fn enum_type(&self, name: &str) -> Option<&Arc<EdmEnumType>> {
        self.enum_types.get(&self.qualify(name))
    }

    pub fn function(&self, name: &str) -> Option<&Arc<EdmFunction>> {
        self.functions.get(&self.qualify(name))
    }

    pub fn entity_set(&self, name: &str) -> Option<&EdmEntitySet> {
        self.entity_sets.get(name)
    }

    pub fn entity_sets(&self) -> impl Iterator<Item = &EdmEntitySet> {
        self.entity_sets.values()
    }

    /// Resolve a type name to a primitive, enum, complex or entity type.
    pub fn resolve_type(&self, name: &str) -> Option<EdmTypeRef> {
        if let Some(kind) = self.registry.resolve(name) {
            return Some(EdmTypeRef::Primitive(kind));
        }
        let qualified = self.qualify(name);
        if self.enum_types.contains_key(&qualified) {
            Some(EdmTypeRef::Enum(qualified))
        } else if self.complex_types.contains_key(&qualified) {
            Some(EdmTypeRef::Complex(qualified))
        } else if self.entity_types.contains_key(&qualified) {
            Some(EdmTypeRef::Entity(qualified))
        } else {
            None
        }
    }
}
