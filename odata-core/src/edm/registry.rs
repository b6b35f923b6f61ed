use super::primitive::EdmPrimitiveKind;
use std::collections::HashMap;

/// Order in which an untyped literal is tried against primitive types.
/// The null literal is checked before any of these.
pub const INFERENCE_ORDER: [EdmPrimitiveKind; 14] = [
    EdmPrimitiveKind::String,
    EdmPrimitiveKind::Boolean,
    EdmPrimitiveKind::DateTimeOffset,
    EdmPrimitiveKind::Date,
    EdmPrimitiveKind::TimeOfDay,
    EdmPrimitiveKind::Duration,
    EdmPrimitiveKind::SByte,
    EdmPrimitiveKind::Byte,
    EdmPrimitiveKind::Int16,
    EdmPrimitiveKind::Int32,
    EdmPrimitiveKind::Int64,
    EdmPrimitiveKind::Decimal,
    EdmPrimitiveKind::Single,
    EdmPrimitiveKind::Double,
];

/// Binary-operator promotion ladder, widest first.
pub const PROMOTION_LADDER: [EdmPrimitiveKind; 6] = [
    EdmPrimitiveKind::Double,
    EdmPrimitiveKind::Single,
    EdmPrimitiveKind::Decimal,
    EdmPrimitiveKind::Int64,
    EdmPrimitiveKind::Int32,
    EdmPrimitiveKind::Int16,
];

/// Read-only lookup of primitive type names.
///
/// Built once when the service starts and handed to every [`EdmModel`]
/// (and through it to every evaluator) behind an `Arc`.
///
/// [`EdmModel`]: super::EdmModel
#[derive(Debug, Clone)]
pub struct TypeRegistry {
    by_name: HashMap<String, EdmPrimitiveKind>,
}

impl TypeRegistry {
    pub fn standard() -> Self {
        let mut by_name = HashMap::new();
        for kind in EdmPrimitiveKind::ALL {
            by_name.insert(kind.name().to_string(), kind);
        }
        Self { by_name }
    }

    /// Resolve a qualified primitive type name such as `Edm.Int32`.
    pub fn resolve(&self, name: &str) -> Option<EdmPrimitiveKind> {
        self.by_name.get(name).copied()
    }

    pub fn is_primitive(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.by_name.len()
    }

    pub fn is_empty(&self) -> bool {
        self.by_name.is_empty()
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_standard_registry() {
        let registry = TypeRegistry::standard();
        assert_eq!(registry.len(), EdmPrimitiveKind::ALL.len());
        assert_eq!(registry.resolve("Edm.Guid"), Some(EdmPrimitiveKind::Guid));
        assert_eq!(registry.resolve("Guid"), None);
        assert!(!registry.is_primitive("Demo.Color"));
    }

    #[test]
    fn test_inference_order_excludes_binary_and_guid() {
        assert!(!INFERENCE_ORDER.contains(&EdmPrimitiveKind::Binary));
        assert!(!INFERENCE_ORDER.contains(&EdmPrimitiveKind::Guid));
        assert_eq!(INFERENCE_ORDER[0], EdmPrimitiveKind::String);
        assert_eq!(INFERENCE_ORDER[13], EdmPrimitiveKind::Double);
    }
}
