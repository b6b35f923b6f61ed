// Operands produced while evaluating an expression.
//
// A literal starts untyped and becomes typed either by inference or by an
// explicit cast. Typed operands are immutable; every cast returns a new one.

use crate::edm::{
    format_value, from_uri_literal, parse_value, EdmEnumType, EdmPrimitiveKind, EdmProperty,
    Facets, PrimitiveValue, INFERENCE_ORDER, PROMOTION_LADDER,
};
use crate::error::{ODataError, ODataResult};
use bigdecimal::BigDecimal;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use tracing::trace;

#[derive(Debug, Clone, PartialEq)]
pub enum OperandType {
    /// Type of the bare `null` literal; compatible with everything.
    NullLiteral,
    Primitive(EdmPrimitiveKind),
    Enum(Arc<EdmEnumType>),
}

impl OperandType {
    pub fn as_primitive(&self) -> Option<EdmPrimitiveKind> {
        match self {
            OperandType::Primitive(kind) => Some(*kind),
            _ => None,
        }
    }
}

impl fmt::Display for OperandType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OperandType::NullLiteral => f.write_str("null"),
            OperandType::Primitive(kind) => write!(f, "{}", kind),
            OperandType::Enum(ty) => f.write_str(&ty.name),
        }
    }
}

/// Literal text whose type has not been decided yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UntypedOperand {
    literal: String,
}

impl UntypedOperand {
    pub fn new(literal: impl Into<String>) -> Self {
        Self {
            literal: literal.into(),
        }
    }

    pub fn literal(&self) -> &str {
        &self.literal
    }

    pub fn is_null_literal(&self) -> bool {
        self.literal == "null"
    }

    /// Infer the type by trying each candidate kind in a fixed order.
    pub fn resolve_type(&self) -> ODataResult<TypedOperand> {
        if self.is_null_literal() {
            return Ok(TypedOperand::null_literal());
        }
        for kind in INFERENCE_ORDER {
            if let Ok(value) = from_uri_literal(&self.literal, kind) {
                trace!(literal = %self.literal, %kind, "inferred literal type");
                return Ok(TypedOperand::new(value, OperandType::Primitive(kind)));
            }
        }
        Err(ODataError::internal(format!(
            "Could not determine the type of literal '{}'",
            self.literal
        )))
    }

    /// Parse the literal as `kind`.
    pub fn cast_to(&self, kind: EdmPrimitiveKind) -> ODataResult<TypedOperand> {
        if self.is_null_literal() {
            return Ok(TypedOperand::null_literal());
        }
        let value = from_uri_literal(&self.literal, kind)
            .map_err(|_| ODataError::cast_failed(&self.literal, kind))?;
        Ok(TypedOperand::new(value, OperandType::Primitive(kind)))
    }
}

/// A value together with its resolved type.
#[derive(Debug, Clone, PartialEq)]
pub struct TypedOperand {
    value: PrimitiveValue,
    ty: OperandType,
    property: Option<Arc<EdmProperty>>,
}

impl TypedOperand {
    pub fn new(value: PrimitiveValue, ty: OperandType) -> Self {
        Self {
            value,
            ty,
            property: None,
        }
    }

    /// Operand typed by the value's own kind; `Null` becomes the null literal.
    pub fn from_value(value: PrimitiveValue) -> Self {
        let ty = value
            .kind()
            .map_or(OperandType::NullLiteral, OperandType::Primitive);
        Self::new(value, ty)
    }

    pub fn null_literal() -> Self {
        Self::new(PrimitiveValue::Null, OperandType::NullLiteral)
    }

    pub fn null_of(kind: EdmPrimitiveKind) -> Self {
        Self::new(PrimitiveValue::Null, OperandType::Primitive(kind))
    }

    pub fn boolean(value: Option<bool>) -> Self {
        match value {
            Some(b) => Self::new(PrimitiveValue::Boolean(b), OperandType::Primitive(EdmPrimitiveKind::Boolean)),
            None => Self::null_of(EdmPrimitiveKind::Boolean),
        }
    }

    pub fn enum_value(value: i64, ty: Arc<EdmEnumType>) -> Self {
        Self::new(PrimitiveValue::Int64(value), OperandType::Enum(ty))
    }

    pub fn with_property(mut self, property: Arc<EdmProperty>) -> Self {
        self.property = Some(property);
        self
    }

    pub fn value(&self) -> &PrimitiveValue {
        &self.value
    }

    pub fn into_value(self) -> PrimitiveValue {
        self.value
    }

    pub fn ty(&self) -> &OperandType {
        &self.ty
    }

    pub fn kind(&self) -> Option<EdmPrimitiveKind> {
        self.ty.as_primitive()
    }

    pub fn property(&self) -> Option<&Arc<EdmProperty>> {
        self.property.as_ref()
    }

    pub fn facets(&self) -> Facets {
        self.property.as_ref().map(|p| p.facets).unwrap_or_default()
    }

    /// True for the null literal and for a typed null value.
    pub fn is_null(&self) -> bool {
        self.value.is_null()
    }

    pub fn is_null_literal(&self) -> bool {
        self.ty == OperandType::NullLiteral
    }

    /// Has type `kind`; the null literal satisfies every check.
    pub fn is(&self, kind: EdmPrimitiveKind) -> bool {
        self.is_null_literal() || self.kind() == Some(kind)
    }

    pub fn is_integer_type(&self) -> bool {
        self.is_null_literal() || self.kind().is_some_and(|k| k.is_integer())
    }

    pub fn is_decimal_type(&self) -> bool {
        self.is_null_literal() || self.kind().is_some_and(|k| k.is_decimal())
    }

    pub fn enum_type(&self) -> Option<&Arc<EdmEnumType>> {
        match &self.ty {
            OperandType::Enum(ty) => Some(ty),
            _ => None,
        }
    }

    /// Convert to `kind`, returning a new operand.
    pub fn cast_to(&self, kind: EdmPrimitiveKind) -> ODataResult<TypedOperand> {
        if self.ty == OperandType::Primitive(kind) {
            return Ok(self.clone());
        }
        if self.is_null() {
            return Ok(self.retyped(PrimitiveValue::Null, kind));
        }

        let text = self.plain_text();
        let value = match kind {
            EdmPrimitiveKind::Double | EdmPrimitiveKind::Single | EdmPrimitiveKind::Decimal => {
                self.cast_numeric(&text, kind)?
            }
            _ => parse_value(&text, kind, &Facets::default())
                .map_err(|_| ODataError::cast_failed(&text, kind))?,
        };
        trace!(from = %self.ty, to = %kind, "cast operand");
        Ok(self.retyped(value, kind))
    }

    fn retyped(&self, value: PrimitiveValue, kind: EdmPrimitiveKind) -> TypedOperand {
        TypedOperand {
            value,
            ty: OperandType::Primitive(kind),
            property: self.property.clone(),
        }
    }

    fn plain_text(&self) -> String {
        match (&self.ty, &self.value) {
            (OperandType::Enum(ty), PrimitiveValue::Int64(v)) => {
                let names = ty.names_of(*v);
                if names.is_empty() {
                    v.to_string()
                } else {
                    names.join(",")
                }
            }
            (_, value) => format_value(value, &self.facets()),
        }
    }

    // Numeric targets go through an exact decimal parse of the plain form so
    // no precision is lost before the final conversion.
    fn cast_numeric(&self, text: &str, kind: EdmPrimitiveKind) -> ODataResult<PrimitiveValue> {
        let special = match &self.value {
            PrimitiveValue::Single(f) => !f.is_finite(),
            PrimitiveValue::Double(f) => !f.is_finite(),
            _ => false,
        };
        if special {
            return match (kind, &self.value) {
                (EdmPrimitiveKind::Double, PrimitiveValue::Single(f)) => Ok(PrimitiveValue::Double(f64::from(*f))),
                (EdmPrimitiveKind::Single, PrimitiveValue::Double(f)) => Ok(PrimitiveValue::Single(*f as f32)),
                _ => Err(ODataError::cast_failed(text, kind)),
            };
        }

        let decimal = BigDecimal::from_str(text).map_err(|_| ODataError::cast_failed(text, kind))?;
        match kind {
            EdmPrimitiveKind::Decimal => Ok(PrimitiveValue::Decimal(decimal)),
            EdmPrimitiveKind::Double => text
                .parse::<f64>()
                .ok()
                .filter(|f| f.is_finite())
                .map(PrimitiveValue::Double)
                .ok_or_else(|| ODataError::cast_failed(text, kind)),
            _ => text
                .parse::<f32>()
                .ok()
                .filter(|f| f.is_finite())
                .map(PrimitiveValue::Single)
                .ok_or_else(|| ODataError::cast_failed(text, kind)),
        }
    }

    /// Promote for a binary operator: widest of Double, Single, Decimal,
    /// Int64, Int32, Int16 present on either side, else unchanged.
    pub fn cast_to_common_type(&self, other: &TypedOperand) -> ODataResult<TypedOperand> {
        if self.ty == other.ty && same_value_class(&self.value, &other.value) {
            return Ok(self.clone());
        }
        if self.is_null_literal() || other.is_null_literal() {
            return Ok(self.clone());
        }
        for kind in PROMOTION_LADDER {
            if self.kind() == Some(kind) || other.kind() == Some(kind) {
                return self.cast_to(kind);
            }
        }
        Ok(self.clone())
    }
}

fn same_value_class(a: &PrimitiveValue, b: &PrimitiveValue) -> bool {
    a.is_null() || b.is_null() || std::mem::discriminant(a) == std::mem::discriminant(b)
}

impl fmt::Display for TypedOperand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.plain_text(), self.ty)
    }
}

/// Result of visiting an expression node.
#[derive(Debug, Clone, PartialEq)]
pub enum Operand {
    Untyped(UntypedOperand),
    Typed(TypedOperand),
}

impl Operand {
    pub fn untyped(literal: impl Into<String>) -> Self {
        Operand::Untyped(UntypedOperand::new(literal))
    }

    pub fn is_null(&self) -> bool {
        match self {
            Operand::Untyped(u) => u.is_null_literal(),
            Operand::Typed(t) => t.is_null(),
        }
    }

    pub fn is_null_literal(&self) -> bool {
        match self {
            Operand::Untyped(u) => u.is_null_literal(),
            Operand::Typed(t) => t.is_null_literal(),
        }
    }

    /// Resolve to a typed operand, inferring the type of a literal.
    pub fn into_typed(self) -> ODataResult<TypedOperand> {
        match self {
            Operand::Untyped(u) => u.resolve_type(),
            Operand::Typed(t) => Ok(t),
        }
    }

    /// Resolve using `hint` as the preferred type for a literal, falling back
    /// to inference when the literal does not parse under it.
    pub fn into_typed_as(self, hint: Option<EdmPrimitiveKind>) -> ODataResult<TypedOperand> {
        match (self, hint) {
            (Operand::Untyped(u), Some(kind)) => u.cast_to(kind).or_else(|_| u.resolve_type()),
            (operand, _) => operand.into_typed(),
        }
    }

    pub fn cast_to(&self, kind: EdmPrimitiveKind) -> ODataResult<TypedOperand> {
        match self {
            Operand::Untyped(u) => u.cast_to(kind),
            Operand::Typed(t) => t.cast_to(kind),
        }
    }
}

impl From<TypedOperand> for Operand {
    fn from(value: TypedOperand) -> Self {
        Operand::Typed(value)
    }
}

/// Type both sides of a binary operator, using a typed side as the hint for
/// an untyped literal on the other.
pub fn type_pair(left: Operand, right: Operand) -> ODataResult<(TypedOperand, TypedOperand)> {
    match (left, right) {
        (Operand::Untyped(l), Operand::Typed(r)) => {
            let l = Operand::Untyped(l).into_typed_as(r.kind())?;
            Ok((l, r))
        }
        (Operand::Typed(l), Operand::Untyped(r)) => {
            let r = Operand::Untyped(r).into_typed_as(l.kind())?;
            Ok((l, r))
        }
        (l, r) => Ok((l.into_typed()?, r.into_typed()?)),
    }
}
