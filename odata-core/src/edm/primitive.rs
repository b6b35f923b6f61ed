use bigdecimal::BigDecimal;
use chrono::{DateTime, FixedOffset, NaiveDate, NaiveTime, TimeDelta};
use std::fmt;
use uuid::Uuid;

/// EDM primitive types understood by the literal grammar and the evaluator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EdmPrimitiveKind {
    Binary,
    Boolean,
    Byte,
    SByte,
    Int16,
    Int32,
    Int64,
    Decimal,
    Single,
    Double,
    String,
    Date,
    DateTimeOffset,
    TimeOfDay,
    Duration,
    Guid,
}

impl EdmPrimitiveKind {
    pub const ALL: [EdmPrimitiveKind; 16] = [
        EdmPrimitiveKind::Binary,
        EdmPrimitiveKind::Boolean,
        EdmPrimitiveKind::Byte,
        EdmPrimitiveKind::SByte,
        EdmPrimitiveKind::Int16,
        EdmPrimitiveKind::Int32,
        EdmPrimitiveKind::Int64,
        EdmPrimitiveKind::Decimal,
        EdmPrimitiveKind::Single,
        EdmPrimitiveKind::Double,
        EdmPrimitiveKind::String,
        EdmPrimitiveKind::Date,
        EdmPrimitiveKind::DateTimeOffset,
        EdmPrimitiveKind::TimeOfDay,
        EdmPrimitiveKind::Duration,
        EdmPrimitiveKind::Guid,
    ];

    /// Qualified name, e.g. `Edm.Int32`.
    pub fn name(&self) -> &'static str {
        match self {
            EdmPrimitiveKind::Binary => "Edm.Binary",
            EdmPrimitiveKind::Boolean => "Edm.Boolean",
            EdmPrimitiveKind::Byte => "Edm.Byte",
            EdmPrimitiveKind::SByte => "Edm.SByte",
            EdmPrimitiveKind::Int16 => "Edm.Int16",
            EdmPrimitiveKind::Int32 => "Edm.Int32",
            EdmPrimitiveKind::Int64 => "Edm.Int64",
            EdmPrimitiveKind::Decimal => "Edm.Decimal",
            EdmPrimitiveKind::Single => "Edm.Single",
            EdmPrimitiveKind::Double => "Edm.Double",
            EdmPrimitiveKind::String => "Edm.String",
            EdmPrimitiveKind::Date => "Edm.Date",
            EdmPrimitiveKind::DateTimeOffset => "Edm.DateTimeOffset",
            EdmPrimitiveKind::TimeOfDay => "Edm.TimeOfDay",
            EdmPrimitiveKind::Duration => "Edm.Duration",
            EdmPrimitiveKind::Guid => "Edm.Guid",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let short = name.strip_prefix("Edm.").unwrap_or(name);
        Self::ALL
            .iter()
            .copied()
            .find(|kind| kind.name()[4..].eq_ignore_ascii_case(short))
    }

    pub fn is_integer(&self) -> bool {
        matches!(
            self,
            EdmPrimitiveKind::Byte
                | EdmPrimitiveKind::SByte
                | EdmPrimitiveKind::Int16
                | EdmPrimitiveKind::Int32
                | EdmPrimitiveKind::Int64
        )
    }

    pub fn is_decimal(&self) -> bool {
        matches!(
            self,
            EdmPrimitiveKind::Decimal | EdmPrimitiveKind::Single | EdmPrimitiveKind::Double
        )
    }

    pub fn is_numeric(&self) -> bool {
        self.is_integer() || self.is_decimal()
    }
}

impl fmt::Display for EdmPrimitiveKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Facets declared on a property; they steer formatting and validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Facets {
    pub nullable: bool,
    pub max_length: Option<usize>,
    pub precision: Option<u32>,
    pub scale: Option<u32>,
}

impl Default for Facets {
    fn default() -> Self {
        Self {
            nullable: true,
            max_length: None,
            precision: None,
            scale: None,
        }
    }
}

impl Facets {
    pub fn non_nullable() -> Self {
        Self {
            nullable: false,
            ..Self::default()
        }
    }

    pub fn with_max_length(mut self, max_length: usize) -> Self {
        self.max_length = Some(max_length);
        self
    }

    pub fn with_precision(mut self, precision: u32) -> Self {
        self.precision = Some(precision);
        self
    }

    pub fn with_scale(mut self, scale: u32) -> Self {
        self.scale = Some(scale);
        self
    }
}

/// A primitive value. `Null` carries no kind; the surrounding operand or
/// property supplies it.
#[derive(Debug, Clone, PartialEq)]
pub enum PrimitiveValue {
    Null,
    Binary(Vec<u8>),
    Boolean(bool),
    Byte(u8),
    SByte(i8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Decimal(BigDecimal),
    Single(f32),
    Double(f64),
    String(String),
    Date(NaiveDate),
    DateTimeOffset(DateTime<FixedOffset>),
    TimeOfDay(NaiveTime),
    Duration(TimeDelta),
    Guid(Uuid),
}

impl PrimitiveValue {
    pub fn kind(&self) -> Option<EdmPrimitiveKind> {
        let kind = match self {
            PrimitiveValue::Null => return None,
            PrimitiveValue::Binary(_) => EdmPrimitiveKind::Binary,
            PrimitiveValue::Boolean(_) => EdmPrimitiveKind::Boolean,
            PrimitiveValue::Byte(_) => EdmPrimitiveKind::Byte,
            PrimitiveValue::SByte(_) => EdmPrimitiveKind::SByte,
            PrimitiveValue::Int16(_) => EdmPrimitiveKind::Int16,
            PrimitiveValue::Int32(_) => EdmPrimitiveKind::Int32,
            PrimitiveValue::Int64(_) => EdmPrimitiveKind::Int64,
            PrimitiveValue::Decimal(_) => EdmPrimitiveKind::Decimal,
            PrimitiveValue::Single(_) => EdmPrimitiveKind::Single,
            PrimitiveValue::Double(_) => EdmPrimitiveKind::Double,
            PrimitiveValue::String(_) => EdmPrimitiveKind::String,
            PrimitiveValue::Date(_) => EdmPrimitiveKind::Date,
            PrimitiveValue::DateTimeOffset(_) => EdmPrimitiveKind::DateTimeOffset,
            PrimitiveValue::TimeOfDay(_) => EdmPrimitiveKind::TimeOfDay,
            PrimitiveValue::Duration(_) => EdmPrimitiveKind::Duration,
            PrimitiveValue::Guid(_) => EdmPrimitiveKind::Guid,
        };
        Some(kind)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, PrimitiveValue::Null)
    }

    /// Integer view of any integer-kinded value.
    pub fn as_i128(&self) -> Option<i128> {
        match self {
            PrimitiveValue::Byte(v) => Some(i128::from(*v)),
            PrimitiveValue::SByte(v) => Some(i128::from(*v)),
            PrimitiveValue::Int16(v) => Some(i128::from(*v)),
            PrimitiveValue::Int32(v) => Some(i128::from(*v)),
            PrimitiveValue::Int64(v) => Some(i128::from(*v)),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            PrimitiveValue::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            PrimitiveValue::String(s) => Some(s),
            _ => None,
        }
    }
}

impl From<bool> for PrimitiveValue {
    fn from(value: bool) -> Self {
        PrimitiveValue::Boolean(value)
    }
}

impl From<i32> for PrimitiveValue {
    fn from(value: i32) -> Self {
        PrimitiveValue::Int32(value)
    }
}

impl From<i64> for PrimitiveValue {
    fn from(value: i64) -> Self {
        PrimitiveValue::Int64(value)
    }
}

impl From<f64> for PrimitiveValue {
    fn from(value: f64) -> Self {
        PrimitiveValue::Double(value)
    }
}

impl From<&str> for PrimitiveValue {
    fn from(value: &str) -> Self {
        PrimitiveValue::String(value.to_string())
    }
}

impl From<String> for PrimitiveValue {
    fn from(value: String) -> Self {
        PrimitiveValue::String(value)
    }
}

impl From<BigDecimal> for PrimitiveValue {
    fn from(value: BigDecimal) -> Self {
        PrimitiveValue::Decimal(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        assert_eq!(EdmPrimitiveKind::Int32.name(), "Edm.Int32");
        assert_eq!(
            EdmPrimitiveKind::from_name("Edm.DateTimeOffset"),
            Some(EdmPrimitiveKind::DateTimeOffset)
        );
        assert_eq!(EdmPrimitiveKind::from_name("int64"), Some(EdmPrimitiveKind::Int64));
        assert_eq!(EdmPrimitiveKind::from_name("Edm.Geography"), None);
    }

    #[test]
    fn test_kind_classes() {
        assert!(EdmPrimitiveKind::SByte.is_integer());
        assert!(!EdmPrimitiveKind::Decimal.is_integer());
        assert!(EdmPrimitiveKind::Single.is_decimal());
        assert!(!EdmPrimitiveKind::String.is_numeric());
    }

    #[test]
    fn test_value_kind() {
        assert_eq!(PrimitiveValue::from(42).kind(), Some(EdmPrimitiveKind::Int32));
        assert_eq!(PrimitiveValue::Null.kind(), None);
        assert_eq!(PrimitiveValue::Int16(-3).as_i128(), Some(-3));
    }
}
