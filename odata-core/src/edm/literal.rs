// EDM literal grammar.
//
// Two textual forms exist for every primitive value: the plain form used in
// payloads and for cast round-tripping (`thirty`, `P1D`), and the URI literal
// form that appears in `$filter` and keys (`'thirty'`, `duration'P1D'`).

use super::primitive::{EdmPrimitiveKind, Facets, PrimitiveValue};
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use bigdecimal::BigDecimal;
use chrono::{DateTime, NaiveDate, NaiveTime, SecondsFormat, TimeDelta};
use regex::Regex;
use std::str::FromStr;
use std::sync::LazyLock;
use uuid::Uuid;

static DECIMAL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)$").expect("decimal pattern"));

static FLOAT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[+-]?(\d+(\.\d*)?|\.\d+)([eE][+-]?\d+)?$").expect("float pattern")
});

static GUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[0-9a-fA-F]{8}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{4}-[0-9a-fA-F]{12}$")
        .expect("guid pattern")
});

static DURATION_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(-)?P(?:(\d+)D)?(?:T(?:(\d+)H)?(?:(\d+)M)?(?:(\d+)(?:\.(\d+))?S)?)?$")
        .expect("duration pattern")
});

static SHORT_DATETIME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\d{4}-\d{2}-\d{2}[Tt]\d{2}:\d{2})([Zz]|[+-]\d{2}:\d{2})$")
        .expect("datetime pattern")
});

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LiteralError {
    #[error("'{literal}' is not a valid {kind} value")]
    Invalid {
        literal: String,
        kind: EdmPrimitiveKind,
    },

    #[error("'{literal}' violates the {facet} facet of {kind}")]
    Facet {
        literal: String,
        kind: EdmPrimitiveKind,
        facet: &'static str,
    },
}

fn invalid(literal: &str, kind: EdmPrimitiveKind) -> LiteralError {
    LiteralError::Invalid {
        literal: literal.to_string(),
        kind,
    }
}

/// Parse the plain (non-URI) string form of a value.
pub fn parse_value(
    text: &str,
    kind: EdmPrimitiveKind,
    facets: &Facets,
) -> Result<PrimitiveValue, LiteralError> {
    let err = || invalid(text, kind);
    let value = match kind {
        EdmPrimitiveKind::Boolean => {
            if text.eq_ignore_ascii_case("true") {
                PrimitiveValue::Boolean(true)
            } else if text.eq_ignore_ascii_case("false") {
                PrimitiveValue::Boolean(false)
            } else {
                return Err(err());
            }
        }
        EdmPrimitiveKind::Byte => PrimitiveValue::Byte(text.parse().map_err(|_| err())?),
        EdmPrimitiveKind::SByte => PrimitiveValue::SByte(text.parse().map_err(|_| err())?),
        EdmPrimitiveKind::Int16 => PrimitiveValue::Int16(text.parse().map_err(|_| err())?),
        EdmPrimitiveKind::Int32 => PrimitiveValue::Int32(text.parse().map_err(|_| err())?),
        EdmPrimitiveKind::Int64 => PrimitiveValue::Int64(text.parse().map_err(|_| err())?),
        EdmPrimitiveKind::Decimal => {
            if !DECIMAL_RE.is_match(text) {
                return Err(err());
            }
            let value = BigDecimal::from_str(text).map_err(|_| err())?;
            check_decimal_facets(text, &value, facets)?;
            PrimitiveValue::Decimal(value)
        }
        EdmPrimitiveKind::Single => PrimitiveValue::Single(parse_float::<f32>(text).ok_or_else(err)?),
        EdmPrimitiveKind::Double => PrimitiveValue::Double(parse_float::<f64>(text).ok_or_else(err)?),
        EdmPrimitiveKind::String => {
            if let Some(max) = facets.max_length {
                if text.chars().count() > max {
                    return Err(LiteralError::Facet {
                        literal: text.to_string(),
                        kind,
                        facet: "MaxLength",
                    });
                }
            }
            PrimitiveValue::String(text.to_string())
        }
        EdmPrimitiveKind::Date => {
            PrimitiveValue::Date(NaiveDate::parse_from_str(text, "%Y-%m-%d").map_err(|_| err())?)
        }
        EdmPrimitiveKind::DateTimeOffset => PrimitiveValue::DateTimeOffset(parse_datetime(text).ok_or_else(err)?),
        EdmPrimitiveKind::TimeOfDay => {
            let time = NaiveTime::parse_from_str(text, "%H:%M:%S%.f")
                .or_else(|_| NaiveTime::parse_from_str(text, "%H:%M"))
                .map_err(|_| err())?;
            PrimitiveValue::TimeOfDay(time)
        }
        EdmPrimitiveKind::Duration => PrimitiveValue::Duration(parse_duration(text).ok_or_else(err)?),
        EdmPrimitiveKind::Guid => {
            if !GUID_RE.is_match(text) {
                return Err(err());
            }
            PrimitiveValue::Guid(Uuid::parse_str(text).map_err(|_| err())?)
        }
        EdmPrimitiveKind::Binary => {
            let bytes = STANDARD
                .decode(text)
                .or_else(|_| URL_SAFE.decode(text))
                .or_else(|_| URL_SAFE_NO_PAD.decode(text))
                .map_err(|_| err())?;
            if let Some(max) = facets.max_length {
                if bytes.len() > max {
                    return Err(LiteralError::Facet {
                        literal: text.to_string(),
                        kind,
                        facet: "MaxLength",
                    });
                }
            }
            PrimitiveValue::Binary(bytes)
        }
    };
    Ok(value)
}

fn check_decimal_facets(text: &str, value: &BigDecimal, facets: &Facets) -> Result<(), LiteralError> {
    let (digits, exponent) = value.normalized().as_bigint_and_exponent();
    let fraction_digits = exponent.max(0) as u64;
    let total_digits = digits.to_string().trim_start_matches('-').len() as u64
        + (-exponent).max(0) as u64;

    let facet = |facet| LiteralError::Facet {
        literal: text.to_string(),
        kind: EdmPrimitiveKind::Decimal,
        facet,
    };
    if let Some(scale) = facets.scale {
        if fraction_digits > u64::from(scale) {
            return Err(facet("Scale"));
        }
    }
    if let Some(precision) = facets.precision {
        if total_digits > u64::from(precision) {
            return Err(facet("Precision"));
        }
    }
    Ok(())
}

trait Float: FromStr + Copy {
    const INFINITY: Self;
    const NEG_INFINITY: Self;
    const NAN: Self;
    fn is_finite(self) -> bool;
}

impl Float for f32 {
    const INFINITY: Self = f32::INFINITY;
    const NEG_INFINITY: Self = f32::NEG_INFINITY;
    const NAN: Self = f32::NAN;
    fn is_finite(self) -> bool {
        f32::is_finite(self)
    }
}

impl Float for f64 {
    const INFINITY: Self = f64::INFINITY;
    const NEG_INFINITY: Self = f64::NEG_INFINITY;
    const NAN: Self = f64::NAN;
    fn is_finite(self) -> bool {
        f64::is_finite(self)
    }
}

fn parse_float<F: Float>(text: &str) -> Option<F> {
    match text {
        "INF" => return Some(F::INFINITY),
        "-INF" => return Some(F::NEG_INFINITY),
        "NaN" => return Some(F::NAN),
        _ => {}
    }
    if !FLOAT_RE.is_match(text) {
        return None;
    }
    let value: F = text.parse().ok()?;
    // A finite literal that overflows the target width is out of range.
    value.is_finite().then_some(value)
}

fn parse_datetime(text: &str) -> Option<DateTime<chrono::FixedOffset>> {
    if let Ok(value) = DateTime::parse_from_rfc3339(text) {
        return Some(value);
    }
    let caps = SHORT_DATETIME_RE.captures(text)?;
    let expanded = format!("{}:00{}", &caps[1], &caps[2]);
    DateTime::parse_from_rfc3339(&expanded).ok()
}

/// Parse an ISO 8601 day-time duration (`-P1DT2H3M4.5S`).
pub fn parse_duration(text: &str) -> Option<TimeDelta> {
    let caps = DURATION_RE.captures(text)?;
    let has_component = (2..=5).any(|i| caps.get(i).is_some());
    if !has_component || text.ends_with('T') {
        return None;
    }

    let number = |i: usize| -> Option<i128> {
        caps.get(i).map_or(Some(0), |m| m.as_str().parse::<i128>().ok())
    };
    let days = number(2)?;
    let hours = number(3)?;
    let minutes = number(4)?;
    let seconds = number(5)?;
    let nanos = match caps.get(6) {
        Some(m) => {
            let mut digits: String = m.as_str().chars().take(9).collect();
            while digits.len() < 9 {
                digits.push('0');
            }
            digits.parse::<i128>().ok()?
        }
        None => 0,
    };

    let total = days
        .checked_mul(86_400)?
        .checked_add(hours.checked_mul(3_600)?)?
        .checked_add(minutes.checked_mul(60)?)?
        .checked_add(seconds)?
        .checked_mul(1_000_000_000)?
        .checked_add(nanos)?;
    let total = if caps.get(1).is_some() { -total } else { total };
    let secs = i64::try_from(total.div_euclid(1_000_000_000)).ok()?;
    let sub = u32::try_from(total.rem_euclid(1_000_000_000)).ok()?;
    TimeDelta::new(secs, sub)
}

pub fn format_duration(value: &TimeDelta) -> String {
    let total = i128::from(value.num_seconds()) * 1_000_000_000
        + i128::from(value.subsec_nanos());
    let negative = total < 0;
    let total = total.abs();

    let nanos = total % 1_000_000_000;
    let mut secs = total / 1_000_000_000;
    let days = secs / 86_400;
    secs %= 86_400;
    let hours = secs / 3_600;
    secs %= 3_600;
    let minutes = secs / 60;
    secs %= 60;

    let mut out = String::new();
    if negative {
        out.push('-');
    }
    out.push('P');
    if days > 0 {
        out.push_str(&format!("{}D", days));
    }
    if hours > 0 || minutes > 0 || secs > 0 || nanos > 0 || days == 0 {
        out.push('T');
        if hours > 0 {
            out.push_str(&format!("{}H", hours));
        }
        if minutes > 0 {
            out.push_str(&format!("{}M", minutes));
        }
        if secs > 0 || nanos > 0 || (hours == 0 && minutes == 0) {
            if nanos > 0 {
                let fraction = format!("{:09}", nanos);
                out.push_str(&format!("{}.{}S", secs, fraction.trim_end_matches('0')));
            } else {
                out.push_str(&format!("{}S", secs));
            }
        }
    }
    out
}

/// Plain string form of a value, honouring scale and precision facets.
pub fn format_value(value: &PrimitiveValue, facets: &Facets) -> String {
    match value {
        PrimitiveValue::Null => "null".to_string(),
        PrimitiveValue::Binary(bytes) => STANDARD.encode(bytes),
        PrimitiveValue::Boolean(b) => b.to_string(),
        PrimitiveValue::Byte(v) => v.to_string(),
        PrimitiveValue::SByte(v) => v.to_string(),
        PrimitiveValue::Int16(v) => v.to_string(),
        PrimitiveValue::Int32(v) => v.to_string(),
        PrimitiveValue::Int64(v) => v.to_string(),
        PrimitiveValue::Decimal(d) => match facets.scale {
            Some(scale) => d.with_scale(i64::from(scale)).to_plain_string(),
            None => d.normalized().to_plain_string(),
        },
        PrimitiveValue::Single(f) => format_float(f64::from(*f), f.to_string()),
        PrimitiveValue::Double(f) => format_float(*f, f.to_string()),
        PrimitiveValue::String(s) => s.clone(),
        PrimitiveValue::Date(d) => d.format("%Y-%m-%d").to_string(),
        PrimitiveValue::DateTimeOffset(dt) => {
            let format = match facets.precision {
                Some(0) => SecondsFormat::Secs,
                Some(1..=3) => SecondsFormat::Millis,
                Some(4..=6) => SecondsFormat::Micros,
                Some(_) => SecondsFormat::Nanos,
                None => SecondsFormat::AutoSi,
            };
            dt.to_rfc3339_opts(format, true)
        }
        PrimitiveValue::TimeOfDay(t) => t.format("%H:%M:%S%.f").to_string(),
        PrimitiveValue::Duration(d) => format_duration(d),
        PrimitiveValue::Guid(g) => g.hyphenated().to_string(),
    }
}

fn format_float(value: f64, display: String) -> String {
    if value.is_nan() {
        "NaN".to_string()
    } else if value == f64::INFINITY {
        "INF".to_string()
    } else if value == f64::NEG_INFINITY {
        "-INF".to_string()
    } else {
        display
    }
}

/// Parse a URI literal (as written in `$filter`, keys and aliases).
pub fn from_uri_literal(literal: &str, kind: EdmPrimitiveKind) -> Result<PrimitiveValue, LiteralError> {
    if literal == "null" {
        return Ok(PrimitiveValue::Null);
    }
    let facets = Facets::default();
    match kind {
        EdmPrimitiveKind::String => {
            let inner = unquote(literal).ok_or_else(|| invalid(literal, kind))?;
            Ok(PrimitiveValue::String(inner))
        }
        EdmPrimitiveKind::Duration => {
            let text = prefixed(literal, "duration").unwrap_or_else(|| literal.to_string());
            parse_value(&text, kind, &facets).map_err(|_| invalid(literal, kind))
        }
        EdmPrimitiveKind::Binary => {
            let text = prefixed(literal, "binary").ok_or_else(|| invalid(literal, kind))?;
            parse_value(&text, kind, &facets).map_err(|_| invalid(literal, kind))
        }
        EdmPrimitiveKind::Decimal => parse_suffixed(literal, kind, &['M', 'm']),
        EdmPrimitiveKind::Double => parse_suffixed(literal, kind, &['D', 'd']),
        EdmPrimitiveKind::Single => parse_suffixed(literal, kind, &['F', 'f']),
        EdmPrimitiveKind::Int64 => parse_suffixed(literal, kind, &['L', 'l']),
        _ => parse_value(literal, kind, &facets),
    }
}

fn parse_suffixed(literal: &str, kind: EdmPrimitiveKind, suffixes: &[char]) -> Result<PrimitiveValue, LiteralError> {
    let text = match literal.strip_suffix(suffixes) {
        // `INF` ends in `F`; only strip when a digit remains before the suffix.
        Some(rest) if rest.ends_with(|c: char| c.is_ascii_digit() || c == '.') => rest,
        _ => literal,
    };
    parse_value(text, kind, &Facets::default()).map_err(|_| invalid(literal, kind))
}

/// `'it''s'` -> `it's`
fn unquote(literal: &str) -> Option<String> {
    let inner = literal.strip_prefix('\'')?.strip_suffix('\'')?;
    let mut out = String::with_capacity(inner.len());
    let mut chars = inner.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' && chars.next() != Some('\'') {
            return None;
        }
        out.push(c);
    }
    Some(out)
}

/// `duration'P1D'` -> `P1D` (prefix is case-insensitive).
fn prefixed(literal: &str, prefix: &str) -> Option<String> {
    let rest = literal
        .get(..prefix.len())
        .filter(|head| head.eq_ignore_ascii_case(prefix))
        .and_then(|_| literal.get(prefix.len()..))
        .filter(|rest| !rest.is_empty())?;
    unquote(rest)
}

pub fn quote(text: &str) -> String {
    format!("'{}'", text.replace('\'', "''"))
}

/// URI literal of a value; inverse of [`from_uri_literal`].
pub fn to_uri_literal(value: &PrimitiveValue) -> String {
    match value {
        PrimitiveValue::Null => "null".to_string(),
        PrimitiveValue::String(s) => quote(s),
        PrimitiveValue::Duration(d) => format!("duration{}", quote(&format_duration(d))),
        PrimitiveValue::Binary(bytes) => format!("binary'{}'", URL_SAFE.encode(bytes)),
        other => format_value(other, &Facets::default()),
    }
}
