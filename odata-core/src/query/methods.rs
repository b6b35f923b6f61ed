// Built-in query functions over already evaluated operands.
//
// `cast` and `isof` need the model and are handled by the evaluator.

use super::expression::MethodKind;
use super::operand::TypedOperand;
use crate::edm::{EdmPrimitiveKind, PrimitiveValue};
use crate::error::{ODataError, ODataResult};
use bigdecimal::{BigDecimal, RoundingMode};
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveTime, Timelike, Utc};
use std::str::FromStr;

pub fn invoke(method: MethodKind, args: &[TypedOperand]) -> ODataResult<TypedOperand> {
    match method {
        MethodKind::EndsWith => string_predicate(method, args, |s, p| s.ends_with(p)),
        MethodKind::StartsWith => string_predicate(method, args, |s, p| s.starts_with(p)),
        MethodKind::Contains => string_predicate(method, args, |s, p| s.contains(p)),
        MethodKind::IndexOf => {
            let (Some(s), Some(p)) = (string_arg(method, args, 0)?, string_arg(method, args, 1)?) else {
                return Ok(TypedOperand::null_of(EdmPrimitiveKind::Int32));
            };
            let index = s
                .find(p)
                .map_or(-1, |byte| s[..byte].chars().count() as i64);
            int32(index)
        }
        MethodKind::ToLower => map_string(method, args, str::to_lowercase),
        MethodKind::ToUpper => map_string(method, args, str::to_uppercase),
        MethodKind::Trim => map_string(method, args, |s| s.trim().to_string()),
        MethodKind::Substring => substring(args),
        MethodKind::Concat => {
            let (Some(a), Some(b)) = (string_arg(method, args, 0)?, string_arg(method, args, 1)?) else {
                return Ok(TypedOperand::null_of(EdmPrimitiveKind::String));
            };
            Ok(string(format!("{}{}", a, b)))
        }
        MethodKind::Length => match string_arg(method, args, 0)? {
            Some(s) => int32(s.chars().count() as i64),
            None => Ok(TypedOperand::null_of(EdmPrimitiveKind::Int32)),
        },
        MethodKind::Year | MethodKind::Month | MethodKind::Day => date_part(method, args),
        MethodKind::Hour | MethodKind::Minute | MethodKind::Second => time_part(method, args),
        MethodKind::FractionalSeconds => fractional_seconds(args),
        MethodKind::TotalSeconds => total_seconds(args),
        MethodKind::Date => match datetime_arg(method, args)? {
            Some(dt) => Ok(TypedOperand::from_value(PrimitiveValue::Date(dt.date_naive()))),
            None => Ok(TypedOperand::null_of(EdmPrimitiveKind::Date)),
        },
        MethodKind::Time => match datetime_arg(method, args)? {
            Some(dt) => Ok(TypedOperand::from_value(PrimitiveValue::TimeOfDay(dt.time()))),
            None => Ok(TypedOperand::null_of(EdmPrimitiveKind::TimeOfDay)),
        },
        MethodKind::TotalOffsetMinutes => match datetime_arg(method, args)? {
            Some(dt) => int32(i64::from(dt.offset().local_minus_utc() / 60)),
            None => Ok(TypedOperand::null_of(EdmPrimitiveKind::Int32)),
        },
        MethodKind::Now => Ok(datetime(Utc::now().fixed_offset())),
        MethodKind::MaxDateTime => boundary_datetime(9999, 12, 31, NaiveTime::from_hms_nano_opt(23, 59, 59, 999_999_999)),
        MethodKind::MinDateTime => boundary_datetime(1, 1, 1, NaiveTime::from_hms_opt(0, 0, 0)),
        MethodKind::Round => round(method, args, RoundingMode::HalfUp, f64::round),
        MethodKind::Floor => round(method, args, RoundingMode::Floor, f64::floor),
        MethodKind::Ceiling => round(method, args, RoundingMode::Ceiling, f64::ceil),
        MethodKind::Cast | MethodKind::IsOf => Err(ODataError::internal(format!(
            "{} must be evaluated with the model",
            method
        ))),
    }
}

fn arg<'a>(method: MethodKind, args: &'a [TypedOperand], index: usize) -> ODataResult<&'a TypedOperand> {
    args.get(index)
        .ok_or_else(|| ODataError::bad_request(format!("Missing argument {} of {}", index + 1, method)))
}

fn wrong_type(method: MethodKind, operand: &TypedOperand, expected: &str) -> ODataError {
    ODataError::bad_request(format!(
        "Function {} expects {}, found {}",
        method,
        expected,
        operand.ty()
    ))
}

fn string_arg<'a>(method: MethodKind, args: &'a [TypedOperand], index: usize) -> ODataResult<Option<&'a str>> {
    let operand = arg(method, args, index)?;
    if !operand.is(EdmPrimitiveKind::String) {
        return Err(wrong_type(method, operand, "Edm.String"));
    }
    Ok(operand.value().as_str())
}

fn integer_arg(method: MethodKind, args: &[TypedOperand], index: usize) -> ODataResult<Option<i128>> {
    let operand = arg(method, args, index)?;
    if !operand.is_integer_type() {
        return Err(wrong_type(method, operand, "an integer"));
    }
    Ok(operand.value().as_i128())
}

fn datetime_arg(method: MethodKind, args: &[TypedOperand]) -> ODataResult<Option<DateTime<FixedOffset>>> {
    let operand = arg(method, args, 0)?;
    match operand.value() {
        PrimitiveValue::DateTimeOffset(dt) => Ok(Some(*dt)),
        PrimitiveValue::Null if operand.is(EdmPrimitiveKind::DateTimeOffset) => Ok(None),
        _ => Err(wrong_type(method, operand, "Edm.DateTimeOffset")),
    }
}

fn string(value: String) -> TypedOperand {
    TypedOperand::from_value(PrimitiveValue::String(value))
}

fn int32(value: i64) -> ODataResult<TypedOperand> {
    let value = i32::try_from(value).map_err(|_| ODataError::bad_request("Result exceeds Edm.Int32"))?;
    Ok(TypedOperand::from_value(PrimitiveValue::Int32(value)))
}

fn datetime(value: DateTime<FixedOffset>) -> TypedOperand {
    TypedOperand::from_value(PrimitiveValue::DateTimeOffset(value))
}

fn boundary_datetime(year: i32, month: u32, day: u32, time: Option<NaiveTime>) -> ODataResult<TypedOperand> {
    let value = NaiveDate::from_ymd_opt(year, month, day)
        .zip(time)
        .map(|(date, time)| date.and_time(time).and_utc().fixed_offset())
        .ok_or_else(|| ODataError::internal("Invalid boundary date"))?;
    Ok(datetime(value))
}

fn string_predicate(
    method: MethodKind,
    args: &[TypedOperand],
    test: impl Fn(&str, &str) -> bool,
) -> ODataResult<TypedOperand> {
    let (Some(s), Some(p)) = (string_arg(method, args, 0)?, string_arg(method, args, 1)?) else {
        return Ok(TypedOperand::boolean(None));
    };
    Ok(TypedOperand::boolean(Some(test(s, p))))
}

fn map_string(method: MethodKind, args: &[TypedOperand], f: impl Fn(&str) -> String) -> ODataResult<TypedOperand> {
    match string_arg(method, args, 0)? {
        Some(s) => Ok(string(f(s))),
        None => Ok(TypedOperand::null_of(EdmPrimitiveKind::String)),
    }
}

fn substring(args: &[TypedOperand]) -> ODataResult<TypedOperand> {
    let method = MethodKind::Substring;
    let text = string_arg(method, args, 0)?;
    let start = integer_arg(method, args, 1)?;
    let length = if args.len() > 2 {
        integer_arg(method, args, 2)?.map(Some)
    } else {
        Some(None)
    };
    let (Some(text), Some(start), Some(length)) = (text, start, length) else {
        return Ok(TypedOperand::null_of(EdmPrimitiveKind::String));
    };

    let start = usize::try_from(start.max(0)).unwrap_or(usize::MAX);
    let chars = text.chars().skip(start);
    let result: String = match length {
        Some(len) => chars.take(usize::try_from(len.max(0)).unwrap_or(usize::MAX)).collect(),
        None => chars.collect(),
    };
    Ok(string(result))
}

fn date_part(method: MethodKind, args: &[TypedOperand]) -> ODataResult<TypedOperand> {
    let operand = arg(method, args, 0)?;
    let date = match operand.value() {
        PrimitiveValue::Date(d) => *d,
        PrimitiveValue::DateTimeOffset(dt) => dt.date_naive(),
        PrimitiveValue::Null if operand.is_null_literal() || operand.kind().is_some_and(is_date_like) => {
            return Ok(TypedOperand::null_of(EdmPrimitiveKind::Int32));
        }
        _ => return Err(wrong_type(method, operand, "Edm.Date or Edm.DateTimeOffset")),
    };
    let part = match method {
        MethodKind::Year => i64::from(date.year()),
        MethodKind::Month => i64::from(date.month()),
        _ => i64::from(date.day()),
    };
    int32(part)
}

fn is_date_like(kind: EdmPrimitiveKind) -> bool {
    matches!(kind, EdmPrimitiveKind::Date | EdmPrimitiveKind::DateTimeOffset)
}

fn is_time_like(kind: EdmPrimitiveKind) -> bool {
    matches!(kind, EdmPrimitiveKind::TimeOfDay | EdmPrimitiveKind::DateTimeOffset)
}

fn time_arg(method: MethodKind, operand: &TypedOperand) -> ODataResult<Option<NaiveTime>> {
    match operand.value() {
        PrimitiveValue::TimeOfDay(t) => Ok(Some(*t)),
        PrimitiveValue::DateTimeOffset(dt) => Ok(Some(dt.time())),
        PrimitiveValue::Null if operand.is_null_literal() || operand.kind().is_some_and(is_time_like) => Ok(None),
        _ => Err(wrong_type(method, operand, "Edm.TimeOfDay or Edm.DateTimeOffset")),
    }
}

fn time_part(method: MethodKind, args: &[TypedOperand]) -> ODataResult<TypedOperand> {
    let Some(time) = time_arg(method, arg(method, args, 0)?)? else {
        return Ok(TypedOperand::null_of(EdmPrimitiveKind::Int32));
    };
    let part = match method {
        MethodKind::Hour => time.hour(),
        MethodKind::Minute => time.minute(),
        _ => time.second(),
    };
    int32(i64::from(part))
}

fn decimal(text: &str) -> ODataResult<TypedOperand> {
    let value = BigDecimal::from_str(text).map_err(|_| ODataError::internal(format!("Invalid decimal {}", text)))?;
    Ok(TypedOperand::from_value(PrimitiveValue::Decimal(value.normalized())))
}

fn fractional_seconds(args: &[TypedOperand]) -> ODataResult<TypedOperand> {
    let method = MethodKind::FractionalSeconds;
    let Some(time) = time_arg(method, arg(method, args, 0)?)? else {
        return Ok(TypedOperand::null_of(EdmPrimitiveKind::Decimal));
    };
    // Leap seconds carry nanos past one second; fold them back.
    decimal(&format!("0.{:09}", time.nanosecond() % 1_000_000_000))
}

fn total_seconds(args: &[TypedOperand]) -> ODataResult<TypedOperand> {
    let method = MethodKind::TotalSeconds;
    let operand = arg(method, args, 0)?;
    let duration = match operand.value() {
        PrimitiveValue::Duration(d) => *d,
        PrimitiveValue::Null if operand.is(EdmPrimitiveKind::Duration) => {
            return Ok(TypedOperand::null_of(EdmPrimitiveKind::Decimal));
        }
        _ => return Err(wrong_type(method, operand, "Edm.Duration")),
    };
    let nanos = i128::from(duration.num_seconds()) * 1_000_000_000 + i128::from(duration.subsec_nanos());
    let sign = if nanos < 0 { "-" } else { "" };
    let nanos = nanos.abs();
    decimal(&format!("{}{}.{:09}", sign, nanos / 1_000_000_000, nanos % 1_000_000_000))
}

fn round(
    method: MethodKind,
    args: &[TypedOperand],
    mode: RoundingMode,
    float: fn(f64) -> f64,
) -> ODataResult<TypedOperand> {
    let operand = arg(method, args, 0)?;
    let value = match operand.value() {
        PrimitiveValue::Decimal(d) => PrimitiveValue::Decimal(d.with_scale_round(0, mode)),
        PrimitiveValue::Double(f) => PrimitiveValue::Double(float(*f)),
        PrimitiveValue::Single(f) => PrimitiveValue::Single(float(f64::from(*f)) as f32),
        v if v.as_i128().is_some() => v.clone(),
        PrimitiveValue::Null if operand.is_null_literal() || operand.kind().is_some_and(|k| k.is_numeric()) => {
            return Ok(operand.clone());
        }
        _ => return Err(wrong_type(method, operand, "a numeric value")),
    };
    Ok(TypedOperand::from_value(value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    fn s(value: &str) -> TypedOperand {
        TypedOperand::from_value(PrimitiveValue::from(value))
    }

    fn i(value: i32) -> TypedOperand {
        TypedOperand::from_value(PrimitiveValue::Int32(value))
    }

    fn dec(value: &str) -> PrimitiveValue {
        PrimitiveValue::Decimal(BigDecimal::from_str(value).unwrap())
    }

    #[test]
    fn test_string_functions() {
        let name = s("Ada Lovelace");
        assert_eq!(invoke(MethodKind::StartsWith, &[name.clone(), s("Ada")]).unwrap(), TypedOperand::boolean(Some(true)));
        assert_eq!(invoke(MethodKind::EndsWith, &[name.clone(), s("x")]).unwrap(), TypedOperand::boolean(Some(false)));
        assert_eq!(invoke(MethodKind::IndexOf, &[name.clone(), s("Love")]).unwrap().value(), &PrimitiveValue::Int32(4));
        assert_eq!(invoke(MethodKind::IndexOf, &[name.clone(), s("zz")]).unwrap().value(), &PrimitiveValue::Int32(-1));
        assert_eq!(invoke(MethodKind::ToUpper, &[s("abc")]).unwrap().value(), &PrimitiveValue::from("ABC"));
        assert_eq!(invoke(MethodKind::Trim, &[s("  x ")]).unwrap().value(), &PrimitiveValue::from("x"));
        assert_eq!(invoke(MethodKind::Length, &[s("héllo")]).unwrap().value(), &PrimitiveValue::Int32(5));
        assert_eq!(invoke(MethodKind::Concat, &[s("a"), s("b")]).unwrap().value(), &PrimitiveValue::from("ab"));
    }

    #[test]
    fn test_substring() {
        let text = s("abcdef");
        assert_eq!(invoke(MethodKind::Substring, &[text.clone(), i(2)]).unwrap().value(), &PrimitiveValue::from("cdef"));
        assert_eq!(invoke(MethodKind::Substring, &[text.clone(), i(1), i(2)]).unwrap().value(), &PrimitiveValue::from("bc"));
        assert_eq!(invoke(MethodKind::Substring, &[text, i(10)]).unwrap().value(), &PrimitiveValue::from(""));
    }

    #[test]
    fn test_wrong_types_and_nulls() {
        let err = invoke(MethodKind::ToLower, &[i(1)]).unwrap_err();
        assert_eq!(err.status_code(), 400);
        let null = invoke(MethodKind::Contains, &[TypedOperand::null_of(EdmPrimitiveKind::String), s("a")]).unwrap();
        assert!(null.is_null());
        assert!(invoke(MethodKind::Length, &[TypedOperand::null_literal()]).unwrap().is_null());
    }

    #[test]
    fn test_date_functions() {
        let dt = DateTime::parse_from_rfc3339("2012-12-03T07:16:23.25+01:30").unwrap();
        let op = TypedOperand::from_value(PrimitiveValue::DateTimeOffset(dt));
        assert_eq!(invoke(MethodKind::Year, &[op.clone()]).unwrap().value(), &PrimitiveValue::Int32(2012));
        assert_eq!(invoke(MethodKind::Hour, &[op.clone()]).unwrap().value(), &PrimitiveValue::Int32(7));
        assert_eq!(invoke(MethodKind::TotalOffsetMinutes, &[op.clone()]).unwrap().value(), &PrimitiveValue::Int32(90));
        assert_eq!(invoke(MethodKind::FractionalSeconds, &[op.clone()]).unwrap().value(), &dec("0.25"));
        assert_eq!(
            invoke(MethodKind::Date, &[op]).unwrap().value(),
            &PrimitiveValue::Date(NaiveDate::from_ymd_opt(2012, 12, 3).unwrap())
        );

        let day = TypedOperand::from_value(PrimitiveValue::Date(NaiveDate::from_ymd_opt(2020, 2, 29).unwrap()));
        assert_eq!(invoke(MethodKind::Day, &[day.clone()]).unwrap().value(), &PrimitiveValue::Int32(29));
        assert!(invoke(MethodKind::Hour, &[day]).is_err());
    }

    #[test]
    fn test_total_seconds() {
        let d = TypedOperand::from_value(PrimitiveValue::Duration(TimeDelta::milliseconds(-1500)));
        assert_eq!(invoke(MethodKind::TotalSeconds, &[d]).unwrap().value(), &dec("-1.5"));
    }

    #[test]
    fn test_rounding() {
        let value = TypedOperand::from_value(dec("2.5"));
        assert_eq!(invoke(MethodKind::Round, &[value.clone()]).unwrap().value(), &dec("3"));
        assert_eq!(invoke(MethodKind::Floor, &[value.clone()]).unwrap().value(), &dec("2"));
        assert_eq!(invoke(MethodKind::Ceiling, &[value]).unwrap().value(), &dec("3"));

        let negative = TypedOperand::from_value(PrimitiveValue::Double(-2.5));
        assert_eq!(invoke(MethodKind::Floor, &[negative]).unwrap().value(), &PrimitiveValue::Double(-3.0));
        assert_eq!(invoke(MethodKind::Round, &[i(4)]).unwrap().value(), &PrimitiveValue::Int32(4));
        assert!(invoke(MethodKind::Round, &[s("x")]).is_err());
    }

    #[test]
    fn test_boundaries() {
        let max = invoke(MethodKind::MaxDateTime, &[]).unwrap();
        let min = invoke(MethodKind::MinDateTime, &[]).unwrap();
        let now = invoke(MethodKind::Now, &[]).unwrap();
        let (PrimitiveValue::DateTimeOffset(max), PrimitiveValue::DateTimeOffset(min), PrimitiveValue::DateTimeOffset(now)) =
            (max.value(), min.value(), now.value())
        else {
            panic!("expected datetimes");
        };
        assert!(min < now && now < max);
    }
}
