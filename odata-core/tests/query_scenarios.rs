// End-to-end filter, precondition and query-option scenarios against a
// small customer schema.

use odata_core::edm::{
    EdmEnumType, EdmModel, EdmPrimitiveKind, EdmProperty, EdmStructuredType, EdmTypeRef,
    PrimitiveValue, TypeRegistry,
};
use odata_core::etag::{check_change_preconditions, check_read_preconditions, EtagInformation};
use odata_core::{
    apply_query_options, parse_filter, ComplexValue, Entity, ErrorCode, ExpressionEvaluator,
    ODataError, PreconditionError, PropertyValue, QueryContext, UriInfo,
};
use std::sync::Arc;

fn model() -> EdmModel {
    EdmModel::new("Shop", Arc::new(TypeRegistry::standard()))
        .with_enum_type(
            EdmEnumType::new("Tier")
                .member("Bronze", 0)
                .member("Silver", 1)
                .member("Gold", 2),
        )
        .with_complex_type(
            EdmStructuredType::new("Address")
                .property(EdmProperty::primitive("City", EdmPrimitiveKind::String))
                .property(EdmProperty::primitive("Country", EdmPrimitiveKind::String)),
        )
        .with_entity_type(
            EdmStructuredType::new("Customer")
                .key("ID")
                .property(EdmProperty::primitive("ID", EdmPrimitiveKind::Int32))
                .property(EdmProperty::primitive("Name", EdmPrimitiveKind::String))
                .property(EdmProperty::primitive("Age", EdmPrimitiveKind::Int32))
                .property(EdmProperty::primitive("Balance", EdmPrimitiveKind::Decimal))
                .property(EdmProperty::primitive("Verified", EdmPrimitiveKind::Boolean))
                .property(EdmProperty::new("Tier", EdmTypeRef::Enum("Shop.Tier".into())))
                .property(EdmProperty::new("Address", EdmTypeRef::Complex("Shop.Address".into()))),
        )
        .with_entity_set("Customers", "Customer")
}

fn customer(id: i32, name: &str, age: i32, city: &str, tier: i64) -> Entity {
    Entity::new("Shop.Customer")
        .with("ID", id)
        .with("Name", name)
        .with("Age", age)
        .with("Verified", PropertyValue::null())
        .with(
            "Tier",
            PropertyValue::Enum {
                type_name: "Shop.Tier".into(),
                value: tier,
            },
        )
        .with("Address", ComplexValue::new("Shop.Address").with("City", city).with("Country", "UK"))
}

fn evaluate(entity: &Entity, filter: &str) -> Result<odata_core::TypedOperand, ODataError> {
    let edm = model();
    let uri_info = UriInfo::default();
    let ctx = QueryContext::new(&uri_info, &edm);
    let expr = parse_filter(filter)?;
    ExpressionEvaluator::for_entity(entity, ctx).evaluate(&expr)
}

#[cfg(test)]
mod filter_scenarios {
    use super::*;

    #[test]
    fn test_age_comparison_yields_typed_boolean() {
        let entity = customer(1, "Ada", 30, "London", 2);
        let result = evaluate(&entity, "Age gt 25").unwrap();
        assert!(result.is(EdmPrimitiveKind::Boolean));
        assert_eq!(result.value(), &PrimitiveValue::Boolean(true));
    }

    #[test]
    fn test_mismatched_literal_is_an_error_not_false() {
        let entity = customer(1, "Ada", 30, "London", 2);
        let err = evaluate(&entity, "Age eq 'thirty'").unwrap_err();
        assert_eq!(err.code, ErrorCode::BadRequest);
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_three_valued_truth_table() {
        let entity = customer(1, "Ada", 30, "London", 2);
        let cases = [
            ("null and false", Some(false)),
            ("false and null", Some(false)),
            ("null and true", None),
            ("null and null", None),
            ("null or false", None),
            ("null or true", Some(true)),
            ("true or null", Some(true)),
            ("null or null", None),
            ("Verified and false", Some(false)),
            ("Verified or true", Some(true)),
            ("not Verified", None),
        ];
        for (filter, expected) in cases {
            let result = evaluate(&entity, filter).unwrap();
            assert!(result.is(EdmPrimitiveKind::Boolean), "{} is not boolean", filter);
            assert_eq!(result.value().as_bool(), expected, "{}", filter);
        }
    }

    #[test]
    fn test_enum_and_nested_members() {
        let entity = customer(1, "Ada", 30, "London", 2);
        assert_eq!(
            evaluate(&entity, "Tier eq Shop.Tier'Gold' and Address/City eq 'London'")
                .unwrap()
                .value(),
            &PrimitiveValue::Boolean(true)
        );
        let err = evaluate(&entity, "Tier eq Shop.Tier'Gold,Silver'").unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[test]
    fn test_decimal_promotion_against_double() {
        let entity = customer(1, "Ada", 30, "London", 2).with(
            "Balance",
            PrimitiveValue::Decimal("10.5".parse().unwrap()),
        );
        assert_eq!(
            evaluate(&entity, "Balance gt 10.25d").unwrap().value(),
            &PrimitiveValue::Boolean(true)
        );
        assert_eq!(
            evaluate(&entity, "Balance add 0.5 eq 11").unwrap().value(),
            &PrimitiveValue::Boolean(true)
        );
    }
}

#[cfg(test)]
mod precondition_scenarios {
    use super::*;

    #[test]
    fn test_if_match_mismatch_and_wildcard() {
        let stored = Some("\"abc\"");
        let none = EtagInformation::default();

        let mismatch = EtagInformation::parse(&["\"xyz\""]);
        assert_eq!(
            check_change_preconditions(stored, &mismatch, &none),
            Err(PreconditionError::Failed("If-Match".to_string()))
        );
        assert!(check_read_preconditions(stored, &mismatch, &none).is_err());

        let wildcard = EtagInformation::parse(&["*"]);
        assert!(wildcard.is_matched_by(stored));
        assert_eq!(check_change_preconditions(stored, &wildcard, &none), Ok(()));
    }

    #[test]
    fn test_if_none_match_signals_not_modified() {
        let stored = Some("W/\"abc\"");
        let none = EtagInformation::default();
        let if_none_match = EtagInformation::parse(&["\"abc\""]);
        assert_eq!(check_read_preconditions(stored, &none, &if_none_match), Ok(true));
        assert!(check_change_preconditions(stored, &none, &if_none_match).is_err());
    }

    #[test]
    fn test_precondition_error_maps_to_412() {
        let err: ODataError = PreconditionError::Failed("If-Match".into()).into();
        assert_eq!(err.status_code(), 412);
    }
}

#[cfg(test)]
mod query_option_scenarios {
    use super::*;

    fn customers() -> Vec<Entity> {
        vec![
            customer(1, "Ada", 36, "London", 2),
            customer(2, "Grace", 45, "Arlington", 1),
            customer(3, "Linus", 28, "Helsinki", 0),
            customer(4, "Barbara", 45, "London", 2),
        ]
    }

    fn names(entities: &[Entity]) -> Vec<&str> {
        entities
            .iter()
            .filter_map(|e| e.property("Name").and_then(PropertyValue::as_primitive))
            .filter_map(PrimitiveValue::as_str)
            .collect()
    }

    #[test]
    fn test_query_string_end_to_end() {
        let edm = model();
        let info = UriInfo::from_query(
            "$filter=Address/City%20eq%20'London'%20or%20Age%20gt%20@min&$orderby=Age%20desc,Name&$count=true&$top=2&@min=40",
        )
        .unwrap();
        let result = apply_query_options(customers(), &info, &edm, None).unwrap();
        assert_eq!(result.count, Some(3));
        assert_eq!(names(&result.entities), vec!["Barbara", "Grace"]);
    }

    #[test]
    fn test_lambda_free_method_filter() {
        let edm = model();
        let info = UriInfo::default().with_filter("startswith(Name,'A') or endswith(Name,'s')");
        let result = apply_query_options(customers(), &info, &edm, None).unwrap();
        assert_eq!(names(&result.entities), vec!["Ada", "Linus"]);
    }

    #[test]
    fn test_unsupported_reference_is_501() {
        let edm = model();
        let info = UriInfo::default().with_filter("$root eq null");
        let err = apply_query_options(customers(), &info, &edm, None).unwrap_err();
        assert_eq!(err.status_code(), 501);
    }
}
