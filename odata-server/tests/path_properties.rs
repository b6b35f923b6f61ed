// Resource path parsing over arbitrary key strings and function arguments.

use odata_core::edm::literal::quote;
use odata_server::{ResourcePath, Segment};
use percent_encoding::{utf8_percent_encode, NON_ALPHANUMERIC};
use proptest::prelude::*;

proptest! {
    #[test]
    fn quoted_keys_survive_encoding(text in "\\PC{0,24}") {
        let literal = quote(&text);
        let path = format!("/People({})", utf8_percent_encode(&literal, NON_ALPHANUMERIC));
        let parsed = ResourcePath::parse(&path).unwrap();
        prop_assert_eq!(parsed.entity_set.as_deref(), Some("People"));
        prop_assert_eq!(parsed.key, Some(literal));
        prop_assert!(parsed.segments.is_empty());
    }

    #[test]
    fn function_arguments_keep_literals(a in "\\PC{0,12}", b in -1000i64..1000) {
        let literal = quote(&a);
        let segment = format!("Test.Fn(label={},n={})", literal, b);
        let path = format!("/People(1)/{}", utf8_percent_encode(&segment, NON_ALPHANUMERIC));
        let parsed = ResourcePath::parse(&path).unwrap();
        prop_assert_eq!(
            parsed.segments,
            vec![Segment::Function {
                name: "Test.Fn".to_string(),
                arguments: vec![("label".to_string(), literal), ("n".to_string(), b.to_string())],
            }]
        );
    }
}
