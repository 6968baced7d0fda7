//! Property-Based Tests for the Schema Resolver
//!
//! For any parameter contract:
//! - input covering every visible required field without a default resolves
//! - the assembled output never contains a field the contract does not declare
//! - a caller-supplied field outside the visible set is always rejected

use conduit_engine::resolve;
use conduit_test_utils::generators::{arb_function_parameters, complete_arguments};
use conduit_test_utils::ParameterGroup;
use proptest::prelude::*;
use serde_json::json;

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn prop_complete_input_resolves(params in arb_function_parameters()) {
        let input = complete_arguments(&params);
        let assembled = resolve(&params, &input, &[]);
        prop_assert!(assembled.is_ok(), "unexpected error: {:?}", assembled.err());
    }

    #[test]
    fn prop_assembled_fields_are_declared(params in arb_function_parameters()) {
        let input = complete_arguments(&params);
        let assembled = resolve(&params, &input, &[]).unwrap();
        for (group, values) in assembled.iter() {
            let schema = params.group(*group).unwrap();
            for name in values.keys() {
                prop_assert!(schema.field(name).is_some(), "{}.{} not declared", group, name);
            }
        }
    }

    #[test]
    fn prop_undeclared_field_rejected(
        params in arb_function_parameters(),
        extra in "[A-Z]{4,8}",
    ) {
        // Generated field names are lowercase, so `extra` is never declared.
        let mut input = complete_arguments(&params);
        let body = input
            .as_object_mut()
            .unwrap()
            .entry(ParameterGroup::Body.as_str())
            .or_insert_with(|| json!({}));
        body.as_object_mut().unwrap().insert(extra.clone(), json!("x"));

        let err = resolve(&params, &input, &[]).unwrap_err();
        prop_assert!(err.fields().iter().any(|f| f.ends_with(&extra)));
    }
}
