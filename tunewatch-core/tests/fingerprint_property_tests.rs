//! Property-Based Tests for Request Fingerprinting
//!
//! **Property: Deterministic, identity-separating cache keys**
//!
//! Identical request descriptions SHALL always produce identical keys, and
//! requests that differ in principal or path SHALL never share a key.

use proptest::prelude::*;
use serde_json::{json, Value};
use tunewatch_core::{canonical_json, fingerprint, Principal, QueryParams, RouteTable};

fn path_strategy() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z0-9:%-]{1,8}", 1..4).prop_map(|parts| format!("/api/{}", parts.join("/")))
}

fn principal_strategy() -> impl Strategy<Value = Option<Principal>> {
    prop::option::of("[A-Za-z0-9:@_-]{1,12}".prop_map(Principal::new))
}

fn pairs_strategy() -> impl Strategy<Value = Vec<(String, String)>> {
    prop::collection::vec(("[a-z]{1,4}", "[a-z0-9 ]{0,6}"), 0..5)
}

fn json_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i32>().prop_map(|n| json!(n)),
        "[a-z]{0,6}".prop_map(Value::String),
    ];
    leaf.prop_recursive(3, 24, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::btree_map("[a-z]{1,4}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    #[test]
    fn prop_fingerprint_is_deterministic(
        path in path_strategy(),
        principal in principal_strategy(),
        pairs in pairs_strategy(),
        body in json_strategy(),
    ) {
        let q1 = QueryParams::from_pairs(pairs.clone());
        let q2 = QueryParams::from_pairs(pairs);
        let a = fingerprint("POST", &path, principal.as_ref(), &q1, Some(&body));
        let b = fingerprint("POST", &path, principal.as_ref(), &q2, Some(&body));
        prop_assert_eq!(a, b);
    }

    #[test]
    fn prop_distinct_principals_never_share_keys(
        path in path_strategy(),
        a in principal_strategy(),
        b in principal_strategy(),
    ) {
        prop_assume!(a != b);
        let q = QueryParams::new();
        prop_assert_ne!(
            fingerprint("GET", &path, a.as_ref(), &q, None),
            fingerprint("GET", &path, b.as_ref(), &q, None)
        );
    }

    #[test]
    fn prop_distinct_paths_never_share_keys(a in path_strategy(), b in path_strategy()) {
        prop_assume!(a != b);
        let q = QueryParams::new();
        let key_a = fingerprint("GET", &a, None, &q, None);
        let key_b = fingerprint("GET", &b, None, &q, None);
        prop_assert_ne!(&key_a, &key_b);
        prop_assert_eq!(key_a.as_str().matches(':').count(), 4);
    }

    #[test]
    fn prop_canonical_json_round_trips_to_equal_value(value in json_strategy()) {
        let text = canonical_json(&value);
        let parsed: Value = serde_json::from_str(&text)
            .map_err(|e| TestCaseError::fail(format!("unparseable canonical json: {}", e)))?;
        prop_assert_eq!(parsed, value);
    }

    #[test]
    fn prop_route_resolution_prefers_longest_prefix(suffix in "[a-z/]{0,10}") {
        let table = RouteTable::default();
        let essential = table.resolve(&format!("/api/dashboard/essential{}", suffix));
        prop_assert_eq!(essential.ttl_ms, 180_000);
    }
}
