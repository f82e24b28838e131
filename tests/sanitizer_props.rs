use proptest::prelude::*;
use serde_json::{json, Value};
use unifi_gateway::security::sanitizer::{
    SanitizationPolicy, Sanitizer, MAX_DEPTH_MARKER, REDACTED,
};

const MAX_DEPTH: usize = 4;
const MAX_STRING_LEN: usize = 16;

fn sanitizer() -> Sanitizer {
    Sanitizer::new(&SanitizationPolicy {
        max_depth: MAX_DEPTH,
        max_string_len: MAX_STRING_LEN,
        ..SanitizationPolicy::default()
    })
}

fn key() -> impl Strategy<Value = String> {
    prop_oneof![
        "[a-z]{1,8}",
        prop::sample::select(vec![
            "password",
            "apiKey",
            "X-Api-Key",
            "csrf_token",
            "sessionSecret",
            "Set-Cookie",
            "userCredential",
            "wifi_passphrase",
        ])
        .prop_map(String::from),
    ]
}

fn json_value() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| json!(n)),
        "[ -~]{0,40}".prop_map(Value::String),
    ];
    leaf.prop_recursive(10, 256, 6, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..6).prop_map(Value::Array),
            prop::collection::btree_map(key(), inner, 0..6)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

// Collects every (key, value) pair of every object left in the output.
fn object_entries<'a>(value: &'a Value, out: &mut Vec<(&'a str, &'a Value)>) {
    match value {
        Value::Object(map) => {
            for (k, v) in map {
                out.push((k.as_str(), v));
                object_entries(v, out);
            }
        }
        Value::Array(items) => items.iter().for_each(|v| object_entries(v, out)),
        _ => {}
    }
}

fn strings<'a>(value: &'a Value, out: &mut Vec<&'a str>) {
    match value {
        Value::String(s) => out.push(s),
        Value::Object(map) => map.values().for_each(|v| strings(v, out)),
        Value::Array(items) => items.iter().for_each(|v| strings(v, out)),
        _ => {}
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn redact_is_idempotent(value in json_value()) {
        let s = sanitizer();
        let once = s.redact(&value);
        prop_assert_eq!(s.redact(&once), once);
    }

    // Every object that survives the depth limit has its sensitive keys masked.
    #[test]
    fn no_sensitive_key_survives(value in json_value()) {
        let s = sanitizer();
        let out = s.redact(&value);
        let mut entries = Vec::new();
        object_entries(&out, &mut entries);
        for (key, inner) in entries {
            if s.is_sensitive_key(key) {
                prop_assert_eq!(inner.as_str(), Some(REDACTED), "key {} kept its value", key);
            }
        }
    }

    #[test]
    fn strings_are_bounded(value in json_value()) {
        let out = sanitizer().redact(&value);
        let mut found = Vec::new();
        strings(&out, &mut found);
        for text in found {
            prop_assert!(
                text.chars().count() <= MAX_STRING_LEN || text == MAX_DEPTH_MARKER,
                "{:?} exceeds the limit", text
            );
        }
    }
}
