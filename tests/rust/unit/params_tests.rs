use lexiquery::server::params::{coerce_arrays, from_query_pairs, merge_body};
use serde_json::{json, Value};
use test_case::test_case;

fn pairs(raw: &[(&str, &str)]) -> Vec<(String, String)> {
    raw.iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect()
}

#[test_case(&[("txt", "dog")], json!({ "txt": "dog" }) ; "single value stays scalar")]
#[test_case(&[("txt", "dog"), ("txt", "cat")], json!({ "txt": ["dog", "cat"] }) ; "repeated key")]
#[test_case(&[("txt[]", "dog")], json!({ "txt": ["dog"] }) ; "empty brackets")]
#[test_case(&[("txt[0]", "dog"), ("txt[1]", "cat")], json!({ "txt": ["dog", "cat"] }) ; "indexed brackets")]
#[test_case(&[("a[x]", "1")], json!({ "a[x]": "1" }) ; "non numeric index is a plain key")]
fn test_query_pairs(raw: &[(&str, &str)], expected: Value) {
    assert_eq!(Value::Object(from_query_pairs(pairs(raw))), expected);
}

#[test]
fn test_coerce_route_and_global_arrays() {
    let mut params = from_query_pairs(pairs(&[
        ("langvar", "187"),
        ("include", "uid"),
        ("limit", "5"),
    ]));
    coerce_arrays(&mut params, &["langvar"]);
    assert_eq!(
        Value::Object(params),
        json!({ "langvar": ["187"], "include": ["uid"], "limit": "5" })
    );
}

#[test]
fn test_body_overrides_query_string() {
    let mut params = from_query_pairs(pairs(&[("limit", "5"), ("txt", "dog")]));
    merge_body(&mut params, br#"{ "limit": 10 }"#).unwrap();
    assert_eq!(Value::Object(params), json!({ "limit": 10, "txt": "dog" }));
}

#[test_case(b"" ; "empty")]
#[test_case(b"  \n" ; "whitespace")]
fn test_blank_body_is_ignored(body: &[u8]) {
    let mut params = from_query_pairs(pairs(&[("txt", "dog")]));
    merge_body(&mut params, body).unwrap();
    assert_eq!(params.len(), 1);
}

#[test_case(b"[1]" ; "array")]
#[test_case(b"\"x\"" ; "string")]
#[test_case(b"{" ; "malformed")]
fn test_non_object_body_is_rejected(body: &[u8]) {
    let mut params = serde_json::Map::new();
    let err = merge_body(&mut params, body).unwrap_err();
    assert_eq!(err.to_string(), "the HTTP body must be a JSON object");
}
