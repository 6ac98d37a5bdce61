//! Request parameter parsing: query string, JSON body, array coercion.

use serde_json::{Map, Value};

use super::errors::ApiError;

/// Parameters coerced to arrays on every route.
pub const GLOBAL_ARRAY_PARAMS: [&str; 4] = ["after", "exclude", "include", "sort"];

/// `k[]` and `k[n]` name array elements of `k`.
fn array_key(key: &str) -> Option<&str> {
    let base = key.strip_suffix(']')?;
    let (name, index) = base.rsplit_once('[')?;
    if name.is_empty() || !index.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    Some(name)
}

/// Build the parameter map from decoded query-string pairs. Repeated keys and
/// bracketed keys accumulate into arrays; values stay strings.
pub fn from_query_pairs(pairs: Vec<(String, String)>) -> Map<String, Value> {
    let mut params = Map::new();
    for (key, value) in pairs {
        let (name, bracketed) = match array_key(&key) {
            Some(name) => (name.to_string(), true),
            None => (key, false),
        };
        let value = Value::String(value);

        match params.get_mut(&name) {
            Some(Value::Array(items)) => items.push(value),
            Some(existing) => {
                let first = existing.take();
                *existing = Value::Array(vec![first, value]);
            }
            None if bracketed => {
                params.insert(name, Value::Array(vec![value]));
            }
            None => {
                params.insert(name, value);
            }
        }
    }
    params
}

/// Merge a JSON object body over the query-string parameters.
pub fn merge_body(params: &mut Map<String, Value>, body: &[u8]) -> Result<(), ApiError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(());
    }
    match serde_json::from_slice::<Value>(body) {
        Ok(Value::Object(fields)) => {
            for (k, v) in fields {
                params.insert(k, v);
            }
            Ok(())
        }
        _ => Err(ApiError::InvalidContent(
            "the HTTP body must be a JSON object".to_string(),
        )),
    }
}

/// Wrap scalar values of the named parameters in one-element arrays.
pub fn coerce_arrays(params: &mut Map<String, Value>, names: &[&str]) {
    for name in names.iter().chain(GLOBAL_ARRAY_PARAMS.iter()) {
        if let Some(value) = params.get_mut(*name) {
            if !value.is_array() {
                let scalar = value.take();
                *value = Value::Array(vec![scalar]);
            }
        }
    }
}

fn contains_nul(value: &Value) -> bool {
    match value {
        Value::String(s) => s.contains('\0'),
        Value::Array(items) => items.iter().any(contains_nul),
        Value::Object(fields) => fields.values().any(contains_nul),
        _ => false,
    }
}

/// PostgreSQL text cannot hold NUL, so no parameter value may contain one.
pub fn reject_nul<'a>(
    params: impl IntoIterator<Item = (&'a String, &'a Value)>,
) -> Result<(), ApiError> {
    for (name, value) in params {
        if contains_nul(value) {
            return Err(ApiError::invalid(format!(
                "the parameter \"{}\" cannot contain NUL characters",
                name
            )));
        }
    }
    Ok(())
}
