//! Scalar parameter validation.
//!
//! Parameters arrive as JSON values: numbers and booleans from POST bodies,
//! strings from query strings. Integer and boolean validators accept both
//! forms. Messages name the parameter and distinguish an invalid element of
//! an array parameter from an invalid parameter.

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;
use unicode_normalization::UnicodeNormalization;

use crate::server::errors::ApiError;

lazy_static! {
    pub(crate) static ref SIGNED_INT: Regex = Regex::new(r"^-?\d+$").unwrap();
    static ref UNSIGNED_INT: Regex = Regex::new(r"^\d+$").unwrap();
    pub(crate) static ref LANG_CODE: Regex = Regex::new(r"^[a-z]{3}$").unwrap();
    pub(crate) static ref UID: Regex = Regex::new(r"^[a-z]{3}-\d{3}$").unwrap();
}

type Result<T> = std::result::Result<T, ApiError>;

/// Parse `x` as an integer. Strings must match `pattern`.
fn as_int(x: &Value, pattern: &Regex) -> Option<i64> {
    match x {
        Value::Number(n) => n.as_i64(),
        Value::String(s) if pattern.is_match(s) => s.parse().ok(),
        _ => None,
    }
}

/// JSON rendering of the value as the client sees it after numeric coercion.
fn shown(x: &Value, pattern: &Regex) -> String {
    match x {
        Value::String(s) if pattern.is_match(s) => s
            .parse::<i64>()
            .map(|n| n.to_string())
            .unwrap_or_else(|_| s.clone()),
        other => other.to_string(),
    }
}

pub fn integer(x: &Value, name: &str, array_element: bool) -> Result<i64> {
    as_int(x, &SIGNED_INT).ok_or_else(|| {
        if array_element {
            ApiError::invalid(format!(
                "elements of the parameter \"{}\" must be integers: {}",
                name, x
            ))
        } else {
            ApiError::invalid(format!("the parameter \"{}\" must be an integer: {}", name, x))
        }
    })
}

pub fn positive_integer(x: &Value, name: &str) -> Result<i64> {
    match as_int(x, &UNSIGNED_INT) {
        Some(n) if n >= 1 => Ok(n),
        _ => Err(ApiError::invalid(format!(
            "the parameter \"{}\" must be a positive integer: {}",
            name,
            shown(x, &UNSIGNED_INT)
        ))),
    }
}

pub fn non_negative_integer(x: &Value, name: &str, array_element: bool) -> Result<i64> {
    match as_int(x, &UNSIGNED_INT) {
        Some(n) if n >= 0 => Ok(n),
        _ if array_element => Err(ApiError::invalid(format!(
            "elements of the parameter \"{}\" must be non-negative integers: {}",
            name,
            shown(x, &UNSIGNED_INT)
        ))),
        _ => Err(ApiError::invalid(format!(
            "the parameter \"{}\" must be a non-negative integer: {}",
            name,
            shown(x, &UNSIGNED_INT)
        ))),
    }
}

pub fn string<'a>(x: &'a Value, name: &str, array_element: bool, empty_ok: bool) -> Result<&'a str> {
    match x {
        Value::String(s) if !s.is_empty() || empty_ok => Ok(s),
        Value::String(_) if array_element => Err(ApiError::invalid(format!(
            "elements of the parameter \"{}\" must be non-empty strings",
            name
        ))),
        Value::String(_) => Err(ApiError::invalid(format!(
            "the parameter \"{}\" must be a non-empty string",
            name
        ))),
        other if array_element => Err(ApiError::invalid(format!(
            "elements of the parameter \"{}\" must be strings: {}",
            name, other
        ))),
        other => Err(ApiError::invalid(format!(
            "the parameter \"{}\" must be a string: {}",
            name, other
        ))),
    }
}

/// Non-empty string or non-negative integer.
pub fn scalar(x: &Value, name: &str, array_element: bool) -> Result<()> {
    let ok = match x {
        Value::String(s) => !s.is_empty(),
        Value::Number(n) => n.as_i64().is_some_and(|n| n >= 0),
        _ => false,
    };
    if ok {
        return Ok(());
    }
    if array_element {
        Err(ApiError::invalid(format!(
            "elements of the parameter \"{}\" must be non-empty strings or non-negative integers: {}",
            name, x
        )))
    } else {
        Err(ApiError::invalid(format!(
            "the parameter \"{}\" must be a non-empty string or a non-negative integer: {}",
            name, x
        )))
    }
}

/// Accepts `true`/`false`, `"true"`/`"false"`, `"1"`/`"0"` and `1`/`0`.
pub fn boolean(x: &Value, name: &str) -> Result<bool> {
    match x {
        Value::Bool(b) => Ok(*b),
        Value::String(s) if s == "true" || s == "1" => Ok(true),
        Value::String(s) if s == "false" || s == "0" => Ok(false),
        Value::Number(n) if n.as_i64() == Some(1) => Ok(true),
        Value::Number(n) if n.as_i64() == Some(0) => Ok(false),
        other => Err(ApiError::invalid(format!(
            "the parameter \"{}\" must be boolean: {}",
            name, other
        ))),
    }
}

/// Validate an array parameter: present, an array, non-empty, at most `max` long.
pub fn array<'a>(x: Option<&'a Value>, name: &str, max: usize) -> Result<&'a [Value]> {
    let items = array_or_empty(x, name, max)?;
    if items.is_empty() {
        return Err(ApiError::invalid(format!(
            "the parameter \"{}\" must contain at least one element",
            name
        )));
    }
    Ok(items)
}

/// Like `array`, but an empty array is accepted.
pub fn array_or_empty<'a>(x: Option<&'a Value>, name: &str, max: usize) -> Result<&'a [Value]> {
    match x {
        None => Err(ApiError::invalid(format!(
            "you must provide an array parameter \"{}\"",
            name
        ))),
        Some(Value::Array(items)) if items.len() > max => Err(ApiError::invalid(format!(
            "the parameter \"{}\" takes a maximum of {} elements",
            name, max
        ))),
        Some(Value::Array(items)) => Ok(items),
        Some(other) => Err(ApiError::invalid(format!(
            "the parameter \"{}\" must be an array: {}",
            name, other
        ))),
    }
}

/// Validate one element of an array parameter as a non-empty array.
pub fn array_element<'a>(x: &'a Value, name: &str) -> Result<&'a [Value]> {
    match x {
        Value::Array(items) if items.is_empty() => Err(ApiError::invalid(format!(
            "elements of the parameter \"{}\" must contain at least one element",
            name
        ))),
        Value::Array(items) => Ok(items),
        other => Err(ApiError::invalid(format!(
            "elements of the parameter \"{}\" must be arrays: {}",
            name, other
        ))),
    }
}

/// A validated `range` parameter: column name plus NFC-normalized bounds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Range {
    pub column: String,
    pub lower: String,
    pub upper: String,
}

pub fn range(x: Option<&Value>, columns: &[&str], max: usize) -> Result<Range> {
    let items = array(x, "range", max)?;
    if items.len() != 3 {
        return Err(ApiError::invalid(
            "the parameter \"range\" must contain exactly three elements",
        ));
    }

    let mut strs = Vec::with_capacity(3);
    for item in items {
        match item {
            Value::String(s) => strs.push(s.as_str()),
            other => {
                return Err(ApiError::invalid(format!(
                    "the parameter \"range\" must contain only strings: {}",
                    other
                )))
            }
        }
    }

    if !columns.contains(&strs[0]) {
        let valid = columns
            .iter()
            .map(|c| format!("\"{}\"", c))
            .collect::<Vec<_>>()
            .join(", ");
        return Err(ApiError::invalid(format!(
            "the first element of the parameter \"range\" was invalid: valid values are {}",
            valid
        )));
    }

    Ok(Range {
        column: strs[0].to_string(),
        lower: strs[1].nfc().collect(),
        upper: strs[2].nfc().collect(),
    })
}

fn pair<'a>(item: &'a Value, name: &str) -> Result<(&'a Value, &'a Value)> {
    match item {
        Value::Array(items) if items.len() == 2 => Ok((&items[0], &items[1])),
        Value::Array(_) => Err(ApiError::invalid(format!(
            "elements of the parameter \"{}\" must be two-element arrays: {}",
            name, item
        ))),
        other => Err(ApiError::invalid(format!(
            "elements of the parameter \"{}\" must be arrays: {}",
            name, other
        ))),
    }
}

/// Two-element arrays of non-negative integer ids.
pub fn id_pairs(items: &[Value], name: &str) -> Result<Vec<(i64, i64)>> {
    items
        .iter()
        .map(|item| {
            let (a, b) = pair(item, name)?;
            Ok((
                non_negative_integer(a, name, true)?,
                non_negative_integer(b, name, true)?,
            ))
        })
        .collect()
}

/// Two-element arrays of `aaa-000` uids.
pub fn uid_pairs(items: &[Value], name: &str) -> Result<Vec<(String, String)>> {
    items
        .iter()
        .map(|item| {
            let (a, b) = pair(item, name)?;
            Ok((uid_item(a, name)?, uid_item(b, name)?))
        })
        .collect()
}

pub(crate) fn uid_item(x: &Value, name: &str) -> Result<String> {
    match x {
        Value::String(s) if UID.is_match(s) => Ok(s.clone()),
        Value::String(s) => Err(ApiError::invalid(format!(
            "badly formatted \"{}\" item: {}",
            name, s
        ))),
        other => Err(ApiError::invalid(format!(
            "invalid non-string \"{}\" item: {}",
            name, other
        ))),
    }
}
