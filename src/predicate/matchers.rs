//! Array-valued filter parameters -> comparison descriptors.
//!
//! A one-element array compares with `=`, longer arrays with `= any(...)`, so
//! the common single-value case stays index friendly.

use serde_json::Value;
use unicode_normalization::UnicodeNormalization;

use super::validate::{self, LANG_CODE};
use crate::query_builder::{Comparison, Predicate, SelectQuery, SqlFragment, SqlValue};
use crate::server::errors::ApiError;

type Result<T> = std::result::Result<T, ApiError>;

fn int_cmp(mut ids: Vec<i64>) -> Comparison {
    if ids.len() == 1 {
        Comparison::Equals(SqlValue::Int(ids.remove(0)))
    } else {
        Comparison::AnyOf(SqlValue::IntArray(ids))
    }
}

fn text_cmp(mut txt: Vec<String>) -> Comparison {
    if txt.len() == 1 {
        Comparison::Equals(SqlValue::Text(txt.remove(0)))
    } else {
        Comparison::AnyOf(SqlValue::TextArray(txt))
    }
}

fn ints(values: &[Value], name: &str) -> Result<Vec<i64>> {
    values
        .iter()
        .map(|v| validate::integer(v, name, true))
        .collect()
}

fn strings(values: &[Value], name: &str) -> Result<Vec<String>> {
    values
        .iter()
        .map(|v| validate::string(v, name, true, false).map(str::to_string))
        .collect()
}

pub fn id(values: &[Value], name: &str) -> Result<Comparison> {
    Ok(int_cmp(ints(values, name)?))
}

pub fn not_id(values: &[Value], name: &str) -> Result<Comparison> {
    let mut ids = ints(values, name)?;
    Ok(if ids.len() == 1 {
        Comparison::NotEquals(SqlValue::Int(ids.remove(0)))
    } else {
        Comparison::NotAnyOf(SqlValue::IntArray(ids))
    })
}

fn lang_codes(values: &[Value]) -> Result<Vec<String>> {
    values
        .iter()
        .map(|item| match item {
            Value::String(s) if LANG_CODE.is_match(s) => Ok(s.clone()),
            Value::String(s) => Err(ApiError::invalid(format!(
                "improperly formatted \"lang_code\" item: {}",
                s
            ))),
            other => Err(ApiError::invalid(format!(
                "invalid non-string \"lang_code\" item: {}",
                other
            ))),
        })
        .collect()
}

pub fn lang_code(values: &[Value]) -> Result<Comparison> {
    Ok(text_cmp(lang_codes(values)?))
}

/// Language variety ids whose language code matches.
pub fn lang_code_langvar(values: &[Value]) -> Result<Comparison> {
    let subquery = SelectQuery::from("langvar")
        .select_raw("id")
        .filter(Predicate::compare("lang_code", text_cmp(lang_codes(values)?)));
    Ok(Comparison::InQuery(Box::new(subquery)))
}

fn uids(values: &[Value], name: &str) -> Result<Vec<String>> {
    values.iter().map(|v| validate::uid_item(v, name)).collect()
}

pub fn uid(values: &[Value], name: &str) -> Result<Comparison> {
    Ok(text_cmp(uids(values, name)?))
}

/// Language variety ids resolved from `aaa-000` uids.
pub fn uid_langvar(values: &[Value], name: &str) -> Result<Comparison> {
    let uids = uids(values, name)?;
    let single = uids.len() == 1;
    let subquery = SelectQuery::from("langvar as uidlv")
        .select_raw("uidlv.id")
        .filter(Predicate::compare(
            "uid(uidlv.lang_code,uidlv.var_code)",
            text_cmp(uids),
        ));
    Ok(if single {
        Comparison::EqualsQuery(Box::new(subquery))
    } else {
        Comparison::InQuery(Box::new(subquery))
    })
}

pub fn txt(values: &[Value], name: &str) -> Result<Comparison> {
    Ok(text_cmp(strings(values, name)?))
}

/// Text match after Unicode NFC normalization.
pub fn txt_nfc(values: &[Value], name: &str) -> Result<Comparison> {
    let txt = strings(values, name)?
        .into_iter()
        .map(|s| s.nfc().collect())
        .collect();
    Ok(text_cmp(txt))
}

/// Match the degraded form of the given strings, computed by `txt_degr()` in the database.
pub fn txt_degr(values: &[Value], name: &str) -> Result<Comparison> {
    let mut txt = strings(values, name)?;
    Ok(if txt.len() == 1 {
        Comparison::EqualsExpr(SqlFragment::new(
            "txt_degr(?)",
            vec![SqlValue::Text(txt.remove(0))],
        ))
    } else {
        Comparison::InFragment(SqlFragment::new(
            "select txt_degr(x) from unnest(?::text[]) as x",
            vec![SqlValue::TextArray(txt)],
        ))
    })
}

/// Classification pairs `[expr1, expr2]`. `expr1` is required; a null
/// `expr2` matches on `expr1` alone.
pub fn class_pairs(values: &[Value], col1: &str, col2: &str, name: &str) -> Result<Predicate> {
    let mut unary = Vec::new();
    let mut binary = Vec::new();

    for item in values {
        let (first, second) = two_elements(item, name)?;
        if first.is_null() {
            return Err(ApiError::invalid(format!(
                "elements of parameter \"{}\" must have a non-null first value",
                name
            )));
        }
        let first = validate::positive_integer(first, name)?;
        match second {
            Value::Null => unary.push(first),
            v => {
                let second = validate::positive_integer(v, name)?;
                binary.push(format!("({},{})", first, second));
            }
        }
    }

    Ok(tuple_predicate(col1, col2, unary, binary, "cs"))
}

/// Property pairs `[expr, txt]`. A null `txt` matches on `expr` alone.
pub fn prop_pairs(values: &[Value], col1: &str, col2: &str, name: &str) -> Result<Predicate> {
    let mut unary = Vec::new();
    let mut binary = Vec::new();

    for item in values {
        let (first, second) = two_elements(item, name)?;
        let first = validate::positive_integer(first, name)?;
        match second {
            Value::Null => unary.push(first),
            v => {
                let txt = validate::string(v, name, true, false)?;
                binary.push(format!("({},\"{}\")", first, escape_composite(txt)));
            }
        }
    }

    Ok(tuple_predicate(col1, col2, unary, binary, "pp"))
}

fn two_elements<'a>(item: &'a Value, name: &str) -> Result<(&'a Value, &'a Value)> {
    let items = validate::array_element(item, name)?;
    if items.len() != 2 {
        return Err(ApiError::invalid(format!(
            "elements of parameter \"{}\" must be two-element arrays",
            name
        )));
    }
    Ok((&items[0], &items[1]))
}

/// Backslash-escape `"` and `\` inside a quoted composite field.
fn escape_composite(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for ch in s.chars() {
        if ch == '"' || ch == '\\' {
            out.push('\\');
        }
        out.push(ch);
    }
    out
}

/// `col1 <unary> OR (col1,col2) = <composite>`
fn tuple_predicate(
    col1: &str,
    col2: &str,
    unary: Vec<i64>,
    mut binary: Vec<String>,
    composite_type: &str,
) -> Predicate {
    let mut branches = Vec::new();

    if !unary.is_empty() {
        branches.push(Predicate::compare(col1, int_cmp(unary)));
    }

    let tuple = format!("({},{})", col1, col2);
    match binary.len() {
        0 => {}
        1 => branches.push(Predicate::compare(
            tuple,
            Comparison::EqualsExpr(SqlFragment::new(
                format!("?::{}", composite_type),
                vec![SqlValue::Text(binary.remove(0))],
            )),
        )),
        _ => branches.push(Predicate::compare(
            tuple,
            Comparison::EqualsExpr(SqlFragment::new(
                format!("any(?::{}[])", composite_type),
                vec![SqlValue::TextArray(binary)],
            )),
        )),
    }

    Predicate::Or(branches)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query_builder::{SqlWriter, ToSql};
    use serde_json::json;

    fn render(p: &Predicate) -> (String, Vec<SqlValue>) {
        let mut w = SqlWriter::new();
        p.write_sql(&mut w);
        let c = w.finish();
        (c.sql, c.params)
    }

    fn arr(v: Value) -> Vec<Value> {
        match v {
            Value::Array(items) => items,
            other => vec![other],
        }
    }

    #[test]
    fn test_id_singleton_and_multi() {
        assert_eq!(
            id(&arr(json!(["5"])), "id").unwrap(),
            Comparison::Equals(SqlValue::Int(5))
        );
        assert_eq!(
            id(&arr(json!([1, 2])), "id").unwrap(),
            Comparison::AnyOf(SqlValue::IntArray(vec![1, 2]))
        );
        assert_eq!(
            not_id(&arr(json!([1, 2])), "grp").unwrap(),
            Comparison::NotAnyOf(SqlValue::IntArray(vec![1, 2]))
        );
        assert!(id(&arr(json!(["a"])), "id").is_err());
    }

    #[test]
    fn test_lang_code_validation() {
        assert_eq!(
            lang_code(&arr(json!(["eng"]))).unwrap(),
            Comparison::Equals(SqlValue::Text("eng".into()))
        );
        assert_eq!(
            lang_code(&arr(json!(["english"]))).unwrap_err().to_string(),
            "improperly formatted \"lang_code\" item: english"
        );
        assert_eq!(
            lang_code(&arr(json!([5]))).unwrap_err().to_string(),
            "invalid non-string \"lang_code\" item: 5"
        );
    }

    #[test]
    fn test_uid_langvar_subquery() {
        let p = Predicate::compare("expr.langvar", uid_langvar(&arr(json!(["eng-000"])), "uid").unwrap());
        assert_eq!(
            render(&p).0,
            "expr.langvar = (select uidlv.id from langvar as uidlv where uid(uidlv.lang_code,uidlv.var_code) = $1)"
        );

        let p = Predicate::compare(
            "expr.langvar",
            uid_langvar(&arr(json!(["eng-000", "spa-000"])), "uid").unwrap(),
        );
        assert!(render(&p).0.starts_with("expr.langvar in (select uidlv.id"));

        assert_eq!(
            uid(&arr(json!(["eng000"])), "uid").unwrap_err().to_string(),
            "badly formatted \"uid\" item: eng000"
        );
    }

    #[test]
    fn test_txt_nfc_normalizes() {
        assert_eq!(
            txt_nfc(&arr(json!(["e\u{301}"])), "txt").unwrap(),
            Comparison::Equals(SqlValue::Text("\u{e9}".into()))
        );
    }

    #[test]
    fn test_txt_degr_forms() {
        let p = Predicate::compare("expr.txt_degr", txt_degr(&arr(json!(["a"])), "txt_degr").unwrap());
        assert_eq!(render(&p).0, "expr.txt_degr = txt_degr($1)");

        let p = Predicate::compare("expr.txt_degr", txt_degr(&arr(json!(["a", "b"])), "txt_degr").unwrap());
        assert_eq!(
            render(&p).0,
            "expr.txt_degr in (select txt_degr(x) from unnest($1::text[]) as x)"
        );
    }

    #[test]
    fn test_class_pairs_unary_and_binary() {
        let p = class_pairs(
            &arr(json!([[5, null], [6, 7]])),
            "c.expr1",
            "c.expr2",
            "denotation_class",
        )
        .unwrap();
        let (sql, params) = render(&p);
        assert_eq!(sql, "(c.expr1 = $1 or (c.expr1,c.expr2) = $2::cs)");
        assert_eq!(params[1], SqlValue::Text("(6,7)".into()));

        let p = class_pairs(&arr(json!([[8, 7], [1, 2]])), "c.expr1", "c.expr2", "x").unwrap();
        let (sql, params) = render(&p);
        assert_eq!(sql, "((c.expr1,c.expr2) = any($1::cs[]))");
        assert_eq!(
            params[0],
            SqlValue::TextArray(vec!["(8,7)".into(), "(1,2)".into()])
        );
    }

    #[test]
    fn test_class_pairs_rejects_bad_elements() {
        for items in [json!([[null, null]]), json!([[5, 5], [null, 5], [5, null]])] {
            assert_eq!(
                class_pairs(&arr(items), "a", "b", "meaning_class")
                    .unwrap_err()
                    .to_string(),
                "elements of parameter \"meaning_class\" must have a non-null first value"
            );
        }
        assert_eq!(
            class_pairs(&arr(json!([[1, 2, 3]])), "a", "b", "meaning_class")
                .unwrap_err()
                .to_string(),
            "elements of parameter \"meaning_class\" must be two-element arrays"
        );
    }

    #[test]
    fn test_class_pairs_split_unary_and_binary() {
        let p = class_pairs(&arr(json!([[5, 5], [5, null]])), "c.expr1", "c.expr2", "x").unwrap();
        let (sql, params) = render(&p);
        assert_eq!(sql, "(c.expr1 = $1 or (c.expr1,c.expr2) = $2::cs)");
        assert_eq!(
            params,
            vec![SqlValue::Int(5), SqlValue::Text("(5,5)".into())]
        );
    }

    #[test]
    fn test_prop_pairs_escape_quotes() {
        let p = prop_pairs(
            &arr(json!([[3, "say \"hi\" \\ bye"]])),
            "p.expr",
            "p.txt",
            "denotation_prop",
        )
        .unwrap();
        let (sql, params) = render(&p);
        assert_eq!(sql, "((p.expr,p.txt) = $1::pp)");
        assert_eq!(
            params[0],
            SqlValue::Text("(3,\"say \\\"hi\\\" \\\\ bye\")".into())
        );

        assert!(prop_pairs(&arr(json!([[null, "x"]])), "a", "b", "p").is_err());
    }
}
