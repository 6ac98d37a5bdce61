//! SQL fragments with positional bind values.
//!
//! A fragment is SQL text where every `?` marks a bound value. Fragments are
//! only ever produced by this crate; user input reaches the database as a
//! bound value or as an escaped literal, never as raw SQL text.

use serde_json::Value;

/// A value bound into a query.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Int(i64),
    Bool(bool),
    Text(String),
    IntArray(Vec<i64>),
    TextArray(Vec<String>),
    /// Inlined as an untyped quoted literal so PostgreSQL coerces it to the
    /// type of the column it is compared with.
    Untyped(String),
}

impl SqlValue {
    /// Render the value as a SQL literal.
    pub fn to_literal(&self) -> String {
        match self {
            SqlValue::Int(n) => n.to_string(),
            SqlValue::Bool(b) => b.to_string(),
            SqlValue::Text(s) | SqlValue::Untyped(s) => quote_literal(s),
            SqlValue::IntArray(items) => format!(
                "ARRAY[{}]::bigint[]",
                items
                    .iter()
                    .map(|n| n.to_string())
                    .collect::<Vec<_>>()
                    .join(",")
            ),
            SqlValue::TextArray(items) => format!(
                "ARRAY[{}]::text[]",
                items
                    .iter()
                    .map(|s| quote_literal(s))
                    .collect::<Vec<_>>()
                    .join(",")
            ),
        }
    }

    /// JSON form, used when echoing bind values for debugging.
    pub fn to_json(&self) -> Value {
        match self {
            SqlValue::Int(n) => Value::from(*n),
            SqlValue::Bool(b) => Value::from(*b),
            SqlValue::Text(s) | SqlValue::Untyped(s) => Value::from(s.clone()),
            SqlValue::IntArray(items) => Value::from(items.clone()),
            SqlValue::TextArray(items) => Value::from(items.clone()),
        }
    }

    fn is_inlined(&self) -> bool {
        matches!(self, SqlValue::Untyped(_))
    }
}

/// Quote a string as a PostgreSQL escape-string literal.
///
/// The `E'...'` form treats backslashes the same way regardless of the
/// server's `standard_conforming_strings` setting.
pub fn quote_literal(s: &str) -> String {
    let mut out = String::with_capacity(s.len() + 3);
    out.push_str("E'");
    for ch in s.chars() {
        match ch {
            '\\' => out.push_str("\\\\"),
            '\'' => out.push_str("\\'"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            _ => out.push(ch),
        }
    }
    out.push('\'');
    out
}

/// SQL text plus the values for its `?` placeholders, in order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SqlFragment {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl SqlFragment {
    pub fn new(sql: impl Into<String>, params: Vec<SqlValue>) -> Self {
        SqlFragment {
            sql: sql.into(),
            params,
        }
    }

    /// Fragment without bound values.
    pub fn raw(sql: impl Into<String>) -> Self {
        SqlFragment {
            sql: sql.into(),
            params: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sql.is_empty()
    }
}

impl From<&str> for SqlFragment {
    fn from(sql: &str) -> Self {
        SqlFragment::raw(sql)
    }
}

impl From<String> for SqlFragment {
    fn from(sql: String) -> Self {
        SqlFragment::raw(sql)
    }
}

/// Accumulates rendered SQL and renumbers placeholders as `$1..$n`.
#[derive(Debug, Default)]
pub struct SqlWriter {
    sql: String,
    params: Vec<SqlValue>,
    inline: bool,
}

impl SqlWriter {
    pub fn new() -> Self {
        SqlWriter::default()
    }

    /// Writer that inlines every value as a literal, for debug output.
    pub fn inlining() -> Self {
        SqlWriter {
            inline: true,
            ..SqlWriter::default()
        }
    }

    pub fn push_str(&mut self, s: &str) {
        self.sql.push_str(s);
    }

    pub fn push_value(&mut self, value: &SqlValue) {
        if self.inline || value.is_inlined() {
            self.sql.push_str(&value.to_literal());
        } else {
            self.params.push(value.clone());
            self.sql.push('$');
            self.sql.push_str(&self.params.len().to_string());
        }
    }

    pub fn push_fragment(&mut self, fragment: &SqlFragment) {
        let mut values = fragment.params.iter();
        for ch in fragment.sql.chars() {
            if ch == '?' {
                match values.next() {
                    Some(value) => self.push_value(value),
                    None => self.sql.push(ch),
                }
            } else {
                self.sql.push(ch);
            }
        }
    }

    pub fn finish(self) -> CompiledQuery {
        CompiledQuery {
            sql: self.sql,
            params: self.params,
        }
    }
}

/// Final SQL text with `$n` placeholders and the values to bind.
#[derive(Debug, Clone, PartialEq)]
pub struct CompiledQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl CompiledQuery {
    pub fn from_fragment(fragment: &SqlFragment) -> Self {
        let mut writer = SqlWriter::new();
        writer.push_fragment(fragment);
        writer.finish()
    }
}
