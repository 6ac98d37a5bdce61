use super::fragment::{SqlFragment, SqlValue, SqlWriter};
use super::{SelectQuery, ToSql};

/// Right-hand side of a filter on a single expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Comparison {
    /// `expr = $v`
    Equals(SqlValue),
    /// `expr = any($arr)`
    AnyOf(SqlValue),
    /// `expr != $v`
    NotEquals(SqlValue),
    /// `expr != all($arr)`
    NotAnyOf(SqlValue),
    /// `expr = <fragment>`
    EqualsExpr(SqlFragment),
    /// `expr in (<fragment>)`
    InFragment(SqlFragment),
    /// `expr in (<subquery>)`
    InQuery(Box<SelectQuery>),
    /// `expr = (<subquery>)`
    EqualsQuery(Box<SelectQuery>),
    /// `expr >= <fragment>`
    AtLeast(SqlFragment),
    /// `expr <= <fragment>`
    AtMost(SqlFragment),
    /// `expr > <fragment>`
    GreaterThan(SqlFragment),
    /// `expr < <fragment>`
    LessThan(SqlFragment),
}

/// A WHERE/HAVING condition.
#[derive(Debug, Clone, PartialEq)]
pub enum Predicate {
    Compare {
        expr: String,
        comparison: Comparison,
    },
    Raw(SqlFragment),
    Exists(Box<SelectQuery>),
    NotExists(Box<SelectQuery>),
    Or(Vec<Predicate>),
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn compare(expr: impl Into<String>, comparison: Comparison) -> Self {
        Predicate::Compare {
            expr: expr.into(),
            comparison,
        }
    }

    pub fn eq(expr: impl Into<String>, value: SqlValue) -> Self {
        Predicate::compare(expr, Comparison::Equals(value))
    }

    /// Compare two column expressions, e.g. a correlated subquery condition.
    pub fn columns_eq(left: &str, right: &str) -> Self {
        Predicate::Raw(SqlFragment::raw(format!("{} = {}", left, right)))
    }
}

impl ToSql for Comparison {
    fn write_sql(&self, out: &mut SqlWriter) {
        match self {
            Comparison::Equals(v) => {
                out.push_str(" = ");
                out.push_value(v);
            }
            Comparison::AnyOf(v) => {
                out.push_str(" = any(");
                out.push_value(v);
                out.push_str(")");
            }
            Comparison::NotEquals(v) => {
                out.push_str(" != ");
                out.push_value(v);
            }
            Comparison::NotAnyOf(v) => {
                out.push_str(" != all(");
                out.push_value(v);
                out.push_str(")");
            }
            Comparison::EqualsExpr(f) => {
                out.push_str(" = ");
                out.push_fragment(f);
            }
            Comparison::InFragment(f) => {
                out.push_str(" in (");
                out.push_fragment(f);
                out.push_str(")");
            }
            Comparison::InQuery(q) => {
                out.push_str(" in (");
                q.write_sql(out);
                out.push_str(")");
            }
            Comparison::EqualsQuery(q) => {
                out.push_str(" = (");
                q.write_sql(out);
                out.push_str(")");
            }
            Comparison::AtLeast(f) => {
                out.push_str(" >= ");
                out.push_fragment(f);
            }
            Comparison::AtMost(f) => {
                out.push_str(" <= ");
                out.push_fragment(f);
            }
            Comparison::GreaterThan(f) => {
                out.push_str(" > ");
                out.push_fragment(f);
            }
            Comparison::LessThan(f) => {
                out.push_str(" < ");
                out.push_fragment(f);
            }
        }
    }
}

impl ToSql for Predicate {
    fn write_sql(&self, out: &mut SqlWriter) {
        match self {
            Predicate::Compare { expr, comparison } => {
                out.push_str(expr);
                comparison.write_sql(out);
            }
            Predicate::Raw(f) => out.push_fragment(f),
            Predicate::Exists(q) => {
                out.push_str("exists (");
                q.write_sql(out);
                out.push_str(")");
            }
            Predicate::NotExists(q) => {
                out.push_str("not exists (");
                q.write_sql(out);
                out.push_str(")");
            }
            Predicate::Or(items) => write_group(out, items, " or ", "false"),
            Predicate::And(items) => write_group(out, items, " and ", "true"),
        }
    }
}

fn write_group(out: &mut SqlWriter, items: &[Predicate], sep: &str, empty: &str) {
    if items.is_empty() {
        out.push_str(empty);
        return;
    }
    out.push_str("(");
    for (i, item) in items.iter().enumerate() {
        if i > 0 {
            out.push_str(sep);
        }
        item.write_sql(out);
    }
    out.push_str(")");
}
