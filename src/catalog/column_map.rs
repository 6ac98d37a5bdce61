//! Logical field name -> SQL expression resolution.
//!
//! Each entity builds one `ColumnMap` at startup. Base columns map straight to
//! `<table>.<col>`; overrides point a logical name at an arbitrary expression
//! (a joined table's column, a function call) and may opt out of sorting.

use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    /// Expression used in WHERE/ORDER BY.
    pub sql_expr: String,
    /// Expression used in the select list, aliased to the logical name when needed.
    pub sql_expr_aliased: String,
    pub sortable: bool,
}

/// Override for one logical column.
#[derive(Debug, Clone, Copy)]
pub enum ColumnOverride {
    /// Plain expression, sortable.
    Expr(&'static str),
    /// Expression with explicit sortability.
    Descriptor {
        sql_expr: &'static str,
        sortable: bool,
    },
}

#[derive(Debug, Clone)]
pub struct ColumnMap {
    table: String,
    columns: HashMap<String, ColumnDef>,
    base_columns: Vec<String>,
}

impl ColumnMap {
    pub fn build(
        table: &str,
        base_columns: &[&str],
        overrides: &[(&'static str, ColumnOverride)],
    ) -> Self {
        let mut columns = HashMap::new();

        for (col, ov) in overrides {
            let (sql_expr, sortable) = match ov {
                ColumnOverride::Expr(expr) => (*expr, true),
                ColumnOverride::Descriptor { sql_expr, sortable } => (*sql_expr, *sortable),
            };
            let sql_expr_aliased = if needs_alias(sql_expr, col) {
                format!("{} as {}", sql_expr, col)
            } else {
                sql_expr.to_string()
            };
            columns.insert(
                col.to_string(),
                ColumnDef {
                    sql_expr: sql_expr.to_string(),
                    sql_expr_aliased,
                    sortable,
                },
            );
        }

        for col in base_columns {
            columns.entry(col.to_string()).or_insert_with(|| {
                let sql_expr = format!("{}.{}", table, col);
                ColumnDef {
                    sql_expr_aliased: sql_expr.clone(),
                    sql_expr,
                    sortable: true,
                }
            });
        }

        ColumnMap {
            table: table.to_string(),
            columns,
            base_columns: base_columns.iter().map(|c| c.to_string()).collect(),
        }
    }

    pub fn get(&self, col: &str) -> Option<&ColumnDef> {
        self.columns.get(col)
    }

    pub fn table(&self) -> &str {
        &self.table
    }

    /// Columns selected by default, in declaration order.
    pub fn base_columns(&self) -> &[String] {
        &self.base_columns
    }

    pub fn contains(&self, col: &str) -> bool {
        self.columns.contains_key(col)
    }
}

/// An expression reads as the column itself when it is the bare name, a call
/// named after it, or a qualified reference ending in it.
fn needs_alias(sql_expr: &str, col: &str) -> bool {
    !(sql_expr == col
        || sql_expr.starts_with(&format!("{}(", col))
        || sql_expr.ends_with(&format!(".{}", col)))
}
