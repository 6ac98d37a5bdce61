//! `limit`, `sort`, `offset`, `after` and `sql` handling for listing routes.
//!
//! Sorting always ends up deterministic: without `sort` the primary id is
//! used, so `offset` and `after` page consistently. `after` is a seek cursor
//! holding the last row's sort values.

use serde_json::Value;

use crate::catalog::ColumnMap;
use crate::predicate::validate;
use crate::query_builder::{Comparison, OrderByOrder, Predicate, SqlFragment, SqlValue};
use crate::server::errors::ApiError;
use crate::server::query_context::QueryContext;

/// How a listing route pages its results.
#[derive(Debug, Clone, Copy)]
pub struct ListingOptions {
    /// Column map key of the primary id.
    pub id_field: &'static str,
    /// Relation whose planner row estimate drives random sampling.
    pub table: &'static str,
    /// When set, `offset`/`after` require at least one search parameter and
    /// this text starts the error message.
    pub search_required: Option<&'static str>,
    /// Allows `limit=0`, meaning no limit.
    pub unlimited: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub expr: String,
    pub order: OrderByOrder,
}

/// Rows requested by `sort=random` with no filter: over-generate ids to cover gaps.
const RANDOM_ID_FACTOR: i64 = 50;

pub fn apply_global_params(
    ctx: &mut QueryContext,
    map: &ColumnMap,
    opts: &ListingOptions,
) -> Result<(), ApiError> {
    let response_max = ctx.limits.response_max;

    let limit = match ctx.consume("limit") {
        Some(v) => {
            let n = if opts.unlimited {
                validate::non_negative_integer(&v, "limit", false)?
            } else {
                validate::positive_integer(&v, "limit")?
            };
            n.min(response_max)
        }
        None => response_max,
    };
    if limit > 0 {
        ctx.query.limit = Some(limit);
    }

    let id_col = map
        .get(opts.id_field)
        .map(|def| def.sql_expr.clone())
        .ok_or_else(|| ApiError::Internal(format!("no id column '{}'", opts.id_field)))?;

    let (random, sort_keys) = match ctx.consume_array("sort")? {
        None => {
            ctx.query.push_order_by(&id_col, Some(OrderByOrder::Asc));
            (
                false,
                vec![SortKey {
                    expr: id_col.clone(),
                    order: OrderByOrder::Asc,
                }],
            )
        }
        Some(items) if items.len() == 1 && items[0] == "random" => {
            apply_random(ctx, &id_col, opts.table, if limit > 0 { limit } else { response_max });
            (true, Vec::new())
        }
        Some(items) => {
            let keys = resolve_sort(ctx, map, &items)?;
            for key in &keys {
                ctx.query.push_order_by(&key.expr, Some(key.order));
            }
            (false, keys)
        }
    };

    let check_offset_after = |ctx: &QueryContext, param: &str| -> Result<(), ApiError> {
        if random {
            return Err(ApiError::invalid(format!(
                "the parameter \"{}\" cannot be used when sorting by \"random\"",
                param
            )));
        }
        if let Some(msg) = opts.search_required {
            if ctx.state.num_params == 0 {
                return Err(ApiError::MissingParameter(format!(
                    "{} when passing \"{}\"",
                    msg, param
                )));
            }
        }
        Ok(())
    };

    if let Some(offset) = ctx.consume("offset") {
        check_offset_after(ctx, "offset")?;
        let offset = validate::non_negative_integer(&offset, "offset", false)?;
        if offset > ctx.limits.offset_max {
            return Err(ApiError::invalid(format!(
                "the parameter \"offset\" cannot be greater than {}",
                ctx.limits.offset_max
            )));
        }
        ctx.query.offset = Some(offset);
    }

    if let Some(after) = ctx.consume_array("after")? {
        check_offset_after(ctx, "after")?;
        let predicate = seek_predicate(&after, &sort_keys)?;
        ctx.filter(predicate);
    }

    if let Some(sql) = ctx.consume_bool("sql")? {
        ctx.state.sql_debug = sql;
    }

    Ok(())
}

fn apply_random(ctx: &mut QueryContext, id_col: &str, table: &str, limit: i64) {
    if ctx.query.has_filters() {
        ctx.query.push_order_by("random()", None);
        return;
    }

    // Ordering a whole large table by random() is slow; draw candidate ids
    // from the estimated row count instead.
    ctx.filter(Predicate::compare(
        id_col,
        Comparison::EqualsExpr(SqlFragment::new(
            "ANY(ARRAY(SELECT (random()*(SELECT reltuples FROM pg_class JOIN pg_namespace ON \
             (pg_class.relnamespace = pg_namespace.oid) WHERE relname = ? AND \
             (nspname = 'public' OR nspname = 'deriv')))::integer FROM generate_series(1, ?)))",
            vec![
                SqlValue::Text(table.to_string()),
                SqlValue::Int(limit * RANDOM_ID_FACTOR),
            ],
        )),
    ));
    ctx.query.push_order_by(id_col, Some(OrderByOrder::Asc));
}

fn resolve_sort(
    ctx: &QueryContext,
    map: &ColumnMap,
    items: &[Value],
) -> Result<Vec<SortKey>, ApiError> {
    items
        .iter()
        .map(|item| {
            let raw = validate::string(item, "sort", true, false)?;
            let lower = raw.to_lowercase();
            let spec: Vec<&str> = lower.split_whitespace().collect();

            if spec.is_empty() || spec.len() > 2 {
                return Err(ApiError::invalid(format!(
                    "invalid sort specification: {}",
                    item
                )));
            }

            let col = spec[0];
            let def = match map.get(col) {
                Some(def) if def.sortable => def,
                _ => {
                    return Err(ApiError::invalid(format!(
                        "the field \"{}\" is not a valid field to sort by",
                        col
                    )))
                }
            };

            if !ctx.is_sortable(col) {
                return Err(ApiError::invalid(format!(
                    "the field \"{}\" is not a valid field to sort by: you may need to pass it under \"include\"",
                    col
                )));
            }

            let order = match spec.get(1) {
                None | Some(&"asc") => OrderByOrder::Asc,
                Some(&"desc") => OrderByOrder::Desc,
                Some(_) => {
                    return Err(ApiError::invalid(format!(
                        "sort direction must be specified as \"asc\" or \"desc\": {}",
                        item
                    )))
                }
            };

            Ok(SortKey {
                expr: def.sql_expr.clone(),
                order,
            })
        })
        .collect()
}

/// Bind value for a cursor element. Strings stay untyped so they compare
/// against integer and text columns alike.
fn cursor_value(v: &Value) -> SqlValue {
    match v {
        Value::Number(n) => SqlValue::Int(n.as_i64().unwrap_or_default()),
        Value::String(s) => SqlValue::Untyped(s.clone()),
        other => SqlValue::Untyped(other.to_string()),
    }
}

fn is_integer(v: &Value) -> bool {
    match v {
        Value::Number(n) => n.is_i64(),
        Value::String(s) => validate::SIGNED_INT.is_match(s),
        _ => false,
    }
}

/// Rows strictly after the cursor in sort order.
///
/// With several keys the comparison is a row comparison; descending keys are
/// negated so one `>` covers mixed directions, which only works for integers.
fn seek_predicate(after: &[Value], keys: &[SortKey]) -> Result<Predicate, ApiError> {
    if after.len() != keys.len() {
        return Err(ApiError::invalid(
            "the parameter \"after\" must contain the same number of elements as \"sort\"",
        ));
    }

    if keys.len() == 1 {
        validate::scalar(&after[0], "after", true)?;
        let bound = SqlFragment::new("?", vec![cursor_value(&after[0])]);
        let comparison = match keys[0].order {
            OrderByOrder::Asc => Comparison::GreaterThan(bound),
            OrderByOrder::Desc => Comparison::LessThan(bound),
        };
        return Ok(Predicate::compare(keys[0].expr.clone(), comparison));
    }

    let mut left = Vec::with_capacity(keys.len());
    let mut right = Vec::with_capacity(keys.len());
    let mut params = Vec::with_capacity(keys.len());

    for (value, key) in after.iter().zip(keys) {
        validate::scalar(value, "after", true)?;
        match key.order {
            OrderByOrder::Asc => {
                left.push(key.expr.clone());
                right.push("?");
            }
            OrderByOrder::Desc => {
                if !is_integer(value) {
                    return Err(ApiError::invalid(
                        "the parameter \"after\" cannot be used with a non-integer field in descending direction, when sorting by multiple fields",
                    ));
                }
                left.push(format!("-{}", key.expr));
                right.push("-?::integer");
            }
        }
        params.push(cursor_value(value));
    }

    Ok(Predicate::Raw(SqlFragment::new(
        format!("({}) > ({})", left.join(","), right.join(",")),
        params,
    )))
}
