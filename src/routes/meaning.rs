use std::sync::Arc;

use lazy_static::lazy_static;
use serde_json::Value;

use super::{correlated, dedup, entity_routes, filter_param, lateral_include, Entity};
use crate::catalog::{ColumnMap, ColumnOverride};
use crate::pagination::ListingOptions;
use crate::predicate::matchers;
use crate::query_builder::{Join, Predicate, SelectQuery, SqlFragment, SqlValue};
use crate::server::errors::ApiError;
use crate::server::pipeline::Route;
use crate::server::query_context::QueryContext;

const COLS: [&str; 4] = ["denotation", "expr", "id", "source"];

lazy_static! {
    static ref COLUMNS: ColumnMap = ColumnMap::build(
        "meaning",
        &COLS,
        &[
            (
                "denotation",
                ColumnOverride::Descriptor {
                    sql_expr: "coalesce(d.denotation, '{}')",
                    sortable: false,
                },
            ),
            (
                "expr",
                ColumnOverride::Descriptor {
                    sql_expr: "coalesce(d.expr, '{}')",
                    sortable: false,
                },
            ),
            ("checksum", ColumnOverride::Expr("meaning_checksum.checksum")),
            ("record", ColumnOverride::Expr("meaning_checksum.record")),
        ],
    );
}

pub struct Meaning;

/// Per-meaning aggregate of `[first, second]` pairs from `table`.
fn pair_aggregate(table: &str, first: &str, second: &str) -> SelectQuery {
    SelectQuery::from(table)
        .select_raw(&format!(
            "array_agg(json_build_array({t}.{a}, {t}.{b}) ORDER BY {t}.id) as val",
            t = table,
            a = first,
            b = second,
        ))
        .filter(Predicate::columns_eq(&format!("{}.meaning", table), "meaning.id"))
}

impl Entity for Meaning {
    const NAME: &'static str = "meaning";
    const FROM: &'static str = "meaning";
    const LABEL: &'static str = "meaning";
    const ARRAY_PARAMS: &'static [&'static str] = &["id", "expr", "source"];
    const LISTING: ListingOptions = ListingOptions {
        id_field: "id",
        table: "meaning",
        search_required: Some("you must specify at least one search parameter"),
        unlimited: false,
    };

    fn column_map() -> &'static ColumnMap {
        &COLUMNS
    }

    fn select(ctx: &mut QueryContext) -> Result<(), ApiError> {
        ctx.select_cols(&COLUMNS, &COLS);

        let members = SelectQuery::from("denotation")
            .select_raw("array_agg(denotation.id ORDER BY denotation.id) as denotation")
            .select_raw("array_agg(denotation.expr ORDER BY denotation.expr) as expr")
            .filter(Predicate::columns_eq("denotation.meaning", "meaning.id"));
        ctx.ensure_join(Join::left_lateral(members, "d"));

        if ctx.includes("meaning_class") {
            lateral_include(ctx, "meaning_class", pair_aggregate("meaning_class", "expr1", "expr2"));
        }

        if ctx.includes("meaning_prop") {
            lateral_include(ctx, "meaning_prop", pair_aggregate("meaning_prop", "expr", "txt"));
        }

        if ctx.includes("definition") {
            let subquery = SelectQuery::from("definition")
                .select_raw(
                    "array_agg(json_build_object('id',definition.id,'langvar',definition.langvar,\
                     'txt',definition.txt,'txt_degr',definition.txt_degr) ORDER BY definition.id) as val",
                )
                .filter(Predicate::columns_eq("definition.meaning", "meaning.id"));
            lateral_include(ctx, "definition", subquery);
        }

        for item in ["checksum", "record"] {
            if ctx.includes(item) {
                ctx.ensure_join(Join::on_columns(
                    "meaning_checksum",
                    "meaning_checksum.meaning",
                    "meaning.id",
                ));
                ctx.select_col(&COLUMNS, item);
            }
        }

        Ok(())
    }

    fn conditions(ctx: &mut QueryContext, _counting: bool) -> Result<usize, ApiError> {
        let mut num_params = 0;

        num_params += filter_param(ctx, "id", "meaning.id", matchers::id)? as usize;
        num_params += filter_param(ctx, "source", "meaning.source", matchers::id)? as usize;

        // Meanings containing every listed expression.
        if let Some(values) = ctx.consume_array("expr")? {
            let exprs: Vec<Value> = dedup(values);
            let required = exprs.len() as i64;
            let exists = correlated("denotation as denotation2", "denotation2.meaning", "meaning.id")
                .filter(Predicate::compare(
                    "denotation2.expr",
                    matchers::id(&exprs, "expr")?,
                ))
                .having(Predicate::Raw(SqlFragment::new(
                    "count(*) >= ?",
                    vec![SqlValue::Int(required)],
                )));
            ctx.filter(Predicate::Exists(Box::new(exists)));
            num_params += 1;
        }

        if let Some(values) = ctx.consume_array("meaning_class")? {
            let pairs = matchers::class_pairs(
                &values,
                "meaning_class.expr1",
                "meaning_class.expr2",
                "meaning_class",
            )?;
            let exists =
                correlated("meaning_class", "meaning_class.meaning", "meaning.id").filter(pairs);
            ctx.filter(Predicate::Exists(Box::new(exists)));
        }

        if let Some(values) = ctx.consume_array("meaning_prop")? {
            let pairs = matchers::prop_pairs(
                &values,
                "meaning_prop.expr",
                "meaning_prop.txt",
                "meaning_prop",
            )?;
            let exists =
                correlated("meaning_prop", "meaning_prop.meaning", "meaning.id").filter(pairs);
            ctx.filter(Predicate::Exists(Box::new(exists)));
        }

        Ok(num_params)
    }
}

pub fn routes() -> Vec<Arc<Route>> {
    entity_routes::<Meaning>("/v2/meaning", "/v2/meaning/count", "/v2/meaning/{id}")
}
