//! Language variety routes, plus the `{langvar}` path loader shared with
//! expression and normalization routes.

use std::sync::Arc;

use lazy_static::lazy_static;
use regex::Regex;
use serde_json::Value;

use super::{
    correlated, entity_routes, filter_param, lang_code_matcher, lateral_include, Entity,
    NUMERIC_ID,
};
use crate::catalog::{ColumnMap, ColumnOverride};
use crate::pagination::ListingOptions;
use crate::predicate::matchers;
use crate::query_builder::{Join, Predicate, SelectQuery, SqlFragment, SqlValue};
use crate::server::errors::ApiError;
use crate::server::pipeline::Route;
use crate::server::query_context::QueryContext;
use crate::server::AppState;

const COLS: [&str; 12] = [
    "grp",
    "id",
    "lang_code",
    "meaning",
    "mutable",
    "name_expr",
    "name_expr_txt",
    "name_expr_txt_degr",
    "region_expr",
    "script_expr",
    "uid",
    "var_code",
];

lazy_static! {
    static ref COLUMNS: ColumnMap = ColumnMap::build(
        "langvar",
        &COLS,
        &[
            ("name_expr_txt", ColumnOverride::Expr("expr.txt")),
            ("name_expr_txt_degr", ColumnOverride::Expr("expr.txt_degr")),
            ("region_expr_langvar", ColumnOverride::Expr("region_expr.langvar")),
            (
                "region_expr_uid",
                ColumnOverride::Expr("uid(region_expr_langvar.lang_code,region_expr_langvar.var_code)"),
            ),
            ("region_expr_txt", ColumnOverride::Expr("region_expr.txt")),
            ("script_expr_txt", ColumnOverride::Expr("script_expr.txt")),
            ("uid", ColumnOverride::Expr("uid(langvar.lang_code,langvar.var_code)")),
        ],
    );
    static ref UID_KEY: Regex = Regex::new(r"^([a-z]{3})-(\d{3})$").unwrap();
}

const CHAR_RANGE_ORDER: &str =
    "ORDER BY hex_to_integer({t}.range_start), hex_to_integer({t}.range_end)";

pub struct Langvar;

fn join_script_expr(ctx: &mut QueryContext) {
    ctx.ensure_left_join(Join::on_columns(
        "expr as script_expr",
        "script_expr.id",
        "langvar.script_expr",
    ));
}

fn join_region_expr(ctx: &mut QueryContext) {
    ctx.ensure_left_join(Join::on_columns(
        "expr as region_expr",
        "region_expr.id",
        "langvar.region_expr",
    ));
}

/// Per-variety character ranges from `table`, ordered by decoded start.
fn char_ranges(table: &str, element: &str) -> SelectQuery {
    let order = CHAR_RANGE_ORDER.replace("{t}", table);
    SelectQuery::from(table)
        .select_raw(&format!("array_agg({} {}) as val", element, order))
        .filter(Predicate::columns_eq(&format!("{}.langvar", table), "langvar.id"))
}

impl Entity for Langvar {
    const NAME: &'static str = "langvar";
    const FROM: &'static str = "langvar";
    const LABEL: &'static str = "language variety";
    const ARRAY_PARAMS: &'static [&'static str] = &[
        "expr_txt",
        "expr_txt_degr",
        "grp",
        "id",
        "lang_code",
        "meaning",
        "name_expr",
        "name_expr_txt",
        "name_expr_txt_degr",
        "region_expr",
        "region_expr_langvar",
        "region_expr_uid",
        "region_expr_txt",
        "script_expr",
        "script_expr_txt",
        "trans_expr",
        "uid",
    ];
    const LISTING: ListingOptions = ListingOptions {
        id_field: "id",
        table: "langvar",
        search_required: None,
        unlimited: true,
    };

    fn column_map() -> &'static ColumnMap {
        &COLUMNS
    }

    fn start_query(ctx: &mut QueryContext) {
        ctx.query = SelectQuery::from("langvar");
        ctx.ensure_join(Join::on_columns("expr", "expr.id", "langvar.name_expr"));
    }

    fn select(ctx: &mut QueryContext) -> Result<(), ApiError> {
        ctx.select_cols(&COLUMNS, &COLS);

        if ctx.includes("langvar_char") {
            let ranges = char_ranges(
                "langvar_char",
                "json_build_array(hex_to_integer(langvar_char.range_start), hex_to_integer(langvar_char.range_end))",
            );
            lateral_include(ctx, "langvar_char", ranges);
        }

        if ctx.includes("langvar_cldr_char") {
            let ranges = char_ranges(
                "langvar_cldr_char",
                "json_build_object('range', json_build_array(hex_to_integer(langvar_cldr_char.range_start), \
                 hex_to_integer(langvar_cldr_char.range_end)), 'locale', langvar_cldr_char.locale, \
                 'category', langvar_cldr_char.variable)",
            );
            lateral_include(ctx, "langvar_cldr_char", ranges);
        }

        for (item, table) in [("denotation_count", "denotationx"), ("expr_count", "expr")] {
            if ctx.includes(item) {
                ctx.select_expr(&format!(
                    "(select count(*) from {t} where {t}.langvar = langvar.id) as {item}",
                    t = table,
                    item = item
                ));
            }
        }

        if ctx.includes("script_expr_txt") {
            join_script_expr(ctx);
            ctx.select_col(&COLUMNS, "script_expr_txt");
        }

        if ctx.includes("region_expr_langvar") {
            join_region_expr(ctx);
            ctx.select_col(&COLUMNS, "region_expr_langvar");
        }

        if ctx.includes("region_expr_uid") {
            join_region_expr(ctx);
            ctx.ensure_left_join(Join::on_columns(
                "langvar as region_expr_langvar",
                "region_expr_langvar.id",
                "region_expr.langvar",
            ));
            ctx.select_col(&COLUMNS, "region_expr_uid");
        }

        if ctx.includes("region_expr_txt") {
            join_region_expr(ctx);
            ctx.select_col(&COLUMNS, "region_expr_txt");
        }

        Ok(())
    }

    fn conditions(ctx: &mut QueryContext, _counting: bool) -> Result<usize, ApiError> {
        let mut num_params = 0;

        let filters: [(&str, &str, super::Matcher); 7] = [
            ("id", "langvar.id", matchers::id),
            ("uid", "uid(langvar.lang_code,langvar.var_code)", matchers::uid),
            ("lang_code", "langvar.lang_code", lang_code_matcher),
            ("grp", "langvar.grp", matchers::id),
            ("name_expr", "langvar.name_expr", matchers::id),
            ("name_expr_txt", "expr.txt", matchers::txt_nfc),
            ("name_expr_txt_degr", "expr.txt_degr", matchers::txt_degr),
        ];
        for (name, column, matcher) in filters {
            num_params += filter_param(ctx, name, column, matcher)? as usize;
        }

        for (name, alias, column, matcher) in [
            ("expr_txt", "expr2", "txt", matchers::txt_nfc as super::Matcher),
            ("expr_txt_degr", "expr3", "txt_degr", matchers::txt_degr),
        ] {
            if let Some(values) = ctx.consume_array(name)? {
                let exists = correlated(
                    &format!("expr as {}", alias),
                    &format!("{}.langvar", alias),
                    "langvar.id",
                )
                .filter(Predicate::compare(
                    format!("{}.{}", alias, column),
                    matcher(&values, name)?,
                ));
                ctx.filter(Predicate::Exists(Box::new(exists)));
                num_params += 1;
            }
        }

        if let Some(values) = ctx.consume_array("trans_expr")? {
            let exists = correlated("denotationx as denotation2", "denotation2.langvar", "langvar.id")
                .join(Join::inner(
                    "denotationx as denotation",
                    vec![
                        Predicate::columns_eq("denotation.meaning", "denotation2.meaning"),
                        Predicate::Raw(SqlFragment::raw("denotation2.expr != denotation.expr")),
                    ],
                ))
                .filter(Predicate::compare(
                    "denotation.expr",
                    matchers::id(&values, "trans_expr")?,
                ));
            ctx.filter(Predicate::Exists(Box::new(exists)));
            num_params += 1;
        }

        if let Some(mutable) = ctx.consume_bool("mutable")? {
            ctx.filter(Predicate::eq("langvar.mutable", SqlValue::Bool(mutable)));
            num_params += 1;
        }

        num_params += filter_param(ctx, "script_expr", "langvar.script_expr", matchers::id)? as usize;

        if ctx.has("script_expr_txt") {
            join_script_expr(ctx);
            num_params +=
                filter_param(ctx, "script_expr_txt", "script_expr.txt", matchers::txt)? as usize;
        }

        num_params += filter_param(ctx, "meaning", "langvar.meaning", matchers::id)? as usize;
        num_params += filter_param(ctx, "region_expr", "langvar.region_expr", matchers::id)? as usize;

        let region: [(&str, &str, super::Matcher); 3] = [
            ("region_expr_langvar", "region_expr.langvar", matchers::id),
            ("region_expr_uid", "region_expr.langvar", matchers::uid_langvar),
            ("region_expr_txt", "region_expr.txt", matchers::txt),
        ];
        for (name, column, matcher) in region {
            if ctx.has(name) {
                join_region_expr(ctx);
                num_params += filter_param(ctx, name, column, matcher)? as usize;
            }
        }

        Ok(num_params)
    }

    /// Numeric id or `aaa-000` uniform identifier.
    fn lookup(key: &str) -> Result<Predicate, ApiError> {
        if NUMERIC_ID.is_match(key) {
            return Ok(Predicate::eq("langvar.id", SqlValue::Int(super::parse_id(key)?)));
        }
        match UID_KEY.captures(key) {
            Some(caps) => {
                let var_code: i64 = caps[2]
                    .parse()
                    .map_err(|_| ApiError::invalid(format!("invalid variety code: {}", key)))?;
                Ok(Predicate::And(vec![
                    Predicate::eq("langvar.lang_code", SqlValue::Text(caps[1].to_string())),
                    Predicate::eq("langvar.var_code", SqlValue::Int(var_code)),
                ]))
            }
            None => Err(ApiError::invalid(
                "invalid language variety format: must be integer id or uniform identifier (aaa-000)",
            )),
        }
    }
}

/// Resolve a `{langvar}` path segment to its row, built with the request's
/// includes. The request's own query is left untouched.
pub async fn load(ctx: &mut QueryContext, app: &AppState, key: &str) -> Result<Value, ApiError> {
    let lookup = Langvar::lookup(key)?;

    let outer = ctx.enter_query(SelectQuery::from(""));
    Langvar::start_query(ctx);
    let built = Langvar::select(ctx);
    ctx.filter(lookup);
    let query = ctx.leave_query(outer);
    built?;

    app.executor
        .fetch_optional(&query.limit(1).compile())
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("language variety {} was not found", key)))
}

pub fn routes() -> Vec<Arc<Route>> {
    entity_routes::<Langvar>("/v2/langvar", "/v2/langvar/count", "/v2/langvar/{id}")
}
