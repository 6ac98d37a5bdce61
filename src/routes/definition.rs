use std::sync::Arc;

use lazy_static::lazy_static;

use super::{entity_routes, filter_param, Entity};
use crate::catalog::{ColumnMap, ColumnOverride};
use crate::pagination::ListingOptions;
use crate::predicate::matchers;
use crate::query_builder::Join;
use crate::server::errors::ApiError;
use crate::server::pipeline::Route;
use crate::server::query_context::QueryContext;

const COLS: [&str; 5] = ["id", "meaning", "langvar", "txt", "txt_degr"];

/// Parameters that pull in the meaning's denotations.
const EXPR_PARAMS: [&str; 5] = ["expr", "expr_langvar", "expr_uid", "expr_txt", "expr_txt_degr"];

lazy_static! {
    static ref COLUMNS: ColumnMap = ColumnMap::build(
        "definition",
        &COLS,
        &[
            ("expr", ColumnOverride::Expr("denotation.expr")),
            ("expr_langvar", ColumnOverride::Expr("expr.langvar")),
            ("expr_txt", ColumnOverride::Expr("expr.txt")),
            ("expr_txt_degr", ColumnOverride::Expr("expr.txt_degr")),
            ("expr_uid", ColumnOverride::Expr("uid(langvar2.lang_code,langvar2.var_code)")),
            ("uid", ColumnOverride::Expr("uid(langvar.lang_code,langvar.var_code)")),
        ],
    );
}

pub struct Definition;

fn join_denotations(ctx: &mut QueryContext) {
    ctx.ensure_join(Join::on_columns("meaning", "meaning.id", "definition.meaning"));
    ctx.ensure_join(Join::on_columns("denotation", "denotation.meaning", "meaning.id"));
}

fn join_expr(ctx: &mut QueryContext) {
    ctx.ensure_join(Join::on_columns("expr", "expr.id", "denotation.expr"));
}

impl Entity for Definition {
    const NAME: &'static str = "definition";
    const FROM: &'static str = "definition";
    const LABEL: &'static str = "definition";
    const ARRAY_PARAMS: &'static [&'static str] = &[
        "expr",
        "expr_langvar",
        "expr_txt",
        "expr_txt_degr",
        "expr_uid",
        "id",
        "langvar",
        "meaning",
        "txt",
        "txt_degr",
        "uid",
    ];
    const LISTING: ListingOptions = ListingOptions {
        id_field: "id",
        table: "definition",
        search_required: Some("you must specify at least one search parameter"),
        unlimited: false,
    };

    fn column_map() -> &'static ColumnMap {
        &COLUMNS
    }

    fn prepare(ctx: &mut QueryContext) -> Result<(), ApiError> {
        ctx.state.definition_expr = EXPR_PARAMS.iter().any(|p| ctx.has(p));
        Ok(())
    }

    fn select(ctx: &mut QueryContext) -> Result<(), ApiError> {
        ctx.select_cols(&COLUMNS, &COLS);

        if ctx.includes("uid") {
            ctx.ensure_join(Join::on_columns("langvar", "langvar.id", "definition.langvar"));
            ctx.select_col(&COLUMNS, "uid");
        }

        if !ctx.state.definition_expr {
            return Ok(());
        }

        join_denotations(ctx);
        ctx.select_cols(&COLUMNS, &["expr"]);

        for item in ["expr_langvar", "expr_uid", "expr_txt", "expr_txt_degr"] {
            if ctx.includes(item) {
                join_expr(ctx);
                if item == "expr_uid" {
                    ctx.ensure_join(Join::on_columns(
                        "langvar as langvar2",
                        "langvar2.id",
                        "expr.langvar",
                    ));
                }
                ctx.select_col(&COLUMNS, item);
            }
        }

        Ok(())
    }

    fn conditions(ctx: &mut QueryContext, counting: bool) -> Result<usize, ApiError> {
        let mut num_params = 0;

        let filters: [(&str, &str, super::Matcher); 6] = [
            ("id", "definition.id", matchers::id),
            ("meaning", "definition.meaning", matchers::id),
            ("langvar", "definition.langvar", matchers::id),
            ("uid", "definition.langvar", matchers::uid_langvar),
            ("txt", "definition.txt", matchers::txt_nfc),
            ("txt_degr", "definition.txt_degr", matchers::txt_degr),
        ];
        for (name, column, matcher) in filters {
            num_params += filter_param(ctx, name, column, matcher)? as usize;
        }

        if !ctx.state.definition_expr {
            return Ok(num_params);
        }

        if counting {
            join_denotations(ctx);
        }

        num_params += filter_param(ctx, "expr", "denotation.expr", matchers::id)? as usize;

        let expr_filters: [(&str, &str, super::Matcher); 4] = [
            ("expr_langvar", "expr.langvar", matchers::id),
            ("expr_uid", "expr.langvar", matchers::uid_langvar),
            ("expr_txt", "expr.txt", matchers::txt_nfc),
            ("expr_txt_degr", "expr.txt_degr", matchers::txt_degr),
        ];
        for (name, column, matcher) in expr_filters {
            if ctx.has(name) {
                join_expr(ctx);
                num_params += filter_param(ctx, name, column, matcher)? as usize;
            }
        }

        Ok(num_params)
    }
}

pub fn routes() -> Vec<Arc<Route>> {
    entity_routes::<Definition>(
        "/v2/definition",
        "/v2/definition/count",
        "/v2/definition/{id}",
    )
}
