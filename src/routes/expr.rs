//! Expression routes: `/v2/expr`, `/v2/expr/count`, `/v2/expr/index`,
//! `/v2/expr/{id}` and `/v2/expr/{langvar}/{txt}`.

use std::sync::Arc;

use async_trait::async_trait;
use lazy_static::lazy_static;
use serde_json::{Map, Value};

use super::{
    entity_routes, filter_param, lang_code_langvar_matcher, langvar, path_param, Entity,
};
use crate::catalog::{ColumnMap, ColumnOverride};
use crate::pagination::ListingOptions;
use crate::predicate::{matchers, validate};
use crate::query_builder::{
    Comparison, Join, OrderByOrder, Predicate, SelectQuery, SqlFragment, SqlValue, SqlWriter,
    ToSql,
};
use crate::server::errors::ApiError;
use crate::server::pipeline::{Execution, PathParams, Route, RouteHandler, RouteSpec, Work};
use crate::server::query_context::QueryContext;
use crate::server::AppState;
use crate::translation;

const COLS: [&str; 4] = ["id", "langvar", "txt", "txt_degr"];

lazy_static! {
    static ref COLUMNS: ColumnMap = ColumnMap::build(
        "expr",
        &COLS,
        &[
            ("expr_score", ColumnOverride::Expr("exprx.score")),
            ("trans_expr", ColumnOverride::Expr("denotationsrc.expr")),
            ("trans_langvar", ColumnOverride::Expr("denotationsrc.langvar")),
            ("trans_txt", ColumnOverride::Expr("exprsrc.txt")),
            ("trans_txt_degr", ColumnOverride::Expr("exprsrc.txt_degr")),
            (
                "trans_uid",
                ColumnOverride::Expr("uid(langvarsrc.lang_code,langvarsrc.var_code)"),
            ),
            ("trans_quality", ColumnOverride::Expr("trans_quality")),
            ("uid", ColumnOverride::Expr("uid(langvar.lang_code,langvar.var_code)")),
        ],
    );
}

/// Smallest accepted `/v2/expr/index` step.
const INDEX_STEP_MIN: i64 = 250;

pub struct Expr;

impl Entity for Expr {
    const NAME: &'static str = "expr";
    const FROM: &'static str = "expr";
    const LABEL: &'static str = "expression";
    const ARRAY_PARAMS: &'static [&'static str] = &[
        "id",
        "interm1_grp",
        "interm1_expr_langvar",
        "interm1_expr_uid",
        "interm1_source",
        "lang_code",
        "langvar",
        "trans_expr",
        "trans_grp",
        "trans_langvar",
        "trans_source",
        "trans_txt",
        "trans_txt_degr",
        "trans_uid",
        "txt",
        "txt_degr",
        "uid",
    ];
    const LISTING: ListingOptions = ListingOptions {
        id_field: "id",
        table: "expr",
        search_required: Some(
            "you must specify at least one search parameter (other than \"mutable\" and \"interm1*\" parameters)",
        ),
        unlimited: false,
    };

    fn column_map() -> &'static ColumnMap {
        &COLUMNS
    }

    fn prepare(ctx: &mut QueryContext) -> Result<(), ApiError> {
        translation::parse_options(ctx)
    }

    fn select(ctx: &mut QueryContext) -> Result<(), ApiError> {
        ctx.select_cols(&COLUMNS, &COLS);

        let uid = ctx.includes("uid");
        if uid {
            ctx.ensure_join(Join::on_columns("langvar", "langvar.id", "expr.langvar"));
            ctx.select_col(&COLUMNS, "uid");
        }

        let score = ctx.includes("expr_score");
        if score {
            ctx.ensure_join(Join::on_columns("exprx", "expr.id", "exprx.id"));
            ctx.select_col(&COLUMNS, "expr_score");
        }

        if let Some(opts) = ctx.state.translation.clone() {
            translation::select_translation(ctx, &COLUMNS, &opts)?;
            if uid {
                ctx.group_by(&["langvar.lang_code", "langvar.var_code"]);
            }
            if score {
                ctx.group_by(&["exprx.score"]);
            }
        }
        Ok(())
    }

    fn conditions(ctx: &mut QueryContext, counting: bool) -> Result<usize, ApiError> {
        let mut num_params = 0;

        let filters: [(&str, &str, super::Matcher); 6] = [
            ("id", "expr.id", matchers::id),
            ("txt", "expr.txt", matchers::txt_nfc),
            ("txt_degr", "expr.txt_degr", matchers::txt_degr),
            ("langvar", "expr.langvar", matchers::id),
            ("uid", "expr.langvar", matchers::uid_langvar),
            ("lang_code", "expr.langvar", lang_code_langvar_matcher),
        ];
        for (name, column, matcher) in filters {
            if filter_param(ctx, name, column, matcher)? {
                num_params += 1;
            }
        }

        if let Some(range) = ctx.consume("range") {
            let range = validate::range(Some(&range), &["txt", "txt_degr"], ctx.limits.array_max)?;
            let column = COLUMNS
                .get(&range.column)
                .map(|def| def.sql_expr.clone())
                .unwrap_or_else(|| format!("expr.{}", range.column));
            let bound = |value: String| {
                let sql = if range.column == "txt_degr" { "txt_degr(?)" } else { "?" };
                SqlFragment::new(sql, vec![SqlValue::Text(value)])
            };
            let (lower, upper) = (bound(range.lower.clone()), bound(range.upper.clone()));
            ctx.filter(Predicate::compare(column.clone(), Comparison::AtLeast(lower)));
            ctx.filter(Predicate::compare(column, Comparison::AtMost(upper)));
            num_params += 1;
        }

        if let Some(mutable) = ctx.consume_bool("mutable")? {
            ctx.ensure_join(Join::on_columns("langvar", "langvar.id", "expr.langvar"));
            ctx.filter(Predicate::eq("langvar.mutable", SqlValue::Bool(mutable)));
        }

        if let Some(opts) = ctx.state.translation.clone() {
            num_params += translation::translation_conditions(ctx, &opts, counting, num_params)?;
        }

        Ok(num_params)
    }
}

/// `/v2/expr/{langvar}/{txt}`: one expression by its variety and exact text.
pub struct ExprByLangvarTxt;

#[async_trait]
impl RouteHandler for ExprByLangvarTxt {
    async fn handle(
        &self,
        ctx: &mut QueryContext,
        path: &PathParams,
        app: &AppState,
    ) -> Result<Execution, ApiError> {
        let langvar_key = path_param(path, "id")?;
        let txt = path_param(path, "txt")?;

        let langvar = langvar::load(ctx, app, langvar_key).await?;
        let langvar_id = langvar
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ApiError::invalid("the language variety \"id\" cannot be excluded here"))?;
        ctx.set_response("langvar", langvar);

        Expr::start_query(ctx);
        Expr::select(ctx)?;
        ctx.filter(Predicate::eq("expr.langvar", SqlValue::Int(langvar_id)));
        ctx.filter(Predicate::eq("expr.txt", SqlValue::Text(txt.to_string())));

        Ok(Execution::Single {
            key: "expr",
            not_found: format!(
                "expression \"{}\" in variety {} was not found",
                txt, langvar_key
            ),
        })
    }
}

/// `/v2/expr/index`: `txt_degr` boundaries every `step` expressions, as
/// `[first, last]` pairs.
pub struct ExprIndex;

impl ExprIndex {
    fn build(ctx: &mut QueryContext) -> Result<SelectQueryPair, ApiError> {
        let step = ctx.consume("step").ok_or_else(|| {
            ApiError::MissingParameter("the parameter \"step\" is required".to_string())
        })?;
        let step = validate::positive_integer(&step, "step")?;
        if step < INDEX_STEP_MIN {
            return Err(ApiError::invalid(format!(
                "the parameter \"step\" must be {} or higher",
                INDEX_STEP_MIN
            )));
        }

        let mut base = SelectQuery::from("expr");
        for col in COLS {
            base.push_select(SqlFragment::raw(col));
        }
        if let Some(values) = ctx.consume_array("langvar")? {
            base.push_filter(Predicate::compare("expr.langvar", matchers::id(&values, "langvar")?));
        }
        if let Some(values) = ctx.consume_array("uid")? {
            base.push_filter(Predicate::compare(
                "expr.langvar",
                matchers::uid_langvar(&values, "uid")?,
            ));
        }

        let numbered = base
            .clone()
            .select_raw("row_number() over (ORDER BY expr.txt_degr) as num")
            .order_by("expr.txt_degr", OrderByOrder::Asc);
        let boundaries = SelectQuery::from_subquery(numbered, "a")
            .select_raw("id, langvar, txt, txt_degr")
            .filter(Predicate::Or(vec![
                Predicate::Raw(SqlFragment::raw("a.num = 1")),
                Predicate::Raw(SqlFragment::new(
                    "mod(a.num-1, ?) = 0",
                    vec![SqlValue::Int(step)],
                )),
                Predicate::Raw(SqlFragment::new("mod(a.num, ?) = 0", vec![SqlValue::Int(step)])),
            ]));
        let last = base.order_by("txt_degr", OrderByOrder::Desc).limit(1);

        Ok(SelectQueryPair { boundaries, last })
    }
}

/// `<boundaries> union all (<last>)`
#[derive(Debug)]
struct SelectQueryPair {
    boundaries: SelectQuery,
    last: SelectQuery,
}

impl ToSql for SelectQueryPair {
    fn write_sql(&self, out: &mut SqlWriter) {
        self.boundaries.write_sql(out);
        out.push_str(" union all (");
        self.last.write_sql(out);
        out.push_str(")");
    }
}

/// Pair consecutive rows, dropping an unpaired last row.
fn index_pairs(mut rows: Vec<Value>) -> Vec<Value> {
    if rows.len() % 2 == 1 {
        rows.pop();
    }
    rows.chunks(2)
        .map(|pair| Value::Array(pair.to_vec()))
        .collect()
}

#[async_trait]
impl RouteHandler for ExprIndex {
    async fn handle(
        &self,
        ctx: &mut QueryContext,
        _path: &PathParams,
        _app: &AppState,
    ) -> Result<Execution, ApiError> {
        let query = Self::build(ctx)?;
        ctx.state.json_indent = false;

        let mut out = SqlWriter::new();
        query.write_sql(&mut out);

        Ok(Execution::Deferred {
            work: Work::Query(out.finish()),
            finish: Box::new(|rows, response: &mut Map<String, Value>| {
                response.insert("index".to_string(), Value::Array(index_pairs(rows)));
                Ok(())
            }),
        })
    }
}

pub fn routes() -> Vec<Arc<Route>> {
    let mut routes = entity_routes::<Expr>("/v2/expr", "/v2/expr/count", "/v2/expr/{id}");
    routes.push(Route::new(
        RouteSpec {
            path: "/v2/expr/index",
            array_params: &["langvar", "uid"],
            cacheable: true,
        },
        ExprIndex,
    ));
    routes.push(Route::new(
        RouteSpec {
            path: "/v2/expr/{id}/{txt}",
            array_params: &[],
            cacheable: true,
        },
        ExprByLangvarTxt,
    ));
    routes
}
