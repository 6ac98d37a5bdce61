//! Normalization scoring: how well attested each candidate text is in a
//! language variety, either exactly or after degradation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use unicode_normalization::UnicodeNormalization;

use super::{dedup, langvar, path_param};
use crate::predicate::{matchers, validate};
use crate::query_builder::{
    CompiledQuery, Join, OrderByOrder, Predicate, SelectQuery, SqlFragment, SqlValue,
};
use crate::server::errors::ApiError;
use crate::server::pipeline::{Execution, Finish, PathParams, Route, RouteHandler, RouteSpec, Work};
use crate::server::query_context::QueryContext;
use crate::server::storage::TempTableJob;
use crate::server::AppState;

const ARRAY_PARAMS: &[&str] = &["grp", "txt"];

/// Table whose texts are scored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormTarget {
    Expr,
    Definition,
}

impl NormTarget {
    fn table(self) -> &'static str {
        match self {
            NormTarget::Expr => "expr",
            NormTarget::Definition => "definition",
        }
    }

    /// Join the relation carrying `grp` and `quality`; returns its name.
    fn join_source(self, query: SelectQuery) -> (SelectQuery, &'static str) {
        match self {
            NormTarget::Expr => (
                query.join(Join::on_columns("denotationx", "denotationx.expr", "expr.id")),
                "denotationx",
            ),
            NormTarget::Definition => (
                query
                    .join(Join::on_columns("meaning", "meaning.id", "definition.meaning"))
                    .join(Join::on_columns("source", "source.id", "meaning.source")),
                "source",
            ),
        }
    }
}

#[derive(Debug)]
struct NormRequest {
    txt: Vec<String>,
    grp: Vec<Value>,
    degrade: bool,
}

fn parse_request(ctx: &mut QueryContext) -> Result<NormRequest, ApiError> {
    let txt = ctx.consume("txt").ok_or_else(|| {
        ApiError::MissingParameter("the parameter \"txt\" is required".to_string())
    })?;
    let items = validate::array(Some(&txt), "txt", ctx.limits.array_max)?;
    let mut txt = Vec::with_capacity(items.len());
    for item in dedup(items.to_vec()) {
        txt.push(validate::string(&item, "txt", true, true)?.to_string());
    }

    let grp = ctx.consume_array("grp")?.unwrap_or_default();
    let degrade = ctx.consume_bool("degrade")?.unwrap_or(false);

    Ok(NormRequest { txt, grp, degrade })
}

fn statement(sql: &str, params: Vec<SqlValue>) -> CompiledQuery {
    CompiledQuery::from_fragment(&SqlFragment::new(sql, params))
}

fn build_job(
    target: NormTarget,
    langvar_id: i64,
    req: &NormRequest,
) -> Result<TempTableJob, ApiError> {
    let table = target.table();
    let nfc: Vec<String> = req.txt.iter().map(|t| t.nfc().collect()).collect();

    let mut statements = Vec::new();
    if req.degrade {
        statements.push(statement(
            "CREATE TEMP TABLE tmp_norm (txt_orig text, txt text, txt_degr text) ON COMMIT DROP",
            vec![],
        ));
    } else {
        statements.push(statement(
            "CREATE TEMP TABLE tmp_norm (txt_orig text, txt text) ON COMMIT DROP",
            vec![],
        ));
    }
    statements.push(statement(
        "INSERT INTO tmp_norm (txt_orig, txt) SELECT * FROM unnest(?::text[], ?::text[])",
        vec![SqlValue::TextArray(req.txt.clone()), SqlValue::TextArray(nfc)],
    ));
    if req.degrade {
        statements.push(statement("UPDATE tmp_norm SET txt_degr = txt_degr(txt)", vec![]));
    }

    let col = if req.degrade { "txt_degr" } else { "txt" };
    let query = SelectQuery::from("tmp_norm")
        .select_raw("tmp_norm.txt_orig")
        .join(Join::on_columns(
            table,
            &format!("{}.{}", table, col),
            &format!("tmp_norm.{}", col),
        ))
        .filter(Predicate::eq(format!("{}.langvar", table), SqlValue::Int(langvar_id)));
    let (mut query, source) = target.join_source(query);

    if !req.grp.is_empty() {
        query.push_filter(Predicate::compare(
            format!("{}.grp", source),
            matchers::not_id(&req.grp, "grp")?,
        ));
    }

    query.push_select(SqlFragment::raw(format!(
        "grp_quality_score(array_agg({s}.grp), array_agg({s}.quality)) as score",
        s = source
    )));
    query = query.group_by("tmp_norm.txt_orig");

    if req.degrade {
        query.push_select(SqlFragment::raw(format!("{}.txt", table)));
        query = query
            .group_by(&format!("{}.txt", table))
            .group_by(&format!("{}.txt_degr", table))
            .order_by("score", OrderByOrder::Desc)
            .order_by(&format!("{}.txt", table), OrderByOrder::Asc);
    }

    Ok(TempTableJob {
        statements,
        query: query.compile(),
    })
}

fn row_text<'a>(row: &'a Value, key: &str) -> Result<&'a str, ApiError> {
    row.get(key)
        .and_then(Value::as_str)
        .ok_or_else(|| ApiError::Internal(format!("normalization row without {}", key)))
}

/// `{ txt: { score } }`, with unattested texts scored 0.
fn exact_scores(txt: &[String], rows: Vec<Value>) -> Result<Map<String, Value>, ApiError> {
    let mut result = Map::new();
    for row in &rows {
        result.insert(
            row_text(row, "txt_orig")?.to_string(),
            json!({ "score": row.get("score").cloned().unwrap_or(Value::Null) }),
        );
    }
    for item in txt {
        if !result.contains_key(item) {
            result.insert(item.clone(), json!({ "score": 0 }));
        }
    }
    Ok(result)
}

/// `{ txt: [{ score, txt }] }`, best match first; unattested texts get one
/// `{ score: 0, txt: null }` entry.
fn degraded_scores(txt: &[String], rows: Vec<Value>) -> Result<Map<String, Value>, ApiError> {
    let mut result: Map<String, Value> = txt
        .iter()
        .map(|item| (item.clone(), Value::Array(Vec::new())))
        .collect();
    for row in &rows {
        let orig = row_text(row, "txt_orig")?;
        if let Some(Value::Array(matches)) = result.get_mut(orig) {
            matches.push(json!({
                "score": row.get("score").cloned().unwrap_or(Value::Null),
                "txt": row.get("txt").cloned().unwrap_or(Value::Null),
            }));
        }
    }
    for matches in result.values_mut() {
        if let Value::Array(items) = matches {
            if items.is_empty() {
                items.push(json!({ "score": 0, "txt": null }));
            }
        }
    }
    Ok(result)
}

pub struct Norm(pub NormTarget);

#[async_trait]
impl RouteHandler for Norm {
    async fn handle(
        &self,
        ctx: &mut QueryContext,
        path: &PathParams,
        app: &AppState,
    ) -> Result<Execution, ApiError> {
        let langvar = langvar::load(ctx, app, path_param(path, "langvar")?).await?;
        let langvar_id = langvar
            .get("id")
            .and_then(Value::as_i64)
            .ok_or_else(|| ApiError::Internal("language variety row without id".to_string()))?;
        ctx.set_response("langvar", langvar);

        let req = parse_request(ctx)?;
        let job = build_job(self.0, langvar_id, &req)?;

        let finish: Finish = Box::new(move |rows, response: &mut Map<String, Value>| {
            let norm = if req.degrade {
                degraded_scores(&req.txt, rows)?
            } else {
                exact_scores(&req.txt, rows)?
            };
            response.insert("norm".to_string(), Value::Object(norm));
            Ok(())
        });

        Ok(Execution::Deferred {
            work: Work::Transaction(job),
            finish,
        })
    }
}

pub fn routes() -> Vec<Arc<Route>> {
    vec![
        Route::new(
            RouteSpec {
                path: "/v2/norm/expr/{langvar}",
                array_params: ARRAY_PARAMS,
                cacheable: true,
            },
            Norm(NormTarget::Expr),
        ),
        Route::new(
            RouteSpec {
                path: "/v2/norm/definition/{langvar}",
                array_params: ARRAY_PARAMS,
                cacheable: true,
            },
            Norm(NormTarget::Definition),
        ),
    ]
}
