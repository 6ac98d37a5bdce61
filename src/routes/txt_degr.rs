//! Batch degradation of arbitrary strings with the database's `txt_degr`.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Map, Value};

use super::dedup;
use crate::predicate::validate;
use crate::query_builder::{CompiledQuery, SqlFragment, SqlValue};
use crate::server::errors::ApiError;
use crate::server::pipeline::{Execution, PathParams, Route, RouteHandler, RouteSpec, Work};
use crate::server::query_context::QueryContext;
use crate::server::storage::TempTableJob;
use crate::server::AppState;

pub struct TxtDegr;

fn parse_txt(ctx: &mut QueryContext) -> Result<Vec<String>, ApiError> {
    let txt = ctx.consume("txt").ok_or_else(|| {
        ApiError::MissingParameter("the parameter \"txt\" is required".to_string())
    })?;
    let items = validate::array(Some(&txt), "txt", ctx.limits.array_max)?;
    dedup(items.to_vec())
        .iter()
        .map(|item| validate::string(item, "txt", true, true).map(str::to_string))
        .collect()
}

fn build_job(txt: Vec<String>) -> TempTableJob {
    let statement = |sql: &str, params: Vec<SqlValue>| CompiledQuery::from_fragment(&SqlFragment::new(sql, params));
    TempTableJob {
        statements: vec![
            statement(
                "CREATE TEMP TABLE tmp_txt_degr (txt text, txt_degr text) ON COMMIT DROP",
                vec![],
            ),
            statement(
                "INSERT INTO tmp_txt_degr (txt) SELECT * FROM unnest(?::text[])",
                vec![SqlValue::TextArray(txt)],
            ),
            statement("UPDATE tmp_txt_degr SET txt_degr = txt_degr(txt)", vec![]),
        ],
        query: statement("SELECT txt, txt_degr FROM tmp_txt_degr", vec![]),
    }
}

/// `{ txt: txt_degr }`
fn degradation_map(rows: Vec<Value>) -> Map<String, Value> {
    rows.into_iter()
        .filter_map(|row| {
            let txt = row.get("txt")?.as_str()?.to_string();
            Some((txt, row.get("txt_degr").cloned().unwrap_or(Value::Null)))
        })
        .collect()
}

#[async_trait]
impl RouteHandler for TxtDegr {
    async fn handle(
        &self,
        ctx: &mut QueryContext,
        _path: &PathParams,
        _app: &AppState,
    ) -> Result<Execution, ApiError> {
        let txt = parse_txt(ctx)?;
        Ok(Execution::Deferred {
            work: Work::Transaction(build_job(txt)),
            finish: Box::new(|rows, response: &mut Map<String, Value>| {
                response.insert("txt_degr".to_string(), Value::Object(degradation_map(rows)));
                Ok(())
            }),
        })
    }
}

pub fn routes() -> Vec<Arc<Route>> {
    vec![Route::new(
        RouteSpec {
            path: "/v2/txt_degr",
            array_params: &["txt"],
            cacheable: true,
        },
        TxtDegr,
    )]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::tests::ctx;
    use serde_json::json;

    #[test]
    fn test_parse_txt() {
        let mut c = ctx(json!({ "txt": ["b", "a", "b"] }));
        assert_eq!(parse_txt(&mut c).unwrap(), vec!["b", "a"]);

        let mut c = ctx(json!({ "txt": [1] }));
        assert!(parse_txt(&mut c).is_err());

        let mut c = ctx(json!({}));
        assert!(matches!(
            parse_txt(&mut c).unwrap_err(),
            ApiError::MissingParameter(_)
        ));
    }

    #[test]
    fn test_job_statements() {
        let job = build_job(vec!["Ab".to_string()]);
        assert_eq!(
            job.statements[1].sql,
            "INSERT INTO tmp_txt_degr (txt) SELECT * FROM unnest($1::text[])"
        );
        assert_eq!(
            job.statements[1].params,
            vec![SqlValue::TextArray(vec!["Ab".to_string()])]
        );
        assert!(job.query.params.is_empty());
    }

    #[test]
    fn test_degradation_map() {
        let rows = vec![
            json!({ "txt": "Ab", "txt_degr": "ab" }),
            json!({ "txt": "C", "txt_degr": "c" }),
        ];
        assert_eq!(
            Value::Object(degradation_map(rows)),
            json!({ "Ab": "ab", "C": "c" })
        );
    }
}
