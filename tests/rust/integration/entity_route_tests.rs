use std::sync::Arc;

use axum::http::StatusCode;
use lexiquery::query_builder::SqlValue;
use serde_json::json;

use super::common::{app_with, body_json, get_json, post_json, RecordingExecutor};

#[tokio::test]
async fn test_langvar_listing_envelope() {
    let executor = Arc::new(
        RecordingExecutor::new().respond("from langvar", vec![json!({ "id": 187, "uid": "eng-000" })]),
    );
    let app = app_with(executor.clone());

    let (status, body) = get_json(&app, "/v2/langvar?uid=eng-000").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "resultType": "langvar",
            "result": [{ "id": 187, "uid": "eng-000" }],
            "resultNum": 1,
            "resultMax": 2000
        })
    );

    let query = executor.last_query();
    assert!(query
        .sql
        .contains("where uid(langvar.lang_code,langvar.var_code) = $1 order by langvar.id asc limit 2000"));
    assert_eq!(query.params, vec![SqlValue::Text("eng-000".to_string())]);
}

#[tokio::test]
async fn test_repeated_query_keys_form_an_array() {
    let executor = Arc::new(RecordingExecutor::new());
    let app = app_with(executor.clone());

    let (status, _) = get_json(&app, "/v2/denotation?expr=3&expr=4").await;
    assert_eq!(status, StatusCode::OK);
    let query = executor.last_query();
    assert!(query.sql.contains("where denotation.expr = any($1)"));
    assert_eq!(query.params, vec![SqlValue::IntArray(vec![3, 4])]);
}

#[tokio::test]
async fn test_count_from_post_body() {
    let executor = Arc::new(
        RecordingExecutor::new().respond("count(*) as count", vec![json!({ "count": 5 })]),
    );
    let app = app_with(executor.clone());

    let response = post_json(&app, "/v2/expr/count", json!({ "langvar": [187] })).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(body_json(response).await, json!({ "count": 5, "countType": "expr" }));
    assert_eq!(
        executor.last_query().sql,
        "select count(*) as count from (select expr.id from expr where expr.langvar = $1) as s"
    );
}

#[tokio::test]
async fn test_by_id_not_found() {
    let app = app_with(Arc::new(RecordingExecutor::new()));

    let (status, body) = get_json(&app, "/v2/denotation/9").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body,
        json!({ "code": "ResourceNotFound", "message": "denotation 9 was not found" })
    );
}

#[tokio::test]
async fn test_by_id_requires_numeric_id() {
    let executor = Arc::new(RecordingExecutor::new());
    let app = app_with(executor.clone());

    let (status, body) = get_json(&app, "/v2/meaning/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "InvalidArgument");
    assert_eq!(body["message"], "the meaning must be specified as a numeric id");
    assert_eq!(executor.query_count(), 0);
}

#[tokio::test]
async fn test_source_by_label_is_transformed() {
    let executor = Arc::new(RecordingExecutor::new().respond(
        "from source",
        vec![json!({ "id": 1, "label": "eng:Dictionary", "license": "gp" })],
    ));
    let app = app_with(executor.clone());

    let (status, body) = get_json(&app, "/v2/source/eng:Dictionary").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["source"]["license"], "GNU General Public License");

    let query = executor.last_query();
    assert!(query.sql.ends_with("where source.label = $1 limit 1"));
    assert_eq!(query.params, vec![SqlValue::Text("eng:Dictionary".to_string())]);
}

#[tokio::test]
async fn test_langvar_by_uniform_identifier() {
    let executor = Arc::new(
        RecordingExecutor::new().respond("from langvar", vec![json!({ "id": 187 })]),
    );
    let app = app_with(executor.clone());

    let (status, body) = get_json(&app, "/v2/langvar/eng-000").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "langvar": { "id": 187 } }));

    let query = executor.last_query();
    assert!(query
        .sql
        .ends_with("where (langvar.lang_code = $1 and langvar.var_code = $2) limit 1"));
    assert_eq!(
        query.params,
        vec![SqlValue::Text("eng".to_string()), SqlValue::Int(0)]
    );
}

#[tokio::test]
async fn test_expr_by_langvar_and_txt() {
    let executor = Arc::new(
        RecordingExecutor::new()
            .respond("from langvar", vec![json!({ "id": 187, "uid": "eng-000" })])
            .respond("from expr", vec![json!({ "id": 42, "txt": "dog" })]),
    );
    let app = app_with(executor.clone());

    let (status, body) = get_json(&app, "/v2/expr/eng-000/dog").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body,
        json!({
            "langvar": { "id": 187, "uid": "eng-000" },
            "expr": { "id": 42, "txt": "dog" }
        })
    );

    let query = executor.last_query();
    assert!(query
        .sql
        .ends_with("from expr where expr.langvar = $1 and expr.txt = $2 limit 1"));
    assert_eq!(
        query.params,
        vec![SqlValue::Int(187), SqlValue::Text("dog".to_string())]
    );
}

#[tokio::test]
async fn test_expr_by_langvar_and_txt_not_found() {
    let executor = Arc::new(
        RecordingExecutor::new().respond("from langvar", vec![json!({ "id": 187 })]),
    );
    let app = app_with(executor);

    let (status, body) = get_json(&app, "/v2/expr/eng-000/zzz").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "expression \"zzz\" in variety eng-000 was not found");
}

#[tokio::test]
async fn test_expr_offset_requires_search_parameter() {
    let app = app_with(Arc::new(RecordingExecutor::new()));

    let (status, body) = get_json(&app, "/v2/expr?offset=10").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MissingParameter");
}

#[tokio::test]
async fn test_excluded_field_cannot_be_sorted() {
    let executor = Arc::new(RecordingExecutor::new());
    let app = app_with(executor.clone());

    let (status, body) = get_json(&app, "/v2/expr?langvar=187&exclude=txt&sort=txt").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "the field \"txt\" is not a valid field to sort by: you may need to pass it under \"include\""
    );
    assert_eq!(executor.query_count(), 0);
}

#[tokio::test]
async fn test_expr_index_pairs() {
    let executor = Arc::new(RecordingExecutor::new().respond(
        "union all",
        vec![
            json!({ "txt_degr": "a" }),
            json!({ "txt_degr": "m" }),
            json!({ "txt_degr": "n" }),
            json!({ "txt_degr": "z" }),
        ],
    ));
    let app = app_with(executor);

    let (status, body) = get_json(&app, "/v2/expr/index?step=250&langvar=187").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["index"].as_array().map(Vec::len), Some(2));
}

#[tokio::test]
async fn test_langvar_pair_accepts_flat_and_nested_pairs() {
    let executor = Arc::new(RecordingExecutor::new().respond(
        "langvar_pair_match",
        vec![json!({ "langvar1": 187, "langvar2": 666, "max_quality_d1": 9, "max_quality_d2": 8 })],
    ));
    let app = app_with(executor.clone());

    let (status, body) = get_json(&app, "/v2/langvar_pair?ids=187&ids=666").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["resultType"], "langvar_pair");
    assert_eq!(body["resultNum"], 1);
    assert_eq!(
        executor.last_query().params[0],
        SqlValue::TextArray(vec!["(187,666)".to_string()])
    );

    let response = post_json(
        &app,
        "/v2/langvar_pair",
        json!({ "uids": [["eng-000", "spa-000"], ["fra-000", "deu-000"]] }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        executor.last_query().params[1],
        SqlValue::TextArray(vec!["(eng-000,spa-000)".to_string(), "(fra-000,deu-000)".to_string()])
    );

    let (status, body) = get_json(&app, "/v2/langvar_pair").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        "you must pass at least one langvar pair under \"ids\" or \"uids\""
    );
}
