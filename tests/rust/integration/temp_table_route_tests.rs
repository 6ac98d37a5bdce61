use std::sync::Arc;

use axum::http::StatusCode;
use lexiquery::query_builder::SqlValue;
use serde_json::json;

use super::common::{app_with, body_json, get_json, post_json, RecordingExecutor};

fn norm_executor() -> RecordingExecutor {
    RecordingExecutor::new()
        .respond(
            "from tmp_norm",
            vec![json!({ "txt_orig": "dog", "score": 42 })],
        )
        .respond(
            "from langvar",
            vec![json!({ "id": 187, "lang_code": "eng", "var_code": 0, "uid": "eng-000" })],
        )
}

#[tokio::test]
async fn test_norm_expr_scores_each_text() {
    let executor = Arc::new(norm_executor());
    let app = app_with(executor.clone());

    let (status, body) = get_json(&app, "/v2/norm/expr/eng-000?txt=dog&txt=zzyzx").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["langvar"]["id"], 187);
    assert_eq!(
        body["norm"],
        json!({ "dog": { "score": 42 }, "zzyzx": { "score": 0 } })
    );

    let jobs = executor.jobs.lock().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(
        jobs[0].statements[1].params[0],
        SqlValue::TextArray(vec!["dog".to_string(), "zzyzx".to_string()])
    );
    assert!(jobs[0].query.sql.contains("where expr.langvar = $1"));
    assert_eq!(jobs[0].query.params, vec![SqlValue::Int(187)]);
}

#[tokio::test]
async fn test_norm_definition_with_degrade() {
    let executor = Arc::new(
        RecordingExecutor::new()
            .respond(
                "from tmp_norm",
                vec![
                    json!({ "txt_orig": "cat", "score": 7, "txt": "Cat" }),
                    json!({ "txt_orig": "cat", "score": 3, "txt": "cat" }),
                ],
            )
            .respond("from langvar", vec![json!({ "id": 5 })]),
    );
    let app = app_with(executor.clone());

    let response = post_json(
        &app,
        "/v2/norm/definition/5",
        json!({ "txt": ["cat"], "degrade": true, "grp": [2] }),
    )
    .await;
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(
        body["norm"],
        json!({ "cat": [{ "score": 7, "txt": "Cat" }, { "score": 3, "txt": "cat" }] })
    );

    let jobs = executor.jobs.lock().unwrap();
    assert_eq!(jobs[0].statements.len(), 3);
    assert!(jobs[0].query.sql.contains("source.grp != $2"));
}

#[tokio::test]
async fn test_norm_unknown_langvar_is_404() {
    let app = app_with(Arc::new(RecordingExecutor::new()));

    let (status, body) = get_json(&app, "/v2/norm/expr/xyz-999?txt=dog").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["message"], "language variety xyz-999 was not found");
}

#[tokio::test]
async fn test_norm_requires_txt() {
    let app = app_with(Arc::new(norm_executor()));

    let (status, body) = get_json(&app, "/v2/norm/expr/187").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MissingParameter");
}

#[tokio::test]
async fn test_txt_degr_maps_each_text() {
    let executor = Arc::new(RecordingExecutor::new().respond(
        "FROM tmp_txt_degr",
        vec![
            json!({ "txt": "Ab", "txt_degr": "ab" }),
            json!({ "txt": "C-d", "txt_degr": "cd" }),
        ],
    ));
    let app = app_with(executor.clone());

    let response = post_json(&app, "/v2/txt_degr", json!({ "txt": ["Ab", "C-d", "Ab"] })).await;
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        body_json(response).await,
        json!({ "txt_degr": { "Ab": "ab", "C-d": "cd" } })
    );

    let jobs = executor.jobs.lock().unwrap();
    assert_eq!(
        jobs[0].statements[1].params,
        vec![SqlValue::TextArray(vec!["Ab".to_string(), "C-d".to_string()])]
    );
    assert_eq!(executor.query_count(), 0);
}
