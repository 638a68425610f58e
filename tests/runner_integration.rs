use std::io::Write;
use std::sync::Arc;

use axum::http::{header, HeaderMap};
use axum::routing::{get, post};
use axum::{Json, Router};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde_json::{json, Value};

use hrp::{
    new_step, FuncRegistry, HrpRunner, Stat, StepData, TConfig, TestCase, VariablesMap,
};

fn fixture_app() -> Router {
    async fn user() -> Json<Value> {
        Json(json!({"id": 42}))
    }

    async fn login() -> Json<Value> {
        Json(json!({"token": "T", "tmp": "X"}))
    }

    async fn echo(headers: HeaderMap, body: String) -> Json<Value> {
        let header_str = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .unwrap_or("")
                .to_string()
        };
        Json(json!({
            "content_type": header_str("content-type"),
            "content_length": header_str("content-length"),
            "body": body,
        }))
    }

    async fn gzipped() -> impl axum::response::IntoResponse {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(br#"{"ok":true}"#).unwrap();
        let compressed = encoder.finish().unwrap();
        (
            [
                (header::CONTENT_ENCODING, "gzip"),
                (header::CONTENT_TYPE, "application/json"),
            ],
            compressed,
        )
    }

    Router::new()
        .route("/u/1", get(user))
        .route("/login", get(login))
        .route("/echo", post(echo))
        .route("/gzip", get(gzipped))
}

async fn spawn_fixture() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, fixture_app()).await.unwrap();
    });
    format!("http://{}", addr)
}

fn vars(pairs: &[(&str, Value)]) -> VariablesMap {
    let mut map = VariablesMap::new();
    for (k, v) in pairs {
        map.insert(k.to_string(), v.clone());
    }
    map
}

#[tokio::test]
async fn simple_get_with_extraction_and_validation() {
    let base = spawn_fixture().await;
    let case = TestCase::new(TConfig::new("simple get").with_base_url(&base)).with_steps(vec![
        new_step("get user")
            .get("/u/1")
            .extract()
            .with_jmes_path("body.id", "uid")
            .validate()
            .assert_equal("status_code", 200, "")
            .into(),
    ]);

    let runner = HrpRunner::new().unwrap();
    let summary = runner.run_test_case(&case).await.unwrap();

    assert!(summary.success);
    assert_eq!(summary.stat, Stat { total: 1, successes: 1, failures: 0 });
    let record = &summary.records[0];
    assert!(record.success);
    assert_eq!(record.export_vars["uid"], json!(42));

    let Some(StepData::Session(session)) = &record.data else {
        panic!("expected session data");
    };
    assert!(session.success);
    assert_eq!(session.validators.len(), 1);
    assert!(session.validators[0].passed);
    assert_eq!(session.validators[0].actual, json!(200));
}

#[tokio::test]
async fn form_post_encodes_body() {
    let base = spawn_fixture().await;
    let case = TestCase::new(TConfig::new("form post").with_base_url(&base)).with_steps(vec![
        new_step("submit")
            .post("/echo")
            .with_headers(
                [("Content-Type".to_string(), "application/x-www-form-urlencoded".to_string())]
                    .into_iter()
                    .collect(),
            )
            .with_body(json!({"a": "1", "b": "2"}))
            .validate()
            .assert_equal("body.body", "a=1&b=2", "wire body")
            .assert_equal("body.content_length", "7", "content length")
            .into(),
    ]);

    let runner = HrpRunner::new().unwrap();
    let summary = runner.run_test_case(&case).await.unwrap();
    assert!(summary.success, "{:?}", summary.records[0].attachment);
}

#[tokio::test]
async fn json_body_defaults_content_type() {
    let base = spawn_fixture().await;
    let case = TestCase::new(TConfig::new("json default").with_base_url(&base)).with_steps(vec![
        new_step("post list")
            .post("/echo")
            .with_body(json!([1, 2, 3]))
            .validate()
            .assert_equal("body.content_type", "application/json; charset=utf-8", "")
            .assert_equal("body.body", "[1,2,3]", "")
            .into(),
    ]);

    let runner = HrpRunner::new().unwrap();
    let summary = runner.run_test_case(&case).await.unwrap();
    assert!(summary.success, "{:?}", summary.records[0].attachment);
}

#[tokio::test]
async fn hook_assignment_overrides_scope_and_persists() {
    let base = spawn_fixture().await;

    let mut registry = FuncRegistry::new();
    registry.register("three", |_| Ok(json!(3)));

    // case var x=1, step var x=2, setup hook binds x=3
    let case = TestCase::new(
        TConfig::new("precedence")
            .with_base_url(&base)
            .with_variables(vars(&[("x", json!(1))])),
    )
    .with_steps(vec![
        new_step("first")
            .with_variables(vars(&[("x", json!(2))]))
            .setup_hook("x=${three()}")
            .get("/u/1")
            .validate()
            .assert_equal("${x}", 3, "hook wins within the step")
            .into(),
        new_step("second")
            .get("/u/1")
            .validate()
            .assert_equal("${x}", 3, "session keeps the hook value")
            .into(),
    ]);

    let mut runner = HrpRunner::new().unwrap();
    runner.set_plugin(Arc::new(registry));
    let summary = runner.run_test_case(&case).await.unwrap();
    assert!(summary.success, "{:?}", summary.records);
    assert_eq!(summary.records[0].export_vars["x"], json!(3));
}

#[tokio::test]
async fn sub_testcase_exports_named_subset() {
    let base = spawn_fixture().await;

    let child = TestCase::new(TConfig::new("login case").with_base_url(&base)).with_steps(vec![
        new_step("login")
            .get("/login")
            .extract()
            .with_jmes_path("body.token", "token")
            .with_jmes_path("body.tmp", "tmp")
            .validate()
            .assert_equal("status_code", 200, "")
            .into(),
    ]);

    let parent = TestCase::new(TConfig::new("parent").with_base_url(&base)).with_steps(vec![
        new_step("auth")
            .call_ref_case(&child)
            .unwrap()
            .export(&["token"])
            .into(),
        new_step("use token")
            .get("/u/1")
            .validate()
            .assert_equal("${token}", "T", "exported token visible")
            .into(),
    ]);

    let runner = HrpRunner::new().unwrap();
    let summary = runner.run_test_case(&parent).await.unwrap();
    assert!(summary.success, "{:?}", summary.records);
    // child's record plus the parent's own request; the container is not a record
    assert_eq!(summary.stat, Stat { total: 2, successes: 2, failures: 0 });
    assert_eq!(summary.records.len(), 2);

    // tmp was in the child scope but not in the export list
    let leak_check = TestCase::new(TConfig::new("leak").with_base_url(&base)).with_steps(vec![
        new_step("auth").call_ref_case(&child).unwrap().export(&["token"]).into(),
        new_step("tmp must not leak")
            .get("/u/1")
            .validate()
            .assert_equal("${tmp}", "X", "")
            .into(),
    ]);
    let summary = runner.run_test_case(&leak_check).await.unwrap();
    assert!(!summary.success);
    let failing = summary.records.last().unwrap();
    assert!(failing.attachment.contains("variable not found"));
}

#[tokio::test]
async fn sub_testcase_failure_marks_parent_and_continues() {
    let base = spawn_fixture().await;

    let child = TestCase::new(TConfig::new("failing child").with_base_url(&base)).with_steps(vec![
        new_step("bad check")
            .get("/u/1")
            .validate()
            .assert_equal("body.id", 7, "")
            .into(),
    ]);

    let parent = TestCase::new(TConfig::new("parent").with_base_url(&base)).with_steps(vec![
        new_step("child").call_ref_case(&child).unwrap().into(),
        new_step("after").get("/u/1").validate().assert_equal("status_code", 200, "").into(),
    ]);

    let runner = HrpRunner::new().unwrap();
    let summary = runner.run_test_case(&parent).await.unwrap();
    assert!(!summary.success);
    // both the child's failing record and the parent's follow-up ran
    assert_eq!(summary.stat, Stat { total: 2, successes: 1, failures: 1 });
}

#[tokio::test]
async fn gzip_response_is_decoded_and_length_unknown() {
    let base = spawn_fixture().await;
    let case = TestCase::new(TConfig::new("gzip").with_base_url(&base)).with_steps(vec![
        new_step("fetch gzip")
            .get("/gzip")
            .extract()
            .with_jmes_path("body.ok", "ok")
            .validate()
            .assert_equal("${ok}", true, "")
            .into(),
    ]);

    let runner = HrpRunner::new().unwrap();
    let summary = runner.run_test_case(&case).await.unwrap();
    assert!(summary.success, "{:?}", summary.records[0].attachment);
    let record = &summary.records[0];
    assert_eq!(record.export_vars["ok"], json!(true));
    assert_eq!(record.content_size, -1);
}

#[tokio::test]
async fn failing_step_continues_unless_fail_fast() {
    let base = spawn_fixture().await;
    let steps = || {
        vec![
            new_step("fails")
                .get("/u/1")
                .validate()
                .assert_equal("body.id", 0, "")
                .into(),
            new_step("still runs")
                .get("/u/1")
                .validate()
                .assert_equal("status_code", 200, "")
                .into(),
        ]
    };

    let runner = HrpRunner::new().unwrap();
    let case = TestCase::new(TConfig::new("continue").with_base_url(&base)).with_steps(steps());
    let summary = runner.run_test_case(&case).await.unwrap();
    assert!(!summary.success);
    assert_eq!(summary.stat, Stat { total: 2, successes: 1, failures: 1 });

    let mut strict = HrpRunner::new().unwrap();
    strict.set_fail_fast(true);
    let case = TestCase::new(TConfig::new("abort").with_base_url(&base)).with_steps(steps());
    let summary = strict.run_test_case(&case).await.unwrap();
    assert!(!summary.success);
    assert_eq!(summary.stat, Stat { total: 1, successes: 0, failures: 1 });
}

#[tokio::test]
async fn network_failure_is_recorded_not_fatal() {
    // unroutable port on localhost
    let case = TestCase::new(TConfig::new("down").with_base_url("http://127.0.0.1:1")).with_steps(vec![
        new_step("unreachable").get("/x").validate().assert_equal("status_code", 200, "").into(),
    ]);

    let runner = HrpRunner::new().unwrap();
    let summary = runner.run_test_case(&case).await.unwrap();
    assert!(!summary.success);
    let record = &summary.records[0];
    assert!(!record.success);
    assert!(!record.attachment.is_empty());
}
