use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::{HrpError, Result};
use crate::model::{
    Api, ApiRef, Request, StepPayload, TConfig, TStep, TestCase, TestCaseRef, ThinkTime,
    Transaction, Validator, VariablesMap,
};

const MAX_REF_DEPTH: usize = 16;

/// On-disk testcase shape: `{config, teststeps}`.
#[derive(Debug, Deserialize)]
struct TestCaseFile {
    config: TConfig,
    #[serde(default)]
    teststeps: Vec<StepFile>,
}

/// One file entry; exactly one of the payload keys must be present.
#[derive(Debug, Deserialize)]
struct StepFile {
    #[serde(default)]
    name: String,
    #[serde(default)]
    variables: VariablesMap,
    #[serde(default)]
    setup_hooks: Vec<String>,
    #[serde(default)]
    teardown_hooks: Vec<String>,
    #[serde(default)]
    export: Vec<String>,
    #[serde(default)]
    extract: HashMap<String, String>,
    #[serde(default, rename = "validate")]
    validators: Vec<Validator>,
    request: Option<Request>,
    /// Path to a referenced testcase file, relative to this file.
    testcase: Option<String>,
    /// Path to a referenced API file, relative to this file.
    api: Option<String>,
    transaction: Option<Transaction>,
    think_time: Option<f64>,
}

fn parse_document<T: serde::de::DeserializeOwned>(path: &Path, text: &str) -> Result<T> {
    let extension = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    match extension.as_str() {
        "json" => serde_json::from_str(text)
            .map_err(|e| HrpError::Load(format!("{}: {}", path.display(), e))),
        "yaml" | "yml" => serde_yaml::from_str(text)
            .map_err(|e| HrpError::Load(format!("{}: {}", path.display(), e))),
        other => Err(HrpError::Load(format!(
            "{}: unsupported testcase file extension {:?}",
            path.display(),
            other
        ))),
    }
}

fn read_file(path: &Path) -> Result<String> {
    std::fs::read_to_string(path)
        .map_err(|e| HrpError::Load(format!("{}: {}", path.display(), e)))
}

fn convert_step(step: StepFile, dir: &Path, depth: usize) -> Result<TStep> {
    let StepFile {
        name,
        variables,
        setup_hooks,
        teardown_hooks,
        export,
        extract,
        validators,
        request,
        testcase,
        api,
        transaction,
        think_time,
    } = step;

    let present = [
        request.is_some(),
        testcase.is_some(),
        api.is_some(),
        transaction.is_some(),
        think_time.is_some(),
    ]
    .iter()
    .filter(|p| **p)
    .count();
    if present != 1 {
        return Err(HrpError::Load(format!(
            "step {:?} must carry exactly one of request/testcase/api/transaction/think_time, found {}",
            name, present
        )));
    }

    let payload = if let Some(request) = request {
        StepPayload::Request(request)
    } else if let Some(reference) = testcase {
        let referenced = load_test_case_at(&dir.join(&reference), depth + 1)?;
        StepPayload::TestCase(Box::new(referenced))
    } else if let Some(reference) = api {
        let referenced = load_api_at(&dir.join(&reference))?;
        StepPayload::Api(Box::new(referenced))
    } else if let Some(transaction) = transaction {
        StepPayload::Transaction(transaction)
    } else {
        StepPayload::ThinkTime(ThinkTime { time: think_time.unwrap_or(0.0) })
    };

    Ok(TStep {
        name,
        variables,
        setup_hooks,
        teardown_hooks,
        extract,
        validators,
        export,
        payload,
    })
}

fn load_test_case_at(path: &Path, depth: usize) -> Result<TestCase> {
    if depth > MAX_REF_DEPTH {
        return Err(HrpError::Load(format!(
            "{}: testcase reference depth exceeds {}",
            path.display(),
            MAX_REF_DEPTH
        )));
    }
    let text = read_file(path)?;
    let file: TestCaseFile = parse_document(path, &text)?;
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let test_steps = file
        .teststeps
        .into_iter()
        .map(|step| convert_step(step, dir, depth))
        .collect::<Result<Vec<_>>>()?;
    Ok(TestCase { config: file.config, test_steps })
}

fn load_api_at(path: &Path) -> Result<Api> {
    let text = read_file(path)?;
    parse_document(path, &text)
}

/// Load a testcase from a JSON or YAML file. Referenced sub-testcases and
/// APIs are resolved relative to the referencing file.
pub fn load_test_case(path: impl AsRef<Path>) -> Result<TestCase> {
    load_test_case_at(path.as_ref(), 0)
}

/// Load an API template from a JSON or YAML file.
pub fn load_api(path: impl AsRef<Path>) -> Result<Api> {
    load_api_at(path.as_ref())
}

/// A testcase source backed by a file path.
#[derive(Debug, Clone)]
pub struct TestCasePath(pub PathBuf);

impl TestCaseRef for TestCasePath {
    fn to_test_case(&self) -> Result<TestCase> {
        load_test_case(&self.0)
    }
}

/// An API source backed by a file path.
#[derive(Debug, Clone)]
pub struct ApiPath(pub PathBuf);

impl ApiRef for ApiPath {
    fn to_api(&self) -> Result<Api> {
        load_api(&self.0)
    }
}
