use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::Result;

/// Variable scope: name -> JSON value. Values may contain `$var` / `${expr}`
/// tokens that the parser resolves at execution time.
pub type VariablesMap = Map<String, Value>;

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
    Get,
    Head,
    Post,
    Put,
    Delete,
    Options,
    Patch,
}

impl Method {
    pub fn as_str(&self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Head => "HEAD",
            Method::Post => "POST",
            Method::Put => "PUT",
            Method::Delete => "DELETE",
            Method::Options => "OPTIONS",
            Method::Patch => "PATCH",
        }
    }

    pub fn to_reqwest(self) -> reqwest::Method {
        match self {
            Method::Get => reqwest::Method::GET,
            Method::Head => reqwest::Method::HEAD,
            Method::Post => reqwest::Method::POST,
            Method::Put => reqwest::Method::PUT,
            Method::Delete => reqwest::Method::DELETE,
            Method::Options => reqwest::Method::OPTIONS,
            Method::Patch => reqwest::Method::PATCH,
        }
    }
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Testcase-level configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TConfig {
    pub name: String,
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub variables: VariablesMap,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    #[serde(default)]
    pub export: Vec<String>,
    #[serde(default = "default_true")]
    pub verify: bool,
    /// Per-case think-time cap in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub think_time: Option<f64>,
}

impl TConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base_url: String::new(),
            variables: VariablesMap::new(),
            headers: HashMap::new(),
            export: Vec::new(),
            verify: true,
            think_time: None,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_variables(mut self, variables: VariablesMap) -> Self {
        self.variables = variables;
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_export(mut self, names: Vec<String>) -> Self {
        self.export = names;
        self
    }

    pub fn with_verify(mut self, verify: bool) -> Self {
        self.verify = verify;
        self
    }

    pub fn with_think_time(mut self, seconds: f64) -> Self {
        self.think_time = Some(seconds);
        self
    }
}

/// Declarative HTTP request carried by a request step.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub method: Method,
    pub url: String,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub params: VariablesMap,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub cookies: HashMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<Value>,
    /// Per-request timeout in seconds; falls back to the runner default.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<f64>,
    #[serde(default = "default_true")]
    pub allow_redirects: bool,
    #[serde(default = "default_true")]
    pub verify: bool,
}

impl Request {
    pub fn new(method: Method, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            params: VariablesMap::new(),
            headers: HashMap::new(),
            cookies: HashMap::new(),
            body: None,
            timeout: None,
            allow_redirects: true,
            verify: true,
        }
    }
}

/// A single assertion over the response document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Validator {
    pub check: String,
    pub assert: String,
    pub expect: Value,
    #[serde(default, rename = "msg", skip_serializing_if = "String::is_empty")]
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionType {
    Start,
    End,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    pub name: String,
    #[serde(rename = "type")]
    pub transaction_type: TransactionType,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThinkTime {
    pub time: f64,
}

/// A pre-bound request template: a named request plus its own variables,
/// extractors and validators, merged into the step that references it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Api {
    pub name: String,
    pub request: Request,
    #[serde(default)]
    pub variables: VariablesMap,
    #[serde(default)]
    pub extract: HashMap<String, String>,
    #[serde(default, rename = "validate")]
    pub validators: Vec<Validator>,
}

/// The one payload a step carries. Exactly one variant per step by
/// construction.
#[derive(Debug, Clone)]
pub enum StepPayload {
    Request(Request),
    TestCase(Box<TestCase>),
    Api(Box<Api>),
    Transaction(Transaction),
    ThinkTime(ThinkTime),
}

/// Step descriptor shared by every variant.
#[derive(Debug, Clone)]
pub struct TStep {
    pub name: String,
    pub variables: VariablesMap,
    pub setup_hooks: Vec<String>,
    pub teardown_hooks: Vec<String>,
    /// varName -> JMESPath, applied to request/api responses.
    pub extract: HashMap<String, String>,
    pub validators: Vec<Validator>,
    /// Variable names exported from a referenced sub-testcase.
    pub export: Vec<String>,
    pub payload: StepPayload,
}

impl TStep {
    pub fn step_type(&self) -> StepType {
        match &self.payload {
            StepPayload::Request(r) => StepType::Request(r.method),
            StepPayload::TestCase(_) => StepType::TestCase,
            StepPayload::Api(_) => StepType::Api,
            StepPayload::Transaction(_) => StepType::Transaction,
            StepPayload::ThinkTime(_) => StepType::ThinkTime,
        }
    }

    /// Step name, derived from the payload when not set explicitly.
    pub fn display_name(&self) -> String {
        if !self.name.is_empty() {
            return self.name.clone();
        }
        match &self.payload {
            StepPayload::Request(r) => format!("{} {}", r.method, r.url),
            StepPayload::TestCase(tc) => tc.config.name.clone(),
            StepPayload::Api(api) => api.name.clone(),
            StepPayload::Transaction(t) => t.name.clone(),
            StepPayload::ThinkTime(t) => format!("think time {}s", t.time),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepType {
    Request(Method),
    TestCase,
    Api,
    Transaction,
    ThinkTime,
}

impl fmt::Display for StepType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepType::Request(m) => write!(f, "request-{}", m),
            StepType::TestCase => f.write_str("testcase"),
            StepType::Api => f.write_str("api"),
            StepType::Transaction => f.write_str("transaction"),
            StepType::ThinkTime => f.write_str("thinktime"),
        }
    }
}

/// A config plus an ordered sequence of steps.
#[derive(Debug, Clone)]
pub struct TestCase {
    pub config: TConfig,
    pub test_steps: Vec<TStep>,
}

impl TestCase {
    pub fn new(config: TConfig) -> Self {
        Self { config, test_steps: Vec::new() }
    }

    pub fn with_steps(mut self, steps: Vec<TStep>) -> Self {
        self.test_steps = steps;
        self
    }
}

/// Source of a testcase for `call_ref_case`: an in-memory case or a file
/// path resolved by the loader. Load failures surface as errors instead of
/// aborting the process.
pub trait TestCaseRef {
    fn to_test_case(&self) -> Result<TestCase>;
}

impl TestCaseRef for TestCase {
    fn to_test_case(&self) -> Result<TestCase> {
        Ok(self.clone())
    }
}

/// Source of an API template for `call_ref_api`.
pub trait ApiRef {
    fn to_api(&self) -> Result<Api>;
}

impl ApiRef for Api {
    fn to_api(&self) -> Result<Api> {
        Ok(self.clone())
    }
}
