use std::collections::HashMap;
use std::time::Instant;

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{HrpError, Result};
use crate::http::request::RequestBuilder;
use crate::http::response::ResponseObject;
use crate::model::{StepPayload, StepType, TStep, Validator, VariablesMap};
use crate::parser::merge_variables;
use crate::runner::SessionRunner;
use crate::summary::{SessionData, StepData, StepResult};

use super::Step;

/// `name = <expr>` binds the hook result into the step scope; anything
/// else is evaluated for its side effects only.
fn split_hook_assignment(hook: &str) -> (Option<&str>, &str) {
    if let Some((lhs, rhs)) = hook.split_once('=') {
        let name = lhs.trim();
        let is_ident = !name.is_empty()
            && name.chars().next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
            && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');
        if is_ident {
            return (Some(name), rhs.trim());
        }
    }
    (None, hook.trim())
}

async fn run_hooks(
    r: &SessionRunner<'_>,
    hooks: &[String],
    scope: &mut VariablesMap,
    hook_vars: &mut VariablesMap,
    stage: &str,
) -> Result<()> {
    for hook in hooks {
        let (target, expr) = split_hook_assignment(hook);
        let value = r
            .parser()
            .parse(&Value::String(expr.to_string()), scope)
            .await
            .map_err(|e| HrpError::Hook(format!("run {} hook {:?} failed: {}", stage, hook, e)))?;
        if let Some(name) = target {
            scope.insert(name.to_string(), value.clone());
            hook_vars.insert(name.to_string(), value);
        }
    }
    Ok(())
}

async fn execute_request(
    r: &SessionRunner<'_>,
    step: &TStep,
    result: &mut StepResult,
) -> Result<()> {
    let StepPayload::Request(request) = &step.payload else {
        return Err(HrpError::Config("step payload is not a request".to_string()));
    };

    let mut step_variables = r.merge_step_variables(&step.variables).await?;
    let mut session_data = SessionData::default();

    let builder = RequestBuilder::new(r.parser(), r.config(), request);
    let (realized, request_map) = builder.build(&step_variables).await?;

    // expose the step name and request mirror to hooks
    step_variables.insert("hrp_step_name".to_string(), Value::String(step.display_name()));
    step_variables.insert("hrp_step_request".to_string(), request_map.clone());

    let mut hook_vars = VariablesMap::new();
    run_hooks(r, &step.setup_hooks, &mut step_variables, &mut hook_vars, "setup").await?;

    if r.runner().log_requests() {
        debug!(
            method = %realized.method,
            url = %realized.url,
            headers = ?realized.headers,
            body = ?realized.body.as_deref().map(String::from_utf8_lossy),
            "request"
        );
    }

    let client = r.runner().client_for(realized.allow_redirects);
    let mut http_request = client
        .request(realized.method.clone(), realized.url.clone())
        .headers(realized.headers.clone())
        .timeout(realized.timeout.unwrap_or_else(|| r.runner().default_timeout()));
    if let Some(body) = realized.body.clone() {
        http_request = http_request.body(body);
    }

    let started = Instant::now();
    let send_result = http_request.send().await;
    result.elapsed_ms = started.elapsed().as_millis() as i64;
    let response = match send_result {
        Ok(response) => response,
        Err(err) if err.is_timeout() => return Err(HrpError::Timeout(err.to_string())),
        Err(err) => return Err(HrpError::Io(format!("request failed: {}", err))),
    };

    let mut response_object = ResponseObject::from_response(response).await?;
    if r.runner().log_requests() {
        debug!(response = %response_object.meta(), "response");
    }

    // expose the response to teardown hooks
    step_variables.insert("hrp_step_response".to_string(), response_object.meta().clone());
    run_hooks(r, &step.teardown_hooks, &mut step_variables, &mut hook_vars, "teardown").await?;

    session_data.request = request_map;
    session_data.response = response_object.meta().clone();

    // extracted variables win over hook-assigned ones
    let extracted = response_object.extract(&step.extract)?;
    result.export_vars = merge_variables(&extracted, &hook_vars);
    for (name, value) in &result.export_vars {
        step_variables.insert(name.clone(), value.clone());
    }

    let validation = response_object
        .validate(r.parser(), &step.validators, &step_variables)
        .await;
    session_data.validators = response_object.validation_results.clone();
    session_data.success = validation.is_ok();

    result.success = validation.is_ok();
    result.content_size = response_object.content_size;
    result.data = Some(StepData::Session(session_data));

    validation
}

/// Execute one request step: build, hooks, send, decode, extract,
/// validate. Failures land in the step result's attachment.
pub(crate) async fn run_step_request(r: &mut SessionRunner<'_>, step: &TStep) -> StepResult {
    let mut result = StepResult::new(step.display_name(), step.step_type());
    if let Err(err) = execute_request(r, step, &mut result).await {
        warn!(step = %result.name, error = %err, "request step failed");
        result.attachment = err.to_string();
        result.success = false;
    }
    result
}

/// Request step with optional arguments, before extraction/validation.
pub struct StepRequestWithOptionalArgs {
    step: TStep,
}

impl StepRequestWithOptionalArgs {
    pub(crate) fn new(step: TStep) -> Self {
        Self { step }
    }

    fn request_mut(&mut self) -> &mut crate::model::Request {
        match &mut self.step.payload {
            StepPayload::Request(request) => request,
            _ => unreachable!("request builder always carries a request payload"),
        }
    }

    pub fn with_params(mut self, params: VariablesMap) -> Self {
        self.request_mut().params = params;
        self
    }

    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.request_mut().headers = headers;
        self
    }

    pub fn with_cookies(mut self, cookies: HashMap<String, String>) -> Self {
        self.request_mut().cookies = cookies;
        self
    }

    pub fn with_body(mut self, body: Value) -> Self {
        self.request_mut().body = Some(body);
        self
    }

    pub fn set_timeout(mut self, seconds: f64) -> Self {
        self.request_mut().timeout = Some(seconds);
        self
    }

    pub fn set_verify(mut self, verify: bool) -> Self {
        self.request_mut().verify = verify;
        self
    }

    pub fn set_allow_redirects(mut self, allow_redirects: bool) -> Self {
        self.request_mut().allow_redirects = allow_redirects;
        self
    }

    /// Accepted but not applied to the request.
    pub fn set_proxies(self, _proxies: HashMap<String, String>) -> Self {
        self
    }

    /// Accepted but not applied to the request.
    pub fn set_auth(self, _auth: HashMap<String, String>) -> Self {
        self
    }

    pub fn teardown_hook(mut self, hook: impl Into<String>) -> Self {
        self.step.teardown_hooks.push(hook.into());
        self
    }

    pub fn extract(self) -> StepRequestExtraction {
        StepRequestExtraction { step: self.step }
    }

    pub fn validate(self) -> StepRequestValidation {
        StepRequestValidation { step: self.step }
    }
}

#[async_trait]
impl Step for StepRequestWithOptionalArgs {
    fn name(&self) -> String {
        self.step.display_name()
    }

    fn step_type(&self) -> StepType {
        self.step.step_type()
    }

    fn step(&self) -> &TStep {
        &self.step
    }

    async fn run(&self, runner: &mut SessionRunner<'_>) -> StepResult {
        run_step_request(runner, &self.step).await
    }
}

impl From<StepRequestWithOptionalArgs> for TStep {
    fn from(builder: StepRequestWithOptionalArgs) -> Self {
        builder.step
    }
}

/// Accumulates JMESPath extractors, then transitions to validation.
pub struct StepRequestExtraction {
    step: TStep,
}

impl StepRequestExtraction {
    pub fn with_jmes_path(mut self, jmes_path: impl Into<String>, var_name: impl Into<String>) -> Self {
        self.step.extract.insert(var_name.into(), jmes_path.into());
        self
    }

    pub fn validate(self) -> StepRequestValidation {
        StepRequestValidation { step: self.step }
    }
}

#[async_trait]
impl Step for StepRequestExtraction {
    fn name(&self) -> String {
        self.step.display_name()
    }

    fn step_type(&self) -> StepType {
        self.step.step_type()
    }

    fn step(&self) -> &TStep {
        &self.step
    }

    async fn run(&self, runner: &mut SessionRunner<'_>) -> StepResult {
        run_step_request(runner, &self.step).await
    }
}

impl From<StepRequestExtraction> for TStep {
    fn from(builder: StepRequestExtraction) -> Self {
        builder.step
    }
}

/// Accumulates validators; one `assert_*` method per comparator.
pub struct StepRequestValidation {
    step: TStep,
}

impl StepRequestValidation {
    fn push(mut self, check: &str, assert: &str, expect: Value, message: &str) -> Self {
        self.step.validators.push(Validator {
            check: check.to_string(),
            assert: assert.to_string(),
            expect,
            message: message.to_string(),
        });
        self
    }

    pub fn assert_equal(self, jmes_path: &str, expected: impl Into<Value>, msg: &str) -> Self {
        self.push(jmes_path, "equals", expected.into(), msg)
    }

    pub fn assert_not_equal(self, jmes_path: &str, expected: impl Into<Value>, msg: &str) -> Self {
        self.push(jmes_path, "not_equal", expected.into(), msg)
    }

    pub fn assert_greater(self, jmes_path: &str, expected: impl Into<Value>, msg: &str) -> Self {
        self.push(jmes_path, "greater_than", expected.into(), msg)
    }

    pub fn assert_less(self, jmes_path: &str, expected: impl Into<Value>, msg: &str) -> Self {
        self.push(jmes_path, "less_than", expected.into(), msg)
    }

    pub fn assert_greater_or_equal(self, jmes_path: &str, expected: impl Into<Value>, msg: &str) -> Self {
        self.push(jmes_path, "greater_or_equals", expected.into(), msg)
    }

    pub fn assert_less_or_equal(self, jmes_path: &str, expected: impl Into<Value>, msg: &str) -> Self {
        self.push(jmes_path, "less_or_equals", expected.into(), msg)
    }

    pub fn assert_contains(self, jmes_path: &str, expected: impl Into<Value>, msg: &str) -> Self {
        self.push(jmes_path, "contains", expected.into(), msg)
    }

    pub fn assert_contained_by(self, jmes_path: &str, expected: impl Into<Value>, msg: &str) -> Self {
        self.push(jmes_path, "contained_by", expected.into(), msg)
    }

    pub fn assert_starts_with(self, jmes_path: &str, expected: impl Into<Value>, msg: &str) -> Self {
        self.push(jmes_path, "startswith", expected.into(), msg)
    }

    pub fn assert_ends_with(self, jmes_path: &str, expected: impl Into<Value>, msg: &str) -> Self {
        self.push(jmes_path, "endswith", expected.into(), msg)
    }

    pub fn assert_string_equal(self, jmes_path: &str, expected: impl Into<Value>, msg: &str) -> Self {
        self.push(jmes_path, "string_equals", expected.into(), msg)
    }

    pub fn assert_length_equal(self, jmes_path: &str, expected: impl Into<Value>, msg: &str) -> Self {
        self.push(jmes_path, "length_equals", expected.into(), msg)
    }

    pub fn assert_length_less_than(self, jmes_path: &str, expected: impl Into<Value>, msg: &str) -> Self {
        self.push(jmes_path, "length_less_than", expected.into(), msg)
    }

    pub fn assert_length_greater_than(self, jmes_path: &str, expected: impl Into<Value>, msg: &str) -> Self {
        self.push(jmes_path, "length_greater_than", expected.into(), msg)
    }

    pub fn assert_length_less_or_equals(self, jmes_path: &str, expected: impl Into<Value>, msg: &str) -> Self {
        self.push(jmes_path, "length_less_or_equals", expected.into(), msg)
    }

    pub fn assert_length_greater_or_equals(self, jmes_path: &str, expected: impl Into<Value>, msg: &str) -> Self {
        self.push(jmes_path, "length_greater_or_equals", expected.into(), msg)
    }

    pub fn assert_type_match(self, jmes_path: &str, expected: impl Into<Value>, msg: &str) -> Self {
        self.push(jmes_path, "type_match", expected.into(), msg)
    }

    pub fn assert_regexp(self, jmes_path: &str, expected: impl Into<Value>, msg: &str) -> Self {
        self.push(jmes_path, "regex_match", expected.into(), msg)
    }
}

#[async_trait]
impl Step for StepRequestValidation {
    fn name(&self) -> String {
        self.step.display_name()
    }

    fn step_type(&self) -> StepType {
        self.step.step_type()
    }

    fn step(&self) -> &TStep {
        &self.step
    }

    async fn run(&self, runner: &mut SessionRunner<'_>) -> StepResult {
        run_step_request(runner, &self.step).await
    }
}

impl From<StepRequestValidation> for TStep {
    fn from(builder: StepRequestValidation) -> Self {
        builder.step
    }
}
