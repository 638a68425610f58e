use std::collections::HashMap;

use async_trait::async_trait;

use crate::error::Result;
use crate::model::{
    ApiRef, Method, Request, StepPayload, StepType, TStep, TestCaseRef, ThinkTime, Transaction,
    TransactionType, VariablesMap,
};
use crate::runner::SessionRunner;
use crate::summary::StepResult;

mod api;
mod request;
mod testcase;
mod think_time;
mod transaction;

pub use api::StepApiWithOptionalArgs;
pub use request::{StepRequestExtraction, StepRequestValidation, StepRequestWithOptionalArgs};
pub use testcase::StepTestCaseWithOptionalArgs;
pub use think_time::StepThinkTime;
pub use transaction::StepTransaction;

pub(crate) use api::run_step_api;
pub(crate) use request::run_step_request;
pub(crate) use testcase::run_step_testcase;
pub(crate) use think_time::run_step_think_time;
pub(crate) use transaction::run_step_transaction;

/// Common surface of every step variant.
#[async_trait]
pub trait Step: Send + Sync {
    fn name(&self) -> String;
    fn step_type(&self) -> StepType;
    fn step(&self) -> &TStep;
    async fn run(&self, runner: &mut SessionRunner<'_>) -> StepResult;
}

/// Start building a step. The terminal method picks the variant.
pub fn new_step(name: impl Into<String>) -> StepRequest {
    StepRequest {
        name: name.into(),
        variables: VariablesMap::new(),
        setup_hooks: Vec::new(),
    }
}

/// Neutral builder root: shared attributes before the variant is chosen.
pub struct StepRequest {
    name: String,
    variables: VariablesMap,
    setup_hooks: Vec<String>,
}

impl StepRequest {
    pub fn with_variables(mut self, variables: VariablesMap) -> Self {
        self.variables = variables;
        self
    }

    pub fn setup_hook(mut self, hook: impl Into<String>) -> Self {
        self.setup_hooks.push(hook.into());
        self
    }

    fn into_step(self, payload: StepPayload) -> TStep {
        TStep {
            name: self.name,
            variables: self.variables,
            setup_hooks: self.setup_hooks,
            teardown_hooks: Vec::new(),
            extract: HashMap::new(),
            validators: Vec::new(),
            export: Vec::new(),
            payload,
        }
    }

    fn method(self, method: Method, url: impl Into<String>) -> StepRequestWithOptionalArgs {
        StepRequestWithOptionalArgs::new(self.into_step(StepPayload::Request(Request::new(method, url))))
    }

    pub fn get(self, url: impl Into<String>) -> StepRequestWithOptionalArgs {
        self.method(Method::Get, url)
    }

    pub fn head(self, url: impl Into<String>) -> StepRequestWithOptionalArgs {
        self.method(Method::Head, url)
    }

    pub fn post(self, url: impl Into<String>) -> StepRequestWithOptionalArgs {
        self.method(Method::Post, url)
    }

    pub fn put(self, url: impl Into<String>) -> StepRequestWithOptionalArgs {
        self.method(Method::Put, url)
    }

    pub fn delete(self, url: impl Into<String>) -> StepRequestWithOptionalArgs {
        self.method(Method::Delete, url)
    }

    pub fn options(self, url: impl Into<String>) -> StepRequestWithOptionalArgs {
        self.method(Method::Options, url)
    }

    pub fn patch(self, url: impl Into<String>) -> StepRequestWithOptionalArgs {
        self.method(Method::Patch, url)
    }

    /// Invoke a referenced testcase. Load failures surface to the caller.
    pub fn call_ref_case(self, testcase: &impl TestCaseRef) -> Result<StepTestCaseWithOptionalArgs> {
        let test_case = testcase.to_test_case()?;
        Ok(StepTestCaseWithOptionalArgs::new(
            self.into_step(StepPayload::TestCase(Box::new(test_case))),
        ))
    }

    /// Invoke a referenced API template. Load failures surface to the caller.
    pub fn call_ref_api(self, api: &impl ApiRef) -> Result<StepApiWithOptionalArgs> {
        let api = api.to_api()?;
        Ok(StepApiWithOptionalArgs::new(self.into_step(StepPayload::Api(Box::new(api)))))
    }

    pub fn start_transaction(self, name: impl Into<String>) -> StepTransaction {
        let transaction = Transaction {
            name: name.into(),
            transaction_type: TransactionType::Start,
        };
        StepTransaction::new(self.into_step(StepPayload::Transaction(transaction)))
    }

    pub fn end_transaction(self, name: impl Into<String>) -> StepTransaction {
        let transaction = Transaction {
            name: name.into(),
            transaction_type: TransactionType::End,
        };
        StepTransaction::new(self.into_step(StepPayload::Transaction(transaction)))
    }

    pub fn set_think_time(self, seconds: f64) -> StepThinkTime {
        StepThinkTime::new(self.into_step(StepPayload::ThinkTime(ThinkTime { time: seconds })))
    }
}
