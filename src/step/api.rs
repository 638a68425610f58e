use async_trait::async_trait;

use crate::model::{StepPayload, StepType, TStep};
use crate::parser::merge_variables;
use crate::runner::SessionRunner;
use crate::summary::StepResult;

use super::request::run_step_request;
use super::Step;

/// Expand an API template into a request step: the step's own variables,
/// extractors and validators win over the template's.
fn expand_api_step(step: &TStep) -> Option<TStep> {
    let StepPayload::Api(api) = &step.payload else {
        return None;
    };
    let mut expanded = step.clone();
    expanded.variables = merge_variables(&step.variables, &api.variables);

    let mut extract = api.extract.clone();
    extract.extend(step.extract.clone());
    expanded.extract = extract;

    let mut validators = api.validators.clone();
    validators.extend(step.validators.iter().cloned());
    expanded.validators = validators;

    expanded.payload = StepPayload::Request(api.request.clone());
    Some(expanded)
}

/// Run a referenced API template as a request step.
pub(crate) async fn run_step_api(r: &mut SessionRunner<'_>, step: &TStep) -> StepResult {
    let Some(expanded) = expand_api_step(step) else {
        let mut result = StepResult::new(step.display_name(), StepType::Api);
        result.attachment = "step payload is not an api".to_string();
        return result;
    };
    let mut result = run_step_request(r, &expanded).await;
    result.name = step.display_name();
    result.step_type = StepType::Api;
    result
}

/// Referenced-API step builder.
pub struct StepApiWithOptionalArgs {
    step: TStep,
}

impl StepApiWithOptionalArgs {
    pub(crate) fn new(step: TStep) -> Self {
        Self { step }
    }

    pub fn teardown_hook(mut self, hook: impl Into<String>) -> Self {
        self.step.teardown_hooks.push(hook.into());
        self
    }
}

#[async_trait]
impl Step for StepApiWithOptionalArgs {
    fn name(&self) -> String {
        self.step.display_name()
    }

    fn step_type(&self) -> StepType {
        StepType::Api
    }

    fn step(&self) -> &TStep {
        &self.step
    }

    async fn run(&self, runner: &mut SessionRunner<'_>) -> StepResult {
        run_step_api(runner, &self.step).await
    }
}

impl From<StepApiWithOptionalArgs> for TStep {
    fn from(builder: StepApiWithOptionalArgs) -> Self {
        builder.step
    }
}
