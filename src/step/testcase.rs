use std::time::Instant;

use async_trait::async_trait;
use tracing::warn;

use crate::error::{HrpError, Result};
use crate::model::{StepPayload, StepType, TStep, TestCase, VariablesMap};
use crate::parser::merge_variables;
use crate::runner::SessionRunner;
use crate::summary::{StepData, StepResult};

use super::Step;

/// Merge step attributes into the referenced testcase's config: name
/// override, variables (step wins), export-list union.
fn extend_with_test_case(
    step_name: &str,
    step_variables: &VariablesMap,
    step_export: &[String],
    test_case: &mut TestCase,
) {
    if !step_name.is_empty() {
        test_case.config.name = step_name.to_string();
    }
    test_case.config.variables = merge_variables(step_variables, &test_case.config.variables);
    for name in step_export {
        if !test_case.config.export.contains(name) {
            test_case.config.export.push(name.clone());
        }
    }
}

async fn execute_testcase(
    r: &mut SessionRunner<'_>,
    step: &TStep,
    result: &mut StepResult,
) -> Result<()> {
    let step_variables = r.merge_step_variables(&step.variables).await?;

    // field-wise clone: the original descriptor never observes mutations
    let mut copied = step.clone();
    copied.variables = step_variables;

    let StepPayload::TestCase(test_case) = &mut copied.payload else {
        return Err(HrpError::Config("step payload is not a testcase".to_string()));
    };
    extend_with_test_case(&copied.name, &copied.variables, &copied.export, test_case);

    let mut child = SessionRunner::new(r.runner(), (**test_case).clone());
    let started = Instant::now();
    let child_outcome = child.start().await;
    result.elapsed_ms = started.elapsed().as_millis() as i64;
    child_outcome?;

    let child_summary = child.into_summary();

    // the parent receives exactly the subset named by this step's export list
    for name in &copied.export {
        if let Some(value) = child_summary.in_out.export_vars.get(name) {
            result.export_vars.insert(name.clone(), value.clone());
        }
    }

    result.success = child_summary.success;
    result.data = Some(StepData::Records(child_summary.records.clone()));
    r.summary_mut().absorb(child_summary);
    Ok(())
}

/// Run a referenced testcase in a nested session and fold its records and
/// statistics into the parent summary.
pub(crate) async fn run_step_testcase(r: &mut SessionRunner<'_>, step: &TStep) -> StepResult {
    let mut result = StepResult::new(step.display_name(), StepType::TestCase);
    if let Err(err) = execute_testcase(r, step, &mut result).await {
        warn!(step = %result.name, error = %err, "testcase step failed");
        result.attachment = err.to_string();
        result.success = false;
    }
    result
}

/// Referenced-testcase step builder.
pub struct StepTestCaseWithOptionalArgs {
    step: TStep,
}

impl StepTestCaseWithOptionalArgs {
    pub(crate) fn new(step: TStep) -> Self {
        Self { step }
    }

    pub fn teardown_hook(mut self, hook: impl Into<String>) -> Self {
        self.step.teardown_hooks.push(hook.into());
        self
    }

    /// Variable names to export from the referenced testcase.
    pub fn export(mut self, names: &[&str]) -> Self {
        self.step.export.extend(names.iter().map(|n| n.to_string()));
        self
    }
}

#[async_trait]
impl Step for StepTestCaseWithOptionalArgs {
    fn name(&self) -> String {
        self.step.display_name()
    }

    fn step_type(&self) -> StepType {
        StepType::TestCase
    }

    fn step(&self) -> &TStep {
        &self.step
    }

    async fn run(&self, runner: &mut SessionRunner<'_>) -> StepResult {
        run_step_testcase(runner, &self.step).await
    }
}

impl From<StepTestCaseWithOptionalArgs> for TStep {
    fn from(builder: StepTestCaseWithOptionalArgs) -> Self {
        builder.step
    }
}
