use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use crate::model::{StepPayload, StepType, TStep};
use crate::runner::SessionRunner;
use crate::summary::StepResult;

use super::Step;

/// Bounded pause between steps. The wait is clamped to the case's
/// think-time limit when set, else the runner-wide maximum.
pub(crate) async fn run_step_think_time(r: &SessionRunner<'_>, step: &TStep) -> StepResult {
    let mut result = StepResult::new(step.display_name(), StepType::ThinkTime);
    result.success = true;

    let StepPayload::ThinkTime(think_time) = &step.payload else {
        result.success = false;
        result.attachment = "step payload is not think time".to_string();
        return result;
    };

    let cap = r.config().think_time.unwrap_or_else(|| r.runner().think_time_max());
    let seconds = think_time.time.max(0.0).min(cap.max(0.0));
    debug!(requested = think_time.time, waited = seconds, "think time");
    tokio::time::sleep(Duration::from_secs_f64(seconds)).await;
    result
}

/// Think-time step.
pub struct StepThinkTime {
    step: TStep,
}

impl StepThinkTime {
    pub(crate) fn new(step: TStep) -> Self {
        Self { step }
    }
}

#[async_trait]
impl Step for StepThinkTime {
    fn name(&self) -> String {
        self.step.display_name()
    }

    fn step_type(&self) -> StepType {
        StepType::ThinkTime
    }

    fn step(&self) -> &TStep {
        &self.step
    }

    async fn run(&self, runner: &mut SessionRunner<'_>) -> StepResult {
        run_step_think_time(runner, &self.step).await
    }
}

impl From<StepThinkTime> for TStep {
    fn from(builder: StepThinkTime) -> Self {
        builder.step
    }
}
