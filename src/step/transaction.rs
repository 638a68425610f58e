use async_trait::async_trait;
use tracing::{info, warn};

use crate::model::{StepPayload, StepType, TStep, TransactionType};
use crate::runner::SessionRunner;
use crate::summary::StepResult;

use super::Step;

/// Transactions only manipulate the session's timers; they produce no
/// summary record.
pub(crate) fn run_step_transaction(r: &mut SessionRunner<'_>, step: &TStep) -> StepResult {
    let mut result = StepResult::new(step.display_name(), StepType::Transaction);
    result.success = true;

    let StepPayload::Transaction(transaction) = &step.payload else {
        result.success = false;
        result.attachment = "step payload is not a transaction".to_string();
        return result;
    };

    match transaction.transaction_type {
        TransactionType::Start => {
            r.start_transaction(&transaction.name);
            info!(transaction = %transaction.name, "transaction start");
        }
        TransactionType::End => match r.end_transaction(&transaction.name) {
            Some(elapsed) => {
                result.elapsed_ms = elapsed.as_millis() as i64;
                info!(
                    transaction = %transaction.name,
                    elapsed_ms = result.elapsed_ms,
                    "transaction end"
                );
            }
            None => {
                warn!(transaction = %transaction.name, "transaction end without start");
            }
        },
    }
    result
}

/// Transaction marker step.
pub struct StepTransaction {
    step: TStep,
}

impl StepTransaction {
    pub(crate) fn new(step: TStep) -> Self {
        Self { step }
    }
}

#[async_trait]
impl Step for StepTransaction {
    fn name(&self) -> String {
        self.step.display_name()
    }

    fn step_type(&self) -> StepType {
        StepType::Transaction
    }

    fn step(&self) -> &TStep {
        &self.step
    }

    async fn run(&self, runner: &mut SessionRunner<'_>) -> StepResult {
        run_step_transaction(runner, &self.step)
    }
}

impl From<StepTransaction> for TStep {
    fn from(builder: StepTransaction) -> Self {
        builder.step
    }
}
