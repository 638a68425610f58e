use std::time::{Duration, SystemTime};

use serde_json::Value;

use crate::model::{StepType, TConfig, VariablesMap};
use crate::validate::ValidationResult;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Stat {
    pub total: u64,
    pub successes: u64,
    pub failures: u64,
}

#[derive(Debug, Clone)]
pub struct TestCaseTime {
    pub start_at: SystemTime,
    pub duration: Duration,
}

/// Variables flowing into and out of a session: the case config variables
/// and the exported subset of the final scope.
#[derive(Debug, Clone, Default)]
pub struct TestCaseInOut {
    pub config_vars: VariablesMap,
    pub export_vars: VariablesMap,
}

/// Request/response snapshots plus validator outcomes for one request step.
#[derive(Debug, Clone)]
pub struct SessionData {
    pub request: Value,
    pub response: Value,
    pub validators: Vec<ValidationResult>,
    pub success: bool,
}

impl Default for SessionData {
    fn default() -> Self {
        Self {
            request: Value::Null,
            response: Value::Null,
            validators: Vec::new(),
            success: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum StepData {
    Session(SessionData),
    /// Records of a referenced sub-testcase.
    Records(Vec<StepResult>),
}

#[derive(Debug, Clone)]
pub struct StepResult {
    pub name: String,
    pub step_type: StepType,
    pub success: bool,
    pub elapsed_ms: i64,
    /// Response content length; -1 when unknown.
    pub content_size: i64,
    /// Error text when the step failed.
    pub attachment: String,
    pub export_vars: VariablesMap,
    pub data: Option<StepData>,
}

impl StepResult {
    pub fn new(name: impl Into<String>, step_type: StepType) -> Self {
        Self {
            name: name.into(),
            step_type,
            success: false,
            elapsed_ms: 0,
            content_size: 0,
            attachment: String::new(),
            export_vars: VariablesMap::new(),
            data: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Summary {
    pub name: String,
    pub success: bool,
    pub stat: Stat,
    pub time: TestCaseTime,
    pub in_out: TestCaseInOut,
    pub records: Vec<StepResult>,
}

impl Summary {
    pub fn new(config: &TConfig) -> Self {
        Self {
            name: config.name.clone(),
            success: true,
            stat: Stat::default(),
            time: TestCaseTime { start_at: SystemTime::now(), duration: Duration::ZERO },
            in_out: TestCaseInOut {
                config_vars: config.variables.clone(),
                export_vars: VariablesMap::new(),
            },
            records: Vec::new(),
        }
    }

    /// Append a terminal step record and update statistics.
    pub(crate) fn add_record(&mut self, record: StepResult) {
        self.stat.total += 1;
        if record.success {
            self.stat.successes += 1;
        } else {
            self.stat.failures += 1;
            self.success = false;
        }
        self.records.push(record);
    }

    /// Fold a child session's records and statistics into this summary.
    pub(crate) fn absorb(&mut self, child: Summary) {
        if !child.success {
            self.success = false;
        }
        self.stat.total += child.stat.total;
        self.stat.successes += child.stat.successes;
        self.stat.failures += child.stat.failures;
        self.records.extend(child.records);
    }
}
