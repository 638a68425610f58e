pub mod cli;
pub mod error;
pub mod loader;
pub mod model;
pub mod parser;
pub mod plugin;
pub mod runner;
pub mod step;
pub mod summary;
pub mod validate;
pub mod http {
    pub mod request;
    pub mod response;
}

pub use error::{HrpError, Result};
pub use loader::{load_api, load_test_case, ApiPath, TestCasePath};
pub use model::{
    Api, ApiRef, Method, Request, StepPayload, StepType, TConfig, TStep, TestCase, TestCaseRef,
    ThinkTime, Transaction, TransactionType, Validator, VariablesMap,
};
pub use parser::Parser;
pub use plugin::{FuncRegistry, PluginCaller};
pub use runner::{HrpRunner, SessionRunner};
pub use step::{
    new_step, Step, StepApiWithOptionalArgs, StepRequest, StepRequestExtraction,
    StepRequestValidation, StepRequestWithOptionalArgs, StepTestCaseWithOptionalArgs,
    StepThinkTime, StepTransaction,
};
pub use summary::{
    SessionData, Stat, StepData, StepResult, Summary, TestCaseInOut, TestCaseTime,
};
pub use validate::ValidationResult;
