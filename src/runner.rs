use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_recursion::async_recursion;
use reqwest::Client;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{HrpError, Result};
use crate::model::{StepPayload, TConfig, TestCase, VariablesMap};
use crate::parser::{merge_variables, Parser};
use crate::plugin::PluginCaller;
use crate::step::{
    run_step_api, run_step_request, run_step_testcase, run_step_think_time, run_step_transaction,
};
use crate::summary::Summary;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);
const DEFAULT_THINK_TIME_MAX: f64 = 30.0;

/// Process-wide runner: shared HTTP clients and run policy. Safe to share
/// across concurrently running sessions.
pub struct HrpRunner {
    client: Client,
    client_no_redirect: Client,
    default_timeout: Duration,
    think_time_max: f64,
    fail_fast: bool,
    log_requests: bool,
    cancel: CancellationToken,
    plugin: Option<Arc<dyn PluginCaller>>,
}

fn build_clients(verify: bool) -> Result<(Client, Client)> {
    let client = Client::builder()
        .danger_accept_invalid_certs(!verify)
        .build()
        .map_err(|e| HrpError::Config(format!("build http client failed: {}", e)))?;
    let client_no_redirect = Client::builder()
        .danger_accept_invalid_certs(!verify)
        .redirect(reqwest::redirect::Policy::none())
        .build()
        .map_err(|e| HrpError::Config(format!("build http client failed: {}", e)))?;
    Ok((client, client_no_redirect))
}

impl HrpRunner {
    pub fn new() -> Result<Self> {
        let (client, client_no_redirect) = build_clients(true)?;
        Ok(Self {
            client,
            client_no_redirect,
            default_timeout: DEFAULT_TIMEOUT,
            think_time_max: DEFAULT_THINK_TIME_MAX,
            fail_fast: false,
            log_requests: false,
            cancel: CancellationToken::new(),
            plugin: None,
        })
    }

    /// Toggle TLS certificate verification. Applies to both shared
    /// clients.
    pub fn set_verify(&mut self, verify: bool) -> Result<&mut Self> {
        let (client, client_no_redirect) = build_clients(verify)?;
        self.client = client;
        self.client_no_redirect = client_no_redirect;
        Ok(self)
    }

    /// Abort a testcase after its first failing step.
    pub fn set_fail_fast(&mut self, fail_fast: bool) -> &mut Self {
        self.fail_fast = fail_fast;
        self
    }

    /// Dump requests and responses at debug level.
    pub fn set_request_log(&mut self, enabled: bool) -> &mut Self {
        self.log_requests = enabled;
        self
    }

    pub fn set_default_timeout(&mut self, timeout: Duration) -> &mut Self {
        self.default_timeout = timeout;
        self
    }

    /// Runner-wide cap on think-time waits, in seconds.
    pub fn set_think_time_max(&mut self, seconds: f64) -> &mut Self {
        self.think_time_max = seconds;
        self
    }

    pub fn set_plugin(&mut self, plugin: Arc<dyn PluginCaller>) -> &mut Self {
        self.plugin = Some(plugin);
        self
    }

    /// Token that aborts running sessions between steps when canceled.
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) fn client_for(&self, allow_redirects: bool) -> &Client {
        if allow_redirects {
            &self.client
        } else {
            &self.client_no_redirect
        }
    }

    pub(crate) fn default_timeout(&self) -> Duration {
        self.default_timeout
    }

    pub(crate) fn think_time_max(&self) -> f64 {
        self.think_time_max
    }

    pub(crate) fn fail_fast(&self) -> bool {
        self.fail_fast
    }

    pub(crate) fn log_requests(&self) -> bool {
        self.log_requests
    }

    pub(crate) fn plugin(&self) -> Option<Arc<dyn PluginCaller>> {
        self.plugin.clone()
    }

    pub fn new_session_runner(&self, test_case: TestCase) -> SessionRunner<'_> {
        SessionRunner::new(self, test_case)
    }

    /// Run one testcase to completion. Step failures are reflected in the
    /// summary; the error path is reserved for cancellation.
    pub async fn run_test_case(&self, test_case: &TestCase) -> Result<Summary> {
        let mut session = self.new_session_runner(test_case.clone());
        session.start().await?;
        Ok(session.into_summary())
    }
}

/// A single execution of a testcase: sequences steps, owns the variable
/// scope and the summary. Sibling sessions share nothing mutable.
pub struct SessionRunner<'r> {
    runner: &'r HrpRunner,
    test_case: TestCase,
    parser: Parser,
    session_variables: VariablesMap,
    transactions: HashMap<String, Instant>,
    summary: Summary,
}

impl<'r> SessionRunner<'r> {
    pub(crate) fn new(runner: &'r HrpRunner, test_case: TestCase) -> Self {
        let parser = match runner.plugin() {
            Some(plugin) => Parser::with_plugin(plugin),
            None => Parser::new(),
        };
        let summary = Summary::new(&test_case.config);
        Self {
            runner,
            test_case,
            parser,
            session_variables: VariablesMap::new(),
            transactions: HashMap::new(),
            summary,
        }
    }

    pub(crate) fn runner(&self) -> &'r HrpRunner {
        self.runner
    }

    pub(crate) fn parser(&self) -> &Parser {
        &self.parser
    }

    pub(crate) fn config(&self) -> &TConfig {
        &self.test_case.config
    }

    pub fn summary(&self) -> &Summary {
        &self.summary
    }

    pub(crate) fn summary_mut(&mut self) -> &mut Summary {
        &mut self.summary
    }

    pub fn into_summary(self) -> Summary {
        self.summary
    }

    /// Variables visible to extracted-variable lookups from earlier steps.
    pub fn session_variables(&self) -> &VariablesMap {
        &self.session_variables
    }

    pub(crate) fn start_transaction(&mut self, name: &str) {
        self.transactions.insert(name.to_string(), Instant::now());
    }

    pub(crate) fn end_transaction(&mut self, name: &str) -> Option<Duration> {
        self.transactions.remove(name).map(|started| started.elapsed())
    }

    /// Merge scopes for a step: config < session (extracted) < step-local,
    /// then resolve the mapping against itself (late binding).
    pub async fn merge_step_variables(&self, step_variables: &VariablesMap) -> Result<VariablesMap> {
        let merged = merge_variables(&self.session_variables, &self.test_case.config.variables);
        let merged = merge_variables(step_variables, &merged);
        self.parser.parse_variables(&merged).await
    }

    fn merge_exports(&mut self, exports: &VariablesMap) {
        for (name, value) in exports {
            self.session_variables.insert(name.clone(), value.clone());
        }
    }

    fn finalize(&mut self, started: Instant) {
        self.summary.time.duration = started.elapsed();
        let mut exports = VariablesMap::new();
        for name in &self.test_case.config.export {
            if let Some(value) = self.session_variables.get(name) {
                exports.insert(name.clone(), value.clone());
            }
        }
        self.summary.in_out.export_vars = exports;
    }

    /// Execute the testcase's steps in declaration order.
    #[async_recursion]
    pub async fn start(&mut self) -> Result<()> {
        info!(testcase = %self.config().name, "run testcase start");
        self.summary.time.start_at = SystemTime::now();
        let started = Instant::now();

        for index in 0..self.test_case.test_steps.len() {
            if self.runner.is_cancelled() {
                warn!(testcase = %self.config().name, "testcase canceled");
                self.finalize(started);
                return Err(HrpError::Canceled);
            }

            let step = self.test_case.test_steps[index].clone();
            info!(step = %step.display_name(), step_type = %step.step_type(), "run step");

            match &step.payload {
                StepPayload::ThinkTime(_) => {
                    run_step_think_time(self, &step).await;
                }
                StepPayload::Transaction(_) => {
                    run_step_transaction(self, &step);
                }
                StepPayload::TestCase(_) => {
                    let result = run_step_testcase(self, &step).await;
                    self.merge_exports(&result.export_vars);
                    if !result.success {
                        self.summary.success = false;
                        error!(
                            step = %result.name,
                            attachment = %result.attachment,
                            "sub-testcase failed"
                        );
                        if self.runner.fail_fast() {
                            break;
                        }
                    }
                    // child records were absorbed; the container itself is
                    // not a record
                }
                StepPayload::Request(_) | StepPayload::Api(_) => {
                    let result = match &step.payload {
                        StepPayload::Api(_) => run_step_api(self, &step).await,
                        _ => run_step_request(self, &step).await,
                    };
                    let success = result.success;
                    self.merge_exports(&result.export_vars);
                    self.summary.add_record(result);
                    if !success && self.runner.fail_fast() {
                        break;
                    }
                }
            }
        }

        self.finalize(started);
        info!(
            testcase = %self.config().name,
            success = self.summary.success,
            total = self.summary.stat.total,
            "run testcase end"
        );
        Ok(())
    }
}
