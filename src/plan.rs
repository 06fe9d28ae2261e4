//! TOML test plans.
//!
//! A plan file holds one or more `[[test]]` tables. Each test declares its
//! initial variables, its top-level actions and optional `finally` actions.
//! Actions are `type`-tagged tables; containers nest their children under
//! `actions`.
//!
//! ```toml
//! [[test]]
//! name = "order-roundtrip"
//!
//! [test.variables]
//! order = "42"
//!
//! [[test.actions]]
//! type = "send"
//! endpoint = "echo"
//! payload = "order ${order}"
//!
//! [[test.actions]]
//! type = "receive"
//! endpoint = "echo"
//! expect = "@startsWith('order')@"
//!
//! [[test.actions]]
//! type = "repeat-on-error"
//! until = "i > 3"
//! auto_sleep_ms = 100
//! actions = [{ type = "echo", message = "attempt ${i}" }]
//! ```
//!
//! Reusable action lists are declared as `[[template]]` tables and applied
//! with `type = "template"`:
//!
//! ```toml
//! [[template]]
//! name = "login"
//! parameters = { user = "guest" }
//! actions = [{ type = "echo", message = "login ${user}" }]
//!
//! [[test]]
//! name = "admin-login"
//! actions = [{ type = "template", name = "login", parameters = { user = "admin" } }]
//! ```
//!
//! Plans are parsed with serde and then built into action trees against a
//! [`Registry`]. Building resolves every endpoint and capability name and
//! validates container settings, so a plan that builds without error has
//! no configuration left to fail at execution time.

use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use indexmap::IndexMap;
use serde::Deserialize;

use crate::action::{
    ActionRef, CreateVariablesAction, EchoAction, FailAction, InvokeAction, SleepAction,
    StopTimerAction, TraceVariablesAction,
};
use crate::condition::{Condition, DEFAULT_PROBE_TIMEOUT};
use crate::container::{
    Assert, AsyncContainer, Catch, Conditional, ErrorFilter, Iterate, Parallel,
    RepeatOnErrorUntilTrue, RepeatUntilTrue, Sequence, Template, Timer, Wait,
};
use crate::correlation::{ReceiveAction, SendAction};
use crate::error::{ActionError, ActionResult};
use crate::orchestrator::TestCase;
use crate::registry::{Params, Registry};

/// A parsed plan file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Plan {
    #[serde(rename = "template", default)]
    pub templates: Vec<TemplateSpec>,

    #[serde(rename = "test", default)]
    pub tests: Vec<TestSpec>,
}

/// One `[[template]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct TemplateSpec {
    pub name: String,

    /// Default parameter values; callers may override them.
    #[serde(default)]
    pub parameters: IndexMap<String, String>,

    /// Run on the caller's context instead of an isolated copy.
    #[serde(default = "default_global_context")]
    pub global_context: bool,

    #[serde(default)]
    pub actions: Vec<ActionSpec>,
}

fn default_global_context() -> bool {
    true
}

/// One `[[test]]` table.
#[derive(Debug, Clone, Deserialize)]
pub struct TestSpec {
    pub name: String,

    #[serde(default)]
    pub variables: IndexMap<String, String>,

    #[serde(default)]
    pub actions: Vec<ActionSpec>,

    /// Runs after the test body whatever its outcome.
    #[serde(default)]
    pub finally: Vec<ActionSpec>,
}

/// A single action or container.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ActionSpec {
    Echo {
        message: String,
    },
    Sleep {
        ms: u64,
    },
    CreateVariables {
        variables: IndexMap<String, String>,
    },
    Fail {
        message: String,
        #[serde(default)]
        kind: Option<String>,
    },
    TraceVariables {
        #[serde(default)]
        names: Vec<String>,
    },
    /// Stops one timer, or every timer of the test when `timer` is unset.
    StopTimer {
        #[serde(default)]
        timer: Option<String>,
    },
    Invoke {
        capability: String,
        #[serde(default)]
        params: Params,
        #[serde(default)]
        result: Option<String>,
    },
    Send {
        endpoint: String,
        payload: String,
        #[serde(default)]
        headers: IndexMap<String, String>,
        #[serde(default)]
        message_name: Option<String>,
    },
    Receive {
        endpoint: String,
        #[serde(default)]
        selector: Option<String>,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        message_name: Option<String>,
        #[serde(default)]
        expect: Option<String>,
        #[serde(default)]
        extract: IndexMap<String, String>,
    },
    Sequence {
        actions: Vec<ActionSpec>,
    },
    Parallel {
        actions: Vec<ActionSpec>,
    },
    Async {
        actions: Vec<ActionSpec>,
        #[serde(default)]
        success: Vec<ActionSpec>,
        #[serde(default)]
        error: Vec<ActionSpec>,
    },
    Iterate {
        condition: String,
        #[serde(default)]
        index: Option<String>,
        #[serde(default)]
        start: Option<i64>,
        #[serde(default)]
        step: Option<i64>,
        actions: Vec<ActionSpec>,
    },
    RepeatUntilTrue {
        until: String,
        #[serde(default)]
        index: Option<String>,
        #[serde(default)]
        start: Option<i64>,
        #[serde(default)]
        auto_sleep_ms: Option<u64>,
        #[serde(default)]
        ignore_errors: bool,
        actions: Vec<ActionSpec>,
    },
    RepeatOnError {
        until: String,
        #[serde(default)]
        index: Option<String>,
        #[serde(default)]
        start: Option<i64>,
        #[serde(default)]
        auto_sleep_ms: Option<u64>,
        #[serde(default)]
        max_attempts: Option<usize>,
        actions: Vec<ActionSpec>,
    },
    Timer {
        id: String,
        #[serde(default)]
        delay_ms: Option<u64>,
        #[serde(default)]
        interval_ms: Option<u64>,
        #[serde(default)]
        repeat_count: Option<usize>,
        #[serde(default)]
        fork: bool,
        actions: Vec<ActionSpec>,
    },
    Wait {
        condition: ConditionSpec,
        #[serde(default)]
        timeout_ms: Option<u64>,
        #[serde(default)]
        interval_ms: Option<u64>,
        #[serde(default)]
        attempt_timeout_ms: Option<u64>,
    },
    Catch {
        #[serde(default)]
        exception: Option<String>,
        #[serde(default)]
        message: Option<String>,
        actions: Vec<ActionSpec>,
    },
    Assert {
        #[serde(default)]
        exception: Option<String>,
        #[serde(default)]
        message: Option<String>,
        actions: Vec<ActionSpec>,
    },
    Conditional {
        expression: String,
        actions: Vec<ActionSpec>,
    },
    /// Applies a `[[template]]` of the same plan.
    Template {
        name: String,
        #[serde(default)]
        parameters: IndexMap<String, String>,
        /// Ignored (isolated scope) when the template itself is not global.
        #[serde(default)]
        global_context: Option<bool>,
    },
}

/// Condition of a `wait` action.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ConditionSpec {
    Expression {
        expression: String,
    },
    FileExists {
        path: String,
    },
    Http {
        url: String,
        #[serde(default)]
        method: Option<String>,
        #[serde(default)]
        status: Option<u16>,
        #[serde(default)]
        timeout_ms: Option<u64>,
    },
    MessageArrived {
        message: String,
    },
    Action {
        action: Box<ActionSpec>,
    },
}

/// Loads a plan file.
///
/// # Errors
///
/// Returns an error if the file cannot be read or is not a valid plan.
pub fn load_plan(path: &Path) -> anyhow::Result<Plan> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read plan file: {}", path.display()))?;

    parse_plan(&content).with_context(|| format!("Invalid plan file: {}", path.display()))
}

/// Parses a plan from a TOML string.
///
/// # Errors
///
/// Returns an error if the string is not valid TOML or doesn't match the
/// plan schema.
pub fn parse_plan(content: &str) -> anyhow::Result<Plan> {
    let plan: Plan = toml::from_str(content).context("Failed to parse plan")?;
    Ok(plan)
}

impl Plan {
    /// Builds every test of the plan.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error naming the first invalid test.
    pub fn build(&self, registry: &Registry) -> ActionResult<Vec<TestCase>> {
        let mut templates = IndexMap::new();
        for template in &self.templates {
            if templates
                .insert(template.name.clone(), template.clone())
                .is_some()
            {
                return Err(ActionError::config(format!(
                    "Duplicate template name '{}'",
                    template.name
                )));
            }
        }

        let mut names = HashSet::new();
        let mut tests = Vec::with_capacity(self.tests.len());
        for spec in &self.tests {
            if !names.insert(spec.name.as_str()) {
                return Err(ActionError::config(format!(
                    "Duplicate test name '{}'",
                    spec.name
                )));
            }
            tests.push(spec.build_with_templates(registry, &templates)?);
        }
        Ok(tests)
    }
}

impl TestSpec {
    /// Builds the action tree of this test.
    ///
    /// # Errors
    ///
    /// Fails with a configuration error on an invalid action, an unknown
    /// endpoint or capability, or a timer id declared twice.
    pub fn build(&self, registry: &Registry) -> ActionResult<TestCase> {
        self.build_with_templates(registry, &IndexMap::new())
    }

    /// Builds the action tree of this test, resolving `template` actions
    /// against `templates`.
    ///
    /// # Errors
    ///
    /// As [`TestSpec::build`], and also on an unknown template or a
    /// template that applies itself.
    pub fn build_with_templates(
        &self,
        registry: &Registry,
        templates: &IndexMap<String, TemplateSpec>,
    ) -> ActionResult<TestCase> {
        let mut builder = Builder::new(registry, templates);
        let in_test = |e: ActionError| match e {
            ActionError::Configuration(message) => {
                ActionError::config(format!("test '{}': {}", self.name, message))
            }
            other => other,
        };

        let actions = builder.build_all(&self.actions).map_err(in_test)?;
        let finally = builder.build_all(&self.finally).map_err(in_test)?;

        Ok(TestCase::new(self.name.as_str(), actions)
            .with_variables(self.variables.clone())
            .with_finally(finally))
    }
}

struct Builder<'a> {
    registry: &'a Registry,
    templates: &'a IndexMap<String, TemplateSpec>,
    timer_ids: HashSet<String>,
    // Templates being expanded, innermost last
    applying: Vec<String>,
}

impl<'a> Builder<'a> {
    fn new(registry: &'a Registry, templates: &'a IndexMap<String, TemplateSpec>) -> Self {
        Self {
            registry,
            templates,
            timer_ids: HashSet::new(),
            applying: Vec::new(),
        }
    }

    fn build_all(&mut self, specs: &[ActionSpec]) -> ActionResult<Vec<ActionRef>> {
        specs.iter().map(|spec| self.build(spec)).collect()
    }

    fn build(&mut self, spec: &ActionSpec) -> ActionResult<ActionRef> {
        let action: ActionRef = match spec {
            ActionSpec::Echo { message } => Arc::new(EchoAction::new(message.as_str())),
            ActionSpec::Sleep { ms } => Arc::new(SleepAction::new(Duration::from_millis(*ms))),
            ActionSpec::CreateVariables { variables } => {
                Arc::new(CreateVariablesAction::new(variables.clone()))
            }
            ActionSpec::Fail { message, kind } => {
                let mut fail = FailAction::new(message.as_str());
                if let Some(kind) = kind {
                    fail = fail.with_kind(kind.as_str());
                }
                Arc::new(fail)
            }
            ActionSpec::TraceVariables { names } => {
                Arc::new(TraceVariablesAction::new(names.clone()))
            }
            ActionSpec::StopTimer { timer } => match timer {
                Some(id) => Arc::new(StopTimerAction::new(id.as_str())),
                None => Arc::new(StopTimerAction::all()),
            },
            ActionSpec::Invoke {
                capability,
                params,
                result,
            } => {
                let mut invoke = InvokeAction::new(
                    capability.as_str(),
                    self.registry.capability(capability)?,
                    params.clone(),
                );
                if let Some(variable) = result {
                    invoke = invoke.with_result_variable(variable.as_str());
                }
                Arc::new(invoke)
            }
            ActionSpec::Send {
                endpoint,
                payload,
                headers,
                message_name,
            } => {
                let mut send = SendAction::new(self.registry.endpoint(endpoint)?, payload.as_str())
                    .with_headers(headers.clone());
                if let Some(name) = message_name {
                    send = send.with_message_name(name.as_str());
                }
                Arc::new(send)
            }
            ActionSpec::Receive {
                endpoint,
                selector,
                timeout_ms,
                message_name,
                expect,
                extract,
            } => {
                let mut receive = ReceiveAction::new(self.registry.endpoint(endpoint)?)
                    .with_extract(extract.clone());
                if let Some(selector) = selector {
                    receive = receive.with_selector(selector.as_str());
                }
                if let Some(ms) = timeout_ms {
                    receive = receive.with_timeout(Duration::from_millis(*ms));
                }
                if let Some(name) = message_name {
                    receive = receive.with_message_name(name.as_str());
                }
                if let Some(expected) = expect {
                    receive = receive.with_expected_payload(expected.as_str());
                }
                Arc::new(receive)
            }
            ActionSpec::Sequence { actions } => Arc::new(Sequence::new(self.build_all(actions)?)),
            ActionSpec::Parallel { actions } => Arc::new(Parallel::new(self.build_all(actions)?)),
            ActionSpec::Async {
                actions,
                success,
                error,
            } => Arc::new(
                AsyncContainer::new(self.build_all(actions)?)
                    .with_success_actions(self.build_all(success)?)
                    .with_error_actions(self.build_all(error)?),
            ),
            ActionSpec::Iterate {
                condition,
                index,
                start,
                step,
                actions,
            } => {
                let mut iterate = Iterate::new(condition.as_str(), self.build_all(actions)?);
                if let Some(index) = index {
                    iterate = iterate.with_index_name(index.as_str());
                }
                if let Some(start) = start {
                    iterate = iterate.with_start(*start);
                }
                if let Some(step) = step {
                    if *step == 0 {
                        return Err(ActionError::config("iterate step must not be 0"));
                    }
                    iterate = iterate.with_step(*step);
                }
                Arc::new(iterate)
            }
            ActionSpec::RepeatUntilTrue {
                until,
                index,
                start,
                auto_sleep_ms,
                ignore_errors,
                actions,
            } => {
                let mut repeat = RepeatUntilTrue::new(until.as_str(), self.build_all(actions)?)
                    .ignore_errors(*ignore_errors);
                if let Some(index) = index {
                    repeat = repeat.with_index_name(index.as_str());
                }
                if let Some(start) = start {
                    repeat = repeat.with_start(*start);
                }
                if let Some(ms) = auto_sleep_ms {
                    repeat = repeat.with_auto_sleep(Duration::from_millis(*ms));
                }
                Arc::new(repeat)
            }
            ActionSpec::RepeatOnError {
                until,
                index,
                start,
                auto_sleep_ms,
                max_attempts,
                actions,
            } => {
                let mut repeat =
                    RepeatOnErrorUntilTrue::new(until.as_str(), self.build_all(actions)?);
                if let Some(index) = index {
                    repeat = repeat.with_index_name(index.as_str());
                }
                if let Some(start) = start {
                    repeat = repeat.with_start(*start);
                }
                if let Some(ms) = auto_sleep_ms {
                    repeat = repeat.with_auto_sleep(Duration::from_millis(*ms));
                }
                if let Some(max) = max_attempts {
                    if *max == 0 {
                        return Err(ActionError::config(
                            "repeat-on-error max_attempts must be at least 1",
                        ));
                    }
                    repeat = repeat.with_max_attempts(*max);
                }
                Arc::new(repeat)
            }
            ActionSpec::Timer {
                id,
                delay_ms,
                interval_ms,
                repeat_count,
                fork,
                actions,
            } => {
                if !self.timer_ids.insert(id.clone()) {
                    return Err(ActionError::config(format!(
                        "Timer already registered with this id: {}",
                        id
                    )));
                }
                let mut timer = Timer::new(id.as_str(), self.build_all(actions)?).forked(*fork);
                if let Some(ms) = delay_ms {
                    timer = timer.with_delay(Duration::from_millis(*ms));
                }
                if let Some(ms) = interval_ms {
                    timer = timer.with_interval(Duration::from_millis(*ms));
                }
                if let Some(count) = repeat_count {
                    timer = timer.with_repeat_count(*count);
                }
                Arc::new(timer)
            }
            ActionSpec::Wait {
                condition,
                timeout_ms,
                interval_ms,
                attempt_timeout_ms,
            } => {
                let mut wait = Wait::new(self.build_condition(condition)?);
                if let Some(ms) = timeout_ms {
                    wait = wait.with_timeout(Duration::from_millis(*ms));
                }
                if let Some(ms) = interval_ms {
                    wait = wait.with_interval(Duration::from_millis(*ms));
                }
                if let Some(ms) = attempt_timeout_ms {
                    wait = wait.with_attempt_timeout(Duration::from_millis(*ms));
                }
                Arc::new(wait)
            }
            ActionSpec::Catch {
                exception,
                message,
                actions,
            } => Arc::new(Catch::new(
                error_filter(exception, message)?,
                self.build_all(actions)?,
            )),
            ActionSpec::Assert {
                exception,
                message,
                actions,
            } => {
                let filter = error_filter(exception, message)?;
                let mut children = self.build_all(actions)?;
                let action: ActionRef = match children.len() {
                    0 => return Err(ActionError::config("assert requires an action")),
                    1 => children.remove(0),
                    _ => Arc::new(Sequence::new(children)),
                };
                Arc::new(Assert::new(filter, action))
            }
            ActionSpec::Conditional {
                expression,
                actions,
            } => Arc::new(Conditional::new(
                expression.as_str(),
                self.build_all(actions)?,
            )),
            ActionSpec::Template {
                name,
                parameters,
                global_context,
            } => Arc::new(self.build_template(name, parameters, *global_context)?),
        };
        Ok(action)
    }

    fn build_template(
        &mut self,
        name: &str,
        parameters: &IndexMap<String, String>,
        global_context: Option<bool>,
    ) -> ActionResult<Template> {
        let templates = self.templates;
        let template = templates
            .get(name)
            .ok_or_else(|| ActionError::config(format!("Unknown template '{}'", name)))?;
        if self.applying.iter().any(|applying| applying == name) {
            return Err(ActionError::config(format!(
                "Template '{}' applies itself",
                name
            )));
        }

        self.applying.push(name.to_string());
        let actions = self.build_all(&template.actions);
        self.applying.pop();

        let mut merged = template.parameters.clone();
        merged.extend(parameters.clone());
        Ok(Template::new(name, actions?)
            .with_parameters(merged)
            .with_global_context(template.global_context && global_context.unwrap_or(true)))
    }

    fn build_condition(&mut self, spec: &ConditionSpec) -> ActionResult<Condition> {
        let condition = match spec {
            ConditionSpec::Expression { expression } => Condition::Expression(expression.clone()),
            ConditionSpec::FileExists { path } => Condition::FileExists(path.clone()),
            ConditionSpec::Http {
                url,
                method,
                status,
                timeout_ms,
            } => Condition::HttpProbe {
                url: url.clone(),
                method: method
                    .as_deref()
                    .unwrap_or("HEAD")
                    .to_ascii_uppercase(),
                status: status.unwrap_or(200),
                timeout: timeout_ms
                    .map(Duration::from_millis)
                    .unwrap_or(DEFAULT_PROBE_TIMEOUT),
            },
            ConditionSpec::MessageArrived { message } => Condition::MessageArrived(message.clone()),
            ConditionSpec::Action { action } => Condition::ActionSucceeds(self.build(action)?),
        };
        Ok(condition)
    }
}

fn error_filter(exception: &Option<String>, message: &Option<String>) -> ActionResult<ErrorFilter> {
    let filter = match exception {
        Some(kind) => ErrorFilter::kind(kind.as_str()),
        None => ErrorFilter::any(),
    };
    match message {
        Some(pattern) => filter.with_message(pattern),
        None => Ok(filter),
    }
}
