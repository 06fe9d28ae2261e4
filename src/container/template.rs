use async_trait::async_trait;
use indexmap::IndexMap;
use tracing::{debug, info};

use super::run_sequence;
use crate::action::{ActionRef, TestAction};
use crate::context::TestContext;
use crate::error::ActionResult;

/// A named, reusable action list run with parameters.
///
/// Parameters are resolved in declaration order and set as variables before
/// the body runs, so a parameter may reference one declared before it. With
/// a global context the body runs on the caller's context and its variable
/// writes stay visible afterwards; otherwise it runs on an isolated copy.
pub struct Template {
    name: String,
    parameters: IndexMap<String, String>,
    global_context: bool,
    actions: Vec<ActionRef>,
}

impl Template {
    pub fn new(template: &str, actions: Vec<ActionRef>) -> Self {
        Self {
            name: format!("template:{}", template),
            parameters: IndexMap::new(),
            global_context: true,
            actions,
        }
    }

    pub fn with_parameters(mut self, parameters: IndexMap<String, String>) -> Self {
        self.parameters = parameters;
        self
    }

    pub fn with_global_context(mut self, global_context: bool) -> Self {
        self.global_context = global_context;
        self
    }
}

#[async_trait]
impl TestAction for Template {
    fn name(&self) -> &str {
        &self.name
    }

    async fn execute(&self, context: &TestContext) -> ActionResult<()> {
        debug!(
            "Executing template '{}' with {} embedded actions",
            self.name,
            self.actions.len()
        );

        let isolated;
        let inner = if self.global_context {
            context
        } else {
            isolated = context.isolated();
            &isolated
        };

        for (name, value) in &self.parameters {
            let value = inner.resolve(value)?;
            debug!("Setting parameter for template {}={}", name, value);
            inner.set_variable(name.as_str(), value);
        }

        run_sequence(&self.actions, inner).await?;
        info!("Template '{}' was executed successfully", self.name);
        Ok(())
    }
}
