use async_trait::async_trait;
use tracing::info;

use super::run_sequence;
use crate::action::{ActionRef, TestAction};
use crate::context::TestContext;
use crate::error::ActionResult;
use crate::expression;

/// Runs children only if a boolean expression holds.
pub struct Conditional {
    expression: String,
    actions: Vec<ActionRef>,
}

impl Conditional {
    pub fn new(expression: impl Into<String>, actions: Vec<ActionRef>) -> Self {
        Self {
            expression: expression.into(),
            actions,
        }
    }
}

#[async_trait]
impl TestAction for Conditional {
    fn name(&self) -> &str {
        "conditional"
    }

    async fn execute(&self, context: &TestContext) -> ActionResult<()> {
        let resolved = context.resolve(&self.expression)?;
        if expression::evaluate(&resolved)? {
            run_sequence(&self.actions, context).await
        } else {
            info!("Condition '{}' not satisfied; skipping", self.expression);
            Ok(())
        }
    }
}
