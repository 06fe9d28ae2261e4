use async_trait::async_trait;
use tracing::info;

use super::catch::ErrorFilter;
use crate::action::{ActionRef, TestAction};
use crate::context::TestContext;
use crate::error::{ActionError, ActionResult};

/// Kind of the failures raised by [`Assert`] itself.
pub const ASSERTION_KIND: &str = "AssertionError";

/// Runs one action and expects it to fail with a matching error.
pub struct Assert {
    action: ActionRef,
    filter: ErrorFilter,
}

impl Assert {
    pub fn new(filter: ErrorFilter, action: ActionRef) -> Self {
        Self { action, filter }
    }
}

#[async_trait]
impl TestAction for Assert {
    fn name(&self) -> &str {
        "assert"
    }

    async fn execute(&self, context: &TestContext) -> ActionResult<()> {
        match self.action.execute(context).await {
            Ok(()) => Err(ActionError::failed_with_kind(
                ASSERTION_KIND,
                format!(
                    "Expected exception was not thrown: action '{}' did not fail with {}",
                    self.action.name(),
                    self.filter
                ),
            )),
            Err(e) if self.filter.matches(&e) => {
                info!("Validated expected exception {}: {}", e.kind(), e);
                Ok(())
            }
            Err(e) => Err(ActionError::Failed {
                kind: ASSERTION_KIND.to_string(),
                message: format!("Expected {} but caught {}: {}", self.filter, e.kind(), e),
                cause: Some(Box::new(e)),
            }),
        }
    }
}
