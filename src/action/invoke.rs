//! Invocation of a named capability with typed parameters.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use super::TestAction;
use crate::context::TestContext;
use crate::error::ActionResult;
use crate::registry::{Capability, ParamValue, Params};

/// Calls a registered [`Capability`].
///
/// Text parameters are resolved against the context before the call. The
/// capability's return value is stored in `result_variable` when set.
pub struct InvokeAction {
    capability_name: String,
    capability: Arc<dyn Capability>,
    params: Params,
    result_variable: Option<String>,
}

impl InvokeAction {
    pub fn new(
        capability_name: impl Into<String>,
        capability: Arc<dyn Capability>,
        params: Params,
    ) -> Self {
        Self {
            capability_name: capability_name.into(),
            capability,
            params,
            result_variable: None,
        }
    }

    pub fn with_result_variable(mut self, variable: impl Into<String>) -> Self {
        self.result_variable = Some(variable.into());
        self
    }
}

#[async_trait]
impl TestAction for InvokeAction {
    fn name(&self) -> &str {
        "invoke"
    }

    fn description(&self) -> Option<&str> {
        Some(&self.capability_name)
    }

    async fn execute(&self, context: &TestContext) -> ActionResult<()> {
        let mut params = Params::with_capacity(self.params.len());
        for (name, value) in &self.params {
            let value = match value {
                ParamValue::Text(text) => ParamValue::Text(context.resolve(text)?),
                other => other.clone(),
            };
            params.insert(name.clone(), value);
        }

        debug!("Invoking capability '{}'", self.capability_name);
        let result = self.capability.invoke(&params, context).await?;

        if let (Some(variable), Some(value)) = (&self.result_variable, result) {
            context.set_variable(variable.as_str(), value);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ActionError;

    struct Multiply;

    #[async_trait]
    impl Capability for Multiply {
        async fn invoke(
            &self,
            params: &Params,
            _context: &TestContext,
        ) -> ActionResult<Option<String>> {
            match (params.get("a"), params.get("b")) {
                (Some(ParamValue::Int(a)), Some(ParamValue::Int(b))) => {
                    Ok(Some((a * b).to_string()))
                }
                _ => Err(ActionError::failed("expected integer parameters a and b")),
            }
        }
    }

    struct Greet;

    #[async_trait]
    impl Capability for Greet {
        async fn invoke(
            &self,
            params: &Params,
            _context: &TestContext,
        ) -> ActionResult<Option<String>> {
            Ok(params.get("who").map(|who| format!("hello {}", who)))
        }
    }

    #[tokio::test]
    async fn test_invoke_stores_result() {
        let context = TestContext::standalone();
        let mut params = Params::new();
        params.insert("a".into(), ParamValue::Int(6));
        params.insert("b".into(), ParamValue::Int(7));

        InvokeAction::new("multiply", Arc::new(Multiply), params)
            .with_result_variable("product")
            .execute(&context)
            .await
            .unwrap();
        assert_eq!(context.get_variable("product").unwrap(), "42");
    }

    #[tokio::test]
    async fn test_invoke_resolves_text_params() {
        let context = TestContext::standalone();
        context.set_variable("user", "bob");
        let mut params = Params::new();
        params.insert("who".into(), ParamValue::Text("${user}".into()));

        InvokeAction::new("greet", Arc::new(Greet), params)
            .with_result_variable("greeting")
            .execute(&context)
            .await
            .unwrap();
        assert_eq!(context.get_variable("greeting").unwrap(), "hello bob");
    }
}
