//! Validation matchers.
//!
//! A matcher expression has the form `@name(control)@` (or `@name()@`) and is
//! evaluated against a single value. Iterate and repeat conditions accept a
//! matcher expression instead of a boolean expression, in which case the
//! current index is the value under test.

use std::collections::HashMap;
use std::sync::Arc;

use regex::Regex;

use super::TestContext;
use crate::error::{ActionError, ActionResult};

/// A named predicate over a value and a control argument.
pub trait ValidationMatcher: Send + Sync {
    /// Returns `true` when `value` satisfies the matcher for `control`.
    fn matches(&self, value: &str, control: &str, context: &TestContext) -> ActionResult<bool>;
}

impl<F> ValidationMatcher for F
where
    F: Fn(&str, &str) -> ActionResult<bool> + Send + Sync,
{
    fn matches(&self, value: &str, control: &str, _context: &TestContext) -> ActionResult<bool> {
        self(value, control)
    }
}

/// Stores the value under the variable named by `control`. Always matches.
struct CreateVariableMatcher;

impl ValidationMatcher for CreateVariableMatcher {
    fn matches(&self, value: &str, control: &str, context: &TestContext) -> ActionResult<bool> {
        if control.is_empty() {
            return Err(ActionError::Evaluation(
                "Matcher 'variable' needs a variable name".to_string(),
            ));
        }
        context.set_variable(control, value);
        Ok(true)
    }
}

/// Splits `@name(control)@` into its parts.
///
/// Returns `None` when `expression` is not a matcher expression.
pub fn parse_matcher_expression(expression: &str) -> Option<(&str, &str)> {
    let inner = expression.trim().strip_prefix('@')?.strip_suffix('@')?;
    match inner.find('(') {
        Some(open) => {
            let control = inner[open + 1..].strip_suffix(')')?;
            let control = control.trim();
            let control = control
                .strip_prefix('\'')
                .and_then(|c| c.strip_suffix('\''))
                .unwrap_or(control);
            Some((&inner[..open], control))
        }
        None => Some((inner, "")),
    }
}

/// Returns `true` when `expression` looks like `@name(...)@`.
pub fn is_matcher_expression(expression: &str) -> bool {
    parse_matcher_expression(expression).is_some()
}

/// Registry of validation matchers by name.
#[derive(Clone, Default)]
pub struct ValidationMatcherRegistry {
    matchers: HashMap<String, Arc<dyn ValidationMatcher>>,
}

impl ValidationMatcherRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with the built-in matchers.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(
            "equalsIgnoreCase",
            Arc::new(|value: &str, control: &str| -> ActionResult<bool> {
                Ok(value.eq_ignore_ascii_case(control))
            }),
        );
        registry.register(
            "contains",
            Arc::new(|value: &str, control: &str| -> ActionResult<bool> {
                Ok(value.contains(control))
            }),
        );
        registry.register(
            "startsWith",
            Arc::new(|value: &str, control: &str| -> ActionResult<bool> {
                Ok(value.starts_with(control))
            }),
        );
        registry.register(
            "endsWith",
            Arc::new(|value: &str, control: &str| -> ActionResult<bool> {
                Ok(value.ends_with(control))
            }),
        );
        registry.register(
            "matches",
            Arc::new(|value: &str, control: &str| -> ActionResult<bool> {
                let regex = Regex::new(control).map_err(|e| {
                    ActionError::Evaluation(format!("Invalid regex '{}': {}", control, e))
                })?;
                Ok(regex.is_match(value))
            }),
        );
        registry.register(
            "isNumber",
            Arc::new(|value: &str, _: &str| -> ActionResult<bool> {
                Ok(value.trim().parse::<f64>().is_ok())
            }),
        );
        registry.register(
            "greaterThan",
            Arc::new(|value: &str, control: &str| -> ActionResult<bool> {
                Ok(parse_number(value)? > parse_number(control)?)
            }),
        );
        registry.register(
            "lowerThan",
            Arc::new(|value: &str, control: &str| -> ActionResult<bool> {
                Ok(parse_number(value)? < parse_number(control)?)
            }),
        );
        registry.register("variable", Arc::new(CreateVariableMatcher));
        registry
    }

    /// Registers a matcher, replacing an existing one with the same name.
    pub fn register(&mut self, name: impl Into<String>, matcher: Arc<dyn ValidationMatcher>) {
        self.matchers.insert(name.into(), matcher);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.matchers.contains_key(name)
    }

    /// Evaluates a matcher expression against `value`.
    ///
    /// # Errors
    ///
    /// Fails when the expression is malformed or names an unknown matcher.
    pub fn evaluate(
        &self,
        expression: &str,
        value: &str,
        context: &TestContext,
    ) -> ActionResult<bool> {
        let (name, control) = parse_matcher_expression(expression).ok_or_else(|| {
            ActionError::Evaluation(format!("'{}' is not a matcher expression", expression))
        })?;
        let matcher = self.matchers.get(name).ok_or_else(|| {
            ActionError::Evaluation(format!("Unknown validation matcher '{}'", name))
        })?;
        matcher.matches(value, control, context)
    }
}

fn parse_number(value: &str) -> ActionResult<f64> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|_| ActionError::Evaluation(format!("'{}' is not a number", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_matcher_expression() {
        assert_eq!(
            parse_matcher_expression("@greaterThan(5)@"),
            Some(("greaterThan", "5"))
        );
        assert_eq!(
            parse_matcher_expression("@contains('a b')@"),
            Some(("contains", "a b"))
        );
        assert_eq!(parse_matcher_expression("@isNumber@"), Some(("isNumber", "")));
        assert_eq!(parse_matcher_expression("i lt 5"), None);
    }

    #[tokio::test]
    async fn test_builtin_matchers() {
        let context = TestContext::standalone();
        let registry = ValidationMatcherRegistry::with_defaults();

        assert!(registry.evaluate("@greaterThan(3)@", "4", &context).unwrap());
        assert!(!registry.evaluate("@lowerThan(3)@", "4", &context).unwrap());
        assert!(registry.evaluate("@equalsIgnoreCase(OK)@", "ok", &context).unwrap());
        assert!(registry.evaluate("@matches('^ab+c$')@", "abbbc", &context).unwrap());
        assert!(registry.evaluate("@isNumber()@", "12.5", &context).unwrap());
        assert!(registry.evaluate("@greaterThan(3)@", "x", &context).is_err());
    }

    #[tokio::test]
    async fn test_create_variable_matcher() {
        let context = TestContext::standalone();
        let registry = ValidationMatcherRegistry::with_defaults();

        assert!(registry.evaluate("@variable(orderId)@", "1234", &context).unwrap());
        assert_eq!(context.get_variable("orderId").unwrap(), "1234");
    }

    #[tokio::test]
    async fn test_unknown_matcher() {
        let context = TestContext::standalone();
        let registry = ValidationMatcherRegistry::new();
        assert!(registry.evaluate("@nope()@", "x", &context).is_err());
    }
}
