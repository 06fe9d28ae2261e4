//! Function registry for dynamic string content.
//!
//! Functions are referenced inside any resolvable string as
//! `cadence:name(arg1, arg2)`. Arguments are trimmed, may be wrapped in
//! single quotes, and may themselves contain function calls.

use std::collections::HashMap;
use std::fmt::Write;
use std::sync::Arc;

use rand::Rng;

use crate::error::{ActionError, ActionResult};

/// Prefix marking a function call in a string.
pub const FUNCTION_PREFIX: &str = "cadence:";

/// A named function producing a string from its arguments.
pub type Function = Arc<dyn Fn(&[String]) -> ActionResult<String> + Send + Sync>;

/// Wraps a closure as a [`Function`].
pub fn function<F>(f: F) -> Function
where
    F: Fn(&[String]) -> ActionResult<String> + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Registry of functions available to string resolution.
#[derive(Clone, Default)]
pub struct FunctionRegistry {
    functions: HashMap<String, Function>,
}

impl FunctionRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in functions.
    ///
    /// | Function | Result |
    /// |----------|--------|
    /// | `concat(a, b, ...)` | arguments joined without separator |
    /// | `upperCase(s)` / `lowerCase(s)` | case conversion |
    /// | `substring(s, begin[, end])` | character range of `s` |
    /// | `randomNumber(len)` | `len` random digits |
    /// | `randomUUID()` | UUID v4 |
    /// | `currentDate([format])` | local time, chrono format (default `%Y-%m-%d`) |
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register("concat", function(|args| Ok(args.concat())));
        registry.register(
            "upperCase",
            function(|args| Ok(single_arg("upperCase", args)?.to_uppercase())),
        );
        registry.register(
            "lowerCase",
            function(|args| Ok(single_arg("lowerCase", args)?.to_lowercase())),
        );
        registry.register("substring", function(substring));
        registry.register("randomNumber", function(random_number));
        registry.register(
            "randomUUID",
            function(|_| Ok(uuid::Uuid::new_v4().to_string())),
        );
        registry.register("currentDate", function(current_date));
        registry
    }

    /// Registers a function, replacing an existing one with the same name.
    pub fn register(&mut self, name: impl Into<String>, function: Function) {
        self.functions.insert(name.into(), function);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Invokes a function by name.
    pub fn call(&self, name: &str, args: &[String]) -> ActionResult<String> {
        let func = self.functions.get(name).ok_or_else(|| {
            ActionError::Evaluation(format!("Unknown function '{}{}'", FUNCTION_PREFIX, name))
        })?;
        func(args)
    }

    /// Replaces every function call in `input` with its result.
    pub fn resolve(&self, input: &str) -> ActionResult<String> {
        let mut output = String::with_capacity(input.len());
        let mut rest = input;

        while let Some(start) = rest.find(FUNCTION_PREFIX) {
            output.push_str(&rest[..start]);
            let call = &rest[start + FUNCTION_PREFIX.len()..];

            let open = match call.find('(') {
                Some(open) if is_function_name(&call[..open]) => open,
                _ => {
                    // Not a call; keep the prefix literally
                    output.push_str(FUNCTION_PREFIX);
                    rest = call;
                    continue;
                }
            };
            let close = matching_paren(call, open).ok_or_else(|| {
                ActionError::Evaluation(format!("Unterminated function call in '{}'", input))
            })?;

            let name = &call[..open];
            let args = split_args(&call[open + 1..close])
                .into_iter()
                .map(|arg| self.resolve(&arg))
                .collect::<ActionResult<Vec<_>>>()?;
            output.push_str(&self.call(name, &args)?);
            rest = &call[close + 1..];
        }

        output.push_str(rest);
        Ok(output)
    }
}

fn is_function_name(candidate: &str) -> bool {
    !candidate.is_empty() && candidate.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn matching_paren(s: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut quoted = false;
    for (i, c) in s.char_indices().skip_while(|(i, _)| *i < open) {
        match c {
            '\'' => quoted = !quoted,
            '(' if !quoted => depth += 1,
            ')' if !quoted => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

fn split_args(raw: &str) -> Vec<String> {
    if raw.trim().is_empty() {
        return Vec::new();
    }

    let mut args = Vec::new();
    let mut current = String::new();
    let mut depth = 0usize;
    let mut quoted = false;
    for c in raw.chars() {
        match c {
            '\'' => {
                quoted = !quoted;
                current.push(c);
            }
            '(' if !quoted => {
                depth += 1;
                current.push(c);
            }
            ')' if !quoted => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if !quoted && depth == 0 => args.push(std::mem::take(&mut current)),
            _ => current.push(c),
        }
    }
    args.push(current);

    args.into_iter()
        .map(|arg| {
            let arg = arg.trim();
            arg.strip_prefix('\'')
                .and_then(|a| a.strip_suffix('\''))
                .unwrap_or(arg)
                .to_string()
        })
        .collect()
}

fn single_arg<'a>(name: &str, args: &'a [String]) -> ActionResult<&'a str> {
    match args {
        [arg] => Ok(arg.as_str()),
        _ => Err(ActionError::Evaluation(format!(
            "Function '{}' expects exactly one argument, got {}",
            name,
            args.len()
        ))),
    }
}

fn parse_index(name: &str, value: &str) -> ActionResult<usize> {
    value.trim().parse::<usize>().map_err(|_| {
        ActionError::Evaluation(format!(
            "Function '{}' expects a non-negative integer, got '{}'",
            name, value
        ))
    })
}

fn substring(args: &[String]) -> ActionResult<String> {
    let (text, begin, end) = match args {
        [text, begin] => (text, parse_index("substring", begin)?, None),
        [text, begin, end] => (
            text,
            parse_index("substring", begin)?,
            Some(parse_index("substring", end)?),
        ),
        _ => {
            return Err(ActionError::Evaluation(
                "Function 'substring' expects 2 or 3 arguments".to_string(),
            ));
        }
    };

    let chars: Vec<char> = text.chars().collect();
    let end = end.unwrap_or(chars.len());
    if begin > end || end > chars.len() {
        return Err(ActionError::Evaluation(format!(
            "substring range {}..{} out of bounds for '{}'",
            begin, end, text
        )));
    }
    Ok(chars[begin..end].iter().collect())
}

fn current_date(args: &[String]) -> ActionResult<String> {
    let format = args.first().map(String::as_str).unwrap_or("%Y-%m-%d");
    let mut date = String::new();
    // chrono reports unknown specifiers as a formatting error
    write!(date, "{}", chrono::Local::now().format(format)).map_err(|_| {
        ActionError::Evaluation(format!("Invalid date format '{}'", format))
    })?;
    Ok(date)
}

fn random_number(args: &[String]) -> ActionResult<String> {
    let length = match args.first() {
        Some(len) => parse_index("randomNumber", len)?,
        None => 10,
    };
    let mut rng = rand::thread_rng();
    Ok((0..length)
        .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
        .collect())
}
