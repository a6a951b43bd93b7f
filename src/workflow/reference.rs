//! Reference-expression resolution: `$input.<path>` and
//! `$steps.<stepId>.output.<path>` (with `output` silently elided).
//!
//! Grounded on `models::rule::RuleCondition`'s approach to a small,
//! `#[serde(tag = "type")]`-style restricted AST — adapted here from
//! condition evaluation to dotted-path reference resolution. Parsing
//! happens once per workflow-step input at registration, not per execution,
//! per the "dynamic reference expressions → compiled AST" design note.

use crate::ids::StepId;
use serde_json::Value;
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReferenceExpr {
    Input(Vec<String>),
    Step(StepId, Vec<String>),
}

/// Parses a reference-expression string. Returns `None` for anything that
/// isn't a `$input.` or `$steps.` string, meaning the caller should treat
/// the original value as a literal.
pub fn parse(raw: &str) -> Option<ReferenceExpr> {
    if let Some(rest) = raw.strip_prefix("$input.") {
        return Some(ReferenceExpr::Input(split_path(rest)));
    }
    if let Some(rest) = raw.strip_prefix("$steps.") {
        let mut parts = rest.splitn(2, '.');
        let step_id = parts.next()?.to_string();
        let remainder = parts.next().unwrap_or("");
        let mut path = split_path(remainder);
        // `$steps.x.output.y` and `$steps.x.y` are equivalent: the literal
        // `output` segment, if present as the first path component, is elided.
        if path.first().map(String::as_str) == Some("output") {
            path.remove(0);
        }
        return Some(ReferenceExpr::Step(StepId::new(step_id), path));
    }
    None
}

fn split_path(path: &str) -> Vec<String> {
    path.split('.').filter(|s| !s.is_empty()).map(str::to_string).collect()
}

fn navigate(root: &Value, path: &[String]) -> Value {
    let mut current = root;
    for segment in path {
        match current.get(segment) {
            Some(next) => current = next,
            None => return Value::Null,
        }
    }
    current.clone()
}

/// Resolves a single step-input value: if `value` is a reference-expression
/// string, navigate to the referenced data; otherwise return it unchanged
/// as a literal. Unresolved paths and unknown step ids resolve to
/// `Value::Null` ("undefined") rather than erroring.
pub fn resolve(value: &Value, initial_inputs: &Value, step_outputs: &HashMap<StepId, Value>) -> Value {
    let Value::String(raw) = value else {
        return value.clone();
    };
    match parse(raw) {
        Some(ReferenceExpr::Input(path)) => navigate(initial_inputs, &path),
        Some(ReferenceExpr::Step(step_id, path)) => step_outputs
            .get(&step_id)
            .map(|output| navigate(output, &path))
            .unwrap_or(Value::Null),
        None => value.clone(),
    }
}

pub fn resolve_map(
    inputs: &HashMap<String, Value>,
    initial_inputs: &Value,
    step_outputs: &HashMap<StepId, Value>,
) -> HashMap<String, Value> {
    inputs
        .iter()
        .map(|(name, value)| (name.clone(), resolve(value, initial_inputs, step_outputs)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolves_from_initial_inputs() {
        let inputs = json!({"userRequest": "Deploy X"});
        let resolved = resolve(&json!("$input.userRequest"), &inputs, &HashMap::new());
        assert_eq!(resolved, json!("Deploy X"));
    }

    #[test]
    fn output_segment_is_elided_silently() {
        let mut outputs = HashMap::new();
        outputs.insert(StepId::new("extract"), json!({"tasks": ["a", "b"]}));

        let with_output = resolve(&json!("$steps.extract.output.tasks"), &json!({}), &outputs);
        let without_output = resolve(&json!("$steps.extract.tasks"), &json!({}), &outputs);
        assert_eq!(with_output, without_output);
        assert_eq!(with_output, json!(["a", "b"]));
    }

    #[test]
    fn unresolved_paths_yield_null_without_panicking() {
        let resolved = resolve(&json!("$steps.missing.output.x"), &json!({}), &HashMap::new());
        assert_eq!(resolved, Value::Null);
    }

    #[test]
    fn literals_pass_through_untouched() {
        let resolved = resolve(&json!(42), &json!({}), &HashMap::new());
        assert_eq!(resolved, json!(42));
        let resolved = resolve(&json!("just a string"), &json!({}), &HashMap::new());
        assert_eq!(resolved, json!("just a string"));
    }
}
