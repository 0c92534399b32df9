//! Predicate evaluation against an execution's variable bag.
//!
//! A condition resolves its `field` as a dotted path into the variables
//! (missing path means undefined), then compares against `value` with the
//! configured operator. Numeric comparators coerce both sides to numbers;
//! a non-numeric side makes the condition false, never an error.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A single boolean predicate over execution variables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: Value,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    NotEquals,
    GreaterThan,
    LessThan,
    Contains,
    NotContains,
}

/// How a list of gating conditions is composed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConditionLogic {
    #[default]
    And,
    Or,
}

/// Resolve a dotted path (`user.progress.score`) into the variable bag.
pub fn resolve_path<'a>(
    variables: &'a serde_json::Map<String, Value>,
    path: &str,
) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = variables.get(parts.next()?)?;
    for part in parts {
        current = current.get(part)?;
    }
    Some(current)
}

/// Evaluate one condition against the variable bag.
pub fn evaluate(condition: &Condition, variables: &serde_json::Map<String, Value>) -> bool {
    let resolved = resolve_path(variables, &condition.field);

    match condition.operator {
        ConditionOperator::Equals => resolved.map(|v| v == &condition.value).unwrap_or(false),
        ConditionOperator::NotEquals => resolved.map(|v| v != &condition.value).unwrap_or(true),
        ConditionOperator::GreaterThan => numeric_cmp(resolved, &condition.value)
            .map(|o| o == std::cmp::Ordering::Greater)
            .unwrap_or(false),
        ConditionOperator::LessThan => numeric_cmp(resolved, &condition.value)
            .map(|o| o == std::cmp::Ordering::Less)
            .unwrap_or(false),
        ConditionOperator::Contains => {
            string_form(resolved).contains(&string_form(Some(&condition.value)))
        }
        ConditionOperator::NotContains => {
            !string_form(resolved).contains(&string_form(Some(&condition.value)))
        }
    }
}

/// Evaluate a compound gate. An empty list always passes.
pub fn evaluate_all(
    conditions: &[Condition],
    logic: ConditionLogic,
    variables: &serde_json::Map<String, Value>,
) -> bool {
    if conditions.is_empty() {
        return true;
    }
    match logic {
        ConditionLogic::And => conditions.iter().all(|c| evaluate(c, variables)),
        ConditionLogic::Or => conditions.iter().any(|c| evaluate(c, variables)),
    }
}

fn numeric_cmp(resolved: Option<&Value>, expected: &Value) -> Option<std::cmp::Ordering> {
    let a = resolved.and_then(coerce_number)?;
    let b = coerce_number(expected)?;
    a.partial_cmp(&b)
}

fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string_form(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn vars(pairs: &[(&str, Value)]) -> serde_json::Map<String, Value> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn cond(field: &str, operator: ConditionOperator, value: Value) -> Condition {
        Condition {
            field: field.to_string(),
            operator,
            value,
        }
    }

    #[test]
    fn test_equals_and_not_equals() {
        let v = vars(&[("plan", json!("premium"))]);
        assert!(evaluate(&cond("plan", ConditionOperator::Equals, json!("premium")), &v));
        assert!(!evaluate(&cond("plan", ConditionOperator::Equals, json!("free")), &v));
        assert!(evaluate(&cond("plan", ConditionOperator::NotEquals, json!("free")), &v));
        // Missing field: equals is false, not_equals is true.
        assert!(!evaluate(&cond("missing", ConditionOperator::Equals, json!(true)), &v));
        assert!(evaluate(&cond("missing", ConditionOperator::NotEquals, json!(true)), &v));
    }

    #[test]
    fn test_dotted_path_resolution() {
        let v = vars(&[("course", json!({"progress": {"score": 87}}))]);
        assert!(evaluate(
            &cond("course.progress.score", ConditionOperator::GreaterThan, json!(80)),
            &v
        ));
        assert!(!evaluate(
            &cond("course.progress.missing", ConditionOperator::GreaterThan, json!(0)),
            &v
        ));
    }

    #[test]
    fn test_numeric_coercion() {
        let v = vars(&[("score", json!("42"))]);
        // String "42" coerces for numeric comparison.
        assert!(evaluate(&cond("score", ConditionOperator::GreaterThan, json!(40)), &v));
        assert!(evaluate(&cond("score", ConditionOperator::LessThan, json!("50")), &v));
        // Non-numeric side evaluates false, not an error.
        let v = vars(&[("score", json!("n/a"))]);
        assert!(!evaluate(&cond("score", ConditionOperator::GreaterThan, json!(0)), &v));
        assert!(!evaluate(&cond("score", ConditionOperator::LessThan, json!(1000)), &v));
    }

    #[test]
    fn test_contains_on_string_form() {
        let v = vars(&[("tags", json!("beta,cohort-3")), ("count", json!(1234))]);
        assert!(evaluate(&cond("tags", ConditionOperator::Contains, json!("cohort")), &v));
        assert!(evaluate(&cond("tags", ConditionOperator::NotContains, json!("alpha")), &v));
        // Non-string resolved value is compared via its string form.
        assert!(evaluate(&cond("count", ConditionOperator::Contains, json!("23")), &v));
        // Missing value has the empty string form.
        assert!(!evaluate(&cond("missing", ConditionOperator::Contains, json!("x")), &v));
        assert!(evaluate(&cond("missing", ConditionOperator::NotContains, json!("x")), &v));
    }

    #[test]
    fn test_compound_and_or() {
        let v = vars(&[("a", json!(1)), ("b", json!(2))]);
        let both = vec![
            cond("a", ConditionOperator::Equals, json!(1)),
            cond("b", ConditionOperator::Equals, json!(2)),
        ];
        let one = vec![
            cond("a", ConditionOperator::Equals, json!(1)),
            cond("b", ConditionOperator::Equals, json!(99)),
        ];
        assert!(evaluate_all(&both, ConditionLogic::And, &v));
        assert!(!evaluate_all(&one, ConditionLogic::And, &v));
        assert!(evaluate_all(&one, ConditionLogic::Or, &v));
        // Empty gate always passes.
        assert!(evaluate_all(&[], ConditionLogic::And, &v));
        assert!(evaluate_all(&[], ConditionLogic::Or, &v));
    }
}
