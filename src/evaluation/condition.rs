//! Attribute targeting conditions, a Mongo-style query subset:
//! `{"country": {"$in": ["US", "CA"]}, "$or": [{"plan": "pro"}, {"beta": true}]}`
//!
//! Plain values coerce the attribute like GrowthBook does: string conditions
//! compare the stringified attribute, number conditions the numeric one, and
//! boolean conditions its truthiness. Null and missing attributes only ever
//! equal a null condition. Operators such as `$eq` stay strict.

use regex::Regex;
use serde_json::{Map, Value};
use std::cmp::Ordering;

use super::is_truthy;

pub fn eval_condition(attributes: &Map<String, Value>, condition: &Value) -> bool {
    let Value::Object(condition) = condition else {
        return false;
    };

    condition.iter().all(|(key, expected)| match key.as_str() {
        "$or" => eval_or(attributes, expected),
        "$nor" => !eval_or(attributes, expected),
        "$and" => eval_and(attributes, expected),
        "$not" => !eval_condition(attributes, expected),
        path => eval_condition_value(expected, lookup(attributes, path)),
    })
}

fn eval_or(attributes: &Map<String, Value>, conditions: &Value) -> bool {
    match conditions {
        Value::Array(conditions) => {
            conditions.is_empty() || conditions.iter().any(|c| eval_condition(attributes, c))
        }
        _ => false,
    }
}

fn eval_and(attributes: &Map<String, Value>, conditions: &Value) -> bool {
    match conditions {
        Value::Array(conditions) => conditions.iter().all(|c| eval_condition(attributes, c)),
        _ => false,
    }
}

// "address.country" walks nested objects
fn lookup<'a>(attributes: &'a Map<String, Value>, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = attributes.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

fn is_operator_object(object: &Map<String, Value>) -> bool {
    !object.is_empty() && object.keys().all(|k| k.starts_with('$'))
}

fn eval_condition_value(expected: &Value, actual: Option<&Value>) -> bool {
    if let Value::Object(operators) = expected {
        if is_operator_object(operators) {
            return operators
                .iter()
                .all(|(op, operand)| eval_operator(op, actual, operand));
        }
    }

    let actual = actual.filter(|v| !v.is_null());
    match expected {
        Value::Null => actual.is_none(),
        Value::String(expected) => stringify(actual).is_some_and(|s| s == *expected),
        Value::Number(expected) => match (to_number(actual), expected.as_f64()) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
        Value::Bool(expected) => actual.is_some_and(|v| is_truthy(v) == *expected),
        _ => actual == Some(expected),
    }
}

fn stringify(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

// "" and whitespace count as 0, anything unparsable never matches
fn to_number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) if s.trim().is_empty() => Some(0.0),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn eval_operator(op: &str, actual: Option<&Value>, operand: &Value) -> bool {
    match op {
        "$eq" => actual == Some(operand),
        "$ne" => actual != Some(operand),
        "$lt" => compare(actual, operand) == Some(Ordering::Less),
        "$lte" => matches!(
            compare(actual, operand),
            Some(Ordering::Less | Ordering::Equal)
        ),
        "$gt" => compare(actual, operand) == Some(Ordering::Greater),
        "$gte" => matches!(
            compare(actual, operand),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        "$in" => match operand {
            Value::Array(list) => is_in(actual, list),
            _ => false,
        },
        "$nin" => match operand {
            Value::Array(list) => !is_in(actual, list),
            _ => false,
        },
        "$all" => match (actual, operand) {
            (Some(Value::Array(items)), Value::Array(required)) => required
                .iter()
                .all(|cond| items.iter().any(|item| eval_condition_value(cond, Some(item)))),
            _ => false,
        },
        "$size" => match actual {
            Some(Value::Array(items)) => {
                eval_condition_value(operand, Some(&Value::from(items.len())))
            }
            _ => false,
        },
        "$elemMatch" => match actual {
            Some(Value::Array(items)) => items.iter().any(|item| elem_match(item, operand)),
            _ => false,
        },
        "$exists" => is_truthy(operand) == actual.is_some_and(|v| !v.is_null()),
        "$type" => operand.as_str() == Some(type_name(actual)),
        "$not" => !eval_condition_value(operand, actual),
        "$regex" => match (actual.and_then(Value::as_str), operand.as_str()) {
            (Some(text), Some(pattern)) => Regex::new(pattern)
                .map(|re| re.is_match(text))
                .unwrap_or(false),
            _ => false,
        },
        _ => false,
    }
}

fn elem_match(item: &Value, condition: &Value) -> bool {
    match (item, condition) {
        (_, Value::Object(ops)) if is_operator_object(ops) => {
            eval_condition_value(condition, Some(item))
        }
        (Value::Object(fields), _) => eval_condition(fields, condition),
        _ => false,
    }
}

fn is_in(actual: Option<&Value>, list: &[Value]) -> bool {
    match actual {
        Some(Value::Array(items)) => items.iter().any(|item| list.contains(item)),
        Some(value) => list.contains(value),
        None => false,
    }
}

fn compare(actual: Option<&Value>, operand: &Value) -> Option<Ordering> {
    match (actual?, operand) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

fn type_name(value: Option<&Value>) -> &'static str {
    match value {
        None | Some(Value::Null) => "null",
        Some(Value::Bool(_)) => "boolean",
        Some(Value::Number(_)) => "number",
        Some(Value::String(_)) => "string",
        Some(Value::Array(_)) => "array",
        Some(Value::Object(_)) => "object",
    }
}
