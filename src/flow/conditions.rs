use std::cmp::Ordering;

use serde_json::Value;

use super::types::{ConditionOperator, StepCondition};

/// Flow 条件求值

/// 在 JSON 视图中按点分路径取值，数字段可索引数组
pub fn resolve_path<'a>(root: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.trim();
    if path.is_empty() {
        return Some(root);
    }
    path.split('.').try_fold(root, |current, segment| match current {
        Value::Object(map) => map.get(segment),
        Value::Array(items) => segment.parse::<usize>().ok().and_then(|i| items.get(i)),
        _ => None,
    })
}

/// 单个条件求值
pub fn evaluate(condition: &StepCondition, view: &Value) -> bool {
    let actual = resolve_path(view, &condition.field).filter(|value| !value.is_null());
    let expected = condition.value.as_ref();

    match condition.operator {
        ConditionOperator::Exists => actual.is_some(),
        ConditionOperator::NotExists => actual.is_none(),
        ConditionOperator::Equals => values_equal(actual, expected),
        ConditionOperator::NotEquals => !values_equal(actual, expected),
        ConditionOperator::GreaterThan => compare(actual, expected) == Some(Ordering::Greater),
        ConditionOperator::LessThan => compare(actual, expected) == Some(Ordering::Less),
        ConditionOperator::Contains => match (actual, expected) {
            (Some(Value::String(haystack)), Some(Value::String(needle))) => {
                haystack.contains(needle.as_str())
            }
            (Some(Value::Array(items)), Some(needle)) => {
                items.iter().any(|item| values_equal(Some(item), Some(needle)))
            }
            (Some(Value::Object(map)), Some(Value::String(key))) => map.contains_key(key),
            _ => false,
        },
    }
}

/// 所有条件都满足时返回 true；无条件视为满足
pub fn evaluate_all(conditions: &[StepCondition], view: &Value) -> bool {
    conditions.iter().all(|condition| evaluate(condition, view))
}

fn values_equal(actual: Option<&Value>, expected: Option<&Value>) -> bool {
    let expected = expected.filter(|value| !value.is_null());
    match (actual, expected) {
        (None, None) => true,
        (Some(Value::Number(a)), Some(Value::Number(b))) => a.as_f64() == b.as_f64(),
        (Some(a), Some(b)) => a == b,
        _ => false,
    }
}

fn compare(actual: Option<&Value>, expected: Option<&Value>) -> Option<Ordering> {
    match (actual?, expected?) {
        (Value::Number(a), Value::Number(b)) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn view() -> Value {
        json!({
            "input": { "score": 7, "tags": ["a", "b"], "name": "agentloom" },
            "variables": { "mode": "fast" },
            "steps": { "fetch": { "status": "completed", "output": { "items": [ {"id": 1} ] } } },
        })
    }

    #[test]
    fn test_resolve_path() {
        let view = view();
        assert_eq!(resolve_path(&view, "input.score"), Some(&json!(7)));
        assert_eq!(
            resolve_path(&view, "steps.fetch.output.items.0.id"),
            Some(&json!(1))
        );
        assert_eq!(resolve_path(&view, "input.missing"), None);
        assert_eq!(resolve_path(&view, "input.score.deeper"), None);
    }

    #[test]
    fn test_operators() {
        let view = view();
        let cases = [
            (StepCondition::equals("variables.mode", json!("fast")), true),
            (StepCondition::equals("input.score", json!(7.0)), true),
            (StepCondition::new("input.score", ConditionOperator::GreaterThan, Some(json!(5))), true),
            (StepCondition::new("input.score", ConditionOperator::LessThan, Some(json!(5))), false),
            (StepCondition::new("input.tags", ConditionOperator::Contains, Some(json!("b"))), true),
            (StepCondition::new("input.name", ConditionOperator::Contains, Some(json!("loom"))), true),
            (StepCondition::new("variables.mode", ConditionOperator::NotEquals, Some(json!("slow"))), true),
            (StepCondition::exists("steps.fetch"), true),
            (StepCondition::new("steps.store", ConditionOperator::NotExists, None), true),
            (StepCondition::new("input.name", ConditionOperator::GreaterThan, Some(json!(1))), false),
        ];
        for (condition, expected) in cases {
            assert_eq!(evaluate(&condition, &view), expected, "{condition:?}");
        }
    }
}
