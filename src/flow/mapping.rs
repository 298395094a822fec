use serde_json::{Map, Value};

use super::conditions::resolve_path;
use super::types::FlowStep;
use crate::state::FlowContext;

// 输入 / 输出映射
//
// 以 `$` 开头的字符串是路径（`$input.x`、`$variables.y`、`$steps.a.output.z`），
// 其余值原样使用。

/// Resolves `$` paths against `view`; unresolved paths become `null`.
pub fn resolve_value(value: &Value, view: &Value) -> Value {
    match value {
        Value::String(text) => match text.strip_prefix('$') {
            Some(path) => resolve_path(view, path).cloned().unwrap_or(Value::Null),
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_value(v, view)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(key, v)| (key.clone(), resolve_value(v, view)))
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Step input: the mapped fields, or the flow input when the step declares none.
pub fn resolve_input(step: &FlowStep, ctx: &FlowContext) -> Value {
    match &step.input {
        Some(mapping) => {
            let view = ctx.view();
            Value::Object(
                mapping
                    .iter()
                    .map(|(key, value)| (key.clone(), resolve_value(value, &view)))
                    .collect(),
            )
        }
        None => Value::Object(ctx.input.clone()),
    }
}

/// Applies a step's output mapping, returning the variables it set.
pub fn apply_output(step: &FlowStep, output: &Value, ctx: &mut FlowContext) -> Map<String, Value> {
    let mut assigned = Map::new();
    let Some(mapping) = &step.output else {
        return assigned;
    };
    for (variable, path) in mapping {
        let value = match path.as_str() {
            Some(path) => {
                let path = path.strip_prefix('$').unwrap_or(path);
                let path = path.strip_prefix('.').unwrap_or(path);
                resolve_path(output, path).cloned().unwrap_or(Value::Null)
            }
            None => path.clone(),
        };
        ctx.set_variable(variable.clone(), value.clone());
        assigned.insert(variable.clone(), value);
    }
    assigned
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_resolve_input_paths() {
        let mut ctx = FlowContext::new("exec", "flow");
        ctx.input.insert("city".into(), json!("Paris"));
        ctx.set_variable("units", json!("metric"));
        ctx.steps.insert(
            "geo".into(),
            json!({ "status": "completed", "output": { "lat": 48.8 } }),
        );

        let step = FlowStep::new("weather", "tool")
            .with_input("city", json!("$input.city"))
            .with_input("units", json!("$variables.units"))
            .with_input("lat", json!("$steps.geo.output.lat"))
            .with_input("missing", json!("$input.nope"))
            .with_input("literal", json!(3));

        assert_eq!(
            resolve_input(&step, &ctx),
            json!({
                "city": "Paris",
                "units": "metric",
                "lat": 48.8,
                "missing": null,
                "literal": 3,
            })
        );
    }

    #[test]
    fn test_default_input_is_flow_input() {
        let mut ctx = FlowContext::new("exec", "flow");
        ctx.input.insert("q".into(), json!("rust"));
        let step = FlowStep::new("search", "tool");
        assert_eq!(resolve_input(&step, &ctx), json!({ "q": "rust" }));
    }

    #[test]
    fn test_apply_output() {
        let mut ctx = FlowContext::new("exec", "flow");
        let step = FlowStep::new("fetch", "tool")
            .with_output("all", "$")
            .with_output("first", "$items.0");
        let assigned = apply_output(&step, &json!({ "items": ["x", "y"] }), &mut ctx);
        assert_eq!(assigned.len(), 2);
        assert_eq!(ctx.variable("first"), Some(&json!("x")));
        assert_eq!(ctx.variable("all"), Some(&json!({ "items": ["x", "y"] })));
    }
}
