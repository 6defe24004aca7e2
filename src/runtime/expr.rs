//! Bridge between JSON variables and evalexpr.

use std::fmt;

use evalexpr::{
    ContextWithMutableVariables, DefaultNumericTypes, HashMapContext, Node as EvalNode,
    build_operator_tree,
};
use serde_json::{Value, json};

use crate::runtime::instance::Variables;

/// Precompiled evalexpr expression.
pub struct Expression {
    source: String,
    tree: EvalNode<DefaultNumericTypes>,
}

impl fmt::Debug for Expression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Expression").field(&self.source).finish()
    }
}

impl Expression {
    /// `${var}` placeholders are accepted and read as plain identifiers.
    pub fn compile(source: &str) -> Result<Self, String> {
        let clean = strip_placeholders(source);
        let tree = build_operator_tree::<DefaultNumericTypes>(&clean).map_err(|e| e.to_string())?;
        Ok(Self { source: clean, tree })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn eval_bool(&self, variables: &Variables) -> Result<bool, String> {
        let ctx = eval_context(variables);
        self.tree.eval_boolean_with_context(&ctx).map_err(|e| e.to_string())
    }

    pub fn eval_json(&self, variables: &Variables) -> Result<Value, String> {
        let ctx = eval_context(variables);
        let result = self.tree.eval_with_context(&ctx).map_err(|e| e.to_string())?;
        Ok(to_json(result))
    }
}

/// Rewrites `${name}` to `name`. Anything else, including braces inside
/// string literals, is copied unchanged.
fn strip_placeholders(source: &str) -> String {
    let mut out = String::with_capacity(source.len());
    let mut rest = source;
    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        match after.find('}') {
            Some(close) if is_identifier(&after[..close]) => {
                out.push_str(&after[..close]);
                rest = &after[close + 1..];
            }
            _ => {
                out.push_str("${");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

fn is_identifier(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '.')
}

fn eval_context(variables: &Variables) -> HashMapContext<DefaultNumericTypes> {
    let mut ctx = HashMapContext::<DefaultNumericTypes>::new();
    for (k, v) in variables {
        if let Some(ev) = to_eval(v) {
            let _ = ctx.set_value(k.clone(), ev);
        }
    }
    ctx
}

fn to_eval(value: &Value) -> Option<evalexpr::Value> {
    match value {
        Value::String(s) => Some(evalexpr::Value::String(s.clone())),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(evalexpr::Value::Int(i))
            } else {
                n.as_f64().map(evalexpr::Value::Float)
            }
        }
        Value::Bool(b) => Some(evalexpr::Value::Boolean(*b)),
        Value::Array(items) => {
            let tuple: Option<Vec<_>> = items.iter().map(to_eval).collect();
            tuple.map(evalexpr::Value::Tuple)
        }
        Value::Null => Some(evalexpr::Value::Empty),
        // objects have no evalexpr counterpart
        Value::Object(_) => None,
    }
}

fn to_json(value: evalexpr::Value) -> Value {
    match value {
        evalexpr::Value::String(s) => Value::String(s),
        evalexpr::Value::Int(i) => json!(i),
        evalexpr::Value::Float(f) => json!(f),
        evalexpr::Value::Boolean(b) => Value::Bool(b),
        evalexpr::Value::Tuple(items) => Value::Array(items.into_iter().map(to_json).collect()),
        evalexpr::Value::Empty => Value::Null,
    }
}

/// Replaces every `"${name}"` string in `value` with the variable's value.
/// Unknown variables resolve to `null`.
pub fn resolve_placeholders(value: &Value, variables: &Variables) -> Value {
    match value {
        Value::String(s) if s.starts_with("${") && s.ends_with('}') => {
            let name = &s[2..s.len() - 1];
            variables.get(name).cloned().unwrap_or(Value::Null)
        }
        Value::Array(items) => Value::Array(items.iter().map(|v| resolve_placeholders(v, variables)).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), resolve_placeholders(v, variables)))
                .collect(),
        ),
        other => other.clone(),
    }
}
