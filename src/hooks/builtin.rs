use std::collections::BTreeMap;

use serde_json::Value;
use tracing::info;

use crate::hooks::Hook;
use crate::runtime::instance::Variables;

/// Logs its arguments and returns null.
#[derive(Debug)]
pub struct LogHook;

impl Hook for LogHook {
    fn name(&self) -> &str {
        "log"
    }

    fn invoke(&self, args: &[Value], _variables: &Variables) -> anyhow::Result<Value> {
        match args.first().and_then(|v| v.as_str()) {
            Some(msg) => info!("[LOG] {}", msg),
            None => info!("[LOG] {:?}", args),
        }
        Ok(Value::Null)
    }
}

/// Static lookup table: the first argument is the key, a missing key yields
/// `null`. Stands in for organisation lookups such as `get_direct_manager`.
#[derive(Debug, Clone)]
pub struct TableHook {
    name: String,
    table: BTreeMap<String, Value>,
}

impl TableHook {
    pub fn new(name: &str, table: BTreeMap<String, Value>) -> Self {
        Self {
            name: name.to_string(),
            table,
        }
    }
}

impl Hook for TableHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, args: &[Value], _variables: &Variables) -> anyhow::Result<Value> {
        let key = match args.first() {
            Some(Value::String(s)) => s.clone(),
            Some(Value::Null) | None => return Ok(Value::Null),
            Some(other) => other.to_string(),
        };
        Ok(self.table.get(&key).cloned().unwrap_or(Value::Null))
    }
}
