//! Named functions the engine can call from automatic tasks and flow
//! conditions, e.g. "find the manager of this employee".

use std::collections::BTreeMap;
use std::fmt::{self, Debug};
use std::sync::Arc;

use serde_json::Value;

use crate::error::{EngineError, Result};
use crate::runtime::instance::Variables;

pub mod builtin;

/// A lookup or side effect reachable from a process model.
pub trait Hook: Send + Sync + Debug {
    fn name(&self) -> &str;

    /// `args` are already resolved against `variables`.
    fn invoke(&self, args: &[Value], variables: &Variables) -> anyhow::Result<Value>;
}

type HookFn = dyn Fn(&[Value], &Variables) -> anyhow::Result<Value> + Send + Sync;

/// Adapts a closure to `Hook`.
pub struct FnHook {
    name: String,
    func: Box<HookFn>,
}

impl FnHook {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(&[Value], &Variables) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Self {
            name: name.to_string(),
            func: Box::new(func),
        }
    }
}

impl Debug for FnHook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnHook").field("name", &self.name).finish()
    }
}

impl Hook for FnHook {
    fn name(&self) -> &str {
        &self.name
    }

    fn invoke(&self, args: &[Value], variables: &Variables) -> anyhow::Result<Value> {
        (self.func)(args, variables)
    }
}

/// Hooks by name. Cloning shares the hook implementations.
#[derive(Debug, Clone, Default)]
pub struct HookRegistry {
    hooks: BTreeMap<String, Arc<dyn Hook>>,
}

impl HookRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces any hook already registered under the same name.
    pub fn register(&mut self, hook: Arc<dyn Hook>) {
        self.hooks.insert(hook.name().to_string(), hook);
    }

    pub fn register_fn<F>(&mut self, name: &str, func: F)
    where
        F: Fn(&[Value], &Variables) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnHook::new(name, func)));
    }

    pub fn contains(&self, name: &str) -> bool {
        self.hooks.contains_key(name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.hooks.keys().map(String::as_str)
    }

    /// Calls `name` on behalf of `node`. Failures are reported as
    /// `HookExecutionError` and never retried.
    pub fn invoke(&self, name: &str, args: &[Value], variables: &Variables, node: &str) -> Result<Value> {
        let hook = self
            .hooks
            .get(name)
            .ok_or_else(|| EngineError::HookNotRegistered(name.to_string()))?;
        hook.invoke(args, variables)
            .map_err(|source| EngineError::HookExecutionError {
                hook: name.to_string(),
                node: node.to_string(),
                source,
            })
    }
}
