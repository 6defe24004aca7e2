use serde_json::Value;

use crate::error::Result;
use crate::hooks::HookRegistry;
use crate::runtime::definition::{Node, NodeIndex, ProcessDefinition, ScriptCall};
use crate::runtime::expr::resolve_placeholders;
use crate::runtime::instance::{ProcessInstance, Token, Variables};

/// Read-only view handed to a node while it executes one step.
pub struct StepContext<'a> {
    pub definition: &'a ProcessDefinition,
    pub instance: &'a ProcessInstance,
    pub node_index: NodeIndex,
    pub node: &'a Node,
    pub token: &'a Token,
    pub hooks: &'a HookRegistry,
}

impl<'a> StepContext<'a> {
    pub fn variables(&self) -> &Variables {
        self.instance.variables()
    }

    /// Resolves `${var}` arguments against `variables` and invokes the hook.
    pub fn call_hook(&self, call: &ScriptCall, variables: &Variables) -> Result<Value> {
        let args: Vec<Value> = call
            .args
            .iter()
            .map(|arg| resolve_placeholders(arg, variables))
            .collect();
        self.hooks.invoke(&call.hook, &args, variables, &self.node.id)
    }
}
