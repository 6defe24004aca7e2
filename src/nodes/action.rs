use serde_json::Value;
use tracing::debug;

use crate::error::{EngineError, Result};
use crate::nodes::flow::select_outgoing;
use crate::runtime::context::StepContext;
use crate::runtime::definition::FlowIndex;
use crate::runtime::instance::Variables;
use crate::runtime::node::NodeBehavior;
use crate::runtime::syscall::Syscall;

/// Calls the node's hook, applies its assignments, then follows the single
/// outgoing flow (or the first whose condition holds).
#[derive(Debug)]
pub struct AutomaticTaskNode;

impl NodeBehavior for AutomaticTaskNode {
    fn execute(&self, ctx: &StepContext<'_>, syscall: &mut dyn Syscall) -> Result<()> {
        run_script_and_leave(ctx, syscall)
    }
}

/// Blocks until completed from outside the engine.
#[derive(Debug)]
pub struct UserTaskNode;

impl NodeBehavior for UserTaskNode {
    fn execute(&self, _ctx: &StepContext<'_>, syscall: &mut dyn Syscall) -> Result<()> {
        syscall.wait();
        Ok(())
    }
}

impl UserTaskNode {
    /// Chooses the flow a completed task leaves by, evaluated against the
    /// variables as they will be after the completion data is merged.
    pub fn leave(ctx: &StepContext<'_>, variables: &Variables) -> Result<FlowIndex> {
        select_outgoing(ctx, variables)
    }
}

/// Writes are staged locally so later assignments and the outgoing
/// conditions see them; the engine commits them only if this returns Ok.
pub(crate) fn run_script_and_leave(ctx: &StepContext<'_>, syscall: &mut dyn Syscall) -> Result<()> {
    let mut staged = ctx.variables().clone();
    let mut writes: Vec<(String, Value)> = Vec::new();

    if let Some(script) = &ctx.node.script {
        let result = ctx.call_hook(script, &staged)?;
        debug!(node = %ctx.node.id, hook = %script.hook, "hook returned");
        if let Some(output) = &script.output {
            staged.insert(output.clone(), result.clone());
            writes.push((output.clone(), result));
        }
    }

    for assignment in &ctx.node.assignments {
        let value = assignment
            .expression
            .eval_json(&staged)
            .map_err(|e| EngineError::HookExecutionError {
                hook: format!("assign {}", assignment.target),
                node: ctx.node.id.clone(),
                source: anyhow::anyhow!("{}: {}", assignment.expression.source(), e),
            })?;
        staged.insert(assignment.target.clone(), value.clone());
        writes.push((assignment.target.clone(), value));
    }

    let flow = select_outgoing(ctx, &staged)?;
    for (key, value) in writes {
        syscall.set_var(&key, value);
    }
    syscall.jump(flow);
    Ok(())
}
