use serde_json::Value;
use tracing::warn;

use crate::error::{EngineError, Result};
use crate::runtime::context::StepContext;
use crate::runtime::definition::{Condition, FlowIndex, SequenceFlow};
use crate::runtime::instance::Variables;
use crate::runtime::node::NodeBehavior;
use crate::runtime::syscall::Syscall;

// --- OUTGOING FLOW SELECTION ---

/// First conditioned flow (declaration order) whose condition holds, else
/// the unconditioned default. A lone unconditioned flow is taken directly.
pub fn select_outgoing(ctx: &StepContext<'_>, variables: &Variables) -> Result<FlowIndex> {
    let mut default = None;
    for (index, flow) in ctx.definition.outgoing(ctx.node_index) {
        match &flow.condition {
            None => {
                default.get_or_insert(index);
            }
            Some(condition) => {
                if evaluate(ctx, flow, condition, variables)? {
                    return Ok(index);
                }
            }
        }
    }
    default.ok_or_else(|| EngineError::NoMatchingFlow {
        node: ctx.node.id.clone(),
    })
}

/// An expression that cannot be evaluated (missing variable, wrong type)
/// stops the step like a failing hook does.
fn evaluate(ctx: &StepContext<'_>, flow: &SequenceFlow, condition: &Condition, variables: &Variables) -> Result<bool> {
    match condition {
        Condition::Expression(expr) => expr.eval_bool(variables).map_err(|e| {
            warn!(flow = %flow.id, condition = %expr.source(), error = %e, "condition evaluation failed");
            EngineError::HookExecutionError {
                hook: format!("condition {}", flow.id),
                node: ctx.node.id.clone(),
                source: anyhow::anyhow!("{}: {}", expr.source(), e),
            }
        }),
        Condition::Hook(call) => match ctx.call_hook(call, variables)? {
            Value::Bool(b) => Ok(b),
            other => {
                warn!(flow = %flow.id, hook = %call.hook, result = %other, "condition hook returned a non-boolean");
                Ok(false)
            }
        },
    }
}

// --- EXCLUSIVE GATEWAY ---

#[derive(Debug)]
pub struct ExclusiveGatewayNode;

impl NodeBehavior for ExclusiveGatewayNode {
    fn execute(&self, ctx: &StepContext<'_>, syscall: &mut dyn Syscall) -> Result<()> {
        let flow = select_outgoing(ctx, ctx.variables())?;
        syscall.jump(flow);
        Ok(())
    }
}

// --- PARALLEL GATEWAY ---

/// Joins when it has several incoming flows, forks when it has several
/// outgoing flows. A gateway with both joins first, then forks.
#[derive(Debug)]
pub struct ParallelGatewayNode;

impl NodeBehavior for ParallelGatewayNode {
    fn execute(&self, ctx: &StepContext<'_>, syscall: &mut dyn Syscall) -> Result<()> {
        let outgoing = ctx.node.outgoing.clone();

        if ctx.node.incoming.len() > 1 {
            let via = ctx.token.arrived_via.as_deref().ok_or_else(|| {
                EngineError::SnapshotCorrupt(format!(
                    "token {} reached join '{}' without an incoming flow",
                    ctx.token.id, ctx.node.id
                ))
            })?;
            let state = ctx.instance.joins().get(&ctx.node.id);
            let complete = ctx.node.incoming.iter().all(|&incoming| {
                let flow_id = &ctx.definition.flow(incoming).id;
                flow_id == via || state.is_some_and(|s| s.has_arrived(flow_id))
            });
            if complete {
                syscall.merge(outgoing);
            } else {
                syscall.arrive();
            }
            return Ok(());
        }

        match outgoing.as_slice() {
            [single] => syscall.jump(*single),
            _ => syscall.fork(outgoing),
        }
        Ok(())
    }
}
