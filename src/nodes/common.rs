use crate::error::Result;
use crate::nodes::action::run_script_and_leave;
use crate::runtime::context::StepContext;
use crate::runtime::node::NodeBehavior;
use crate::runtime::syscall::Syscall;

/// Runs the start event's optional script, then leaves like an automatic task.
#[derive(Debug)]
pub struct StartNode;

impl NodeBehavior for StartNode {
    fn execute(&self, ctx: &StepContext<'_>, syscall: &mut dyn Syscall) -> Result<()> {
        run_script_and_leave(ctx, syscall)
    }
}

#[derive(Debug)]
pub struct EndNode;

impl NodeBehavior for EndNode {
    fn execute(&self, _ctx: &StepContext<'_>, syscall: &mut dyn Syscall) -> Result<()> {
        syscall.terminate();
        Ok(())
    }
}
