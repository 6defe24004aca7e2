use std::fmt::Debug;

use crate::error::Result;
use crate::runtime::context::StepContext;
use crate::runtime::syscall::Syscall;

/// Behaviour of one node kind.
pub trait NodeBehavior: Send + Sync + Debug {
    /// Executes one step for the token in `ctx`. Must not have side effects
    /// other than through `syscall`.
    fn execute(&self, ctx: &StepContext<'_>, syscall: &mut dyn Syscall) -> Result<()>;
}
