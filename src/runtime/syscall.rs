use serde_json::Value;

use crate::runtime::definition::FlowIndex;

/// Interface through which a node step tells the engine what to do with
/// the token it is executing. Nothing is applied until the step succeeds.
pub trait Syscall {
    /// Writes a variable once the step commits.
    fn set_var(&mut self, key: &str, value: Value);

    /// Moves the token along one flow.
    fn jump(&mut self, flow: FlowIndex);

    /// Splits the token into one token per flow.
    fn fork(&mut self, flows: Vec<FlowIndex>);

    /// Parks the token's branch at a join that is still missing branches.
    fn arrive(&mut self);

    /// Completes a join: consumes all awaited branches and continues along `flows`.
    fn merge(&mut self, flows: Vec<FlowIndex>);

    /// Leaves the token where it is.
    fn wait(&mut self);

    /// Ends the current branch.
    fn terminate(&mut self);
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Stay,
    Jump(FlowIndex),
    Fork(Vec<FlowIndex>),
    Arrive,
    Merge(Vec<FlowIndex>),
    Terminate,
}

/// Collected outcome of one node step.
#[derive(Debug)]
pub struct StepEffects {
    pub(crate) writes: Vec<(String, Value)>,
    pub(crate) transition: Transition,
}

impl StepEffects {
    pub fn new() -> Self {
        Self {
            writes: Vec::new(),
            transition: Transition::Stay,
        }
    }

    pub fn transition(&self) -> &Transition {
        &self.transition
    }

    pub fn writes(&self) -> &[(String, Value)] {
        &self.writes
    }
}

impl Default for StepEffects {
    fn default() -> Self {
        Self::new()
    }
}

impl Syscall for StepEffects {
    fn set_var(&mut self, key: &str, value: Value) {
        self.writes.push((key.to_string(), value));
    }

    fn jump(&mut self, flow: FlowIndex) {
        self.transition = Transition::Jump(flow);
    }

    fn fork(&mut self, flows: Vec<FlowIndex>) {
        self.transition = Transition::Fork(flows);
    }

    fn arrive(&mut self) {
        self.transition = Transition::Arrive;
    }

    fn merge(&mut self, flows: Vec<FlowIndex>) {
        self.transition = Transition::Merge(flows);
    }

    fn wait(&mut self) {
        self.transition = Transition::Stay;
    }

    fn terminate(&mut self) {
        self.transition = Transition::Terminate;
    }
}
