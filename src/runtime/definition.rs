use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::runtime::expr::Expression;
use crate::runtime::instance::Variables;

pub type NodeIndex = usize;
pub type FlowIndex = usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NodeKind {
    Start,
    End,
    UserTask,
    ExclusiveGateway,
    ParallelGateway,
    AutomaticTask,
}

/// Compiled node. Flows are referenced by index into the owning definition.
#[derive(Debug)]
pub struct Node {
    pub id: String,
    pub name: String,
    pub kind: NodeKind,
    pub script: Option<ScriptCall>,
    pub assignments: Vec<Assignment>,
    /// Variable naming the assignee of a user task.
    pub assignee: Option<String>,
    pub incoming: Vec<FlowIndex>,
    /// In declaration order; gateways evaluate conditions in this order.
    pub outgoing: Vec<FlowIndex>,
}

#[derive(Debug)]
pub struct SequenceFlow {
    pub id: String,
    pub source: NodeIndex,
    pub target: NodeIndex,
    pub condition: Option<Condition>,
}

impl SequenceFlow {
    /// An unconditioned flow is the default of its source node.
    pub fn is_default(&self) -> bool {
        self.condition.is_none()
    }
}

#[derive(Debug)]
pub enum Condition {
    Expression(Expression),
    Hook(ScriptCall),
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScriptCall {
    pub hook: String,
    pub args: Vec<Value>,
    pub output: Option<String>,
}

#[derive(Debug)]
pub struct Assignment {
    pub target: String,
    pub expression: Expression,
}

/// Identity of a definition as embedded in snapshots.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DefinitionRef {
    pub model_id: String,
    pub digest: String,
}

impl fmt::Display for DefinitionRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let short = self.digest.get(..12).unwrap_or(&self.digest);
        write!(f, "{}@{}", self.model_id, short)
    }
}

/// Immutable, validated process graph. Built by `Compiler`, shared
/// read-only between any number of instances.
#[derive(Debug)]
pub struct ProcessDefinition {
    pub(crate) reference: DefinitionRef,
    pub(crate) name: String,
    pub(crate) variables: Variables,
    pub(crate) nodes: Vec<Node>,
    pub(crate) flows: Vec<SequenceFlow>,
    pub(crate) start: NodeIndex,
    pub(crate) node_index: HashMap<String, NodeIndex>,
    pub(crate) flow_index: HashMap<String, FlowIndex>,
}

impl ProcessDefinition {
    pub fn model_id(&self) -> &str {
        &self.reference.model_id
    }

    pub fn digest(&self) -> &str {
        &self.reference.digest
    }

    pub fn reference(&self) -> &DefinitionRef {
        &self.reference
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Default variables declared by the model.
    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn nodes(&self) -> &[Node] {
        &self.nodes
    }

    pub fn flows(&self) -> &[SequenceFlow] {
        &self.flows
    }

    pub fn start_index(&self) -> NodeIndex {
        self.start
    }

    pub fn start_node(&self) -> &Node {
        &self.nodes[self.start]
    }

    pub fn node(&self, index: NodeIndex) -> &Node {
        &self.nodes[index]
    }

    pub fn flow(&self, index: FlowIndex) -> &SequenceFlow {
        &self.flows[index]
    }

    pub fn node_index(&self, id: &str) -> Option<NodeIndex> {
        self.node_index.get(id).copied()
    }

    pub fn node_by_id(&self, id: &str) -> Option<&Node> {
        self.node_index(id).map(|i| &self.nodes[i])
    }

    pub fn flow_index(&self, id: &str) -> Option<FlowIndex> {
        self.flow_index.get(id).copied()
    }

    pub fn flow_by_id(&self, id: &str) -> Option<&SequenceFlow> {
        self.flow_index(id).map(|i| &self.flows[i])
    }

    pub fn outgoing(&self, node: NodeIndex) -> impl Iterator<Item = (FlowIndex, &SequenceFlow)> {
        self.nodes[node].outgoing.iter().map(move |&f| (f, &self.flows[f]))
    }

    /// Id of the node a flow leads to.
    pub fn target_id(&self, flow: FlowIndex) -> &str {
        &self.nodes[self.flows[flow].target].id
    }
}
