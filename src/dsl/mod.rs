pub mod builder;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::runtime::instance::Variables;

/// Process model as written by a modeller (YAML or JSON).
///
/// This is the uncompiled form; `Compiler` turns it into a validated
/// `ProcessDefinition`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProcessModel {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Defaults merged under the caller's start variables.
    #[serde(default, skip_serializing_if = "Variables::is_empty")]
    pub variables: Variables,
    pub nodes: Vec<Node>,
    #[serde(default, alias = "edges")]
    pub flows: Vec<Flow>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum NodeType {
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        script: Option<ScriptSpec>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        assignments: Vec<AssignmentSpec>,
    },
    End,
    UserTask {
        /// Variable holding the assignee; engine default when absent.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        assignee: Option<String>,
    },
    AutomaticTask {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        script: Option<ScriptSpec>,
        #[serde(default, skip_serializing_if = "Vec::is_empty")]
        assignments: Vec<AssignmentSpec>,
    },
    ExclusiveGateway,
    ParallelGateway,

    /// Sugar expanded by the compiler into a fork/join gateway pair.
    Parallel { branches: Vec<Branch> },
}

/// One linear chain of nodes inside a `Parallel` block.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Branch {
    pub nodes: Vec<Node>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Node {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(flatten)]
    pub kind: NodeType,
}

/// Call of a named hook. String arguments of the form `${var}` are
/// replaced by the variable's value before the call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScriptSpec {
    pub hook: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
}

/// `target = expression`, evaluated with evalexpr over the variable bag.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AssignmentSpec {
    pub target: String,
    pub expression: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Flow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub source: String,
    pub target: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_hook: Option<ScriptSpec>,
}

impl Flow {
    pub fn is_conditional(&self) -> bool {
        self.condition.is_some() || self.condition_hook.is_some()
    }
}
