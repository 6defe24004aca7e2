use crate::dsl::{AssignmentSpec, Branch, Flow, Node, NodeType, ProcessModel, ScriptSpec};
use crate::runtime::instance::Variables;
use serde_json::Value;

pub struct ProcessBuilder {
    id: String,
    name: String,
    variables: Variables,
    pub nodes: Vec<Node>, // public so tests can tamper with a model before compiling
    flows: Vec<Flow>,
}

impl ProcessBuilder {
    pub fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            name: id.to_string(),
            variables: Variables::new(),
            nodes: Vec::new(),
            flows: Vec::new(),
        }
    }

    pub fn name(mut self, name: &str) -> Self {
        self.name = name.to_string();
        self
    }

    pub fn var(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.variables.insert(key.to_string(), value.into());
        self
    }

    pub fn start(mut self, id: &str) -> Self {
        self.push(id, None, NodeType::Start { script: None, assignments: Vec::new() });
        self
    }

    pub fn end(mut self, id: &str) -> Self {
        self.push(id, None, NodeType::End);
        self
    }

    pub fn user_task(mut self, id: &str, name: &str) -> Self {
        self.push(id, Some(name), NodeType::UserTask { assignee: None });
        self
    }

    pub fn user_task_for(mut self, id: &str, name: &str, assignee_var: &str) -> Self {
        self.push(
            id,
            Some(name),
            NodeType::UserTask { assignee: Some(assignee_var.to_string()) },
        );
        self
    }

    pub fn automatic_task(self, id: &str, name: &str) -> AutomaticTaskBuilder {
        AutomaticTaskBuilder {
            process_builder: self,
            id: id.to_string(),
            name: name.to_string(),
            script: None,
            assignments: Vec::new(),
        }
    }

    pub fn exclusive_gateway(mut self, id: &str) -> Self {
        self.push(id, None, NodeType::ExclusiveGateway);
        self
    }

    pub fn parallel_gateway(mut self, id: &str) -> Self {
        self.push(id, None, NodeType::ParallelGateway);
        self
    }

    /// Adds a parallel block; each inner vector becomes one linear branch.
    pub fn parallel(mut self, id: &str, branches: Vec<Vec<Node>>) -> Self {
        let branches = branches.into_iter().map(|nodes| Branch { nodes }).collect();
        self.push(id, None, NodeType::Parallel { branches });
        self
    }

    pub fn connect(mut self, source: &str, target: &str) -> Self {
        self.flows.push(flow(source, target, None, None));
        self
    }

    pub fn connect_if(mut self, source: &str, target: &str, condition: &str) -> Self {
        self.flows.push(flow(source, target, Some(condition.to_string()), None));
        self
    }

    pub fn connect_if_hook(mut self, source: &str, target: &str, hook: &str, args: Vec<Value>) -> Self {
        let call = ScriptSpec { hook: hook.to_string(), args, output: None };
        self.flows.push(flow(source, target, None, Some(call)));
        self
    }

    /// Unconditioned flow; taken by a gateway when no condition holds.
    pub fn connect_default(self, source: &str, target: &str) -> Self {
        self.connect(source, target)
    }

    pub fn build(self) -> ProcessModel {
        ProcessModel {
            id: self.id,
            name: self.name,
            variables: self.variables,
            nodes: self.nodes,
            flows: self.flows,
        }
    }

    fn push(&mut self, id: &str, name: Option<&str>, kind: NodeType) {
        self.nodes.push(Node {
            id: id.to_string(),
            name: name.map(str::to_string),
            kind,
        });
    }
}

fn flow(source: &str, target: &str, condition: Option<String>, condition_hook: Option<ScriptSpec>) -> Flow {
    Flow {
        id: None,
        source: source.to_string(),
        target: target.to_string(),
        condition,
        condition_hook,
    }
}

pub struct AutomaticTaskBuilder {
    process_builder: ProcessBuilder,
    id: String,
    name: String,
    script: Option<ScriptSpec>,
    assignments: Vec<AssignmentSpec>,
}

impl AutomaticTaskBuilder {
    pub fn hook(mut self, hook: &str, args: Vec<Value>) -> Self {
        self.script = Some(ScriptSpec { hook: hook.to_string(), args, output: None });
        self
    }

    pub fn output(mut self, var_name: &str) -> Self {
        if let Some(script) = self.script.as_mut() {
            script.output = Some(var_name.to_string());
        }
        self
    }

    pub fn assign(mut self, target: &str, expression: &str) -> Self {
        self.assignments.push(AssignmentSpec {
            target: target.to_string(),
            expression: expression.to_string(),
        });
        self
    }

    pub fn build(mut self) -> ProcessBuilder {
        self.process_builder.nodes.push(Node {
            id: self.id,
            name: Some(self.name),
            kind: NodeType::AutomaticTask {
                script: self.script,
                assignments: self.assignments,
            },
        });
        self.process_builder
    }
}

/// Free-standing nodes for `ProcessBuilder::parallel` branches.
pub fn user_task_node(id: &str, name: &str) -> Node {
    Node {
        id: id.to_string(),
        name: Some(name.to_string()),
        kind: NodeType::UserTask { assignee: None },
    }
}

pub fn assign_node(id: &str, target: &str, expression: &str) -> Node {
    Node {
        id: id.to_string(),
        name: Some(id.to_string()),
        kind: NodeType::AutomaticTask {
            script: None,
            assignments: vec![AssignmentSpec {
                target: target.to_string(),
                expression: expression.to_string(),
            }],
        },
    }
}
