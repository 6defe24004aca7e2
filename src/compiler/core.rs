use std::collections::{HashMap, VecDeque};

use sha2::{Digest, Sha256};

use crate::compiler::expander::Expander;
use crate::dsl::{self, NodeType, ProcessModel, ScriptSpec};
use crate::error::{EngineError, Result};
use crate::runtime::definition::{
    Assignment, Condition, DefinitionRef, FlowIndex, Node, NodeIndex, NodeKind, ProcessDefinition, ScriptCall,
    SequenceFlow,
};
use crate::runtime::expr::Expression;

/// Turns a `ProcessModel` into an immutable `ProcessDefinition`, rejecting
/// graphs the engine cannot execute.
pub struct Compiler {
    id_map: HashMap<String, NodeIndex>,
}

impl Compiler {
    pub fn new() -> Self {
        Self { id_map: HashMap::new() }
    }

    pub fn compile(&mut self, raw_model: ProcessModel) -> Result<ProcessDefinition> {
        self.id_map.clear();
        let model_id = raw_model.id.clone();
        if model_id.trim().is_empty() {
            return Err(EngineError::invalid(&model_id, "model id is empty"));
        }
        let digest = digest_of(&raw_model)?;

        // 0. Expand parallel blocks
        let model = Expander::new().expand(raw_model)?;

        // 1. Index nodes
        let mut nodes = Vec::with_capacity(model.nodes.len());
        for (idx, node) in model.nodes.iter().enumerate() {
            if node.id.is_empty() {
                return Err(EngineError::invalid(&model_id, "node with empty id"));
            }
            if self.id_map.insert(node.id.clone(), idx).is_some() {
                return Err(EngineError::invalid(&model_id, format!("duplicate node id '{}'", node.id)));
            }
            nodes.push(self.transform_node(&model_id, node)?);
        }

        // 2. Flows
        let (flows, flow_index) = self.transform_flows(&model_id, &model.flows, &mut nodes)?;

        // 3. Start node
        let starts: Vec<NodeIndex> = nodes
            .iter()
            .enumerate()
            .filter(|(_, n)| n.kind == NodeKind::Start)
            .map(|(i, _)| i)
            .collect();
        let start = match starts.as_slice() {
            [single] => *single,
            [] => return Err(EngineError::invalid(&model_id, "no start node")),
            _ => return Err(EngineError::invalid(&model_id, "more than one start node")),
        };
        if !nodes[start].incoming.is_empty() {
            return Err(EngineError::invalid(
                &model_id,
                format!("start node '{}' has incoming flows", nodes[start].id),
            ));
        }

        // 4. Per-node structure
        for node in &nodes {
            check_node(&model_id, node, &flows)?;
        }

        // 5. Reachability
        check_reachable(&model_id, &nodes, &flows, start)?;

        Ok(ProcessDefinition {
            reference: DefinitionRef { model_id, digest },
            name: model.name,
            variables: model.variables,
            nodes,
            flows,
            start,
            node_index: std::mem::take(&mut self.id_map),
            flow_index,
        })
    }

    fn transform_node(&self, model_id: &str, node: &dsl::Node) -> Result<Node> {
        let name = node.name.clone().unwrap_or_else(|| node.id.clone());
        let (kind, script, assignments, assignee) = match &node.kind {
            NodeType::Start { script, assignments } => (
                NodeKind::Start,
                script.as_ref().map(script_call),
                compile_assignments(model_id, &node.id, assignments)?,
                None,
            ),
            NodeType::AutomaticTask { script, assignments } => (
                NodeKind::AutomaticTask,
                script.as_ref().map(script_call),
                compile_assignments(model_id, &node.id, assignments)?,
                None,
            ),
            NodeType::End => (NodeKind::End, None, Vec::new(), None),
            NodeType::UserTask { assignee } => (NodeKind::UserTask, None, Vec::new(), assignee.clone()),
            NodeType::ExclusiveGateway => (NodeKind::ExclusiveGateway, None, Vec::new(), None),
            NodeType::ParallelGateway => (NodeKind::ParallelGateway, None, Vec::new(), None),
            NodeType::Parallel { .. } => {
                return Err(EngineError::invalid(
                    model_id,
                    format!("parallel block '{}' should have been expanded", node.id),
                ));
            }
        };
        Ok(Node {
            id: node.id.clone(),
            name,
            kind,
            script,
            assignments,
            assignee,
            incoming: Vec::new(),
            outgoing: Vec::new(),
        })
    }

    fn transform_flows(
        &self,
        model_id: &str,
        raw_flows: &[dsl::Flow],
        nodes: &mut [Node],
    ) -> Result<(Vec<SequenceFlow>, HashMap<String, FlowIndex>)> {
        let mut flows = Vec::with_capacity(raw_flows.len());
        let mut flow_index: HashMap<String, FlowIndex> = HashMap::new();

        // explicit ids first so generated ones never shadow them
        for flow in raw_flows {
            if let Some(id) = &flow.id {
                if flow_index.insert(id.clone(), usize::MAX).is_some() {
                    return Err(EngineError::invalid(model_id, format!("duplicate flow id '{}'", id)));
                }
            }
        }

        for flow in raw_flows {
            let source = self.resolve_target(model_id, &flow.source)?;
            let target = self.resolve_target(model_id, &flow.target)?;
            let id = match &flow.id {
                Some(id) => id.clone(),
                None => unique_flow_id(&flow_index, &flow.source, &flow.target),
            };

            let condition = match (&flow.condition, &flow.condition_hook) {
                (Some(_), Some(_)) => {
                    return Err(EngineError::invalid(
                        model_id,
                        format!("flow '{}' has both a condition and a condition hook", id),
                    ));
                }
                (Some(expr), None) => Some(Condition::Expression(Expression::compile(expr).map_err(|e| {
                    EngineError::invalid(model_id, format!("condition of flow '{}' does not parse: {}", id, e))
                })?)),
                (None, Some(call)) => Some(Condition::Hook(script_call(call))),
                (None, None) => None,
            };

            let index = flows.len();
            flow_index.insert(id.clone(), index);
            nodes[source].outgoing.push(index);
            nodes[target].incoming.push(index);
            flows.push(SequenceFlow {
                id,
                source,
                target,
                condition,
            });
        }

        Ok((flows, flow_index))
    }

    fn resolve_target(&self, model_id: &str, node_id: &str) -> Result<NodeIndex> {
        self.id_map
            .get(node_id)
            .cloned()
            .ok_or_else(|| EngineError::invalid(model_id, format!("flow references unknown node '{}'", node_id)))
    }
}

impl Default for Compiler {
    fn default() -> Self {
        Self::new()
    }
}

fn digest_of(model: &ProcessModel) -> Result<String> {
    let bytes = serde_json::to_vec(model).map_err(|e| EngineError::invalid(&model.id, e.to_string()))?;
    Ok(format!("{:x}", Sha256::digest(&bytes)))
}

fn script_call(script: &ScriptSpec) -> ScriptCall {
    ScriptCall {
        hook: script.hook.clone(),
        args: script.args.clone(),
        output: script.output.clone(),
    }
}

fn compile_assignments(model_id: &str, node_id: &str, raw: &[dsl::AssignmentSpec]) -> Result<Vec<Assignment>> {
    raw.iter()
        .map(|assign| {
            let expression = Expression::compile(&assign.expression).map_err(|e| {
                EngineError::invalid(
                    model_id,
                    format!("assignment to '{}' in node '{}' does not parse: {}", assign.target, node_id, e),
                )
            })?;
            Ok(Assignment {
                target: assign.target.clone(),
                expression,
            })
        })
        .collect()
}

fn unique_flow_id(taken: &HashMap<String, FlowIndex>, source: &str, target: &str) -> String {
    let base = format!("{}->{}", source, target);
    if !taken.contains_key(&base) {
        return base;
    }
    (2..)
        .map(|n| format!("{}#{}", base, n))
        .find(|candidate| !taken.contains_key(candidate))
        .unwrap_or(base)
}

fn check_node(model_id: &str, node: &Node, flows: &[SequenceFlow]) -> Result<()> {
    let outgoing: Vec<&SequenceFlow> = node.outgoing.iter().map(|&f| &flows[f]).collect();
    let defaults = outgoing.iter().filter(|f| f.is_default()).count();
    let fail = |reason: String| Err(EngineError::invalid(model_id, reason));

    match node.kind {
        NodeKind::End => {
            if !outgoing.is_empty() {
                return fail(format!("end node '{}' has outgoing flows", node.id));
            }
        }
        NodeKind::ParallelGateway => {
            if outgoing.is_empty() {
                return fail(format!("parallel gateway '{}' has no outgoing flow", node.id));
            }
            if defaults != outgoing.len() {
                return fail(format!("parallel gateway '{}' has conditioned outgoing flows", node.id));
            }
        }
        NodeKind::ExclusiveGateway => {
            // a single unconditioned outgoing flow is a merging gateway
            if outgoing.len() == 1 && defaults == 0 {
                return fail(format!(
                    "exclusive gateway '{}' has one conditioned outgoing flow and no default",
                    node.id
                ));
            }
            if outgoing.is_empty() {
                return fail(format!("exclusive gateway '{}' has no outgoing flow", node.id));
            }
            if defaults > 1 {
                return fail(format!("exclusive gateway '{}' has more than one default flow", node.id));
            }
        }
        NodeKind::Start | NodeKind::UserTask | NodeKind::AutomaticTask => {
            if outgoing.is_empty() {
                return fail(format!("node '{}' has no outgoing flow", node.id));
            }
            if outgoing.len() > 1 && defaults > 1 {
                return fail(format!("node '{}' has more than one unconditioned outgoing flow", node.id));
            }
        }
    }
    Ok(())
}

fn check_reachable(model_id: &str, nodes: &[Node], flows: &[SequenceFlow], start: NodeIndex) -> Result<()> {
    let mut seen = vec![false; nodes.len()];
    let mut queue = VecDeque::from([start]);
    seen[start] = true;
    while let Some(current) = queue.pop_front() {
        for &f in &nodes[current].outgoing {
            let next = flows[f].target;
            if !seen[next] {
                seen[next] = true;
                queue.push_back(next);
            }
        }
    }
    if let Some(unreachable) = nodes.iter().zip(&seen).find(|(_, s)| !**s).map(|(n, _)| &n.id) {
        return Err(EngineError::invalid(
            model_id,
            format!("node '{}' is not reachable from the start node", unreachable),
        ));
    }
    Ok(())
}
