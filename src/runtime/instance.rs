use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::runtime::definition::{DefinitionRef, FlowIndex, NodeKind, ProcessDefinition};
use crate::runtime::syscall::{StepEffects, Transition};
use crate::runtime::task::ReadyTask;

/// Variable bag. Ordered so snapshots serialize deterministically.
pub type Variables = BTreeMap<String, Value>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TokenState {
    /// Sitting at `node`: blocked on a user task, otherwise eligible to advance.
    Waiting,
    /// Terminated at an end event, merged by a join, or parked at a join
    /// until its sibling branches arrive (see `ProcessInstance::joins`).
    Consumed,
}

/// The fork a token was created by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForkOrigin {
    pub gateway: String,
    pub flow: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    pub id: Uuid,
    /// Creation order within the instance.
    pub seq: u64,
    pub node: String,
    pub state: TokenState,
    /// Flow the token last travelled; joins use it to record the arriving branch.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub arrived_via: Option<String>,
    /// Set while the token waits at a user task.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fork: Option<ForkOrigin>,
}

impl Token {
    pub fn is_active(&self) -> bool {
        self.state == TokenState::Waiting
    }
}

/// Branches that have reached a parallel join, keyed by incoming flow id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinState {
    pub arrivals: BTreeMap<String, Vec<Uuid>>,
}

impl JoinState {
    pub fn has_arrived(&self, flow: &str) -> bool {
        self.arrivals.get(flow).is_some_and(|tokens| !tokens.is_empty())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum HistoryEvent {
    NodeEntered { node: String, token: Uuid, at: DateTime<Utc> },
    NodeLeft { node: String, token: Uuid, flow: String, at: DateTime<Utc> },
    TaskCompleted { node: String, token: Uuid, task_id: Uuid, at: DateTime<Utc> },
    TokensForked { node: String, from: Uuid, into: Vec<Uuid>, at: DateTime<Utc> },
    BranchArrived { node: String, token: Uuid, flow: String, at: DateTime<Utc> },
    TokensJoined { node: String, merged: Vec<Uuid>, into: Vec<Uuid>, at: DateTime<Utc> },
    TokenConsumed { node: String, token: Uuid, at: DateTime<Utc> },
    InstanceCompleted { at: DateTime<Utc> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceStatus {
    Running,
    Completed,
}

/// Full run-state of one process instance. Self-contained: everything the
/// engine needs besides the definition lives here and in its snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessInstance {
    pub(crate) id: Uuid,
    pub(crate) definition: DefinitionRef,
    pub(crate) variables: Variables,
    pub(crate) tokens: Vec<Token>,
    #[serde(default)]
    pub(crate) joins: BTreeMap<String, JoinState>,
    pub(crate) history: Vec<HistoryEvent>,
    pub(crate) completed: bool,
    pub(crate) next_seq: u64,
    pub(crate) created_at: DateTime<Utc>,
    pub(crate) updated_at: DateTime<Utc>,
}

impl ProcessInstance {
    /// Fresh instance with one token on the start node. Does not advance.
    pub(crate) fn new(definition: &ProcessDefinition, variables: Variables) -> Self {
        let now = Utc::now();
        let mut instance = Self {
            id: Uuid::new_v4(),
            definition: definition.reference().clone(),
            variables,
            tokens: Vec::new(),
            joins: BTreeMap::new(),
            history: Vec::new(),
            completed: false,
            next_seq: 0,
            created_at: now,
            updated_at: now,
        };
        let start = definition.start_node().id.clone();
        instance.spawn(definition, &start, None, None);
        instance
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn definition(&self) -> &DefinitionRef {
        &self.definition
    }

    pub fn variables(&self) -> &Variables {
        &self.variables
    }

    pub fn tokens(&self) -> &[Token] {
        &self.tokens
    }

    pub fn active_tokens(&self) -> impl Iterator<Item = &Token> {
        self.tokens.iter().filter(|t| t.is_active())
    }

    pub fn joins(&self) -> &BTreeMap<String, JoinState> {
        &self.joins
    }

    pub fn history(&self) -> &[HistoryEvent] {
        &self.history
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    pub fn status(&self) -> InstanceStatus {
        if self.completed {
            InstanceStatus::Completed
        } else {
            InstanceStatus::Running
        }
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Tokens parked on user tasks, in token-creation order.
    pub fn ready_tasks(&self, definition: &ProcessDefinition, default_assignee_key: &str) -> Vec<ReadyTask> {
        self.active_tokens()
            .filter_map(|token| {
                let task_id = token.task_id?;
                let node = definition.node_by_id(&token.node)?;
                if node.kind != NodeKind::UserTask {
                    return None;
                }
                let key = node.assignee.as_deref().unwrap_or(default_assignee_key);
                let assigned_to = self.variables.get(key).and_then(|v| v.as_str()).map(str::to_string);
                Some(ReadyTask {
                    id: task_id,
                    node_id: node.id.clone(),
                    name: node.name.clone(),
                    token_id: token.id,
                    assigned_to,
                    data: self.variables.clone(),
                })
            })
            .collect()
    }

    pub(crate) fn find_task(&self, task_id: Uuid) -> Option<usize> {
        self.tokens
            .iter()
            .position(|t| t.is_active() && t.task_id == Some(task_id))
    }

    pub(crate) fn merge_variables(&mut self, data: Variables) {
        self.variables.extend(data);
    }

    pub(crate) fn record_task_completion(&mut self, token_index: usize) {
        let token = &self.tokens[token_index];
        if let Some(task_id) = token.task_id {
            self.history.push(HistoryEvent::TaskCompleted {
                node: token.node.clone(),
                token: token.id,
                task_id,
                at: Utc::now(),
            });
        }
    }

    /// Creates a waiting token at `node`; user tasks get a fresh task id.
    fn spawn(
        &mut self,
        definition: &ProcessDefinition,
        node: &str,
        arrived_via: Option<String>,
        fork: Option<ForkOrigin>,
    ) -> Uuid {
        let task_id = is_user_task(definition, node).then(Uuid::new_v4);
        let token = Token {
            id: Uuid::new_v4(),
            seq: self.next_seq,
            node: node.to_string(),
            state: TokenState::Waiting,
            arrived_via,
            task_id,
            fork,
        };
        self.next_seq += 1;
        self.history.push(HistoryEvent::NodeEntered {
            node: node.to_string(),
            token: token.id,
            at: Utc::now(),
        });
        let id = token.id;
        self.tokens.push(token);
        id
    }

    fn consume(&mut self, token_index: usize) {
        let token = &mut self.tokens[token_index];
        token.state = TokenState::Consumed;
        token.task_id = None;
    }

    /// Applies the outcome of one successful node step.
    pub(crate) fn apply(&mut self, definition: &ProcessDefinition, token_index: usize, effects: StepEffects) {
        let now = Utc::now();
        for (key, value) in effects.writes {
            self.variables.insert(key, value);
        }

        let token_id = self.tokens[token_index].id;
        let node_id = self.tokens[token_index].node.clone();

        match effects.transition {
            Transition::Stay => {}
            Transition::Jump(flow) => self.move_token(definition, token_index, flow),
            Transition::Fork(flows) => {
                self.consume(token_index);
                let into = flows
                    .into_iter()
                    .map(|flow| {
                        let flow_id = definition.flow(flow).id.clone();
                        self.history.push(HistoryEvent::NodeLeft {
                            node: node_id.clone(),
                            token: token_id,
                            flow: flow_id.clone(),
                            at: now,
                        });
                        let origin = ForkOrigin { gateway: node_id.clone(), flow: flow_id.clone() };
                        let target = definition.target_id(flow).to_string();
                        self.spawn(definition, &target, Some(flow_id), Some(origin))
                    })
                    .collect();
                self.history.push(HistoryEvent::TokensForked {
                    node: node_id,
                    from: token_id,
                    into,
                    at: now,
                });
            }
            Transition::Arrive => {
                let flow = self.tokens[token_index].arrived_via.clone().unwrap_or_default();
                self.consume(token_index);
                self.joins
                    .entry(node_id.clone())
                    .or_default()
                    .arrivals
                    .entry(flow.clone())
                    .or_default()
                    .push(token_id);
                self.history.push(HistoryEvent::BranchArrived {
                    node: node_id,
                    token: token_id,
                    flow,
                    at: now,
                });
            }
            Transition::Merge(flows) => {
                let via = self.tokens[token_index].arrived_via.clone().unwrap_or_default();
                self.consume(token_index);
                let mut merged = vec![token_id];
                if let Some(index) = definition.node_index(&node_id) {
                    let mut state = self.joins.remove(&node_id).unwrap_or_default();
                    for &incoming in &definition.node(index).incoming {
                        let flow_id = &definition.flow(incoming).id;
                        if *flow_id == via {
                            continue;
                        }
                        // oldest arrival per branch; later ones wait for the next round
                        if let Some(waiting) = state.arrivals.get_mut(flow_id) {
                            if !waiting.is_empty() {
                                merged.push(waiting.remove(0));
                            }
                        }
                    }
                    state.arrivals.retain(|_, tokens| !tokens.is_empty());
                    if !state.arrivals.is_empty() {
                        self.joins.insert(node_id.clone(), state);
                    }
                }
                let into = flows
                    .into_iter()
                    .map(|flow| {
                        let flow_id = definition.flow(flow).id.clone();
                        let target = definition.target_id(flow).to_string();
                        self.spawn(definition, &target, Some(flow_id), None)
                    })
                    .collect();
                self.history.push(HistoryEvent::TokensJoined {
                    node: node_id,
                    merged,
                    into,
                    at: now,
                });
            }
            Transition::Terminate => {
                self.consume(token_index);
                self.history.push(HistoryEvent::TokenConsumed {
                    node: node_id,
                    token: token_id,
                    at: now,
                });
            }
        }

        // arrivals parked at a join that never fired keep the instance running
        if !self.completed && self.active_tokens().next().is_none() && self.joins.is_empty() {
            self.completed = true;
            self.history.push(HistoryEvent::InstanceCompleted { at: now });
        }
        self.updated_at = now;
    }

    fn move_token(&mut self, definition: &ProcessDefinition, token_index: usize, flow: FlowIndex) {
        let flow_id = definition.flow(flow).id.clone();
        let target = definition.target_id(flow).to_string();
        let now = Utc::now();

        let task_id = is_user_task(definition, &target).then(Uuid::new_v4);
        let token = &mut self.tokens[token_index];
        self.history.push(HistoryEvent::NodeLeft {
            node: token.node.clone(),
            token: token.id,
            flow: flow_id.clone(),
            at: now,
        });
        token.node = target.clone();
        token.arrived_via = Some(flow_id);
        token.task_id = task_id;
        self.history.push(HistoryEvent::NodeEntered {
            node: target,
            token: token.id,
            at: now,
        });
    }
}

fn is_user_task(definition: &ProcessDefinition, node: &str) -> bool {
    definition
        .node_by_id(node)
        .is_some_and(|n| n.kind == NodeKind::UserTask)
}
