use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use uuid::Uuid;

use crate::compiler::loader::DefinitionLoader;
use crate::error::{EngineError, Result};
use crate::hooks::{Hook, HookRegistry};
use crate::nodes::action::UserTaskNode;
use crate::nodes::behavior_for;
use crate::runtime::context::StepContext;
use crate::runtime::definition::{NodeKind, ProcessDefinition};
use crate::runtime::instance::{InstanceStatus, ProcessInstance, Variables};
use crate::runtime::snapshot::{self, Snapshot};
use crate::runtime::syscall::{StepEffects, Syscall};
use crate::runtime::task::ReadyTask;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Upper bound on automatic transitions per advance.
    pub max_transitions: usize,
    /// Root of the process model directory.
    pub process_dir: PathBuf,
    /// Variable read for a task's assignee when the task names none.
    pub default_assignee_key: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_transitions: 10_000,
            process_dir: PathBuf::from("process_models"),
            default_assignee_key: "assigned_to".to_string(),
        }
    }
}

impl EngineConfig {
    pub fn from_yaml_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        serde_yaml::from_str(&content).with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

/// Result of completing a task on an in-memory instance.
#[derive(Debug, Clone, PartialEq)]
pub struct Completion {
    pub ready_tasks: Vec<ReadyTask>,
    pub completed: bool,
}

/// Snapshot-level result of `start_process` and `complete`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessOutcome {
    pub instance_id: Uuid,
    pub model_id: String,
    pub status: InstanceStatus,
    pub completed: bool,
    pub snapshot: Snapshot,
    pub ready_tasks: Vec<ReadyTask>,
    pub variables: Variables,
}

impl ProcessOutcome {
    fn of(definition: &ProcessDefinition, instance: &ProcessInstance, ready_tasks: Vec<ReadyTask>) -> Self {
        Self {
            instance_id: instance.id(),
            model_id: definition.model_id().to_string(),
            status: instance.status(),
            completed: instance.is_completed(),
            snapshot: snapshot::serialize(instance),
            ready_tasks,
            variables: instance.variables().clone(),
        }
    }
}

/// Executes process instances. Holds no per-instance state: every call gets
/// the instance (or its snapshot) from the caller and hands it back.
pub struct Engine {
    config: EngineConfig,
    hooks: HookRegistry,
    loader: DefinitionLoader,
}

impl Engine {
    /// Engine reading models from `config.process_dir`.
    pub fn new(config: EngineConfig) -> Self {
        let loader = DefinitionLoader::from_dir(config.process_dir.clone());
        Self::with_loader(config, loader)
    }

    pub fn with_loader(config: EngineConfig, loader: DefinitionLoader) -> Self {
        Self {
            config,
            hooks: HookRegistry::new(),
            loader,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn register_hook(&mut self, hook: Arc<dyn Hook>) {
        self.hooks.register(hook);
    }

    pub fn hooks(&self) -> &HookRegistry {
        &self.hooks
    }

    pub fn hooks_mut(&mut self) -> &mut HookRegistry {
        &mut self.hooks
    }

    pub fn loader(&self) -> &DefinitionLoader {
        &self.loader
    }

    pub fn load_definition(&self, model_id: &str) -> Result<Arc<ProcessDefinition>> {
        self.loader.load(model_id)
    }

    // --- Instance-level operations ---

    /// Creates an instance with one token on the start node without running
    /// anything. Model defaults sit under `variables`.
    pub fn instantiate(&self, definition: &ProcessDefinition, variables: Variables) -> ProcessInstance {
        let mut bag = definition.variables().clone();
        bag.extend(variables);
        ProcessInstance::new(definition, bag)
    }

    /// Creates an instance and advances it until it blocks on user tasks or
    /// completes.
    ///
    /// On error no instance is returned. Callers that need the state left
    /// before the failing node use [`Engine::instantiate`] followed by
    /// [`Engine::resume`]: the instance then keeps every step that succeeded
    /// and `resume` can be called again once the cause is fixed.
    pub fn start(&self, definition: &ProcessDefinition, variables: Variables) -> Result<(ProcessInstance, Vec<ReadyTask>)> {
        let mut instance = self.instantiate(definition, variables);
        info!(instance_id = %instance.id(), model_id = %definition.model_id(), "starting process instance");
        self.advance(definition, &mut instance)?;
        let ready = self.list_ready_tasks(definition, &instance);
        Ok((instance, ready))
    }

    pub fn list_ready_tasks(&self, definition: &ProcessDefinition, instance: &ProcessInstance) -> Vec<ReadyTask> {
        instance.ready_tasks(definition, &self.config.default_assignee_key)
    }

    /// Completes a ready task: merges `data`, moves its token on and
    /// advances. Unknown or already completed ids fail with `TaskNotFound`
    /// and leave the instance untouched.
    ///
    /// If a later step of the advance fails, the completion itself stays
    /// applied and the instance is left before the failing node.
    pub fn complete_task(
        &self,
        definition: &ProcessDefinition,
        instance: &mut ProcessInstance,
        task_id: Uuid,
        data: Variables,
    ) -> Result<Completion> {
        check_reference(definition, instance)?;
        let token_index = instance.find_task(task_id).ok_or(EngineError::TaskNotFound(task_id))?;

        let mut staged = instance.variables().clone();
        staged.extend(data.clone());

        let flow = {
            let token = &instance.tokens()[token_index];
            let node_index = definition
                .node_index(&token.node)
                .ok_or_else(|| EngineError::SnapshotCorrupt(format!("unknown node '{}'", token.node)))?;
            let ctx = StepContext {
                definition,
                instance,
                node_index,
                node: definition.node(node_index),
                token,
                hooks: &self.hooks,
            };
            UserTaskNode::leave(&ctx, &staged)?
        };

        instance.merge_variables(data);
        instance.record_task_completion(token_index);
        let mut effects = StepEffects::new();
        effects.jump(flow);
        instance.apply(definition, token_index, effects);
        info!(instance_id = %instance.id(), %task_id, "task completed");

        self.advance(definition, instance)?;
        Ok(Completion {
            ready_tasks: self.list_ready_tasks(definition, instance),
            completed: instance.is_completed(),
        })
    }

    /// Runs the advance loop again, e.g. after a hook failure was fixed.
    pub fn resume(&self, definition: &ProcessDefinition, instance: &mut ProcessInstance) -> Result<Vec<ReadyTask>> {
        check_reference(definition, instance)?;
        self.advance(definition, instance)?;
        Ok(self.list_ready_tasks(definition, instance))
    }

    /// Steps the earliest-created runnable token until every token waits on
    /// a user task or is consumed. Each step either fully applies or leaves
    /// the instance untouched.
    fn advance(&self, definition: &ProcessDefinition, instance: &mut ProcessInstance) -> Result<()> {
        let mut transitions = 0usize;

        while let Some(token_index) = next_runnable(definition, instance) {
            if transitions >= self.config.max_transitions {
                return Err(EngineError::ExecutionBudgetExceeded {
                    limit: self.config.max_transitions,
                });
            }
            transitions += 1;

            let effects = {
                let token = &instance.tokens()[token_index];
                let node_index = definition
                    .node_index(&token.node)
                    .ok_or_else(|| EngineError::SnapshotCorrupt(format!("unknown node '{}'", token.node)))?;
                let node = definition.node(node_index);
                let ctx = StepContext {
                    definition,
                    instance,
                    node_index,
                    node,
                    token,
                    hooks: &self.hooks,
                };
                let mut effects = StepEffects::new();
                behavior_for(node.kind).execute(&ctx, &mut effects)?;
                debug!(
                    instance_id = %instance.id(),
                    node = %node.id,
                    token = %token.id,
                    transition = ?effects.transition(),
                    "node executed"
                );
                effects
            };
            instance.apply(definition, token_index, effects);
        }

        if instance.is_completed() {
            info!(instance_id = %instance.id(), transitions, "process instance completed");
        }
        Ok(())
    }

    // --- Snapshot-level operations ---

    pub fn start_process(&self, model_id: &str, variables: Variables) -> Result<ProcessOutcome> {
        let definition = self.load_definition(model_id)?;
        let (instance, ready) = self.start(&definition, variables)?;
        info!(instance_id = %instance.id(), ready_tasks = ready.len(), "process started");
        Ok(ProcessOutcome::of(&definition, &instance, ready))
    }

    pub fn restore(&self, model_id: &str, snapshot: &Snapshot) -> Result<(Arc<ProcessDefinition>, ProcessInstance)> {
        let definition = self.load_definition(model_id)?;
        let instance = snapshot::deserialize(snapshot, &definition)?;
        Ok((definition, instance))
    }

    /// Ready tasks of a stored instance, optionally only those assigned to `assignee`.
    pub fn ready_tasks(&self, model_id: &str, snapshot: &Snapshot, assignee: Option<&str>) -> Result<Vec<ReadyTask>> {
        let (definition, instance) = self.restore(model_id, snapshot)?;
        let mut tasks = self.list_ready_tasks(&definition, &instance);
        if let Some(assignee) = assignee {
            tasks.retain(|t| t.assigned_to.as_deref() == Some(assignee));
        }
        Ok(tasks)
    }

    /// Completes a task of a stored instance. On error the caller's snapshot
    /// stays the authoritative state.
    pub fn complete(&self, model_id: &str, snapshot: &Snapshot, task_id: Uuid, data: Variables) -> Result<ProcessOutcome> {
        let (definition, mut instance) = self.restore(model_id, snapshot)?;
        let completion = self.complete_task(&definition, &mut instance, task_id, data)?;
        Ok(ProcessOutcome::of(&definition, &instance, completion.ready_tasks))
    }

    pub fn is_completed(&self, model_id: &str, snapshot: &Snapshot) -> Result<bool> {
        let (_, instance) = self.restore(model_id, snapshot)?;
        Ok(instance.is_completed())
    }
}

fn check_reference(definition: &ProcessDefinition, instance: &ProcessInstance) -> Result<()> {
    if instance.definition() != definition.reference() {
        return Err(EngineError::DefinitionMismatch {
            expected: definition.reference().to_string(),
            found: instance.definition().to_string(),
        });
    }
    Ok(())
}

fn next_runnable(definition: &ProcessDefinition, instance: &ProcessInstance) -> Option<usize> {
    instance.tokens().iter().position(|token| {
        token.is_active()
            && definition
                .node_by_id(&token.node)
                .is_some_and(|node| node.kind != NodeKind::UserTask)
    })
}
