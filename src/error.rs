//! Error types for definition loading, execution and snapshot persistence.

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the engine and its definition loader.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("process definition not found: {model_id}")]
    DefinitionNotFound { model_id: String },

    #[error("process definition '{model_id}' is invalid: {reason}")]
    DefinitionInvalid { model_id: String, reason: String },

    #[error("snapshot is corrupt: {0}")]
    SnapshotCorrupt(String),

    #[error("snapshot belongs to definition {found}, expected {expected}")]
    DefinitionMismatch { expected: String, found: String },

    #[error("task not found: {0}")]
    TaskNotFound(Uuid),

    #[error("no outgoing flow of node '{node}' matched and no default flow exists")]
    NoMatchingFlow { node: String },

    #[error("hook not registered: {0}")]
    HookNotRegistered(String),

    #[error("hook '{hook}' failed at node '{node}': {source}")]
    HookExecutionError {
        hook: String,
        node: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("advance exceeded the budget of {limit} transitions")]
    ExecutionBudgetExceeded { limit: usize },

    #[error("failed to read process model {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

impl EngineError {
    pub(crate) fn invalid(model_id: &str, reason: impl Into<String>) -> Self {
        EngineError::DefinitionInvalid {
            model_id: model_id.to_string(),
            reason: reason.into(),
        }
    }
}

/// Errors from snapshot stores.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("instance {instance_id} not found")]
    NotFound { instance_id: Uuid },

    #[error("version conflict for instance {instance_id}: expected {expected:?}, stored {actual:?}")]
    VersionConflict {
        instance_id: Uuid,
        expected: Option<u64>,
        actual: Option<u64>,
    },

    #[error("stored record is unreadable: {0}")]
    Snapshot(String),

    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

pub type Result<T, E = EngineError> = std::result::Result<T, E>;
