use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::runtime::instance::Variables;

/// A user task awaiting completion. Derived from token positions on demand,
/// never stored on its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadyTask {
    /// Stable until the task is completed.
    pub id: Uuid,
    pub node_id: String,
    pub name: String,
    pub token_id: Uuid,
    pub assigned_to: Option<String>,
    /// Copy of the variable bag at query time.
    pub data: Variables,
}
