//! Opaque, versioned persistence form of a `ProcessInstance`.
//!
//! The payload is JSON:
//! `{"format": "leaveflow/instance", "version": 1, "instance": {...}}`.
//! Callers should treat it as a blob; only this module reads it.

use std::collections::HashSet;
use std::fmt;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{EngineError, Result};
use crate::runtime::definition::{DefinitionRef, NodeKind, ProcessDefinition};
use crate::runtime::instance::ProcessInstance;

pub const SNAPSHOT_FORMAT: &str = "leaveflow/instance";
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Snapshot(String);

impl Snapshot {
    pub fn from_string(raw: String) -> Self {
        Self(raw)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Snapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Serialize)]
struct EnvelopeRef<'a> {
    format: &'a str,
    version: u32,
    instance: &'a ProcessInstance,
}

#[derive(Deserialize)]
struct Envelope {
    format: String,
    version: u32,
    instance: ProcessInstance,
}

pub fn serialize(instance: &ProcessInstance) -> Snapshot {
    let envelope = EnvelopeRef {
        format: SNAPSHOT_FORMAT,
        version: SNAPSHOT_VERSION,
        instance,
    };
    // string-keyed maps and derived structs only
    let raw = serde_json::to_string(&envelope).expect("process instance is always representable as JSON");
    Snapshot(raw)
}

/// Restores an instance. Fails with `SnapshotCorrupt` when the payload is
/// unreadable or inconsistent with `definition`, and with
/// `DefinitionMismatch` when it was taken against another definition.
pub fn deserialize(snapshot: &Snapshot, definition: &ProcessDefinition) -> Result<ProcessInstance> {
    let envelope: Envelope =
        serde_json::from_str(&snapshot.0).map_err(|e| EngineError::SnapshotCorrupt(e.to_string()))?;
    if envelope.format != SNAPSHOT_FORMAT {
        return Err(EngineError::SnapshotCorrupt(format!("unknown format '{}'", envelope.format)));
    }
    if envelope.version != SNAPSHOT_VERSION {
        return Err(EngineError::SnapshotCorrupt(format!(
            "unsupported snapshot version {}",
            envelope.version
        )));
    }

    let instance = envelope.instance;
    if instance.definition() != definition.reference() {
        return Err(EngineError::DefinitionMismatch {
            expected: definition.reference().to_string(),
            found: instance.definition().to_string(),
        });
    }
    validate(&instance, definition)?;
    Ok(instance)
}

#[derive(Deserialize)]
struct Header {
    format: String,
    instance: HeaderInstance,
}

#[derive(Deserialize)]
struct HeaderInstance {
    id: Uuid,
    definition: DefinitionRef,
}

/// Reads the instance id and definition a snapshot was taken against,
/// without restoring it. Lets callers pick the definition to restore with.
pub fn peek(snapshot: &Snapshot) -> Result<(Uuid, DefinitionRef)> {
    let header: Header =
        serde_json::from_str(&snapshot.0).map_err(|e| EngineError::SnapshotCorrupt(e.to_string()))?;
    if header.format != SNAPSHOT_FORMAT {
        return Err(EngineError::SnapshotCorrupt(format!("unknown format '{}'", header.format)));
    }
    Ok((header.instance.id, header.instance.definition))
}

fn validate(instance: &ProcessInstance, definition: &ProcessDefinition) -> Result<()> {
    let corrupt = |msg: String| Err(EngineError::SnapshotCorrupt(msg));

    let mut ids = HashSet::new();
    for (i, token) in instance.tokens.iter().enumerate() {
        if !ids.insert(token.id) {
            return corrupt(format!("duplicate token {}", token.id));
        }
        if token.seq >= instance.next_seq || (i > 0 && token.seq <= instance.tokens[i - 1].seq) {
            return corrupt(format!("token {} is out of creation order", token.id));
        }
        if !token.is_active() {
            continue;
        }
        let Some(node) = definition.node_by_id(&token.node) else {
            return corrupt(format!("token {} sits at unknown node '{}'", token.id, token.node));
        };
        if (node.kind == NodeKind::UserTask) != token.task_id.is_some() {
            return corrupt(format!("token {} has an inconsistent task id", token.id));
        }
        if let Some(via) = &token.arrived_via {
            if definition.flow_by_id(via).is_none() {
                return corrupt(format!("token {} arrived via unknown flow '{}'", token.id, via));
            }
        }
    }

    for (node_id, join) in &instance.joins {
        let Some(node) = definition.node_by_id(node_id) else {
            return corrupt(format!("join state for unknown node '{}'", node_id));
        };
        if node.kind != NodeKind::ParallelGateway {
            return corrupt(format!("join state for non-parallel node '{}'", node_id));
        }
        for flow_id in join.arrivals.keys() {
            let incoming = node.incoming.iter().any(|&f| definition.flow(f).id == *flow_id);
            if !incoming {
                return corrupt(format!("join '{}' recorded arrival on foreign flow '{}'", node_id, flow_id));
            }
        }
    }

    let active = instance.active_tokens().count();
    if instance.completed && active > 0 {
        return corrupt("completed instance still has active tokens".to_string());
    }
    if instance.completed && !instance.joins.is_empty() {
        return corrupt("completed instance still has branches waiting at a join".to_string());
    }
    if !instance.completed && active == 0 && instance.joins.is_empty() {
        return corrupt("running instance has no active tokens".to_string());
    }
    Ok(())
}
