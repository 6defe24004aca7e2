use async_trait::async_trait;
use redis::AsyncCommands;
use uuid::Uuid;

use crate::error::StoreError;
use crate::runtime::snapshot::Snapshot;
use crate::runtime::storage::{SnapshotStore, StoredSnapshot, conflict};

/// Snapshots in a Redis hash per instance (`version`, `snapshot` fields).
pub struct RedisSnapshotStore {
    client: redis::Client,
    prefix: String,
}

impl RedisSnapshotStore {
    pub fn new(client: redis::Client) -> Self {
        Self::with_prefix(client, "leaveflow")
    }

    pub fn with_prefix(client: redis::Client, prefix: &str) -> Self {
        Self {
            client,
            prefix: prefix.to_string(),
        }
    }

    fn key(&self, instance_id: Uuid) -> String {
        format!("{}:inst:{}", self.prefix, instance_id)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(backend)
    }
}

fn backend(e: redis::RedisError) -> StoreError {
    StoreError::Backend(e.into())
}

// KEYS[1] = instance hash
// ARGV[1] = expected version ("" when creating)
// ARGV[2] = snapshot payload
// Returns the new version, or -1 when the stored version differs.
const SAVE_SCRIPT: &str = r#"
    local current = redis.call("HGET", KEYS[1], "version")
    local expected = ARGV[1]

    if current == false then
        if expected ~= "" then
            return -1
        end
        redis.call("HSET", KEYS[1], "version", 1, "snapshot", ARGV[2])
        return 1
    end

    if current ~= expected then
        return -1
    end

    local next = tonumber(current) + 1
    redis.call("HSET", KEYS[1], "version", next, "snapshot", ARGV[2])
    return next
"#;

#[async_trait]
impl SnapshotStore for RedisSnapshotStore {
    async fn load(&self, instance_id: Uuid) -> Result<Option<StoredSnapshot>, StoreError> {
        let mut conn = self.connection().await?;
        let (version, snapshot): (Option<u64>, Option<String>) = redis::pipe()
            .hget(self.key(instance_id), "version")
            .hget(self.key(instance_id), "snapshot")
            .query_async(&mut conn)
            .await
            .map_err(backend)?;

        match (version, snapshot) {
            (Some(version), Some(raw)) => Ok(Some(StoredSnapshot {
                snapshot: Snapshot::from_string(raw),
                version,
            })),
            (None, None) => Ok(None),
            _ => Err(StoreError::Snapshot(format!("incomplete record for instance {}", instance_id))),
        }
    }

    async fn save(&self, instance_id: Uuid, snapshot: &Snapshot, expected_version: Option<u64>) -> Result<u64, StoreError> {
        let mut conn = self.connection().await?;
        let expected = expected_version.map(|v| v.to_string()).unwrap_or_default();

        let new_version: i64 = redis::Script::new(SAVE_SCRIPT)
            .key(self.key(instance_id))
            .arg(expected)
            .arg(snapshot.as_str())
            .invoke_async(&mut conn)
            .await
            .map_err(backend)?;

        if new_version < 0 {
            let actual: Option<u64> = conn.hget(self.key(instance_id), "version").await.map_err(backend)?;
            return Err(conflict(instance_id, expected_version, actual));
        }
        Ok(new_version as u64)
    }

    async fn delete(&self, instance_id: Uuid) -> Result<bool, StoreError> {
        let mut conn = self.connection().await?;
        let removed: i64 = conn.del(self.key(instance_id)).await.map_err(backend)?;
        Ok(removed > 0)
    }
}
